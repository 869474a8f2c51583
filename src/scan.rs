//! Decoding of network scan results: the operator list returned by
//! `AT+COPS=?` and the per-cell lines of the SARA-R5 extended search
//! `AT+COPS=5`.

use heapless::{Deque, String};

use crate::command::ResponseReader;
use crate::modules::Module;
use crate::registration::Rat;

/// Most operators kept from one scan.
pub const MAX_SCAN_RESULTS: usize = 32;

/// One network found by `AT+COPS=?`.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ScanResult {
    /// `<stat>`: 0 unknown, 1 available, 2 current, 3 forbidden.
    pub status: u8,
    pub name: String<64>,
    /// Numeric operator, MCC followed by the 2 or 3 digit MNC.
    pub mcc_mnc: String<6>,
    pub mcc: u16,
    pub mnc: u16,
    pub rat: Option<Rat>,
}

/// One cell found by the extended network search.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct CellInfo {
    pub mcc: u16,
    pub mnc: u16,
    pub tac: u32,
    pub cell_id: u32,
    pub earfcn_downlink: u32,
    pub earfcn_uplink: u32,
    pub physical_cell_id: u16,
    pub rsrp_dbm: Option<i32>,
    pub rsrq_db: Option<i32>,
}

/// Parse the answer to `AT+COPS=?` into `list`, returning how many entries
/// were added. Entries without a usable long name or numeric operator, as
/// well as the trailing `(<modes>),(<formats>)` groups, are skipped.
pub fn parse_operator_list<const N: usize>(
    raw: &[u8],
    module: &Module,
    list: &mut Deque<ScanResult, N>,
) -> usize {
    let raw = match raw.windows(6).position(|w| w == b"+COPS:") {
        Some(i) => &raw[i + 6..],
        None => raw,
    };

    let mut added = 0;
    for chunk in raw.split(|&b| b == b')') {
        let chunk = match chunk
            .iter()
            .position(|b| !matches!(b, b' ' | b',' | b'\r' | b'\n'))
        {
            Some(start) => &chunk[start..],
            None => continue,
        };
        let Some(params) = chunk.strip_prefix(b"(") else {
            continue;
        };
        let Some(result) = parse_operator(params, module) else {
            continue;
        };
        if list.push_back(result).is_err() {
            warn!("Scan result list full, dropping the rest");
            break;
        }
        added += 1;
    }
    added
}

fn parse_operator(params: &[u8], module: &Module) -> Option<ScanResult> {
    let mut reader = ResponseReader::from_params(params);
    let status = reader.read_int()?;

    let long_name = reader.read_raw()?;
    let name = match long_name {
        [b'"', inner @ .., b'"'] if !inner.is_empty() => core::str::from_utf8(inner).ok()?,
        _ => return None,
    };
    reader.skip(1);

    let numeric = reader.read_string()?;
    if !(5..=6).contains(&numeric.len()) || !numeric.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let (mcc, mnc) = numeric.split_at(3);

    let rat = reader
        .read_int()
        .and_then(Rat::from_3gpp)
        .map(|rat| module.map_rat(rat));

    Some(ScanResult {
        status: status as u8,
        name: truncated(name),
        mcc_mnc: String::try_from(numeric).ok()?,
        mcc: mcc.parse().ok()?,
        mnc: mnc.parse().ok()?,
        rat,
    })
}

fn truncated<const N: usize>(s: &str) -> String<N> {
    let mut out = String::new();
    for c in s.chars() {
        if out.push(c).is_err() {
            break;
        }
    }
    out
}

/// Parse one line of the `AT+COPS=5` answer. Lines missing any of the nine
/// fields yield `None`.
pub fn parse_cell_line(line: &str) -> Option<CellInfo> {
    let mut mcc = None;
    let mut mnc = None;
    let mut tac = None;
    let mut cell_id = None;
    let mut earfcn_downlink = None;
    let mut earfcn_uplink = None;
    let mut physical_cell_id = None;
    let mut rsrp = None;
    let mut rsrq = None;

    for token in line.split(',') {
        let Some((key, value)) = token.split_once(':') else {
            continue;
        };
        let value = value.trim().trim_matches('"');
        match key.trim() {
            "MCC" => mcc = value.parse().ok(),
            "MNC" => mnc = value.parse().ok(),
            "TAC" => tac = u32::from_str_radix(value, 16).ok(),
            "CI" => cell_id = u32::from_str_radix(value, 16).ok(),
            "DLF" => earfcn_downlink = value.parse().ok(),
            "ULF" => earfcn_uplink = value.parse().ok(),
            "PCI" => physical_cell_id = value.parse().ok(),
            "RSRP LEV" => rsrp = value.parse::<i32>().ok(),
            "RSRQ LEV" => rsrq = value.parse::<i32>().ok(),
            _ => {}
        }
    }

    Some(CellInfo {
        mcc: mcc?,
        mnc: mnc?,
        tac: tac?,
        cell_id: cell_id?,
        earfcn_downlink: earfcn_downlink?,
        earfcn_uplink: earfcn_uplink?,
        physical_cell_id: physical_cell_id?,
        rsrp_dbm: rsrp_to_dbm(rsrp?),
        rsrq_db: rsrq_to_db(rsrq?),
    })
}

/// Convert a 3GPP RSRP level (0..=97) to dBm. 255 and anything else out of
/// range means "not known".
pub fn rsrp_to_dbm(level: i32) -> Option<i32> {
    match level {
        0..=97 => Some(level - 141),
        _ => None,
    }
}

/// Convert a 3GPP RSRQ level (0..=34, or the extended -30..=46 range) to dB.
pub fn rsrq_to_db(level: i32) -> Option<i32> {
    match level {
        -30..=46 => Some((level - 40) / 2),
        _ => None,
    }
}
