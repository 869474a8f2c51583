//! ### 7 - Network service
pub mod responses;
pub mod types;
pub mod urc;

use atat::atat_derive::AtatCmd;
use core::fmt::Write;
use responses::*;
use types::*;

use super::{CmdWriter, NoResponse, RawResponse, ResponseReader};

/// 7.4 Operator selection +COPS
///
/// Forces an attempt to select and register with the GSM/LTE network
/// operator, or changes the format in which `AT+COPS?` reports it.
#[derive(Clone)]
pub struct SetOperatorSelection<'a> {
    pub mode: OperatorSelectionMode,
    pub format: Option<u8>,
    /// Numeric MCC/MNC, only used in manual mode.
    pub oper: Option<&'a str>,
}

impl atat::AtatCmd for SetOperatorSelection<'_> {
    type Response = NoResponse;

    const MAX_LEN: usize = 32;
    const MAX_TIMEOUT_MS: u32 = 180_000;

    fn write(&self, buf: &mut [u8]) -> usize {
        let mut w = CmdWriter::new(buf);
        let _ = write!(w, "AT+COPS={}", self.mode as u8);
        if let Some(format) = self.format {
            let _ = write!(w, ",{}", format);
            if let Some(oper) = self.oper {
                let _ = w.write_char(',');
                let _ = w.quoted(oper);
            }
        }
        w.finish()
    }

    fn parse(
        &self,
        resp: Result<&[u8], atat::InternalError>,
    ) -> Result<Self::Response, atat::Error> {
        resp.map_err(atat::Error::from)?;
        Ok(NoResponse)
    }
}

/// 7.4 Read operator selection +COPS?
#[derive(Clone)]
pub struct GetOperatorSelection;

impl atat::AtatCmd for GetOperatorSelection {
    type Response = OperatorSelection;

    const MAX_LEN: usize = 10;
    const MAX_TIMEOUT_MS: u32 = 180_000;

    fn write(&self, buf: &mut [u8]) -> usize {
        let len = b"AT+COPS?\r\n".len();
        buf[..len].copy_from_slice(b"AT+COPS?\r\n");
        len
    }

    fn parse(
        &self,
        resp: Result<&[u8], atat::InternalError>,
    ) -> Result<Self::Response, atat::Error> {
        let resp = resp.map_err(atat::Error::from)?;
        let mut reader = ResponseReader::new(resp);
        if !reader.next_line("+COPS:") {
            return Err(atat::Error::Parse);
        }

        let mode = reader
            .read_int()
            .and_then(|m| OperatorSelectionMode::from_u8(m as u8))
            .ok_or(atat::Error::Parse)?;
        let format = reader.read_int().map(|f| f as u8);
        let oper = reader
            .read_string()
            .and_then(|s| heapless::String::try_from(s).ok());
        let act = reader.read_int().map(|a| a as u8);

        Ok(OperatorSelection {
            mode,
            format,
            oper,
            act,
        })
    }
}

/// 7.4 Operator list +COPS=?
///
/// Lists the operators present in the network. The answer arrives after up
/// to a few minutes, as one long line of `(<stat>,"<long>","<short>",
/// "<numeric>"[,<AcT>])` groups.
#[derive(Clone)]
pub struct GetOperatorList;

impl atat::AtatCmd for GetOperatorList {
    type Response = RawResponse<1280>;

    const MAX_LEN: usize = 11;
    const MAX_TIMEOUT_MS: u32 = 180_000;
    const ATTEMPTS: u8 = 1;

    fn write(&self, buf: &mut [u8]) -> usize {
        let len = b"AT+COPS=?\r\n".len();
        buf[..len].copy_from_slice(b"AT+COPS=?\r\n");
        len
    }

    fn parse(
        &self,
        resp: Result<&[u8], atat::InternalError>,
    ) -> Result<Self::Response, atat::Error> {
        RawResponse::parse(resp)
    }
}

/// 7.4 Extended network search +COPS=5
///
/// SARA-R5 only. Reports one line per detected cell:
/// `MCC:<mcc>, MNC:<mnc>, TAC:<tac>, CI:<ci>, DLF:<earfcn>, ULF:<earfcn>,
/// PCI:<pci>, RSRP LEV:<lev>, RSRQ LEV:<lev>`.
#[derive(Clone)]
pub struct ExtendedNetworkSearch;

impl atat::AtatCmd for ExtendedNetworkSearch {
    type Response = RawResponse<2048>;

    const MAX_LEN: usize = 11;
    const MAX_TIMEOUT_MS: u32 = 240_000;
    const ATTEMPTS: u8 = 1;

    fn write(&self, buf: &mut [u8]) -> usize {
        let len = b"AT+COPS=5\r\n".len();
        buf[..len].copy_from_slice(b"AT+COPS=5\r\n");
        len
    }

    fn parse(
        &self,
        resp: Result<&[u8], atat::InternalError>,
    ) -> Result<Self::Response, atat::Error> {
        RawResponse::parse(resp)
    }
}

/// 7.10 Network registration status +CREG
///
/// Configures the network registration information. `<n>` = 2 adds the
/// location information to the `+CREG` URC.
#[derive(Clone, AtatCmd)]
#[at_cmd("+CREG", NoResponse)]
pub struct SetNetworkRegistrationStatus {
    #[at_arg(position = 0)]
    pub n: u8,
}

/// 7.10 Read network registration status +CREG?
///
/// The answer shares its prefix with the `+CREG` URC, hence it is kept raw
/// and decoded with the same rules as the URC.
#[derive(Clone)]
pub struct GetNetworkRegistrationStatus;

impl atat::AtatCmd for GetNetworkRegistrationStatus {
    type Response = RawResponse<128>;

    const MAX_LEN: usize = 10;

    fn write(&self, buf: &mut [u8]) -> usize {
        let len = b"AT+CREG?\r\n".len();
        buf[..len].copy_from_slice(b"AT+CREG?\r\n");
        len
    }

    fn parse(
        &self,
        resp: Result<&[u8], atat::InternalError>,
    ) -> Result<Self::Response, atat::Error> {
        RawResponse::parse(resp)
    }
}

/// 7.33 Signalling connection status +CSCON
///
/// Enables the `+CSCON` URC, reporting whether the module has an RRC
/// connection to the base station.
#[derive(Clone, AtatCmd)]
#[at_cmd("+CSCON", NoResponse)]
pub struct SetSignallingConnectionStatusReporting {
    #[at_arg(position = 0)]
    pub enable: u8,
}

#[cfg(test)]
mod tests {
    use super::*;
    use atat::AtatCmd;

    fn written<C: AtatCmd>(cmd: &C) -> heapless::String<64> {
        let mut buf = [0u8; 64];
        let len = cmd.write(&mut buf);
        heapless::String::try_from(core::str::from_utf8(&buf[..len]).unwrap()).unwrap()
    }

    #[test]
    fn operator_selection_variants() {
        assert_eq!(
            written(&SetOperatorSelection {
                mode: OperatorSelectionMode::Automatic,
                format: None,
                oper: None,
            }),
            "AT+COPS=0\r\n"
        );
        assert_eq!(
            written(&SetOperatorSelection {
                mode: OperatorSelectionMode::Manual,
                format: Some(2),
                oper: Some("24001"),
            }),
            "AT+COPS=1,2,\"24001\"\r\n"
        );
        assert_eq!(
            written(&SetOperatorSelection {
                mode: OperatorSelectionMode::FormatOnly,
                format: Some(2),
                oper: None,
            }),
            "AT+COPS=3,2\r\n"
        );
    }

    #[test]
    fn operator_selection_is_read_back() {
        let sel = GetOperatorSelection
            .parse(Ok(&b"+COPS: 0,0,\"Telia S\",7"[..]))
            .unwrap();
        assert_eq!(sel.mode, OperatorSelectionMode::Automatic);
        assert_eq!(sel.format, Some(0));
        assert_eq!(sel.oper.as_deref(), Some("Telia S"));
        assert_eq!(sel.act, Some(7));

        let sel = GetOperatorSelection.parse(Ok(&b"+COPS: 2"[..])).unwrap();
        assert_eq!(sel.mode, OperatorSelectionMode::Deregister);
        assert_eq!(sel.oper, None);
    }
}
