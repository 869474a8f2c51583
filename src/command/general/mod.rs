//! ### 4 - General Commands
pub mod responses;

use atat::atat_derive::AtatCmd;
use heapless::String;
use responses::*;

use super::ResponseReader;

/// 4.5 Model identification +CGMM
///
/// Text string identifying the model identification. Used to pick the module
/// descriptor at start-up.
#[derive(Clone)]
pub struct GetModelId;

impl atat::AtatCmd for GetModelId {
    type Response = ModelId;

    const MAX_LEN: usize = 9;

    fn write(&self, buf: &mut [u8]) -> usize {
        let len = b"AT+CGMM\r\n".len();
        buf[..len].copy_from_slice(b"AT+CGMM\r\n");
        len
    }

    fn parse(
        &self,
        resp: Result<&[u8], atat::InternalError>,
    ) -> Result<Self::Response, atat::Error> {
        let resp = resp.map_err(atat::Error::from)?;
        let mut reader = ResponseReader::new(resp);
        if !reader.next_line("") {
            return Err(atat::Error::Parse);
        }
        let line = core::str::from_utf8(reader.remainder()).map_err(|_| atat::Error::Parse)?;
        let mut model = String::new();
        for c in line.chars().take(model.capacity()) {
            let _ = model.push(c);
        }
        Ok(ModelId { model })
    }
}

/// 4.11 International mobile subscriber identification +CIMI
///
/// Request the IMSI (International Mobile Subscriber Identity). Fails until
/// the SIM has been read.
#[derive(Clone)]
pub struct GetCIMI;

impl atat::AtatCmd for GetCIMI {
    type Response = Imsi;

    const MAX_LEN: usize = 9;
    const MAX_TIMEOUT_MS: u32 = 10_000;

    fn write(&self, buf: &mut [u8]) -> usize {
        let len = b"AT+CIMI\r\n".len();
        buf[..len].copy_from_slice(b"AT+CIMI\r\n");
        len
    }

    fn parse(
        &self,
        resp: Result<&[u8], atat::InternalError>,
    ) -> Result<Self::Response, atat::Error> {
        let resp = resp.map_err(atat::Error::from)?;
        let mut reader = ResponseReader::new(resp);
        while reader.next_line("") {
            let line = reader.remainder();
            if line.len() >= 6 && line.iter().all(u8::is_ascii_digit) {
                let imsi = core::str::from_utf8(line).map_err(|_| atat::Error::Parse)?;
                return Ok(Imsi {
                    imsi: String::try_from(imsi).map_err(|_| atat::Error::Parse)?,
                });
            }
        }
        Err(atat::Error::Parse)
    }
}

/// 4.x Mobile network operator profile +UMNOPROF
///
/// Reads the MNO profile the module runs with. Some profiles forbid setting
/// the APN from the host.
#[derive(Clone, AtatCmd)]
#[at_cmd("+UMNOPROF?", MnoProfile)]
pub struct GetMnoProfile;
