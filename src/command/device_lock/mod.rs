//! ### 9 - Security
use super::ResponseReader;

/// SIM readiness as reported by `+CPIN?`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PinStatusCode {
    /// MT is not pending for any password
    Ready,
    /// MT is waiting for the SIM PIN to be given
    SimPin,
    /// MT is waiting for the SIM PUK to be given
    SimPuk,
    Other,
}

#[derive(Debug, Clone)]
pub struct PinStatus {
    pub code: PinStatusCode,
}

impl atat::AtatResp for PinStatus {}

/// 9.1 Enter PIN +CPIN
///
/// Reads whether the SIM is ready or waiting for a PIN/PUK.
#[derive(Clone)]
pub struct GetPinStatus;

impl atat::AtatCmd for GetPinStatus {
    type Response = PinStatus;

    const MAX_LEN: usize = 10;
    const MAX_TIMEOUT_MS: u32 = 10_000;

    fn write(&self, buf: &mut [u8]) -> usize {
        let len = b"AT+CPIN?\r\n".len();
        buf[..len].copy_from_slice(b"AT+CPIN?\r\n");
        len
    }

    fn parse(
        &self,
        resp: Result<&[u8], atat::InternalError>,
    ) -> Result<Self::Response, atat::Error> {
        let resp = resp.map_err(atat::Error::from)?;
        let mut reader = ResponseReader::new(resp);
        if !reader.next_line("+CPIN:") {
            return Err(atat::Error::Parse);
        }

        let code = match reader.read_string() {
            Some("READY") => PinStatusCode::Ready,
            Some("SIM PIN") => PinStatusCode::SimPin,
            Some("SIM PUK") => PinStatusCode::SimPuk,
            _ => PinStatusCode::Other,
        };
        Ok(PinStatus { code })
    }
}
