//! AT Commands for u-blox cellular module family\
//! Following the [u-blox cellular modules AT commands manual](https://www.u-blox.com/sites/default/files/u-blox-CEL_ATCommands_%28UBX-13002752%29.pdf)
//!
//! Commands whose answers only make sense with module specific knowledge
//! (registration status, context lists, scan results) return a
//! [`RawResponse`] that is picked apart with a [`ResponseReader`].

pub mod control;
pub mod device_lock;
pub mod general;
pub mod http;
pub mod mobile_control;
pub mod network_service;
pub mod psn;
mod reader;
pub mod system_features;

use atat::atat_derive::{AtatCmd, AtatResp};
use atat::digest::ParseError;
use heapless::Vec;

pub use reader::ResponseReader;

#[derive(Debug, Clone, AtatResp)]
pub struct NoResponse;

#[derive(Clone, AtatCmd)]
#[at_cmd("", NoResponse, attempts = 3, timeout_ms = 1000)]
pub struct AT;

/// Unparsed response body of a command, as handed over by the AT client.
#[derive(Debug, Clone, Default)]
pub struct RawResponse<const N: usize>(pub Vec<u8, N>);

impl<const N: usize> atat::AtatResp for RawResponse<N> {}

impl<const N: usize> RawResponse<N> {
    /// Store the response, dropping whatever does not fit.
    pub(crate) fn parse(resp: Result<&[u8], atat::InternalError>) -> Result<Self, atat::Error> {
        let resp = resp.map_err(atat::Error::from)?;
        let len = resp.len().min(N);
        Ok(Self(Vec::from_slice(&resp[..len]).unwrap_or_default()))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn reader(&self) -> ResponseReader<'_> {
        ResponseReader::new(&self.0)
    }
}

/// `core::fmt::Write` sink over the buffer handed to `AtatCmd::write`.
pub(crate) struct CmdWriter<'a> {
    buf: &'a mut [u8],
    pos: usize,
}

impl<'a> CmdWriter<'a> {
    pub(crate) fn new(buf: &'a mut [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    /// Append a quoted string parameter.
    pub(crate) fn quoted(&mut self, s: &str) -> core::fmt::Result {
        core::fmt::Write::write_char(self, '"')?;
        core::fmt::Write::write_str(self, s)?;
        core::fmt::Write::write_char(self, '"')
    }

    /// Terminate the command line and return its length.
    pub(crate) fn finish(mut self) -> usize {
        let _ = core::fmt::Write::write_str(&mut self, "\r\n");
        self.pos
    }
}

impl core::fmt::Write for CmdWriter<'_> {
    fn write_str(&mut self, s: &str) -> core::fmt::Result {
        let bytes = s.as_bytes();
        let end = self.pos + bytes.len();
        if end > self.buf.len() {
            return Err(core::fmt::Error);
        }
        self.buf[self.pos..end].copy_from_slice(bytes);
        self.pos = end;
        Ok(())
    }
}

/// Parameters of a `+CREG`/`+CGREG`/`+CEREG` line, kept verbatim.
///
/// The read command answer and the URC of these share the same prefix, so
/// both arrive through the URC channel and only the registration parser can
/// tell them apart.
pub type RegistrationParams = heapless::String<128>;

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Urc {
    NetworkRegistration(RegistrationParams),
    GPRSNetworkRegistration(RegistrationParams),
    EPSNetworkRegistration(RegistrationParams),
    DataConnectionDeactivated(psn::urc::DataConnectionDeactivated),
    SignalingConnectionStatus(network_service::urc::SignalingConnectionStatus),
    HttpResponse(http::urc::HttpResponse),
}

const URC_PREFIXES: [&[u8]; 6] = [
    b"+CREG:",
    b"+CGREG:",
    b"+CEREG:",
    b"+UUPSDD:",
    b"+CSCON:",
    b"+UUHTTPCR:",
];

impl atat::AtatUrc for Urc {
    type Response = Self;

    fn parse(resp: &[u8]) -> Option<Self::Response> {
        let line = trim(resp);
        let (prefix, params) = URC_PREFIXES
            .iter()
            .find(|p| line.starts_with(p))
            .map(|p| (*p, trim(&line[p.len()..])))?;

        let params_str = core::str::from_utf8(params).ok()?;
        let mut reader = ResponseReader::from_params(params);

        match prefix {
            b"+CREG:" => Some(Self::NetworkRegistration(
                RegistrationParams::try_from(params_str).ok()?,
            )),
            b"+CGREG:" => Some(Self::GPRSNetworkRegistration(
                RegistrationParams::try_from(params_str).ok()?,
            )),
            b"+CEREG:" => Some(Self::EPSNetworkRegistration(
                RegistrationParams::try_from(params_str).ok()?,
            )),
            b"+UUPSDD:" => Some(Self::DataConnectionDeactivated(
                psn::urc::DataConnectionDeactivated {
                    profile_id: reader.read_int()? as u8,
                },
            )),
            b"+CSCON:" => {
                let first = reader.read_int()?;
                // The `<n>,<mode>` form only answers the read command
                let mode = reader.read_int().unwrap_or(first);
                Some(Self::SignalingConnectionStatus(
                    network_service::urc::SignalingConnectionStatus { connected: mode == 1 },
                ))
            }
            b"+UUHTTPCR:" => Some(Self::HttpResponse(http::urc::HttpResponse {
                profile_id: reader.read_int()? as u8,
                command: reader.read_int()? as u8,
                result: reader.read_int()? as u8,
            })),
            _ => None,
        }
    }
}

impl atat::Parser for Urc {
    fn parse(buf: &[u8]) -> Result<(&[u8], usize), ParseError> {
        let start = buf
            .iter()
            .position(|b| !matches!(b, b'\r' | b'\n' | b' '))
            .ok_or(ParseError::NoMatch)?;
        let rest = &buf[start..];

        if !URC_PREFIXES.iter().any(|p| rest.starts_with(p)) {
            if URC_PREFIXES.iter().any(|p| p.starts_with(rest)) {
                return Err(ParseError::Incomplete);
            }
            return Err(ParseError::NoMatch);
        }

        match rest.windows(2).position(|w| w == b"\r\n") {
            Some(end) => Ok((&rest[..end], start + end + 2)),
            None => Err(ParseError::Incomplete),
        }
    }
}

fn trim(mut s: &[u8]) -> &[u8] {
    while let [b' ' | b'\r' | b'\n', rest @ ..] = s {
        s = rest;
    }
    while let [rest @ .., b' ' | b'\r' | b'\n'] = s {
        s = rest;
    }
    s
}

#[cfg(test)]
mod tests {
    use super::*;
    use atat::{AtatCmd, AtatUrc, Parser};

    #[test]
    fn at_is_bare() {
        let mut buf = [0u8; 16];
        let len = AT.write(&mut buf);
        assert_eq!(&buf[..len], b"AT\r\n");
    }

    #[test]
    fn parser_splits_registration_lines() {
        let buf = b"\r\n+CEREG: 4,5,\"2046\",\"07ba7016\",7\r\nOK\r\n";
        let (line, consumed) = <Urc as Parser>::parse(buf).unwrap();
        assert_eq!(line, b"+CEREG: 4,5,\"2046\",\"07ba7016\",7");
        assert_eq!(&buf[consumed..], b"OK\r\n");

        assert_eq!(
            <Urc as Parser>::parse(b"\r\n+CGR"),
            Err(ParseError::Incomplete)
        );
        assert_eq!(
            <Urc as Parser>::parse(b"\r\n+CGREG: 0"),
            Err(ParseError::Incomplete)
        );
        assert_eq!(<Urc as Parser>::parse(b"OK\r\n"), Err(ParseError::NoMatch));
    }

    #[test]
    fn urcs_are_decoded() {
        assert_eq!(
            <Urc as AtatUrc>::parse(b"+CGREG: 0,\"0000\",\"0000\""),
            Some(Urc::GPRSNetworkRegistration(
                RegistrationParams::try_from("0,\"0000\",\"0000\"").unwrap()
            ))
        );
        assert_eq!(
            <Urc as AtatUrc>::parse(b"+UUPSDD: 0"),
            Some(Urc::DataConnectionDeactivated(
                psn::urc::DataConnectionDeactivated { profile_id: 0 }
            ))
        );
        assert_eq!(
            <Urc as AtatUrc>::parse(b"+UUHTTPCR: 1,5,1"),
            Some(Urc::HttpResponse(http::urc::HttpResponse {
                profile_id: 1,
                command: 5,
                result: 1,
            }))
        );
        assert_eq!(
            <Urc as AtatUrc>::parse(b"+CSCON: 1"),
            Some(Urc::SignalingConnectionStatus(
                network_service::urc::SignalingConnectionStatus { connected: true }
            ))
        );
        assert_eq!(<Urc as AtatUrc>::parse(b"+UNKNOWN: 1"), None);
    }
}
