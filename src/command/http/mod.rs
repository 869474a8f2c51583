//! ### 28 - HTTP
//!
//! The module runs the HTTP client itself. A request names a file on the
//! module file system where the whole response (status line, headers and
//! body) is stored; completion is reported with the `+UUHTTPCR` URC.
pub mod types;
pub mod urc;

use core::fmt::Write;
use heapless::String;
use types::*;

use super::{CmdWriter, NoResponse, ResponseReader};

/// 28.1 HTTP control +UHTTP
///
/// Sets one parameter of an HTTP profile. A profile is reset to factory
/// defaults when `AT+UHTTP=<profile_id>` is issued on its own.
#[derive(Clone)]
pub struct SetHttpProfileParameter<'a> {
    pub profile_id: u8,
    pub op_code: HttpOpCode,
    pub value: HttpParamValue<'a>,
}

impl atat::AtatCmd for SetHttpProfileParameter<'_> {
    type Response = NoResponse;

    const MAX_LEN: usize = 1100;

    fn write(&self, buf: &mut [u8]) -> usize {
        let mut w = CmdWriter::new(buf);
        let _ = write!(w, "AT+UHTTP={},{},", self.profile_id, self.op_code as u8);
        let _ = match self.value {
            HttpParamValue::Int(v) => write!(w, "{}", v),
            HttpParamValue::Str(s) => w.quoted(s),
        };
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

/// 28.1 HTTP control +UHTTP, op code 6
///
/// Switches HTTPS on or off, optionally binding a USECMNG security profile.
#[derive(Clone)]
pub struct SetHttpSecurity {
    pub profile_id: u8,
    pub enabled: bool,
    pub security_profile: Option<u8>,
}

impl atat::AtatCmd for SetHttpSecurity {
    type Response = NoResponse;

    const MAX_LEN: usize = 24;

    fn write(&self, buf: &mut [u8]) -> usize {
        let mut w = CmdWriter::new(buf);
        let _ = write!(
            w,
            "AT+UHTTP={},{},{}",
            self.profile_id,
            HttpOpCode::Secure as u8,
            self.enabled as u8
        );
        if let Some(profile) = self.security_profile {
            let _ = write!(w, ",{}", profile);
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

/// 28.1 Read HTTP security setting +UHTTP=<profile_id>,6
#[derive(Clone)]
pub struct GetHttpSecurity {
    pub profile_id: u8,
}

impl atat::AtatCmd for GetHttpSecurity {
    type Response = HttpSecurity;

    const MAX_LEN: usize = 16;

    fn write(&self, buf: &mut [u8]) -> usize {
        let mut w = CmdWriter::new(buf);
        let _ = write!(w, "AT+UHTTP={},{}", self.profile_id, HttpOpCode::Secure as u8);
        w.finish()
    }

    fn parse(
        &self,
        resp: Result<&[u8], atat::InternalError>,
    ) -> Result<Self::Response, atat::Error> {
        let resp = resp.map_err(atat::Error::from)?;
        let mut reader = ResponseReader::new(resp);
        if !reader.next_line("+UHTTP:") {
            return Err(atat::Error::Parse);
        }
        reader.skip(2);
        let enabled = reader.read_int().ok_or(atat::Error::Parse)? == 1;
        let security_profile = reader.read_int().map(|p| p as u8);
        Ok(HttpSecurity {
            enabled,
            security_profile,
        })
    }
}

/// 28.2 HTTP command +UHTTPC
///
/// Triggers the request. The module answers `OK` straight away and reports
/// the outcome later with `+UUHTTPCR: <profile_id>,<http_command>,
/// <http_result>`.
#[derive(Clone)]
pub struct SendHttpRequest<'a> {
    pub profile_id: u8,
    pub command: HttpCommand,
    pub path: &'a str,
    pub response_filename: &'a str,
    /// Body (or the name of a file holding it) and its content type, for
    /// PUT and POST.
    pub payload: Option<HttpPayload<'a>>,
}

impl atat::AtatCmd for SendHttpRequest<'_> {
    type Response = NoResponse;

    const MAX_LEN: usize = 1024;
    const MAX_TIMEOUT_MS: u32 = 10_000;
    const ATTEMPTS: u8 = 1;

    fn write(&self, buf: &mut [u8]) -> usize {
        let mut w = CmdWriter::new(buf);
        let _ = write!(w, "AT+UHTTPC={},{},", self.profile_id, self.command as u8);
        let _ = w.quoted(self.path);
        let _ = w.write_char(',');
        let _ = w.quoted(self.response_filename);
        if let Some(payload) = &self.payload {
            let _ = w.write_char(',');
            let _ = w.quoted(payload.data);
            let _ = w.write_str(",6,");
            let _ = w.quoted(payload.content_type);
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

/// 28.3 HTTP protocol error +UHTTPER
#[derive(Clone)]
pub struct GetHttpError {
    pub profile_id: u8,
}

impl atat::AtatCmd for GetHttpError {
    type Response = HttpError;

    const MAX_LEN: usize = 16;

    fn write(&self, buf: &mut [u8]) -> usize {
        let mut w = CmdWriter::new(buf);
        let _ = write!(w, "AT+UHTTPER={}", self.profile_id);
        w.finish()
    }

    fn parse(
        &self,
        resp: Result<&[u8], atat::InternalError>,
    ) -> Result<Self::Response, atat::Error> {
        let resp = resp.map_err(atat::Error::from)?;
        let mut reader = ResponseReader::new(resp);
        if !reader.next_line("+UHTTPER:") {
            return Err(atat::Error::Parse);
        }
        reader.skip(1);
        Ok(HttpError {
            error_class: reader.read_int().ok_or(atat::Error::Parse)?,
            error_code: reader.read_int().ok_or(atat::Error::Parse)?,
        })
    }
}

/// Name of the response file the driver picks when the caller gives none.
pub fn auto_response_filename(profile_id: u8) -> String<16> {
    let mut name = String::new();
    let _ = write!(name, "{}{}", HTTP_FILE_NAME_PREFIX, profile_id);
    name
}

/// Name of the file that carries a buffered PUT/POST body.
pub fn auto_body_filename(profile_id: u8) -> String<24> {
    let mut name = String::new();
    let _ = write!(name, "{}{}_putpost", HTTP_FILE_NAME_PREFIX, profile_id);
    name
}
