//! Argument and parameter types used by HTTP Commands and Responses

/// Prefix of the files the driver creates on the module file system.
pub const HTTP_FILE_NAME_PREFIX: &str = "ubxlibhttp_";

/// `<op_code>` of `+UHTTP`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum HttpOpCode {
    ServerIp = 0,
    ServerName = 1,
    Username = 2,
    Password = 3,
    Authentication = 4,
    ServerPort = 5,
    Secure = 6,
    Timeout = 7,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpParamValue<'a> {
    Int(u32),
    Str(&'a str),
}

/// `<http_command>` of `+UHTTPC` and `+UUHTTPCR`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum HttpCommand {
    Head = 0,
    Get = 1,
    Delete = 2,
    Put = 3,
    /// POST of a file already on the module file system.
    PostFile = 4,
    /// POST of data given inline in the command.
    PostData = 5,
}

impl HttpCommand {
    pub fn from_u8(v: u8) -> Option<Self> {
        Some(match v {
            0 => Self::Head,
            1 => Self::Get,
            2 => Self::Delete,
            3 => Self::Put,
            4 => Self::PostFile,
            5 => Self::PostData,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HttpPayload<'a> {
    pub data: &'a str,
    pub content_type: &'a str,
}

#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct HttpSecurity {
    pub enabled: bool,
    pub security_profile: Option<u8>,
}

impl atat::AtatResp for HttpSecurity {}

#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct HttpError {
    pub error_class: i32,
    pub error_code: i32,
}

impl atat::AtatResp for HttpError {}
