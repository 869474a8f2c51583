//! Unsolicited responses for HTTP Commands

/// 28.2 HTTP command result +UUHTTPCR
///
/// `result` is 1 on success, 0 on failure; the cause of a failure is read
/// with `AT+UHTTPER`.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct HttpResponse {
    pub profile_id: u8,
    pub command: u8,
    pub result: u8,
}
