//! Unsolicited responses for Network service Commands

/// 7.33 Signalling connection status +CSCON
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SignalingConnectionStatus {
    pub connected: bool,
}
