//! Responses for Packet Switched Data Services Commands
use super::types::GPRSAttachedState;
use atat::atat_derive::AtatResp;

/// 18.14 GPRS attach or detach +CGATT
#[derive(Debug, Clone, AtatResp)]
pub struct GPRSAttached {
    #[at_arg(position = 0)]
    pub state: GPRSAttachedState,
}
