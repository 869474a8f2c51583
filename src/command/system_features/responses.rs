//! Responses for System features Commands
use atat::atat_derive::AtatResp;

/// 19.8 Power saving control (Power SaVing) +UPSV
#[derive(Debug, Clone, AtatResp)]
pub struct PowerSavingControl {
    #[at_arg(position = 0)]
    pub mode: u8,
    #[at_arg(position = 1)]
    pub timeout: Option<u32>,
}
