//! Responses for Network service Commands
use super::types::OperatorSelectionMode;
use heapless::String;

/// 7.4 Operator selection +COPS
#[derive(Debug, Clone)]
pub struct OperatorSelection {
    pub mode: OperatorSelectionMode,
    pub format: Option<u8>,
    pub oper: Option<String<24>>,
    pub act: Option<u8>,
}

impl atat::AtatResp for OperatorSelection {}
