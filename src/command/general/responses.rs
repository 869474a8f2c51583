//! Responses for General Commands
use atat::atat_derive::AtatResp;
use heapless::String;

/// 4.5 Model identification +CGMM
#[derive(Debug, Clone)]
pub struct ModelId {
    pub model: String<32>,
}

impl atat::AtatResp for ModelId {}

/// 4.11 International mobile subscriber identification +CIMI
#[derive(Debug, Clone)]
pub struct Imsi {
    pub imsi: String<15>,
}

impl atat::AtatResp for Imsi {}

/// Mobile network operator profile +UMNOPROF
#[derive(Debug, Clone, AtatResp)]
pub struct MnoProfile {
    #[at_arg(position = 0)]
    pub profile: u8,
}
