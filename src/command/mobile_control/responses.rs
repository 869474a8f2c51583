//! Responses for Mobile equipment control and status Commands
use atat::atat_derive::AtatResp;

/// 5.3 Set module functionality +CFUN
///
/// `power_mode` is kept numeric, modules report values outside of what the
/// driver ever sets.
#[derive(Debug, Clone, AtatResp)]
pub struct ModuleFunctionality {
    #[at_arg(position = 0)]
    pub power_mode: u8,
    #[at_arg(position = 1)]
    pub stk_mode: Option<u8>,
}
