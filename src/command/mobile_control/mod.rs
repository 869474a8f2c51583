//! ### 5 - Mobile equipment control and status Commands
pub mod responses;
pub mod types;

use atat::atat_derive::AtatCmd;
use responses::*;
use types::*;

use super::NoResponse;

/// 5.3 Set module functionality +CFUN
///
/// Selects the level of functionality <fun> in the MT. Changing it too
/// quickly after the previous change is refused by several modules, see
/// `CellularConfig::CFUN_FLIP_DELAY_SECONDS`.
#[derive(Clone, AtatCmd)]
#[at_cmd("+CFUN", NoResponse, attempts = 1, timeout_ms = 180000)]
pub struct SetModuleFunctionality {
    #[at_arg(position = 0)]
    pub fun: Functionality,
    #[at_arg(position = 1)]
    pub rst: Option<ResetMode>,
}

/// 5.3 Read module functionality +CFUN
#[derive(Clone, AtatCmd)]
#[at_cmd("+CFUN?", ModuleFunctionality, timeout_ms = 180000)]
pub struct GetModuleFunctionality;

/// 5.19 Report mobile termination error +CMEE
///
/// Configures the formatting of the result code +CME ERROR: <err> as an
/// indication of an error relating to the functionality of the MT.
#[derive(Clone, AtatCmd)]
#[at_cmd("+CMEE", NoResponse)]
pub struct SetReportMobileTerminationError {
    #[at_arg(position = 0)]
    pub n: TerminationErrorMode,
}
