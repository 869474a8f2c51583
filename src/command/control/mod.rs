//! ### 15 - V24 control and V25ter Commands
pub mod types;

use atat::atat_derive::AtatCmd;
use types::{Echo, FlowControl};

use super::NoResponse;

/// 15.25 Command echo E
///
/// Enables or disables the echo of characters received from the DTE. The
/// driver always runs with echo off.
#[derive(Clone, AtatCmd)]
#[at_cmd("E", NoResponse, value_sep = false)]
pub struct SetEcho {
    #[at_arg(position = 0)]
    pub enabled: Echo,
}

/// 15.8 DTE-DCE flow control &K
///
/// Controls the flow control mechanism. The setting is only relevant for the
/// physical UART, CMUX channels run their own credit based flow control.
#[derive(Clone, AtatCmd)]
#[at_cmd("&K", NoResponse, value_sep = false)]
pub struct SetFlowControl {
    #[at_arg(position = 0)]
    pub value: FlowControl,
}
