//! Argument and parameter types used by Mobile equipment control and status Commands and Responses
use atat::atat_derive::AtatEnum;

#[derive(Debug, Clone, Copy, PartialEq, Eq, AtatEnum)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Functionality {
    /// 0: Sets the MT to minimum functionality (disable both transmit and
    /// receive RF circuits by deactivating both CS and PS services)
    Minimum = 0,
    /// 1 (factory-programmed value): sets the MT to full functionality, e.g.
    /// from airplane mode or minimum functionality
    Full = 1,
    /// 4: Disables both transmit and receive RF circuits by deactivating both
    /// CS and PS services and sets the MT into airplane mode
    AirplaneMode = 4,
    /// 15: MT silent reset (with detach from network and saving of NVM
    /// parameters), without reset of the SIM card
    SilentReset = 15,
    /// 16: MT silent reset (with detach from network and saving of NVM
    /// parameters), with reset of the SIM card
    SilentResetWithSimReset = 16,
}

impl Functionality {
    pub fn from_cfun(v: u8) -> Option<Self> {
        match v {
            0 => Some(Self::Minimum),
            1 => Some(Self::Full),
            4 => Some(Self::AirplaneMode),
            15 => Some(Self::SilentReset),
            16 => Some(Self::SilentResetWithSimReset),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, AtatEnum)]
pub enum ResetMode {
    /// 0 (default value): do not reset the MT before setting it to <fun>
    /// power level
    DontReset = 0,
    /// 1: reset the MT before setting it to <fun> power level
    Reset = 1,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, AtatEnum)]
pub enum TerminationErrorMode {
    /// 0: +CME ERROR: <err> result code disabled and ERROR used
    Disabled = 0,
    /// 1: +CME ERROR: <err> result code enabled and numeric <err> values used
    Enabled = 1,
    /// 2: +CME ERROR: <err> result code enabled and verbose <err> values used
    Verbose = 2,
}
