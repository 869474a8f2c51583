use core::convert::Infallible;
use embedded_hal::digital::{ErrorType, InputPin, OutputPin, PinState};

use crate::command::psn::types::{AuthenticationMode, ContextId, ProfileId};

pub struct NoPin;

impl ErrorType for NoPin {
    type Error = core::convert::Infallible;
}

impl InputPin for NoPin {
    fn is_high(&mut self) -> Result<bool, Self::Error> {
        Ok(true)
    }

    fn is_low(&mut self) -> Result<bool, Self::Error> {
        Ok(false)
    }
}

impl OutputPin for NoPin {
    fn set_low(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }

    fn set_high(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }
}

/// Output pin wrapper for boards that put an inverting transistor in front
/// of `PWR_ON` or `RESET_N`.
pub struct ReverseOutputPin<P: OutputPin<Error = Infallible>>(pub P);

impl<P: OutputPin<Error = Infallible>> ErrorType for ReverseOutputPin<P> {
    type Error = Infallible;
}

impl<P: OutputPin<Error = Infallible>> OutputPin for ReverseOutputPin<P> {
    fn set_low(&mut self) -> Result<(), Self::Error> {
        self.0.set_high()
    }

    fn set_high(&mut self) -> Result<(), Self::Error> {
        self.0.set_low()
    }

    fn set_state(&mut self, state: PinState) -> Result<(), Self::Error> {
        self.0.set_state(!state)
    }
}

pub struct ReverseInputPin<P: InputPin<Error = Infallible>>(pub P);

impl<P: InputPin<Error = Infallible>> ErrorType for ReverseInputPin<P> {
    type Error = Infallible;
}

impl<P: InputPin<Error = Infallible>> InputPin for ReverseInputPin<P> {
    fn is_high(&mut self) -> Result<bool, Self::Error> {
        self.0.is_low()
    }

    fn is_low(&mut self) -> Result<bool, Self::Error> {
        self.0.is_high()
    }
}

/// Board and network configuration for the driver.
///
/// All timing and reporting knobs are associated constants with sensible
/// defaults, so overriding one in the implementing type is how a particular
/// application tunes the driver.
pub trait CellularConfig<'a> {
    type ResetPin: OutputPin;
    type PowerPin: OutputPin;
    type VintPin: InputPin;

    const FLOW_CONTROL: bool = false;
    const OPERATOR_FORMAT: OperatorFormat = OperatorFormat::Long;

    /// Internal PSD profile used by `+UPSD`/`+UPSDA` and for context mapping.
    const PROFILE_ID: ProfileId = ProfileId(0);
    /// PDP context id used by `+CGDCONT`/`+CGACT`.
    const CONTEXT_ID: ContextId = ContextId(1);

    const APN: Apn<'a> = Apn::None;

    /// Authentication used for a user supplied APN that carries credentials.
    const AUTHENTICATION_MODE: AuthenticationMode = AuthenticationMode::Automatic;
    /// Authentication used for APN database entries with credentials, on
    /// modules that cannot pick the protocol themselves.
    const APN_DB_AUTHENTICATION_MODE: AuthenticationMode = AuthenticationMode::Chap;

    /// `<n>` used for `AT+CREG`/`AT+CGREG`.
    const CREG_OR_CGREG_TYPE: u8 = 2;
    /// `<n>` used for `AT+CEREG`. Type 4 also reports the 3GPP power saving
    /// timers.
    const CEREG_TYPE: u8 = 4;

    const CONNECT_TIMEOUT_SECONDS: u64 = 240;
    const UPSD_CONTEXT_ACTIVATION_TIME_SECONDS: u64 = 180;
    const SCAN_RETRIES: usize = 2;
    const SCAN_TIME_SECONDS: u64 = 180;
    const SCAN_LENGTH_BYTES: usize = 1280;
    const DEEP_SCAN_RETRIES: usize = 2;
    const DEEP_SCAN_TIME_SECONDS: u64 = 240;
    /// Minimum time between two changes of `AT+CFUN`.
    const CFUN_FLIP_DELAY_SECONDS: u64 = 10;

    const PPP_DIAL_TIMEOUT_SECONDS: u64 = 10;
    const PPP_HANG_UP_TIMEOUT_SECONDS: u64 = 10;

    #[cfg(feature = "ppp")]
    const PPP_CONFIG: embassy_net_ppp::Config<'a>;

    fn reset_pin(&mut self) -> Option<&mut Self::ResetPin>;
    fn power_pin(&mut self) -> Option<&mut Self::PowerPin>;
    fn vint_pin(&mut self) -> Option<&mut Self::VintPin>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum OperatorFormat {
    Long = 0,
    Short = 1,
    Numeric = 2,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Apn<'a> {
    /// Pick the APN from the built-in database, keyed on the IMSI.
    #[default]
    None,
    Given {
        name: &'a str,
        username: Option<&'a str>,
        password: Option<&'a str>,
    },
}

impl<'a> Apn<'a> {
    pub const fn given(name: &'a str) -> Self {
        Self::Given {
            name,
            username: None,
            password: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Lvl(bool);

    impl ErrorType for Lvl {
        type Error = Infallible;
    }

    impl InputPin for Lvl {
        fn is_high(&mut self) -> Result<bool, Infallible> {
            Ok(self.0)
        }

        fn is_low(&mut self) -> Result<bool, Infallible> {
            Ok(!self.0)
        }
    }

    #[test]
    fn reverse_input_pin_inverts() {
        let mut pin = ReverseInputPin(Lvl(true));
        assert_eq!(pin.is_high(), Ok(false));
        assert_eq!(pin.is_low(), Ok(true));
    }
}
