#[derive(Debug, PartialEq)]
#[non_exhaustive]
pub enum Error {
    // Generic failures
    InvalidParameter,
    NotInitialised,
    NotSupported,
    NotImplemented,
    NotFound,
    NotRegistered,
    NotConnected,
    NoMemory,
    Timeout,
    Busy,
    Platform,
    DeviceError,

    // Cellular specific failures
    At(atat::Error),
    AttachFailure,
    ContextActivationFailure,
    TemporaryFailure,

    // Driver level
    PoweredDown,
    IoPin,
}

impl Error {
    /// `true` if the modem answered with `ERROR`, `+CME ERROR` or `+CMS
    /// ERROR`, as opposed to a local timeout which is usually worth a retry.
    pub fn is_device_error(&self) -> bool {
        match self {
            Self::DeviceError => true,
            Self::At(e) => is_device_error(e),
            _ => false,
        }
    }
}

pub(crate) fn is_device_error(e: &atat::Error) -> bool {
    matches!(
        e,
        atat::Error::Error | atat::Error::CmeError(_) | atat::Error::CmsError(_)
    )
}

#[cfg(feature = "defmt")]
impl defmt::Format for Error {
    fn format(&self, f: defmt::Formatter<'_>) {
        match self {
            Self::InvalidParameter => defmt::write!(f, "InvalidParameter"),
            Self::NotInitialised => defmt::write!(f, "NotInitialised"),
            Self::NotSupported => defmt::write!(f, "NotSupported"),
            Self::NotImplemented => defmt::write!(f, "NotImplemented"),
            Self::NotFound => defmt::write!(f, "NotFound"),
            Self::NotRegistered => defmt::write!(f, "NotRegistered"),
            Self::NotConnected => defmt::write!(f, "NotConnected"),
            Self::NoMemory => defmt::write!(f, "NoMemory"),
            Self::Timeout => defmt::write!(f, "Timeout"),
            Self::Busy => defmt::write!(f, "Busy"),
            Self::Platform => defmt::write!(f, "Platform"),
            Self::DeviceError => defmt::write!(f, "DeviceError"),
            Self::At(e) => defmt::write!(f, "At({:?})", e),
            Self::AttachFailure => defmt::write!(f, "AttachFailure"),
            Self::ContextActivationFailure => defmt::write!(f, "ContextActivationFailure"),
            Self::TemporaryFailure => defmt::write!(f, "TemporaryFailure"),
            Self::PoweredDown => defmt::write!(f, "PoweredDown"),
            Self::IoPin => defmt::write!(f, "IoPin"),
        }
    }
}

impl From<atat::Error> for Error {
    fn from(e: atat::Error) -> Self {
        Self::At(e)
    }
}

impl From<embassy_time::TimeoutError> for Error {
    fn from(_: embassy_time::TimeoutError) -> Self {
        Self::Timeout
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_errors_are_told_apart_from_timeouts() {
        assert!(Error::from(atat::Error::Error).is_device_error());
        assert!(Error::DeviceError.is_device_error());
        assert!(!Error::from(atat::Error::Timeout).is_device_error());
        assert!(!Error::Timeout.is_device_error());
    }
}
