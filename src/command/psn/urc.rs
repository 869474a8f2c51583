//! Unsolicited responses for Packet Switched Data Services Commands

/// 18.27 Packet switched data deactivated +UUPSDD
///
/// The data connection of the internal profile was torn down by the network
/// or by the module.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DataConnectionDeactivated {
    pub profile_id: u8,
}
