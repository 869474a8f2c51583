//! Argument and parameter types used by Packet Switched Data Services Commands and Responses
use atat::atat_derive::AtatEnum;

/// PDP context identifier, `<cid>` in `+CGDCONT`/`+CGACT`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ContextId(pub u8);

/// Internal PSD profile identifier, `<profile_id>` in `+UPSD`/`+UPSDA`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ProfileId(pub u8);

#[derive(Debug, Clone, Copy, PartialEq, Eq, AtatEnum)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum AuthenticationMode {
    None = 0,
    Pap = 1,
    Chap = 2,
    /// Let the module pick PAP or CHAP. Not every module supports this.
    Automatic = 3,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, AtatEnum)]
pub enum PDPContextStatus {
    Deactivated = 0,
    Activated = 1,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, AtatEnum)]
pub enum GPRSAttachedState {
    Detached = 0,
    Attached = 1,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, AtatEnum)]
pub enum PacketSwitchedAction {
    Reset = 0,
    Store = 1,
    Load = 2,
    Activate = 3,
    Deactivate = 4,
}

/// Parameter tag of `+UPSD`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketSwitchedParam<'a> {
    /// 0: protocol type, 0 = IPv4
    ProtocolType(u8),
    /// 1: APN
    Apn(&'a str),
    /// 2: username
    Username(&'a str),
    /// 3: password
    Password(&'a str),
    /// 6: authentication
    Authentication(AuthenticationMode),
    /// 7: IP address, `0.0.0.0` for dynamic assignment
    IpAddress(&'a str),
    /// 100: map the profile onto a PDP context
    MapProfile(ContextId),
}

/// Parameter tag of `+UPSND`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PacketSwitchedNetworkDataParam {
    IpAddress = 0,
    PrimaryDns = 1,
    SecondaryDns = 2,
    ActivationStatus = 8,
}
