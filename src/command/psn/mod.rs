//! ### 18 - Packet Switched Data Services Commands
//!
//! A PDP context can be either primary or secondary. In LTE, PS data
//! connections are referred to as EPS bearers: EPS bearers are conceptually
//! equivalent to the legacy PDP contexts, which are often referred to for sake
//! of simplicity.
//!
//! Two families of commands activate a context: the 3GPP `+CGDCONT`/`+CGACT`
//! pair, and the u-blox `+UPSD`/`+UPSDA` internal profiles used by SARA-U2
//! and SARA-G3.
pub mod responses;
pub mod types;
pub mod urc;

use atat::atat_derive::AtatCmd;
use core::fmt::Write;
use responses::*;
use types::*;

use super::{CmdWriter, NoResponse, RawResponse};

/// 18.4 Define PDP context +CGDCONT
///
/// Defines the connection parameters for a PDP context, identified by the
/// local context identification parameter <cid>.
#[derive(Clone, AtatCmd)]
#[at_cmd("+CGDCONT", NoResponse)]
pub struct SetPDPContextDefinition<'a> {
    #[at_arg(position = 0)]
    pub cid: u8,
    #[at_arg(position = 1, len = 6)]
    pub pdp_type: &'a str,
    #[at_arg(position = 2, len = 99)]
    pub apn: &'a str,
}

/// 18.x PDP context authentication +UAUTHREQ
///
/// Configures the authentication parameters of a defined PDP/EPS bearer. On
/// SARA-R4 and LARA-R6 the password comes before the user name. With
/// `AuthenticationMode::None` no credentials are written at all.
#[derive(Clone)]
pub struct SetAuthParameters<'a> {
    pub cid: ContextId,
    pub auth_type: AuthenticationMode,
    pub username: &'a str,
    pub password: &'a str,
    pub password_first: bool,
}

impl atat::AtatCmd for SetAuthParameters<'_> {
    type Response = NoResponse;

    const MAX_LEN: usize = 180;

    fn write(&self, buf: &mut [u8]) -> usize {
        let mut w = CmdWriter::new(buf);
        let _ = write!(w, "AT+UAUTHREQ={},{}", self.cid.0, self.auth_type as u8);
        if self.auth_type != AuthenticationMode::None {
            let (first, second) = if self.password_first {
                (self.password, self.username)
            } else {
                (self.username, self.password)
            };
            let _ = w.write_char(',');
            let _ = w.quoted(first);
            let _ = w.write_char(',');
            let _ = w.quoted(second);
        }
        w.finish()
    }

    fn parse(
        &self,
        resp: Result<&[u8], atat::InternalError>,
    ) -> Result<Self::Response, atat::Error> {
        resp.map_err(atat::Error::from)?;
        Ok(NoResponse)
    }
}

/// 18.7 Set Packet switched data configuration +UPSD
///
/// Sets one parameter of a packet switched data (PSD) profile. To set all
/// the parameters of the PSD profile a set command for each parameter needs
/// to be issued.
#[derive(Clone)]
pub struct SetPacketSwitchedConfig<'a> {
    pub profile_id: ProfileId,
    pub param: PacketSwitchedParam<'a>,
}

impl atat::AtatCmd for SetPacketSwitchedConfig<'_> {
    type Response = NoResponse;

    const MAX_LEN: usize = 128;

    fn write(&self, buf: &mut [u8]) -> usize {
        let mut w = CmdWriter::new(buf);
        let _ = write!(w, "AT+UPSD={},", self.profile_id.0);
        let _ = match self.param {
            PacketSwitchedParam::ProtocolType(p) => write!(w, "0,{}", p),
            PacketSwitchedParam::Apn(s) => w.write_str("1,").and_then(|_| w.quoted(s)),
            PacketSwitchedParam::Username(s) => w.write_str("2,").and_then(|_| w.quoted(s)),
            PacketSwitchedParam::Password(s) => w.write_str("3,").and_then(|_| w.quoted(s)),
            PacketSwitchedParam::Authentication(a) => write!(w, "6,{}", a as u8),
            PacketSwitchedParam::IpAddress(s) => w.write_str("7,").and_then(|_| w.quoted(s)),
            PacketSwitchedParam::MapProfile(cid) => write!(w, "100,{}", cid.0),
        };
        w.finish()
    }

    fn parse(
        &self,
        resp: Result<&[u8], atat::InternalError>,
    ) -> Result<Self::Response, atat::Error> {
        resp.map_err(atat::Error::from)?;
        Ok(NoResponse)
    }
}

/// 18.7 Get Packet switched data configuration +UPSD
///
/// Reads back one parameter of a PSD profile:
/// `+UPSD: <profile_id>,<param_tag>,<param_val>`.
#[derive(Clone)]
pub struct GetPacketSwitchedConfig {
    pub profile_id: ProfileId,
    pub param: u8,
}

impl atat::AtatCmd for GetPacketSwitchedConfig {
    type Response = RawResponse<128>;

    const MAX_LEN: usize = 20;

    fn write(&self, buf: &mut [u8]) -> usize {
        let mut w = CmdWriter::new(buf);
        let _ = write!(w, "AT+UPSD={},{}", self.profile_id.0, self.param);
        w.finish()
    }

    fn parse(
        &self,
        resp: Result<&[u8], atat::InternalError>,
    ) -> Result<Self::Response, atat::Error> {
        RawResponse::parse(resp)
    }
}

/// 18.8 Set Packet switched data action +UPSDA
///
/// Performs the requested action for the specified PSD profile. The +UUPSDD
/// URC is raised when the data connection related to the provided PSD
/// profile is deactivated either explicitly by the network or locally by the
/// module.
#[derive(Clone, AtatCmd)]
#[at_cmd("+UPSDA", NoResponse, attempts = 1, timeout_ms = 180000)]
pub struct SetPacketSwitchedAction {
    #[at_arg(position = 0)]
    pub profile_id: u8,
    #[at_arg(position = 1)]
    pub action: PacketSwitchedAction,
}

/// 18.9 Get Packet switched network-assigned data +UPSND
///
/// Returns the current (dynamic) network-assigned or network-negotiated value
/// of the specified parameter for the active PDP context associated with the
/// specified PSD profile.
#[derive(Clone)]
pub struct GetPacketSwitchedNetworkData {
    pub profile_id: ProfileId,
    pub param: PacketSwitchedNetworkDataParam,
}

impl atat::AtatCmd for GetPacketSwitchedNetworkData {
    type Response = RawResponse<128>;

    const MAX_LEN: usize = 20;

    fn write(&self, buf: &mut [u8]) -> usize {
        let mut w = CmdWriter::new(buf);
        let _ = write!(w, "AT+UPSND={},{}", self.profile_id.0, self.param as u8);
        w.finish()
    }

    fn parse(
        &self,
        resp: Result<&[u8], atat::InternalError>,
    ) -> Result<Self::Response, atat::Error> {
        RawResponse::parse(resp)
    }
}

/// 18.14 Read GPRS attach or detach +CGATT
#[derive(Clone, AtatCmd)]
#[at_cmd("+CGATT?", GPRSAttached, timeout_ms = 10000)]
pub struct GetGPRSAttached;

/// 18.16 PDP context activate or deactivate +CGACT
///
/// Activates or deactivates the specified PDP context. After the command the
/// MT remains in AT command mode. If any context is already in the requested
/// state, the state for that context remains unchanged.
#[derive(Clone, AtatCmd)]
#[at_cmd("+CGACT", NoResponse, attempts = 1, timeout_ms = 150000)]
pub struct SetPDPContextState {
    #[at_arg(position = 0)]
    pub status: PDPContextStatus,
    #[at_arg(position = 1)]
    pub cid: Option<u8>,
}

/// 18.16 Read PDP context state +CGACT?
///
/// One `+CGACT: <cid>,<status>` line per defined context.
#[derive(Clone)]
pub struct GetPDPContextState;

impl atat::AtatCmd for GetPDPContextState {
    type Response = RawResponse<256>;

    const MAX_LEN: usize = 11;
    const MAX_TIMEOUT_MS: u32 = 150_000;

    fn write(&self, buf: &mut [u8]) -> usize {
        let len = b"AT+CGACT?\r\n".len();
        buf[..len].copy_from_slice(b"AT+CGACT?\r\n");
        len
    }

    fn parse(
        &self,
        resp: Result<&[u8], atat::InternalError>,
    ) -> Result<Self::Response, atat::Error> {
        RawResponse::parse(resp)
    }
}

/// 18.20 GPRS network registration status +CGREG
///
/// Configures the GPRS network registration information. `<n>` = 2 adds
/// the location information to the URC.
#[derive(Clone, AtatCmd)]
#[at_cmd("+CGREG", NoResponse)]
pub struct SetGPRSNetworkRegistrationStatus {
    #[at_arg(position = 0)]
    pub n: u8,
}

/// 18.20 Read GPRS network registration status +CGREG?
#[derive(Clone)]
pub struct GetGPRSNetworkRegistrationStatus;

impl atat::AtatCmd for GetGPRSNetworkRegistrationStatus {
    type Response = RawResponse<128>;

    const MAX_LEN: usize = 11;

    fn write(&self, buf: &mut [u8]) -> usize {
        let len = b"AT+CGREG?\r\n".len();
        buf[..len].copy_from_slice(b"AT+CGREG?\r\n");
        len
    }

    fn parse(
        &self,
        resp: Result<&[u8], atat::InternalError>,
    ) -> Result<Self::Response, atat::Error> {
        RawResponse::parse(resp)
    }
}

/// 18.36 EPS network registration status +CEREG
///
/// Configures the EPS network registration information. `<n>` = 4 adds the
/// PSM timers (T3324 and T3412 extended) to the URC.
#[derive(Clone, AtatCmd)]
#[at_cmd("+CEREG", NoResponse)]
pub struct SetEPSNetworkRegistrationStatus {
    #[at_arg(position = 0)]
    pub n: u8,
}

/// 18.36 Read EPS network registration status +CEREG?
#[derive(Clone)]
pub struct GetEPSNetworkRegistrationStatus;

impl atat::AtatCmd for GetEPSNetworkRegistrationStatus {
    type Response = RawResponse<128>;

    const MAX_LEN: usize = 11;

    fn write(&self, buf: &mut [u8]) -> usize {
        let len = b"AT+CEREG?\r\n".len();
        buf[..len].copy_from_slice(b"AT+CEREG?\r\n");
        len
    }

    fn parse(
        &self,
        resp: Result<&[u8], atat::InternalError>,
    ) -> Result<Self::Response, atat::Error> {
        RawResponse::parse(resp)
    }
}

/// 18.40 PDP context read dynamic parameters +CGCONTRDP
///
/// `+CGCONTRDP: <cid>,<bearer_id>,<apn>,<local_addr_and_subnet_mask>,
/// <gw_addr>,<DNS_prim_addr>,<DNS_sec_addr>,...`, one line per IP family.
#[derive(Clone)]
pub struct GetPDPContextReadDynamicParameters {
    pub cid: ContextId,
}

impl atat::AtatCmd for GetPDPContextReadDynamicParameters {
    type Response = RawResponse<512>;

    const MAX_LEN: usize = 20;

    fn write(&self, buf: &mut [u8]) -> usize {
        let mut w = CmdWriter::new(buf);
        let _ = write!(w, "AT+CGCONTRDP={}", self.cid.0);
        w.finish()
    }

    fn parse(
        &self,
        resp: Result<&[u8], atat::InternalError>,
    ) -> Result<Self::Response, atat::Error> {
        RawResponse::parse(resp)
    }
}

/// 18.18 Show PDP address +CGPADDR
#[derive(Clone)]
pub struct GetPDPAddress {
    pub cid: ContextId,
}

impl atat::AtatCmd for GetPDPAddress {
    type Response = RawResponse<128>;

    const MAX_LEN: usize = 20;

    fn write(&self, buf: &mut [u8]) -> usize {
        let mut w = CmdWriter::new(buf);
        let _ = write!(w, "AT+CGPADDR={}", self.cid.0);
        w.finish()
    }

    fn parse(
        &self,
        resp: Result<&[u8], atat::InternalError>,
    ) -> Result<Self::Response, atat::Error> {
        RawResponse::parse(resp)
    }
}

/// 18.x Read counters of sent or received PSD data +UGCNTRD
///
/// `+UGCNTRD: <cid>,<sent_sess_bytes>,<received_sess_bytes>,
/// <sent_total_bytes>,<received_total_bytes>` per active context.
#[derive(Clone)]
pub struct GetDataCounters;

impl atat::AtatCmd for GetDataCounters {
    type Response = RawResponse<256>;

    const MAX_LEN: usize = 12;

    fn write(&self, buf: &mut [u8]) -> usize {
        let len = b"AT+UGCNTRD\r\n".len();
        buf[..len].copy_from_slice(b"AT+UGCNTRD\r\n");
        len
    }

    fn parse(
        &self,
        resp: Result<&[u8], atat::InternalError>,
    ) -> Result<Self::Response, atat::Error> {
        RawResponse::parse(resp)
    }
}

/// 18.x Set/reset counter of sent or received PSD data +UGCNTSET
#[derive(Clone, AtatCmd)]
#[at_cmd("+UGCNTSET", NoResponse)]
pub struct SetDataCounters {
    #[at_arg(position = 0)]
    pub cid: u8,
    #[at_arg(position = 1)]
    pub total_sent: u32,
    #[at_arg(position = 2)]
    pub total_received: u32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use atat::AtatCmd;

    fn written<C: AtatCmd>(cmd: &C) -> heapless::String<128> {
        let mut buf = [0u8; 128];
        let len = cmd.write(&mut buf);
        heapless::String::try_from(core::str::from_utf8(&buf[..len]).unwrap()).unwrap()
    }

    #[test]
    fn context_definition() {
        assert_eq!(
            written(&SetPDPContextDefinition {
                cid: 1,
                pdp_type: "IP",
                apn: "online.telia.se",
            }),
            "AT+CGDCONT=1,\"IP\",\"online.telia.se\"\r\n"
        );
    }

    #[test]
    fn authentication_parameter_order() {
        let mut cmd = SetAuthParameters {
            cid: ContextId(1),
            auth_type: AuthenticationMode::None,
            username: "",
            password: "",
            password_first: false,
        };
        assert_eq!(written(&cmd), "AT+UAUTHREQ=1,0\r\n");

        cmd.auth_type = AuthenticationMode::Chap;
        cmd.username = "user";
        cmd.password = "pass";
        assert_eq!(written(&cmd), "AT+UAUTHREQ=1,2,\"user\",\"pass\"\r\n");

        cmd.password_first = true;
        assert_eq!(written(&cmd), "AT+UAUTHREQ=1,2,\"pass\",\"user\"\r\n");
    }

    #[test]
    fn psd_profile_parameters() {
        assert_eq!(
            written(&SetPacketSwitchedConfig {
                profile_id: ProfileId(0),
                param: PacketSwitchedParam::Apn("internet"),
            }),
            "AT+UPSD=0,1,\"internet\"\r\n"
        );
        assert_eq!(
            written(&SetPacketSwitchedConfig {
                profile_id: ProfileId(0),
                param: PacketSwitchedParam::MapProfile(ContextId(1)),
            }),
            "AT+UPSD=0,100,1\r\n"
        );
        assert_eq!(
            written(&SetPacketSwitchedAction {
                profile_id: 0,
                action: PacketSwitchedAction::Activate,
            }),
            "AT+UPSDA=0,3\r\n"
        );
    }

    #[test]
    fn context_activation() {
        assert_eq!(
            written(&SetPDPContextState {
                status: PDPContextStatus::Activated,
                cid: Some(1),
            }),
            "AT+CGACT=1,1\r\n"
        );
    }
}
