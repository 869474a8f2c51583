//! Network procedures: registration, attach, data context activation,
//! disconnect, scans and the queries made once connected.

use core::marker::PhantomData;

use atat::{asynch::AtatClient, AtatCmd};
use embassy_futures::select::{select, Either};
use embassy_time::{Duration, Instant, Timer};
use heapless::{String, Vec};
use no_std_net::{IpAddr, Ipv4Addr, Ipv6Addr};

use crate::apn::{mno_features, resolve_apn, MnoFeatures};
use crate::command::{
    general::{responses::Imsi, GetCIMI},
    mobile_control::{
        responses::ModuleFunctionality, types::Functionality, GetModuleFunctionality,
        SetModuleFunctionality,
    },
    network_service::{
        types::OperatorSelectionMode, ExtendedNetworkSearch, GetNetworkRegistrationStatus,
        GetOperatorList, GetOperatorSelection, SetNetworkRegistrationStatus,
        SetOperatorSelection,
    },
    psn::{
        responses::GPRSAttached,
        types::{
            AuthenticationMode, ContextId, GPRSAttachedState, PDPContextStatus,
            PacketSwitchedAction, PacketSwitchedNetworkDataParam, PacketSwitchedParam,
        },
        GetDataCounters, GetEPSNetworkRegistrationStatus, GetGPRSAttached,
        GetGPRSNetworkRegistrationStatus, GetPDPAddress, GetPDPContextReadDynamicParameters,
        GetPDPContextState, GetPacketSwitchedConfig, GetPacketSwitchedNetworkData,
        SetAuthParameters, SetDataCounters, SetEPSNetworkRegistrationStatus,
        SetGPRSNetworkRegistrationStatus, SetPDPContextDefinition, SetPDPContextState,
        SetPacketSwitchedAction, SetPacketSwitchedConfig,
    },
    RawResponse, AT,
};
use crate::config::{Apn, CellularConfig, OperatorFormat};
use crate::error::Error;
use crate::modules::{Module, ModuleParams};
use crate::registration::{Domain, Rat, RegType, Status};
use crate::scan::{parse_cell_line, parse_operator_list, CellInfo, ScanResult};

use super::control::DataCounters;
use super::ppp::PppRequest;
use super::state::{self, OperationState};
use super::urc_handler::UrcHandler;
use super::{AtHandle, State};

/// How often a long running command checks whether it should give up.
const KEEP_GOING_POLL: Duration = Duration::from_secs(1);
const REGISTRATION_POLL_INTERVAL: Duration = Duration::from_millis(300);
const MAX_REGISTRATION_ERRORS: usize = 10;
const IMSI_ATTEMPTS: usize = 10;
const ATTACH_ATTEMPTS: usize = 10;
const CONTEXT_ACTIVATION_ATTEMPTS: usize = 5;
const PROFILE_MAPPING_ATTEMPTS: usize = 3;
const MAX_APN_CANDIDATES: usize = 4;

/// Decides when a long running network procedure gives up: either a caller
/// supplied predicate, or a deadline.
pub(crate) struct KeepGoing<'a> {
    callback: Option<&'a mut dyn FnMut() -> bool>,
    deadline: Option<Instant>,
}

impl<'a> KeepGoing<'a> {
    pub(crate) fn new(callback: Option<&'a mut dyn FnMut() -> bool>, timeout: Duration) -> Self {
        let deadline = match callback {
            Some(_) => None,
            None => Some(Instant::now() + timeout),
        };
        Self { callback, deadline }
    }

    pub(crate) fn check(&mut self) -> bool {
        if let Some(callback) = self.callback.as_mut() {
            return callback();
        }
        self.deadline.map_or(true, |deadline| Instant::now() < deadline)
    }
}

/// Send `cmd`, aborting it as soon as `keep_going` says stop or `limit` has
/// passed. An aborted command yields [`Error::Timeout`].
pub(crate) async fn cancellable<A: AtatClient, Cmd: AtatCmd>(
    client: &mut A,
    cmd: &Cmd,
    keep_going: &mut KeepGoing<'_>,
    limit: Option<Duration>,
) -> Result<Cmd::Response, Error> {
    let started = Instant::now();
    let watchdog = async {
        loop {
            Timer::after(KEEP_GOING_POLL).await;
            if !keep_going.check() || limit.is_some_and(|limit| started.elapsed() >= limit) {
                break;
            }
        }
    };

    let outcome = select(client.send_retry(cmd), watchdog).await;
    match outcome {
        Either::First(res) => Ok(res?),
        Either::Second(()) => {
            // Any character aborts a pending command
            let _ = client.send(&AT).await;
            Err(Error::Timeout)
        }
    }
}

/// One APN to try, with its credentials. Empty strings mean none.
#[derive(Debug, Clone, Copy)]
struct ApnCandidate<'a> {
    name: Option<&'a str>,
    username: &'a str,
    password: &'a str,
    from_database: bool,
}

impl ApnCandidate<'_> {
    const NONE: ApnCandidate<'static> = ApnCandidate {
        name: None,
        username: "",
        password: "",
        from_database: false,
    };
}

pub(crate) struct Network<'d, AT: AtatClient, C> {
    state: &'d State<'d, AT>,
    ch: state::Runner<'d>,
    at: AtHandle<'d, AT>,
    _config: PhantomData<fn() -> C>,
}

impl<'d, AT: AtatClient, C: CellularConfig<'d>> Network<'d, AT, C> {
    pub(crate) fn new(state: &'d State<'d, AT>) -> Self {
        Self {
            state,
            ch: state.runner(),
            at: state.at(),
            _config: PhantomData,
        }
    }

    /// The default give-up policy for a procedure started by the caller.
    pub(crate) fn keep_going<'a>(
        &self,
        callback: Option<&'a mut dyn FnMut() -> bool>,
    ) -> KeepGoing<'a> {
        KeepGoing::new(callback, Duration::from_secs(C::CONNECT_TIMEOUT_SECONDS))
    }

    fn module(&self) -> Result<Module, Error> {
        self.ch.module().ok_or(Error::NotInitialised)
    }

    fn mno_features(&self) -> MnoFeatures {
        self.ch
            .mno_profile()
            .map(mno_features)
            .unwrap_or(MnoFeatures::NONE)
    }

    /// Switch `AT+CFUN`, keeping changes at least the configured flip delay
    /// apart.
    pub(crate) async fn set_cfun(&self, fun: Functionality) -> Result<(), Error> {
        if let Some(changed) = self.ch.last_cfun_change() {
            Timer::at(changed + Duration::from_secs(C::CFUN_FLIP_DELAY_SECONDS)).await;
        }
        self.at
            .send(&SetModuleFunctionality { fun, rst: None })
            .await?;
        self.ch.set_radio(fun);
        Ok(())
    }

    pub(crate) async fn radio_off(&self) -> Result<(), Error> {
        let fun = self.module()?.radio_off_cfun();

        let mut last_err = Error::Timeout;
        for _ in 0..3 {
            match self.set_cfun(fun).await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    // The answer may have been lost while the switch happened
                    if let Ok(ModuleFunctionality { power_mode, .. }) =
                        self.at.send(&GetModuleFunctionality).await
                    {
                        if power_mode == fun as u8 {
                            self.ch.set_radio(fun);
                            return Ok(());
                        }
                    }
                    last_err = e;
                }
            }
        }

        Err(last_err)
    }

    /// Switch the radio on, turn on registration reporting and read the
    /// IMSI.
    async fn prepare_connect(
        &self,
        module: &Module,
        keep_going: &mut KeepGoing<'_>,
    ) -> Result<String<15>, Error> {
        if self.ch.radio() != Some(Functionality::Full) {
            self.set_cfun(Functionality::Full).await?;
        }

        for reg_type in RegType::supported_by(module) {
            match reg_type {
                RegType::Creg => {
                    self.at
                        .send(&SetNetworkRegistrationStatus {
                            n: C::CREG_OR_CGREG_TYPE,
                        })
                        .await?
                }
                RegType::Cgreg => {
                    self.at
                        .send(&SetGPRSNetworkRegistrationStatus {
                            n: C::CREG_OR_CGREG_TYPE,
                        })
                        .await?
                }
                RegType::Cereg => {
                    self.at
                        .send(&SetEPSNetworkRegistrationStatus { n: C::CEREG_TYPE })
                        .await?
                }
            };
        }

        for _ in 0..IMSI_ATTEMPTS {
            if let Ok(Imsi { imsi }) = self.at.send(&GetCIMI).await {
                return Ok(imsi);
            }
            if !keep_going.check() {
                break;
            }
            Timer::after(Duration::from_secs(1)).await;
        }

        error!("IMSI not available, is the SIM inserted?");
        Err(Error::Timeout)
    }

    async fn define_context(&self, module: &Module, apn: &ApnCandidate<'_>) -> Result<(), Error> {
        let cid = C::CONTEXT_ID;
        self.at
            .send(&SetPDPContextDefinition {
                cid: cid.0,
                pdp_type: "IP",
                apn: apn.name.unwrap_or(""),
            })
            .await?;

        let auth_type = if apn.username.is_empty() {
            AuthenticationMode::None
        } else if module.authentication_mode_automatic() {
            if apn.from_database {
                AuthenticationMode::Automatic
            } else {
                C::AUTHENTICATION_MODE
            }
        } else if apn.from_database || C::AUTHENTICATION_MODE == AuthenticationMode::Automatic {
            C::APN_DB_AUTHENTICATION_MODE
        } else {
            C::AUTHENTICATION_MODE
        };

        self.at
            .send(&SetAuthParameters {
                cid,
                auth_type,
                username: apn.username,
                password: apn.password,
                password_first: module.uauthreq_reversed(),
            })
            .await?;
        Ok(())
    }

    async fn set_automatic_mode(&self, keep_going: &mut KeepGoing<'_>) -> Result<(), Error> {
        let selection = self.at.send(&GetOperatorSelection).await?;
        if selection.mode == OperatorSelectionMode::Automatic {
            return Ok(());
        }

        let mut at = self.at.lock().await;
        let automatic = SetOperatorSelection {
            mode: OperatorSelectionMode::Automatic,
            format: None,
            oper: None,
        };
        match cancellable(&mut *at, &automatic, keep_going, None).await {
            Ok(_) => Ok(()),
            Err(e) if e.is_device_error() => Err(e),
            Err(e) => {
                // Aborted, it may have gone through regardless
                match at.send_retry(&GetOperatorSelection).await {
                    Ok(selection) if selection.mode == OperatorSelectionMode::Automatic => Ok(()),
                    _ => Err(e),
                }
            }
        }
    }

    async fn query_registration(&self, reg_type: RegType) -> Result<RawResponse<128>, Error> {
        Ok(match reg_type {
            RegType::Creg => self.at.send(&GetNetworkRegistrationStatus).await?,
            RegType::Cgreg => self.at.send(&GetGPRSNetworkRegistrationStatus).await?,
            RegType::Cereg => self.at.send(&GetEPSNetworkRegistrationStatus).await?,
        })
    }

    /// Ask for one registration type. Depending on the AT client the
    /// answer either comes back here or through the URC path; both end up
    /// in the same place.
    async fn poll_registration(
        &self,
        handler: &UrcHandler<'d, AT, C>,
        reg_type: RegType,
    ) -> Result<(), Error> {
        let raw = self.query_registration(reg_type).await?;
        let mut reader = raw.reader();
        while reader.next_line(reg_type.prefix()) {
            handler.registration(reg_type, reader.remainder());
        }
        Ok(())
    }

    /// Read one registration type back into the shared state.
    pub(crate) async fn refresh_registration(&self, reg_type: RegType) -> Result<(), Error> {
        let handler = UrcHandler::<AT, C>::new(self.state);
        self.poll_registration(&handler, reg_type).await
    }

    async fn register_network(
        &self,
        module: &Module,
        mcc_mnc: Option<&str>,
        keep_going: &mut KeepGoing<'_>,
    ) -> Result<(), Error> {
        self.ch.update_registration_with(|s| s.reset());
        if self.ch.radio() != Some(Functionality::Full) {
            self.set_cfun(Functionality::Full).await?;
        }

        if let Some(mcc_mnc) = mcc_mnc {
            info!("Selecting network {}", mcc_mnc);
            let manual = SetOperatorSelection {
                mode: OperatorSelectionMode::Manual,
                format: Some(OperatorFormat::Numeric as u8),
                oper: Some(mcc_mnc),
            };
            let mut at = self.at.lock().await;
            loop {
                match cancellable(&mut *at, &manual, keep_going, None).await {
                    Ok(_) => break,
                    Err(e) if e.is_device_error() => return Err(e),
                    Err(e) if !keep_going.check() => return Err(e),
                    Err(_) => {}
                }
            }
        }

        let handler = UrcHandler::<AT, C>::new(self.state);
        let mut errors = 0;
        loop {
            for reg_type in RegType::supported_by(module) {
                if let Err(e) = self.poll_registration(&handler, reg_type).await {
                    errors += 1;
                    if errors >= MAX_REGISTRATION_ERRORS {
                        error!("Too many errors polling the registration: {:?}", e);
                        return Err(e);
                    }
                }
                if self.ch.is_registered(None) {
                    info!("Registered on the network");
                    return Ok(());
                }
            }

            if !keep_going.check() {
                return Err(Error::NotRegistered);
            }
            Timer::after(REGISTRATION_POLL_INTERVAL).await;
        }
    }

    async fn wait_attach(&self, keep_going: &mut KeepGoing<'_>) -> Result<(), Error> {
        for _ in 0..ATTACH_ATTEMPTS {
            if let Ok(GPRSAttached {
                state: GPRSAttachedState::Attached,
            }) = self.at.send(&GetGPRSAttached).await
            {
                return Ok(());
            }
            if !keep_going.check() {
                break;
            }
            Timer::after(Duration::from_secs(1)).await;
        }
        Err(Error::AttachFailure)
    }

    /// Activate the PDP context with `AT+CGACT`, holding the AT client for
    /// the whole procedure.
    async fn activate_context(
        &self,
        module: &Module,
        keep_going: &mut KeepGoing<'_>,
    ) -> Result<(), Error> {
        let cid = C::CONTEXT_ID;
        let activate = SetPDPContextState {
            status: PDPContextStatus::Activated,
            cid: Some(cid.0),
        };

        let mut at = self.at.lock().await;
        for _ in 0..CONTEXT_ACTIVATION_ATTEMPTS {
            if module.proactive_cgact() {
                // The module may report the context active while its
                // internal clients cannot use it
                if let Err(e) = cancellable(&mut *at, &activate, keep_going, None).await {
                    debug!("Forced context activation: {:?}", e);
                }
            }

            let active = match at.send_retry(&GetPDPContextState).await {
                Ok(raw) => context_active(&raw, cid),
                Err(_) => false,
            };
            if active {
                if module.context_mapping_required() {
                    return self.map_profile(&mut *at, module, keep_going).await;
                }
                return Ok(());
            }

            if !keep_going.check() {
                break;
            }
            if !module.proactive_cgact() {
                if let Err(e) = cancellable(&mut *at, &activate, keep_going, None).await {
                    debug!("Context activation: {:?}", e);
                }
            }
            Timer::after(Duration::from_secs(2)).await;
        }

        Err(Error::ContextActivationFailure)
    }

    /// Map the active PDP context onto the internal profile used by the
    /// module's own clients.
    async fn map_profile(
        &self,
        client: &mut AT,
        module: &Module,
        keep_going: &mut KeepGoing<'_>,
    ) -> Result<(), Error> {
        let profile_id = C::PROFILE_ID;
        let map = SetPacketSwitchedConfig {
            profile_id,
            param: PacketSwitchedParam::MapProfile(C::CONTEXT_ID),
        };
        let activate = SetPacketSwitchedAction {
            profile_id: profile_id.0,
            action: PacketSwitchedAction::Activate,
        };

        for _ in 0..PROFILE_MAPPING_ATTEMPTS {
            let res = match client.send_retry(&map).await {
                Ok(_) if module.activate_mapped_profile() => {
                    cancellable(client, &activate, keep_going, None)
                        .await
                        .map(drop)
                }
                Ok(_) => Ok(()),
                Err(e) => Err(e.into()),
            };
            match res {
                Ok(()) => return Ok(()),
                Err(e) => warn!("Mapping the context to profile {}: {:?}", profile_id.0, e),
            }
            if !keep_going.check() {
                break;
            }
        }

        Err(Error::ContextActivationFailure)
    }

    /// Activate the internal profile with `AT+UPSD`/`AT+UPSDA`.
    async fn activate_context_upsd(
        &self,
        apn: &ApnCandidate<'_>,
        keep_going: &mut KeepGoing<'_>,
    ) -> Result<(), Error> {
        let profile_id = C::PROFILE_ID;

        let mut params: Vec<PacketSwitchedParam<'_>, 5> = Vec::new();
        if !self.mno_features().contains(MnoFeatures::NO_CGDCONT) {
            let _ = params.push(PacketSwitchedParam::Apn(apn.name.unwrap_or("")));
        }
        let _ = params.push(PacketSwitchedParam::Username(apn.username));
        let _ = params.push(PacketSwitchedParam::Password(apn.password));
        let _ = params.push(PacketSwitchedParam::IpAddress("0.0.0.0"));
        let _ = params.push(PacketSwitchedParam::Authentication(
            AuthenticationMode::Automatic,
        ));
        for param in params {
            self.at
                .send(&SetPacketSwitchedConfig { profile_id, param })
                .await?;
        }

        self.activate_profile(keep_going).await
    }

    async fn activate_profile(&self, keep_going: &mut KeepGoing<'_>) -> Result<(), Error> {
        let activate = SetPacketSwitchedAction {
            profile_id: C::PROFILE_ID.0,
            action: PacketSwitchedAction::Activate,
        };
        let limit = Duration::from_secs(C::UPSD_CONTEXT_ACTIVATION_TIME_SECONDS);

        let mut at = self.at.lock().await;
        match cancellable(&mut *at, &activate, keep_going, Some(limit)).await {
            Ok(_) => Ok(()),
            Err(e) => {
                warn!("Profile activation failed: {:?}", e);
                Err(Error::ContextActivationFailure)
            }
        }
    }

    /// Bring the data context back after the network dropped it.
    pub(crate) async fn reactivate(&self, keep_going: &mut KeepGoing<'_>) -> Result<(), Error> {
        let module = self.module()?;
        info!("Re-activating the data context");
        if module.use_upsd_context_activation() {
            self.activate_profile(keep_going).await
        } else {
            self.activate_context(&module, keep_going).await
        }
    }

    async fn upsd_active(&self) -> bool {
        let query = GetPacketSwitchedNetworkData {
            profile_id: C::PROFILE_ID,
            param: PacketSwitchedNetworkDataParam::ActivationStatus,
        };
        let Ok(raw) = self.at.send(&query).await else {
            return false;
        };
        let mut reader = raw.reader();
        if !reader.next_line("+UPSND:") {
            return false;
        }
        reader.skip(2);
        reader.read_int() == Some(1)
    }

    async fn context_apn_is(&self, upsd: bool, apn: &str) -> bool {
        if upsd {
            let query = GetPacketSwitchedConfig {
                profile_id: C::PROFILE_ID,
                param: 1,
            };
            match self.at.send(&query).await {
                Ok(raw) => read_string_at(&raw, "+UPSD:", 2) == Some(apn),
                Err(_) => false,
            }
        } else {
            let query = GetPDPContextReadDynamicParameters { cid: C::CONTEXT_ID };
            match self.at.send(&query).await {
                Ok(raw) => read_string_at(&raw, "+CGCONTRDP:", 2) == Some(apn),
                Err(_) => false,
            }
        }
    }

    /// With the module already registered: is the active context the one
    /// asked for? A context on another APN is torn down.
    async fn context_is_adequate(
        &self,
        module: &Module,
        apn: Option<&str>,
        keep_going: &mut KeepGoing<'_>,
    ) -> bool {
        let upsd = module.use_upsd_context_activation();

        let mut active = false;
        for _ in 0..3 {
            active = if upsd {
                self.upsd_active().await
            } else {
                matches!(
                    self.at.send(&GetPDPContextState).await,
                    Ok(raw) if context_active(&raw, C::CONTEXT_ID)
                )
            };
            if active {
                break;
            }
        }
        if !active {
            return false;
        }

        let Some(apn) = apn else {
            return true;
        };
        if self.context_apn_is(upsd, apn).await {
            return true;
        }

        info!("Active context is on another APN, tearing it down");
        let on_eutran = matches!(
            self.ch.with_registration(|s| s.rat(Domain::Ps)),
            Some(Rat::Lte | Rat::CatM1 | Rat::Nb1)
        );
        let res = if on_eutran || module.is_sara_r4() {
            // The default bearer cannot go while registered on E-UTRAN
            self.disconnect_network(keep_going).await
        } else if upsd {
            self.at
                .send(&SetPacketSwitchedAction {
                    profile_id: C::PROFILE_ID.0,
                    action: PacketSwitchedAction::Deactivate,
                })
                .await
                .map(drop)
                .map_err(Error::from)
        } else {
            self.at
                .send(&SetPDPContextState {
                    status: PDPContextStatus::Deactivated,
                    cid: Some(C::CONTEXT_ID.0),
                })
                .await
                .map(drop)
                .map_err(Error::from)
        };
        if let Err(e) = res {
            warn!("Tearing down the context: {:?}", e);
        }
        false
    }

    /// Register and bring up a data context, on `mcc_mnc` if given, or on
    /// whatever network the module picks.
    pub(crate) async fn connect(
        &self,
        mcc_mnc: Option<&str>,
        apn: &Apn<'_>,
        keep_going: &mut KeepGoing<'_>,
    ) -> Result<(), Error> {
        let module = self.module()?;
        let mno = self.mno_features();

        let mut requested = match apn {
            Apn::Given {
                name,
                username,
                password,
            } => Some(ApnCandidate {
                name: Some(*name),
                username: username.unwrap_or(""),
                password: password.unwrap_or(""),
                from_database: false,
            }),
            Apn::None => None,
        };
        if requested.is_some() {
            if mno.contains(MnoFeatures::IGNORE_APN) {
                warn!("The MNO profile sets the APN, ignoring the one given");
                requested = None;
            } else if mno.contains(MnoFeatures::NO_CGDCONT) {
                return Err(Error::InvalidParameter);
            }
        }

        if self.ch.is_registered(None)
            && self
                .context_is_adequate(&module, requested.and_then(|a| a.name), keep_going)
                .await
        {
            info!("Already connected");
            if self.ch.connected_at().is_none() {
                self.ch.set_connected(mcc_mnc);
            }
            self.ch.set_operation_state(OperationState::Connected);
            return Ok(());
        }

        match self
            .establish(&module, mcc_mnc, requested, mno, keep_going)
            .await
        {
            Ok(()) => {
                self.ch.set_connected(mcc_mnc);
                self.ch.set_operation_state(OperationState::Connected);
                if module.ppp_supported() && self.ch.ppp_attached() {
                    self.state.ppp_requests.signal(PppRequest::Reconnect);
                }
                Ok(())
            }
            Err(e) => {
                error!("Connecting failed: {:?}", e);
                if let Err(e) = self.radio_off().await {
                    warn!("Switching the radio off: {:?}", e);
                }
                Err(e)
            }
        }
    }

    async fn establish(
        &self,
        module: &Module,
        mcc_mnc: Option<&str>,
        requested: Option<ApnCandidate<'_>>,
        mno: MnoFeatures,
        keep_going: &mut KeepGoing<'_>,
    ) -> Result<(), Error> {
        let imsi = self.prepare_connect(module, keep_going).await?;

        let mut candidates: Vec<ApnCandidate<'_>, MAX_APN_CANDIDATES> = Vec::new();
        match requested {
            Some(apn) => {
                let _ = candidates.push(apn);
            }
            None if mno.contains(MnoFeatures::NO_CGDCONT) => {
                let _ = candidates.push(ApnCandidate::NONE);
            }
            None => {
                for config in resolve_apn(&imsi).iter().take(MAX_APN_CANDIDATES) {
                    let _ = candidates.push(ApnCandidate {
                        name: Some(config.apn),
                        username: config.username,
                        password: config.password,
                        from_database: true,
                    });
                }
            }
        }

        let mut result = Err(Error::NotRegistered);
        for apn in candidates.iter() {
            if !keep_going.check() {
                break;
            }
            debug!("Trying APN {:?}", apn.name);
            result = self.try_apn(module, mcc_mnc, apn, mno, keep_going).await;
            match &result {
                Ok(()) => break,
                Err(e) => warn!("APN {:?} failed: {:?}", apn.name, e),
            }
        }
        result
    }

    async fn try_apn(
        &self,
        module: &Module,
        mcc_mnc: Option<&str>,
        apn: &ApnCandidate<'_>,
        mno: MnoFeatures,
        keep_going: &mut KeepGoing<'_>,
    ) -> Result<(), Error> {
        let upsd = module.use_upsd_context_activation();
        if !upsd && !mno.contains(MnoFeatures::NO_CGDCONT) {
            self.define_context(module, apn).await?;
        }

        if mcc_mnc.is_none() {
            if let Err(e) = self.set_automatic_mode(keep_going).await {
                debug!("Automatic network selection not set: {:?}", e);
            }
        }

        self.register_network(module, mcc_mnc, keep_going).await?;
        self.wait_attach(keep_going).await?;

        if upsd {
            self.activate_context_upsd(apn, keep_going).await
        } else {
            self.activate_context(module, keep_going).await
        }
    }

    /// Switch the radio off and wait for the registration to go.
    pub(crate) async fn disconnect_network(
        &self,
        keep_going: &mut KeepGoing<'_>,
    ) -> Result<(), Error> {
        let module = self.module()?;
        self.radio_off().await?;

        let handler = UrcHandler::<AT, C>::new(self.state);
        'poll: while self.ch.is_registered(None) && keep_going.check() {
            for reg_type in RegType::supported_by(&module) {
                if let Err(e) = self.poll_registration(&handler, reg_type).await {
                    debug!("Polling {:?}: {:?}", reg_type, e);
                }
                if !self.ch.is_registered(None) {
                    break 'poll;
                }
            }
            Timer::after(REGISTRATION_POLL_INTERVAL).await;
        }

        if let Ok(GPRSAttached {
            state: GPRSAttachedState::Detached,
        }) = self.at.send(&GetGPRSAttached).await
        {
            // Some modules never send the final +CEREG
            self.ch
                .update_registration_with(|s| s.force(RegType::Cereg, Status::NotRegistered));
        }

        self.ch.set_disconnected();
        self.ch.set_operation_state(OperationState::Initialized);
        info!("Disconnected");
        Ok(())
    }

    pub(crate) async fn ip_address(&self) -> Result<IpAddr, Error> {
        let module = self.module()?;
        for _ in 0..3 {
            let address = if module.use_upsd_context_activation() {
                let raw = self
                    .at
                    .send(&GetPacketSwitchedNetworkData {
                        profile_id: C::PROFILE_ID,
                        param: PacketSwitchedNetworkDataParam::IpAddress,
                    })
                    .await?;
                read_string_at(&raw, "+UPSND:", 2).and_then(parse_modem_address)
            } else {
                let raw = self.at.send(&GetPDPAddress { cid: C::CONTEXT_ID }).await?;
                read_string_at(&raw, "+CGPADDR:", 1).and_then(parse_modem_address)
            };
            if let Some(address) = address {
                return Ok(address);
            }
        }
        Err(Error::NotConnected)
    }

    /// Primary and secondary DNS servers of the requested address family.
    pub(crate) async fn dns_servers(
        &self,
        ipv6: bool,
    ) -> Result<(Option<IpAddr>, Option<IpAddr>), Error> {
        let module = self.module()?;
        let of_family = |addr: Option<IpAddr>| addr.filter(|a| matches!(a, IpAddr::V6(_)) == ipv6);

        if module.use_upsd_context_activation() {
            let mut servers = [None, None];
            let params = [
                PacketSwitchedNetworkDataParam::PrimaryDns,
                PacketSwitchedNetworkDataParam::SecondaryDns,
            ];
            for (server, param) in servers.iter_mut().zip(params) {
                let raw = self
                    .at
                    .send(&GetPacketSwitchedNetworkData {
                        profile_id: C::PROFILE_ID,
                        param,
                    })
                    .await?;
                *server = of_family(read_string_at(&raw, "+UPSND:", 2).and_then(parse_modem_address));
            }
            return Ok((servers[0], servers[1]));
        }

        let raw = self
            .at
            .send(&GetPDPContextReadDynamicParameters { cid: C::CONTEXT_ID })
            .await?;
        let mut reader = raw.reader();
        while reader.next_line("+CGCONTRDP:") {
            // <cid>,<bearer_id>,<apn>,<local_addr_and_subnet_mask>,<gw_addr>
            reader.skip(5);
            let primary = of_family(reader.read_string().and_then(parse_modem_address));
            let secondary = of_family(reader.read_string().and_then(parse_modem_address));
            if primary.is_some() || secondary.is_some() {
                return Ok((primary, secondary));
            }
        }
        Err(Error::NotFound)
    }

    async fn operator_selection(&self, format: OperatorFormat) -> Result<String<24>, Error> {
        self.at
            .send(&SetOperatorSelection {
                mode: OperatorSelectionMode::FormatOnly,
                format: Some(format as u8),
                oper: None,
            })
            .await?;
        let selection = self.at.send(&GetOperatorSelection).await?;
        selection.oper.ok_or(Error::NotRegistered)
    }

    pub(crate) async fn operator_name(&self) -> Result<String<24>, Error> {
        self.operator_selection(OperatorFormat::Long).await
    }

    pub(crate) async fn mcc_mnc(&self) -> Result<(u16, u16), Error> {
        let oper = self.operator_selection(OperatorFormat::Numeric).await?;
        if !(5..=6).contains(&oper.len()) || !oper.bytes().all(|b| b.is_ascii_digit()) {
            return Err(Error::NotFound);
        }
        let (mcc, mnc) = oper.split_at(3);
        Ok((
            mcc.parse().map_err(|_| Error::NotFound)?,
            mnc.parse().map_err(|_| Error::NotFound)?,
        ))
    }

    pub(crate) async fn data_counters(&self) -> Result<DataCounters, Error> {
        if !self.module()?.data_counters() {
            return Err(Error::NotSupported);
        }

        let raw = self.at.send(&GetDataCounters).await?;
        let mut reader = raw.reader();
        while reader.next_line("+UGCNTRD:") {
            if reader.read_int() != Some(C::CONTEXT_ID.0 as i32) {
                continue;
            }
            let mut next = || {
                reader
                    .read_string()
                    .and_then(|v| v.parse::<u64>().ok())
                    .unwrap_or(0)
            };
            return Ok(DataCounters {
                sent: next(),
                received: next(),
                total_sent: next(),
                total_received: next(),
            });
        }
        Err(Error::NotConnected)
    }

    pub(crate) async fn reset_data_counters(&self) -> Result<(), Error> {
        if !self.module()?.data_counters() {
            return Err(Error::NotSupported);
        }
        self.at
            .send(&SetDataCounters {
                cid: C::CONTEXT_ID.0,
                total_sent: 0,
                total_received: 0,
            })
            .await?;
        Ok(())
    }

    /// Search for networks, returning how many were found and the first of
    /// them. The others are handed out by [`Network::scan_next`].
    pub(crate) async fn scan_first(
        &self,
        keep_going: &mut KeepGoing<'_>,
    ) -> Result<(usize, Option<ScanResult>), Error> {
        let module = self.module()?;
        self.scan_last();

        let prior = match self.at.send(&GetModuleFunctionality).await {
            Ok(ModuleFunctionality { power_mode, .. }) => Functionality::from_cfun(power_mode),
            Err(_) => self.ch.radio(),
        };
        if prior != Some(Functionality::Full) {
            self.set_cfun(Functionality::Full).await?;
        }

        let limit = Duration::from_secs(C::SCAN_TIME_SECONDS);
        let mut found = 0;
        let mut outcome = Ok(());
        for _ in 0..=C::SCAN_RETRIES {
            if !keep_going.check() {
                break;
            }
            let response = {
                let mut at = self.at.lock().await;
                cancellable(&mut *at, &GetOperatorList, keep_going, Some(limit)).await
            };
            match response {
                Ok(raw) => {
                    let bytes = raw.as_bytes();
                    let bytes = &bytes[..bytes.len().min(C::SCAN_LENGTH_BYTES)];
                    found = self.state.scan.lock(|list| {
                        parse_operator_list(bytes, &module, &mut *list.borrow_mut())
                    });
                    outcome = Ok(());
                    if found > 0 {
                        break;
                    }
                    debug!("No networks found, scanning again");
                }
                Err(e) if e.is_device_error() => {
                    outcome = Err(e);
                    break;
                }
                Err(e) => {
                    warn!("Network scan: {:?}", e);
                    outcome = Err(e);
                }
            }
        }

        if let Some(fun) = prior.filter(|fun| *fun != Functionality::Full) {
            if let Err(e) = self.set_cfun(fun).await {
                warn!("Restoring AT+CFUN after the scan: {:?}", e);
            }
        }

        if found == 0 {
            outcome?;
        }
        Ok((found, self.scan_next()))
    }

    pub(crate) fn scan_next(&self) -> Option<ScanResult> {
        self.state.scan.lock(|list| list.borrow_mut().pop_front())
    }

    pub(crate) fn scan_last(&self) {
        self.state.scan.lock(|list| list.borrow_mut().clear())
    }

    /// Extended cell search. `callback` is handed each cell found, and
    /// `None` periodically while the search runs; returning `false` stops.
    pub(crate) async fn deep_scan(
        &self,
        callback: &mut dyn FnMut(Option<&CellInfo>) -> bool,
    ) -> Result<usize, Error> {
        if !self.module()?.deep_scan() {
            return Err(Error::NotSupported);
        }

        let started = Instant::now();
        let limit = Duration::from_secs(C::DEEP_SCAN_TIME_SECONDS);
        let mut attempt = 0;
        loop {
            let remaining = limit
                .checked_sub(started.elapsed())
                .ok_or(Error::Timeout)?;
            let response = {
                let mut poll = || callback(None);
                let mut keep_going =
                    KeepGoing::new(Some(&mut poll as &mut dyn FnMut() -> bool), remaining);
                let mut at = self.at.lock().await;
                cancellable(&mut *at, &ExtendedNetworkSearch, &mut keep_going, Some(remaining))
                    .await
            };

            match response {
                Ok(raw) => {
                    let text = core::str::from_utf8(raw.as_bytes()).unwrap_or("");
                    let mut count = 0;
                    for line in text.lines() {
                        let Some(cell) = parse_cell_line(line.trim_start_matches("+COPS:")) else {
                            continue;
                        };
                        count += 1;
                        if !callback(Some(&cell)) {
                            break;
                        }
                    }
                    return Ok(count);
                }
                Err(e) if e.is_device_error() && attempt < C::DEEP_SCAN_RETRIES => {
                    attempt += 1;
                    warn!("Deep scan failed, retrying: {:?}", e);
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// `+CGACT` lists `<cid>,<state>` per context.
fn context_active<const N: usize>(raw: &RawResponse<N>, cid: ContextId) -> bool {
    let mut reader = raw.reader();
    while reader.next_line("+CGACT:") {
        if reader.read_int() == Some(cid.0 as i32) {
            return reader.read_int() == Some(1);
        }
    }
    false
}

fn read_string_at<'a, const N: usize>(
    raw: &'a RawResponse<N>,
    prefix: &str,
    skip: usize,
) -> Option<&'a str> {
    let mut reader = raw.reader();
    if !reader.next_line(prefix) {
        return None;
    }
    reader.skip(skip);
    reader.read_string().filter(|s| !s.is_empty())
}

/// Parse an address as the module prints it. IPv6 addresses come as 16
/// dot separated decimal octets. An unspecified IPv4 address means none.
fn parse_modem_address(s: &str) -> Option<IpAddr> {
    if let Ok(addr) = s.parse::<IpAddr>() {
        return match addr {
            IpAddr::V4(v4) if v4 == Ipv4Addr::unspecified() => None,
            addr => Some(addr),
        };
    }

    let mut octets = [0u8; 16];
    let mut parts = s.split('.');
    for octet in octets.iter_mut() {
        *octet = parts.next()?.parse().ok()?;
    }
    if parts.next().is_some() {
        return None;
    }
    let mut segments = [0u16; 8];
    for (segment, pair) in segments.iter_mut().zip(octets.chunks(2)) {
        *segment = u16::from_be_bytes([pair[0], pair[1]]);
    }
    Some(IpAddr::V6(Ipv6Addr::new(
        segments[0],
        segments[1],
        segments[2],
        segments[3],
        segments[4],
        segments[5],
        segments[6],
        segments[7],
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asynch::test_helpers::{
        assert_sent_in_order, find_sent, leak_state, MockAtClient, TestConfig,
    };
    use crate::modules::{sara_r5::SaraR5, toby_r2::TobyR2};
    use embassy_futures::block_on;

    type TestNetwork = Network<'static, MockAtClient, TestConfig>;

    fn telia_client() -> MockAtClient {
        MockAtClient::new()
            .always("AT+CIMI", "240011234567890")
            .always("AT+COPS?", "+COPS: 2")
            .always("AT+CEREG?", "+CEREG: 4,1,\"0001\",\"000000a1\",7")
            .always("AT+CGATT?", "+CGATT: 1")
            .once("AT+CGACT?", "+CGACT: 1,0")
            .always("AT+CGACT?", "+CGACT: 1,1")
    }

    #[test]
    fn connect_with_apn_from_the_database() {
        let client = telia_client();
        let log = client.log();
        let state = leak_state(client, Module::TobyR2(TobyR2));
        let network = TestNetwork::new(state);

        let mut keep_going = network.keep_going(None);
        block_on(network.connect(None, &Apn::None, &mut keep_going)).unwrap();

        assert_sent_in_order(
            &log.borrow(),
            &[
                "AT+CFUN=1",
                "AT+CREG=2",
                "AT+CGREG=2",
                "AT+CEREG=4",
                "AT+CIMI",
                "AT+CGDCONT=1,\"IP\",\"online.telia.se\"",
                "AT+UAUTHREQ=1,0",
                "AT+COPS=0",
                "AT+CEREG?",
                "AT+CGATT?",
                "AT+CGACT?",
                "AT+CGACT=1,1",
                "AT+CGACT?",
            ],
        );
        assert!(state.runner().is_registered(None));
        assert_eq!(
            state.runner().operation_state(None),
            OperationState::Connected
        );
        assert!(state.runner().connected_at().is_some());
    }

    #[test]
    fn connecting_twice_keeps_the_context() {
        let client = telia_client();
        let log = client.log();
        let state = leak_state(client, Module::TobyR2(TobyR2));
        let network = TestNetwork::new(state);

        let mut keep_going = network.keep_going(None);
        block_on(network.connect(None, &Apn::None, &mut keep_going)).unwrap();
        let first_len = log.borrow().len();

        let mut keep_going = network.keep_going(None);
        block_on(network.connect(None, &Apn::None, &mut keep_going)).unwrap();

        let log = log.borrow();
        assert_eq!(find_sent(&log, "AT+CFUN=1", first_len), None);
        assert_eq!(find_sent(&log, "AT+COPS=0", first_len), None);
        assert_eq!(find_sent(&log, "AT+CGACT=1,1", first_len), None);
        assert!(find_sent(&log, "AT+CGACT?", first_len).is_some());
    }

    #[test]
    fn mno_profile_without_cgdcont_rejects_an_apn() {
        let state = leak_state(MockAtClient::new(), Module::TobyR2(TobyR2));
        state.runner().set_mno_profile(3);
        let network = TestNetwork::new(state);

        let mut keep_going = network.keep_going(None);
        assert_eq!(
            block_on(network.connect(None, &Apn::given("internet"), &mut keep_going)),
            Err(Error::InvalidParameter)
        );
    }

    #[test]
    fn reactivation_activates_once() {
        let client = MockAtClient::new()
            .once("AT+CGACT?", "+CGACT: 1,0")
            .always("AT+CGACT?", "+CGACT: 1,1");
        let log = client.log();
        let state = leak_state(client, Module::TobyR2(TobyR2));
        let network = TestNetwork::new(state);

        let mut keep_going = network.keep_going(None);
        block_on(network.reactivate(&mut keep_going)).unwrap();

        let activations = log
            .borrow()
            .iter()
            .filter(|c| c.as_str() == "AT+CGACT=1,1")
            .count();
        assert_eq!(activations, 1);
    }

    #[test]
    fn context_mapping_on_sara_r5() {
        let client = MockAtClient::new().always("AT+CGACT?", "+CGACT: 1,1");
        let log = client.log();
        let state = leak_state(client, Module::SaraR5(SaraR5));
        let network = TestNetwork::new(state);

        let mut keep_going = network.keep_going(None);
        block_on(network.reactivate(&mut keep_going)).unwrap();

        assert_sent_in_order(&log.borrow(), &["AT+CGACT?", "AT+UPSD=0,100,1", "AT+UPSDA=0,3"]);
    }

    #[test]
    fn scan_hands_out_every_network_once() {
        let client = MockAtClient::new()
            .always("AT+CFUN?", "+CFUN: 1")
            .always(
                "AT+COPS=?",
                "+COPS: (2,\"Telia S\",\"Telia\",\"24001\",7),(1,\"Tele2\",\"Tele2\",\"24007\",0),,(0-4),(0-2)",
            );
        let state = leak_state(client, Module::TobyR2(TobyR2));
        let network = TestNetwork::new(state);

        let mut keep_going = network.keep_going(None);
        let (found, first) = block_on(network.scan_first(&mut keep_going)).unwrap();
        assert_eq!(found, 2);
        assert_eq!(first.unwrap().mcc_mnc, "24001");

        let mut handed_out = 1;
        while network.scan_next().is_some() {
            handed_out += 1;
        }
        assert_eq!(handed_out, found);

        network.scan_last();
        assert!(network.scan_next().is_none());
    }

    #[test]
    fn scan_error_is_reported() {
        let client = MockAtClient::new()
            .always("AT+CFUN?", "+CFUN: 1")
            .always_error("AT+COPS=?");
        let state = leak_state(client, Module::TobyR2(TobyR2));
        let network = TestNetwork::new(state);

        let mut keep_going = network.keep_going(None);
        let res = block_on(network.scan_first(&mut keep_going));
        assert!(res.unwrap_err().is_device_error());
    }

    #[test]
    fn deep_scan_reports_cells() {
        let client = MockAtClient::new().always(
            "AT+COPS=5",
            "+COPS: MCC:222, MNC:88, TAC:55bb, CI:0a1b2c3d, DLF:6300, ULF:24300, PCI:150, RSRP LEV:42, RSRQ LEV:20\r\nMCC:222, MNC:10, TAC:0001, CI:00000002, DLF:1300, ULF:19300, PCI:7, RSRP LEV:30, RSRQ LEV:10",
        );
        let state = leak_state(client, Module::SaraR5(SaraR5));
        let network = TestNetwork::new(state);

        let mut cells = std::vec::Vec::new();
        let mut callback = |cell: Option<&CellInfo>| {
            if let Some(cell) = cell {
                cells.push(*cell);
            }
            true
        };
        let found = block_on(network.deep_scan(&mut callback)).unwrap();
        assert_eq!(found, 2);
        assert_eq!(cells[0].physical_cell_id, 150);
        assert_eq!(cells[1].mnc, 10);
    }

    #[test]
    fn deep_scan_needs_module_support() {
        let state = leak_state(MockAtClient::new(), Module::TobyR2(TobyR2));
        let network = TestNetwork::new(state);
        let res = block_on(network.deep_scan(&mut |_: Option<&CellInfo>| true));
        assert_eq!(res, Err(Error::NotSupported));
    }

    #[test]
    fn ip_address_skips_empty_answers() {
        let client = MockAtClient::new()
            .once("AT+CGPADDR=1", "+CGPADDR: 1,")
            .always("AT+CGPADDR=1", "+CGPADDR: 1,\"10.160.23.5\"");
        let state = leak_state(client, Module::TobyR2(TobyR2));
        let network = TestNetwork::new(state);

        let addr = block_on(network.ip_address()).unwrap();
        assert_eq!(addr, IpAddr::V4(Ipv4Addr::new(10, 160, 23, 5)));
    }

    #[test]
    fn dns_servers_of_each_family() {
        let client = MockAtClient::new().always(
            "AT+CGCONTRDP=1",
            "+CGCONTRDP: 1,5,\"online.telia.se\",\"10.0.0.2.255.255.255.0\",\"10.0.0.1\",\"8.8.8.8\",\"8.8.4.4\"\r\n+CGCONTRDP: 1,5,\"online.telia.se\",\"\",\"\",\"32.1.72.96.72.96.0.0.0.0.0.0.0.0.136.136\",\"\"",
        );
        let state = leak_state(client, Module::TobyR2(TobyR2));
        let network = TestNetwork::new(state);

        let (primary, secondary) = block_on(network.dns_servers(false)).unwrap();
        assert_eq!(primary, Some(IpAddr::V4(Ipv4Addr::new(8, 8, 8, 8))));
        assert_eq!(secondary, Some(IpAddr::V4(Ipv4Addr::new(8, 8, 4, 4))));

        let (primary, secondary) = block_on(network.dns_servers(true)).unwrap();
        assert_eq!(
            primary,
            Some(IpAddr::V6(Ipv6Addr::new(0x2001, 0x4860, 0x4860, 0, 0, 0, 0, 0x8888)))
        );
        assert_eq!(secondary, None);
    }

    #[test]
    fn data_counters_of_the_context() {
        let client = MockAtClient::new().always(
            "AT+UGCNTRD",
            "+UGCNTRD: 2,1,1,1,1\r\n+UGCNTRD: 1,100,200,3000000000,4000",
        );
        let state = leak_state(client, Module::TobyR2(TobyR2));
        let network = TestNetwork::new(state);

        let counters = block_on(network.data_counters()).unwrap();
        assert_eq!(counters.sent, 100);
        assert_eq!(counters.received, 200);
        assert_eq!(counters.total_sent, 3_000_000_000);
        assert_eq!(counters.total_received, 4000);
    }

    #[test]
    fn modem_addresses() {
        assert_eq!(parse_modem_address("0.0.0.0"), None);
        assert_eq!(
            parse_modem_address("32.1.13.184.0.0.0.0.0.0.0.0.0.0.0.1"),
            Some(IpAddr::V6(Ipv6Addr::new(0x2001, 0x0db8, 0, 0, 0, 0, 0, 1)))
        );
        assert_eq!(parse_modem_address("1.2.3"), None);
    }
}
