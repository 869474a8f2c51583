use atat::{asynch::AtatClient, UrcSubscription};
use embassy_futures::select::select3;
use embassy_time::{Duration, Instant, Timer};
use embedded_hal::digital::{InputPin, OutputPin};

use crate::command::{
    control::{
        types::{Echo, FlowControl},
        SetEcho, SetFlowControl,
    },
    device_lock::{responses::PinStatus, types::PinStatusCode, GetPinStatus},
    general::{GetMnoProfile, GetModelId},
    mobile_control::{
        types::{Functionality, TerminationErrorMode},
        SetModuleFunctionality, SetReportMobileTerminationError,
    },
    system_features::SetPowerSavingControl,
    Urc, AT,
};
use crate::config::CellularConfig;
use crate::error::Error;
use crate::modules::{Generic, Module, ModuleParams};

use super::network::Network;
use super::ppp::PppRequest;
use super::state::{self, OperationState};
use super::urc_handler::UrcHandler;
use super::{AtHandle, Job, State, URC_SUBSCRIBERS};

/// Pull times tried in turn when the module is not known yet, in
/// milliseconds.
const GENERIC_PWR_ON_TIMES: [u64; 2] = [300, 2000];
const SIM_READY_ATTEMPTS: usize = 2;

/// Background runner for the Ublox Module.
///
/// You must call `.run()` in a background task for the Ublox Module to operate.
pub struct Runner<'d, AT: AtatClient, C: CellularConfig<'d>, const URC_CAPACITY: usize> {
    state: &'d State<'d, AT>,
    ch: state::Runner<'d>,
    at: AtHandle<'d, AT>,
    config: C,
    urc_subscription: UrcSubscription<'d, Urc, URC_CAPACITY, URC_SUBSCRIBERS>,
}

impl<'d, AT: AtatClient, C: CellularConfig<'d>, const URC_CAPACITY: usize>
    Runner<'d, AT, C, URC_CAPACITY>
{
    pub(crate) fn new(
        state: &'d State<'d, AT>,
        config: C,
        urc_subscription: UrcSubscription<'d, Urc, URC_CAPACITY, URC_SUBSCRIBERS>,
    ) -> Self {
        Self {
            state,
            ch: state.runner(),
            at: state.at(),
            config,
            urc_subscription,
        }
    }

    fn module_or_generic(&self) -> Module {
        self.ch.module().unwrap_or(Module::Generic(Generic))
    }

    /// Power the module up if needed and bring it to a known state: echo
    /// off, numeric errors, flow control and UART power saving set, SIM
    /// ready and the radio off.
    pub async fn init(&mut self) -> Result<(), Error> {
        debug!("Initializing module");
        if !self.has_power().await? {
            self.power_up().await?;
        }
        let boot_wait = self.module_or_generic().boot_wait();
        self.wait_alive(boot_wait * 2).await?;

        self.at.send(&SetEcho { enabled: Echo::Off }).await?;
        self.at
            .send(&SetReportMobileTerminationError {
                n: TerminationErrorMode::Enabled,
            })
            .await?;

        let model_id = self.at.send(&GetModelId).await?;
        let module = Module::from_model_id(&model_id);
        info!("Module: {}", model_id.model.as_str());
        self.ch.set_module(module);

        let flow_control = if C::FLOW_CONTROL {
            FlowControl::RtsCts
        } else {
            FlowControl::Disabled
        };
        self.at
            .send(&SetFlowControl {
                value: flow_control,
            })
            .await?;

        // Switch off UART power saving until it is integrated into this API
        self.at
            .send(&SetPowerSavingControl {
                mode: 0,
                timeout: None,
            })
            .await?;

        self.check_sim_status(&module).await?;

        match self.at.send(&GetMnoProfile).await {
            Ok(mno) => {
                debug!("MNO profile {}", mno.profile);
                self.ch.set_mno_profile(mno.profile);
            }
            Err(e) => debug!("No MNO profile: {:?}", e),
        }

        if !self.ch.is_registered(None) {
            Network::<AT, C>::new(self.state).radio_off().await?;
        }

        self.ch.set_operation_state(OperationState::Initialized);
        Ok(())
    }

    async fn wait_alive(&mut self, timeout: Duration) -> Result<(), Error> {
        let deadline = Instant::now() + timeout;
        loop {
            if self.at.send(&AT).await.is_ok() {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(Error::PoweredDown);
            }
            Timer::after(Duration::from_millis(100)).await;
        }
    }

    async fn check_sim_status(&mut self, module: &Module) -> Result<(), Error> {
        for cycled in [false, true] {
            for _ in 0..SIM_READY_ATTEMPTS {
                if let Ok(PinStatus {
                    code: PinStatusCode::Ready,
                }) = self.at.send(&GetPinStatus).await
                {
                    debug!("SIM is ready");
                    return Ok(());
                }
                Timer::after(Duration::from_secs(1)).await;
            }

            if !cycled {
                // Some modules only see the SIM after a pass through minimum
                // functionality
                for fun in [module.radio_off_cfun(), Functionality::Full] {
                    self.at
                        .send(&SetModuleFunctionality { fun, rst: None })
                        .await?;
                    self.ch.set_radio(fun);
                }
            }
        }

        error!("SIM not ready");
        Err(Error::NotInitialised)
    }

    pub async fn has_power(&mut self) -> Result<bool, Error> {
        if let Some(pin) = self.config.vint_pin() {
            pin.is_high().map_err(|_| Error::IoPin)
        } else {
            info!("No VInt pin configured");
            Ok(true)
        }
    }

    pub async fn power_up(&mut self) -> Result<(), Error> {
        if self.has_power().await? {
            return Ok(());
        }

        for generic_time in GENERIC_PWR_ON_TIMES {
            let module = self.module_or_generic();
            let pull_time = module
                .power_on_pull_time()
                .unwrap_or(Duration::from_millis(generic_time));
            let Some(pin) = self.config.power_pin() else {
                warn!("No power pin configured");
                return Ok(());
            };
            pin.set_low().map_err(|_| Error::IoPin)?;
            Timer::after(pull_time).await;
            pin.set_high().map_err(|_| Error::IoPin)?;

            Timer::after(module.boot_wait()).await;

            if !self.has_power().await? {
                if self.ch.module().is_some() {
                    return Err(Error::PoweredDown);
                }
                continue;
            }

            self.ch.set_operation_state(OperationState::PowerUp);
            debug!("Powered up");
            return Ok(());
        }
        Err(Error::PoweredDown)
    }

    pub async fn power_down(&mut self) -> Result<(), Error> {
        if !self.has_power().await? {
            return Ok(());
        }

        let module = self.module_or_generic();
        let Some(pin) = self.config.power_pin() else {
            warn!("No power pin configured");
            return Ok(());
        };
        pin.set_low().map_err(|_| Error::IoPin)?;
        Timer::after(module.power_off_pull_time()).await;
        pin.set_high().map_err(|_| Error::IoPin)?;

        let deadline = Instant::now() + module.power_down_wait();
        while self.has_power().await? && Instant::now() < deadline {
            Timer::after(Duration::from_millis(100)).await;
        }

        self.ch.update_registration_with(|s| s.reset());
        self.ch.set_disconnected();
        self.ch.clear_reboot_required();
        self.ch.set_operation_state(OperationState::PowerDown);
        debug!("Powered down");
        Ok(())
    }

    /// Reset the module by driving its `RESET_N` pin low.
    ///
    /// **NOTE** This function will reset NVM settings!
    pub async fn reset(&mut self) -> Result<(), Error> {
        warn!("Hard resetting Ublox Cellular Module");
        let module = self.module_or_generic();
        if let Some(pin) = self.config.reset_pin() {
            pin.set_low().map_err(|_| Error::IoPin)?;
            Timer::after(module.reset_hold()).await;
            pin.set_high().map_err(|_| Error::IoPin)?;
            Timer::after(module.boot_wait()).await;
            self.ch.update_registration_with(|s| s.reset());
            self.ch.set_disconnected();
            self.ch.clear_reboot_required();
            self.ch.set_operation_state(OperationState::PowerUp);
        } else {
            warn!("No reset pin configured");
        }
        Ok(())
    }

    /// Handle URCs, run the deferred jobs and hand out HTTP completions.
    pub async fn run(&mut self) -> ! {
        match self.has_power().await {
            Ok(true) if self.ch.operation_state(None) == OperationState::PowerDown => {
                self.ch.set_operation_state(OperationState::PowerUp);
            }
            Ok(_) => {}
            Err(_) => self.ch.set_operation_state(OperationState::PowerDown),
        }

        let state = self.state;
        let ch = &self.ch;
        let urc_subscription = &mut self.urc_subscription;
        let handler = UrcHandler::<AT, C>::new(state);

        loop {
            let urcs = async {
                loop {
                    let urc = urc_subscription.next_message_pure().await;
                    handler.handle(urc);
                }
            };
            let jobs = async {
                loop {
                    let job = state.jobs.receive().await;
                    Self::run_job(state, ch, job).await;
                }
            };
            let http = async {
                loop {
                    let event = state.http.events.receive().await;
                    state.http.dispatch(event);
                }
            };
            select3(urcs, jobs, http).await;
        }
    }

    async fn run_job(state: &'d State<'d, AT>, ch: &state::Runner<'d>, job: Job) {
        match job {
            Job::Registration { domain, status } => {
                if let Some(callback) = ch.registration_callback() {
                    callback(domain, status);
                }
            }
            Job::BaseStationConnection(connected) => {
                if let Some(callback) = ch.connection_callback() {
                    callback(connected);
                }
            }
            Job::PowerSave(params) => {
                if let Some(callback) = ch.power_save_callback() {
                    callback(params);
                }
            }
            Job::Reactivate => {
                let _api = state.api.lock().await;
                let network = Network::<AT, C>::new(state);
                let mut keep_going = network.keep_going(None);
                match network.reactivate(&mut keep_going).await {
                    Ok(()) => {
                        info!("Data context re-activated");
                        if ch.ppp_attached() {
                            state.ppp_requests.signal(PppRequest::Reconnect);
                        }
                    }
                    Err(e) => error!("Re-activating the data context: {:?}", e),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asynch::test_helpers::{assert_sent_in_order, leak_state, MockAtClient, TestConfig};
    use crate::asynch::control::Control;
    use crate::command::{psn::urc::DataConnectionDeactivated, RegistrationParams};
    use crate::modules::{sara_r5::SaraR5, toby_r2::TobyR2};
    use crate::registration::{Domain, ProfileState, Status};
    use atat::UrcChannel;
    use core::cell::Cell;
    use embassy_futures::{block_on, select::select};

    fn urc_channel() -> &'static UrcChannel<Urc, 4, URC_SUBSCRIBERS> {
        Box::leak(Box::new(UrcChannel::new()))
    }

    fn setup(
        client: MockAtClient,
    ) -> (
        &'static State<'static, MockAtClient>,
        Control<'static, MockAtClient, TestConfig>,
        Runner<'static, MockAtClient, TestConfig, 4>,
    ) {
        let state = leak_state(client, Module::Generic(Generic));
        let (control, runner) = crate::asynch::new(state, urc_channel(), TestConfig).unwrap();
        (state, control, runner)
    }

    #[test]
    fn init_brings_the_module_to_a_known_state() {
        let client = MockAtClient::new()
            .always("AT+CGMM", "SARA-R510M8S")
            .always("AT+CPIN?", "+CPIN: READY")
            .always("AT+UMNOPROF?", "+UMNOPROF: 100");
        let log = client.log();
        let (state, _control, mut runner) = setup(client);

        block_on(runner.init()).unwrap();

        assert_sent_in_order(
            &log.borrow(),
            &[
                "AT",
                "ATE0",
                "AT+CMEE=1",
                "AT+CGMM",
                "AT&K0",
                "AT+UPSV=0",
                "AT+CPIN?",
                "AT+UMNOPROF?",
                "AT+CFUN=4",
            ],
        );
        let ch = state.runner();
        assert_eq!(ch.module(), Some(Module::SaraR5(SaraR5)));
        assert_eq!(ch.mno_profile(), Some(100));
        assert_eq!(ch.radio(), Some(Functionality::AirplaneMode));
        assert_eq!(ch.operation_state(None), OperationState::Initialized);
    }

    #[test]
    fn init_fails_without_sim() {
        let client = MockAtClient::new()
            .always("AT+CGMM", "TOBY-R200")
            .always("AT+CPIN?", "+CPIN: SIM PIN");
        let log = client.log();
        let (_state, _control, mut runner) = setup(client);

        assert_eq!(block_on(runner.init()), Err(Error::NotInitialised));
        assert_sent_in_order(&log.borrow(), &["AT+CPIN?", "AT+CFUN=4", "AT+CFUN=1", "AT+CPIN?"]);
    }

    #[test]
    fn registration_callback_runs_from_the_job_loop() {
        static SEEN: std::sync::Mutex<Option<(Domain, Status)>> = std::sync::Mutex::new(None);
        fn record(domain: Domain, status: Status) {
            *SEEN.lock().unwrap() = Some((domain, status));
        }

        let (state, control, mut runner) = setup(MockAtClient::new());
        control.set_registration_callback(Some(&record));

        state.jobs.try_send(Job::Registration {
            domain: Domain::Ps,
            status: Status::RegisteredHome,
        })
        .unwrap();

        let checked = Cell::new(false);
        block_on(select(runner.run(), async {
            while SEEN.lock().unwrap().is_none() {
                Timer::after(Duration::from_millis(10)).await;
            }
            checked.set(true);
        }));

        assert!(checked.get());
        assert_eq!(
            *SEEN.lock().unwrap(),
            Some((Domain::Ps, Status::RegisteredHome))
        );
    }

    #[test]
    fn lost_context_comes_back_with_the_network() {
        let client = MockAtClient::new()
            .once("AT+CGACT?", "+CGACT: 1,0")
            .always("AT+CGACT?", "+CGACT: 1,1");
        let log = client.log();
        let (state, _control, mut runner) = setup(client);
        let ch = state.runner();
        ch.set_module(Module::TobyR2(TobyR2));
        ch.set_connected(None);
        ch.set_ppp_attached(true);

        let handler = UrcHandler::<MockAtClient, TestConfig>::new(state);
        handler.handle(Urc::DataConnectionDeactivated(DataConnectionDeactivated {
            profile_id: 0,
        }));
        assert_eq!(ch.profile_state(), ProfileState::RequiresReactivation);
        handler.handle(Urc::EPSNetworkRegistration(
            RegistrationParams::try_from("1,\"0001\",\"000000a1\",7").unwrap(),
        ));

        let request = Cell::new(None);
        block_on(select(runner.run(), async {
            request.set(Some(state.ppp_requests.wait().await));
        }));

        assert_eq!(request.get(), Some(PppRequest::Reconnect));
        assert_eq!(ch.profile_state(), ProfileState::ShouldBeUp);
        let activations = log
            .borrow()
            .iter()
            .filter(|c| c.as_str() == "AT+CGACT=1,1")
            .count();
        assert_eq!(activations, 1);
    }
}
