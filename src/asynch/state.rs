use core::cell::RefCell;
use core::future::poll_fn;
use core::task::{Context, Poll};

use embassy_sync::blocking_mutex::raw::NoopRawMutex;
use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::waitqueue::WakerRegistration;
use embassy_time::Instant;
use heapless::String;

use crate::command::mobile_control::types::Functionality;
use crate::modules::Module;
use crate::registration::{Domain, PowerSaveParameters, ProfileState, RegistrationState, Status};

/// The link state of a network device.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum LinkState {
    /// The link is down.
    Down,
    /// The link is up.
    Up,
}

/// If the celular modem is up and responding to AT.
#[derive(Debug, PartialEq, Eq, Clone, Copy, PartialOrd, Ord)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum OperationState {
    PowerDown = 0,
    PowerUp,
    Initialized,
    Connected,
    DataEstablished,
}

/// Called with the new registration status of a domain.
pub type RegistrationCallback<'d> = &'d dyn Fn(Domain, Status);
/// Called with `true` when an RRC connection to the base station is set up.
pub type ConnectionCallback<'d> = &'d dyn Fn(bool);
/// Called when the network agrees on new 3GPP power saving timers.
pub type PowerSaveCallback<'d> = &'d dyn Fn(PowerSaveParameters);

pub struct State<'d> {
    shared: Mutex<NoopRawMutex, RefCell<Shared<'d>>>,
}

impl Default for State<'_> {
    fn default() -> Self {
        Self::new()
    }
}

impl<'d> State<'d> {
    pub const fn new() -> Self {
        Self {
            shared: Mutex::new(RefCell::new(Shared {
                link_state: LinkState::Down,
                operation_state: OperationState::PowerDown,
                module: None,
                mno_profile: None,
                registration_state: RegistrationState::new(),
                radio: None,
                last_cfun_change: None,
                connected_at: None,
                mcc_mnc: None,
                reboot_required: false,
                ppp_attached: false,
                registration_callback: None,
                connection_callback: None,
                power_save_callback: None,
                state_waker: WakerRegistration::new(),
                registration_waker: WakerRegistration::new(),
            })),
        }
    }
}

/// State shared between the runner, the control handle and the PPP channel
pub struct Shared<'d> {
    link_state: LinkState,
    operation_state: OperationState,
    module: Option<Module>,
    mno_profile: Option<u8>,
    registration_state: RegistrationState,
    /// Last `AT+CFUN` we set, and when.
    radio: Option<Functionality>,
    last_cfun_change: Option<Instant>,
    connected_at: Option<Instant>,
    mcc_mnc: Option<String<6>>,
    reboot_required: bool,
    ppp_attached: bool,
    registration_callback: Option<RegistrationCallback<'d>>,
    connection_callback: Option<ConnectionCallback<'d>>,
    power_save_callback: Option<PowerSaveCallback<'d>>,
    state_waker: WakerRegistration,
    registration_waker: WakerRegistration,
}

#[derive(Clone)]
pub struct Runner<'d> {
    pub(crate) shared: &'d Mutex<NoopRawMutex, RefCell<Shared<'d>>>,
}

impl<'d> Runner<'d> {
    pub fn new(state: &'d State<'d>) -> Self {
        Self {
            shared: &state.shared,
        }
    }

    pub(crate) fn module(&self) -> Option<Module> {
        self.shared.lock(|s| s.borrow().module)
    }

    pub(crate) fn set_module(&self, module: Module) {
        self.shared.lock(|s| {
            let s = &mut *s.borrow_mut();
            s.module.replace(module);
        });
    }

    pub(crate) fn mno_profile(&self) -> Option<u8> {
        self.shared.lock(|s| s.borrow().mno_profile)
    }

    pub(crate) fn set_mno_profile(&self, profile: u8) {
        self.shared.lock(|s| s.borrow_mut().mno_profile = Some(profile));
    }

    pub fn update_registration_with<R>(&self, f: impl FnOnce(&mut RegistrationState) -> R) -> R {
        self.shared.lock(|s| {
            let s = &mut *s.borrow_mut();
            let was_registered = s.registration_state.is_registered();
            let res = f(&mut s.registration_state);
            let registered = s.registration_state.is_registered();
            if registered != was_registered {
                info!("Registration status changed! Registered: {:?}", registered);
            }
            s.registration_waker.wake();
            res
        })
    }

    pub fn with_registration<R>(&self, f: impl FnOnce(&RegistrationState) -> R) -> R {
        self.shared.lock(|s| f(&s.borrow().registration_state))
    }

    pub fn is_registered(&self, cx: Option<&mut Context>) -> bool {
        self.shared.lock(|s| {
            let s = &mut *s.borrow_mut();
            if let Some(cx) = cx {
                s.registration_waker.register(cx.waker());
            }
            s.registration_state.is_registered()
        })
    }

    pub fn set_profile_state(&self, state: ProfileState) {
        self.shared.lock(|s| {
            let s = &mut *s.borrow_mut();
            s.registration_state.profile_state = state;
        })
    }

    pub fn profile_state(&self) -> ProfileState {
        self.shared
            .lock(|s| s.borrow().registration_state.profile_state)
    }

    pub fn set_link_state(&self, state: LinkState) {
        self.shared.lock(|s| {
            let s = &mut *s.borrow_mut();
            s.link_state = state;
            s.state_waker.wake();
        });
    }

    pub fn link_state(&self, cx: Option<&mut Context>) -> LinkState {
        self.shared.lock(|s| {
            let s = &mut *s.borrow_mut();
            if let Some(cx) = cx {
                s.state_waker.register(cx.waker());
            }
            s.link_state
        })
    }

    pub fn set_operation_state(&self, state: OperationState) {
        self.shared.lock(|s| {
            let s = &mut *s.borrow_mut();
            s.operation_state = state;
            s.state_waker.wake();
        });
    }

    pub fn operation_state(&self, cx: Option<&mut Context>) -> OperationState {
        self.shared.lock(|s| {
            let s = &mut *s.borrow_mut();
            if let Some(cx) = cx {
                s.state_waker.register(cx.waker());
            }
            s.operation_state
        })
    }

    pub(crate) fn radio(&self) -> Option<Functionality> {
        self.shared.lock(|s| s.borrow().radio)
    }

    pub(crate) fn last_cfun_change(&self) -> Option<Instant> {
        self.shared.lock(|s| s.borrow().last_cfun_change)
    }

    pub(crate) fn set_radio(&self, fun: Functionality) {
        self.shared.lock(|s| {
            let s = &mut *s.borrow_mut();
            s.radio = Some(fun);
            s.last_cfun_change = Some(Instant::now());
        });
    }

    pub(crate) fn set_connected(&self, mcc_mnc: Option<&str>) {
        self.shared.lock(|s| {
            let s = &mut *s.borrow_mut();
            s.connected_at = Some(Instant::now());
            s.mcc_mnc = mcc_mnc.and_then(|m| String::try_from(m).ok());
            s.registration_state.profile_state = ProfileState::ShouldBeUp;
        });
    }

    pub(crate) fn set_disconnected(&self) {
        self.shared.lock(|s| {
            let s = &mut *s.borrow_mut();
            s.connected_at = None;
            s.registration_state.profile_state = ProfileState::Down;
        });
    }

    pub fn connected_at(&self) -> Option<Instant> {
        self.shared.lock(|s| s.borrow().connected_at)
    }

    pub fn mcc_mnc(&self) -> Option<String<6>> {
        self.shared.lock(|s| s.borrow().mcc_mnc.clone())
    }

    pub fn reboot_required(&self) -> bool {
        self.shared.lock(|s| s.borrow().reboot_required)
    }

    pub(crate) fn set_reboot_required(&self) {
        self.shared.lock(|s| s.borrow_mut().reboot_required = true);
    }

    pub(crate) fn clear_reboot_required(&self) {
        self.shared.lock(|s| s.borrow_mut().reboot_required = false);
    }

    pub(crate) fn ppp_attached(&self) -> bool {
        self.shared.lock(|s| s.borrow().ppp_attached)
    }

    pub(crate) fn set_ppp_attached(&self, attached: bool) {
        self.shared.lock(|s| s.borrow_mut().ppp_attached = attached);
    }

    pub(crate) fn registration_callback(&self) -> Option<RegistrationCallback<'d>> {
        self.shared.lock(|s| s.borrow().registration_callback)
    }

    pub(crate) fn set_registration_callback(&self, cb: Option<RegistrationCallback<'d>>) {
        self.shared.lock(|s| s.borrow_mut().registration_callback = cb);
    }

    pub(crate) fn connection_callback(&self) -> Option<ConnectionCallback<'d>> {
        self.shared.lock(|s| s.borrow().connection_callback)
    }

    pub(crate) fn set_connection_callback(&self, cb: Option<ConnectionCallback<'d>>) {
        self.shared.lock(|s| s.borrow_mut().connection_callback = cb);
    }

    pub(crate) fn power_save_callback(&self) -> Option<PowerSaveCallback<'d>> {
        self.shared.lock(|s| s.borrow().power_save_callback)
    }

    pub(crate) fn set_power_save_callback(&self, cb: Option<PowerSaveCallback<'d>>) {
        self.shared.lock(|s| s.borrow_mut().power_save_callback = cb);
    }

    pub async fn wait_for_operation_state(&self, ps: OperationState) {
        if self.operation_state(None) == ps {
            return;
        }

        poll_fn(|cx| {
            if self.operation_state(Some(cx)) == ps {
                return Poll::Ready(());
            }
            Poll::Pending
        })
        .await
    }

    pub async fn wait_for_link_state(&self, ls: LinkState) {
        poll_fn(|cx| {
            if self.link_state(Some(cx)) == ls {
                return Poll::Ready(());
            }
            Poll::Pending
        })
        .await
    }

    pub async fn wait_registered(&self) {
        poll_fn(|cx| match self.is_registered(Some(cx)) {
            true => Poll::Ready(()),
            false => Poll::Pending,
        })
        .await
    }

    pub async fn wait_registration_change(&self) -> bool {
        let old_state = self.is_registered(None);

        poll_fn(|cx| {
            let current_state = self.is_registered(Some(cx));
            if current_state != old_state {
                return Poll::Ready(current_state);
            }
            Poll::Pending
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registration::RegType;

    #[test]
    fn registration_updates_are_shared() {
        let state = State::new();
        let a = Runner::new(&state);
        let b = a.clone();

        assert!(!b.is_registered(None));
        a.update_registration_with(|s| s.force(RegType::Cereg, Status::RegisteredHome));
        assert!(b.is_registered(None));
        assert_eq!(
            b.with_registration(|s| s.status(Domain::Ps)),
            Status::RegisteredHome
        );
    }

    #[test]
    fn connecting_marks_the_profile_up() {
        let state = State::new();
        let ch = Runner::new(&state);

        ch.set_connected(Some("24001"));
        assert_eq!(ch.profile_state(), ProfileState::ShouldBeUp);
        assert_eq!(ch.mcc_mnc().as_deref(), Some("24001"));
        assert!(ch.connected_at().is_some());

        ch.set_disconnected();
        assert_eq!(ch.profile_state(), ProfileState::Down);
        assert!(ch.connected_at().is_none());
    }

    #[test]
    fn reboot_flag_sticks() {
        let state = State::new();
        let ch = Runner::new(&state);
        assert!(!ch.reboot_required());
        ch.set_reboot_required();
        ch.set_link_state(LinkState::Down);
        assert!(ch.reboot_required());
    }
}
