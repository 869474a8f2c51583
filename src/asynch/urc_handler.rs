use core::marker::PhantomData;

use atat::asynch::AtatClient;
use embassy_sync::channel::TrySendError;

use crate::command::Urc;
use crate::config::CellularConfig;
use crate::modules::{Generic, Module};
use crate::registration::{parse_registration, ProfileState, RegType};

use super::{state, Job, State};

/// Applies URCs to the shared state. Anything that needs AT traffic or user
/// code is queued as a [`Job`] for the runner.
pub(crate) struct UrcHandler<'d, AT: AtatClient, C> {
    state: &'d State<'d, AT>,
    ch: state::Runner<'d>,
    _config: PhantomData<fn() -> C>,
}

impl<'d, AT: AtatClient, C: CellularConfig<'d>> UrcHandler<'d, AT, C> {
    pub(crate) fn new(state: &'d State<'d, AT>) -> Self {
        Self {
            state,
            ch: state.runner(),
            _config: PhantomData,
        }
    }

    pub(crate) fn handle(&self, urc: Urc) {
        match urc {
            Urc::NetworkRegistration(params) => {
                self.registration(RegType::Creg, params.as_bytes())
            }
            Urc::GPRSNetworkRegistration(params) => {
                self.registration(RegType::Cgreg, params.as_bytes())
            }
            Urc::EPSNetworkRegistration(params) => {
                self.registration(RegType::Cereg, params.as_bytes())
            }
            Urc::DataConnectionDeactivated(deactivated) => {
                warn!("Data connection of profile {} deactivated", deactivated.profile_id);
                if deactivated.profile_id == C::PROFILE_ID.0
                    && self.ch.profile_state() == ProfileState::ShouldBeUp
                {
                    // Re-activate once the network registers us again
                    self.ch.set_profile_state(ProfileState::RequiresReactivation);
                }
            }
            Urc::SignalingConnectionStatus(status) => {
                self.post(Job::BaseStationConnection(status.connected))
            }
            Urc::HttpResponse(response) => self.state.http.on_urc(&response),
        }
    }

    /// Decode and apply one `+CREG`/`+CGREG`/`+CEREG` line, whether it is a
    /// URC or the answer to the read command.
    pub(crate) fn registration(&self, reg_type: RegType, params: &[u8]) {
        let module = self.ch.module().unwrap_or(Module::Generic(Generic));
        let n = match reg_type {
            RegType::Cereg => C::CEREG_TYPE,
            RegType::Creg | RegType::Cgreg => C::CREG_OR_CGREG_TYPE,
        };

        let Some(update) = parse_registration(reg_type, params, n, &module) else {
            warn!("Malformed {:?} line", reg_type);
            return;
        };

        let change = self.ch.update_registration_with(|s| s.apply(&update));
        if change.notify {
            self.post(Job::Registration {
                domain: change.domain,
                status: change.status,
            });
        }
        if change.reactivate {
            self.post(Job::Reactivate);
        }
        if let Some(params) = change.power_save {
            self.post(Job::PowerSave(params));
        }
    }

    fn post(&self, job: Job) {
        if let Err(TrySendError::Full(job)) = self.state.jobs.try_send(job) {
            warn!("Job queue full, dropping {:?}", job);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asynch::test_helpers::{leak_state, MockAtClient, TestConfig};
    use crate::command::{psn::urc::DataConnectionDeactivated, RegistrationParams};
    use crate::modules::toby_r2::TobyR2;
    use crate::registration::{Domain, Status};

    type Handler = UrcHandler<'static, MockAtClient, TestConfig>;

    fn params(s: &str) -> RegistrationParams {
        RegistrationParams::try_from(s).unwrap()
    }

    fn drain(state: &State<'static, MockAtClient>) -> std::vec::Vec<Job> {
        let mut jobs = std::vec::Vec::new();
        while let Ok(job) = state.jobs.try_receive() {
            jobs.push(job);
        }
        jobs
    }

    #[test]
    fn registration_urc_is_reported() {
        let state = leak_state(MockAtClient::new(), Module::TobyR2(TobyR2));
        let handler = Handler::new(state);

        handler.handle(Urc::EPSNetworkRegistration(params(
            "5,\"0001\",\"000000a1\",7",
        )));

        assert!(state.runner().is_registered(None));
        assert_eq!(
            drain(state),
            [Job::Registration {
                domain: Domain::Ps,
                status: Status::RegisteredRoaming
            }]
        );
    }

    #[test]
    fn read_command_answer_is_not_reported() {
        let state = leak_state(MockAtClient::new(), Module::TobyR2(TobyR2));
        let handler = Handler::new(state);

        handler.registration(RegType::Cereg, b"4,1,\"0001\",\"000000a1\",7");

        assert!(state.runner().is_registered(None));
        assert!(drain(state).is_empty());
    }

    #[test]
    fn losing_one_ps_registration_is_hidden_while_the_other_holds() {
        let state = leak_state(MockAtClient::new(), Module::TobyR2(TobyR2));
        let handler = Handler::new(state);

        handler.handle(Urc::GPRSNetworkRegistration(params("1,\"0001\",\"0000a1\",2")));
        handler.handle(Urc::EPSNetworkRegistration(params("0")));

        assert_eq!(
            drain(state),
            [Job::Registration {
                domain: Domain::Ps,
                status: Status::RegisteredHome
            }]
        );
    }

    #[test]
    fn lost_context_is_reactivated_on_registration() {
        let state = leak_state(MockAtClient::new(), Module::TobyR2(TobyR2));
        let handler = Handler::new(state);
        state.runner().set_connected(None);

        handler.handle(Urc::DataConnectionDeactivated(DataConnectionDeactivated {
            profile_id: 0,
        }));
        assert_eq!(
            state.runner().profile_state(),
            ProfileState::RequiresReactivation
        );

        handler.handle(Urc::EPSNetworkRegistration(params(
            "1,\"0001\",\"000000a1\",7",
        )));
        let jobs = drain(state);
        assert!(jobs.contains(&Job::Reactivate));
        assert_eq!(state.runner().profile_state(), ProfileState::ShouldBeUp);
    }

    #[test]
    fn deactivation_of_another_profile_is_ignored() {
        let state = leak_state(MockAtClient::new(), Module::TobyR2(TobyR2));
        let handler = Handler::new(state);
        state.runner().set_connected(None);

        handler.handle(Urc::DataConnectionDeactivated(DataConnectionDeactivated {
            profile_id: 3,
        }));
        assert_eq!(state.runner().profile_state(), ProfileState::ShouldBeUp);
    }
}
