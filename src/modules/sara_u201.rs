use super::ModuleParams;
use crate::command::psn::types::ContextId;
use crate::registration::{Rat, RatSet};
use embassy_time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SaraU201;

impl ModuleParams for SaraU201 {
    fn power_on_pull_time(&self) -> Option<Duration> {
        Some(Duration::from_millis(1))
    }
    fn power_off_pull_time(&self) -> Duration {
        Duration::from_millis(1500)
    }
    fn power_down_wait(&self) -> Duration {
        Duration::from_secs(5)
    }
    fn reset_hold(&self) -> Duration {
        Duration::from_millis(75)
    }
    fn supported_rats(&self) -> RatSet {
        RatSet::from_rats(&[Rat::GsmGprsEgprs, Rat::Umts])
    }
    fn use_upsd_context_activation(&self) -> bool {
        true
    }
    fn ppp_context_id(&self) -> Option<ContextId> {
        Some(ContextId(1))
    }
    fn ppp_close_rest(&self) -> Option<Duration> {
        Some(Duration::from_secs(1))
    }
    fn data_counters(&self) -> bool {
        true
    }
}
