use super::ModuleParams;
use crate::registration::{Rat, RatSet};
use embassy_time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SaraR422;

impl ModuleParams for SaraR422 {
    fn power_on_pull_time(&self) -> Option<Duration> {
        Some(Duration::from_millis(300))
    }
    fn power_off_pull_time(&self) -> Duration {
        Duration::from_millis(2000)
    }
    fn supported_rats(&self) -> RatSet {
        RatSet::from_rats(&[Rat::GsmGprsEgprs, Rat::CatM1, Rat::Nb1])
    }
    fn uauthreq_reversed(&self) -> bool {
        true
    }
    fn proactive_cgact(&self) -> bool {
        true
    }
    fn context_mapping_required(&self) -> bool {
        true
    }
    fn data_counters(&self) -> bool {
        true
    }
    fn authentication_mode_automatic(&self) -> bool {
        true
    }
    fn is_sara_r4(&self) -> bool {
        true
    }
}
