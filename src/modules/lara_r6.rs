use super::{CeregExtraParam, ModuleParams};
use crate::registration::{Rat, RatSet};
use embassy_time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct LaraR6;

impl ModuleParams for LaraR6 {
    fn power_on_pull_time(&self) -> Option<Duration> {
        Some(Duration::from_millis(300))
    }
    fn power_off_pull_time(&self) -> Duration {
        Duration::from_millis(2000)
    }
    fn boot_wait(&self) -> Duration {
        Duration::from_secs(10)
    }
    fn reset_hold(&self) -> Duration {
        Duration::from_millis(150)
    }
    fn supported_rats(&self) -> RatSet {
        RatSet::from_rats(&[Rat::GsmGprsEgprs, Rat::Umts, Rat::Lte])
    }
    fn uauthreq_reversed(&self) -> bool {
        true
    }
    fn cereg_extra_param(&self) -> CeregExtraParam {
        CeregExtraParam::ResponseOnly
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
}
