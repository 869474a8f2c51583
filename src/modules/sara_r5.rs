use super::ModuleParams;
use crate::registration::{Rat, RatSet};
use embassy_time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SaraR5;

impl ModuleParams for SaraR5 {
    fn power_on_pull_time(&self) -> Option<Duration> {
        Some(Duration::from_millis(1500))
    }
    fn power_off_pull_time(&self) -> Duration {
        Duration::from_millis(2000)
    }
    fn boot_wait(&self) -> Duration {
        Duration::from_secs(6)
    }
    fn power_down_wait(&self) -> Duration {
        Duration::from_secs(20)
    }
    fn reset_hold(&self) -> Duration {
        Duration::from_millis(150)
    }
    fn supported_rats(&self) -> RatSet {
        RatSet::from_rats(&[Rat::CatM1])
    }
    fn context_mapping_required(&self) -> bool {
        true
    }
    fn activate_mapped_profile(&self) -> bool {
        true
    }
    fn data_counters(&self) -> bool {
        true
    }
    fn deep_scan(&self) -> bool {
        true
    }
    fn authentication_mode_automatic(&self) -> bool {
        true
    }
}
