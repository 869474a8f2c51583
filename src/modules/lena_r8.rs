use super::ModuleParams;
use crate::registration::{Rat, RatSet};
use embassy_time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct LenaR8;

impl ModuleParams for LenaR8 {
    fn power_on_pull_time(&self) -> Option<Duration> {
        Some(Duration::from_millis(2000))
    }
    fn power_off_pull_time(&self) -> Duration {
        Duration::from_millis(3100)
    }
    fn reset_hold(&self) -> Duration {
        Duration::from_millis(50)
    }
    fn supported_rats(&self) -> RatSet {
        RatSet::from_rats(&[Rat::GsmGprsEgprs, Rat::Lte])
    }
    fn creg_omits_n(&self) -> bool {
        true
    }
    fn authentication_mode_automatic(&self) -> bool {
        true
    }
}
