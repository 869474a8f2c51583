use super::ModuleParams;
use crate::registration::{Rat, RatSet};
use embassy_time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TobyR2;

impl ModuleParams for TobyR2 {
    fn power_on_pull_time(&self) -> Option<Duration> {
        Some(Duration::from_micros(50))
    }
    fn power_off_pull_time(&self) -> Duration {
        Duration::from_millis(1000)
    }
    fn reset_hold(&self) -> Duration {
        Duration::from_millis(50)
    }
    fn supported_rats(&self) -> RatSet {
        RatSet::from_rats(&[Rat::GsmGprsEgprs, Rat::Umts, Rat::Lte])
    }
    fn data_counters(&self) -> bool {
        true
    }
}
