use super::{CeregExtraParam, ModuleParams};
use crate::registration::{Rat, RatSet};
use embassy_time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SaraR412m;

impl ModuleParams for SaraR412m {
    fn power_on_pull_time(&self) -> Option<Duration> {
        Some(Duration::from_millis(300))
    }
    fn power_off_pull_time(&self) -> Duration {
        Duration::from_millis(2000)
    }
    fn boot_wait(&self) -> Duration {
        Duration::from_secs(6)
    }
    fn supported_rats(&self) -> RatSet {
        RatSet::from_rats(&[Rat::GsmGprsEgprs, Rat::CatM1, Rat::Nb1])
    }
    fn uauthreq_reversed(&self) -> bool {
        true
    }
    fn cereg_extra_param(&self) -> CeregExtraParam {
        CeregExtraParam::Always
    }
    fn is_sara_r4(&self) -> bool {
        true
    }
}
