pub(crate) mod lara_r6;
pub(crate) mod lena_r8;
pub(crate) mod sara_r410m;
pub(crate) mod sara_r412m;
pub(crate) mod sara_r422;
pub(crate) mod sara_r5;
pub(crate) mod sara_u201;
pub(crate) mod toby_r2;

use crate::command::{
    general::responses::ModelId, mobile_control::types::Functionality, psn::types::ContextId,
};
use crate::registration::{Rat, RatSet};
use embassy_time::Duration;

/// Where a `+CEREG` line carries the extra `<rac_or_mme>` parameter between
/// `<tac>` and `<ci>` when `AT+CEREG=4` is in use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CeregExtraParam {
    Never,
    Always,
    /// Only in the answer to `AT+CEREG?`, never in the URC.
    ResponseOnly,
}

pub trait ModuleParams: Copy {
    /// The time for which PWR_ON must be pulled down to effect power-on
    fn power_on_pull_time(&self) -> Option<Duration> {
        None
    }

    /// The time for which PWR_ON must be pulled down to effect power-off
    fn power_off_pull_time(&self) -> Duration {
        Duration::from_millis(3100)
    }

    /// How long to wait before the module is ready after boot
    fn boot_wait(&self) -> Duration {
        Duration::from_secs(5)
    }

    /// How long to wait for a organised power-down in the ansence of VInt
    fn power_down_wait(&self) -> Duration {
        Duration::from_secs(35)
    }

    /// The type of AT+CFUN state to use to switch the radio off: either 0 for
    /// truly off or 4 for "airplane" mode
    fn radio_off_cfun(&self) -> Functionality {
        Functionality::AirplaneMode
    }

    /// How long the reset line has to be held for to reset the cellular module
    fn reset_hold(&self) -> Duration {
        Duration::from_millis(16500)
    }

    /// Radio access technologies the module can register on
    fn supported_rats(&self) -> RatSet;

    /// Activate the data context through the internal `+UPSD`/`+UPSDA`
    /// profile rather than `+CGACT`
    fn use_upsd_context_activation(&self) -> bool {
        false
    }

    /// PDP context used for PPP dial-up, if it is fixed by the module
    fn ppp_context_id(&self) -> Option<ContextId> {
        None
    }

    /// `+UAUTHREQ` takes the password before the user name
    fn uauthreq_reversed(&self) -> bool {
        false
    }

    fn cereg_extra_param(&self) -> CeregExtraParam {
        CeregExtraParam::Never
    }

    /// Force `AT+CGACT=1,<cid>` before checking the context state, the
    /// module may report a context as active that is not usable
    fn proactive_cgact(&self) -> bool {
        false
    }

    /// The activated PDP context has to be mapped onto an internal profile
    /// before the module's own clients can use it
    fn context_mapping_required(&self) -> bool {
        false
    }

    /// The mapped internal profile has to be activated with `+UPSDA` too
    fn activate_mapped_profile(&self) -> bool {
        false
    }

    /// `AT+UGCNTRD`/`AT+UGCNTSET` are available
    fn data_counters(&self) -> bool {
        false
    }

    fn ppp_supported(&self) -> bool {
        true
    }

    /// How long to rest after closing the PPP channel
    fn ppp_close_rest(&self) -> Option<Duration> {
        None
    }

    /// `AT+COPS=5` lists cells with their signal levels
    fn deep_scan(&self) -> bool {
        false
    }

    /// `+UAUTHREQ` accepts the automatic protocol selection
    fn authentication_mode_automatic(&self) -> bool {
        false
    }

    /// The answer to `AT+CREG?` has no `<n>` field
    fn creg_omits_n(&self) -> bool {
        false
    }

    /// PDP contexts cannot be deactivated while registered
    fn is_sara_r4(&self) -> bool {
        false
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Module {
    LaraR6(lara_r6::LaraR6),
    LenaR8(lena_r8::LenaR8),
    SaraR410m(sara_r410m::SaraR410m),
    SaraR412m(sara_r412m::SaraR412m),
    SaraR422(sara_r422::SaraR422),
    SaraR5(sara_r5::SaraR5),
    SaraU201(sara_u201::SaraU201),
    TobyR2(toby_r2::TobyR2),
    Generic(Generic),
}

impl Module {
    pub fn from_model_id(model_id: &ModelId) -> Self {
        let id = model_id.model.as_str();
        if id.starts_with("LARA-R6") {
            Self::LaraR6(lara_r6::LaraR6)
        } else if id.starts_with("LENA-R8") {
            Self::LenaR8(lena_r8::LenaR8)
        } else if id.starts_with("SARA-R410M") {
            Self::SaraR410m(sara_r410m::SaraR410m)
        } else if id.starts_with("SARA-R412M") {
            Self::SaraR412m(sara_r412m::SaraR412m)
        } else if id.starts_with("SARA-R422") {
            Self::SaraR422(sara_r422::SaraR422)
        } else if id.starts_with("SARA-R5") {
            Self::SaraR5(sara_r5::SaraR5)
        } else if id.starts_with("SARA-U201") {
            Self::SaraU201(sara_u201::SaraU201)
        } else if id.starts_with("TOBY-R2") {
            Self::TobyR2(toby_r2::TobyR2)
        } else {
            warn!(
                "Attempting to run {} using generic module parameters! This may or may not work.",
                id
            );
            Self::Generic(Generic)
        }
    }

    /// Store LTE as Cat-M1 on modules that only do the latter.
    pub fn map_rat(&self, rat: Rat) -> Rat {
        let rats = self.supported_rats();
        if rat == Rat::Lte && !rats.contains(Rat::Lte) && rats.contains(Rat::CatM1) {
            Rat::CatM1
        } else {
            rat
        }
    }
}

macro_rules! inner {
    ($self: ident, $fn: ident) => {
        match $self {
            Self::LaraR6(inner) => inner.$fn(),
            Self::LenaR8(inner) => inner.$fn(),
            Self::SaraR410m(inner) => inner.$fn(),
            Self::SaraR412m(inner) => inner.$fn(),
            Self::SaraR422(inner) => inner.$fn(),
            Self::SaraR5(inner) => inner.$fn(),
            Self::SaraU201(inner) => inner.$fn(),
            Self::TobyR2(inner) => inner.$fn(),
            Self::Generic(inner) => inner.$fn(),
        }
    };
}

impl ModuleParams for Module {
    fn power_on_pull_time(&self) -> Option<Duration> {
        inner!(self, power_on_pull_time)
    }

    fn power_off_pull_time(&self) -> Duration {
        inner!(self, power_off_pull_time)
    }

    fn boot_wait(&self) -> Duration {
        inner!(self, boot_wait)
    }

    fn power_down_wait(&self) -> Duration {
        inner!(self, power_down_wait)
    }

    fn radio_off_cfun(&self) -> Functionality {
        inner!(self, radio_off_cfun)
    }

    fn reset_hold(&self) -> Duration {
        inner!(self, reset_hold)
    }

    fn supported_rats(&self) -> RatSet {
        inner!(self, supported_rats)
    }

    fn use_upsd_context_activation(&self) -> bool {
        inner!(self, use_upsd_context_activation)
    }

    fn ppp_context_id(&self) -> Option<ContextId> {
        inner!(self, ppp_context_id)
    }

    fn uauthreq_reversed(&self) -> bool {
        inner!(self, uauthreq_reversed)
    }

    fn cereg_extra_param(&self) -> CeregExtraParam {
        inner!(self, cereg_extra_param)
    }

    fn proactive_cgact(&self) -> bool {
        inner!(self, proactive_cgact)
    }

    fn context_mapping_required(&self) -> bool {
        inner!(self, context_mapping_required)
    }

    fn activate_mapped_profile(&self) -> bool {
        inner!(self, activate_mapped_profile)
    }

    fn data_counters(&self) -> bool {
        inner!(self, data_counters)
    }

    fn ppp_supported(&self) -> bool {
        inner!(self, ppp_supported)
    }

    fn ppp_close_rest(&self) -> Option<Duration> {
        inner!(self, ppp_close_rest)
    }

    fn deep_scan(&self) -> bool {
        inner!(self, deep_scan)
    }

    fn authentication_mode_automatic(&self) -> bool {
        inner!(self, authentication_mode_automatic)
    }

    fn creg_omits_n(&self) -> bool {
        inner!(self, creg_omits_n)
    }

    fn is_sara_r4(&self) -> bool {
        inner!(self, is_sara_r4)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Generic;

impl ModuleParams for Generic {
    fn supported_rats(&self) -> RatSet {
        RatSet::ALL
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn model(id: &str) -> ModelId {
        ModelId {
            model: heapless::String::try_from(id).unwrap(),
        }
    }

    #[test]
    fn model_id_selects_descriptor() {
        assert!(matches!(
            Module::from_model_id(&model("SARA-R510M8S")),
            Module::SaraR5(_)
        ));
        assert!(matches!(
            Module::from_model_id(&model("LARA-R6001D")),
            Module::LaraR6(_)
        ));
        assert!(matches!(
            Module::from_model_id(&model("SARA-R410M-02B")),
            Module::SaraR410m(_)
        ));
        assert!(matches!(
            Module::from_model_id(&model("XYZ")),
            Module::Generic(_)
        ));
    }

    #[test]
    fn lte_is_stored_as_cat_m1_without_lte_support() {
        let r5 = Module::SaraR5(sara_r5::SaraR5);
        assert_eq!(r5.map_rat(Rat::Lte), Rat::CatM1);
        assert_eq!(r5.map_rat(Rat::Nb1), Rat::Nb1);

        let r6 = Module::LaraR6(lara_r6::LaraR6);
        assert_eq!(r6.map_rat(Rat::Lte), Rat::Lte);
    }

    #[test]
    fn activation_dialect() {
        assert!(Module::SaraU201(sara_u201::SaraU201).use_upsd_context_activation());
        assert!(!Module::SaraR422(sara_r422::SaraR422).use_upsd_context_activation());
        assert!(Module::SaraR422(sara_r422::SaraR422).proactive_cgact());
    }
}
