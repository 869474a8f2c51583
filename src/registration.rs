use crate::command::ResponseReader;
use crate::modules::{CeregExtraParam, Module, ModuleParams};
use embassy_time::{Duration, Instant};

/// Radio access technology a registration was made on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Rat {
    GsmGprsEgprs = 0,
    Umts = 1,
    Lte = 2,
    CatM1 = 3,
    Nb1 = 4,
}

impl Rat {
    /// Map a 3GPP `<AcT>` value.
    pub fn from_3gpp(act: i32) -> Option<Self> {
        match act {
            0 | 1 | 3 | 8 => Some(Self::GsmGprsEgprs),
            2 | 4 | 5 | 6 => Some(Self::Umts),
            7 => Some(Self::Lte),
            9 => Some(Self::Nb1),
            _ => None,
        }
    }

    const fn bit(self) -> u8 {
        1 << self as u8
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct RatSet(u8);

impl RatSet {
    pub const EMPTY: Self = Self(0);
    pub const ALL: Self = Self::from_rats(&[
        Rat::GsmGprsEgprs,
        Rat::Umts,
        Rat::Lte,
        Rat::CatM1,
        Rat::Nb1,
    ]);

    pub const fn from_rats(rats: &[Rat]) -> Self {
        let mut bits = 0;
        let mut i = 0;
        while i < rats.len() {
            bits |= rats[i].bit();
            i += 1;
        }
        Self(bits)
    }

    pub const fn contains(&self, rat: Rat) -> bool {
        self.0 & rat.bit() != 0
    }

    pub const fn intersects(&self, other: RatSet) -> bool {
        self.0 & other.0 != 0
    }
}

/// 3GPP registration status, as reported by `+CREG`, `+CGREG` and `+CEREG`.
#[derive(Default, Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Status {
    #[default]
    Unknown,
    NotRegistered,
    RegisteredHome,
    Searching,
    Denied,
    OutOfCoverage,
    RegisteredRoaming,
    RegisteredSmsOnlyHome,
    RegisteredSmsOnlyRoaming,
    EmergencyOnly,
    RegisteredNoCsfbHome,
    RegisteredNoCsfbRoaming,
}

impl Status {
    pub fn from_3gpp(stat: i32) -> Self {
        match stat {
            0 => Self::NotRegistered,
            1 => Self::RegisteredHome,
            2 => Self::Searching,
            3 => Self::Denied,
            4 => Self::OutOfCoverage,
            5 => Self::RegisteredRoaming,
            6 => Self::RegisteredSmsOnlyHome,
            7 => Self::RegisteredSmsOnlyRoaming,
            8 => Self::EmergencyOnly,
            9 => Self::RegisteredNoCsfbHome,
            10 => Self::RegisteredNoCsfbRoaming,
            _ => Self::Unknown,
        }
    }

    pub fn is_registered(&self) -> bool {
        matches!(
            self,
            Self::RegisteredHome
                | Self::RegisteredRoaming
                | Self::RegisteredSmsOnlyHome
                | Self::RegisteredSmsOnlyRoaming
                | Self::RegisteredNoCsfbHome
                | Self::RegisteredNoCsfbRoaming
        )
    }
}

/// Circuit switched or packet switched domain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Domain {
    Cs,
    Ps,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RegType {
    Creg = 0,
    Cgreg = 1,
    Cereg = 2,
}

impl RegType {
    pub const ALL: [RegType; 3] = [RegType::Creg, RegType::Cgreg, RegType::Cereg];

    pub fn prefix(&self) -> &'static str {
        match self {
            Self::Creg => "+CREG:",
            Self::Cgreg => "+CGREG:",
            Self::Cereg => "+CEREG:",
        }
    }

    pub fn domain(&self) -> Domain {
        match self {
            Self::Creg => Domain::Cs,
            Self::Cgreg | Self::Cereg => Domain::Ps,
        }
    }

    /// RATs whose registration is reported through this type.
    pub fn rats(&self) -> RatSet {
        match self {
            Self::Creg => RatSet::from_rats(&[Rat::GsmGprsEgprs, Rat::Umts, Rat::Lte]),
            Self::Cgreg => RatSet::from_rats(&[Rat::GsmGprsEgprs, Rat::Umts]),
            Self::Cereg => RatSet::from_rats(&[Rat::Lte, Rat::CatM1, Rat::Nb1]),
        }
    }

    /// RAT assumed when a registered line leaves out `<AcT>`.
    fn default_rat(&self) -> Rat {
        match self {
            Self::Creg | Self::Cgreg => Rat::GsmGprsEgprs,
            Self::Cereg => Rat::Lte,
        }
    }

    /// The types this module reports registration with.
    pub fn supported_by(module: &Module) -> impl Iterator<Item = RegType> {
        let rats = module.supported_rats();
        Self::ALL.into_iter().filter(move |t| t.rats().intersects(rats))
    }
}

/// Power saving timers agreed with the network, in seconds. `None` means the
/// timer is deactivated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PowerSaveParameters {
    pub on: bool,
    /// T3324
    pub active_time_seconds: Option<u32>,
    /// T3412 extended
    pub periodic_wakeup_seconds: Option<u32>,
}

/// One decoded `+CxREG` line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistrationUpdate {
    pub reg_type: RegType,
    pub status: Status,
    pub rat: Option<Rat>,
    /// `<lac>` or `<tac>`
    pub area_code: Option<u32>,
    pub cell_id: Option<u32>,
    pub power_save: Option<PowerSaveParameters>,
    /// The line answered `AT+CxREG?` rather than being a URC.
    pub is_response: bool,
}

/// Decode the parameters of a `+CREG`/`+CGREG`/`+CEREG` line.
///
/// The answer to `AT+CxREG?` (`<n>,<stat>,...`) and the URC (`<stat>,...`)
/// share their prefix. A first integer equal to the configured `<n>`,
/// followed by an unquoted parameter, marks the answer; anything else is a
/// URC, including a lone `<n>` which is then the status itself.
pub fn parse_registration(
    reg_type: RegType,
    params: &[u8],
    n: u8,
    module: &Module,
) -> Option<RegistrationUpdate> {
    let mut reader = ResponseReader::from_params(params);
    let first = reader.read_int()?;

    let has_n = !(reg_type == RegType::Creg && module.creg_omits_n());
    let is_response = has_n
        && first == n as i32
        && reader.has_more()
        && reader.remainder().iter().find(|&&b| b != b' ') != Some(&b'"');

    let status = if is_response {
        Status::from_3gpp(reader.read_int()?)
    } else {
        Status::from_3gpp(first)
    };

    let mut update = RegistrationUpdate {
        reg_type,
        status,
        rat: None,
        area_code: None,
        cell_id: None,
        power_save: None,
        is_response,
    };

    if !status.is_registered() {
        return Some(update);
    }

    update.area_code = reader.read_hex();
    if reg_type == RegType::Cereg && n == 4 {
        let extra = match module.cereg_extra_param() {
            CeregExtraParam::Always => true,
            CeregExtraParam::ResponseOnly => is_response,
            CeregExtraParam::Never => false,
        };
        if extra {
            // <rac_or_mme>
            reader.skip(1);
        }
    }
    update.cell_id = reader.read_hex();

    let rat = reader
        .read_int()
        .and_then(Rat::from_3gpp)
        .unwrap_or_else(|| reg_type.default_rat());
    update.rat = Some(module.map_rat(rat));

    if reg_type == RegType::Cereg && n == 4 && reader.has_more() {
        // <cause_type>,<reject_cause>
        reader.skip(2);
        let active = reader.read_string().filter(|s| !s.is_empty());
        let periodic = reader.read_string().filter(|s| !s.is_empty());
        if active.is_some() || periodic.is_some() {
            let active_time_seconds = active.and_then(gprs_timer2_seconds);
            update.power_save = Some(PowerSaveParameters {
                on: active_time_seconds.is_some(),
                active_time_seconds,
                periodic_wakeup_seconds: periodic.and_then(gprs_timer3_seconds),
            });
        }
    }

    Some(update)
}

fn timer_octet(bits: &str) -> Option<(u8, u32)> {
    if bits.len() != 8 {
        return None;
    }
    let octet = u8::from_str_radix(bits, 2).ok()?;
    Some((octet >> 5, (octet & 0x1f) as u32))
}

/// Decode a GPRS Timer 2 (3GPP TS 24.008 10.5.7.4) binary string, as used
/// for the active time T3324.
pub fn gprs_timer2_seconds(bits: &str) -> Option<u32> {
    let (unit, value) = timer_octet(bits)?;
    match unit {
        0b000 => Some(value * 2),
        0b010 => Some(value * 6 * 60),
        0b111 => None,
        _ => Some(value * 60),
    }
}

/// Decode a GPRS Timer 3 (3GPP TS 24.008 10.5.7.4a) binary string, as used
/// for the periodic wake-up T3412 extended.
pub fn gprs_timer3_seconds(bits: &str) -> Option<u32> {
    let (unit, value) = timer_octet(bits)?;
    let multiplier = match unit {
        0b000 => 10 * 60,
        0b001 => 60 * 60,
        0b010 => 10 * 60 * 60,
        0b011 => 2,
        0b100 => 30,
        0b101 => 60,
        0b110 => 320 * 60 * 60,
        _ => return None,
    };
    Some(value * multiplier)
}

#[derive(Debug, Clone, Default)]
pub struct CellularRegistrationStatus {
    status: Status,
    rat: Option<Rat>,
    updated: Option<Instant>,
    started: Option<Instant>,
}

impl CellularRegistrationStatus {
    pub const fn new() -> Self {
        Self {
            status: Status::Unknown,
            rat: None,
            updated: None,
            started: None,
        }
    }

    pub fn duration(&self, ts: Instant) -> Duration {
        self.started
            .and_then(|started| ts.checked_duration_since(started))
            .unwrap_or_else(|| Duration::from_millis(0))
    }

    pub fn updated(&self) -> Option<Instant> {
        self.updated
    }

    pub fn reset(&mut self) {
        self.status = Status::Unknown;
        self.rat = None;
        self.updated = None;
        self.started = None;
    }

    pub fn status(&self) -> Status {
        self.status
    }

    pub fn rat(&self) -> Option<Rat> {
        self.rat
    }

    pub fn set(&mut self, stat: Status, rat: Option<Rat>) {
        let ts = Instant::now();
        if self.status != stat {
            self.status = stat;
            self.started = Some(ts);
        }
        self.rat = rat;
        self.updated = Some(ts);
    }

    pub fn registered(&self) -> bool {
        self.status.is_registered()
    }
}

/// Whether the data context is expected to be up.
#[derive(Default, Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ProfileState {
    #[default]
    Down,
    ShouldBeUp,
    /// The context was lost while it should be up, re-activate it once the
    /// network is back.
    RequiresReactivation,
}

/// What applying a [`RegistrationUpdate`] asks of the driver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistrationChange {
    pub domain: Domain,
    pub status: Status,
    /// Tell the registration callback.
    pub notify: bool,
    /// Queue a context re-activation.
    pub reactivate: bool,
    /// New power saving parameters to report.
    pub power_save: Option<PowerSaveParameters>,
}

#[derive(Debug, Clone)]
pub struct RegistrationState {
    slots: [CellularRegistrationStatus; 3],

    /// Logical cell id of the serving cell.
    pub(crate) cell_id: Option<u32>,
    pub(crate) area_code: Option<u32>,

    pub(crate) profile_state: ProfileState,
    pub(crate) power_save: Option<PowerSaveParameters>,
}

impl Default for RegistrationState {
    fn default() -> Self {
        Self::new()
    }
}

impl RegistrationState {
    pub const fn new() -> Self {
        Self {
            slots: [
                CellularRegistrationStatus::new(),
                CellularRegistrationStatus::new(),
                CellularRegistrationStatus::new(),
            ],
            cell_id: None,
            area_code: None,
            profile_state: ProfileState::Down,
            power_save: None,
        }
    }

    pub fn slot(&self, reg_type: RegType) -> &CellularRegistrationStatus {
        &self.slots[reg_type as usize]
    }

    /// Registered on any of the three registration types.
    pub fn is_registered(&self) -> bool {
        self.slots.iter().any(CellularRegistrationStatus::registered)
    }

    fn domain_slot(&self, domain: Domain) -> &CellularRegistrationStatus {
        match domain {
            Domain::Cs => self.slot(RegType::Creg),
            Domain::Ps => {
                let eps = self.slot(RegType::Cereg);
                let gprs = self.slot(RegType::Cgreg);
                if eps.registered() || gprs.status() == Status::Unknown {
                    eps
                } else {
                    gprs
                }
            }
        }
    }

    pub fn status(&self, domain: Domain) -> Status {
        self.domain_slot(domain).status()
    }

    pub fn rat(&self, domain: Domain) -> Option<Rat> {
        self.domain_slot(domain).rat()
    }

    pub fn reset(&mut self) {
        self.slots.iter_mut().for_each(CellularRegistrationStatus::reset);
    }

    /// Force a registration type to a status, without any side effects.
    pub(crate) fn force(&mut self, reg_type: RegType, status: Status) {
        self.slots[reg_type as usize].set(status, None);
    }

    pub fn apply(&mut self, update: &RegistrationUpdate) -> RegistrationChange {
        let reg_type = update.reg_type;
        self.slots[reg_type as usize].set(update.status, update.rat);

        if update.status.is_registered() {
            if update.cell_id.is_some() {
                self.cell_id = update.cell_id;
            }
            if update.area_code.is_some() {
                self.area_code = update.area_code;
            }
        }

        let mut notify = !update.is_response;
        if notify && reg_type != RegType::Creg && !update.status.is_registered() {
            let other = if reg_type == RegType::Cgreg {
                RegType::Cereg
            } else {
                RegType::Cgreg
            };
            if self.slot(other).registered() {
                debug!(
                    "{:?} not registered but {:?} still is, not reporting it",
                    reg_type, other
                );
                notify = false;
            }
        }

        // Only an unsolicited report of regained service triggers reactivation
        let reactivate = !update.is_response
            && update.status.is_registered()
            && self.profile_state == ProfileState::RequiresReactivation;
        if reactivate {
            self.profile_state = ProfileState::ShouldBeUp;
        }

        let power_save = match update.power_save {
            Some(params) if self.power_save != Some(params) => {
                self.power_save = Some(params);
                Some(params)
            }
            _ => None,
        };

        RegistrationChange {
            domain: reg_type.domain(),
            status: update.status,
            notify,
            reactivate,
            power_save,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::{lara_r6::LaraR6, lena_r8::LenaR8, sara_r410m::SaraR410m, Generic};

    const GENERIC: Module = Module::Generic(Generic);

    #[test]
    fn n_followed_by_status_is_a_response() {
        for n in [2u8, 4] {
            let params = std::format!("{},1,\"0001\",\"000000a1\",7", n);
            let update =
                parse_registration(RegType::Cereg, params.as_bytes(), n, &GENERIC).unwrap();
            assert!(update.is_response);
            assert_eq!(update.status, Status::RegisteredHome);
            assert_eq!(update.cell_id, Some(0xa1));
        }
    }

    #[test]
    fn lone_n_is_a_urc() {
        for n in [2u8, 4] {
            let params = std::format!("{}", n);
            let update =
                parse_registration(RegType::Cgreg, params.as_bytes(), n, &GENERIC).unwrap();
            assert!(!update.is_response);
            assert_eq!(update.status, Status::from_3gpp(n as i32));
            assert_eq!(update.rat, None);
        }
    }

    #[test]
    fn registered_roaming_urc() {
        let update = parse_registration(
            RegType::Cereg,
            b"5,\"2046\",\"07ba7016\",7",
            4,
            &GENERIC,
        )
        .unwrap();
        assert!(!update.is_response);
        assert_eq!(update.status, Status::RegisteredRoaming);
        assert_eq!(update.rat, Some(Rat::Lte));
        assert_eq!(update.area_code, Some(0x2046));
        assert_eq!(update.cell_id, Some(0x07ba_7016));
    }

    #[test]
    fn registered_roaming_response_on_cat_m1_module() {
        let r5 = Module::SaraR5(crate::modules::sara_r5::SaraR5);
        let update =
            parse_registration(RegType::Cereg, b"4,5,\"2046\",\"07ba7016\",7", 4, &r5).unwrap();
        assert!(update.is_response);
        assert_eq!(update.status, Status::RegisteredRoaming);
        assert_eq!(update.rat, Some(Rat::CatM1));
        assert_eq!(update.cell_id, Some(0x07ba_7016));
    }

    #[test]
    fn status_two_with_location_is_a_urc() {
        let update =
            parse_registration(RegType::Cgreg, b"2,\"0001\",\"0002\"", 2, &GENERIC).unwrap();
        assert!(!update.is_response);
        assert_eq!(update.status, Status::Searching);
    }

    #[test]
    fn sara_r41x_extra_cereg_parameter() {
        let module = Module::SaraR410m(SaraR410m);
        let update = parse_registration(
            RegType::Cereg,
            b"1,\"0001\",\"05\",\"0000abcd\",9",
            4,
            &module,
        )
        .unwrap();
        assert_eq!(update.cell_id, Some(0xabcd));
        assert_eq!(update.rat, Some(Rat::Nb1));
    }

    #[test]
    fn lara_r6_extra_parameter_only_in_response() {
        let module = Module::LaraR6(LaraR6);
        let response = parse_registration(
            RegType::Cereg,
            b"4,1,\"0001\",\"05\",\"0000abcd\",7",
            4,
            &module,
        )
        .unwrap();
        assert_eq!(response.cell_id, Some(0xabcd));

        let urc =
            parse_registration(RegType::Cereg, b"1,\"0001\",\"0000abcd\"", 4, &module).unwrap();
        assert_eq!(urc.cell_id, Some(0xabcd));
        assert_eq!(urc.rat, Some(Rat::Lte));
    }

    #[test]
    fn lena_r8_creg_without_n_or_act() {
        let module = Module::LenaR8(LenaR8);
        let update = parse_registration(RegType::Creg, b"2,\"0001\",\"0002\"", 2, &module);
        assert_eq!(update.unwrap().status, Status::Searching);

        let update =
            parse_registration(RegType::Creg, b"1,\"0001\",\"0002\"", 2, &module).unwrap();
        assert!(!update.is_response);
        assert_eq!(update.rat, Some(Rat::GsmGprsEgprs));
    }

    #[test]
    fn power_saving_timers() {
        assert_eq!(gprs_timer2_seconds("00000101"), Some(10));
        assert_eq!(gprs_timer2_seconds("01000011"), Some(3 * 360));
        assert_eq!(gprs_timer2_seconds("11100000"), None);
        assert_eq!(gprs_timer3_seconds("00100001"), Some(3600));
        assert_eq!(gprs_timer3_seconds("01100011"), Some(6));
        assert_eq!(gprs_timer3_seconds("11100000"), None);
        assert_eq!(gprs_timer3_seconds("0101"), None);

        let update = parse_registration(
            RegType::Cereg,
            b"1,\"0001\",\"000000a1\",7,,,\"00000101\",\"00100001\"",
            4,
            &GENERIC,
        )
        .unwrap();
        assert_eq!(
            update.power_save,
            Some(PowerSaveParameters {
                on: true,
                active_time_seconds: Some(10),
                periodic_wakeup_seconds: Some(3600),
            })
        );
    }

    #[test]
    fn not_registered_on_one_ps_type_is_not_reported() {
        let mut state = RegistrationState::new();
        let eps = parse_registration(
            RegType::Cereg,
            b"5,\"2046\",\"07ba7016\",7",
            4,
            &GENERIC,
        )
        .unwrap();
        assert!(state.apply(&eps).notify);

        let gprs =
            parse_registration(RegType::Cgreg, b"0,\"0000\",\"0000\"", 2, &GENERIC).unwrap();
        let change = state.apply(&gprs);
        assert!(!change.notify);
        assert_eq!(state.slot(RegType::Cgreg).status(), Status::NotRegistered);
        assert_eq!(state.status(Domain::Ps), Status::RegisteredRoaming);
        assert!(state.is_registered());
        assert_eq!(state.cell_id, Some(0x07ba_7016));
    }

    #[test]
    fn reactivation_is_requested_once() {
        let mut state = RegistrationState::new();
        state.profile_state = ProfileState::RequiresReactivation;

        let searching = parse_registration(RegType::Cereg, b"2", 4, &GENERIC).unwrap();
        assert!(!state.apply(&searching).reactivate);

        let home =
            parse_registration(RegType::Cereg, b"1,\"0001\",\"00000001\",7", 4, &GENERIC).unwrap();
        assert!(state.apply(&home).reactivate);
        assert_eq!(state.profile_state, ProfileState::ShouldBeUp);
        assert!(!state.apply(&home).reactivate);
    }

    #[test]
    fn polled_registration_does_not_reactivate() {
        let mut state = RegistrationState::new();
        state.profile_state = ProfileState::RequiresReactivation;

        let polled =
            parse_registration(RegType::Cereg, b"4,1,\"0001\",\"00000001\",7", 4, &GENERIC)
                .unwrap();
        assert!(polled.is_response);
        assert!(!state.apply(&polled).reactivate);
        assert_eq!(state.profile_state, ProfileState::RequiresReactivation);
    }

    #[test]
    fn power_save_changes_are_reported_once() {
        let mut state = RegistrationState::new();
        let update = parse_registration(
            RegType::Cereg,
            b"1,\"0001\",\"000000a1\",7,,,\"00000101\",\"00100001\"",
            4,
            &GENERIC,
        )
        .unwrap();
        assert!(state.apply(&update).power_save.is_some());
        assert!(state.apply(&update).power_save.is_none());
    }
}
