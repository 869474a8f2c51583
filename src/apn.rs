//! Built-in APN database and MNO profile properties.
//!
//! When the application does not give an APN, the driver picks candidates
//! from [`resolve_apn`] using the MCC/MNC at the start of the IMSI, and tries
//! them in order.

/// One APN with its credentials. Empty strings mean "none".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ApnConfig {
    pub apn: &'static str,
    pub username: &'static str,
    pub password: &'static str,
}

impl ApnConfig {
    const fn new(apn: &'static str) -> Self {
        Self {
            apn,
            username: "",
            password: "",
        }
    }

    const fn with_credentials(
        apn: &'static str,
        username: &'static str,
        password: &'static str,
    ) -> Self {
        Self {
            apn,
            username,
            password,
        }
    }

    pub fn has_credentials(&self) -> bool {
        !self.username.is_empty()
    }
}

struct ApnEntry {
    mcc: &'static str,
    /// Comma separated list of 2 or 3 digit MNCs.
    mncs: &'static str,
    configs: &'static [ApnConfig],
}

static DEFAULT_APN: &[ApnConfig] = &[ApnConfig::new("internet")];

static APN_DATABASE: &[ApnEntry] = &[
    // United Kingdom
    ApnEntry {
        mcc: "234",
        mncs: "10,02,11",
        configs: &[ApnConfig::with_credentials(
            "mobile.o2.co.uk",
            "o2web",
            "password",
        )],
    },
    ApnEntry {
        mcc: "234",
        mncs: "15",
        configs: &[ApnConfig::with_credentials("internet", "web", "web")],
    },
    ApnEntry {
        mcc: "234",
        mncs: "20",
        configs: &[ApnConfig::new("three.co.uk")],
    },
    ApnEntry {
        mcc: "234",
        mncs: "30,33",
        configs: &[ApnConfig::with_credentials(
            "everywhere",
            "eesecure",
            "secure",
        )],
    },
    // Sweden
    ApnEntry {
        mcc: "240",
        mncs: "01,05",
        configs: &[ApnConfig::new("online.telia.se")],
    },
    ApnEntry {
        mcc: "240",
        mncs: "02,04",
        configs: &[ApnConfig::new("data.tre.se")],
    },
    ApnEntry {
        mcc: "240",
        mncs: "07",
        configs: &[ApnConfig::new("internet.tele2.se")],
    },
    ApnEntry {
        mcc: "240",
        mncs: "08,24",
        configs: &[ApnConfig::new("internet.telenor.se")],
    },
    // Denmark
    ApnEntry {
        mcc: "238",
        mncs: "01,10",
        configs: &[ApnConfig::new("internet")],
    },
    ApnEntry {
        mcc: "238",
        mncs: "02,77",
        configs: &[ApnConfig::new("internet.telenor.dk")],
    },
    // Germany
    ApnEntry {
        mcc: "262",
        mncs: "01,06",
        configs: &[ApnConfig::with_credentials(
            "internet.telekom",
            "telekom",
            "tm",
        )],
    },
    ApnEntry {
        mcc: "262",
        mncs: "02,04,09",
        configs: &[ApnConfig::new("web.vodafone.de")],
    },
    ApnEntry {
        mcc: "262",
        mncs: "03,07,08,11",
        configs: &[ApnConfig::new("internet")],
    },
    // Netherlands
    ApnEntry {
        mcc: "204",
        mncs: "04",
        configs: &[ApnConfig::new("live.vodafone.com")],
    },
    ApnEntry {
        mcc: "204",
        mncs: "08",
        configs: &[ApnConfig::with_credentials("KPN4G.nl", "KPN", "gprs")],
    },
    // United States
    ApnEntry {
        mcc: "310",
        mncs: "030,150,170,280,380,410,560,680",
        configs: &[ApnConfig::new("broadband"), ApnConfig::new("m2m.com.attz")],
    },
    ApnEntry {
        mcc: "310",
        mncs: "160,200,210,220,230,240,250,260,270,310,490,580,660,800",
        configs: &[ApnConfig::new("fast.t-mobile.com")],
    },
    ApnEntry {
        mcc: "311",
        mncs: "480",
        configs: &[ApnConfig::new("vzwinternet")],
    },
    // Global IoT SIMs
    ApnEntry {
        mcc: "901",
        mncs: "28",
        configs: &[ApnConfig::new("iot.1nce.net")],
    },
    ApnEntry {
        mcc: "901",
        mncs: "40,43",
        configs: &[ApnConfig::new("em")],
    },
];

/// APN candidates for the network the SIM belongs to, falling back to
/// `"internet"` for unknown networks.
///
/// The result only depends on the MCC and the 2 or 3 digit MNC at the start
/// of the IMSI and always points into static data.
pub fn resolve_apn(imsi: &str) -> &'static [ApnConfig] {
    let digits = imsi.as_bytes();
    if digits.len() < 5 || !digits.iter().all(u8::is_ascii_digit) {
        return DEFAULT_APN;
    }
    let (mcc, rest) = imsi.split_at(3);

    APN_DATABASE
        .iter()
        .filter(|entry| entry.mcc == mcc)
        .find(|entry| entry.mncs.split(',').any(|mnc| rest.starts_with(mnc)))
        .map(|entry| entry.configs)
        .unwrap_or(DEFAULT_APN)
}

/// Behaviour of the module imposed by its MNO profile (`AT+UMNOPROF`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct MnoFeatures(u8);

impl MnoFeatures {
    pub const NONE: Self = Self(0);
    /// The module refuses `AT+CGDCONT` and `AT+UPSD=<profile>,1`; the APN is
    /// set by the profile.
    pub const NO_CGDCONT: Self = Self(1 << 0);
    /// Together with `NO_CGDCONT`: drop an APN given by the application
    /// rather than failing.
    pub const IGNORE_APN: Self = Self(1 << 1);

    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    pub const fn contains(&self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

static MNO_DATABASE: &[(u8, MnoFeatures)] = &[
    // Verizon
    (3, MnoFeatures::NO_CGDCONT),
    // Verizon Thingspace private network
    (23, MnoFeatures::NO_CGDCONT.union(MnoFeatures::IGNORE_APN)),
];

/// Features recorded for an MNO profile.
pub fn mno_features(profile: u8) -> MnoFeatures {
    MNO_DATABASE
        .iter()
        .find(|(id, _)| *id == profile)
        .map(|(_, features)| *features)
        .unwrap_or(MnoFeatures::NONE)
}

/// `true` if `profile` is listed with `feature`.
pub fn mno_profile_has(profile: u8, feature: MnoFeatures) -> bool {
    feature != MnoFeatures::NONE && mno_features(profile).contains(feature)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn telia_sweden() {
        let configs = resolve_apn("240011234567890");
        assert_eq!(configs, &[ApnConfig::new("online.telia.se")]);
        assert!(!configs[0].has_credentials());
    }

    #[test]
    fn three_digit_mncs_are_matched() {
        let configs = resolve_apn("310410123456789");
        assert_eq!(configs.len(), 2);
        assert_eq!(configs[0].apn, "broadband");
        assert_eq!(configs[1].apn, "m2m.com.attz");

        assert_eq!(resolve_apn("311480000000000")[0].apn, "vzwinternet");
    }

    #[test]
    fn credentials_come_along() {
        let configs = resolve_apn("234301234567890");
        assert_eq!(configs[0].apn, "everywhere");
        assert_eq!(configs[0].username, "eesecure");
        assert_eq!(configs[0].password, "secure");
    }

    #[test]
    fn unknown_or_garbage_imsi_gets_the_default() {
        assert_eq!(resolve_apn("001011234567890")[0].apn, "internet");
        assert_eq!(resolve_apn("24"), DEFAULT_APN);
        assert_eq!(resolve_apn("ERROR"), DEFAULT_APN);
    }

    #[test]
    fn lookups_are_stable() {
        let a = resolve_apn("240011111111111");
        let b = resolve_apn("240019999999999");
        assert!(core::ptr::eq(a, b));
        assert!(core::ptr::eq(resolve_apn("1"), resolve_apn("2")));
    }

    #[test]
    fn mno_profiles() {
        assert!(mno_profile_has(3, MnoFeatures::NO_CGDCONT));
        assert!(!mno_profile_has(3, MnoFeatures::IGNORE_APN));
        assert!(mno_profile_has(23, MnoFeatures::IGNORE_APN));
        assert!(!mno_profile_has(100, MnoFeatures::NO_CGDCONT));
        assert!(!mno_profile_has(3, MnoFeatures::NONE));
    }
}
