//! Argument and parameter types used by Network service Commands and Responses

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum OperatorSelectionMode {
    /// 0 (default value and factory-programmed value): automatic
    Automatic = 0,
    /// 1: manual
    Manual = 1,
    /// 2: deregister from network
    Deregister = 2,
    /// 3: set only <format>
    FormatOnly = 3,
    /// 4: manual/automatic
    ManualAutomatic = 4,
}

impl OperatorSelectionMode {
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(Self::Automatic),
            1 => Some(Self::Manual),
            2 => Some(Self::Deregister),
            3 => Some(Self::FormatOnly),
            4 => Some(Self::ManualAutomatic),
            _ => None,
        }
    }
}
