//! Network registration snapshot derived from CREG reports.

/// 3GPP CREG `<stat>` values.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum NetStatus {
    /// Initial state, not registered and not searching.
    #[default]
    NotRegistered,
    RegisteredHome,
    Searching,
    RegistrationDenied,
    Unknown,
    RegisteredRoaming,
    Invalid,
}

impl From<u8> for NetStatus {
    fn from(v: u8) -> Self {
        match v {
            0 => Self::NotRegistered,
            1 => Self::RegisteredHome,
            2 => Self::Searching,
            3 => Self::RegistrationDenied,
            4 => Self::Unknown,
            5 => Self::RegisteredRoaming,
            _ => Self::Invalid,
        }
    }
}

impl NetStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotRegistered => "Not Registered",
            Self::RegisteredHome => "Registered Home",
            Self::Searching => "Not Registered, Searching",
            Self::RegistrationDenied => "Registration Denied",
            Self::Unknown => "Unknown",
            Self::RegisteredRoaming => "Registered Roaming",
            Self::Invalid => "Invalid",
        }
    }

    /// Whether this status counts as signalling up. Home and roaming do;
    /// every flavour of not-registered does not.
    pub fn is_up(&self) -> bool {
        matches!(self, Self::RegisteredHome | Self::RegisteredRoaming)
    }
}

/// Registration and signal-quality snapshot as last reported by the modem.
#[derive(Debug, Default, Clone, Copy)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct NetInfo {
    pub stat: NetStatus,
    /// Location area code of the camped-on cell.
    pub lac: u16,
    /// Cell id of the camped-on cell.
    pub ci: u16,
    pub rssi: u8,
    pub ber: u8,
}

/// Render a CSQ RSSI index for logging.
pub fn rssi_to_dbm(rssi: u8) -> i16 {
    match rssi {
        0 => -113,
        31 => -51,
        1..=30 => -113 + 2 * rssi as i16,
        _ => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stat_mapping() {
        assert_eq!(NetStatus::from(1), NetStatus::RegisteredHome);
        assert_eq!(NetStatus::from(5), NetStatus::RegisteredRoaming);
        assert_eq!(NetStatus::from(9), NetStatus::Invalid);
    }

    #[test]
    fn sig_status_derivation() {
        assert!(NetStatus::RegisteredHome.is_up());
        assert!(NetStatus::RegisteredRoaming.is_up());
        assert!(!NetStatus::NotRegistered.is_up());
        assert!(!NetStatus::Searching.is_up());
        assert!(!NetStatus::RegistrationDenied.is_up());
        assert!(!NetStatus::Unknown.is_up());
    }

    #[test]
    fn rssi_rendering() {
        assert_eq!(rssi_to_dbm(0), -113);
        assert_eq!(rssi_to_dbm(2), -109);
        assert_eq!(rssi_to_dbm(31), -51);
        assert_eq!(rssi_to_dbm(99), 0);
    }
}
