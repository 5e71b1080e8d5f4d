//! Shared data model: phone numbers, call classification and the event
//! payloads carried across the host interface.

use heapless::String;

/// Maximum number of digits carried in a phone number, excluding the
/// terminating NUL of the wire representation.
pub const MAX_NUMBER_DIGITS: usize = 31;
pub const MAX_NAME_SZ: usize = 24;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum NumberType {
    #[default]
    Unknown,
    International,
    National,
    Invalid,
}

impl NumberType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::International => "international",
            Self::National => "national",
            Self::Invalid => "invalid",
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum NumberPlan {
    #[default]
    Unknown,
    Isdn,
    Invalid,
}

impl NumberPlan {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::Isdn => "ISDN",
            Self::Invalid => "invalid",
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum NumberValidity {
    #[default]
    Valid,
    Withheld,
    Unavailable,
    Invalid,
}

impl NumberValidity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Valid => "valid",
            Self::Withheld => "withheld",
            Self::Unavailable => "unavailable",
            Self::Invalid => "invalid",
        }
    }
}

/// A phone number as carried by CLIP, CLCC and the SMS address fields.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Number {
    pub digits: String<MAX_NUMBER_DIGITS>,
    pub ty: NumberType,
    pub plan: NumberPlan,
    pub validity: NumberValidity,
}

impl Number {
    pub fn new(digits: &str) -> Self {
        let mut num = Self::default();
        // Digits beyond the slot capacity are dropped rather than erroring;
        // the protocol never produces numbers this long.
        for c in digits.chars() {
            if num.digits.push(c).is_err() {
                break;
            }
        }
        num
    }

    /// Interpret a `<type>` octet from CLIP/CLCC.
    ///
    /// `128` leaves both fields unknown, `129` is unknown type on the ISDN
    /// plan, `145` is international on the ISDN plan and `0` marks the
    /// number unavailable.
    pub fn apply_type_of_address(&mut self, toa: u8) {
        let (ty, plan) = match toa {
            128 => (NumberType::Unknown, NumberPlan::Unknown),
            129 => (NumberType::Unknown, NumberPlan::Isdn),
            145 => (NumberType::International, NumberPlan::Isdn),
            161 => (NumberType::National, NumberPlan::Isdn),
            0 => (NumberType::Invalid, NumberPlan::Invalid),
            _ => {
                warn!("Invalid type of address {}", toa);
                (NumberType::Invalid, NumberPlan::Invalid)
            }
        };
        self.ty = ty;
        self.plan = plan;
    }

    /// The type-of-address octet used when this number is rendered into an
    /// SMS PDU address field.
    pub fn type_of_address(&self) -> u8 {
        let ty = match self.ty {
            NumberType::International => 1,
            NumberType::National => 2,
            _ => 0,
        };
        let plan = match self.plan {
            NumberPlan::Isdn => 1,
            _ => 0,
        };
        0x80 | (ty << 4) | plan
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CallType {
    #[default]
    Voice,
    Data,
    Fax,
    Invalid,
}

impl CallType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Voice => "voice",
            Self::Data => "data",
            Self::Fax => "fax",
            Self::Invalid => "invalid",
        }
    }

    /// Parse the payload of a `+CRING: <type>` indication.
    pub fn from_ring_type(s: &str) -> Self {
        if s.eq_ignore_ascii_case("voice") {
            Self::Voice
        } else if s.eq_ignore_ascii_case("data") {
            Self::Data
        } else if s.eq_ignore_ascii_case("fax") {
            Self::Fax
        } else {
            Self::Invalid
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CallSub {
    #[default]
    Real,
    CallWait,
    ThreeWay,
    Invalid,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Direction {
    Incoming,
    Outgoing,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Incoming => "incoming",
            Self::Outgoing => "outgoing",
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum HangupCause {
    #[default]
    Normal,
    Invalid,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SigStatus {
    Down,
    Up,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Alarm {
    NoSignal,
    NoSim,
}

/// Out-of-band span condition reported through `HostInterface::span_status`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SpanStatus {
    /// Bring-up finished, the span accepts call and SMS requests.
    Ready,
    SigStatus(SigStatus),
    SimInfoReady,
    Alarm(Alarm),
}

/// Payload of an incoming (`con_ind`) or outgoing (`con_req`) call setup.
#[derive(Debug, Default, Clone)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ConEvent {
    pub ty: CallType,
    pub sub: CallSub,
    pub called_num: Number,
    pub calling_num: Number,
    pub calling_name: String<MAX_NAME_SZ>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ConStatus {
    Ringing,
    Answer,
}

#[derive(Debug, Default, Clone, Copy)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct RelEvent {
    pub cause: HangupCause,
}

/// Why an outbound call request was refused before dialing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RefusalReason {
    CallIdInUse,
    NoFreeSlot,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn type_of_address_mapping() {
        let mut num = Number::new("4165551212");
        num.apply_type_of_address(145);
        assert_eq!(num.ty, NumberType::International);
        assert_eq!(num.plan, NumberPlan::Isdn);
        assert_eq!(num.type_of_address(), 0x91);

        num.apply_type_of_address(129);
        assert_eq!(num.ty, NumberType::Unknown);
        assert_eq!(num.plan, NumberPlan::Isdn);
        assert_eq!(num.type_of_address(), 0x81);

        num.apply_type_of_address(0);
        assert_eq!(num.ty, NumberType::Invalid);
        assert_eq!(num.validity, NumberValidity::Valid);
    }

    #[test]
    fn ring_type_parse() {
        assert_eq!(CallType::from_ring_type("VOICE"), CallType::Voice);
        assert_eq!(CallType::from_ring_type("fax"), CallType::Fax);
        assert_eq!(CallType::from_ring_type("SYNC"), CallType::Invalid);
    }
}
