//! Nearmatch advertisement payloads: message types and version.

use serde::{Deserialize, Serialize};

use crate::criteria::{Criteria, CRITERIA_BYTES};
use crate::identity::{SelfId, ID_LEN};

/// Version byte carried by intent messages.
pub const INTENT_VERSION: u8 = 0x01;

/// `gender | criteria | sender`
pub const PROFILE_LEN: usize = 1 + CRITERIA_BYTES + ID_LEN;

/// `opcode | version | sender | target`
pub const INTENT_LEN: usize = 1 + 1 + ID_LEN + ID_LEN;

/// Legacy advertisement PDU data limit.
pub const MAX_ADVERTISEMENT_LEN: usize = 31;

/// Bytes the transport adds around our payload: flags AD (3) plus service-data AD header
/// (length, type, 16-bit UUID).
pub const ADVERTISEMENT_FRAMING: usize = 3 + 4;

/// Largest payload that still fits in one advertisement.
pub const MAX_PAYLOAD_LEN: usize = MAX_ADVERTISEMENT_LEN - ADVERTISEMENT_FRAMING;

/// Advertised gender. Ordinal is the wire byte.
#[repr(u8)]
#[derive(Debug, Clone, Copy, Default, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Gender {
    Male = 0,
    Female = 1,
    NonBinary = 2,
    #[default]
    Private = 3,
}

impl Gender {
    /// Out-of-range ordinals map to `Private`.
    pub fn from_wire(b: u8) -> Self {
        match b {
            0 => Gender::Male,
            1 => Gender::Female,
            2 => Gender::NonBinary,
            _ => Gender::Private,
        }
    }

    pub fn to_wire(self) -> u8 {
        self as u8
    }
}

/// Directed interaction signal.
#[repr(u8)]
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Opcode {
    Like = 0x01,
    SuperLike = 0x02,
    Mutual = 0x10,
    ConnectRequest = 0x20,
}

impl Opcode {
    pub fn from_wire(b: u8) -> Option<Self> {
        match b {
            0x01 => Some(Opcode::Like),
            0x02 => Some(Opcode::SuperLike),
            0x10 => Some(Opcode::Mutual),
            0x20 => Some(Opcode::ConnectRequest),
            _ => None,
        }
    }

    pub fn to_wire(self) -> u8 {
        self as u8
    }
}

/// Decoded profile broadcast.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize, Deserialize)]
pub struct ProfileAdvert {
    pub gender: Gender,
    pub criteria: Criteria,
    pub sender: SelfId,
}

/// Decoded intent message. `target` is [`SelfId::ZERO`] when undirected.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize, Deserialize)]
pub struct IntentMessage {
    pub opcode: Opcode,
    pub sender: SelfId,
    pub target: SelfId,
}

impl IntentMessage {
    pub fn is_directed(&self) -> bool {
        !self.target.is_zero()
    }
}

/// Anything that can arrive on the shared broadcast channel and that we understand.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum Packet {
    Profile(ProfileAdvert),
    Intent(IntentMessage),
}

/// What the settings collaborator supplies: who I am and what I look for.
#[derive(Debug, Clone, Copy, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    pub gender: Gender,
    pub traits: Criteria,
    pub wants: Criteria,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payloads_fit_one_advertisement() {
        assert_eq!(PROFILE_LEN, 17);
        assert_eq!(INTENT_LEN, 18);
        assert!(PROFILE_LEN <= MAX_PAYLOAD_LEN);
        assert!(INTENT_LEN <= MAX_PAYLOAD_LEN);
    }

    #[test]
    fn gender_out_of_range_is_private() {
        assert_eq!(Gender::from_wire(1), Gender::Female);
        assert_eq!(Gender::from_wire(3), Gender::Private);
        assert_eq!(Gender::from_wire(4), Gender::Private);
        assert_eq!(Gender::from_wire(0xff), Gender::Private);
        assert_eq!(Gender::default(), Gender::Private);
    }

    #[test]
    fn opcode_values() {
        for op in [Opcode::Like, Opcode::SuperLike, Opcode::Mutual, Opcode::ConnectRequest] {
            assert_eq!(Opcode::from_wire(op.to_wire()), Some(op));
        }
        assert_eq!(Opcode::ConnectRequest.to_wire(), 0x20);
        assert_eq!(Opcode::from_wire(0x03), None);
    }
}
