//! Fixed-layout advertisement payloads.
//!
//! Profile: `gender(1) | criteria(8) | sender(8)`.
//! Intent:  `opcode(1) | version(1) | sender(8) | target(8)`.
//! Multi-byte integers would be little-endian; every current field is a single byte or an
//! opaque byte string copied verbatim. Decoders return `None` for anything that is not ours.

use crate::criteria::{Criteria, CRITERIA_BYTES};
use crate::identity::{SelfId, ID_LEN};
use crate::protocol::{
    Gender, IntentMessage, Opcode, Packet, ProfileAdvert, INTENT_LEN, INTENT_VERSION,
    MAX_PAYLOAD_LEN, PROFILE_LEN,
};

const CRITERIA_OFFSET: usize = 1;
const PROFILE_SENDER_OFFSET: usize = CRITERIA_OFFSET + CRITERIA_BYTES;
const INTENT_SENDER_OFFSET: usize = 2;
const INTENT_TARGET_OFFSET: usize = INTENT_SENDER_OFFSET + ID_LEN;

/// Caller passed a buffer the codec cannot encode.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WireError {
    #[error("invalid input: {field} must be {expected} bytes, got {actual}")]
    InvalidInput {
        field: &'static str,
        expected: usize,
        actual: usize,
    },
    #[error("payload of {0} bytes does not fit one advertisement")]
    TooLarge(usize),
}

fn check_len(field: &'static str, bytes: &[u8], expected: usize) -> Result<(), WireError> {
    if bytes.len() != expected {
        return Err(WireError::InvalidInput {
            field,
            expected,
            actual: bytes.len(),
        });
    }
    Ok(())
}

fn check_fits(len: usize) -> Result<(), WireError> {
    if len > MAX_PAYLOAD_LEN {
        return Err(WireError::TooLarge(len));
    }
    Ok(())
}

/// Encode a profile broadcast.
pub fn encode_profile(
    gender: Gender,
    criteria: &[u8],
    sender: &[u8],
) -> Result<[u8; PROFILE_LEN], WireError> {
    check_len("criteria", criteria, CRITERIA_BYTES)?;
    check_len("sender id", sender, ID_LEN)?;
    check_fits(PROFILE_LEN)?;
    let mut out = [0u8; PROFILE_LEN];
    out[0] = gender.to_wire();
    out[CRITERIA_OFFSET..PROFILE_SENDER_OFFSET].copy_from_slice(criteria);
    out[PROFILE_SENDER_OFFSET..].copy_from_slice(sender);
    Ok(out)
}

/// Typed convenience over [`encode_profile`].
pub fn encode_profile_advert(advert: &ProfileAdvert) -> Result<[u8; PROFILE_LEN], WireError> {
    encode_profile(
        advert.gender,
        advert.criteria.as_bytes(),
        advert.sender.as_bytes(),
    )
}

/// Decode a profile broadcast. `None` unless exactly 17 bytes.
pub fn decode_profile(bytes: &[u8]) -> Option<ProfileAdvert> {
    if bytes.len() != PROFILE_LEN {
        return None;
    }
    Some(ProfileAdvert {
        gender: Gender::from_wire(bytes[0]),
        criteria: Criteria::from_slice(&bytes[CRITERIA_OFFSET..PROFILE_SENDER_OFFSET]),
        sender: SelfId::from_slice(&bytes[PROFILE_SENDER_OFFSET..])?,
    })
}

/// Encode an intent message. `target = None` zero-fills the target (undirected).
pub fn encode_intent(
    opcode: Opcode,
    sender: &[u8],
    target: Option<&[u8]>,
) -> Result<[u8; INTENT_LEN], WireError> {
    check_len("sender id", sender, ID_LEN)?;
    if let Some(t) = target {
        check_len("target id", t, ID_LEN)?;
    }
    check_fits(INTENT_LEN)?;
    let mut out = [0u8; INTENT_LEN];
    out[0] = opcode.to_wire();
    out[1] = INTENT_VERSION;
    out[INTENT_SENDER_OFFSET..INTENT_TARGET_OFFSET].copy_from_slice(sender);
    if let Some(t) = target {
        out[INTENT_TARGET_OFFSET..].copy_from_slice(t);
    }
    Ok(out)
}

/// Decode an intent message. `None` on wrong length, unknown version or unknown opcode.
pub fn decode_intent(bytes: &[u8]) -> Option<IntentMessage> {
    if bytes.len() != INTENT_LEN || bytes[1] != INTENT_VERSION {
        return None;
    }
    Some(IntentMessage {
        opcode: Opcode::from_wire(bytes[0])?,
        sender: SelfId::from_slice(&bytes[INTENT_SENDER_OFFSET..INTENT_TARGET_OFFSET])?,
        target: SelfId::from_slice(&bytes[INTENT_TARGET_OFFSET..])?,
    })
}

/// Classify a raw payload from the shared channel by length, then decode it.
pub fn decode_packet(bytes: &[u8]) -> Option<Packet> {
    match bytes.len() {
        PROFILE_LEN => decode_profile(bytes).map(Packet::Profile),
        INTENT_LEN => decode_intent(bytes).map(Packet::Intent),
        _ => None,
    }
}
