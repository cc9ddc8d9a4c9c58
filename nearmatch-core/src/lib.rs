//! Nearmatch proximity discovery and matching protocol.
//! Host-driven: no I/O; host passes events and receives actions.

pub mod criteria;
pub mod ffi;
pub mod identity;
pub mod protocol;
pub mod radar;
pub mod session;
pub mod wire;

pub use criteria::{Criteria, CRITERIA_BYTES, CRITERIA_COUNT};
pub use identity::{load_or_create, IdentityError, IdentityStore, MemoryIdentityStore, SelfId};
pub use protocol::{Gender, IntentMessage, Opcode, Packet, Profile, ProfileAdvert, INTENT_VERSION};
pub use session::{
    Action, Candidate, MatchSession, Readiness, Report, SessionConfig, SessionError, SessionEvent,
    SessionState,
};
pub use wire::{decode_intent, decode_packet, decode_profile, encode_intent, encode_profile, WireError};
