//! Device identity: the anonymous 8-byte self id and where it is kept.

use std::fmt;
use std::sync::Mutex;

use rand::distributions::Alphanumeric;
use rand::rngs::OsRng;
use rand::Rng;
use serde::{Deserialize, Serialize};

/// Length of a sender/target id on the wire.
pub const ID_LEN: usize = 8;

/// Anonymous per-installation id. Sender id in outgoing payloads and the
/// self-filter for incoming ones.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
pub struct SelfId(#[serde(with = "bytes_8")] pub(crate) [u8; ID_LEN]);

mod bytes_8 {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    pub fn serialize<S: Serializer>(v: &[u8; 8], serializer: S) -> Result<S::Ok, S::Error> {
        v.as_slice().serialize(serializer)
    }
    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<[u8; 8], D::Error> {
        let buf: Vec<u8> = Deserialize::deserialize(d)?;
        buf.try_into()
            .map_err(|_| serde::de::Error::custom("expected 8 bytes"))
    }
}

impl SelfId {
    /// All-zero id. Reserved as the target of undirected intents; never generated.
    pub const ZERO: SelfId = SelfId([0u8; ID_LEN]);

    /// Generate a fresh id of 8 printable ASCII alphanumerics.
    pub fn generate() -> Self {
        let mut id = [0u8; ID_LEN];
        for (slot, byte) in id.iter_mut().zip(OsRng.sample_iter(&Alphanumeric)) {
            *slot = byte;
        }
        SelfId(id)
    }

    pub fn from_bytes(bytes: [u8; ID_LEN]) -> Self {
        SelfId(bytes)
    }

    /// Exactly 8 bytes or `None`.
    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        let arr: [u8; ID_LEN] = bytes.try_into().ok()?;
        Some(SelfId(arr))
    }

    pub fn as_bytes(&self) -> &[u8; ID_LEN] {
        &self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; ID_LEN]
    }
}

/// ASCII when every byte is printable, lowercase hex otherwise.
impl fmt::Display for SelfId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.iter().all(|b| b.is_ascii_graphic()) {
            for b in &self.0 {
                write!(f, "{}", *b as char)?;
            }
        } else {
            for b in &self.0 {
                write!(f, "{:02x}", b)?;
            }
        }
        Ok(())
    }
}

/// Error loading or saving the identity.
#[derive(Debug, thiserror::Error)]
pub enum IdentityError {
    #[error("identity storage: {0}")]
    Io(#[from] std::io::Error),
    #[error("stored identity has {0} bytes, expected 8")]
    Corrupt(usize),
}

/// Where the self id lives between runs. The id is written once and never changed.
pub trait IdentityStore {
    fn load(&self) -> Result<Option<SelfId>, IdentityError>;
    fn save(&self, id: &SelfId) -> Result<(), IdentityError>;
}

/// Return the persisted id, or generate and persist a new one.
pub fn load_or_create<S: IdentityStore + ?Sized>(store: &S) -> Result<SelfId, IdentityError> {
    if let Some(id) = store.load()? {
        tracing::info!(id = %id, "loaded existing identity");
        return Ok(id);
    }
    let id = SelfId::generate();
    store.save(&id)?;
    tracing::info!(id = %id, "generated new identity");
    Ok(id)
}

/// Process-lifetime store. Used by mobile hosts that persist the id themselves, and by tests.
#[derive(Default)]
pub struct MemoryIdentityStore {
    slot: Mutex<Option<SelfId>>,
}

impl MemoryIdentityStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_id(id: SelfId) -> Self {
        Self {
            slot: Mutex::new(Some(id)),
        }
    }
}

impl IdentityStore for MemoryIdentityStore {
    fn load(&self) -> Result<Option<SelfId>, IdentityError> {
        Ok(*self.slot.lock().unwrap_or_else(|e| e.into_inner()))
    }

    fn save(&self, id: &SelfId) -> Result<(), IdentityError> {
        *self.slot.lock().unwrap_or_else(|e| e.into_inner()) = Some(*id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_id_is_printable_ascii() {
        let id = SelfId::generate();
        assert!(id.as_bytes().iter().all(|b| b.is_ascii_alphanumeric()));
        assert!(!id.is_zero());
        assert_eq!(id.to_string().len(), ID_LEN);
    }

    #[test]
    fn generated_ids_differ() {
        assert_ne!(SelfId::generate(), SelfId::generate());
    }

    #[test]
    fn display_falls_back_to_hex() {
        let id = SelfId::from_bytes([0, 1, 2, 3, 0xaa, 0xbb, 0xcc, 0xff]);
        assert_eq!(id.to_string(), "00010203aabbccff");
        assert_eq!(SelfId::from_bytes(*b"AAAAAAAA").to_string(), "AAAAAAAA");
    }

    #[test]
    fn from_slice_requires_exact_length() {
        assert!(SelfId::from_slice(b"1234567").is_none());
        assert!(SelfId::from_slice(b"123456789").is_none());
        assert_eq!(
            SelfId::from_slice(b"12345678"),
            Some(SelfId::from_bytes(*b"12345678"))
        );
    }

    #[test]
    fn load_or_create_persists_once() {
        let store = MemoryIdentityStore::new();
        let first = load_or_create(&store).unwrap();
        let second = load_or_create(&store).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn load_or_create_keeps_existing() {
        let id = SelfId::from_bytes(*b"KEEPME01");
        let store = MemoryIdentityStore::with_id(id);
        assert_eq!(load_or_create(&store).unwrap(), id);
    }
}
