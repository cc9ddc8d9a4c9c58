//! Preference vectors: 64 boolean criteria packed into an 8-byte bitmask.
//!
//! Bit `i` lives in byte `i / 8` at bit position `i % 8` (LSB first).
//! Decoding never fails: short input is zero-padded and trailing bytes are ignored.

use serde::{Deserialize, Serialize};

/// Number of defined criteria.
pub const CRITERIA_COUNT: usize = 64;

/// Bitmask width on the wire.
pub const CRITERIA_BYTES: usize = CRITERIA_COUNT / 8;

/// Pack flags into a bitmask. Missing flags are false; flags past 64 are ignored.
pub fn encode(flags: &[bool]) -> [u8; CRITERIA_BYTES] {
    let mut out = [0u8; CRITERIA_BYTES];
    for (i, _) in flags
        .iter()
        .take(CRITERIA_COUNT)
        .enumerate()
        .filter(|(_, &set)| set)
    {
        out[i / 8] |= 1 << (i % 8);
    }
    out
}

/// Unpack a bitmask into exactly 64 flags.
pub fn decode(bytes: &[u8]) -> [bool; CRITERIA_COUNT] {
    let mut out = [false; CRITERIA_COUNT];
    for (i, flag) in out.iter_mut().enumerate() {
        if let Some(b) = bytes.get(i / 8) {
            *flag = b & (1 << (i % 8)) != 0;
        }
    }
    out
}

/// Share of `my_want` that `their_traits` satisfies, 0..=100, truncated.
/// An empty `my_want` scores 0: no preferences expressed gives no match signal.
pub fn match_percentage(my_want: &[bool], their_traits: &[bool]) -> u8 {
    let wanted = my_want.iter().filter(|&&w| w).count();
    if wanted == 0 {
        return 0;
    }
    let hits = my_want
        .iter()
        .zip(their_traits.iter())
        .filter(|(&w, &t)| w && t)
        .count();
    (hits * 100 / wanted) as u8
}

/// Encoded preference vector. Operations work directly on the bitmask.
#[derive(Debug, Clone, Copy, Default, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct Criteria(pub [u8; CRITERIA_BYTES]);

impl Criteria {
    pub const EMPTY: Criteria = Criteria([0u8; CRITERIA_BYTES]);

    pub fn from_flags(flags: &[bool]) -> Self {
        Criteria(encode(flags))
    }

    /// Set bits for the given criterion indices. Indices past 63 are ignored.
    pub fn from_indices<I: IntoIterator<Item = usize>>(indices: I) -> Self {
        let mut out = [0u8; CRITERIA_BYTES];
        for i in indices.into_iter().filter(|&i| i < CRITERIA_COUNT) {
            out[i / 8] |= 1 << (i % 8);
        }
        Criteria(out)
    }

    /// Zero-padded like [`decode`]; trailing bytes ignored.
    pub fn from_slice(bytes: &[u8]) -> Self {
        let mut out = [0u8; CRITERIA_BYTES];
        let n = bytes.len().min(CRITERIA_BYTES);
        out[..n].copy_from_slice(&bytes[..n]);
        Criteria(out)
    }

    pub fn flags(&self) -> [bool; CRITERIA_COUNT] {
        decode(&self.0)
    }

    pub fn as_bytes(&self) -> &[u8; CRITERIA_BYTES] {
        &self.0
    }

    pub fn is_set(&self, index: usize) -> bool {
        index < CRITERIA_COUNT && self.0[index / 8] & (1 << (index % 8)) != 0
    }

    pub fn count(&self) -> u32 {
        u64::from_le_bytes(self.0).count_ones()
    }

    /// Same result as [`match_percentage`] with `self` as the wanted set.
    pub fn match_percentage(&self, their_traits: &Criteria) -> u8 {
        let want = u64::from_le_bytes(self.0);
        let wanted = want.count_ones();
        if wanted == 0 {
            return 0;
        }
        let hits = (want & u64::from_le_bytes(their_traits.0)).count_ones();
        (hits * 100 / wanted) as u8
    }
}
