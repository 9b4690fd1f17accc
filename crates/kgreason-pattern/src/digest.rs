//! Stable, deterministic digests.
//!
//! Inferred concepts need ids that do not depend on resolution order, and
//! equivalence hashes must not depend on the process-random seed of the std
//! hasher. Both use the same primitive:
//!
//! - algorithm: **FNV-1a 64-bit**
//! - output: `"<prefix><16 lowercase hex digits>"`
//!
//! This is not a security primitive.

use std::hash::Hasher;

/// Prefix used for ids of concepts created by rule application.
pub const INFERRED_ID_PREFIX: &str = "inf:";

const FNV_OFFSET_BASIS: u64 = 0xcbf29ce484222325;
const FNV_PRIME: u64 = 0x00000100000001b3;

/// FNV-1a 64-bit as a [`Hasher`], so `#[derive(Hash)]` values can feed it.
#[derive(Debug, Clone, Copy)]
pub struct Fnv1a64(u64);

impl Default for Fnv1a64 {
    fn default() -> Self {
        Self(FNV_OFFSET_BASIS)
    }
}

impl Fnv1a64 {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a string followed by a separator byte, so `("ab", "c")` and
    /// `("a", "bc")` hash differently.
    pub fn write_str(&mut self, s: &str) {
        self.write(s.as_bytes());
        self.write_u8(0xff);
    }
}

impl Hasher for Fnv1a64 {
    fn finish(&self) -> u64 {
        self.0
    }

    fn write(&mut self, bytes: &[u8]) {
        for b in bytes {
            self.0 ^= *b as u64;
            self.0 = self.0.wrapping_mul(FNV_PRIME);
        }
    }
}

/// FNV-1a 64-bit over arbitrary bytes.
pub fn fnv1a64(bytes: &[u8]) -> u64 {
    let mut h = Fnv1a64::new();
    h.write(bytes);
    h.finish()
}

/// Stable id for an inferred concept of the given `kind` ("relation",
/// "attribute").
///
/// The id depends only on what the concept is, never on which rule derived
/// it, so the same fact derived twice collapses to one concept. Parts are fed
/// in the order given; callers pass them in a canonical order (type, then
/// sorted `role=player` pairs; or type and value).
pub fn inferred_id(kind: &str, parts: &[&str]) -> String {
    let mut h = Fnv1a64::new();
    h.write_str(kind);
    for p in parts {
        h.write_str(p);
    }
    format!("{INFERRED_ID_PREFIX}{:016x}", h.finish())
}
