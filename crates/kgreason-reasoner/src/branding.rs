//! Runtime branding for resolution-scoped values.
//!
//! Every resolution gets a fresh [`ResolutionToken`]. The semantic cache and
//! the explanation arena carry the token of the resolution that created them,
//! and explanation ids handed out with answers are [`Branded`] with it, so an
//! id (or a cache) from one resolution cannot be used with another.
//!
//! The token is process-local and never serialised.

use std::num::NonZeroU64;
use std::sync::atomic::{AtomicU64, Ordering};

use thiserror::Error;

static NEXT_RESOLUTION_TOKEN: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ResolutionToken(NonZeroU64);

impl ResolutionToken {
    pub fn new() -> Self {
        let raw = NEXT_RESOLUTION_TOKEN.fetch_add(1, Ordering::Relaxed);
        // The counter starts at 1 and would need 2^64 resolutions to wrap.
        Self(NonZeroU64::new(raw).unwrap_or(NonZeroU64::MIN))
    }

    pub fn raw(self) -> u64 {
        self.0.get()
    }
}

impl Default for ResolutionToken {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("resolution token mismatch (expected resolution#{}, got resolution#{})", .expected.raw(), .actual.raw())]
pub struct TokenMismatch {
    pub expected: ResolutionToken,
    pub actual: ResolutionToken,
}

/// A value tied to one resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Branded<T> {
    token: ResolutionToken,
    value: T,
}

impl<T> Branded<T> {
    pub fn new(token: ResolutionToken, value: T) -> Self {
        Self { token, value }
    }

    pub fn token(&self) -> ResolutionToken {
        self.token
    }

    pub fn assert_token(&self, actual: ResolutionToken) -> Result<(), TokenMismatch> {
        if self.token != actual {
            return Err(TokenMismatch {
                expected: self.token,
                actual,
            });
        }
        Ok(())
    }

    pub fn get_with_token(&self, actual: ResolutionToken) -> Result<&T, TokenMismatch> {
        self.assert_token(actual)?;
        Ok(&self.value)
    }

    pub fn into_inner(self) -> T {
        self.value
    }
}
