use thiserror::Error;

use kgreason_pattern::{Label, PatternError};

use crate::branding::TokenMismatch;

/// Everything a resolution can fail with.
///
/// Construction errors (`Pattern`, `NonAtomicQuery`, `UnstratifiedRules`) are
/// raised before any storage access. Failed unifications and non-applicable
/// cache entries are not errors.
#[derive(Debug, Error)]
pub enum ReasonerError {
    #[error(transparent)]
    Pattern(#[from] PatternError),

    #[error("not an atomic query ({selectable} selectable atoms): {query}")]
    NonAtomicQuery { query: String, selectable: usize },

    #[error("rules are not stratifiable: negative dependency cycle through {rules:?}")]
    UnstratifiedRules { rules: Vec<Label> },

    #[error("resolution cancelled")]
    Cancelled,

    #[error("resolution did not reach a fixpoint ({iterations} iterations, {answers} answers)")]
    ResourceExhausted { iterations: usize, answers: usize },

    #[error(transparent)]
    TokenMismatch(#[from] TokenMismatch),

    #[error("storage error: {0}")]
    Storage(#[source] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, ReasonerError>;
