use serde::{Deserialize, Serialize};

/// Resolution settings, passed explicitly into the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReasonerConfig {
    /// Fixpoint reiteration ceiling.
    pub max_iterations: usize,
    /// Ceiling on answers held across all tables of one resolution.
    pub max_answers: usize,
    /// Reuse answers of complete, subsuming cache entries.
    pub use_cache: bool,
    /// Persist inferred facts through the materialisation sink.
    pub materialise: bool,
    /// Record full explanations; when off, nodes carry no children.
    pub explain: bool,
}

impl Default for ReasonerConfig {
    fn default() -> Self {
        Self {
            max_iterations: 64,
            max_answers: 100_000,
            use_cache: true,
            materialise: false,
            explain: true,
        }
    }
}

impl ReasonerConfig {
    pub fn from_json(text: &str) -> anyhow::Result<Self> {
        Ok(serde_json::from_str(text)?)
    }
}
