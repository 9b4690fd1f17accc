//! kgreason reasoner
//!
//! Backward-chaining resolution of conjunctive patterns over a knowledge
//! graph, with rules, negation and tabled recursion:
//!
//! ```text
//! ┌───────────┐   ┌──────────────┐   ┌──────────────┐   ┌──────────────┐
//! │  Pattern  │──►│ ReasonerQuery│──►│  QueryPlan   │──►│ atomic goals │
//! │ (DNF)     │   │ (validated)  │   │ (sub-queries)│   │              │
//! └───────────┘   └──────────────┘   └──────────────┘   └──────┬───────┘
//!                                                               │
//!          ┌──────────────────────┬─────────────────────────────┤
//!          ▼                      ▼                             ▼
//!   ┌─────────────┐      ┌─────────────────┐          ┌──────────────────┐
//!   │  Storage    │      │ SemanticCache   │          │ RuleGraph        │
//!   │  lookup     │      │ exact/subsuming │          │ RULE unifiers,   │
//!   │             │      │ entries         │          │ body resolution  │
//!   └─────────────┘      └─────────────────┘          └──────────────────┘
//! ```
//!
//! ## Key pieces
//!
//! - **Equivalence**: alpha and structural equivalence of queries, each with
//!   a consistent hash
//! - **Unification**: [`MultiUnifier`]s between atomic queries at five
//!   strengths ([`UnifierType`])
//! - **Semantic difference**: what a narrower query adds on top of a cached
//!   one, and how cached answers carry over
//! - **Engine**: fixpoint iteration with cooperative cancellation and
//!   iteration/answer ceilings; every answer comes with an explanation DAG

pub mod branding;
pub mod cache;
pub mod concept;
pub mod config;
pub mod engine;
pub mod equivalence;
pub mod error;
pub mod explanation;
pub mod graph;
pub mod matcher;
pub mod plan;
pub mod query;
pub mod query_plan;
pub mod rules;
pub mod semantic;
pub mod storage;
pub mod unifier;

pub use branding::{Branded, ResolutionToken, TokenMismatch};
pub use cache::{CacheEntry, EntryId, SemanticCache};
pub use concept::{Concept, ConceptMap, RolePlayerRef, Thing};
pub use config::ReasonerConfig;
pub use engine::{CancellationHandle, Reasoner, ResolutionResult, ResolutionStats};
pub use equivalence::{AlphaKey, Equivalence};
pub use error::{ReasonerError, Result};
pub use explanation::{Answer, ExplanationGraph, ExplanationId, ExplanationKind, ExplanationNode};
pub use graph::FactGraph;
pub use matcher::Fact;
pub use plan::{ResolutionPlan, Tier};
pub use query::{ReasonerAtomicQuery, ReasonerQuery, Substitution};
pub use query_plan::{QueryPlan, SubQuery};
pub use rules::{Polarity, RuleGraph, RuleId};
pub use semantic::{SemanticDifference, VariableDefinition};
pub use storage::{MaterialisationSink, Storage};
pub use unifier::{MultiUnifier, Unifier, UnifierType};
