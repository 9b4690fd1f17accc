use thiserror::Error;

use crate::term::{Label, Var};

/// Schema construction failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchemaError {
    #[error("label `{0}` is defined more than once")]
    DuplicateLabel(Label),

    #[error("type `{label}` declares unknown supertype `{supertype}`")]
    UnknownSupertype { label: Label, supertype: Label },

    #[error("type `{label}` ({kind}) cannot specialise `{supertype}` ({super_kind})")]
    SupertypeKindMismatch {
        label: Label,
        kind: String,
        supertype: Label,
        super_kind: String,
    },

    #[error("type hierarchy is cyclic at `{0}`")]
    CyclicHierarchy(Label),

    #[error("`{label}` references `{role}`, which is not a role")]
    NotARole { label: Label, role: Label },

    #[error("`{0}` is not a known type")]
    UnknownType(Label),

    #[error("attribute type `{0}` has no value type")]
    MissingValueType(Label),
}

/// Pattern, query and rule construction failures.
///
/// These are reported before any resolution work starts.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PatternError {
    #[error("negation blocks may not contain disjunctions")]
    DisjunctionInNegation,

    #[error("variable {var} in a negation is not bound in the enclosing scope")]
    UnboundNegationVariable { var: Var },

    #[error("unknown label `{0}`")]
    UnknownLabel(Label),

    #[error("label `{label}` is a {actual}, expected a {expected}")]
    UnexpectedLabelKind {
        label: Label,
        expected: &'static str,
        actual: String,
    },

    #[error("relation type `{relation}` does not relate role `{role}`")]
    RoleNotRelated { relation: Label, role: Label },

    #[error("pattern is empty")]
    EmptyPattern,

    #[error("rule `{rule}`: body must be a single conjunction")]
    RuleBodyNotConjunctive { rule: Label },

    #[error("rule `{rule}`: invalid body: {reason}")]
    InvalidRuleBody { rule: Label, reason: String },

    #[error("rule `{rule}`: invalid head: {reason}")]
    InvalidRuleHead { rule: Label, reason: String },

    #[error("rule `{rule}`: head variable {var} is not bound by the body")]
    UnboundHeadVariable { rule: Label, var: Var },
}
