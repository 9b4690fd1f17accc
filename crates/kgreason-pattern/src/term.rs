//! Terms shared by every atom: variables, schema labels, concept ids and
//! literal values (with the comparators that constrain them).

use serde::{Deserialize, Serialize};
use std::fmt;

/// A query-scoped variable.
///
/// Variables whose name starts with `_` are *anonymous*: they were introduced
/// by pattern construction (an unnamed relation, the attribute of a
/// `has ... 'literal'` shorthand) rather than written by the user. Anonymous
/// variables are local to the conjunction that introduced them.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Var(String);

impl Var {
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self(name.trim_start_matches('$').to_string())
    }

    /// Fresh anonymous variable `_<tag><n>`.
    pub fn anonymous(tag: &str, n: usize) -> Self {
        Self(format!("_{tag}{n}"))
    }

    pub fn name(&self) -> &str {
        &self.0
    }

    pub fn is_anonymous(&self) -> bool {
        self.0.starts_with('_')
    }
}

impl fmt::Display for Var {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "${}", self.0)
    }
}

impl From<&str> for Var {
    fn from(name: &str) -> Self {
        Var::new(name)
    }
}

/// A schema label (type, role or attribute type name).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Label(String);

impl Label {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Label {
    fn from(name: &str) -> Self {
        Label::new(name)
    }
}

/// Identifier of a stored (or inferred) concept.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConceptId(String);

impl ConceptId {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConceptId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ConceptId {
    fn from(raw: &str) -> Self {
        ConceptId::new(raw)
    }
}

/// Attribute literal.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Value {
    Bool(bool),
    Long(i64),
    String(String),
}

impl Value {
    /// Value type tag, used by structural comparisons.
    pub fn value_type(&self) -> ValueType {
        match self {
            Value::Bool(_) => ValueType::Bool,
            Value::Long(_) => ValueType::Long,
            Value::String(_) => ValueType::String,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Bool(b) => write!(f, "{b}"),
            Value::Long(n) => write!(f, "{n}"),
            Value::String(s) => write!(f, "'{s}'"),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Long(n)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueType {
    Bool,
    Long,
    String,
}

/// Comparison operator of a value predicate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Comparator {
    Eq,
    Neq,
    Gt,
    Gte,
    Lt,
    Lte,
    Contains,
}

impl Comparator {
    /// Equality-like comparators pin a variable to a single value.
    pub fn is_equality(self) -> bool {
        matches!(self, Comparator::Eq)
    }

    /// Evaluate `lhs <op> rhs`. Values of different types never compare.
    pub fn test(self, lhs: &Value, rhs: &Value) -> bool {
        if lhs.value_type() != rhs.value_type() {
            return matches!(self, Comparator::Neq);
        }
        match self {
            Comparator::Eq => lhs == rhs,
            Comparator::Neq => lhs != rhs,
            Comparator::Gt => lhs > rhs,
            Comparator::Gte => lhs >= rhs,
            Comparator::Lt => lhs < rhs,
            Comparator::Lte => lhs <= rhs,
            Comparator::Contains => match (lhs, rhs) {
                (Value::String(haystack), Value::String(needle)) => haystack.contains(needle.as_str()),
                _ => false,
            },
        }
    }

    fn symbol(self) -> &'static str {
        match self {
            Comparator::Eq => "==",
            Comparator::Neq => "!=",
            Comparator::Gt => ">",
            Comparator::Gte => ">=",
            Comparator::Lt => "<",
            Comparator::Lte => "<=",
            Comparator::Contains => "contains",
        }
    }
}

impl fmt::Display for Comparator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

/// Right-hand side of a value predicate.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "of", rename_all = "snake_case")]
pub enum Operand {
    Literal(Value),
    Var(Var),
}

impl Operand {
    pub fn as_literal(&self) -> Option<&Value> {
        match self {
            Operand::Literal(v) => Some(v),
            Operand::Var(_) => None,
        }
    }

    pub fn as_var(&self) -> Option<&Var> {
        match self {
            Operand::Var(v) => Some(v),
            Operand::Literal(_) => None,
        }
    }
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operand::Literal(v) => write!(f, "{v}"),
            Operand::Var(v) => write!(f, "{v}"),
        }
    }
}

/// `comparator operand` applied to some variable.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ValueConstraint {
    pub comparator: Comparator,
    pub operand: Operand,
}

impl ValueConstraint {
    pub fn new(comparator: Comparator, operand: Operand) -> Self {
        Self { comparator, operand }
    }

    pub fn literal(comparator: Comparator, value: impl Into<Value>) -> Self {
        Self::new(comparator, Operand::Literal(value.into()))
    }

    /// True for `== literal`.
    pub fn is_specific(&self) -> bool {
        self.comparator.is_equality() && matches!(self.operand, Operand::Literal(_))
    }

    /// Evaluate against a concrete value. Variable operands need a binding
    /// and are evaluated through [`ValueConstraint::test_with`].
    pub fn test(&self, value: &Value) -> bool {
        match &self.operand {
            Operand::Literal(rhs) => self.comparator.test(value, rhs),
            Operand::Var(_) => true,
        }
    }

    pub fn test_with(&self, value: &Value, rhs: &Value) -> bool {
        self.comparator.test(value, rhs)
    }

    /// Does every value satisfying `self` also satisfy `other`?
    ///
    /// Only literal constraints are reasoned about; variable comparisons imply
    /// each other only when identical.
    pub fn implies(&self, other: &ValueConstraint) -> bool {
        if self == other {
            return true;
        }
        let (Operand::Literal(mine), Operand::Literal(theirs)) = (&self.operand, &other.operand) else {
            return false;
        };
        if mine.value_type() != theirs.value_type() {
            return false;
        }
        use Comparator::*;
        match (self.comparator, other.comparator) {
            (Eq, _) => other.comparator.test(mine, theirs),
            (Gt, Gt) | (Gt, Gte) | (Gte, Gte) => mine >= theirs,
            (Gte, Gt) => mine > theirs,
            (Lt, Lt) | (Lt, Lte) | (Lte, Lte) => mine <= theirs,
            (Lte, Lt) => mine < theirs,
            (Gt, Neq) => mine >= theirs,
            (Gte, Neq) => mine > theirs,
            (Lt, Neq) => mine <= theirs,
            (Lte, Neq) => mine < theirs,
            (Contains, Contains) => Contains.test(mine, theirs),
            _ => false,
        }
    }

    /// Can some value satisfy both constraints? Conservative: only pinned
    /// (`==`) constraints can be proven incompatible.
    pub fn compatible(&self, other: &ValueConstraint) -> bool {
        match (&self.operand, &other.operand) {
            (Operand::Literal(mine), _) if self.comparator.is_equality() => other.test(mine),
            (_, Operand::Literal(theirs)) if other.comparator.is_equality() => self.test(theirs),
            _ => true,
        }
    }

    /// Same comparator and operand kind, ignoring the concrete literal.
    pub fn same_shape(&self, other: &ValueConstraint) -> bool {
        if self.comparator != other.comparator {
            return false;
        }
        match (&self.operand, &other.operand) {
            (Operand::Literal(a), Operand::Literal(b)) => a.value_type() == b.value_type(),
            (Operand::Var(_), Operand::Var(_)) => true,
            _ => false,
        }
    }
}

impl fmt::Display for ValueConstraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.comparator, self.operand)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vars_strip_dollar_prefix() {
        assert_eq!(Var::new("$x"), Var::new("x"));
        assert_eq!(Var::new("x").to_string(), "$x");
        assert!(Var::anonymous("r", 0).is_anonymous());
        assert!(!Var::new("x").is_anonymous());
    }

    #[test]
    fn comparators_do_not_cross_value_types() {
        assert!(!Comparator::Eq.test(&Value::Long(1), &Value::String("1".into())));
        assert!(Comparator::Neq.test(&Value::Long(1), &Value::String("1".into())));
        assert!(Comparator::Contains.test(&"hello".into(), &"ell".into()));
    }

    #[test]
    fn implication_between_literal_constraints() {
        let eq5 = ValueConstraint::literal(Comparator::Eq, 5);
        let gt3 = ValueConstraint::literal(Comparator::Gt, 3);
        let gt7 = ValueConstraint::literal(Comparator::Gt, 7);
        let gte3 = ValueConstraint::literal(Comparator::Gte, 3);

        assert!(eq5.implies(&gt3));
        assert!(!eq5.implies(&gt7));
        assert!(gt7.implies(&gt3));
        assert!(!gt3.implies(&gt7));
        assert!(gt3.implies(&gte3));
        assert!(!gte3.implies(&gt3));
        assert!(!gt3.implies(&eq5));
    }

    #[test]
    fn compatibility_only_refutes_pinned_values() {
        let eq_v = ValueConstraint::literal(Comparator::Eq, "v");
        let eq_w = ValueConstraint::literal(Comparator::Eq, "w");
        let gt3 = ValueConstraint::literal(Comparator::Gt, 3);
        let lt2 = ValueConstraint::literal(Comparator::Lt, 2);

        assert!(!eq_v.compatible(&eq_w));
        assert!(eq_v.compatible(&eq_v));
        // Unpinned ranges are assumed satisfiable together.
        assert!(gt3.compatible(&lt2));
    }

    #[test]
    fn shape_ignores_literal() {
        let a = ValueConstraint::literal(Comparator::Eq, "v");
        let b = ValueConstraint::literal(Comparator::Eq, "w");
        let c = ValueConstraint::literal(Comparator::Eq, 3);
        assert!(a.same_shape(&b));
        assert!(!a.same_shape(&c));
    }
}
