//! Inference rules: `when` body, `then` head.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

use crate::atom::Atom;
use crate::error::PatternError;
use crate::pattern::{Conjunction, Pattern};
use crate::schema::Schema;
use crate::term::{Label, Var};

/// A validated `when { ... } then { ... }` rule.
///
/// The head is a single relation or attribute-ownership atom, optionally with
/// `==` literal guards on the attribute variable. Every head variable except
/// the concluded relation and pinned attributes is bound by the body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rule {
    label: Label,
    when: Conjunction,
    then: Conjunction,
    head: usize,
}

impl Rule {
    pub fn new(label: &str, when: Conjunction, then: Conjunction) -> Result<Self, PatternError> {
        let label = Label::new(label);
        check_body(&label, &when)?;

        // Head anonymous variables must not collide with the body's.
        let then = then.rename(&|v: &Var| {
            if v.is_anonymous() {
                Var::new(format!("_h{}", &v.name()[1..]))
            } else {
                v.clone()
            }
        });
        let head = check_head(&label, &when, &then)?;
        Ok(Self {
            label,
            when,
            then,
            head,
        })
    }

    /// Build from arbitrary patterns; each side must normalise to a single
    /// conjunction.
    pub fn from_patterns(label: &str, when: Pattern, then: Pattern) -> Result<Self, PatternError> {
        let single = |p: Pattern| -> Result<Conjunction, PatternError> {
            let mut disjuncts = p.into_disjuncts()?;
            match (disjuncts.pop(), disjuncts.is_empty()) {
                (Some(c), true) => Ok(c),
                _ => Err(PatternError::RuleBodyNotConjunctive { rule: Label::new(label) }),
            }
        };
        Self::new(label, single(when)?, single(then)?)
    }

    /// Check every label against `schema`.
    pub fn validate(&self, schema: &Schema) -> Result<(), PatternError> {
        self.when.validate(schema)?;
        self.then.validate(schema)
    }

    pub fn label(&self) -> &Label {
        &self.label
    }

    pub fn when(&self) -> &Conjunction {
        &self.when
    }

    pub fn then(&self) -> &Conjunction {
        &self.then
    }

    /// The concluded relation or has atom.
    pub fn head(&self) -> &Atom {
        &self.then.atoms()[self.head]
    }

    /// Value guards attached to the head.
    pub fn head_guards(&self) -> impl Iterator<Item = &Atom> {
        self.then.atoms().iter().filter(|a| a.is_predicate())
    }

    /// Schema label the rule concludes instances of.
    pub fn head_label(&self) -> Option<&Label> {
        self.head().label()
    }
}

impl fmt::Display for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "rule {}: when {} then {}", self.label, self.when, self.then)
    }
}

fn check_body(rule: &Label, when: &Conjunction) -> Result<(), PatternError> {
    let invalid = |reason: &str| PatternError::InvalidRuleBody {
        rule: rule.clone(),
        reason: reason.to_string(),
    };
    if when.atoms().is_empty() {
        return Err(invalid("body has no positive atoms"));
    }
    if when.negations().len() > 1 {
        return Err(invalid("body has more than one negation block"));
    }
    if when.negations().iter().any(|n| !n.negations().is_empty()) {
        return Err(invalid("body has a nested negation block"));
    }
    when.check_negation_scoping()
}

fn check_head(rule: &Label, when: &Conjunction, then: &Conjunction) -> Result<usize, PatternError> {
    let invalid = |reason: String| PatternError::InvalidRuleHead {
        rule: rule.clone(),
        reason,
    };
    if !then.negations().is_empty() {
        return Err(invalid("head may not contain negation".into()));
    }
    let heads: Vec<usize> = then
        .atoms()
        .iter()
        .enumerate()
        .filter(|(_, a)| !a.is_predicate())
        .map(|(i, _)| i)
        .collect();
    let &[head] = heads.as_slice() else {
        return Err(invalid(format!("expected exactly one concluded atom, found {}", heads.len())));
    };

    let body_vars = when.vars();
    let unbound = |var: &Var| PatternError::UnboundHeadVariable {
        rule: rule.clone(),
        var: var.clone(),
    };

    let pinned: BTreeSet<&Var> = then
        .atoms()
        .iter()
        .filter_map(|a| match a {
            Atom::Value { var, constraint } if constraint.is_specific() => Some(var),
            _ => None,
        })
        .collect();

    match &then.atoms()[head] {
        Atom::Relation { ty, players, .. } => {
            if ty.is_none() {
                return Err(invalid("concluded relation must name its type".into()));
            }
            if players.is_empty() {
                return Err(invalid("concluded relation has no role players".into()));
            }
            for rp in players {
                if rp.role.is_none() {
                    return Err(invalid(format!("role of {} is ambiguous", rp.player)));
                }
                if rp.role_var.is_some() {
                    return Err(invalid("role variables are not allowed in heads".into()));
                }
                if !body_vars.contains(&rp.player) {
                    return Err(unbound(&rp.player));
                }
            }
        }
        Atom::Has { owner, attribute, .. } => {
            if !body_vars.contains(owner) {
                return Err(unbound(owner));
            }
            if !body_vars.contains(attribute) && !pinned.contains(attribute) {
                return Err(unbound(attribute));
            }
        }
        other => {
            return Err(invalid(format!("cannot conclude `{other}`")));
        }
    }

    for guard in then.atoms().iter().filter(|a| a.is_predicate()) {
        let Atom::Value { var, constraint } = guard else {
            return Err(invalid("id predicates are not allowed in heads".into()));
        };
        if !constraint.is_specific() {
            return Err(invalid(format!("head guard on {var} must be an equality with a literal")));
        }
    }
    Ok(head)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::atom::Atom;

    fn body() -> Conjunction {
        Conjunction::builder()
            .relation(None, Some("friendship"), &[(Some("friend"), "x"), (Some("friend"), "y")])
            .build()
    }

    #[test]
    fn relation_head_is_accepted() {
        let then = Conjunction::builder()
            .relation(None, Some("knows"), &[(Some("knower"), "x"), (Some("known"), "y")])
            .build();
        let rule = Rule::new("knows-friends", body(), then).unwrap();
        assert!(matches!(rule.head(), Atom::Relation { .. }));
        assert_eq!(rule.head_label(), Some(&Label::new("knows")));
    }

    #[test]
    fn head_anonymous_vars_do_not_clash_with_body() {
        let then = Conjunction::builder()
            .relation(None, Some("knows"), &[(Some("knower"), "x"), (Some("known"), "y")])
            .build();
        let rule = Rule::new("r", body(), then).unwrap();
        let body_anon: BTreeSet<Var> = rule.when().vars().into_iter().filter(Var::is_anonymous).collect();
        assert!(rule.head().vars().iter().all(|v| !body_anon.contains(v)));
    }

    #[test]
    fn unbound_head_player_is_rejected() {
        let then = Conjunction::builder()
            .relation(None, Some("knows"), &[(Some("knower"), "y"), (Some("known"), "z")])
            .build();
        assert!(matches!(
            Rule::new("r", body(), then),
            Err(PatternError::UnboundHeadVariable { .. })
        ));
    }

    #[test]
    fn has_head_with_literal_is_accepted() {
        let then = Conjunction::builder().has_value("x", "name", "friendly").build();
        let rule = Rule::new("r", body(), then).unwrap();
        assert_eq!(rule.head_guards().count(), 1);
    }

    #[test]
    fn has_head_with_unbound_attribute_is_rejected() {
        let then = Conjunction::builder().has("x", "name", "n").build();
        assert!(matches!(
            Rule::new("r", body(), then),
            Err(PatternError::UnboundHeadVariable { .. })
        ));
    }

    #[test]
    fn non_atomic_and_ambiguous_heads_are_rejected() {
        let two = Conjunction::builder()
            .relation(None, Some("knows"), &[(Some("knower"), "x")])
            .relation(None, Some("knows"), &[(Some("knower"), "y")])
            .build();
        assert!(matches!(Rule::new("r", body(), two), Err(PatternError::InvalidRuleHead { .. })));

        let meta_role = Conjunction::builder()
            .relation(None, Some("knows"), &[(None, "x")])
            .build();
        assert!(matches!(
            Rule::new("r", body(), meta_role),
            Err(PatternError::InvalidRuleHead { .. })
        ));

        let isa = Conjunction::builder().isa("x", "person").build();
        assert!(matches!(Rule::new("r", body(), isa), Err(PatternError::InvalidRuleHead { .. })));
    }

    #[test]
    fn multiple_or_nested_negations_are_rejected() {
        let then = Conjunction::builder()
            .relation(None, Some("knows"), &[(Some("knower"), "x"), (Some("known"), "y")])
            .build();
        let two_blocks = Conjunction::builder()
            .relation(None, Some("friendship"), &[(Some("friend"), "x"), (Some("friend"), "y")])
            .not(|n| n.isa("x", "robot"))
            .not(|n| n.isa("y", "robot"))
            .build();
        assert!(matches!(
            Rule::new("r", two_blocks, then.clone()),
            Err(PatternError::InvalidRuleBody { .. })
        ));

        let nested = Conjunction::builder()
            .relation(None, Some("friendship"), &[(Some("friend"), "x"), (Some("friend"), "y")])
            .not(|n| n.has("x", "name", "n").not(|m| m.value("n", crate::term::Comparator::Eq, "bob")))
            .build();
        assert!(matches!(
            Rule::new("r", nested, then),
            Err(PatternError::InvalidRuleBody { .. })
        ));
    }
}
