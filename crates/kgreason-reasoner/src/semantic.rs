//! Semantic difference: what a child query adds on top of a subsuming
//! parent, so the parent's answers can be filtered into the child's.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use kgreason_pattern::{Atom, Label, Operand, TypeContext, TypeRef, ValueConstraint, Var};

use crate::concept::{Concept, ConceptMap, RolePlayerRef};
use crate::query::{ReasonerAtomicQuery, ReasonerQuery, Substitution};
use crate::unifier::Unifier;

/// The narrowing a child applies to one parent variable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariableDefinition {
    pub var: Var,
    /// Most specific type the child requires.
    pub type_: Option<Label>,
    sub_types: BTreeSet<Label>,
    /// Role a role variable is narrowed to.
    pub role: Option<Label>,
    sub_roles: BTreeSet<Label>,
    /// Roles the bound player must play in the parent's relation, as a
    /// multiset.
    pub played_roles: Vec<Label>,
    /// Extra predicates; variable operands are in the parent's namespace.
    pub value_constraints: Vec<ValueConstraint>,
}

impl VariableDefinition {
    fn new(var: Var) -> Self {
        Self {
            var,
            type_: None,
            sub_types: BTreeSet::new(),
            role: None,
            sub_roles: BTreeSet::new(),
            played_roles: Vec::new(),
            value_constraints: Vec::new(),
        }
    }

    pub fn is_trivial(&self) -> bool {
        self.type_.is_none() && self.role.is_none() && self.played_roles.is_empty() && self.value_constraints.is_empty()
    }

    fn satisfied_by(&self, answer: &ConceptMap) -> bool {
        let Some(concept) = answer.get(&self.var) else {
            return false;
        };
        if self.type_.is_some() && !self.sub_types.contains(concept.label()) {
            return false;
        }
        if self.role.is_some() && !self.sub_roles.contains(concept.label()) {
            return false;
        }
        self.value_constraints.iter().all(|c| {
            let Some(value) = concept.value() else {
                return false;
            };
            match &c.operand {
                Operand::Literal(_) => c.test(value),
                Operand::Var(other) => answer
                    .get(other)
                    .and_then(Concept::value)
                    .is_some_and(|rhs| c.test_with(value, rhs)),
            }
        })
    }
}

/// One role-player slot of the child's relation, in the parent's variables.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct SlotRequirement {
    player: Var,
    role_var: Option<Var>,
    /// Admissible roles; `None` for the meta role.
    roles: Option<BTreeSet<Label>>,
}

impl SlotRequirement {
    fn fits(&self, slot: &RolePlayerRef, answer: &ConceptMap) -> bool {
        let Some(player) = answer.get(&self.player).and_then(Concept::id) else {
            return false;
        };
        if &slot.player != player {
            return false;
        }
        if !self.roles.as_ref().map_or(true, |roles| roles.contains(&slot.role)) {
            return false;
        }
        // A bound role variable names the role actually played in its slot.
        match self.role_var.as_ref().and_then(|rv| answer.get(rv)) {
            Some(bound) if bound.as_thing().is_none() => bound.label() == &slot.role,
            _ => true,
        }
    }
}

/// Every requirement to a distinct slot of the relation.
fn assign_slots(required: &[SlotRequirement], slots: &[RolePlayerRef], used: &mut [bool], answer: &ConceptMap) -> bool {
    let Some((first, rest)) = required.split_first() else {
        return true;
    };
    for (i, slot) in slots.iter().enumerate() {
        if used[i] || !first.fits(slot, answer) {
            continue;
        }
        used[i] = true;
        if assign_slots(rest, slots, used, answer) {
            return true;
        }
        used[i] = false;
    }
    false
}

impl fmt::Display for VariableDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.var)?;
        if let Some(t) = &self.type_ {
            write!(f, " isa {t}")?;
        }
        if let Some(r) = &self.role {
            write!(f, " role {r}")?;
        }
        for r in &self.played_roles {
            write!(f, " plays {r}")?;
        }
        for c in &self.value_constraints {
            write!(f, " {c}")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SemanticDifference {
    definitions: Vec<VariableDefinition>,
    /// Parent relation variable, for played-role checks.
    relation_var: Option<Var>,
    /// The child's whole relation, checked jointly once any player's roles
    /// narrow: two child slots can never share one slot of the answer.
    slots: Vec<SlotRequirement>,
}

impl SemanticDifference {
    /// Difference of `child` over `parent` under a child -> parent
    /// `unifier`. `None` when some narrowing cannot be expressed, in which
    /// case the parent is unusable for this child.
    pub fn compute(
        parent: &ReasonerAtomicQuery,
        child: &ReasonerAtomicQuery,
        unifier: &Unifier,
        ctx: &dyn TypeContext,
    ) -> Option<SemanticDifference> {
        let mut definitions = Vec::new();
        for (cv, pv) in unifier.pairs() {
            let mut def = VariableDefinition::new(pv.clone());

            let parent_types = implied_types(parent.query(), pv);
            let narrowing: Vec<Label> = implied_types(child.query(), cv)
                .into_iter()
                .filter(|c| !parent_types.iter().any(|p| ctx.is_subtype(p, c)))
                .collect();
            if !narrowing.is_empty() {
                let most_specific = narrowing
                    .iter()
                    .find(|m| narrowing.iter().all(|o| ctx.is_subtype(m, o)))?
                    .clone();
                def.sub_types = ctx.sub_types_inclusive(&most_specific);
                def.type_ = Some(most_specific);
            }

            if let (Some(child_role), parent_role) = (slot_role(child.atom(), cv), slot_role(parent.atom(), pv)) {
                if parent_role.as_ref() != Some(&child_role) {
                    def.sub_roles = ctx.sub_types_inclusive(&child_role);
                    def.role = Some(child_role);
                }
            }

            let child_roles = played_roles(child.atom(), cv, ctx);
            if child_roles != played_roles(parent.atom(), pv, ctx) {
                def.played_roles = child_roles;
            }

            let parent_values = parent.query().var_guards(pv).values;
            for constraint in child.query().var_guards(cv).values {
                let operand = match &constraint.operand {
                    Operand::Var(v) => Operand::Var(unifier.get(v).next()?.clone()),
                    literal => literal.clone(),
                };
                let mapped = ValueConstraint::new(constraint.comparator, operand);
                if !parent_values.iter().any(|p| **p == mapped) {
                    def.value_constraints.push(mapped);
                }
            }

            if !def.is_trivial() {
                definitions.push(def);
            }
        }
        let relation_var = match parent.atom() {
            Atom::Relation { var, .. } => Some(var.clone()),
            _ => None,
        };
        let slots = if definitions.iter().any(|d| !d.played_roles.is_empty()) {
            slot_requirements(child.atom(), unifier, ctx)?
        } else {
            Vec::new()
        };
        Some(SemanticDifference {
            definitions,
            relation_var,
            slots,
        })
    }

    pub fn definitions(&self) -> &[VariableDefinition] {
        &self.definitions
    }

    /// Parent answers need no filtering.
    pub fn is_trivial(&self) -> bool {
        self.definitions.is_empty()
    }

    /// Does a parent answer satisfy every definition?
    pub fn satisfied_by(&self, parent_answer: &ConceptMap) -> bool {
        self.definitions.iter().all(|d| d.satisfied_by(parent_answer)) && self.slots_fit(parent_answer)
    }

    fn slots_fit(&self, answer: &ConceptMap) -> bool {
        if self.slots.is_empty() {
            return true;
        }
        let Some(relation) = self
            .relation_var
            .as_ref()
            .and_then(|r| answer.get(r))
            .and_then(Concept::as_thing)
        else {
            return false;
        };
        let mut used = vec![false; relation.role_players.len()];
        assign_slots(&self.slots, &relation.role_players, &mut used, answer)
    }

    /// Turn a parent answer into a child answer.
    ///
    /// Checks the definitions, renames through the parent -> child
    /// `unifier`, enforces the child's id constants and projects onto
    /// `child_vars`. `None` when the answer does not carry over.
    pub fn propagate_answer(
        &self,
        parent_answer: &ConceptMap,
        child_substitution: &Substitution,
        child_vars: &BTreeSet<Var>,
        unifier: &Unifier,
    ) -> Option<ConceptMap> {
        if !self.satisfied_by(parent_answer) {
            return None;
        }
        let renamed = parent_answer.rename(unifier)?;
        for (var, id) in child_substitution {
            if let Some(concept) = renamed.get(var) {
                if concept.id() != Some(id) {
                    return None;
                }
            }
        }
        Some(renamed.project(child_vars))
    }
}

impl fmt::Display for SemanticDifference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[")?;
        for (i, d) in self.definitions.iter().enumerate() {
            if i > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{d}")?;
        }
        f.write_str("]")
    }
}

/// Types `var` is known to have: its isa guards plus what the atom implies.
fn implied_types(query: &ReasonerQuery, var: &Var) -> Vec<Label> {
    let mut out: Vec<Label> = query.var_guards(var).types.into_iter().cloned().collect();
    for atom in query.selectable_atoms() {
        match atom {
            Atom::Isa {
                var: v,
                ty: TypeRef::Label(l),
            } if v == var => out.push(l.clone()),
            Atom::Relation { var: v, ty: Some(l), .. } if v == var => out.push(l.clone()),
            Atom::Has {
                attribute,
                attribute_type,
                ..
            } if attribute == var => out.push(attribute_type.clone()),
            _ => {}
        }
    }
    out
}

/// Role label of the slot whose role variable is `var`.
fn slot_role(atom: &Atom, var: &Var) -> Option<Label> {
    let Atom::Relation { players, .. } = atom else {
        return None;
    };
    players
        .iter()
        .find(|rp| rp.role_var.as_ref() == Some(var))
        .and_then(|rp| rp.role.clone())
}

/// The child relation's slots, renamed through the child -> parent
/// `unifier`. `None` when a player has no image.
fn slot_requirements(atom: &Atom, unifier: &Unifier, ctx: &dyn TypeContext) -> Option<Vec<SlotRequirement>> {
    let Atom::Relation { players, .. } = atom else {
        return Some(Vec::new());
    };
    players
        .iter()
        .map(|rp| {
            Some(SlotRequirement {
                player: unifier.get(&rp.player).next()?.clone(),
                role_var: rp.role_var.as_ref().and_then(|rv| unifier.get(rv).next().cloned()),
                roles: rp
                    .role
                    .as_ref()
                    .filter(|r| !ctx.is_meta(r))
                    .map(|r| ctx.sub_types_inclusive(r)),
            })
        })
        .collect()
}

/// Sorted non-meta roles `var` fills in `atom`.
fn played_roles(atom: &Atom, var: &Var, ctx: &dyn TypeContext) -> Vec<Label> {
    let Atom::Relation { players, .. } = atom else {
        return Vec::new();
    };
    let mut roles: Vec<Label> = players
        .iter()
        .filter(|rp| &rp.player == var)
        .filter_map(|rp| rp.role.clone())
        .filter(|r| !ctx.is_meta(r))
        .collect();
    roles.sort();
    roles
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    use kgreason_pattern::{Comparator, Conjunction, Schema, ValueType};

    use crate::concept::{RolePlayerRef, Thing};

    fn schema() -> Schema {
        Schema::builder()
            .role("baseRole1", "role")
            .role("subRole1", "baseRole1")
            .relation("binary", "relation", &["baseRole1", "subRole1"])
            .entity("person", "entity")
            .entity("student", "person")
            .attribute("age", "attribute", ValueType::Long)
            .plays("person", &["baseRole1", "subRole1"])
            .build()
            .unwrap()
    }

    fn atomic(conj: Conjunction) -> ReasonerAtomicQuery {
        ReasonerAtomicQuery::from_query(ReasonerQuery::from_conjunction(&conj)).unwrap()
    }

    fn only(diffs: Vec<(Unifier, SemanticDifference)>) -> (Unifier, SemanticDifference) {
        assert_eq!(diffs.len(), 1);
        diffs.into_iter().next().unwrap()
    }

    #[test]
    fn value_narrowing_filters_parent_answers() {
        let s = schema();
        let parent = atomic(Conjunction::builder().has("x", "age", "a").build());
        let child = atomic(
            Conjunction::builder()
                .has("y", "age", "b")
                .value("b", Comparator::Gt, 18)
                .build(),
        );
        let (u, diff) = only(parent.multi_unifier_with_semantic_diff(&child, &s));
        assert!(!diff.is_trivial());

        let answer = |age: i64| -> ConceptMap {
            [
                (Var::new("x"), Concept::from(Thing::entity("P", "person"))),
                (Var::new("a"), Concept::from(Thing::attribute("A", "age", age.into()))),
            ]
            .into_iter()
            .collect()
        };
        let vars = child.vars();
        let subst = child.substitution();
        assert!(diff.propagate_answer(&answer(10), &subst, &vars, &u).is_none());
        let kept = diff.propagate_answer(&answer(30), &subst, &vars, &u).unwrap();
        assert!(kept.contains(&Var::new("y")));
        assert!(kept.contains(&Var::new("b")));
    }

    #[test]
    fn type_narrowing_uses_subtypes() {
        let s = schema();
        let parent = atomic(Conjunction::builder().isa("x", "person").build());
        let child = atomic(Conjunction::builder().isa("x", "student").build());
        let (u, diff) = only(parent.multi_unifier_with_semantic_diff(&child, &s));
        assert_eq!(diff.definitions()[0].type_, Some(Label::new("student")));

        let person: ConceptMap = [(Var::new("x"), Concept::from(Thing::entity("P", "person")))]
            .into_iter()
            .collect();
        let student: ConceptMap = [(Var::new("x"), Concept::from(Thing::entity("S", "student")))]
            .into_iter()
            .collect();
        let vars = child.vars();
        assert!(diff.propagate_answer(&person, &BTreeMap::new(), &vars, &u).is_none());
        assert!(diff.propagate_answer(&student, &BTreeMap::new(), &vars, &u).is_some());

        assert!(child.multi_unifier_with_semantic_diff(&parent, &s).is_empty());
    }

    #[test]
    fn played_role_narrowing_checks_the_relation() {
        let s = schema();
        let parent = atomic(
            Conjunction::builder()
                .relation(Some("r"), Some("binary"), &[(Some("baseRole1"), "x")])
                .build(),
        );
        let child = atomic(
            Conjunction::builder()
                .relation(Some("r"), Some("binary"), &[(Some("subRole1"), "x")])
                .build(),
        );
        let (u, diff) = only(parent.multi_unifier_with_semantic_diff(&child, &s));

        let answer = |role: &str| -> ConceptMap {
            let rel = Thing::relation(
                "R",
                "binary",
                vec![RolePlayerRef {
                    role: Label::new(role),
                    player: "P".into(),
                }],
            );
            [
                (Var::new("r"), Concept::from(rel)),
                (Var::new("x"), Concept::from(Thing::entity("P", "person"))),
            ]
            .into_iter()
            .collect()
        };
        let vars = child.vars();
        assert!(diff.propagate_answer(&answer("baseRole1"), &BTreeMap::new(), &vars, &u).is_none());
        assert!(diff.propagate_answer(&answer("subRole1"), &BTreeMap::new(), &vars, &u).is_some());
    }

    #[test]
    fn id_constants_are_enforced_on_propagation() {
        let s = schema();
        let parent = atomic(Conjunction::builder().isa("x", "person").build());
        let child = atomic(Conjunction::builder().isa("x", "person").id("x", "P").build());
        let (u, diff) = only(parent.multi_unifier_with_semantic_diff(&child, &s));
        assert!(diff.is_trivial());

        let other: ConceptMap = [(Var::new("x"), Concept::from(Thing::entity("Q", "person")))]
            .into_iter()
            .collect();
        let vars = child.vars();
        assert!(diff
            .propagate_answer(&other, &child.substitution(), &vars, &u)
            .is_none());
    }
}
