//! Unifiers: variable correspondences between a child and a parent atomic
//! query.
//!
//! A [`Unifier`] is a set of `child -> parent` variable pairs. Most unifier
//! strengths produce bijections, but rule unifiers may map one head variable
//! onto several query variables (a head player filling two slots) so the
//! representation is a multimap. A [`MultiUnifier`] is the set of every valid
//! correspondence for one `(child, parent, strength)` triple.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use kgreason_pattern::schema::ROLE;
use kgreason_pattern::{Atom, ConceptId, Label, Operand, RolePlayer, TypeContext, TypeRef, ValueConstraint, Var};

use crate::query::ReasonerAtomicQuery;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnifierType {
    /// Same shape, same roles, same constants.
    Exact,
    /// Same shape and roles; constants only need the same kind.
    Structural,
    /// Child is a rule head, parent the query atom it may conclude.
    Rule,
    /// Child is a specialisation of parent (cache reuse).
    Subsumptive,
    /// As `Subsumptive`, ignoring constant identity.
    StructuralSubsumptive,
}

impl UnifierType {
    fn is_bijective(self) -> bool {
        !matches!(self, UnifierType::Rule)
    }

    fn allows_subtypes(self) -> bool {
        matches!(
            self,
            UnifierType::Rule | UnifierType::Subsumptive | UnifierType::StructuralSubsumptive
        )
    }

    fn ignores_literals(self) -> bool {
        matches!(self, UnifierType::Structural | UnifierType::StructuralSubsumptive)
    }
}

// ============================================================================
// Unifier
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Unifier(BTreeSet<(Var, Var)>);

impl Unifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, from: Var, to: Var) -> bool {
        self.0.insert((from, to))
    }

    /// Targets of `var`.
    pub fn get<'a>(&'a self, var: &'a Var) -> impl Iterator<Item = &'a Var> + 'a {
        self.0.iter().filter(move |(from, _)| from == var).map(|(_, to)| to)
    }

    pub fn contains(&self, from: &Var, to: &Var) -> bool {
        self.0.iter().any(|(f, t)| f == from && t == to)
    }

    pub fn pairs(&self) -> impl Iterator<Item = (&Var, &Var)> {
        self.0.iter().map(|(from, to)| (from, to))
    }

    pub fn keys(&self) -> BTreeSet<&Var> {
        self.0.iter().map(|(from, _)| from).collect()
    }

    pub fn values(&self) -> BTreeSet<&Var> {
        self.0.iter().map(|(_, to)| to).collect()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn inverse(&self) -> Unifier {
        self.0.iter().map(|(from, to)| (to.clone(), from.clone())).collect()
    }

    /// `self: a -> b` followed by `next: b -> c` gives `a -> c`.
    pub fn compose(&self, next: &Unifier) -> Unifier {
        self.pairs()
            .flat_map(|(from, mid)| next.get(mid).map(move |to| (from.clone(), to.clone())))
            .collect()
    }

    /// One-to-one and onto between exactly `from` and `to`.
    pub fn is_bijection_between(&self, from: &BTreeSet<Var>, to: &BTreeSet<Var>) -> bool {
        let keys = self.keys();
        let values = self.values();
        keys.len() == self.len()
            && values.len() == self.len()
            && keys.into_iter().eq(from.iter())
            && values.into_iter().eq(to.iter())
    }
}

impl FromIterator<(Var, Var)> for Unifier {
    fn from_iter<I: IntoIterator<Item = (Var, Var)>>(iter: I) -> Self {
        Unifier(iter.into_iter().collect())
    }
}

impl fmt::Display for Unifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("{")?;
        for (i, (from, to)) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{from} -> {to}")?;
        }
        f.write_str("}")
    }
}

/// Every valid unifier for one `(child, parent, strength)` triple.
///
/// Empty means "no correspondence", which is an ordinary outcome.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct MultiUnifier(BTreeSet<Unifier>);

impl MultiUnifier {
    pub fn iter(&self) -> impl Iterator<Item = &Unifier> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn contains(&self, unifier: &Unifier) -> bool {
        self.0.contains(unifier)
    }

    pub fn inverse(&self) -> MultiUnifier {
        self.0.iter().map(Unifier::inverse).collect()
    }
}

impl FromIterator<Unifier> for MultiUnifier {
    fn from_iter<I: IntoIterator<Item = Unifier>>(iter: I) -> Self {
        MultiUnifier(iter.into_iter().collect())
    }
}

impl IntoIterator for MultiUnifier {
    type Item = Unifier;
    type IntoIter = std::collections::btree_set::IntoIter<Unifier>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

// ============================================================================
// Unification
// ============================================================================

pub(crate) fn unify(
    child: &ReasonerAtomicQuery,
    parent: &ReasonerAtomicQuery,
    ty: UnifierType,
    ctx: &dyn TypeContext,
) -> MultiUnifier {
    let child_vars = child.vars();
    let parent_vars = parent.vars();
    atom_candidates(child.atom(), parent.atom(), ty, ctx)
        .into_iter()
        .filter(|u| !ty.is_bijective() || u.is_bijection_between(&child_vars, &parent_vars))
        .filter(|u| guards_compatible(child, parent, u, ty, ctx))
        .collect()
}

/// A unifier under construction.
#[derive(Clone)]
struct Candidate {
    unifier: Unifier,
    bijective: bool,
}

impl Candidate {
    fn new(ty: UnifierType) -> Self {
        Self {
            unifier: Unifier::new(),
            bijective: ty.is_bijective(),
        }
    }

    fn pair(&mut self, child: &Var, parent: &Var) -> bool {
        if self.bijective {
            let forward = self.unifier.get(child).all(|p| p == parent);
            let backward = self.unifier.pairs().all(|(c, p)| p != parent || c == child);
            if !(forward && backward) {
                return false;
            }
        }
        self.unifier.insert(child.clone(), parent.clone());
        true
    }

    fn type_ref(&mut self, child: &TypeRef, parent: &TypeRef, ty: UnifierType, ctx: &dyn TypeContext) -> bool {
        match (child, parent) {
            (TypeRef::Label(c), TypeRef::Label(p)) => label_fits(Some(c), Some(p), ty, ctx),
            (TypeRef::Var(c), TypeRef::Var(p)) => self.pair(c, p),
            _ => false,
        }
    }
}

fn label_fits(child: Option<&Label>, parent: Option<&Label>, ty: UnifierType, ctx: &dyn TypeContext) -> bool {
    match (child, parent) {
        (c, p) if c == p => true,
        (_, None) => ty.allows_subtypes(),
        (None, Some(_)) => false,
        (Some(c), Some(p)) => ty.allows_subtypes() && ctx.is_subtype(c, p),
    }
}

fn role_fits(child: &RolePlayer, parent: &RolePlayer, ty: UnifierType, ctx: &dyn TypeContext) -> bool {
    let roles = match (&child.role, &parent.role) {
        (c, p) if c == p => true,
        _ if !ty.allows_subtypes() => false,
        (_, None) => true,
        (None, Some(_)) => false,
        (Some(c), Some(p)) => (ctx.is_meta(p) && p.as_str() == ROLE) || ctx.is_subtype(c, p),
    };
    let role_vars = match ty {
        UnifierType::Rule => true,
        _ => child.role_var.is_some() == parent.role_var.is_some(),
    };
    roles && role_vars
}

fn atom_candidates(child: &Atom, parent: &Atom, ty: UnifierType, ctx: &dyn TypeContext) -> Vec<Unifier> {
    let mut cand = Candidate::new(ty);
    let ok = match (child, parent) {
        (Atom::Isa { var: cv, ty: ct }, Atom::Isa { var: pv, ty: pt })
        | (Atom::Sub { var: cv, sup: ct }, Atom::Sub { var: pv, sup: pt })
        | (Atom::Plays { var: cv, role: ct }, Atom::Plays { var: pv, role: pt })
        | (Atom::Relates { var: cv, role: ct }, Atom::Relates { var: pv, role: pt }) => {
            cand.pair(cv, pv) && cand.type_ref(ct, pt, ty, ctx)
        }
        // A rule concluding a relation or an attribute ownership also
        // concludes the instance it creates.
        (
            Atom::Relation { var: cv, ty: Some(ct), .. },
            Atom::Isa {
                var: pv,
                ty: TypeRef::Label(pt),
            },
        ) if ty == UnifierType::Rule => ctx.is_subtype(ct, pt) && cand.pair(cv, pv),
        (
            Atom::Has {
                attribute_type,
                attribute,
                ..
            },
            Atom::Isa {
                var: pv,
                ty: TypeRef::Label(pt),
            },
        ) if ty == UnifierType::Rule => ctx.is_subtype(attribute_type, pt) && cand.pair(attribute, pv),
        (
            Atom::Has {
                owner: co,
                attribute_type: ct,
                attribute: ca,
            },
            Atom::Has {
                owner: po,
                attribute_type: pt,
                attribute: pa,
            },
        ) => label_fits(Some(ct), Some(pt), ty, ctx) && cand.pair(co, po) && cand.pair(ca, pa),
        (
            Atom::Relation {
                var: cv,
                ty: ct,
                players: cp,
            },
            Atom::Relation {
                var: pv,
                ty: pt,
                players: pp,
            },
        ) => {
            let arity_ok = if ty.is_bijective() {
                cp.len() == pp.len()
            } else {
                cp.len() >= pp.len()
            };
            if !arity_ok || !label_fits(ct.as_ref(), pt.as_ref(), ty, ctx) || !cand.pair(cv, pv) {
                return Vec::new();
            }
            let mut out = Vec::new();
            let mut used = vec![false; cp.len()];
            assign_slots(pp, cp, &mut used, cand, ty, ctx, &mut out);
            return out;
        }
        _ => false,
    };
    if ok {
        vec![cand.unifier]
    } else {
        Vec::new()
    }
}

/// Assign every parent slot to a distinct child slot, keeping each
/// consistent assignment.
fn assign_slots(
    parent_slots: &[RolePlayer],
    child_slots: &[RolePlayer],
    used: &mut [bool],
    cand: Candidate,
    ty: UnifierType,
    ctx: &dyn TypeContext,
    out: &mut Vec<Unifier>,
) {
    let Some((slot, rest)) = parent_slots.split_first() else {
        out.push(cand.unifier);
        return;
    };
    for (i, child_slot) in child_slots.iter().enumerate() {
        if used[i] || !role_fits(child_slot, slot, ty, ctx) {
            continue;
        }
        let mut next = cand.clone();
        if !next.pair(&child_slot.player, &slot.player) {
            continue;
        }
        if let (Some(cr), Some(pr)) = (&child_slot.role_var, &slot.role_var) {
            if !next.pair(cr, pr) {
                continue;
            }
        }
        used[i] = true;
        assign_slots(rest, child_slots, used, next, ty, ctx, out);
        used[i] = false;
    }
}

fn guards_compatible(
    child: &ReasonerAtomicQuery,
    parent: &ReasonerAtomicQuery,
    unifier: &Unifier,
    ty: UnifierType,
    ctx: &dyn TypeContext,
) -> bool {
    unifier.pairs().all(|(c, p)| {
        let cg = child.query().var_guards(c);
        let pg = parent.query().var_guards(p);
        types_compatible(&cg.types, &pg.types, ty, ctx)
            && values_compatible(&cg.values, &pg.values, unifier, ty)
            && ids_compatible(&cg.ids, &pg.ids, ty)
    })
}

fn types_compatible(child: &[&Label], parent: &[&Label], ty: UnifierType, ctx: &dyn TypeContext) -> bool {
    match ty {
        UnifierType::Exact | UnifierType::Structural => {
            child.iter().collect::<BTreeSet<_>>() == parent.iter().collect::<BTreeSet<_>>()
        }
        UnifierType::Rule => child
            .iter()
            .all(|c| parent.iter().all(|p| ctx.is_subtype(c, p) || ctx.is_subtype(p, c))),
        UnifierType::Subsumptive | UnifierType::StructuralSubsumptive => {
            parent.iter().all(|p| child.iter().any(|c| ctx.is_subtype(c, p)))
        }
    }
}

/// Same comparator and operand; variable operands must correspond under
/// `unifier`.
fn constraint_matches(child: &ValueConstraint, parent: &ValueConstraint, unifier: &Unifier, ty: UnifierType) -> bool {
    if child.comparator != parent.comparator {
        return false;
    }
    match (&child.operand, &parent.operand) {
        (Operand::Var(c), Operand::Var(p)) => unifier.contains(c, p),
        (Operand::Literal(_), Operand::Literal(_)) if ty.ignores_literals() => child.same_shape(parent),
        (Operand::Literal(c), Operand::Literal(p)) => c == p,
        _ => false,
    }
}

fn values_compatible(
    child: &[&ValueConstraint],
    parent: &[&ValueConstraint],
    unifier: &Unifier,
    ty: UnifierType,
) -> bool {
    match ty {
        UnifierType::Exact | UnifierType::Structural => {
            child.len() == parent.len()
                && child
                    .iter()
                    .all(|c| parent.iter().any(|p| constraint_matches(c, p, unifier, ty)))
                && parent
                    .iter()
                    .all(|p| child.iter().any(|c| constraint_matches(c, p, unifier, ty)))
        }
        UnifierType::Rule => child.iter().all(|c| parent.iter().all(|p| c.compatible(p))),
        UnifierType::Subsumptive => parent.iter().all(|p| {
            child.iter().any(|c| match (&c.operand, &p.operand) {
                (Operand::Var(_), _) | (_, Operand::Var(_)) => constraint_matches(c, p, unifier, ty),
                _ => c.implies(p),
            })
        }),
        UnifierType::StructuralSubsumptive => parent
            .iter()
            .all(|p| child.iter().any(|c| constraint_matches(c, p, unifier, ty))),
    }
}

fn ids_compatible(child: &[&ConceptId], parent: &[&ConceptId], ty: UnifierType) -> bool {
    match ty {
        UnifierType::Exact => child.iter().collect::<BTreeSet<_>>() == parent.iter().collect::<BTreeSet<_>>(),
        UnifierType::Structural => child.len() == parent.len(),
        UnifierType::Rule => child.is_empty() || parent.is_empty() || child.iter().any(|c| parent.contains(c)),
        UnifierType::Subsumptive => parent.iter().all(|p| child.contains(p)),
        UnifierType::StructuralSubsumptive => parent.is_empty() || !child.is_empty(),
    }
}
