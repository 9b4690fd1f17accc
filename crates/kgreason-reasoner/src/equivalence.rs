//! Alpha and structural equivalence of queries.
//!
//! Two queries are alpha-equivalent when a one-to-one variable renaming maps
//! one onto the other with identical constants. Structural equivalence also
//! lets constants differ, as long as they are renamed consistently (the same
//! pattern of equal and distinct ids and literals).
//!
//! Hashes are invariant under variable renaming and relation slot order, and
//! are computed with a fixed-seed FNV-1a hasher so they are stable across
//! processes.

use std::collections::BTreeMap;
use std::hash::{Hash, Hasher};

use kgreason_pattern::digest::Fnv1a64;
use kgreason_pattern::{Atom, ConceptId, Operand, RolePlayer, TypeRef, Value, Var};

use crate::query::{ReasonerAtomicQuery, ReasonerQuery};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Equivalence {
    Alpha,
    Structural,
}

impl Equivalence {
    pub fn equivalent(self, a: &ReasonerQuery, b: &ReasonerQuery) -> bool {
        self.bijection(a, b).is_some()
    }

    /// The variable renaming `a -> b` witnessing equivalence.
    pub fn bijection(self, a: &ReasonerQuery, b: &ReasonerQuery) -> Option<BTreeMap<Var, Var>> {
        if a.atoms().len() != b.atoms().len() || a.negations().len() != b.negations().len() {
            return None;
        }
        let negations_match = a.negations().iter().all(|na| b.negations().iter().any(|nb| self.equivalent(na, nb)));
        if !negations_match {
            return None;
        }
        let b_hashes: Vec<u64> = b.atoms().iter().map(|x| self.atom_hash(x)).collect();
        let mut used = vec![false; b.atoms().len()];
        self.match_atoms(a.atoms(), b.atoms(), &b_hashes, &mut used, Bijection::default())
            .map(|bij| bij.vars)
    }

    fn match_atoms(
        self,
        rest: &[Atom],
        b: &[Atom],
        b_hashes: &[u64],
        used: &mut [bool],
        bij: Bijection,
    ) -> Option<Bijection> {
        let Some((head, tail)) = rest.split_first() else {
            return Some(bij);
        };
        let h = self.atom_hash(head);
        for j in 0..b.len() {
            if used[j] || b_hashes[j] != h {
                continue;
            }
            for extended in self.match_atom(head, &b[j], &bij) {
                used[j] = true;
                if let Some(done) = self.match_atoms(tail, b, b_hashes, used, extended) {
                    return Some(done);
                }
                used[j] = false;
            }
        }
        None
    }

    /// All bijection extensions under which `a` maps onto `b`.
    fn match_atom(self, a: &Atom, b: &Atom, bij: &Bijection) -> Vec<Bijection> {
        let mut next = bij.clone();
        let ok = match (a, b) {
            (Atom::Isa { var: v1, ty: t1 }, Atom::Isa { var: v2, ty: t2 })
            | (Atom::Sub { var: v1, sup: t1 }, Atom::Sub { var: v2, sup: t2 })
            | (Atom::Plays { var: v1, role: t1 }, Atom::Plays { var: v2, role: t2 })
            | (Atom::Relates { var: v1, role: t1 }, Atom::Relates { var: v2, role: t2 }) => {
                next.var(v1, v2) && next.type_ref(t1, t2)
            }
            (
                Atom::Has {
                    owner: o1,
                    attribute_type: l1,
                    attribute: a1,
                },
                Atom::Has {
                    owner: o2,
                    attribute_type: l2,
                    attribute: a2,
                },
            ) => l1 == l2 && next.var(o1, o2) && next.var(a1, a2),
            (Atom::Value { var: v1, constraint: c1 }, Atom::Value { var: v2, constraint: c2 }) => {
                c1.comparator == c2.comparator
                    && next.var(v1, v2)
                    && match (&c1.operand, &c2.operand) {
                        (Operand::Var(x), Operand::Var(y)) => next.var(x, y),
                        (Operand::Literal(x), Operand::Literal(y)) => match self {
                            Equivalence::Alpha => x == y,
                            Equivalence::Structural => next.value(x, y),
                        },
                        _ => false,
                    }
            }
            (Atom::Id { var: v1, id: i1 }, Atom::Id { var: v2, id: i2 }) => {
                next.var(v1, v2)
                    && match self {
                        Equivalence::Alpha => i1 == i2,
                        Equivalence::Structural => next.id(i1, i2),
                    }
            }
            (
                Atom::Relation {
                    var: v1,
                    ty: t1,
                    players: p1,
                },
                Atom::Relation {
                    var: v2,
                    ty: t2,
                    players: p2,
                },
            ) => {
                if t1 != t2 || p1.len() != p2.len() || !next.var(v1, v2) {
                    return Vec::new();
                }
                let mut out = Vec::new();
                let mut used = vec![false; p2.len()];
                match_slots(p1, p2, &mut used, next, &mut out);
                return out;
            }
            _ => false,
        };
        if ok {
            vec![next]
        } else {
            Vec::new()
        }
    }

    /// Rename-invariant hash of one atom.
    pub fn atom_hash(self, atom: &Atom) -> u64 {
        let mut h = Fnv1a64::new();
        atom.kind().hash(&mut h);
        atom.label().hash(&mut h);
        match atom {
            Atom::Isa { var, ty } | Atom::Sub { var, sup: ty } | Atom::Plays { var, role: ty } | Atom::Relates { var, role: ty } => {
                match ty {
                    TypeRef::Var(t) => (t == var).hash(&mut h),
                    TypeRef::Label(_) => 0u8.hash(&mut h),
                }
            }
            Atom::Has { owner, attribute, .. } => (owner == attribute).hash(&mut h),
            Atom::Value { var, constraint } => {
                constraint.comparator.hash(&mut h);
                match &constraint.operand {
                    Operand::Var(other) => (0u8, other == var).hash(&mut h),
                    Operand::Literal(v) => match self {
                        Equivalence::Alpha => (1u8, v).hash(&mut h),
                        Equivalence::Structural => (1u8, v.value_type()).hash(&mut h),
                    },
                }
            }
            Atom::Id { id, .. } => {
                if self == Equivalence::Alpha {
                    id.hash(&mut h);
                }
            }
            Atom::Relation { var, players, .. } => {
                let mut slots: Vec<(Option<&str>, bool, usize, bool)> = players
                    .iter()
                    .map(|rp| {
                        let multiplicity = players.iter().filter(|o| o.player == rp.player).count();
                        (
                            rp.role.as_ref().map(|l| l.as_str()),
                            rp.role_var.is_some(),
                            multiplicity,
                            &rp.player == var,
                        )
                    })
                    .collect();
                slots.sort();
                slots.hash(&mut h);
            }
        }
        h.finish()
    }

    /// Rename-invariant hash of a query; equal for equivalent queries.
    pub fn hash(self, query: &ReasonerQuery) -> u64 {
        let mut atoms: Vec<u64> = query.atoms().iter().map(|a| self.atom_hash(a)).collect();
        atoms.sort_unstable();
        let mut negations: Vec<u64> = query.negations().iter().map(|n| self.hash(n)).collect();
        negations.sort_unstable();
        let mut h = Fnv1a64::new();
        atoms.hash(&mut h);
        negations.hash(&mut h);
        h.finish()
    }
}

fn match_slots(p1: &[RolePlayer], p2: &[RolePlayer], used: &mut [bool], bij: Bijection, out: &mut Vec<Bijection>) {
    let Some((slot, rest)) = p1.split_first() else {
        out.push(bij);
        return;
    };
    for (j, other) in p2.iter().enumerate() {
        if used[j] || slot.role != other.role || slot.role_var.is_some() != other.role_var.is_some() {
            continue;
        }
        let mut next = bij.clone();
        if !next.var(&slot.player, &other.player) {
            continue;
        }
        if let (Some(r1), Some(r2)) = (&slot.role_var, &other.role_var) {
            if !next.var(r1, r2) {
                continue;
            }
        }
        used[j] = true;
        match_slots(rest, p2, used, next, out);
        used[j] = false;
    }
}

/// Partial one-to-one correspondences between variables and constants.
#[derive(Debug, Clone, Default)]
struct Bijection {
    vars: BTreeMap<Var, Var>,
    vars_back: BTreeMap<Var, Var>,
    ids: BTreeMap<ConceptId, ConceptId>,
    ids_back: BTreeMap<ConceptId, ConceptId>,
    values: BTreeMap<Value, Value>,
    values_back: BTreeMap<Value, Value>,
}

fn bind<T: Ord + Clone>(fwd: &mut BTreeMap<T, T>, back: &mut BTreeMap<T, T>, a: &T, b: &T) -> bool {
    match (fwd.get(a), back.get(b)) {
        (Some(x), Some(y)) => x == b && y == a,
        (None, None) => {
            fwd.insert(a.clone(), b.clone());
            back.insert(b.clone(), a.clone());
            true
        }
        _ => false,
    }
}

impl Bijection {
    fn var(&mut self, a: &Var, b: &Var) -> bool {
        bind(&mut self.vars, &mut self.vars_back, a, b)
    }

    fn id(&mut self, a: &ConceptId, b: &ConceptId) -> bool {
        bind(&mut self.ids, &mut self.ids_back, a, b)
    }

    fn value(&mut self, a: &Value, b: &Value) -> bool {
        a.value_type() == b.value_type() && bind(&mut self.values, &mut self.values_back, a, b)
    }

    fn type_ref(&mut self, a: &TypeRef, b: &TypeRef) -> bool {
        match (a, b) {
            (TypeRef::Label(x), TypeRef::Label(y)) => x == y,
            (TypeRef::Var(x), TypeRef::Var(y)) => self.var(x, y),
            _ => false,
        }
    }
}

// ============================================================================
// Hash-map key
// ============================================================================

/// Atomic query compared and hashed up to alpha-equivalence.
#[derive(Debug, Clone)]
pub struct AlphaKey(pub ReasonerAtomicQuery);

impl PartialEq for AlphaKey {
    fn eq(&self, other: &Self) -> bool {
        self.0.is_equivalent(&other.0, Equivalence::Alpha)
    }
}

impl Eq for AlphaKey {}

impl Hash for AlphaKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u64(self.0.equivalence_hash(Equivalence::Alpha));
    }
}
