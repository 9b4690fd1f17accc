//! Reasoner queries.
//!
//! A [`ReasonerQuery`] is a validated conjunction split into *selectable*
//! atoms (the ones resolution evaluates) and *guards* (id and value
//! predicates, and type constraints on variables another atom already binds).
//! A [`ReasonerAtomicQuery`] has exactly one selectable atom.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use kgreason_pattern::schema::{ATTRIBUTE, THING};
use kgreason_pattern::{Atom, ConceptId, Conjunction, Label, Schema, TypeContext, TypeRef, ValueConstraint, Var};

use crate::concept::ConceptMap;
use crate::equivalence::Equivalence;
use crate::error::{ReasonerError, Result};
use crate::rules::RuleGraph;
use crate::semantic::SemanticDifference;
use crate::unifier::{self, MultiUnifier, Unifier, UnifierType};

/// Variables pinned to concrete concept ids.
pub type Substitution = BTreeMap<Var, ConceptId>;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ReasonerQuery {
    atoms: Vec<Atom>,
    selectable: Vec<bool>,
    negations: Vec<ReasonerQuery>,
}

impl ReasonerQuery {
    /// Validate `conj` against `schema` and build the query.
    pub fn new(conj: &Conjunction, schema: &Schema) -> Result<Self> {
        conj.validate(schema)?;
        Ok(Self::from_conjunction(conj))
    }

    /// Build without schema validation (for already validated rule bodies).
    pub fn from_conjunction(conj: &Conjunction) -> Self {
        let negations = conj.negations().iter().map(Self::from_conjunction).collect();
        let mut q = Self::from_atoms(conj.atoms().to_vec());
        q.negations = negations;
        q
    }

    pub(crate) fn from_atoms(mut atoms: Vec<Atom>) -> Self {
        let selectable = selectable_flags(&atoms);
        let bound: BTreeSet<Var> = atoms
            .iter()
            .zip(&selectable)
            .filter(|(_, s)| **s)
            .flat_map(|(a, _)| a.vars())
            .collect();

        // Variables constrained only by predicates still need something that
        // enumerates them.
        let mut extra: BTreeMap<Var, &str> = BTreeMap::new();
        for atom in atoms.iter().zip(&selectable).filter(|(_, s)| !**s).map(|(a, _)| a) {
            let fallback = match atom {
                Atom::Value { .. } => ATTRIBUTE,
                _ => THING,
            };
            for var in atom.vars() {
                if !bound.contains(&var) {
                    extra.entry(var).or_insert(fallback);
                }
            }
        }
        if extra.is_empty() {
            return Self {
                atoms,
                selectable,
                negations: Vec::new(),
            };
        }
        atoms.extend(extra.into_iter().map(|(var, label)| Atom::Isa {
            var,
            ty: TypeRef::Label(Label::new(label)),
        }));
        let selectable = selectable_flags(&atoms);
        Self {
            atoms,
            selectable,
            negations: Vec::new(),
        }
    }

    pub fn atoms(&self) -> &[Atom] {
        &self.atoms
    }

    pub fn negations(&self) -> &[ReasonerQuery] {
        &self.negations
    }

    pub fn vars(&self) -> BTreeSet<Var> {
        self.atoms.iter().flat_map(Atom::vars).collect()
    }

    /// User-written variables: the projection of top-level answers.
    pub fn named_vars(&self) -> BTreeSet<Var> {
        self.vars().into_iter().filter(|v| !v.is_anonymous()).collect()
    }

    pub fn is_selectable(&self, index: usize) -> bool {
        self.selectable.get(index).copied().unwrap_or(false)
    }

    pub fn selectable_atoms(&self) -> Vec<&Atom> {
        self.atoms
            .iter()
            .zip(&self.selectable)
            .filter(|(_, s)| **s)
            .map(|(a, _)| a)
            .collect()
    }

    pub fn guards(&self) -> Vec<&Atom> {
        self.atoms
            .iter()
            .zip(&self.selectable)
            .filter(|(_, s)| !**s)
            .map(|(a, _)| a)
            .collect()
    }

    /// Id predicates as a substitution.
    pub fn substitution(&self) -> Substitution {
        self.atoms
            .iter()
            .filter_map(|a| match a {
                Atom::Id { var, id } => Some((var.clone(), id.clone())),
                _ => None,
            })
            .collect()
    }

    /// Every named variable is pinned by an id.
    pub fn is_ground(&self) -> bool {
        let sub = self.substitution();
        self.named_vars().iter().all(|v| sub.contains_key(v))
    }

    /// Pin variables bound to things in `answer` with id predicates.
    pub fn with_substitution(&self, answer: &ConceptMap) -> ReasonerQuery {
        let ids: Substitution = answer
            .iter()
            .filter(|(v, _)| self.vars().contains(*v))
            .filter_map(|(v, c)| c.id().map(|id| (v.clone(), id.clone())))
            .collect();
        self.with_ids(&ids)
    }

    pub fn with_ids(&self, ids: &Substitution) -> ReasonerQuery {
        let existing = self.substitution();
        let mut atoms = self.atoms.clone();
        for (var, id) in ids {
            if existing.get(var) != Some(id) {
                atoms.push(Atom::Id {
                    var: var.clone(),
                    id: id.clone(),
                });
            }
        }
        let mut q = Self::from_atoms(atoms);
        q.negations = self.negations.clone();
        q
    }

    /// Rename variables through `unifier`; unmapped variables are kept.
    pub fn rename(&self, unifier: &Unifier) -> ReasonerQuery {
        let f = |v: &Var| unifier.get(v).next().cloned().unwrap_or_else(|| v.clone());
        ReasonerQuery {
            atoms: self.atoms.iter().map(|a| a.rename(&f)).collect(),
            selectable: self.selectable.clone(),
            negations: self.negations.iter().map(|n| n.rename(unifier)).collect(),
        }
    }

    /// Split into one atomic query per selectable atom, each carrying the
    /// guards on its variables. Comparisons whose variables no single atom
    /// binds are returned separately.
    pub fn atomise(&self) -> (Vec<ReasonerAtomicQuery>, Vec<Atom>) {
        let guards = self.guards();
        let mut placed = vec![false; guards.len()];
        let mut out = Vec::new();
        for atom in self.selectable_atoms() {
            let vars = atom.vars();
            let mut atoms = vec![atom.clone()];
            for (i, guard) in guards.iter().enumerate() {
                if guard.vars().is_subset(&vars) {
                    atoms.push((*guard).clone());
                    placed[i] = true;
                }
            }
            let query = Self::from_atoms(atoms);
            out.push(ReasonerAtomicQuery { query, atom: 0 });
        }
        let leftover = guards
            .into_iter()
            .zip(placed)
            .filter(|(_, p)| !p)
            .map(|(g, _)| g.clone())
            .collect();
        (out, leftover)
    }

    pub fn is_equivalent(&self, other: &ReasonerQuery, equivalence: Equivalence) -> bool {
        equivalence.equivalent(self, other)
    }

    pub fn equivalence_hash(&self, equivalence: Equivalence) -> u64 {
        equivalence.hash(self)
    }

    /// Does resolving this query need more than one pass?
    ///
    /// True when the rules the query depends on contain a cycle, or when the
    /// query has rule-resolvable atoms that share no variable with each other.
    pub fn requires_reiteration(&self, rules: &RuleGraph, schema: &Schema) -> bool {
        let resolvable: Vec<&Atom> = self
            .selectable_atoms()
            .into_iter()
            .filter(|a| rules.is_resolvable(a, schema))
            .collect();
        let mut seeds = BTreeSet::new();
        for atom in &resolvable {
            seeds.extend(rules.applicable_to(atom, schema));
        }
        for neg in &self.negations {
            for atom in neg.selectable_atoms() {
                seeds.extend(rules.applicable_to(atom, schema));
            }
        }
        if rules.has_cycle(&rules.dependency_closure(&seeds)) {
            return true;
        }
        resolvable.iter().enumerate().any(|(i, a)| {
            let va = a.player_vars();
            resolvable[i + 1..].iter().any(|b| va.is_disjoint(&b.player_vars()))
        })
    }

    /// Constraints the guards put on `var`.
    pub(crate) fn var_guards(&self, var: &Var) -> VarGuards<'_> {
        let mut out = VarGuards::default();
        for guard in self.guards() {
            match guard {
                Atom::Isa {
                    var: v,
                    ty: TypeRef::Label(l),
                } if v == var => out.types.push(l),
                Atom::Value { var: v, constraint } if v == var => out.values.push(constraint),
                Atom::Id { var: v, id } if v == var => out.ids.push(id),
                _ => {}
            }
        }
        out
    }
}

#[derive(Debug, Default)]
pub(crate) struct VarGuards<'a> {
    pub types: Vec<&'a Label>,
    pub values: Vec<&'a ValueConstraint>,
    pub ids: Vec<&'a ConceptId>,
}

fn selectable_flags(atoms: &[Atom]) -> Vec<bool> {
    let covered: BTreeSet<Var> = atoms
        .iter()
        .filter(|a| matches!(a, Atom::Relation { .. } | Atom::Has { .. }))
        .flat_map(|a| {
            let mut vars = a.player_vars();
            vars.insert(a.subject().clone());
            vars
        })
        .collect();
    let mut typed: BTreeSet<&Var> = BTreeSet::new();
    atoms
        .iter()
        .map(|atom| match atom {
            Atom::Value { .. } | Atom::Id { .. } => false,
            Atom::Isa {
                var,
                ty: TypeRef::Label(_),
            } => !covered.contains(var) && typed.insert(var),
            _ => true,
        })
        .collect()
}

impl fmt::Display for ReasonerQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("{")?;
        for (i, atom) in self.atoms.iter().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            write!(f, "{atom}")?;
        }
        for neg in &self.negations {
            write!(f, " not {neg};")?;
        }
        f.write_str("}")
    }
}

// ============================================================================
// Atomic queries
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ReasonerAtomicQuery {
    query: ReasonerQuery,
    atom: usize,
}

impl ReasonerAtomicQuery {
    pub fn new(conj: &Conjunction, schema: &Schema) -> Result<Self> {
        Self::from_query(ReasonerQuery::new(conj, schema)?)
    }

    /// Fails with [`ReasonerError::NonAtomicQuery`] unless the query has
    /// exactly one selectable atom and no negation.
    pub fn from_query(query: ReasonerQuery) -> Result<Self> {
        let selected: Vec<usize> = (0..query.atoms.len()).filter(|i| query.is_selectable(*i)).collect();
        match selected[..] {
            [atom] if query.negations.is_empty() => Ok(Self { query, atom }),
            _ => Err(ReasonerError::NonAtomicQuery {
                query: query.to_string(),
                selectable: selected.len(),
            }),
        }
    }

    pub fn atom(&self) -> &Atom {
        &self.query.atoms[self.atom]
    }

    pub fn query(&self) -> &ReasonerQuery {
        &self.query
    }

    pub fn guards(&self) -> Vec<&Atom> {
        self.query.guards()
    }

    pub fn vars(&self) -> BTreeSet<Var> {
        self.query.vars()
    }

    pub fn substitution(&self) -> Substitution {
        self.query.substitution()
    }

    /// All correspondences of this (child) query's variables onto `parent`'s.
    pub fn multi_unifier(&self, parent: &ReasonerAtomicQuery, ty: UnifierType, ctx: &dyn TypeContext) -> MultiUnifier {
        unifier::unify(self, parent, ty, ctx)
    }

    /// Subsumptive unifiers from this (parent) query onto `child`, each with
    /// the constraints `child` adds on top of this query.
    ///
    /// The unifiers map parent variables to child variables.
    pub fn multi_unifier_with_semantic_diff(
        &self,
        child: &ReasonerAtomicQuery,
        ctx: &dyn TypeContext,
    ) -> Vec<(Unifier, SemanticDifference)> {
        child
            .multi_unifier(self, UnifierType::Subsumptive, ctx)
            .iter()
            .filter_map(|u| {
                let diff = SemanticDifference::compute(self, child, u, ctx)?;
                Some((u.inverse(), diff))
            })
            .collect()
    }

    /// Every answer of `child` can be obtained by filtering an answer of this
    /// query.
    pub fn subsumes(&self, child: &ReasonerAtomicQuery, ctx: &dyn TypeContext) -> bool {
        !self.multi_unifier_with_semantic_diff(child, ctx).is_empty()
    }

    /// Subsumption up to constants: literals only need the same comparator
    /// and value type, and pinned ids only need a pinned counterpart.
    pub fn structurally_subsumes(&self, child: &ReasonerAtomicQuery, ctx: &dyn TypeContext) -> bool {
        !child
            .multi_unifier(self, UnifierType::StructuralSubsumptive, ctx)
            .is_empty()
    }

    pub fn is_equivalent(&self, other: &ReasonerAtomicQuery, equivalence: Equivalence) -> bool {
        equivalence.equivalent(&self.query, &other.query)
    }

    pub fn equivalence_hash(&self, equivalence: Equivalence) -> u64 {
        equivalence.hash(&self.query)
    }
}

impl fmt::Display for ReasonerAtomicQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.query.fmt(f)
    }
}
