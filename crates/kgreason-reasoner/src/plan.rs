//! Atom ordering inside one query.
//!
//! Greedy: among the unplaced selectable atoms connected to what is already
//! placed, take the cheapest; when nothing is connected, the cheapest
//! remaining atom starts a new component. Cost is a tier, then the number of
//! already bound variables (more is cheaper), then arity, then the position
//! in the input pattern.

use std::cmp::Reverse;
use std::collections::BTreeSet;

use kgreason_pattern::{Atom, TypeContext, Var};

use crate::query::ReasonerQuery;
use crate::rules::RuleGraph;

/// Cost tiers, cheapest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Tier {
    /// Every variable, the relation variable included, is pinned to an id.
    IdBound,
    /// Attribute ownership with an `==` literal on the attribute.
    ValueBound,
    NonResolvable,
    Resolvable,
    Ontological,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolutionPlan {
    atoms: Vec<Atom>,
}

impl ResolutionPlan {
    pub fn new(query: &ReasonerQuery, rules: &RuleGraph, ctx: &dyn TypeContext) -> Self {
        let id_bound: BTreeSet<Var> = query.substitution().into_keys().collect();
        let mut remaining: Vec<(usize, &Atom, Tier)> = query
            .atoms()
            .iter()
            .enumerate()
            .filter(|(i, _)| query.is_selectable(*i))
            .map(|(i, atom)| (i, atom, tier(query, atom, &id_bound, rules, ctx)))
            .collect();

        let mut placed: BTreeSet<Var> = BTreeSet::new();
        let mut atoms = Vec::with_capacity(remaining.len());
        while !remaining.is_empty() {
            let connected: Vec<usize> = (0..remaining.len())
                .filter(|&k| !placed.is_empty() && remaining[k].1.vars().iter().any(|v| placed.contains(v)))
                .collect();
            let pool: Vec<usize> = if connected.is_empty() {
                (0..remaining.len()).collect()
            } else {
                connected
            };
            let Some(best) = pool.into_iter().min_by_key(|&k| {
                let (index, atom, tier) = remaining[k];
                let vars = atom.vars();
                let bound = vars.iter().filter(|v| placed.contains(*v) || id_bound.contains(*v)).count();
                (tier, Reverse(bound), vars.len(), index)
            }) else {
                break;
            };
            let (_, atom, _) = remaining.remove(best);
            placed.extend(atom.vars());
            atoms.push(atom.clone());
        }
        Self { atoms }
    }

    pub fn atoms(&self) -> &[Atom] {
        &self.atoms
    }

    pub fn len(&self) -> usize {
        self.atoms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.atoms.is_empty()
    }
}

pub(crate) fn tier(
    query: &ReasonerQuery,
    atom: &Atom,
    id_bound: &BTreeSet<Var>,
    rules: &RuleGraph,
    ctx: &dyn TypeContext,
) -> Tier {
    if atom.is_ontological() {
        return Tier::Ontological;
    }
    let vars = atom.vars();
    if !vars.is_empty() && vars.iter().all(|v| id_bound.contains(v)) {
        return Tier::IdBound;
    }
    if let Atom::Has { attribute, .. } = atom {
        if query.var_guards(attribute).values.iter().any(|c| c.is_specific()) {
            return Tier::ValueBound;
        }
    }
    if rules.is_resolvable(atom, ctx) {
        Tier::Resolvable
    } else {
        Tier::NonResolvable
    }
}
