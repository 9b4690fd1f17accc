//! Decomposition of a query into sub-queries.
//!
//! Atoms are taken in [`ResolutionPlan`] order. Every rule-resolvable atom
//! becomes its own atomic sub-query; runs of consecutive non-resolvable atoms
//! are grouped. Guards go with the first sub-query that binds all of their
//! variables; comparisons spanning several sub-queries become join filters.

use std::collections::BTreeSet;
use std::fmt;

use kgreason_pattern::{Atom, TypeContext, Var};

use crate::plan::ResolutionPlan;
use crate::query::{ReasonerAtomicQuery, ReasonerQuery};
use crate::rules::RuleGraph;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubQuery {
    Atomic(ReasonerAtomicQuery),
    Composite(ReasonerQuery),
}

impl SubQuery {
    pub fn query(&self) -> &ReasonerQuery {
        match self {
            SubQuery::Atomic(q) => q.query(),
            SubQuery::Composite(q) => q,
        }
    }

    pub fn vars(&self) -> BTreeSet<Var> {
        self.query().vars()
    }

    pub fn atoms(&self) -> &[Atom] {
        self.query().atoms()
    }
}

impl fmt::Display for SubQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.query().fmt(f)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryPlan {
    sub_queries: Vec<SubQuery>,
    filters: Vec<Atom>,
}

impl QueryPlan {
    pub fn new(query: &ReasonerQuery, rules: &RuleGraph, ctx: &dyn TypeContext) -> Self {
        let order = ResolutionPlan::new(query, rules, ctx);

        let mut groups: Vec<Vec<Atom>> = Vec::new();
        let mut run: Vec<Atom> = Vec::new();
        for atom in order.atoms() {
            if rules.is_resolvable(atom, ctx) {
                if !run.is_empty() {
                    groups.push(std::mem::take(&mut run));
                }
                groups.push(vec![atom.clone()]);
            } else {
                run.push(atom.clone());
            }
        }
        if !run.is_empty() {
            groups.push(run);
        }

        let mut filters = Vec::new();
        for guard in query.guards() {
            let vars = guard.vars();
            let home = groups
                .iter_mut()
                .find(|g| vars.is_subset(&g.iter().flat_map(Atom::vars).collect()));
            match home {
                Some(group) => group.push(guard.clone()),
                None => filters.push(guard.clone()),
            }
        }

        let sub_queries = groups
            .into_iter()
            .map(|atoms| {
                let q = ReasonerQuery::from_atoms(atoms);
                match ReasonerAtomicQuery::from_query(q.clone()) {
                    Ok(atomic) => SubQuery::Atomic(atomic),
                    Err(_) => SubQuery::Composite(q),
                }
            })
            .collect();
        Self { sub_queries, filters }
    }

    pub fn sub_queries(&self) -> &[SubQuery] {
        &self.sub_queries
    }

    /// Guards evaluated on joined answers.
    pub fn filters(&self) -> &[Atom] {
        &self.filters
    }

    pub fn len(&self) -> usize {
        self.sub_queries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sub_queries.is_empty()
    }
}
