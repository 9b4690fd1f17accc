//! Rule dependency graph.
//!
//! Rules live in an arena indexed by [`RuleId`]. Rule `a` depends on rule `b`
//! when some atom of `a`'s body can be concluded by `b`'s head; the edge is
//! negative when that atom sits in `a`'s negation block. Strongly connected
//! components give recursion, and a negative edge inside a component makes
//! the rule set unstratified.

use std::collections::{BTreeSet, VecDeque};

use serde::{Deserialize, Serialize};
use tracing::debug;

use kgreason_pattern::{Atom, Label, Rule, Schema, TypeContext};

use crate::error::{ReasonerError, Result};
use crate::query::{ReasonerAtomicQuery, ReasonerQuery};
use crate::unifier::{MultiUnifier, UnifierType};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RuleId(u32);

impl RuleId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Polarity {
    Positive,
    Negative,
}

#[derive(Debug, Clone)]
pub struct RuleGraph {
    rules: Vec<Rule>,
    heads: Vec<ReasonerAtomicQuery>,
    depends_on: Vec<BTreeSet<(RuleId, Polarity)>>,
    /// Member of a recursive component.
    recursive: Vec<bool>,
}

impl RuleGraph {
    /// Validate `rules` against `schema`, build the dependency edges and
    /// check stratification.
    pub fn new(rules: Vec<Rule>, schema: &Schema) -> Result<Self> {
        let mut heads = Vec::with_capacity(rules.len());
        for rule in &rules {
            rule.validate(schema)?;
            heads.push(ReasonerAtomicQuery::from_query(ReasonerQuery::from_atoms(
                rule.then().atoms().to_vec(),
            ))?);
        }
        let mut graph = Self {
            depends_on: vec![BTreeSet::new(); rules.len()],
            recursive: vec![false; rules.len()],
            rules,
            heads,
        };

        for i in 0..graph.rules.len() {
            let body = ReasonerQuery::from_conjunction(graph.rules[i].when());
            let mut edges = BTreeSet::new();
            for atom in body.selectable_atoms() {
                edges.extend(graph.applicable_to(atom, schema).into_iter().map(|r| (r, Polarity::Positive)));
            }
            for negation in body.negations() {
                for atom in negation.selectable_atoms() {
                    edges.extend(graph.applicable_to(atom, schema).into_iter().map(|r| (r, Polarity::Negative)));
                }
            }
            graph.depends_on[i] = edges;
        }

        graph.stratify()?;
        debug!(
            rules = graph.rules.len(),
            recursive = graph.recursive.iter().filter(|r| **r).count(),
            "rule graph built"
        );
        Ok(graph)
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = RuleId> {
        (0..self.rules.len() as u32).map(RuleId)
    }

    pub fn rule(&self, id: RuleId) -> &Rule {
        &self.rules[id.index()]
    }

    /// The head as an atomic query (head atom plus its value guards).
    pub fn head_query(&self, id: RuleId) -> &ReasonerAtomicQuery {
        &self.heads[id.index()]
    }

    pub fn dependencies(&self, id: RuleId) -> impl Iterator<Item = &(RuleId, Polarity)> {
        self.depends_on[id.index()].iter()
    }

    pub fn is_recursive(&self, id: RuleId) -> bool {
        self.recursive[id.index()]
    }

    /// Rules whose head could conclude `atom`: the label filter, then a
    /// non-empty rule unifier against the bare atom.
    pub fn applicable_to(&self, atom: &Atom, ctx: &dyn TypeContext) -> Vec<RuleId> {
        if !atom.is_instance_atom() {
            return Vec::new();
        }
        let Ok(query) = ReasonerAtomicQuery::from_query(ReasonerQuery::from_atoms(vec![atom.clone()])) else {
            return Vec::new();
        };
        self.unifiers_for(&query, ctx).into_iter().map(|(id, _)| id).collect()
    }

    /// Rule unifiers of every applicable head onto `query`, guards included.
    pub fn unifiers_for(&self, query: &ReasonerAtomicQuery, ctx: &dyn TypeContext) -> Vec<(RuleId, MultiUnifier)> {
        let atom_label = query.atom().label();
        self.ids()
            .filter(|id| {
                let head_label = self.rules[id.index()].head_label();
                match (head_label, atom_label) {
                    (_, None) => true,
                    (_, Some(a)) if ctx.is_meta(a) => true,
                    (Some(h), Some(a)) => ctx.is_subtype(h, a),
                    (None, Some(_)) => false,
                }
            })
            .filter_map(|id| {
                let unifiers = self.heads[id.index()].multi_unifier(query, UnifierType::Rule, ctx);
                (!unifiers.is_empty()).then_some((id, unifiers))
            })
            .collect()
    }

    pub fn is_resolvable(&self, atom: &Atom, ctx: &dyn TypeContext) -> bool {
        !self.applicable_to(atom, ctx).is_empty()
    }

    /// `seeds` plus every rule they transitively depend on.
    pub fn dependency_closure(&self, seeds: &BTreeSet<RuleId>) -> BTreeSet<RuleId> {
        let mut seen = seeds.clone();
        let mut queue: VecDeque<RuleId> = seeds.iter().copied().collect();
        while let Some(id) = queue.pop_front() {
            for (dep, _) in &self.depends_on[id.index()] {
                if seen.insert(*dep) {
                    queue.push_back(*dep);
                }
            }
        }
        seen
    }

    /// Does a dependency-closed rule set contain recursion?
    pub fn has_cycle(&self, rules: &BTreeSet<RuleId>) -> bool {
        rules.iter().any(|id| self.recursive[id.index()])
    }

    fn stratify(&mut self) -> Result<()> {
        for component in self.components() {
            let members: BTreeSet<RuleId> = component.iter().copied().collect();
            let self_loop = component.len() == 1
                && self.depends_on[component[0].index()]
                    .iter()
                    .any(|(dep, _)| *dep == component[0]);
            if component.len() > 1 || self_loop {
                for id in &component {
                    self.recursive[id.index()] = true;
                }
            }
            let negative_inside = component.iter().any(|id| {
                self.depends_on[id.index()]
                    .iter()
                    .any(|(dep, polarity)| *polarity == Polarity::Negative && members.contains(dep))
            });
            if negative_inside {
                let rules: Vec<Label> = component.iter().map(|id| self.rules[id.index()].label().clone()).collect();
                return Err(ReasonerError::UnstratifiedRules { rules });
            }
        }
        Ok(())
    }

    /// Strongly connected components (Tarjan).
    fn components(&self) -> Vec<Vec<RuleId>> {
        struct Tarjan<'a> {
            edges: &'a [BTreeSet<(RuleId, Polarity)>],
            index: Vec<Option<usize>>,
            low: Vec<usize>,
            on_stack: Vec<bool>,
            stack: Vec<usize>,
            next: usize,
            out: Vec<Vec<RuleId>>,
        }

        impl Tarjan<'_> {
            fn visit(&mut self, v: usize) {
                self.index[v] = Some(self.next);
                self.low[v] = self.next;
                self.next += 1;
                self.stack.push(v);
                self.on_stack[v] = true;

                let edges = self.edges;
                for (dep, _) in &edges[v] {
                    let w = dep.index();
                    match self.index[w] {
                        None => {
                            self.visit(w);
                            self.low[v] = self.low[v].min(self.low[w]);
                        }
                        Some(iw) if self.on_stack[w] => self.low[v] = self.low[v].min(iw),
                        Some(_) => {}
                    }
                }

                if Some(self.low[v]) == self.index[v] {
                    let mut component = Vec::new();
                    while let Some(w) = self.stack.pop() {
                        self.on_stack[w] = false;
                        component.push(RuleId(w as u32));
                        if w == v {
                            break;
                        }
                    }
                    component.sort();
                    self.out.push(component);
                }
            }
        }

        let n = self.rules.len();
        let mut t = Tarjan {
            edges: &self.depends_on,
            index: vec![None; n],
            low: vec![0; n],
            on_stack: vec![false; n],
            stack: Vec::new(),
            next: 0,
            out: Vec::new(),
        };
        for v in 0..n {
            if t.index[v].is_none() {
                t.visit(v);
            }
        }
        t.out
    }
}
