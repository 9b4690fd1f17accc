//! Backward-chaining resolution with tabling.
//!
//! A top-level pattern is split into disjuncts; each disjunct is resolved
//! to a fixpoint. Atomic sub-goals are tabled in the per-resolution
//! [`SemanticCache`]: a goal already being computed returns what it has so
//! far (a partial hit), which forces another pass. Passes stop once the
//! tables stop growing.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use ahash::{AHashMap, AHashSet};
use serde::Serialize;
use tracing::{debug, trace, warn};

use kgreason_pattern::digest::inferred_id;
use kgreason_pattern::schema::RELATION;
use kgreason_pattern::{Atom, Comparator, Label, Operand, Pattern, Rule, Schema, Var};

use crate::branding::{Branded, ResolutionToken};
use crate::cache::{EntryId, SemanticCache};
use crate::concept::{Concept, ConceptMap, RolePlayerRef, Thing};
use crate::config::ReasonerConfig;
use crate::error::{ReasonerError, Result};
use crate::explanation::{Answer, ExplanationGraph, ExplanationId, ExplanationKind};
use crate::matcher::{match_fact, satisfies, Fact};
use crate::query::{ReasonerAtomicQuery, ReasonerQuery, Substitution};
use crate::query_plan::{QueryPlan, SubQuery};
use crate::rules::{RuleGraph, RuleId};
use crate::storage::{MaterialisationSink, Storage};
use crate::unifier::Unifier;

// ============================================================================
// Public surface
// ============================================================================

/// Cooperative cancellation flag, checked between sub-queries.
#[derive(Debug, Clone, Default)]
pub struct CancellationHandle(Arc<AtomicBool>);

impl CancellationHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ResolutionStats {
    pub iterations: usize,
    pub atomic_queries: usize,
    pub exact_hits: usize,
    pub subsumptive_hits: usize,
    pub storage_lookups: usize,
    pub rule_applications: usize,
    pub answers: usize,
}

#[derive(Debug)]
pub struct ResolutionResult {
    /// Distinct answers projected onto the pattern's named variables.
    pub answers: Vec<Answer>,
    pub explanations: ExplanationGraph,
    pub stats: ResolutionStats,
}

/// Resolves patterns against a storage snapshot under a fixed rule set.
///
/// The reasoner holds no state between calls; each resolution owns its
/// cache and explanation arena.
pub struct Reasoner<'s> {
    schema: Arc<Schema>,
    rules: RuleGraph,
    storage: &'s dyn Storage,
    sink: Option<&'s dyn MaterialisationSink>,
    config: ReasonerConfig,
}

impl<'s> Reasoner<'s> {
    pub fn new(schema: Arc<Schema>, rules: Vec<Rule>, storage: &'s dyn Storage, config: ReasonerConfig) -> Result<Self> {
        let rules = RuleGraph::new(rules, &schema)?;
        Ok(Self {
            schema,
            rules,
            storage,
            sink: None,
            config,
        })
    }

    /// Where inferred facts go when `materialise` is on.
    pub fn with_sink(mut self, sink: &'s dyn MaterialisationSink) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn rules(&self) -> &RuleGraph {
        &self.rules
    }

    pub fn config(&self) -> &ReasonerConfig {
        &self.config
    }

    pub fn resolve(&self, pattern: impl Into<Pattern>) -> Result<ResolutionResult> {
        self.resolve_with(pattern, &CancellationHandle::new())
    }

    /// Resolve `pattern`; every disjunct is validated before anything is
    /// read from storage.
    pub fn resolve_with(&self, pattern: impl Into<Pattern>, cancel: &CancellationHandle) -> Result<ResolutionResult> {
        let disjuncts = pattern.into().into_disjuncts()?;
        let queries = disjuncts
            .iter()
            .map(|conj| ReasonerQuery::new(conj, &self.schema))
            .collect::<Result<Vec<_>>>()?;

        let mut resolution = Resolution::new(self, cancel);
        let mut answers = Vec::new();
        let mut seen = AHashSet::new();
        for query in &queries {
            let named = query.named_vars();
            for answer in resolution.fixpoint(query)? {
                let map = answer.map.project(&named);
                if seen.insert(map.clone()) {
                    answers.push(resolution.relabel(map, answer.explanation_id()));
                }
            }
        }

        let mut stats = resolution.stats;
        stats.answers = answers.len();
        debug!(
            disjuncts = queries.len(),
            answers = stats.answers,
            iterations = stats.iterations,
            exact_hits = stats.exact_hits,
            subsumptive_hits = stats.subsumptive_hits,
            rule_applications = stats.rule_applications,
            "resolution finished"
        );
        Ok(ResolutionResult {
            answers,
            explanations: resolution.arena,
            stats,
        })
    }
}

// ============================================================================
// Resolution state
// ============================================================================

struct Resolution<'r, 's> {
    reasoner: &'r Reasoner<'s>,
    cancel: &'r CancellationHandle,
    token: ResolutionToken,
    cache: SemanticCache,
    arena: ExplanationGraph,
    /// Entries currently being computed, innermost last.
    stack: Vec<EntryId>,
    epoch: u64,
    /// Reads of entries that were not complete yet.
    partial_hits: u64,
    stats: ResolutionStats,
    materialised: AHashSet<String>,
}

impl<'r, 's> Resolution<'r, 's> {
    fn new(reasoner: &'r Reasoner<'s>, cancel: &'r CancellationHandle) -> Self {
        let token = ResolutionToken::new();
        Self {
            reasoner,
            cancel,
            token,
            cache: SemanticCache::new(token),
            arena: if reasoner.config.explain {
                ExplanationGraph::new(token)
            } else {
                ExplanationGraph::unexplained(token)
            },
            stack: Vec::new(),
            epoch: 0,
            partial_hits: 0,
            stats: ResolutionStats::default(),
            materialised: AHashSet::new(),
        }
    }

    fn check_cancelled(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            debug!(iterations = self.stats.iterations, "resolution cancelled");
            return Err(ReasonerError::Cancelled);
        }
        Ok(())
    }

    fn exhausted(&self) -> ReasonerError {
        ReasonerError::ResourceExhausted {
            iterations: self.stats.iterations,
            answers: self.cache.total_answers(),
        }
    }

    /// Resolve `query` until another pass would add nothing.
    fn fixpoint(&mut self, query: &ReasonerQuery) -> Result<Vec<Answer>> {
        let reasoner = self.reasoner;
        let start_epoch = self.epoch + 1;
        let reiterate = query.requires_reiteration(&reasoner.rules, &reasoner.schema);
        let mut passes = 0;
        loop {
            self.check_cancelled()?;
            passes += 1;
            self.epoch += 1;
            self.stats.iterations += 1;
            if passes > reasoner.config.max_iterations {
                warn!(
                    max_iterations = reasoner.config.max_iterations,
                    answers = self.cache.total_answers(),
                    query = %query,
                    "iteration ceiling reached"
                );
                return Err(self.exhausted());
            }

            let before = self.cache.total_answers();
            let partial_before = self.partial_hits;
            let answers = self.resolve_conjunction(query)?;
            let grew = self.cache.total_answers() > before;
            let partial = self.partial_hits > partial_before;
            debug!(
                pass = passes,
                epoch = self.epoch,
                answers = answers.len(),
                tabled = self.cache.total_answers(),
                grew,
                partial,
                reiterate,
                "fixpoint pass"
            );
            if !(grew && (reiterate || partial)) {
                self.cache.complete_since(start_epoch, &self.stack);
                return Ok(answers);
            }
        }
    }

    // ========================================================================
    // Conjunctions
    // ========================================================================

    fn resolve_conjunction(&mut self, query: &ReasonerQuery) -> Result<Vec<Answer>> {
        let reasoner = self.reasoner;
        let schema = reasoner.schema.as_ref();
        let plan = QueryPlan::new(query, &reasoner.rules, schema);
        trace!(query = %query, sub_queries = plan.len(), "resolving conjunction");

        let mut joined: Option<Vec<Answer>> = None;
        for sub in plan.sub_queries() {
            self.check_cancelled()?;
            let answers = match sub {
                SubQuery::Atomic(q) => self.resolve_atomic(q)?,
                SubQuery::Composite(q) => self.resolve_composite(q)?,
            };
            let next = match joined.take() {
                None => answers,
                Some(prev) => self.join(prev, answers),
            };
            let empty = next.is_empty();
            joined = Some(next);
            if empty {
                break;
            }
        }
        let mut answers = match joined {
            Some(answers) => answers,
            None => vec![self.unit_answer()],
        };

        if !plan.filters().is_empty() {
            answers.retain(|a| satisfies(plan.filters(), &a.map, schema));
        }
        for negation in query.negations() {
            let mut kept = Vec::with_capacity(answers.len());
            for answer in answers {
                let block = negation.with_substitution(&answer.map);
                if self.fixpoint(&block)?.is_empty() {
                    kept.push(answer);
                }
            }
            answers = kept;
        }
        Ok(answers)
    }

    fn resolve_composite(&mut self, query: &ReasonerQuery) -> Result<Vec<Answer>> {
        let (atomic, leftover) = query.atomise();
        let mut joined: Option<Vec<Answer>> = None;
        for q in &atomic {
            self.check_cancelled()?;
            let answers = self.resolve_atomic(q)?;
            joined = Some(match joined.take() {
                None => answers,
                Some(prev) => self.join(prev, answers),
            });
        }
        let mut answers = joined.unwrap_or_default();
        if !leftover.is_empty() {
            let schema = self.reasoner.schema.as_ref();
            answers.retain(|a| satisfies(&leftover, &a.map, schema));
        }
        Ok(answers)
    }

    fn unit_answer(&mut self) -> Answer {
        let explanation = self.arena.add(ExplanationKind::Join, ConceptMap::new(), Vec::new(), None);
        Answer {
            map: ConceptMap::new(),
            explanation,
        }
    }

    /// Hash join on the variables both sides bind.
    fn join(&mut self, left: Vec<Answer>, right: Vec<Answer>) -> Vec<Answer> {
        let (Some(l0), Some(r0)) = (left.first(), right.first()) else {
            return Vec::new();
        };
        let shared: Vec<Var> = l0.map.vars().intersection(&r0.map.vars()).cloned().collect();

        let mut buckets: AHashMap<Vec<String>, Vec<usize>> = AHashMap::new();
        for (i, r) in right.iter().enumerate() {
            if let Some(key) = join_key(&r.map, &shared) {
                buckets.entry(key).or_default().push(i);
            }
        }

        let explain = self.reasoner.config.explain;
        let mut out = Vec::new();
        for l in &left {
            let Some(matches) = join_key(&l.map, &shared).and_then(|k| buckets.get(&k)) else {
                continue;
            };
            for &i in matches {
                let r = &right[i];
                let Some(map) = l.map.merge(&r.map) else {
                    continue;
                };
                let children = if explain {
                    let mut children = self.join_children(l.explanation_id());
                    children.extend(self.join_children(r.explanation_id()));
                    children
                } else {
                    Vec::new()
                };
                let explanation = self.arena.add(ExplanationKind::Join, map.clone(), children, None);
                out.push(Answer { map, explanation });
            }
        }
        out
    }

    /// A join's own children, so nested joins stay flat; unit answers
    /// contribute nothing.
    fn join_children(&self, id: ExplanationId) -> Vec<ExplanationId> {
        match self.arena.node(id) {
            Some(node) if node.kind == ExplanationKind::Join => node.children.clone(),
            Some(_) => vec![id],
            None => Vec::new(),
        }
    }

    // ========================================================================
    // Atomic goals
    // ========================================================================

    fn resolve_atomic(&mut self, query: &ReasonerAtomicQuery) -> Result<Vec<Answer>> {
        self.check_cancelled()?;
        self.stats.atomic_queries += 1;
        let reasoner = self.reasoner;
        let schema = reasoner.schema.as_ref();

        if let Some((id, renaming)) = self.cache.find_exact(query) {
            let entry = self.cache.entry(&id)?;
            let on_stack = self.stack.contains(id.get_with_token(self.token)?);
            if entry.is_complete() || on_stack || entry.epoch() == self.epoch {
                self.stats.exact_hits += 1;
                if !entry.is_complete() {
                    self.partial_hits += 1;
                }
                trace!(query = %query, complete = entry.is_complete(), "exact cache hit");
                let stored = entry.answers().to_vec();
                return Ok(self.rename_answers(stored, &renaming));
            }
            let tabled = entry.query().clone();
            let answers = self.compute(&tabled, id)?;
            return Ok(self.rename_answers(answers, &renaming));
        }

        let id = self.cache.insert(query.clone(), self.epoch);
        if reasoner.config.use_cache {
            if let Some((parent, unifier, diff)) = self.cache.find_subsuming(query, schema) {
                self.stats.subsumptive_hits += 1;
                debug!(query = %query, parent = %self.cache.entry(&parent)?.query(), difference = %diff, "subsumptive cache hit");
                for (map, explanation) in self.cache.propagate(&parent, query, &unifier, &diff)? {
                    let answer = self.relabel(map, explanation);
                    self.add_answer(&id, answer)?;
                }
                self.cache.mark_complete(&id)?;
                return Ok(self.cache.entry(&id)?.answers().to_vec());
            }
        }
        self.compute(query, id)
    }

    /// (Re)compute an entry from storage and rules.
    fn compute(&mut self, query: &ReasonerAtomicQuery, id: Branded<EntryId>) -> Result<Vec<Answer>> {
        self.cache.set_epoch(&id, self.epoch)?;
        let partial_before = self.partial_hits;
        let entry = *id.get_with_token(self.token)?;
        self.stack.push(entry);
        let computed = self.compute_answers(query, &id);
        self.stack.pop();
        computed?;
        if self.partial_hits == partial_before {
            self.cache.mark_complete(&id)?;
        }
        let entry = self.cache.entry(&id)?;
        Ok(entry.answers().to_vec())
    }

    fn compute_answers(&mut self, query: &ReasonerAtomicQuery, id: &Branded<EntryId>) -> Result<()> {
        let reasoner = self.reasoner;
        let schema = reasoner.schema.as_ref();
        let guards = query.guards();

        self.stats.storage_lookups += 1;
        let stored: Vec<ConceptMap> = reasoner.storage.lookup(query).map_err(ReasonerError::Storage)?.collect();
        for map in stored {
            if !satisfies(guards.iter().copied(), &map, schema) {
                continue;
            }
            let explanation = self.arena.lookup(map.clone());
            self.add_answer(id, Answer { map, explanation })?;
        }

        for (rule, unifiers) in reasoner.rules.unifiers_for(query, schema) {
            for unifier in unifiers.iter() {
                self.check_cancelled()?;
                self.apply_rule(query, id, rule, unifier)?;
            }
        }
        Ok(())
    }

    fn add_answer(&mut self, id: &Branded<EntryId>, answer: Answer) -> Result<bool> {
        let added = self.cache.add_answer(id, answer)?;
        let ceiling = self.reasoner.config.max_answers;
        if self.cache.total_answers() > ceiling {
            warn!(max_answers = ceiling, iterations = self.stats.iterations, "answer ceiling reached");
            return Err(self.exhausted());
        }
        Ok(added)
    }

    fn rename_answers(&mut self, answers: Vec<Answer>, renaming: &Unifier) -> Vec<Answer> {
        answers
            .into_iter()
            .filter_map(|a| {
                let map = a.map.rename(renaming)?;
                Some(self.relabel(map, a.explanation_id()))
            })
            .collect()
    }

    /// An answer for `map` explained like `id`; a copy of the node is made
    /// when its bindings differ.
    fn relabel(&mut self, map: ConceptMap, id: ExplanationId) -> Answer {
        match self.arena.node(id).cloned() {
            Some(node) if node.answer != map => {
                let explanation = self.arena.add(node.kind, map.clone(), node.children, node.fact);
                Answer { map, explanation }
            }
            _ => Answer {
                map,
                explanation: Branded::new(self.token, id),
            },
        }
    }

    // ========================================================================
    // Rule application
    // ========================================================================

    /// Fire `rule` for `query` under one head unifier (head vars -> query
    /// vars).
    fn apply_rule(
        &mut self,
        query: &ReasonerAtomicQuery,
        id: &Branded<EntryId>,
        rule_id: RuleId,
        unifier: &Unifier,
    ) -> Result<()> {
        let reasoner = self.reasoner;
        let schema = reasoner.schema.as_ref();
        let rule = reasoner.rules.rule(rule_id);

        let body = ReasonerQuery::from_conjunction(rule.when());
        let Some(ids) = pushed_ids(&body.vars(), &query.substitution(), unifier) else {
            trace!(rule = %rule.label(), "conflicting ids, rule skipped");
            return Ok(());
        };
        let body = if ids.is_empty() { body } else { body.with_ids(&ids) };

        self.stats.rule_applications += 1;
        debug!(rule = %rule.label(), query = %query, "applying rule");
        let guards = query.guards();
        for body_answer in self.resolve_conjunction(&body)? {
            let Some(fact) = self.conclude(rule, &body_answer.map)? else {
                continue;
            };
            let key = fact.key();
            let body_explanation = body_answer.explanation_id();
            if reasoner.config.explain && self.arena.derives(&[body_explanation], &key) {
                continue;
            }

            let mut concluded = false;
            for map in match_fact(query.atom(), &fact, schema) {
                if !satisfies(guards.iter().copied(), &map, schema) {
                    continue;
                }
                let children = if reasoner.config.explain {
                    vec![body_explanation]
                } else {
                    Vec::new()
                };
                let kind = ExplanationKind::Rule {
                    rule: rule.label().clone(),
                };
                let explanation = self.arena.add(kind, map.clone(), children, Some(key.clone()));
                self.add_answer(id, Answer { map, explanation })?;
                concluded = true;
            }
            if concluded {
                self.materialise(&fact, key)?;
            }
        }
        Ok(())
    }

    fn materialise(&mut self, fact: &Fact, key: String) -> Result<()> {
        let reasoner = self.reasoner;
        let Some(sink) = reasoner.sink.filter(|_| reasoner.config.materialise) else {
            return Ok(());
        };
        if !self.materialised.insert(key) {
            return Ok(());
        }
        let created = sink.insert(fact).map_err(ReasonerError::Storage)?;
        trace!(fact = %fact.thing().id, created = created.len(), "fact materialised");
        Ok(())
    }

    /// The fact `rule`'s head concludes under a body answer. Existing
    /// relations and attributes are reused; new ones get content-derived ids.
    fn conclude(&self, rule: &Rule, body: &ConceptMap) -> Result<Option<Fact>> {
        let storage = self.reasoner.storage;
        let thing_of = |var: &Var| body.get(var).and_then(Concept::as_thing).cloned();
        match rule.head() {
            Atom::Relation { ty, players, .. } => {
                let ty = ty.clone().unwrap_or_else(|| Label::new(RELATION));
                let mut bound = Vec::with_capacity(players.len());
                for rp in players {
                    let (Some(role), Some(player)) = (rp.role.clone(), thing_of(&rp.player)) else {
                        return Ok(None);
                    };
                    bound.push((role, player));
                }
                let refs: Vec<RolePlayerRef> = bound
                    .iter()
                    .map(|(role, player)| RolePlayerRef {
                        role: role.clone(),
                        player: player.id.clone(),
                    })
                    .collect();
                let relation = match storage.find_relation(&ty, &refs).map_err(ReasonerError::Storage)? {
                    Some(existing) => existing,
                    None => {
                        let mut parts: Vec<String> = refs.iter().map(|r| format!("{}={}", r.role, r.player)).collect();
                        parts.sort();
                        let mut key: Vec<&str> = vec![ty.as_str()];
                        key.extend(parts.iter().map(String::as_str));
                        Thing {
                            inferred: true,
                            ..Thing::relation(inferred_id("relation", &key), ty.as_str(), refs)
                        }
                    }
                };
                Ok(Some(Fact::Relation {
                    relation,
                    players: bound,
                }))
            }
            Atom::Has {
                owner,
                attribute_type,
                attribute,
            } => {
                let Some(owner) = thing_of(owner) else {
                    return Ok(None);
                };
                let pinned = rule.head_guards().find_map(|g| match g {
                    Atom::Value { var, constraint }
                        if var == attribute && constraint.comparator == Comparator::Eq =>
                    {
                        match &constraint.operand {
                            Operand::Literal(v) => Some(v.clone()),
                            Operand::Var(other) => body.get(other).and_then(Concept::value).cloned(),
                        }
                    }
                    _ => None,
                });
                let from_body = thing_of(attribute);
                let Some(value) = pinned.or_else(|| from_body.as_ref().and_then(|t| t.value.clone())) else {
                    return Ok(None);
                };
                let attribute = match from_body {
                    Some(t) if &t.type_label == attribute_type && t.value.as_ref() == Some(&value) => t,
                    _ => match storage
                        .find_attribute(attribute_type, &value)
                        .map_err(ReasonerError::Storage)?
                    {
                        Some(existing) => existing,
                        None => {
                            let text = value.to_string();
                            Thing {
                                inferred: true,
                                ..Thing::attribute(
                                    inferred_id("attribute", &[attribute_type.as_str(), text.as_str()]),
                                    attribute_type.as_str(),
                                    value,
                                )
                            }
                        }
                    },
                };
                Ok(Some(Fact::Has { owner, attribute }))
            }
            _ => Ok(None),
        }
    }
}

fn join_key(map: &ConceptMap, vars: &[Var]) -> Option<Vec<String>> {
    vars.iter()
        .map(|v| {
            map.get(v).map(|c| match c {
                Concept::Thing(t) => t.id.to_string(),
                Concept::Type { label } => format!("type:{label}"),
            })
        })
        .collect()
}

/// The query's id constants, moved onto the rule body through the head
/// unifier. `None` when two constants land on the same body variable.
fn pushed_ids(body_vars: &BTreeSet<Var>, query_ids: &Substitution, unifier: &Unifier) -> Option<Substitution> {
    let mut ids = Substitution::new();
    for (head_var, query_var) in unifier.pairs() {
        if !body_vars.contains(head_var) {
            continue;
        }
        let Some(id) = query_ids.get(query_var) else {
            continue;
        };
        match ids.get(head_var) {
            Some(existing) if existing != id => return None,
            Some(_) => {}
            None => {
                ids.insert(head_var.clone(), id.clone());
            }
        }
    }
    Some(ids)
}

#[cfg(test)]
mod tests {
    use super::*;
    use kgreason_pattern::{ConceptId, Conjunction, ValueType};

    use crate::graph::FactGraph;

    fn schema() -> Arc<Schema> {
        Arc::new(
            Schema::builder()
                .entity("node", "entity")
                .role("from", "role")
                .role("to", "role")
                .relation("edge", "relation", &["from", "to"])
                .relation("path", "relation", &["from", "to"])
                .attribute("label", "attribute", ValueType::String)
                .plays("node", &["from", "to"])
                .build()
                .unwrap(),
        )
    }

    fn path_rules() -> Vec<Rule> {
        let base = Rule::new(
            "path-base",
            Conjunction::builder()
                .relation(None, Some("edge"), &[(Some("from"), "x"), (Some("to"), "y")])
                .build(),
            Conjunction::builder()
                .relation(None, Some("path"), &[(Some("from"), "x"), (Some("to"), "y")])
                .build(),
        )
        .unwrap();
        let step = Rule::new(
            "path-step",
            Conjunction::builder()
                .relation(None, Some("path"), &[(Some("from"), "x"), (Some("to"), "z")])
                .relation(None, Some("edge"), &[(Some("from"), "z"), (Some("to"), "y")])
                .build(),
            Conjunction::builder()
                .relation(None, Some("path"), &[(Some("from"), "x"), (Some("to"), "y")])
                .build(),
        )
        .unwrap();
        vec![base, step]
    }

    fn chain(graph: &FactGraph, n: usize) -> Vec<ConceptId> {
        let nodes: Vec<ConceptId> = (0..n).map(|_| graph.put_entity("node").unwrap()).collect();
        for w in nodes.windows(2) {
            graph.put_relation("edge", &[("from", &w[0]), ("to", &w[1])]).unwrap();
        }
        nodes
    }

    fn path_query() -> Conjunction {
        Conjunction::builder()
            .relation(None, Some("path"), &[(Some("from"), "a"), (Some("to"), "b")])
            .build()
    }

    #[test]
    fn recursive_rules_reach_a_fixpoint() {
        let s = schema();
        let graph = FactGraph::new(s.clone());
        chain(&graph, 4);
        let reasoner = Reasoner::new(s, path_rules(), &graph, ReasonerConfig::default()).unwrap();
        let result = reasoner.resolve(path_query()).unwrap();
        // 3 + 2 + 1 pairs along a 4-node chain.
        assert_eq!(result.answers.len(), 6);
        assert!(result.stats.iterations >= 2);
        assert!(result.stats.rule_applications > 0);
    }

    #[test]
    fn pinned_queries_only_derive_what_they_ask_for() {
        let s = schema();
        let graph = FactGraph::new(s.clone());
        let nodes = chain(&graph, 4);
        let reasoner = Reasoner::new(s, path_rules(), &graph, ReasonerConfig::default()).unwrap();
        let query = Conjunction::builder()
            .relation(None, Some("path"), &[(Some("from"), "a"), (Some("to"), "b")])
            .id("a", nodes[1].as_str())
            .build();
        let result = reasoner.resolve(query).unwrap();
        assert_eq!(result.answers.len(), 2);
        assert!(result
            .answers
            .iter()
            .all(|a| a.map.get(&Var::new("a")).and_then(Concept::id) == Some(&nodes[1])));
    }

    #[test]
    fn rule_answers_explain_themselves() {
        let s = schema();
        let graph = FactGraph::new(s.clone());
        chain(&graph, 3);
        let reasoner = Reasoner::new(s, path_rules(), &graph, ReasonerConfig::default()).unwrap();
        let result = reasoner.resolve(path_query()).unwrap();
        for answer in &result.answers {
            let id = answer.explanation_id();
            let node = result.explanations.get(&answer.explanation).unwrap();
            assert!(matches!(node.kind, ExplanationKind::Rule { .. }));
            assert!(result.explanations.is_complete(id));
            assert!(!result.explanations.derives(&node.children, node.fact.as_deref().unwrap_or_default()));
        }
    }

    #[test]
    fn cancelled_resolutions_return_no_answers() {
        let s = schema();
        let graph = FactGraph::new(s.clone());
        chain(&graph, 3);
        let reasoner = Reasoner::new(s, path_rules(), &graph, ReasonerConfig::default()).unwrap();
        let cancel = CancellationHandle::new();
        cancel.cancel();
        let err = reasoner.resolve_with(path_query(), &cancel).unwrap_err();
        assert!(matches!(err, ReasonerError::Cancelled));
    }

    #[test]
    fn pushed_ids_detect_conflicts() {
        let body: BTreeSet<Var> = [Var::new("x")].into_iter().collect();
        let ids: Substitution = [
            (Var::new("a"), ConceptId::new("V1")),
            (Var::new("b"), ConceptId::new("V2")),
        ]
        .into_iter()
        .collect();
        let spread: Unifier = [(Var::new("x"), Var::new("a"))].into_iter().collect();
        assert_eq!(pushed_ids(&body, &ids, &spread).map(|s| s.len()), Some(1));
        let clash: Unifier = [(Var::new("x"), Var::new("a")), (Var::new("x"), Var::new("b"))]
            .into_iter()
            .collect();
        assert!(pushed_ids(&body, &ids, &clash).is_none());
    }
}
