//! Answers and their provenance.
//!
//! Explanations live in a per-resolution arena. A node's children are always
//! nodes created before it, so the graph is a DAG by construction; shared
//! sub-derivations are stored once and referenced by index.

use ahash::AHashMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use kgreason_pattern::Label;

use crate::branding::{Branded, ResolutionToken, TokenMismatch};
use crate::concept::ConceptMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExplanationId(u32);

impl ExplanationId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ExplanationKind {
    /// Read directly from storage.
    Lookup,
    /// Concluded by firing a rule; children are the body answers.
    Rule { rule: Label },
    /// Conjunctive combination of independently obtained answers.
    Join,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ExplanationNode {
    #[serde(flatten)]
    pub kind: ExplanationKind,
    pub answer: ConceptMap,
    pub children: Vec<ExplanationId>,
    /// Key of the fact a rule node concluded.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fact: Option<String>,
}

/// An answer: bindings plus a branded reference into the explanation arena.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Answer {
    pub map: ConceptMap,
    pub explanation: Branded<ExplanationId>,
}

impl Answer {
    pub fn explanation_id(&self) -> ExplanationId {
        self.explanation.into_inner()
    }
}

#[derive(Debug, Clone)]
pub struct ExplanationGraph {
    token: ResolutionToken,
    /// Off when the resolution records node kinds without children.
    explained: bool,
    nodes: Vec<ExplanationNode>,
    interned: AHashMap<ExplanationNode, ExplanationId>,
}

impl ExplanationGraph {
    pub fn new(token: ResolutionToken) -> Self {
        Self {
            token,
            explained: true,
            nodes: Vec::new(),
            interned: AHashMap::new(),
        }
    }

    /// An arena for `explain = false`: rule nodes carry no body
    /// derivations.
    pub fn unexplained(token: ResolutionToken) -> Self {
        Self {
            explained: false,
            ..Self::new(token)
        }
    }

    pub fn is_explained(&self) -> bool {
        self.explained
    }

    pub fn token(&self) -> ResolutionToken {
        self.token
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Add a node, or return the id of an identical existing one.
    ///
    /// Children must already be in the arena; unknown ids are dropped.
    pub fn add(
        &mut self,
        kind: ExplanationKind,
        answer: ConceptMap,
        children: Vec<ExplanationId>,
        fact: Option<String>,
    ) -> Branded<ExplanationId> {
        let next = self.nodes.len();
        let children: Vec<ExplanationId> = children.into_iter().filter(|c| c.index() < next).collect();
        let node = ExplanationNode {
            kind,
            answer,
            children,
            fact,
        };
        if let Some(id) = self.interned.get(&node) {
            return Branded::new(self.token, *id);
        }
        let id = ExplanationId(next as u32);
        self.interned.insert(node.clone(), id);
        self.nodes.push(node);
        Branded::new(self.token, id)
    }

    pub fn lookup(&mut self, answer: ConceptMap) -> Branded<ExplanationId> {
        self.add(ExplanationKind::Lookup, answer, Vec::new(), None)
    }

    pub fn get(&self, id: &Branded<ExplanationId>) -> Result<&ExplanationNode, TokenMismatch> {
        let id = id.get_with_token(self.token)?;
        Ok(&self.nodes[id.index()])
    }

    pub fn node(&self, id: ExplanationId) -> Option<&ExplanationNode> {
        self.nodes.get(id.index())
    }

    pub fn nodes(&self) -> &[ExplanationNode] {
        &self.nodes
    }

    /// All nodes reachable from `roots`, roots included.
    pub fn reachable(&self, roots: &[ExplanationId]) -> BTreeSet<ExplanationId> {
        let mut seen = BTreeSet::new();
        let mut stack: Vec<ExplanationId> = roots.to_vec();
        while let Some(id) = stack.pop() {
            if !seen.insert(id) {
                continue;
            }
            if let Some(node) = self.node(id) {
                stack.extend(node.children.iter().copied());
            }
        }
        seen
    }

    /// Does any derivation below `roots` conclude `fact`?
    pub fn derives(&self, roots: &[ExplanationId], fact: &str) -> bool {
        self.reachable(roots)
            .into_iter()
            .filter_map(|id| self.node(id))
            .any(|n| n.fact.as_deref() == Some(fact))
    }

    /// Every leaf below `id` is a lookup. In an unexplained arena a rule
    /// node is a leaf too.
    pub fn is_complete(&self, id: ExplanationId) -> bool {
        self.reachable(&[id])
            .into_iter()
            .filter_map(|n| self.node(n))
            .all(|n| match n.kind {
                ExplanationKind::Lookup => true,
                ExplanationKind::Rule { .. } => !self.explained || !n.children.is_empty(),
                ExplanationKind::Join => !n.children.is_empty(),
            })
    }

    /// A join's children jointly bind every variable of its answer.
    pub fn is_connected(&self, id: ExplanationId) -> bool {
        let Some(node) = self.node(id) else {
            return false;
        };
        if node.kind != ExplanationKind::Join {
            return true;
        }
        let bound: BTreeSet<_> = node
            .children
            .iter()
            .filter_map(|c| self.node(*c))
            .flat_map(|c| c.answer.vars())
            .collect();
        node.answer.vars().is_subset(&bound)
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "nodes": self
                .nodes
                .iter()
                .enumerate()
                .map(|(i, n)| {
                    let mut v = serde_json::to_value(n).unwrap_or(serde_json::Value::Null);
                    if let serde_json::Value::Object(map) = &mut v {
                        map.insert("id".to_string(), serde_json::Value::from(i));
                    }
                    v
                })
                .collect::<Vec<_>>()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::concept::{Concept, Thing};
    use kgreason_pattern::Var;

    fn map(var: &str, id: &str) -> ConceptMap {
        [(Var::new(var), Concept::from(Thing::entity(id, "person")))]
            .into_iter()
            .collect()
    }

    #[test]
    fn identical_nodes_are_shared() {
        let mut g = ExplanationGraph::new(ResolutionToken::new());
        let a = g.lookup(map("x", "V1"));
        let b = g.lookup(map("x", "V1"));
        assert_eq!(a, b);
        assert_eq!(g.len(), 1);
    }

    #[test]
    fn children_must_precede_parent() {
        let mut g = ExplanationGraph::new(ResolutionToken::new());
        let bogus = ExplanationId(42);
        let id = g.add(ExplanationKind::Join, map("x", "V1"), vec![bogus], None);
        assert!(g.get(&id).unwrap().children.is_empty());
    }

    #[test]
    fn rule_derivations_are_traceable() {
        let mut g = ExplanationGraph::new(ResolutionToken::new());
        let leaf = g.lookup(map("x", "V1")).into_inner();
        let rule = g
            .add(
                ExplanationKind::Rule { rule: Label::new("r") },
                map("y", "V1"),
                vec![leaf],
                Some("inf:1".into()),
            )
            .into_inner();
        assert!(g.derives(&[rule], "inf:1"));
        assert!(!g.derives(&[leaf], "inf:1"));
        assert!(g.is_complete(rule));
    }

    #[test]
    fn foreign_ids_are_rejected() {
        let mut mine = ExplanationGraph::new(ResolutionToken::new());
        let other = ExplanationGraph::new(ResolutionToken::new());
        let id = mine.lookup(map("x", "V1"));
        assert!(other.get(&id).is_err());
    }

    #[test]
    fn joins_must_cover_their_answer() {
        let mut g = ExplanationGraph::new(ResolutionToken::new());
        let a = g.lookup(map("x", "V1")).into_inner();
        let joined = map("x", "V1").merge(&map("y", "V2")).unwrap();
        let partial = g.add(ExplanationKind::Join, joined.clone(), vec![a], None).into_inner();
        assert!(!g.is_connected(partial));
        let b = g.lookup(map("y", "V2")).into_inner();
        let full = g.add(ExplanationKind::Join, joined, vec![a, b], None).into_inner();
        assert!(g.is_connected(full));
    }

    #[test]
    fn childless_rule_nodes_only_pass_without_explanations() {
        let rule = || ExplanationKind::Rule { rule: Label::new("r") };

        let mut g = ExplanationGraph::new(ResolutionToken::new());
        let bare = g.add(rule(), map("y", "V1"), Vec::new(), None).into_inner();
        assert!(!g.is_complete(bare));

        let mut g = ExplanationGraph::unexplained(ResolutionToken::new());
        let bare = g.add(rule(), map("y", "V1"), Vec::new(), None).into_inner();
        assert!(g.is_complete(bare));
        let join = g.add(ExplanationKind::Join, map("z", "V1"), Vec::new(), None).into_inner();
        assert!(!g.is_complete(join));
    }

    #[test]
    fn exports_json() {
        let mut g = ExplanationGraph::new(ResolutionToken::new());
        let leaf = g.lookup(map("x", "V1")).into_inner();
        g.add(
            ExplanationKind::Rule { rule: Label::new("r") },
            map("y", "V1"),
            vec![leaf],
            Some("inf:1".into()),
        );
        let json = g.to_json();
        assert_eq!(json["nodes"][0]["kind"], "lookup");
        assert_eq!(json["nodes"][0]["id"], 0);
        assert_eq!(json["nodes"][1]["kind"], "rule");
        assert_eq!(json["nodes"][1]["rule"], "r");
        assert_eq!(json["nodes"][1]["children"], serde_json::json!([0]));
        assert_eq!(json["nodes"][1]["fact"], "inf:1");
    }
}
