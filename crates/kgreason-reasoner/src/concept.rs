//! Concepts and concept maps: what answers bind variables to.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use kgreason_pattern::{ConceptId, Label, Value, Var};

use crate::unifier::Unifier;

/// One `role: player` slot of a stored or inferred relation.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RolePlayerRef {
    pub role: Label,
    pub player: ConceptId,
}

/// An instance: entity, relation or attribute.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Thing {
    pub id: ConceptId,
    pub type_label: Label,
    /// Set for attributes.
    pub value: Option<Value>,
    /// Set for relations.
    pub role_players: Vec<RolePlayerRef>,
    /// Created by rule application rather than read from storage.
    pub inferred: bool,
}

impl Thing {
    pub fn entity(id: impl Into<String>, type_label: &str) -> Self {
        Self {
            id: ConceptId::new(id),
            type_label: Label::new(type_label),
            value: None,
            role_players: Vec::new(),
            inferred: false,
        }
    }

    pub fn attribute(id: impl Into<String>, type_label: &str, value: Value) -> Self {
        Self {
            value: Some(value),
            ..Self::entity(id, type_label)
        }
    }

    pub fn relation(id: impl Into<String>, type_label: &str, role_players: Vec<RolePlayerRef>) -> Self {
        Self {
            role_players,
            ..Self::entity(id, type_label)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(tag = "concept", rename_all = "snake_case")]
pub enum Concept {
    Thing(Thing),
    /// A schema concept bound to a type or role variable.
    Type { label: Label },
}

impl Concept {
    pub fn of_type(label: Label) -> Self {
        Concept::Type { label }
    }

    pub fn as_thing(&self) -> Option<&Thing> {
        match self {
            Concept::Thing(t) => Some(t),
            Concept::Type { .. } => None,
        }
    }

    pub fn id(&self) -> Option<&ConceptId> {
        self.as_thing().map(|t| &t.id)
    }

    pub fn value(&self) -> Option<&Value> {
        self.as_thing().and_then(|t| t.value.as_ref())
    }

    /// The instance's type, or the schema concept itself.
    pub fn label(&self) -> &Label {
        match self {
            Concept::Thing(t) => &t.type_label,
            Concept::Type { label } => label,
        }
    }

    /// Same concept: equal ids for things, equal labels for schema concepts.
    pub fn same_as(&self, other: &Concept) -> bool {
        match (self, other) {
            (Concept::Thing(a), Concept::Thing(b)) => a.id == b.id,
            (Concept::Type { label: a }, Concept::Type { label: b }) => a == b,
            _ => false,
        }
    }
}

impl From<Thing> for Concept {
    fn from(thing: Thing) -> Self {
        Concept::Thing(thing)
    }
}

impl fmt::Display for Concept {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Concept::Thing(t) => match &t.value {
                Some(v) => write!(f, "{}:{}={}", t.type_label, t.id, v),
                None => write!(f, "{}:{}", t.type_label, t.id),
            },
            Concept::Type { label } => write!(f, "type:{label}"),
        }
    }
}

/// Immutable `Var -> Concept` bindings. Combining maps produces new maps.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConceptMap(BTreeMap<Var, Concept>);

impl ConceptMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, var: &Var) -> Option<&Concept> {
        self.0.get(var)
    }

    pub fn contains(&self, var: &Var) -> bool {
        self.0.contains_key(var)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn vars(&self) -> BTreeSet<Var> {
        self.0.keys().cloned().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Var, &Concept)> {
        self.0.iter()
    }

    /// Add a binding; fails if `var` is already bound to a different concept.
    pub fn with(mut self, var: Var, concept: Concept) -> Option<Self> {
        match self.0.get(&var) {
            Some(existing) if !existing.same_as(&concept) => None,
            Some(_) => Some(self),
            None => {
                self.0.insert(var, concept);
                Some(self)
            }
        }
    }

    /// Union of two maps; `None` when they disagree on a shared variable.
    pub fn merge(&self, other: &ConceptMap) -> Option<ConceptMap> {
        let mut out = self.clone();
        for (var, concept) in &other.0 {
            out = out.with(var.clone(), concept.clone())?;
        }
        Some(out)
    }

    /// Restrict to `vars`.
    pub fn project(&self, vars: &BTreeSet<Var>) -> ConceptMap {
        ConceptMap(
            self.0
                .iter()
                .filter(|(v, _)| vars.contains(*v))
                .map(|(v, c)| (v.clone(), c.clone()))
                .collect(),
        )
    }

    /// Rename through a unifier whose left-hand side is this map's namespace.
    ///
    /// Each bound variable is copied to every variable it maps to; unmapped
    /// variables are dropped. `None` when two variables mapped onto the same
    /// target disagree.
    pub fn rename(&self, unifier: &Unifier) -> Option<ConceptMap> {
        let mut out = ConceptMap::new();
        for (from, to) in unifier.pairs() {
            if let Some(concept) = self.0.get(from) {
                out = out.with(to.clone(), concept.clone())?;
            }
        }
        Some(out)
    }
}

impl FromIterator<(Var, Concept)> for ConceptMap {
    fn from_iter<I: IntoIterator<Item = (Var, Concept)>>(iter: I) -> Self {
        ConceptMap(iter.into_iter().collect())
    }
}

impl fmt::Display for ConceptMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("{")?;
        for (i, (var, concept)) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{var}: {concept}")?;
        }
        f.write_str("}")
    }
}
