//! In-memory fact graph.
//!
//! Reference implementation of [`Storage`] and [`MaterialisationSink`]:
//! things in a column, roaring-bitmap indexes by exact type, ownership and
//! role-player adjacency, all behind one `RwLock` so materialisation can
//! write through a shared reference.

use std::sync::Arc;

use ahash::{AHashMap, AHashSet};
use anyhow::{anyhow, bail, Result};
use parking_lot::RwLock;
use roaring::RoaringBitmap;

use kgreason_pattern::{Atom, ConceptId, Label, Schema, TypeContext, TypeKind, TypeRef, Value, Var};

use crate::concept::{Concept, ConceptMap, RolePlayerRef, Thing};
use crate::matcher::{match_fact, pinned_id, satisfies, Fact};
use crate::query::ReasonerAtomicQuery;
use crate::storage::{MaterialisationSink, Storage};

// ============================================================================
// Storage layout
// ============================================================================

#[derive(Debug, Default)]
struct GraphInner {
    things: Vec<Thing>,
    by_id: AHashMap<ConceptId, u32>,
    /// Exact type -> things
    type_index: AHashMap<Label, RoaringBitmap>,
    /// (type, value) -> attribute
    attribute_values: AHashMap<(Label, Value), u32>,
    /// (owner, attribute)
    ownerships: Vec<(u32, u32)>,
    ownership_set: AHashSet<(u32, u32)>,
    /// owner -> ownership indices
    owned_by: AHashMap<u32, RoaringBitmap>,
    /// player -> relations it plays in
    playing: AHashMap<u32, RoaringBitmap>,
    next_id: u64,
}

impl GraphInner {
    fn index_of(&self, id: &ConceptId) -> Option<u32> {
        self.by_id.get(id).copied()
    }

    fn thing(&self, idx: u32) -> Option<&Thing> {
        self.things.get(idx as usize)
    }

    fn fresh_id(&mut self) -> ConceptId {
        self.next_id += 1;
        ConceptId::new(format!("V{}", self.next_id))
    }

    fn push(&mut self, thing: Thing) -> u32 {
        if let Some(idx) = self.index_of(&thing.id) {
            return idx;
        }
        let idx = self.things.len() as u32;
        self.by_id.insert(thing.id.clone(), idx);
        self.type_index.entry(thing.type_label.clone()).or_default().insert(idx);
        if let Some(value) = &thing.value {
            self.attribute_values.insert((thing.type_label.clone(), value.clone()), idx);
        }
        for rp in &thing.role_players {
            if let Some(player) = self.index_of(&rp.player) {
                self.playing.entry(player).or_default().insert(idx);
            }
        }
        self.things.push(thing);
        idx
    }

    fn own(&mut self, owner: u32, attribute: u32) -> bool {
        if !self.ownership_set.insert((owner, attribute)) {
            return false;
        }
        let n = self.ownerships.len() as u32;
        self.ownerships.push((owner, attribute));
        self.owned_by.entry(owner).or_default().insert(n);
        true
    }

    /// Things whose type is `label` or one of its subtypes.
    fn of_type(&self, label: &Label, schema: &Schema) -> RoaringBitmap {
        let mut out = RoaringBitmap::new();
        for ty in schema.sub_types_inclusive(label) {
            if let Some(bits) = self.type_index.get(&ty) {
                out |= bits;
            }
        }
        out
    }

    fn relation_fact(&self, idx: u32) -> Option<Fact> {
        let relation = self.thing(idx)?;
        let players = relation
            .role_players
            .iter()
            .map(|rp| {
                let player = self.index_of(&rp.player).and_then(|p| self.thing(p))?;
                Some((rp.role.clone(), player.clone()))
            })
            .collect::<Option<Vec<_>>>()?;
        Some(Fact::Relation {
            relation: relation.clone(),
            players,
        })
    }

    fn has_fact(&self, n: u32) -> Option<Fact> {
        let (owner, attribute) = *self.ownerships.get(n as usize)?;
        Some(Fact::Has {
            owner: self.thing(owner)?.clone(),
            attribute: self.thing(attribute)?.clone(),
        })
    }

    /// Candidate facts for an instance atom, narrowed by pinned ids.
    fn candidate_facts(&self, atom: &Atom, guards: &[&Atom], schema: &Schema) -> Vec<Fact> {
        let pinned = |var: &Var| pinned_id(guards, var).map(|id| self.index_of(id));
        match atom {
            Atom::Isa { var, ty } => {
                let bits: RoaringBitmap = match (pinned(var), ty) {
                    (Some(idx), _) => idx.into_iter().collect(),
                    (None, TypeRef::Label(label)) => self.of_type(label, schema),
                    (None, TypeRef::Var(_)) => (0..self.things.len() as u32).collect(),
                };
                bits.iter()
                    .filter_map(|i| self.thing(i).cloned().map(Fact::Instance))
                    .collect()
            }
            Atom::Has { owner, attribute, .. } => {
                let bits: RoaringBitmap = match pinned(owner) {
                    Some(idx) => idx
                        .and_then(|o| self.owned_by.get(&o).cloned())
                        .unwrap_or_default(),
                    None => (0..self.ownerships.len() as u32).collect(),
                };
                let attribute_idx = pinned(attribute);
                bits.iter()
                    .filter(|n| match attribute_idx {
                        Some(a) => self.ownerships.get(*n as usize).map(|o| Some(o.1)) == Some(a),
                        None => true,
                    })
                    .filter_map(|n| self.has_fact(n))
                    .collect()
            }
            Atom::Relation { var, ty, players } => {
                let mut bits = match ty {
                    Some(label) => self.of_type(label, schema),
                    None => self.of_type(&Label::new(kgreason_pattern::schema::RELATION), schema),
                };
                if let Some(idx) = pinned(var) {
                    let mut only = RoaringBitmap::new();
                    if let Some(i) = idx {
                        only.insert(i);
                    }
                    bits &= only;
                }
                for rp in players {
                    if let Some(idx) = pinned(&rp.player) {
                        let playing = idx.and_then(|p| self.playing.get(&p).cloned()).unwrap_or_default();
                        bits &= playing;
                    }
                }
                bits.iter().filter_map(|i| self.relation_fact(i)).collect()
            }
            _ => Vec::new(),
        }
    }
}

// ============================================================================
// Fact graph
// ============================================================================

/// Thread-safe in-memory store of entities, attributes, relations and
/// ownerships, typed against a shared schema.
#[derive(Debug)]
pub struct FactGraph {
    schema: Arc<Schema>,
    inner: RwLock<GraphInner>,
}

impl FactGraph {
    pub fn new(schema: Arc<Schema>) -> Self {
        Self {
            schema,
            inner: RwLock::new(GraphInner::default()),
        }
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    pub fn len(&self) -> usize {
        self.inner.read().things.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, id: &ConceptId) -> Option<Thing> {
        let inner = self.inner.read();
        inner.index_of(id).and_then(|i| inner.thing(i)).cloned()
    }

    /// Number of things of `label` or its subtypes.
    pub fn count_of_type(&self, label: &str) -> u64 {
        self.inner.read().of_type(&Label::new(label), &self.schema).len()
    }

    fn expect_kind(&self, label: &Label, kind: TypeKind) -> Result<()> {
        match self.schema.kind(label) {
            Some(k) if k == kind => Ok(()),
            Some(k) => bail!("{label} is {k}, expected {kind}"),
            None => bail!("unknown type {label}"),
        }
    }

    pub fn put_entity(&self, ty: &str) -> Result<ConceptId> {
        let label = Label::new(ty);
        self.expect_kind(&label, TypeKind::Entity)?;
        let mut inner = self.inner.write();
        let id = inner.fresh_id();
        inner.push(Thing::entity(id.as_str(), ty));
        Ok(id)
    }

    /// Attributes are unique per (type, value); putting one twice returns
    /// the existing id.
    pub fn put_attribute(&self, ty: &str, value: impl Into<Value>) -> Result<ConceptId> {
        let label = Label::new(ty);
        let value = value.into();
        self.expect_kind(&label, TypeKind::Attribute)?;
        if let Some(expected) = self.schema.value_type(&label) {
            if expected != value.value_type() {
                bail!("{ty} holds {expected:?} values, got {value}");
            }
        }
        let mut inner = self.inner.write();
        if let Some(idx) = inner.attribute_values.get(&(label, value.clone())) {
            return Ok(inner.things[*idx as usize].id.clone());
        }
        let id = inner.fresh_id();
        inner.push(Thing::attribute(id.as_str(), ty, value));
        Ok(id)
    }

    pub fn put_relation(&self, ty: &str, players: &[(&str, &ConceptId)]) -> Result<ConceptId> {
        let label = Label::new(ty);
        self.expect_kind(&label, TypeKind::Relation)?;
        let mut role_players = Vec::with_capacity(players.len());
        for (role, player) in players {
            let role = Label::new(*role);
            if !self.schema.role_fits_relation(&label, &role) {
                bail!("{ty} does not relate {role}");
            }
            role_players.push(RolePlayerRef {
                role,
                player: (*player).clone(),
            });
        }
        let mut inner = self.inner.write();
        for rp in &role_players {
            if inner.index_of(&rp.player).is_none() {
                bail!("unknown role player {}", rp.player);
            }
        }
        let id = inner.fresh_id();
        inner.push(Thing::relation(id.as_str(), ty, role_players));
        Ok(id)
    }

    pub fn put_has(&self, owner: &ConceptId, attribute: &ConceptId) -> Result<()> {
        let mut inner = self.inner.write();
        let o = inner.index_of(owner).ok_or_else(|| anyhow!("unknown owner {owner}"))?;
        let a = inner
            .index_of(attribute)
            .ok_or_else(|| anyhow!("unknown attribute {attribute}"))?;
        if inner.things[a as usize].value.is_none() {
            bail!("{attribute} is not an attribute");
        }
        inner.own(o, a);
        Ok(())
    }

    /// Schema-level answers for sub/plays/relates and variable-typed isa
    /// heads are built from the schema, not the instance store.
    fn schema_answers(&self, atom: &Atom) -> Vec<ConceptMap> {
        let schema = &self.schema;
        let ty = |l: &Label| Concept::of_type(l.clone());
        let mut out = Vec::new();
        match atom {
            Atom::Sub { var, sup } => {
                for label in schema.labels() {
                    for s in std::iter::once(label.clone()).chain(schema.super_types(label)) {
                        let map = ConceptMap::new().with(var.clone(), ty(label));
                        let map = match sup {
                            TypeRef::Label(l) if *l == s => map,
                            TypeRef::Label(_) => None,
                            TypeRef::Var(sv) => map.and_then(|m| m.with(sv.clone(), ty(&s))),
                        };
                        out.extend(map);
                    }
                }
            }
            Atom::Plays { var, role } | Atom::Relates { var, role } => {
                let relates = matches!(atom, Atom::Relates { .. });
                for label in schema.labels() {
                    let roles = if relates {
                        schema.relates(label)
                    } else {
                        schema.plays(label)
                    };
                    for r in roles {
                        let map = ConceptMap::new().with(var.clone(), ty(label));
                        let map = match role {
                            TypeRef::Label(l) if *l == r => map,
                            TypeRef::Label(_) => None,
                            TypeRef::Var(rv) => map.and_then(|m| m.with(rv.clone(), ty(&r))),
                        };
                        out.extend(map);
                    }
                }
            }
            _ => {}
        }
        out.sort();
        out.dedup();
        out
    }
}

impl Storage for FactGraph {
    fn lookup(&self, query: &ReasonerAtomicQuery) -> Result<Box<dyn Iterator<Item = ConceptMap> + '_>> {
        let atom = query.atom();
        let guards = query.guards();
        let answers: Vec<ConceptMap> = match atom {
            Atom::Sub { .. } | Atom::Plays { .. } | Atom::Relates { .. } => self.schema_answers(atom),
            _ => {
                let inner = self.inner.read();
                inner
                    .candidate_facts(atom, &guards, &self.schema)
                    .iter()
                    .flat_map(|fact| match_fact(atom, fact, self.schema.as_ref()))
                    .collect()
            }
        };
        let schema = self.schema.as_ref();
        let answers: Vec<ConceptMap> = answers
            .into_iter()
            .filter(|m| satisfies(guards.iter().copied(), m, schema))
            .collect();
        Ok(Box::new(answers.into_iter()))
    }

    fn find_relation(&self, ty: &Label, players: &[RolePlayerRef]) -> Result<Option<Thing>> {
        let inner = self.inner.read();
        let mut wanted = players.to_vec();
        wanted.sort();
        let mut bits = inner.type_index.get(ty).cloned().unwrap_or_default();
        for rp in players {
            let playing = inner
                .index_of(&rp.player)
                .and_then(|p| inner.playing.get(&p).cloned())
                .unwrap_or_default();
            bits &= playing;
        }
        Ok(bits.iter().filter_map(|i| inner.thing(i)).find_map(|t| {
            let mut have = t.role_players.clone();
            have.sort();
            (have == wanted).then(|| t.clone())
        }))
    }

    fn find_attribute(&self, ty: &Label, value: &Value) -> Result<Option<Thing>> {
        let inner = self.inner.read();
        Ok(inner
            .attribute_values
            .get(&(ty.clone(), value.clone()))
            .and_then(|i| inner.thing(*i))
            .cloned())
    }
}

impl MaterialisationSink for FactGraph {
    fn insert(&self, fact: &Fact) -> Result<Vec<Concept>> {
        let mut inner = self.inner.write();
        let stored = |t: &Thing| Thing {
            inferred: t.inferred || t.id.as_str().starts_with(kgreason_pattern::digest::INFERRED_ID_PREFIX),
            ..t.clone()
        };
        match fact {
            Fact::Instance(t) => {
                let idx = inner.push(stored(t));
                Ok(vec![Concept::Thing(inner.things[idx as usize].clone())])
            }
            Fact::Relation { relation, players } => {
                for (_, player) in players {
                    inner.push(stored(player));
                }
                let idx = inner.push(stored(relation));
                Ok(vec![Concept::Thing(inner.things[idx as usize].clone())])
            }
            Fact::Has { owner, attribute } => {
                let o = inner.push(stored(owner));
                let a = inner.push(stored(attribute));
                if !inner.own(o, a) {
                    return Ok(Vec::new());
                }
                Ok(vec![Concept::Thing(inner.things[a as usize].clone())])
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kgreason_pattern::{Comparator, Conjunction, ValueType};

    use crate::query::ReasonerQuery;

    fn graph() -> FactGraph {
        let schema = Schema::builder()
            .entity("person", "entity")
            .entity("student", "person")
            .role("friend", "role")
            .relation("friendship", "relation", &["friend"])
            .attribute("name", "attribute", ValueType::String)
            .plays("person", &["friend"])
            .build()
            .unwrap();
        FactGraph::new(Arc::new(schema))
    }

    fn atomic(conj: Conjunction) -> ReasonerAtomicQuery {
        ReasonerAtomicQuery::from_query(ReasonerQuery::from_conjunction(&conj)).unwrap()
    }

    #[test]
    fn isa_lookup_includes_subtypes() {
        let g = graph();
        g.put_entity("person").unwrap();
        g.put_entity("student").unwrap();
        let q = atomic(Conjunction::builder().isa("x", "person").build());
        assert_eq!(g.lookup(&q).unwrap().count(), 2);
        let q = atomic(Conjunction::builder().isa("x", "student").build());
        assert_eq!(g.lookup(&q).unwrap().count(), 1);
    }

    #[test]
    fn pinned_ids_and_values_are_pushed_down() {
        let g = graph();
        let a = g.put_entity("person").unwrap();
        let b = g.put_entity("person").unwrap();
        let alice = g.put_attribute("name", "alice").unwrap();
        let bob = g.put_attribute("name", "bob").unwrap();
        g.put_has(&a, &alice).unwrap();
        g.put_has(&b, &bob).unwrap();
        assert_eq!(g.put_attribute("name", "alice").unwrap(), alice);

        let q = atomic(Conjunction::builder().has("x", "name", "n").id("x", a.as_str()).build());
        assert_eq!(g.lookup(&q).unwrap().count(), 1);

        let q = atomic(
            Conjunction::builder()
                .has("x", "name", "n")
                .value("n", Comparator::Eq, "bob")
                .build(),
        );
        let answers: Vec<ConceptMap> = g.lookup(&q).unwrap().collect();
        assert_eq!(answers.len(), 1);
        assert_eq!(answers[0].get(&Var::new("x")).and_then(Concept::id), Some(&b));
    }

    #[test]
    fn relations_are_validated_and_found() {
        let g = graph();
        let a = g.put_entity("person").unwrap();
        let b = g.put_entity("person").unwrap();
        assert!(g.put_relation("friendship", &[("enemy", &a)]).is_err());
        assert!(g.put_attribute("person", "x").is_err());
        let r = g.put_relation("friendship", &[("friend", &a), ("friend", &b)]).unwrap();

        let players = vec![
            RolePlayerRef {
                role: Label::new("friend"),
                player: b.clone(),
            },
            RolePlayerRef {
                role: Label::new("friend"),
                player: a.clone(),
            },
        ];
        let found = g.find_relation(&Label::new("friendship"), &players).unwrap();
        assert_eq!(found.map(|t| t.id), Some(r));
    }

    #[test]
    fn schema_atoms_are_answered_from_the_schema() {
        let g = graph();
        let q = atomic(Conjunction::builder().sub("t", "person").build());
        let labels: Vec<String> = g
            .lookup(&q)
            .unwrap()
            .filter_map(|m| m.get(&Var::new("t")).map(|c| c.label().to_string()))
            .collect();
        assert_eq!(labels, vec!["person".to_string(), "student".to_string()]);
    }

    #[test]
    fn materialised_facts_are_flagged_inferred() {
        let g = graph();
        let a = g.put_entity("person").unwrap();
        let owner = g.get(&a).unwrap();
        let name = Thing::attribute(
            kgreason_pattern::digest::inferred_id("attribute", &["name", "'x'"]),
            "name",
            "x".into(),
        );
        let created = g.insert(&Fact::Has { owner, attribute: name }).unwrap();
        assert_eq!(created.len(), 1);
        assert!(created[0].as_thing().is_some_and(|t| t.inferred));
        let q = atomic(Conjunction::builder().has("x", "name", "n").build());
        assert_eq!(g.lookup(&q).unwrap().count(), 1);
    }
}
