//! Collaborator contracts: where direct answers come from and where inferred
//! facts go. Failures here are foreign to the reasoner and travel as
//! `anyhow::Error`.

use kgreason_pattern::{Label, Value};

use crate::concept::{Concept, ConceptMap, RolePlayerRef, Thing};
use crate::matcher::Fact;
use crate::query::ReasonerAtomicQuery;

pub trait Storage {
    /// Direct (stored) matches of `query`, bound over all of its variables.
    ///
    /// Implementations push the query's id, type and value guards down; the
    /// engine re-checks them anyway.
    fn lookup(&self, query: &ReasonerAtomicQuery) -> anyhow::Result<Box<dyn Iterator<Item = ConceptMap> + '_>>;

    /// A stored relation of type `ty` with exactly these role players.
    fn find_relation(&self, ty: &Label, players: &[RolePlayerRef]) -> anyhow::Result<Option<Thing>> {
        let _ = (ty, players);
        Ok(None)
    }

    /// The stored attribute of type `ty` holding `value`.
    fn find_attribute(&self, ty: &Label, value: &Value) -> anyhow::Result<Option<Thing>> {
        let _ = (ty, value);
        Ok(None)
    }
}

pub trait MaterialisationSink {
    /// Persist an inferred fact; returns the concepts created, flagged as
    /// inferred.
    fn insert(&self, fact: &Fact) -> anyhow::Result<Vec<Concept>>;
}
