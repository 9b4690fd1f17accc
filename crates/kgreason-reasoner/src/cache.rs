//! Per-resolution answer tables.
//!
//! One entry per atomic query up to alpha-equivalence. Entries are reached
//! through [`Branded`] handles so a handle from one resolution cannot index
//! another resolution's cache. Complete entries may answer narrower queries
//! through their semantic difference.

use ahash::{AHashMap, AHashSet};
use tracing::trace;

use kgreason_pattern::TypeContext;

use crate::branding::{Branded, ResolutionToken, TokenMismatch};
use crate::concept::ConceptMap;
use crate::equivalence::{AlphaKey, Equivalence};
use crate::explanation::{Answer, ExplanationId};
use crate::query::ReasonerAtomicQuery;
use crate::semantic::SemanticDifference;
use crate::unifier::Unifier;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EntryId(u32);

impl EntryId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug, Clone)]
pub struct CacheEntry {
    query: ReasonerAtomicQuery,
    answers: Vec<Answer>,
    seen: AHashSet<ConceptMap>,
    complete: bool,
    /// Fixpoint iteration that last (re)computed the entry.
    epoch: u64,
}

impl CacheEntry {
    pub fn query(&self) -> &ReasonerAtomicQuery {
        &self.query
    }

    /// Answers in insertion order, in the namespace of [`CacheEntry::query`].
    pub fn answers(&self) -> &[Answer] {
        &self.answers
    }

    pub fn is_complete(&self) -> bool {
        self.complete
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }
}

#[derive(Debug)]
pub struct SemanticCache {
    token: ResolutionToken,
    entries: Vec<CacheEntry>,
    index: AHashMap<AlphaKey, usize>,
    total_answers: usize,
}

impl SemanticCache {
    pub fn new(token: ResolutionToken) -> Self {
        Self {
            token,
            entries: Vec::new(),
            index: AHashMap::new(),
            total_answers: 0,
        }
    }

    pub fn token(&self) -> ResolutionToken {
        self.token
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Answers held across all entries.
    pub fn total_answers(&self) -> usize {
        self.total_answers
    }

    /// The entry alpha-equivalent to `query`, with the renaming from the
    /// entry's variables onto `query`'s.
    pub fn find_exact(&self, query: &ReasonerAtomicQuery) -> Option<(Branded<EntryId>, Unifier)> {
        let idx = *self.index.get(&AlphaKey(query.clone()))?;
        let entry = &self.entries[idx];
        let renaming = Equivalence::Alpha.bijection(entry.query.query(), query.query())?;
        Some((Branded::new(self.token, EntryId(idx as u32)), renaming.into_iter().collect()))
    }

    /// Open an empty, incomplete entry for `query`; an alpha-equivalent
    /// entry is reused.
    pub fn insert(&mut self, query: ReasonerAtomicQuery, epoch: u64) -> Branded<EntryId> {
        let key = AlphaKey(query.clone());
        if let Some(idx) = self.index.get(&key) {
            return Branded::new(self.token, EntryId(*idx as u32));
        }
        let idx = self.entries.len();
        self.entries.push(CacheEntry {
            query,
            answers: Vec::new(),
            seen: AHashSet::new(),
            complete: false,
            epoch,
        });
        self.index.insert(key, idx);
        Branded::new(self.token, EntryId(idx as u32))
    }

    pub fn entry(&self, id: &Branded<EntryId>) -> Result<&CacheEntry, TokenMismatch> {
        let id = id.get_with_token(self.token)?;
        Ok(&self.entries[id.index()])
    }

    fn entry_mut(&mut self, id: &Branded<EntryId>) -> Result<&mut CacheEntry, TokenMismatch> {
        let id = id.get_with_token(self.token)?;
        Ok(&mut self.entries[id.index()])
    }

    /// Record an answer; `false` when an equal binding is already held.
    pub fn add_answer(&mut self, id: &Branded<EntryId>, answer: Answer) -> Result<bool, TokenMismatch> {
        answer.explanation.assert_token(self.token)?;
        let entry = self.entry_mut(id)?;
        if !entry.seen.insert(answer.map.clone()) {
            return Ok(false);
        }
        entry.answers.push(answer);
        self.total_answers += 1;
        Ok(true)
    }

    pub fn mark_complete(&mut self, id: &Branded<EntryId>) -> Result<(), TokenMismatch> {
        self.entry_mut(id)?.complete = true;
        Ok(())
    }

    pub fn set_epoch(&mut self, id: &Branded<EntryId>, epoch: u64) -> Result<(), TokenMismatch> {
        self.entry_mut(id)?.epoch = epoch;
        Ok(())
    }

    /// Mark every entry computed at or after `epoch` complete, except the
    /// ones in `in_progress`.
    pub fn complete_since(&mut self, epoch: u64, in_progress: &[EntryId]) -> usize {
        let mut marked = 0;
        for (idx, entry) in self.entries.iter_mut().enumerate() {
            if entry.complete || entry.epoch < epoch || in_progress.contains(&EntryId(idx as u32)) {
                continue;
            }
            entry.complete = true;
            marked += 1;
        }
        trace!(epoch, marked, "entries completed");
        marked
    }

    /// A complete entry whose answers, filtered by the semantic difference,
    /// are exactly `child`'s. The unifier maps the entry's variables onto
    /// `child`'s.
    pub fn find_subsuming(
        &self,
        child: &ReasonerAtomicQuery,
        ctx: &dyn TypeContext,
    ) -> Option<(Branded<EntryId>, Unifier, SemanticDifference)> {
        self.entries.iter().enumerate().find_map(|(idx, entry)| {
            if !entry.complete || entry.query.is_equivalent(child, Equivalence::Alpha) {
                return None;
            }
            let (unifier, diff) = entry.query.multi_unifier_with_semantic_diff(child, ctx).into_iter().next()?;
            Some((Branded::new(self.token, EntryId(idx as u32)), unifier, diff))
        })
    }

    /// Carry an entry's answers over to `child`, keeping each answer's
    /// explanation.
    pub fn propagate(
        &self,
        id: &Branded<EntryId>,
        child: &ReasonerAtomicQuery,
        unifier: &Unifier,
        diff: &SemanticDifference,
    ) -> Result<Vec<(ConceptMap, ExplanationId)>, TokenMismatch> {
        let substitution = child.substitution();
        let vars = child.vars();
        let mut seen = AHashSet::new();
        Ok(self
            .entry(id)?
            .answers
            .iter()
            .filter_map(|a| {
                let map = diff.propagate_answer(&a.map, &substitution, &vars, unifier)?;
                seen.insert(map.clone()).then(|| (map, a.explanation_id()))
            })
            .collect())
    }
}
