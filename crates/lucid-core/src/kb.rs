//! The knowledge base: an append-only log of asserted boxes with their
//! clausal form, a predicate index, and the derived discourse context.
//!
//! State lives behind an `Arc` and is copied on write, so a `Snapshot`
//! taken for a query stays valid and unchanged while later assertions
//! and retractions proceed.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::ops::Deref;
use std::sync::{Arc, PoisonError, RwLock};

use serde::{Deserialize, Serialize};

use crate::clauses::{ClauseSet, Denial, Rule, clausify, ground};
use crate::drs::{DrsBox, Gender, Predicate, Sort, Term};
use crate::error::KbError;
use crate::semantics::{Discourse, Individual};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntryId(pub u64);

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Where an entry came from: a source label (file name, `cli`, `mcp`),
/// the statement's position within it, and the sentence itself with its
/// byte offset in the submitted text.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Provenance {
    pub source: String,
    pub position: usize,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub text: String,
    #[serde(default)]
    pub offset: usize,
}

impl Provenance {
    pub fn new(source: impl Into<String>, position: usize) -> Self {
        Self {
            source: source.into(),
            position,
            text: String::new(),
            offset: 0,
        }
    }

    pub fn with_text(mut self, text: impl Into<String>, offset: usize) -> Self {
        self.text = text.into();
        self.offset = offset;
        self
    }
}

impl fmt::Display for Provenance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.source, self.position)
    }
}

#[derive(Clone, Debug)]
pub struct Entry {
    pub id: EntryId,
    pub active: bool,
    pub provenance: Provenance,
    /// The box as compiled, before grounding.
    pub drs: DrsBox,
    /// Top-level referents replaced by entity constants.
    pub grounded: DrsBox,
    pub clauses: ClauseSet,
    /// Entities introduced by this entry.
    pub entities: Vec<u64>,
}

/// A fact or rule head matching a goal, in the order the engine tries them.
#[derive(Clone, Copy, Debug)]
pub enum Candidate<'a> {
    Fact {
        entry: EntryId,
        fact: &'a Predicate,
    },
    Rule {
        entry: EntryId,
        rule: &'a Rule,
    },
}

impl<'a> Candidate<'a> {
    pub fn entry(&self) -> EntryId {
        match self {
            Candidate::Fact { entry, .. } | Candidate::Rule { entry, .. } => *entry,
        }
    }

    pub fn head(&self) -> &'a Predicate {
        match self {
            Candidate::Fact { fact, .. } => fact,
            Candidate::Rule { rule, .. } => &rule.head,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ClauseKind {
    Fact,
    Rule,
    Negative,
}

#[derive(Clone, Copy, Debug)]
struct Indexed {
    entry: EntryId,
    kind: ClauseKind,
    slot: usize,
}

/// A newly asserted fact that directly contradicts an active negative fact
/// (or the other way around).
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ContradictionWarning {
    pub conflicts_with: EntryId,
    pub fact: String,
}

impl fmt::Display for ContradictionWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "contradicts entry {} on {}",
            self.conflicts_with, self.fact
        )
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct AssertOutcome {
    pub id: EntryId,
    /// False when an identical active entry already existed.
    pub created: bool,
    pub warnings: Vec<ContradictionWarning>,
    /// Denials (by stating entry) that this entry now violates.
    pub violations: Vec<EntryId>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct KbStats {
    pub entries: usize,
    pub active: usize,
    pub facts: usize,
    pub rules: usize,
    pub negative_facts: usize,
    pub denials: usize,
    pub individuals: usize,
}

#[derive(Clone, Debug)]
pub struct KbState {
    entries: Vec<Arc<Entry>>,
    positions: HashMap<EntryId, usize>,
    index: HashMap<String, Vec<Indexed>>,
    by_drs: HashMap<DrsBox, EntryId>,
    entity_info: HashMap<u64, (Sort, Option<Gender>)>,
    domain: Vec<Term>,
    next_id: u64,
    next_entity: u64,
}

impl Default for KbState {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
            positions: HashMap::new(),
            index: HashMap::new(),
            by_drs: HashMap::new(),
            entity_info: HashMap::new(),
            domain: Vec::new(),
            next_id: 1,
            next_entity: 1,
        }
    }
}

impl KbState {
    pub fn entry(&self, id: EntryId) -> Option<&Entry> {
        self.positions.get(&id).map(|&i| self.entries[i].as_ref())
    }

    /// All entries in assertion order, retracted ones included.
    pub fn entries(&self) -> impl Iterator<Item = &Entry> {
        self.entries.iter().map(Arc::as_ref)
    }

    pub fn active_entries(&self) -> impl Iterator<Item = &Entry> {
        self.entries().filter(|e| e.active)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn next_id(&self) -> EntryId {
        EntryId(self.next_id)
    }

    fn indexed(&self, name: &str) -> impl Iterator<Item = (&Entry, &Indexed)> {
        self.index.get(name).into_iter().flatten().filter_map(|ix| {
            let entry = self.entry(ix.entry)?;
            entry.active.then_some((entry, ix))
        })
    }

    /// Active facts then rules whose head uses `name`, each in assertion order.
    pub fn lookup(&self, name: &str) -> Vec<Candidate<'_>> {
        let mut facts = Vec::new();
        let mut rules = Vec::new();
        for (entry, ix) in self.indexed(name) {
            match ix.kind {
                ClauseKind::Fact => facts.push(Candidate::Fact {
                    entry: entry.id,
                    fact: &entry.clauses.facts[ix.slot],
                }),
                ClauseKind::Rule => rules.push(Candidate::Rule {
                    entry: entry.id,
                    rule: &entry.clauses.rules[ix.slot],
                }),
                ClauseKind::Negative => {}
            }
        }
        facts.extend(rules);
        facts
    }

    /// `lookup` restricted to heads of the given arity.
    pub fn candidates(&self, name: &str, arity: usize) -> Vec<Candidate<'_>> {
        let mut out = self.lookup(name);
        out.retain(|c| c.head().arity() == arity);
        out
    }

    pub fn negative_facts(&self, name: &str, arity: usize) -> Vec<(EntryId, &Predicate)> {
        self.indexed(name)
            .filter(|(_, ix)| ix.kind == ClauseKind::Negative)
            .map(|(entry, ix)| (entry.id, &entry.clauses.negative_facts[ix.slot]))
            .filter(|(_, p)| p.arity() == arity)
            .collect()
    }

    pub fn denials(&self) -> Vec<(EntryId, &Denial)> {
        self.active_entries()
            .flat_map(|e| e.clauses.denials.iter().map(move |d| (e.id, d)))
            .collect()
    }

    /// Constants mentioned by active entries, in first-mention order.
    pub fn domain(&self) -> &[Term] {
        &self.domain
    }

    pub fn stats(&self) -> KbStats {
        let mut stats = KbStats {
            entries: self.entries.len(),
            individuals: self.domain.len(),
            ..KbStats::default()
        };
        for e in self.active_entries() {
            stats.active += 1;
            stats.facts += e.clauses.facts.len();
            stats.rules += e.clauses.rules.len();
            stats.negative_facts += e.clauses.negative_facts.len();
            stats.denials += e.clauses.denials.len();
        }
        stats
    }

    /// Individuals available to pronouns and definite descriptions in the
    /// next statement, most recently mentioned last.
    pub fn discourse(&self) -> Discourse {
        let mut individuals: Vec<Individual> = Vec::new();
        for entry in self.active_entries() {
            let mut mentioned: Vec<Term> = entry
                .entities
                .iter()
                .map(|&n| Term::Entity(n))
                .collect();
            for p in entry.grounded.atoms() {
                for arg in &p.args {
                    if matches!(arg, Term::Name(_) | Term::Entity(_)) && !mentioned.contains(arg) {
                        mentioned.push(arg.clone());
                    }
                }
            }
            for term in mentioned {
                let mut individual = match individuals.iter().position(|i| i.term == term) {
                    Some(i) => individuals.remove(i),
                    None => {
                        let (sort, gender) = match &term {
                            Term::Entity(n) => self
                                .entity_info
                                .get(n)
                                .map_or((None, None), |(s, g)| (Some(*s), *g)),
                            _ => (None, None),
                        };
                        Individual {
                            term: term.clone(),
                            sort,
                            gender,
                            nouns: Vec::new(),
                        }
                    }
                };
                for fact in &entry.clauses.facts {
                    if fact.args.len() == 1
                        && fact.args[0] == term
                        && !individual.nouns.contains(&fact.name)
                    {
                        individual.nouns.push(fact.name.clone());
                    }
                }
                individuals.push(individual);
            }
        }
        Discourse { individuals }
    }

    /// Verify the internal indexes agree with the entry log.
    pub fn check_integrity(&self) -> Result<(), KbError> {
        let mut last = 0;
        for (i, entry) in self.entries.iter().enumerate() {
            if entry.id.0 <= last {
                return Err(KbError::Inconsistent(format!(
                    "entry {} out of order",
                    entry.id
                )));
            }
            last = entry.id.0;
            if self.positions.get(&entry.id) != Some(&i) {
                return Err(KbError::Inconsistent(format!(
                    "entry {} missing from position map",
                    entry.id
                )));
            }
            if entry.active && self.by_drs.get(&entry.drs) != Some(&entry.id) {
                return Err(KbError::Inconsistent(format!(
                    "active entry {} missing from duplicate index",
                    entry.id
                )));
            }
            if let Some(fact) = entry.clauses.facts.iter().find(|f| !f.is_ground()) {
                return Err(KbError::Inconsistent(format!(
                    "entry {} has non-ground fact {fact}",
                    entry.id
                )));
            }
        }
        if last >= self.next_id {
            return Err(KbError::Inconsistent(format!(
                "next id {} not past entry {last}",
                self.next_id
            )));
        }
        for id in self.by_drs.values() {
            if !self.entry(*id).is_some_and(|e| e.active) {
                return Err(KbError::Inconsistent(format!(
                    "duplicate index points at inactive entry {id}"
                )));
            }
        }
        Ok(())
    }

    fn rebuild_domain(&mut self) {
        let mut seen = HashSet::new();
        let mut domain = Vec::new();
        for entry in self.entries.iter().filter(|e| e.active) {
            for p in entry.grounded.atoms() {
                for arg in &p.args {
                    if matches!(arg, Term::Name(_) | Term::Entity(_)) && seen.insert(arg.clone()) {
                        domain.push(arg.clone());
                    }
                }
            }
        }
        self.domain = domain;
    }

    fn contradictions(&self, clauses: &ClauseSet, own: EntryId) -> Vec<ContradictionWarning> {
        let mut out = Vec::new();
        for fact in &clauses.facts {
            for (entry, negative) in self.negative_facts(&fact.name, fact.arity()) {
                if entry != own && negative == fact {
                    out.push(ContradictionWarning {
                        conflicts_with: entry,
                        fact: fact.to_string(),
                    });
                }
            }
        }
        for negative in &clauses.negative_facts {
            for candidate in self.candidates(&negative.name, negative.arity()) {
                if let Candidate::Fact { entry, fact } = candidate
                    && entry != own
                    && fact == negative
                {
                    out.push(ContradictionWarning {
                        conflicts_with: entry,
                        fact: fact.to_string(),
                    });
                }
            }
        }
        out
    }
}

/// Read-only view of the knowledge base at one point in time.
#[derive(Clone, Debug)]
pub struct Snapshot {
    state: Arc<KbState>,
}

impl Deref for Snapshot {
    type Target = KbState;

    fn deref(&self) -> &KbState {
        &self.state
    }
}

#[derive(Clone, Debug, Default)]
pub struct KnowledgeBase {
    state: Arc<KbState>,
}

impl KnowledgeBase {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> &KbState {
        &self.state
    }

    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            state: Arc::clone(&self.state),
        }
    }

    /// Add an entry for `drs`. Asserting a box identical to an active entry
    /// returns that entry unchanged.
    pub fn assert(&mut self, drs: DrsBox, provenance: Provenance) -> AssertOutcome {
        if let Some(&id) = self.state.by_drs.get(&drs) {
            tracing::debug!(entry = %id, "duplicate assertion");
            return AssertOutcome {
                id,
                created: false,
                warnings: Vec::new(),
                violations: Vec::new(),
            };
        }
        let id = EntryId(self.state.next_id);
        self.insert(id, drs, provenance, true)
    }

    /// Re-insert an entry from a persisted log under its original id.
    /// Retracted entries are replayed too so entity numbering matches.
    pub fn restore(
        &mut self,
        id: EntryId,
        drs: DrsBox,
        provenance: Provenance,
        active: bool,
    ) -> Result<AssertOutcome, KbError> {
        if id.0 < self.state.next_id {
            return Err(KbError::Inconsistent(format!(
                "entry {id} replayed out of order"
            )));
        }
        if active && self.state.by_drs.contains_key(&drs) {
            return Err(KbError::Inconsistent(format!(
                "entry {id} duplicates an active entry"
            )));
        }
        Ok(self.insert(id, drs, provenance, active))
    }

    fn insert(
        &mut self,
        id: EntryId,
        drs: DrsBox,
        provenance: Provenance,
        active: bool,
    ) -> AssertOutcome {
        let state = Arc::make_mut(&mut self.state);
        let (grounded, assigned) = ground(&drs, &mut state.next_entity);
        for (referent, entity) in &assigned {
            if let Some(r) = drs.universe.iter().find(|r| r.id == *referent) {
                state.entity_info.insert(*entity, (r.sort, r.gender));
            }
        }
        let clauses = clausify(&grounded, id.0);
        let warnings = if active {
            state.contradictions(&clauses, id)
        } else {
            Vec::new()
        };
        for w in &warnings {
            tracing::warn!(entry = %id, "{w}");
        }

        let position = state.entries.len();
        for (slot, fact) in clauses.facts.iter().enumerate() {
            index_push(&mut state.index, fact, id, ClauseKind::Fact, slot);
        }
        for (slot, rule) in clauses.rules.iter().enumerate() {
            index_push(&mut state.index, &rule.head, id, ClauseKind::Rule, slot);
        }
        for (slot, fact) in clauses.negative_facts.iter().enumerate() {
            index_push(&mut state.index, fact, id, ClauseKind::Negative, slot);
        }
        if active {
            state.by_drs.insert(drs.clone(), id);
        }
        tracing::debug!(
            entry = %id,
            facts = clauses.facts.len(),
            rules = clauses.rules.len(),
            active,
            "entry added"
        );
        state.entries.push(Arc::new(Entry {
            id,
            active,
            provenance,
            drs,
            grounded,
            clauses,
            entities: assigned.iter().map(|(_, e)| *e).collect(),
        }));
        state.positions.insert(id, position);
        state.next_id = id.0 + 1;
        if active {
            state.rebuild_domain();
        }

        AssertOutcome {
            id,
            created: true,
            warnings,
            violations: Vec::new(),
        }
    }

    /// Deactivate an entry. Its id is never reused.
    pub fn retract(&mut self, id: EntryId) -> Result<(), KbError> {
        let Some(&position) = self.state.positions.get(&id) else {
            return Err(KbError::NotFound(id));
        };
        if !self.state.entries[position].active {
            return Err(KbError::NotFound(id));
        }
        let state = Arc::make_mut(&mut self.state);
        let mut entry = (*state.entries[position]).clone();
        entry.active = false;
        state.by_drs.remove(&entry.drs);
        state.entries[position] = Arc::new(entry);
        state.rebuild_domain();
        tracing::debug!(entry = %id, "entry retracted");
        Ok(())
    }
}

fn index_push(
    index: &mut HashMap<String, Vec<Indexed>>,
    p: &Predicate,
    entry: EntryId,
    kind: ClauseKind,
    slot: usize,
) {
    index
        .entry(p.name.clone())
        .or_default()
        .push(Indexed { entry, kind, slot });
}

/// A knowledge base shared between threads: many concurrent readers take
/// snapshots, writers are serialized.
#[derive(Debug, Default)]
pub struct SharedKnowledgeBase {
    inner: RwLock<KnowledgeBase>,
}

impl SharedKnowledgeBase {
    pub fn new(kb: KnowledgeBase) -> Self {
        Self {
            inner: RwLock::new(kb),
        }
    }

    pub fn snapshot(&self) -> Snapshot {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .snapshot()
    }

    /// Run `f` with exclusive access. Snapshots taken earlier are unaffected.
    pub fn write<T>(&self, f: impl FnOnce(&mut KnowledgeBase) -> T) -> T {
        let mut kb = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        f(&mut kb)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drs::Compiled;
    use crate::lexicon::Lexicon;
    use crate::semantics::compile;

    fn drs(text: &str, kb: &KnowledgeBase) -> DrsBox {
        let lexicon = Lexicon::builtin().unwrap();
        match compile(text, &lexicon, &kb.state().discourse()).unwrap() {
            Compiled::Assertion(b) => b,
            Compiled::Question(_) => panic!("not an assertion"),
        }
    }

    fn assert_text(kb: &mut KnowledgeBase, text: &str) -> AssertOutcome {
        let b = drs(text, kb);
        kb.assert(b, Provenance::new("test", 0))
    }

    #[test]
    fn test_assert_is_idempotent() {
        let mut kb = KnowledgeBase::new();
        let first = assert_text(&mut kb, "Tom owns a car.");
        let second = assert_text(&mut kb, "Tom owns a car.");
        assert!(first.created);
        assert!(!second.created);
        assert_eq!(first.id, second.id);
        assert_eq!(kb.state().stats().entries, 1);
    }

    #[test]
    fn test_ids_are_never_reused() {
        let mut kb = KnowledgeBase::new();
        let a = assert_text(&mut kb, "Tom walks.");
        kb.retract(a.id).unwrap();
        let b = assert_text(&mut kb, "Tom walks.");
        assert_eq!(a.id, EntryId(1));
        assert_eq!(b.id, EntryId(2));
        assert!(matches!(kb.retract(a.id), Err(KbError::NotFound(_))));
        assert!(matches!(kb.retract(EntryId(99)), Err(KbError::NotFound(_))));
        kb.state().check_integrity().unwrap();
    }

    #[test]
    fn test_candidates_facts_before_rules() {
        let mut kb = KnowledgeBase::new();
        assert_text(&mut kb, "Every student is happy.");
        assert_text(&mut kb, "Tom is happy.");
        let c = kb.state().candidates("happy", 1);
        assert!(matches!(c[0], Candidate::Fact { .. }));
        assert!(matches!(c[1], Candidate::Rule { .. }));
    }

    #[test]
    fn test_snapshot_is_isolated() {
        let mut kb = KnowledgeBase::new();
        let a = assert_text(&mut kb, "Tom walks.");
        let before = kb.snapshot();
        kb.retract(a.id).unwrap();
        assert_text(&mut kb, "Bob walks.");
        assert_eq!(before.candidates("walk", 1).len(), 1);
        assert!(before.entry(a.id).is_some_and(|e| e.active));
        assert_eq!(kb.state().candidates("walk", 1).len(), 1);
    }

    #[test]
    fn test_discourse_carries_entities() {
        let mut kb = KnowledgeBase::new();
        assert_text(&mut kb, "A woman owns a dog.");
        let discourse = kb.state().discourse();
        let woman = &discourse.individuals[0];
        assert_eq!(woman.term, Term::Entity(1));
        assert_eq!(woman.gender, Some(Gender::Feminine));
        assert_eq!(woman.nouns, vec!["woman".to_string()]);
        assert_eq!(drs("She likes it.", &kb).to_string(), "[: like(#1, #2)]");
    }

    #[test]
    fn test_contradiction_is_reported() {
        let mut kb = KnowledgeBase::new();
        let negative = assert_text(&mut kb, "Tom does not walk.");
        let outcome = assert_text(&mut kb, "Tom walks.");
        assert_eq!(outcome.warnings.len(), 1);
        assert_eq!(outcome.warnings[0].conflicts_with, negative.id);
    }

    #[test]
    fn test_restore_reproduces_entities() {
        let mut kb = KnowledgeBase::new();
        let a = assert_text(&mut kb, "A man walks.");
        let b = assert_text(&mut kb, "A dog barks.");
        kb.retract(a.id).unwrap();

        let mut replayed = KnowledgeBase::new();
        for e in kb.state().entries() {
            replayed
                .restore(e.id, e.drs.clone(), e.provenance.clone(), e.active)
                .unwrap();
        }
        let entry = replayed.state().entry(b.id).unwrap();
        assert_eq!(entry.grounded.to_string(), "[: dog(#2), bark(#2)]");
        assert_eq!(replayed.state().domain(), kb.state().domain());
        assert!(
            replayed
                .restore(EntryId(1), DrsBox::new(), Provenance::new("x", 0), true)
                .is_err()
        );
    }
}
