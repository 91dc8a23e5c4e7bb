//! The operation surface front ends talk to: assert, retract, query, explain.

use std::sync::Arc;

use rayon::prelude::*;

use crate::answer::{Answer, Explanation, explain};
use crate::config::EngineConfig;
use crate::drs::Compiled;
use crate::engine::{CancelToken, answer, violated_denials};
use crate::error::{CompileError, KbError, SessionError};
use crate::kb::{
    AssertOutcome, EntryId, KbStats, KnowledgeBase, Provenance, SharedKnowledgeBase, Snapshot,
};
use crate::lexicon::Lexicon;
use crate::semantics::{Discourse, compile};
use crate::tokenizer::split_statements;
use crate::wire::{LogRecord, log_of, replay};

pub struct Session {
    lexicon: Arc<Lexicon>,
    kb: SharedKnowledgeBase,
    config: EngineConfig,
}

impl Session {
    pub fn new(lexicon: Lexicon, config: EngineConfig) -> Self {
        Self::with_kb(lexicon, config, KnowledgeBase::new())
    }

    pub fn with_kb(lexicon: Lexicon, config: EngineConfig, kb: KnowledgeBase) -> Self {
        Self {
            lexicon: Arc::new(lexicon),
            kb: SharedKnowledgeBase::new(kb),
            config,
        }
    }

    pub fn lexicon(&self) -> &Lexicon {
        &self.lexicon
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn snapshot(&self) -> Snapshot {
        self.kb.snapshot()
    }

    /// Compile every statement of `text` against the current discourse
    /// without changing anything. Statements do not see each other.
    pub fn compile(&self, text: &str) -> Result<Vec<Compiled>, SessionError> {
        let discourse = self.kb.snapshot().discourse();
        split_statements(text)
            .into_iter()
            .enumerate()
            .map(|(index, (offset, stmt))| {
                compile_at(stmt, text, offset, &self.lexicon, &discourse)
                    .map_err(|error| SessionError::Compile { index, error })
            })
            .collect()
    }

    /// Assert each statement of `text` in order, each compiled against the
    /// discourse left by the ones before it. A failing statement stops the
    /// run; statements before it stay asserted.
    pub fn assert(&self, text: &str, source: &str) -> Result<Vec<AssertOutcome>, SessionError> {
        let mut outcomes = Vec::new();
        for (index, (offset, stmt)) in split_statements(text).into_iter().enumerate() {
            let outcome = self.kb.write(|kb| {
                let discourse = kb.state().discourse();
                let compiled = compile_at(stmt, text, offset, &self.lexicon, &discourse)
                    .map_err(|error| SessionError::Compile { index, error })?;
                let Compiled::Assertion(drs) = compiled else {
                    return Err(SessionError::NotAnAssertion { index });
                };
                let provenance = Provenance::new(source, index).with_text(stmt, offset);
                Ok(kb.assert(drs, provenance))
            })?;
            outcomes.push(self.check_denials(outcome)?);
        }
        tracing::debug!(source, statements = outcomes.len(), "asserted");
        Ok(outcomes)
    }

    /// Assert many independent texts: compile in parallel against one
    /// snapshot, then commit in order. Pronouns and definites can only
    /// refer to what was asserted before the batch.
    pub fn assert_batch(
        &self,
        texts: &[(String, String)],
    ) -> Result<Vec<AssertOutcome>, SessionError> {
        let mut statements = Vec::new();
        for (source, text) in texts {
            for (position, (offset, stmt)) in split_statements(text).into_iter().enumerate() {
                statements.push((source.as_str(), text.as_str(), position, offset, stmt));
            }
        }
        let discourse = self.kb.snapshot().discourse();
        let compiled: Vec<Result<Compiled, CompileError>> = statements
            .par_iter()
            .map(|(_, text, _, offset, stmt)| {
                compile_at(stmt, text, *offset, &self.lexicon, &discourse)
            })
            .collect();

        let mut outcomes = Vec::with_capacity(compiled.len());
        for (index, (result, (source, _, position, offset, stmt))) in
            compiled.into_iter().zip(&statements).enumerate()
        {
            let compiled = result.map_err(|error| SessionError::Compile { index, error })?;
            let Compiled::Assertion(drs) = compiled else {
                return Err(SessionError::NotAnAssertion { index });
            };
            let provenance = Provenance::new(*source, *position).with_text(*stmt, *offset);
            let outcome = self.kb.write(|kb| kb.assert(drs, provenance));
            outcomes.push(self.check_denials(outcome)?);
        }
        tracing::debug!(
            texts = texts.len(),
            statements = outcomes.len(),
            "batch asserted"
        );
        Ok(outcomes)
    }

    /// Record which denials the new entry breaks. Violations that do not
    /// involve the new entry were reported when they arose.
    fn check_denials(&self, mut outcome: AssertOutcome) -> Result<AssertOutcome, SessionError> {
        if !outcome.created {
            return Ok(outcome);
        }
        let snapshot = self.kb.snapshot();
        let budget = self.config.budget();
        for (denial, proof) in violated_denials(&snapshot, &budget, &CancelToken::new())? {
            let involved = denial == outcome.id
                || proof
                    .steps
                    .iter()
                    .any(|s| s.justification.entry() == Some(outcome.id));
            if involved {
                outcome.violations.push(denial);
            }
        }
        Ok(outcome)
    }

    pub fn retract(&self, id: EntryId) -> Result<(), SessionError> {
        self.kb.write(|kb| kb.retract(id))?;
        Ok(())
    }

    pub fn query(&self, text: &str) -> Result<Answer, SessionError> {
        self.query_with(text, &CancelToken::new())
    }

    /// Answer a question, giving up with `Cancelled` once `cancel` fires.
    pub fn query_with(&self, text: &str, cancel: &CancelToken) -> Result<Answer, SessionError> {
        let snapshot = self.kb.snapshot();
        let trimmed = text.trim();
        let offset = text.len() - text.trim_start().len();
        let compiled = compile_at(trimmed, text, offset, &self.lexicon, &snapshot.discourse())
            .map_err(|error| SessionError::Compile { index: 0, error })?;
        let Compiled::Question(query) = compiled else {
            return Err(SessionError::NotAQuestion);
        };
        Ok(answer(&snapshot, &query, &self.config.budget(), cancel)?)
    }

    pub fn explain(&self, answer: &Answer) -> Explanation {
        explain(answer, &self.kb.snapshot())
    }

    pub fn stats(&self) -> KbStats {
        self.kb.snapshot().stats()
    }

    /// Entries in id order; retracted ones only when `all` is set.
    pub fn entries(&self, all: bool) -> Vec<LogRecord> {
        let mut log = self.log();
        if !all {
            log.retain(|r| r.active);
        }
        log
    }

    /// The persisted form of the knowledge base.
    pub fn log(&self) -> Vec<LogRecord> {
        log_of(&self.kb.snapshot())
    }

    /// Replace the knowledge base with the replay of `log`.
    pub fn replay(&self, log: &[LogRecord]) -> Result<(), SessionError> {
        let rebuilt = replay(log)?;
        self.kb.write(|kb| *kb = rebuilt);
        Ok(())
    }

    pub fn check_integrity(&self) -> Result<(), KbError> {
        self.kb.snapshot().check_integrity()
    }
}

fn compile_at(
    stmt: &str,
    document: &str,
    offset: usize,
    lexicon: &Lexicon,
    discourse: &Discourse,
) -> Result<Compiled, CompileError> {
    compile(stmt, lexicon, discourse).map_err(|e| e.relocate(document, offset))
}
