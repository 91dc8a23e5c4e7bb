//! Controlled-language knowledge base.
//!
//! Sentences in a small fragment of English are tokenized, parsed and
//! compiled into discourse representation structures (boxes). Assertions
//! accumulate in a knowledge base as facts and rules; questions are
//! answered by bounded backward chaining under negation as failure, and
//! every answer carries the proof that produced it.
//!
//! Zero I/O. Persistence and transport live in other crates.

pub mod answer;
pub mod clauses;
pub mod config;
pub mod drs;
pub mod engine;
pub mod error;
pub mod kb;
pub mod lexicon;
pub mod parser;
pub mod semantics;
pub mod session;
pub mod syntax;
pub mod tokenizer;
pub mod wire;

pub use answer::{
    Answer, AnswerKind, Binding, Explanation, Justification, Proof, TraceStep, explain,
};
pub use config::{EngineConfig, build_lexicon};
pub use drs::{
    AnswerShape, CompareOp, Compiled, Condition, DrsBox, Gender, Predicate, Query, Referent,
    ReferentId, Sort, Term,
};
pub use engine::{CancelToken, InferenceBudget, answer};
pub use error::{
    CompileError, CompileErrorKind, ConfigError, InferenceError, KbError, LexiconError,
    SessionError, Span, TimeoutReason,
};
pub use kb::{
    AssertOutcome, ContradictionWarning, EntryId, KbStats, KnowledgeBase, Provenance,
    SharedKnowledgeBase, Snapshot,
};
pub use lexicon::Lexicon;
pub use semantics::{Discourse, compile};
pub use session::Session;
pub use tokenizer::{split_statements, tokenize};
pub use wire::{CURRENT_VERSION, LogRecord, export_json, import_json, replay};
