use std::fmt;

use serde::{Deserialize, Serialize};

use crate::kb::EntryId;

/// Byte range into the statement text a token or phrase came from.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

impl Span {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    /// Smallest span covering both.
    pub fn to(self, other: Span) -> Span {
        Span {
            start: self.start.min(other.start),
            end: self.end.max(other.end),
        }
    }

    /// 1-based character column of the span start within `source`.
    pub fn column(&self, source: &str) -> usize {
        let start = self.start.min(source.len());
        source
            .get(..start)
            .map(|prefix| prefix.chars().count())
            .unwrap_or(start)
            + 1
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CompileErrorKind {
    Lexical,
    Ungrammatical,
    Ambiguity,
    Semantic,
}

impl CompileErrorKind {
    pub fn name(self) -> &'static str {
        match self {
            CompileErrorKind::Lexical => "LexicalError",
            CompileErrorKind::Ungrammatical => "UngrammaticalError",
            CompileErrorKind::Ambiguity => "AmbiguityError",
            CompileErrorKind::Semantic => "SemanticError",
        }
    }
}

/// Why a statement could not be compiled.
///
/// Carries the offending text and its position so callers can point at it.
/// For ambiguities, `readings` lists the competing interpretations.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompileError {
    pub kind: CompileErrorKind,
    pub span: Span,
    pub column: usize,
    pub text: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub readings: Vec<String>,
}

impl CompileError {
    pub fn new(
        kind: CompileErrorKind,
        source: &str,
        span: Span,
        message: impl Into<String>,
    ) -> Self {
        let text = source
            .get(span.start..span.end)
            .unwrap_or_default()
            .to_string();
        Self {
            kind,
            column: span.column(source),
            span,
            text,
            message: message.into(),
            readings: Vec::new(),
        }
    }

    pub fn lexical(source: &str, span: Span, message: impl Into<String>) -> Self {
        Self::new(CompileErrorKind::Lexical, source, span, message)
    }

    pub fn ungrammatical(source: &str, span: Span, message: impl Into<String>) -> Self {
        Self::new(CompileErrorKind::Ungrammatical, source, span, message)
    }

    pub fn semantic(source: &str, span: Span, message: impl Into<String>) -> Self {
        Self::new(CompileErrorKind::Semantic, source, span, message)
    }

    pub fn ambiguity(source: &str, span: Span, readings: Vec<String>) -> Self {
        let mut e = Self::new(
            CompileErrorKind::Ambiguity,
            source,
            span,
            "more than one reading applies",
        );
        e.readings = readings;
        e
    }

    /// Shift the span by `offset` bytes and recompute the column against
    /// the enclosing document.
    pub fn relocate(mut self, document: &str, offset: usize) -> Self {
        self.span = Span::new(self.span.start + offset, self.span.end + offset);
        self.column = self.span.column(document);
        self
    }
}

impl fmt::Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} at column {}: {}",
            self.kind.name(),
            self.column,
            self.message
        )?;
        if !self.text.is_empty() {
            write!(f, " ('{}')", self.text)?;
        }
        if !self.readings.is_empty() {
            write!(f, "; readings: {}", self.readings.join(" | "))?;
        }
        Ok(())
    }
}

impl std::error::Error for CompileError {}

#[derive(Debug)]
pub enum LexiconError {
    Parse(toml::de::Error),
    Invalid(String),
}

impl fmt::Display for LexiconError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LexiconError::Parse(e) => write!(f, "lexicon parse error: {e}"),
            LexiconError::Invalid(msg) => write!(f, "invalid lexicon entry: {msg}"),
        }
    }
}

impl std::error::Error for LexiconError {}

impl From<toml::de::Error> for LexiconError {
    fn from(e: toml::de::Error) -> Self {
        LexiconError::Parse(e)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KbError {
    NotFound(EntryId),
    /// The log or the in-memory state violates a structural invariant.
    Inconsistent(String),
}

impl fmt::Display for KbError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KbError::NotFound(id) => write!(f, "no active entry {id}"),
            KbError::Inconsistent(msg) => write!(f, "knowledge base inconsistent: {msg}"),
        }
    }
}

impl std::error::Error for KbError {}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeoutReason {
    Steps,
    Deadline,
    Depth,
    TermDepth,
    Rounds,
    Floundered,
}

impl TimeoutReason {
    pub fn describe(self) -> &'static str {
        match self {
            TimeoutReason::Steps => "step budget exhausted",
            TimeoutReason::Deadline => "wall-clock deadline passed",
            TimeoutReason::Depth => "derivation depth limit reached",
            TimeoutReason::TermDepth => "term nesting limit reached",
            TimeoutReason::Rounds => "fixpoint not reached within the round limit",
            TimeoutReason::Floundered => "a negated goal never became ground",
        }
    }
}

/// Inference could not settle the question within its budget.
/// Never reported as a "no".
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InferenceError {
    Timeout { reason: TimeoutReason, steps: u64 },
    Cancelled,
}

impl fmt::Display for InferenceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InferenceError::Timeout { reason, steps } => {
                write!(f, "inference timed out after {steps} steps: {}", reason.describe())
            }
            InferenceError::Cancelled => write!(f, "inference cancelled"),
        }
    }
}

impl std::error::Error for InferenceError {}

#[derive(Debug)]
pub enum ConfigError {
    Parse(toml::de::Error),
    Lexicon(LexiconError),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Parse(e) => write!(f, "config parse error: {e}"),
            ConfigError::Lexicon(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<toml::de::Error> for ConfigError {
    fn from(e: toml::de::Error) -> Self {
        ConfigError::Parse(e)
    }
}

impl From<LexiconError> for ConfigError {
    fn from(e: LexiconError) -> Self {
        ConfigError::Lexicon(e)
    }
}

/// Errors surfaced by [`crate::Session`].
#[derive(Debug)]
pub enum SessionError {
    /// Statement `index` (0-based, in submission order) failed to compile.
    Compile { index: usize, error: CompileError },
    NotAnAssertion { index: usize },
    NotAQuestion,
    Kb(KbError),
    Inference(InferenceError),
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionError::Compile { index, error } => {
                write!(f, "statement {}: {error}", index + 1)
            }
            SessionError::NotAnAssertion { index } => {
                write!(f, "statement {} is a question, not an assertion", index + 1)
            }
            SessionError::NotAQuestion => write!(f, "expected a question"),
            SessionError::Kb(e) => write!(f, "{e}"),
            SessionError::Inference(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for SessionError {}

impl From<KbError> for SessionError {
    fn from(e: KbError) -> Self {
        SessionError::Kb(e)
    }
}

impl From<InferenceError> for SessionError {
    fn from(e: InferenceError) -> Self {
        SessionError::Inference(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_column_counts_characters() {
        let src = "Zoë walks quickly.";
        // "quickly" starts after a two-byte character
        let start = src.find("quickly").unwrap();
        assert_eq!(Span::new(start, start + 7).column(src), 11);
    }

    #[test]
    fn test_display_names_kind_and_text() {
        let src = "Frobnicate walks.";
        let e = CompileError::lexical(src, Span::new(0, 10), "unknown word");
        assert_eq!(
            e.to_string(),
            "LexicalError at column 1: unknown word ('Frobnicate')"
        );
    }

    #[test]
    fn test_relocate() {
        let doc = "Tom walks. Frobnicate talks.";
        let e = CompileError::lexical("Frobnicate talks.", Span::new(0, 10), "unknown word")
            .relocate(doc, 11);
        assert_eq!(e.span, Span::new(11, 21));
        assert_eq!(e.column, 12);
    }
}
