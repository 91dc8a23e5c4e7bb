//! Answers, proofs and their human-readable explanation.

use std::fmt;

use serde::Serialize;

use crate::drs::Term;
use crate::kb::{EntryId, KbState, Provenance};

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum AnswerKind {
    Boolean(bool),
    Bindings(Vec<Binding>),
    Count(usize),
}

/// One ground value per question target.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize)]
pub struct Binding {
    pub values: Vec<Term>,
}

impl fmt::Display for Binding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, v) in self.values.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{v}")?;
        }
        Ok(())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "by", content = "entry", rename_all = "snake_case")]
pub enum Justification {
    Fact(EntryId),
    Rule(EntryId),
    /// An answer found earlier for a recursive call.
    Tabled,
    Builtin,
    NegationAsFailure,
    /// Closed by an explicit negative statement.
    Denied(EntryId),
}

impl Justification {
    pub fn entry(self) -> Option<EntryId> {
        match self {
            Justification::Fact(e) | Justification::Rule(e) | Justification::Denied(e) => Some(e),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct TraceStep {
    pub depth: usize,
    pub goal: String,
    pub justification: Justification,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct Proof {
    pub steps: Vec<TraceStep>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Answer {
    pub kind: AnswerKind,
    pub proofs: Vec<Proof>,
}

impl Answer {
    /// Entries cited by any proof, in first-use order.
    pub fn cited(&self) -> Vec<EntryId> {
        let mut out = Vec::new();
        for step in self.proofs.iter().flat_map(|p| &p.steps) {
            if let Some(e) = step.justification.entry()
                && !out.contains(&e)
            {
                out.push(e);
            }
        }
        out
    }
}

impl fmt::Display for Answer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            AnswerKind::Boolean(true) => write!(f, "yes"),
            AnswerKind::Boolean(false) => write!(f, "no"),
            AnswerKind::Bindings(b) if b.is_empty() => write!(f, "none"),
            AnswerKind::Bindings(b) => {
                for (i, binding) in b.iter().enumerate() {
                    if i > 0 {
                        write!(f, "; ")?;
                    }
                    write!(f, "{binding}")?;
                }
                Ok(())
            }
            AnswerKind::Count(n) => write!(f, "{n}"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ExplainedStep {
    pub depth: usize,
    pub goal: String,
    pub reason: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entry: Option<EntryId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provenance: Option<Provenance>,
    /// The sentence the entry was asserted from, or its DRS when the
    /// sentence was not recorded.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub statement: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct Explanation {
    pub proofs: Vec<Vec<ExplainedStep>>,
}

impl fmt::Display for Explanation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.proofs.is_empty() {
            return writeln!(f, "no proof");
        }
        for (i, proof) in self.proofs.iter().enumerate() {
            writeln!(f, "proof {}:", i + 1)?;
            for step in proof {
                write!(f, "{:indent$}{}  [{}", "", step.goal, step.reason, indent = 2 + step.depth * 2)?;
                if let Some(p) = &step.provenance {
                    write!(f, " at {p}")?;
                }
                writeln!(f, "]")?;
                if let Some(s) = &step.statement {
                    writeln!(f, "{:indent$}{s}", "", indent = 4 + step.depth * 2)?;
                }
            }
        }
        Ok(())
    }
}

/// Render the proofs of `answer` with the provenance of every entry they cite.
/// Entries retracted since the answer was computed are still described.
pub fn explain(answer: &Answer, kb: &KbState) -> Explanation {
    let proofs = answer
        .proofs
        .iter()
        .map(|proof| {
            proof
                .steps
                .iter()
                .map(|step| {
                    let entry = step.justification.entry().and_then(|id| kb.entry(id));
                    let reason = match step.justification {
                        Justification::Fact(id) => format!("fact from entry {id}"),
                        Justification::Rule(id) => format!("rule from entry {id}"),
                        Justification::Denied(id) => format!("denied by entry {id}"),
                        Justification::Tabled => "answer of an enclosing call".to_string(),
                        Justification::Builtin => "comparison".to_string(),
                        Justification::NegationAsFailure => "not provable".to_string(),
                    };
                    ExplainedStep {
                        depth: step.depth,
                        goal: step.goal.clone(),
                        reason,
                        entry: step.justification.entry(),
                        provenance: entry.map(|e| e.provenance.clone()),
                        statement: entry.map(|e| {
                            if e.provenance.text.is_empty() {
                                e.drs.to_string()
                            } else {
                                e.provenance.text.clone()
                            }
                        }),
                    }
                })
                .collect()
        })
        .collect();
    Explanation { proofs }
}
