//! Syntax tree produced by the parser. Nodes carry spans into the statement
//! text so semantic errors can point at the phrase that caused them.

use crate::drs::{CompareOp, Gender, Sort};
use crate::error::Span;
use crate::lexicon::{NounForm, PronounForm, RelativePronoun, VerbForm};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Statement {
    pub kind: StatementKind,
    pub span: Span,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StatementKind {
    Assertion(Sentence),
    Question(Question),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Sentence {
    Clauses(Vec<Clause>),
    Conditional {
        antecedent: Vec<Clause>,
        consequent: Vec<Clause>,
    },
}

/// A subject with one or more coordinated verb phrases.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Clause {
    pub subject: NounPhrase,
    pub predicates: Vec<VerbPhrase>,
    pub span: Span,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Quantifier {
    Indefinite,
    Universal,
    Negative,
    Definite,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NounPhrase {
    pub kind: NounPhraseKind,
    pub span: Span,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum NounPhraseKind {
    Quantified {
        quantifier: Quantifier,
        nbar: NBar,
    },
    Name {
        name: String,
        sort: Sort,
        gender: Option<Gender>,
    },
    Pronoun(PronounForm),
    Number(i64),
    /// `owner's noun`, where the noun is relational.
    Possessive {
        owner: Box<NounPhrase>,
        noun: NounForm,
    },
}

impl NounPhrase {
    pub fn quantifier(&self) -> Option<Quantifier> {
        match &self.kind {
            NounPhraseKind::Quantified { quantifier, .. } => Some(*quantifier),
            _ => None,
        }
    }
}

/// Adjectives, head noun, optional `of` argument and relative clauses.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NBar {
    pub adjectives: Vec<String>,
    pub noun: NounForm,
    pub of: Option<Box<NounPhrase>>,
    pub relatives: Vec<RelativeClause>,
    pub span: Span,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RelativeClause {
    pub pronoun: RelativePronoun,
    pub body: RelativeBody,
    pub span: Span,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RelativeBody {
    /// "who owns a donkey": the modified noun is the subject.
    Subject(Vec<VerbPhrase>),
    /// "which a farmer owns": the modified noun fills the object gap.
    Object {
        subject: Box<NounPhrase>,
        predicate: GappedVerbPhrase,
    },
}

/// A transitive verb phrase missing its direct object.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GappedVerbPhrase {
    pub negated: bool,
    pub verb: VerbForm,
    pub pps: Vec<PrepPhrase>,
    pub span: Span,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VerbPhrase {
    pub negated: bool,
    pub kind: VerbPhraseKind,
    pub span: Span,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum VerbPhraseKind {
    Verb {
        verb: VerbForm,
        object: Option<NounPhrase>,
        pps: Vec<PrepPhrase>,
    },
    /// "has the age 30", "has an income of 45000"
    Attribute { noun: NounForm, value: NounPhrase },
    Copula(Copular),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Copular {
    /// "is a student who ..."
    Class(NBar),
    Adjective(String),
    /// "is the father of Tom", "is 30", "is Bob"
    Identity(NounPhrase),
    Comparison { op: CompareOp, operand: NounPhrase },
    /// "is in Paris"
    Location(PrepPhrase),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PrepPhrase {
    pub preposition: &'static str,
    pub object: NounPhrase,
    pub span: Span,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Question {
    /// "Does Tom own a car?", "Is Tom a student?"
    YesNo(Clause),
    Wh { target: WhTarget, body: WhBody },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum WhTarget {
    Who,
    What,
    Which(NBar),
    HowMany(NBar),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum WhBody {
    /// "Who owns a donkey?"
    Subject(Vec<VerbPhrase>),
    /// "What does Tom read?"
    Object {
        subject: NounPhrase,
        predicate: GappedVerbPhrase,
    },
}
