//! Recursive-descent parser for the controlled language.
//!
//! ```text
//! statement  = sentence '.' | question '?'
//! sentence   = 'if' clauses [','] 'then' clauses | clauses
//! clauses    = clause { [','] 'and' clause }              -- 'and' before a noun phrase
//! clause     = np vps
//! vps        = vp { [','] 'and' vp }                      -- 'and' before a verb phrase
//! vp         = 'does' 'not' verb complement
//!            | copula ['not'] copular
//!            | 'has' det relnoun ['of'] np
//!            | verb complement
//! complement = [np] { prep np }
//! copular    = det nbar | adjective | compare np | prep np | np
//! compare    = ('greater' | 'less') 'than' | 'at' ('least' | 'most') | 'equal' 'to'
//! np         = det nbar { "'s" relnoun } | name { "'s" relnoun } | pronoun | number
//! nbar       = { adjective } noun ['of' np] [relative { 'and' relative }]
//! relative   = relpro vps | relpro np gapped
//! gapped     = ['does' 'not'] verb { prep np }
//! question   = 'does' np ['not'] verb complement { 'and' verb complement }
//!            | copula np ['not'] copular
//!            | ('who' | 'what') wh-body
//!            | 'which' nbar wh-body
//!            | 'how' 'many' nbar wh-body
//! wh-body    = 'does' np ['not'] verb { prep np } | vps
//! ```
//!
//! Competing readings are settled by fixed precedence: `of` binds to the
//! nearest relational noun, relative clauses attach to the nearest noun,
//! `and` before a noun phrase starts a new clause, and a word that is both
//! adjective and noun reads as the noun unless another noun or adjective
//! follows. Two readings of the same category that survive these rules are
//! an ambiguity error.

use crate::drs::CompareOp;
use crate::error::{CompileError, Span};
use crate::lexicon::{
    Case, Category, ComparisonWord, Determiner, GrammaticalNumber, Inflection, NameForm,
    NounForm, PronounForm, Punctuation, Reading, RelativePronoun, Slot, VerbForm, WhWord,
};
use crate::syntax::*;
use crate::tokenizer::Token;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    Start,
    Scanning,
    Disambiguating,
    Accepted,
    Rejected,
}

impl From<Determiner> for Quantifier {
    fn from(d: Determiner) -> Self {
        match d {
            Determiner::Indefinite => Quantifier::Indefinite,
            Determiner::Universal => Quantifier::Universal,
            Determiner::Negative => Quantifier::Negative,
            Determiner::Definite => Quantifier::Definite,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Role {
    Subject,
    Object,
}

/// Parse one tokenized statement.
pub fn parse(source: &str, tokens: &[Token]) -> Result<Statement, CompileError> {
    let mut parser = Parser {
        source,
        tokens,
        pos: 0,
        phase: Phase::Start,
    };
    match parser.statement() {
        Ok(statement) => {
            parser.set_phase(Phase::Accepted);
            Ok(statement)
        }
        Err(e) => {
            parser.set_phase(Phase::Rejected);
            Err(e)
        }
    }
}

struct Parser<'a> {
    source: &'a str,
    tokens: &'a [Token],
    pos: usize,
    phase: Phase,
}

// --- Reading accessors ---

fn determiner(tok: &Token) -> Option<Determiner> {
    tok.readings.iter().find_map(|r| match r {
        Reading::Determiner(d) => Some(*d),
        _ => None,
    })
}

fn name(tok: &Token) -> Option<&NameForm> {
    tok.readings.iter().find_map(|r| match r {
        Reading::Name(n) => Some(n),
        _ => None,
    })
}

fn pronoun(tok: &Token) -> Option<&PronounForm> {
    tok.readings.iter().find_map(|r| match r {
        Reading::Pronoun(p) => Some(p),
        _ => None,
    })
}

fn number(tok: &Token) -> Option<i64> {
    tok.readings.iter().find_map(|r| match r {
        Reading::Number(n) => Some(*n),
        _ => None,
    })
}

fn adjective(tok: &Token) -> Option<&String> {
    tok.readings.iter().find_map(|r| match r {
        Reading::Adjective(a) => Some(a),
        _ => None,
    })
}

fn preposition(tok: &Token) -> Option<&'static str> {
    tok.readings.iter().find_map(|r| match r {
        Reading::Preposition(p) => Some(*p),
        _ => None,
    })
}

fn comparison(tok: &Token) -> Option<ComparisonWord> {
    tok.readings.iter().find_map(|r| match r {
        Reading::Comparison(c) => Some(*c),
        _ => None,
    })
}

fn wh(tok: &Token) -> Option<WhWord> {
    tok.readings.iter().find_map(|r| match r {
        Reading::Wh(w) => Some(*w),
        _ => None,
    })
}

fn relative(tok: &Token) -> Option<RelativePronoun> {
    tok.readings.iter().find_map(|r| match r {
        Reading::Relative(p) => Some(*p),
        _ => None,
    })
}

fn auxiliary(tok: &Token) -> Option<GrammaticalNumber> {
    tok.readings.iter().find_map(|r| match r {
        Reading::Auxiliary(n) => Some(*n),
        _ => None,
    })
}

fn copula(tok: &Token) -> Option<GrammaticalNumber> {
    tok.readings.iter().find_map(|r| match r {
        Reading::Copula(n) => Some(*n),
        _ => None,
    })
}

fn starts_np(tok: &Token) -> bool {
    determiner(tok).is_some() || name(tok).is_some() || pronoun(tok).is_some() || number(tok).is_some()
}

fn starts_vp(tok: &Token, subject: GrammaticalNumber) -> bool {
    auxiliary(tok).is_some()
        || copula(tok).is_some()
        || tok
            .readings
            .iter()
            .any(|r| matches!(r, Reading::Verb(v) if v.agrees_with(subject)))
}

fn np_number(np: &NounPhrase) -> GrammaticalNumber {
    match &np.kind {
        NounPhraseKind::Quantified { nbar, .. } => nbar.noun.number,
        _ => GrammaticalNumber::Singular,
    }
}

impl<'a> Parser<'a> {
    fn peek(&self) -> Option<&'a Token> {
        self.tokens.get(self.pos)
    }

    fn peek_at(&self, ahead: usize) -> Option<&'a Token> {
        self.tokens.get(self.pos + ahead)
    }

    fn advance(&mut self) -> Option<&'a Token> {
        let tok = self.tokens.get(self.pos);
        if tok.is_some() {
            self.pos += 1;
        }
        tok
    }

    fn peek_is(&self, reading: &Reading) -> bool {
        self.peek().is_some_and(|t| t.is(reading))
    }

    fn eat(&mut self, reading: &Reading) -> bool {
        if self.peek_is(reading) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn set_phase(&mut self, phase: Phase) {
        if self.phase != phase {
            tracing::trace!(from = ?self.phase, to = ?phase, at = self.pos, "parser phase");
            self.phase = phase;
        }
    }

    fn start(&self) -> usize {
        self.peek()
            .map(|t| t.span.start)
            .unwrap_or(self.source.len())
    }

    fn prev_end(&self) -> usize {
        match self.pos {
            0 => 0,
            p => self.tokens[p - 1].span.end,
        }
    }

    fn span_from(&self, start: usize) -> Span {
        Span::new(start, self.prev_end().max(start))
    }

    fn here(&self) -> Span {
        self.peek()
            .map(|t| t.span)
            .unwrap_or(Span::new(self.source.len(), self.source.len()))
    }

    fn error_here(&self, message: impl Into<String>) -> CompileError {
        CompileError::ungrammatical(self.source, self.here(), message)
    }

    fn expected(&self, slot: Slot) -> CompileError {
        let found = match self.peek() {
            Some(t) => format!("'{}'", t.text),
            None => "end of statement".to_string(),
        };
        self.error_here(format!("expected {}, found {found}", slot.describe()))
    }

    /// Settle a token to a single candidate reading.
    /// Returns `None` when nothing qualifies.
    fn pick<T>(&mut self, tok: &Token, candidates: Vec<(&Reading, T)>) -> Result<Option<T>, CompileError> {
        let mut candidates = candidates;
        match candidates.len() {
            0 => Ok(None),
            1 => Ok(candidates.pop().map(|(_, t)| t)),
            _ => {
                self.set_phase(Phase::Disambiguating);
                let readings = candidates.iter().map(|(r, _)| r.to_string()).collect();
                Err(CompileError::ambiguity(self.source, tok.span, readings))
            }
        }
    }

    fn agree(
        &self,
        tok: &Token,
        form: GrammaticalNumber,
        subject: GrammaticalNumber,
    ) -> Result<(), CompileError> {
        if form == subject {
            Ok(())
        } else {
            Err(CompileError::ungrammatical(
                self.source,
                tok.span,
                format!("'{}' does not agree with a {subject} subject", tok.text),
            ))
        }
    }

    // --- Statements ---

    fn statement(&mut self) -> Result<Statement, CompileError> {
        self.set_phase(Phase::Scanning);
        let Some(last) = self.tokens.last() else {
            return Err(CompileError::ungrammatical(
                self.source,
                Span::new(0, self.source.len()),
                "empty statement",
            ));
        };
        let kind = if last.is_punct(Punctuation::QuestionMark) {
            let q = self.question()?;
            self.terminator(Punctuation::QuestionMark)?;
            StatementKind::Question(q)
        } else if last.is_punct(Punctuation::Period) {
            let s = self.sentence()?;
            self.terminator(Punctuation::Period)?;
            StatementKind::Assertion(s)
        } else {
            return Err(CompileError::ungrammatical(
                self.source,
                last.span,
                "expected '.' or '?' at the end of the statement",
            ));
        };
        let start = self.tokens.first().map(|t| t.span.start).unwrap_or(0);
        Ok(Statement {
            kind,
            span: Span::new(start, last.span.end),
        })
    }

    fn terminator(&mut self, p: Punctuation) -> Result<(), CompileError> {
        if !self.eat(&Reading::Punctuation(p)) || self.peek().is_some() {
            return Err(self.expected(Slot::Terminator));
        }
        Ok(())
    }

    fn sentence(&mut self) -> Result<Sentence, CompileError> {
        if self.peek().is_some_and(|t| !starts_np(t) && !t.is(&Reading::If)) {
            return Err(self.expected(Slot::SentenceStart));
        }
        if self.eat(&Reading::If) {
            let antecedent = self.clauses()?;
            self.eat(&Reading::Punctuation(Punctuation::Comma));
            if !self.eat(&Reading::Then) {
                return Err(self.error_here("expected 'then'"));
            }
            let consequent = self.clauses()?;
            return Ok(Sentence::Conditional {
                antecedent,
                consequent,
            });
        }
        Ok(Sentence::Clauses(self.clauses()?))
    }

    /// Tokens to skip to get past `and` or `, and` at the cursor.
    fn coordinator(&self) -> Option<usize> {
        let comma = Reading::Punctuation(Punctuation::Comma);
        if self.peek_is(&Reading::And) {
            Some(1)
        } else if self.peek_is(&comma) && self.peek_at(1).is_some_and(|t| t.is(&Reading::And)) {
            Some(2)
        } else {
            None
        }
    }

    fn clauses(&mut self) -> Result<Vec<Clause>, CompileError> {
        let mut out = vec![self.clause()?];
        while let Some(skip) = self.coordinator() {
            if !self.peek_at(skip).is_some_and(starts_np) {
                break;
            }
            self.pos += skip;
            out.push(self.clause()?);
        }
        Ok(out)
    }

    fn clause(&mut self) -> Result<Clause, CompileError> {
        let start = self.start();
        let subject = self.noun_phrase(Role::Subject)?;
        let predicates = self.verb_phrases(np_number(&subject))?;
        Ok(Clause {
            subject,
            predicates,
            span: self.span_from(start),
        })
    }

    // --- Verb phrases ---

    fn verb_phrases(&mut self, subject: GrammaticalNumber) -> Result<Vec<VerbPhrase>, CompileError> {
        let mut out = vec![self.verb_phrase(subject)?];
        while let Some(skip) = self.coordinator() {
            let Some(next) = self.peek_at(skip) else { break };
            // A following noun phrase means a new clause, not a shared subject.
            self.set_phase(Phase::Disambiguating);
            let continues = !starts_np(next) && starts_vp(next, subject);
            self.set_phase(Phase::Scanning);
            if !continues {
                break;
            }
            self.pos += skip;
            out.push(self.verb_phrase(subject)?);
        }
        Ok(out)
    }

    fn verb_phrase(&mut self, subject: GrammaticalNumber) -> Result<VerbPhrase, CompileError> {
        let start = self.start();
        let Some(tok) = self.peek() else {
            return Err(self.expected(Slot::VerbPhrase));
        };

        if let Some(form) = auxiliary(tok) {
            self.agree(tok, form, subject)?;
            self.advance();
            if !self.eat(&Reading::Not) {
                return Err(self.error_here("expected 'not' after 'does'"));
            }
            let verb = self.base_verb()?;
            let kind = self.verb_complement(verb)?;
            return Ok(VerbPhrase {
                negated: true,
                kind,
                span: self.span_from(start),
            });
        }

        if let Some(form) = copula(tok) {
            self.agree(tok, form, subject)?;
            self.advance();
            let negated = self.eat(&Reading::Not);
            let copular = self.copular(subject)?;
            return Ok(VerbPhrase {
                negated,
                kind: VerbPhraseKind::Copula(copular),
                span: self.span_from(start),
            });
        }

        let verb = self.finite_verb(subject)?;
        let kind = match self.attribute(&verb)? {
            Some(kind) => kind,
            None => self.verb_complement(verb)?,
        };
        Ok(VerbPhrase {
            negated: false,
            kind,
            span: self.span_from(start),
        })
    }

    fn finite_verb(&mut self, subject: GrammaticalNumber) -> Result<VerbForm, CompileError> {
        let Some(tok) = self.peek() else {
            return Err(self.expected(Slot::VerbPhrase));
        };
        let candidates: Vec<(&Reading, &VerbForm)> = tok
            .readings
            .iter()
            .filter_map(|r| match r {
                Reading::Verb(v) if v.agrees_with(subject) => Some((r, v)),
                _ => None,
            })
            .collect();
        match self.pick(tok, candidates)? {
            Some(v) => {
                let v = v.clone();
                self.advance();
                Ok(v)
            }
            None if tok.has(Category::Verb) => Err(CompileError::ungrammatical(
                self.source,
                tok.span,
                format!("'{}' does not agree with a {subject} subject", tok.text),
            )),
            None => Err(self.expected(Slot::VerbPhrase)),
        }
    }

    fn base_verb(&mut self) -> Result<VerbForm, CompileError> {
        let Some(tok) = self.peek() else {
            return Err(self.expected(Slot::BaseVerb));
        };
        let candidates: Vec<(&Reading, &VerbForm)> = tok
            .readings
            .iter()
            .filter_map(|r| match r {
                Reading::Verb(v) if v.inflection == Inflection::Base => Some((r, v)),
                _ => None,
            })
            .collect();
        match self.pick(tok, candidates)? {
            Some(v) => {
                let v = v.clone();
                self.advance();
                Ok(v)
            }
            None if tok.has(Category::Verb) => Err(CompileError::ungrammatical(
                self.source,
                tok.span,
                format!("expected the base form of '{}' after 'does'", tok.text),
            )),
            None => Err(self.expected(Slot::BaseVerb)),
        }
    }

    fn verb_complement(&mut self, verb: VerbForm) -> Result<VerbPhraseKind, CompileError> {
        use crate::lexicon::Transitivity;
        let object = match verb.transitivity {
            Transitivity::Transitive => Some(self.noun_phrase(Role::Object)?),
            Transitivity::Either if self.peek().is_some_and(starts_np) => {
                Some(self.noun_phrase(Role::Object)?)
            }
            _ => None,
        };
        let pps = self.prep_phrases()?;
        Ok(VerbPhraseKind::Verb { verb, object, pps })
    }

    fn prep_phrases(&mut self) -> Result<Vec<PrepPhrase>, CompileError> {
        let mut pps = Vec::new();
        while let Some(tok) = self.peek() {
            let Some(p) = preposition(tok) else { break };
            if p == "of" {
                break;
            }
            let start = tok.span.start;
            self.advance();
            let object = self.noun_phrase(Role::Object)?;
            pps.push(PrepPhrase {
                preposition: p,
                object,
                span: self.span_from(start),
            });
        }
        Ok(pps)
    }

    /// `has a|the <relational noun> [of] <np>`, after the verb was consumed.
    fn attribute(&mut self, verb: &VerbForm) -> Result<Option<VerbPhraseKind>, CompileError> {
        if verb.lemma != "have" {
            return Ok(None);
        }
        let (Some(det), Some(noun_tok)) = (self.peek(), self.peek_at(1)) else {
            return Ok(None);
        };
        if !matches!(
            determiner(det),
            Some(Determiner::Indefinite | Determiner::Definite)
        ) {
            return Ok(None);
        }
        let relational: Vec<(&Reading, &NounForm)> = noun_tok
            .readings
            .iter()
            .filter_map(|r| match r {
                Reading::Noun(n) if n.relational && n.number == GrammaticalNumber::Singular => {
                    Some((r, n))
                }
                _ => None,
            })
            .collect();
        if relational.is_empty() {
            return Ok(None);
        }
        let value_follows = self
            .peek_at(2)
            .is_some_and(|t| starts_np(t) || t.is(&Reading::Preposition("of")));
        if !value_follows {
            return Ok(None);
        }
        self.set_phase(Phase::Disambiguating);
        let Some(noun) = self.pick(noun_tok, relational)?.cloned() else {
            return Ok(None);
        };
        self.set_phase(Phase::Scanning);
        self.pos += 2;
        self.eat(&Reading::Preposition("of"));
        let value = self.noun_phrase(Role::Object)?;
        Ok(Some(VerbPhraseKind::Attribute { noun, value }))
    }

    fn copular(&mut self, subject: GrammaticalNumber) -> Result<Copular, CompileError> {
        let Some(tok) = self.peek() else {
            return Err(self.expected(Slot::CopulaComplement));
        };

        if determiner(tok) == Some(Determiner::Indefinite) {
            self.agree(tok, GrammaticalNumber::Singular, subject)?;
            self.advance();
            return Ok(Copular::Class(self.nbar(Some(GrammaticalNumber::Singular))?));
        }

        if subject == GrammaticalNumber::Plural
            && determiner(tok).is_none()
            && tok
                .readings
                .iter()
                .any(|r| matches!(r, Reading::Noun(n) if n.number == GrammaticalNumber::Plural))
        {
            return Ok(Copular::Class(self.nbar(Some(GrammaticalNumber::Plural))?));
        }

        if let Some(word) = comparison(tok) {
            let op = match word {
                ComparisonWord::Greater | ComparisonWord::Less => {
                    self.advance();
                    if !self.eat(&Reading::Comparison(ComparisonWord::Than)) {
                        return Err(self.error_here("expected 'than'"));
                    }
                    Some(if word == ComparisonWord::Greater {
                        CompareOp::Gt
                    } else {
                        CompareOp::Lt
                    })
                }
                ComparisonWord::Equal => {
                    self.advance();
                    if !self.eat(&Reading::Preposition("to")) {
                        return Err(self.error_here("expected 'to'"));
                    }
                    Some(CompareOp::Eq)
                }
                ComparisonWord::At => match self.peek_at(1).and_then(comparison) {
                    Some(ComparisonWord::Least) => {
                        self.pos += 2;
                        Some(CompareOp::Ge)
                    }
                    Some(ComparisonWord::Most) => {
                        self.pos += 2;
                        Some(CompareOp::Le)
                    }
                    _ => None,
                },
                _ => return Err(self.expected(Slot::CopulaComplement)),
            };
            if let Some(op) = op {
                let operand = self.noun_phrase(Role::Object)?;
                return Ok(Copular::Comparison { op, operand });
            }
        }

        if let Some(adj) = adjective(tok) {
            let adj = adj.clone();
            self.advance();
            return Ok(Copular::Adjective(adj));
        }

        if let Some(p) = preposition(tok).filter(|p| *p != "of") {
            let start = tok.span.start;
            self.advance();
            let object = self.noun_phrase(Role::Object)?;
            return Ok(Copular::Location(PrepPhrase {
                preposition: p,
                object,
                span: self.span_from(start),
            }));
        }

        if starts_np(tok) {
            let np = self.noun_phrase(Role::Object)?;
            if matches!(
                np.quantifier(),
                Some(Quantifier::Universal | Quantifier::Negative)
            ) {
                return Err(CompileError::ungrammatical(
                    self.source,
                    np.span,
                    "a quantified noun phrase cannot follow 'is'",
                ));
            }
            return Ok(Copular::Identity(np));
        }

        Err(self.expected(Slot::CopulaComplement))
    }

    // --- Noun phrases ---

    fn noun_phrase(&mut self, role: Role) -> Result<NounPhrase, CompileError> {
        let start = self.start();
        let Some(tok) = self.peek() else {
            return Err(self.expected(Slot::NounPhrase));
        };

        let kind = if let Some(det) = determiner(tok) {
            self.advance();
            let nbar = self.nbar(Some(GrammaticalNumber::Singular))?;
            NounPhraseKind::Quantified {
                quantifier: det.into(),
                nbar,
            }
        } else if let Some(n) = name(tok) {
            self.advance();
            NounPhraseKind::Name {
                name: n.name.clone(),
                sort: n.sort,
                gender: n.gender,
            }
        } else if let Some(p) = pronoun(tok) {
            let fits = match (role, p.case) {
                (_, Case::Either) => true,
                (Role::Subject, Case::Subject) => true,
                (Role::Object, Case::Object) => true,
                _ => false,
            };
            if !fits {
                let position = match role {
                    Role::Subject => "subject",
                    Role::Object => "object",
                };
                return Err(CompileError::ungrammatical(
                    self.source,
                    tok.span,
                    format!("'{}' cannot be used as a {position}", tok.text),
                ));
            }
            self.advance();
            NounPhraseKind::Pronoun(p.clone())
        } else if let Some(n) = number(tok) {
            self.advance();
            NounPhraseKind::Number(n)
        } else {
            return Err(self.expected(Slot::NounPhrase));
        };

        let mut np = NounPhrase {
            kind,
            span: self.span_from(start),
        };

        while self.peek_is(&Reading::Possessive) {
            let definite = matches!(
                np.kind,
                NounPhraseKind::Name { .. }
                    | NounPhraseKind::Possessive { .. }
                    | NounPhraseKind::Quantified {
                        quantifier: Quantifier::Definite,
                        ..
                    }
            );
            if !definite {
                return Err(self.error_here("'s needs a name or a definite noun phrase before it"));
            }
            self.advance();
            let Some(tok) = self.peek() else {
                return Err(self.expected(Slot::RelationalNoun));
            };
            let candidates: Vec<(&Reading, &NounForm)> = tok
                .readings
                .iter()
                .filter_map(|r| match r {
                    Reading::Noun(n) if n.relational && n.number == GrammaticalNumber::Singular => {
                        Some((r, n))
                    }
                    _ => None,
                })
                .collect();
            let Some(noun) = self.pick(tok, candidates)?.cloned() else {
                return Err(self.expected(Slot::RelationalNoun));
            };
            self.advance();
            np = NounPhrase {
                kind: NounPhraseKind::Possessive {
                    owner: Box::new(np),
                    noun,
                },
                span: self.span_from(start),
            };
        }
        Ok(np)
    }

    /// `number` restricts the head noun; `None` accepts either.
    fn nbar(&mut self, number: Option<GrammaticalNumber>) -> Result<NBar, CompileError> {
        let start = self.start();
        let mut adjectives = Vec::new();
        while let Some(tok) = self.peek() {
            let Some(adj) = adjective(tok) else { break };
            if tok.has(Category::Noun) {
                self.set_phase(Phase::Disambiguating);
                let modifies = self
                    .peek_at(1)
                    .is_some_and(|t| t.has(Category::Noun) || t.has(Category::Adjective));
                self.set_phase(Phase::Scanning);
                if !modifies {
                    break;
                }
            }
            adjectives.push(adj.clone());
            self.advance();
        }

        let Some(tok) = self.peek() else {
            return Err(self.expected(Slot::NounAfterDeterminer));
        };
        let candidates: Vec<(&Reading, &NounForm)> = tok
            .readings
            .iter()
            .filter_map(|r| match r {
                Reading::Noun(n) if number.is_none_or(|want| n.number == want) => Some((r, n)),
                _ => None,
            })
            .collect();
        let noun = match self.pick(tok, candidates)? {
            Some(n) => n.clone(),
            None if tok.has(Category::Noun) => {
                return Err(CompileError::ungrammatical(
                    self.source,
                    tok.span,
                    format!(
                        "'{}' is not {} here",
                        tok.text,
                        number.unwrap_or(GrammaticalNumber::Singular)
                    ),
                ));
            }
            None => return Err(self.expected(Slot::NounAfterDeterminer)),
        };
        self.advance();

        let mut of = None;
        if self.peek_is(&Reading::Preposition("of")) {
            if !noun.relational {
                return Err(self.error_here(format!(
                    "'{}' does not take an 'of' argument",
                    noun.lemma
                )));
            }
            self.advance();
            let owner = self.noun_phrase(Role::Object)?;
            if matches!(
                owner.quantifier(),
                Some(Quantifier::Universal | Quantifier::Negative)
            ) {
                return Err(CompileError::ungrammatical(
                    self.source,
                    owner.span,
                    "the argument of 'of' cannot be quantified",
                ));
            }
            of = Some(Box::new(owner));
        }

        let mut relatives = Vec::new();
        if self.peek().and_then(relative).is_some() {
            relatives.push(self.relative_clause(noun.number)?);
            while self.peek_is(&Reading::And)
                && self.peek_at(1).and_then(relative).is_some()
            {
                self.advance();
                relatives.push(self.relative_clause(noun.number)?);
            }
        }

        Ok(NBar {
            adjectives,
            noun,
            of,
            relatives,
            span: self.span_from(start),
        })
    }

    fn relative_clause(&mut self, antecedent: GrammaticalNumber) -> Result<RelativeClause, CompileError> {
        let start = self.start();
        let Some(pronoun) = self.advance().and_then(relative) else {
            return Err(self.expected(Slot::RelativeBody));
        };
        let Some(next) = self.peek() else {
            return Err(self.expected(Slot::RelativeBody));
        };
        let body = if starts_np(next) {
            let subject = self.noun_phrase(Role::Subject)?;
            let predicate = self.gapped(np_number(&subject), false)?;
            RelativeBody::Object {
                subject: Box::new(subject),
                predicate,
            }
        } else if starts_vp(next, antecedent) {
            RelativeBody::Subject(self.verb_phrases(antecedent)?)
        } else {
            return Err(self.expected(Slot::RelativeBody));
        };
        Ok(RelativeClause {
            pronoun,
            body,
            span: self.span_from(start),
        })
    }

    /// A verb phrase whose object is the gap. With `after_auxiliary` the
    /// caller has already consumed `does`.
    fn gapped(
        &mut self,
        subject: GrammaticalNumber,
        after_auxiliary: bool,
    ) -> Result<GappedVerbPhrase, CompileError> {
        let start = self.start();
        let (negated, verb) = if after_auxiliary {
            let negated = self.eat(&Reading::Not);
            (negated, self.base_verb()?)
        } else if let Some(tok) = self.peek().filter(|t| auxiliary(t).is_some()) {
            self.agree(tok, GrammaticalNumber::Singular, subject)?;
            self.advance();
            if !self.eat(&Reading::Not) {
                return Err(self.error_here("expected 'not' after 'does'"));
            }
            (true, self.base_verb()?)
        } else {
            (false, self.finite_verb(subject)?)
        };
        if !verb.takes_object() {
            return Err(CompileError::ungrammatical(
                self.source,
                self.span_from(start),
                format!("'{}' takes no object", verb.lemma),
            ));
        }
        let pps = self.prep_phrases()?;
        Ok(GappedVerbPhrase {
            negated,
            verb,
            pps,
            span: self.span_from(start),
        })
    }

    // --- Questions ---

    fn question(&mut self) -> Result<Question, CompileError> {
        let start = self.start();
        let Some(tok) = self.peek() else {
            return Err(self.expected(Slot::QuestionStart));
        };

        if let Some(word) = wh(tok) {
            self.advance();
            let (target, number) = match word {
                WhWord::Who => (WhTarget::Who, GrammaticalNumber::Singular),
                WhWord::What => (WhTarget::What, GrammaticalNumber::Singular),
                WhWord::Which => {
                    let nbar = self.nbar(None)?;
                    let number = nbar.noun.number;
                    (WhTarget::Which(nbar), number)
                }
                WhWord::How => {
                    if !self.eat(&Reading::Wh(WhWord::Many)) {
                        return Err(self.error_here("expected 'many'"));
                    }
                    let nbar = self.nbar(Some(GrammaticalNumber::Plural))?;
                    (WhTarget::HowMany(nbar), GrammaticalNumber::Plural)
                }
                WhWord::Many => return Err(self.expected(Slot::QuestionStart)),
            };
            let body = self.wh_body(number)?;
            return Ok(Question::Wh { target, body });
        }

        if let Some(form) = auxiliary(tok) {
            self.advance();
            let subject = self.noun_phrase(Role::Subject)?;
            self.agree(tok, form, np_number(&subject))?;
            let mut predicates = Vec::new();
            loop {
                let vp_start = self.start();
                let negated = self.eat(&Reading::Not);
                let verb = self.base_verb()?;
                let kind = self.verb_complement(verb)?;
                predicates.push(VerbPhrase {
                    negated,
                    kind,
                    span: self.span_from(vp_start),
                });
                let more = self.coordinator().filter(|skip| {
                    self.peek_at(*skip).is_some_and(|t| {
                        t.is(&Reading::Not)
                            || t.readings.iter().any(|r| {
                                matches!(r, Reading::Verb(v) if v.inflection == Inflection::Base)
                            })
                    })
                });
                match more {
                    Some(skip) => self.pos += skip,
                    None => break,
                }
            }
            return Ok(Question::YesNo(Clause {
                subject,
                predicates,
                span: self.span_from(start),
            }));
        }

        if let Some(form) = copula(tok) {
            self.advance();
            let subject = self.noun_phrase(Role::Subject)?;
            let number = np_number(&subject);
            self.agree(tok, form, number)?;
            let vp_start = self.start();
            let negated = self.eat(&Reading::Not);
            let copular = self.copular(number)?;
            let vp = VerbPhrase {
                negated,
                kind: VerbPhraseKind::Copula(copular),
                span: self.span_from(vp_start),
            };
            return Ok(Question::YesNo(Clause {
                subject,
                predicates: vec![vp],
                span: self.span_from(start),
            }));
        }

        Err(self.expected(Slot::QuestionStart))
    }

    fn wh_body(&mut self, number: GrammaticalNumber) -> Result<WhBody, CompileError> {
        let object_question = self.peek().is_some_and(|t| auxiliary(t).is_some())
            && self.peek_at(1).is_some_and(starts_np);
        if !object_question {
            return Ok(WhBody::Subject(self.verb_phrases(number)?));
        }
        let Some(aux) = self.advance() else {
            return Err(self.expected(Slot::VerbPhrase));
        };
        let subject = self.noun_phrase(Role::Subject)?;
        let subject_number = np_number(&subject);
        if let Some(form) = auxiliary(aux) {
            self.agree(aux, form, subject_number)?;
        }
        let predicate = self.gapped(subject_number, true)?;
        Ok(WhBody::Object { subject, predicate })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CompileErrorKind;
    use crate::lexicon::Lexicon;
    use crate::tokenizer::tokenize;

    fn parse_with(lexicon: &Lexicon, text: &str) -> Result<Statement, CompileError> {
        let tokens = tokenize(text, lexicon)?;
        parse(text, &tokens)
    }

    fn parse_str(text: &str) -> Result<Statement, CompileError> {
        parse_with(&Lexicon::builtin().unwrap(), text)
    }

    fn clauses(s: &Statement) -> &[Clause] {
        match &s.kind {
            StatementKind::Assertion(Sentence::Clauses(cs)) => cs,
            other => panic!("not a plain assertion: {other:?}"),
        }
    }

    #[test]
    fn test_simple_transitive() {
        let s = parse_str("A farmer owns a donkey.").unwrap();
        let cs = clauses(&s);
        assert_eq!(cs.len(), 1);
        assert_eq!(cs[0].subject.quantifier(), Some(Quantifier::Indefinite));
        match &cs[0].predicates[0].kind {
            VerbPhraseKind::Verb { verb, object, .. } => {
                assert_eq!(verb.lemma, "own");
                assert!(object.is_some());
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_conditional() {
        let s = parse_str("If a farmer owns a donkey then he beats it.").unwrap();
        match s.kind {
            StatementKind::Assertion(Sentence::Conditional {
                antecedent,
                consequent,
            }) => {
                assert_eq!(antecedent.len(), 1);
                assert_eq!(consequent.len(), 1);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_and_before_noun_phrase_starts_new_clause() {
        let s = parse_str("Tom walks and Bob talks.").unwrap();
        assert_eq!(clauses(&s).len(), 2);
    }

    #[test]
    fn test_and_before_verb_phrase_coordinates() {
        let s = parse_str("Tom walks and talks.").unwrap();
        let cs = clauses(&s);
        assert_eq!(cs.len(), 1);
        assert_eq!(cs[0].predicates.len(), 2);
    }

    #[test]
    fn test_relative_attaches_to_nearest_noun() {
        let s = parse_str("Tom sees the father of a man who walks.").unwrap();
        let VerbPhraseKind::Verb {
            object: Some(object),
            ..
        } = &clauses(&s)[0].predicates[0].kind
        else {
            panic!("expected object");
        };
        let NounPhraseKind::Quantified { nbar, .. } = &object.kind else {
            panic!("expected quantified");
        };
        assert!(nbar.relatives.is_empty());
        let owner = nbar.of.as_ref().unwrap();
        let NounPhraseKind::Quantified { nbar: inner, .. } = &owner.kind else {
            panic!("expected quantified owner");
        };
        assert_eq!(inner.noun.lemma, "man");
        assert_eq!(inner.relatives.len(), 1);
    }

    #[test]
    fn test_of_requires_relational_noun() {
        let err = parse_str("Tom owns the house of Bob.").unwrap_err();
        assert_eq!(err.kind, CompileErrorKind::Ungrammatical);
        assert_eq!(err.text, "of");
    }

    #[test]
    fn test_attribute() {
        let s = parse_str("Alice has the age 30.").unwrap();
        match &clauses(&s)[0].predicates[0].kind {
            VerbPhraseKind::Attribute { noun, value } => {
                assert_eq!(noun.lemma, "age");
                assert_eq!(value.kind, NounPhraseKind::Number(30));
            }
            other => panic!("unexpected {other:?}"),
        }
        let s = parse_str("Tom has an income of 45000.").unwrap();
        assert!(matches!(
            clauses(&s)[0].predicates[0].kind,
            VerbPhraseKind::Attribute { .. }
        ));
    }

    #[test]
    fn test_have_without_value_is_plain_verb() {
        let s = parse_str("Tom has a father.").unwrap();
        assert!(matches!(
            clauses(&s)[0].predicates[0].kind,
            VerbPhraseKind::Verb { .. }
        ));
    }

    #[test]
    fn test_object_relative() {
        let s = parse_str("Every donkey which a farmer owns is happy.").unwrap();
        let NounPhraseKind::Quantified { nbar, .. } = &clauses(&s)[0].subject.kind else {
            panic!("expected quantified subject");
        };
        assert!(matches!(
            nbar.relatives[0].body,
            RelativeBody::Object { .. }
        ));
    }

    #[test]
    fn test_questions() {
        for q in [
            "Does Tom own a car?",
            "Is Tom a student?",
            "Who owns a donkey?",
            "What does Tom read?",
            "Which students are lazy?",
            "How many books does Tom read?",
            "What is the age of Alice?",
            "Is the age of Alice greater than 20?",
            "Does Tom walk and talk?",
            "Who does not walk?",
        ] {
            let s = parse_str(q).unwrap_or_else(|e| panic!("{q}: {e}"));
            assert!(matches!(s.kind, StatementKind::Question(_)), "{q}");
        }
    }

    #[test]
    fn test_agreement() {
        let err = parse_str("Tom own a car.").unwrap_err();
        assert_eq!(err.kind, CompileErrorKind::Ungrammatical);
        assert_eq!(err.text, "own");
        let err = parse_str("Which students is lazy?").unwrap_err();
        assert_eq!(err.text, "is");
    }

    #[test]
    fn test_pronoun_case() {
        let err = parse_str("Him walks.").unwrap_err();
        assert_eq!(err.kind, CompileErrorKind::Ungrammatical);
        assert_eq!(err.column, 1);
    }

    #[test]
    fn test_missing_terminator() {
        let err = parse_str("Tom walks").unwrap_err();
        assert_eq!(err.kind, CompileErrorKind::Ungrammatical);
        assert!(err.message.contains("'.' or '?'"));
    }

    #[test]
    fn test_word_salad_reports_first_failure() {
        let err = parse_str("Donkey farmer the owns.").unwrap_err();
        assert_eq!(err.kind, CompileErrorKind::Ungrammatical);
        assert_eq!(err.column, 1);
        assert!(err.message.starts_with("expected"));
    }

    #[test]
    fn test_adjective_noun_tie_break() {
        let mut lexicon = Lexicon::builtin().unwrap();
        lexicon
            .extend_from_toml(
                "[[noun]]\nlemma = \"cold\"\nsort = \"thing\"\n\n[[adjective]]\nlemma = \"cold\"\n",
            )
            .unwrap();
        let s = parse_with(&lexicon, "Tom has a cold.").unwrap();
        let VerbPhraseKind::Verb {
            object: Some(object),
            ..
        } = &clauses(&s)[0].predicates[0].kind
        else {
            panic!("expected object");
        };
        let NounPhraseKind::Quantified { nbar, .. } = &object.kind else {
            panic!("expected quantified");
        };
        assert_eq!(nbar.noun.lemma, "cold");
        assert!(nbar.adjectives.is_empty());

        let s = parse_with(&lexicon, "Tom sees a cold dog.").unwrap();
        let VerbPhraseKind::Verb {
            object: Some(object),
            ..
        } = &clauses(&s)[0].predicates[0].kind
        else {
            panic!("expected object");
        };
        let NounPhraseKind::Quantified { nbar, .. } = &object.kind else {
            panic!("expected quantified");
        };
        assert_eq!(nbar.adjectives, vec!["cold".to_string()]);
        assert_eq!(nbar.noun.lemma, "dog");
    }

    #[test]
    fn test_competing_nouns_are_ambiguous() {
        let mut lexicon = Lexicon::builtin().unwrap();
        lexicon
            .extend_from_toml(
                "[[noun]]\nlemma = \"bat\"\nsort = \"thing\"\n\n[[noun]]\nlemma = \"bat\"\nsort = \"person\"\n",
            )
            .unwrap();
        let err = parse_with(&lexicon, "Tom sees a bat.").unwrap_err();
        assert_eq!(err.kind, CompileErrorKind::Ambiguity);
        assert_eq!(err.readings.len(), 2);
        assert_eq!(err.text, "bat");
    }
}
