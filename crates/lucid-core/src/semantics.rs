//! Syntax tree → DRS.
//!
//! Noun phrases are interpreted with an explicit continuation: the caller
//! passes what to do with the noun phrase's referent, and the quantifier
//! decides which box that happens in. `every` runs the continuation inside
//! an implication consequent, `no` inside a negation, and indefinites and
//! names run it in place. Accessibility for pronouns and definites is a
//! stack of frames mirroring that box nesting; frames are popped when the
//! box closes, so referents introduced under negation or in a consequent
//! are invisible afterwards.

use std::collections::HashMap;

use crate::drs::{
    AnswerShape, CompareOp, Compiled, Condition, DrsBox, Gender, Query, Referent, ReferentId,
    Sort, Term,
};
use crate::error::{CompileError, Span};
use crate::lexicon::{Lexicon, PronounForm, VerbForm};
use crate::parser::parse;
use crate::syntax::*;
use crate::tokenizer::tokenize;

/// An individual established by earlier assertions.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Individual {
    pub term: Term,
    /// `None` for names; the lexicon supplies their sort.
    pub sort: Option<Sort>,
    pub gender: Option<Gender>,
    /// Nouns the individual was described by, for definite descriptions.
    pub nouns: Vec<String>,
}

/// Individuals available to pronouns and definites, least recent first.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Discourse {
    pub individuals: Vec<Individual>,
}

/// Compile a single statement against the lexicon and discourse context.
pub fn compile(
    text: &str,
    lexicon: &Lexicon,
    discourse: &Discourse,
) -> Result<Compiled, CompileError> {
    let tokens = tokenize(text, lexicon)?;
    let statement = parse(text, &tokens)?;
    construct(&statement, text, lexicon, discourse)
}

/// Build the DRS for a parsed statement.
pub fn construct(
    statement: &Statement,
    source: &str,
    lexicon: &Lexicon,
    discourse: &Discourse,
) -> Result<Compiled, CompileError> {
    let mut c = Constructor {
        source,
        lexicon,
        scopes: ScopeChain::new(discourse, lexicon),
        next_ref: 0,
        aliases: HashMap::new(),
        clause_subject: None,
        wh_target: None,
    };
    let compiled = match &statement.kind {
        StatementKind::Assertion(sentence) => {
            let mut drs = c.assertion(sentence)?;
            drs.substitute(&c.resolved_aliases());
            check_assertion(&drs, source, statement.span)?;
            Compiled::Assertion(drs)
        }
        StatementKind::Question(question) => {
            let mut query = c.question(question)?;
            let aliases = c.resolved_aliases();
            query.goal.substitute(&aliases);
            for t in &mut query.targets {
                if let Some(to) = t.as_ref_id().and_then(|r| aliases.get(&r)) {
                    *t = to.clone();
                }
            }
            Compiled::Question(query)
        }
    };
    tracing::debug!(drs = %compiled, "constructed");
    Ok(compiled)
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum FrameKind {
    Discourse,
    Sentence,
    Antecedent,
    Consequent,
    Negation,
}

#[derive(Clone, Debug)]
struct Accessible {
    term: Term,
    sort: Option<Sort>,
    gender: Option<Gender>,
    nouns: Vec<String>,
}

#[derive(Debug)]
struct Frame {
    kind: FrameKind,
    entries: Vec<Accessible>,
}

/// Innermost frame last. Frame 0 holds the discourse, frame 1 the
/// sentence's top box.
#[derive(Debug)]
struct ScopeChain {
    frames: Vec<Frame>,
}

impl ScopeChain {
    fn new(discourse: &Discourse, lexicon: &Lexicon) -> Self {
        let entries = discourse
            .individuals
            .iter()
            .map(|ind| {
                let name = match &ind.term {
                    Term::Name(n) => lexicon.name(n),
                    _ => None,
                };
                Accessible {
                    term: ind.term.clone(),
                    sort: ind.sort.or(name.map(|n| n.sort)),
                    gender: ind.gender.or(name.and_then(|n| n.gender)),
                    nouns: ind.nouns.clone(),
                }
            })
            .collect();
        Self {
            frames: vec![
                Frame {
                    kind: FrameKind::Discourse,
                    entries,
                },
                Frame {
                    kind: FrameKind::Sentence,
                    entries: Vec::new(),
                },
            ],
        }
    }

    fn push(&mut self, kind: FrameKind) {
        self.frames.push(Frame {
            kind,
            entries: Vec::new(),
        });
    }

    fn pop(&mut self) {
        if self.frames.len() > 2
            && let Some(frame) = self.frames.pop()
        {
            tracing::trace!(kind = ?frame.kind, hidden = frame.entries.len(), "scope closed");
        }
    }

    fn introduce(&mut self, entry: Accessible) {
        if let Some(top) = self.frames.last_mut() {
            top.entries.push(entry);
        }
    }

    /// Names are accessible everywhere after their first mention, so they
    /// live in the sentence frame whatever box mentions them.
    fn introduce_name(&mut self, entry: Accessible) {
        let frame = &mut self.frames[1];
        frame.entries.retain(|e| e.term != entry.term);
        frame.entries.push(entry);
    }

    fn note_noun(&mut self, term: &Term, noun: &str) {
        if let Some(e) = self.nearest_mut(term)
            && !e.nouns.iter().any(|n| n == noun)
        {
            e.nouns.push(noun.to_string());
        }
    }

    fn nearest(&self) -> impl Iterator<Item = &Accessible> {
        self.frames.iter().rev().flat_map(|f| f.entries.iter().rev())
    }

    fn nearest_mut(&mut self, term: &Term) -> Option<&mut Accessible> {
        self.frames
            .iter_mut()
            .rev()
            .flat_map(|f| f.entries.iter_mut().rev())
            .find(|e| &e.term == term)
    }

    fn find(&self, term: &Term) -> Option<&Accessible> {
        self.nearest().find(|e| &e.term == term)
    }

    fn resolve_definite(&self, noun: &str) -> Option<Term> {
        self.nearest()
            .find(|e| e.nouns.iter().any(|n| n == noun))
            .map(|e| e.term.clone())
    }

    fn resolve_pronoun(&self, pronoun: &PronounForm, exclude: Option<&Term>) -> Option<Term> {
        self.nearest()
            .filter(|e| Some(&e.term) != exclude)
            .find(|e| e.sort.is_some_and(|s| pronoun.admits(s, e.gender)))
            .map(|e| e.term.clone())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Role {
    Subject,
    Object,
}

type Continuation<'k, 'a> =
    &'k mut dyn FnMut(&mut Constructor<'a>, &mut DrsBox, Term) -> Result<(), CompileError>;
type ArgsContinuation<'k, 'a> =
    &'k mut dyn FnMut(&mut Constructor<'a>, &mut DrsBox, &[Term]) -> Result<(), CompileError>;

struct Constructor<'a> {
    source: &'a str,
    lexicon: &'a Lexicon,
    scopes: ScopeChain,
    next_ref: u32,
    aliases: HashMap<ReferentId, Term>,
    clause_subject: Option<Term>,
    wh_target: Option<ReferentId>,
}

fn predicate_name(lemma: &str, pps: &[PrepPhrase]) -> String {
    let mut name = lemma.to_string();
    for pp in pps {
        name.push('_');
        name.push_str(pp.preposition);
    }
    name
}

impl<'a> Constructor<'a> {
    fn error(&self, span: Span, message: impl Into<String>) -> CompileError {
        CompileError::semantic(self.source, span, message)
    }

    fn fresh(&mut self, sort: Sort, gender: Option<Gender>) -> (Referent, Term) {
        let id = ReferentId(self.next_ref);
        self.next_ref += 1;
        (Referent { id, sort, gender }, Term::Ref(id))
    }

    /// Declare a new referent in `drs` and make it accessible.
    fn introduce(
        &mut self,
        drs: &mut DrsBox,
        sort: Sort,
        gender: Option<Gender>,
        noun: Option<&str>,
    ) -> Term {
        let (referent, term) = self.fresh(sort, gender);
        drs.universe.push(referent);
        self.scopes.introduce(Accessible {
            term: term.clone(),
            sort: Some(sort),
            gender,
            nouns: noun.map(|n| vec![n.to_string()]).unwrap_or_default(),
        });
        term
    }

    fn is_wh(&self, term: &Term) -> bool {
        matches!((term, self.wh_target), (Term::Ref(r), Some(w)) if *r == w)
    }

    fn sort_of(&self, term: &Term) -> Option<Sort> {
        match term {
            Term::Number(_) => Some(Sort::Number),
            _ if self.is_wh(term) => None,
            Term::Name(n) => self
                .scopes
                .find(term)
                .and_then(|e| e.sort)
                .or_else(|| self.lexicon.name(n).map(|f| f.sort)),
            _ => self.scopes.find(term).and_then(|e| e.sort),
        }
    }

    fn check_sort(&self, term: &Term, expected: Sort, span: Span) -> Result<(), CompileError> {
        match self.sort_of(term) {
            Some(actual) if !actual.compatible(expected) => Err(self.error(
                span,
                format!(
                    "expected a {} here, but '{}' is a {}",
                    expected.name(),
                    self.source.get(span.start..span.end).unwrap_or_default(),
                    actual.name()
                ),
            )),
            _ => Ok(()),
        }
    }

    fn check_subject(&self, verb: &VerbForm, subject: &Term, span: Span) -> Result<(), CompileError> {
        if self.sort_of(subject) == Some(Sort::Number) {
            return Err(self.error(span, format!("a number cannot {}", verb.lemma)));
        }
        match verb.subject {
            Some(required) => self.check_sort(subject, required, span),
            None => Ok(()),
        }
    }

    fn resolve_alias(&self, term: Term) -> Term {
        let mut current = term;
        for _ in 0..=self.aliases.len() {
            match current.as_ref_id().and_then(|r| self.aliases.get(&r)) {
                Some(next) => current = next.clone(),
                None => break,
            }
        }
        current
    }

    fn resolved_aliases(&self) -> HashMap<ReferentId, Term> {
        self.aliases
            .keys()
            .map(|r| (*r, self.resolve_alias(Term::Ref(*r))))
            .collect()
    }

    // --- Statements ---

    fn assertion(&mut self, sentence: &Sentence) -> Result<DrsBox, CompileError> {
        let mut top = DrsBox::new();
        match sentence {
            Sentence::Clauses(clauses) => {
                for clause in clauses {
                    self.clause(clause, &mut top)?;
                }
            }
            Sentence::Conditional {
                antecedent,
                consequent,
            } => {
                let mut ante = DrsBox::new();
                self.scopes.push(FrameKind::Antecedent);
                for clause in antecedent {
                    self.clause(clause, &mut ante)?;
                }
                let mut cons = DrsBox::new();
                self.scopes.push(FrameKind::Consequent);
                for clause in consequent {
                    self.clause(clause, &mut cons)?;
                }
                self.scopes.pop();
                self.scopes.pop();
                top.push(Condition::Implies {
                    antecedent: ante,
                    consequent: cons,
                });
            }
        }
        Ok(top)
    }

    fn question(&mut self, question: &Question) -> Result<Query, CompileError> {
        let mut goal = DrsBox::new();
        match question {
            Question::YesNo(clause) => {
                self.clause(clause, &mut goal)?;
                Ok(Query {
                    goal,
                    targets: Vec::new(),
                    shape: AnswerShape::Boolean,
                })
            }
            Question::Wh { target, body } => {
                let (sort, gender, nbar) = match target {
                    WhTarget::Who => (Sort::Person, None, None),
                    WhTarget::What => (Sort::Thing, None, None),
                    WhTarget::Which(n) | WhTarget::HowMany(n) => {
                        (n.noun.sort, n.noun.gender, Some(n))
                    }
                };
                let (referent, w) = self.fresh(sort, gender);
                self.wh_target = Some(referent.id);
                goal.universe.push(referent);
                self.scopes.introduce(Accessible {
                    term: w.clone(),
                    sort: match target {
                        WhTarget::What => None,
                        _ => Some(sort),
                    },
                    gender,
                    nouns: Vec::new(),
                });
                if let Some(nbar) = nbar {
                    self.nbar(nbar, &mut goal, &w)?;
                }
                match body {
                    WhBody::Subject(vps) => self.predicates(vps, &mut goal, w.clone())?,
                    WhBody::Object { subject, predicate } => {
                        let object = w.clone();
                        self.noun_phrase(subject, &mut goal, Role::Subject, &mut |s, d, subj| {
                            s.with_subject(subj.clone(), |s| s.gapped(predicate, d, &subj, &object))
                        })?;
                    }
                }
                let shape = match target {
                    WhTarget::HowMany(_) => AnswerShape::Count,
                    _ => AnswerShape::Bindings,
                };
                Ok(Query {
                    goal,
                    targets: vec![w],
                    shape,
                })
            }
        }
    }

    fn clause(&mut self, clause: &Clause, drs: &mut DrsBox) -> Result<(), CompileError> {
        let predicates = &clause.predicates;
        self.noun_phrase(&clause.subject, drs, Role::Subject, &mut |s, d, subject| {
            s.predicates(predicates, d, subject)
        })
    }

    fn with_subject<T>(&mut self, subject: Term, f: impl FnOnce(&mut Self) -> T) -> T {
        let saved = self.clause_subject.replace(subject);
        let out = f(self);
        self.clause_subject = saved;
        out
    }

    fn predicates(
        &mut self,
        vps: &[VerbPhrase],
        drs: &mut DrsBox,
        subject: Term,
    ) -> Result<(), CompileError> {
        self.with_subject(subject.clone(), |s| {
            vps.iter().try_for_each(|vp| s.verb_phrase(vp, drs, &subject))
        })
    }

    // --- Noun phrases ---

    fn noun_phrase(
        &mut self,
        np: &NounPhrase,
        drs: &mut DrsBox,
        role: Role,
        k: Continuation<'_, 'a>,
    ) -> Result<(), CompileError> {
        match &np.kind {
            NounPhraseKind::Quantified { quantifier, nbar } => match quantifier {
                Quantifier::Indefinite => {
                    let x = self.introduce(drs, nbar.noun.sort, nbar.noun.gender, None);
                    self.nbar(nbar, drs, &x)?;
                    k(self, drs, x)
                }
                Quantifier::Universal => {
                    let mut antecedent = DrsBox::new();
                    self.scopes.push(FrameKind::Antecedent);
                    let x = self.introduce(&mut antecedent, nbar.noun.sort, nbar.noun.gender, None);
                    self.nbar(nbar, &mut antecedent, &x)?;
                    let mut consequent = DrsBox::new();
                    self.scopes.push(FrameKind::Consequent);
                    k(self, &mut consequent, x)?;
                    self.scopes.pop();
                    self.scopes.pop();
                    drs.push(Condition::Implies {
                        antecedent,
                        consequent,
                    });
                    Ok(())
                }
                Quantifier::Negative => {
                    let mut negated = DrsBox::new();
                    self.scopes.push(FrameKind::Negation);
                    let x = self.introduce(&mut negated, nbar.noun.sort, nbar.noun.gender, None);
                    self.nbar(nbar, &mut negated, &x)?;
                    k(self, &mut negated, x)?;
                    self.scopes.pop();
                    drs.push(Condition::Not(negated));
                    Ok(())
                }
                Quantifier::Definite if nbar.noun.relational && nbar.of.is_some() => {
                    // "the N of X" names whatever stands in relation N to X.
                    let x = self.introduce(drs, nbar.noun.sort, nbar.noun.gender, None);
                    self.nbar(nbar, drs, &x)?;
                    k(self, drs, x)
                }
                Quantifier::Definite => {
                    let Some(x) = self.scopes.resolve_definite(&nbar.noun.lemma) else {
                        return Err(self.error(
                            np.span,
                            format!("no accessible antecedent for 'the {}'", nbar.noun.lemma),
                        ));
                    };
                    self.modifiers(nbar, drs, &x)?;
                    k(self, drs, x)
                }
            },
            NounPhraseKind::Name { name, sort, gender } => {
                let term = Term::Name(name.clone());
                let nouns = self
                    .scopes
                    .find(&term)
                    .map(|e| e.nouns.clone())
                    .unwrap_or_default();
                self.scopes.introduce_name(Accessible {
                    term: term.clone(),
                    sort: Some(*sort),
                    gender: *gender,
                    nouns,
                });
                k(self, drs, term)
            }
            NounPhraseKind::Pronoun(p) => {
                let term = self.pronoun(p, role, np.span)?;
                k(self, drs, term)
            }
            NounPhraseKind::Number(n) => k(self, drs, Term::Number(*n)),
            NounPhraseKind::Possessive { owner, noun } => {
                let owner = self.simple_term(owner, drs)?;
                let x = self.introduce(drs, noun.sort, noun.gender, Some(&noun.lemma));
                drs.atom(noun.lemma.clone(), vec![owner, x.clone()]);
                k(self, drs, x)
            }
        }
    }

    /// Interpret a noun phrase that cannot open a box of its own.
    fn simple_term(&mut self, np: &NounPhrase, drs: &mut DrsBox) -> Result<Term, CompileError> {
        if matches!(
            np.quantifier(),
            Some(Quantifier::Universal | Quantifier::Negative)
        ) {
            return Err(self.error(np.span, "a quantified noun phrase cannot appear here"));
        }
        let mut out = None;
        self.noun_phrase(np, drs, Role::Object, &mut |_, _, t| {
            out = Some(t);
            Ok(())
        })?;
        out.ok_or_else(|| self.error(np.span, "noun phrase has no referent"))
    }

    fn pronoun(&self, p: &PronounForm, role: Role, span: Span) -> Result<Term, CompileError> {
        if p.reflexive {
            return match &self.clause_subject {
                Some(subject)
                    if self.is_wh(subject)
                        || self
                            .sort_of(subject)
                            .is_some_and(|s| p.admits(s, self.scopes.find(subject).and_then(|e| e.gender))) =>
                {
                    Ok(subject.clone())
                }
                _ => Err(self.error(
                    span,
                    format!("'{}' does not match the subject of its clause", p.surface),
                )),
            };
        }
        let exclude = match role {
            Role::Object => self.clause_subject.as_ref(),
            Role::Subject => None,
        };
        self.scopes
            .resolve_pronoun(p, exclude)
            .ok_or_else(|| self.error(span, format!("'{}' has no accessible antecedent", p.surface)))
    }

    fn nbar(&mut self, nbar: &NBar, drs: &mut DrsBox, x: &Term) -> Result<(), CompileError> {
        let lemma = &nbar.noun.lemma;
        match &nbar.of {
            Some(owner) => {
                let owner = self.simple_term(owner, drs)?;
                drs.atom(lemma.clone(), vec![owner, x.clone()]);
            }
            None => drs.atom(lemma.clone(), vec![x.clone()]),
        }
        self.scopes.note_noun(x, lemma);
        self.modifiers(nbar, drs, x)
    }

    fn modifiers(&mut self, nbar: &NBar, drs: &mut DrsBox, x: &Term) -> Result<(), CompileError> {
        for adj in &nbar.adjectives {
            drs.atom(adj.clone(), vec![x.clone()]);
        }
        for rel in &nbar.relatives {
            self.relative(rel, drs, x)?;
        }
        Ok(())
    }

    fn relative(&mut self, rel: &RelativeClause, drs: &mut DrsBox, x: &Term) -> Result<(), CompileError> {
        match &rel.body {
            RelativeBody::Subject(vps) => self.predicates(vps, drs, x.clone()),
            RelativeBody::Object { subject, predicate } => {
                self.noun_phrase(subject, drs, Role::Subject, &mut |s, d, subj| {
                    s.with_subject(subj.clone(), |s| s.gapped(predicate, d, &subj, x))
                })
            }
        }
    }

    // --- Verb phrases ---

    fn verb_phrase(&mut self, vp: &VerbPhrase, drs: &mut DrsBox, subject: &Term) -> Result<(), CompileError> {
        if !vp.negated {
            return self.verb_phrase_body(&vp.kind, drs, subject, vp.span);
        }
        let mut negated = DrsBox::new();
        self.scopes.push(FrameKind::Negation);
        self.verb_phrase_body(&vp.kind, &mut negated, subject, vp.span)?;
        self.scopes.pop();
        drs.push(Condition::Not(negated));
        Ok(())
    }

    fn verb_phrase_body(
        &mut self,
        kind: &VerbPhraseKind,
        drs: &mut DrsBox,
        subject: &Term,
        span: Span,
    ) -> Result<(), CompileError> {
        match kind {
            VerbPhraseKind::Verb { verb, object, pps } => {
                self.check_subject(verb, subject, span)?;
                let mut nps: Vec<&NounPhrase> = object.iter().collect();
                nps.extend(pps.iter().map(|pp| &pp.object));
                let name = predicate_name(&verb.lemma, pps);
                self.with_terms(&nps, drs, Vec::new(), &mut |_, d, args| {
                    let mut all = Vec::with_capacity(args.len() + 1);
                    all.push(subject.clone());
                    all.extend(args.iter().cloned());
                    d.atom(name.clone(), all);
                    Ok(())
                })
            }
            VerbPhraseKind::Attribute { noun, value } => {
                self.noun_phrase(value, drs, Role::Object, &mut |s, d, v| {
                    s.check_sort(&v, noun.sort, value.span)?;
                    d.atom(noun.lemma.clone(), vec![subject.clone(), v]);
                    Ok(())
                })
            }
            VerbPhraseKind::Copula(copular) => self.copular(copular, drs, subject, span),
        }
    }

    fn copular(
        &mut self,
        copular: &Copular,
        drs: &mut DrsBox,
        subject: &Term,
        span: Span,
    ) -> Result<(), CompileError> {
        match copular {
            Copular::Class(nbar) => {
                self.check_sort(subject, nbar.noun.sort, span)?;
                self.nbar(nbar, drs, subject)
            }
            Copular::Adjective(adj) => {
                drs.atom(adj.clone(), vec![subject.clone()]);
                Ok(())
            }
            Copular::Identity(np) => self.noun_phrase(np, drs, Role::Object, &mut |s, d, t| {
                s.equate(d, subject.clone(), t, span)
            }),
            Copular::Comparison { op, operand } => {
                self.check_sort(subject, Sort::Number, span)?;
                self.noun_phrase(operand, drs, Role::Object, &mut |s, d, t| {
                    s.check_sort(&t, Sort::Number, operand.span)?;
                    d.push(Condition::Compare {
                        op: *op,
                        left: subject.clone(),
                        right: t,
                    });
                    Ok(())
                })
            }
            Copular::Location(pp) => self.noun_phrase(&pp.object, drs, Role::Object, &mut |_, d, t| {
                d.atom(pp.preposition, vec![subject.clone(), t]);
                Ok(())
            }),
        }
    }

    /// `object` fills the gap left by the relative pronoun or wh-word.
    fn gapped(
        &mut self,
        g: &GappedVerbPhrase,
        drs: &mut DrsBox,
        subject: &Term,
        object: &Term,
    ) -> Result<(), CompileError> {
        self.check_subject(&g.verb, subject, g.span)?;
        let name = predicate_name(&g.verb.lemma, &g.pps);
        let nps: Vec<&NounPhrase> = g.pps.iter().map(|pp| &pp.object).collect();
        let build = |s: &mut Self, d: &mut DrsBox| {
            s.with_terms(&nps, d, Vec::new(), &mut |_, d, args| {
                let mut all = vec![subject.clone(), object.clone()];
                all.extend(args.iter().cloned());
                d.atom(name.clone(), all);
                Ok(())
            })
        };
        if !g.negated {
            return build(self, drs);
        }
        let mut negated = DrsBox::new();
        self.scopes.push(FrameKind::Negation);
        build(self, &mut negated)?;
        self.scopes.pop();
        drs.push(Condition::Not(negated));
        Ok(())
    }

    /// Interpret `nps` left to right, then hand all their referents to `k`.
    fn with_terms(
        &mut self,
        nps: &[&NounPhrase],
        drs: &mut DrsBox,
        acc: Vec<Term>,
        k: ArgsContinuation<'_, 'a>,
    ) -> Result<(), CompileError> {
        match nps.split_first() {
            None => k(self, drs, &acc),
            Some((first, rest)) => self.noun_phrase(first, drs, Role::Object, &mut |s, d, t| {
                let mut next = acc.clone();
                next.push(t);
                s.with_terms(rest, d, next, &mut *k)
            }),
        }
    }

    /// Copular identity. A fresh referent is merged into the other side;
    /// two distinct constants become an equality condition.
    fn equate(&mut self, drs: &mut DrsBox, a: Term, b: Term, span: Span) -> Result<(), CompileError> {
        let a = self.resolve_alias(a);
        let b = self.resolve_alias(b);
        if a == b {
            return Ok(());
        }
        if !self.is_wh(&a)
            && !self.is_wh(&b)
            && let (Some(sa), Some(sb)) = (self.sort_of(&a), self.sort_of(&b))
            && !sa.compatible(sb)
        {
            return Err(self.error(
                span,
                format!("cannot identify a {} with a {}", sa.name(), sb.name()),
            ));
        }
        match (a.as_ref_id(), b.as_ref_id()) {
            (Some(r), _) => {
                self.aliases.insert(r, b);
            }
            (None, Some(r)) => {
                self.aliases.insert(r, a);
            }
            (None, None) => drs.push(Condition::Compare {
                op: CompareOp::Eq,
                left: a,
                right: b,
            }),
        }
        Ok(())
    }
}

/// Comparisons constrain; they cannot be stored as facts or rule heads.
fn check_assertion(drs: &DrsBox, source: &str, span: Span) -> Result<(), CompileError> {
    if drs.conditions.is_empty() {
        return Err(CompileError::semantic(source, span, "the statement asserts nothing"));
    }
    fn consequent_ok(b: &DrsBox) -> bool {
        b.conditions.iter().all(|c| match c {
            Condition::Compare { .. } => false,
            Condition::Implies { consequent, .. } => consequent_ok(consequent),
            _ => true,
        })
    }
    if consequent_ok(drs) {
        Ok(())
    } else {
        Err(CompileError::semantic(
            source,
            span,
            "comparisons and identities between distinct individuals can only be asked or used as conditions",
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CompileErrorKind;

    fn lex() -> Lexicon {
        Lexicon::builtin().unwrap()
    }

    fn assert_drs(text: &str, discourse: &Discourse) -> String {
        match compile(text, &lex(), discourse).unwrap() {
            Compiled::Assertion(b) => b.to_string(),
            other => panic!("not an assertion: {other}"),
        }
    }

    fn fresh(text: &str) -> String {
        assert_drs(text, &Discourse::default())
    }

    fn query(text: &str) -> Query {
        match compile(text, &lex(), &Discourse::default()).unwrap() {
            Compiled::Question(q) => q,
            other => panic!("not a question: {other}"),
        }
    }

    fn error(text: &str) -> CompileError {
        compile(text, &lex(), &Discourse::default()).unwrap_err()
    }

    fn person(n: u64, noun: &str) -> Individual {
        Individual {
            term: Term::Entity(n),
            sort: Some(Sort::Person),
            gender: None,
            nouns: vec![noun.to_string()],
        }
    }

    #[test]
    fn test_indefinites_share_top_box() {
        assert_eq!(
            fresh("A farmer owns a donkey."),
            "[x0, x1: farmer(x0), donkey(x1), own(x0, x1)]"
        );
    }

    #[test]
    fn test_donkey_sentence() {
        assert_eq!(
            fresh("Every farmer who owns a donkey beats it."),
            "[: [x0, x1: farmer(x0), donkey(x1), own(x0, x1)] => [: beat(x0, x1)]]"
        );
    }

    #[test]
    fn test_conditional_donkey() {
        assert_eq!(
            fresh("If a farmer owns a donkey then he beats it."),
            "[: [x0, x1: farmer(x0), donkey(x1), own(x0, x1)] => [: beat(x0, x1)]]"
        );
    }

    #[test]
    fn test_negative_quantifier() {
        assert_eq!(
            fresh("No student fails."),
            "[: NOT [x0: student(x0), fail(x0)]]"
        );
    }

    #[test]
    fn test_negated_verb_phrase() {
        assert_eq!(fresh("Tom does not walk."), "[: NOT [: walk(Tom)]]");
    }

    #[test]
    fn test_attribute_and_pp_folding() {
        assert_eq!(fresh("Alice has the age 30."), "[: age(Alice, 30)]");
        assert_eq!(fresh("Tom lives in Paris."), "[: live_in(Tom, Paris)]");
    }

    #[test]
    fn test_functional_description_merges_with_identity() {
        assert_eq!(fresh("The age of Alice is 30."), "[: age(Alice, 30)]");
        assert_eq!(fresh("Tom's father is Bob."), "[: father(Tom, Bob)]");
    }

    #[test]
    fn test_wh_question_target() {
        let q = query("What is the age of Alice?");
        assert_eq!(q.shape, AnswerShape::Bindings);
        assert_eq!(q.targets, vec![Term::Ref(ReferentId(1))]);
        assert_eq!(q.goal.to_string(), "[x1: age(Alice, x1)]");
    }

    #[test]
    fn test_who_target_is_declared_in_goal() {
        let q = query("Who walks?");
        assert_eq!(q.goal.universe.len(), 1);
        assert_eq!(q.targets, vec![Term::Ref(q.goal.universe[0].id)]);
        assert_eq!(q.goal.universe[0].sort, Sort::Person);
    }

    #[test]
    fn test_how_many_is_count() {
        let q = query("How many students read a book?");
        assert_eq!(q.shape, AnswerShape::Count);
        assert_eq!(
            q.goal.to_string(),
            "[x0, x1: student(x0), book(x1), read(x0, x1)]"
        );
    }

    #[test]
    fn test_object_question() {
        let q = query("What does Tom read?");
        assert_eq!(q.goal.to_string(), "[x0: read(Tom, x0)]");
    }

    #[test]
    fn test_universal_question_is_implication() {
        let q = query("Does every student read a book?");
        assert_eq!(q.shape, AnswerShape::Boolean);
        assert_eq!(
            q.goal.to_string(),
            "[: [x0: student(x0)] => [x1: book(x1), read(x0, x1)]]"
        );
    }

    #[test]
    fn test_pronoun_resolves_into_discourse() {
        let discourse = Discourse {
            individuals: vec![person(1, "man")],
        };
        assert_eq!(assert_drs("He talks.", &discourse), "[: talk(#1)]");
        assert_eq!(assert_drs("The man talks.", &discourse), "[: talk(#1)]");
    }

    #[test]
    fn test_pronoun_respects_gender() {
        let discourse = Discourse {
            individuals: vec![Individual {
                term: Term::Name("Alice".into()),
                sort: None,
                gender: None,
                nouns: Vec::new(),
            }],
        };
        assert_eq!(assert_drs("She walks.", &discourse), "[: walk(Alice)]");
        let err = compile("He walks.", &lex(), &discourse).unwrap_err();
        assert_eq!(err.kind, CompileErrorKind::Semantic);
    }

    #[test]
    fn test_nearest_antecedent_wins() {
        let discourse = Discourse {
            individuals: vec![person(1, "farmer"), person(2, "teacher")],
        };
        assert_eq!(assert_drs("He walks.", &discourse), "[: walk(#2)]");
    }

    #[test]
    fn test_unresolved_pronoun() {
        let err = error("He walks.");
        assert_eq!(err.kind, CompileErrorKind::Semantic);
        assert_eq!(err.text, "He");
    }

    #[test]
    fn test_object_pronoun_skips_subject() {
        let err = error("Tom likes him.");
        assert_eq!(err.kind, CompileErrorKind::Semantic);
        assert_eq!(fresh("Tom likes himself."), "[: like(Tom, Tom)]");
        assert_eq!(
            fresh("Bob walks and Tom likes him."),
            "[: walk(Bob), like(Tom, Bob)]"
        );
    }

    #[test]
    fn test_negation_blocks_accessibility() {
        let err = error("Tom does not own a car and it is red.");
        assert_eq!(err.kind, CompileErrorKind::Semantic);
        assert_eq!(err.text, "it");
    }

    #[test]
    fn test_sort_mismatch() {
        let err = error("Tom has the age Bob.");
        assert_eq!(err.kind, CompileErrorKind::Semantic);
        let err = error("30 walks.");
        assert_eq!(err.kind, CompileErrorKind::Semantic);
    }

    #[test]
    fn test_top_level_comparison_rejected() {
        assert_eq!(error("Tom is Bob.").kind, CompileErrorKind::Semantic);
        assert_eq!(
            error("The age of Alice is greater than 20.").kind,
            CompileErrorKind::Semantic
        );
    }

    #[test]
    fn test_comparison_in_antecedent() {
        assert_eq!(
            fresh("If the income of a person is less than 20000 then he is eligible."),
            "[: [x0, x1: person(x1), income(x1, x0), x0 < 20000] => [: eligible(x1)]]"
        );
    }

    #[test]
    fn test_missing_definite_antecedent() {
        let err = error("The farmer walks.");
        assert_eq!(err.kind, CompileErrorKind::Semantic);
    }

    #[test]
    fn test_compile_is_deterministic() {
        let a = compile("Every man who owns a dog is happy.", &lex(), &Discourse::default());
        let b = compile("Every man who owns a dog is happy.", &lex(), &Discourse::default());
        assert_eq!(a, b);
    }
}
