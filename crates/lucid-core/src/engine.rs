//! Bounded backward chaining over a knowledge-base snapshot.
//!
//! The search is an explicit machine: a persistent goal list, a stack of
//! choice points and a trail of variable bindings to undo on backtracking.
//! Nothing recurses over goals except negation, which runs a nested machine
//! one level deeper against the same step counter and deadline.
//!
//! Loops are handled by call variants: an atom whose variant is already an
//! ancestor is answered from facts and the answers tabled for that variant
//! so far, never by its rules. A round that consumed a table which later
//! grew is re-run, keeping the tables, until nothing changes.

use std::cell::Cell;
use std::collections::{HashMap, HashSet};
use std::rc::Rc;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use crate::answer::{Answer, AnswerKind, Binding, Justification, Proof, TraceStep};
use crate::clauses::{Goal, query_goals};
use crate::drs::{AnswerShape, Predicate, Query, ReferentId, Term};
use crate::error::{InferenceError, TimeoutReason};
use crate::kb::{Candidate, EntryId, KbState};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InferenceBudget {
    pub max_depth: usize,
    pub max_steps: u64,
    pub timeout: Duration,
    /// Maximum nesting of skolem terms in any binding.
    pub max_term_depth: usize,
    pub max_rounds: usize,
}

impl Default for InferenceBudget {
    fn default() -> Self {
        Self {
            max_depth: 64,
            max_steps: 200_000,
            timeout: Duration::from_millis(2000),
            max_term_depth: 4,
            max_rounds: 16,
        }
    }
}

/// Cooperative cancellation flag, checked on every inference step.
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Answer a compiled question against a snapshot.
pub fn answer(
    kb: &KbState,
    query: &Query,
    budget: &InferenceBudget,
    cancel: &CancelToken,
) -> Result<Answer, InferenceError> {
    let (goals, vars, targets) = query_goals(&query.goal, &query.targets);
    let limits = Limits::new(kb, budget, cancel);
    let mut machine = Machine::new(&limits, 0);

    let answer = match query.shape {
        AnswerShape::Boolean => {
            let mut proof = None;
            machine.run(&goals, vars, &mut |m, trace| {
                proof = Some(m.proof(trace));
                Flow::Stop
            })?;
            match proof {
                Some(p) => Answer {
                    kind: AnswerKind::Boolean(true),
                    proofs: vec![p],
                },
                None => {
                    machine.settled()?;
                    let proofs = denied_by(kb, &goals).into_iter().collect();
                    Answer {
                        kind: AnswerKind::Boolean(false),
                        proofs,
                    }
                }
            }
        }
        AnswerShape::Bindings | AnswerShape::Count => {
            let mut seen = HashSet::new();
            let mut bindings = Vec::new();
            let mut proofs = Vec::new();
            machine.run(&goals, vars, &mut |m, trace| {
                let values: Vec<Term> = targets.iter().map(|t| m.resolve(t)).collect();
                if values.iter().all(Term::is_ground) && seen.insert(values.clone()) {
                    bindings.push(Binding { values });
                    proofs.push(m.proof(trace));
                }
                Flow::Continue
            })?;
            machine.settled()?;
            let kind = match query.shape {
                AnswerShape::Count => AnswerKind::Count(bindings.len()),
                _ => AnswerKind::Bindings(bindings),
            };
            Answer { kind, proofs }
        }
    };
    tracing::debug!(
        answer = %answer,
        steps = limits.steps.get(),
        "query answered"
    );
    Ok(answer)
}

/// Denials of the snapshot that currently hold, with the entry that stated
/// them. Inconclusive checks are skipped.
pub fn violated_denials(
    kb: &KbState,
    budget: &InferenceBudget,
    cancel: &CancelToken,
) -> Result<Vec<(EntryId, Proof)>, InferenceError> {
    let mut out = Vec::new();
    for (entry, denial) in kb.denials() {
        let limits = Limits::new(kb, budget, cancel);
        let mut machine = Machine::new(&limits, 0);
        let mut proof = None;
        match machine.run(&denial.body, denial.vars, &mut |m, trace| {
            proof = Some(m.proof(trace));
            Flow::Stop
        }) {
            Ok(_) => {}
            Err(InferenceError::Timeout { reason, .. }) => {
                tracing::debug!(entry = %entry, reason = reason.describe(), "denial check inconclusive");
                continue;
            }
            Err(e) => return Err(e),
        }
        if let Some(p) = proof {
            tracing::warn!(entry = %entry, %denial, "denial violated");
            out.push((entry, p));
        }
    }
    Ok(out)
}

/// A "no" for a single ground atom that an entry explicitly negated.
fn denied_by(kb: &KbState, goals: &[Goal]) -> Option<Proof> {
    let [Goal::Atom(p)] = goals else {
        return None;
    };
    let (entry, _) = kb
        .negative_facts(&p.name, p.arity())
        .into_iter()
        .find(|(_, n)| *n == p)?;
    Some(Proof {
        steps: vec![TraceStep {
            depth: 0,
            goal: p.to_string(),
            justification: Justification::Denied(entry),
        }],
    })
}

struct Limits<'a> {
    kb: &'a KbState,
    budget: &'a InferenceBudget,
    cancel: &'a CancelToken,
    deadline: Instant,
    steps: Cell<u64>,
}

impl<'a> Limits<'a> {
    fn new(kb: &'a KbState, budget: &'a InferenceBudget, cancel: &'a CancelToken) -> Self {
        Self {
            kb,
            budget,
            cancel,
            deadline: Instant::now() + budget.timeout,
            steps: Cell::new(0),
        }
    }

    fn timeout(&self, reason: TimeoutReason) -> InferenceError {
        InferenceError::Timeout {
            reason,
            steps: self.steps.get(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Flow {
    Continue,
    Stop,
}

enum Item {
    Goal {
        goal: Goal,
        depth: usize,
        ancestors: Ancestors,
    },
    /// Reached when a rule body for `key` has been proven: tables the answer.
    Complete { key: String, atom: Predicate },
}

struct Node {
    item: Rc<Item>,
    next: GoalList,
}

type GoalList = Option<Rc<Node>>;

fn cons(item: Rc<Item>, next: GoalList) -> GoalList {
    Some(Rc::new(Node { item, next }))
}

struct Ancestor {
    key: String,
    parent: Ancestors,
}

type Ancestors = Option<Rc<Ancestor>>;

fn is_ancestor(ancestors: &Ancestors, key: &str) -> bool {
    let mut cur = ancestors.as_deref();
    while let Some(a) = cur {
        if a.key == key {
            return true;
        }
        cur = a.parent.as_deref();
    }
    false
}

struct TraceNode {
    depth: usize,
    goal: Goal,
    justification: Justification,
    prev: Trace,
}

type Trace = Option<Rc<TraceNode>>;

fn note(prev: Trace, depth: usize, goal: Goal, justification: Justification) -> Trace {
    Some(Rc::new(TraceNode {
        depth,
        goal,
        justification,
        prev,
    }))
}

type State = (GoalList, Trace);

enum Next {
    Continue(State),
    Backtrack,
}

enum Alternatives<'a> {
    Clauses {
        atom: Predicate,
        key: String,
        depth: usize,
        ancestors: Ancestors,
        candidates: Vec<Candidate<'a>>,
        /// Variant of an ancestor: after the facts, read the live table.
        tabled: bool,
        next: usize,
    },
    Domain {
        var: usize,
        next: usize,
    },
}

struct ChoicePoint<'a> {
    trail_len: usize,
    bindings_len: usize,
    rest: GoalList,
    trace: Trace,
    alternatives: Alternatives<'a>,
}

#[derive(Default)]
struct Table {
    answers: Vec<Predicate>,
    seen: HashSet<Predicate>,
}

struct Machine<'a> {
    limits: &'a Limits<'a>,
    base_depth: usize,
    bindings: Vec<Option<Term>>,
    trail: Vec<usize>,
    choices: Vec<ChoicePoint<'a>>,
    tables: HashMap<String, Table>,
    consumed: HashSet<String>,
    grown: bool,
    cut: Option<TimeoutReason>,
}

impl<'a> Machine<'a> {
    fn new(limits: &'a Limits<'a>, base_depth: usize) -> Self {
        Self {
            limits,
            base_depth,
            bindings: Vec::new(),
            trail: Vec::new(),
            choices: Vec::new(),
            tables: HashMap::new(),
            consumed: HashSet::new(),
            grown: false,
            cut: None,
        }
    }

    /// Error out if some branch was cut, since exhausting the search then
    /// does not mean there are no further answers.
    fn settled(&self) -> Result<(), InferenceError> {
        match self.cut {
            Some(reason) => Err(self.limits.timeout(reason)),
            None => Ok(()),
        }
    }

    fn mark_cut(&mut self, reason: TimeoutReason) {
        if self.cut.is_none() {
            tracing::trace!(reason = reason.describe(), "branch cut");
            self.cut = Some(reason);
        }
    }

    /// Search in rounds until no consumed table grows.
    fn run(
        &mut self,
        goals: &[Goal],
        vars: u32,
        on_solution: &mut dyn FnMut(&Self, &Trace) -> Flow,
    ) -> Result<Flow, InferenceError> {
        for round in 1..=self.limits.budget.max_rounds {
            self.bindings = vec![None; vars as usize];
            self.trail.clear();
            self.choices.clear();
            self.consumed.clear();
            self.grown = false;
            let list = goals.iter().rev().fold(None, |next, g| {
                cons(
                    Rc::new(Item::Goal {
                        goal: g.clone(),
                        depth: self.base_depth,
                        ancestors: None,
                    }),
                    next,
                )
            });
            if self.search(list, on_solution)? == Flow::Stop {
                return Ok(Flow::Stop);
            }
            if !self.grown {
                tracing::trace!(round, "fixpoint reached");
                return Ok(Flow::Continue);
            }
        }
        self.mark_cut(TimeoutReason::Rounds);
        Ok(Flow::Continue)
    }

    fn search(
        &mut self,
        goals: GoalList,
        on_solution: &mut dyn FnMut(&Self, &Trace) -> Flow,
    ) -> Result<Flow, InferenceError> {
        let mut state = Some((goals, None));
        loop {
            let (goals, trace) = match state.take() {
                Some(s) => s,
                None => match self.backtrack()? {
                    Some(s) => s,
                    None => return Ok(Flow::Continue),
                },
            };
            self.tick()?;
            let Some((item, rest)) = self.select(&goals) else {
                if on_solution(self, &trace) == Flow::Stop {
                    return Ok(Flow::Stop);
                }
                continue;
            };
            state = match self.step(&item, rest, trace)? {
                Next::Continue(s) => Some(s),
                Next::Backtrack => None,
            };
        }
    }

    fn tick(&self) -> Result<(), InferenceError> {
        let limits = self.limits;
        let steps = limits.steps.get() + 1;
        limits.steps.set(steps);
        if limits.cancel.is_cancelled() {
            return Err(InferenceError::Cancelled);
        }
        if steps > limits.budget.max_steps {
            return Err(limits.timeout(TimeoutReason::Steps));
        }
        if steps % 256 == 0 && Instant::now() >= limits.deadline {
            return Err(limits.timeout(TimeoutReason::Deadline));
        }
        Ok(())
    }

    /// Pick the leftmost atom, domain goal or ground comparison before the
    /// first completion marker. Negations wait until nothing else is ready.
    fn select(&self, goals: &GoalList) -> Option<(Rc<Item>, GoalList)> {
        let head = goals.as_ref()?;
        let mut prefix: Vec<&Rc<Node>> = Vec::new();
        let mut cur = Some(head);
        while let Some(node) = cur {
            if matches!(*node.item, Item::Complete { .. }) {
                break;
            }
            if self.ready(&node.item) {
                let mut rest = node.next.clone();
                for p in prefix.iter().rev() {
                    rest = cons(Rc::clone(&p.item), rest);
                }
                return Some((Rc::clone(&node.item), rest));
            }
            prefix.push(node);
            cur = node.next.as_ref();
        }
        Some((Rc::clone(&head.item), head.next.clone()))
    }

    fn ready(&self, item: &Item) -> bool {
        match item {
            Item::Goal { goal, .. } => match goal {
                Goal::Atom(_) | Goal::Domain(_) => true,
                Goal::Compare { left, right, .. } => {
                    self.resolve(left).is_ground() && self.resolve(right).is_ground()
                }
                Goal::Not(_) | Goal::Forall { .. } => false,
            },
            Item::Complete { .. } => false,
        }
    }

    fn step(&mut self, item: &Item, rest: GoalList, trace: Trace) -> Result<Next, InferenceError> {
        let (goal, depth, ancestors) = match item {
            Item::Complete { key, atom } => {
                self.record(key, atom);
                return Ok(Next::Continue((rest, trace)));
            }
            Item::Goal {
                goal,
                depth,
                ancestors,
            } => (goal, *depth, ancestors),
        };
        if depth > self.limits.budget.max_depth {
            self.mark_cut(TimeoutReason::Depth);
            return Ok(Next::Backtrack);
        }
        match goal {
            Goal::Atom(p) => {
                self.call(p, depth, ancestors, rest, trace);
                Ok(Next::Backtrack)
            }
            Goal::Domain(t) => match self.resolve(t) {
                Term::Ref(v) => {
                    self.choices.push(ChoicePoint {
                        trail_len: self.trail.len(),
                        bindings_len: self.bindings.len(),
                        rest,
                        trace,
                        alternatives: Alternatives::Domain {
                            var: v.0 as usize,
                            next: 0,
                        },
                    });
                    Ok(Next::Backtrack)
                }
                _ => Ok(Next::Continue((rest, trace))),
            },
            Goal::Compare { op, left, right } => {
                let (l, r) = (self.resolve(left), self.resolve(right));
                if !(l.is_ground() && r.is_ground()) {
                    self.mark_cut(TimeoutReason::Floundered);
                    return Ok(Next::Backtrack);
                }
                if op.evaluate(&l, &r) {
                    let trace = note(trace, depth, goal.clone(), Justification::Builtin);
                    Ok(Next::Continue((rest, trace)))
                } else {
                    Ok(Next::Backtrack)
                }
            }
            Goal::Not(inner) => self.negate(inner, goal, depth, rest, trace),
            Goal::Forall {
                antecedent,
                consequent,
            } => {
                let mut counterexample = antecedent.clone();
                counterexample.push(Goal::Not(consequent.clone()));
                self.negate(&counterexample, goal, depth, rest, trace)
            }
        }
    }

    fn call(
        &mut self,
        p: &Predicate,
        depth: usize,
        ancestors: &Ancestors,
        rest: GoalList,
        trace: Trace,
    ) {
        let kb: &'a KbState = self.limits.kb;
        let atom = self.resolve_predicate(p);
        let key = variant_key(&atom);
        let mut candidates = kb.candidates(&atom.name, atom.arity());
        let tabled = is_ancestor(ancestors, &key);
        if tabled {
            candidates.retain(|c| matches!(c, Candidate::Fact { .. }));
            self.consumed.insert(key.clone());
        }
        tracing::trace!(goal = %atom, depth, tabled, candidates = candidates.len(), "call");
        self.choices.push(ChoicePoint {
            trail_len: self.trail.len(),
            bindings_len: self.bindings.len(),
            rest,
            trace,
            alternatives: Alternatives::Clauses {
                atom,
                key,
                depth,
                ancestors: ancestors.clone(),
                candidates,
                tabled,
                next: 0,
            },
        });
    }

    fn negate(
        &mut self,
        inner: &[Goal],
        shown: &Goal,
        depth: usize,
        rest: GoalList,
        trace: Trace,
    ) -> Result<Next, InferenceError> {
        let mut numbering = HashMap::new();
        let goals: Vec<Goal> = inner
            .iter()
            .map(|g| {
                let g = self.resolve_goal(g);
                map_goal(&g, &mut |t| renumber(t, &mut numbering))
            })
            .collect();
        let mut nested = Machine::new(self.limits, depth + 1);
        let proved = nested.run(&goals, numbering.len() as u32, &mut |_, _| Flow::Stop)?;
        if proved == Flow::Stop {
            return Ok(Next::Backtrack);
        }
        if let Some(reason) = nested.cut {
            self.mark_cut(reason);
            return Ok(Next::Backtrack);
        }
        let justification = denied_by(self.limits.kb, &goals)
            .and_then(|p| p.steps.first().map(|s| s.justification))
            .unwrap_or(Justification::NegationAsFailure);
        let trace = note(trace, depth, shown.clone(), justification);
        Ok(Next::Continue((rest, trace)))
    }

    fn record(&mut self, key: &str, atom: &Predicate) {
        let answer = self.resolve_predicate(atom);
        if !answer.is_ground() {
            return;
        }
        let table = self.tables.entry(key.to_string()).or_default();
        if table.seen.insert(answer.clone()) {
            table.answers.push(answer);
            if self.consumed.contains(key) {
                self.grown = true;
            }
        }
    }

    fn backtrack(&mut self) -> Result<Option<State>, InferenceError> {
        while let Some(mut cp) = self.choices.pop() {
            if let Some(state) = self.resume(&mut cp)? {
                if self.has_more(&cp) {
                    self.choices.push(cp);
                }
                return Ok(Some(state));
            }
        }
        Ok(None)
    }

    fn has_more(&self, cp: &ChoicePoint<'a>) -> bool {
        match &cp.alternatives {
            Alternatives::Clauses {
                candidates,
                tabled,
                next,
                ..
            } => *tabled || *next < candidates.len(),
            Alternatives::Domain { next, .. } => *next < self.limits.kb.domain().len(),
        }
    }

    fn undo(&mut self, trail_len: usize, bindings_len: usize) {
        while self.trail.len() > trail_len {
            if let Some(v) = self.trail.pop()
                && let Some(slot) = self.bindings.get_mut(v)
            {
                *slot = None;
            }
        }
        self.bindings.truncate(bindings_len);
    }

    /// Try the remaining alternatives of `cp` until one applies.
    fn resume(&mut self, cp: &mut ChoicePoint<'a>) -> Result<Option<State>, InferenceError> {
        let kb: &'a KbState = self.limits.kb;
        loop {
            self.undo(cp.trail_len, cp.bindings_len);
            match &mut cp.alternatives {
                Alternatives::Domain { var, next } => {
                    let Some(value) = kb.domain().get(*next) else {
                        return Ok(None);
                    };
                    *next += 1;
                    self.tick()?;
                    if self.bind(*var, value.clone()) {
                        return Ok(Some((cp.rest.clone(), cp.trace.clone())));
                    }
                }
                Alternatives::Clauses {
                    atom,
                    key,
                    depth,
                    ancestors,
                    candidates,
                    tabled,
                    next,
                } => {
                    let i = *next;
                    let candidate = match candidates.get(i) {
                        Some(c) => Some(*c),
                        None if *tabled => None,
                        None => return Ok(None),
                    };
                    let tabled_answer = match candidate {
                        Some(_) => None,
                        None => match self
                            .tables
                            .get(key.as_str())
                            .and_then(|t| t.answers.get(i - candidates.len()))
                        {
                            Some(a) => Some(a.clone()),
                            None => return Ok(None),
                        },
                    };
                    *next += 1;
                    self.tick()?;
                    let shown = Goal::Atom(atom.clone());

                    if let Some(answer) = tabled_answer {
                        if self.unify_args(&atom.args, &answer.args) {
                            let trace = note(cp.trace.clone(), *depth, shown, Justification::Tabled);
                            return Ok(Some((cp.rest.clone(), trace)));
                        }
                        continue;
                    }
                    match candidate {
                        Some(Candidate::Fact { entry, fact }) => {
                            if self.unify_args(&atom.args, &fact.args) {
                                let trace =
                                    note(cp.trace.clone(), *depth, shown, Justification::Fact(entry));
                                return Ok(Some((cp.rest.clone(), trace)));
                            }
                        }
                        Some(Candidate::Rule { entry, rule }) => {
                            let base = self.bindings.len() as u32;
                            self.bindings.resize((base + rule.vars) as usize, None);
                            let head = map_predicate(&rule.head, &mut |t| rename(t, base));
                            if !self.unify_args(&atom.args, &head.args) {
                                continue;
                            }
                            let below = Some(Rc::new(Ancestor {
                                key: key.clone(),
                                parent: ancestors.clone(),
                            }));
                            let mut goals = cons(
                                Rc::new(Item::Complete {
                                    key: key.clone(),
                                    atom: atom.clone(),
                                }),
                                cp.rest.clone(),
                            );
                            for g in rule.body.iter().rev() {
                                goals = cons(
                                    Rc::new(Item::Goal {
                                        goal: map_goal(g, &mut |t| rename(t, base)),
                                        depth: *depth + 1,
                                        ancestors: below.clone(),
                                    }),
                                    goals,
                                );
                            }
                            let trace =
                                note(cp.trace.clone(), *depth, shown, Justification::Rule(entry));
                            return Ok(Some((goals, trace)));
                        }
                        None => {}
                    }
                }
            }
        }
    }

    fn walk<'t>(&'t self, t: &'t Term) -> &'t Term {
        let mut t = t;
        while let Term::Ref(r) = t {
            match self.bindings.get(r.0 as usize) {
                Some(Some(bound)) => t = bound,
                _ => break,
            }
        }
        t
    }

    fn resolve(&self, t: &Term) -> Term {
        match self.walk(t) {
            Term::Skolem { entry, index, args } => Term::Skolem {
                entry: *entry,
                index: *index,
                args: args.iter().map(|a| self.resolve(a)).collect(),
            },
            other => other.clone(),
        }
    }

    fn resolve_predicate(&self, p: &Predicate) -> Predicate {
        map_predicate(p, &mut |t| self.resolve(t))
    }

    fn resolve_goal(&self, g: &Goal) -> Goal {
        map_goal(g, &mut |t| self.resolve(t))
    }

    fn unify_args(&mut self, a: &[Term], b: &[Term]) -> bool {
        a.len() == b.len() && a.iter().zip(b).all(|(x, y)| self.unify(x, y))
    }

    fn unify(&mut self, a: &Term, b: &Term) -> bool {
        let a = self.walk(a).clone();
        let b = self.walk(b).clone();
        match (&a, &b) {
            (Term::Ref(x), Term::Ref(y)) if x == y => true,
            (Term::Ref(x), _) => self.bind(x.0 as usize, b),
            (_, Term::Ref(y)) => self.bind(y.0 as usize, a),
            (
                Term::Skolem {
                    entry: e1,
                    index: i1,
                    args: a1,
                },
                Term::Skolem {
                    entry: e2,
                    index: i2,
                    args: a2,
                },
            ) => e1 == e2 && i1 == i2 && self.unify_args(a1, a2),
            // Unique names: distinct constants never denote the same individual.
            _ => a == b,
        }
    }

    fn bind(&mut self, var: usize, value: Term) -> bool {
        if let Term::Skolem { .. } = value {
            let resolved = self.resolve(&value);
            if occurs(var, &resolved) {
                return false;
            }
            if resolved.skolem_depth() > self.limits.budget.max_term_depth {
                self.mark_cut(TimeoutReason::TermDepth);
                return false;
            }
        }
        match self.bindings.get_mut(var) {
            Some(slot) => {
                *slot = Some(value);
                self.trail.push(var);
                true
            }
            None => false,
        }
    }

    fn proof(&self, trace: &Trace) -> Proof {
        let mut steps = Vec::new();
        let mut cur = trace.as_deref();
        while let Some(node) = cur {
            steps.push(TraceStep {
                depth: node.depth,
                goal: self.resolve_goal(&node.goal).to_string(),
                justification: node.justification,
            });
            cur = node.prev.as_deref();
        }
        steps.reverse();
        Proof { steps }
    }
}

fn occurs(var: usize, t: &Term) -> bool {
    match t {
        Term::Ref(r) => r.0 as usize == var,
        Term::Skolem { args, .. } => args.iter().any(|a| occurs(var, a)),
        _ => false,
    }
}

fn rename(t: &Term, base: u32) -> Term {
    match t {
        Term::Ref(r) => Term::Ref(ReferentId(r.0 + base)),
        Term::Skolem { entry, index, args } => Term::Skolem {
            entry: *entry,
            index: *index,
            args: args.iter().map(|a| rename(a, base)).collect(),
        },
        other => other.clone(),
    }
}

fn renumber(t: &Term, numbering: &mut HashMap<u32, u32>) -> Term {
    match t {
        Term::Ref(r) => {
            let next = numbering.len() as u32;
            Term::Ref(ReferentId(*numbering.entry(r.0).or_insert(next)))
        }
        Term::Skolem { entry, index, args } => Term::Skolem {
            entry: *entry,
            index: *index,
            args: args.iter().map(|a| renumber(a, numbering)).collect(),
        },
        other => other.clone(),
    }
}

fn map_predicate(p: &Predicate, f: &mut dyn FnMut(&Term) -> Term) -> Predicate {
    Predicate {
        name: p.name.clone(),
        args: p.args.iter().map(|a| f(a)).collect(),
    }
}

fn map_goal(g: &Goal, f: &mut dyn FnMut(&Term) -> Term) -> Goal {
    match g {
        Goal::Atom(p) => Goal::Atom(map_predicate(p, f)),
        Goal::Compare { op, left, right } => Goal::Compare {
            op: *op,
            left: f(left),
            right: f(right),
        },
        Goal::Not(inner) => Goal::Not(inner.iter().map(|g| map_goal(g, f)).collect()),
        Goal::Forall {
            antecedent,
            consequent,
        } => Goal::Forall {
            antecedent: antecedent.iter().map(|g| map_goal(g, f)).collect(),
            consequent: consequent.iter().map(|g| map_goal(g, f)).collect(),
        },
        Goal::Domain(t) => Goal::Domain(f(t)),
    }
}

/// Canonical text of a call with its variables numbered by first occurrence,
/// so two calls are variants exactly when their keys are equal.
fn variant_key(p: &Predicate) -> String {
    let mut vars = HashMap::new();
    let mut key = format!("{}/{}(", p.name, p.arity());
    for (i, a) in p.args.iter().enumerate() {
        if i > 0 {
            key.push(',');
        }
        key_term(a, &mut vars, &mut key);
    }
    key.push(')');
    key
}

fn key_term(t: &Term, vars: &mut HashMap<u32, usize>, out: &mut String) {
    match t {
        Term::Ref(r) => {
            let next = vars.len();
            let n = *vars.entry(r.0).or_insert(next);
            out.push_str(&format!("_{n}"));
        }
        Term::Name(n) => out.push_str(&format!("'{n}")),
        Term::Entity(e) => out.push_str(&format!("#{e}")),
        Term::Number(n) => out.push_str(&n.to_string()),
        Term::Skolem { entry, index, args } => {
            out.push_str(&format!("sk{entry}_{index}("));
            for (i, a) in args.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                key_term(a, vars, out);
            }
            out.push(')');
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drs::Compiled;
    use crate::kb::{KnowledgeBase, Provenance};
    use crate::lexicon::Lexicon;
    use crate::semantics::compile;

    fn kb_of(statements: &[&str]) -> KnowledgeBase {
        let lexicon = Lexicon::builtin().unwrap();
        let mut kb = KnowledgeBase::new();
        for (i, text) in statements.iter().enumerate() {
            let Compiled::Assertion(drs) = compile(text, &lexicon, &kb.state().discourse()).unwrap()
            else {
                panic!("{text} is not an assertion");
            };
            kb.assert(drs, Provenance::new("test", i));
        }
        kb
    }

    fn ask_with(
        kb: &KnowledgeBase,
        question: &str,
        budget: &InferenceBudget,
    ) -> Result<Answer, InferenceError> {
        let lexicon = Lexicon::builtin().unwrap();
        let Compiled::Question(q) = compile(question, &lexicon, &kb.state().discourse()).unwrap()
        else {
            panic!("{question} is not a question");
        };
        answer(kb.state(), &q, budget, &CancelToken::new())
    }

    fn ask(kb: &KnowledgeBase, question: &str) -> String {
        ask_with(kb, question, &InferenceBudget::default())
            .unwrap()
            .to_string()
    }

    #[test]
    fn test_fact_lookup() {
        let kb = kb_of(&["Tom owns a car."]);
        assert_eq!(ask(&kb, "Does Tom own a car?"), "yes");
        assert_eq!(ask(&kb, "Does Bob own a car?"), "no");
    }

    #[test]
    fn test_rule_chain() {
        let kb = kb_of(&[
            "Every student is a person.",
            "Every person is mortal.",
            "Tom is a student.",
        ]);
        assert_eq!(ask(&kb, "Is Tom mortal?"), "yes");
        let a = ask_with(&kb, "Is Tom mortal?", &InferenceBudget::default()).unwrap();
        let rules: Vec<Justification> = a.proofs[0]
            .steps
            .iter()
            .map(|s| s.justification)
            .collect();
        assert_eq!(
            rules,
            vec![
                Justification::Rule(EntryId(2)),
                Justification::Rule(EntryId(1)),
                Justification::Fact(EntryId(3)),
            ]
        );
    }

    #[test]
    fn test_negation_as_failure() {
        let kb = kb_of(&[
            "Tom is a student.",
            "Bob is a student.",
            "Bob owns a car.",
            "Every student who does not own a car is poor.",
        ]);
        assert_eq!(ask(&kb, "Is Tom poor?"), "yes");
        assert_eq!(ask(&kb, "Is Bob poor?"), "no");
        assert_eq!(ask(&kb, "Who is poor?"), "Tom");
    }

    #[test]
    fn test_cyclic_rules_terminate() {
        let kb = kb_of(&[
            "Every person who knows a person who is famous is famous.",
            "Alice knows Bob.",
            "Bob knows Alice.",
            "Alice is a person.",
            "Bob is a person.",
            "Anna is a person.",
            "Anna knows Alice.",
            "Bob is famous.",
        ]);
        assert_eq!(ask(&kb, "Who is famous?"), "Bob; Alice; Anna");
        assert_eq!(ask(&kb, "Is Anna famous?"), "yes");
    }

    #[test]
    fn test_universal_question() {
        let kb = kb_of(&[
            "Tom is a student.",
            "Bob is a student.",
            "Tom reads a book.",
            "Bob reads a book.",
        ]);
        assert_eq!(ask(&kb, "Does every student read a book?"), "yes");
        let kb = kb_of(&["Tom is a student.", "Bob is a student.", "Tom reads a book."]);
        assert_eq!(ask(&kb, "Does every student read a book?"), "no");
    }

    #[test]
    fn test_comparison_builtin() {
        let kb = kb_of(&[
            "If the income of a person is less than 20000 then he is eligible.",
            "Tom is a person.",
            "Tom has an income of 15000.",
            "Bob is a person.",
            "Bob has an income of 45000.",
        ]);
        assert_eq!(ask(&kb, "Who is eligible?"), "Tom");
    }

    #[test]
    fn test_step_budget_is_unknown_not_no() {
        let kb = kb_of(&[
            "Every student is a person.",
            "Every person is mortal.",
            "Tom is a student.",
        ]);
        let budget = InferenceBudget {
            max_steps: 3,
            ..InferenceBudget::default()
        };
        let err = ask_with(&kb, "Is Tom mortal?", &budget).unwrap_err();
        assert!(matches!(
            err,
            InferenceError::Timeout {
                reason: TimeoutReason::Steps,
                ..
            }
        ));
    }

    #[test]
    fn test_skolem_growth_is_bounded() {
        let kb = kb_of(&["Every person knows a person.", "Tom is a person."]);
        let err = ask_with(&kb, "Who is a person?", &InferenceBudget::default()).unwrap_err();
        assert!(matches!(err, InferenceError::Timeout { .. }));
        assert_eq!(ask(&kb, "Is Tom a person?"), "yes");
    }

    #[test]
    fn test_cancelled() {
        let kb = kb_of(&["Tom walks."]);
        let lexicon = Lexicon::builtin().unwrap();
        let Compiled::Question(q) = compile("Does Tom walk?", &lexicon, &Default::default()).unwrap()
        else {
            panic!("not a question");
        };
        let cancel = CancelToken::new();
        cancel.cancel();
        let err = answer(kb.state(), &q, &InferenceBudget::default(), &cancel).unwrap_err();
        assert_eq!(err, InferenceError::Cancelled);
    }

    #[test]
    fn test_explicit_negation_is_cited() {
        let kb = kb_of(&["Tom does not walk."]);
        let a = ask_with(&kb, "Does Tom walk?", &InferenceBudget::default()).unwrap();
        assert_eq!(a.kind, AnswerKind::Boolean(false));
        assert_eq!(a.cited(), vec![EntryId(1)]);
    }

    #[test]
    fn test_violated_denial() {
        let kb = kb_of(&["No student fails.", "Tom is a student.", "Tom fails."]);
        let violations =
            violated_denials(kb.state(), &InferenceBudget::default(), &CancelToken::new()).unwrap();
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].0, EntryId(1));
    }

    #[test]
    fn test_variant_key() {
        let p = Predicate::new(
            "own",
            vec![Term::Ref(ReferentId(7)), Term::Name("Tom".into()), Term::Ref(ReferentId(7))],
        );
        assert_eq!(variant_key(&p), "own/3(_0,'Tom,_0)");
    }
}
