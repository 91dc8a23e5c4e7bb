//! Clausal form of knowledge-base entries and questions.
//!
//! An asserted box becomes ground facts (top-level atoms), negative facts
//! (a negated single atom), rules (one per consequent atom of each
//! implication, existentials replaced by skolem terms over the rule's
//! universal variables) and denials (negated conjunctions, used for
//! constraint checks). Variables inside clauses are numbered densely from 0.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::fmt;

use crate::drs::{CompareOp, Condition, DrsBox, Predicate, ReferentId, Term};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Goal {
    Atom(Predicate),
    Compare {
        op: CompareOp,
        left: Term,
        right: Term,
    },
    /// Negation as failure over an existentially closed conjunction.
    Not(Vec<Goal>),
    /// Every solution of the antecedent extends to one of the consequent.
    Forall {
        antecedent: Vec<Goal>,
        consequent: Vec<Goal>,
    },
    /// Enumerate the known individuals for an otherwise unconstrained variable.
    Domain(Term),
}

impl fmt::Display for Goal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Goal::Atom(p) => write!(f, "{p}"),
            Goal::Compare { op, left, right } => write!(f, "{left} {} {right}", op.symbol()),
            Goal::Not(goals) => write!(f, "not ({})", Conjunction(goals)),
            Goal::Forall {
                antecedent,
                consequent,
            } => write!(
                f,
                "forall ({} => {})",
                Conjunction(antecedent),
                Conjunction(consequent)
            ),
            Goal::Domain(t) => write!(f, "individual({t})"),
        }
    }
}

/// Comma-joined goals.
pub struct Conjunction<'a>(pub &'a [Goal]);

impl fmt::Display for Conjunction<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, g) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{g}")?;
        }
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Rule {
    pub head: Predicate,
    pub body: Vec<Goal>,
    pub vars: u32,
}

impl fmt::Display for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} :- {}", self.head, Conjunction(&self.body))
    }
}

/// A conjunction that must not hold.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Denial {
    pub body: Vec<Goal>,
    pub vars: u32,
}

impl fmt::Display for Denial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, ":- {}", Conjunction(&self.body))
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ClauseSet {
    pub facts: Vec<Predicate>,
    pub rules: Vec<Rule>,
    pub negative_facts: Vec<Predicate>,
    pub denials: Vec<Denial>,
}

impl ClauseSet {
    pub fn len(&self) -> usize {
        self.facts.len() + self.rules.len() + self.negative_facts.len() + self.denials.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Replace the top-level universe of `drs` with fresh entity constants,
/// numbered from `*next_entity`. Returns the grounded box and the
/// referent → entity assignments in universe order.
pub fn ground(drs: &DrsBox, next_entity: &mut u64) -> (DrsBox, Vec<(ReferentId, u64)>) {
    let mut assigned = Vec::with_capacity(drs.universe.len());
    let mut map = HashMap::new();
    for r in &drs.universe {
        let id = *next_entity;
        *next_entity += 1;
        assigned.push((r.id, id));
        map.insert(r.id, Term::Entity(id));
    }
    let mut grounded = drs.clone();
    grounded.substitute(&map);
    (grounded, assigned)
}

/// Clausal form of a grounded assertion made by entry `entry`.
pub fn clausify(grounded: &DrsBox, entry: u64) -> ClauseSet {
    let mut out = ClauseSet::default();
    for c in &grounded.conditions {
        match c {
            Condition::Atom(p) if p.is_ground() => out.facts.push(p.clone()),
            Condition::Atom(p) => out.rules.push(finish_rule(p.clone(), Vec::new())),
            Condition::Not(inner) => match inner.conditions.as_slice() {
                [Condition::Atom(p)] if inner.universe.is_empty() && p.is_ground() => {
                    out.negative_facts.push(p.clone())
                }
                _ => out.denials.push(finish_denial(goals_of(inner))),
            },
            Condition::Implies {
                antecedent,
                consequent,
            } => {
                let universals: Vec<ReferentId> = antecedent.universe.iter().map(|r| r.id).collect();
                implication(&mut out, goals_of(antecedent), universals, consequent, entry);
            }
            // Rejected before assertion; a ground comparison carries no content.
            Condition::Compare { .. } => {}
        }
    }
    out
}

fn implication(
    out: &mut ClauseSet,
    body: Vec<Goal>,
    universals: Vec<ReferentId>,
    consequent: &DrsBox,
    entry: u64,
) {
    let args: Vec<Term> = universals.iter().map(|r| Term::Ref(*r)).collect();
    let skolems: HashMap<ReferentId, Term> = consequent
        .universe
        .iter()
        .map(|r| {
            (
                r.id,
                Term::Skolem {
                    entry,
                    index: r.id.0,
                    args: args.clone(),
                },
            )
        })
        .collect();
    let mut consequent = consequent.clone();
    consequent.substitute(&skolems);

    for c in &consequent.conditions {
        match c {
            Condition::Atom(p) => out.rules.push(finish_rule(p.clone(), body.clone())),
            Condition::Not(inner) => {
                let mut goals = body.clone();
                goals.extend(goals_of(inner));
                out.denials.push(finish_denial(goals));
            }
            Condition::Implies {
                antecedent,
                consequent: nested,
            } => {
                let mut goals = body.clone();
                goals.extend(goals_of(antecedent));
                let mut vars = universals.clone();
                vars.extend(antecedent.universe.iter().map(|r| r.id));
                implication(out, goals, vars, nested, entry);
            }
            Condition::Compare { .. } => {}
        }
    }
}

/// Goals for the conditions of a box, in order.
pub fn goals_of(b: &DrsBox) -> Vec<Goal> {
    b.conditions
        .iter()
        .map(|c| match c {
            Condition::Atom(p) => Goal::Atom(p.clone()),
            Condition::Not(inner) => Goal::Not(goals_of(inner)),
            Condition::Implies {
                antecedent,
                consequent,
            } => Goal::Forall {
                antecedent: goals_of(antecedent),
                consequent: goals_of(consequent),
            },
            Condition::Compare { op, left, right } => Goal::Compare {
                op: *op,
                left: left.clone(),
                right: right.clone(),
            },
        })
        .collect()
}

fn finish_rule(head: Predicate, body: Vec<Goal>) -> Rule {
    let mut renumber = Renumber::default();
    let mut head = head;
    renumber.predicate(&mut head);
    let mut body = body;
    renumber.goals(&mut body);
    let visible: HashSet<u32> = head.args.iter().flat_map(vars_of_term).collect();
    let body = make_safe(body, &visible, &HashSet::new());
    Rule {
        head,
        body,
        vars: renumber.count(),
    }
}

fn finish_denial(body: Vec<Goal>) -> Denial {
    let mut renumber = Renumber::default();
    let mut body = body;
    renumber.goals(&mut body);
    let body = make_safe(body, &HashSet::new(), &HashSet::new());
    Denial {
        body,
        vars: renumber.count(),
    }
}

/// Goals of a question with variables numbered densely. Returns the goals,
/// the variable count, and where each target ended up.
pub fn query_goals(goal: &DrsBox, targets: &[Term]) -> (Vec<Goal>, u32, Vec<Term>) {
    let mut renumber = Renumber::default();
    let mut targets: Vec<Term> = targets.to_vec();
    for t in &mut targets {
        renumber.term(t);
    }
    let mut goals = goals_of(goal);
    renumber.goals(&mut goals);
    let visible: HashSet<u32> = targets.iter().flat_map(vars_of_term).collect();
    let goals = make_safe(goals, &visible, &HashSet::new());
    (goals, renumber.count(), targets)
}

#[derive(Default)]
struct Renumber {
    map: HashMap<ReferentId, u32>,
}

impl Renumber {
    fn count(&self) -> u32 {
        self.map.len() as u32
    }

    fn term(&mut self, t: &mut Term) {
        match t {
            Term::Ref(r) => {
                let next = self.map.len() as u32;
                let n = *self.map.entry(*r).or_insert(next);
                *t = Term::Ref(ReferentId(n));
            }
            Term::Skolem { args, .. } => args.iter_mut().for_each(|a| self.term(a)),
            _ => {}
        }
    }

    fn predicate(&mut self, p: &mut Predicate) {
        p.args.iter_mut().for_each(|a| self.term(a));
    }

    fn goals(&mut self, goals: &mut [Goal]) {
        for g in goals {
            match g {
                Goal::Atom(p) => self.predicate(p),
                Goal::Compare { left, right, .. } => {
                    self.term(left);
                    self.term(right);
                }
                Goal::Not(inner) => self.goals(inner),
                Goal::Forall {
                    antecedent,
                    consequent,
                } => {
                    self.goals(antecedent);
                    self.goals(consequent);
                }
                Goal::Domain(t) => self.term(t),
            }
        }
    }
}

fn vars_of_term(t: &Term) -> Vec<u32> {
    match t {
        Term::Ref(r) => vec![r.0],
        Term::Skolem { args, .. } => args.iter().flat_map(vars_of_term).collect(),
        _ => Vec::new(),
    }
}

pub fn vars_of_goal(g: &Goal) -> BTreeSet<u32> {
    let mut out = BTreeSet::new();
    collect_goal_vars(g, &mut out);
    out
}

fn collect_goal_vars(g: &Goal, out: &mut BTreeSet<u32>) {
    match g {
        Goal::Atom(p) => out.extend(p.args.iter().flat_map(vars_of_term)),
        Goal::Compare { left, right, .. } => {
            out.extend(vars_of_term(left));
            out.extend(vars_of_term(right));
        }
        Goal::Not(inner) => inner.iter().for_each(|g| collect_goal_vars(g, out)),
        Goal::Forall {
            antecedent,
            consequent,
        } => {
            antecedent.iter().for_each(|g| collect_goal_vars(g, out));
            consequent.iter().for_each(|g| collect_goal_vars(g, out));
        }
        Goal::Domain(t) => out.extend(vars_of_term(t)),
    }
}

/// Prefix `Domain` goals for variables that a conjunction needs ground but
/// never binds through a positive atom: variables under negation or in
/// comparisons that are shared with the rest of the conjunction or with
/// `visible` (rule head, question targets).
fn make_safe(goals: Vec<Goal>, visible: &HashSet<u32>, bound: &HashSet<u32>) -> Vec<Goal> {
    let per_goal: Vec<BTreeSet<u32>> = goals.iter().map(vars_of_goal).collect();
    let mut bound_here: HashSet<u32> = bound.clone();
    for (g, vars) in goals.iter().zip(&per_goal) {
        if matches!(g, Goal::Atom(_)) {
            bound_here.extend(vars.iter().copied());
        }
    }

    let mut needed = BTreeSet::new();
    for (i, (g, vars)) in goals.iter().zip(&per_goal).enumerate() {
        if matches!(g, Goal::Atom(_) | Goal::Domain(_)) {
            continue;
        }
        for v in vars {
            if bound_here.contains(v) {
                continue;
            }
            let shared = visible.contains(v)
                || per_goal
                    .iter()
                    .enumerate()
                    .any(|(j, other)| j != i && other.contains(v));
            if shared || matches!(g, Goal::Compare { .. }) {
                needed.insert(*v);
            }
        }
    }
    for v in visible {
        if !bound_here.contains(v) && !needed.contains(v) {
            needed.insert(*v);
        }
    }

    let mut inner_bound = bound_here;
    inner_bound.extend(needed.iter().copied());
    let mut inner_visible: HashSet<u32> = visible.clone();
    for vars in &per_goal {
        inner_visible.extend(vars.iter().copied());
    }

    let mut out: Vec<Goal> = needed
        .into_iter()
        .map(|v| Goal::Domain(Term::Ref(ReferentId(v))))
        .collect();
    for (i, g) in goals.into_iter().enumerate() {
        out.push(match g {
            Goal::Not(inner) => Goal::Not(make_safe(inner, &inner_visible, &inner_bound)),
            Goal::Forall {
                antecedent,
                consequent,
            } => {
                // Variables local to the universal stay out of scope for its
                // own antecedent; only the outside world and siblings count.
                let mut scope: HashSet<u32> = visible.clone();
                for (j, vars) in per_goal.iter().enumerate() {
                    if j != i {
                        scope.extend(vars.iter().copied());
                    }
                }
                let antecedent = make_safe(antecedent, &scope, &inner_bound);
                let mut cons_bound = inner_bound.clone();
                for g in &antecedent {
                    cons_bound.extend(vars_of_goal(g));
                }
                scope.extend(cons_bound.iter().copied());
                let consequent = make_safe(consequent, &scope, &cons_bound);
                Goal::Forall {
                    antecedent,
                    consequent,
                }
            }
            other => other,
        });
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drs::Compiled;
    use crate::lexicon::Lexicon;
    use crate::semantics::{Discourse, compile};

    fn grounded(text: &str) -> (DrsBox, ClauseSet) {
        let lexicon = Lexicon::builtin().unwrap();
        let Compiled::Assertion(drs) = compile(text, &lexicon, &Discourse::default()).unwrap()
        else {
            panic!("not an assertion");
        };
        let mut next = 1;
        let (g, _) = ground(&drs, &mut next);
        let clauses = clausify(&g, 7);
        (g, clauses)
    }

    #[test]
    fn test_ground_assigns_entities_in_order() {
        let (g, clauses) = grounded("A farmer owns a donkey.");
        assert!(g.universe.is_empty());
        let facts: Vec<String> = clauses.facts.iter().map(|f| f.to_string()).collect();
        assert_eq!(facts, vec!["farmer(#1)", "donkey(#2)", "own(#1, #2)"]);
    }

    #[test]
    fn test_donkey_rule() {
        let (_, clauses) = grounded("Every farmer who owns a donkey beats it.");
        assert_eq!(clauses.rules.len(), 1);
        assert_eq!(
            clauses.rules[0].to_string(),
            "beat(x0, x1) :- farmer(x0), donkey(x1), own(x0, x1)"
        );
        assert_eq!(clauses.rules[0].vars, 2);
    }

    #[test]
    fn test_existential_consequent_is_skolemised() {
        let (_, clauses) = grounded("Every student reads a book.");
        let rules: Vec<String> = clauses.rules.iter().map(|r| r.to_string()).collect();
        assert_eq!(
            rules,
            vec![
                "book(sk7_1(x0)) :- student(x0)",
                "read(x0, sk7_1(x0)) :- student(x0)",
            ]
        );
    }

    #[test]
    fn test_negative_fact_and_denial() {
        let (_, clauses) = grounded("Tom does not walk.");
        assert_eq!(clauses.negative_facts[0].to_string(), "walk(Tom)");
        let (_, clauses) = grounded("No student fails.");
        assert_eq!(clauses.denials.len(), 1);
        assert_eq!(clauses.denials[0].to_string(), ":- student(x0), fail(x0)");
    }

    #[test]
    fn test_negated_body_variable_gets_domain() {
        let body = vec![Goal::Not(vec![Goal::Atom(Predicate::new(
            "student",
            vec![Term::Ref(ReferentId(0))],
        ))])];
        let visible = HashSet::from([0]);
        let safe = make_safe(body, &visible, &HashSet::new());
        assert_eq!(safe[0], Goal::Domain(Term::Ref(ReferentId(0))));
        assert_eq!(safe.len(), 2);
    }

    #[test]
    fn test_local_negated_variable_stays_existential() {
        let lexicon = Lexicon::builtin().unwrap();
        let Compiled::Question(q) =
            compile("Who does not own a car?", &lexicon, &Discourse::default()).unwrap()
        else {
            panic!("not a question");
        };
        let (goals, vars, targets) = query_goals(&q.goal, &q.targets);
        assert_eq!(vars, 2);
        assert_eq!(targets, vec![Term::Ref(ReferentId(0))]);
        assert_eq!(
            Conjunction(&goals).to_string(),
            "individual(x0), not (car(x1), own(x0, x1))"
        );
    }

    #[test]
    fn test_universal_keeps_consequent_variables_local() {
        let lexicon = Lexicon::builtin().unwrap();
        let Compiled::Question(q) = compile(
            "Does every student read a book?",
            &lexicon,
            &Discourse::default(),
        )
        .unwrap() else {
            panic!("not a question");
        };
        let (goals, _, targets) = query_goals(&q.goal, &q.targets);
        assert!(targets.is_empty());
        assert_eq!(
            Conjunction(&goals).to_string(),
            "forall (student(x0) => book(x1), read(x0, x1))"
        );
    }
}
