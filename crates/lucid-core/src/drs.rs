//! Discourse representation structures.
//!
//! A [`DrsBox`] is a universe of discourse referents plus an ordered list of
//! conditions. Boxes nest for negation and implication. Everything here is
//! plain data: structural equality is derived, so two compilations of the
//! same sentence compare equal, and the knowledge base uses that equality to
//! deduplicate assertions.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Semantic sort of a referent.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sort {
    Person,
    Thing,
    Number,
    Event,
}

impl Sort {
    /// Whether a referent of sort `self` may stand where `other` is expected.
    /// Things and events share the non-personal slot.
    pub fn compatible(self, other: Sort) -> bool {
        self == other
            || matches!(
                (self, other),
                (Sort::Thing, Sort::Event) | (Sort::Event, Sort::Thing)
            )
    }

    pub fn name(self) -> &'static str {
        match self {
            Sort::Person => "person",
            Sort::Thing => "thing",
            Sort::Number => "number",
            Sort::Event => "event",
        }
    }
}

/// Grammatical gender, used only to narrow pronoun resolution.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Gender {
    Masculine,
    Feminine,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ReferentId(pub u32);

impl fmt::Display for ReferentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "x{}", self.0)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Referent {
    pub id: ReferentId,
    pub sort: Sort,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gender: Option<Gender>,
}

/// Arguments of predicates.
///
/// `Ref` is a discourse referent: a variable inside rules and questions, and
/// replaced by a fresh `Entity` when an assertion is grounded into the
/// knowledge base. `Skolem` stands for an individual whose existence a rule
/// consequent asserts, parameterised by the rule's universal variables.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum Term {
    Ref(ReferentId),
    Name(String),
    Entity(u64),
    Number(i64),
    Skolem {
        entry: u64,
        index: u32,
        args: Vec<Term>,
    },
}

impl Term {
    pub fn is_ground(&self) -> bool {
        match self {
            Term::Ref(_) => false,
            Term::Skolem { args, .. } => args.iter().all(Term::is_ground),
            _ => true,
        }
    }

    /// Nesting depth of skolem function terms (0 for constants and variables).
    pub fn skolem_depth(&self) -> usize {
        match self {
            Term::Skolem { args, .. } => {
                1 + args.iter().map(Term::skolem_depth).max().unwrap_or(0)
            }
            _ => 0,
        }
    }

    pub fn as_ref_id(&self) -> Option<ReferentId> {
        match self {
            Term::Ref(id) => Some(*id),
            _ => None,
        }
    }

    fn substitute(&mut self, map: &HashMap<ReferentId, Term>) {
        match self {
            Term::Ref(id) => {
                if let Some(t) = map.get(id) {
                    *self = t.clone();
                }
            }
            Term::Skolem { args, .. } => {
                for a in args {
                    a.substitute(map);
                }
            }
            _ => {}
        }
    }
}

impl fmt::Display for Term {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Term::Ref(id) => write!(f, "{id}"),
            Term::Name(n) => write!(f, "{n}"),
            Term::Entity(e) => write!(f, "#{e}"),
            Term::Number(n) => write!(f, "{n}"),
            Term::Skolem { entry, index, args } => {
                write!(f, "sk{entry}_{index}(")?;
                write_joined(f, args)?;
                write!(f, ")")
            }
        }
    }
}

fn write_joined<T: fmt::Display>(f: &mut fmt::Formatter<'_>, items: &[T]) -> fmt::Result {
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            write!(f, ", ")?;
        }
        write!(f, "{item}")?;
    }
    Ok(())
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Predicate {
    pub name: String,
    pub args: Vec<Term>,
}

impl Predicate {
    pub fn new(name: impl Into<String>, args: Vec<Term>) -> Self {
        Self {
            name: name.into(),
            args,
        }
    }

    pub fn arity(&self) -> usize {
        self.args.len()
    }

    pub fn is_ground(&self) -> bool {
        self.args.iter().all(Term::is_ground)
    }
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}(", self.name)?;
        write_joined(f, &self.args)?;
        write!(f, ")")
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl CompareOp {
    pub fn symbol(self) -> &'static str {
        match self {
            CompareOp::Eq => "=",
            CompareOp::Ne => "!=",
            CompareOp::Lt => "<",
            CompareOp::Le => "<=",
            CompareOp::Gt => ">",
            CompareOp::Ge => ">=",
        }
    }

    /// Evaluate on two ground terms. Ordering is defined for numbers only;
    /// equality is structural, so distinct names are distinct individuals.
    pub fn evaluate(self, left: &Term, right: &Term) -> bool {
        let numbers = match (left, right) {
            (Term::Number(a), Term::Number(b)) => Some((*a, *b)),
            _ => None,
        };
        match self {
            CompareOp::Eq => left == right,
            CompareOp::Ne => left != right,
            CompareOp::Lt => numbers.is_some_and(|(a, b)| a < b),
            CompareOp::Le => numbers.is_some_and(|(a, b)| a <= b),
            CompareOp::Gt => numbers.is_some_and(|(a, b)| a > b),
            CompareOp::Ge => numbers.is_some_and(|(a, b)| a >= b),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Condition {
    Atom(Predicate),
    Not(DrsBox),
    Implies {
        antecedent: DrsBox,
        consequent: DrsBox,
    },
    Compare {
        op: CompareOp,
        left: Term,
        right: Term,
    },
}

impl Condition {
    fn substitute(&mut self, map: &HashMap<ReferentId, Term>) {
        match self {
            Condition::Atom(p) => {
                for a in &mut p.args {
                    a.substitute(map);
                }
            }
            Condition::Not(b) => b.substitute(map),
            Condition::Implies {
                antecedent,
                consequent,
            } => {
                antecedent.substitute(map);
                consequent.substitute(map);
            }
            Condition::Compare { left, right, .. } => {
                left.substitute(map);
                right.substitute(map);
            }
        }
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Condition::Atom(p) => write!(f, "{p}"),
            Condition::Not(b) => write!(f, "NOT {b}"),
            Condition::Implies {
                antecedent,
                consequent,
            } => write!(f, "{antecedent} => {consequent}"),
            Condition::Compare { op, left, right } => {
                write!(f, "{left} {} {right}", op.symbol())
            }
        }
    }
}

/// A discourse representation structure.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DrsBox {
    pub universe: Vec<Referent>,
    pub conditions: Vec<Condition>,
}

impl DrsBox {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, condition: Condition) {
        self.conditions.push(condition);
    }

    pub fn atom(&mut self, name: impl Into<String>, args: Vec<Term>) {
        self.conditions.push(Condition::Atom(Predicate::new(name, args)));
    }

    /// Replace referents throughout this box and every nested box.
    /// Substituted referents are dropped from the universes that declared them.
    pub fn substitute(&mut self, map: &HashMap<ReferentId, Term>) {
        if map.is_empty() {
            return;
        }
        self.universe.retain(|r| !map.contains_key(&r.id));
        for c in &mut self.conditions {
            c.substitute(map);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.universe.is_empty() && self.conditions.is_empty()
    }

    /// All atoms, at any depth, in document order.
    pub fn atoms(&self) -> Vec<&Predicate> {
        let mut out = Vec::new();
        self.collect_atoms(&mut out);
        out
    }

    fn collect_atoms<'a>(&'a self, out: &mut Vec<&'a Predicate>) {
        for c in &self.conditions {
            match c {
                Condition::Atom(p) => out.push(p),
                Condition::Not(b) => b.collect_atoms(out),
                Condition::Implies {
                    antecedent,
                    consequent,
                } => {
                    antecedent.collect_atoms(out);
                    consequent.collect_atoms(out);
                }
                Condition::Compare { .. } => {}
            }
        }
    }
}

impl fmt::Display for DrsBox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        let ids: Vec<ReferentId> = self.universe.iter().map(|r| r.id).collect();
        write_joined(f, &ids)?;
        write!(f, ": ")?;
        write_joined(f, &self.conditions)?;
        write!(f, "]")
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnswerShape {
    Boolean,
    Bindings,
    Count,
}

/// A compiled question: the goal box plus the terms whose bindings are wanted.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Query {
    pub goal: DrsBox,
    pub targets: Vec<Term>,
    pub shape: AnswerShape,
}

impl fmt::Display for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let shape = match self.shape {
            AnswerShape::Boolean => "yes/no",
            AnswerShape::Bindings => "which",
            AnswerShape::Count => "how many",
        };
        write!(f, "?{shape} ")?;
        write_joined(f, &self.targets)?;
        write!(f, " {}", self.goal)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Compiled {
    Assertion(DrsBox),
    Question(Query),
}

impl fmt::Display for Compiled {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Compiled::Assertion(b) => write!(f, "{b}"),
            Compiled::Question(q) => write!(f, "{q}"),
        }
    }
}
