//! Closed vocabulary.
//!
//! Function words are fixed. Content words (nouns, verbs, adjectives, proper
//! names) come from a built-in vocabulary that callers extend with TOML files.
//! Lookup fails closed: a word with no reading is a lexical error upstream.

use std::collections::HashMap;
use std::fmt;

use serde::Deserialize;

use crate::drs::{Gender, Sort};
use crate::error::LexiconError;

const DEFAULT_VOCABULARY: &str = include_str!("default_lexicon.toml");

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum GrammaticalNumber {
    Singular,
    Plural,
}

impl fmt::Display for GrammaticalNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GrammaticalNumber::Singular => write!(f, "singular"),
            GrammaticalNumber::Plural => write!(f, "plural"),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Transitivity {
    Intransitive,
    Transitive,
    Either,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Determiner {
    /// a, an, some
    Indefinite,
    /// every, each
    Universal,
    /// no
    Negative,
    /// the
    Definite,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Case {
    Subject,
    Object,
    /// "it" serves both positions.
    Either,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct PronounForm {
    pub surface: &'static str,
    /// Personal pronouns pick persons; neuter ones pick things and events.
    pub personal: bool,
    pub gender: Option<Gender>,
    pub case: Case,
    pub reflexive: bool,
}

impl PronounForm {
    pub fn admits(&self, sort: Sort, gender: Option<Gender>) -> bool {
        if self.personal {
            sort == Sort::Person
                && match (self.gender, gender) {
                    (Some(a), Some(b)) => a == b,
                    _ => true,
                }
        } else {
            matches!(sort, Sort::Thing | Sort::Event)
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RelativePronoun {
    Who,
    Which,
    That,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum WhWord {
    Who,
    What,
    Which,
    How,
    Many,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ComparisonWord {
    Greater,
    Less,
    Than,
    Equal,
    At,
    Least,
    Most,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Punctuation {
    Period,
    QuestionMark,
    Comma,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct NounForm {
    pub lemma: String,
    pub number: GrammaticalNumber,
    pub sort: Sort,
    pub gender: Option<Gender>,
    pub relational: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Inflection {
    /// "own": after auxiliaries, and finite with plural subjects.
    Base,
    /// "owns"
    ThirdSingular,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct VerbForm {
    pub lemma: String,
    pub inflection: Inflection,
    pub transitivity: Transitivity,
    pub subject: Option<Sort>,
}

impl VerbForm {
    /// Whether this form can head a finite verb phrase for a subject of `number`.
    pub fn agrees_with(&self, number: GrammaticalNumber) -> bool {
        matches!(
            (self.inflection, number),
            (Inflection::ThirdSingular, GrammaticalNumber::Singular)
                | (Inflection::Base, GrammaticalNumber::Plural)
        )
    }

    pub fn takes_object(&self) -> bool {
        !matches!(self.transitivity, Transitivity::Intransitive)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct NameForm {
    pub name: String,
    pub sort: Sort,
    pub gender: Option<Gender>,
}

/// One way a surface word can be read.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Reading {
    Determiner(Determiner),
    Pronoun(PronounForm),
    Relative(RelativePronoun),
    Wh(WhWord),
    /// does
    Auxiliary(GrammaticalNumber),
    /// is, are
    Copula(GrammaticalNumber),
    Not,
    And,
    If,
    Then,
    Preposition(&'static str),
    Comparison(ComparisonWord),
    /// The clitic `'s`.
    Possessive,
    Noun(NounForm),
    Verb(VerbForm),
    Adjective(String),
    Name(NameForm),
    Number(i64),
    Punctuation(Punctuation),
}

/// Coarse grammatical category, used for diagnostics and for deciding
/// whether two readings compete.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Category {
    Determiner,
    Pronoun,
    Relative,
    WhWord,
    Auxiliary,
    Copula,
    Negation,
    Connective,
    Preposition,
    Comparison,
    Possessive,
    Noun,
    Verb,
    Adjective,
    ProperName,
    Number,
    Punctuation,
}

impl Category {
    pub fn describe(self) -> &'static str {
        match self {
            Category::Determiner => "determiner",
            Category::Pronoun => "pronoun",
            Category::Relative => "relative pronoun",
            Category::WhWord => "question word",
            Category::Auxiliary => "'does'",
            Category::Copula => "'is'",
            Category::Negation => "'not'",
            Category::Connective => "connective",
            Category::Preposition => "preposition",
            Category::Comparison => "comparison",
            Category::Possessive => "possessive",
            Category::Noun => "noun",
            Category::Verb => "verb",
            Category::Adjective => "adjective",
            Category::ProperName => "proper name",
            Category::Number => "number",
            Category::Punctuation => "punctuation",
        }
    }
}

impl Reading {
    pub fn category(&self) -> Category {
        match self {
            Reading::Determiner(_) => Category::Determiner,
            Reading::Pronoun(_) => Category::Pronoun,
            Reading::Relative(_) => Category::Relative,
            Reading::Wh(_) => Category::WhWord,
            Reading::Auxiliary(_) => Category::Auxiliary,
            Reading::Copula(_) => Category::Copula,
            Reading::Not => Category::Negation,
            Reading::And | Reading::If | Reading::Then => Category::Connective,
            Reading::Preposition(_) => Category::Preposition,
            Reading::Comparison(_) => Category::Comparison,
            Reading::Possessive => Category::Possessive,
            Reading::Noun(_) => Category::Noun,
            Reading::Verb(_) => Category::Verb,
            Reading::Adjective(_) => Category::Adjective,
            Reading::Name(_) => Category::ProperName,
            Reading::Number(_) => Category::Number,
            Reading::Punctuation(_) => Category::Punctuation,
        }
    }
}

impl fmt::Display for Reading {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reading::Noun(n) => write!(
                f,
                "noun '{}' ({}{})",
                n.lemma,
                n.sort.name(),
                if n.relational { ", relational" } else { "" }
            ),
            Reading::Verb(v) => write!(f, "verb '{}'", v.lemma),
            Reading::Adjective(a) => write!(f, "adjective '{a}'"),
            Reading::Name(n) => write!(f, "name '{}' ({})", n.name, n.sort.name()),
            other => write!(f, "{}", other.category().describe()),
        }
    }
}

/// Grammar positions the parser reports against when it rejects input.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Slot {
    SentenceStart,
    QuestionStart,
    NounPhrase,
    NounAfterDeterminer,
    VerbPhrase,
    BaseVerb,
    CopulaComplement,
    RelativeBody,
    RelationalNoun,
    Terminator,
}

impl Slot {
    /// Categories that may legally appear at this position.
    pub fn legal_categories(self) -> &'static [Category] {
        use Category::*;
        match self {
            Slot::SentenceStart => &[Determiner, ProperName, Pronoun, Number, Connective],
            Slot::QuestionStart => &[WhWord, Auxiliary, Copula],
            Slot::NounPhrase => &[Determiner, ProperName, Pronoun, Number],
            Slot::NounAfterDeterminer => &[Adjective, Noun],
            Slot::VerbPhrase => &[Verb, Copula, Auxiliary],
            Slot::BaseVerb => &[Verb],
            Slot::CopulaComplement => &[Determiner, Adjective, Comparison, Preposition, ProperName, Number, Pronoun],
            Slot::RelativeBody => &[Verb, Copula, Auxiliary, Determiner, ProperName, Pronoun],
            Slot::RelationalNoun => &[Noun],
            Slot::Terminator => &[Punctuation],
        }
    }

    pub fn describe(self) -> String {
        let names: Vec<&str> = self
            .legal_categories()
            .iter()
            .map(|c| c.describe())
            .collect();
        match names.split_last() {
            Some((last, rest)) if !rest.is_empty() => {
                format!("{} or {}", rest.join(", "), last)
            }
            Some((last, _)) => (*last).to_string(),
            None => String::new(),
        }
    }
}

// TOML layout of vocabulary files.

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct VocabularyFile {
    #[serde(default)]
    noun: Vec<NounEntry>,
    #[serde(default)]
    verb: Vec<VerbEntry>,
    #[serde(default)]
    adjective: Vec<AdjectiveEntry>,
    #[serde(default)]
    name: Vec<NameEntry>,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NounEntry {
    pub lemma: String,
    #[serde(default)]
    pub plural: Option<String>,
    pub sort: Sort,
    #[serde(default)]
    pub gender: Option<Gender>,
    #[serde(default)]
    pub relational: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct VerbEntry {
    pub lemma: String,
    #[serde(default)]
    pub third: Option<String>,
    pub transitivity: Transitivity,
    #[serde(default)]
    pub subject: Option<Sort>,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AdjectiveEntry {
    pub lemma: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NameEntry {
    pub name: String,
    pub sort: Sort,
    #[serde(default)]
    pub gender: Option<Gender>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct LexiconStats {
    pub nouns: usize,
    pub verbs: usize,
    pub adjectives: usize,
    pub names: usize,
}

/// Word → readings. Content maps are keyed by lowercase surface form,
/// names by their exact spelling.
#[derive(Clone, Debug, Default)]
pub struct Lexicon {
    nouns: HashMap<String, Vec<NounForm>>,
    verbs: HashMap<String, Vec<VerbForm>>,
    adjectives: HashMap<String, String>,
    names: HashMap<String, NameForm>,
    stats: LexiconStats,
}

impl Lexicon {
    /// Function words only.
    pub fn empty() -> Self {
        Self::default()
    }

    /// The built-in vocabulary.
    pub fn builtin() -> Result<Self, LexiconError> {
        let mut lexicon = Self::empty();
        lexicon.extend_from_toml(DEFAULT_VOCABULARY)?;
        Ok(lexicon)
    }

    /// Merge entries from a TOML vocabulary document.
    pub fn extend_from_toml(&mut self, src: &str) -> Result<(), LexiconError> {
        let file: VocabularyFile = toml::from_str(src)?;
        for n in file.noun {
            self.add_noun(n)?;
        }
        for v in file.verb {
            self.add_verb(v)?;
        }
        for a in file.adjective {
            self.add_adjective(&a.lemma)?;
        }
        for n in file.name {
            self.add_name(n)?;
        }
        tracing::debug!(
            nouns = self.stats.nouns,
            verbs = self.stats.verbs,
            adjectives = self.stats.adjectives,
            names = self.stats.names,
            "lexicon extended"
        );
        Ok(())
    }

    pub fn add_noun(&mut self, entry: NounEntry) -> Result<(), LexiconError> {
        let lemma = checked_word(&entry.lemma, "noun")?;
        let plural = match &entry.plural {
            Some(p) => checked_word(p, "noun plural")?,
            None => format!("{lemma}s"),
        };
        let form = |number| NounForm {
            lemma: lemma.clone(),
            number,
            sort: entry.sort,
            gender: entry.gender,
            relational: entry.relational,
        };
        push_unique(
            self.nouns.entry(lemma.clone()).or_default(),
            form(GrammaticalNumber::Singular),
        );
        push_unique(
            self.nouns.entry(plural).or_default(),
            form(GrammaticalNumber::Plural),
        );
        self.stats.nouns += 1;
        Ok(())
    }

    pub fn add_verb(&mut self, entry: VerbEntry) -> Result<(), LexiconError> {
        let lemma = checked_word(&entry.lemma, "verb")?;
        let third = match &entry.third {
            Some(t) => checked_word(t, "verb third person")?,
            None => format!("{lemma}s"),
        };
        let form = |inflection| VerbForm {
            lemma: lemma.clone(),
            inflection,
            transitivity: entry.transitivity,
            subject: entry.subject,
        };
        push_unique(
            self.verbs.entry(lemma.clone()).or_default(),
            form(Inflection::Base),
        );
        push_unique(
            self.verbs.entry(third).or_default(),
            form(Inflection::ThirdSingular),
        );
        self.stats.verbs += 1;
        Ok(())
    }

    pub fn add_adjective(&mut self, lemma: &str) -> Result<(), LexiconError> {
        let lemma = checked_word(lemma, "adjective")?;
        if self.adjectives.insert(lemma.clone(), lemma).is_none() {
            self.stats.adjectives += 1;
        }
        Ok(())
    }

    pub fn add_name(&mut self, entry: NameEntry) -> Result<(), LexiconError> {
        let name = entry.name.trim();
        if name.is_empty() || !name.chars().all(|c| c.is_alphanumeric() || c == '_' || c == '-') {
            return Err(LexiconError::Invalid(format!(
                "name '{}' must be a single word",
                entry.name
            )));
        }
        if function_word(&name.to_lowercase()).is_some() {
            return Err(LexiconError::Invalid(format!(
                "name '{name}' collides with a function word"
            )));
        }
        let form = NameForm {
            name: name.to_string(),
            sort: entry.sort,
            gender: entry.gender,
        };
        if self.names.insert(name.to_string(), form).is_none() {
            self.stats.names += 1;
        }
        Ok(())
    }

    /// Every reading of `word`. Function and content words match
    /// case-insensitively, so a capitalised sentence-initial "Every" or
    /// "Farmers" still reads; proper names match their exact spelling.
    pub fn lookup(&self, word: &str) -> Vec<Reading> {
        let lower = word.to_lowercase();
        let mut readings = function_word(&lower).unwrap_or_default();
        if let Some(nouns) = self.nouns.get(&lower) {
            readings.extend(nouns.iter().cloned().map(Reading::Noun));
        }
        if let Some(verbs) = self.verbs.get(&lower) {
            readings.extend(verbs.iter().cloned().map(Reading::Verb));
        }
        if let Some(adj) = self.adjectives.get(&lower) {
            readings.push(Reading::Adjective(adj.clone()));
        }
        if let Some(name) = self.names.get(word) {
            readings.push(Reading::Name(name.clone()));
        }
        readings
    }

    pub fn name(&self, name: &str) -> Option<&NameForm> {
        self.names.get(name)
    }

    pub fn stats(&self) -> LexiconStats {
        self.stats
    }
}

fn checked_word(word: &str, what: &str) -> Result<String, LexiconError> {
    let w = word.trim().to_lowercase();
    if w.is_empty() || !w.chars().all(|c| c.is_alphanumeric() || c == '_' || c == '-') {
        return Err(LexiconError::Invalid(format!(
            "{what} '{word}' must be a single word"
        )));
    }
    if function_word(&w).is_some() {
        return Err(LexiconError::Invalid(format!(
            "{what} '{word}' collides with a function word"
        )));
    }
    Ok(w)
}

fn push_unique<T: PartialEq>(v: &mut Vec<T>, item: T) {
    if !v.contains(&item) {
        v.push(item);
    }
}

fn pronoun(
    surface: &'static str,
    personal: bool,
    gender: Option<Gender>,
    case: Case,
    reflexive: bool,
) -> Reading {
    Reading::Pronoun(PronounForm {
        surface,
        personal,
        gender,
        case,
        reflexive,
    })
}

/// Fixed readings of function words, keyed by lowercase spelling.
fn function_word(word: &str) -> Option<Vec<Reading>> {
    use GrammaticalNumber::{Plural, Singular};
    let m = Some(Gender::Masculine);
    let f = Some(Gender::Feminine);
    let readings = match word {
        "a" | "an" | "some" => vec![Reading::Determiner(Determiner::Indefinite)],
        "every" | "each" => vec![Reading::Determiner(Determiner::Universal)],
        "no" => vec![Reading::Determiner(Determiner::Negative)],
        "the" => vec![Reading::Determiner(Determiner::Definite)],
        "he" => vec![pronoun("he", true, m, Case::Subject, false)],
        "she" => vec![pronoun("she", true, f, Case::Subject, false)],
        "him" => vec![pronoun("him", true, m, Case::Object, false)],
        "her" => vec![pronoun("her", true, f, Case::Object, false)],
        "it" => vec![pronoun("it", false, None, Case::Either, false)],
        "himself" => vec![pronoun("himself", true, m, Case::Object, true)],
        "herself" => vec![pronoun("herself", true, f, Case::Object, true)],
        "itself" => vec![pronoun("itself", false, None, Case::Object, true)],
        "who" => vec![
            Reading::Relative(RelativePronoun::Who),
            Reading::Wh(WhWord::Who),
        ],
        "which" => vec![
            Reading::Relative(RelativePronoun::Which),
            Reading::Wh(WhWord::Which),
        ],
        "that" => vec![Reading::Relative(RelativePronoun::That)],
        "what" => vec![Reading::Wh(WhWord::What)],
        "how" => vec![Reading::Wh(WhWord::How)],
        "many" => vec![Reading::Wh(WhWord::Many)],
        "does" => vec![Reading::Auxiliary(Singular)],
        "is" => vec![Reading::Copula(Singular)],
        "are" => vec![Reading::Copula(Plural)],
        "not" => vec![Reading::Not],
        "and" => vec![Reading::And],
        "if" => vec![Reading::If],
        "then" => vec![Reading::Then],
        "of" => vec![Reading::Preposition("of")],
        "in" => vec![Reading::Preposition("in")],
        "on" => vec![Reading::Preposition("on")],
        "to" => vec![Reading::Preposition("to")],
        "from" => vec![Reading::Preposition("from")],
        "with" => vec![Reading::Preposition("with")],
        "for" => vec![Reading::Preposition("for")],
        "by" => vec![Reading::Preposition("by")],
        "about" => vec![Reading::Preposition("about")],
        "at" => vec![
            Reading::Preposition("at"),
            Reading::Comparison(ComparisonWord::At),
        ],
        "greater" => vec![Reading::Comparison(ComparisonWord::Greater)],
        "less" => vec![Reading::Comparison(ComparisonWord::Less)],
        "than" => vec![Reading::Comparison(ComparisonWord::Than)],
        "equal" => vec![Reading::Comparison(ComparisonWord::Equal)],
        "least" => vec![Reading::Comparison(ComparisonWord::Least)],
        "most" => vec![Reading::Comparison(ComparisonWord::Most)],
        _ => return None,
    };
    Some(readings)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lex() -> Lexicon {
        Lexicon::builtin().unwrap()
    }

    #[test]
    fn test_builtin_loads() {
        let stats = lex().stats();
        assert!(stats.nouns > 20);
        assert!(stats.verbs > 20);
        assert!(stats.names > 10);
    }

    #[test]
    fn test_determiner_is_case_insensitive() {
        let l = lex();
        assert_eq!(
            l.lookup("Every"),
            vec![Reading::Determiner(Determiner::Universal)]
        );
    }

    #[test]
    fn test_names_are_case_sensitive() {
        let l = lex();
        assert!(matches!(l.lookup("Tom").as_slice(), [Reading::Name(_)]));
        assert!(l.lookup("tom").is_empty());
    }

    #[test]
    fn test_irregular_forms() {
        let l = lex();
        let men = l.lookup("men");
        assert!(matches!(
            men.as_slice(),
            [Reading::Noun(NounForm { number: GrammaticalNumber::Plural, .. })]
        ));
        let has = l.lookup("has");
        assert!(matches!(
            has.as_slice(),
            [Reading::Verb(VerbForm { inflection: Inflection::ThirdSingular, .. })]
        ));
    }

    #[test]
    fn test_unknown_word_has_no_readings() {
        assert!(lex().lookup("Frobnicate").is_empty());
    }

    #[test]
    fn test_extension_adds_words() {
        let mut l = lex();
        l.extend_from_toml(
            r#"
            [[noun]]
            lemma = "tractor"
            sort = "thing"

            [[verb]]
            lemma = "repair"
            transitivity = "transitive"
            "#,
        )
        .unwrap();
        assert!(matches!(l.lookup("tractors").as_slice(), [Reading::Noun(_)]));
        assert!(matches!(l.lookup("repairs").as_slice(), [Reading::Verb(_)]));
    }

    #[test]
    fn test_extension_rejects_function_word() {
        let mut l = lex();
        let err = l
            .extend_from_toml("[[adjective]]\nlemma = \"every\"\n")
            .unwrap_err();
        assert!(matches!(err, LexiconError::Invalid(_)));
    }

    #[test]
    fn test_extension_rejects_unknown_fields() {
        let mut l = lex();
        let err = l
            .extend_from_toml("[[noun]]\nlemma = \"x\"\nsort = \"thing\"\ncolour = 1\n")
            .unwrap_err();
        assert!(matches!(err, LexiconError::Parse(_)));
    }

    #[test]
    fn test_at_is_preposition_and_comparison() {
        let categories: Vec<Category> = lex().lookup("at").iter().map(Reading::category).collect();
        assert_eq!(categories, vec![Category::Preposition, Category::Comparison]);
    }

    #[test]
    fn test_slot_describe() {
        assert_eq!(Slot::NounAfterDeterminer.describe(), "adjective or noun");
        assert_eq!(Slot::RelationalNoun.describe(), "noun");
    }

    #[test]
    fn test_pronoun_admits() {
        let he = PronounForm {
            surface: "he",
            personal: true,
            gender: Some(Gender::Masculine),
            case: Case::Subject,
            reflexive: false,
        };
        assert!(he.admits(Sort::Person, None));
        assert!(he.admits(Sort::Person, Some(Gender::Masculine)));
        assert!(!he.admits(Sort::Person, Some(Gender::Feminine)));
        assert!(!he.admits(Sort::Thing, None));
    }
}
