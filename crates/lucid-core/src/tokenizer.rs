use regex::Regex;
use std::sync::LazyLock;

use crate::error::{CompileError, Span};
use crate::lexicon::{Category, Lexicon, Punctuation, Reading};

static SCANNER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?x)
          (?P<space>\s+)
        | (?P<possessive>'s\b)
        | (?P<number>-?[0-9]+)
        | (?P<word>[A-Za-z][A-Za-z0-9_-]*)
        | (?P<punct>[.?,])",
    )
    .unwrap()
});
static STATEMENT_END: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[.?]").unwrap());

/// A word, number, or punctuation mark together with every lexical reading
/// it admits. The parser picks among the readings.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Token {
    pub text: String,
    pub span: Span,
    pub index: usize,
    pub readings: Vec<Reading>,
}

impl Token {
    /// Category of the first reading.
    pub fn category(&self) -> Option<Category> {
        self.readings.first().map(Reading::category)
    }

    pub fn has(&self, category: Category) -> bool {
        self.readings.iter().any(|r| r.category() == category)
    }

    pub fn is(&self, reading: &Reading) -> bool {
        self.readings.contains(reading)
    }

    pub fn is_punct(&self, p: Punctuation) -> bool {
        self.is(&Reading::Punctuation(p))
    }
}

/// Scan one statement into tokens. Stops at the first character sequence
/// the scanner cannot classify or the first word with no lexical reading.
pub fn tokenize(text: &str, lexicon: &Lexicon) -> Result<Vec<Token>, CompileError> {
    let mut tokens = Vec::new();
    let mut cursor = 0;

    for caps in SCANNER.captures_iter(text) {
        let Some(m) = caps.get(0) else { continue };
        if m.start() > cursor {
            return Err(unscannable(text, cursor));
        }
        cursor = m.end();
        if caps.name("space").is_some() {
            continue;
        }
        let span = Span::new(m.start(), m.end());
        let readings = if caps.name("possessive").is_some() {
            vec![Reading::Possessive]
        } else if caps.name("number").is_some() {
            match m.as_str().parse::<i64>() {
                Ok(n) => vec![Reading::Number(n)],
                Err(_) => {
                    return Err(CompileError::lexical(text, span, "number out of range"));
                }
            }
        } else if caps.name("punct").is_some() {
            let p = match m.as_str() {
                "." => Punctuation::Period,
                "?" => Punctuation::QuestionMark,
                _ => Punctuation::Comma,
            };
            vec![Reading::Punctuation(p)]
        } else {
            let readings = lexicon.lookup(m.as_str());
            if readings.is_empty() {
                return Err(CompileError::lexical(text, span, "unknown word"));
            }
            readings
        };
        tokens.push(Token {
            text: m.as_str().to_string(),
            span,
            index: tokens.len(),
            readings,
        });
    }

    if cursor < text.len() {
        return Err(unscannable(text, cursor));
    }
    tracing::trace!(count = tokens.len(), "tokenized statement");
    Ok(tokens)
}

/// Error for the run of non-space characters starting at `at`.
fn unscannable(text: &str, at: usize) -> CompileError {
    let end = text[at..]
        .find(char::is_whitespace)
        .map(|i| at + i)
        .unwrap_or(text.len());
    CompileError::lexical(text, Span::new(at, end), "unrecognised characters")
}

/// Split a document into statements, each ending at `.` or `?`.
/// Returns each statement with its byte offset. Trailing text without a
/// terminator is returned as a final statement so the parser can reject it.
pub fn split_statements(text: &str) -> Vec<(usize, &str)> {
    let mut out = Vec::new();
    let mut last = 0;

    for m in STATEMENT_END.find_iter(text) {
        push_trimmed(&mut out, text, last, m.end());
        last = m.end();
    }
    push_trimmed(&mut out, text, last, text.len());
    out
}

fn push_trimmed<'a>(out: &mut Vec<(usize, &'a str)>, text: &'a str, start: usize, end: usize) {
    let piece = &text[start..end];
    let lead = piece.len() - piece.trim_start().len();
    let trimmed = piece.trim();
    if !trimmed.is_empty() {
        out.push((start + lead, trimmed));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CompileErrorKind;

    fn lex() -> Lexicon {
        Lexicon::builtin().unwrap()
    }

    #[test]
    fn test_tokenize_sentence() {
        let tokens = tokenize("A farmer owns a donkey.", &lex()).unwrap();
        let texts: Vec<&str> = tokens.iter().map(|t| t.text.as_str()).collect();
        assert_eq!(texts, vec!["A", "farmer", "owns", "a", "donkey", "."]);
        assert_eq!(tokens[1].category(), Some(Category::Noun));
        assert_eq!(tokens[2].category(), Some(Category::Verb));
        assert_eq!(tokens[5].index, 5);
        assert_eq!(tokens[2].span, Span::new(9, 13));
    }

    #[test]
    fn test_possessive_and_number() {
        let tokens = tokenize("Alice's age is 30.", &lex()).unwrap();
        assert_eq!(tokens[1].readings, vec![Reading::Possessive]);
        assert_eq!(tokens[4].readings, vec![Reading::Number(30)]);
    }

    #[test]
    fn test_unknown_word_reports_position() {
        let err = tokenize("Frobnicate walks.", &lex()).unwrap_err();
        assert_eq!(err.kind, CompileErrorKind::Lexical);
        assert_eq!(err.column, 1);
        assert_eq!(err.text, "Frobnicate");
    }

    #[test]
    fn test_unscannable_characters() {
        let err = tokenize("Tom walks; Bob talks.", &lex()).unwrap_err();
        assert_eq!(err.kind, CompileErrorKind::Lexical);
        assert_eq!(err.text, ";");
        assert_eq!(err.column, 10);
    }

    #[test]
    fn test_split_statements_offsets() {
        let text = "A man walks.  He talks? Tom";
        let parts = split_statements(text);
        assert_eq!(
            parts,
            vec![(0, "A man walks."), (14, "He talks?"), (24, "Tom")]
        );
    }

    #[test]
    fn test_split_statements_empty() {
        assert!(split_statements("   ").is_empty());
    }
}
