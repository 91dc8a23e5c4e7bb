//! Property tests over the front end.

use lucid_core::{Discourse, Lexicon, compile, split_statements, tokenize};
use proptest::prelude::*;

const WORDS: &[&str] = &[
    "a", "every", "no", "the", "farmer", "farmers", "donkey", "owns", "own", "beats", "it",
    "he", "who", "which", "does", "not", "is", "are", "happy", "Tom", "Alice", "and", "if",
    "then", "of", "age", "has", "30", "greater", "than", ".", "?", ",",
];

fn sentence() -> impl Strategy<Value = String> {
    prop::collection::vec(prop::sample::select(WORDS), 1..12).prop_map(|w| w.join(" "))
}

proptest! {
    #[test]
    fn tokenizer_never_panics(text in "\\PC{0,64}") {
        let lexicon = Lexicon::builtin().unwrap();
        let _ = tokenize(&text, &lexicon);
        for (offset, stmt) in split_statements(&text) {
            prop_assert!(text[offset..].starts_with(stmt));
        }
    }

    #[test]
    fn compilation_is_deterministic(text in sentence()) {
        let lexicon = Lexicon::builtin().unwrap();
        let discourse = Discourse::default();
        let first = compile(&text, &lexicon, &discourse);
        let second = compile(&text, &lexicon, &discourse);
        prop_assert_eq!(first, second);
    }

    #[test]
    fn errors_point_inside_the_text(text in sentence()) {
        let lexicon = Lexicon::builtin().unwrap();
        if let Err(e) = compile(&text, &lexicon, &Discourse::default()) {
            prop_assert!(e.span.end <= text.len());
            prop_assert!(e.column >= 1);
        }
    }
}
