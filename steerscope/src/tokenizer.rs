//! Sentence tokenization for the microscope

use regex::Regex;
use serde::Serialize;
use std::sync::OnceLock;

/// Word runs, or any single character that is neither word nor whitespace
const TOKEN_PATTERN: &str = r"\b\w+\b|[^\w\s]";

fn token_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(TOKEN_PATTERN).expect("token pattern is valid"))
}

/// A token of an input sentence
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Token {
    /// Token text
    pub text: String,
    /// Position in the token sequence (0-indexed)
    pub position: usize,
}

/// Split a sentence into word and punctuation tokens
pub fn tokenize(sentence: &str) -> Vec<String> {
    token_regex()
        .find_iter(sentence)
        .map(|m| m.as_str().to_string())
        .collect()
}

/// Tokenize, keeping each token's position
pub fn tokenize_positions(sentence: &str) -> Vec<Token> {
    tokenize(sentence)
        .into_iter()
        .enumerate()
        .map(|(position, text)| Token { text, position })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_words_and_punctuation() {
        assert_eq!(tokenize("Hello, world!"), vec!["Hello", ",", "world", "!"]);
    }

    #[test]
    fn test_empty_and_whitespace() {
        assert!(tokenize("").is_empty());
        assert!(tokenize("   \n\t").is_empty());
    }

    #[test]
    fn test_repeated_punctuation_is_split() {
        assert_eq!(tokenize("wait...what?!"), vec!["wait", ".", ".", ".", "what", "?", "!"]);
    }

    #[test]
    fn test_underscores_and_digits_are_word_chars() {
        assert_eq!(tokenize("snake_case 42x"), vec!["snake_case", "42x"]);
    }

    #[test]
    fn test_apostrophe_splits_word() {
        assert_eq!(tokenize("don't"), vec!["don", "'", "t"]);
    }

    #[test]
    fn test_positions() {
        let tokens = tokenize_positions("a b.");
        assert_eq!(tokens.len(), 3);
        assert_eq!(tokens[2], Token { text: ".".to_string(), position: 2 });
    }
}
