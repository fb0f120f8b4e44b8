//! Text processing utilities: tokenising for lexical ranking and title derivation

use std::borrow::Cow;
use std::collections::HashSet;
use lazy_static::lazy_static;
use regex::Regex;

/// Titles longer than this many characters are cut and get an ellipsis.
pub const TITLE_MAX_CHARS: usize = 47;

lazy_static! {
    static ref TOKEN_REGEX: Regex = Regex::new(r"[\p{L}\p{N}]+").unwrap();
    static ref STOP_WORDS: HashSet<&'static str> = [
        "the", "a", "an", "and", "or", "but", "in", "on", "at", "to", "for",
        "of", "with", "by", "is", "am", "are", "was", "were", "be", "been",
        "being", "have", "has", "had", "do", "does", "did", "will", "would",
        "shall", "should", "may", "might", "must", "can", "could", "i", "you",
        "he", "she", "it", "we", "they", "me", "him", "her", "us", "them",
        "my", "your", "his", "its", "our", "their", "this", "that", "these",
        "those", "from", "as", "so", "if", "then", "than", "too", "very",
        "what", "which", "who", "whom", "how", "when", "where", "why",
        "about", "into", "over", "not", "no", "yes", "all", "any", "some",
    ]
    .into_iter()
    .collect();
}

pub struct TextUtils;

impl TextUtils {
    /// Lowercased, stop-word free, stemmed terms in document order.
    pub fn tokenize(text: &str) -> Vec<String> {
        let lower = text.to_lowercase();
        TOKEN_REGEX
            .find_iter(&lower)
            .map(|m| m.as_str())
            .filter(|word| word.chars().count() >= 2 && !STOP_WORDS.contains(word))
            .map(|word| Self::stem(word).into_owned())
            .collect()
    }

    /// Distinct query terms, first occurrence order preserved.
    pub fn query_terms(query: &str) -> Vec<String> {
        let mut seen = HashSet::new();
        Self::tokenize(query)
            .into_iter()
            .filter(|term| seen.insert(term.clone()))
            .collect()
    }

    /// Light suffix stripping so that "issues" meets "issue".
    pub fn stem(word: &str) -> Cow<'_, str> {
        let len = word.chars().count();
        if len > 4 && word.ends_with("ies") {
            Cow::Owned(format!("{}y", &word[..word.len() - 3]))
        } else if len > 5 && word.ends_with("ing") {
            Cow::Borrowed(&word[..word.len() - 3])
        } else if len > 4 && word.ends_with("ed") {
            Cow::Borrowed(&word[..word.len() - 2])
        } else if len > 3 && word.ends_with('s') && !word.ends_with("ss") {
            Cow::Borrowed(&word[..word.len() - 1])
        } else {
            Cow::Borrowed(word)
        }
    }

    /// Prefix shared by every lowercased word that stems to `stem`, for SQL
    /// prefiltering. Stems are prefixes of their word except for the `y` an
    /// `ies` plural gains, so that `y` is dropped at any length.
    pub fn match_root(stem: &str) -> &str {
        match stem.strip_suffix('y') {
            Some(root) if !root.is_empty() => root,
            _ => stem,
        }
    }

    /// First `max_chars` characters, with "..." appended when anything was cut.
    pub fn truncate_with_ellipsis(text: &str, max_chars: usize) -> Cow<'_, str> {
        match text.char_indices().nth(max_chars) {
            None => Cow::Borrowed(text),
            Some((cut, _)) => Cow::Owned(format!("{}...", &text[..cut])),
        }
    }

    /// Conversation title from the first user message.
    pub fn derive_title(first_message: &str) -> String {
        Self::truncate_with_ellipsis(first_message, TITLE_MAX_CHARS)
            .replace("\r\n", " ")
            .replace('\n', " ")
            .trim()
            .to_string()
    }
}
