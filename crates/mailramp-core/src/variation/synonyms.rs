//! Marketing vocabulary with interchangeable phrasings

use regex::Regex;
use std::sync::OnceLock;

const SYNONYMS: &[(&str, &[&str])] = &[
    ("amazing", &["incredible", "remarkable"]),
    ("buy", &["purchase", "order"]),
    ("check out", &["take a look at", "explore"]),
    ("customers", &["clients", "members"]),
    ("discount", &["markdown", "price cut"]),
    ("exclusive", &["special", "select"]),
    ("free", &["complimentary", "at no cost"]),
    ("great", &["excellent", "fantastic"]),
    ("hello", &["hi", "greetings"]),
    ("help", &["assist", "support"]),
    ("learn", &["discover", "find out"]),
    ("new", &["latest", "fresh"]),
    ("now", &["today", "right away"]),
    ("offer", &["deal", "promotion"]),
    ("products", &["items", "goods"]),
    ("quick", &["fast", "speedy"]),
    ("start", &["begin", "get started"]),
    ("thanks", &["thank you", "many thanks"]),
];

pub(crate) fn pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        let mut terms: Vec<&str> = SYNONYMS.iter().map(|(term, _)| *term).collect();
        // longest first so multi-word terms win
        terms.sort_by_key(|t| std::cmp::Reverse(t.len()));
        let alternation = terms
            .iter()
            .map(|t| regex::escape(t))
            .collect::<Vec<_>>()
            .join("|");
        Regex::new(&format!(r"(?i)\b(?:{})\b", alternation)).expect("static synonym regex")
    })
}

/// Alternatives for a matched term, case-insensitive
pub(crate) fn alternatives(term: &str) -> Option<&'static [&'static str]> {
    let lower = term.to_lowercase();
    SYNONYMS
        .iter()
        .find(|(t, _)| *t == lower)
        .map(|(_, alts)| *alts)
}

/// Carry the capitalisation of `original` over to `replacement`
pub(crate) fn match_case(original: &str, replacement: &str) -> String {
    let letters: Vec<char> = original.chars().filter(|c| c.is_alphabetic()).collect();
    if letters.len() > 1 && letters.iter().all(|c| c.is_uppercase()) {
        return replacement.to_uppercase();
    }
    if original.chars().next().is_some_and(char::is_uppercase) {
        let mut chars = replacement.chars();
        return match chars.next() {
            Some(first) => first.to_uppercase().chain(chars).collect(),
            None => String::new(),
        };
    }
    replacement.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_pattern_matches_whole_words() {
        let found: Vec<&str> = pattern()
            .find_iter("Check out our NEW offer, renewal is free")
            .map(|m| m.as_str())
            .collect();
        assert_eq!(found, vec!["Check out", "NEW", "offer", "free"]);
    }

    #[test]
    fn test_match_case() {
        assert_eq!(match_case("Free", "complimentary"), "Complimentary");
        assert_eq!(match_case("FREE", "at no cost"), "AT NO COST");
        assert_eq!(match_case("free", "at no cost"), "at no cost");
        assert_eq!(alternatives("Great"), Some(&["excellent", "fantastic"][..]));
        assert_eq!(alternatives("unknown"), None);
    }
}
