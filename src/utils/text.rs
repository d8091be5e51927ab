//! Text processing utilities.

use std::collections::HashMap;
use std::sync::OnceLock;

use regex::Regex;

const STOP_WORDS: &[&str] = &[
    "this", "that", "with", "from", "have", "will", "been", "would", "could", "should", "their",
    "there", "about", "which", "these", "other", "more", "some", "such", "only", "than", "into",
    "over", "were", "what", "when", "where", "your", "they", "them", "also",
];

fn word_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\b[a-z]{4,15}\b").expect("static regex"))
}

/// Check if content has any non-whitespace text.
pub fn has_meaningful_content(content: &str) -> bool {
    content.chars().any(|c| !c.is_whitespace())
}

/// Derive up to `max` keyword tags from a piece of text.
///
/// Words are ranked by frequency; ties keep the order of first appearance.
pub fn keyword_tags(text: &str, max: usize) -> Vec<String> {
    let lowered = text.to_lowercase();
    let mut counts: HashMap<&str, (usize, usize)> = HashMap::new();

    for (position, m) in word_pattern().find_iter(&lowered).enumerate() {
        let word = m.as_str();
        if STOP_WORDS.contains(&word) {
            continue;
        }
        counts.entry(word).or_insert((0, position)).0 += 1;
    }

    let mut ranked: Vec<(&str, (usize, usize))> = counts.into_iter().collect();
    ranked.sort_by(|a, b| b.1.0.cmp(&a.1.0).then(a.1.1.cmp(&b.1.1)));
    ranked
        .into_iter()
        .take(max)
        .map(|(word, _)| word.to_string())
        .collect()
}

/// Count whitespace-separated tokens.
pub fn count_words(text: &str) -> usize {
    text.split_whitespace().count()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_has_meaningful_content() {
        assert!(!has_meaningful_content(""));
        assert!(!has_meaningful_content("   \n\t  "));
        assert!(has_meaningful_content("  a  "));
    }

    #[test]
    fn test_keyword_tags_rank_by_frequency() {
        let text = "Rust compiler. The compiler checks borrow rules; borrow checker \
                    runs inside the compiler with other passes.";
        let tags = keyword_tags(text, 2);
        assert_eq!(tags, vec!["compiler".to_string(), "borrow".to_string()]);
    }

    #[test]
    fn test_keyword_tags_skip_stop_words_and_short_words() {
        let tags = keyword_tags("this that with cat dog from", 5);
        assert!(tags.is_empty());
    }

    #[test]
    fn test_count_words() {
        assert_eq!(count_words("one two\nthree"), 3);
        assert_eq!(count_words("   "), 0);
    }
}
