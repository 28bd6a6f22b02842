//! Keyword extraction from free-text queries.

use std::collections::HashSet;

/// Maximum number of keywords kept per query.
pub const MAX_KEYWORDS: usize = 20;

/// French and English function words dropped before matching.
const STOP_WORDS: &[&str] = &[
    // French
    "le", "la", "les", "de", "du", "des", "un", "une", "et", "ou", "pour", "avec", "sur", "en",
    "au", "aux", "dans", "par", "chez", "je", "nous", "vous", "ils", "elles", "mon", "ma",
    "mes", "ton", "ta", "tes", "son", "sa", "ses", "qui", "que", "est", "sont",
    // English
    "the", "an", "and", "or", "for", "with", "on", "in", "at", "to", "of", "by", "from", "is",
    "are", "me", "my", "we", "our", "you", "your", "find", "looking", "who", "that", "this",
];

/// Extract keywords: alphanumeric runs (any script), minus stop words and
/// single characters, deduplicated case-insensitively in first-occurrence
/// order, capped at [`MAX_KEYWORDS`].
pub fn extract_keywords(query: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    query
        .split(|c: char| !c.is_alphanumeric())
        .filter(|token| token.chars().count() > 1)
        .filter(|token| {
            let lower = token.to_lowercase();
            !STOP_WORDS.contains(&lower.as_str()) && seen.insert(lower)
        })
        .take(MAX_KEYWORDS)
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extracts_and_filters_stop_words() {
        let keywords = extract_keywords("Je cherche un poste de développeur Rust à Lyon");
        assert_eq!(
            keywords,
            vec!["cherche", "poste", "développeur", "Rust", "Lyon"]
        );
    }

    #[test]
    fn test_english_query() {
        let keywords = extract_keywords("Find me a senior data engineer for the Paris office");
        assert_eq!(keywords, vec!["senior", "data", "engineer", "Paris", "office"]);
    }

    #[test]
    fn test_drops_single_characters_and_punctuation() {
        let keywords = extract_keywords("C, R & Go: l'équipe x-ray!");
        assert_eq!(keywords, vec!["Go", "équipe", "ray"]);
    }

    #[test]
    fn test_deduplicates_case_insensitively() {
        let keywords = extract_keywords("rust Rust RUST tokio");
        assert_eq!(keywords, vec!["rust", "tokio"]);
    }

    #[test]
    fn test_caps_at_twenty() {
        let query: String = (0..30).map(|i| format!("term{} ", i)).collect();
        let keywords = extract_keywords(&query);
        assert_eq!(keywords.len(), MAX_KEYWORDS);
        assert_eq!(keywords[0], "term0");
        assert_eq!(keywords[19], "term19");
    }

    #[test]
    fn test_empty_and_stop_word_only() {
        assert!(extract_keywords("").is_empty());
        assert!(extract_keywords("le la les and the").is_empty());
    }
}
