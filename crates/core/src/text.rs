//! # Lexical Helpers
//!
//! Word-level overlap measures shared by candidate scoring, the grounding
//! check, and loop-health redundancy detection.

use std::collections::HashSet;

const STOPWORDS: &[&str] = &[
    "about", "above", "across", "after", "again", "against", "also", "among", "analysis",
    "approach", "based", "been", "being", "below", "between", "both", "could", "data", "does",
    "during", "each", "from", "further", "have", "having", "here", "into", "itself", "more",
    "most", "other", "over", "paper", "papers", "propose", "proposed", "research", "results",
    "same", "show", "shows", "some", "study", "such", "than", "that", "their", "them", "then",
    "there", "these", "they", "this", "those", "through", "under", "until", "upon", "using",
    "very", "were", "what", "when", "where", "which", "while", "will", "with", "within",
    "without", "would", "your",
];

/// Lowercased words of four or more characters that are not stopwords
pub fn significant_words(text: &str) -> HashSet<String> {
    text.to_lowercase()
        .split(|c: char| !(c.is_alphanumeric() || c == '-'))
        .map(|w| w.trim_matches('-'))
        .filter(|w| w.len() >= 4 && !STOPWORDS.contains(w))
        .map(str::to_string)
        .collect()
}

/// Number of significant words `text` shares with `reference`
pub fn shared_word_count(text: &str, reference: &HashSet<String>) -> usize {
    significant_words(text)
        .iter()
        .filter(|w| reference.contains(*w))
        .count()
}

/// Jaccard similarity of two word sets (0.0 when both are empty)
pub fn jaccard(a: &HashSet<String>, b: &HashSet<String>) -> f64 {
    let union = a.union(b).count();
    if union == 0 {
        return 0.0;
    }
    a.intersection(b).count() as f64 / union as f64
}

/// Case-insensitive containment in either direction
pub fn loosely_matches(a: &str, b: &str) -> bool {
    let a = a.trim().to_lowercase();
    let b = b.trim().to_lowercase();
    if a.is_empty() || b.is_empty() {
        return false;
    }
    a.contains(&b) || b.contains(&a)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_significant_words_filters_short_and_stopwords() {
        let words = significant_words("The graph neural networks with attention are used in this study");
        assert!(words.contains("graph"));
        assert!(words.contains("neural"));
        assert!(words.contains("attention"));
        assert!(!words.contains("with"));
        assert!(!words.contains("the"));
        assert!(!words.contains("study"));
    }

    #[test]
    fn test_shared_word_count() {
        let reference = significant_words("protein folding with diffusion models");
        assert_eq!(shared_word_count("Diffusion for protein design", &reference), 2);
    }

    #[test]
    fn test_jaccard_bounds() {
        let a = significant_words("quantum error correction codes");
        assert!((jaccard(&a, &a) - 1.0).abs() < f64::EPSILON);
        assert_eq!(jaccard(&HashSet::new(), &HashSet::new()), 0.0);
    }

    #[test]
    fn test_loosely_matches() {
        assert!(loosely_matches("Computer Science", "computer science"));
        assert!(loosely_matches("Biology", "Computational Biology"));
        assert!(!loosely_matches("Physics", "Chemistry"));
        assert!(!loosely_matches("", "Chemistry"));
    }
}
