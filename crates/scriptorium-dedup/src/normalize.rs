//! Text normalization shared by the fingerprint fields and the fuzzy layer.

/// English function words ignored by the title Soundex key and by SimHash shingling.
pub const STOPWORDS: &[&str] = &[
    "a", "about", "after", "against", "all", "also", "an", "and", "any", "are", "as", "at", "be", "been",
    "before", "but", "by", "can", "could", "did", "do", "does", "for", "from", "had", "has", "have", "he",
    "her", "his", "how", "i", "if", "in", "into", "is", "it", "its", "more", "no", "not", "of", "on",
    "or", "our", "she", "so", "some", "such", "than", "that", "the", "their", "them", "then", "there",
    "these", "they", "this", "those", "to", "up", "upon", "was", "we", "were", "what", "when", "which",
    "who", "will", "with", "would", "you",
];

pub fn is_stopword(token: &str) -> bool {
    STOPWORDS.binary_search(&token).is_ok()
}

/// Lowercased content with every whitespace run collapsed to one space.
pub fn normalize_content(content: &str) -> String {
    content
        .split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Lowercased alphanumeric tokens; punctuation separates tokens.
pub fn tokens(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

/// Tokens sorted alphabetically and rejoined, so "Bakunin, Mikhail" and
/// "Mikhail Bakunin" compare equal.
pub fn token_sorted(text: &str) -> String {
    let mut tokens = tokens(text);
    tokens.sort();
    tokens.join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stopwords_sorted_for_binary_search() {
        let mut sorted = STOPWORDS.to_vec();
        sorted.sort();
        assert_eq!(sorted, STOPWORDS);
        assert!(is_stopword("the"));
        assert!(!is_stopword("state"));
    }

    #[test]
    fn test_normalize_content_collapses_whitespace() {
        assert_eq!(normalize_content("  God and\tthe\n\nSTATE "), "god and the state");
        assert_eq!(normalize_content(""), "");
    }

    #[test]
    fn test_token_sorted_ignores_order_and_punctuation() {
        assert_eq!(
            token_sorted("Bakunin, Mikhail: God and the State"),
            token_sorted("Mikhail Bakunin — God and the State")
        );
        assert_eq!(token_sorted("Statism & Anarchy"), "anarchy statism");
    }
}
