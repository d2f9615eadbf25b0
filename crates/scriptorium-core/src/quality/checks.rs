//! Metadata checks. Each returns at most one issue; the detector runs them
//! in a fixed order and accumulates the results.

use chrono::{Datelike, NaiveDate};
use once_cell::sync::Lazy;
use regex::Regex;

use super::DetectorConfig;
use crate::models::{DocumentMetadata, Issue};

static DATE_SHAPE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\d{4})(?:-(\d{2})(?:-(\d{2}))?)?$").expect("valid date shape regex"));

static BLANK_LINE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n[ \t]*\r?\n").expect("valid blank line regex"));

/// What every check looks at.
pub struct Subject<'a> {
    pub metadata: &'a DocumentMetadata,
    pub content: &'a str,
    pub word_count: usize,
}

pub type Check = fn(&Subject<'_>, &DetectorConfig) -> Option<Issue>;

pub const PIPELINE: [Check; 5] = [check_author, check_date, check_title, check_content, check_readability];

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

pub fn check_author(subject: &Subject<'_>, config: &DetectorConfig) -> Option<Issue> {
    let Some(author) = non_blank(subject.metadata.author.as_deref()) else {
        return Some(Issue::MissingAuthor);
    };
    let value = author.to_string();

    let normalized = author.trim_end_matches('.').to_lowercase();
    if config.is_placeholder_author(&normalized) {
        return Some(Issue::PlaceholderAuthor { value });
    }

    let tokens: Vec<&str> = author
        .split(|c: char| c.is_whitespace() || c == '.')
        .filter(|t| !t.is_empty())
        .collect();

    let is_initial = |t: &&str| t.chars().count() == 1 && t.chars().all(char::is_alphabetic);
    if author.contains('.') && tokens.iter().all(is_initial) {
        return Some(Issue::InitialsOnlyAuthor { value });
    }

    let dangling = author.ends_with(',') || author.ends_with('…') || author.ends_with("...") || author.ends_with('-');
    let stub = tokens.len() == 1 && tokens[0].chars().count() <= 2;
    if dangling || stub {
        return Some(Issue::TruncatedAuthor { value });
    }

    None
}

pub fn check_date(subject: &Subject<'_>, config: &DetectorConfig) -> Option<Issue> {
    let Some(date) = non_blank(subject.metadata.publication_date.as_deref()) else {
        return Some(Issue::MissingDate);
    };
    let value = date.to_string();

    let Some(caps) = DATE_SHAPE.captures(date) else {
        return Some(Issue::MalformedDate { value });
    };

    if config.placeholder_dates.iter().any(|p| p == date) {
        return Some(Issue::PlaceholderDate { value });
    }

    let part = |i: usize| caps.get(i).and_then(|m| m.as_str().parse::<u32>().ok());
    let year = part(1).unwrap_or(0) as i32;
    let month = part(2);
    let day = part(3);

    // Earliest day the value could denote; that is what must not be in the future.
    let earliest = if year == 0 {
        None
    } else {
        NaiveDate::from_ymd_opt(year, month.unwrap_or(1), day.unwrap_or(1))
    };
    let Some(earliest) = earliest else {
        return Some(Issue::ImpossibleDate { value });
    };

    let reference = config.reference_date;
    let future = match (month, day) {
        (None, _) => earliest.year() > reference.year(),
        (Some(_), None) => (earliest.year(), earliest.month()) > (reference.year(), reference.month()),
        (Some(_), Some(_)) => earliest > reference,
    };
    if future {
        return Some(Issue::FutureDate {
            value,
            reference: reference.format("%Y-%m-%d").to_string(),
        });
    }

    None
}

pub fn check_title(subject: &Subject<'_>, config: &DetectorConfig) -> Option<Issue> {
    let Some(title) = non_blank(subject.metadata.title.as_deref()) else {
        return Some(Issue::MissingTitle);
    };

    let lowered = title.to_lowercase();
    if let Some(suffix) = config
        .title_suffixes
        .iter()
        .find(|s| lowered.ends_with(&s.to_lowercase()))
    {
        return Some(Issue::TitleSourceSuffix { suffix: suffix.clone() });
    }

    const DANGLING: [char; 9] = [':', ';', ',', '-', '–', '—', '|', '/', '…'];
    if title.ends_with("...") || title.ends_with(DANGLING) {
        return Some(Issue::TruncatedTitle { value: title.to_string() });
    }

    None
}

pub fn check_content(subject: &Subject<'_>, config: &DetectorConfig) -> Option<Issue> {
    if subject.content.trim().is_empty() {
        return Some(Issue::MissingContent);
    }
    if subject.word_count < config.min_words {
        return Some(Issue::InsufficientContent {
            words: subject.word_count,
            minimum: config.min_words,
        });
    }
    None
}

pub fn check_readability(subject: &Subject<'_>, config: &DetectorConfig) -> Option<Issue> {
    if subject.word_count >= config.paragraph_min_words && !BLANK_LINE.is_match(subject.content) {
        return Some(Issue::NoParagraphStructure {
            words: subject.word_count,
        });
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> DetectorConfig {
        DetectorConfig::new(NaiveDate::from_ymd_opt(2024, 6, 15).unwrap())
    }

    fn run(check: Check, metadata: DocumentMetadata, content: &str) -> Option<Issue> {
        let subject = Subject {
            metadata: &metadata,
            content,
            word_count: content.split_whitespace().count(),
        };
        check(&subject, &config())
    }

    fn author(value: &str) -> Option<Issue> {
        let metadata = DocumentMetadata {
            author: Some(value.to_string()),
            ..Default::default()
        };
        run(check_author, metadata, "")
    }

    fn date(value: &str) -> Option<Issue> {
        let metadata = DocumentMetadata {
            publication_date: Some(value.to_string()),
            ..Default::default()
        };
        run(check_date, metadata, "")
    }

    fn title(value: &str) -> Option<Issue> {
        let metadata = DocumentMetadata {
            title: Some(value.to_string()),
            ..Default::default()
        };
        run(check_title, metadata, "")
    }

    #[test]
    fn test_author_checks() {
        assert_eq!(author("   "), Some(Issue::MissingAuthor));
        assert!(matches!(author("Unknown"), Some(Issue::PlaceholderAuthor { .. })));
        assert!(matches!(author("anon."), Some(Issue::PlaceholderAuthor { .. })));
        assert!(matches!(author("Transcripts"), Some(Issue::PlaceholderAuthor { .. })));
        assert!(matches!(author("J. R."), Some(Issue::InitialsOnlyAuthor { .. })));
        assert!(matches!(author("J.R.R."), Some(Issue::InitialsOnlyAuthor { .. })));
        assert!(matches!(author("Kropotkin,"), Some(Issue::TruncatedAuthor { .. })));
        assert!(matches!(author("Jo"), Some(Issue::TruncatedAuthor { .. })));
        assert_eq!(author("J. R. R. Tolkien"), None);
        assert_eq!(author("Errico Malatesta"), None);
    }

    #[test]
    fn test_date_checks() {
        assert_eq!(run(check_date, DocumentMetadata::default(), ""), Some(Issue::MissingDate));
        assert!(matches!(date("March 1902"), Some(Issue::MalformedDate { .. })));
        assert!(matches!(date("1902-3-01"), Some(Issue::MalformedDate { .. })));
        assert!(matches!(date("1902-02-30"), Some(Issue::ImpossibleDate { .. })));
        assert!(matches!(date("1902-13"), Some(Issue::ImpossibleDate { .. })));
        assert!(matches!(date("0000"), Some(Issue::ImpossibleDate { .. })));
        assert!(matches!(date("1970-01-01"), Some(Issue::PlaceholderDate { .. })));
        assert!(matches!(date("1900"), Some(Issue::PlaceholderDate { .. })));
        assert!(matches!(date("2024-06-16"), Some(Issue::FutureDate { .. })));
        assert!(matches!(date("2024-07"), Some(Issue::FutureDate { .. })));
        assert!(matches!(date("2025"), Some(Issue::FutureDate { .. })));
        assert_eq!(date("2024"), None);
        assert_eq!(date("2024-06"), None);
        assert_eq!(date("2024-06-15"), None);
        assert_eq!(date("1892-02-29"), None);
    }

    #[test]
    fn test_title_checks() {
        assert_eq!(title(""), Some(Issue::MissingTitle));
        assert_eq!(
            title("Some Essay - Encyclopedia"),
            Some(Issue::TitleSourceSuffix { suffix: "- Encyclopedia".into() })
        );
        assert!(matches!(title("Interview (transcript)"), Some(Issue::TitleSourceSuffix { .. })));
        assert!(matches!(title("The Conquest of..."), Some(Issue::TruncatedTitle { .. })));
        assert!(matches!(title("Mutual Aid:"), Some(Issue::TruncatedTitle { .. })));
        assert_eq!(title("Mutual Aid: A Factor of Evolution"), None);
    }

    #[test]
    fn test_content_and_readability() {
        let short = "word ".repeat(40);
        assert_eq!(run(check_content, DocumentMetadata::default(), ""), Some(Issue::MissingContent));
        assert_eq!(
            run(check_content, DocumentMetadata::default(), &short),
            Some(Issue::InsufficientContent { words: 40, minimum: 100 })
        );

        let wall = "word ".repeat(250);
        assert_eq!(
            run(check_readability, DocumentMetadata::default(), &wall),
            Some(Issue::NoParagraphStructure { words: 250 })
        );
        let paragraphs = format!("{}\n\n{}", "word ".repeat(125), "word ".repeat(125));
        assert_eq!(run(check_readability, DocumentMetadata::default(), &paragraphs), None);
        assert_eq!(run(check_readability, DocumentMetadata::default(), &short), None);
    }
}
