use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Low => write!(f, "low"),
            Self::Medium => write!(f, "medium"),
            Self::High => write!(f, "high"),
            Self::Critical => write!(f, "critical"),
        }
    }
}

/// The fixed set of metadata checks. Penalties are looked up per kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueKind {
    MissingAuthor,
    PlaceholderAuthor,
    InitialsOnlyAuthor,
    TruncatedAuthor,
    MissingDate,
    MalformedDate,
    ImpossibleDate,
    FutureDate,
    PlaceholderDate,
    MissingTitle,
    TitleSourceSuffix,
    TruncatedTitle,
    MissingContent,
    InsufficientContent,
    NoParagraphStructure,
}

impl IssueKind {
    pub const ALL: [IssueKind; 15] = [
        Self::MissingAuthor,
        Self::PlaceholderAuthor,
        Self::InitialsOnlyAuthor,
        Self::TruncatedAuthor,
        Self::MissingDate,
        Self::MalformedDate,
        Self::ImpossibleDate,
        Self::FutureDate,
        Self::PlaceholderDate,
        Self::MissingTitle,
        Self::TitleSourceSuffix,
        Self::TruncatedTitle,
        Self::MissingContent,
        Self::InsufficientContent,
        Self::NoParagraphStructure,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MissingAuthor => "missing_author",
            Self::PlaceholderAuthor => "placeholder_author",
            Self::InitialsOnlyAuthor => "initials_only_author",
            Self::TruncatedAuthor => "truncated_author",
            Self::MissingDate => "missing_date",
            Self::MalformedDate => "malformed_date",
            Self::ImpossibleDate => "impossible_date",
            Self::FutureDate => "future_date",
            Self::PlaceholderDate => "placeholder_date",
            Self::MissingTitle => "missing_title",
            Self::TitleSourceSuffix => "title_source_suffix",
            Self::TruncatedTitle => "truncated_title",
            Self::MissingContent => "missing_content",
            Self::InsufficientContent => "insufficient_content",
            Self::NoParagraphStructure => "no_paragraph_structure",
        }
    }

    pub fn severity(&self) -> Severity {
        match self {
            Self::MissingAuthor
            | Self::PlaceholderAuthor
            | Self::MissingDate
            | Self::MalformedDate
            | Self::ImpossibleDate
            | Self::MissingTitle => Severity::Critical,
            Self::InitialsOnlyAuthor
            | Self::TruncatedAuthor
            | Self::FutureDate
            | Self::PlaceholderDate
            | Self::MissingContent
            | Self::InsufficientContent => Severity::High,
            Self::TitleSourceSuffix | Self::TruncatedTitle => Severity::Medium,
            Self::NoParagraphStructure => Severity::Low,
        }
    }

    /// Penalty in the default weight profile.
    pub fn default_penalty(&self) -> u8 {
        match self {
            Self::MissingAuthor | Self::PlaceholderAuthor => 40,
            Self::InitialsOnlyAuthor => 25,
            Self::TruncatedAuthor => 15,
            Self::MissingDate | Self::MalformedDate | Self::ImpossibleDate => 30,
            Self::FutureDate => 25,
            Self::PlaceholderDate => 20,
            Self::MissingTitle => 20,
            Self::TitleSourceSuffix | Self::TruncatedTitle => 10,
            Self::MissingContent | Self::InsufficientContent => 10,
            Self::NoParagraphStructure => 0,
        }
    }
}

impl std::fmt::Display for IssueKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for IssueKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| format!("Invalid issue kind: {s}"))
    }
}

/// A detected metadata problem. Each variant carries only what its check found.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Issue {
    MissingAuthor,
    PlaceholderAuthor { value: String },
    InitialsOnlyAuthor { value: String },
    TruncatedAuthor { value: String },
    MissingDate,
    MalformedDate { value: String },
    ImpossibleDate { value: String },
    FutureDate { value: String, reference: String },
    PlaceholderDate { value: String },
    MissingTitle,
    TitleSourceSuffix { suffix: String },
    TruncatedTitle { value: String },
    MissingContent,
    InsufficientContent { words: usize, minimum: usize },
    NoParagraphStructure { words: usize },
}

impl Issue {
    pub fn kind(&self) -> IssueKind {
        match self {
            Self::MissingAuthor => IssueKind::MissingAuthor,
            Self::PlaceholderAuthor { .. } => IssueKind::PlaceholderAuthor,
            Self::InitialsOnlyAuthor { .. } => IssueKind::InitialsOnlyAuthor,
            Self::TruncatedAuthor { .. } => IssueKind::TruncatedAuthor,
            Self::MissingDate => IssueKind::MissingDate,
            Self::MalformedDate { .. } => IssueKind::MalformedDate,
            Self::ImpossibleDate { .. } => IssueKind::ImpossibleDate,
            Self::FutureDate { .. } => IssueKind::FutureDate,
            Self::PlaceholderDate { .. } => IssueKind::PlaceholderDate,
            Self::MissingTitle => IssueKind::MissingTitle,
            Self::TitleSourceSuffix { .. } => IssueKind::TitleSourceSuffix,
            Self::TruncatedTitle { .. } => IssueKind::TruncatedTitle,
            Self::MissingContent => IssueKind::MissingContent,
            Self::InsufficientContent { .. } => IssueKind::InsufficientContent,
            Self::NoParagraphStructure { .. } => IssueKind::NoParagraphStructure,
        }
    }

    pub fn severity(&self) -> Severity {
        self.kind().severity()
    }

    pub fn message(&self) -> String {
        match self {
            Self::MissingAuthor => "author is missing".to_string(),
            Self::PlaceholderAuthor { value } => format!("author '{value}' is a placeholder"),
            Self::InitialsOnlyAuthor { value } => format!("author '{value}' is initials only"),
            Self::TruncatedAuthor { value } => format!("author '{value}' looks truncated"),
            Self::MissingDate => "publication date is missing".to_string(),
            Self::MalformedDate { value } => {
                format!("publication date '{value}' is not YYYY, YYYY-MM or YYYY-MM-DD")
            }
            Self::ImpossibleDate { value } => {
                format!("publication date '{value}' is not a calendar date")
            }
            Self::FutureDate { value, reference } => {
                format!("publication date '{value}' is after {reference}")
            }
            Self::PlaceholderDate { value } => {
                format!("publication date '{value}' is a known placeholder")
            }
            Self::MissingTitle => "title is missing".to_string(),
            Self::TitleSourceSuffix { suffix } => {
                format!("title carries the source suffix '{suffix}'")
            }
            Self::TruncatedTitle { value } => format!("title '{value}' looks truncated"),
            Self::MissingContent => "content is missing".to_string(),
            Self::InsufficientContent { words, minimum } => {
                format!("content has {words} words, fewer than {minimum}")
            }
            Self::NoParagraphStructure { words } => {
                format!("{words} words of content with no paragraph breaks")
            }
        }
    }

    /// Flat `{type, severity, message, ...}` view for output.
    pub fn to_report(&self) -> serde_json::Value {
        let mut value = serde_json::to_value(self).unwrap_or(serde_json::Value::Null);
        if let Some(obj) = value.as_object_mut() {
            obj.insert("severity".into(), self.severity().to_string().into());
            obj.insert("message".into(), self.message().into());
        }
        value
    }
}

/// Formatting artifacts are a cleanup signal, reported beside the score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    PageMarker,
    ImageReference,
    StrayMarkup,
    HyphenationBreak,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactCount {
    pub kind: ArtifactKind,
    pub count: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_issue_serializes_as_tagged_variant() {
        let issue = Issue::InsufficientContent { words: 40, minimum: 100 };
        let json = serde_json::to_value(&issue).unwrap();
        assert_eq!(json["type"], "insufficient_content");
        assert_eq!(json["words"], 40);

        let back: Issue = serde_json::from_value(json).unwrap();
        assert_eq!(back, issue);
    }

    #[test]
    fn test_issue_kind_from_str() {
        for kind in IssueKind::ALL {
            assert_eq!(kind.as_str().parse::<IssueKind>().unwrap(), kind);
        }
        assert!("spelling".parse::<IssueKind>().is_err());
    }

    #[test]
    fn test_report_carries_severity_and_message() {
        let report = Issue::MissingAuthor.to_report();
        assert_eq!(report["type"], "missing_author");
        assert_eq!(report["severity"], "critical");
        assert_eq!(report["message"], "author is missing");
    }
}
