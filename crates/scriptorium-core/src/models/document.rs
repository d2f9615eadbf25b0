use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// Store-wide document identifier.
pub type DocumentId = i64;

/// The collection a document was drawn from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Source {
    /// Reconverted scanned texts.
    #[default]
    Library,
    /// Archival text collection.
    Archive,
    /// Caption transcripts.
    Transcripts,
    /// Curated text archive.
    Texts,
}

impl Source {
    pub const ALL: [Source; 4] = [Self::Library, Self::Archive, Self::Transcripts, Self::Texts];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Library => "library",
            Self::Archive => "archive",
            Self::Transcripts => "transcripts",
            Self::Texts => "texts",
        }
    }
}

impl std::fmt::Display for Source {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Source {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "library" => Ok(Self::Library),
            "archive" => Ok(Self::Archive),
            "transcripts" => Ok(Self::Transcripts),
            "texts" => Ok(Self::Texts),
            _ => Err(format!("Invalid source: {s} (expected library, archive, transcripts or texts)")),
        }
    }
}

/// A set of documents an audit or batch job runs over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Scope {
    All,
    Source(Source),
}

impl Scope {
    pub fn includes(&self, source: Source) -> bool {
        match self {
            Self::All => true,
            Self::Source(s) => *s == source,
        }
    }

    /// The source filter for SQL queries; `None` means every source.
    pub fn source(&self) -> Option<Source> {
        match self {
            Self::All => None,
            Self::Source(s) => Some(*s),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::All => "all",
            Self::Source(s) => s.as_str(),
        }
    }
}

impl std::fmt::Display for Scope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Scope {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.trim().eq_ignore_ascii_case("all") {
            return Ok(Self::All);
        }
        s.parse::<Source>()
            .map(Self::Source)
            .map_err(|_| format!("Invalid scope: {s} (expected library, archive, transcripts, texts or all)"))
    }
}

impl TryFrom<String> for Scope {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Scope> for String {
    fn from(scope: Scope) -> Self {
        scope.as_str().to_string()
    }
}

/// A document as held by the Document Store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    pub id: DocumentId,
    pub source: Source,
    #[serde(default)]
    pub slug: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub publication_date: Option<String>,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub tags: BTreeSet<String>,
}

impl Document {
    pub fn new(id: DocumentId, source: Source) -> Self {
        Self {
            id,
            source,
            slug: String::new(),
            title: None,
            author: None,
            publication_date: None,
            content: String::new(),
            tags: BTreeSet::new(),
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_author(mut self, author: impl Into<String>) -> Self {
        self.author = Some(author.into());
        self
    }

    pub fn with_date(mut self, date: impl Into<String>) -> Self {
        self.publication_date = Some(date.into());
        self
    }

    pub fn with_content(mut self, content: impl Into<String>) -> Self {
        self.content = content.into();
        self
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn metadata(&self) -> DocumentMetadata {
        DocumentMetadata {
            source: self.source,
            title: self.title.clone(),
            author: self.author.clone(),
            publication_date: self.publication_date.clone(),
        }
    }

    pub fn display_title(&self) -> &str {
        self.title
            .as_deref()
            .filter(|t| !t.trim().is_empty())
            .unwrap_or("(untitled)")
    }
}

/// The metadata fields the Issue Detector scores.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentMetadata {
    pub source: Source,
    pub title: Option<String>,
    pub author: Option<String>,
    pub publication_date: Option<String>,
}

/// Metadata fields a reviewer may change. `None` leaves a field untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetadataUpdate {
    pub title: Option<String>,
    pub author: Option<String>,
    pub publication_date: Option<String>,
}

impl MetadataUpdate {
    pub fn is_empty(&self) -> bool {
        self.title.is_none() && self.author.is_none() && self.publication_date.is_none()
    }
}
