use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::DocumentId;

/// Hashes and signatures of one document, unique per document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fingerprint {
    pub document_id: DocumentId,
    pub content_md5: String,
    pub content_sha256: String,
    pub normalized_content_md5: String,
    /// Space-joined, sorted Soundex codes of the title's significant tokens.
    pub title_soundex: String,
    pub author_soundex: Vec<String>,
    pub simhash_64: u64,
    pub word_count: usize,
    pub computed_at: DateTime<Utc>,
}

impl Fingerprint {
    pub fn has_content(&self) -> bool {
        self.word_count > 0
    }
}
