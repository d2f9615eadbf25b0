mod audit_repository;
mod cluster_repository;
mod document_store;
mod fingerprint_repository;
mod job_repository;
mod merge_repository;

pub use audit_repository::{AuditRepository, Scoring};
pub use cluster_repository::ClusterRepository;
pub use document_store::{DocumentStore, ImportSummary, SqliteDocumentStore};
pub use fingerprint_repository::FingerprintRepository;
pub use job_repository::JobRepository;
pub use merge_repository::{MergeLogRepository, TombstoneRepository};

use chrono::{DateTime, Utc};
use rusqlite::types::Type;

use crate::error::Result;

pub trait Repository {
    type Entity;
    type Id;

    fn find_by_id(&self, id: &Self::Id) -> Result<Option<Self::Entity>>;
    fn save(&self, entity: &Self::Entity) -> Result<()>;
    fn delete(&self, id: &Self::Id) -> Result<bool>;
}

// Column decoders shared by the row mappers. Failures surface as rusqlite
// conversion errors so `query_map` closures can use `?`.

pub(crate) fn parse_timestamp(idx: usize, value: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

pub(crate) fn parse_json<T: serde::de::DeserializeOwned>(idx: usize, value: &str) -> rusqlite::Result<T> {
    serde_json::from_str(value)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

pub(crate) fn parse_text<T>(idx: usize, value: &str) -> rusqlite::Result<T>
where
    T: std::str::FromStr<Err = String>,
{
    value
        .parse()
        .map_err(|e: String| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, e.into()))
}
