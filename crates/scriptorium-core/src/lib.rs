pub mod config;
pub mod error;
pub mod ledger;
pub mod models;
pub mod quality;
pub mod storage;

pub use config::AppConfig;
pub use error::{ExitCode, Result, ScriptoriumError};
pub use models::*;

pub use ledger::AuditLedger;
pub use quality::{Assessment, DetectorConfig, IssueDetector, WeightProfile};

pub use storage::database::{ConnectionPool, Database, DatabaseError};
pub use storage::repositories::{
    AuditRepository, ClusterRepository, DocumentStore, FingerprintRepository, ImportSummary, JobRepository,
    MergeLogRepository, Repository, SqliteDocumentStore, TombstoneRepository,
};
