use thiserror::Error;

use crate::models::DocumentId;
use crate::storage::database::DatabaseError;

/// All errors that can occur in scriptorium-core.
#[derive(Debug, Error)]
pub enum ScriptoriumError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Document not found: {0}")]
    DocumentNotFound(DocumentId),

    #[error("Audit record not found: {0}")]
    RecordNotFound(String),

    #[error("Cluster not found: {0}")]
    ClusterNotFound(i64),

    #[error("No audit round found for scope '{0}'. Run 'scriptorium init --schema <scope>' first.")]
    ScopeNotInitialized(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Integrity error: {0}")]
    Integrity(String),

    #[error("Config error: {0}")]
    ConfigError(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error(transparent)]
    Storage(#[from] DatabaseError),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),
}

impl ScriptoriumError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict(message.into())
    }

    /// Stable machine-readable kind, used in `--json` error envelopes.
    pub fn kind(&self) -> &'static str {
        match self.exit_code() {
            ExitCode::NotFound => "not_found",
            ExitCode::InvalidArgs => "validation",
            ExitCode::Conflict => "conflict",
            ExitCode::StorageError => "storage",
            ExitCode::IntegrityError => "integrity",
            ExitCode::Success | ExitCode::GeneralError => "error",
        }
    }

    pub fn exit_code(&self) -> ExitCode {
        match self {
            Self::Validation(_) => ExitCode::InvalidArgs,
            Self::DocumentNotFound(_)
            | Self::RecordNotFound(_)
            | Self::ClusterNotFound(_)
            | Self::ScopeNotInitialized(_) => ExitCode::NotFound,
            Self::Conflict(_) => ExitCode::Conflict,
            Self::Integrity(_) => ExitCode::IntegrityError,
            Self::Io(_) | Self::Database(_) | Self::Storage(_) => ExitCode::StorageError,
            Self::ConfigError(_)
            | Self::Json(_)
            | Self::TomlParse(_)
            | Self::TomlSerialize(_) => ExitCode::GeneralError,
        }
    }
}

/// Process exit codes, stable per error kind.
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitCode {
    Success = 0,
    GeneralError = 1,
    NotFound = 2,
    InvalidArgs = 3,
    Conflict = 4,
    StorageError = 5,
    IntegrityError = 6,
}

pub type Result<T> = std::result::Result<T, ScriptoriumError>;
