use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{Document, DocumentId, Scope};

/// The detection layer that produced a cluster's strongest edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClusterType {
    ExactMatch,
    FuzzyMatch,
    NearDuplicate,
}

impl ClusterType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ExactMatch => "exact_match",
            Self::FuzzyMatch => "fuzzy_match",
            Self::NearDuplicate => "near_duplicate",
        }
    }

    /// Tie-break rank when two edges carry the same confidence; higher wins.
    pub fn precedence(&self) -> u8 {
        match self {
            Self::ExactMatch => 3,
            Self::FuzzyMatch => 2,
            Self::NearDuplicate => 1,
        }
    }
}

impl std::fmt::Display for ClusterType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ClusterType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "exact_match" => Ok(Self::ExactMatch),
            "fuzzy_match" => Ok(Self::FuzzyMatch),
            "near_duplicate" => Ok(Self::NearDuplicate),
            _ => Err(format!("Invalid cluster type: {s}")),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewStatus {
    #[default]
    Pending,
    Confirmed,
    FalsePositive,
    Merged,
}

impl ReviewStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Confirmed => "confirmed",
            Self::FalsePositive => "false_positive",
            Self::Merged => "merged",
        }
    }

    pub fn is_reviewed(&self) -> bool {
        !matches!(self, Self::Pending)
    }
}

impl std::fmt::Display for ReviewStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ReviewStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "confirmed" => Ok(Self::Confirmed),
            "false_positive" => Ok(Self::FalsePositive),
            "merged" => Ok(Self::Merged),
            _ => Err(format!("Invalid review status: {s}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cluster {
    pub id: i64,
    pub cluster_type: ClusterType,
    pub confidence: f64,
    pub review_status: ReviewStatus,
    pub canonical_document_id: Option<DocumentId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterMember {
    pub cluster_id: i64,
    pub document_id: DocumentId,
    pub is_canonical: bool,
}

/// A cluster about to be written by the detector.
#[derive(Debug, Clone, PartialEq)]
pub struct NewCluster {
    pub cluster_type: ClusterType,
    pub confidence: f64,
    pub members: Vec<DocumentId>,
}

/// Snapshot of a document removed by a merge, kept until `expires_at`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tombstone {
    pub id: Uuid,
    pub cluster_id: i64,
    pub merge_id: Uuid,
    pub document_id: DocumentId,
    pub merged_into: DocumentId,
    pub snapshot: Document,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeAction {
    Merge,
    AutoMerge,
    Confirm,
    FalsePositive,
    Rollback,
}

impl MergeAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Merge => "merge",
            Self::AutoMerge => "auto_merge",
            Self::Confirm => "confirm",
            Self::FalsePositive => "false_positive",
            Self::Rollback => "rollback",
        }
    }
}

impl std::str::FromStr for MergeAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "merge" => Ok(Self::Merge),
            "auto_merge" => Ok(Self::AutoMerge),
            "confirm" => Ok(Self::Confirm),
            "false_positive" => Ok(Self::FalsePositive),
            "rollback" => Ok(Self::Rollback),
            _ => Err(format!("Invalid merge action: {s}")),
        }
    }
}

/// Audit trail of cluster decisions. `snapshot_before` holds the canonical's
/// tags as they were before a merge, so the merge can be reversed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergeLogEntry {
    pub id: Uuid,
    pub cluster_id: i64,
    pub action: MergeAction,
    pub canonical_document_id: Option<DocumentId>,
    pub removed_ids: Vec<DocumentId>,
    pub payload: serde_json::Value,
    pub snapshot_before: Option<BTreeSet<String>>,
    pub created_at: DateTime<Utc>,
    pub reversed: bool,
}

/// Resumability token of a chunked batch job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobProgress {
    pub job: String,
    pub scope: Scope,
    /// Last document id whose chunk was committed.
    pub cursor: DocumentId,
    pub round: u32,
    pub state: serde_json::Value,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
