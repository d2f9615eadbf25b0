use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{ArtifactCount, DocumentId, Issue, Scope};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditStatus {
    #[default]
    Pending,
    InReview,
    Fixed,
    Reviewed,
    Skipped,
}

impl AuditStatus {
    pub const ALL: [AuditStatus; 5] = [
        Self::Pending,
        Self::InReview,
        Self::Fixed,
        Self::Reviewed,
        Self::Skipped,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InReview => "in_review",
            Self::Fixed => "fixed",
            Self::Reviewed => "reviewed",
            Self::Skipped => "skipped",
        }
    }

    /// Terminal states are final for the round.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Fixed | Self::Reviewed | Self::Skipped)
    }
}

impl std::fmt::Display for AuditStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for AuditStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "in_review" => Ok(Self::InReview),
            "fixed" => Ok(Self::Fixed),
            "reviewed" => Ok(Self::Reviewed),
            "skipped" => Ok(Self::Skipped),
            _ => Err(format!("Invalid audit status: {s}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub id: i64,
    pub document_id: DocumentId,
    pub scope: Scope,
    pub round: u32,
    pub status: AuditStatus,
    pub quality_score: u8,
    pub issues: Vec<Issue>,
    pub artifacts: Vec<ArtifactCount>,
    pub reviewer: Option<String>,
    pub notes: Option<String>,
    pub reviewed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Per-status aggregate of one scope's active records.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AuditStats {
    pub total: usize,
    pub pending: usize,
    pub in_review: usize,
    pub reviewed: usize,
    pub fixed: usize,
    pub skipped: usize,
    pub avg_score: f64,
}

impl AuditStats {
    pub fn count_for(&self, status: AuditStatus) -> usize {
        match status {
            AuditStatus::Pending => self.pending,
            AuditStatus::InReview => self.in_review,
            AuditStatus::Fixed => self.fixed,
            AuditStatus::Reviewed => self.reviewed,
            AuditStatus::Skipped => self.skipped,
        }
    }

    pub(crate) fn add(&mut self, status: AuditStatus, n: usize) {
        self.total += n;
        match status {
            AuditStatus::Pending => self.pending += n,
            AuditStatus::InReview => self.in_review += n,
            AuditStatus::Fixed => self.fixed += n,
            AuditStatus::Reviewed => self.reviewed += n,
            AuditStatus::Skipped => self.skipped += n,
        }
    }
}

/// One completed `init` run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRound {
    pub scope: Scope,
    pub round: u32,
    pub documents: usize,
    pub new_documents: usize,
    pub rescored: usize,
    pub preserved: usize,
    pub completed_at: DateTime<Utc>,
}

/// An immutable named snapshot of a scope's aggregates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub id: i64,
    pub scope: Scope,
    pub round_number: u32,
    pub name: String,
    pub stats: AuditStats,
    pub created_at: DateTime<Utc>,
    pub notes: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_states() {
        assert!(!AuditStatus::Pending.is_terminal());
        assert!(!AuditStatus::InReview.is_terminal());
        assert!(AuditStatus::Fixed.is_terminal());
        assert!(AuditStatus::Reviewed.is_terminal());
        assert!(AuditStatus::Skipped.is_terminal());
    }

    #[test]
    fn test_status_roundtrip() {
        for status in AuditStatus::ALL {
            assert_eq!(status.as_str().parse::<AuditStatus>().unwrap(), status);
        }
    }

    #[test]
    fn test_stats_add() {
        let mut stats = AuditStats::default();
        stats.add(AuditStatus::Pending, 3);
        stats.add(AuditStatus::Fixed, 1);
        assert_eq!(stats.total, 4);
        assert_eq!(stats.count_for(AuditStatus::Pending), 3);
        assert_eq!(stats.count_for(AuditStatus::Fixed), 1);
    }
}
