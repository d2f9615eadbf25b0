use std::collections::HashMap;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use crate::error::{Result, ScriptoriumError};
use crate::models::{
    ArtifactCount, AuditRecord, AuditRound, AuditStats, AuditStatus, Checkpoint, DocumentId, Issue,
    Scope,
};

use super::{parse_json, parse_text, parse_timestamp};

const RECORD_COLUMNS: &str = "a.id, a.document_id, a.scope, a.round, a.status, a.quality_score,
     a.issues, a.artifacts, a.reviewer, a.notes, a.reviewed_at, a.created_at";

/// Audit records, completed rounds and checkpoints.
pub struct AuditRepository<'a> {
    conn: &'a Connection,
}

/// Scored output written into a record.
pub struct Scoring<'s> {
    pub score: u8,
    pub issues: &'s [Issue],
    pub artifacts: &'s [ArtifactCount],
}

impl<'a> AuditRepository<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    fn row_to_record(row: &rusqlite::Row) -> rusqlite::Result<AuditRecord> {
        let scope: String = row.get(2)?;
        let status: String = row.get(4)?;
        let issues: String = row.get(6)?;
        let artifacts: String = row.get(7)?;
        let reviewed_at: Option<String> = row.get(10)?;
        let created_at: String = row.get(11)?;

        Ok(AuditRecord {
            id: row.get(0)?,
            document_id: row.get(1)?,
            scope: parse_text(2, &scope)?,
            round: row.get(3)?,
            status: parse_text(4, &status)?,
            quality_score: row.get(5)?,
            issues: parse_json(6, &issues)?,
            artifacts: parse_json(7, &artifacts)?,
            reviewer: row.get(8)?,
            notes: row.get(9)?,
            reviewed_at: reviewed_at.map(|s| parse_timestamp(10, &s)).transpose()?,
            created_at: parse_timestamp(11, &created_at)?,
        })
    }

    // ─── Records ───────────────────────────────────────────

    pub fn insert_pending(
        &self,
        scope: Scope,
        round: u32,
        document_id: DocumentId,
        scoring: &Scoring<'_>,
    ) -> Result<i64> {
        let now = Utc::now().to_rfc3339();
        self.conn.execute(
            "INSERT INTO audit_log
                (document_id, scope, round, status, quality_score, issues, artifacts, created_at, updated_at)
             VALUES (?1, ?2, ?3, 'pending', ?4, ?5, ?6, ?7, ?7)",
            params![
                document_id,
                scope.as_str(),
                round,
                scoring.score,
                serde_json::to_string(scoring.issues)?,
                serde_json::to_string(scoring.artifacts)?,
                now,
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    /// Rescores a non-terminal record and moves it to `round`. Returns false
    /// when the record is already terminal.
    pub fn rescore_active(&self, record_id: i64, round: u32, scoring: &Scoring<'_>) -> Result<bool> {
        let affected = self.conn.execute(
            "UPDATE audit_log
             SET round = ?2, quality_score = ?3, issues = ?4, artifacts = ?5, updated_at = ?6
             WHERE id = ?1 AND status IN ('pending', 'in_review')",
            params![
                record_id,
                round,
                scoring.score,
                serde_json::to_string(scoring.issues)?,
                serde_json::to_string(scoring.artifacts)?,
                Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(affected > 0)
    }

    pub fn update_score(&self, record_id: i64, scoring: &Scoring<'_>) -> Result<()> {
        self.conn.execute(
            "UPDATE audit_log SET quality_score = ?2, issues = ?3, artifacts = ?4, updated_at = ?5
             WHERE id = ?1",
            params![
                record_id,
                scoring.score,
                serde_json::to_string(scoring.issues)?,
                serde_json::to_string(scoring.artifacts)?,
                Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// Guarded transition out of a non-terminal state. Returns false when the
    /// record was already terminal, leaving it unchanged.
    pub fn transition(
        &self,
        record_id: i64,
        to: AuditStatus,
        reviewer: Option<&str>,
        notes: Option<&str>,
        at: DateTime<Utc>,
    ) -> Result<bool> {
        let affected = self.conn.execute(
            "UPDATE audit_log
             SET status = ?2, reviewer = ?3, notes = ?4, reviewed_at = ?5, updated_at = ?5
             WHERE id = ?1 AND status IN ('pending', 'in_review')",
            params![record_id, to.as_str(), reviewer, notes, at.to_rfc3339()],
        )?;
        Ok(affected > 0)
    }

    /// Moves a pending record to `in_review`.
    pub fn claim(&self, record_id: i64, reviewer: Option<&str>) -> Result<bool> {
        let affected = self.conn.execute(
            "UPDATE audit_log SET status = 'in_review', reviewer = ?2, updated_at = ?3
             WHERE id = ?1 AND status = 'pending'",
            params![record_id, reviewer, Utc::now().to_rfc3339()],
        )?;
        Ok(affected > 0)
    }

    pub fn find(&self, record_id: i64) -> Result<Option<AuditRecord>> {
        let record = self
            .conn
            .query_row(
                &format!("SELECT {RECORD_COLUMNS} FROM audit_log a WHERE a.id = ?1"),
                params![record_id],
                Self::row_to_record,
            )
            .optional()?;
        Ok(record)
    }

    /// The most recent record of a document in `scope`, whatever its status.
    pub fn latest_for_document(&self, scope: Scope, document_id: DocumentId) -> Result<Option<AuditRecord>> {
        let record = self
            .conn
            .query_row(
                &format!(
                    "SELECT {RECORD_COLUMNS} FROM audit_log a
                     WHERE a.scope = ?1 AND a.document_id = ?2
                     ORDER BY a.id DESC LIMIT 1"
                ),
                params![scope.as_str(), document_id],
                Self::row_to_record,
            )
            .optional()?;
        Ok(record)
    }

    /// Latest record id and status per document for ids in `[from, to]`.
    pub fn statuses_between(
        &self,
        scope: Scope,
        from: DocumentId,
        to: DocumentId,
    ) -> Result<HashMap<DocumentId, (i64, AuditStatus)>> {
        let mut stmt = self.conn.prepare(
            "SELECT document_id, id, status FROM audit_log
             WHERE scope = ?1 AND document_id BETWEEN ?2 AND ?3
             ORDER BY id",
        )?;
        let rows = stmt.query_map(params![scope.as_str(), from, to], |row| {
            let status: String = row.get(2)?;
            Ok((row.get::<_, DocumentId>(0)?, row.get::<_, i64>(1)?, parse_text(2, &status)?))
        })?;

        let mut latest = HashMap::new();
        for row in rows {
            let (document_id, id, status) = row?;
            latest.insert(document_id, (id, status));
        }
        Ok(latest)
    }

    /// Non-terminal records of live documents, lowest score first.
    pub fn queue(&self, scope: Scope, count: usize, max_score: Option<u8>) -> Result<Vec<AuditRecord>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {RECORD_COLUMNS} FROM audit_log a
             JOIN documents d ON d.id = a.document_id
             WHERE a.scope = ?1
               AND a.status IN ('pending', 'in_review')
               AND (?2 IS NULL OR a.quality_score <= ?2)
             ORDER BY a.quality_score ASC, a.document_id ASC
             LIMIT ?3"
        ))?;
        let rows = stmt.query_map(params![scope.as_str(), max_score, count as i64], Self::row_to_record)?;
        let mut records = Vec::new();
        for row in rows {
            records.push(row?);
        }
        Ok(records)
    }

    pub fn stats(&self, scope: Scope) -> Result<AuditStats> {
        let mut stmt = self.conn.prepare(
            "SELECT a.status, COUNT(*), SUM(a.quality_score) FROM audit_log a
             JOIN documents d ON d.id = a.document_id
             WHERE a.scope = ?1
             GROUP BY a.status",
        )?;
        let rows = stmt.query_map(params![scope.as_str()], |row| {
            let status: String = row.get(0)?;
            Ok((
                parse_text::<AuditStatus>(0, &status)?,
                row.get::<_, i64>(1)?,
                row.get::<_, i64>(2)?,
            ))
        })?;

        let mut stats = AuditStats::default();
        let mut score_sum = 0i64;
        for row in rows {
            let (status, count, sum) = row?;
            stats.add(status, count as usize);
            score_sum += sum;
        }
        if stats.total > 0 {
            stats.avg_score = score_sum as f64 / stats.total as f64;
        }
        Ok(stats)
    }

    // ─── Rounds ────────────────────────────────────────────

    pub fn record_round(&self, round: &AuditRound) -> Result<()> {
        self.conn.execute(
            "INSERT INTO audit_rounds
                (scope, round, documents, new_documents, rescored, preserved, completed_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                round.scope.as_str(),
                round.round,
                round.documents as i64,
                round.new_documents as i64,
                round.rescored as i64,
                round.preserved as i64,
                round.completed_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// Highest completed round for `scope`, 0 before the first `init`.
    pub fn latest_round(&self, scope: Scope) -> Result<u32> {
        let round: Option<u32> = self.conn.query_row(
            "SELECT MAX(round) FROM audit_rounds WHERE scope = ?1",
            params![scope.as_str()],
            |row| row.get(0),
        )?;
        Ok(round.unwrap_or(0))
    }

    pub fn round_count(&self, scope: Scope) -> Result<usize> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM audit_rounds WHERE scope = ?1",
            params![scope.as_str()],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    /// Scope of the most recently completed `init`.
    pub fn latest_scope(&self) -> Result<Option<Scope>> {
        let scope: Option<String> = self
            .conn
            .query_row(
                "SELECT scope FROM audit_rounds ORDER BY rowid DESC LIMIT 1",
                [],
                |row| row.get(0),
            )
            .optional()?;
        scope
            .map(|s| s.parse().map_err(ScriptoriumError::Validation))
            .transpose()
    }

    pub fn rounds(&self, scope: Scope) -> Result<Vec<AuditRound>> {
        let mut stmt = self.conn.prepare(
            "SELECT scope, round, documents, new_documents, rescored, preserved, completed_at
             FROM audit_rounds WHERE scope = ?1 ORDER BY round",
        )?;
        let rows = stmt.query_map(params![scope.as_str()], |row| {
            let scope: String = row.get(0)?;
            let completed_at: String = row.get(6)?;
            Ok(AuditRound {
                scope: parse_text(0, &scope)?,
                round: row.get(1)?,
                documents: row.get::<_, i64>(2)? as usize,
                new_documents: row.get::<_, i64>(3)? as usize,
                rescored: row.get::<_, i64>(4)? as usize,
                preserved: row.get::<_, i64>(5)? as usize,
                completed_at: parse_timestamp(6, &completed_at)?,
            })
        })?;
        let mut rounds = Vec::new();
        for row in rows {
            rounds.push(row?);
        }
        Ok(rounds)
    }

    // ─── Checkpoints ───────────────────────────────────────

    pub fn insert_checkpoint(
        &self,
        scope: Scope,
        round_number: u32,
        name: &str,
        stats: &AuditStats,
        notes: Option<&str>,
    ) -> Result<Checkpoint> {
        let taken = self
            .conn
            .prepare("SELECT 1 FROM checkpoints WHERE scope = ?1 AND name = ?2")?
            .exists(params![scope.as_str(), name])?;
        if taken {
            return Err(ScriptoriumError::conflict(format!(
                "checkpoint '{name}' already exists for scope '{scope}'"
            )));
        }

        let created_at = Utc::now();
        self.conn.execute(
            "INSERT INTO checkpoints (scope, round_number, name, stats, created_at, notes)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                scope.as_str(),
                round_number,
                name,
                serde_json::to_string(stats)?,
                created_at.to_rfc3339(),
                notes,
            ],
        )?;

        Ok(Checkpoint {
            id: self.conn.last_insert_rowid(),
            scope,
            round_number,
            name: name.to_string(),
            stats: stats.clone(),
            created_at,
            notes: notes.map(String::from),
        })
    }

    pub fn list_checkpoints(&self, scope: Scope) -> Result<Vec<Checkpoint>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, scope, round_number, name, stats, created_at, notes
             FROM checkpoints WHERE scope = ?1 ORDER BY id",
        )?;
        let rows = stmt.query_map(params![scope.as_str()], |row| {
            let scope: String = row.get(1)?;
            let stats: String = row.get(4)?;
            let created_at: String = row.get(5)?;
            Ok(Checkpoint {
                id: row.get(0)?,
                scope: parse_text(1, &scope)?,
                round_number: row.get(2)?,
                name: row.get(3)?,
                stats: parse_json(4, &stats)?,
                created_at: parse_timestamp(5, &created_at)?,
                notes: row.get(6)?,
            })
        })?;
        let mut checkpoints = Vec::new();
        for row in rows {
            checkpoints.push(row?);
        }
        Ok(checkpoints)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Document, Source};
    use crate::storage::database::Database;
    use crate::storage::repositories::{Repository, SqliteDocumentStore};

    const SCOPE: Scope = Scope::Source(Source::Library);

    fn scoring(score: u8) -> Scoring<'static> {
        Scoring { score, issues: &[], artifacts: &[] }
    }

    fn seed(conn: &Connection, scores: &[(DocumentId, u8)]) {
        let store = SqliteDocumentStore::new(conn);
        let repo = AuditRepository::new(conn);
        for &(id, score) in scores {
            store.save(&Document::new(id, Source::Library)).unwrap();
            repo.insert_pending(SCOPE, 1, id, &scoring(score)).unwrap();
        }
    }

    #[test]
    fn test_queue_orders_by_score_then_document() {
        let db = Database::open_in_memory().unwrap();
        let conn = db.connection();
        seed(&conn, &[(5, 40), (3, 40), (9, 10), (1, 90)]);
        let repo = AuditRepository::new(&conn);

        let ids: Vec<_> = repo.queue(SCOPE, 10, None).unwrap().iter().map(|r| r.document_id).collect();
        assert_eq!(ids, vec![9, 3, 5, 1]);

        let capped: Vec<_> = repo.queue(SCOPE, 10, Some(40)).unwrap().iter().map(|r| r.document_id).collect();
        assert_eq!(capped, vec![9, 3, 5]);
    }

    #[test]
    fn test_queue_skips_deleted_documents() {
        let db = Database::open_in_memory().unwrap();
        let conn = db.connection();
        seed(&conn, &[(1, 10), (2, 20)]);
        SqliteDocumentStore::new(&conn).delete(&1).unwrap();

        let records = AuditRepository::new(&conn).queue(SCOPE, 10, None).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].document_id, 2);
    }

    #[test]
    fn test_transition_is_guarded() {
        let db = Database::open_in_memory().unwrap();
        let conn = db.connection();
        seed(&conn, &[(1, 50)]);
        let repo = AuditRepository::new(&conn);
        let record = repo.latest_for_document(SCOPE, 1).unwrap().unwrap();

        assert!(repo.transition(record.id, AuditStatus::Reviewed, Some("ana"), Some("ok"), Utc::now()).unwrap());
        assert!(!repo.transition(record.id, AuditStatus::Skipped, Some("ana"), None, Utc::now()).unwrap());

        let after = repo.find(record.id).unwrap().unwrap();
        assert_eq!(after.status, AuditStatus::Reviewed);
        assert_eq!(after.notes.as_deref(), Some("ok"));
        assert!(after.reviewed_at.is_some());
    }

    #[test]
    fn test_single_active_record_per_document() {
        let db = Database::open_in_memory().unwrap();
        let conn = db.connection();
        seed(&conn, &[(1, 50)]);
        let repo = AuditRepository::new(&conn);

        assert!(repo.insert_pending(SCOPE, 2, 1, &scoring(60)).is_err());
    }

    #[test]
    fn test_stats_and_checkpoint_conflict() {
        let db = Database::open_in_memory().unwrap();
        let conn = db.connection();
        seed(&conn, &[(1, 20), (2, 40), (3, 90)]);
        let repo = AuditRepository::new(&conn);
        let record = repo.latest_for_document(SCOPE, 3).unwrap().unwrap();
        repo.transition(record.id, AuditStatus::Fixed, None, None, Utc::now()).unwrap();

        let stats = repo.stats(SCOPE).unwrap();
        assert_eq!(stats.total, 3);
        assert_eq!(stats.pending, 2);
        assert_eq!(stats.fixed, 1);
        assert_eq!(stats.avg_score, 50.0);

        repo.insert_checkpoint(SCOPE, 1, "first pass", &stats, None).unwrap();
        let err = repo.insert_checkpoint(SCOPE, 1, "first pass", &stats, None).unwrap_err();
        assert!(matches!(err, ScriptoriumError::Conflict(_)));
        assert_eq!(repo.list_checkpoints(SCOPE).unwrap().len(), 1);
    }
}
