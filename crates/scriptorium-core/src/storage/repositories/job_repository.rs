use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};

use crate::error::Result;
use crate::models::{DocumentId, JobProgress, Scope};

use super::{parse_json, parse_text, parse_timestamp};

/// Resumability tokens for chunked batch jobs, one per (job, scope).
pub struct JobRepository<'a> {
    conn: &'a Connection,
}

impl<'a> JobRepository<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    pub fn get(&self, job: &str, scope: Scope) -> Result<Option<JobProgress>> {
        let progress = self
            .conn
            .query_row(
                "SELECT job, scope, cursor, round, state, started_at, updated_at
                 FROM job_progress WHERE job = ?1 AND scope = ?2",
                params![job, scope.as_str()],
                |row| {
                    let scope: String = row.get(1)?;
                    let state: String = row.get(4)?;
                    let started_at: String = row.get(5)?;
                    let updated_at: String = row.get(6)?;
                    Ok(JobProgress {
                        job: row.get(0)?,
                        scope: parse_text(1, &scope)?,
                        cursor: row.get(2)?,
                        round: row.get(3)?,
                        state: parse_json(4, &state)?,
                        started_at: parse_timestamp(5, &started_at)?,
                        updated_at: parse_timestamp(6, &updated_at)?,
                    })
                },
            )
            .optional()?;
        Ok(progress)
    }

    /// Creates a fresh token at cursor 0.
    pub fn start(&self, job: &str, scope: Scope, round: u32, state: serde_json::Value) -> Result<JobProgress> {
        let now = Utc::now();
        let progress = JobProgress {
            job: job.to_string(),
            scope,
            cursor: 0,
            round,
            state,
            started_at: now,
            updated_at: now,
        };
        self.save(&progress)?;
        Ok(progress)
    }

    pub fn save(&self, progress: &JobProgress) -> Result<()> {
        self.conn.execute(
            "INSERT INTO job_progress (job, scope, cursor, round, state, started_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(job, scope) DO UPDATE SET
                cursor = excluded.cursor,
                round = excluded.round,
                state = excluded.state,
                updated_at = excluded.updated_at",
            params![
                progress.job,
                progress.scope.as_str(),
                progress.cursor,
                progress.round,
                serde_json::to_string(&progress.state)?,
                progress.started_at.to_rfc3339(),
                progress.updated_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    pub fn advance(&self, progress: &mut JobProgress, cursor: DocumentId, state: serde_json::Value) -> Result<()> {
        progress.cursor = cursor;
        progress.state = state;
        progress.updated_at = Utc::now();
        self.save(progress)
    }

    pub fn clear(&self, job: &str, scope: Scope) -> Result<bool> {
        let affected = self.conn.execute(
            "DELETE FROM job_progress WHERE job = ?1 AND scope = ?2",
            params![job, scope.as_str()],
        )?;
        Ok(affected > 0)
    }
}
