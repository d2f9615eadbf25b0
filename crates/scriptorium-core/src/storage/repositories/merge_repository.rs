use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension};
use uuid::Uuid;

use crate::error::Result;
use crate::models::{MergeAction, MergeLogEntry, Tombstone};

use super::{parse_json, parse_text, parse_timestamp};

fn parse_uuid(idx: usize, value: &str) -> rusqlite::Result<Uuid> {
    Uuid::parse_str(value)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

/// Append-only record of cluster decisions; only `reversed` is ever updated.
pub struct MergeLogRepository<'a> {
    conn: &'a Connection,
}

const LOG_COLUMNS: &str = "id, cluster_id, action, canonical_document_id, removed_ids, payload,
     snapshot_before, created_at, reversed";

impl<'a> MergeLogRepository<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    fn row_to_entry(row: &rusqlite::Row) -> rusqlite::Result<MergeLogEntry> {
        let id: String = row.get(0)?;
        let action: String = row.get(2)?;
        let removed_ids: String = row.get(4)?;
        let payload: String = row.get(5)?;
        let snapshot_before: Option<String> = row.get(6)?;
        let created_at: String = row.get(7)?;
        Ok(MergeLogEntry {
            id: parse_uuid(0, &id)?,
            cluster_id: row.get(1)?,
            action: parse_text::<MergeAction>(2, &action)?,
            canonical_document_id: row.get(3)?,
            removed_ids: parse_json(4, &removed_ids)?,
            payload: parse_json(5, &payload)?,
            snapshot_before: snapshot_before.map(|s| parse_json(6, &s)).transpose()?,
            created_at: parse_timestamp(7, &created_at)?,
            reversed: row.get(8)?,
        })
    }

    pub fn insert(&self, entry: &MergeLogEntry) -> Result<()> {
        let snapshot_before = entry
            .snapshot_before
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        self.conn.execute(
            "INSERT INTO merge_log
                (id, cluster_id, action, canonical_document_id, removed_ids, payload,
                 snapshot_before, created_at, reversed)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                entry.id.to_string(),
                entry.cluster_id,
                entry.action.as_str(),
                entry.canonical_document_id,
                serde_json::to_string(&entry.removed_ids)?,
                serde_json::to_string(&entry.payload)?,
                snapshot_before,
                entry.created_at.to_rfc3339(),
                entry.reversed,
            ],
        )?;
        Ok(())
    }

    /// The latest merge of a cluster that has not been rolled back.
    pub fn latest_active_merge(&self, cluster_id: i64) -> Result<Option<MergeLogEntry>> {
        let entry = self
            .conn
            .query_row(
                &format!(
                    "SELECT {LOG_COLUMNS} FROM merge_log
                     WHERE cluster_id = ?1 AND action IN ('merge', 'auto_merge') AND reversed = 0
                     ORDER BY created_at DESC, rowid DESC LIMIT 1"
                ),
                params![cluster_id],
                Self::row_to_entry,
            )
            .optional()?;
        Ok(entry)
    }

    pub fn mark_reversed(&self, id: &Uuid) -> Result<bool> {
        let affected = self.conn.execute(
            "UPDATE merge_log SET reversed = 1 WHERE id = ?1 AND reversed = 0",
            params![id.to_string()],
        )?;
        Ok(affected > 0)
    }

    pub fn for_cluster(&self, cluster_id: i64) -> Result<Vec<MergeLogEntry>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {LOG_COLUMNS} FROM merge_log WHERE cluster_id = ?1 ORDER BY created_at, rowid"
        ))?;
        let rows = stmt.query_map(params![cluster_id], Self::row_to_entry)?;
        let mut entries = Vec::new();
        for row in rows {
            entries.push(row?);
        }
        Ok(entries)
    }
}

pub struct TombstoneRepository<'a> {
    conn: &'a Connection,
}

impl<'a> TombstoneRepository<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    fn row_to_tombstone(row: &rusqlite::Row) -> rusqlite::Result<Tombstone> {
        let id: String = row.get(0)?;
        let merge_id: String = row.get(2)?;
        let snapshot: String = row.get(5)?;
        let created_at: String = row.get(6)?;
        let expires_at: String = row.get(7)?;
        Ok(Tombstone {
            id: parse_uuid(0, &id)?,
            cluster_id: row.get(1)?,
            merge_id: parse_uuid(2, &merge_id)?,
            document_id: row.get(3)?,
            merged_into: row.get(4)?,
            snapshot: parse_json(5, &snapshot)?,
            created_at: parse_timestamp(6, &created_at)?,
            expires_at: parse_timestamp(7, &expires_at)?,
        })
    }

    pub fn insert(&self, tombstone: &Tombstone) -> Result<()> {
        self.conn.execute(
            "INSERT INTO merge_tombstones
                (id, cluster_id, merge_id, document_id, merged_into, snapshot, created_at, expires_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                tombstone.id.to_string(),
                tombstone.cluster_id,
                tombstone.merge_id.to_string(),
                tombstone.document_id,
                tombstone.merged_into,
                serde_json::to_string(&tombstone.snapshot)?,
                tombstone.created_at.to_rfc3339(),
                tombstone.expires_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    pub fn for_merge(&self, merge_id: &Uuid) -> Result<Vec<Tombstone>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, cluster_id, merge_id, document_id, merged_into, snapshot, created_at, expires_at
             FROM merge_tombstones WHERE merge_id = ?1 ORDER BY document_id",
        )?;
        let rows = stmt.query_map(params![merge_id.to_string()], Self::row_to_tombstone)?;
        let mut tombstones = Vec::new();
        for row in rows {
            tombstones.push(row?);
        }
        Ok(tombstones)
    }

    pub fn delete_for_merge(&self, merge_id: &Uuid) -> Result<usize> {
        let deleted = self.conn.execute(
            "DELETE FROM merge_tombstones WHERE merge_id = ?1",
            params![merge_id.to_string()],
        )?;
        Ok(deleted)
    }

    /// Deletes tombstones whose grace period ended before `now`.
    pub fn purge_expired(&self, now: DateTime<Utc>) -> Result<usize> {
        let deleted = self.conn.execute(
            "DELETE FROM merge_tombstones WHERE expires_at < ?1",
            params![now.to_rfc3339()],
        )?;
        Ok(deleted)
    }

    pub fn count(&self) -> Result<usize> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM merge_tombstones", [], |row| row.get(0))?;
        Ok(count as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Document, Source};
    use crate::storage::database::Database;
    use chrono::Duration;

    fn tombstone(merge_id: Uuid, document_id: i64, expires_at: DateTime<Utc>) -> Tombstone {
        Tombstone {
            id: Uuid::now_v7(),
            cluster_id: 10,
            merge_id,
            document_id,
            merged_into: 501,
            snapshot: Document::new(document_id, Source::Archive).with_tags(["B"]),
            created_at: Utc::now(),
            expires_at,
        }
    }

    #[test]
    fn test_tombstone_roundtrip_and_purge() {
        let db = Database::open_in_memory().unwrap();
        let conn = db.connection();
        let repo = TombstoneRepository::new(&conn);
        let merge_id = Uuid::now_v7();

        repo.insert(&tombstone(merge_id, 502, Utc::now() + Duration::days(30))).unwrap();
        repo.insert(&tombstone(merge_id, 503, Utc::now() - Duration::days(1))).unwrap();

        let stored = repo.for_merge(&merge_id).unwrap();
        assert_eq!(stored.len(), 2);
        assert!(stored[0].snapshot.tags.contains("B"));

        assert_eq!(repo.purge_expired(Utc::now()).unwrap(), 1);
        assert_eq!(repo.for_merge(&merge_id).unwrap()[0].document_id, 502);
    }

    #[test]
    fn test_latest_active_merge_ignores_reversed() {
        let db = Database::open_in_memory().unwrap();
        let conn = db.connection();
        let repo = MergeLogRepository::new(&conn);

        let entry = MergeLogEntry {
            id: Uuid::now_v7(),
            cluster_id: 10,
            action: MergeAction::Merge,
            canonical_document_id: Some(501),
            removed_ids: vec![502, 503],
            payload: serde_json::json!({"reviewer": "ana"}),
            snapshot_before: Some(["A".to_string()].into()),
            created_at: Utc::now(),
            reversed: false,
        };
        repo.insert(&entry).unwrap();

        assert_eq!(repo.latest_active_merge(10).unwrap(), Some(entry.clone()));
        assert!(repo.mark_reversed(&entry.id).unwrap());
        assert!(!repo.mark_reversed(&entry.id).unwrap());
        assert!(repo.latest_active_merge(10).unwrap().is_none());
        assert_eq!(repo.for_cluster(10).unwrap().len(), 1);
    }
}
