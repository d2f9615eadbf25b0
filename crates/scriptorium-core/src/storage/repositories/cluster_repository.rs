use std::collections::BTreeSet;

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};

use crate::error::{Result, ScriptoriumError};
use crate::models::{Cluster, ClusterMember, DocumentId, NewCluster, ReviewStatus};

use super::{parse_text, parse_timestamp};

const CLUSTER_COLUMNS: &str =
    "id, cluster_type, confidence, review_status, canonical_document_id, created_at, updated_at";

pub struct ClusterRepository<'a> {
    conn: &'a Connection,
}

impl<'a> ClusterRepository<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    fn row_to_cluster(row: &rusqlite::Row) -> rusqlite::Result<Cluster> {
        let cluster_type: String = row.get(1)?;
        let review_status: String = row.get(3)?;
        let created_at: String = row.get(5)?;
        let updated_at: String = row.get(6)?;
        Ok(Cluster {
            id: row.get(0)?,
            cluster_type: parse_text(1, &cluster_type)?,
            confidence: row.get(2)?,
            review_status: parse_text(3, &review_status)?,
            canonical_document_id: row.get(4)?,
            created_at: parse_timestamp(5, &created_at)?,
            updated_at: parse_timestamp(6, &updated_at)?,
        })
    }

    fn collect(&self, sql: &str, params: impl rusqlite::Params) -> Result<Vec<Cluster>> {
        let mut stmt = self.conn.prepare(sql)?;
        let rows = stmt.query_map(params, Self::row_to_cluster)?;
        let mut clusters = Vec::new();
        for row in rows {
            clusters.push(row?);
        }
        Ok(clusters)
    }

    /// Writes a pending cluster and its memberships; returns the new id.
    pub fn insert(&self, cluster: &NewCluster) -> Result<i64> {
        let now = Utc::now().to_rfc3339();
        self.conn.execute(
            "INSERT INTO clusters (cluster_type, confidence, review_status, created_at, updated_at)
             VALUES (?1, ?2, 'pending', ?3, ?3)",
            params![cluster.cluster_type.as_str(), cluster.confidence, now],
        )?;
        let id = self.conn.last_insert_rowid();

        let mut stmt = self.conn.prepare(
            "INSERT INTO cluster_members (cluster_id, document_id, is_canonical) VALUES (?1, ?2, 0)",
        )?;
        for document_id in &cluster.members {
            stmt.execute(params![id, document_id])?;
        }
        Ok(id)
    }

    pub fn find(&self, id: i64) -> Result<Option<Cluster>> {
        let cluster = self
            .conn
            .query_row(
                &format!("SELECT {CLUSTER_COLUMNS} FROM clusters WHERE id = ?1"),
                params![id],
                Self::row_to_cluster,
            )
            .optional()?;
        Ok(cluster)
    }

    pub fn get(&self, id: i64) -> Result<Cluster> {
        self.find(id)?.ok_or(ScriptoriumError::ClusterNotFound(id))
    }

    pub fn members(&self, cluster_id: i64) -> Result<Vec<ClusterMember>> {
        let mut stmt = self.conn.prepare(
            "SELECT cluster_id, document_id, is_canonical FROM cluster_members
             WHERE cluster_id = ?1 ORDER BY document_id",
        )?;
        let rows = stmt.query_map(params![cluster_id], |row| {
            Ok(ClusterMember {
                cluster_id: row.get(0)?,
                document_id: row.get(1)?,
                is_canonical: row.get(2)?,
            })
        })?;
        let mut members = Vec::new();
        for row in rows {
            members.push(row?);
        }
        Ok(members)
    }

    pub fn list(&self, status: Option<ReviewStatus>, limit: usize) -> Result<Vec<Cluster>> {
        self.collect(
            &format!(
                "SELECT {CLUSTER_COLUMNS} FROM clusters
                 WHERE (?1 IS NULL OR review_status = ?1)
                 ORDER BY confidence DESC, id ASC
                 LIMIT ?2"
            ),
            params![status.map(|s| s.as_str()), limit as i64],
        )
    }

    /// Pending clusters whose confidence is strictly above `threshold`.
    pub fn pending_above(&self, threshold: f64) -> Result<Vec<Cluster>> {
        self.collect(
            &format!(
                "SELECT {CLUSTER_COLUMNS} FROM clusters
                 WHERE review_status = 'pending' AND confidence > ?1
                 ORDER BY id"
            ),
            params![threshold],
        )
    }

    /// Drops every pending cluster; memberships cascade.
    pub fn delete_pending(&self) -> Result<usize> {
        let deleted = self
            .conn
            .execute("DELETE FROM clusters WHERE review_status = 'pending'", [])?;
        Ok(deleted)
    }

    /// Member sets of clusters that already carry a review decision.
    pub fn reviewed_member_sets(&self) -> Result<Vec<BTreeSet<DocumentId>>> {
        let mut stmt = self.conn.prepare(
            "SELECT m.cluster_id, m.document_id FROM cluster_members m
             JOIN clusters c ON c.id = m.cluster_id
             WHERE c.review_status != 'pending'
             ORDER BY m.cluster_id",
        )?;
        let rows = stmt.query_map([], |row| Ok((row.get::<_, i64>(0)?, row.get::<_, DocumentId>(1)?)))?;

        let mut sets: Vec<BTreeSet<DocumentId>> = Vec::new();
        let mut current: Option<i64> = None;
        for row in rows {
            let (cluster_id, document_id) = row?;
            if current != Some(cluster_id) {
                sets.push(BTreeSet::new());
                current = Some(cluster_id);
            }
            if let Some(set) = sets.last_mut() {
                set.insert(document_id);
            }
        }
        Ok(sets)
    }

    /// Sets the review status and canonical, and flags the canonical's membership row.
    pub fn set_status(&self, id: i64, status: ReviewStatus, canonical: Option<DocumentId>) -> Result<()> {
        let affected = self.conn.execute(
            "UPDATE clusters SET review_status = ?2, canonical_document_id = ?3, updated_at = ?4
             WHERE id = ?1",
            params![id, status.as_str(), canonical, Utc::now().to_rfc3339()],
        )?;
        if affected == 0 {
            return Err(ScriptoriumError::ClusterNotFound(id));
        }
        self.conn.execute(
            "UPDATE cluster_members SET is_canonical = (document_id IS ?2) WHERE cluster_id = ?1",
            params![id, canonical],
        )?;
        Ok(())
    }

    pub fn attach(&self, cluster_id: i64, document_id: DocumentId) -> Result<()> {
        self.conn.execute(
            "INSERT OR IGNORE INTO cluster_members (cluster_id, document_id, is_canonical)
             VALUES (?1, ?2, 0)",
            params![cluster_id, document_id],
        )?;
        Ok(())
    }

    pub fn detach(&self, cluster_id: i64, document_id: DocumentId) -> Result<bool> {
        let affected = self.conn.execute(
            "DELETE FROM cluster_members WHERE cluster_id = ?1 AND document_id = ?2",
            params![cluster_id, document_id],
        )?;
        Ok(affected > 0)
    }

    pub fn count_by_status(&self) -> Result<Vec<(ReviewStatus, usize)>> {
        let mut stmt = self.conn.prepare(
            "SELECT review_status, COUNT(*) FROM clusters GROUP BY review_status ORDER BY review_status",
        )?;
        let rows = stmt.query_map([], |row| {
            let status: String = row.get(0)?;
            Ok((parse_text(0, &status)?, row.get::<_, i64>(1)? as usize))
        })?;
        let mut counts = Vec::new();
        for row in rows {
            counts.push(row?);
        }
        Ok(counts)
    }
}
