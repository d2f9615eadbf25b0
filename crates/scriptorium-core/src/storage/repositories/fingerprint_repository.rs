use std::collections::HashMap;

use rusqlite::{params, Connection, OptionalExtension};

use crate::error::Result;
use crate::models::{DocumentId, Fingerprint};

use super::{parse_json, parse_timestamp, Repository};

const FINGERPRINT_COLUMNS: &str = "f.document_id, f.content_md5, f.content_sha256,
     f.normalized_content_md5, f.title_soundex, f.author_soundex, f.simhash_64,
     f.word_count, f.computed_at";

pub struct FingerprintRepository<'a> {
    conn: &'a Connection,
}

impl<'a> FingerprintRepository<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    fn row_to_fingerprint(row: &rusqlite::Row) -> rusqlite::Result<Fingerprint> {
        let author_soundex: String = row.get(5)?;
        let computed_at: String = row.get(8)?;
        Ok(Fingerprint {
            document_id: row.get(0)?,
            content_md5: row.get(1)?,
            content_sha256: row.get(2)?,
            normalized_content_md5: row.get(3)?,
            title_soundex: row.get(4)?,
            author_soundex: parse_json(5, &author_soundex)?,
            // SQLite integers are signed; the bit pattern is what matters.
            simhash_64: row.get::<_, i64>(6)? as u64,
            word_count: row.get::<_, i64>(7)? as usize,
            computed_at: parse_timestamp(8, &computed_at)?,
        })
    }

    /// Stored `content_md5` per document for ids in `[from, to]`.
    pub fn content_hashes_between(&self, from: DocumentId, to: DocumentId) -> Result<HashMap<DocumentId, String>> {
        let mut stmt = self.conn.prepare(
            "SELECT document_id, content_md5 FROM fingerprints WHERE document_id BETWEEN ?1 AND ?2",
        )?;
        let rows = stmt.query_map(params![from, to], |row| Ok((row.get(0)?, row.get(1)?)))?;
        let mut hashes = HashMap::new();
        for row in rows {
            let (id, md5) = row?;
            hashes.insert(id, md5);
        }
        Ok(hashes)
    }

    /// Fingerprints of documents that still exist, ascending by id.
    pub fn list_live(&self) -> Result<Vec<Fingerprint>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {FINGERPRINT_COLUMNS} FROM fingerprints f
             JOIN documents d ON d.id = f.document_id
             ORDER BY f.document_id"
        ))?;
        let rows = stmt.query_map([], Self::row_to_fingerprint)?;
        let mut fingerprints = Vec::new();
        for row in rows {
            fingerprints.push(row?);
        }
        Ok(fingerprints)
    }

    pub fn count(&self) -> Result<usize> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM fingerprints", [], |row| row.get(0))?;
        Ok(count as usize)
    }
}

impl<'a> Repository for FingerprintRepository<'a> {
    type Entity = Fingerprint;
    type Id = DocumentId;

    fn find_by_id(&self, id: &Self::Id) -> Result<Option<Self::Entity>> {
        let fingerprint = self
            .conn
            .query_row(
                &format!("SELECT {FINGERPRINT_COLUMNS} FROM fingerprints f WHERE f.document_id = ?1"),
                params![id],
                Self::row_to_fingerprint,
            )
            .optional()?;
        Ok(fingerprint)
    }

    fn save(&self, fp: &Self::Entity) -> Result<()> {
        self.conn.execute(
            "INSERT INTO fingerprints
                (document_id, content_md5, content_sha256, normalized_content_md5,
                 title_soundex, author_soundex, simhash_64, word_count, computed_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
             ON CONFLICT(document_id) DO UPDATE SET
                content_md5 = excluded.content_md5,
                content_sha256 = excluded.content_sha256,
                normalized_content_md5 = excluded.normalized_content_md5,
                title_soundex = excluded.title_soundex,
                author_soundex = excluded.author_soundex,
                simhash_64 = excluded.simhash_64,
                word_count = excluded.word_count,
                computed_at = excluded.computed_at",
            params![
                fp.document_id,
                fp.content_md5,
                fp.content_sha256,
                fp.normalized_content_md5,
                fp.title_soundex,
                serde_json::to_string(&fp.author_soundex)?,
                fp.simhash_64 as i64,
                fp.word_count as i64,
                fp.computed_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    fn delete(&self, id: &Self::Id) -> Result<bool> {
        let affected = self
            .conn
            .execute("DELETE FROM fingerprints WHERE document_id = ?1", params![id])?;
        Ok(affected > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Document, Source};
    use crate::storage::database::Database;
    use crate::storage::repositories::SqliteDocumentStore;
    use chrono::Utc;

    fn fingerprint(id: DocumentId, simhash: u64) -> Fingerprint {
        Fingerprint {
            document_id: id,
            content_md5: format!("md5-{id}"),
            content_sha256: format!("sha-{id}"),
            normalized_content_md5: "norm".into(),
            title_soundex: "G300 S323".into(),
            author_soundex: vec!["B251".into()],
            simhash_64: simhash,
            word_count: 120,
            computed_at: Utc::now(),
        }
    }

    #[test]
    fn test_upsert_preserves_high_bit_simhash() {
        let db = Database::open_in_memory().unwrap();
        let conn = db.connection();
        let repo = FingerprintRepository::new(&conn);

        repo.save(&fingerprint(1, u64::MAX - 5)).unwrap();
        repo.save(&fingerprint(1, 0x8000_0000_0000_0001)).unwrap();

        let stored = repo.find_by_id(&1).unwrap().unwrap();
        assert_eq!(stored.simhash_64, 0x8000_0000_0000_0001);
        assert_eq!(stored.author_soundex, vec!["B251"]);
        assert_eq!(repo.count().unwrap(), 1);
    }

    #[test]
    fn test_list_live_skips_deleted_documents() {
        let db = Database::open_in_memory().unwrap();
        let conn = db.connection();
        let store = SqliteDocumentStore::new(&conn);
        let repo = FingerprintRepository::new(&conn);

        store.save(&Document::new(2, Source::Texts)).unwrap();
        repo.save(&fingerprint(1, 1)).unwrap();
        repo.save(&fingerprint(2, 2)).unwrap();

        let live: Vec<_> = repo.list_live().unwrap().iter().map(|f| f.document_id).collect();
        assert_eq!(live, vec![2]);
        assert_eq!(repo.content_hashes_between(1, 2).unwrap().len(), 2);
    }
}
