use std::collections::{BTreeSet, HashMap};
use std::io::BufRead;

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};

use crate::error::{Result, ScriptoriumError};
use crate::models::{Document, DocumentId, MetadataUpdate, Scope, Source};

use super::{parse_json, parse_text, Repository};

/// The document collection this core reads from and mutates.
pub trait DocumentStore: Repository<Entity = Document, Id = DocumentId> {
    /// Like `find_by_id`, but a missing document is an error.
    fn get(&self, id: DocumentId) -> Result<Document>;
    /// Keyset page of documents in `scope` with id greater than `after`.
    fn list_scope(&self, scope: Scope, after: DocumentId, limit: usize) -> Result<Vec<Document>>;
    fn count_scope(&self, scope: Scope) -> Result<usize>;
    fn exists(&self, id: DocumentId) -> Result<bool>;
    fn update_metadata(&self, id: DocumentId, update: &MetadataUpdate) -> Result<Document>;
    /// Adds `tags` to the document's set and returns the resulting set.
    fn union_tags(&self, id: DocumentId, tags: &BTreeSet<String>) -> Result<BTreeSet<String>>;
    fn replace_tags(&self, id: DocumentId, tags: &BTreeSet<String>) -> Result<()>;
}

pub struct SqliteDocumentStore<'a> {
    conn: &'a Connection,
}

const DOCUMENT_COLUMNS: &str =
    "id, source, slug, title, author, publication_date, content, tags";

impl<'a> SqliteDocumentStore<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    fn row_to_document(row: &rusqlite::Row) -> rusqlite::Result<Document> {
        let source: String = row.get(1)?;
        let tags: String = row.get(7)?;
        Ok(Document {
            id: row.get(0)?,
            source: parse_text::<Source>(1, &source)?,
            slug: row.get(2)?,
            title: row.get(3)?,
            author: row.get(4)?,
            publication_date: row.get(5)?,
            content: row.get(6)?,
            tags: parse_json(7, &tags)?,
        })
    }

    fn current_tags(&self, id: DocumentId) -> Result<BTreeSet<String>> {
        let tags: Option<String> = self
            .conn
            .query_row("SELECT tags FROM documents WHERE id = ?1", params![id], |row| row.get(0))
            .optional()?;
        let tags = tags.ok_or(ScriptoriumError::DocumentNotFound(id))?;
        Ok(serde_json::from_str(&tags)?)
    }

    /// Loads JSON-lines records into the store under `source`. Lines that fail
    /// to parse or validate are logged and counted, the rest are upserted.
    pub fn import_jsonl<R: BufRead>(&self, source: Source, reader: R) -> Result<ImportSummary> {
        let mut summary = ImportSummary::default();

        for (line_no, line) in reader.lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let record: ImportRecord = match serde_json::from_str(&line) {
                Ok(record) => record,
                Err(e) => {
                    tracing::warn!(line = line_no + 1, error = %e, "skipping malformed import line");
                    summary.failed += 1;
                    continue;
                }
            };
            match record.into_document(source) {
                Ok(mut doc) => {
                    if self.exists(doc.id)? {
                        // Tags gained from merges survive a re-import.
                        doc.tags.extend(self.current_tags(doc.id)?);
                        summary.updated += 1;
                    } else {
                        summary.imported += 1;
                    }
                    self.save(&doc)?;
                }
                Err(e) => {
                    tracing::warn!(line = line_no + 1, error = %e, "skipping invalid import record");
                    summary.failed += 1;
                }
            }
        }

        Ok(summary)
    }

    /// Non-blank titles of every document.
    pub fn titles(&self) -> Result<HashMap<DocumentId, String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, title FROM documents WHERE TRIM(COALESCE(title, '')) != ''")?;
        let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;
        let mut titles = HashMap::new();
        for row in rows {
            let (id, title) = row?;
            titles.insert(id, title);
        }
        Ok(titles)
    }
}

impl<'a> Repository for SqliteDocumentStore<'a> {
    type Entity = Document;
    type Id = DocumentId;

    fn find_by_id(&self, id: &Self::Id) -> Result<Option<Self::Entity>> {
        let doc = self
            .conn
            .query_row(
                &format!("SELECT {DOCUMENT_COLUMNS} FROM documents WHERE id = ?1"),
                params![id],
                Self::row_to_document,
            )
            .optional()?;
        Ok(doc)
    }

    fn save(&self, doc: &Self::Entity) -> Result<()> {
        let tags_json = serde_json::to_string(&doc.tags)?;
        self.conn.execute(
            "INSERT INTO documents
                (id, source, slug, title, author, publication_date, content, tags, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
             ON CONFLICT(id) DO UPDATE SET
                source = excluded.source,
                slug = excluded.slug,
                title = excluded.title,
                author = excluded.author,
                publication_date = excluded.publication_date,
                content = excluded.content,
                tags = excluded.tags,
                updated_at = excluded.updated_at",
            params![
                doc.id,
                doc.source.as_str(),
                doc.slug,
                doc.title,
                doc.author,
                doc.publication_date,
                doc.content,
                tags_json,
                Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    fn delete(&self, id: &Self::Id) -> Result<bool> {
        let affected = self.conn.execute("DELETE FROM documents WHERE id = ?1", params![id])?;
        Ok(affected > 0)
    }
}

impl<'a> DocumentStore for SqliteDocumentStore<'a> {
    fn get(&self, id: DocumentId) -> Result<Document> {
        self.find_by_id(&id)?.ok_or(ScriptoriumError::DocumentNotFound(id))
    }

    fn list_scope(&self, scope: Scope, after: DocumentId, limit: usize) -> Result<Vec<Document>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {DOCUMENT_COLUMNS} FROM documents
             WHERE id > ?1 AND (?2 IS NULL OR source = ?2)
             ORDER BY id
             LIMIT ?3"
        ))?;
        let source = scope.source().map(|s| s.as_str());
        let rows = stmt.query_map(params![after, source, limit as i64], Self::row_to_document)?;
        let mut docs = Vec::new();
        for row in rows {
            docs.push(row?);
        }
        Ok(docs)
    }

    fn count_scope(&self, scope: Scope) -> Result<usize> {
        let source = scope.source().map(|s| s.as_str());
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM documents WHERE (?1 IS NULL OR source = ?1)",
            params![source],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    fn exists(&self, id: DocumentId) -> Result<bool> {
        let exists = self
            .conn
            .prepare("SELECT 1 FROM documents WHERE id = ?1")?
            .exists(params![id])?;
        Ok(exists)
    }

    fn update_metadata(&self, id: DocumentId, update: &MetadataUpdate) -> Result<Document> {
        let mut doc = self.get(id)?;
        let clean = |value: &String| Some(value.trim().to_string()).filter(|v| !v.is_empty());

        if let Some(title) = &update.title {
            doc.title = clean(title);
        }
        if let Some(author) = &update.author {
            doc.author = clean(author);
        }
        if let Some(date) = &update.publication_date {
            doc.publication_date = clean(date);
        }

        self.conn.execute(
            "UPDATE documents SET title = ?2, author = ?3, publication_date = ?4, updated_at = ?5
             WHERE id = ?1",
            params![id, doc.title, doc.author, doc.publication_date, Utc::now().to_rfc3339()],
        )?;
        Ok(doc)
    }

    fn union_tags(&self, id: DocumentId, tags: &BTreeSet<String>) -> Result<BTreeSet<String>> {
        let mut current = self.current_tags(id)?;
        current.extend(tags.iter().cloned());
        self.replace_tags(id, &current)?;
        Ok(current)
    }

    fn replace_tags(&self, id: DocumentId, tags: &BTreeSet<String>) -> Result<()> {
        let affected = self.conn.execute(
            "UPDATE documents SET tags = ?2, updated_at = ?3 WHERE id = ?1",
            params![id, serde_json::to_string(tags)?, Utc::now().to_rfc3339()],
        )?;
        if affected == 0 {
            return Err(ScriptoriumError::DocumentNotFound(id));
        }
        Ok(())
    }
}

/// One JSON-lines import record. `source` is optional; when present it must
/// match the source the import runs under.
#[derive(Debug, Deserialize)]
struct ImportRecord {
    id: DocumentId,
    #[serde(default)]
    source: Option<Source>,
    #[serde(default)]
    slug: Option<String>,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    author: Option<String>,
    #[serde(default, alias = "date")]
    publication_date: Option<String>,
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tags: BTreeSet<String>,
}

impl ImportRecord {
    fn into_document(self, source: Source) -> Result<Document> {
        if self.id <= 0 {
            return Err(ScriptoriumError::validation(format!(
                "document id must be positive, got {}",
                self.id
            )));
        }
        if let Some(declared) = self.source.filter(|s| *s != source) {
            return Err(ScriptoriumError::validation(format!(
                "record {} declares source '{declared}' but the import is for '{source}'",
                self.id
            )));
        }
        Ok(Document {
            id: self.id,
            source,
            slug: self.slug.unwrap_or_default(),
            title: self.title,
            author: self.author,
            publication_date: self.publication_date,
            content: self.content.unwrap_or_default(),
            tags: self.tags,
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ImportSummary {
    pub imported: usize,
    pub updated: usize,
    pub failed: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::database::Database;

    fn sample(id: DocumentId, source: Source) -> Document {
        Document::new(id, source)
            .with_title(format!("Document {id}"))
            .with_author("Emma Goldman")
            .with_tags(["essay"])
    }

    #[test]
    fn test_save_and_find() {
        let db = Database::open_in_memory().unwrap();
        let conn = db.connection();
        let store = SqliteDocumentStore::new(&conn);

        let doc = sample(7, Source::Texts).with_content("Anarchism and other essays");
        store.save(&doc).unwrap();

        assert_eq!(store.get(7).unwrap(), doc);
        assert!(store.find_by_id(&8).unwrap().is_none());
        assert!(matches!(store.get(8), Err(ScriptoriumError::DocumentNotFound(8))));
    }

    #[test]
    fn test_list_scope_is_keyset_paginated() {
        let db = Database::open_in_memory().unwrap();
        let conn = db.connection();
        let store = SqliteDocumentStore::new(&conn);

        for id in 1..=5 {
            let source = if id % 2 == 0 { Source::Archive } else { Source::Library };
            store.save(&sample(id, source)).unwrap();
        }

        let page: Vec<_> = store.list_scope(Scope::All, 2, 2).unwrap().iter().map(|d| d.id).collect();
        assert_eq!(page, vec![3, 4]);

        let archive: Vec<_> = store
            .list_scope(Scope::Source(Source::Archive), 0, 10)
            .unwrap()
            .iter()
            .map(|d| d.id)
            .collect();
        assert_eq!(archive, vec![2, 4]);
        assert_eq!(store.count_scope(Scope::Source(Source::Library)).unwrap(), 3);
    }

    #[test]
    fn test_union_tags() {
        let db = Database::open_in_memory().unwrap();
        let conn = db.connection();
        let store = SqliteDocumentStore::new(&conn);
        store.save(&sample(1, Source::Library)).unwrap();

        let extra: BTreeSet<String> = ["history", "essay"].map(String::from).into();
        let tags = store.union_tags(1, &extra).unwrap();

        assert_eq!(tags.into_iter().collect::<Vec<_>>(), vec!["essay", "history"]);
        assert!(store.union_tags(99, &extra).is_err());
    }

    #[test]
    fn test_update_metadata_blank_clears_field() {
        let db = Database::open_in_memory().unwrap();
        let conn = db.connection();
        let store = SqliteDocumentStore::new(&conn);
        store.save(&sample(1, Source::Library)).unwrap();

        let update = MetadataUpdate {
            author: Some("  ".into()),
            publication_date: Some("1910".into()),
            ..Default::default()
        };
        let doc = store.update_metadata(1, &update).unwrap();

        assert_eq!(doc.author, None);
        assert_eq!(doc.publication_date.as_deref(), Some("1910"));
        assert_eq!(store.get(1).unwrap().title.as_deref(), Some("Document 1"));
    }

    #[test]
    fn test_import_jsonl_counts_failures() {
        let db = Database::open_in_memory().unwrap();
        let conn = db.connection();
        let store = SqliteDocumentStore::new(&conn);

        let input = r#"{"id": 1, "title": "Mutual Aid", "author": "Peter Kropotkin", "tags": ["a"]}
not json
{"id": 2, "source": "archive", "title": "Wrong collection"}
{"id": -3, "title": "Bad id"}

{"id": 4, "date": "1902", "content": "text"}
"#;
        let summary = store.import_jsonl(Source::Library, input.as_bytes()).unwrap();

        assert_eq!(summary, ImportSummary { imported: 2, updated: 0, failed: 3 });
        assert_eq!(store.get(4).unwrap().publication_date.as_deref(), Some("1902"));
        assert_eq!(store.get(1).unwrap().source, Source::Library);
    }

    #[test]
    fn test_reimport_keeps_merged_tags() {
        let db = Database::open_in_memory().unwrap();
        let conn = db.connection();
        let store = SqliteDocumentStore::new(&conn);

        let line = r#"{"id": 1, "title": "Mutual Aid", "tags": ["biology"]}"#;
        store.import_jsonl(Source::Library, line.as_bytes()).unwrap();
        store.union_tags(1, &BTreeSet::from(["classic".to_string()])).unwrap();

        let retitled = r#"{"id": 1, "title": "Mutual Aid: A Factor of Evolution", "tags": ["evolution"]}"#;
        let summary = store.import_jsonl(Source::Library, retitled.as_bytes()).unwrap();
        assert_eq!(summary, ImportSummary { imported: 0, updated: 1, failed: 0 });

        let doc = store.get(1).unwrap();
        assert_eq!(doc.title.as_deref(), Some("Mutual Aid: A Factor of Evolution"));
        let tags: Vec<_> = doc.tags.iter().map(String::as_str).collect();
        assert_eq!(tags, vec!["biology", "classic", "evolution"]);
    }
}
