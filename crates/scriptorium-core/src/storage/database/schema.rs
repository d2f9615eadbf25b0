use rusqlite::Connection;

use crate::error::Result;

pub const SCHEMA_VERSION: u32 = 3;

pub fn apply_pragmas(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        PRAGMA journal_mode = WAL;
        PRAGMA synchronous = NORMAL;
        PRAGMA foreign_keys = ON;
        ",
    )?;
    Ok(())
}

pub fn create_migrations_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS schema_migrations (
            version    INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL
        );
        ",
    )?;
    Ok(())
}

/// Documents and the audit workflow.
pub fn create_audit_tables(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS documents (
            id               INTEGER PRIMARY KEY,
            source           TEXT NOT NULL CHECK(source IN ('library', 'archive', 'transcripts', 'texts')),
            slug             TEXT NOT NULL DEFAULT '',
            title            TEXT,
            author           TEXT,
            publication_date TEXT,
            content          TEXT NOT NULL DEFAULT '',
            tags             TEXT NOT NULL DEFAULT '[]',
            updated_at       TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS audit_log (
            id            INTEGER PRIMARY KEY AUTOINCREMENT,
            document_id   INTEGER NOT NULL,
            scope         TEXT NOT NULL,
            round         INTEGER NOT NULL,
            status        TEXT NOT NULL DEFAULT 'pending'
                          CHECK(status IN ('pending', 'in_review', 'fixed', 'reviewed', 'skipped')),
            quality_score INTEGER NOT NULL CHECK(quality_score BETWEEN 0 AND 100),
            issues        TEXT NOT NULL DEFAULT '[]',
            artifacts     TEXT NOT NULL DEFAULT '[]',
            reviewer      TEXT,
            notes         TEXT,
            reviewed_at   TEXT,
            created_at    TEXT NOT NULL,
            updated_at    TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS audit_rounds (
            scope         TEXT NOT NULL,
            round         INTEGER NOT NULL,
            documents     INTEGER NOT NULL,
            new_documents INTEGER NOT NULL,
            rescored      INTEGER NOT NULL,
            preserved     INTEGER NOT NULL,
            completed_at  TEXT NOT NULL,
            PRIMARY KEY (scope, round)
        );

        CREATE TABLE IF NOT EXISTS checkpoints (
            id           INTEGER PRIMARY KEY AUTOINCREMENT,
            scope        TEXT NOT NULL,
            round_number INTEGER NOT NULL,
            name         TEXT NOT NULL,
            stats        TEXT NOT NULL,
            created_at   TEXT NOT NULL,
            notes        TEXT,
            UNIQUE (scope, name)
        );

        CREATE TABLE IF NOT EXISTS job_progress (
            job        TEXT NOT NULL,
            scope      TEXT NOT NULL,
            cursor     INTEGER NOT NULL DEFAULT 0,
            round      INTEGER NOT NULL DEFAULT 0,
            state      TEXT NOT NULL DEFAULT '{}',
            started_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            PRIMARY KEY (job, scope)
        );
        ",
    )?;
    Ok(())
}

pub fn create_audit_indexes(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE INDEX IF NOT EXISTS idx_documents_source ON documents(source, id);
        CREATE UNIQUE INDEX IF NOT EXISTS idx_audit_active
            ON audit_log(scope, document_id) WHERE status IN ('pending', 'in_review');
        CREATE INDEX IF NOT EXISTS idx_audit_document ON audit_log(scope, document_id);
        CREATE INDEX IF NOT EXISTS idx_audit_queue    ON audit_log(scope, status, quality_score, document_id);
        ",
    )?;
    Ok(())
}

/// Fingerprints and duplicate clusters.
pub fn create_dedup_tables(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS fingerprints (
            document_id            INTEGER PRIMARY KEY,
            content_md5            TEXT NOT NULL,
            content_sha256         TEXT NOT NULL,
            normalized_content_md5 TEXT NOT NULL,
            title_soundex          TEXT NOT NULL DEFAULT '',
            author_soundex         TEXT NOT NULL DEFAULT '[]',
            simhash_64             INTEGER NOT NULL,
            word_count             INTEGER NOT NULL,
            computed_at            TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS clusters (
            id                    INTEGER PRIMARY KEY AUTOINCREMENT,
            cluster_type          TEXT NOT NULL CHECK(cluster_type IN ('exact_match', 'fuzzy_match', 'near_duplicate')),
            confidence            REAL NOT NULL,
            review_status         TEXT NOT NULL DEFAULT 'pending'
                                  CHECK(review_status IN ('pending', 'confirmed', 'false_positive', 'merged')),
            canonical_document_id INTEGER,
            created_at            TEXT NOT NULL,
            updated_at            TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS cluster_members (
            cluster_id   INTEGER NOT NULL REFERENCES clusters(id) ON DELETE CASCADE,
            document_id  INTEGER NOT NULL,
            is_canonical INTEGER NOT NULL DEFAULT 0,
            PRIMARY KEY (cluster_id, document_id)
        );

        CREATE INDEX IF NOT EXISTS idx_fingerprints_normalized ON fingerprints(normalized_content_md5);
        CREATE INDEX IF NOT EXISTS idx_fingerprints_sha256     ON fingerprints(content_sha256);
        CREATE INDEX IF NOT EXISTS idx_fingerprints_title      ON fingerprints(title_soundex);
        CREATE INDEX IF NOT EXISTS idx_clusters_status         ON clusters(review_status);
        CREATE INDEX IF NOT EXISTS idx_cluster_members_doc     ON cluster_members(document_id);
        ",
    )?;
    Ok(())
}

/// Merge audit trail and restorable snapshots.
pub fn create_merge_tables(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS merge_log (
            id                    TEXT PRIMARY KEY,
            cluster_id            INTEGER NOT NULL,
            action                TEXT NOT NULL,
            canonical_document_id INTEGER,
            removed_ids           TEXT NOT NULL DEFAULT '[]',
            payload               TEXT NOT NULL DEFAULT '{}',
            snapshot_before       TEXT,
            created_at            TEXT NOT NULL,
            reversed              INTEGER NOT NULL DEFAULT 0
        );

        CREATE TABLE IF NOT EXISTS merge_tombstones (
            id          TEXT PRIMARY KEY,
            cluster_id  INTEGER NOT NULL,
            merge_id    TEXT NOT NULL,
            document_id INTEGER NOT NULL,
            merged_into INTEGER NOT NULL,
            snapshot    TEXT NOT NULL,
            created_at  TEXT NOT NULL,
            expires_at  TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_merge_log_cluster ON merge_log(cluster_id, created_at);
        CREATE INDEX IF NOT EXISTS idx_tombstones_merge  ON merge_tombstones(merge_id);
        CREATE INDEX IF NOT EXISTS idx_tombstones_expiry ON merge_tombstones(expires_at);
        ",
    )?;
    Ok(())
}
