mod v1_initial;
mod v2_dedup;
mod v3_merge_log;

use chrono::Utc;
use rusqlite::Connection;

use super::error::DatabaseError;
use super::schema::{create_migrations_table, SCHEMA_VERSION};
use crate::error::Result;

pub trait Migration {
    fn version(&self) -> u32;
    fn description(&self) -> &'static str;
    fn up(&self, conn: &Connection) -> Result<()>;
}

fn record_migration(conn: &Connection, version: u32) -> Result<()> {
    conn.execute(
        "INSERT OR IGNORE INTO schema_migrations(version, applied_at) VALUES (?1, ?2)",
        rusqlite::params![version, Utc::now().to_rfc3339()],
    )?;
    Ok(())
}

fn is_migration_applied(conn: &Connection, version: u32) -> Result<bool> {
    let applied: bool = conn
        .prepare("SELECT 1 FROM schema_migrations WHERE version = ?1")?
        .exists(rusqlite::params![version])?;
    Ok(applied)
}

/// Applies every pending migration, each in its own transaction.
pub fn run_migrations(conn: &Connection) -> Result<()> {
    create_migrations_table(conn)?;

    let newest = get_applied_versions(conn)?.last().copied().unwrap_or(0);
    if newest > SCHEMA_VERSION {
        return Err(DatabaseError::SchemaTooNew {
            found: newest,
            supported: SCHEMA_VERSION,
        }
        .into());
    }

    let migrations: Vec<Box<dyn Migration>> = vec![
        Box::new(v1_initial::V1Initial),
        Box::new(v2_dedup::V2Dedup),
        Box::new(v3_merge_log::V3MergeLog),
    ];

    for migration in migrations {
        if is_migration_applied(conn, migration.version())? {
            continue;
        }
        let tx = rusqlite::Transaction::new_unchecked(conn, rusqlite::TransactionBehavior::Immediate)?;
        migration.up(&tx).map_err(|e| DatabaseError::Migration {
            version: migration.version(),
            message: e.to_string(),
        })?;
        record_migration(&tx, migration.version())?;
        tx.commit()?;
        tracing::debug!(version = migration.version(), "{}", migration.description());
    }

    Ok(())
}

pub fn get_applied_versions(conn: &Connection) -> Result<Vec<u32>> {
    let has_table: bool = conn
        .prepare("SELECT name FROM sqlite_master WHERE type='table' AND name='schema_migrations'")?
        .exists([])?;

    if !has_table {
        return Ok(Vec::new());
    }

    let mut stmt = conn.prepare("SELECT version FROM schema_migrations ORDER BY version")?;
    let rows = stmt.query_map([], |row| row.get(0))?;
    let mut versions = Vec::new();
    for row in rows {
        versions.push(row?);
    }
    Ok(versions)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migrations_are_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();
        run_migrations(&conn).unwrap();
        assert_eq!(get_applied_versions(&conn).unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn test_newer_schema_is_rejected() {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();
        record_migration(&conn, SCHEMA_VERSION + 1).unwrap();

        let err = run_migrations(&conn).unwrap_err();
        assert!(err.to_string().contains("newer than supported"));
    }
}
