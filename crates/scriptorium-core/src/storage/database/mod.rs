mod connection;
mod error;
mod migrations;
mod schema;

pub use connection::ConnectionPool;
pub use error::DatabaseError;
pub use migrations::{get_applied_versions, run_migrations, Migration};
pub use schema::SCHEMA_VERSION;

use std::path::Path;
use std::sync::MutexGuard;
use std::time::Duration;

use rusqlite::Connection;

use crate::error::Result;

/// A migrated database handle, opened once per command and dropped on exit.
pub struct Database {
    pool: ConnectionPool,
}

impl Database {
    pub fn open(path: &Path, busy_timeout: Duration) -> Result<Self> {
        let pool = ConnectionPool::open(path, busy_timeout)?;
        run_migrations(&pool.get_connection())?;
        Ok(Self { pool })
    }

    pub fn open_in_memory() -> Result<Self> {
        let pool = ConnectionPool::open_in_memory()?;
        run_migrations(&pool.get_connection())?;
        Ok(Self { pool })
    }

    pub fn connection(&self) -> MutexGuard<'_, Connection> {
        self.pool.get_connection()
    }

    pub fn path(&self) -> Option<&str> {
        self.pool.path()
    }

    pub fn schema_versions(&self) -> Result<Vec<u32>> {
        get_applied_versions(&self.connection())
    }
}
