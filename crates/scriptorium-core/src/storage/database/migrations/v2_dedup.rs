use rusqlite::Connection;

use super::Migration;
use crate::error::Result;
use crate::storage::database::schema;

pub struct V2Dedup;

impl Migration for V2Dedup {
    fn version(&self) -> u32 {
        2
    }

    fn description(&self) -> &'static str {
        "Add fingerprints, clusters and cluster_members tables"
    }

    fn up(&self, conn: &Connection) -> Result<()> {
        schema::create_dedup_tables(conn)
    }
}
