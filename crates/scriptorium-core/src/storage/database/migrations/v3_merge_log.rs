use rusqlite::Connection;

use super::Migration;
use crate::error::Result;
use crate::storage::database::schema;

pub struct V3MergeLog;

impl Migration for V3MergeLog {
    fn version(&self) -> u32 {
        3
    }

    fn description(&self) -> &'static str {
        "Add merge_log and merge_tombstones tables"
    }

    fn up(&self, conn: &Connection) -> Result<()> {
        schema::create_merge_tables(conn)
    }
}
