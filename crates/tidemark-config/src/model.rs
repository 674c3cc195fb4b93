use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tidemark_common::{Mode, Result};
use tidemark_db::TableName;
use tidemark_db::table::DEFAULT_TABLE;

/// Settings for one migration run. Every field has a default so a config
/// file only needs to name what differs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerConfig {
    /// SQLite database file the migrations run against.
    pub database: PathBuf,
    /// Directory of `<id>.up.sql` / `<id>.down.sql` files.
    pub migrations_dir: PathBuf,
    /// Ledger table name.
    pub table: String,
    pub mode: Mode,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            database: PathBuf::from("tidemark.db"),
            migrations_dir: PathBuf::from("migrations"),
            table: DEFAULT_TABLE.to_string(),
            mode: Mode::default(),
        }
    }
}

impl RunnerConfig {
    pub fn table_name(&self) -> Result<TableName> {
        TableName::new(self.table.as_str())
    }
}
