//! Reconcile a declared, ordered list of migrations against the ledger of
//! applied ones, then apply or revert the difference one transaction at a
//! time.
//!
//! ```no_run
//! use rusqlite::Connection;
//! use tidemark_migrate::{Migration, Mode, Runner};
//!
//! # fn main() -> tidemark_common::Result<()> {
//! let migrations = vec![
//!     Migration::sql(
//!         "2022-07-09-create-users",
//!         "CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT);",
//!         "DROP TABLE users;",
//!     )
//!     .with_description("Create users"),
//! ];
//!
//! let runner = Runner::new(migrations).with_mode(Mode::Latest);
//! let applied = runner.run_with(
//!     || Connection::open("app.db").map_err(|e| tidemark_common::Error::Database(e.to_string())),
//!     |conn| conn.close().map_err(|(_, e)| tidemark_common::Error::Database(e.to_string())),
//! )?;
//! println!("{} migrations applied", applied.len());
//! # Ok(())
//! # }
//! ```

pub mod migration;
pub mod reconcile;
pub mod runner;
pub mod source;

pub use migration::{Migration, MigrationContext, MigrationHandler};
pub use reconcile::{AppliedMigration, Reconciliation, reconcile, validate_sequence};
pub use runner::{Logger, Runner};
pub use source::SqlMigrationSource;
pub use tidemark_common::{Direction, Mode};
pub use tidemark_db::TableName;
