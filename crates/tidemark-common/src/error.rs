use chrono::{DateTime, SecondsFormat, Utc};
use thiserror::Error;

use crate::types::Direction;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("database error: {0}")]
    Database(String),

    #[error("diverged ledger: {0}")]
    DivergedLedger(#[from] Divergence),

    #[error("migration {id} failed while migrating {direction}: {source}")]
    Handler {
        id: String,
        direction: Direction,
        #[source]
        source: anyhow::Error,
    },

    #[error("failed to update ledger for migration {id}: {reason}")]
    LedgerWrite { id: String, reason: String },

    #[error("invalid migrations: {0}")]
    InvalidMigrations(String),

    #[error("invalid table name: {0}")]
    InvalidTableName(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Ways the persisted ledger can disagree with the declared migrations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Divergence {
    /// The ledger holds more rows than there are declared migrations.
    #[error("applied migration {id} (index {index}, timestamp {}) not found in migrations", rfc3339(.applied_at))]
    Unknown {
        index: usize,
        id: String,
        applied_at: DateTime<Utc>,
    },

    /// The ledger row at `index` names a different migration than the one declared there.
    #[error("applied migration {actual} (index {index}, timestamp {}) does not match migration {expected}", rfc3339(.applied_at))]
    Mismatch {
        index: usize,
        expected: String,
        actual: String,
        applied_at: DateTime<Utc>,
    },
}

fn rfc3339(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}
