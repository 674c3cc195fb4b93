use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use rusqlite::{Connection, params};
use serde::{Deserialize, Serialize};
use tidemark_common::{Error, Result};
use tracing::debug;

use crate::table::TableName;

/// A persisted ledger row: one applied migration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub id: String,
    pub sort: i64,
    pub timestamp: DateTime<Utc>,
}

/// The table recording which migrations have been applied, in order.
///
/// `Ledger` borrows the caller's connection; the write methods do not open
/// their own transaction and are meant to run inside the one wrapping the
/// migration handler.
pub struct Ledger<'a> {
    conn: &'a Connection,
    table: &'a TableName,
}

impl<'a> Ledger<'a> {
    pub fn new(conn: &'a Connection, table: &'a TableName) -> Self {
        Self { conn, table }
    }

    /// Create the ledger table if it does not exist yet.
    pub fn ensure(&self) -> Result<()> {
        let table = self.table;
        self.conn
            .execute_batch(&format!(
                "CREATE TABLE IF NOT EXISTS {table} (
                    sort INTEGER PRIMARY KEY AUTOINCREMENT,
                    id TEXT NOT NULL UNIQUE,
                    timestamp TEXT NOT NULL
                );"
            ))
            .map_err(|e| Error::Database(format!("failed to create ledger table {table}: {e}")))?;
        debug!("ledger table {table} ready");
        Ok(())
    }

    /// All ledger rows ordered by `sort` ascending.
    pub fn entries(&self) -> Result<Vec<LedgerEntry>> {
        let table = self.table;
        let mut stmt = self
            .conn
            .prepare(&format!(
                "SELECT id, sort, timestamp FROM {table} ORDER BY sort ASC"
            ))
            .map_err(|e| Error::Database(format!("failed to prepare ledger query: {e}")))?;

        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, String>(2)?,
                ))
            })
            .map_err(|e| Error::Database(format!("failed to query ledger: {e}")))?;

        let mut entries = Vec::new();
        for row in rows {
            let (id, sort, raw) =
                row.map_err(|e| Error::Database(format!("failed to read ledger row: {e}")))?;
            let timestamp = parse_timestamp(&raw).ok_or_else(|| {
                Error::Database(format!("ledger row {id} has malformed timestamp {raw:?}"))
            })?;
            entries.push(LedgerEntry {
                id,
                sort,
                timestamp,
            });
        }
        Ok(entries)
    }

    /// Record `id` as applied now, after every existing row. `sort` comes
    /// from SQLite's AUTOINCREMENT counter, so a number freed by a revert is
    /// never handed out again.
    pub fn record_applied(&self, id: &str) -> Result<()> {
        let table = self.table;
        let now = Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true);
        self.conn
            .execute(
                &format!(
                    "INSERT INTO {table} (id, timestamp) VALUES (?1, ?2)"
                ),
                params![id, now],
            )
            .map_err(|e| Error::LedgerWrite {
                id: id.to_string(),
                reason: e.to_string(),
            })?;
        Ok(())
    }

    /// Remove the row for `id`. A missing row is an error: the caller
    /// reconciled against a ledger that no longer holds it.
    pub fn record_reverted(&self, id: &str) -> Result<()> {
        let table = self.table;
        let deleted = self
            .conn
            .execute(&format!("DELETE FROM {table} WHERE id = ?1"), params![id])
            .map_err(|e| Error::LedgerWrite {
                id: id.to_string(),
                reason: e.to_string(),
            })?;
        if deleted == 0 {
            return Err(Error::LedgerWrite {
                id: id.to_string(),
                reason: format!("no row in {table}"),
            });
        }
        Ok(())
    }
}

fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
        .or_else(|| {
            // Rows written by hand with SQLite's datetime('now')
            NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
                .map(|naive| naive.and_utc())
                .ok()
        })
}
