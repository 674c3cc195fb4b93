use rusqlite::Connection;
use tidemark_common::{Error, Result};
use tracing::{debug, warn};

/// Run `work` inside a transaction on `conn`.
///
/// Commits when `work` succeeds. When it fails the transaction is rolled back
/// and the error from `work` is returned as is; a failed rollback is only
/// logged. `work` reaches the database through the same connection, so it
/// must not begin or end transactions itself. If it ends the transaction
/// anyway, a successful `work` is turned into a `Database` error.
pub fn with_transaction<T, F>(conn: &Connection, work: F) -> Result<T>
where
    F: FnOnce() -> Result<T>,
{
    let tx = conn
        .unchecked_transaction()
        .map_err(|e| Error::Database(format!("failed to begin transaction: {e}")))?;
    debug!("transaction started");

    let outcome = work();
    if conn.is_autocommit() {
        // COMMIT or ROLLBACK ran inside `work`; there is nothing left to finish.
        warn!("transaction ended before the wrapper could commit or roll back");
        drop(tx);
        return match outcome {
            Err(err) => Err(err),
            Ok(_) => Err(Error::Database(
                "transaction was ended before commit".to_string(),
            )),
        };
    }

    match outcome {
        Ok(value) => {
            tx.commit()
                .map_err(|e| Error::Database(format!("failed to commit transaction: {e}")))?;
            debug!("transaction committed");
            Ok(value)
        }
        Err(err) => {
            if let Err(e) = tx.rollback() {
                warn!("rollback failed after error ({err}): {e}");
            } else {
                debug!("transaction rolled back");
            }
            Err(err)
        }
    }
}
