use std::sync::Arc;

use anyhow::anyhow;
use tidemark_common::{Direction, Error, Mode, Result};
use tidemark_db::{Ledger, TableName, with_transaction};
use tracing::{info, warn};

use crate::migration::{Migration, MigrationContext};
use crate::reconcile::{Reconciliation, reconcile, validate_sequence};

/// Receives human-readable progress lines.
pub type Logger = Arc<dyn Fn(&str) + Send + Sync>;

/// Drives a declared migration sequence against the ledger.
pub struct Runner<C> {
    migrations: Vec<Migration<C>>,
    table: TableName,
    mode: Mode,
    logger: Logger,
}

impl<C: MigrationContext> Runner<C> {
    pub fn new(migrations: Vec<Migration<C>>) -> Self {
        Self {
            migrations,
            table: TableName::default(),
            mode: Mode::default(),
            logger: Arc::new(|msg: &str| println!("{msg}")),
        }
    }

    pub fn with_table(mut self, table: TableName) -> Self {
        self.table = table;
        self
    }

    pub fn with_mode(mut self, mode: Mode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_logger<F>(mut self, logger: F) -> Self
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.logger = Arc::new(logger);
        self
    }

    pub fn migrations(&self) -> &[Migration<C>] {
        &self.migrations
    }

    pub fn table(&self) -> &TableName {
        &self.table
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// Acquire a context with `setup`, run, and hand the context to
    /// `teardown` on every path out of the run.
    ///
    /// A run error wins over a teardown error; the latter is then only logged.
    pub fn run_with<S, T>(&self, setup: S, teardown: T) -> Result<Vec<&Migration<C>>>
    where
        S: FnOnce() -> Result<C>,
        T: FnOnce(C) -> Result<()>,
    {
        scoped(setup, teardown, |ctx| self.run(ctx))
    }

    /// [`Runner::status`] with the same setup and teardown handling as
    /// [`Runner::run_with`].
    pub fn status_with<S, T>(&self, setup: S, teardown: T) -> Result<Reconciliation<'_, C>>
    where
        S: FnOnce() -> Result<C>,
        T: FnOnce(C) -> Result<()>,
    {
        scoped(setup, teardown, |ctx| self.status(ctx))
    }

    /// Ensure the ledger exists and reconcile it without running anything.
    pub fn status(&self, ctx: &C) -> Result<Reconciliation<'_, C>> {
        validate_sequence(&self.migrations)?;

        let ledger = Ledger::new(ctx.connection(), &self.table);
        ledger.ensure()?;
        reconcile(&self.migrations, ledger.entries()?)
    }

    /// Run the configured mode and return the migrations executed, in order.
    pub fn run(&self, ctx: &C) -> Result<Vec<&Migration<C>>> {
        let state = self.status(ctx)?;
        info!(
            mode = %self.mode,
            table = %self.table,
            applied = state.applied.len(),
            remaining = state.remaining.len(),
            "ledger reconciled"
        );

        let mut executed = Vec::new();
        match self.mode {
            Mode::Down => {
                let Some(last) = state.last_applied() else {
                    self.log("No applied migrations to undo.");
                    return Ok(executed);
                };
                self.step(last.migration, Direction::Down, ctx)?;
                executed.push(last.migration);
            }
            Mode::Up => {
                let Some(next) = state.remaining.first() else {
                    self.log("No migrations to apply.");
                    return Ok(executed);
                };
                self.step(next, Direction::Up, ctx)?;
                executed.push(next);
            }
            Mode::Latest => {
                if state.remaining.is_empty() {
                    self.log("No migrations to apply.");
                    return Ok(executed);
                }
                for migration in state.remaining {
                    self.step(migration, Direction::Up, ctx)?;
                    executed.push(migration);
                }
            }
        }
        Ok(executed)
    }

    /// Run one handler and its ledger change in a single transaction.
    fn step(&self, migration: &Migration<C>, direction: Direction, ctx: &C) -> Result<()> {
        let (pending, done) = match direction {
            Direction::Up => ("Applying", "Applied"),
            Direction::Down => ("Reverting", "Reverted"),
        };
        self.log(&format!("{pending} migration {}...", migration.label()));

        let conn = ctx.connection();
        let ledger = Ledger::new(conn, &self.table);
        let result = with_transaction(conn, || {
            let outcome = migration.handle(direction, ctx);
            // A body that ran COMMIT or ROLLBACK left its effects outside the
            // step; never pair them with a ledger change.
            let outcome = if conn.is_autocommit() {
                Err(match outcome {
                    Ok(()) => anyhow!("migration ended the surrounding transaction"),
                    Err(e) => e.context("migration ended the surrounding transaction"),
                })
            } else {
                outcome
            };
            outcome.map_err(|source| Error::Handler {
                id: migration.id().to_string(),
                direction,
                source,
            })?;
            match direction {
                Direction::Up => ledger.record_applied(migration.id()),
                Direction::Down => ledger.record_reverted(migration.id()),
            }
        });

        if let Err(e) = &result {
            warn!(migration = migration.id(), %direction, "migration rolled back: {e}");
            return result;
        }

        info!(migration = migration.id(), %direction, "migration committed");
        self.log(&format!("{done} migration {}.", migration.id()));
        Ok(())
    }

    fn log(&self, msg: &str) {
        (self.logger)(msg);
    }
}

fn scoped<C, R, S, T, W>(setup: S, teardown: T, work: W) -> Result<R>
where
    S: FnOnce() -> Result<C>,
    T: FnOnce(C) -> Result<()>,
    W: FnOnce(&C) -> Result<R>,
{
    let ctx = setup()?;
    let outcome = work(&ctx);
    let released = teardown(ctx);

    match (outcome, released) {
        (Ok(value), Ok(())) => Ok(value),
        (Ok(_), Err(e)) => Err(e),
        (Err(e), Ok(())) => Err(e),
        (Err(e), Err(teardown_err)) => {
            warn!("teardown failed after migration error: {teardown_err}");
            Err(e)
        }
    }
}
