use std::fmt;
use std::sync::Arc;

use rusqlite::Connection;
use tidemark_common::Direction;

/// What a run hands to migration handlers. At minimum it exposes the
/// connection the runner opens its transactions on; callers extend it with
/// whatever else their migrations need.
pub trait MigrationContext {
    fn connection(&self) -> &Connection;
}

impl MigrationContext for Connection {
    fn connection(&self) -> &Connection {
        self
    }
}

/// Forward or reverse body of a migration.
pub type MigrationHandler<C> = Arc<dyn Fn(&C) -> anyhow::Result<()> + Send + Sync>;

/// One step of the declared migration sequence.
///
/// The `id` doubles as the ledger key and must be unique in the sequence.
pub struct Migration<C> {
    id: String,
    description: Option<String>,
    up: MigrationHandler<C>,
    down: MigrationHandler<C>,
}

impl<C> Migration<C> {
    pub fn new<U, D>(id: impl Into<String>, up: U, down: D) -> Self
    where
        U: Fn(&C) -> anyhow::Result<()> + Send + Sync + 'static,
        D: Fn(&C) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        Self {
            id: id.into(),
            description: None,
            up: Arc::new(up),
            down: Arc::new(down),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    /// `id` followed by the description in parentheses, if there is one.
    pub fn label(&self) -> String {
        match &self.description {
            Some(description) => format!("{} ({description})", self.id),
            None => self.id.clone(),
        }
    }

    pub(crate) fn handle(&self, direction: Direction, ctx: &C) -> anyhow::Result<()> {
        match direction {
            Direction::Up => (self.up)(ctx),
            Direction::Down => (self.down)(ctx),
        }
    }
}

impl<C: MigrationContext + 'static> Migration<C> {
    /// A migration whose bodies are SQL batches run on the context's connection.
    pub fn sql(id: impl Into<String>, up: impl Into<String>, down: impl Into<String>) -> Self {
        let up = up.into();
        let down = down.into();
        Self::new(
            id,
            move |ctx: &C| Ok(ctx.connection().execute_batch(&up)?),
            move |ctx: &C| Ok(ctx.connection().execute_batch(&down)?),
        )
    }
}

impl<C> Clone for Migration<C> {
    fn clone(&self) -> Self {
        Self {
            id: self.id.clone(),
            description: self.description.clone(),
            up: Arc::clone(&self.up),
            down: Arc::clone(&self.down),
        }
    }
}

impl<C> fmt::Debug for Migration<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Migration")
            .field("id", &self.id)
            .field("description", &self.description)
            .finish_non_exhaustive()
    }
}
