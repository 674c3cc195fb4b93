use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use tidemark_common::{Error, Result};
use tracing::debug;

use crate::migration::{Migration, MigrationContext};

const UP_SUFFIX: &str = ".up.sql";
const DOWN_SUFFIX: &str = ".down.sql";

/// Hand-written SQL migrations stored as `<id>.up.sql` / `<id>.down.sql`
/// pairs in one directory. Ids sort bytewise, so a sortable prefix such as a
/// date (`2022-07-09-create-users`) fixes the order.
///
/// A leading `-- ` comment line in the up file becomes the description.
pub struct SqlMigrationSource {
    dir: PathBuf,
}

#[derive(Default)]
struct Pair {
    up: Option<String>,
    down: Option<String>,
}

impl SqlMigrationSource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn load<C: MigrationContext + 'static>(&self) -> Result<Vec<Migration<C>>> {
        let mut pairs: BTreeMap<String, Pair> = BTreeMap::new();

        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if !path.is_file() {
                continue;
            }
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };

            if let Some(id) = name.strip_suffix(UP_SUFFIX) {
                pairs.entry(id.to_string()).or_default().up = Some(fs::read_to_string(&path)?);
            } else if let Some(id) = name.strip_suffix(DOWN_SUFFIX) {
                pairs.entry(id.to_string()).or_default().down = Some(fs::read_to_string(&path)?);
            } else if name.ends_with(".sql") {
                return Err(Error::InvalidMigrations(format!(
                    "{} is neither an up nor a down migration",
                    path.display()
                )));
            }
        }

        let mut migrations = Vec::with_capacity(pairs.len());
        for (id, pair) in pairs {
            let (up, down) = match (pair.up, pair.down) {
                (Some(up), Some(down)) => (up, down),
                (None, _) => {
                    return Err(Error::InvalidMigrations(format!(
                        "migration {id} has no {id}{UP_SUFFIX}"
                    )));
                }
                (_, None) => {
                    return Err(Error::InvalidMigrations(format!(
                        "migration {id} has no {id}{DOWN_SUFFIX}"
                    )));
                }
            };
            if id.is_empty() {
                return Err(Error::InvalidMigrations(format!(
                    "unnamed migration in {}",
                    self.dir.display()
                )));
            }

            let description = leading_comment(&up);
            let mut migration = Migration::sql(id, up, down);
            if let Some(description) = description {
                migration = migration.with_description(description);
            }
            migrations.push(migration);
        }

        debug!(
            "loaded {} sql migrations from {}",
            migrations.len(),
            self.dir.display()
        );
        Ok(migrations)
    }
}

fn leading_comment(sql: &str) -> Option<String> {
    let first = sql.lines().next()?.trim();
    let text = first.strip_prefix("--")?.trim();
    (!text.is_empty()).then(|| text.to_string())
}
