use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use tidemark_db::TableName;
use tidemark_migrate::Reconciliation;

/// What `tidemark status` prints: the ledger matched against the migration
/// directory.
#[derive(Debug, Serialize)]
pub struct StatusReport {
    pub table: String,
    pub applied: Vec<AppliedRow>,
    pub pending: Vec<PendingRow>,
}

#[derive(Debug, Serialize)]
pub struct AppliedRow {
    pub id: String,
    pub sort: i64,
    pub applied_at: DateTime<Utc>,
    pub description: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct PendingRow {
    pub id: String,
    pub description: Option<String>,
}

impl StatusReport {
    pub fn new<C>(table: &TableName, state: &Reconciliation<'_, C>) -> Self {
        Self {
            table: table.to_string(),
            applied: state
                .applied
                .iter()
                .map(|a| AppliedRow {
                    id: a.entry.id.clone(),
                    sort: a.entry.sort,
                    applied_at: a.entry.timestamp,
                    description: a.migration.description().map(str::to_string),
                })
                .collect(),
            pending: state
                .remaining
                .iter()
                .map(|m| PendingRow {
                    id: m.id().to_string(),
                    description: m.description().map(str::to_string),
                })
                .collect(),
        }
    }

    /// Boxed plain-text rendering, one `String` per output line.
    pub fn render(&self) -> Vec<String> {
        let mut body = Vec::with_capacity(self.applied.len() + self.pending.len() + 2);
        for row in &self.applied {
            body.push(format!(
                "[x] {}  {}",
                row.applied_at.to_rfc3339_opts(SecondsFormat::Secs, true),
                label(&row.id, row.description.as_deref())
            ));
        }
        for row in &self.pending {
            body.push(format!(
                "[ ] {:<20}  {}",
                "pending",
                label(&row.id, row.description.as_deref())
            ));
        }
        if !body.is_empty() {
            body.push(String::new());
        }
        body.push(format!(
            "{} applied, {} pending",
            self.applied.len(),
            self.pending.len()
        ));

        let title = format!("tidemark · {}", self.table);
        let inner = body
            .iter()
            .map(|l| l.chars().count())
            .chain(std::iter::once(title.chars().count() + 4))
            .max()
            .unwrap_or(0);

        let mut lines = Vec::with_capacity(body.len() + 2);
        let title_dashes = inner + 2 - title.chars().count() - 5;
        lines.push(format!("╭─── {title} {}╮", "─".repeat(title_dashes)));
        for l in &body {
            lines.push(format!("│ {l:<inner$} │"));
        }
        lines.push(format!("╰{}╯", "─".repeat(inner + 2)));
        lines
    }
}

fn label(id: &str, description: Option<&str>) -> String {
    match description {
        Some(d) => format!("{id} ({d})"),
        None => id.to_string(),
    }
}
