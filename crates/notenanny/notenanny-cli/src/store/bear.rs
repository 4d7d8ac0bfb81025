use std::path::Path;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use notenanny_core::{Document, DocumentQuery, DocumentStore};
use rusqlite::types::Value;
use rusqlite::{Connection, OpenFlags, params_from_iter};
use tracing::trace;

/// Seconds between 1970-01-01 and 2001-01-01, the reference date Bear uses.
pub const CORE_DATA_EPOCH_OFFSET: f64 = 978_307_200.0;

// A stored date does not survive the f64 -> SystemTime -> f64 trip exactly.
const WATERMARK_SLACK_SECS: f64 = 1e-6;

const NOTE_QUERY: &str = "SELECT ZUNIQUEIDENTIFIER, ZTEXT, ZMODIFICATIONDATE FROM ZSFNOTE \
     WHERE ZTRASHED = 0 AND ZUNIQUEIDENTIFIER IS NOT NULL";

/// Read-only view of Bear's SQLite database.
pub struct BearStore {
    conn: Connection,
}

impl BearStore {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .with_context(|| format!("open Bear database {}", path.display()))?;
        Ok(Self::from_connection(conn))
    }

    pub fn from_connection(conn: Connection) -> Self {
        Self { conn }
    }
}

impl DocumentStore for BearStore {
    fn query(&mut self, query: &DocumentQuery) -> Result<Vec<Document>> {
        let mut sql = String::from(NOTE_QUERY);
        let mut params: Vec<Value> = Vec::new();
        if let Some(after) = query.modified_after {
            sql.push_str(" AND ZMODIFICATIONDATE > ?");
            params.push(Value::Real(to_core_data(after) + WATERMARK_SLACK_SECS));
        }
        if !query.contains_any.is_empty() {
            let clauses = vec!["ZTEXT LIKE ? ESCAPE '\\'"; query.contains_any.len()];
            sql.push_str(&format!(" AND ({})", clauses.join(" OR ")));
            params.extend(
                query
                    .contains_any
                    .iter()
                    .map(|needle| Value::Text(format!("%{}%", escape_like(needle)))),
            );
        }
        sql.push_str(" ORDER BY ZMODIFICATIONDATE");
        trace!(%sql, "querying Bear");

        let mut stmt = self.conn.prepare(&sql).context("prepare note query")?;
        let rows = stmt
            .query_map(params_from_iter(params), |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, Option<String>>(1)?,
                    row.get::<_, Option<f64>>(2)?,
                ))
            })
            .context("query notes")?;

        let mut docs = Vec::new();
        for row in rows {
            let (id, text, modified) = row.context("read note row")?;
            let doc = Document::from_text(
                id,
                text.as_deref().unwrap_or_default(),
                from_core_data(modified.unwrap_or_default()),
            );
            // LIKE is case-insensitive; the core filter is exact
            if query.matches(&doc) {
                docs.push(doc);
            }
        }
        Ok(docs)
    }
}

pub fn to_core_data(time: SystemTime) -> f64 {
    let unix = time
        .duration_since(UNIX_EPOCH)
        .map_or(0.0, |since| since.as_secs_f64());
    unix - CORE_DATA_EPOCH_OFFSET
}

pub fn from_core_data(secs: f64) -> SystemTime {
    let since_unix = Duration::try_from_secs_f64(secs + CORE_DATA_EPOCH_OFFSET).unwrap_or_default();
    UNIX_EPOCH + since_unix
}

fn escape_like(needle: &str) -> String {
    let mut escaped = String::with_capacity(needle.len());
    for ch in needle.chars() {
        if matches!(ch, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    escaped
}
