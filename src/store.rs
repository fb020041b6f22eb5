use std::cmp::Ordering;
use std::path::Path;
use std::sync::atomic::{AtomicI64, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::params;
use serde_json::{Map, Value};
use time::OffsetDateTime;
use uuid::Uuid;

pub const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS documents (
  collection TEXT NOT NULL,
  id TEXT NOT NULL,
  body TEXT NOT NULL,
  created_at INTEGER NOT NULL,
  updated_at INTEGER NOT NULL,
  PRIMARY KEY (collection, id)
);

CREATE INDEX IF NOT EXISTS documents_by_collection ON documents(collection, updated_at);
"#;

/// Filter over documents in a collection. `_id`, `created_at` and
/// `updated_at` refer to the stamped fields.
#[derive(Debug, Clone)]
pub enum Filter {
    /// Matches every document.
    All,
    /// Field equals value.
    Eq(String, Value),
    /// Array field contains the value.
    Contains(String, Value),
    /// Array field contains every listed value.
    ContainsAll(String, Vec<Value>),
    /// Case-insensitive substring match against any of the named string fields.
    AnyLike(Vec<String>, String),
    /// Every sub-filter matches.
    And(Vec<Filter>),
}

impl Filter {
    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::Eq(field.into(), value.into())
    }

    pub fn contains(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::Contains(field.into(), value.into())
    }

    pub fn contains_all(field: impl Into<String>, values: Vec<Value>) -> Self {
        Filter::ContainsAll(field.into(), values)
    }

    pub fn any_like(fields: &[&str], needle: impl Into<String>) -> Self {
        Filter::AnyLike(
            fields.iter().map(|f| (*f).to_owned()).collect(),
            needle.into(),
        )
    }

    pub fn and(filters: Vec<Filter>) -> Self {
        Filter::And(filters)
    }

    pub fn matches(&self, doc: &Value) -> bool {
        match self {
            Filter::All => true,
            Filter::Eq(field, value) => doc.get(field) == Some(value),
            Filter::Contains(field, value) => doc
                .get(field)
                .and_then(Value::as_array)
                .map_or(false, |arr| arr.contains(value)),
            Filter::ContainsAll(field, values) => doc
                .get(field)
                .and_then(Value::as_array)
                .map_or(false, |arr| values.iter().all(|v| arr.contains(v))),
            Filter::AnyLike(fields, needle) => {
                let needle = needle.to_lowercase();
                fields.iter().any(|f| {
                    doc.get(f)
                        .and_then(Value::as_str)
                        .map_or(false, |s| s.to_lowercase().contains(&needle))
                })
            }
            Filter::And(filters) => filters.iter().all(|f| f.matches(doc)),
        }
    }
}

/// Sort order for `find`. Ties fall back to insertion order, reversed for
/// descending sorts so that "most recent N" picks the later insert.
#[derive(Debug, Clone)]
pub struct Sort {
    field: String,
    descending: bool,
}

impl Sort {
    pub fn asc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            descending: false,
        }
    }

    pub fn desc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            descending: true,
        }
    }
}

/// Document store over SQLite: JSON bodies grouped by collection name.
///
/// Generated ids and creation/update timestamps are stamped by the store and
/// injected into every returned document as `_id`, `created_at` and
/// `updated_at`. Stamps are unix milliseconds, monotonic per store, so
/// writes within the same millisecond still order by write sequence.
#[derive(Clone)]
pub struct Store {
    pool: Pool<SqliteConnectionManager>,
    clock: Arc<AtomicI64>,
}

impl Store {
    /// Open or create the database file at `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::build(SqliteConnectionManager::file(path), None)
    }

    /// In-memory store for tests. Pinned to a single pooled connection:
    /// every pooled connection would otherwise get its own private database.
    pub fn in_memory() -> Result<Self> {
        Self::build(SqliteConnectionManager::memory(), Some(1))
    }

    fn build(manager: SqliteConnectionManager, max_size: Option<u32>) -> Result<Self> {
        let manager = manager.with_init(|conn| conn.busy_timeout(Duration::from_secs(5)));
        let mut builder = Pool::builder();
        if let Some(n) = max_size {
            builder = builder.max_size(n);
        }
        let pool = builder.build(manager)?;
        pool.get()?.execute_batch(SCHEMA)?;
        Ok(Self {
            pool,
            clock: Arc::new(AtomicI64::new(0)),
        })
    }

    fn stamp(&self) -> i64 {
        let now = (OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000) as i64;
        let prev = self
            .clock
            .fetch_update(AtomicOrdering::SeqCst, AtomicOrdering::SeqCst, |last| {
                Some(last.max(now - 1) + 1)
            })
            .unwrap_or(now - 1);
        prev.max(now - 1) + 1
    }

    /// Insert a document, stamping id and timestamps. Returns the new id.
    pub fn create(&self, collection: &str, mut doc: Map<String, Value>) -> Result<String> {
        let id = Uuid::new_v4().to_string();
        let now = self.stamp();
        doc.remove("_id");
        doc.remove("created_at");
        doc.remove("updated_at");
        let conn = self.pool.get()?;
        conn.execute(
            "INSERT INTO documents (collection, id, body, created_at, updated_at) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![collection, id, Value::Object(doc).to_string(), now, now],
        )?;
        Ok(id)
    }

    /// Fetch documents matching `filter`, optionally sorted and limited.
    pub fn find(
        &self,
        collection: &str,
        filter: &Filter,
        sort: Option<Sort>,
        limit: Option<usize>,
    ) -> Result<Vec<Value>> {
        let mut docs: Vec<Value> = self
            .load(collection)?
            .into_iter()
            .filter(|d| filter.matches(d))
            .collect();
        if let Some(sort) = sort {
            let mut keyed: Vec<(usize, Value)> = docs.into_iter().enumerate().collect();
            keyed.sort_by(|(ia, a), (ib, b)| {
                let ord = compare_fields(a.get(&sort.field), b.get(&sort.field)).then(ia.cmp(ib));
                if sort.descending {
                    ord.reverse()
                } else {
                    ord
                }
            });
            docs = keyed.into_iter().map(|(_, d)| d).collect();
        }
        if let Some(limit) = limit {
            docs.truncate(limit);
        }
        Ok(docs)
    }

    /// Fetch the first document matching `filter`, in insertion order.
    pub fn find_one(&self, collection: &str, filter: &Filter) -> Result<Option<Value>> {
        Ok(self.find(collection, filter, None, Some(1))?.pop())
    }

    /// Merge `patch` into every matching document and re-stamp `updated_at`.
    /// An empty patch still bumps the timestamp. Returns the modified count.
    pub fn update(
        &self,
        collection: &str,
        filter: &Filter,
        patch: Map<String, Value>,
    ) -> Result<usize> {
        let matches = self.find(collection, filter, None, None)?;
        let now = self.stamp();
        let conn = self.pool.get()?;
        let mut stmt = conn.prepare(
            "UPDATE documents SET body = ?3, updated_at = ?4 WHERE collection = ?1 AND id = ?2",
        )?;
        let mut modified = 0;
        for doc in matches {
            let Value::Object(mut doc) = doc else { continue };
            let id = match doc.remove("_id") {
                Some(Value::String(id)) => id,
                _ => continue,
            };
            doc.remove("created_at");
            doc.remove("updated_at");
            for (k, v) in &patch {
                if k == "_id" || k == "created_at" || k == "updated_at" {
                    continue;
                }
                doc.insert(k.clone(), v.clone());
            }
            modified += stmt.execute(params![collection, id, Value::Object(doc).to_string(), now])?;
        }
        Ok(modified)
    }

    /// Delete every matching document. Returns the deleted count.
    pub fn delete(&self, collection: &str, filter: &Filter) -> Result<usize> {
        let matches = self.find(collection, filter, None, None)?;
        let conn = self.pool.get()?;
        let mut stmt = conn.prepare("DELETE FROM documents WHERE collection = ?1 AND id = ?2")?;
        let mut deleted = 0;
        for doc in matches {
            if let Some(id) = doc.get("_id").and_then(Value::as_str) {
                deleted += stmt.execute(params![collection, id])?;
            }
        }
        Ok(deleted)
    }

    fn load(&self, collection: &str) -> Result<Vec<Value>> {
        let conn = self.pool.get()?;
        let mut stmt = conn.prepare(
            "SELECT id, body, created_at, updated_at FROM documents WHERE collection = ?1 ORDER BY rowid",
        )?;
        let rows = stmt.query_map([collection], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, i64>(2)?,
                row.get::<_, i64>(3)?,
            ))
        })?;
        let mut docs = Vec::new();
        for row in rows {
            let (id, body, created_at, updated_at) = row?;
            let mut doc: Map<String, Value> = serde_json::from_str(&body)?;
            doc.insert("_id".into(), Value::String(id));
            doc.insert("created_at".into(), Value::from(created_at));
            doc.insert("updated_at".into(), Value::from(updated_at));
            docs.push(Value::Object(doc));
        }
        Ok(docs)
    }
}

fn compare_fields(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (Some(Value::Number(x)), Some(Value::Number(y))) => x
            .as_f64()
            .partial_cmp(&y.as_f64())
            .unwrap_or(Ordering::Equal),
        (Some(Value::String(x)), Some(Value::String(y))) => x.cmp(y),
        (Some(Value::Bool(x)), Some(Value::Bool(y))) => x.cmp(y),
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        _ => Ordering::Equal,
    }
}
