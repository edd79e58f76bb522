//! Revision-tracked JSON document storage
//!
//! Documents are keyed by id and carry a revision generation. Writes must
//! name the revision they were based on; the store rejects stale writes with
//! [`Error::Conflict`] instead of merging.

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Mutex};

use rusqlite::types::Value as SqlValue;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::Database;
use crate::error::{Error, Result};

/// Revision marker returned by every successful write
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Revision(u64);

impl Revision {
    /// Revision given to a newly inserted document
    pub const FIRST: Self = Self(1);

    /// Revision at a given generation
    pub const fn new(generation: u64) -> Self {
        Self(generation)
    }

    /// Generation counter
    pub const fn generation(self) -> u64 {
        self.0
    }

    /// Revision that follows this one
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }

    fn from_column(value: i64) -> Result<Self> {
        u64::try_from(value)
            .map(Self)
            .map_err(|_| Error::Database(format!("negative revision {value} in store")))
    }

    fn to_column(self) -> Result<i64> {
        i64::try_from(self.0)
            .map_err(|_| Error::Database(format!("revision {} out of range", self.0)))
    }
}

impl fmt::Display for Revision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Revision {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        s.parse::<u64>()
            .map(Self)
            .map_err(|_| Error::InvalidInput(format!("invalid revision `{s}`")))
    }
}

/// A stored JSON document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    /// Primary key
    pub id: String,
    /// Revision this copy was read at; `None` for documents never written
    pub rev: Option<Revision>,
    /// Document fields, excluding the id
    pub body: Map<String, Value>,
}

impl Document {
    /// Create an unsaved document
    pub fn new(id: impl Into<String>, body: Map<String, Value>) -> Self {
        Self {
            id: id.into(),
            rev: None,
            body,
        }
    }

    /// Value of a top-level field
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.body.get(name)
    }

    /// The `type` field, when it is a string
    pub fn doc_type(&self) -> Option<&str> {
        self.field("type").and_then(Value::as_str)
    }
}

/// Bounds for [`DocumentStore::range_scan`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RangeOptions {
    /// Maximum rows to return; `None` is unbounded
    pub limit: Option<usize>,
    /// Rows to skip from the start of the range
    pub skip: usize,
}

/// Result of one document within a [`DocumentStore::bulk_update`]
#[derive(Debug)]
pub struct BulkOutcome {
    /// Document id
    pub id: String,
    /// New revision, or why this document was not written
    pub result: Result<Revision>,
}

impl BulkOutcome {
    /// Whether the store accepted this document
    pub const fn is_ok(&self) -> bool {
        self.result.is_ok()
    }
}

/// Keyed document store over the `documents` table
#[derive(Debug, Clone)]
pub struct DocumentStore {
    db: Database,
    indexes: Arc<Mutex<HashSet<String>>>,
}

impl DocumentStore {
    /// Wrap an open database
    pub fn new(db: Database) -> Self {
        Self {
            db,
            indexes: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Underlying database handle
    pub const fn database(&self) -> &Database {
        &self.db
    }

    /// Insert or update a document by id.
    ///
    /// A new document must have `rev == None`; an existing one must carry
    /// the store's current revision.
    pub async fn put(&self, doc: Document) -> Result<Revision> {
        let id = doc.id.clone();
        self.db
            .call(move |conn| {
                let tx = conn.transaction()?;
                let rev = put_on(&tx, &doc)?;
                tx.commit()?;
                Ok(rev)
            })
            .await
            .inspect(|rev| tracing::debug!("Stored document {id} at revision {rev}"))
            .inspect_err(|error| tracing::warn!("Failed to store document {id}: {error}"))
    }

    /// Fetch a document by id
    pub async fn get(&self, id: &str) -> Result<Document> {
        let key = id.to_string();
        self.db
            .call(move |conn| get_on(conn, &key)?.ok_or(Error::NotFound(key)))
            .await
            .inspect_err(|error| tracing::debug!("Failed to fetch document {id}: {error}"))
    }

    /// Remove a document by id.
    ///
    /// Reads the current revision first so the removal is checked against it.
    pub async fn delete(&self, id: &str) -> Result<Revision> {
        let current = self.get(id).await?;
        let rev = current
            .rev
            .ok_or_else(|| Error::Database(format!("stored document {id} has no revision")))?;
        self.remove(id, rev).await?;
        tracing::debug!("Deleted document {id} at revision {rev}");
        Ok(rev)
    }

    /// Remove a document if it is still at `rev`
    pub async fn remove(&self, id: &str, rev: Revision) -> Result<()> {
        let key = id.to_string();
        self.db
            .call(move |conn| {
                let tx = conn.transaction()?;
                let removed = tx.execute(
                    "DELETE FROM documents WHERE id = ? AND rev = ?",
                    params![key, rev.to_column()?],
                )?;
                if removed == 0 {
                    return Err(match current_rev(&tx, &key)? {
                        Some(current) => Error::Conflict(format!(
                            "{key}: expected revision {rev}, store has {current}"
                        )),
                        None => Error::NotFound(key),
                    });
                }
                tx.commit()?;
                Ok(())
            })
            .await
            .inspect_err(|error| tracing::warn!("Failed to delete document {id}: {error}"))
    }

    /// Documents with `start <= id <= end`, ascending by id
    pub async fn range_scan(
        &self,
        start: &str,
        end: &str,
        options: RangeOptions,
    ) -> Result<Vec<Document>> {
        let start = start.to_string();
        let end = end.to_string();
        let limit = options
            .limit
            .map_or(-1, |limit| i64::try_from(limit).unwrap_or(i64::MAX));
        let skip = i64::try_from(options.skip).unwrap_or(i64::MAX);

        self.db
            .call(move |conn| {
                let mut stmt = conn.prepare_cached(
                    "SELECT id, rev, body FROM documents
                     WHERE id >= ?1 AND id <= ?2
                     ORDER BY id
                     LIMIT ?3 OFFSET ?4",
                )?;
                let rows = stmt
                    .query_map(params![start, end, limit, skip], read_row)?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                rows.into_iter().map(into_document).collect()
            })
            .await
            .inspect_err(|error| tracing::warn!("Range scan failed: {error}"))
    }

    /// Every document, ascending by id
    pub async fn all_documents(&self) -> Result<Vec<Document>> {
        self.db
            .call(|conn| {
                let mut stmt = conn.prepare_cached("SELECT id, rev, body FROM documents ORDER BY id")?;
                let rows = stmt
                    .query_map([], read_row)?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                rows.into_iter().map(into_document).collect()
            })
            .await
    }

    /// Declare a secondary index on a top-level field.
    ///
    /// Repeat calls are no-ops. Failure is logged and reported as `false`;
    /// queries on the field still work, just without the index.
    pub async fn ensure_index(&self, field: &str) -> bool {
        if self.index_declared(field) {
            return true;
        }

        let result = match validate_field(field) {
            Ok(()) => {
                let sql = format!(
                    "CREATE INDEX IF NOT EXISTS idx_documents_{field} \
                     ON documents (json_extract(body, '$.{field}'))"
                );
                self.db
                    .call(move |conn| {
                        conn.execute_batch(&sql)?;
                        Ok(())
                    })
                    .await
            }
            Err(error) => Err(error),
        };

        match result {
            Ok(()) => {
                if let Ok(mut indexes) = self.indexes.lock() {
                    indexes.insert(field.to_string());
                }
                tracing::debug!("Index on `{field}` ready");
                true
            }
            Err(error) => {
                let error = Error::IndexCreation {
                    field: field.to_string(),
                    message: error.to_string(),
                };
                tracing::warn!("{error}");
                false
            }
        }
    }

    fn index_declared(&self, field: &str) -> bool {
        self.indexes
            .lock()
            .map(|indexes| indexes.contains(field))
            .unwrap_or(false)
    }

    /// Documents whose top-level `field` equals `value`, ascending by id
    pub async fn query_by_field(&self, field: &str, value: &Value) -> Result<Vec<Document>> {
        validate_field(field)?;
        self.ensure_index(field).await;

        let bound = match value {
            Value::Null => None,
            other => Some(to_sql_value(other)?),
        };
        let sql = if bound.is_some() {
            format!(
                "SELECT id, rev, body FROM documents
                 WHERE json_extract(body, '$.{field}') = ?1 ORDER BY id"
            )
        } else {
            format!(
                "SELECT id, rev, body FROM documents
                 WHERE json_extract(body, '$.{field}') IS NULL ORDER BY id"
            )
        };

        self.db
            .call(move |conn| {
                let mut stmt = conn.prepare(&sql)?;
                let rows = stmt
                    .query_map(params_from_iter(bound), read_row)?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                rows.into_iter().map(into_document).collect()
            })
            .await
            .inspect_err(|error| tracing::warn!("Query on `{field}` failed: {error}"))
    }

    /// Apply several upserts in one call.
    ///
    /// Each document succeeds or fails on its own; a conflict on one does not
    /// roll back the others.
    pub async fn bulk_update(&self, docs: Vec<Document>) -> Result<Vec<BulkOutcome>> {
        let count = docs.len();
        let outcomes = self
            .db
            .call(move |conn| {
                let mut tx = conn.transaction()?;
                let mut outcomes = Vec::with_capacity(docs.len());
                for doc in docs {
                    let result = {
                        let savepoint = tx.savepoint()?;
                        let result = put_on(&savepoint, &doc);
                        if result.is_ok() {
                            savepoint.commit()?;
                        }
                        result
                    };
                    outcomes.push(BulkOutcome { id: doc.id, result });
                }
                tx.commit()?;
                Ok(outcomes)
            })
            .await
            .inspect_err(|error| tracing::error!("Bulk update of {count} documents failed: {error}"))?;

        for outcome in &outcomes {
            if let Err(error) = &outcome.result {
                tracing::warn!("Bulk update rejected {}: {error}", outcome.id);
            }
        }
        Ok(outcomes)
    }

    /// Store documents received from a replication peer.
    ///
    /// Each document keeps its own revision; a copy is only written when its
    /// revision is newer than the stored one. Returns how many were written.
    pub async fn write_replicated(&self, docs: Vec<Document>) -> Result<usize> {
        self.db
            .call(move |conn| {
                let tx = conn.transaction()?;
                let mut written = 0;
                for doc in &docs {
                    let Some(rev) = doc.rev else {
                        continue;
                    };
                    if current_rev(&tx, &doc.id)?.is_some_and(|current| current >= rev) {
                        continue;
                    }
                    tx.execute(
                        "INSERT OR REPLACE INTO documents (id, rev, body) VALUES (?, ?, ?)",
                        params![doc.id, rev.to_column()?, serde_json::to_string(&doc.body)?],
                    )?;
                    written += 1;
                }
                tx.commit()?;
                Ok(written)
            })
            .await
            .inspect_err(|error| tracing::warn!("Replicated write failed: {error}"))
    }
}

fn validate_field(field: &str) -> Result<()> {
    if !field.is_empty()
        && field
            .chars()
            .all(|ch| ch.is_ascii_alphanumeric() || ch == '_')
    {
        Ok(())
    } else {
        Err(Error::InvalidInput(format!(
            "field name `{field}` must be non-empty ASCII letters, digits, or underscores"
        )))
    }
}

fn to_sql_value(value: &Value) -> Result<SqlValue> {
    match value {
        Value::Bool(flag) => Ok(SqlValue::Integer(i64::from(*flag))),
        Value::Number(number) => number
            .as_i64()
            .map(SqlValue::Integer)
            .or_else(|| number.as_f64().map(SqlValue::Real))
            .ok_or_else(|| Error::InvalidInput(format!("unsupported number {number}"))),
        Value::String(text) => Ok(SqlValue::Text(text.clone())),
        Value::Null => Ok(SqlValue::Null),
        Value::Array(_) | Value::Object(_) => Err(Error::InvalidInput(
            "only scalar values can be queried".to_string(),
        )),
    }
}

fn current_rev(conn: &Connection, id: &str) -> Result<Option<Revision>> {
    conn.query_row(
        "SELECT rev FROM documents WHERE id = ?",
        params![id],
        |row| row.get::<_, i64>(0),
    )
    .optional()?
    .map(Revision::from_column)
    .transpose()
}

fn put_on(conn: &Connection, doc: &Document) -> Result<Revision> {
    if doc.id.is_empty() {
        return Err(Error::InvalidInput("document id must not be empty".to_string()));
    }
    let body = serde_json::to_string(&doc.body)?;

    match (current_rev(conn, &doc.id)?, doc.rev) {
        (None, None) => {
            conn.execute(
                "INSERT INTO documents (id, rev, body) VALUES (?, ?, ?)",
                params![doc.id, Revision::FIRST.to_column()?, body],
            )?;
            Ok(Revision::FIRST)
        }
        (Some(current), Some(expected)) if current == expected => {
            let next = current.next();
            conn.execute(
                "UPDATE documents SET rev = ?, body = ? WHERE id = ?",
                params![next.to_column()?, body, doc.id],
            )?;
            Ok(next)
        }
        (Some(current), Some(expected)) => Err(Error::Conflict(format!(
            "{}: expected revision {expected}, store has {current}",
            doc.id
        ))),
        (Some(current), None) => Err(Error::Conflict(format!(
            "{}: document already exists at revision {current}",
            doc.id
        ))),
        (None, Some(expected)) => Err(Error::Conflict(format!(
            "{}: revision {expected} given for a document that does not exist",
            doc.id
        ))),
    }
}

fn get_on(conn: &Connection, id: &str) -> Result<Option<Document>> {
    conn.query_row(
        "SELECT id, rev, body FROM documents WHERE id = ?",
        params![id],
        read_row,
    )
    .optional()?
    .map(into_document)
    .transpose()
}

fn read_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<(String, i64, String)> {
    Ok((row.get(0)?, row.get(1)?, row.get(2)?))
}

fn into_document((id, rev, body): (String, i64, String)) -> Result<Document> {
    Ok(Document {
        id,
        rev: Some(Revision::from_column(rev)?),
        body: serde_json::from_str(&body)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    async fn setup() -> DocumentStore {
        DocumentStore::new(Database::open_in_memory().await.unwrap())
    }

    fn doc(id: &str, body: Value) -> Document {
        let Value::Object(body) = body else {
            panic!("test bodies must be objects");
        };
        Document::new(id, body)
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_put_and_get() {
        let store = setup().await;

        let rev = store
            .put(doc("task:a", json!({"type": "task", "title": "Pour slab"})))
            .await
            .unwrap();
        assert_eq!(rev, Revision::FIRST);

        let fetched = store.get("task:a").await.unwrap();
        assert_eq!(fetched.rev, Some(Revision::FIRST));
        assert_eq!(fetched.doc_type(), Some("task"));
        assert_eq!(fetched.field("title"), Some(&json!("Pour slab")));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_update_requires_current_revision() {
        let store = setup().await;
        store.put(doc("task:a", json!({"n": 1}))).await.unwrap();

        let mut current = store.get("task:a").await.unwrap();
        current.body.insert("n".into(), json!(2));
        let rev = store.put(current.clone()).await.unwrap();
        assert_eq!(rev.generation(), 2);

        // same base revision again is now stale
        let stale = store.put(current).await.unwrap_err();
        assert!(stale.is_conflict());

        let blind = store.put(doc("task:a", json!({"n": 3}))).await.unwrap_err();
        assert!(blind.is_conflict());

        assert_eq!(store.get("task:a").await.unwrap().field("n"), Some(&json!(2)));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_put_with_revision_for_absent_document_conflicts() {
        let store = setup().await;
        let mut orphan = doc("task:ghost", json!({}));
        orphan.rev = Some(Revision::FIRST);

        assert!(store.put(orphan).await.unwrap_err().is_conflict());
        assert!(store.get("task:ghost").await.unwrap_err().is_not_found());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_delete_then_get_is_not_found() {
        let store = setup().await;
        store.put(doc("report:a", json!({}))).await.unwrap();

        assert_eq!(store.delete("report:a").await.unwrap(), Revision::FIRST);
        assert!(store.get("report:a").await.unwrap_err().is_not_found());
        assert!(store.delete("report:a").await.unwrap_err().is_not_found());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_remove_with_stale_revision_conflicts() {
        let store = setup().await;
        store.put(doc("report:a", json!({}))).await.unwrap();
        let current = store.get("report:a").await.unwrap();
        store.put(current).await.unwrap();

        let error = store.remove("report:a", Revision::FIRST).await.unwrap_err();
        assert!(error.is_conflict());
        assert!(store.get("report:a").await.is_ok());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_range_scan_bounds_limit_and_skip() {
        let store = setup().await;
        for id in ["report:1", "task:1", "task:2", "task:3", "zone:1"] {
            store.put(doc(id, json!({}))).await.unwrap();
        }

        let ids = |docs: Vec<Document>| docs.into_iter().map(|d| d.id).collect::<Vec<_>>();

        let all = store
            .range_scan("task:", "task:\u{FFFF}", RangeOptions::default())
            .await
            .unwrap();
        assert_eq!(ids(all), vec!["task:1", "task:2", "task:3"]);

        let page = store
            .range_scan(
                "task:",
                "task:\u{FFFF}",
                RangeOptions {
                    limit: Some(1),
                    skip: 1,
                },
            )
            .await
            .unwrap();
        assert_eq!(ids(page), vec!["task:2"]);

        // bounds are inclusive
        let exact = store
            .range_scan("task:1", "task:2", RangeOptions::default())
            .await
            .unwrap();
        assert_eq!(ids(exact), vec!["task:1", "task:2"]);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_ensure_index_is_idempotent() {
        let store = setup().await;
        assert!(store.ensure_index("synced").await);
        assert!(store.ensure_index("synced").await);

        let count: i64 = store
            .database()
            .call(|conn| {
                Ok(conn.query_row(
                    "SELECT COUNT(*) FROM sqlite_master WHERE type = 'index' AND name = 'idx_documents_synced'",
                    [],
                    |row| row.get(0),
                )?)
            })
            .await
            .unwrap();
        assert_eq!(count, 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_ensure_index_failure_is_not_fatal() {
        let store = setup().await;
        assert!(!store.ensure_index("bad field; DROP TABLE documents").await);
        store.put(doc("task:a", json!({}))).await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_query_by_field() {
        let store = setup().await;
        store
            .put(doc("task:1", json!({"type": "task", "synced": false})))
            .await
            .unwrap();
        store
            .put(doc("task:2", json!({"type": "task", "synced": true})))
            .await
            .unwrap();
        store
            .put(doc("report:1", json!({"type": "report", "synced": false, "dueDate": null})))
            .await
            .unwrap();

        let unsynced = store.query_by_field("synced", &json!(false)).await.unwrap();
        let ids: Vec<_> = unsynced.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, vec!["report:1", "task:1"]);

        let tasks = store.query_by_field("type", &json!("task")).await.unwrap();
        assert_eq!(tasks.len(), 2);

        let no_due_date = store.query_by_field("dueDate", &Value::Null).await.unwrap();
        assert_eq!(no_due_date.len(), 3);

        assert!(store
            .query_by_field("type", &json!(["task"]))
            .await
            .is_err());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_bulk_update_reports_per_document_outcomes() {
        let store = setup().await;
        store.put(doc("task:1", json!({"synced": false}))).await.unwrap();
        store.put(doc("task:2", json!({"synced": false}))).await.unwrap();

        let mut first = store.get("task:1").await.unwrap();
        first.body.insert("synced".into(), json!(true));
        let mut stale = store.get("task:2").await.unwrap();
        stale.rev = Some(Revision(7));
        stale.body.insert("synced".into(), json!(true));

        let outcomes = store.bulk_update(vec![first, stale]).await.unwrap();
        assert_eq!(outcomes.len(), 2);
        assert!(outcomes[0].is_ok());
        assert!(outcomes[1].result.as_ref().unwrap_err().is_conflict());

        assert_eq!(store.get("task:1").await.unwrap().field("synced"), Some(&json!(true)));
        assert_eq!(store.get("task:2").await.unwrap().field("synced"), Some(&json!(false)));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_write_replicated_keeps_newer_revision() {
        let store = setup().await;
        store.put(doc("task:1", json!({"v": "local"}))).await.unwrap();
        let local = store.get("task:1").await.unwrap();
        store.put(local).await.unwrap(); // now at revision 2

        let mut older = doc("task:1", json!({"v": "older"}));
        older.rev = Some(Revision(1));
        let mut newer = doc("task:2", json!({"v": "remote"}));
        newer.rev = Some(Revision(5));
        let unversioned = doc("task:3", json!({}));

        let written = store
            .write_replicated(vec![older, newer, unversioned])
            .await
            .unwrap();
        assert_eq!(written, 1);
        assert_eq!(store.get("task:1").await.unwrap().field("v"), Some(&json!("local")));
        assert_eq!(store.get("task:2").await.unwrap().rev, Some(Revision(5)));
        assert!(store.get("task:3").await.is_err());
    }
}
