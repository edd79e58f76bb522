//! Type-scoped listings over the id namespace
//!
//! Listings materialize the whole result in memory; record counts on a
//! single device are small enough that streaming is not needed yet.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::db::{Document, DocumentStore, RangeOptions};
use crate::error::{Error, Result};
use crate::models::{Record, RecordType};

/// Request for one page of a keyset-paginated listing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageRequest {
    /// Maximum records in the page (at least 1)
    pub limit: usize,
    /// Id of the last record of the previous page
    pub cursor: Option<String>,
}

impl PageRequest {
    /// First page of `limit` records
    pub const fn first(limit: usize) -> Self {
        Self {
            limit,
            cursor: None,
        }
    }

    /// Page of `limit` records following `cursor`
    pub fn after(limit: usize, cursor: impl Into<String>) -> Self {
        Self {
            limit,
            cursor: Some(cursor.into()),
        }
    }
}

/// One page of records
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page {
    pub items: Vec<Record>,
    /// Cursor for the following page; `None` once the listing is exhausted
    pub next_cursor: Option<String>,
}

impl Page {
    /// Request for the page after this one, if there may be one
    pub fn next_request(&self, limit: usize) -> Option<PageRequest> {
        self.next_cursor
            .as_ref()
            .map(|cursor| PageRequest::after(limit, cursor.clone()))
    }
}

/// Number of unsynced records per type
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnsyncedCounts {
    pub tasks: usize,
    pub reports: usize,
}

impl UnsyncedCounts {
    /// Sum over all types
    pub const fn total(&self) -> usize {
        self.tasks + self.reports
    }
}

/// Every record of `record_type`, ascending by id
pub async fn list_all(store: &DocumentStore, record_type: RecordType) -> Result<Vec<Record>> {
    let docs = store
        .range_scan(
            &record_type.range_start(),
            &record_type.range_end(),
            RangeOptions::default(),
        )
        .await?;
    into_records(docs)
}

/// One page of `record_type`, starting strictly after `request.cursor`.
///
/// Pages are anchored to the cursor value rather than an offset, so inserts
/// elsewhere in the namespace do not shift later pages.
pub async fn list_page(
    store: &DocumentStore,
    record_type: RecordType,
    request: &PageRequest,
) -> Result<Page> {
    if request.limit == 0 {
        return Err(Error::InvalidInput("page limit must be at least 1".to_string()));
    }
    let prefix = record_type.range_start();
    if let Some(cursor) = request.cursor.as_deref() {
        if !cursor.starts_with(&prefix) {
            return Err(Error::InvalidInput(format!(
                "cursor `{cursor}` is not a {record_type} id"
            )));
        }
    }

    let (start, fetch) = match &request.cursor {
        // The cursor row itself may come back first; fetch one extra to cover it.
        Some(cursor) => (cursor.clone(), request.limit.saturating_add(1)),
        None => (prefix, request.limit),
    };
    let docs = store
        .range_scan(
            &start,
            &record_type.range_end(),
            RangeOptions {
                limit: Some(fetch),
                skip: 0,
            },
        )
        .await?;

    let docs: Vec<Document> = docs
        .into_iter()
        .filter(|doc| request.cursor.as_deref() != Some(doc.id.as_str()))
        .take(request.limit)
        .collect();
    let items = into_records(docs)?;

    let next_cursor = if items.len() == request.limit {
        items.last().map(|record| record.id.to_string())
    } else {
        None
    };
    Ok(Page { items, next_cursor })
}

/// Unsynced record counts, read from the `synced` index
pub async fn count_unsynced(store: &DocumentStore) -> Result<UnsyncedCounts> {
    let docs = store.query_by_field("synced", &Value::Bool(false)).await?;

    let mut counts = UnsyncedCounts::default();
    for doc in &docs {
        match doc.doc_type().map(str::parse::<RecordType>) {
            Some(Ok(RecordType::Task)) => counts.tasks += 1,
            Some(Ok(RecordType::Report)) => counts.reports += 1,
            _ => tracing::debug!("Ignoring unsynced document {} of unknown type", doc.id),
        }
    }
    Ok(counts)
}

fn into_records(docs: Vec<Document>) -> Result<Vec<Record>> {
    docs.into_iter().map(Record::from_document).collect()
}
