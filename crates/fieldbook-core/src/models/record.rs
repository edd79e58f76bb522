//! Task and report records
//!
//! A record is stored as a JSON document whose `type` field and id prefix
//! agree. Field names are camelCase, matching what the web client writes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::id::{RecordId, RecordType};
use crate::db::{Document, Revision};
use crate::error::{Error, Result};
use crate::util::{next_timestamp, normalize_text_option};

/// Default status of a new task
pub const TASK_DEFAULT_STATUS: &str = "open";
/// Default status of a new report
pub const REPORT_DEFAULT_STATUS: &str = "draft";

/// Report urgency
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
    Urgent,
}

/// Fields specific to a task
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskFields {
    pub title: String,
    pub date: String,
    pub description: String,
    pub assigned_to: Option<String>,
}

/// Fields specific to a report
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportFields {
    pub title: String,
    pub description: String,
    /// inspection, progress, safety, ...
    pub report_type: String,
    pub location: String,
    pub assigned_to: Option<String>,
    #[serde(default)]
    pub priority: Priority,
    pub due_date: Option<String>,
    pub materials: Option<String>,
    pub findings: Option<String>,
    pub recommendations: Option<String>,
}

/// Type-specific part of a record, tagged by `type`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum RecordFields {
    Task(TaskFields),
    Report(ReportFields),
}

impl RecordFields {
    /// Which record type these fields belong to
    pub const fn record_type(&self) -> RecordType {
        match self {
            Self::Task(_) => RecordType::Task,
            Self::Report(_) => RecordType::Report,
        }
    }
}

/// A task or report as stored locally
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Record {
    /// `"<type>:<uuid>"`, assigned at creation
    pub id: RecordId,
    /// Revision this copy was read at; `None` until first stored
    #[serde(skip)]
    pub rev: Option<Revision>,
    /// Workflow status; defaults depend on the type
    pub status: String,
    /// Whether replication has confirmed this record; never reverts
    pub synced: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Display name of the creator at creation time
    pub created_by: String,
    #[serde(flatten)]
    pub fields: RecordFields,
}

impl Record {
    /// Record type, as encoded in both the id and `type` field
    pub const fn record_type(&self) -> RecordType {
        self.fields.record_type()
    }

    /// Task fields, if this is a task
    pub const fn as_task(&self) -> Option<&TaskFields> {
        match &self.fields {
            RecordFields::Task(task) => Some(task),
            RecordFields::Report(_) => None,
        }
    }

    /// Report fields, if this is a report
    pub const fn as_report(&self) -> Option<&ReportFields> {
        match &self.fields {
            RecordFields::Report(report) => Some(report),
            RecordFields::Task(_) => None,
        }
    }

    /// Refresh `updatedAt` for a mutation
    pub fn touch(&mut self) {
        self.updated_at = next_timestamp(self.updated_at);
    }

    /// Flag the record as confirmed by the remote peer.
    ///
    /// Returns `false` (and changes nothing) if it was already synced.
    pub fn mark_synced(&mut self) -> bool {
        if self.synced {
            return false;
        }
        self.synced = true;
        self.touch();
        true
    }

    /// Convert into a storable document
    pub fn to_document(&self) -> Result<Document> {
        let Value::Object(mut body) = serde_json::to_value(self)? else {
            return Err(Error::Database("record did not serialize to an object".into()));
        };
        body.remove("id");
        Ok(Document {
            id: self.id.to_string(),
            rev: self.rev,
            body,
        })
    }

    /// Read a record back from a stored document
    pub fn from_document(doc: Document) -> Result<Self> {
        let Document { id, rev, mut body } = doc;
        body.insert("id".to_string(), Value::String(id.clone()));
        let mut record: Self = serde_json::from_value(Value::Object(body))?;
        if record.id.record_type() != record.record_type() {
            return Err(Error::InvalidInput(format!(
                "document {id} has type `{}` but an id prefix for `{}`",
                record.record_type(),
                record.id.record_type()
            )));
        }
        record.rev = rev;
        Ok(record)
    }
}

/// User input for a new task
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewTask {
    pub title: String,
    pub date: String,
    pub description: String,
    #[serde(default)]
    pub assigned_to: Option<String>,
}

/// User input for a new report
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewReport {
    pub title: String,
    pub description: String,
    pub report_type: String,
    pub location: String,
    #[serde(default)]
    pub assigned_to: Option<String>,
    #[serde(default)]
    pub priority: Option<Priority>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub due_date: Option<String>,
    #[serde(default)]
    pub materials: Option<String>,
    #[serde(default)]
    pub findings: Option<String>,
    #[serde(default)]
    pub recommendations: Option<String>,
}

/// Build a complete, unsaved task from user input
pub fn build_task(input: &NewTask, created_by: &str) -> Record {
    let now = Utc::now();
    Record {
        id: RecordId::new(RecordType::Task),
        rev: None,
        status: TASK_DEFAULT_STATUS.to_string(),
        synced: false,
        created_at: now,
        updated_at: now,
        created_by: created_by.to_string(),
        fields: RecordFields::Task(TaskFields {
            title: input.title.clone(),
            date: input.date.clone(),
            description: input.description.clone(),
            assigned_to: normalize_text_option(input.assigned_to.clone()),
        }),
    }
}

/// Build a complete, unsaved report from user input
pub fn build_report(input: &NewReport, created_by: &str) -> Record {
    let now = Utc::now();
    Record {
        id: RecordId::new(RecordType::Report),
        rev: None,
        status: normalize_text_option(input.status.clone())
            .unwrap_or_else(|| REPORT_DEFAULT_STATUS.to_string()),
        synced: false,
        created_at: now,
        updated_at: now,
        created_by: created_by.to_string(),
        fields: RecordFields::Report(ReportFields {
            title: input.title.clone(),
            description: input.description.clone(),
            report_type: input.report_type.clone(),
            location: input.location.clone(),
            assigned_to: normalize_text_option(input.assigned_to.clone()),
            priority: input.priority.unwrap_or_default(),
            due_date: normalize_text_option(input.due_date.clone()),
            materials: normalize_text_option(input.materials.clone()),
            findings: normalize_text_option(input.findings.clone()),
            recommendations: normalize_text_option(input.recommendations.clone()),
        }),
    }
}
