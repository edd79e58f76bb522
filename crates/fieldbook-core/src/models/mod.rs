//! Data models for Fieldbook

mod id;
mod record;
mod settings;

pub use id::{generate_id, RecordId, RecordType, RANGE_SENTINEL};
pub use record::{
    build_report, build_task, NewReport, NewTask, Priority, Record, RecordFields, ReportFields,
    TaskFields, REPORT_DEFAULT_STATUS, TASK_DEFAULT_STATUS,
};
pub use settings::{Settings, UNKNOWN_USER};
