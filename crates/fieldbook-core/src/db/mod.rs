//! Database layer for Fieldbook

mod connection;
mod documents;
mod migrations;
mod settings_repository;

pub use connection::Database;
pub use documents::{BulkOutcome, Document, DocumentStore, RangeOptions, Revision};
pub use settings_repository::{SettingsRepository, SqliteSettingsRepository};
