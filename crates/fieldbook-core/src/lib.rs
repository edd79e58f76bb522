//! fieldbook-core - Core library for Fieldbook
//!
//! Offline-first storage for construction-site tasks and reports. Records are
//! written to a local document store first and flagged as synced once a
//! replication exchange with a peer has confirmed them.

pub mod config;
pub mod db;
pub mod error;
pub mod logging;
pub mod models;
pub mod query;
pub mod services;
pub mod state;
pub mod store;
pub mod sync;
pub mod util;

pub use config::Config;
pub use error::{Error, Result};
pub use models::{NewReport, NewTask, Record, RecordId, RecordType};
pub use services::AppDatabase;
