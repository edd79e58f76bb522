//! Application-facing services

mod app_database;

pub use app_database::AppDatabase;
