//! Settings repository implementation

use rusqlite::{params, OptionalExtension};

use super::Database;
use crate::error::Result;
use crate::models::Settings;
use crate::util::normalize_text_option;

const DISPLAY_NAME_KEY: &str = "display_name";

/// Trait for settings storage operations (async)
#[allow(async_fn_in_trait)]
pub trait SettingsRepository {
    /// Load settings from the database
    async fn load(&self) -> Result<Settings>;

    /// Save settings to the database
    async fn save(&self, settings: &Settings) -> Result<()>;
}

/// `SQLite` implementation of `SettingsRepository`
pub struct SqliteSettingsRepository<'a> {
    db: &'a Database,
}

impl<'a> SqliteSettingsRepository<'a> {
    /// Create a new repository with the given database
    pub const fn new(db: &'a Database) -> Self {
        Self { db }
    }

    /// Attribution for new records; falls back to "Unknown User" when the
    /// name is missing or the settings cannot be read.
    pub async fn created_by(&self) -> String {
        match self.load().await {
            Ok(settings) => settings.created_by(),
            Err(error) => {
                tracing::warn!("Could not read display name: {error}");
                Settings::default().created_by()
            }
        }
    }

    async fn get_setting(&self, key: &'static str) -> Result<Option<String>> {
        self.db
            .call(move |conn| {
                Ok(conn
                    .query_row(
                        "SELECT value FROM settings WHERE key = ?",
                        params![key],
                        |row| row.get(0),
                    )
                    .optional()?)
            })
            .await
    }

    async fn set_setting(&self, key: &'static str, value: Option<String>) -> Result<()> {
        self.db
            .call(move |conn| {
                match value {
                    Some(value) => conn.execute(
                        "INSERT OR REPLACE INTO settings (key, value) VALUES (?, ?)",
                        params![key, value],
                    )?,
                    None => conn.execute("DELETE FROM settings WHERE key = ?", params![key])?,
                };
                Ok(())
            })
            .await
    }
}

impl SettingsRepository for SqliteSettingsRepository<'_> {
    async fn load(&self) -> Result<Settings> {
        let display_name = normalize_text_option(self.get_setting(DISPLAY_NAME_KEY).await?);
        Ok(Settings { display_name })
    }

    async fn save(&self, settings: &Settings) -> Result<()> {
        let display_name = normalize_text_option(settings.display_name.clone());
        self.set_setting(DISPLAY_NAME_KEY, display_name).await
    }
}
