//! Database connection management

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rusqlite::Connection;

use super::migrations;
use crate::error::{Error, Result};

/// Shared handle to the embedded SQLite database
///
/// Cloning is cheap; all clones share one connection. Blocking SQLite work
/// runs on tokio's blocking pool.
#[derive(Debug, Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
    path: Option<PathBuf>,
}

impl Database {
    /// Open a database at the given path, creating it if it doesn't exist
    ///
    /// Runs migrations automatically.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let open_path = path.clone();
        let conn = tokio::task::spawn_blocking(move || -> Result<Connection> {
            if let Some(parent) = open_path.parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent)?;
                }
            }
            let mut conn = Connection::open(&open_path)?;
            configure(&conn, true)?;
            migrations::run(&mut conn)?;
            Ok(conn)
        })
        .await
        .map_err(|error| Error::Database(format!("open task failed: {error}")))??;

        tracing::debug!("Opened database at {}", path.display());
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            path: Some(path),
        })
    }

    /// Open an in-memory database (useful for testing)
    pub async fn open_in_memory() -> Result<Self> {
        let conn = tokio::task::spawn_blocking(|| -> Result<Connection> {
            let mut conn = Connection::open_in_memory()?;
            configure(&conn, false)?;
            migrations::run(&mut conn)?;
            Ok(conn)
        })
        .await
        .map_err(|error| Error::Database(format!("open task failed: {error}")))??;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            path: None,
        })
    }

    /// Filesystem location, `None` for in-memory databases
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Run `f` against the connection on the blocking pool.
    pub(crate) async fn call<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut conn = conn
                .lock()
                .map_err(|_| Error::Database("connection lock poisoned".to_string()))?;
            f(&mut conn)
        })
        .await
        .map_err(|error| Error::Database(format!("blocking task failed: {error}")))?
    }
}

/// Configure `SQLite` for a single-writer client
fn configure(conn: &Connection, on_disk: bool) -> Result<()> {
    if on_disk {
        // WAL lets a replicating peer read while we write
        if let Err(error) =
            conn.execute_batch("PRAGMA journal_mode = WAL; PRAGMA synchronous = NORMAL;")
        {
            tracing::warn!("Could not enable WAL journaling: {error}");
        }
    }
    conn.busy_timeout(Duration::from_secs(5))?;
    Ok(())
}
