//! Database module for persistent storage.
//!
//! Uses rusqlite (SQLite) with a thread-safe `Database` handle.
//! Access within one process is serialized through a `Mutex<Connection>`;
//! separate processes sharing the same file rely on SQLite's file locking
//! and the configured busy timeout.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{Connection, Transaction, TransactionBehavior};

pub mod contact_repo;
pub mod error;
pub mod history_repo;
pub mod link_repo;
pub mod mail_repo;
pub mod migrations;

pub use error::DatabaseError;

/// Default time a writer waits on a lock held by another connection.
pub const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_millis(5000);

/// Thread-safe database handle wrapping a single rusqlite connection.
///
/// Cloning is cheap (inner `Arc`). WAL mode is enabled so readers in other
/// processes are not blocked by an open write transaction.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Opens (or creates) the database at the given path and runs all
    /// pending migrations.
    pub fn open(path: &Path, busy_timeout: Duration) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| DatabaseError::Io {
                    path: parent.to_path_buf(),
                    source: e,
                })?;
            }
        }

        let conn = Connection::open(path)?;
        conn.busy_timeout(busy_timeout)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;

        migrations::run_all(&conn)?;

        log::info!("Database opened at {}", path.display());

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Opens an in-memory database for testing. Runs all migrations.
    pub fn open_in_memory() -> Result<Self, DatabaseError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;

        migrations::run_all(&conn)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Provides locked access to the underlying connection.
    pub fn with_conn<F, T>(&self, f: F) -> Result<T, DatabaseError>
    where
        F: FnOnce(&Connection) -> Result<T, DatabaseError>,
    {
        let conn = self.conn.lock().map_err(|_| DatabaseError::LockPoisoned)?;
        f(&conn)
    }

    /// Whether another caller currently holds the connection.
    #[cfg(test)]
    pub(crate) fn is_locked(&self) -> bool {
        self.conn.try_lock().is_err()
    }

    /// Runs `f` inside an IMMEDIATE transaction.
    ///
    /// The write lock is taken up front so two processes racing on the same
    /// chain queue behind each other instead of failing on lock upgrade.
    /// Commits when `f` returns `Ok`; any error (or a panic unwinding through
    /// here) drops the transaction, which rolls it back.
    pub fn with_transaction<F, T, E>(&self, f: F) -> Result<T, E>
    where
        F: FnOnce(&Transaction<'_>) -> Result<T, E>,
        E: From<DatabaseError>,
    {
        let mut conn = self
            .conn
            .lock()
            .map_err(|_| E::from(DatabaseError::LockPoisoned))?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(|e| E::from(DatabaseError::Sqlite(e)))?;
        let value = f(&tx)?;
        tx.commit().map_err(|e| E::from(DatabaseError::Sqlite(e)))?;
        Ok(value)
    }
}

/// Returns the canonical database path: `~/.crmlink/data/crmlink.db`.
pub fn default_database_path() -> Option<PathBuf> {
    dirs::home_dir().map(|h| h.join(".crmlink").join("data").join("crmlink.db"))
}

/// Formats a timestamp the way every table stores it.
///
/// Fixed-width RFC 3339 in UTC, so text comparison in SQL orders correctly.
pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Parses a stored timestamp column.
pub fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, DatabaseError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| DatabaseError::InvalidTimestamp {
            value: raw.to_string(),
            reason: e.to_string(),
        })
}
