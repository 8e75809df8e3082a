//! Durable intent store for Intentflow.
//!
//! Every read and write of the `user_intent_inbox` and `applied_transactions`
//! tables goes through [`IntentDb`].
//!
//! # Usage
//!
//! ```rust,ignore
//! use intentflow_db::{IntentDb, NewIntent};
//!
//! let db = IntentDb::open("~/.intentflow/intentflow.sqlite3").await?;
//! let (intent, created) = db.insert_or_get(&new_intent).await?;
//! let pending = db.latest_by_status(&intent.user_id, IntentStatus::NeedsInput).await?;
//! ```

mod error;
mod intents;
mod ledger;
mod schema;

pub use error::{DbError, Result};
pub use intents::NewIntent;
pub use ledger::AppliedTransaction;

use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use tracing::info;

/// Handle to the intent database. Cheap to clone.
#[derive(Clone)]
pub struct IntentDb {
    pool: SqlitePool,
}

impl IntentDb {
    /// Open or create a database at the given path.
    ///
    /// Creates all tables if they don't exist.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let url = format!("sqlite:{}?mode=rwc", path.display());
        let options = SqliteConnectOptions::from_str(&url)?
            .create_if_missing(true)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        let db = Self { pool };
        db.ensure_schema().await?;

        info!(path = %path.display(), "Database opened");

        Ok(db)
    }

    /// Open a private in-memory database.
    ///
    /// The pool is pinned to one connection that never expires, otherwise
    /// every new connection would see an empty database.
    pub async fn open_in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await?;

        let db = Self { pool };
        db.ensure_schema().await?;
        Ok(db)
    }

    /// Get the underlying connection pool (escape hatch for tests and tooling).
    ///
    /// Prefer using the typed methods instead.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Close the database connection.
    pub async fn close(self) {
        self.pool.close().await;
    }
}

// Timestamp utilities
impl IntentDb {
    /// Stored representation of a timestamp: microseconds since the Unix epoch.
    pub fn datetime_to_micros(at: DateTime<Utc>) -> i64 {
        at.timestamp_micros()
    }

    /// Convert stored microseconds back to a DateTime.
    pub fn micros_to_datetime(micros: i64) -> DateTime<Utc> {
        DateTime::from_timestamp_micros(micros).unwrap_or_default()
    }
}
