//! Database schema creation for the intent store.
//!
//! All CREATE statements live here - single source of truth.

use crate::error::Result;
use crate::IntentDb;
use tracing::info;

impl IntentDb {
    /// Ensure all tables and indexes exist.
    pub(crate) async fn ensure_schema(&self) -> Result<()> {
        // WAL is a no-op for in-memory databases
        sqlx::query("PRAGMA journal_mode=WAL")
            .execute(&self.pool)
            .await?;
        sqlx::query("PRAGMA synchronous=NORMAL")
            .execute(&self.pool)
            .await?;
        sqlx::query("PRAGMA foreign_keys=ON")
            .execute(&self.pool)
            .await?;

        self.create_inbox_tables().await?;
        self.create_ledger_tables().await?;

        info!("Database schema verified");
        Ok(())
    }

    async fn create_inbox_tables(&self) -> Result<()> {
        // Timestamps are microseconds since epoch
        sqlx::query(
            r#"CREATE TABLE IF NOT EXISTS user_intent_inbox (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id TEXT NOT NULL,
                channel TEXT NOT NULL,
                correlation_key TEXT NOT NULL UNIQUE,
                raw_text TEXT NOT NULL,
                received_at INTEGER NOT NULL,
                detected_intent TEXT,
                intent_confidence REAL,
                status TEXT NOT NULL DEFAULT 'RECEIVED',
                status_reason TEXT,
                missing_fields TEXT,
                processing_attempts INTEGER NOT NULL DEFAULT 0,
                last_processed_at INTEGER,
                followup_parent_id INTEGER REFERENCES user_intent_inbox(id)
            )"#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_inbox_user_status ON user_intent_inbox(user_id, status, received_at)",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_inbox_parent ON user_intent_inbox(followup_parent_id)",
        )
        .execute(&self.pool)
        .await?;

        // At most one NEEDS_INPUT intent per user
        sqlx::query(
            r#"CREATE UNIQUE INDEX IF NOT EXISTS idx_inbox_single_pending
               ON user_intent_inbox(user_id) WHERE status = 'NEEDS_INPUT'"#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn create_ledger_tables(&self) -> Result<()> {
        sqlx::query(
            r#"CREATE TABLE IF NOT EXISTS applied_transactions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                intent_id INTEGER NOT NULL REFERENCES user_intent_inbox(id),
                raw_text TEXT NOT NULL,
                applied_at INTEGER NOT NULL
            )"#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_applied_intent ON applied_transactions(intent_id)",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
