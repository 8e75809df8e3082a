//! Intent inbox operations.
//!
//! Raw text and correlation key are written once by `insert_or_get` and never
//! appear in an UPDATE. Every state change is a conditional UPDATE that reports
//! whether this caller won the row.

use chrono::{DateTime, Utc};
use intentflow_ids::{Channel, CorrelationKey, IntentId, UserId};
use intentflow_intent::{HistoryQuery, Intent, IntentParts, IntentStatus};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use tracing::debug;

use crate::error::{DbError, Result};
use crate::IntentDb;

/// A message about to be staged.
#[derive(Debug, Clone)]
pub struct NewIntent {
    pub user_id: UserId,
    pub channel: Channel,
    pub correlation_key: CorrelationKey,
    pub raw_text: String,
    pub received_at: DateTime<Utc>,
}

const SELECT_INTENT: &str = r#"
    SELECT id, user_id, channel, correlation_key, raw_text, received_at,
           detected_intent, intent_confidence, status, status_reason,
           missing_fields, processing_attempts, last_processed_at, followup_parent_id
    FROM user_intent_inbox
"#;

impl IntentDb {
    // ========================================================================
    // Staging
    // ========================================================================

    /// Insert a new `RECEIVED` row, or return the row that already owns the key.
    ///
    /// The flag is `true` when this call created the row.
    pub async fn insert_or_get(&self, new: &NewIntent) -> Result<(Intent, bool)> {
        let inserted = sqlx::query(
            r#"
            INSERT INTO user_intent_inbox
                (user_id, channel, correlation_key, raw_text, received_at, status, processing_attempts)
            VALUES (?, ?, ?, ?, ?, 'RECEIVED', 0)
            ON CONFLICT(correlation_key) DO NOTHING
            "#,
        )
        .bind(new.user_id.as_str())
        .bind(new.channel.as_str())
        .bind(new.correlation_key.as_str())
        .bind(&new.raw_text)
        .bind(Self::datetime_to_micros(new.received_at))
        .execute(&self.pool)
        .await?
        .rows_affected()
            > 0;

        let intent = self.find_by_key(&new.correlation_key).await?.ok_or_else(|| {
            DbError::not_found(format!(
                "intent with correlation key {} vanished after insert",
                new.correlation_key
            ))
        })?;

        if !inserted {
            debug!(intent_id = %intent.id, key = %new.correlation_key, "Duplicate correlation key");
        }

        Ok((intent, inserted))
    }

    // ========================================================================
    // Lookups
    // ========================================================================

    pub async fn get_intent(&self, id: IntentId) -> Result<Option<Intent>> {
        let sql = format!("{} WHERE id = ?", SELECT_INTENT);
        let row = sqlx::query(&sql)
            .bind(id.as_i64())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_intent).transpose()
    }

    pub async fn find_by_key(&self, key: &CorrelationKey) -> Result<Option<Intent>> {
        let sql = format!("{} WHERE correlation_key = ?", SELECT_INTENT);
        let row = sqlx::query(&sql)
            .bind(key.as_str())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_intent).transpose()
    }

    /// Most recent intent of `user` in `status` (receipt time, then id, descending).
    pub async fn latest_by_status(
        &self,
        user: &UserId,
        status: IntentStatus,
    ) -> Result<Option<Intent>> {
        let sql = format!(
            "{} WHERE user_id = ? AND status = ? ORDER BY received_at DESC, id DESC LIMIT 1",
            SELECT_INTENT
        );
        let row = sqlx::query(&sql)
            .bind(user.as_str())
            .bind(status.as_str())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_intent).transpose()
    }

    pub async fn count_by_status(&self, user: &UserId, status: IntentStatus) -> Result<u64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM user_intent_inbox WHERE user_id = ? AND status = ?",
        )
        .bind(user.as_str())
        .bind(status.as_str())
        .fetch_one(&self.pool)
        .await?;
        Ok(count.max(0) as u64)
    }

    /// Every intent in `status`, oldest first.
    pub async fn list_by_status(&self, status: IntentStatus) -> Result<Vec<Intent>> {
        let sql = format!(
            "{} WHERE status = ? ORDER BY received_at ASC, id ASC",
            SELECT_INTENT
        );
        let rows = sqlx::query(&sql)
            .bind(status.as_str())
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(row_to_intent).collect()
    }

    /// Users holding more than one `NEEDS_INPUT` intent.
    pub async fn users_with_multiple_pending(&self) -> Result<Vec<(UserId, u64)>> {
        let rows = sqlx::query(
            r#"
            SELECT user_id, COUNT(*) AS pending
            FROM user_intent_inbox
            WHERE status = 'NEEDS_INPUT'
            GROUP BY user_id
            HAVING COUNT(*) > 1
            ORDER BY user_id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                let user: String = row.get("user_id");
                let pending: i64 = row.get("pending");
                let user = UserId::parse(&user)
                    .map_err(|e| DbError::invalid_state(format!("stored user id: {}", e)))?;
                Ok((user, pending.max(0) as u64))
            })
            .collect()
    }

    /// Follow-ups linked to `parent`, oldest first.
    pub async fn follow_ups(&self, parent: IntentId) -> Result<Vec<Intent>> {
        let sql = format!(
            "{} WHERE followup_parent_id = ? ORDER BY received_at ASC, id ASC",
            SELECT_INTENT
        );
        let rows = sqlx::query(&sql)
            .bind(parent.as_i64())
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(row_to_intent).collect()
    }

    /// One page of a user's intents plus the total matching count.
    pub async fn history(&self, user: &UserId, query: &HistoryQuery) -> Result<(Vec<Intent>, u64)> {
        let mut filter = String::from(" WHERE user_id = ?");
        if query.status.is_some() {
            filter.push_str(" AND status = ?");
        }

        let count_sql = format!("SELECT COUNT(*) FROM user_intent_inbox{}", filter);
        let mut count_query = sqlx::query_scalar::<_, i64>(&count_sql).bind(user.as_str());
        if let Some(status) = query.status {
            count_query = count_query.bind(status.as_str());
        }
        let total = count_query.fetch_one(&self.pool).await?.max(0) as u64;

        let direction = query.direction.as_sql();
        let page_sql = format!(
            "{}{} ORDER BY received_at {}, id {} LIMIT ? OFFSET ?",
            SELECT_INTENT, filter, direction, direction
        );
        let mut page_query = sqlx::query(&page_sql).bind(user.as_str());
        if let Some(status) = query.status {
            page_query = page_query.bind(status.as_str());
        }
        let rows = page_query
            .bind(i64::from(query.effective_limit()))
            .bind(i64::from(query.offset))
            .fetch_all(&self.pool)
            .await?;

        let items = rows.iter().map(row_to_intent).collect::<Result<Vec<_>>>()?;
        Ok((items, total))
    }

    // ========================================================================
    // Conditional updates
    // ========================================================================

    /// Persist the claim made by `Intent::begin_processing`.
    ///
    /// Succeeds only if the row still has the status and attempt counter the
    /// caller loaded; a concurrent claimer makes this return `false`.
    pub async fn claim_attempt(
        &self,
        intent: &Intent,
        expected_status: IntentStatus,
        expected_attempts: u32,
    ) -> Result<bool> {
        let rows_affected = sqlx::query(
            r#"
            UPDATE user_intent_inbox
            SET status = ?,
                processing_attempts = ?,
                last_processed_at = ?
            WHERE id = ? AND status = ? AND processing_attempts = ?
            "#,
        )
        .bind(intent.status.as_str())
        .bind(i64::from(intent.processing_attempts))
        .bind(intent.last_processed_at.map(Self::datetime_to_micros))
        .bind(intent.id.as_i64())
        .bind(expected_status.as_str())
        .bind(i64::from(expected_attempts))
        .execute(&self.pool)
        .await?
        .rows_affected();

        Ok(rows_affected > 0)
    }

    /// Write the mutable columns of an intent owned by the current attempt.
    ///
    /// Only applies while the row is still `PROCESSING` with the same attempt
    /// counter, so a `PROCESSED` row is never overwritten.
    pub async fn save_attempt(&self, intent: &Intent) -> Result<bool> {
        let missing_fields = intent
            .missing_fields
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        let result = sqlx::query(
            r#"
            UPDATE user_intent_inbox
            SET status = ?,
                status_reason = ?,
                detected_intent = ?,
                intent_confidence = ?,
                missing_fields = ?,
                last_processed_at = ?
            WHERE id = ? AND status = 'PROCESSING' AND processing_attempts = ?
            "#,
        )
        .bind(intent.status.as_str())
        .bind(intent.status_reason.as_deref())
        .bind(intent.detected_intent.as_deref())
        .bind(intent.intent_confidence)
        .bind(missing_fields)
        .bind(intent.last_processed_at.map(Self::datetime_to_micros))
        .bind(intent.id.as_i64())
        .bind(i64::from(intent.processing_attempts))
        .execute(&self.pool)
        .await
        .map_err(|e| DbError::from_write(e, "user already has a pending intent"))?;

        Ok(result.rows_affected() > 0)
    }

    /// Move an intent from `expected` back to `RECEIVED` (retry or resumption).
    pub async fn reopen(
        &self,
        id: IntentId,
        expected: IntentStatus,
        reason: &str,
    ) -> Result<bool> {
        let rows_affected = sqlx::query(
            r#"
            UPDATE user_intent_inbox
            SET status = 'RECEIVED',
                status_reason = ?,
                missing_fields = NULL
            WHERE id = ? AND status = ?
            "#,
        )
        .bind(reason)
        .bind(id.as_i64())
        .bind(expected.as_str())
        .execute(&self.pool)
        .await?
        .rows_affected();

        Ok(rows_affected > 0)
    }

    /// Link a freshly received intent to its parent and mark it `PROCESSED`.
    ///
    /// The parent reference is write-once: an already linked row is left alone.
    pub async fn absorb_follow_up(&self, child: &Intent) -> Result<bool> {
        let parent = child
            .followup_parent_id()
            .ok_or_else(|| DbError::invalid_state(format!("intent {} has no parent", child.id)))?;

        let rows_affected = sqlx::query(
            r#"
            UPDATE user_intent_inbox
            SET followup_parent_id = ?,
                status = 'PROCESSED',
                status_reason = ?
            WHERE id = ? AND status = 'RECEIVED' AND followup_parent_id IS NULL
            "#,
        )
        .bind(parent.as_i64())
        .bind(child.status_reason.as_deref())
        .bind(child.id.as_i64())
        .execute(&self.pool)
        .await?
        .rows_affected();

        Ok(rows_affected > 0)
    }
}

fn row_to_intent(row: &SqliteRow) -> Result<Intent> {
    let status_str: String = row.get("status");
    let status: IntentStatus = status_str
        .parse()
        .map_err(|_| DbError::invalid_state(format!("Unknown intent status: {}", status_str)))?;

    let user_id: String = row.get("user_id");
    let channel: String = row.get("channel");
    let key: String = row.get("correlation_key");
    let invalid = |e: intentflow_ids::IdParseError| DbError::invalid_state(e.to_string());

    let missing_fields: Option<String> = row.get("missing_fields");
    let missing_fields = missing_fields
        .map(|json| serde_json::from_str::<Vec<String>>(&json))
        .transpose()?;

    let attempts: i64 = row.get("processing_attempts");
    let last_processed_at: Option<i64> = row.get("last_processed_at");
    let parent: Option<i64> = row.get("followup_parent_id");

    Ok(Intent::from(IntentParts {
        id: IntentId::new(row.get("id")),
        user_id: UserId::parse(&user_id).map_err(invalid)?,
        channel: Channel::parse(&channel).map_err(invalid)?,
        correlation_key: CorrelationKey::parse(&key).map_err(invalid)?,
        raw_text: row.get("raw_text"),
        received_at: IntentDb::micros_to_datetime(row.get("received_at")),
        detected_intent: row.get("detected_intent"),
        intent_confidence: row.get("intent_confidence"),
        status,
        status_reason: row.get("status_reason"),
        missing_fields,
        processing_attempts: u32::try_from(attempts).unwrap_or(0),
        last_processed_at: last_processed_at.map(IntentDb::micros_to_datetime),
        followup_parent_id: parent.map(IntentId::new),
    }))
}
