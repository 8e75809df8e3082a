//! Applied financial transactions.
//!
//! Written by the financial side of the system after a balance changed; read
//! by the idempotency gate before any handler runs.

use chrono::{DateTime, Utc};
use intentflow_ids::IntentId;
use sqlx::Row;

use crate::error::Result;
use crate::IntentDb;

#[derive(Debug, Clone, PartialEq)]
pub struct AppliedTransaction {
    pub id: i64,
    pub intent_id: IntentId,
    pub raw_text: String,
    pub applied_at: DateTime<Utc>,
}

impl IntentDb {
    /// Record that the effect described by `raw_text` was applied for `intent_id`.
    pub async fn record_applied(
        &self,
        intent_id: IntentId,
        raw_text: &str,
        applied_at: DateTime<Utc>,
    ) -> Result<i64> {
        let result = sqlx::query(
            "INSERT INTO applied_transactions (intent_id, raw_text, applied_at) VALUES (?, ?, ?)",
        )
        .bind(intent_id.as_i64())
        .bind(raw_text)
        .bind(Self::datetime_to_micros(applied_at))
        .execute(&self.pool)
        .await?;

        Ok(result.last_insert_rowid())
    }

    /// True if an effect was already recorded for `intent_id`.
    pub async fn is_applied(&self, intent_id: IntentId) -> Result<bool> {
        let found: Option<i64> =
            sqlx::query_scalar("SELECT id FROM applied_transactions WHERE intent_id = ? LIMIT 1")
                .bind(intent_id.as_i64())
                .fetch_optional(&self.pool)
                .await?;
        Ok(found.is_some())
    }

    pub async fn applied_for_intent(&self, intent_id: IntentId) -> Result<Vec<AppliedTransaction>> {
        let rows = sqlx::query(
            r#"
            SELECT id, intent_id, raw_text, applied_at
            FROM applied_transactions
            WHERE intent_id = ?
            ORDER BY applied_at ASC, id ASC
            "#,
        )
        .bind(intent_id.as_i64())
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| AppliedTransaction {
                id: row.get("id"),
                intent_id: IntentId::new(row.get("intent_id")),
                raw_text: row.get("raw_text"),
                applied_at: Self::micros_to_datetime(row.get("applied_at")),
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::NewIntent;
    use intentflow_ids::{Channel, CorrelationKey, UserId};

    #[tokio::test]
    async fn test_record_and_lookup() {
        let db = IntentDb::open_in_memory().await.unwrap();
        let (intent, _) = db
            .insert_or_get(&NewIntent {
                user_id: UserId::parse("U1").unwrap(),
                channel: Channel::parse("WEB").unwrap(),
                correlation_key: CorrelationKey::parse("k1").unwrap(),
                raw_text: "spent 50 on food".to_string(),
                received_at: Utc::now(),
            })
            .await
            .unwrap();

        assert!(!db.is_applied(intent.id).await.unwrap());
        db.record_applied(intent.id, "spent 50 on food", Utc::now())
            .await
            .unwrap();
        assert!(db.is_applied(intent.id).await.unwrap());
        assert!(!db.is_applied(IntentId::new(intent.id.as_i64() + 1)).await.unwrap());

        let applied = db.applied_for_intent(intent.id).await.unwrap();
        assert_eq!(applied.len(), 1);
        assert_eq!(applied[0].intent_id, intent.id);
    }
}
