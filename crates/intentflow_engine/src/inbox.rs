//! Write-ahead staging of incoming messages.

use intentflow_db::{IntentDb, NewIntent};
use intentflow_ids::{Channel, CorrelationKey, UserId};
use intentflow_intent::Intent;
use tracing::{debug, info};

use crate::clock::MonotonicClock;
use crate::error::Result;

/// Result of staging one message.
#[derive(Debug, Clone)]
pub struct Staged {
    pub intent: Intent,
    /// `false` when the correlation key already existed
    pub created: bool,
}

/// Persists messages before anything else looks at them.
///
/// No classification, no handler calls: only the durable row.
#[derive(Clone)]
pub struct IntentInbox {
    db: IntentDb,
    clock: &'static MonotonicClock,
}

impl IntentInbox {
    pub fn new(db: IntentDb) -> Self {
        Self {
            db,
            clock: MonotonicClock::global(),
        }
    }

    /// Stage a message under a freshly generated correlation key.
    pub async fn persist(&self, user_id: &UserId, channel: &Channel, raw_text: &str) -> Result<Staged> {
        let received_at = self.clock.now();
        let key = CorrelationKey::generate(channel, user_id, received_at.timestamp_millis());
        self.stage(user_id, channel, raw_text, key, received_at).await
    }

    /// Stage a message under a key supplied by the adapter (e.g. a webhook
    /// delivery id), so a re-delivered message maps to the same row.
    pub async fn persist_with_key(
        &self,
        user_id: &UserId,
        channel: &Channel,
        raw_text: &str,
        key: CorrelationKey,
    ) -> Result<Staged> {
        let received_at = self.clock.now();
        self.stage(user_id, channel, raw_text, key, received_at).await
    }

    async fn stage(
        &self,
        user_id: &UserId,
        channel: &Channel,
        raw_text: &str,
        key: CorrelationKey,
        received_at: chrono::DateTime<chrono::Utc>,
    ) -> Result<Staged> {
        let (intent, created) = self
            .db
            .insert_or_get(&NewIntent {
                user_id: user_id.clone(),
                channel: channel.clone(),
                correlation_key: key,
                raw_text: raw_text.to_string(),
                received_at,
            })
            .await?;

        if created {
            info!(intent_id = %intent.id, user = %user_id, channel = %channel, "Intent staged");
        } else {
            debug!(intent_id = %intent.id, key = %intent.correlation_key(), "Duplicate delivery, returning existing intent");
        }

        Ok(Staged { intent, created })
    }
}
