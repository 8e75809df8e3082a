//! Channel-agnostic entry point used by every adapter.
//!
//! WhatsApp webhooks, the web API, mobile clients and the CLI all call the same
//! methods here. Nothing in this module or below branches on the channel.

use std::sync::Arc;

use intentflow_db::IntentDb;
use intentflow_ids::{Channel, CorrelationKey, IntentId, UserId};
use intentflow_intent::{HistoryPage, HistoryQuery, Intent};
use tokio::sync::{broadcast, Mutex};
use tracing::{info, warn};

use crate::config::PipelineConfig;
use crate::correlator::FollowUpCorrelator;
use crate::engine::{EngineDeps, ProcessOutcome, ProcessingEngine, ProcessingScheduler, SettledIntent};
use crate::error::{EngineError, Result};
use crate::inbox::{IntentInbox, Staged};
use crate::pool::WorkerPool;
use crate::replies::{ReplyDispatcher, ReplyForwarder, ReplyRoutes};

pub struct IntentPipeline {
    db: IntentDb,
    inbox: IntentInbox,
    correlator: FollowUpCorrelator,
    scheduler: ProcessingScheduler,
    replies: Mutex<Option<ReplyForwarder>>,
}

impl IntentPipeline {
    /// Wire up the pipeline and start both worker pools.
    ///
    /// Must be called from inside a tokio runtime.
    pub fn start(db: IntentDb, config: &PipelineConfig, deps: EngineDeps, routes: ReplyRoutes) -> Self {
        let engine = Arc::new(ProcessingEngine::new(
            db.clone(),
            deps,
            config.freshness_window(),
        ));
        let scheduler = ProcessingScheduler::new(
            Arc::clone(&engine),
            WorkerPool::start("processing", &config.processing_pool),
        );

        let replies = if routes.is_empty() {
            None
        } else {
            let dispatcher = ReplyDispatcher::new(routes, WorkerPool::start("reply", &config.reply_pool));
            Some(dispatcher.spawn_forwarder(engine.subscribe()))
        };

        Self {
            inbox: IntentInbox::new(db.clone()),
            correlator: FollowUpCorrelator::new(db.clone(), scheduler.clone()),
            db,
            scheduler,
            replies: Mutex::new(replies),
        }
    }

    /// Stage a message and hand it to processing.
    ///
    /// Returns as soon as the row is durable. Anything that goes wrong after
    /// that point is logged, never returned: the intent stays recoverable.
    pub async fn ingest(&self, user_id: &str, channel: Option<&str>, raw_text: &str) -> Result<Intent> {
        let (user, channel, text) = validate(user_id, channel, raw_text)?;
        let staged = self.inbox.persist(&user, &channel, text).await?;
        Ok(self.dispatch(staged, &user, &channel, text).await)
    }

    /// Like `ingest`, with an adapter-supplied correlation key for deduplication.
    pub async fn ingest_with_key(
        &self,
        user_id: &str,
        channel: Option<&str>,
        raw_text: &str,
        key: &str,
    ) -> Result<Intent> {
        let (user, channel, text) = validate(user_id, channel, raw_text)?;
        let key = CorrelationKey::parse(key)?;
        let staged = self.inbox.persist_with_key(&user, &channel, text, key).await?;
        Ok(self.dispatch(staged, &user, &channel, text).await)
    }

    /// Answer to a pending question. Same path as `ingest`.
    pub async fn resume(&self, user_id: &str, channel: Option<&str>, response_text: &str) -> Result<Intent> {
        self.ingest(user_id, channel, response_text).await
    }

    /// The intent currently waiting for this user's input, if any.
    pub async fn get_pending_action(&self, user_id: &str) -> Result<Option<Intent>> {
        let user = UserId::parse(user_id)?;
        self.correlator.find_pending(&user).await
    }

    pub async fn history(&self, user_id: &str, query: HistoryQuery) -> Result<HistoryPage> {
        let user = UserId::parse(user_id)?;
        let (items, total) = self.db.history(&user, &query).await?;
        Ok(HistoryPage::new(items, total, &query))
    }

    pub async fn get(&self, id: IntentId) -> Result<Intent> {
        self.db
            .get_intent(id)
            .await?
            .ok_or(EngineError::NotFound(id))
    }

    /// Operator retry of a `FAILED` or `NEEDS_INPUT` intent; runs inline.
    pub async fn retry(&self, id: IntentId) -> Result<ProcessOutcome> {
        self.scheduler.engine().retry(id).await
    }

    pub async fn recover_received(&self) -> Result<usize> {
        self.scheduler.recover_received().await
    }

    pub fn correlator(&self) -> &FollowUpCorrelator {
        &self.correlator
    }

    pub fn engine(&self) -> &Arc<ProcessingEngine> {
        self.scheduler.engine()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SettledIntent> {
        self.scheduler.engine().subscribe()
    }

    /// Stop intake and wait for queued processing and replies to finish.
    pub async fn shutdown(&self) {
        self.scheduler.shutdown().await;
        if let Some(mut replies) = self.replies.lock().await.take() {
            replies.shutdown().await;
        }
        info!("Pipeline drained");
    }

    async fn dispatch(&self, staged: Staged, user: &UserId, channel: &Channel, text: &str) -> Intent {
        let Staged { intent, created } = staged;
        if !created {
            return intent;
        }

        match self
            .correlator
            .try_link_as_follow_up(user, channel, text, intent.id)
            .await
        {
            Ok(true) => {
                return match self.db.get_intent(intent.id).await {
                    Ok(Some(linked)) => linked,
                    Ok(None) => intent,
                    Err(e) => {
                        warn!(intent_id = %intent.id, "Could not reload linked follow-up: {e}");
                        intent
                    }
                };
            }
            Ok(false) => {}
            Err(e) => {
                warn!(intent_id = %intent.id, "Follow-up correlation failed, processing as new: {e}");
            }
        }

        self.scheduler.schedule(intent.id);
        intent
    }
}

fn validate<'a>(
    user_id: &str,
    channel: Option<&str>,
    raw_text: &'a str,
) -> Result<(UserId, Channel, &'a str)> {
    let user = UserId::parse(user_id)?;
    let channel = Channel::parse_or_default(channel)?;
    if raw_text.trim().is_empty() {
        return Err(EngineError::validation("text is required"));
    }
    Ok((user, channel, raw_text))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_defaults_channel() {
        let (user, channel, text) = validate(" U1 ", None, "  spent 50 ").unwrap();
        assert_eq!(user.as_str(), "U1");
        assert_eq!(channel.as_str(), "WEB");
        assert_eq!(text, "  spent 50 ");
    }

    #[test]
    fn test_validate_rejects_blank_input() {
        assert!(matches!(
            validate("", Some("WEB"), "spent 50"),
            Err(EngineError::Validation(_))
        ));
        assert!(matches!(
            validate("U1", Some("WEB"), "   "),
            Err(EngineError::Validation(_))
        ));
        assert!(matches!(
            validate("U1", Some("we b"), "spent 50"),
            Err(EngineError::Validation(_))
        ));
    }
}
