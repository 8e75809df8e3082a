//! Reply delivery on its own bounded pool.
//!
//! The engine only publishes [`SettledIntent`] events. This module turns them
//! into [`Reply`] values and hands each one to the sender registered for the
//! intent's channel, so slow delivery never holds up processing workers.

use std::collections::HashMap;
use std::sync::Arc;

use intentflow_ids::Channel;
use intentflow_intent::IntentStatus;
use tokio::sync::{broadcast, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::collaborators::{Reply, ReplySender};
use crate::engine::SettledIntent;
use crate::pool::WorkerPool;

/// Which sender handles which channel.
#[derive(Clone, Default)]
pub struct ReplyRoutes {
    by_channel: HashMap<Channel, Arc<dyn ReplySender>>,
    fallback: Option<Arc<dyn ReplySender>>,
}

impl ReplyRoutes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn route(mut self, channel: Channel, sender: Arc<dyn ReplySender>) -> Self {
        self.by_channel.insert(channel, sender);
        self
    }

    /// Sender for channels without a dedicated route.
    pub fn fallback(mut self, sender: Arc<dyn ReplySender>) -> Self {
        self.fallback = Some(sender);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.by_channel.is_empty() && self.fallback.is_none()
    }

    fn resolve(&self, channel: &Channel) -> Option<Arc<dyn ReplySender>> {
        self.by_channel
            .get(channel)
            .or(self.fallback.as_ref())
            .cloned()
    }
}

impl Reply {
    pub fn from_settled(settled: &SettledIntent) -> Self {
        let text = match (&settled.status, &settled.reason) {
            (_, Some(reason)) if !reason.is_empty() => reason.clone(),
            (IntentStatus::Processed, _) => "Done.".to_string(),
            (IntentStatus::NeedsInput, _) => "Could you share a bit more detail?".to_string(),
            (IntentStatus::Failed, _) => "Sorry, that could not be processed.".to_string(),
            (status, _) => status.to_string(),
        };
        Self {
            intent_id: settled.intent_id,
            user_id: settled.user_id.clone(),
            channel: settled.channel.clone(),
            status: settled.status,
            text,
        }
    }
}

#[derive(Clone)]
pub struct ReplyDispatcher {
    routes: Arc<ReplyRoutes>,
    pool: WorkerPool,
}

impl ReplyDispatcher {
    pub fn new(routes: ReplyRoutes, pool: WorkerPool) -> Self {
        Self {
            routes: Arc::new(routes),
            pool,
        }
    }

    /// Queue delivery of one settled intent. Returns `false` if nothing was queued.
    pub fn dispatch(&self, settled: &SettledIntent) -> bool {
        let Some(sender) = self.routes.resolve(&settled.channel) else {
            debug!(intent_id = %settled.intent_id, channel = %settled.channel, "No reply route");
            return false;
        };

        let reply = Reply::from_settled(settled);
        let intent_id = reply.intent_id;
        let submitted = self.pool.submit(async move {
            if let Err(e) = sender.send(&reply).await {
                warn!(intent_id = %reply.intent_id, channel = %reply.channel, "Reply delivery failed: {e:#}");
            }
        });

        if let Err(e) = submitted {
            warn!(intent_id = %intent_id, "Reply dropped: {e}");
            return false;
        }
        true
    }

    /// Forward every settled event from `events` until `stop` fires.
    pub fn spawn_forwarder(self, events: broadcast::Receiver<SettledIntent>) -> ReplyForwarder {
        let (stop_tx, stop_rx) = oneshot::channel();
        let handle = tokio::spawn(forward_settled(self.clone(), events, stop_rx));
        ReplyForwarder {
            stop: Some(stop_tx),
            handle: Some(handle),
            dispatcher: self,
        }
    }
}

async fn forward_settled(
    dispatcher: ReplyDispatcher,
    mut events: broadcast::Receiver<SettledIntent>,
    mut stop: oneshot::Receiver<()>,
) {
    loop {
        tokio::select! {
            biased;
            event = events.recv() => match event {
                Ok(settled) => {
                    dispatcher.dispatch(&settled);
                }
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    warn!(missed, "Reply forwarder lagged, replies dropped");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
            _ = &mut stop => {
                while let Ok(settled) = events.try_recv() {
                    dispatcher.dispatch(&settled);
                }
                break;
            }
        }
    }
}

/// Running forwarder task plus the pool it feeds.
pub struct ReplyForwarder {
    stop: Option<oneshot::Sender<()>>,
    handle: Option<JoinHandle<()>>,
    dispatcher: ReplyDispatcher,
}

impl ReplyForwarder {
    /// Forward what is already published, then drain the reply pool.
    pub async fn shutdown(&mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.await {
                warn!("Reply forwarder ended abnormally: {e}");
            }
        }
        self.dispatcher.pool.shutdown().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PoolConfig;
    use async_trait::async_trait;
    use intentflow_ids::{IntentId, UserId};
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingSender {
        sent: Mutex<Vec<Reply>>,
    }

    #[async_trait]
    impl ReplySender for RecordingSender {
        async fn send(&self, reply: &Reply) -> anyhow::Result<()> {
            self.sent.lock().unwrap().push(reply.clone());
            Ok(())
        }
    }

    fn settled(channel: &str, status: IntentStatus, reason: Option<&str>) -> SettledIntent {
        SettledIntent {
            intent_id: IntentId::new(1),
            user_id: UserId::parse("U1").unwrap(),
            channel: Channel::parse(channel).unwrap(),
            status,
            reason: reason.map(String::from),
            missing_fields: Vec::new(),
        }
    }

    #[test]
    fn test_reply_text_prefers_reason() {
        let reply = Reply::from_settled(&settled(
            "WEB",
            IntentStatus::NeedsInput,
            Some("Follow-up required: which category?"),
        ));
        assert_eq!(reply.text, "Follow-up required: which category?");

        let reply = Reply::from_settled(&settled("WEB", IntentStatus::Processed, None));
        assert_eq!(reply.text, "Done.");
    }

    #[tokio::test]
    async fn test_routes_by_channel_with_fallback() {
        let whatsapp = Arc::new(RecordingSender::default());
        let fallback = Arc::new(RecordingSender::default());
        let routes = ReplyRoutes::new()
            .route(Channel::parse("WHATSAPP").unwrap(), whatsapp.clone())
            .fallback(fallback.clone());
        let dispatcher = ReplyDispatcher::new(routes, WorkerPool::start("reply", &PoolConfig::new(2, 8)));

        assert!(dispatcher.dispatch(&settled("WHATSAPP", IntentStatus::Processed, None)));
        assert!(dispatcher.dispatch(&settled("MOBILE", IntentStatus::Failed, None)));
        dispatcher.pool.shutdown().await;

        assert_eq!(whatsapp.sent.lock().unwrap().len(), 1);
        assert_eq!(fallback.sent.lock().unwrap().len(), 1);
        assert_eq!(fallback.sent.lock().unwrap()[0].channel.as_str(), "MOBILE");
    }

    #[tokio::test]
    async fn test_forwarder_drains_on_shutdown() {
        let sender = Arc::new(RecordingSender::default());
        let dispatcher = ReplyDispatcher::new(
            ReplyRoutes::new().fallback(sender.clone()),
            WorkerPool::start("reply", &PoolConfig::new(1, 8)),
        );
        let (tx, rx) = broadcast::channel(16);
        let mut forwarder = dispatcher.spawn_forwarder(rx);

        for _ in 0..3 {
            tx.send(settled("WEB", IntentStatus::Processed, None)).unwrap();
        }
        forwarder.shutdown().await;

        assert_eq!(sender.sent.lock().unwrap().len(), 3);
    }
}
