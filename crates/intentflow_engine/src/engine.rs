//! State-machine worker: classify, check the ledger, orchestrate, settle.
//!
//! `process` is safe to call any number of times for the same intent. A
//! `PROCESSED` row short-circuits, a freshly stamped `PROCESSING` row is left
//! to its worker, the attempt claim is a conditional update with a single
//! winner, and the ledger gate stops an effect from being applied twice.
//! Every call that finds the row unsettled asks the ledger, including the ones
//! that then leave the row to another worker.

use std::sync::Arc;

use chrono::{Duration, Utc};
use intentflow_db::{DbError, IntentDb};
use intentflow_ids::{Channel, IntentId, UserId};
use intentflow_intent::{Intent, IntentError, IntentStatus};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, info, instrument, warn};

use crate::collaborators::{
    Classification, Classifier, FinancialLedger, Orchestrator, OrchestratorRequest,
    OrchestratorResult, OrchestratorStatus,
};
use crate::error::{EngineError, Result};
use crate::pool::{PoolError, WorkerPool};

const SETTLED_CHANNEL_CAPACITY: usize = 256;

/// Why a `process` call did no work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SkipReason {
    /// Already `PROCESSED`
    AlreadyProcessed,
    /// Another worker stamped it inside the freshness window
    InFlight,
    /// Another caller claimed the same attempt first
    LostClaim,
    /// The row changed under this attempt before it could settle
    Superseded,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ProcessOutcome {
    Skipped(SkipReason),
    /// The attempt ran and wrote this final state
    Settled(Intent),
}

impl ProcessOutcome {
    pub fn status(&self) -> Option<IntentStatus> {
        match self {
            ProcessOutcome::Skipped(_) => None,
            ProcessOutcome::Settled(intent) => Some(intent.status),
        }
    }
}

/// Published once per attempt that reached a final state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SettledIntent {
    pub intent_id: IntentId,
    pub user_id: UserId,
    pub channel: Channel,
    pub status: IntentStatus,
    pub reason: Option<String>,
    pub missing_fields: Vec<String>,
}

impl From<&Intent> for SettledIntent {
    fn from(intent: &Intent) -> Self {
        Self {
            intent_id: intent.id,
            user_id: intent.user_id.clone(),
            channel: intent.channel.clone(),
            status: intent.status,
            reason: intent.status_reason.clone(),
            missing_fields: intent.missing_fields.clone().unwrap_or_default(),
        }
    }
}

/// The collaborators one engine talks to.
#[derive(Clone)]
pub struct EngineDeps {
    pub classifier: Arc<dyn Classifier>,
    pub orchestrator: Arc<dyn Orchestrator>,
    pub ledger: Arc<dyn FinancialLedger>,
}

pub struct ProcessingEngine {
    db: IntentDb,
    deps: EngineDeps,
    freshness_window: Duration,
    settled: broadcast::Sender<SettledIntent>,
}

impl ProcessingEngine {
    pub fn new(db: IntentDb, deps: EngineDeps, freshness_window: Duration) -> Self {
        let (settled, _) = broadcast::channel(SETTLED_CHANNEL_CAPACITY);
        Self {
            db,
            deps,
            freshness_window,
            settled,
        }
    }

    /// Receive every settled attempt from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<SettledIntent> {
        self.settled.subscribe()
    }

    /// Run one processing attempt.
    ///
    /// Errors are only returned for problems before the attempt was claimed
    /// (unknown id, store unavailable, illegal starting status). Once claimed,
    /// any classifier, ledger or orchestrator error is recorded as `FAILED`.
    #[instrument(skip(self), fields(intent_id = %id))]
    pub async fn process(&self, id: IntentId) -> Result<ProcessOutcome> {
        let mut intent = self
            .db
            .get_intent(id)
            .await?
            .ok_or(EngineError::NotFound(id))?;

        let now = Utc::now();
        match intent.status {
            IntentStatus::Processed => {
                debug!("Already processed, skipping");
                return Ok(ProcessOutcome::Skipped(SkipReason::AlreadyProcessed));
            }
            IntentStatus::Processing if intent.is_fresh_attempt(now, self.freshness_window) => {
                debug!(attempts = intent.processing_attempts, "Attempt in flight, skipping");
                self.observe_ledger(&intent).await;
                return Ok(ProcessOutcome::Skipped(SkipReason::InFlight));
            }
            IntentStatus::Processing => {
                warn!(
                    attempts = intent.processing_attempts,
                    "Reclaiming stale PROCESSING intent"
                );
            }
            _ => {}
        }

        let (from, attempts) = (intent.status, intent.processing_attempts);
        intent.begin_processing(now)?;
        if !self.db.claim_attempt(&intent, from, attempts).await? {
            debug!("Attempt claimed by another worker");
            self.observe_ledger(&intent).await;
            return Ok(ProcessOutcome::Skipped(SkipReason::LostClaim));
        }
        info!(attempt = intent.processing_attempts, "Processing intent");

        let claimed = intent.clone();
        if let Err(e) = self.run_attempt(&mut intent).await {
            warn!("Processing failed: {e:#}");
            intent = claimed.clone();
            intent.mark_failed(format!("{e:#}"))?;
        }

        self.settle(claimed, intent).await
    }

    /// Reset a `FAILED` or `NEEDS_INPUT` intent to `RECEIVED` and process it.
    #[instrument(skip(self), fields(intent_id = %id))]
    pub async fn retry(&self, id: IntentId) -> Result<ProcessOutcome> {
        let mut intent = self
            .db
            .get_intent(id)
            .await?
            .ok_or(EngineError::NotFound(id))?;

        let expected = intent.status;
        intent.reset_for_retry()?;
        let reason = intent.status_reason.clone().unwrap_or_default();
        if !self.db.reopen(id, expected, &reason).await? {
            // Status moved between load and reset; report what it is now
            let current = self
                .db
                .get_intent(id)
                .await?
                .ok_or(EngineError::NotFound(id))?;
            if !current.status.is_retryable() {
                return Err(IntentError::CannotRetry {
                    id,
                    status: current.status,
                }
                .into());
            }
            return Err(EngineError::validation(format!(
                "intent {} changed status while retrying",
                id
            )));
        }

        info!(from = %expected, "Retrying intent");
        self.process(id).await
    }

    /// Ledger lookup for a call that leaves the row to another worker.
    ///
    /// The ledger stays the idempotency oracle for every caller; the claim only
    /// decides who settles the row.
    async fn observe_ledger(&self, intent: &Intent) {
        match self.deps.ledger.is_already_applied(intent).await {
            Ok(true) => info!("Effect already applied, leaving settle to the owning attempt"),
            Ok(false) => {}
            Err(e) => warn!("Ledger check failed: {e:#}"),
        }
    }

    /// Steps after the claim: classify, ledger gate, orchestrate.
    async fn run_attempt(&self, intent: &mut Intent) -> anyhow::Result<()> {
        if !intent.is_classified() {
            let classification = match self.deps.classifier.classify(intent.raw_text()).await {
                Ok(classification) => classification,
                Err(e) => {
                    warn!("Classification failed, continuing as UNKNOWN: {e:#}");
                    Classification::unknown()
                }
            };
            debug!(
                label = %classification.label,
                confidence = classification.confidence,
                "Classified intent"
            );
            intent.set_classification(classification.label, classification.confidence);
        }

        if self.deps.ledger.is_already_applied(intent).await? {
            info!("Effect already applied, marking processed");
            intent.mark_processed(Some(
                "Already applied; duplicate financial effect skipped".to_string(),
            ))?;
            return Ok(());
        }

        let follow_ups = self
            .db
            .follow_ups(intent.id)
            .await?
            .iter()
            .map(|child| child.raw_text().to_string())
            .collect();

        let request = OrchestratorRequest {
            intent_id: intent.id,
            user_id: intent.user_id.clone(),
            channel: intent.channel.clone(),
            raw_text: intent.raw_text().to_string(),
            follow_ups,
            detected_intent: intent.detected_intent.clone(),
            confidence: intent.intent_confidence,
        };

        let result = self.deps.orchestrator.process(request).await?;
        apply_result(intent, result)?;
        Ok(())
    }

    /// Persist the final state of an attempt and announce it.
    async fn settle(&self, claimed: Intent, intent: Intent) -> Result<ProcessOutcome> {
        let intent = match self.db.save_attempt(&intent).await {
            Ok(true) => intent,
            Ok(false) => {
                warn!("Row changed during the attempt, result dropped");
                return Ok(ProcessOutcome::Skipped(SkipReason::Superseded));
            }
            Err(DbError::Constraint(detail)) if intent.status == IntentStatus::NeedsInput => {
                warn!(%detail, "User already has a pending follow-up");
                let mut failed = claimed;
                failed.mark_failed(format!(
                    "Invariant violated: user {} already has a NEEDS_INPUT intent",
                    failed.user_id
                ))?;
                if !self.db.save_attempt(&failed).await? {
                    return Ok(ProcessOutcome::Skipped(SkipReason::Superseded));
                }
                failed
            }
            Err(e) => return Err(e.into()),
        };

        info!(status = %intent.status, reason = ?intent.status_reason, "Intent settled");
        // No subscribers is fine
        let _ = self.settled.send(SettledIntent::from(&intent));
        Ok(ProcessOutcome::Settled(intent))
    }
}

fn apply_result(intent: &mut Intent, result: OrchestratorResult) -> intentflow_intent::Result<()> {
    match result.status {
        OrchestratorStatus::Saved | OrchestratorStatus::Info => {
            let reason = (!result.message.is_empty()).then_some(result.message);
            intent.mark_processed(reason)
        }
        OrchestratorStatus::Followup => intent.mark_needs_input(
            format!("Follow-up required: {}", result.message),
            result.missing_fields,
        ),
        OrchestratorStatus::Invalid | OrchestratorStatus::Unknown => {
            intent.mark_failed(format!("Processing failed: {}", result.message))
        }
    }
}

// ============================================================================
// Scheduling
// ============================================================================

/// Hands `process` calls to the processing pool.
#[derive(Clone)]
pub struct ProcessingScheduler {
    engine: Arc<ProcessingEngine>,
    pool: WorkerPool,
}

impl ProcessingScheduler {
    pub fn new(engine: Arc<ProcessingEngine>, pool: WorkerPool) -> Self {
        Self { engine, pool }
    }

    pub fn engine(&self) -> &Arc<ProcessingEngine> {
        &self.engine
    }

    /// Queue an intent for processing.
    ///
    /// A full queue is not an error for the caller: the intent is durable and
    /// stays `RECEIVED` until `recover_received` picks it up.
    pub fn schedule(&self, id: IntentId) -> bool {
        let engine = Arc::clone(&self.engine);
        let submitted = self.pool.submit(async move {
            if let Err(e) = engine.process(id).await {
                warn!(intent_id = %id, "Scheduled processing failed: {e}");
            }
        });

        match submitted {
            Ok(()) => true,
            Err(PoolError::Saturated { pool }) => {
                warn!(intent_id = %id, %pool, "Processing queue full, intent stays RECEIVED");
                false
            }
            Err(PoolError::Closed { pool }) => {
                warn!(intent_id = %id, %pool, "Processing pool closed, intent stays RECEIVED");
                false
            }
        }
    }

    /// Re-schedule every `RECEIVED` intent. Returns how many were queued.
    pub async fn recover_received(&self) -> Result<usize> {
        let pending = self.engine.db.list_by_status(IntentStatus::Received).await?;
        let total = pending.len();
        let scheduled = pending
            .iter()
            .filter(|intent| self.schedule(intent.id))
            .count();
        info!(total, scheduled, "Recovered RECEIVED intents");
        Ok(scheduled)
    }

    pub async fn shutdown(&self) {
        self.pool.shutdown().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::{Classification, OrchestratorResult};
    use async_trait::async_trait;
    use intentflow_db::NewIntent;
    use intentflow_ids::CorrelationKey;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    struct FixedClassifier(Option<&'static str>);

    #[async_trait]
    impl Classifier for FixedClassifier {
        async fn classify(&self, _text: &str) -> anyhow::Result<Classification> {
            match self.0 {
                Some(label) => Ok(Classification::new(label, 0.9)),
                None => anyhow::bail!("model offline"),
            }
        }
    }

    struct ScriptedOrchestrator {
        result: Mutex<Option<anyhow::Result<OrchestratorResult>>>,
        calls: AtomicUsize,
        seen: Mutex<Vec<OrchestratorRequest>>,
    }

    impl ScriptedOrchestrator {
        fn new(result: anyhow::Result<OrchestratorResult>) -> Arc<Self> {
            Arc::new(Self {
                result: Mutex::new(Some(result)),
                calls: AtomicUsize::new(0),
                seen: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl Orchestrator for ScriptedOrchestrator {
        async fn process(&self, request: OrchestratorRequest) -> anyhow::Result<OrchestratorResult> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.seen.lock().unwrap().push(request);
            self.result
                .lock()
                .unwrap()
                .take()
                .unwrap_or_else(|| Ok(OrchestratorResult::new(OrchestratorStatus::Saved, "ok")))
        }
    }

    struct FlagLedger(bool);

    #[async_trait]
    impl FinancialLedger for FlagLedger {
        async fn is_already_applied(&self, _intent: &Intent) -> anyhow::Result<bool> {
            Ok(self.0)
        }
    }

    async fn setup(
        classifier: Option<&'static str>,
        orchestrator: Arc<ScriptedOrchestrator>,
        applied: bool,
    ) -> (IntentDb, ProcessingEngine, Intent) {
        let db = IntentDb::open_in_memory().await.unwrap();
        let deps = EngineDeps {
            classifier: Arc::new(FixedClassifier(classifier)),
            orchestrator,
            ledger: Arc::new(FlagLedger(applied)),
        };
        let engine = ProcessingEngine::new(db.clone(), deps, Duration::minutes(5));
        let (intent, _) = db
            .insert_or_get(&NewIntent {
                user_id: UserId::parse("U1").unwrap(),
                channel: Channel::parse("WEB").unwrap(),
                correlation_key: CorrelationKey::parse("WEB:U1:1:00000001").unwrap(),
                raw_text: "spent 50".to_string(),
                received_at: Utc::now(),
            })
            .await
            .unwrap();
        (db, engine, intent)
    }

    #[tokio::test]
    async fn test_saved_result_processes() {
        let orchestrator =
            ScriptedOrchestrator::new(Ok(OrchestratorResult::new(OrchestratorStatus::Saved, "Saved 50")));
        let (db, engine, intent) = setup(Some("EXPENSE"), orchestrator.clone(), false).await;
        let mut settled = engine.subscribe();

        let outcome = engine.process(intent.id).await.unwrap();
        assert_eq!(outcome.status(), Some(IntentStatus::Processed));

        let stored = db.get_intent(intent.id).await.unwrap().unwrap();
        assert_eq!(stored.status, IntentStatus::Processed);
        assert_eq!(stored.processing_attempts, 1);
        assert_eq!(stored.detected_intent.as_deref(), Some("EXPENSE"));
        assert_eq!(stored.intent_confidence, Some(0.9));
        assert!(stored.last_processed_at.is_some());

        let event = settled.try_recv().unwrap();
        assert_eq!(event.intent_id, intent.id);
        assert_eq!(event.status, IntentStatus::Processed);
    }

    #[tokio::test]
    async fn test_followup_result_needs_input() {
        let orchestrator = ScriptedOrchestrator::new(Ok(OrchestratorResult::follow_up(
            "Which category?",
            vec!["category".to_string()],
        )));
        let (db, engine, intent) = setup(Some("EXPENSE"), orchestrator, false).await;

        engine.process(intent.id).await.unwrap();

        let stored = db.get_intent(intent.id).await.unwrap().unwrap();
        assert_eq!(stored.status, IntentStatus::NeedsInput);
        assert_eq!(
            stored.status_reason.as_deref(),
            Some("Follow-up required: Which category?")
        );
        assert_eq!(stored.missing_fields, Some(vec!["category".to_string()]));
    }

    #[tokio::test]
    async fn test_invalid_and_error_results_fail() {
        let orchestrator = ScriptedOrchestrator::new(Ok(OrchestratorResult::new(
            OrchestratorStatus::Invalid,
            "amount missing",
        )));
        let (db, engine, intent) = setup(Some("EXPENSE"), orchestrator, false).await;
        engine.process(intent.id).await.unwrap();
        let stored = db.get_intent(intent.id).await.unwrap().unwrap();
        assert_eq!(stored.status, IntentStatus::Failed);
        assert_eq!(
            stored.status_reason.as_deref(),
            Some("Processing failed: amount missing")
        );

        let orchestrator = ScriptedOrchestrator::new(Err(anyhow::anyhow!("handler exploded")));
        let (db, engine, intent) = setup(Some("EXPENSE"), orchestrator, false).await;
        let outcome = engine.process(intent.id).await.unwrap();
        assert_eq!(outcome.status(), Some(IntentStatus::Failed));
        let stored = db.get_intent(intent.id).await.unwrap().unwrap();
        assert!(stored.status_reason.unwrap().contains("handler exploded"));
    }

    #[tokio::test]
    async fn test_classifier_failure_recorded_as_unknown() {
        let orchestrator =
            ScriptedOrchestrator::new(Ok(OrchestratorResult::new(OrchestratorStatus::Info, "")));
        let (db, engine, intent) = setup(None, orchestrator, false).await;

        engine.process(intent.id).await.unwrap();

        let stored = db.get_intent(intent.id).await.unwrap().unwrap();
        assert_eq!(stored.status, IntentStatus::Processed);
        assert_eq!(stored.detected_intent.as_deref(), Some("UNKNOWN"));
        assert_eq!(stored.intent_confidence, Some(0.0));
        assert_eq!(stored.status_reason, None);
    }

    #[tokio::test]
    async fn test_ledger_gate_skips_orchestrator() {
        let orchestrator =
            ScriptedOrchestrator::new(Ok(OrchestratorResult::new(OrchestratorStatus::Saved, "")));
        let (db, engine, intent) = setup(Some("EXPENSE"), orchestrator.clone(), true).await;

        engine.process(intent.id).await.unwrap();

        assert_eq!(orchestrator.calls.load(Ordering::SeqCst), 0);
        let stored = db.get_intent(intent.id).await.unwrap().unwrap();
        assert_eq!(stored.status, IntentStatus::Processed);
    }

    #[tokio::test]
    async fn test_processed_is_noop() {
        let orchestrator =
            ScriptedOrchestrator::new(Ok(OrchestratorResult::new(OrchestratorStatus::Saved, "")));
        let (db, engine, intent) = setup(Some("EXPENSE"), orchestrator.clone(), false).await;

        engine.process(intent.id).await.unwrap();
        let before = db.get_intent(intent.id).await.unwrap().unwrap();
        let outcome = engine.process(intent.id).await.unwrap();
        let after = db.get_intent(intent.id).await.unwrap().unwrap();

        assert_eq!(outcome, ProcessOutcome::Skipped(SkipReason::AlreadyProcessed));
        assert_eq!(before, after);
        assert_eq!(orchestrator.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_process_on_failed_is_invalid_transition() {
        let orchestrator = ScriptedOrchestrator::new(Err(anyhow::anyhow!("boom")));
        let (_db, engine, intent) = setup(Some("EXPENSE"), orchestrator, false).await;
        engine.process(intent.id).await.unwrap();

        let err = engine.process(intent.id).await.unwrap_err();
        assert!(err.to_string().contains("FAILED"));
    }

    #[tokio::test]
    async fn test_retry_failed_intent() {
        let orchestrator = ScriptedOrchestrator::new(Err(anyhow::anyhow!("boom")));
        let (db, engine, intent) = setup(Some("EXPENSE"), orchestrator.clone(), false).await;
        engine.process(intent.id).await.unwrap();

        let outcome = engine.retry(intent.id).await.unwrap();
        assert_eq!(outcome.status(), Some(IntentStatus::Processed));
        let stored = db.get_intent(intent.id).await.unwrap().unwrap();
        assert_eq!(stored.processing_attempts, 2);
        assert_eq!(orchestrator.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_retry_rejects_received() {
        let orchestrator =
            ScriptedOrchestrator::new(Ok(OrchestratorResult::new(OrchestratorStatus::Saved, "")));
        let (_db, engine, intent) = setup(Some("EXPENSE"), orchestrator, false).await;

        let err = engine.retry(intent.id).await.unwrap_err();
        assert!(err.to_string().contains("RECEIVED"));
        assert!(matches!(
            err,
            EngineError::Intent(IntentError::CannotRetry {
                status: IntentStatus::Received,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn test_unknown_id_not_found() {
        let orchestrator =
            ScriptedOrchestrator::new(Ok(OrchestratorResult::new(OrchestratorStatus::Saved, "")));
        let (_db, engine, _) = setup(Some("EXPENSE"), orchestrator, false).await;
        let err = engine.process(IntentId::new(999)).await.unwrap_err();
        assert!(matches!(err, EngineError::NotFound(_)));
    }
}
