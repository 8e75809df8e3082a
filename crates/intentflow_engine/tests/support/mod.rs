#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use intentflow_db::IntentDb;
use intentflow_ids::IntentId;
use intentflow_intent::{Intent, IntentStatus};
use intentflow_engine::{
    Classification, Classifier, EngineDeps, FinancialLedger, IntentPipeline, Orchestrator,
    OrchestratorRequest, OrchestratorResult, OrchestratorStatus, PipelineConfig, PoolConfig,
    Reply, ReplyRoutes, ReplySender,
};
use tokio::sync::watch;

pub struct CountingClassifier {
    pub calls: AtomicUsize,
}

#[async_trait]
impl Classifier for CountingClassifier {
    async fn classify(&self, _text: &str) -> anyhow::Result<Classification> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(Classification::new("EXPENSE", 0.8))
    }
}

/// Ledger that remembers applied intents and counts every lookup.
#[derive(Default)]
pub struct MemoryLedger {
    applied: Mutex<HashSet<IntentId>>,
    pub checks: AtomicUsize,
    pub applications: AtomicUsize,
}

impl MemoryLedger {
    pub fn apply(&self, id: IntentId) {
        self.applied.lock().unwrap().insert(id);
        self.applications.fetch_add(1, Ordering::SeqCst);
    }

    pub fn is_applied(&self, id: IntentId) -> bool {
        self.applied.lock().unwrap().contains(&id)
    }

    pub fn checks(&self) -> usize {
        self.checks.load(Ordering::SeqCst)
    }

    pub fn applications(&self) -> usize {
        self.applications.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl FinancialLedger for MemoryLedger {
    async fn is_already_applied(&self, intent: &Intent) -> anyhow::Result<bool> {
        self.checks.fetch_add(1, Ordering::SeqCst);
        Ok(self.applied.lock().unwrap().contains(&intent.id))
    }
}

/// Asks for one more detail until `follow_ups_needed` follow-ups are linked,
/// then applies the effect to the ledger and reports `SAVED`.
pub struct ScriptedOrchestrator {
    pub ledger: Arc<MemoryLedger>,
    pub follow_ups_needed: usize,
    pub calls: AtomicUsize,
    pub requests: Mutex<Vec<OrchestratorRequest>>,
    gate: Mutex<Option<watch::Receiver<bool>>>,
}

impl ScriptedOrchestrator {
    pub fn new(ledger: Arc<MemoryLedger>, follow_ups_needed: usize) -> Self {
        Self {
            ledger,
            follow_ups_needed,
            calls: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
            gate: Mutex::new(None),
        }
    }

    /// Block every call until the returned sender publishes `true`.
    pub fn gated(self) -> (Self, watch::Sender<bool>) {
        let (tx, rx) = watch::channel(false);
        *self.gate.lock().unwrap() = Some(rx);
        (self, tx)
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn last_request(&self) -> Option<OrchestratorRequest> {
        self.requests.lock().unwrap().last().cloned()
    }
}

#[async_trait]
impl Orchestrator for ScriptedOrchestrator {
    async fn process(&self, request: OrchestratorRequest) -> anyhow::Result<OrchestratorResult> {
        let gate = self.gate.lock().unwrap().clone();
        if let Some(mut gate) = gate {
            gate.wait_for(|open| *open).await?;
        }

        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().unwrap().push(request.clone());

        if request.follow_ups.len() < self.follow_ups_needed {
            let field = format!("detail_{}", request.follow_ups.len() + 1);
            return Ok(OrchestratorResult::follow_up(
                format!("Please provide {}", field),
                vec![field],
            ));
        }

        self.ledger.apply(request.intent_id);
        Ok(OrchestratorResult::new(
            OrchestratorStatus::Saved,
            format!("Saved: {}", request.combined_text()),
        ))
    }
}

#[derive(Default)]
pub struct RecordingSender {
    pub sent: Mutex<Vec<Reply>>,
}

#[async_trait]
impl ReplySender for RecordingSender {
    async fn send(&self, reply: &Reply) -> anyhow::Result<()> {
        self.sent.lock().unwrap().push(reply.clone());
        Ok(())
    }
}

pub struct Harness {
    pub db: IntentDb,
    pub pipeline: IntentPipeline,
    pub ledger: Arc<MemoryLedger>,
    pub orchestrator: Arc<ScriptedOrchestrator>,
    pub classifier: Arc<CountingClassifier>,
    pub replies: Arc<RecordingSender>,
}

pub fn small_config() -> PipelineConfig {
    PipelineConfig {
        processing_pool: PoolConfig::new(4, 32),
        reply_pool: PoolConfig::new(2, 32),
        ..PipelineConfig::default()
    }
}

pub async fn harness(follow_ups_needed: usize) -> Harness {
    let ledger = Arc::new(MemoryLedger::default());
    let orchestrator = Arc::new(ScriptedOrchestrator::new(ledger.clone(), follow_ups_needed));
    harness_with(small_config(), ledger, orchestrator).await
}

pub async fn harness_with(
    config: PipelineConfig,
    ledger: Arc<MemoryLedger>,
    orchestrator: Arc<ScriptedOrchestrator>,
) -> Harness {
    let db = IntentDb::open_in_memory().await.unwrap();
    let classifier = Arc::new(CountingClassifier {
        calls: AtomicUsize::new(0),
    });
    let replies = Arc::new(RecordingSender::default());
    let deps = EngineDeps {
        classifier: classifier.clone(),
        orchestrator: orchestrator.clone(),
        ledger: ledger.clone(),
    };
    let pipeline = IntentPipeline::start(
        db.clone(),
        &config,
        deps,
        ReplyRoutes::new().fallback(replies.clone()),
    );
    Harness {
        db,
        pipeline,
        ledger,
        orchestrator,
        classifier,
        replies,
    }
}

/// Poll until the intent reaches `status` or five seconds pass.
pub async fn wait_for_status(db: &IntentDb, id: IntentId, status: IntentStatus) -> Intent {
    let polled = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if let Some(intent) = db.get_intent(id).await.unwrap() {
                if intent.status == status {
                    return intent;
                }
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;

    match polled {
        Ok(intent) => intent,
        Err(_) => {
            let current = db.get_intent(id).await.unwrap();
            panic!(
                "intent {} never reached {}; last seen {:?}",
                id,
                status,
                current.map(|i| i.status)
            );
        }
    }
}
