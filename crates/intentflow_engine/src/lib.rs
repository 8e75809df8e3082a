//! Intent ingestion, asynchronous processing and follow-up correlation.
//!
//! Adapters talk to [`IntentPipeline`]. Underneath it:
//!
//! - [`IntentInbox`] writes every message durably before anything else happens
//! - [`FollowUpCorrelator`] decides whether a message answers a pending question
//! - [`ProcessingEngine`] classifies, checks the ledger and calls the orchestrator
//! - [`ReplyDispatcher`] delivers replies on a separate pool
//!
//! ```rust,ignore
//! let pipeline = IntentPipeline::start(db, &config, deps, routes);
//! let intent = pipeline.ingest("15550001", Some("whatsapp"), "spent 50").await?;
//! if let Some(pending) = pipeline.get_pending_action("15550001").await? {
//!     println!("waiting on: {:?}", pending.status_reason);
//! }
//! pipeline.shutdown().await;
//! ```

pub mod clock;
pub mod collaborators;
pub mod config;
pub mod correlator;
pub mod engine;
pub mod error;
pub mod facade;
pub mod inbox;
pub mod pool;
pub mod replies;

pub use collaborators::{
    Classification, Classifier, FinancialLedger, Orchestrator, OrchestratorRequest,
    OrchestratorResult, OrchestratorStatus, Reply, ReplySender, SqliteLedger,
};
pub use config::{ConfigError, PipelineConfig, PoolConfig};
pub use correlator::FollowUpCorrelator;
pub use engine::{
    EngineDeps, ProcessOutcome, ProcessingEngine, ProcessingScheduler, SettledIntent, SkipReason,
};
pub use error::{EngineError, Result};
pub use facade::IntentPipeline;
pub use inbox::{IntentInbox, Staged};
pub use pool::{PoolError, WorkerPool};
pub use replies::{ReplyDispatcher, ReplyForwarder, ReplyRoutes};
