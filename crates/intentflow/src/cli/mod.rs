//! CLI commands for Intentflow.
//!
//! Every command opens the store, starts a pipeline with the built-in
//! collaborators, does its work and drains the pools before printing.

pub mod history;
pub mod intent;
pub mod maintenance;
pub mod output;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use intentflow_db::IntentDb;
use intentflow_engine::{EngineDeps, IntentPipeline, PipelineConfig, ReplyRoutes, SqliteLedger};
use tracing::debug;

use crate::builtin::{ConsoleReplySender, KeywordClassifier, RuleOrchestrator};

const CONFIG_FILE: &str = "config.toml";

/// Settings shared by every subcommand.
#[derive(Debug, Clone, Default)]
pub struct GlobalArgs {
    pub config: Option<PathBuf>,
    pub database: Option<PathBuf>,
}

/// Read the explicit config file, else `<home>/config.toml` if present, else defaults.
pub fn load_config(explicit: Option<&Path>) -> Result<PipelineConfig> {
    if let Some(path) = explicit {
        return PipelineConfig::load(path)
            .with_context(|| format!("Failed to load config from {}", path.display()));
    }

    let implicit = intentflow_logging::intentflow_home()?.join(CONFIG_FILE);
    if implicit.exists() {
        debug!(path = %implicit.display(), "Using config from home directory");
        return PipelineConfig::load(&implicit)
            .with_context(|| format!("Failed to load config from {}", implicit.display()));
    }
    Ok(PipelineConfig::default())
}

/// Flag (or env var) first, then the config file, then the default location.
pub fn resolve_database(flag: Option<&Path>, config: &PipelineConfig) -> Result<PathBuf> {
    if let Some(path) = flag.or(config.database_path.as_deref()) {
        return Ok(path.to_path_buf());
    }
    intentflow_logging::default_database_path()
}

/// An open store plus a running pipeline.
pub struct AppContext {
    pub db: IntentDb,
    pub pipeline: IntentPipeline,
}

impl AppContext {
    pub async fn open(args: &GlobalArgs) -> Result<Self> {
        let config = load_config(args.config.as_deref())?;
        let path = resolve_database(args.database.as_deref(), &config)?;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }

        let db = IntentDb::open(&path)
            .await
            .with_context(|| format!("Failed to open database at {}", path.display()))?;
        Ok(Self::with_db(db, &config))
    }

    pub fn with_db(db: IntentDb, config: &PipelineConfig) -> Self {
        let ledger = SqliteLedger::new(db.clone());
        let deps = EngineDeps {
            classifier: Arc::new(KeywordClassifier),
            orchestrator: Arc::new(RuleOrchestrator::new(ledger.clone())),
            ledger: Arc::new(ledger),
        };
        let routes = ReplyRoutes::new().fallback(Arc::new(ConsoleReplySender));
        let pipeline = IntentPipeline::start(db.clone(), config, deps, routes);
        Self { db, pipeline }
    }

    /// Wait for queued processing and replies.
    pub async fn drain(&self) {
        self.pipeline.shutdown().await;
    }

    /// Drain both pools and close the store.
    pub async fn finish(self) {
        self.drain().await;
        self.db.close().await;
    }
}
