//! External collaborators the pipeline consumes but never implements.
//!
//! Classifiers, the orchestrator (and the financial strategies behind it),
//! the ledger and reply delivery are all reached through these traits, so the
//! core stays free of channel- and model-specific code.

use async_trait::async_trait;
use intentflow_db::IntentDb;
use intentflow_ids::{Channel, IntentId, UserId};
use intentflow_intent::{Intent, IntentStatus};
use serde::{Deserialize, Serialize};

// ============================================================================
// Classification
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    pub label: String,
    pub confidence: f64,
}

impl Classification {
    pub const UNKNOWN_LABEL: &'static str = "UNKNOWN";

    pub fn new(label: impl Into<String>, confidence: f64) -> Self {
        Self {
            label: label.into(),
            confidence,
        }
    }

    pub fn unknown() -> Self {
        Self::new(Self::UNKNOWN_LABEL, 0.0)
    }
}

#[async_trait]
pub trait Classifier: Send + Sync {
    async fn classify(&self, text: &str) -> anyhow::Result<Classification>;
}

// ============================================================================
// Orchestration
// ============================================================================

/// What the orchestrator is asked to act on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrchestratorRequest {
    pub intent_id: IntentId,
    pub user_id: UserId,
    pub channel: Channel,
    pub raw_text: String,
    /// Raw text of every follow-up linked to the intent, oldest first
    pub follow_ups: Vec<String>,
    pub detected_intent: Option<String>,
    pub confidence: Option<f64>,
}

impl OrchestratorRequest {
    /// Original text and follow-ups as one string.
    pub fn combined_text(&self) -> String {
        if self.follow_ups.is_empty() {
            return self.raw_text.clone();
        }
        format!(
            "Original: {} | Follow-up: {}",
            self.raw_text,
            self.follow_ups.join(" | Follow-up: ")
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrchestratorStatus {
    /// A financial effect was applied
    Saved,
    /// Informational answer, nothing applied
    Info,
    /// More data needed from the user
    Followup,
    Invalid,
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrchestratorResult {
    pub status: OrchestratorStatus,
    pub message: String,
    #[serde(default)]
    pub missing_fields: Vec<String>,
}

impl OrchestratorResult {
    pub fn new(status: OrchestratorStatus, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            missing_fields: Vec::new(),
        }
    }

    pub fn follow_up(message: impl Into<String>, missing_fields: Vec<String>) -> Self {
        Self {
            status: OrchestratorStatus::Followup,
            message: message.into(),
            missing_fields,
        }
    }
}

/// The only route to financial handlers.
#[async_trait]
pub trait Orchestrator: Send + Sync {
    async fn process(&self, request: OrchestratorRequest) -> anyhow::Result<OrchestratorResult>;
}

// ============================================================================
// Ledger
// ============================================================================

/// Authoritative answer to "was this intent's effect already applied?".
#[async_trait]
pub trait FinancialLedger: Send + Sync {
    async fn is_already_applied(&self, intent: &Intent) -> anyhow::Result<bool>;
}

/// Ledger backed by the `applied_transactions` table.
#[derive(Clone)]
pub struct SqliteLedger {
    db: IntentDb,
}

impl SqliteLedger {
    pub fn new(db: IntentDb) -> Self {
        Self { db }
    }

    /// Record an applied effect. Called by financial handlers, never by the engine.
    pub async fn record(&self, intent_id: IntentId, raw_text: &str) -> anyhow::Result<()> {
        self.db
            .record_applied(intent_id, raw_text, chrono::Utc::now())
            .await?;
        Ok(())
    }
}

#[async_trait]
impl FinancialLedger for SqliteLedger {
    async fn is_already_applied(&self, intent: &Intent) -> anyhow::Result<bool> {
        Ok(self.db.is_applied(intent.id).await?)
    }
}

// ============================================================================
// Replies
// ============================================================================

/// Outbound message for the user once an intent settled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reply {
    pub intent_id: IntentId,
    pub user_id: UserId,
    pub channel: Channel,
    pub status: IntentStatus,
    pub text: String,
}

/// Delivers replies over one channel (WhatsApp, push, console, ...).
#[async_trait]
pub trait ReplySender: Send + Sync {
    async fn send(&self, reply: &Reply) -> anyhow::Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(follow_ups: Vec<&str>) -> OrchestratorRequest {
        OrchestratorRequest {
            intent_id: IntentId::new(1),
            user_id: UserId::parse("U1").unwrap(),
            channel: Channel::parse("WEB").unwrap(),
            raw_text: "spent 50".to_string(),
            follow_ups: follow_ups.into_iter().map(String::from).collect(),
            detected_intent: None,
            confidence: None,
        }
    }

    #[test]
    fn test_combined_text() {
        assert_eq!(request(vec![]).combined_text(), "spent 50");
        assert_eq!(
            request(vec!["food"]).combined_text(),
            "Original: spent 50 | Follow-up: food"
        );
        assert_eq!(
            request(vec!["food", "yesterday"]).combined_text(),
            "Original: spent 50 | Follow-up: food | Follow-up: yesterday"
        );
    }

    #[test]
    fn test_orchestrator_status_wire_names() {
        let result: OrchestratorResult =
            serde_json::from_str(r#"{"status":"FOLLOWUP","message":"which category?"}"#).unwrap();
        assert_eq!(result.status, OrchestratorStatus::Followup);
        assert!(result.missing_fields.is_empty());
    }
}
