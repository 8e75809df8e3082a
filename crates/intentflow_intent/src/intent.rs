//! The staged intent record.

use chrono::{DateTime, Duration, Utc};
use intentflow_ids::{Channel, CorrelationKey, IntentId, UserId};
use serde::{Deserialize, Serialize};

use crate::{IntentError, IntentStatus, Result};

/// Every stored column of an intent, used to rebuild one from the store.
#[derive(Debug, Clone)]
pub struct IntentParts {
    pub id: IntentId,
    pub user_id: UserId,
    pub channel: Channel,
    pub correlation_key: CorrelationKey,
    pub raw_text: String,
    pub received_at: DateTime<Utc>,
    pub detected_intent: Option<String>,
    pub intent_confidence: Option<f64>,
    pub status: IntentStatus,
    pub status_reason: Option<String>,
    pub missing_fields: Option<Vec<String>>,
    pub processing_attempts: u32,
    pub last_processed_at: Option<DateTime<Utc>>,
    pub followup_parent_id: Option<IntentId>,
}

/// A user message staged for asynchronous processing.
///
/// Raw text and correlation key are fixed at creation and only exposed through
/// accessors. Status changes go through the transition methods below so an
/// illegal move is rejected before anything reaches the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Intent {
    pub id: IntentId,
    pub user_id: UserId,
    pub channel: Channel,
    correlation_key: CorrelationKey,
    raw_text: String,
    pub received_at: DateTime<Utc>,
    pub detected_intent: Option<String>,
    pub intent_confidence: Option<f64>,
    pub status: IntentStatus,
    pub status_reason: Option<String>,
    pub missing_fields: Option<Vec<String>>,
    pub processing_attempts: u32,
    pub last_processed_at: Option<DateTime<Utc>>,
    followup_parent_id: Option<IntentId>,
}

impl From<IntentParts> for Intent {
    fn from(parts: IntentParts) -> Self {
        Self {
            id: parts.id,
            user_id: parts.user_id,
            channel: parts.channel,
            correlation_key: parts.correlation_key,
            raw_text: parts.raw_text,
            received_at: parts.received_at,
            detected_intent: parts.detected_intent,
            intent_confidence: parts.intent_confidence,
            status: parts.status,
            status_reason: parts.status_reason,
            missing_fields: parts.missing_fields,
            processing_attempts: parts.processing_attempts,
            last_processed_at: parts.last_processed_at,
            followup_parent_id: parts.followup_parent_id,
        }
    }
}

impl Intent {
    pub fn raw_text(&self) -> &str {
        &self.raw_text
    }

    pub fn correlation_key(&self) -> &CorrelationKey {
        &self.correlation_key
    }

    pub fn followup_parent_id(&self) -> Option<IntentId> {
        self.followup_parent_id
    }

    pub fn is_classified(&self) -> bool {
        self.detected_intent.is_some()
    }

    /// True when a worker stamped this intent within `window` of `now`.
    pub fn is_fresh_attempt(&self, now: DateTime<Utc>, window: Duration) -> bool {
        self.status == IntentStatus::Processing
            && self.processing_attempts > 0
            && self
                .last_processed_at
                .map(|at| now.signed_duration_since(at) < window)
                .unwrap_or(false)
    }

    fn transition(&mut self, to: IntentStatus) -> Result<()> {
        if !self.status.can_transition_to(to) {
            return Err(IntentError::InvalidTransition {
                id: self.id,
                from: self.status,
                to,
            });
        }
        self.status = to;
        Ok(())
    }

    /// Claim the intent for a processing attempt.
    ///
    /// A `PROCESSING` intent is accepted too: the caller has already decided the
    /// previous attempt is stale and is reclaiming it.
    pub fn begin_processing(&mut self, now: DateTime<Utc>) -> Result<()> {
        if self.status != IntentStatus::Processing {
            self.transition(IntentStatus::Processing)?;
        }
        self.processing_attempts += 1;
        self.last_processed_at = Some(now);
        Ok(())
    }

    /// Record classifier output. Confidence is clamped to `[0, 1]`.
    pub fn set_classification(&mut self, label: impl Into<String>, confidence: f64) {
        let confidence = if confidence.is_finite() {
            confidence.clamp(0.0, 1.0)
        } else {
            0.0
        };
        self.detected_intent = Some(label.into());
        self.intent_confidence = Some(confidence);
    }

    pub fn mark_processed(&mut self, reason: Option<String>) -> Result<()> {
        self.transition(IntentStatus::Processed)?;
        self.status_reason = reason;
        self.missing_fields = None;
        Ok(())
    }

    pub fn mark_needs_input(
        &mut self,
        reason: impl Into<String>,
        missing_fields: Vec<String>,
    ) -> Result<()> {
        self.transition(IntentStatus::NeedsInput)?;
        self.status_reason = Some(reason.into());
        self.missing_fields = if missing_fields.is_empty() {
            None
        } else {
            Some(missing_fields)
        };
        Ok(())
    }

    pub fn mark_failed(&mut self, reason: impl Into<String>) -> Result<()> {
        self.transition(IntentStatus::Failed)?;
        self.status_reason = Some(reason.into());
        Ok(())
    }

    /// Operator retry: only `FAILED` and `NEEDS_INPUT` go back to `RECEIVED`.
    pub fn reset_for_retry(&mut self) -> Result<()> {
        if !self.status.is_retryable() {
            return Err(IntentError::CannotRetry {
                id: self.id,
                status: self.status,
            });
        }
        self.status = IntentStatus::Received;
        self.status_reason = Some("Manual retry requested".to_string());
        self.missing_fields = None;
        Ok(())
    }

    /// Status reason written when a follow-up resumes this intent.
    fn resumption_reason(&self, follow_up_text: &str) -> String {
        format!(
            "Resume with follow-up. Original: {} | Follow-up: {}",
            self.raw_text, follow_up_text
        )
    }

    /// Reopen a `NEEDS_INPUT` intent because a follow-up arrived.
    pub fn resume_with(&mut self, follow_up_text: &str) -> Result<()> {
        let reason = self.resumption_reason(follow_up_text);
        self.transition(IntentStatus::Received)?;
        self.status_reason = Some(reason);
        self.missing_fields = None;
        Ok(())
    }

    /// Mark this freshly received intent as folded into `parent`.
    ///
    /// This is the one path from `RECEIVED` straight to `PROCESSED`; the parent
    /// link is write-once and must point at another intent of the same user.
    pub fn absorb_into(&mut self, parent: &Intent) -> Result<()> {
        if let Some(existing) = self.followup_parent_id {
            return Err(IntentError::AlreadyLinked {
                id: self.id,
                parent: existing,
            });
        }
        if parent.id == self.id || parent.user_id != self.user_id {
            return Err(IntentError::ParentMismatch {
                child: self.id,
                parent: parent.id,
            });
        }
        if self.status != IntentStatus::Received {
            return Err(IntentError::InvalidTransition {
                id: self.id,
                from: self.status,
                to: IntentStatus::Processed,
            });
        }
        self.followup_parent_id = Some(parent.id);
        self.status = IntentStatus::Processed;
        self.status_reason = Some(format!("Incorporated into parent intent {}", parent.id));
        Ok(())
    }
}
