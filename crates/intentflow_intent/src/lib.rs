//! Intent lifecycle core types and state machine.
//!
//! Canonical definitions for IntentStatus, the staged Intent record and the
//! transitions the processing engine and follow-up correlator may apply.

mod history;
mod intent;

pub use history::{HistoryPage, HistoryQuery, SortDirection};
pub use intent::{Intent, IntentParts};
pub use intentflow_ids::{Channel, CorrelationKey, IdParseError, IntentId, UserId};

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

// ============================================================================
// Intent Status - The core state machine
// ============================================================================

/// Processing status of a staged intent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IntentStatus {
    /// Durably staged, waiting for a worker
    Received,
    /// A worker claimed it
    Processing,
    /// Handler succeeded or the effect was already applied
    Processed,
    /// Handler asked the user for more information
    NeedsInput,
    /// Handler error or unrecognised result
    Failed,
    /// Deliberately dropped; nothing transitions into or out of it today
    Ignored,
}

impl IntentStatus {
    pub const ALL: [IntentStatus; 6] = [
        IntentStatus::Received,
        IntentStatus::Processing,
        IntentStatus::Processed,
        IntentStatus::NeedsInput,
        IntentStatus::Failed,
        IntentStatus::Ignored,
    ];

    /// Get the canonical string representation (also the stored value).
    pub fn as_str(&self) -> &'static str {
        match self {
            IntentStatus::Received => "RECEIVED",
            IntentStatus::Processing => "PROCESSING",
            IntentStatus::Processed => "PROCESSED",
            IntentStatus::NeedsInput => "NEEDS_INPUT",
            IntentStatus::Failed => "FAILED",
            IntentStatus::Ignored => "IGNORED",
        }
    }

    /// Check if no further transition is possible.
    pub fn is_terminal(&self) -> bool {
        matches!(self, IntentStatus::Processed | IntentStatus::Ignored)
    }

    /// Check if `retry` may reset this status.
    pub fn is_retryable(&self) -> bool {
        matches!(self, IntentStatus::Failed | IntentStatus::NeedsInput)
    }

    /// Get valid transitions from this status.
    ///
    /// `NEEDS_INPUT` and `FAILED` only return to work through a reset to
    /// `RECEIVED` (retry or follow-up), never straight to `PROCESSING`.
    pub fn valid_transitions(&self) -> &'static [IntentStatus] {
        match self {
            IntentStatus::Received => &[IntentStatus::Processing],
            IntentStatus::Processing => &[
                IntentStatus::Processed,
                IntentStatus::NeedsInput,
                IntentStatus::Failed,
            ],
            IntentStatus::NeedsInput => &[IntentStatus::Received],
            IntentStatus::Failed => &[IntentStatus::Received],
            IntentStatus::Processed | IntentStatus::Ignored => &[],
        }
    }

    /// Check if a transition to the target status is valid.
    pub fn can_transition_to(&self, target: IntentStatus) -> bool {
        self.valid_transitions().contains(&target)
    }
}

impl fmt::Display for IntentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Error when parsing an IntentStatus from string.
#[derive(Debug, Error, Clone)]
#[error("invalid status: {0}")]
pub struct StatusParseError(String);

impl std::str::FromStr for IntentStatus {
    type Err = StatusParseError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "RECEIVED" => Ok(IntentStatus::Received),
            "PROCESSING" => Ok(IntentStatus::Processing),
            "PROCESSED" => Ok(IntentStatus::Processed),
            "NEEDS_INPUT" => Ok(IntentStatus::NeedsInput),
            "FAILED" => Ok(IntentStatus::Failed),
            "IGNORED" => Ok(IntentStatus::Ignored),
            _ => Err(StatusParseError(s.to_string())),
        }
    }
}

// ============================================================================
// Errors
// ============================================================================

/// Errors for intent state machine operations.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum IntentError {
    #[error("invalid transition for intent {id}: {from} -> {to}")]
    InvalidTransition {
        id: IntentId,
        from: IntentStatus,
        to: IntentStatus,
    },

    #[error("Cannot retry intent {id} in status {status}. Only FAILED or NEEDS_INPUT intents can be retried.")]
    CannotRetry { id: IntentId, status: IntentStatus },

    #[error("intent {child} cannot follow up intent {parent}: different user or same intent")]
    ParentMismatch { child: IntentId, parent: IntentId },

    #[error("intent {id} is already linked to parent {parent}")]
    AlreadyLinked { id: IntentId, parent: IntentId },
}

pub type Result<T> = std::result::Result<T, IntentError>;

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_parse() {
        for status in IntentStatus::ALL {
            let parsed: IntentStatus = status.as_str().parse().unwrap();
            assert_eq!(status, parsed);
        }
        assert_eq!(
            "needs_input".parse::<IntentStatus>().unwrap(),
            IntentStatus::NeedsInput
        );
        assert!("DONE".parse::<IntentStatus>().is_err());
    }

    #[test]
    fn test_status_serde_matches_as_str() {
        let encoded = serde_json::to_string(&IntentStatus::NeedsInput).unwrap();
        assert_eq!(encoded, "\"NEEDS_INPUT\"");
    }

    #[test]
    fn test_valid_transitions() {
        assert!(IntentStatus::Received.can_transition_to(IntentStatus::Processing));
        assert!(IntentStatus::Processing.can_transition_to(IntentStatus::Processed));
        assert!(IntentStatus::Processing.can_transition_to(IntentStatus::NeedsInput));
        assert!(IntentStatus::Processing.can_transition_to(IntentStatus::Failed));
        assert!(IntentStatus::NeedsInput.can_transition_to(IntentStatus::Received));
        assert!(IntentStatus::Failed.can_transition_to(IntentStatus::Received));
    }

    #[test]
    fn test_invalid_transitions() {
        assert!(!IntentStatus::Received.can_transition_to(IntentStatus::Processed));
        assert!(!IntentStatus::NeedsInput.can_transition_to(IntentStatus::Processing));
        assert!(!IntentStatus::Failed.can_transition_to(IntentStatus::Processing));
        for target in IntentStatus::ALL {
            assert!(!IntentStatus::Processed.can_transition_to(target));
            assert!(!IntentStatus::Ignored.can_transition_to(target));
        }
    }

    #[test]
    fn test_cannot_retry_message_names_status() {
        let err = IntentError::CannotRetry {
            id: IntentId::new(7),
            status: IntentStatus::Processed,
        };
        let message = err.to_string();
        assert!(message.contains("PROCESSED"));
        assert!(message.contains("FAILED or NEEDS_INPUT"));
    }
}
