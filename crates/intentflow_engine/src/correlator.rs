//! Follow-up correlation.
//!
//! While a user has a `NEEDS_INPUT` intent, the next message from that user is
//! treated as the missing information, whatever it says. There is no relevance
//! check and no expiry.

use intentflow_db::IntentDb;
use intentflow_ids::{Channel, IntentId, UserId};
use intentflow_intent::{Intent, IntentStatus};
use tracing::{info, warn};

use crate::engine::ProcessingScheduler;
use crate::error::{EngineError, Result};

#[derive(Clone)]
pub struct FollowUpCorrelator {
    db: IntentDb,
    scheduler: ProcessingScheduler,
}

impl FollowUpCorrelator {
    pub fn new(db: IntentDb, scheduler: ProcessingScheduler) -> Self {
        Self { db, scheduler }
    }

    /// Fold `candidate_id` into the user's pending intent, if there is one.
    ///
    /// On `true` the parent is back in `RECEIVED` and queued for processing,
    /// and the candidate is `PROCESSED` with its parent link set. On `false`
    /// nothing was changed and the caller treats the candidate as new work.
    pub async fn try_link_as_follow_up(
        &self,
        user_id: &UserId,
        channel: &Channel,
        raw_text: &str,
        candidate_id: IntentId,
    ) -> Result<bool> {
        let Some(parent) = self.find_pending(user_id).await? else {
            return Ok(false);
        };
        if parent.id == candidate_id {
            return Ok(false);
        }

        let mut child = self
            .db
            .get_intent(candidate_id)
            .await?
            .ok_or(EngineError::NotFound(candidate_id))?;
        if child.status != IntentStatus::Received || child.followup_parent_id().is_some() {
            return Ok(false);
        }

        let mut resumed = parent.clone();
        resumed.resume_with(raw_text)?;
        child.absorb_into(&parent)?;

        let reason = resumed.status_reason.clone().unwrap_or_default();
        if !self
            .db
            .reopen(parent.id, IntentStatus::NeedsInput, &reason)
            .await?
        {
            info!(
                parent_id = %parent.id,
                candidate_id = %candidate_id,
                "Pending intent already resumed by another message"
            );
            return Ok(false);
        }

        if !self.db.absorb_follow_up(&child).await? {
            warn!(
                candidate_id = %candidate_id,
                "Follow-up changed before it could be linked; parent resumes without it"
            );
        }

        info!(
            parent_id = %parent.id,
            follow_up_id = %candidate_id,
            channel = %channel,
            "Linked follow-up, resuming pending intent"
        );
        self.scheduler.schedule(parent.id);
        Ok(true)
    }

    /// The user's most recent `NEEDS_INPUT` intent.
    pub async fn find_pending(&self, user_id: &UserId) -> Result<Option<Intent>> {
        Ok(self
            .db
            .latest_by_status(user_id, IntentStatus::NeedsInput)
            .await?)
    }

    pub async fn has_unresolved(&self, user_id: &UserId) -> Result<bool> {
        Ok(self
            .db
            .count_by_status(user_id, IntentStatus::NeedsInput)
            .await?
            > 0)
    }

    /// Fail loudly if the user holds more than one `NEEDS_INPUT` intent.
    pub async fn validate_single_pending(&self, user_id: &UserId) -> Result<()> {
        let count = self
            .db
            .count_by_status(user_id, IntentStatus::NeedsInput)
            .await?;
        if count > 1 {
            return Err(EngineError::InvariantViolation {
                user: user_id.clone(),
                count,
            });
        }
        Ok(())
    }

    /// Every user currently breaking the single-pending rule.
    pub async fn find_violations(&self) -> Result<Vec<EngineError>> {
        Ok(self
            .db
            .users_with_multiple_pending()
            .await?
            .into_iter()
            .map(|(user, count)| EngineError::InvariantViolation { user, count })
            .collect())
    }
}
