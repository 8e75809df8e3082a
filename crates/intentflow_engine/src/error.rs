//! Error types for the pipeline.

use intentflow_db::DbError;
use intentflow_ids::{IdParseError, IntentId, UserId};
use intentflow_intent::IntentError;
use thiserror::Error;

use crate::config::ConfigError;
use crate::pool::PoolError;

pub type Result<T> = std::result::Result<T, EngineError>;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error(transparent)]
    Db(#[from] DbError),

    #[error(transparent)]
    Intent(#[from] IntentError),

    #[error("Intent not found: {0}")]
    NotFound(IntentId),

    #[error("Invariant violated: User {user} has {count} NEEDS_INPUT intents. Should have at most 1.")]
    InvariantViolation { user: UserId, count: u64 },

    #[error("Invalid input: {0}")]
    Validation(String),

    #[error(transparent)]
    Pool(#[from] PoolError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl EngineError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }
}

impl From<IdParseError> for EngineError {
    fn from(err: IdParseError) -> Self {
        Self::Validation(err.to_string())
    }
}
