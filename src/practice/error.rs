//! Error taxonomy for the practice engine.
//!
//! Every failure leaves the session's cursors untouched: rejections happen
//! before any state write, and the collaborator call is ordered ahead of
//! the commit so a failed blanking step can simply be retried.

use thiserror::Error;
use uuid::Uuid;

use crate::blanking::BlankingError;

#[derive(Error, Debug)]
pub enum PracticeError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("answer submitted for card {got}, expected card {expected}")]
    WrongCard { expected: Uuid, got: Uuid },

    #[error("answers are not accepted during the {phase} phase")]
    PhaseViolation { phase: &'static str },

    #[error("variation service failure: {0}")]
    Upstream(#[from] BlankingError),

    /// A prior invariant was violated (dangling card id in the frozen
    /// order, missing settings row). Surfaced, never patched over.
    #[error("integrity failure: {0}")]
    Integrity(String),

    #[error("no performance data recorded for session {0}")]
    NoPerformanceData(Uuid),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, PracticeError>;
