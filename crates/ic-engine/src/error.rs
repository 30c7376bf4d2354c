// error.rs — Error types for the scheduling/settlement engine.
//
// The taxonomy the engine's callers care about:
// - validation errors (bad payload, duplicate, late) — synchronous, never retried
// - conflict errors (already decided, self-verification, closed obligation)
// - resource errors (ledger failures) — surfaced typed, or degraded to
//   partial forfeit inside settlement
// - infrastructure errors (storage) — retried with bounded backoff by
//   the owning pass

use thiserror::Error;
use uuid::Uuid;

use ic_goal::{GoalError, ProofKind};
use ic_ledger::LedgerError;

/// Errors that can occur during engine operations.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The requested goal was not found.
    #[error("goal not found: {0}")]
    GoalNotFound(Uuid),

    /// The requested obligation was not found.
    #[error("obligation not found: {0}")]
    ObligationNotFound(Uuid),

    /// The requested submission was not found.
    #[error("submission not found: {0}")]
    SubmissionNotFound(Uuid),

    /// No wallet exists for the given user.
    #[error("wallet not found for user {0}")]
    WalletNotFound(String),

    /// The caller does not own the goal they are submitting against.
    #[error("submitter does not own this goal")]
    Forbidden,

    /// The obligation is no longer pending, so no proof can be taken.
    #[error("obligation {0} is no longer pending")]
    ObligationClosed(Uuid),

    /// The payload shape does not match the goal's verification mode.
    #[error("goal requires {required} proof, got {provided}")]
    InvalidPayloadShape {
        required: ProofKind,
        provided: ProofKind,
    },

    /// The payload content failed validation (too short, oversized caption).
    #[error("invalid proof payload: {0}")]
    InvalidPayload(String),

    /// A submission already exists for this obligation.
    #[error("a submission already exists for obligation {0}")]
    DuplicateSubmission(Uuid),

    /// The grace period for submitting proof has passed.
    #[error("submission is {days_late} days past the obligation date (grace period {grace_days})")]
    SubmissionTooLate { days_late: i64, grace_days: i64 },

    /// The submission has already been approved or rejected.
    #[error("submission {0} has already been decided")]
    AlreadyDecided(Uuid),

    /// A verifier may not approve their own proof.
    #[error("self-verification is forbidden")]
    SelfVerificationForbidden,

    /// The friend-verification token is unknown, already used, or expired.
    #[error("verification token is invalid or expired")]
    InvalidOrExpiredToken,

    /// Goal-domain failure (malformed rule, history unavailable).
    #[error(transparent)]
    Goal(#[from] GoalError),

    /// Wallet-domain failure (insufficient funds/balance).
    #[error(transparent)]
    Ledger(#[from] LedgerError),

    /// The underlying store failed.
    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    /// A file I/O operation failed (event log).
    #[error("I/O error at {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    /// A stored column could not be decoded into its domain type.
    #[error("corrupt record: {0}")]
    CorruptRecord(String),

    /// Failed to serialize/deserialize engine data.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl EngineError {
    /// Whether retrying the same call later could succeed.
    ///
    /// Only infrastructure failures qualify; validation and conflict
    /// errors are deterministic and must surface to the caller.
    pub fn is_transient(&self) -> bool {
        matches!(self, EngineError::Storage(_))
    }
}
