// error.rs — Error types for the goal domain.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use thiserror::Error;

/// Errors that can occur validating or evaluating goals.
#[derive(Debug, Error)]
pub enum GoalError {
    /// The goal's end date precedes its start date.
    #[error("end date {end} precedes start date {start}")]
    EndBeforeStart { start: NaiveDate, end: NaiveDate },

    /// Stake amounts are money reserved against the goal and cannot be negative.
    #[error("stake amount must not be negative: {0}")]
    NegativeStake(Decimal),

    /// The recurrence rule is missing a field its kind requires.
    #[error("malformed recurrence rule: {0}")]
    MalformedRule(String),

    /// Friend proof is confirmed by a designated person; automated
    /// review cannot score it.
    #[error("friend proof requires human review")]
    FriendRequiresHumanReview,

    /// The completion-history backend failed while answering a
    /// count-based window query.
    #[error("completion history unavailable: {0}")]
    HistoryUnavailable(String),
}
