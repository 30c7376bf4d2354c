// obligation.rs — Obligation: one scheduled instance of a goal.
//
// The materializer creates exactly one obligation per (goal, date)
// pair — a unique constraint in the store enforces it. From pending,
// reconciliation moves an obligation to completed or missed; the daily
// sweep moves overdue pending obligations to missed. Users never
// mutate obligations directly.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use ic_goal::Goal;

/// The lifecycle state of an obligation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ObligationStatus {
    /// Awaiting proof (or the sweep).
    Pending,
    /// Proof accepted.
    Completed,
    /// No accepted proof by the deadline — stake forfeited.
    Missed,
    /// Administratively waived; never swept, never settled.
    Excused,
}

impl ObligationStatus {
    /// Stable string form used in the store and in logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            ObligationStatus::Pending => "pending",
            ObligationStatus::Completed => "completed",
            ObligationStatus::Missed => "missed",
            ObligationStatus::Excused => "excused",
        }
    }

    /// Valid transitions: pending is the only mutable state.
    pub fn can_transition_to(&self, next: ObligationStatus) -> bool {
        matches!(
            (self, next),
            (
                ObligationStatus::Pending,
                ObligationStatus::Completed
                    | ObligationStatus::Missed
                    | ObligationStatus::Excused
            )
        )
    }
}

impl fmt::Display for ObligationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ObligationStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(ObligationStatus::Pending),
            "completed" => Ok(ObligationStatus::Completed),
            "missed" => Ok(ObligationStatus::Missed),
            "excused" => Ok(ObligationStatus::Excused),
            other => Err(format!("unknown obligation status: {other}")),
        }
    }
}

/// One scheduled instance of a goal on a specific date.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Obligation {
    /// Unique identifier for this obligation.
    pub id: Uuid,

    /// The goal this obligation belongs to.
    pub goal_id: Uuid,

    /// The calendar date the goal is due.
    pub date: NaiveDate,

    /// Current lifecycle state.
    pub status: ObligationStatus,

    /// Stake copied from the goal at materialization time. Later goal
    /// edits never change what an existing obligation is worth.
    pub stake_snapshot: Decimal,

    /// Set once settlement has forfeited the stake — the idempotency
    /// guard against double settlement.
    pub penalty_applied: bool,

    /// When the obligation was completed, if it was.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,

    /// Free-form operator notes.
    #[serde(default)]
    pub notes: String,

    /// When the obligation was materialized.
    pub created_at: DateTime<Utc>,
}

impl Obligation {
    /// Materialize a pending obligation for `goal` on `date`,
    /// snapshotting the current stake amount.
    pub fn new(goal: &Goal, date: NaiveDate) -> Self {
        Self {
            id: Uuid::new_v4(),
            goal_id: goal.id,
            date,
            status: ObligationStatus::Pending,
            stake_snapshot: goal.stake_amount,
            penalty_applied: false,
            completed_at: None,
            notes: String::new(),
            created_at: Utc::now(),
        }
    }
}
