// goal.rs — Goal: a user's staked commitment.
//
// A Goal ties together an owner, an active date range, a recurrence
// rule, a stake amount, and a verification mode. The scheduling engine
// materializes one obligation per due date; the goal itself never
// tracks per-date state.
//
// Lifecycle: created by the user; soft-deactivated (is_active = false)
// manually or by the daily sweep once the end date has passed; hard
// deletion cascades to obligations and only happens on explicit user
// request.

use std::fmt;

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::GoalError;
use crate::recurrence::RecurrenceRule;

/// What shape of proof the goal accepts.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ProofKind {
    /// A written account of the completion.
    Text,
    /// A photo reference (storage is an external collaborator).
    Photo,
    /// A video reference plus duration.
    Video,
    /// Confirmation by a designated person.
    Friend,
}

impl fmt::Display for ProofKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProofKind::Text => write!(f, "text"),
            ProofKind::Photo => write!(f, "photo"),
            ProofKind::Video => write!(f, "video"),
            ProofKind::Friend => write!(f, "friend"),
        }
    }
}

/// Who decides whether submitted proof is acceptable.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ReviewMode {
    /// A scoring heuristic (or external classifier) decides, with
    /// mid-range scores escalated to a human.
    Automated,
    /// A human verifier decides every submission.
    Human,
}

/// The goal's configured verification mode: proof shape × reviewer.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct VerificationMode {
    pub proof: ProofKind,
    pub review: ReviewMode,
}

/// A Goal — one staked commitment with a recurrence rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Goal {
    /// Unique identifier for this goal.
    pub id: Uuid,

    /// The owning user. Identity is managed by an external system;
    /// the engine only ever compares ids.
    pub owner_id: String,

    /// Human-readable title (e.g., "Run 5k").
    pub title: String,

    /// Longer description of the commitment.
    #[serde(default)]
    pub description: String,

    /// First date the goal can be due.
    pub start_date: NaiveDate,

    /// Last date the goal can be due. `None` means open-ended.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_date: Option<NaiveDate>,

    /// When the goal is due.
    pub recurrence: RecurrenceRule,

    /// Money reserved against each obligation, forfeited on a miss.
    /// Snapshotted onto obligations at materialization time.
    pub stake_amount: Decimal,

    /// How completion is proven and who verifies it.
    pub verification: VerificationMode,

    /// Preferred time of day, informational only — scheduling is
    /// per-date, not per-time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_of_day: Option<NaiveTime>,

    /// Expected session length in minutes, informational only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_minutes: Option<u32>,

    /// Soft-deactivation flag. Inactive goals are never due.
    pub is_active: bool,

    /// Set together with `is_active = false` when the end date passes.
    pub is_completed: bool,

    /// When this goal was created.
    pub created_at: DateTime<Utc>,

    /// When this goal was last updated.
    pub updated_at: DateTime<Utc>,
}

impl Goal {
    /// Create a new active goal. Call [`Goal::validate`] before
    /// persisting it.
    pub fn new(
        owner_id: impl Into<String>,
        title: impl Into<String>,
        start_date: NaiveDate,
        recurrence: RecurrenceRule,
        stake_amount: Decimal,
        verification: VerificationMode,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            owner_id: owner_id.into(),
            title: title.into(),
            description: String::new(),
            start_date,
            end_date: None,
            recurrence,
            stake_amount,
            verification,
            time_of_day: None,
            duration_minutes: None,
            is_active: true,
            is_completed: false,
            created_at: now,
            updated_at: now,
        }
    }

    /// Check the goal's invariants: date range ordering, non-negative
    /// stake, rule-specific fields, and a reviewable verification mode.
    pub fn validate(&self) -> Result<(), GoalError> {
        if let Some(end) = self.end_date {
            if end < self.start_date {
                return Err(GoalError::EndBeforeStart {
                    start: self.start_date,
                    end,
                });
            }
        }
        if self.stake_amount < Decimal::ZERO {
            return Err(GoalError::NegativeStake(self.stake_amount));
        }
        self.recurrence.validate()?;
        if self.verification.proof == ProofKind::Friend
            && self.verification.review == ReviewMode::Automated
        {
            return Err(GoalError::FriendRequiresHumanReview);
        }
        Ok(())
    }

    /// Whether `date` falls within the goal's active range.
    pub fn in_range(&self, date: NaiveDate) -> bool {
        date >= self.start_date && self.end_date.is_none_or(|end| date <= end)
    }

    /// Whether the scheduler should consider this goal at all.
    pub fn is_schedulable(&self) -> bool {
        self.is_active && !self.is_completed
    }

    /// Close the goal out once its end date has passed.
    pub fn expire(&mut self) {
        self.is_active = false;
        self.is_completed = true;
        self.updated_at = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn test_goal() -> Goal {
        Goal::new(
            "user-1",
            "Run 5k",
            date(2025, 10, 1),
            RecurrenceRule::Daily,
            Decimal::from(10),
            VerificationMode {
                proof: ProofKind::Text,
                review: ReviewMode::Automated,
            },
        )
    }

    #[test]
    fn new_goal_is_active_and_valid() {
        let goal = test_goal();
        assert!(goal.is_active);
        assert!(!goal.is_completed);
        assert!(goal.is_schedulable());
        goal.validate().unwrap();
    }

    #[test]
    fn end_before_start_is_rejected() {
        let mut goal = test_goal();
        goal.end_date = Some(date(2025, 9, 1));
        assert!(matches!(
            goal.validate(),
            Err(GoalError::EndBeforeStart { .. })
        ));
    }

    #[test]
    fn end_equal_to_start_is_allowed() {
        let mut goal = test_goal();
        goal.end_date = Some(goal.start_date);
        goal.validate().unwrap();
    }

    #[test]
    fn negative_stake_is_rejected() {
        let mut goal = test_goal();
        goal.stake_amount = Decimal::from(-1);
        assert!(matches!(goal.validate(), Err(GoalError::NegativeStake(_))));
    }

    #[test]
    fn friend_proof_with_automated_review_is_rejected() {
        let mut goal = test_goal();
        goal.verification = VerificationMode {
            proof: ProofKind::Friend,
            review: ReviewMode::Automated,
        };
        assert!(matches!(
            goal.validate(),
            Err(GoalError::FriendRequiresHumanReview)
        ));
    }

    #[test]
    fn in_range_respects_bounds() {
        let mut goal = test_goal();
        goal.end_date = Some(date(2025, 10, 10));
        assert!(!goal.in_range(date(2025, 9, 30)));
        assert!(goal.in_range(date(2025, 10, 1)));
        assert!(goal.in_range(date(2025, 10, 10)));
        assert!(!goal.in_range(date(2025, 10, 11)));
    }

    #[test]
    fn open_ended_goal_has_no_upper_bound() {
        let goal = test_goal();
        assert!(goal.in_range(date(2030, 1, 1)));
    }

    #[test]
    fn expire_closes_the_goal() {
        let mut goal = test_goal();
        goal.expire();
        assert!(!goal.is_active);
        assert!(goal.is_completed);
        assert!(!goal.is_schedulable());
    }

    #[test]
    fn serialization_round_trip() {
        let goal = test_goal();
        let json = serde_json::to_string_pretty(&goal).unwrap();
        let restored: Goal = serde_json::from_str(&json).unwrap();
        assert_eq!(goal.id, restored.id);
        assert_eq!(goal.recurrence, restored.recurrence);
        assert_eq!(goal.stake_amount, restored.stake_amount);
    }
}
