// sweep.rs — the daily pass that closes out what the user did not do.
//
// Two jobs, both idempotent. First, every pending obligation whose
// date has passed with no submission at all becomes missed and goes
// to settlement; obligations with an undecided submission are left
// for their reviewer, and count-based obligations whose week already
// met its target are excused rather than penalized. Second, goals
// whose end date has passed are deactivated. Re-running the sweep
// flips nothing twice: the missed/excused transition is gated on
// pending and goal expiry on is_active.

use chrono::{DateTime, Duration, NaiveDate, Utc};
use tracing::{debug, info, warn};

use ic_goal::{week_start, CompletionHistory, Goal, RecurrenceRule};

use crate::engine::Engine;
use crate::error::EngineError;
use crate::events::EngineEvent;
use crate::obligation::ObligationStatus;

/// What a sweep pass did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SweepOutcome {
    /// Obligations transitioned to missed.
    pub missed: usize,
    /// Count-based obligations excused because their week's target
    /// was already met.
    pub excused: usize,
    /// Settlements that completed in full during this pass.
    pub settled: usize,
    /// Goals closed out because their end date passed.
    pub goals_expired: usize,
    /// Obligations whose settlement attempt errored (they stay on the
    /// retry schedule).
    pub failures: usize,
}

impl Engine {
    /// Run the daily sweep as of the given date. `as_of` is exclusive:
    /// an obligation due yesterday is overdue today, one due today is
    /// not.
    pub fn sweep(
        &mut self,
        as_of: NaiveDate,
        now: DateTime<Utc>,
    ) -> Result<SweepOutcome, EngineError> {
        let mut outcome = SweepOutcome::default();

        for ob in self.store.overdue_pending(as_of)? {
            let Some(goal) = self.store.goal(ob.goal_id)? else {
                warn!(obligation_id = %ob.id, "obligation without goal");
                continue;
            };

            // A count-based user who hit the week's target owes
            // nothing for the week's other pending days.
            if self.weekly_target_met(&goal, ob.date)? {
                if self
                    .store
                    .transition_obligation(ob.id, ObligationStatus::Excused, now)?
                {
                    debug!(obligation_id = %ob.id, "excused: weekly target met");
                    outcome.excused += 1;
                }
                continue;
            }

            if !self
                .store
                .transition_obligation(ob.id, ObligationStatus::Missed, now)?
            {
                continue;
            }
            outcome.missed += 1;

            self.dispatch(&EngineEvent::ObligationMissed {
                user_id: goal.owner_id.clone(),
                goal_title: goal.title.clone(),
                date: ob.date,
                timestamp: now,
            });

            match self.settle(ob.id, now) {
                Ok(result) if result.is_settled() => outcome.settled += 1,
                Ok(_) => {}
                Err(e) => {
                    warn!(obligation_id = %ob.id, "settlement failed during sweep: {e}");
                    outcome.failures += 1;
                }
            }
        }

        for goal in self.store.expire_goals(as_of, now)? {
            outcome.goals_expired += 1;
            self.dispatch(&EngineEvent::GoalExpired {
                user_id: goal.owner_id,
                goal_title: goal.title,
                timestamp: now,
            });
        }

        if outcome.missed > 0 || outcome.excused > 0 || outcome.goals_expired > 0 {
            info!(
                missed = outcome.missed,
                excused = outcome.excused,
                settled = outcome.settled,
                goals_expired = outcome.goals_expired,
                "sweep pass done"
            );
        }
        Ok(outcome)
    }

    /// Whether a count-based goal's target was reached in the week
    /// containing `date`. Always false for other recurrence kinds.
    fn weekly_target_met(&self, goal: &Goal, date: NaiveDate) -> Result<bool, EngineError> {
        let RecurrenceRule::CountBased { target_count } = &goal.recurrence else {
            return Ok(false);
        };
        let start = week_start(date);
        let end = start + Duration::days(6);
        let completed = self.store.completed_count(goal.id, start, end)?;
        Ok(completed >= *target_count)
    }
}
