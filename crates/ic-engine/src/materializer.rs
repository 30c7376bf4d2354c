// materializer.rs — turn due dates into obligation rows.
//
// The materialization pass walks every schedulable goal and writes an
// obligation for each due date from today through the horizon. The
// pass is idempotent end to end: the cadence evaluation is pure and
// the store's create-if-absent insert swallows dates that already
// have a row, so re-running after a crash (or concurrently) produces
// no duplicates and flips no existing state.

use chrono::{Days, NaiveDate};
use tracing::{debug, warn};

use ic_goal::{is_due, Goal, RecurrenceRule};

use crate::engine::Engine;
use crate::error::EngineError;
use crate::obligation::Obligation;

/// What a materialization pass did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MaterializeOutcome {
    /// Goals the pass looked at.
    pub goals_processed: usize,
    /// New obligation rows written.
    pub created: usize,
    /// Goals skipped because their evaluation or insert failed.
    pub failures: usize,
}

impl Engine {
    /// Materialize obligations for all schedulable goals, from `today`
    /// through `today + horizon_days`. A failure on one goal is logged
    /// and counted; the pass carries on with the rest.
    pub fn materialize(&mut self, today: NaiveDate) -> Result<MaterializeOutcome, EngineError> {
        let through = today
            .checked_add_days(Days::new(self.config.horizon_days))
            .unwrap_or(NaiveDate::MAX);
        let goals = self.store.schedulable_goals()?;

        let mut outcome = MaterializeOutcome {
            goals_processed: goals.len(),
            ..Default::default()
        };
        for goal in &goals {
            match self.materialize_goal(goal, today, through) {
                Ok(created) => {
                    if created > 0 {
                        debug!(goal_id = %goal.id, created, "materialized obligations");
                    }
                    outcome.created += created;
                }
                Err(e) => {
                    warn!(goal_id = %goal.id, "materialization failed: {e}");
                    outcome.failures += 1;
                }
            }
        }
        Ok(outcome)
    }

    /// Materialize one goal's obligations over `[today, through]`,
    /// clamped to the goal's own date range. Returns how many rows
    /// were newly written.
    pub fn materialize_goal(
        &self,
        goal: &Goal,
        today: NaiveDate,
        through: NaiveDate,
    ) -> Result<usize, EngineError> {
        if !goal.is_schedulable() {
            return Ok(0);
        }

        let from = goal.start_date.max(today);
        let mut to = match goal.end_date {
            Some(end) => through.min(end),
            None => through,
        };
        // A count-window answer is only knowable on the day itself:
        // today's `is_due` would stamp the whole horizon even though
        // one completion later this week may satisfy the target. So
        // count-based goals materialize one day at a time.
        if matches!(goal.recurrence, RecurrenceRule::CountBased { .. }) {
            to = to.min(today);
        }

        let mut created = 0;
        let mut day = from;
        while day <= to {
            if is_due(goal, day, &self.store)? {
                let ob = Obligation::new(goal, day);
                if self.store.insert_obligation_if_absent(&ob)? {
                    created += 1;
                }
            }
            match day.succ_opt() {
                Some(next) => day = next,
                None => break,
            }
        }
        Ok(created)
    }
}
