// cadence.rs — the Cadence Evaluator: "is this goal due on this date?"
//
// Pure over its inputs. The only variant that needs anything beyond
// the goal and the date is CountBased, which consults already-recorded
// completions through the CompletionHistory seam — the evaluator never
// performs I/O itself.
//
// Active/completed filtering is deliberately the caller's job: the
// evaluator answers a calendar question, not a lifecycle one.

use chrono::{Datelike, Days, NaiveDate};
use uuid::Uuid;

use crate::error::GoalError;
use crate::goal::Goal;
use crate::recurrence::RecurrenceRule;

/// Read access to a goal's completed obligations, used by the
/// count-based variant's window query. Implemented by the engine
/// store; tests supply an in-memory stand-in.
pub trait CompletionHistory {
    /// Number of obligations for `goal_id` completed with dates in
    /// `[from, to]` inclusive.
    fn completed_count(
        &self,
        goal_id: Uuid,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<u32, GoalError>;
}

/// The Monday of the calendar week containing `date`.
pub fn week_start(date: NaiveDate) -> NaiveDate {
    let back = u64::from(date.weekday().num_days_from_monday());
    date - Days::new(back)
}

/// Decide whether `goal` is due on `date`.
///
/// A date outside the goal's `[start, end]` range is never due,
/// regardless of rule. For `CountBased`, the goal stays due until
/// `target_count` obligations are completed within the Monday-start
/// week containing `date` (counting through `date`, inclusive) — so
/// the answer must be computed against post-reconciliation state.
pub fn is_due<H>(goal: &Goal, date: NaiveDate, history: &H) -> Result<bool, GoalError>
where
    H: CompletionHistory + ?Sized,
{
    if !goal.in_range(date) {
        return Ok(false);
    }

    match &goal.recurrence {
        RecurrenceRule::Daily => Ok(true),
        RecurrenceRule::Weekly { weekdays } => Ok(weekdays.contains(&date.weekday())),
        RecurrenceRule::SpecificDates { dates } => Ok(dates.contains(&date)),
        RecurrenceRule::CountBased { target_count } => {
            let completed = history.completed_count(goal.id, week_start(date), date)?;
            Ok(completed < *target_count)
        }
    }
}
