//! # ic-goal
//!
//! Goal domain model and cadence evaluation for icommit.
//!
//! A [`Goal`] is a user's recurring commitment backed by a monetary
//! stake. Its [`RecurrenceRule`] decides on which calendar dates the
//! goal is due; the [`cadence`] module answers that question as a pure
//! function so the scheduling engine can materialize obligations
//! deterministically.
//!
//! ## Key components
//!
//! - [`Goal`] — the commitment aggregate (date range, stake, verification mode)
//! - [`RecurrenceRule`] — closed tagged enum of recurrence kinds
//! - [`cadence::is_due`] — "is this goal due on this date?"
//! - [`CompletionHistory`] — seam for the count-based variant's window query

pub mod cadence;
pub mod error;
pub mod goal;
pub mod recurrence;

pub use cadence::{is_due, week_start, CompletionHistory};
pub use error::GoalError;
pub use goal::{Goal, ProofKind, ReviewMode, VerificationMode};
pub use recurrence::RecurrenceRule;
