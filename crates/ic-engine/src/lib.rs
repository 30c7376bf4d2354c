//! # ic-engine
//!
//! The scheduling and settlement core of icommit.
//!
//! Data flow: the [`materializer`] walks each active goal's date range
//! and creates one pending [`Obligation`] per due date, exactly once
//! per (goal, date) pair. Users submit proof against a pending
//! obligation; [`reconcile`] verifies it (heuristic score or human
//! decision) and transitions the obligation to completed or missed.
//! The daily [`sweep`] finalizes overdue pending obligations as
//! missed. Missed obligations flow into [`settle`], which forfeits the
//! stake from the user's staked balance exactly once, atomically with
//! its ledger record, retrying transient failures with bounded
//! backoff.
//!
//! Everything durable lives in the SQLite-backed [`EngineStore`]; its
//! unique constraints and conditional updates carry the engine's
//! idempotency guarantees.

pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod materializer;
pub mod obligation;
pub mod reconcile;
pub mod settle;
pub mod settlement;
pub mod store;
pub mod submission;
pub mod sweep;
pub mod token;
pub mod verify;

pub use config::EngineConfig;
pub use engine::Engine;
pub use error::EngineError;
pub use events::{EngineEvent, EventDispatcher, LogSink, NotificationSink};
pub use materializer::MaterializeOutcome;
pub use obligation::{Obligation, ObligationStatus};
pub use reconcile::{SubmitReceipt, TokenReview};
pub use settle::SettleOutcome;
pub use settlement::{Settlement, SettlementStatus};
pub use store::{EngineStore, ForfeitOutcome};
pub use sweep::SweepOutcome;
pub use submission::{ProofPayload, ProofSubmission, SubmissionStatus};
pub use token::VerificationToken;
pub use verify::{HeuristicVerifier, Verdict, Verifier};
