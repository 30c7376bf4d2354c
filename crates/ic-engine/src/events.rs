// events.rs — Engine events and notification dispatch.
//
// The engine emits events at the moments users (and verifiers) care
// about: proof escalated, obligation missed, stake forfeited.
// Notification sinks subscribe to these events; delivery transport
// (email, WhatsApp) is an external collaborator behind the sink trait.
//
// Dispatch is fire-and-forget: a failing sink is logged and never
// blocks reconciliation or settlement.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::EngineError;

/// Events emitted by the engine at key lifecycle points.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum EngineEvent {
    /// Proof was accepted and the obligation completed.
    ObligationCompleted {
        user_id: String,
        goal_title: String,
        date: NaiveDate,
        timestamp: DateTime<Utc>,
    },

    /// The obligation was missed (rejection or sweep).
    ObligationMissed {
        user_id: String,
        goal_title: String,
        date: NaiveDate,
        timestamp: DateTime<Utc>,
    },

    /// A submission was escalated to human review.
    ProofUnderReview {
        user_id: String,
        submission_id: Uuid,
        timestamp: DateTime<Utc>,
    },

    /// A designated verifier should be asked to decide. The cleartext
    /// token is a bearer secret and stays with the submission caller;
    /// only its digest rides through sinks and logs.
    VerificationRequested {
        verifier_id: String,
        submission_id: Uuid,
        token_digest: String,
        timestamp: DateTime<Utc>,
    },

    /// The full stake was forfeited for a missed obligation.
    StakeForfeited {
        user_id: String,
        goal_title: String,
        date: NaiveDate,
        amount: Decimal,
        timestamp: DateTime<Utc>,
    },

    /// The staked balance could not cover the full stake; only part
    /// was forfeited and the settlement will retry.
    StakeShortfall {
        user_id: String,
        goal_title: String,
        date: NaiveDate,
        requested: Decimal,
        forfeited: Decimal,
        timestamp: DateTime<Utc>,
    },

    /// A settlement exhausted its retries and needs manual attention.
    SettlementFailed {
        user_id: String,
        obligation_id: Uuid,
        retry_count: u32,
        timestamp: DateTime<Utc>,
    },

    /// A goal reached its end date and was closed out by the sweep.
    GoalExpired {
        user_id: String,
        goal_title: String,
        timestamp: DateTime<Utc>,
    },
}

impl EngineEvent {
    /// Get the event type name as a string.
    pub fn event_type(&self) -> &'static str {
        match self {
            EngineEvent::ObligationCompleted { .. } => "obligation_completed",
            EngineEvent::ObligationMissed { .. } => "obligation_missed",
            EngineEvent::ProofUnderReview { .. } => "proof_under_review",
            EngineEvent::VerificationRequested { .. } => "verification_requested",
            EngineEvent::StakeForfeited { .. } => "stake_forfeited",
            EngineEvent::StakeShortfall { .. } => "stake_shortfall",
            EngineEvent::SettlementFailed { .. } => "settlement_failed",
            EngineEvent::GoalExpired { .. } => "goal_expired",
        }
    }
}

/// Trait for receiving engine events.
///
/// Implementations decide what to do with each event: append to a
/// file, call a webhook, hand off to a messaging provider.
pub trait NotificationSink: Send {
    /// Handle an event. Errors are logged but don't stop the engine.
    fn send(&self, event: &EngineEvent) -> Result<(), EngineError>;
}

/// Logs events as JSONL to a file (always-on sink).
pub struct LogSink {
    path: PathBuf,
}

impl LogSink {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }
}

impl NotificationSink for LogSink {
    fn send(&self, event: &EngineEvent) -> Result<(), EngineError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|source| EngineError::Io {
                path: parent.display().to_string(),
                source,
            })?;
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|source| EngineError::Io {
                path: self.path.display().to_string(),
                source,
            })?;

        let json = serde_json::to_string(event)?;
        writeln!(file, "{}", json).map_err(|source| EngineError::Io {
            path: self.path.display().to_string(),
            source,
        })?;

        Ok(())
    }
}

/// Dispatches events to multiple sinks.
///
/// Errors from individual sinks are logged (via tracing) but don't
/// prevent other sinks from receiving the event.
#[derive(Default)]
pub struct EventDispatcher {
    sinks: Vec<Box<dyn NotificationSink>>,
}

impl EventDispatcher {
    /// Create a new dispatcher with no sinks.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a notification sink.
    pub fn add_sink(&mut self, sink: Box<dyn NotificationSink>) {
        self.sinks.push(sink);
    }

    /// Dispatch an event to all sinks.
    pub fn dispatch(&self, event: &EngineEvent) {
        for sink in &self.sinks {
            if let Err(e) = sink.send(event) {
                tracing::warn!(
                    event_type = event.event_type(),
                    "notification sink error: {e}"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn missed_event() -> EngineEvent {
        EngineEvent::ObligationMissed {
            user_id: "user-1".to_string(),
            goal_title: "Run 5k".to_string(),
            date: NaiveDate::from_ymd_opt(2025, 10, 2).unwrap(),
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn event_serialization_round_trip() {
        let event = missed_event();
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"obligation_missed\""));
        let restored: EngineEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(event.event_type(), restored.event_type());
    }

    #[test]
    fn log_sink_appends_to_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("events.jsonl");
        let sink = LogSink::new(&path);

        sink.send(&missed_event()).unwrap();
        sink.send(&missed_event()).unwrap();

        let content = fs::read_to_string(&path).unwrap();
        assert_eq!(content.lines().count(), 2);
    }

    #[test]
    fn dispatcher_sends_to_all_sinks() {
        let dir = tempdir().unwrap();
        let path1 = dir.path().join("sink1.jsonl");
        let path2 = dir.path().join("sink2.jsonl");

        let mut dispatcher = EventDispatcher::new();
        dispatcher.add_sink(Box::new(LogSink::new(&path1)));
        dispatcher.add_sink(Box::new(LogSink::new(&path2)));

        dispatcher.dispatch(&missed_event());

        assert!(fs::read_to_string(&path1).unwrap().contains("obligation_missed"));
        assert!(fs::read_to_string(&path2).unwrap().contains("obligation_missed"));
    }

    #[test]
    fn shortfall_event_carries_both_amounts() {
        let event = EngineEvent::StakeShortfall {
            user_id: "user-1".to_string(),
            goal_title: "Run 5k".to_string(),
            date: NaiveDate::from_ymd_opt(2025, 10, 2).unwrap(),
            requested: Decimal::from(10),
            forfeited: Decimal::from(5),
            timestamp: Utc::now(),
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"stake_shortfall\""));
        assert!(json.contains("\"requested\""));
        assert!(json.contains("\"forfeited\""));
    }
}
