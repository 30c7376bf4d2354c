// settlement.rs — Settlement: the financial record of a forfeiture.
//
// At most one settlement exists per missed obligation (unique
// constraint). The obligation's penalty_applied flag is the
// idempotency guard for the money itself; the settlement row tracks
// the attempt lifecycle — including the bounded retry schedule after
// partial forfeits and transient failures.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Retry cap for transient settlement failures. Unbounded retry is
/// disallowed — it would live-lock against a permanently-insufficient
/// wallet.
pub const MAX_SETTLEMENT_ATTEMPTS: u32 = 5;

/// Delay before re-driving a partial forfeit (staked balance may be
/// topped up in the meantime).
pub const SHORTFALL_RETRY_DELAY_HOURS: i64 = 24;

/// The lifecycle state of a settlement.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SettlementStatus {
    /// Created, not yet attempted.
    Pending,
    /// An attempt is in flight — the single-writer gate.
    Processing,
    /// The full stake was forfeited and recorded.
    Completed,
    /// The attempt failed (shortfall or transient error). Retryable
    /// until the attempt cap, then terminal.
    Failed,
    /// Administratively reversed; out of scope for the engine.
    Refunded,
}

impl SettlementStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SettlementStatus::Pending => "pending",
            SettlementStatus::Processing => "processing",
            SettlementStatus::Completed => "completed",
            SettlementStatus::Failed => "failed",
            SettlementStatus::Refunded => "refunded",
        }
    }
}

impl fmt::Display for SettlementStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SettlementStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(SettlementStatus::Pending),
            "processing" => Ok(SettlementStatus::Processing),
            "completed" => Ok(SettlementStatus::Completed),
            "failed" => Ok(SettlementStatus::Failed),
            "refunded" => Ok(SettlementStatus::Refunded),
            other => Err(format!("unknown settlement status: {other}")),
        }
    }
}

/// The settlement record for one missed obligation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settlement {
    /// Unique identifier for this settlement.
    pub id: Uuid,

    /// The missed obligation being settled (one-to-one).
    pub obligation_id: Uuid,

    /// The amount to forfeit — the obligation's stake snapshot.
    pub amount: Decimal,

    /// How much has been collected across attempts so far. A partial
    /// forfeit records its take here; retries only pursue the
    /// remainder, so the lifetime total never exceeds `amount`.
    #[serde(default)]
    pub amount_collected: Decimal,

    /// Current lifecycle state.
    pub status: SettlementStatus,

    /// When the settlement completed, if it did.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processed_at: Option<DateTime<Utc>>,

    /// How many attempts have failed so far.
    pub retry_count: u32,

    /// Earliest time the next attempt may run.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_retry_at: Option<DateTime<Utc>>,

    /// Failure context for out-of-band resolution.
    #[serde(default)]
    pub notes: String,

    /// When the settlement record was created.
    pub created_at: DateTime<Utc>,
}

impl Settlement {
    /// A fresh pending settlement for a missed obligation.
    pub fn new(obligation_id: Uuid, amount: Decimal) -> Self {
        Self {
            id: Uuid::new_v4(),
            obligation_id,
            amount,
            amount_collected: Decimal::ZERO,
            status: SettlementStatus::Pending,
            processed_at: None,
            retry_count: 0,
            next_retry_at: None,
            notes: String::new(),
            created_at: Utc::now(),
        }
    }

    /// What is still owed: the stake snapshot minus everything
    /// collected by earlier attempts.
    pub fn outstanding(&self) -> Decimal {
        (self.amount - self.amount_collected).max(Decimal::ZERO)
    }

    /// Whether an attempt may run now.
    ///
    /// Pending settlements run immediately. Failed ones run once their
    /// scheduled retry time arrives, while attempts remain. Completed,
    /// refunded, and in-flight settlements never re-run.
    pub fn is_attemptable(&self, now: DateTime<Utc>) -> bool {
        match self.status {
            SettlementStatus::Pending => true,
            SettlementStatus::Failed => {
                self.retry_count < MAX_SETTLEMENT_ATTEMPTS
                    && self.next_retry_at.is_none_or(|at| at <= now)
            }
            SettlementStatus::Processing
            | SettlementStatus::Completed
            | SettlementStatus::Refunded => false,
        }
    }

    /// Whether retries are exhausted — terminal failure, surfaced for
    /// manual resolution.
    pub fn is_exhausted(&self) -> bool {
        self.status == SettlementStatus::Failed && self.retry_count >= MAX_SETTLEMENT_ATTEMPTS
    }
}

/// Backoff before retrying after the `attempt`-th transient failure
/// (1-based): 60s, 120s, 240s, ... doubling per attempt.
pub fn transient_backoff(attempt: u32) -> Duration {
    let exp = attempt.saturating_sub(1).min(10);
    Duration::seconds(60 * (1i64 << exp))
}
