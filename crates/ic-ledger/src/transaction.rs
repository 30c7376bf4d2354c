// transaction.rs — WalletTransaction: the append-only audit record.
//
// Every balance mutation is paired with exactly one transaction row,
// written in the same database transaction as the mutation itself.
// The `reference` string is unique and doubles as the idempotency key
// for external payment-gateway callbacks: confirming the same deposit
// reference twice credits the wallet once.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use rust_decimal::Decimal;
use uuid::Uuid;

/// What kind of movement a transaction records.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TransactionType {
    /// External funds entering the wallet (gateway deposit).
    Deposit,
    /// Available balance moved into the staked reserve.
    Stake,
    /// Staked funds released back to the available balance.
    Unstake,
    /// Staked funds forfeited for a missed obligation.
    Penalty,
    /// Funds granted by the platform (streaks, promotions).
    Reward,
}

impl fmt::Display for TransactionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransactionType::Deposit => write!(f, "deposit"),
            TransactionType::Stake => write!(f, "stake"),
            TransactionType::Unstake => write!(f, "unstake"),
            TransactionType::Penalty => write!(f, "penalty"),
            TransactionType::Reward => write!(f, "reward"),
        }
    }
}

/// Transaction lifecycle. Deposits start Pending until the gateway
/// confirms; internal movements (stake, penalty) are written as
/// Success together with the balance change they audit.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    Pending,
    Success,
    Failed,
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransactionStatus::Pending => write!(f, "pending"),
            TransactionStatus::Success => write!(f, "success"),
            TransactionStatus::Failed => write!(f, "failed"),
        }
    }
}

/// One audit record. Append-only: rows are never updated except for a
/// Pending deposit resolving to Success or Failed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalletTransaction {
    /// Unique identifier for this transaction.
    pub id: Uuid,

    /// The wallet (user) this transaction belongs to.
    pub user_id: String,

    /// Unique reference string — idempotency key for gateway callbacks.
    pub reference: String,

    /// Amount moved. Always positive; direction is carried by `kind`.
    pub amount: Decimal,

    /// What kind of movement this is.
    pub kind: TransactionType,

    /// Lifecycle status.
    pub status: TransactionStatus,

    /// When the record was written.
    pub created_at: DateTime<Utc>,
}

impl WalletTransaction {
    /// A new transaction with a fresh id and reference.
    pub fn new(
        user_id: impl Into<String>,
        amount: Decimal,
        kind: TransactionType,
        status: TransactionStatus,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id: user_id.into(),
            reference: Uuid::new_v4().to_string(),
            amount,
            kind,
            status,
            created_at: Utc::now(),
        }
    }

    /// A new transaction carrying an externally-supplied reference
    /// (deposit initialization, where the gateway echoes it back).
    pub fn with_reference(
        user_id: impl Into<String>,
        reference: impl Into<String>,
        amount: Decimal,
        kind: TransactionType,
        status: TransactionStatus,
    ) -> Self {
        Self {
            reference: reference.into(),
            ..Self::new(user_id, amount, kind, status)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_transaction_gets_unique_reference() {
        let a = WalletTransaction::new(
            "user-1",
            Decimal::from(10),
            TransactionType::Stake,
            TransactionStatus::Success,
        );
        let b = WalletTransaction::new(
            "user-1",
            Decimal::from(10),
            TransactionType::Stake,
            TransactionStatus::Success,
        );
        assert_ne!(a.reference, b.reference);
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn with_reference_keeps_supplied_key() {
        let tx = WalletTransaction::with_reference(
            "user-1",
            "gw-abc-123",
            Decimal::from(25),
            TransactionType::Deposit,
            TransactionStatus::Pending,
        );
        assert_eq!(tx.reference, "gw-abc-123");
        assert_eq!(tx.kind, TransactionType::Deposit);
        assert_eq!(tx.status, TransactionStatus::Pending);
    }

    #[test]
    fn serialization_uses_snake_case_tags() {
        let tx = WalletTransaction::new(
            "user-1",
            Decimal::from(10),
            TransactionType::Penalty,
            TransactionStatus::Success,
        );
        let json = serde_json::to_string(&tx).unwrap();
        assert!(json.contains("\"penalty\""));
        assert!(json.contains("\"success\""));
    }

    #[test]
    fn type_and_status_display() {
        assert_eq!(TransactionType::Penalty.to_string(), "penalty");
        assert_eq!(TransactionStatus::Pending.to_string(), "pending");
    }
}
