// error.rs — Error types for wallet operations.

use rust_decimal::Decimal;
use thiserror::Error;

/// Errors that can occur mutating a wallet.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum LedgerError {
    /// Debit requested more than the available balance.
    #[error("insufficient funds: requested {requested}, available {available}")]
    InsufficientFunds {
        requested: Decimal,
        available: Decimal,
    },

    /// Stake requested more than the available balance.
    #[error("insufficient balance to stake: requested {requested}, available {available}")]
    InsufficientBalance {
        requested: Decimal,
        available: Decimal,
    },

    /// Unstake requested more than the staked balance.
    #[error("insufficient staked balance: requested {requested}, staked {staked}")]
    InsufficientStake { requested: Decimal, staked: Decimal },

    /// Every mutation must move a positive amount.
    #[error("amount must be positive: {0}")]
    NonPositiveAmount(Decimal),
}
