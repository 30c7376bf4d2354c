// wallet.rs — Wallet: the balance / staked-balance pair.
//
// The wallet is the principal shared mutable resource of the system.
// Funds flow:
//   deposit  → balance          (credit)
//   stake    → balance → staked_balance
//   unstake  → staked_balance → balance
//   forfeit  → staked_balance → gone (penalty)
//   payout   → balance → gone  (debit)
//
// Invariants: both balances stay >= 0, always. `forfeit` is the one
// operation that never fails on shortfall — it takes what is staked
// and reports the actual amount, so settlement can record a partial
// penalty instead of blowing up.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::LedgerError;

/// A user's wallet. One per user, keyed by the external user id.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Wallet {
    /// The owning user.
    pub user_id: String,

    /// Funds available for staking or payout.
    pub balance: Decimal,

    /// Funds reserved against active goals; the pool settlement
    /// forfeits from.
    pub staked_balance: Decimal,
}

impl Wallet {
    /// A fresh wallet with zero balances.
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            balance: Decimal::ZERO,
            staked_balance: Decimal::ZERO,
        }
    }

    /// Add funds to the available balance.
    pub fn credit(&mut self, amount: Decimal) -> Result<(), LedgerError> {
        require_positive(amount)?;
        self.balance += amount;
        Ok(())
    }

    /// Remove funds from the available balance (payout path).
    pub fn debit(&mut self, amount: Decimal) -> Result<(), LedgerError> {
        require_positive(amount)?;
        if self.balance < amount {
            return Err(LedgerError::InsufficientFunds {
                requested: amount,
                available: self.balance,
            });
        }
        self.balance -= amount;
        Ok(())
    }

    /// Move funds from the available balance into the staked reserve.
    pub fn stake(&mut self, amount: Decimal) -> Result<(), LedgerError> {
        require_positive(amount)?;
        if self.balance < amount {
            return Err(LedgerError::InsufficientBalance {
                requested: amount,
                available: self.balance,
            });
        }
        self.balance -= amount;
        self.staked_balance += amount;
        Ok(())
    }

    /// Release staked funds back to the available balance.
    pub fn unstake(&mut self, amount: Decimal) -> Result<(), LedgerError> {
        require_positive(amount)?;
        if self.staked_balance < amount {
            return Err(LedgerError::InsufficientStake {
                requested: amount,
                staked: self.staked_balance,
            });
        }
        self.staked_balance -= amount;
        self.balance += amount;
        Ok(())
    }

    /// Forfeit up to `amount` from the staked reserve, returning the
    /// amount actually taken.
    ///
    /// Caps at the current staked balance rather than erroring: when
    /// the reserve cannot cover the full stake, settlement records a
    /// partial penalty and schedules a retry.
    pub fn forfeit(&mut self, amount: Decimal) -> Result<Decimal, LedgerError> {
        require_positive(amount)?;
        let actual = amount.min(self.staked_balance);
        self.staked_balance -= actual;
        Ok(actual)
    }
}

fn require_positive(amount: Decimal) -> Result<(), LedgerError> {
    if amount <= Decimal::ZERO {
        return Err(LedgerError::NonPositiveAmount(amount));
    }
    Ok(())
}
