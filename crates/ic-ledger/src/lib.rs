//! # ic-ledger
//!
//! Wallet ledger for icommit: per-user balances, the staked-balance
//! reserve that settlement forfeits from, and the append-only
//! transaction records that audit every mutation.
//!
//! This crate holds the pure invariant logic. Persistence — and the
//! requirement that a balance mutation and its transaction record
//! commit atomically — lives in the engine store, which composes
//! these operations inside a single database transaction.
//!
//! ## Key components
//!
//! - [`Wallet`] — balance / staked_balance pair with invariant-checked mutations
//! - [`WalletTransaction`] — append-only audit record with a unique reference
//! - [`LedgerError`] — typed failures (insufficient funds, bad amounts)

pub mod error;
pub mod transaction;
pub mod wallet;

pub use error::LedgerError;
pub use transaction::{TransactionStatus, TransactionType, WalletTransaction};
pub use wallet::Wallet;
