// settle.rs — penalty collection for missed obligations.
//
// Settlement is driven twice: synchronously when an obligation goes
// missed, and by the hourly retry pass for anything that did not
// finish the first time. Each attempt follows the same ladder:
//
//   1. skip unless the obligation is missed and its penalty unapplied
//   2. ensure the settlement row exists (create-if-absent)
//   3. claim it — the Processing gate admits exactly one writer
//   4. apply the forfeiture atomically in the store
//   5. collecting the outstanding remainder completes; a shortfall
//      records what it took and fails with a 24h retry that pursues
//      only what is still owed, so the lifetime total is capped at
//      the stake snapshot; a storage error fails with exponential
//      backoff until the attempt cap, after which the settlement
//      needs manual attention
//
// penalty_applied on the obligation is the idempotency guard: it only
// flips inside the commit that collected the full stake, so the same
// miss can never be charged twice no matter how the attempts overlap.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tracing::{error, info, warn};

use crate::engine::Engine;
use crate::error::EngineError;
use crate::events::EngineEvent;
use crate::obligation::ObligationStatus;
use crate::settlement::{transient_backoff, Settlement, MAX_SETTLEMENT_ATTEMPTS};

/// The result of one settlement attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettleOutcome {
    /// The full stake was collected (possibly zero, for unstaked goals).
    Forfeited,
    /// Part of the stake was collected; the rest retries in 24h.
    Shortfall,
    /// Nothing to do: not missed, already charged, not yet retryable,
    /// or another worker holds the claim.
    Skipped,
}

impl SettleOutcome {
    /// Whether this attempt finished the settlement.
    pub fn is_settled(&self) -> bool {
        matches!(self, SettleOutcome::Forfeited)
    }
}

impl Engine {
    /// Attempt settlement for a missed obligation. Safe to call any
    /// number of times, from any number of workers.
    pub fn settle(
        &mut self,
        obligation_id: uuid::Uuid,
        now: DateTime<Utc>,
    ) -> Result<SettleOutcome, EngineError> {
        let ob = self
            .store
            .obligation(obligation_id)?
            .ok_or(EngineError::ObligationNotFound(obligation_id))?;
        if ob.status != ObligationStatus::Missed || ob.penalty_applied {
            return Ok(SettleOutcome::Skipped);
        }
        let goal = self
            .store
            .goal(ob.goal_id)?
            .ok_or(EngineError::GoalNotFound(ob.goal_id))?;

        self.store.create_wallet_if_absent(&goal.owner_id)?;
        self.store
            .insert_settlement_if_absent(&Settlement::new(ob.id, ob.stake_snapshot))?;
        let settlement = self
            .store
            .settlement_for_obligation(ob.id)?
            .ok_or_else(|| {
                EngineError::CorruptRecord(format!("settlement missing for obligation {}", ob.id))
            })?;
        if settlement.is_exhausted() {
            return Ok(SettleOutcome::Skipped);
        }
        if !self.store.claim_settlement(settlement.id, now)? {
            return Ok(SettleOutcome::Skipped);
        }

        match self
            .store
            .apply_forfeiture(&settlement, &ob, &goal.owner_id, now)
        {
            Ok(outcome) if outcome.is_full() => {
                info!(
                    obligation_id = %ob.id,
                    amount = %outcome.forfeited,
                    "stake forfeited"
                );
                if outcome.forfeited > Decimal::ZERO {
                    self.dispatch(&EngineEvent::StakeForfeited {
                        user_id: goal.owner_id.clone(),
                        goal_title: goal.title.clone(),
                        date: ob.date,
                        amount: outcome.forfeited,
                        timestamp: now,
                    });
                }
                Ok(SettleOutcome::Forfeited)
            }
            Ok(outcome) => {
                warn!(
                    obligation_id = %ob.id,
                    requested = %outcome.requested,
                    forfeited = %outcome.forfeited,
                    "stake shortfall, retrying in 24h"
                );
                self.dispatch(&EngineEvent::StakeShortfall {
                    user_id: goal.owner_id.clone(),
                    goal_title: goal.title.clone(),
                    date: ob.date,
                    requested: outcome.requested,
                    forfeited: outcome.forfeited,
                    timestamp: now,
                });
                Ok(SettleOutcome::Shortfall)
            }
            Err(e) if e.is_transient() => {
                let attempt = settlement.retry_count + 1;
                let retry_at = now + transient_backoff(attempt);
                self.store.record_settlement_failure(
                    settlement.id,
                    attempt,
                    retry_at,
                    &format!("attempt {attempt} failed: {e}"),
                )?;
                if attempt >= MAX_SETTLEMENT_ATTEMPTS {
                    error!(
                        obligation_id = %ob.id,
                        attempt,
                        "settlement exhausted its retries"
                    );
                    self.dispatch(&EngineEvent::SettlementFailed {
                        user_id: goal.owner_id.clone(),
                        obligation_id: ob.id,
                        retry_count: attempt,
                        timestamp: now,
                    });
                }
                Err(e)
            }
            Err(e) => Err(e),
        }
    }

    /// The hourly pass: re-drive every settlement whose retry is due,
    /// including claims abandoned by a crashed worker. Returns how
    /// many finished in full.
    pub fn retry_due_settlements(&mut self, now: DateTime<Utc>) -> Result<usize, EngineError> {
        let due = self.store.retryable_settlements(now)?;
        let mut settled = 0;
        for settlement in due {
            match self.settle(settlement.obligation_id, now) {
                Ok(outcome) if outcome.is_settled() => settled += 1,
                Ok(_) => {}
                Err(e) => {
                    warn!(
                        settlement_id = %settlement.id,
                        "settlement retry failed: {e}"
                    );
                }
            }
        }
        Ok(settled)
    }
}
