// store.rs — EngineStore: SQLite persistence for the engine.
//
// One database holds goals, obligations, submissions, verification
// tokens, settlements, wallets, and wallet transactions. The schema
// carries the engine's correctness guarantees:
//
// - UNIQUE(goal_id, date) on obligations + INSERT OR IGNORE makes
//   materialization idempotent under concurrent attempts
// - UNIQUE(obligation_id) on submissions and settlements enforces the
//   one-to-one records
// - conditional UPDATEs (WHERE status = 'pending', WHERE used = 0)
//   are the single-writer gates for reconciliation and settlement
// - multi-row money movements (stake, deposit confirmation,
//   forfeiture) run inside one SQL transaction: the balance change
//   and its audit row commit together or not at all
//
// Dates are stored as ISO-8601 TEXT (lexicographic order == calendar
// order), timestamps as fixed-width RFC 3339 UTC, amounts as decimal
// TEXT re-parsed on read.

use std::path::Path;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use rust_decimal::Decimal;
use uuid::Uuid;

use ic_goal::{cadence::CompletionHistory, Goal, GoalError, ProofKind, ReviewMode};
use ic_ledger::{TransactionStatus, TransactionType, Wallet, WalletTransaction};

use crate::error::EngineError;
use crate::obligation::{Obligation, ObligationStatus};
use crate::settlement::{Settlement, SettlementStatus, MAX_SETTLEMENT_ATTEMPTS};
use crate::submission::{ProofSubmission, SubmissionStatus};
use crate::token::VerificationToken;

/// How long a claimed (Processing) settlement may sit before the retry
/// pass treats it as abandoned by a crashed worker.
const STALE_CLAIM_SECS: i64 = 3600;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS goals (
    id              TEXT PRIMARY KEY,
    owner_id        TEXT NOT NULL,
    title           TEXT NOT NULL,
    description     TEXT NOT NULL DEFAULT '',
    start_date      TEXT NOT NULL,
    end_date        TEXT,
    recurrence      TEXT NOT NULL,
    stake_amount    TEXT NOT NULL,
    proof_kind      TEXT NOT NULL,
    review_mode     TEXT NOT NULL,
    time_of_day     TEXT,
    duration_minutes INTEGER,
    is_active       INTEGER NOT NULL,
    is_completed    INTEGER NOT NULL,
    created_at      TEXT NOT NULL,
    updated_at      TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS obligations (
    id              TEXT PRIMARY KEY,
    goal_id         TEXT NOT NULL REFERENCES goals(id) ON DELETE CASCADE,
    date            TEXT NOT NULL,
    status          TEXT NOT NULL,
    stake_snapshot  TEXT NOT NULL,
    penalty_applied INTEGER NOT NULL DEFAULT 0,
    completed_at    TEXT,
    notes           TEXT NOT NULL DEFAULT '',
    created_at      TEXT NOT NULL,
    UNIQUE (goal_id, date)
);
CREATE INDEX IF NOT EXISTS idx_obligations_status_date
    ON obligations (status, date);

CREATE TABLE IF NOT EXISTS submissions (
    id               TEXT PRIMARY KEY,
    obligation_id    TEXT NOT NULL UNIQUE REFERENCES obligations(id) ON DELETE CASCADE,
    payload          TEXT NOT NULL,
    status           TEXT NOT NULL,
    submitted_at     TEXT NOT NULL,
    confidence_score REAL,
    reviewed_by      TEXT,
    reviewed_at      TEXT,
    review_notes     TEXT NOT NULL DEFAULT ''
);

CREATE TABLE IF NOT EXISTS verification_tokens (
    id            TEXT PRIMARY KEY,
    submission_id TEXT NOT NULL REFERENCES submissions(id) ON DELETE CASCADE,
    verifier_id   TEXT NOT NULL,
    digest        TEXT NOT NULL UNIQUE,
    issued_at     TEXT NOT NULL,
    expires_at    TEXT NOT NULL,
    used          INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS settlements (
    id               TEXT PRIMARY KEY,
    obligation_id    TEXT NOT NULL UNIQUE REFERENCES obligations(id) ON DELETE CASCADE,
    amount           TEXT NOT NULL,
    amount_collected TEXT NOT NULL DEFAULT '0',
    status           TEXT NOT NULL,
    processed_at     TEXT,
    retry_count      INTEGER NOT NULL DEFAULT 0,
    next_retry_at    TEXT,
    claimed_at       TEXT,
    notes            TEXT NOT NULL DEFAULT '',
    created_at       TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_settlements_status
    ON settlements (status, next_retry_at);

CREATE TABLE IF NOT EXISTS wallets (
    user_id        TEXT PRIMARY KEY,
    balance        TEXT NOT NULL,
    staked_balance TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS wallet_transactions (
    id         TEXT PRIMARY KEY,
    user_id    TEXT NOT NULL REFERENCES wallets(user_id) ON DELETE CASCADE,
    reference  TEXT NOT NULL UNIQUE,
    amount     TEXT NOT NULL,
    kind       TEXT NOT NULL,
    status     TEXT NOT NULL,
    created_at TEXT NOT NULL
);
";

/// The result of applying a forfeiture inside [`EngineStore::apply_forfeiture`].
#[derive(Debug, Clone)]
pub struct ForfeitOutcome {
    /// The outstanding remainder this attempt pursued.
    pub requested: Decimal,
    /// What the staked balance could actually cover.
    pub forfeited: Decimal,
}

impl ForfeitOutcome {
    /// Whether the settlement is now collected in full.
    pub fn is_full(&self) -> bool {
        self.forfeited == self.requested
    }
}

/// SQLite-backed persistence for the engine.
pub struct EngineStore {
    conn: Connection,
}

impl EngineStore {
    /// Open (or create) the engine database at the given path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, EngineError> {
        Self::from_connection(Connection::open(path)?)
    }

    /// An in-memory store, for tests and ephemeral runs.
    pub fn open_in_memory() -> Result<Self, EngineError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self, EngineError> {
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn })
    }

    // ---- goals -----------------------------------------------------------

    /// Persist a new goal. Validates before writing.
    pub fn insert_goal(&self, goal: &Goal) -> Result<(), EngineError> {
        goal.validate()?;
        self.conn.execute(
            "INSERT INTO goals (id, owner_id, title, description, start_date, end_date,
                                recurrence, stake_amount, proof_kind, review_mode,
                                time_of_day, duration_minutes, is_active, is_completed,
                                created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)",
            params![
                goal.id.to_string(),
                goal.owner_id,
                goal.title,
                goal.description,
                goal.start_date.to_string(),
                goal.end_date.map(|d| d.to_string()),
                serde_json::to_string(&goal.recurrence)?,
                goal.stake_amount.to_string(),
                goal.verification.proof.to_string(),
                review_mode_str(goal.verification.review),
                goal.time_of_day.map(|t| t.to_string()),
                goal.duration_minutes,
                goal.is_active,
                goal.is_completed,
                ts_to_sql(goal.created_at),
                ts_to_sql(goal.updated_at),
            ],
        )?;
        Ok(())
    }

    /// Get a goal by id.
    pub fn goal(&self, id: Uuid) -> Result<Option<Goal>, EngineError> {
        self.conn
            .query_row(
                "SELECT id, owner_id, title, description, start_date, end_date,
                        recurrence, stake_amount, proof_kind, review_mode,
                        time_of_day, duration_minutes, is_active, is_completed,
                        created_at, updated_at
                 FROM goals WHERE id = ?1",
                params![id.to_string()],
                map_goal,
            )
            .optional()
            .map_err(EngineError::from)
    }

    /// All goals the scheduler should consider: active and not completed.
    pub fn schedulable_goals(&self) -> Result<Vec<Goal>, EngineError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, owner_id, title, description, start_date, end_date,
                    recurrence, stake_amount, proof_kind, review_mode,
                    time_of_day, duration_minutes, is_active, is_completed,
                    created_at, updated_at
             FROM goals WHERE is_active = 1 AND is_completed = 0
             ORDER BY created_at",
        )?;
        let goals = stmt
            .query_map([], map_goal)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(goals)
    }

    /// Close out goals whose end date has passed. Returns the goals
    /// that were expired by this call (re-running is a no-op).
    pub fn expire_goals(
        &self,
        as_of: NaiveDate,
        now: DateTime<Utc>,
    ) -> Result<Vec<Goal>, EngineError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, owner_id, title, description, start_date, end_date,
                    recurrence, stake_amount, proof_kind, review_mode,
                    time_of_day, duration_minutes, is_active, is_completed,
                    created_at, updated_at
             FROM goals
             WHERE is_active = 1 AND end_date IS NOT NULL AND end_date < ?1",
        )?;
        let expired = stmt
            .query_map(params![as_of.to_string()], map_goal)?
            .collect::<Result<Vec<_>, _>>()?;

        for goal in &expired {
            self.conn.execute(
                "UPDATE goals SET is_active = 0, is_completed = 1, updated_at = ?2
                 WHERE id = ?1 AND is_active = 1",
                params![goal.id.to_string(), ts_to_sql(now)],
            )?;
        }
        Ok(expired)
    }

    /// Hard-delete a goal; obligations (and their submissions and
    /// settlements) cascade.
    pub fn delete_goal(&self, id: Uuid) -> Result<bool, EngineError> {
        let rows = self
            .conn
            .execute("DELETE FROM goals WHERE id = ?1", params![id.to_string()])?;
        Ok(rows == 1)
    }

    // ---- obligations -----------------------------------------------------

    /// Create-if-absent: returns true if a new obligation row was
    /// written, false if the (goal, date) pair already existed. A
    /// duplicate-insert race resolves here, never as a caller error.
    pub fn insert_obligation_if_absent(&self, ob: &Obligation) -> Result<bool, EngineError> {
        let rows = self.conn.execute(
            "INSERT OR IGNORE INTO obligations
                 (id, goal_id, date, status, stake_snapshot, penalty_applied,
                  completed_at, notes, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                ob.id.to_string(),
                ob.goal_id.to_string(),
                ob.date.to_string(),
                ob.status.as_str(),
                ob.stake_snapshot.to_string(),
                ob.penalty_applied,
                ob.completed_at.map(ts_to_sql),
                ob.notes,
                ts_to_sql(ob.created_at),
            ],
        )?;
        Ok(rows == 1)
    }

    /// Get an obligation by id.
    pub fn obligation(&self, id: Uuid) -> Result<Option<Obligation>, EngineError> {
        self.conn
            .query_row(
                "SELECT id, goal_id, date, status, stake_snapshot, penalty_applied,
                        completed_at, notes, created_at
                 FROM obligations WHERE id = ?1",
                params![id.to_string()],
                map_obligation,
            )
            .optional()
            .map_err(EngineError::from)
    }

    /// Get the obligation for a specific (goal, date) pair.
    pub fn obligation_for(
        &self,
        goal_id: Uuid,
        date: NaiveDate,
    ) -> Result<Option<Obligation>, EngineError> {
        self.conn
            .query_row(
                "SELECT id, goal_id, date, status, stake_snapshot, penalty_applied,
                        completed_at, notes, created_at
                 FROM obligations WHERE goal_id = ?1 AND date = ?2",
                params![goal_id.to_string(), date.to_string()],
                map_obligation,
            )
            .optional()
            .map_err(EngineError::from)
    }

    /// All obligations for a goal, oldest first.
    pub fn obligations_for_goal(&self, goal_id: Uuid) -> Result<Vec<Obligation>, EngineError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, goal_id, date, status, stake_snapshot, penalty_applied,
                    completed_at, notes, created_at
             FROM obligations WHERE goal_id = ?1 ORDER BY date",
        )?;
        let obs = stmt
            .query_map(params![goal_id.to_string()], map_obligation)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(obs)
    }

    /// Pending obligations past their date with no submission at all —
    /// the sweep's input. Obligations with an undecided submission are
    /// left for the reviewer.
    pub fn overdue_pending(&self, as_of: NaiveDate) -> Result<Vec<Obligation>, EngineError> {
        let mut stmt = self.conn.prepare(
            "SELECT o.id, o.goal_id, o.date, o.status, o.stake_snapshot, o.penalty_applied,
                    o.completed_at, o.notes, o.created_at
             FROM obligations o
             LEFT JOIN submissions s ON s.obligation_id = o.id
             WHERE o.status = 'pending' AND o.date < ?1 AND s.id IS NULL
             ORDER BY o.date",
        )?;
        let obs = stmt
            .query_map(params![as_of.to_string()], map_obligation)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(obs)
    }

    /// Conditionally transition a pending obligation. Returns false if
    /// the obligation was no longer pending — the loser of a race
    /// observes a no-op, state is never overwritten.
    pub fn transition_obligation(
        &self,
        id: Uuid,
        to: ObligationStatus,
        now: DateTime<Utc>,
    ) -> Result<bool, EngineError> {
        debug_assert!(ObligationStatus::Pending.can_transition_to(to));
        let completed_at = (to == ObligationStatus::Completed).then(|| ts_to_sql(now));
        let rows = self.conn.execute(
            "UPDATE obligations SET status = ?2, completed_at = COALESCE(?3, completed_at)
             WHERE id = ?1 AND status = 'pending'",
            params![id.to_string(), to.as_str(), completed_at],
        )?;
        Ok(rows == 1)
    }

    // ---- submissions -----------------------------------------------------

    /// Persist a new submission. The UNIQUE(obligation_id) constraint
    /// turns a concurrent double-submit into `DuplicateSubmission`.
    pub fn insert_submission(&self, sub: &ProofSubmission) -> Result<(), EngineError> {
        let result = self.conn.execute(
            "INSERT INTO submissions
                 (id, obligation_id, payload, status, submitted_at,
                  confidence_score, reviewed_by, reviewed_at, review_notes)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                sub.id.to_string(),
                sub.obligation_id.to_string(),
                serde_json::to_string(&sub.payload)?,
                sub.status.as_str(),
                ts_to_sql(sub.submitted_at),
                sub.confidence_score,
                sub.reviewed_by,
                sub.reviewed_at.map(ts_to_sql),
                sub.review_notes,
            ],
        );
        match result {
            Ok(_) => Ok(()),
            Err(e) if is_constraint_violation(&e) => {
                Err(EngineError::DuplicateSubmission(sub.obligation_id))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Get a submission by id.
    pub fn submission(&self, id: Uuid) -> Result<Option<ProofSubmission>, EngineError> {
        self.conn
            .query_row(
                "SELECT id, obligation_id, payload, status, submitted_at,
                        confidence_score, reviewed_by, reviewed_at, review_notes
                 FROM submissions WHERE id = ?1",
                params![id.to_string()],
                map_submission,
            )
            .optional()
            .map_err(EngineError::from)
    }

    /// Get the submission for an obligation, if any.
    pub fn submission_for_obligation(
        &self,
        obligation_id: Uuid,
    ) -> Result<Option<ProofSubmission>, EngineError> {
        self.conn
            .query_row(
                "SELECT id, obligation_id, payload, status, submitted_at,
                        confidence_score, reviewed_by, reviewed_at, review_notes
                 FROM submissions WHERE obligation_id = ?1",
                params![obligation_id.to_string()],
                map_submission,
            )
            .optional()
            .map_err(EngineError::from)
    }

    /// Write back a submission's verification fields, gated on it not
    /// having been decided yet. Returns false if another decision got
    /// there first.
    pub fn update_submission_if_undecided(
        &self,
        sub: &ProofSubmission,
    ) -> Result<bool, EngineError> {
        let rows = self.conn.execute(
            "UPDATE submissions
             SET status = ?2, confidence_score = ?3, reviewed_by = ?4,
                 reviewed_at = ?5, review_notes = ?6
             WHERE id = ?1 AND status IN ('submitted', 'under_review')",
            params![
                sub.id.to_string(),
                sub.status.as_str(),
                sub.confidence_score,
                sub.reviewed_by,
                sub.reviewed_at.map(ts_to_sql),
                sub.review_notes,
            ],
        )?;
        Ok(rows == 1)
    }

    // ---- verification tokens ---------------------------------------------

    /// Persist a token record (digest only — the cleartext is never stored).
    pub fn insert_token(&self, token: &VerificationToken) -> Result<(), EngineError> {
        self.conn.execute(
            "INSERT INTO verification_tokens
                 (id, submission_id, verifier_id, digest, issued_at, expires_at, used)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                token.id.to_string(),
                token.submission_id.to_string(),
                token.verifier_id,
                token.digest,
                ts_to_sql(token.issued_at),
                ts_to_sql(token.expires_at),
                token.used,
            ],
        )?;
        Ok(())
    }

    /// Look a token up by its digest.
    pub fn token_by_digest(
        &self,
        digest: &str,
    ) -> Result<Option<VerificationToken>, EngineError> {
        self.conn
            .query_row(
                "SELECT id, submission_id, verifier_id, digest, issued_at, expires_at, used
                 FROM verification_tokens WHERE digest = ?1",
                params![digest],
                map_token,
            )
            .optional()
            .map_err(EngineError::from)
    }

    /// Spend a token. The `used = 0` gate makes a replayed token a
    /// detectable no-op, not a second decision.
    pub fn mark_token_used(&self, id: Uuid) -> Result<bool, EngineError> {
        let rows = self.conn.execute(
            "UPDATE verification_tokens SET used = 1 WHERE id = ?1 AND used = 0",
            params![id.to_string()],
        )?;
        Ok(rows == 1)
    }

    // ---- settlements -----------------------------------------------------

    /// Create-if-absent: at most one settlement per obligation.
    pub fn insert_settlement_if_absent(&self, s: &Settlement) -> Result<bool, EngineError> {
        let rows = self.conn.execute(
            "INSERT OR IGNORE INTO settlements
                 (id, obligation_id, amount, amount_collected, status, processed_at,
                  retry_count, next_retry_at, claimed_at, notes, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, NULL, ?9, ?10)",
            params![
                s.id.to_string(),
                s.obligation_id.to_string(),
                s.amount.to_string(),
                s.amount_collected.to_string(),
                s.status.as_str(),
                s.processed_at.map(ts_to_sql),
                s.retry_count,
                s.next_retry_at.map(ts_to_sql),
                s.notes,
                ts_to_sql(s.created_at),
            ],
        )?;
        Ok(rows == 1)
    }

    /// Get the settlement for an obligation, if any.
    pub fn settlement_for_obligation(
        &self,
        obligation_id: Uuid,
    ) -> Result<Option<Settlement>, EngineError> {
        self.conn
            .query_row(
                "SELECT id, obligation_id, amount, amount_collected, status, processed_at,
                        retry_count, next_retry_at, notes, created_at
                 FROM settlements WHERE obligation_id = ?1",
                params![obligation_id.to_string()],
                map_settlement,
            )
            .optional()
            .map_err(EngineError::from)
    }

    /// Acquire the single-writer gate for a settlement attempt: moves
    /// the row to Processing if and only if it is attemptable right
    /// now (pending, failed-with-retry-due under the attempt cap, or
    /// abandoned by a crashed worker). Exactly one concurrent caller
    /// can win.
    pub fn claim_settlement(&self, id: Uuid, now: DateTime<Utc>) -> Result<bool, EngineError> {
        let stale_before = ts_to_sql(now - chrono::Duration::seconds(STALE_CLAIM_SECS));
        let rows = self.conn.execute(
            "UPDATE settlements SET status = 'processing', claimed_at = ?2
             WHERE id = ?1
               AND (status = 'pending'
                    OR (status = 'failed'
                        AND retry_count < ?3
                        AND (next_retry_at IS NULL OR next_retry_at <= ?2))
                    OR (status = 'processing' AND claimed_at <= ?4))",
            params![
                id.to_string(),
                ts_to_sql(now),
                MAX_SETTLEMENT_ATTEMPTS,
                stale_before,
            ],
        )?;
        Ok(rows == 1)
    }

    /// Settlements the hourly retry pass should re-drive.
    pub fn retryable_settlements(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<Settlement>, EngineError> {
        let stale_before = ts_to_sql(now - chrono::Duration::seconds(STALE_CLAIM_SECS));
        let mut stmt = self.conn.prepare(
            "SELECT id, obligation_id, amount, amount_collected, status, processed_at,
                    retry_count, next_retry_at, notes, created_at
             FROM settlements
             WHERE status = 'pending'
                OR (status = 'failed'
                    AND retry_count < ?2
                    AND (next_retry_at IS NULL OR next_retry_at <= ?1))
                OR (status = 'processing' AND claimed_at <= ?3)
             ORDER BY created_at",
        )?;
        let settlements = stmt
            .query_map(
                params![ts_to_sql(now), MAX_SETTLEMENT_ATTEMPTS, stale_before],
                map_settlement,
            )?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(settlements)
    }

    /// Record a failed attempt and schedule (or exhaust) the retry.
    pub fn record_settlement_failure(
        &self,
        id: Uuid,
        retry_count: u32,
        next_retry_at: DateTime<Utc>,
        notes: &str,
    ) -> Result<(), EngineError> {
        self.conn.execute(
            "UPDATE settlements
             SET status = 'failed', retry_count = ?2, next_retry_at = ?3, notes = ?4
             WHERE id = ?1",
            params![id.to_string(), retry_count, ts_to_sql(next_retry_at), notes],
        )?;
        Ok(())
    }

    /// Apply the money movement for a claimed settlement, atomically.
    ///
    /// Each attempt pursues only the outstanding remainder (stake
    /// snapshot minus what earlier attempts collected), so the
    /// lifetime total can never exceed the snapshot. In one SQL
    /// transaction: forfeit min(staked, outstanding) from the owner's
    /// wallet, write the Penalty transaction for the actual amount,
    /// and either complete the settlement (remainder fully collected —
    /// obligation.penalty_applied flips here, inside the same commit)
    /// or fail it with a 24h retry (shortfall). Partial application —
    /// money moved without its audit row — cannot be observed.
    pub fn apply_forfeiture(
        &mut self,
        settlement: &Settlement,
        obligation: &Obligation,
        user_id: &str,
        now: DateTime<Utc>,
    ) -> Result<ForfeitOutcome, EngineError> {
        let requested = settlement.outstanding();
        let tx = self.conn.transaction()?;

        let forfeited = if requested.is_zero() {
            Decimal::ZERO
        } else {
            let mut wallet = read_wallet(&tx, user_id)?
                .ok_or_else(|| EngineError::WalletNotFound(user_id.to_string()))?;
            let actual = wallet.forfeit(requested)?;
            tx.execute(
                "UPDATE wallets SET staked_balance = ?2 WHERE user_id = ?1",
                params![user_id, wallet.staked_balance.to_string()],
            )?;
            if actual > Decimal::ZERO {
                let record = WalletTransaction::new(
                    user_id,
                    actual,
                    TransactionType::Penalty,
                    TransactionStatus::Success,
                );
                insert_transaction(&tx, &record)?;
            }
            actual
        };

        let collected = settlement.amount_collected + forfeited;
        if forfeited == requested {
            tx.execute(
                "UPDATE settlements
                 SET status = 'completed', amount_collected = ?2,
                     processed_at = ?3, next_retry_at = NULL
                 WHERE id = ?1",
                params![
                    settlement.id.to_string(),
                    collected.to_string(),
                    ts_to_sql(now)
                ],
            )?;
            tx.execute(
                "UPDATE obligations SET penalty_applied = 1
                 WHERE id = ?1 AND penalty_applied = 0",
                params![obligation.id.to_string()],
            )?;
        } else {
            let retry_at = now + chrono::Duration::hours(crate::settlement::SHORTFALL_RETRY_DELAY_HOURS);
            tx.execute(
                "UPDATE settlements
                 SET status = 'failed', amount_collected = ?2,
                     retry_count = retry_count + 1, next_retry_at = ?3, notes = ?4
                 WHERE id = ?1",
                params![
                    settlement.id.to_string(),
                    collected.to_string(),
                    ts_to_sql(retry_at),
                    format!(
                        "staked balance covered {collected} of {} so far",
                        settlement.amount
                    ),
                ],
            )?;
        }

        tx.commit()?;
        Ok(ForfeitOutcome {
            requested,
            forfeited,
        })
    }

    // ---- wallets ---------------------------------------------------------

    /// Ensure a wallet row exists for the user.
    pub fn create_wallet_if_absent(&self, user_id: &str) -> Result<(), EngineError> {
        self.conn.execute(
            "INSERT OR IGNORE INTO wallets (user_id, balance, staked_balance)
             VALUES (?1, '0', '0')",
            params![user_id],
        )?;
        Ok(())
    }

    /// Get a user's wallet.
    pub fn wallet(&self, user_id: &str) -> Result<Option<Wallet>, EngineError> {
        read_wallet(&self.conn, user_id)
    }

    /// Record a deposit initialization: a Pending transaction under
    /// the gateway reference. The balance moves only on confirmation.
    pub fn record_deposit(
        &self,
        user_id: &str,
        reference: &str,
        amount: Decimal,
    ) -> Result<WalletTransaction, EngineError> {
        self.create_wallet_if_absent(user_id)?;
        let record = WalletTransaction::with_reference(
            user_id,
            reference,
            amount,
            TransactionType::Deposit,
            TransactionStatus::Pending,
        );
        insert_transaction(&self.conn, &record)?;
        Ok(record)
    }

    /// Resolve a pending deposit after the gateway callback. The
    /// unique reference makes this idempotent: only the first
    /// confirmation credits the wallet, replays return false.
    pub fn confirm_deposit(&mut self, reference: &str, success: bool) -> Result<bool, EngineError> {
        let tx = self.conn.transaction()?;

        let pending: Option<(String, String)> = tx
            .query_row(
                "SELECT user_id, amount FROM wallet_transactions
                 WHERE reference = ?1 AND status = 'pending'",
                params![reference],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        let Some((user_id, amount_raw)) = pending else {
            return Ok(false);
        };

        let new_status = if success { "success" } else { "failed" };
        let rows = tx.execute(
            "UPDATE wallet_transactions SET status = ?2
             WHERE reference = ?1 AND status = 'pending'",
            params![reference, new_status],
        )?;
        if rows == 1 && success {
            let amount = parse_decimal(&amount_raw)?;
            let mut wallet = read_wallet(&tx, &user_id)?
                .ok_or_else(|| EngineError::WalletNotFound(user_id.clone()))?;
            wallet.credit(amount)?;
            tx.execute(
                "UPDATE wallets SET balance = ?2 WHERE user_id = ?1",
                params![user_id, wallet.balance.to_string()],
            )?;
        }

        tx.commit()?;
        Ok(rows == 1)
    }

    /// Move funds from the available balance into the staked reserve,
    /// writing the Stake transaction in the same commit.
    pub fn stake_funds(&mut self, user_id: &str, amount: Decimal) -> Result<Wallet, EngineError> {
        self.create_wallet_if_absent(user_id)?;
        let tx = self.conn.transaction()?;
        let mut wallet = read_wallet(&tx, user_id)?
            .ok_or_else(|| EngineError::WalletNotFound(user_id.to_string()))?;
        wallet.stake(amount)?;
        tx.execute(
            "UPDATE wallets SET balance = ?2, staked_balance = ?3 WHERE user_id = ?1",
            params![
                user_id,
                wallet.balance.to_string(),
                wallet.staked_balance.to_string()
            ],
        )?;
        let record = WalletTransaction::new(
            user_id,
            amount,
            TransactionType::Stake,
            TransactionStatus::Success,
        );
        insert_transaction(&tx, &record)?;
        tx.commit()?;
        Ok(wallet)
    }

    /// Release staked funds back to the available balance.
    pub fn unstake_funds(&mut self, user_id: &str, amount: Decimal) -> Result<Wallet, EngineError> {
        let tx = self.conn.transaction()?;
        let mut wallet = read_wallet(&tx, user_id)?
            .ok_or_else(|| EngineError::WalletNotFound(user_id.to_string()))?;
        wallet.unstake(amount)?;
        tx.execute(
            "UPDATE wallets SET balance = ?2, staked_balance = ?3 WHERE user_id = ?1",
            params![
                user_id,
                wallet.balance.to_string(),
                wallet.staked_balance.to_string()
            ],
        )?;
        let record = WalletTransaction::new(
            user_id,
            amount,
            TransactionType::Unstake,
            TransactionStatus::Success,
        );
        insert_transaction(&tx, &record)?;
        tx.commit()?;
        Ok(wallet)
    }

    /// All transactions for a user, newest first.
    pub fn transactions_for(
        &self,
        user_id: &str,
    ) -> Result<Vec<WalletTransaction>, EngineError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, user_id, reference, amount, kind, status, created_at
             FROM wallet_transactions WHERE user_id = ?1
             ORDER BY created_at DESC",
        )?;
        let txs = stmt
            .query_map(params![user_id], map_transaction)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(txs)
    }
}

/// The store is the engine's completion-history backend for the
/// count-based cadence variant.
impl CompletionHistory for EngineStore {
    fn completed_count(
        &self,
        goal_id: Uuid,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<u32, GoalError> {
        self.conn
            .query_row(
                "SELECT COUNT(*) FROM obligations
                 WHERE goal_id = ?1 AND status = 'completed'
                   AND date >= ?2 AND date <= ?3",
                params![goal_id.to_string(), from.to_string(), to.to_string()],
                |row| row.get::<_, u32>(0),
            )
            .map_err(|e| GoalError::HistoryUnavailable(e.to_string()))
    }
}

// ---- column helpers ------------------------------------------------------

/// Fixed-width RFC 3339 UTC with microseconds — lexicographic order is
/// chronological order, which the retry-due comparisons rely on.
fn ts_to_sql(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn review_mode_str(mode: ReviewMode) -> &'static str {
    match mode {
        ReviewMode::Automated => "automated",
        ReviewMode::Human => "human",
    }
}

fn is_constraint_violation(e: &rusqlite::Error) -> bool {
    matches!(
        e,
        rusqlite::Error::SqliteFailure(err, _)
            if err.code == rusqlite::ErrorCode::ConstraintViolation
    )
}

fn parse_decimal(raw: &str) -> Result<Decimal, EngineError> {
    Decimal::from_str(raw)
        .map_err(|e| EngineError::CorruptRecord(format!("bad decimal {raw:?}: {e}")))
}

/// Wrap a decode failure so it can flow out of a rusqlite row closure.
fn decode_err<E: std::fmt::Display>(e: E) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        0,
        rusqlite::types::Type::Text,
        Box::new(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            e.to_string(),
        )),
    )
}

fn col_uuid(raw: String) -> rusqlite::Result<Uuid> {
    Uuid::parse_str(&raw).map_err(decode_err)
}

fn col_date(raw: String) -> rusqlite::Result<NaiveDate> {
    raw.parse().map_err(decode_err)
}

fn col_ts(raw: String) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(&raw)
        .map(|d| d.with_timezone(&Utc))
        .map_err(decode_err)
}

fn col_dec(raw: String) -> rusqlite::Result<Decimal> {
    Decimal::from_str(&raw).map_err(decode_err)
}

fn map_goal(row: &Row<'_>) -> rusqlite::Result<Goal> {
    let proof: String = row.get(8)?;
    let proof = match proof.as_str() {
        "text" => ProofKind::Text,
        "photo" => ProofKind::Photo,
        "video" => ProofKind::Video,
        "friend" => ProofKind::Friend,
        other => return Err(decode_err(format!("unknown proof kind: {other}"))),
    };
    let review: String = row.get(9)?;
    let review = match review.as_str() {
        "automated" => ReviewMode::Automated,
        "human" => ReviewMode::Human,
        other => return Err(decode_err(format!("unknown review mode: {other}"))),
    };
    Ok(Goal {
        id: col_uuid(row.get(0)?)?,
        owner_id: row.get(1)?,
        title: row.get(2)?,
        description: row.get(3)?,
        start_date: col_date(row.get(4)?)?,
        end_date: row.get::<_, Option<String>>(5)?.map(col_date).transpose()?,
        recurrence: serde_json::from_str(&row.get::<_, String>(6)?).map_err(decode_err)?,
        stake_amount: col_dec(row.get(7)?)?,
        verification: ic_goal::VerificationMode { proof, review },
        time_of_day: row
            .get::<_, Option<String>>(10)?
            .map(|raw| raw.parse().map_err(decode_err))
            .transpose()?,
        duration_minutes: row.get(11)?,
        is_active: row.get(12)?,
        is_completed: row.get(13)?,
        created_at: col_ts(row.get(14)?)?,
        updated_at: col_ts(row.get(15)?)?,
    })
}

fn map_obligation(row: &Row<'_>) -> rusqlite::Result<Obligation> {
    let status: String = row.get(3)?;
    Ok(Obligation {
        id: col_uuid(row.get(0)?)?,
        goal_id: col_uuid(row.get(1)?)?,
        date: col_date(row.get(2)?)?,
        status: status.parse::<ObligationStatus>().map_err(decode_err)?,
        stake_snapshot: col_dec(row.get(4)?)?,
        penalty_applied: row.get(5)?,
        completed_at: row.get::<_, Option<String>>(6)?.map(col_ts).transpose()?,
        notes: row.get(7)?,
        created_at: col_ts(row.get(8)?)?,
    })
}

fn map_submission(row: &Row<'_>) -> rusqlite::Result<ProofSubmission> {
    let status: String = row.get(3)?;
    Ok(ProofSubmission {
        id: col_uuid(row.get(0)?)?,
        obligation_id: col_uuid(row.get(1)?)?,
        payload: serde_json::from_str(&row.get::<_, String>(2)?).map_err(decode_err)?,
        status: status.parse::<SubmissionStatus>().map_err(decode_err)?,
        submitted_at: col_ts(row.get(4)?)?,
        confidence_score: row.get(5)?,
        reviewed_by: row.get(6)?,
        reviewed_at: row.get::<_, Option<String>>(7)?.map(col_ts).transpose()?,
        review_notes: row.get(8)?,
    })
}

fn map_token(row: &Row<'_>) -> rusqlite::Result<VerificationToken> {
    Ok(VerificationToken {
        id: col_uuid(row.get(0)?)?,
        submission_id: col_uuid(row.get(1)?)?,
        verifier_id: row.get(2)?,
        digest: row.get(3)?,
        issued_at: col_ts(row.get(4)?)?,
        expires_at: col_ts(row.get(5)?)?,
        used: row.get(6)?,
    })
}

fn map_settlement(row: &Row<'_>) -> rusqlite::Result<Settlement> {
    let status: String = row.get(4)?;
    Ok(Settlement {
        id: col_uuid(row.get(0)?)?,
        obligation_id: col_uuid(row.get(1)?)?,
        amount: col_dec(row.get(2)?)?,
        amount_collected: col_dec(row.get(3)?)?,
        status: status.parse::<SettlementStatus>().map_err(decode_err)?,
        processed_at: row.get::<_, Option<String>>(5)?.map(col_ts).transpose()?,
        retry_count: row.get(6)?,
        next_retry_at: row.get::<_, Option<String>>(7)?.map(col_ts).transpose()?,
        notes: row.get(8)?,
        created_at: col_ts(row.get(9)?)?,
    })
}

fn map_transaction(row: &Row<'_>) -> rusqlite::Result<WalletTransaction> {
    let kind: String = row.get(4)?;
    let kind = match kind.as_str() {
        "deposit" => TransactionType::Deposit,
        "stake" => TransactionType::Stake,
        "unstake" => TransactionType::Unstake,
        "penalty" => TransactionType::Penalty,
        "reward" => TransactionType::Reward,
        other => return Err(decode_err(format!("unknown transaction type: {other}"))),
    };
    let status: String = row.get(5)?;
    let status = match status.as_str() {
        "pending" => TransactionStatus::Pending,
        "success" => TransactionStatus::Success,
        "failed" => TransactionStatus::Failed,
        other => return Err(decode_err(format!("unknown transaction status: {other}"))),
    };
    Ok(WalletTransaction {
        id: col_uuid(row.get(0)?)?,
        user_id: row.get(1)?,
        reference: row.get(2)?,
        amount: col_dec(row.get(3)?)?,
        kind,
        status,
        created_at: col_ts(row.get(6)?)?,
    })
}

fn read_wallet(conn: &Connection, user_id: &str) -> Result<Option<Wallet>, EngineError> {
    conn.query_row(
        "SELECT user_id, balance, staked_balance FROM wallets WHERE user_id = ?1",
        params![user_id],
        |row| {
            Ok(Wallet {
                user_id: row.get(0)?,
                balance: col_dec(row.get(1)?)?,
                staked_balance: col_dec(row.get(2)?)?,
            })
        },
    )
    .optional()
    .map_err(EngineError::from)
}

fn insert_transaction(conn: &Connection, tx: &WalletTransaction) -> Result<(), EngineError> {
    conn.execute(
        "INSERT INTO wallet_transactions
             (id, user_id, reference, amount, kind, status, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            tx.id.to_string(),
            tx.user_id,
            tx.reference,
            tx.amount.to_string(),
            tx.kind.to_string(),
            tx.status.to_string(),
            ts_to_sql(tx.created_at),
        ],
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ic_goal::{RecurrenceRule, VerificationMode};

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn dec(s: &str) -> Decimal {
        s.parse().unwrap()
    }

    fn store() -> EngineStore {
        EngineStore::open_in_memory().unwrap()
    }

    fn test_goal() -> Goal {
        Goal::new(
            "user-1",
            "Run 5k",
            date(2025, 10, 1),
            RecurrenceRule::Daily,
            dec("10"),
            VerificationMode {
                proof: ProofKind::Text,
                review: ReviewMode::Automated,
            },
        )
    }

    #[test]
    fn goal_round_trip() {
        let store = store();
        let goal = test_goal();
        store.insert_goal(&goal).unwrap();

        let found = store.goal(goal.id).unwrap().unwrap();
        assert_eq!(found.title, "Run 5k");
        assert_eq!(found.stake_amount, dec("10"));
        assert_eq!(found.recurrence, RecurrenceRule::Daily);
        assert_eq!(found.verification.proof, ProofKind::Text);
    }

    #[test]
    fn invalid_goal_is_rejected_before_writing() {
        let store = store();
        let mut goal = test_goal();
        goal.end_date = Some(date(2025, 9, 1));
        assert!(store.insert_goal(&goal).is_err());
        assert!(store.goal(goal.id).unwrap().is_none());
    }

    #[test]
    fn obligation_insert_is_idempotent_per_goal_date() {
        let store = store();
        let goal = test_goal();
        store.insert_goal(&goal).unwrap();

        let first = Obligation::new(&goal, date(2025, 10, 1));
        let second = Obligation::new(&goal, date(2025, 10, 1));
        assert!(store.insert_obligation_if_absent(&first).unwrap());
        // Same (goal, date), different id: swallowed as a no-op.
        assert!(!store.insert_obligation_if_absent(&second).unwrap());

        assert_eq!(store.obligations_for_goal(goal.id).unwrap().len(), 1);
    }

    #[test]
    fn transition_is_gated_on_pending() {
        let store = store();
        let goal = test_goal();
        store.insert_goal(&goal).unwrap();
        let ob = Obligation::new(&goal, date(2025, 10, 1));
        store.insert_obligation_if_absent(&ob).unwrap();

        let now = Utc::now();
        assert!(store
            .transition_obligation(ob.id, ObligationStatus::Completed, now)
            .unwrap());
        // Second transition loses the gate.
        assert!(!store
            .transition_obligation(ob.id, ObligationStatus::Missed, now)
            .unwrap());

        let found = store.obligation(ob.id).unwrap().unwrap();
        assert_eq!(found.status, ObligationStatus::Completed);
        assert!(found.completed_at.is_some());
    }

    #[test]
    fn duplicate_submission_maps_to_typed_error() {
        let store = store();
        let goal = test_goal();
        store.insert_goal(&goal).unwrap();
        let ob = Obligation::new(&goal, date(2025, 10, 1));
        store.insert_obligation_if_absent(&ob).unwrap();

        let payload = crate::submission::ProofPayload::Text {
            content: "finished the whole route today".to_string(),
        };
        let first = ProofSubmission::new(ob.id, payload.clone());
        let second = ProofSubmission::new(ob.id, payload);
        store.insert_submission(&first).unwrap();
        assert!(matches!(
            store.insert_submission(&second),
            Err(EngineError::DuplicateSubmission(id)) if id == ob.id
        ));
    }

    #[test]
    fn overdue_pending_skips_obligations_with_submissions() {
        let store = store();
        let goal = test_goal();
        store.insert_goal(&goal).unwrap();

        let with_sub = Obligation::new(&goal, date(2025, 10, 1));
        let without_sub = Obligation::new(&goal, date(2025, 10, 2));
        store.insert_obligation_if_absent(&with_sub).unwrap();
        store.insert_obligation_if_absent(&without_sub).unwrap();

        let sub = ProofSubmission::new(
            with_sub.id,
            crate::submission::ProofPayload::Text {
                content: "awaiting my verifier's decision".to_string(),
            },
        );
        store.insert_submission(&sub).unwrap();

        let overdue = store.overdue_pending(date(2025, 10, 3)).unwrap();
        assert_eq!(overdue.len(), 1);
        assert_eq!(overdue[0].id, without_sub.id);
    }

    #[test]
    fn completed_count_counts_only_completed_in_window() {
        let store = store();
        let goal = test_goal();
        store.insert_goal(&goal).unwrap();

        let now = Utc::now();
        for (day, complete) in [(1, true), (2, true), (3, false)] {
            let ob = Obligation::new(&goal, date(2025, 10, day));
            store.insert_obligation_if_absent(&ob).unwrap();
            if complete {
                store
                    .transition_obligation(ob.id, ObligationStatus::Completed, now)
                    .unwrap();
            }
        }

        let count = store
            .completed_count(goal.id, date(2025, 10, 1), date(2025, 10, 3))
            .unwrap();
        assert_eq!(count, 2);
        let count = store
            .completed_count(goal.id, date(2025, 10, 2), date(2025, 10, 3))
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn expire_goals_is_idempotent() {
        let store = store();
        let mut goal = test_goal();
        goal.end_date = Some(date(2025, 10, 5));
        store.insert_goal(&goal).unwrap();

        let now = Utc::now();
        let expired = store.expire_goals(date(2025, 10, 6), now).unwrap();
        assert_eq!(expired.len(), 1);

        let again = store.expire_goals(date(2025, 10, 6), now).unwrap();
        assert!(again.is_empty());

        let found = store.goal(goal.id).unwrap().unwrap();
        assert!(!found.is_active);
        assert!(found.is_completed);
    }

    #[test]
    fn stake_writes_balance_and_audit_row_together() {
        let mut store = store();
        store.record_deposit("user-1", "ref-1", dec("100")).unwrap();
        store.confirm_deposit("ref-1", true).unwrap();

        let wallet = store.stake_funds("user-1", dec("30")).unwrap();
        assert_eq!(wallet.balance, dec("70"));
        assert_eq!(wallet.staked_balance, dec("30"));

        let txs = store.transactions_for("user-1").unwrap();
        assert_eq!(txs.len(), 2);
        assert!(txs.iter().any(|t| t.kind == TransactionType::Stake));
    }

    #[test]
    fn stake_failure_leaves_no_audit_row() {
        let mut store = store();
        store.create_wallet_if_absent("user-1").unwrap();

        assert!(store.stake_funds("user-1", dec("30")).is_err());
        assert!(store.transactions_for("user-1").unwrap().is_empty());
        let wallet = store.wallet("user-1").unwrap().unwrap();
        assert_eq!(wallet.balance, Decimal::ZERO);
    }

    #[test]
    fn deposit_confirmation_is_idempotent_on_reference() {
        let mut store = store();
        store.record_deposit("user-1", "ref-1", dec("50")).unwrap();

        assert!(store.confirm_deposit("ref-1", true).unwrap());
        // Replay credits nothing.
        assert!(!store.confirm_deposit("ref-1", true).unwrap());
        // Unknown references are a no-op too.
        assert!(!store.confirm_deposit("ref-404", true).unwrap());

        let wallet = store.wallet("user-1").unwrap().unwrap();
        assert_eq!(wallet.balance, dec("50"));
    }

    #[test]
    fn failed_deposit_never_credits() {
        let mut store = store();
        store.record_deposit("user-1", "ref-1", dec("50")).unwrap();
        assert!(store.confirm_deposit("ref-1", false).unwrap());

        let wallet = store.wallet("user-1").unwrap().unwrap();
        assert_eq!(wallet.balance, Decimal::ZERO);
        let txs = store.transactions_for("user-1").unwrap();
        assert_eq!(txs[0].status, TransactionStatus::Failed);
    }

    #[test]
    fn settlement_claim_gate_admits_one_writer() {
        let store = store();
        let goal = test_goal();
        store.insert_goal(&goal).unwrap();
        let ob = Obligation::new(&goal, date(2025, 10, 1));
        store.insert_obligation_if_absent(&ob).unwrap();

        let s = Settlement::new(ob.id, dec("10"));
        assert!(store.insert_settlement_if_absent(&s).unwrap());
        assert!(!store
            .insert_settlement_if_absent(&Settlement::new(ob.id, dec("10")))
            .unwrap());

        let now = Utc::now();
        assert!(store.claim_settlement(s.id, now).unwrap());
        // Already processing, freshly claimed: second claim loses.
        assert!(!store.claim_settlement(s.id, now).unwrap());
    }

    #[test]
    fn full_forfeiture_completes_settlement_atomically() {
        let mut store = store();
        let goal = test_goal();
        store.insert_goal(&goal).unwrap();
        let ob = Obligation::new(&goal, date(2025, 10, 1));
        store.insert_obligation_if_absent(&ob).unwrap();

        store.record_deposit("user-1", "ref-1", dec("100")).unwrap();
        store.confirm_deposit("ref-1", true).unwrap();
        store.stake_funds("user-1", dec("50")).unwrap();

        let s = Settlement::new(ob.id, dec("10"));
        store.insert_settlement_if_absent(&s).unwrap();
        let now = Utc::now();
        store.claim_settlement(s.id, now).unwrap();

        let outcome = store.apply_forfeiture(&s, &ob, "user-1", now).unwrap();
        assert!(outcome.is_full());
        assert_eq!(outcome.forfeited, dec("10"));

        let settled = store.settlement_for_obligation(ob.id).unwrap().unwrap();
        assert_eq!(settled.status, SettlementStatus::Completed);
        assert!(settled.processed_at.is_some());

        let ob_after = store.obligation(ob.id).unwrap().unwrap();
        assert!(ob_after.penalty_applied);

        let wallet = store.wallet("user-1").unwrap().unwrap();
        assert_eq!(wallet.staked_balance, dec("40"));

        let penalties: Vec<_> = store
            .transactions_for("user-1")
            .unwrap()
            .into_iter()
            .filter(|t| t.kind == TransactionType::Penalty)
            .collect();
        assert_eq!(penalties.len(), 1);
        assert_eq!(penalties[0].amount, dec("10"));
    }

    #[test]
    fn partial_forfeiture_fails_settlement_with_retry() {
        let mut store = store();
        let goal = test_goal();
        store.insert_goal(&goal).unwrap();
        let ob = Obligation::new(&goal, date(2025, 10, 1));
        store.insert_obligation_if_absent(&ob).unwrap();

        store.record_deposit("user-1", "ref-1", dec("5")).unwrap();
        store.confirm_deposit("ref-1", true).unwrap();
        store.stake_funds("user-1", dec("5")).unwrap();

        let s = Settlement::new(ob.id, dec("10"));
        store.insert_settlement_if_absent(&s).unwrap();
        let now = Utc::now();
        store.claim_settlement(s.id, now).unwrap();

        let outcome = store.apply_forfeiture(&s, &ob, "user-1", now).unwrap();
        assert!(!outcome.is_full());
        assert_eq!(outcome.forfeited, dec("5"));

        let settled = store.settlement_for_obligation(ob.id).unwrap().unwrap();
        assert_eq!(settled.status, SettlementStatus::Failed);
        assert_eq!(settled.amount_collected, dec("5"));
        assert_eq!(settled.retry_count, 1);
        assert!(settled.next_retry_at.unwrap() > now);
        assert!(settled.notes.contains("covered 5 of 10"));

        // Partial penalty is still recorded for what was taken.
        let penalties: Vec<_> = store
            .transactions_for("user-1")
            .unwrap()
            .into_iter()
            .filter(|t| t.kind == TransactionType::Penalty)
            .collect();
        assert_eq!(penalties.len(), 1);
        assert_eq!(penalties[0].amount, dec("5"));

        // The obligation's idempotency guard stays down.
        assert!(!store.obligation(ob.id).unwrap().unwrap().penalty_applied);
    }

    #[test]
    fn retry_after_partial_pursues_only_the_remainder() {
        let mut store = store();
        let goal = test_goal();
        store.insert_goal(&goal).unwrap();
        let ob = Obligation::new(&goal, date(2025, 10, 1));
        store.insert_obligation_if_absent(&ob).unwrap();

        store.record_deposit("user-1", "ref-1", dec("4")).unwrap();
        store.confirm_deposit("ref-1", true).unwrap();
        store.stake_funds("user-1", dec("4")).unwrap();

        let s = Settlement::new(ob.id, dec("10"));
        store.insert_settlement_if_absent(&s).unwrap();
        let now = Utc::now();
        store.claim_settlement(s.id, now).unwrap();
        store.apply_forfeiture(&s, &ob, "user-1", now).unwrap();

        // A later top-up stakes plenty, but the retry may only take
        // what is still owed on the snapshot.
        store.record_deposit("user-1", "ref-2", dec("20")).unwrap();
        store.confirm_deposit("ref-2", true).unwrap();
        store.stake_funds("user-1", dec("20")).unwrap();

        let later = now + chrono::Duration::hours(25);
        let s = store.settlement_for_obligation(ob.id).unwrap().unwrap();
        assert!(store.claim_settlement(s.id, later).unwrap());
        let outcome = store.apply_forfeiture(&s, &ob, "user-1", later).unwrap();
        assert!(outcome.is_full());
        assert_eq!(outcome.requested, dec("6"));
        assert_eq!(outcome.forfeited, dec("6"));

        let settled = store.settlement_for_obligation(ob.id).unwrap().unwrap();
        assert_eq!(settled.status, SettlementStatus::Completed);
        assert_eq!(settled.amount_collected, dec("10"));
        assert!(store.obligation(ob.id).unwrap().unwrap().penalty_applied);

        let total: Decimal = store
            .transactions_for("user-1")
            .unwrap()
            .into_iter()
            .filter(|t| t.kind == TransactionType::Penalty)
            .map(|t| t.amount)
            .sum();
        assert_eq!(total, settled.amount);
        assert_eq!(store.wallet("user-1").unwrap().unwrap().staked_balance, dec("14"));
    }

    #[test]
    fn retryable_settlements_respects_schedule_and_cap() {
        let store = store();
        let goal = test_goal();
        store.insert_goal(&goal).unwrap();
        let now = Utc::now();

        // One retryable (retry time in the past), one scheduled for
        // the future, one exhausted.
        let mut ids = Vec::new();
        for (day, retry_count, offset_secs) in [(1, 1, -60), (2, 1, 3600), (3, 5, -60)] {
            let ob = Obligation::new(&goal, date(2025, 10, day));
            store.insert_obligation_if_absent(&ob).unwrap();
            let s = Settlement::new(ob.id, dec("10"));
            store.insert_settlement_if_absent(&s).unwrap();
            store
                .record_settlement_failure(
                    s.id,
                    retry_count,
                    now + chrono::Duration::seconds(offset_secs),
                    "test",
                )
                .unwrap();
            ids.push(s.id);
        }

        let due = store.retryable_settlements(now).unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].id, ids[0]);
    }

    #[test]
    fn token_single_use_gate() {
        let store = store();
        let goal = test_goal();
        store.insert_goal(&goal).unwrap();
        let ob = Obligation::new(&goal, date(2025, 10, 1));
        store.insert_obligation_if_absent(&ob).unwrap();
        let sub = ProofSubmission::new(
            ob.id,
            crate::submission::ProofPayload::Friend {
                verifier_id: "friend-1".to_string(),
                message: "ran with me today".to_string(),
            },
        );
        store.insert_submission(&sub).unwrap();

        let (token, cleartext) = VerificationToken::issue(sub.id, "friend-1", Utc::now());
        store.insert_token(&token).unwrap();

        let found = store
            .token_by_digest(&crate::token::token_digest(&cleartext))
            .unwrap()
            .unwrap();
        assert_eq!(found.id, token.id);
        assert!(!found.used);

        assert!(store.mark_token_used(token.id).unwrap());
        assert!(!store.mark_token_used(token.id).unwrap());
    }

    #[test]
    fn goal_delete_cascades_to_obligations() {
        let store = store();
        let goal = test_goal();
        store.insert_goal(&goal).unwrap();
        let ob = Obligation::new(&goal, date(2025, 10, 1));
        store.insert_obligation_if_absent(&ob).unwrap();

        assert!(store.delete_goal(goal.id).unwrap());
        assert!(store.obligation(ob.id).unwrap().is_none());
    }
}
