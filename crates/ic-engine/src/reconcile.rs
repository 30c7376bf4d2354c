// reconcile.rs — proof intake and verification decisions.
//
// `submit_proof` is the single entry point for proof. Its checks run
// in a fixed order so callers see the most specific error: existence,
// ownership, obligation still open, payload shape, payload content,
// no prior submission, grace window. Automated goals are scored
// synchronously and either decided on the spot or escalated; friend
// verification issues a single-use token instead.
//
// Decisions (human or token) funnel through one private path so the
// obligation transition, the settlement trigger, and the events are
// identical no matter who decided.

use chrono::{DateTime, NaiveDate, Utc};
use tracing::{info, warn};

use ic_goal::{Goal, ReviewMode};

use crate::engine::Engine;
use crate::error::EngineError;
use crate::events::EngineEvent;
use crate::obligation::{Obligation, ObligationStatus};
use crate::submission::{ProofPayload, ProofSubmission, SubmissionStatus};
use crate::token::{token_digest, VerificationToken};
use crate::verify::Verdict;
use uuid::Uuid;

/// What a verifier sees when they open a token link, before deciding.
#[derive(Debug, Clone)]
pub struct TokenReview {
    pub owner_id: String,
    pub goal_title: String,
    pub obligation_date: NaiveDate,
    pub payload: ProofPayload,
}

/// A successful proof submission.
///
/// The cleartext friend-verification token exists only here, for the
/// caller to deliver to the verifier out of band. It is a bearer
/// secret: events and logs carry its digest, never the cleartext.
#[derive(Debug, Clone)]
pub struct SubmitReceipt {
    pub submission: ProofSubmission,
    pub verification_token: Option<String>,
}

impl Engine {
    /// Submit proof for an obligation. On success the returned
    /// submission reflects any synchronous automated decision.
    pub fn submit_proof(
        &mut self,
        obligation_id: Uuid,
        user_id: &str,
        payload: ProofPayload,
        today: NaiveDate,
    ) -> Result<SubmitReceipt, EngineError> {
        let ob = self
            .store
            .obligation(obligation_id)?
            .ok_or(EngineError::ObligationNotFound(obligation_id))?;
        let goal = self
            .store
            .goal(ob.goal_id)?
            .ok_or(EngineError::GoalNotFound(ob.goal_id))?;

        if goal.owner_id != user_id {
            return Err(EngineError::Forbidden);
        }
        if ob.status != ObligationStatus::Pending {
            return Err(EngineError::ObligationClosed(ob.id));
        }
        if payload.kind() != goal.verification.proof {
            return Err(EngineError::InvalidPayloadShape {
                required: goal.verification.proof,
                provided: payload.kind(),
            });
        }
        payload.validate()?;
        if let ProofPayload::Friend { verifier_id, .. } = &payload {
            if verifier_id == &goal.owner_id {
                return Err(EngineError::SelfVerificationForbidden);
            }
        }
        if self.store.submission_for_obligation(ob.id)?.is_some() {
            return Err(EngineError::DuplicateSubmission(ob.id));
        }

        let days_late = (today - ob.date).num_days();
        if days_late > self.config.grace_period_days {
            return Err(EngineError::SubmissionTooLate {
                days_late,
                grace_days: self.config.grace_period_days,
            });
        }

        let mut sub = ProofSubmission::new(ob.id, payload);
        self.store.insert_submission(&sub)?;
        info!(obligation_id = %ob.id, submission_id = %sub.id, "proof submitted");

        let now = Utc::now();
        if let ProofPayload::Friend { verifier_id, .. } = &sub.payload {
            sub.status = SubmissionStatus::UnderReview;
            self.store.update_submission_if_undecided(&sub)?;

            let (token, cleartext) = VerificationToken::issue(sub.id, verifier_id.clone(), now);
            self.store.insert_token(&token)?;
            self.dispatch(&EngineEvent::VerificationRequested {
                verifier_id: verifier_id.clone(),
                submission_id: sub.id,
                token_digest: token.digest,
                timestamp: now,
            });
            return Ok(SubmitReceipt {
                submission: sub,
                verification_token: Some(cleartext),
            });
        }

        match goal.verification.review {
            ReviewMode::Human => {
                sub.status = SubmissionStatus::UnderReview;
                self.store.update_submission_if_undecided(&sub)?;
                self.dispatch(&EngineEvent::ProofUnderReview {
                    user_id: goal.owner_id.clone(),
                    submission_id: sub.id,
                    timestamp: now,
                });
                Ok(SubmitReceipt {
                    submission: sub,
                    verification_token: None,
                })
            }
            ReviewMode::Automated => {
                self.auto_verify(sub, &ob, &goal, now)
                    .map(|submission| SubmitReceipt {
                        submission,
                        verification_token: None,
                    })
            }
        }
    }

    /// Score a submission and decide or escalate.
    fn auto_verify(
        &mut self,
        mut sub: ProofSubmission,
        ob: &Obligation,
        goal: &Goal,
        now: DateTime<Utc>,
    ) -> Result<ProofSubmission, EngineError> {
        match self.verifier.score(&sub.payload)? {
            Verdict::Score(score) if score >= self.config.approve_threshold => {
                sub.status = SubmissionStatus::Approved;
                sub.confidence_score = Some(score);
                sub.reviewed_at = Some(now);
                sub.review_notes = format!("auto-approved (score {score:.2})");
                self.store.update_submission_if_undecided(&sub)?;
                self.complete_obligation(ob, goal, now)?;
                Ok(sub)
            }
            Verdict::Score(score) if score <= self.config.reject_threshold => {
                sub.status = SubmissionStatus::Rejected;
                sub.confidence_score = Some(score);
                sub.reviewed_at = Some(now);
                sub.review_notes = format!("auto-rejected (score {score:.2})");
                self.store.update_submission_if_undecided(&sub)?;
                self.miss_obligation(ob, goal, now);
                Ok(sub)
            }
            Verdict::Score(score) => {
                sub.status = SubmissionStatus::UnderReview;
                sub.confidence_score = Some(score);
                self.store.update_submission_if_undecided(&sub)?;
                self.dispatch(&EngineEvent::ProofUnderReview {
                    user_id: goal.owner_id.clone(),
                    submission_id: sub.id,
                    timestamp: now,
                });
                Ok(sub)
            }
            Verdict::Inconclusive => {
                sub.status = SubmissionStatus::UnderReview;
                self.store.update_submission_if_undecided(&sub)?;
                self.dispatch(&EngineEvent::ProofUnderReview {
                    user_id: goal.owner_id.clone(),
                    submission_id: sub.id,
                    timestamp: now,
                });
                Ok(sub)
            }
        }
    }

    /// Record a reviewer's decision on an escalated submission.
    ///
    /// The reviewer must not be the goal's owner.
    pub fn decide(
        &mut self,
        submission_id: Uuid,
        reviewer_id: &str,
        approve: bool,
        notes: &str,
    ) -> Result<Obligation, EngineError> {
        let sub = self
            .store
            .submission(submission_id)?
            .ok_or(EngineError::SubmissionNotFound(submission_id))?;
        if sub.status.is_decided() {
            return Err(EngineError::AlreadyDecided(sub.id));
        }
        let ob = self
            .store
            .obligation(sub.obligation_id)?
            .ok_or(EngineError::ObligationNotFound(sub.obligation_id))?;
        let goal = self
            .store
            .goal(ob.goal_id)?
            .ok_or(EngineError::GoalNotFound(ob.goal_id))?;
        if reviewer_id == goal.owner_id {
            return Err(EngineError::SelfVerificationForbidden);
        }

        self.apply_decision(sub, ob, goal, reviewer_id, approve, notes)
    }

    /// Look a friend-verification token up for display. Fails the same
    /// way for unknown, expired, and spent tokens.
    pub fn resolve_token(
        &self,
        token: &str,
        now: DateTime<Utc>,
    ) -> Result<TokenReview, EngineError> {
        let record = self.valid_token(token, now)?;
        let sub = self
            .store
            .submission(record.submission_id)?
            .ok_or(EngineError::SubmissionNotFound(record.submission_id))?;
        let ob = self
            .store
            .obligation(sub.obligation_id)?
            .ok_or(EngineError::ObligationNotFound(sub.obligation_id))?;
        let goal = self
            .store
            .goal(ob.goal_id)?
            .ok_or(EngineError::GoalNotFound(ob.goal_id))?;

        Ok(TokenReview {
            owner_id: goal.owner_id,
            goal_title: goal.title,
            obligation_date: ob.date,
            payload: sub.payload,
        })
    }

    /// Decide a friend-verified submission via its token. The token is
    /// spent first; a replay, even concurrent, cannot decide twice.
    pub fn decide_via_token(
        &mut self,
        token: &str,
        approve: bool,
        notes: &str,
        now: DateTime<Utc>,
    ) -> Result<Obligation, EngineError> {
        let record = self.valid_token(token, now)?;
        let sub = self
            .store
            .submission(record.submission_id)?
            .ok_or(EngineError::SubmissionNotFound(record.submission_id))?;
        if sub.status.is_decided() {
            return Err(EngineError::AlreadyDecided(sub.id));
        }
        let ob = self
            .store
            .obligation(sub.obligation_id)?
            .ok_or(EngineError::ObligationNotFound(sub.obligation_id))?;
        let goal = self
            .store
            .goal(ob.goal_id)?
            .ok_or(EngineError::GoalNotFound(ob.goal_id))?;
        if record.verifier_id == goal.owner_id {
            return Err(EngineError::SelfVerificationForbidden);
        }

        if !self.store.mark_token_used(record.id)? {
            return Err(EngineError::InvalidOrExpiredToken);
        }
        let verifier_id = record.verifier_id.clone();
        self.apply_decision(sub, ob, goal, &verifier_id, approve, notes)
    }

    fn valid_token(
        &self,
        token: &str,
        now: DateTime<Utc>,
    ) -> Result<VerificationToken, EngineError> {
        let record = self
            .store
            .token_by_digest(&token_digest(token))?
            .ok_or(EngineError::InvalidOrExpiredToken)?;
        if record.used || record.is_expired(now) {
            return Err(EngineError::InvalidOrExpiredToken);
        }
        Ok(record)
    }

    /// The one path every decision takes: write the submission, flip
    /// the obligation, fire events, and trigger settlement on reject.
    fn apply_decision(
        &mut self,
        mut sub: ProofSubmission,
        ob: Obligation,
        goal: Goal,
        reviewer_id: &str,
        approve: bool,
        notes: &str,
    ) -> Result<Obligation, EngineError> {
        let now = Utc::now();
        sub.status = if approve {
            SubmissionStatus::Approved
        } else {
            SubmissionStatus::Rejected
        };
        sub.reviewed_by = Some(reviewer_id.to_string());
        sub.reviewed_at = Some(now);
        sub.review_notes = notes.to_string();

        if !self.store.update_submission_if_undecided(&sub)? {
            return Err(EngineError::AlreadyDecided(sub.id));
        }
        info!(
            submission_id = %sub.id,
            approve,
            reviewer = reviewer_id,
            "submission decided"
        );

        if approve {
            self.complete_obligation(&ob, &goal, now)?;
        } else {
            self.miss_obligation(&ob, &goal, now);
        }

        self.store
            .obligation(ob.id)?
            .ok_or(EngineError::ObligationNotFound(ob.id))
    }

    fn complete_obligation(
        &mut self,
        ob: &Obligation,
        goal: &Goal,
        now: DateTime<Utc>,
    ) -> Result<(), EngineError> {
        if self
            .store
            .transition_obligation(ob.id, ObligationStatus::Completed, now)?
        {
            self.dispatch(&EngineEvent::ObligationCompleted {
                user_id: goal.owner_id.clone(),
                goal_title: goal.title.clone(),
                date: ob.date,
                timestamp: now,
            });
        }
        Ok(())
    }

    /// Mark the obligation missed and kick off settlement. A transient
    /// settlement failure is logged, not propagated: the failed row is
    /// already on record and the retry pass will pick it up.
    fn miss_obligation(&mut self, ob: &Obligation, goal: &Goal, now: DateTime<Utc>) {
        match self
            .store
            .transition_obligation(ob.id, ObligationStatus::Missed, now)
        {
            Ok(true) => {
                self.dispatch(&EngineEvent::ObligationMissed {
                    user_id: goal.owner_id.clone(),
                    goal_title: goal.title.clone(),
                    date: ob.date,
                    timestamp: now,
                });
                if let Err(e) = self.settle(ob.id, now) {
                    warn!(obligation_id = %ob.id, "settlement deferred: {e}");
                }
            }
            Ok(false) => {}
            Err(e) => warn!(obligation_id = %ob.id, "missed transition failed: {e}"),
        }
    }
}
