// verify.rs — Automated proof verification.
//
// The Verifier seam lets the engine call an external classifier
// without knowing its transport. The contract on timeouts matters:
// a verifier that cannot answer within its deadline must return
// Inconclusive, never a score — inconclusive proof goes to a human,
// it is neither auto-approved nor auto-rejected.

use crate::error::EngineError;
use crate::submission::ProofPayload;

/// The outcome of automated verification.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Verdict {
    /// Confidence that the proof is genuine, in [0, 1].
    Score(f64),
    /// The verifier could not reach a confidence (timeout, unsupported
    /// payload). Routes to human review.
    Inconclusive,
}

/// Scores submitted proof. Implementations may call out to external
/// services; they must bound their own time and report `Inconclusive`
/// on timeout.
pub trait Verifier: Send + Sync {
    fn score(&self, payload: &ProofPayload) -> Result<Verdict, EngineError>;
}

/// The built-in scoring heuristic.
///
/// Deliberately simple, per payload kind:
/// - text: confidence grows with content length, saturating at 0.9
///   for a thorough write-up
/// - photo: presence of an image is worth a mid-range score — enough
///   to reach a human, never enough to auto-approve
/// - video: duration-based; a full-length recording scores high
/// - friend: never scored, always a human decision
pub struct HeuristicVerifier;

impl Verifier for HeuristicVerifier {
    fn score(&self, payload: &ProofPayload) -> Result<Verdict, EngineError> {
        let verdict = match payload {
            ProofPayload::Text { content } => {
                let len = content.trim().chars().count() as f64;
                Verdict::Score((len / 120.0).min(1.0) * 0.9)
            }
            ProofPayload::Photo { caption, .. } => {
                let base = 0.5;
                let bonus = if caption.trim().is_empty() { 0.0 } else { 0.1 };
                Verdict::Score(base + bonus)
            }
            ProofPayload::Video {
                duration_seconds, ..
            } => {
                if *duration_seconds >= 60 {
                    Verdict::Score(0.85)
                } else if *duration_seconds >= 10 {
                    Verdict::Score(0.5)
                } else {
                    Verdict::Score(0.2)
                }
            }
            ProofPayload::Friend { .. } => Verdict::Inconclusive,
        };
        Ok(verdict)
    }
}
