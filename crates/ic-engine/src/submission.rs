// submission.rs — ProofSubmission: evidence against a pending obligation.
//
// One submission per obligation (unique constraint). The payload is a
// closed tagged enum matching the four proof kinds; its shape must
// match the goal's configured verification mode. Once approved or
// rejected a submission is immutable.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use ic_goal::ProofKind;

use crate::error::EngineError;

/// Minimum length for text proof content (after trimming).
pub const MIN_TEXT_PROOF_CHARS: usize = 10;

/// Maximum caption length for photo/video proof.
pub const MAX_CAPTION_CHARS: usize = 255;

/// The submitted evidence, one shape per proof kind.
///
/// Photo and video payloads carry storage references only — the blob
/// store is an external collaborator.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ProofPayload {
    Text {
        content: String,
    },
    Photo {
        image_ref: String,
        #[serde(default)]
        caption: String,
    },
    Video {
        video_ref: String,
        #[serde(default)]
        caption: String,
        duration_seconds: u32,
    },
    Friend {
        verifier_id: String,
        #[serde(default)]
        message: String,
    },
}

impl ProofPayload {
    /// Which proof kind this payload satisfies.
    pub fn kind(&self) -> ProofKind {
        match self {
            ProofPayload::Text { .. } => ProofKind::Text,
            ProofPayload::Photo { .. } => ProofKind::Photo,
            ProofPayload::Video { .. } => ProofKind::Video,
            ProofPayload::Friend { .. } => ProofKind::Friend,
        }
    }

    /// Content-level validation, independent of the goal's mode.
    pub fn validate(&self) -> Result<(), EngineError> {
        match self {
            ProofPayload::Text { content } => {
                if content.trim().chars().count() < MIN_TEXT_PROOF_CHARS {
                    return Err(EngineError::InvalidPayload(format!(
                        "text proof must be at least {MIN_TEXT_PROOF_CHARS} characters"
                    )));
                }
            }
            ProofPayload::Photo { image_ref, caption } => {
                if image_ref.is_empty() {
                    return Err(EngineError::InvalidPayload(
                        "photo proof requires an image reference".to_string(),
                    ));
                }
                if caption.chars().count() > MAX_CAPTION_CHARS {
                    return Err(EngineError::InvalidPayload(format!(
                        "caption cannot exceed {MAX_CAPTION_CHARS} characters"
                    )));
                }
            }
            ProofPayload::Video {
                video_ref, caption, ..
            } => {
                if video_ref.is_empty() {
                    return Err(EngineError::InvalidPayload(
                        "video proof requires a video reference".to_string(),
                    ));
                }
                if caption.chars().count() > MAX_CAPTION_CHARS {
                    return Err(EngineError::InvalidPayload(format!(
                        "caption cannot exceed {MAX_CAPTION_CHARS} characters"
                    )));
                }
            }
            ProofPayload::Friend { verifier_id, .. } => {
                if verifier_id.is_empty() {
                    return Err(EngineError::InvalidPayload(
                        "friend proof requires a verifier".to_string(),
                    ));
                }
            }
        }
        Ok(())
    }
}

/// Submission lifecycle.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SubmissionStatus {
    /// Created, verification not yet resolved.
    Submitted,
    /// Escalated to a human verifier.
    UnderReview,
    /// Accepted — the obligation completed.
    Approved,
    /// Not accepted — the obligation missed.
    Rejected,
}

impl SubmissionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubmissionStatus::Submitted => "submitted",
            SubmissionStatus::UnderReview => "under_review",
            SubmissionStatus::Approved => "approved",
            SubmissionStatus::Rejected => "rejected",
        }
    }

    /// Approved and rejected are terminal.
    pub fn is_decided(&self) -> bool {
        matches!(self, SubmissionStatus::Approved | SubmissionStatus::Rejected)
    }
}

impl fmt::Display for SubmissionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SubmissionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "submitted" => Ok(SubmissionStatus::Submitted),
            "under_review" => Ok(SubmissionStatus::UnderReview),
            "approved" => Ok(SubmissionStatus::Approved),
            "rejected" => Ok(SubmissionStatus::Rejected),
            other => Err(format!("unknown submission status: {other}")),
        }
    }
}

/// A user's proof submission for one obligation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProofSubmission {
    /// Unique identifier for this submission.
    pub id: Uuid,

    /// The obligation this proves (one-to-one).
    pub obligation_id: Uuid,

    /// The submitted evidence.
    pub payload: ProofPayload,

    /// Current lifecycle state.
    pub status: SubmissionStatus,

    /// When the user submitted.
    pub submitted_at: DateTime<Utc>,

    /// Automated confidence score in [0, 1], if scoring ran.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence_score: Option<f64>,

    /// Who decided (human reviews only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reviewed_by: Option<String>,

    /// When the decision was made.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reviewed_at: Option<DateTime<Utc>>,

    /// Reviewer notes or the automated-verification summary.
    #[serde(default)]
    pub review_notes: String,
}

impl ProofSubmission {
    /// A new submission in the Submitted state.
    pub fn new(obligation_id: Uuid, payload: ProofPayload) -> Self {
        Self {
            id: Uuid::new_v4(),
            obligation_id,
            payload,
            status: SubmissionStatus::Submitted,
            submitted_at: Utc::now(),
            confidence_score: None,
            reviewed_by: None,
            reviewed_at: None,
            review_notes: String::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_kind_matches_variant() {
        let payload = ProofPayload::Text {
            content: "ran the full five kilometers".to_string(),
        };
        assert_eq!(payload.kind(), ProofKind::Text);

        let payload = ProofPayload::Friend {
            verifier_id: "friend-1".to_string(),
            message: String::new(),
        };
        assert_eq!(payload.kind(), ProofKind::Friend);
    }

    #[test]
    fn short_text_proof_is_invalid() {
        let payload = ProofPayload::Text {
            content: "  done  ".to_string(),
        };
        assert!(matches!(
            payload.validate(),
            Err(EngineError::InvalidPayload(_))
        ));
    }

    #[test]
    fn adequate_text_proof_is_valid() {
        let payload = ProofPayload::Text {
            content: "completed the session this morning".to_string(),
        };
        payload.validate().unwrap();
    }

    #[test]
    fn photo_without_reference_is_invalid() {
        let payload = ProofPayload::Photo {
            image_ref: String::new(),
            caption: String::new(),
        };
        assert!(payload.validate().is_err());
    }

    #[test]
    fn oversized_caption_is_invalid() {
        let payload = ProofPayload::Photo {
            image_ref: "photos/run.jpg".to_string(),
            caption: "x".repeat(MAX_CAPTION_CHARS + 1),
        };
        assert!(payload.validate().is_err());
    }

    #[test]
    fn decided_statuses_are_terminal() {
        assert!(SubmissionStatus::Approved.is_decided());
        assert!(SubmissionStatus::Rejected.is_decided());
        assert!(!SubmissionStatus::Submitted.is_decided());
        assert!(!SubmissionStatus::UnderReview.is_decided());
    }

    #[test]
    fn payload_serializes_with_kind_tag() {
        let payload = ProofPayload::Video {
            video_ref: "videos/workout.mp4".to_string(),
            caption: "morning workout".to_string(),
            duration_seconds: 312,
        };
        let json = serde_json::to_string(&payload).unwrap();
        assert!(json.contains("\"kind\":\"video\""));
        let restored: ProofPayload = serde_json::from_str(&json).unwrap();
        assert_eq!(payload, restored);
    }
}
