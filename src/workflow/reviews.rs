//! Review records for completed review cycles.

use chrono::Utc;
use uuid::Uuid;

use super::guard::Actor;
use super::lifecycle::VideoEvent;
use crate::error::AppError;
use crate::models::review::{Review, ReviewDecision};
use crate::models::video::{Video, VideoStatus};

/// Build the Review for an approve/reject decision on `video`.
///
/// Only a video leaving `pending_review` gets a review. Rejections must say why.
pub fn record(
    video: &Video,
    reviewer: &Actor,
    event: VideoEvent,
    feedback: Option<String>,
) -> Result<Review, AppError> {
    let decision = match event {
        VideoEvent::Approve => ReviewDecision::Approved,
        VideoEvent::Reject => ReviewDecision::Rejected,
        other => {
            return Err(AppError::Internal(format!(
                "no review is recorded for {other}"
            )));
        }
    };

    if video.status != VideoStatus::PendingReview {
        return Err(AppError::InvalidTransition {
            from: video.status,
            event,
            allowed: super::lifecycle::allowed_events(video.status),
        });
    }

    let feedback = feedback
        .map(|f| f.trim().to_string())
        .filter(|f| !f.is_empty());

    if decision == ReviewDecision::Rejected && feedback.is_none() {
        return Err(AppError::Validation(
            "Feedback is required when rejecting a video".into(),
        ));
    }

    Ok(Review {
        id: Uuid::new_v4(),
        video_id: video.id,
        reviewer_id: reviewer.user_id,
        decision,
        feedback,
        created_at: Utc::now(),
    })
}
