//! Video status state machine.
//!
//! `published` is terminal. Everything not listed in [`TRANSITIONS`] is an
//! invalid transition.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::guard::Action;
use crate::error::AppError;
use crate::models::activity::ActionType;
use crate::models::video::VideoStatus;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VideoEvent {
    Submit,
    Approve,
    Reject,
    Resubmit,
    Publish,
    Edit,
}

impl VideoEvent {
    #[cfg(test)]
    pub const ALL: [VideoEvent; 6] = [
        Self::Submit,
        Self::Approve,
        Self::Reject,
        Self::Resubmit,
        Self::Publish,
        Self::Edit,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Submit => "submit",
            Self::Approve => "approve",
            Self::Reject => "reject",
            Self::Resubmit => "resubmit",
            Self::Publish => "publish",
            Self::Edit => "edit",
        }
    }

    /// What the guard is asked before this event may fire.
    pub fn required_action(self) -> Action {
        match self {
            Self::Submit => Action::SubmitVideo,
            Self::Approve => Action::ApproveVideo,
            Self::Reject => Action::RejectVideo,
            Self::Resubmit => Action::ResubmitVideo,
            Self::Publish => Action::PublishVideo,
            Self::Edit => Action::EditVideo,
        }
    }

    /// The audit entry written when this event is applied.
    pub fn logged_as(self) -> ActionType {
        match self {
            Self::Submit | Self::Resubmit => ActionType::VideoSubmitted,
            Self::Approve => ActionType::VideoApproved,
            Self::Reject => ActionType::VideoRejected,
            Self::Publish => ActionType::VideoPublished,
            Self::Edit => ActionType::VideoEdited,
        }
    }
}

impl fmt::Display for VideoEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub const TRANSITIONS: &[(VideoStatus, VideoEvent, VideoStatus)] = &[
    (VideoStatus::Draft, VideoEvent::Submit, VideoStatus::PendingReview),
    (VideoStatus::Draft, VideoEvent::Edit, VideoStatus::Draft),
    (VideoStatus::PendingReview, VideoEvent::Approve, VideoStatus::Approved),
    (VideoStatus::PendingReview, VideoEvent::Reject, VideoStatus::Rejected),
    (VideoStatus::Rejected, VideoEvent::Resubmit, VideoStatus::PendingReview),
    (VideoStatus::Approved, VideoEvent::Publish, VideoStatus::Published),
];

pub fn allowed_events(from: VideoStatus) -> Vec<VideoEvent> {
    TRANSITIONS
        .iter()
        .filter(|(s, _, _)| *s == from)
        .map(|(_, e, _)| *e)
        .collect()
}

pub fn next_status(from: VideoStatus, event: VideoEvent) -> Result<VideoStatus, AppError> {
    TRANSITIONS
        .iter()
        .find(|(s, e, _)| *s == from && *e == event)
        .map(|(_, _, to)| *to)
        .ok_or_else(|| AppError::InvalidTransition {
            from,
            event,
            allowed: allowed_events(from),
        })
}
