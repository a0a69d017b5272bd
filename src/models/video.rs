use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "video_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum VideoStatus {
    Draft,
    PendingReview,
    Approved,
    Rejected,
    Published,
}

impl VideoStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::PendingReview => "pending_review",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::Published => "published",
        }
    }
}

impl fmt::Display for VideoStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Video {
    pub id: Uuid,
    pub team_id: Uuid,
    pub uploader_id: Option<Uuid>,
    pub title: String,
    pub description: Option<String>,
    pub tags: Vec<String>,
    pub thumbnail_url: Option<String>,
    pub file_url: Option<String>,
    pub status: VideoStatus,
    pub scheduled_publish_at: Option<DateTime<Utc>>,
    pub external_video_id: Option<String>,
    /// Bumped on every write; the compare-and-swap token for concurrent updates.
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Default, Deserialize)]
pub struct CreateVideoRequest {
    pub title: String,
    pub description: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    pub thumbnail_url: Option<String>,
    pub file_url: Option<String>,
    pub scheduled_publish_at: Option<DateTime<Utc>>,
}

/// Absent fields are left alone; an empty string clears an optional field.
#[derive(Debug, Default, Deserialize)]
pub struct EditVideoRequest {
    pub title: Option<String>,
    pub description: Option<String>,
    pub tags: Option<Vec<String>>,
    pub thumbnail_url: Option<String>,
    pub file_url: Option<String>,
    #[serde(default, deserialize_with = "double_option")]
    pub scheduled_publish_at: Option<Option<DateTime<Utc>>>,
}

impl EditVideoRequest {
    pub fn changed_fields(&self) -> Vec<&'static str> {
        let mut fields = Vec::new();
        if self.title.is_some() {
            fields.push("title");
        }
        if self.description.is_some() {
            fields.push("description");
        }
        if self.tags.is_some() {
            fields.push("tags");
        }
        if self.thumbnail_url.is_some() {
            fields.push("thumbnail_url");
        }
        if self.file_url.is_some() {
            fields.push("file_url");
        }
        if self.scheduled_publish_at.is_some() {
            fields.push("scheduled_publish_at");
        }
        fields
    }
}

// Distinguishes an explicit `null` (clear) from a missing key (keep).
fn double_option<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

#[derive(Debug, Default, Clone, Deserialize)]
pub struct VideoFilter {
    pub status: Option<VideoStatus>,
    pub uploader_id: Option<Uuid>,
}
