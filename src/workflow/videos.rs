use chrono::{DateTime, Utc};
use serde_json::json;
use uuid::Uuid;

use super::guard::{self, Action, Ownership};
use super::lifecycle::{self, VideoEvent};
use super::{Workflow, activity, normalize_tags, optional_text, required_text, reviews};
use crate::error::AppError;
use crate::models::activity::{ActionType, TargetRef};
use crate::models::review::{Review, ReviewRequest};
use crate::models::user::User;
use crate::models::video::{
    CreateVideoRequest, EditVideoRequest, Video, VideoFilter, VideoStatus,
};
use crate::publisher::PublishRequest;
use crate::store::Write;

const MAX_TITLE_LEN: usize = 255;

/// A validated edit. `Some(None)` clears an optional field.
#[derive(Debug, Default)]
struct VideoChanges {
    title: Option<String>,
    description: Option<Option<String>>,
    tags: Option<Vec<String>>,
    thumbnail_url: Option<Option<String>>,
    file_url: Option<Option<String>>,
    scheduled_publish_at: Option<Option<DateTime<Utc>>>,
    fields: Vec<&'static str>,
}

impl VideoChanges {
    fn validate(req: EditVideoRequest) -> Result<Self, AppError> {
        let fields = req.changed_fields();
        if fields.is_empty() {
            return Err(AppError::Validation("No changes provided".into()));
        }
        Ok(Self {
            title: req
                .title
                .map(|t| required_text(&t, "Title", MAX_TITLE_LEN))
                .transpose()?,
            description: req.description.map(|d| optional_text(Some(d))),
            tags: req.tags.map(|t| normalize_tags(&t)).transpose()?,
            thumbnail_url: req.thumbnail_url.map(|u| optional_text(Some(u))),
            file_url: req.file_url.map(|u| optional_text(Some(u))),
            scheduled_publish_at: req.scheduled_publish_at,
            fields,
        })
    }

    fn apply_to(&self, video: &mut Video) {
        if let Some(title) = &self.title {
            video.title = title.clone();
        }
        if let Some(description) = &self.description {
            video.description = description.clone();
        }
        if let Some(tags) = &self.tags {
            video.tags = tags.clone();
        }
        if let Some(url) = &self.thumbnail_url {
            video.thumbnail_url = url.clone();
        }
        if let Some(url) = &self.file_url {
            video.file_url = url.clone();
        }
        if let Some(at) = self.scheduled_publish_at {
            video.scheduled_publish_at = at;
        }
    }
}

/// Event-specific input carried through a transition.
enum Payload {
    Plain,
    Review(Option<String>),
    Edit(VideoChanges),
}

impl Workflow {
    async fn load_video(&self, team_id: Uuid, video_id: Uuid) -> Result<Video, AppError> {
        self.store
            .get_video(team_id, video_id)
            .await?
            .ok_or_else(|| AppError::NotFound("Video not found".into()))
    }

    pub async fn create_video(
        &self,
        actor_id: Uuid,
        team_id: Uuid,
        req: CreateVideoRequest,
    ) -> Result<Video, AppError> {
        let (_, actor) = self.member(actor_id, team_id).await?;
        guard::authorize(&actor, team_id, Action::CreateVideo, Ownership::Own)?;

        let title = required_text(&req.title, "Title", MAX_TITLE_LEN)?;
        let tags = normalize_tags(&req.tags)?;

        let now = Utc::now();
        let video = Video {
            id: Uuid::new_v4(),
            team_id,
            uploader_id: Some(actor.user_id),
            title,
            description: optional_text(req.description),
            tags,
            thumbnail_url: optional_text(req.thumbnail_url),
            file_url: optional_text(req.file_url),
            status: VideoStatus::Draft,
            scheduled_publish_at: req.scheduled_publish_at,
            external_video_id: None,
            version: 0,
            created_at: now,
            updated_at: now,
        };

        self.store
            .commit(vec![
                Write::InsertVideo(video.clone()),
                activity::append(
                    team_id,
                    actor.user_id,
                    ActionType::VideoCreated,
                    TargetRef::video(video.id),
                    json!({ "title": video.title }),
                ),
            ])
            .await?;

        tracing::info!(%team_id, video_id = %video.id, actor_id = %actor.user_id, "video created");
        Ok(video)
    }

    pub async fn get_video(
        &self,
        actor_id: Uuid,
        team_id: Uuid,
        video_id: Uuid,
    ) -> Result<Video, AppError> {
        self.member(actor_id, team_id).await?;
        self.load_video(team_id, video_id).await
    }

    pub async fn list_videos(
        &self,
        actor_id: Uuid,
        team_id: Uuid,
        filter: &VideoFilter,
    ) -> Result<Vec<Video>, AppError> {
        self.member(actor_id, team_id).await?;
        Ok(self.store.list_videos(team_id, filter).await?)
    }

    pub async fn list_reviews(
        &self,
        actor_id: Uuid,
        team_id: Uuid,
        video_id: Uuid,
    ) -> Result<Vec<Review>, AppError> {
        self.member(actor_id, team_id).await?;
        let video = self.load_video(team_id, video_id).await?;
        Ok(self.store.list_reviews(video.id).await?)
    }

    pub async fn edit_video(
        &self,
        actor_id: Uuid,
        team_id: Uuid,
        video_id: Uuid,
        req: EditVideoRequest,
    ) -> Result<Video, AppError> {
        let changes = VideoChanges::validate(req)?;
        self.transition(actor_id, team_id, video_id, VideoEvent::Edit, Payload::Edit(changes))
            .await
    }

    pub async fn submit(
        &self,
        actor_id: Uuid,
        team_id: Uuid,
        video_id: Uuid,
    ) -> Result<Video, AppError> {
        self.transition(actor_id, team_id, video_id, VideoEvent::Submit, Payload::Plain)
            .await
    }

    pub async fn resubmit(
        &self,
        actor_id: Uuid,
        team_id: Uuid,
        video_id: Uuid,
    ) -> Result<Video, AppError> {
        self.transition(actor_id, team_id, video_id, VideoEvent::Resubmit, Payload::Plain)
            .await
    }

    pub async fn approve(
        &self,
        actor_id: Uuid,
        team_id: Uuid,
        video_id: Uuid,
        req: ReviewRequest,
    ) -> Result<Video, AppError> {
        let payload = Payload::Review(req.feedback);
        self.transition(actor_id, team_id, video_id, VideoEvent::Approve, payload)
            .await
    }

    pub async fn reject(
        &self,
        actor_id: Uuid,
        team_id: Uuid,
        video_id: Uuid,
        req: ReviewRequest,
    ) -> Result<Video, AppError> {
        let payload = Payload::Review(req.feedback);
        self.transition(actor_id, team_id, video_id, VideoEvent::Reject, payload)
            .await
    }

    /// Apply one non-publishing lifecycle event.
    async fn transition(
        &self,
        actor_id: Uuid,
        team_id: Uuid,
        video_id: Uuid,
        event: VideoEvent,
        payload: Payload,
    ) -> Result<Video, AppError> {
        let mut attempt = 0;
        loop {
            let (_, actor) = self.member(actor_id, team_id).await?;
            let current = self.load_video(team_id, video_id).await?;
            guard::authorize(
                &actor,
                team_id,
                event.required_action(),
                Ownership::of(&actor, current.uploader_id),
            )?;
            let to = lifecycle::next_status(current.status, event)?;

            let mut next = current.clone();
            next.status = to;
            next.version = current.version + 1;
            next.updated_at = Utc::now();

            let mut details = json!({ "from": current.status, "to": to });
            let mut review_write = None;
            match &payload {
                Payload::Plain => {}
                Payload::Review(feedback) => {
                    let review = reviews::record(&current, &actor, event, feedback.clone())?;
                    details["review_id"] = json!(review.id);
                    details["decision"] = json!(review.decision);
                    details["feedback"] = json!(review.feedback);
                    review_write = Some(Write::InsertReview(review));
                }
                Payload::Edit(changes) => {
                    changes.apply_to(&mut next);
                    details["fields"] = json!(changes.fields);
                }
            }

            let mut writes = vec![Write::UpdateVideo {
                video: next.clone(),
                expected_version: current.version,
            }];
            writes.extend(review_write);
            writes.push(activity::append(
                team_id,
                actor.user_id,
                event.logged_as(),
                TargetRef::video(video_id),
                details,
            ));

            match self.store.commit(writes).await {
                Ok(()) => {
                    tracing::info!(
                        %team_id,
                        %video_id,
                        actor_id = %actor.user_id,
                        event = event.as_str(),
                        from = current.status.as_str(),
                        to = to.as_str(),
                        "video transition applied"
                    );
                    return Ok(next);
                }
                Err(e) if self.should_retry(&e, attempt, event.as_str(), video_id) => attempt += 1,
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Publish an approved video to the external platform.
    ///
    /// Publishing an already published video returns it unchanged. A failed or
    /// timed-out publisher call leaves the video `approved`.
    pub async fn publish(
        &self,
        actor_id: Uuid,
        team_id: Uuid,
        video_id: Uuid,
    ) -> Result<Video, AppError> {
        let mut published_as: Option<String> = None;
        let mut attempt = 0;
        loop {
            let (user, actor) = self.member(actor_id, team_id).await?;
            let current = self.load_video(team_id, video_id).await?;
            guard::authorize(
                &actor,
                team_id,
                Action::PublishVideo,
                Ownership::of(&actor, current.uploader_id),
            )?;

            if current.status == VideoStatus::Published {
                match published_as.take() {
                    Some(orphaned) => tracing::warn!(
                        %video_id,
                        orphaned_external_id = %orphaned,
                        external_video_id = ?current.external_video_id,
                        "video was published concurrently, our upload is orphaned"
                    ),
                    None => tracing::debug!(%video_id, "video already published"),
                }
                return Ok(current);
            }
            let to = lifecycle::next_status(current.status, VideoEvent::Publish)?;

            // A lost race after a successful upload reuses the platform id.
            let external_id = match published_as.take() {
                Some(id) => id,
                None => self.push_to_platform(&user, &current).await?,
            };

            let mut next = current.clone();
            next.status = to;
            next.external_video_id = Some(external_id.clone());
            next.version = current.version + 1;
            next.updated_at = Utc::now();

            let writes = vec![
                Write::UpdateVideo {
                    video: next.clone(),
                    expected_version: current.version,
                },
                activity::append(
                    team_id,
                    actor.user_id,
                    ActionType::VideoPublished,
                    TargetRef::video(video_id),
                    json!({
                        "from": current.status,
                        "to": to,
                        "external_video_id": external_id,
                    }),
                ),
            ];

            match self.store.commit(writes).await {
                Ok(()) => {
                    tracing::info!(
                        %team_id,
                        %video_id,
                        actor_id = %actor.user_id,
                        external_video_id = %external_id,
                        "video published"
                    );
                    return Ok(next);
                }
                Err(e) if self.should_retry(&e, attempt, "publish", video_id) => {
                    published_as = Some(external_id);
                    attempt += 1;
                }
                Err(e) => {
                    tracing::error!(
                        %video_id,
                        external_video_id = %external_id,
                        "video was published externally but recording it failed: {e}"
                    );
                    return Err(e.into());
                }
            }
        }
    }

    async fn push_to_platform(&self, user: &User, video: &Video) -> Result<String, AppError> {
        let request = PublishRequest::from(video);
        let timeout = self.settings.publish_timeout;
        match tokio::time::timeout(timeout, self.publisher.publish(&request, &user.credential()))
            .await
        {
            Ok(Ok(id)) => Ok(id),
            Ok(Err(e)) => {
                tracing::warn!(video_id = %video.id, "publisher call failed: {e}");
                Err(e.into())
            }
            Err(_) => {
                tracing::warn!(video_id = %video.id, ?timeout, "publisher call timed out");
                Err(AppError::PublishFailed(format!(
                    "publisher did not respond within {timeout:?}"
                )))
            }
        }
    }

    pub async fn delete_video(
        &self,
        actor_id: Uuid,
        team_id: Uuid,
        video_id: Uuid,
    ) -> Result<(), AppError> {
        let mut attempt = 0;
        loop {
            let (_, actor) = self.member(actor_id, team_id).await?;
            let current = self.load_video(team_id, video_id).await?;
            guard::authorize(
                &actor,
                team_id,
                Action::DeleteVideo,
                Ownership::of(&actor, current.uploader_id),
            )?;

            let writes = vec![
                Write::DeleteVideo {
                    id: video_id,
                    expected_version: current.version,
                },
                activity::append(
                    team_id,
                    actor.user_id,
                    ActionType::VideoDeleted,
                    TargetRef::video(video_id),
                    json!({ "title": current.title, "status": current.status }),
                ),
            ];

            match self.store.commit(writes).await {
                Ok(()) => {
                    tracing::info!(%team_id, %video_id, actor_id = %actor.user_id, "video deleted");
                    return Ok(());
                }
                Err(e) if self.should_retry(&e, attempt, "delete", video_id) => attempt += 1,
                Err(e) => return Err(e.into()),
            }
        }
    }
}
