//! Fixtures and fakes shared by the unit tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;
use uuid::Uuid;

use crate::models::activity::{ActionType, ActivityFilter, ActivityLog, TargetRef};
use crate::models::invitation::{Invitation, InvitationStatus};
use crate::models::review::{Review, ReviewRequest};
use crate::models::team::{CreateTeamRequest, Team};
use crate::models::user::{User, UserRole};
use crate::models::video::{CreateVideoRequest, Video, VideoFilter, VideoStatus};
use crate::publisher::{Credential, PublishError, PublishRequest, Publisher};
use crate::store::{MemoryStore, Store, StoreError, Write};
use crate::workflow::{Workflow, WorkflowSettings};

pub fn team_with_owner(name: &str, email: &str) -> (Team, User) {
    let now = Utc::now();
    let team_id = Uuid::new_v4();
    let owner = user(team_id, UserRole::Admin, email);
    let team = Team {
        id: team_id,
        owner_id: owner.id,
        name: name.to_string(),
        created_at: now,
        updated_at: now,
    };
    (team, owner)
}

pub fn user(team_id: Uuid, role: UserRole, email: &str) -> User {
    let now = Utc::now();
    User {
        id: Uuid::new_v4(),
        team_id,
        email: email.to_string(),
        name: email.split('@').next().unwrap_or(email).to_string(),
        role,
        platform_access_token: None,
        platform_refresh_token: None,
        version: 0,
        created_at: now,
        updated_at: now,
    }
}

pub fn video(team_id: Uuid, uploader_id: Option<Uuid>) -> Video {
    let now = Utc::now();
    Video {
        id: Uuid::new_v4(),
        team_id,
        uploader_id,
        title: "Video".to_string(),
        description: None,
        tags: Vec::new(),
        thumbnail_url: None,
        file_url: None,
        status: VideoStatus::Draft,
        scheduled_publish_at: None,
        external_video_id: None,
        version: 0,
        created_at: now,
        updated_at: now,
    }
}

pub fn invitation(team_id: Uuid, inviter_id: Uuid, email: &str) -> Invitation {
    let now = Utc::now();
    Invitation {
        id: Uuid::new_v4(),
        team_id,
        inviter_id,
        invitee_email: email.to_string(),
        token: Uuid::new_v4().simple().to_string(),
        status: InvitationStatus::Pending,
        expires_at: now + chrono::Duration::hours(72),
        created_at: now,
    }
}

pub fn activity(
    team_id: Uuid,
    actor_id: Uuid,
    action: ActionType,
    target: TargetRef,
) -> ActivityLog {
    ActivityLog {
        id: Uuid::new_v4(),
        team_id,
        actor_id,
        action,
        target,
        details: json!({}),
        created_at: Utc::now(),
    }
}

pub enum FakeOutcome {
    Publish(String),
    Fail,
    /// Never answers; only a timeout ends the call.
    Hang,
}

/// Publisher that plays back scripted outcomes, then succeeds with
/// `ext-<call number>` once the script runs out.
#[derive(Default)]
pub struct FakePublisher {
    script: Mutex<VecDeque<FakeOutcome>>,
    calls: AtomicUsize,
}

impl FakePublisher {
    pub fn script(&self, outcome: FakeOutcome) {
        self.script.lock().unwrap().push_back(outcome);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Publisher for FakePublisher {
    async fn publish(
        &self,
        _request: &PublishRequest,
        _credential: &Credential,
    ) -> Result<String, PublishError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        let next = self.script.lock().unwrap().pop_front();
        match next {
            Some(FakeOutcome::Publish(id)) => Ok(id),
            Some(FakeOutcome::Fail) => Err(PublishError::Rejected {
                status: 503,
                body: "platform unavailable".into(),
            }),
            Some(FakeOutcome::Hang) => std::future::pending().await,
            None => Ok(format!("ext-{call}")),
        }
    }
}

/// Store wrapper that lets a competing batch land right before the next
/// commit, simulating a request that loses a race.
pub struct InterleavingStore {
    inner: Arc<dyn Store>,
    pending: Mutex<Option<Vec<Write>>>,
}

impl InterleavingStore {
    pub fn new(inner: Arc<dyn Store>) -> Self {
        Self {
            inner,
            pending: Mutex::new(None),
        }
    }

    pub fn inject_before_next_commit(&self, writes: Vec<Write>) {
        *self.pending.lock().unwrap() = Some(writes);
    }
}

#[async_trait]
impl Store for InterleavingStore {
    async fn ping(&self) -> Result<(), StoreError> {
        self.inner.ping().await
    }

    async fn get_team(&self, id: Uuid) -> Result<Option<Team>, StoreError> {
        self.inner.get_team(id).await
    }

    async fn find_user(&self, id: Uuid) -> Result<Option<User>, StoreError> {
        self.inner.find_user(id).await
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        self.inner.find_user_by_email(email).await
    }

    async fn get_user(&self, team_id: Uuid, id: Uuid) -> Result<Option<User>, StoreError> {
        self.inner.get_user(team_id, id).await
    }

    async fn list_users(&self, team_id: Uuid) -> Result<Vec<User>, StoreError> {
        self.inner.list_users(team_id).await
    }

    async fn get_invitation(
        &self,
        team_id: Uuid,
        id: Uuid,
    ) -> Result<Option<Invitation>, StoreError> {
        self.inner.get_invitation(team_id, id).await
    }

    async fn find_invitation_by_token(
        &self,
        token: &str,
    ) -> Result<Option<Invitation>, StoreError> {
        self.inner.find_invitation_by_token(token).await
    }

    async fn find_pending_invitation(
        &self,
        team_id: Uuid,
        email: &str,
    ) -> Result<Option<Invitation>, StoreError> {
        self.inner.find_pending_invitation(team_id, email).await
    }

    async fn list_invitations(&self, team_id: Uuid) -> Result<Vec<Invitation>, StoreError> {
        self.inner.list_invitations(team_id).await
    }

    async fn get_video(&self, team_id: Uuid, id: Uuid) -> Result<Option<Video>, StoreError> {
        self.inner.get_video(team_id, id).await
    }

    async fn list_videos(
        &self,
        team_id: Uuid,
        filter: &VideoFilter,
    ) -> Result<Vec<Video>, StoreError> {
        self.inner.list_videos(team_id, filter).await
    }

    async fn list_reviews(&self, video_id: Uuid) -> Result<Vec<Review>, StoreError> {
        self.inner.list_reviews(video_id).await
    }

    async fn list_activity(
        &self,
        team_id: Uuid,
        filter: &ActivityFilter,
    ) -> Result<Vec<ActivityLog>, StoreError> {
        self.inner.list_activity(team_id, filter).await
    }

    async fn commit(&self, writes: Vec<Write>) -> Result<(), StoreError> {
        let competing = self.pending.lock().unwrap().take();
        if let Some(competing) = competing {
            self.inner.commit(competing).await?;
        }
        self.inner.commit(writes).await
    }
}

fn test_settings() -> WorkflowSettings {
    WorkflowSettings {
        publish_timeout: Duration::from_millis(50),
        ..WorkflowSettings::default()
    }
}

/// A workflow over an empty store.
pub fn empty_workflow() -> Workflow {
    Workflow::new(
        Arc::new(MemoryStore::new()),
        Arc::new(FakePublisher::default()),
        test_settings(),
    )
}

/// One team with its owning admin and an editor, backed by `MemoryStore`.
pub struct Harness {
    pub workflow: Workflow,
    pub store: Arc<MemoryStore>,
    pub publisher: Arc<FakePublisher>,
    pub settings: WorkflowSettings,
    pub team: Team,
    pub admin: User,
    pub editor: User,
}

impl Harness {
    pub async fn new() -> Self {
        Self::with_settings(test_settings()).await
    }

    pub async fn with_invitation_ttl(ttl: chrono::Duration) -> Self {
        Self::with_settings(WorkflowSettings {
            invitation_ttl: ttl,
            ..test_settings()
        })
        .await
    }

    async fn with_settings(settings: WorkflowSettings) -> Self {
        let store = Arc::new(MemoryStore::new());
        let publisher = Arc::new(FakePublisher::default());
        let workflow = Workflow::new(store.clone(), publisher.clone(), settings.clone());

        let (team, admin) = workflow
            .create_team(CreateTeamRequest {
                name: "Studio".into(),
                owner_email: "admin@example.com".into(),
                owner_name: "Admin".into(),
            })
            .await
            .unwrap();
        let editor = user(team.id, UserRole::Editor, "editor@example.com");
        store
            .commit(vec![Write::InsertUser(editor.clone())])
            .await
            .unwrap();

        Self {
            workflow,
            store,
            publisher,
            settings,
            team,
            admin,
            editor,
        }
    }

    /// The same fixtures seen through a different store.
    pub fn workflow_over(&self, store: Arc<dyn Store>) -> Workflow {
        Workflow::new(store, self.publisher.clone(), self.settings.clone())
    }

    async fn add_member(&self, role: UserRole, email: &str) -> User {
        let member = user(self.team.id, role, email);
        self.store
            .commit(vec![Write::InsertUser(member.clone())])
            .await
            .unwrap();
        member
    }

    pub async fn add_editor(&self, email: &str) -> User {
        self.add_member(UserRole::Editor, email).await
    }

    pub async fn add_admin(&self, email: &str) -> User {
        self.add_member(UserRole::Admin, email).await
    }

    pub async fn other_team(&self) -> (Team, User) {
        self.workflow
            .create_team(CreateTeamRequest {
                name: "Rivals".into(),
                owner_email: "rival@example.com".into(),
                owner_name: "Rival".into(),
            })
            .await
            .unwrap()
    }

    pub async fn draft(&self, uploader: Uuid) -> Video {
        self.workflow
            .create_video(
                uploader,
                self.team.id,
                CreateVideoRequest {
                    title: "Video".into(),
                    ..Default::default()
                },
            )
            .await
            .unwrap()
    }

    pub async fn pending(&self, uploader: Uuid) -> Video {
        let v = self.draft(uploader).await;
        self.workflow
            .submit(uploader, self.team.id, v.id)
            .await
            .unwrap()
    }

    pub async fn approved(&self, uploader: Uuid) -> Video {
        let v = self.pending(uploader).await;
        self.workflow
            .approve(self.admin.id, self.team.id, v.id, ReviewRequest::default())
            .await
            .unwrap()
    }

    pub async fn reviews(&self, video_id: Uuid) -> Vec<Review> {
        self.store.list_reviews(video_id).await.unwrap()
    }

    /// The team's log, newest first.
    pub async fn activity(&self) -> Vec<ActivityLog> {
        let filter = ActivityFilter {
            limit: Some(ActivityFilter::MAX_LIMIT),
            ..Default::default()
        };
        self.store.list_activity(self.team.id, &filter).await.unwrap()
    }

    pub async fn activity_len(&self) -> usize {
        self.activity().await.len()
    }

    /// Logged actions, oldest first.
    pub async fn actions(&self) -> Vec<ActionType> {
        self.activity().await.iter().rev().map(|a| a.action).collect()
    }

    /// Logged actions targeting one video, oldest first.
    pub async fn video_actions(&self, video_id: Uuid) -> Vec<ActionType> {
        self.activity()
            .await
            .iter()
            .rev()
            .filter(|a| a.target == TargetRef::video(video_id))
            .map(|a| a.action)
            .collect()
    }
}
