use async_trait::async_trait;
use sqlx::{PgConnection, PgPool};
use uuid::Uuid;

use super::{Store, StoreError, Write};
use crate::models::activity::{ActivityFilter, ActivityLog};
use crate::models::invitation::{Invitation, InvitationStatus};
use crate::models::review::Review;
use crate::models::team::Team;
use crate::models::user::User;
use crate::models::video::{Video, VideoFilter};

const USER_COLUMNS: &str = "id, team_id, email, name, role, platform_access_token, \
                            platform_refresh_token, version, created_at, updated_at";

const INVITATION_COLUMNS: &str =
    "id, team_id, inviter_id, invitee_email, token, status, expires_at, created_at";

const VIDEO_COLUMNS: &str = "id, team_id, uploader_id, title, description, tags, thumbnail_url, \
                             file_url, status, scheduled_publish_at, external_video_id, version, \
                             created_at, updated_at";

const ACTIVITY_COLUMNS: &str =
    "id, team_id, actor_id, action, target_kind, target_id, details, created_at";

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        match &e {
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                Self::Conflict(db.message().to_string())
            }
            sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::Io(_)
            | sqlx::Error::Tls(_) => Self::Unavailable(e.to_string()),
            _ => Self::Backend(e.to_string()),
        }
    }
}

/// Postgres-backed entity store. Each commit is one transaction.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn expect_one(rows_affected: u64, what: &str) -> Result<(), StoreError> {
    if rows_affected == 0 {
        return Err(StoreError::Conflict(format!("{what} changed concurrently")));
    }
    Ok(())
}

async fn apply(conn: &mut PgConnection, write: Write) -> Result<(), StoreError> {
    match write {
        Write::InsertTeam(team) => {
            sqlx::query(
                "INSERT INTO teams (id, owner_id, name, created_at, updated_at)
                 VALUES ($1, $2, $3, $4, $5)",
            )
            .bind(team.id)
            .bind(team.owner_id)
            .bind(&team.name)
            .bind(team.created_at)
            .bind(team.updated_at)
            .execute(&mut *conn)
            .await?;
        }
        Write::UpdateTeam(team) => {
            let result = sqlx::query("UPDATE teams SET name = $1, updated_at = $2 WHERE id = $3")
                .bind(&team.name)
                .bind(team.updated_at)
                .bind(team.id)
                .execute(&mut *conn)
                .await?;
            expect_one(result.rows_affected(), "team")?;
        }
        Write::DeleteTeam(id) => {
            let result = sqlx::query("DELETE FROM teams WHERE id = $1")
                .bind(id)
                .execute(&mut *conn)
                .await?;
            expect_one(result.rows_affected(), "team")?;
        }
        Write::InsertUser(user) => {
            sqlx::query(
                "INSERT INTO users (id, team_id, email, name, role, platform_access_token,
                                    platform_refresh_token, version, created_at, updated_at)
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)",
            )
            .bind(user.id)
            .bind(user.team_id)
            .bind(&user.email)
            .bind(&user.name)
            .bind(user.role)
            .bind(&user.platform_access_token)
            .bind(&user.platform_refresh_token)
            .bind(user.version)
            .bind(user.created_at)
            .bind(user.updated_at)
            .execute(&mut *conn)
            .await?;
        }
        Write::UpdateUser {
            user,
            expected_version,
        } => {
            let result = sqlx::query(
                "UPDATE users SET email = $1, name = $2, role = $3, platform_access_token = $4,
                                  platform_refresh_token = $5, version = $6, updated_at = $7
                 WHERE id = $8 AND version = $9",
            )
            .bind(&user.email)
            .bind(&user.name)
            .bind(user.role)
            .bind(&user.platform_access_token)
            .bind(&user.platform_refresh_token)
            .bind(user.version)
            .bind(user.updated_at)
            .bind(user.id)
            .bind(expected_version)
            .execute(&mut *conn)
            .await?;
            expect_one(result.rows_affected(), "user")?;
        }
        Write::DeleteUser(id) => {
            // videos.uploader_id is ON DELETE SET NULL
            let result = sqlx::query("DELETE FROM users WHERE id = $1")
                .bind(id)
                .execute(&mut *conn)
                .await?;
            expect_one(result.rows_affected(), "user")?;
        }
        Write::InsertInvitation(invitation) => {
            sqlx::query(
                "INSERT INTO invitations (id, team_id, inviter_id, invitee_email, token, status,
                                          expires_at, created_at)
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
            )
            .bind(invitation.id)
            .bind(invitation.team_id)
            .bind(invitation.inviter_id)
            .bind(&invitation.invitee_email)
            .bind(&invitation.token)
            .bind(invitation.status)
            .bind(invitation.expires_at)
            .bind(invitation.created_at)
            .execute(&mut *conn)
            .await?;
        }
        Write::UpdateInvitation {
            invitation,
            expected_status,
        } => {
            let result = sqlx::query(
                "UPDATE invitations SET inviter_id = $1, token = $2, status = $3, expires_at = $4
                 WHERE id = $5 AND status = $6",
            )
            .bind(invitation.inviter_id)
            .bind(&invitation.token)
            .bind(invitation.status)
            .bind(invitation.expires_at)
            .bind(invitation.id)
            .bind(expected_status)
            .execute(&mut *conn)
            .await?;
            expect_one(result.rows_affected(), "invitation")?;
        }
        Write::DeleteInvitation {
            id,
            expected_status,
        } => {
            let result = sqlx::query("DELETE FROM invitations WHERE id = $1 AND status = $2")
                .bind(id)
                .bind(expected_status)
                .execute(&mut *conn)
                .await?;
            expect_one(result.rows_affected(), "invitation")?;
        }
        Write::InsertVideo(video) => {
            sqlx::query(
                "INSERT INTO videos (id, team_id, uploader_id, title, description, tags,
                                     thumbnail_url, file_url, status, scheduled_publish_at,
                                     external_video_id, version, created_at, updated_at)
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)",
            )
            .bind(video.id)
            .bind(video.team_id)
            .bind(video.uploader_id)
            .bind(&video.title)
            .bind(&video.description)
            .bind(&video.tags)
            .bind(&video.thumbnail_url)
            .bind(&video.file_url)
            .bind(video.status)
            .bind(video.scheduled_publish_at)
            .bind(&video.external_video_id)
            .bind(video.version)
            .bind(video.created_at)
            .bind(video.updated_at)
            .execute(&mut *conn)
            .await?;
        }
        Write::UpdateVideo {
            video,
            expected_version,
        } => {
            // team_id and uploader_id are not writable here
            let result = sqlx::query(
                "UPDATE videos SET
                   title = $1, description = $2, tags = $3, thumbnail_url = $4, file_url = $5,
                   status = $6, scheduled_publish_at = $7, external_video_id = $8,
                   version = $9, updated_at = $10
                 WHERE id = $11 AND version = $12",
            )
            .bind(&video.title)
            .bind(&video.description)
            .bind(&video.tags)
            .bind(&video.thumbnail_url)
            .bind(&video.file_url)
            .bind(video.status)
            .bind(video.scheduled_publish_at)
            .bind(&video.external_video_id)
            .bind(video.version)
            .bind(video.updated_at)
            .bind(video.id)
            .bind(expected_version)
            .execute(&mut *conn)
            .await?;
            expect_one(result.rows_affected(), "video")?;
        }
        Write::DeleteVideo {
            id,
            expected_version,
        } => {
            let result = sqlx::query("DELETE FROM videos WHERE id = $1 AND version = $2")
                .bind(id)
                .bind(expected_version)
                .execute(&mut *conn)
                .await?;
            expect_one(result.rows_affected(), "video")?;
        }
        Write::InsertReview(review) => {
            sqlx::query(
                "INSERT INTO reviews (id, video_id, reviewer_id, decision, feedback, created_at)
                 VALUES ($1, $2, $3, $4, $5, $6)",
            )
            .bind(review.id)
            .bind(review.video_id)
            .bind(review.reviewer_id)
            .bind(review.decision)
            .bind(&review.feedback)
            .bind(review.created_at)
            .execute(&mut *conn)
            .await?;
        }
        Write::AppendLog(entry) => {
            sqlx::query(
                "INSERT INTO activity_logs (id, team_id, actor_id, action, target_kind, target_id,
                                            details, created_at)
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
            )
            .bind(entry.id)
            .bind(entry.team_id)
            .bind(entry.actor_id)
            .bind(entry.action)
            .bind(entry.target.kind)
            .bind(entry.target.id)
            .bind(&entry.details)
            .bind(entry.created_at)
            .execute(&mut *conn)
            .await?;
        }
    }
    Ok(())
}

#[async_trait]
impl Store for PgStore {
    async fn ping(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    async fn get_team(&self, id: Uuid) -> Result<Option<Team>, StoreError> {
        let team = sqlx::query_as::<_, Team>(
            "SELECT id, owner_id, name, created_at, updated_at FROM teams WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(team)
    }

    async fn find_user(&self, id: Uuid) -> Result<Option<User>, StoreError> {
        let user = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(user)
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        let user = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE email = $1"
        ))
        .bind(email)
        .fetch_optional(&self.pool)
        .await?;
        Ok(user)
    }

    async fn get_user(&self, team_id: Uuid, id: Uuid) -> Result<Option<User>, StoreError> {
        let user = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE id = $1 AND team_id = $2"
        ))
        .bind(id)
        .bind(team_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(user)
    }

    async fn list_users(&self, team_id: Uuid) -> Result<Vec<User>, StoreError> {
        let users = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE team_id = $1 ORDER BY created_at, email"
        ))
        .bind(team_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(users)
    }

    async fn get_invitation(
        &self,
        team_id: Uuid,
        id: Uuid,
    ) -> Result<Option<Invitation>, StoreError> {
        let invitation = sqlx::query_as::<_, Invitation>(&format!(
            "SELECT {INVITATION_COLUMNS} FROM invitations WHERE id = $1 AND team_id = $2"
        ))
        .bind(id)
        .bind(team_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(invitation)
    }

    async fn find_invitation_by_token(
        &self,
        token: &str,
    ) -> Result<Option<Invitation>, StoreError> {
        let invitation = sqlx::query_as::<_, Invitation>(&format!(
            "SELECT {INVITATION_COLUMNS} FROM invitations WHERE token = $1"
        ))
        .bind(token)
        .fetch_optional(&self.pool)
        .await?;
        Ok(invitation)
    }

    async fn find_pending_invitation(
        &self,
        team_id: Uuid,
        email: &str,
    ) -> Result<Option<Invitation>, StoreError> {
        let invitation = sqlx::query_as::<_, Invitation>(&format!(
            "SELECT {INVITATION_COLUMNS} FROM invitations
             WHERE team_id = $1 AND invitee_email = $2 AND status = $3"
        ))
        .bind(team_id)
        .bind(email)
        .bind(InvitationStatus::Pending)
        .fetch_optional(&self.pool)
        .await?;
        Ok(invitation)
    }

    async fn list_invitations(&self, team_id: Uuid) -> Result<Vec<Invitation>, StoreError> {
        let invitations = sqlx::query_as::<_, Invitation>(&format!(
            "SELECT {INVITATION_COLUMNS} FROM invitations
             WHERE team_id = $1 ORDER BY created_at DESC"
        ))
        .bind(team_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(invitations)
    }

    async fn get_video(&self, team_id: Uuid, id: Uuid) -> Result<Option<Video>, StoreError> {
        let video = sqlx::query_as::<_, Video>(&format!(
            "SELECT {VIDEO_COLUMNS} FROM videos WHERE id = $1 AND team_id = $2"
        ))
        .bind(id)
        .bind(team_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(video)
    }

    async fn list_videos(
        &self,
        team_id: Uuid,
        filter: &VideoFilter,
    ) -> Result<Vec<Video>, StoreError> {
        let mut sql = format!("SELECT {VIDEO_COLUMNS} FROM videos WHERE team_id = $1");
        let mut next_param = 2;
        if filter.status.is_some() {
            sql.push_str(&format!(" AND status = ${next_param}"));
            next_param += 1;
        }
        if filter.uploader_id.is_some() {
            sql.push_str(&format!(" AND uploader_id = ${next_param}"));
        }
        sql.push_str(" ORDER BY created_at DESC");

        let mut q = sqlx::query_as::<_, Video>(&sql).bind(team_id);
        if let Some(status) = filter.status {
            q = q.bind(status);
        }
        if let Some(uploader_id) = filter.uploader_id {
            q = q.bind(uploader_id);
        }
        Ok(q.fetch_all(&self.pool).await?)
    }

    async fn list_reviews(&self, video_id: Uuid) -> Result<Vec<Review>, StoreError> {
        let reviews = sqlx::query_as::<_, Review>(
            "SELECT id, video_id, reviewer_id, decision, feedback, created_at
             FROM reviews WHERE video_id = $1 ORDER BY created_at",
        )
        .bind(video_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(reviews)
    }

    async fn list_activity(
        &self,
        team_id: Uuid,
        filter: &ActivityFilter,
    ) -> Result<Vec<ActivityLog>, StoreError> {
        let mut sql = format!("SELECT {ACTIVITY_COLUMNS} FROM activity_logs WHERE team_id = $1");
        let mut next_param = 2;
        if filter.target_kind.is_some() {
            sql.push_str(&format!(" AND target_kind = ${next_param}"));
            next_param += 1;
        }
        if filter.target_id.is_some() {
            sql.push_str(&format!(" AND target_id = ${next_param}"));
            next_param += 1;
        }
        if filter.action.is_some() {
            sql.push_str(&format!(" AND action = ${next_param}"));
            next_param += 1;
        }
        sql.push_str(&format!(" ORDER BY created_at DESC, id DESC LIMIT ${next_param}"));

        let mut q = sqlx::query_as::<_, ActivityLog>(&sql).bind(team_id);
        if let Some(kind) = filter.target_kind {
            q = q.bind(kind);
        }
        if let Some(target_id) = filter.target_id {
            q = q.bind(target_id);
        }
        if let Some(action) = filter.action {
            q = q.bind(action);
        }
        q = q.bind(filter.effective_limit());
        Ok(q.fetch_all(&self.pool).await?)
    }

    async fn commit(&self, writes: Vec<Write>) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        for write in writes {
            apply(&mut *tx, write).await?;
        }
        tx.commit().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::activity::{ActionType, TargetKind, TargetRef};
    use crate::models::user::UserRole;
    use crate::models::video::VideoStatus;
    use crate::testing::{activity, team_with_owner, user, video};

    #[test]
    fn test_pool_and_io_errors_are_unavailable() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
        for err in [
            sqlx::Error::PoolTimedOut,
            sqlx::Error::PoolClosed,
            sqlx::Error::Io(io),
        ] {
            assert!(matches!(StoreError::from(err), StoreError::Unavailable(_)));
        }
    }

    #[test]
    fn test_other_errors_are_backend() {
        assert!(matches!(
            StoreError::from(sqlx::Error::RowNotFound),
            StoreError::Backend(_)
        ));
    }

    // The tests below need a Postgres reachable through DATABASE_URL:
    // cargo test -- --ignored

    async fn connect() -> PgStore {
        let url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");
        let pool = PgPool::connect(&url)
            .await
            .expect("failed to connect to database");
        sqlx::migrate!()
            .run(&pool)
            .await
            .expect("failed to run migrations");
        PgStore::new(pool)
    }

    fn unique_email(prefix: &str) -> String {
        format!("{prefix}-{}@example.com", Uuid::new_v4().simple())
    }

    async fn seeded(store: &PgStore) -> (Team, User) {
        let (team, owner) = team_with_owner("Studio", &unique_email("owner"));
        store
            .commit(vec![
                Write::InsertTeam(team.clone()),
                Write::InsertUser(owner.clone()),
            ])
            .await
            .unwrap();
        (team, owner)
    }

    #[tokio::test]
    #[ignore]
    async fn test_stale_versions_conflict() {
        let store = connect().await;
        let (team, owner) = seeded(&store).await;
        let v = video(team.id, Some(owner.id));
        store.commit(vec![Write::InsertVideo(v.clone())]).await.unwrap();

        let mut pending = v.clone();
        pending.status = VideoStatus::PendingReview;
        pending.version = 1;
        store
            .commit(vec![Write::UpdateVideo {
                video: pending.clone(),
                expected_version: 0,
            }])
            .await
            .unwrap();
        let err = store
            .commit(vec![Write::UpdateVideo {
                video: pending,
                expected_version: 0,
            }])
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));

        let renamed = User {
            name: "Renamed".into(),
            version: owner.version + 1,
            ..owner.clone()
        };
        store
            .commit(vec![Write::UpdateUser {
                user: renamed.clone(),
                expected_version: owner.version,
            }])
            .await
            .unwrap();
        let err = store
            .commit(vec![Write::UpdateUser {
                user: renamed,
                expected_version: owner.version,
            }])
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));

        let stored = store.get_user(team.id, owner.id).await.unwrap().unwrap();
        assert_eq!(stored.name, "Renamed");
        assert_eq!(stored.version, owner.version + 1);

        store.commit(vec![Write::DeleteTeam(team.id)]).await.unwrap();
    }

    #[tokio::test]
    #[ignore]
    async fn test_unique_violation_is_conflict_and_rolls_back() {
        let store = connect().await;
        let (team, owner) = seeded(&store).await;
        let v = video(team.id, Some(owner.id));

        let duplicate = user(team.id, UserRole::Editor, &owner.email);
        let err = store
            .commit(vec![
                Write::InsertVideo(v.clone()),
                Write::InsertUser(duplicate),
            ])
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
        assert!(store.get_video(team.id, v.id).await.unwrap().is_none());

        store.commit(vec![Write::DeleteTeam(team.id)]).await.unwrap();
    }

    #[tokio::test]
    #[ignore]
    async fn test_filters_bind_in_order() {
        let store = connect().await;
        let (team, owner) = seeded(&store).await;
        let editor = user(team.id, UserRole::Editor, &unique_email("editor"));
        let own = video(team.id, Some(owner.id));
        let mut theirs = video(team.id, Some(editor.id));
        theirs.status = VideoStatus::PendingReview;

        store
            .commit(vec![
                Write::InsertUser(editor.clone()),
                Write::InsertVideo(own.clone()),
                Write::InsertVideo(theirs.clone()),
                Write::AppendLog(activity(
                    team.id,
                    owner.id,
                    ActionType::TeamCreated,
                    TargetRef::team(team.id),
                )),
                Write::AppendLog(activity(
                    team.id,
                    owner.id,
                    ActionType::VideoCreated,
                    TargetRef::video(own.id),
                )),
                Write::AppendLog(activity(
                    team.id,
                    editor.id,
                    ActionType::VideoCreated,
                    TargetRef::video(theirs.id),
                )),
            ])
            .await
            .unwrap();

        let filter = VideoFilter {
            status: Some(VideoStatus::PendingReview),
            uploader_id: Some(editor.id),
        };
        let listed = store.list_videos(team.id, &filter).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, theirs.id);

        let filter = VideoFilter {
            uploader_id: Some(owner.id),
            ..Default::default()
        };
        let listed = store.list_videos(team.id, &filter).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, own.id);

        let filter = ActivityFilter {
            target_kind: Some(TargetKind::Video),
            action: Some(ActionType::VideoCreated),
            limit: Some(1),
            ..Default::default()
        };
        let log = store.list_activity(team.id, &filter).await.unwrap();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].action, ActionType::VideoCreated);

        let filter = ActivityFilter {
            target_id: Some(team.id),
            ..Default::default()
        };
        let log = store.list_activity(team.id, &filter).await.unwrap();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].action, ActionType::TeamCreated);

        store.commit(vec![Write::DeleteTeam(team.id)]).await.unwrap();
    }
}
