use chrono::Utc;
use rand::Rng;
use rand::distributions::Alphanumeric;
use serde_json::json;
use uuid::Uuid;

use super::guard::{self, Action, Ownership};
use super::{MAX_NAME_LEN, Workflow, activity, normalize_email, optional_text, required_text};
use crate::error::AppError;
use crate::models::activity::{ActionType, TargetRef};
use crate::models::invitation::{
    AcceptInvitationRequest, CreateInvitationRequest, Invitation, InvitationStatus,
};
use crate::models::user::{ChangeRoleRequest, UpdateProfileRequest, User, UserRole};
use crate::store::Write;

const TOKEN_LEN: usize = 32;

fn generate_token() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(TOKEN_LEN)
        .map(char::from)
        .collect()
}

impl Workflow {
    async fn load_user(&self, team_id: Uuid, user_id: Uuid) -> Result<User, AppError> {
        self.store
            .get_user(team_id, user_id)
            .await?
            .ok_or_else(|| AppError::NotFound("User not found".into()))
    }

    async fn owner_of(&self, team_id: Uuid) -> Result<Uuid, AppError> {
        let team = self
            .store
            .get_team(team_id)
            .await?
            .ok_or_else(|| AppError::NotFound("Team not found".into()))?;
        Ok(team.owner_id)
    }

    pub async fn list_users(&self, actor_id: Uuid, team_id: Uuid) -> Result<Vec<User>, AppError> {
        self.member(actor_id, team_id).await?;
        Ok(self.store.list_users(team_id).await?)
    }

    pub async fn get_user(
        &self,
        actor_id: Uuid,
        team_id: Uuid,
        user_id: Uuid,
    ) -> Result<User, AppError> {
        self.member(actor_id, team_id).await?;
        self.load_user(team_id, user_id).await
    }

    /// Change the actor's own name or external-platform credentials.
    /// An empty token clears it.
    pub async fn update_profile(
        &self,
        actor_id: Uuid,
        team_id: Uuid,
        user_id: Uuid,
        req: UpdateProfileRequest,
    ) -> Result<User, AppError> {
        let name = req
            .name
            .as_deref()
            .map(|n| required_text(n, "Name", MAX_NAME_LEN))
            .transpose()?;
        let access_token = req.platform_access_token.map(|t| optional_text(Some(t)));
        let refresh_token = req.platform_refresh_token.map(|t| optional_text(Some(t)));

        let mut fields = Vec::new();
        if name.is_some() {
            fields.push("name");
        }
        if access_token.is_some() {
            fields.push("platform_access_token");
        }
        if refresh_token.is_some() {
            fields.push("platform_refresh_token");
        }
        if fields.is_empty() {
            return Err(AppError::Validation("No changes provided".into()));
        }

        let mut attempt = 0;
        loop {
            let (_, actor) = self.member(actor_id, team_id).await?;
            let current = self.load_user(team_id, user_id).await?;
            guard::authorize(
                &actor,
                team_id,
                Action::UpdateProfile,
                Ownership::of(&actor, Some(current.id)),
            )?;

            let mut updated = current.clone();
            if let Some(name) = &name {
                updated.name = name.clone();
            }
            if let Some(token) = &access_token {
                updated.platform_access_token = token.clone();
            }
            if let Some(token) = &refresh_token {
                updated.platform_refresh_token = token.clone();
            }
            updated.version = current.version + 1;
            updated.updated_at = Utc::now();

            // Only field names are logged, never credential values.
            let writes = vec![
                Write::UpdateUser {
                    user: updated.clone(),
                    expected_version: current.version,
                },
                activity::append(
                    team_id,
                    actor.user_id,
                    ActionType::UserUpdated,
                    TargetRef::user(user_id),
                    json!({ "fields": fields }),
                ),
            ];

            match self.store.commit(writes).await {
                Ok(()) => {
                    tracing::info!(%team_id, %user_id, "profile updated");
                    return Ok(updated);
                }
                Err(e) if self.should_retry(&e, attempt, "update_profile", user_id) => {
                    attempt += 1
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    pub async fn change_role(
        &self,
        actor_id: Uuid,
        team_id: Uuid,
        user_id: Uuid,
        req: ChangeRoleRequest,
    ) -> Result<User, AppError> {
        let mut attempt = 0;
        loop {
            let (_, actor) = self.member(actor_id, team_id).await?;
            let current = self.load_user(team_id, user_id).await?;
            guard::authorize(&actor, team_id, Action::ManageMembers, Ownership::Other)?;

            if current.role == req.role {
                return Ok(current);
            }
            if req.role != UserRole::Admin && self.owner_of(team_id).await? == user_id {
                return Err(AppError::Validation(
                    "The team owner cannot be demoted".into(),
                ));
            }

            let updated = User {
                role: req.role,
                version: current.version + 1,
                updated_at: Utc::now(),
                ..current.clone()
            };
            let writes = vec![
                Write::UpdateUser {
                    user: updated.clone(),
                    expected_version: current.version,
                },
                activity::append(
                    team_id,
                    actor.user_id,
                    ActionType::UserUpdated,
                    TargetRef::user(user_id),
                    json!({ "fields": ["role"], "from": current.role, "to": updated.role }),
                ),
            ];

            match self.store.commit(writes).await {
                Ok(()) => {
                    tracing::info!(
                        %team_id,
                        %user_id,
                        actor_id = %actor.user_id,
                        role = updated.role.as_str(),
                        "role changed"
                    );
                    return Ok(updated);
                }
                Err(e) if self.should_retry(&e, attempt, "change_role", user_id) => attempt += 1,
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Remove a member. Their videos stay with the team without an uploader.
    pub async fn remove_user(
        &self,
        actor_id: Uuid,
        team_id: Uuid,
        user_id: Uuid,
    ) -> Result<(), AppError> {
        let (_, actor) = self.member(actor_id, team_id).await?;
        let target = self.load_user(team_id, user_id).await?;
        guard::authorize(&actor, team_id, Action::ManageMembers, Ownership::Other)?;

        if self.owner_of(team_id).await? == user_id {
            return Err(AppError::Validation(
                "The team owner cannot be removed".into(),
            ));
        }

        self.store
            .commit(vec![
                Write::DeleteUser(user_id),
                activity::append(
                    team_id,
                    actor.user_id,
                    ActionType::UserRemoved,
                    TargetRef::user(user_id),
                    json!({ "email": target.email, "role": target.role }),
                ),
            ])
            .await?;

        tracing::info!(%team_id, %user_id, actor_id = %actor.user_id, "user removed");
        Ok(())
    }

    /// Invite an email address into the team.
    ///
    /// An expired pending invitation for the same address is re-issued with a
    /// fresh token and expiry.
    pub async fn invite(
        &self,
        actor_id: Uuid,
        team_id: Uuid,
        req: CreateInvitationRequest,
    ) -> Result<Invitation, AppError> {
        let (_, actor) = self.member(actor_id, team_id).await?;
        guard::authorize(&actor, team_id, Action::ManageInvitations, Ownership::Other)?;
        let email = normalize_email(&req.email)?;

        if self.store.find_user_by_email(&email).await?.is_some() {
            return Err(AppError::Conflict("Email is already registered".into()));
        }

        let now = Utc::now();
        let expires_at = now + self.settings.invitation_ttl;
        let existing = self.store.find_pending_invitation(team_id, &email).await?;

        let (invitation, write) = match existing {
            Some(current) if !current.is_expired(now) => {
                return Err(AppError::Conflict(
                    "A pending invitation already exists for this email".into(),
                ));
            }
            Some(current) => {
                let reissued = Invitation {
                    inviter_id: actor.user_id,
                    token: generate_token(),
                    expires_at,
                    created_at: now,
                    ..current
                };
                let write = Write::UpdateInvitation {
                    invitation: reissued.clone(),
                    expected_status: InvitationStatus::Pending,
                };
                (reissued, write)
            }
            None => {
                let invitation = Invitation {
                    id: Uuid::new_v4(),
                    team_id,
                    inviter_id: actor.user_id,
                    invitee_email: email,
                    token: generate_token(),
                    status: InvitationStatus::Pending,
                    expires_at,
                    created_at: now,
                };
                (invitation.clone(), Write::InsertInvitation(invitation))
            }
        };

        self.store
            .commit(vec![
                write,
                activity::append(
                    team_id,
                    actor.user_id,
                    ActionType::UserInvited,
                    TargetRef::invitation(invitation.id),
                    json!({
                        "email": invitation.invitee_email,
                        "expires_at": invitation.expires_at,
                    }),
                ),
            ])
            .await?;

        tracing::info!(
            %team_id,
            invitation_id = %invitation.id,
            actor_id = %actor.user_id,
            "invitation issued"
        );
        Ok(invitation)
    }

    pub async fn list_invitations(
        &self,
        actor_id: Uuid,
        team_id: Uuid,
    ) -> Result<Vec<Invitation>, AppError> {
        let (_, actor) = self.member(actor_id, team_id).await?;
        guard::authorize(&actor, team_id, Action::ManageInvitations, Ownership::Other)?;
        Ok(self.store.list_invitations(team_id).await?)
    }

    pub async fn revoke_invitation(
        &self,
        actor_id: Uuid,
        team_id: Uuid,
        invitation_id: Uuid,
    ) -> Result<(), AppError> {
        let (_, actor) = self.member(actor_id, team_id).await?;
        guard::authorize(&actor, team_id, Action::ManageInvitations, Ownership::Other)?;
        let invitation = self
            .store
            .get_invitation(team_id, invitation_id)
            .await?
            .ok_or_else(|| AppError::NotFound("Invitation not found".into()))?;

        if invitation.status != InvitationStatus::Pending {
            return Err(AppError::Validation(
                "Only pending invitations can be revoked".into(),
            ));
        }

        self.store
            .commit(vec![
                Write::DeleteInvitation {
                    id: invitation.id,
                    expected_status: InvitationStatus::Pending,
                },
                activity::append(
                    team_id,
                    actor.user_id,
                    ActionType::InvitationRevoked,
                    TargetRef::invitation(invitation.id),
                    json!({ "email": invitation.invitee_email }),
                ),
            ])
            .await?;

        tracing::info!(%team_id, %invitation_id, actor_id = %actor.user_id, "invitation revoked");
        Ok(())
    }

    /// Turn a pending invitation into an editor account.
    ///
    /// Needs no authenticated actor: holding the token is the credential.
    pub async fn accept_invitation(&self, req: AcceptInvitationRequest) -> Result<User, AppError> {
        let name = required_text(&req.name, "Name", MAX_NAME_LEN)?;
        let token = req.token.trim();
        if token.is_empty() {
            return Err(AppError::Validation("Invitation token is required".into()));
        }

        let invitation = self
            .store
            .find_invitation_by_token(token)
            .await?
            .ok_or_else(|| AppError::NotFound("Invitation not found".into()))?;

        let now = Utc::now();
        if invitation.status == InvitationStatus::Accepted {
            return Err(AppError::Conflict("Invitation has already been used".into()));
        }
        if !invitation.is_acceptable(now) {
            return Err(AppError::Validation("Invitation has expired".into()));
        }
        if self
            .store
            .find_user_by_email(&invitation.invitee_email)
            .await?
            .is_some()
        {
            return Err(AppError::Conflict("Email is already registered".into()));
        }

        let user = User {
            id: Uuid::new_v4(),
            team_id: invitation.team_id,
            email: invitation.invitee_email.clone(),
            name,
            role: UserRole::Editor,
            platform_access_token: None,
            platform_refresh_token: None,
            version: 0,
            created_at: now,
            updated_at: now,
        };
        let accepted = Invitation {
            status: InvitationStatus::Accepted,
            ..invitation.clone()
        };

        self.store
            .commit(vec![
                Write::InsertUser(user.clone()),
                Write::UpdateInvitation {
                    invitation: accepted,
                    expected_status: InvitationStatus::Pending,
                },
                activity::append(
                    user.team_id,
                    user.id,
                    ActionType::UserJoined,
                    TargetRef::user(user.id),
                    json!({ "invitation_id": invitation.id, "invited_by": invitation.inviter_id }),
                ),
            ])
            .await?;

        tracing::info!(team_id = %user.team_id, user_id = %user.id, "invitation accepted");
        Ok(user)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::Duration;

    use super::*;
    use crate::models::video::VideoStatus;
    use crate::testing::{Harness, InterleavingStore};

    fn invite_req(email: &str) -> CreateInvitationRequest {
        CreateInvitationRequest {
            email: email.into(),
        }
    }

    fn accept_req(token: &str) -> AcceptInvitationRequest {
        AcceptInvitationRequest {
            token: token.into(),
            name: "Newcomer".into(),
        }
    }

    #[test]
    fn tokens_are_long_and_alphanumeric() {
        let token = generate_token();
        assert_eq!(token.len(), TOKEN_LEN);
        assert!(token.chars().all(|c| c.is_ascii_alphanumeric()));
        assert_ne!(token, generate_token());
    }

    #[tokio::test]
    async fn test_invite_and_accept() {
        let h = Harness::new().await;
        let invitation = h
            .workflow
            .invite(h.admin.id, h.team.id, invite_req("New@Example.com"))
            .await
            .unwrap();
        assert_eq!(invitation.invitee_email, "new@example.com");
        assert_eq!(invitation.status, InvitationStatus::Pending);

        let user = h
            .workflow
            .accept_invitation(accept_req(&invitation.token))
            .await
            .unwrap();
        assert_eq!(user.team_id, h.team.id);
        assert_eq!(user.role, UserRole::Editor);

        let listed = h
            .workflow
            .list_invitations(h.admin.id, h.team.id)
            .await
            .unwrap();
        assert_eq!(listed[0].status, InvitationStatus::Accepted);

        let actions = h.actions().await;
        assert_eq!(
            actions[actions.len() - 2..],
            [ActionType::UserInvited, ActionType::UserJoined]
        );

        let err = h
            .workflow
            .accept_invitation(accept_req(&invitation.token))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_editors_cannot_invite() {
        let h = Harness::new().await;
        let err = h
            .workflow
            .invite(h.editor.id, h.team.id, invite_req("new@example.com"))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Forbidden));
    }

    #[tokio::test]
    async fn test_duplicate_pending_invitation_conflicts() {
        let h = Harness::new().await;
        h.workflow
            .invite(h.admin.id, h.team.id, invite_req("new@example.com"))
            .await
            .unwrap();
        let err = h
            .workflow
            .invite(h.admin.id, h.team.id, invite_req("new@example.com"))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));

        let err = h
            .workflow
            .invite(h.admin.id, h.team.id, invite_req(&h.editor.email))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_expired_invitation_is_refused_then_reissued() {
        let h = Harness::with_invitation_ttl(Duration::zero()).await;
        let stale = h
            .workflow
            .invite(h.admin.id, h.team.id, invite_req("late@example.com"))
            .await
            .unwrap();

        let err = h
            .workflow
            .accept_invitation(accept_req(&stale.token))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));

        let reissued = h
            .workflow
            .invite(h.admin.id, h.team.id, invite_req("late@example.com"))
            .await
            .unwrap();
        assert_eq!(reissued.id, stale.id);
        assert_ne!(reissued.token, stale.token);

        let listed = h
            .workflow
            .list_invitations(h.admin.id, h.team.id)
            .await
            .unwrap();
        assert_eq!(listed.len(), 1);
    }

    #[tokio::test]
    async fn test_revoked_invitation_cannot_be_accepted() {
        let h = Harness::new().await;
        let invitation = h
            .workflow
            .invite(h.admin.id, h.team.id, invite_req("new@example.com"))
            .await
            .unwrap();
        h.workflow
            .revoke_invitation(h.admin.id, h.team.id, invitation.id)
            .await
            .unwrap();

        let err = h
            .workflow
            .accept_invitation(accept_req(&invitation.token))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
        assert_eq!(h.actions().await.last(), Some(&ActionType::InvitationRevoked));
    }

    #[tokio::test]
    async fn test_profile_updates_are_self_only() {
        let h = Harness::new().await;
        let req = || UpdateProfileRequest {
            platform_access_token: Some("access".into()),
            ..Default::default()
        };

        let err = h
            .workflow
            .update_profile(h.admin.id, h.team.id, h.editor.id, req())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Forbidden));

        let user = h
            .workflow
            .update_profile(h.editor.id, h.team.id, h.editor.id, req())
            .await
            .unwrap();
        assert_eq!(user.platform_access_token.as_deref(), Some("access"));

        let log = h.activity().await;
        assert_eq!(log[0].action, ActionType::UserUpdated);
        assert_eq!(log[0].details, json!({ "fields": ["platform_access_token"] }));
    }

    #[tokio::test]
    async fn test_profile_update_keeps_concurrent_demotion() {
        let h = Harness::new().await;
        let second = h.add_admin("second@example.com").await;

        // The owner demotes `second` while their own profile edit is in flight.
        let racing = Arc::new(InterleavingStore::new(h.store.clone()));
        racing.inject_before_next_commit(vec![Write::UpdateUser {
            user: User {
                role: UserRole::Editor,
                version: second.version + 1,
                ..second.clone()
            },
            expected_version: second.version,
        }]);
        let workflow = h.workflow_over(racing.clone());

        let updated = workflow
            .update_profile(
                second.id,
                h.team.id,
                second.id,
                UpdateProfileRequest {
                    name: Some("New Name".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.name, "New Name");
        assert_eq!(updated.role, UserRole::Editor);

        let stored = h
            .workflow
            .get_user(h.admin.id, h.team.id, second.id)
            .await
            .unwrap();
        assert_eq!(stored.role, UserRole::Editor);
        assert_eq!(stored.name, "New Name");
        assert_eq!(stored.version, second.version + 2);
    }

    #[tokio::test]
    async fn test_role_change_keeps_concurrent_profile_update() {
        let h = Harness::new().await;
        let editor = h.editor.clone();

        let racing = Arc::new(InterleavingStore::new(h.store.clone()));
        racing.inject_before_next_commit(vec![Write::UpdateUser {
            user: User {
                name: "Renamed".into(),
                platform_access_token: Some("fresh".into()),
                version: editor.version + 1,
                ..editor.clone()
            },
            expected_version: editor.version,
        }]);
        let workflow = h.workflow_over(racing.clone());

        let promoted = workflow
            .change_role(
                h.admin.id,
                h.team.id,
                editor.id,
                ChangeRoleRequest {
                    role: UserRole::Admin,
                },
            )
            .await
            .unwrap();
        assert_eq!(promoted.role, UserRole::Admin);
        assert_eq!(promoted.name, "Renamed");
        assert_eq!(promoted.platform_access_token.as_deref(), Some("fresh"));

        let stored = h
            .workflow
            .get_user(h.admin.id, h.team.id, editor.id)
            .await
            .unwrap();
        assert_eq!(stored.role, UserRole::Admin);
        assert_eq!(stored.name, "Renamed");
    }

    #[tokio::test]
    async fn test_owner_cannot_be_demoted_or_removed() {
        let h = Harness::new().await;
        let second_admin = h.add_admin("second@example.com").await;

        let err = h
            .workflow
            .change_role(
                second_admin.id,
                h.team.id,
                h.admin.id,
                ChangeRoleRequest {
                    role: UserRole::Editor,
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));

        let err = h
            .workflow
            .remove_user(second_admin.id, h.team.id, h.admin.id)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));

        let demoted = h
            .workflow
            .change_role(
                h.admin.id,
                h.team.id,
                second_admin.id,
                ChangeRoleRequest {
                    role: UserRole::Editor,
                },
            )
            .await
            .unwrap();
        assert_eq!(demoted.role, UserRole::Editor);
    }

    #[tokio::test]
    async fn test_removed_uploader_leaves_videos_behind() {
        let h = Harness::new().await;
        let v = h.pending(h.editor.id).await;

        let err = h
            .workflow
            .remove_user(h.editor.id, h.team.id, h.admin.id)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Forbidden));

        h.workflow
            .remove_user(h.admin.id, h.team.id, h.editor.id)
            .await
            .unwrap();

        let stored = h.workflow.get_video(h.admin.id, h.team.id, v.id).await.unwrap();
        assert_eq!(stored.uploader_id, None);
        assert_eq!(stored.status, VideoStatus::PendingReview);

        // The review cycle continues without the uploader.
        let approved = h
            .workflow
            .approve(h.admin.id, h.team.id, v.id, Default::default())
            .await
            .unwrap();
        assert_eq!(approved.status, VideoStatus::Approved);

        let err = h
            .workflow
            .list_users(h.editor.id, h.team.id)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Unauthorized));
    }

    #[tokio::test]
    async fn test_users_of_other_teams_are_not_found() {
        let h = Harness::new().await;
        let (_, other_admin) = h.other_team().await;
        let err = h
            .workflow
            .get_user(h.admin.id, h.team.id, other_admin.id)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }
}
