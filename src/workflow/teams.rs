use chrono::Utc;
use serde_json::json;
use uuid::Uuid;

use super::guard::{self, Action, Ownership};
use super::{MAX_NAME_LEN, Workflow, activity, normalize_email, required_text};
use crate::error::AppError;
use crate::models::activity::{ActionType, TargetRef};
use crate::models::team::{CreateTeamRequest, Team, UpdateTeamRequest};
use crate::models::user::{User, UserRole};
use crate::store::Write;

impl Workflow {
    /// Create a team together with its first admin, who also owns it.
    pub async fn create_team(&self, req: CreateTeamRequest) -> Result<(Team, User), AppError> {
        let name = required_text(&req.name, "Team name", MAX_NAME_LEN)?;
        let owner_name = required_text(&req.owner_name, "Owner name", MAX_NAME_LEN)?;
        let owner_email = normalize_email(&req.owner_email)?;

        if self.store.find_user_by_email(&owner_email).await?.is_some() {
            return Err(AppError::Conflict("Email is already registered".into()));
        }

        let now = Utc::now();
        let team_id = Uuid::new_v4();
        let owner = User {
            id: Uuid::new_v4(),
            team_id,
            email: owner_email,
            name: owner_name,
            role: UserRole::Admin,
            platform_access_token: None,
            platform_refresh_token: None,
            version: 0,
            created_at: now,
            updated_at: now,
        };
        let team = Team {
            id: team_id,
            owner_id: owner.id,
            name,
            created_at: now,
            updated_at: now,
        };

        self.store
            .commit(vec![
                Write::InsertTeam(team.clone()),
                Write::InsertUser(owner.clone()),
                activity::append(
                    team.id,
                    owner.id,
                    ActionType::TeamCreated,
                    TargetRef::team(team.id),
                    json!({ "name": team.name, "owner_email": owner.email }),
                ),
            ])
            .await?;

        tracing::info!(team_id = %team.id, owner_id = %owner.id, "team created");
        Ok((team, owner))
    }

    pub async fn get_team(&self, actor_id: Uuid, team_id: Uuid) -> Result<Team, AppError> {
        self.member(actor_id, team_id).await?;
        self.load_team(team_id).await
    }

    async fn load_team(&self, team_id: Uuid) -> Result<Team, AppError> {
        self.store
            .get_team(team_id)
            .await?
            .ok_or_else(|| AppError::NotFound("Team not found".into()))
    }

    pub async fn rename_team(
        &self,
        actor_id: Uuid,
        team_id: Uuid,
        req: UpdateTeamRequest,
    ) -> Result<Team, AppError> {
        let (_, actor) = self.member(actor_id, team_id).await?;
        guard::authorize(&actor, team_id, Action::UpdateTeam, Ownership::Other)?;
        let name = required_text(&req.name, "Team name", MAX_NAME_LEN)?;

        let current = self.load_team(team_id).await?;
        if current.name == name {
            return Ok(current);
        }
        let updated = Team {
            name,
            updated_at: Utc::now(),
            ..current.clone()
        };

        self.store
            .commit(vec![
                Write::UpdateTeam(updated.clone()),
                activity::append(
                    team_id,
                    actor.user_id,
                    ActionType::TeamUpdated,
                    TargetRef::team(team_id),
                    json!({ "from": current.name, "to": updated.name }),
                ),
            ])
            .await?;

        tracing::info!(%team_id, actor_id = %actor.user_id, "team renamed");
        Ok(updated)
    }

    /// Delete the team and everything it owns. Only the owner may do this.
    pub async fn delete_team(&self, actor_id: Uuid, team_id: Uuid) -> Result<(), AppError> {
        let (_, actor) = self.member(actor_id, team_id).await?;
        let team = self.load_team(team_id).await?;
        guard::authorize(
            &actor,
            team_id,
            Action::DeleteTeam,
            Ownership::of(&actor, Some(team.owner_id)),
        )?;

        self.store.commit(vec![Write::DeleteTeam(team_id)]).await?;

        // The team's audit log goes with it.
        tracing::info!(%team_id, actor_id = %actor.user_id, name = %team.name, "team deleted");
        Ok(())
    }
}
