use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use uuid::Uuid;

use crate::AppState;
use crate::auth::middleware::AuthUser;
use crate::error::AppError;
use crate::models::invitation::{AcceptInvitationRequest, CreateInvitationRequest, Invitation};
use crate::models::user::UserResponse;

pub fn router() -> Router<AppState> {
    Router::new()
        .route(
            "/api/teams/{team_id}/invitations",
            get(list_invitations).post(invite),
        )
        .route(
            "/api/teams/{team_id}/invitations/{invitation_id}",
            delete(revoke_invitation),
        )
        .route("/api/invitations/accept", post(accept_invitation))
}

async fn invite(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(team_id): Path<Uuid>,
    Json(body): Json<CreateInvitationRequest>,
) -> Result<(StatusCode, Json<Invitation>), AppError> {
    let invitation = state.workflow.invite(auth.user_id, team_id, body).await?;
    Ok((StatusCode::CREATED, Json(invitation)))
}

async fn list_invitations(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(team_id): Path<Uuid>,
) -> Result<Json<Vec<Invitation>>, AppError> {
    let invitations = state
        .workflow
        .list_invitations(auth.user_id, team_id)
        .await?;
    Ok(Json(invitations))
}

async fn revoke_invitation(
    State(state): State<AppState>,
    auth: AuthUser,
    Path((team_id, invitation_id)): Path<(Uuid, Uuid)>,
) -> Result<StatusCode, AppError> {
    state
        .workflow
        .revoke_invitation(auth.user_id, team_id, invitation_id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

// Public: the token is the credential.
async fn accept_invitation(
    State(state): State<AppState>,
    Json(body): Json<AcceptInvitationRequest>,
) -> Result<(StatusCode, Json<UserResponse>), AppError> {
    let user = state.workflow.accept_invitation(body).await?;
    Ok((StatusCode::CREATED, Json(user.into())))
}
