use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, put};
use axum::{Json, Router};
use uuid::Uuid;

use crate::AppState;
use crate::auth::middleware::AuthUser;
use crate::error::AppError;
use crate::models::user::{ChangeRoleRequest, UpdateProfileRequest, UserResponse};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/teams/{team_id}/users", get(list_users))
        .route(
            "/api/teams/{team_id}/users/{user_id}",
            get(get_user).patch(update_profile).delete(remove_user),
        )
        .route("/api/teams/{team_id}/users/{user_id}/role", put(change_role))
}

async fn list_users(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(team_id): Path<Uuid>,
) -> Result<Json<Vec<UserResponse>>, AppError> {
    let users = state.workflow.list_users(auth.user_id, team_id).await?;
    Ok(Json(users.into_iter().map(UserResponse::from).collect()))
}

async fn get_user(
    State(state): State<AppState>,
    auth: AuthUser,
    Path((team_id, user_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<UserResponse>, AppError> {
    let user = state
        .workflow
        .get_user(auth.user_id, team_id, user_id)
        .await?;
    Ok(Json(user.into()))
}

async fn update_profile(
    State(state): State<AppState>,
    auth: AuthUser,
    Path((team_id, user_id)): Path<(Uuid, Uuid)>,
    Json(body): Json<UpdateProfileRequest>,
) -> Result<Json<UserResponse>, AppError> {
    let user = state
        .workflow
        .update_profile(auth.user_id, team_id, user_id, body)
        .await?;
    Ok(Json(user.into()))
}

async fn change_role(
    State(state): State<AppState>,
    auth: AuthUser,
    Path((team_id, user_id)): Path<(Uuid, Uuid)>,
    Json(body): Json<ChangeRoleRequest>,
) -> Result<Json<UserResponse>, AppError> {
    let user = state
        .workflow
        .change_role(auth.user_id, team_id, user_id, body)
        .await?;
    Ok(Json(user.into()))
}

async fn remove_user(
    State(state): State<AppState>,
    auth: AuthUser,
    Path((team_id, user_id)): Path<(Uuid, Uuid)>,
) -> Result<StatusCode, AppError> {
    state
        .workflow
        .remove_user(auth.user_id, team_id, user_id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}
