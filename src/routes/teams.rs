use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use uuid::Uuid;

use crate::AppState;
use crate::auth::middleware::AuthUser;
use crate::error::AppError;
use crate::models::team::{Team, UpdateTeamRequest};

pub fn router() -> Router<AppState> {
    Router::new().route(
        "/api/teams/{team_id}",
        get(get_team).patch(rename_team).delete(delete_team),
    )
}

async fn get_team(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(team_id): Path<Uuid>,
) -> Result<Json<Team>, AppError> {
    let team = state.workflow.get_team(auth.user_id, team_id).await?;
    Ok(Json(team))
}

async fn rename_team(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(team_id): Path<Uuid>,
    Json(body): Json<UpdateTeamRequest>,
) -> Result<Json<Team>, AppError> {
    let team = state
        .workflow
        .rename_team(auth.user_id, team_id, body)
        .await?;
    Ok(Json(team))
}

async fn delete_team(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(team_id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    state.workflow.delete_team(auth.user_id, team_id).await?;
    Ok(StatusCode::NO_CONTENT)
}
