use axum::extract::{Path, Query, State};
use axum::routing::get;
use axum::{Json, Router};
use uuid::Uuid;

use crate::AppState;
use crate::auth::middleware::AuthUser;
use crate::error::AppError;
use crate::models::activity::{ActivityFilter, ActivityLog};

pub fn router() -> Router<AppState> {
    Router::new().route("/api/teams/{team_id}/activity", get(list_activity))
}

async fn list_activity(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(team_id): Path<Uuid>,
    Query(filter): Query<ActivityFilter>,
) -> Result<Json<Vec<ActivityLog>>, AppError> {
    let entries = state
        .workflow
        .list_activity(auth.user_id, team_id, &filter)
        .await?;
    Ok(Json(entries))
}
