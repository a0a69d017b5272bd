use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use uuid::Uuid;

use crate::AppState;
use crate::auth::middleware::AuthUser;
use crate::error::AppError;
use crate::models::review::{Review, ReviewRequest};
use crate::models::video::{CreateVideoRequest, EditVideoRequest, Video, VideoFilter};

pub fn router() -> Router<AppState> {
    Router::new()
        .route(
            "/api/teams/{team_id}/videos",
            get(list_videos).post(create_video),
        )
        .route(
            "/api/teams/{team_id}/videos/{video_id}",
            get(get_video).patch(edit_video).delete(delete_video),
        )
        .route("/api/teams/{team_id}/videos/{video_id}/submit", post(submit))
        .route("/api/teams/{team_id}/videos/{video_id}/resubmit", post(resubmit))
        .route("/api/teams/{team_id}/videos/{video_id}/approve", post(approve))
        .route("/api/teams/{team_id}/videos/{video_id}/reject", post(reject))
        .route("/api/teams/{team_id}/videos/{video_id}/publish", post(publish))
        .route("/api/teams/{team_id}/videos/{video_id}/reviews", get(list_reviews))
}

async fn create_video(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(team_id): Path<Uuid>,
    Json(body): Json<CreateVideoRequest>,
) -> Result<(StatusCode, Json<Video>), AppError> {
    let video = state
        .workflow
        .create_video(auth.user_id, team_id, body)
        .await?;
    Ok((StatusCode::CREATED, Json(video)))
}

async fn list_videos(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(team_id): Path<Uuid>,
    Query(filter): Query<VideoFilter>,
) -> Result<Json<Vec<Video>>, AppError> {
    let videos = state
        .workflow
        .list_videos(auth.user_id, team_id, &filter)
        .await?;
    Ok(Json(videos))
}

async fn get_video(
    State(state): State<AppState>,
    auth: AuthUser,
    Path((team_id, video_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<Video>, AppError> {
    let video = state
        .workflow
        .get_video(auth.user_id, team_id, video_id)
        .await?;
    Ok(Json(video))
}

async fn edit_video(
    State(state): State<AppState>,
    auth: AuthUser,
    Path((team_id, video_id)): Path<(Uuid, Uuid)>,
    Json(body): Json<EditVideoRequest>,
) -> Result<Json<Video>, AppError> {
    let video = state
        .workflow
        .edit_video(auth.user_id, team_id, video_id, body)
        .await?;
    Ok(Json(video))
}

async fn delete_video(
    State(state): State<AppState>,
    auth: AuthUser,
    Path((team_id, video_id)): Path<(Uuid, Uuid)>,
) -> Result<StatusCode, AppError> {
    state
        .workflow
        .delete_video(auth.user_id, team_id, video_id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn submit(
    State(state): State<AppState>,
    auth: AuthUser,
    Path((team_id, video_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<Video>, AppError> {
    let video = state
        .workflow
        .submit(auth.user_id, team_id, video_id)
        .await?;
    Ok(Json(video))
}

async fn resubmit(
    State(state): State<AppState>,
    auth: AuthUser,
    Path((team_id, video_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<Video>, AppError> {
    let video = state
        .workflow
        .resubmit(auth.user_id, team_id, video_id)
        .await?;
    Ok(Json(video))
}

// The body is optional for approvals.
async fn approve(
    State(state): State<AppState>,
    auth: AuthUser,
    Path((team_id, video_id)): Path<(Uuid, Uuid)>,
    body: Option<Json<ReviewRequest>>,
) -> Result<Json<Video>, AppError> {
    let req = body.map(|Json(r)| r).unwrap_or_default();
    let video = state
        .workflow
        .approve(auth.user_id, team_id, video_id, req)
        .await?;
    Ok(Json(video))
}

async fn reject(
    State(state): State<AppState>,
    auth: AuthUser,
    Path((team_id, video_id)): Path<(Uuid, Uuid)>,
    Json(body): Json<ReviewRequest>,
) -> Result<Json<Video>, AppError> {
    let video = state
        .workflow
        .reject(auth.user_id, team_id, video_id, body)
        .await?;
    Ok(Json(video))
}

async fn publish(
    State(state): State<AppState>,
    auth: AuthUser,
    Path((team_id, video_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<Video>, AppError> {
    let video = state
        .workflow
        .publish(auth.user_id, team_id, video_id)
        .await?;
    Ok(Json(video))
}

async fn list_reviews(
    State(state): State<AppState>,
    auth: AuthUser,
    Path((team_id, video_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<Vec<Review>>, AppError> {
    let reviews = state
        .workflow
        .list_reviews(auth.user_id, team_id, video_id)
        .await?;
    Ok(Json(reviews))
}
