pub mod activity;
pub mod invitations;
pub mod teams;
pub mod users;
pub mod videos;

use axum::Router;

use crate::AppState;

pub fn api_router() -> Router<AppState> {
    Router::new()
        .merge(teams::router())
        .merge(users::router())
        .merge(invitations::router())
        .merge(videos::router())
        .merge(activity::router())
}
