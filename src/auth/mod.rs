use crate::state::AppState;
use axum::Router;

pub mod dto;
pub mod extractors;
pub mod handlers;
pub mod password;
pub mod preflight;
pub mod providers;
pub mod repo_types;
pub mod session;
pub mod sign_in_errors;
pub mod validation;

pub fn router() -> Router<AppState> {
    Router::new()
        .merge(handlers::session_routes())
        .merge(handlers::user_routes())
}
