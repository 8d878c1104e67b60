pub mod handlers;
pub mod machine;
pub mod services;

use crate::state::AppState;
use axum::Router;

pub fn router() -> Router<AppState> {
    Router::new()
        .merge(handlers::verification_routes())
        .merge(handlers::password_reset_routes())
}
