use axum::{
    async_trait,
    extract::{FromRef, FromRequestParts},
    http::request::Parts,
};
use tracing::warn;

use super::session::{SessionClaims, SessionKeys};
use crate::error::ActionError;

/// Extracts and verifies the Bearer session token.
pub struct AuthSession(pub SessionClaims);

#[async_trait]
impl<S> FromRequestParts<S> for AuthSession
where
    S: Send + Sync,
    SessionKeys: FromRef<S>,
{
    type Rejection = ActionError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let keys = SessionKeys::from_ref(state);
        let auth = parts
            .headers
            .get(axum::http::header::AUTHORIZATION)
            .and_then(|h| h.to_str().ok())
            .ok_or_else(|| ActionError::Unauthorized("Not signed in".into()))?;

        let token = auth
            .strip_prefix("Bearer ")
            .or_else(|| auth.strip_prefix("bearer "))
            .ok_or_else(|| ActionError::Unauthorized("Invalid authorization scheme".into()))?;

        let claims = keys.verify(token).map_err(|_| {
            warn!("invalid or expired session");
            ActionError::Unauthorized("Session is invalid or has expired".into())
        })?;

        Ok(AuthSession(claims))
    }
}
