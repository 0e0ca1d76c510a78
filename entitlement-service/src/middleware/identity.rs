//! Verified-identity extractor.
//!
//! The gateway does not authenticate users itself; the front door validates
//! the session with the identity provider and forwards the verified identity
//! in headers. Requests without them are rejected with 401.

use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use service_core::error::AppError;
use uuid::Uuid;

/// Identity of the authenticated end user, as asserted by the front door.
#[derive(Debug, Clone)]
pub struct AuthenticatedUser {
    pub user_id: Uuid,
    pub email: String,
    /// Optional display name header; falls back to the email address.
    pub display_name: String,
}

#[async_trait]
impl<S> FromRequestParts<S> for AuthenticatedUser
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let user_id = parts
            .headers
            .get("x-user-id")
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| AppError::AuthError(anyhow::anyhow!("Missing x-user-id header")))?;
        let user_id = Uuid::parse_str(user_id)
            .map_err(|_| AppError::AuthError(anyhow::anyhow!("Malformed x-user-id header")))?;

        let email = parts
            .headers
            .get("x-user-email")
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| AppError::AuthError(anyhow::anyhow!("Missing x-user-email header")))?
            .to_string();

        let display_name = parts
            .headers
            .get("x-user-name")
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string())
            .unwrap_or_else(|| email.clone());

        let span = tracing::Span::current();
        span.record("user_id", user_id.to_string().as_str());

        Ok(AuthenticatedUser {
            user_id,
            email,
            display_name,
        })
    }
}
