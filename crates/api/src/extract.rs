//! Request extractors

use crate::error::ApiError;
use crate::SharedState;
use auth::{AuthError, Role, SharedKey};
use axum::async_trait;
use axum::extract::{FromRequest, FromRequestParts, Request};
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use axum::http::HeaderMap;
use axum::Json;
use serde::de::DeserializeOwned;
use storage::User;
use uuid::Uuid;

/// The authenticated member behind a request
#[derive(Debug, Clone)]
pub struct AuthContext {
    pub user: User,
    pub organization_id: Uuid,
    pub role: Role,
    pub token: String,
}

impl AuthContext {
    /// Fail with 403 unless the member has at least `role`
    pub fn require(&self, role: Role) -> Result<(), ApiError> {
        Ok(auth::authorize(self.role, role)?)
    }
}

#[async_trait]
impl FromRequestParts<SharedState> for AuthContext {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &SharedState) -> Result<Self, Self::Rejection> {
        let token = bearer_token(&parts.headers).ok_or(AuthError::MissingToken)?;

        let state = state.read().await;
        let session = state.sessions.resolve(token)?;

        // Role is read from the membership so changes apply to live sessions.
        let membership = state
            .repository
            .membership(session.organization_id, session.user_id)?
            .ok_or(AuthError::NotMember)?;
        let user = state.repository.get_user(session.user_id)?;

        Ok(AuthContext {
            user,
            organization_id: session.organization_id,
            role: membership.role,
            token: token.to_string(),
        })
    }
}

/// Header carrying the identity provider's key
pub const ISSUER_KEY_HEADER: &str = "x-issuer-key";
/// Header carrying the operator's key
pub const OPERATOR_KEY_HEADER: &str = "x-operator-key";

/// Marker for requests sent by the identity provider.
///
/// Rejected with 401 when the issuer key is missing, wrong, or not
/// configured at all.
#[derive(Debug, Clone, Copy)]
pub struct VerifiedIssuer;

#[async_trait]
impl FromRequestParts<SharedState> for VerifiedIssuer {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &SharedState) -> Result<Self, Self::Rejection> {
        let state = state.read().await;
        if presents_key(&parts.headers, ISSUER_KEY_HEADER, state.issuer_key.as_ref()) {
            Ok(VerifiedIssuer)
        } else {
            Err(AuthError::UnverifiedIssuer.into())
        }
    }
}

/// Whether the request carries `key` in the `header` header
pub fn presents_key(headers: &HeaderMap, header: &str, key: Option<&SharedKey>) -> bool {
    let presented = headers.get(header).and_then(|v| v.to_str().ok());
    match (key, presented) {
        (Some(key), Some(presented)) => key.matches(presented.trim()),
        _ => false,
    }
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

/// JSON body whose rejections are reported as validation errors
#[derive(Debug, Clone)]
pub struct Payload<T>(pub T);

#[async_trait]
impl<S, T> FromRequest<S> for Payload<T>
where
    T: DeserializeOwned + Send,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(req, state).await?;
        Ok(Payload(value))
    }
}
