//! Authentication middleware

use axum::{
    extract::{State, Request},
    middleware::Next,
    response::Response,
    http::header::AUTHORIZATION,
};
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use jsonwebtoken::{decode, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use sha2::{Sha256, Digest};

use crate::{AppState, AppError};

pub const AGENT_KEY_HEADER: &str = "x-agent-key";

/// JWT claims issued by the identity provider
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,            // User ID
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub roles: Vec<String>,     // admin | analyst | viewer
    pub exp: usize,
    pub iat: usize,
}

/// User context extracted from JWT
#[derive(Debug, Clone)]
pub struct UserContext {
    pub user_id: String,
    pub email: Option<String>,
    pub roles: Vec<String>,
}

impl UserContext {
    pub fn has_any_role(&self, required: &[&str]) -> bool {
        required.is_empty() || self.roles.iter().any(|r| required.contains(&r.as_str()))
    }
}

/// RBAC: any of `required` grants access; an empty list admits every signed-in user
pub fn require_any_role(user: &UserContext, required: &[&str]) -> Result<(), AppError> {
    if !user.has_any_role(required) {
        tracing::warn!(
            "One of {:?} required but user {} has roles {:?}",
            required, user.user_id, user.roles
        );
        return Err(AppError::Forbidden);
    }
    Ok(())
}

/// Middleware: Require user JWT authentication
pub async fn require_user_auth(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let token = extract_bearer_token(&req)?;

    let claims = decode::<Claims>(
        &token,
        &DecodingKey::from_secret(state.config.jwt_secret.as_bytes()),
        &Validation::default()
    )?.claims;

    if claims.sub.is_empty() {
        return Err(AppError::TokenInvalid);
    }

    req.extensions_mut().insert(UserContext {
        user_id: claims.sub,
        email: claims.email,
        roles: claims.roles,
    });

    Ok(next.run(req).await)
}

/// Middleware: Require the shared agent key when one is configured
pub async fn require_agent_key(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Result<Response, AppError> {
    if let Some(expected) = state.config.agent_key.as_deref() {
        let presented = req.headers()
            .get(AGENT_KEY_HEADER)
            .and_then(|v| v.to_str().ok())
            .ok_or(AppError::Unauthorized)?;

        // Compare digests so the comparison length does not depend on the input
        if hash_token(presented) != hash_token(expected) {
            tracing::warn!("Rejected agent report with invalid key");
            return Err(AppError::Unauthorized);
        }
    }

    Ok(next.run(req).await)
}

/// Extract bearer token from Authorization header
fn extract_bearer_token(req: &Request) -> Result<String, AppError> {
    let auth_header = req.headers()
        .get(AUTHORIZATION)
        .ok_or(AppError::Unauthorized)?
        .to_str()
        .map_err(|_| AppError::Unauthorized)?;

    auth_header
        .strip_prefix("Bearer ")
        .map(str::to_string)
        .ok_or(AppError::Unauthorized)
}

fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    format!("{:x}", hasher.finalize())
}

#[axum::async_trait]
impl<S> FromRequestParts<S> for UserContext
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts.extensions
            .get::<UserContext>()
            .cloned()
            .ok_or(AppError::Unauthorized)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(roles: &[&str]) -> UserContext {
        UserContext {
            user_id: "6d1f7c1e".to_string(),
            email: Some("soc@example.com".to_string()),
            roles: roles.iter().map(|r| r.to_string()).collect(),
        }
    }

    #[test]
    fn test_any_of_roles() {
        assert!(require_any_role(&user(&["analyst"]), &["admin", "analyst"]).is_ok());
        assert!(require_any_role(&user(&["viewer"]), &["admin", "analyst"]).is_err());
        assert!(require_any_role(&user(&[]), &[]).is_ok());
    }

    #[test]
    fn test_hash_is_stable_hex() {
        let digest = hash_token("agent-secret");
        assert_eq!(digest.len(), 64);
        assert_eq!(digest, hash_token("agent-secret"));
        assert_ne!(digest, hash_token("agent-secret "));
    }
}
