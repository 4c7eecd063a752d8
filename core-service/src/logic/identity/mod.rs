//! Identity Module
//!
//! Read-only view of the signed-in operator. Authentication itself lives
//! with an external provider; the core only stamps records with the user
//! id and gates access by role.

pub mod guard;

pub use guard::{Access, RouteGuard};

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::constants::BROWSER_AGENT_ID;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Analyst,
    Viewer,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Analyst => "analyst",
            Role::Viewer => "viewer",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "admin" => Some(Role::Admin),
            "analyst" => Some(Role::Analyst),
            "viewer" => Some(Role::Viewer),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub email: String,
}

#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn current_user(&self) -> Option<User>;
    async fn roles(&self, user_id: &str) -> Vec<Role>;
}

/// Id stamped on persisted records: the user, or the shared browser agent
pub async fn agent_id_for(identity: &dyn IdentityProvider) -> String {
    identity
        .current_user()
        .await
        .map(|u| u.id)
        .unwrap_or_else(|| BROWSER_AGENT_ID.to_string())
}

// ============================================================================
// STATIC IDENTITY
// ============================================================================

/// Fixed user/roles, switchable at runtime
#[derive(Default)]
pub struct StaticIdentity {
    state: RwLock<Option<(User, Vec<Role>)>>,
}

impl StaticIdentity {
    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn signed_in(user: User, roles: Vec<Role>) -> Self {
        Self {
            state: RwLock::new(Some((user, roles))),
        }
    }

    /// `SENTINEL_USER_ID` / `SENTINEL_USER_EMAIL` / `SENTINEL_USER_ROLES`
    pub fn from_env() -> Self {
        let Ok(id) = std::env::var("SENTINEL_USER_ID") else {
            return Self::anonymous();
        };
        let email = std::env::var("SENTINEL_USER_EMAIL").unwrap_or_default();
        let roles = std::env::var("SENTINEL_USER_ROLES")
            .unwrap_or_default()
            .split(',')
            .filter_map(|r| Role::parse(r.trim()))
            .collect();
        Self::signed_in(User { id, email }, roles)
    }

    pub fn sign_in(&self, user: User, roles: Vec<Role>) {
        *self.state.write() = Some((user, roles));
    }

    pub fn sign_out(&self) {
        *self.state.write() = None;
    }
}

#[async_trait]
impl IdentityProvider for StaticIdentity {
    async fn current_user(&self) -> Option<User> {
        self.state.read().as_ref().map(|(u, _)| u.clone())
    }

    async fn roles(&self, user_id: &str) -> Vec<Role> {
        match self.state.read().as_ref() {
            Some((u, roles)) if u.id == user_id => roles.clone(),
            _ => Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_agent_id_fallback() {
        let identity = StaticIdentity::anonymous();
        assert_eq!(agent_id_for(&identity).await, "browser-agent");

        identity.sign_in(
            User { id: "u-1".into(), email: "a@b.c".into() },
            vec![Role::Analyst],
        );
        assert_eq!(agent_id_for(&identity).await, "u-1");
        assert_eq!(identity.roles("u-1").await, vec![Role::Analyst]);
        assert!(identity.roles("u-2").await.is_empty());

        identity.sign_out();
        assert!(identity.current_user().await.is_none());
    }
}
