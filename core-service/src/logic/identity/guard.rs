//! Route Guard
//!
//! Any-of role check for protected surfaces.

use super::{IdentityProvider, Role};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Access {
    Allowed,
    SignInRequired,
    Forbidden { required: Vec<Role> },
}

impl Access {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Access::Allowed)
    }

    /// "admin or analyst"
    pub fn describe_required(&self) -> Option<String> {
        match self {
            Access::Forbidden { required } => Some(
                required.iter().map(|r| r.as_str()).collect::<Vec<_>>().join(" or "),
            ),
            _ => None,
        }
    }
}

pub struct RouteGuard<'a> {
    identity: &'a dyn IdentityProvider,
}

impl<'a> RouteGuard<'a> {
    pub fn new(identity: &'a dyn IdentityProvider) -> Self {
        Self { identity }
    }

    /// Empty `required` admits any signed-in user
    pub async fn check(&self, required: &[Role]) -> Access {
        let Some(user) = self.identity.current_user().await else {
            return Access::SignInRequired;
        };
        if required.is_empty() {
            return Access::Allowed;
        }

        let roles = self.identity.roles(&user.id).await;
        if required.iter().any(|r| roles.contains(r)) {
            Access::Allowed
        } else {
            Access::Forbidden {
                required: required.to_vec(),
            }
        }
    }
}
