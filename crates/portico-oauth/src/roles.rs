//! Role checks against session claims.

use crate::claims::SessionClaims;

/// One role, or a set of which any one suffices.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequiredRoles {
    One(String),
    Any(Vec<String>),
}

impl RequiredRoles {
    fn matches(&self, granted: &[String]) -> bool {
        match self {
            RequiredRoles::One(role) => granted.iter().any(|g| g == role),
            RequiredRoles::Any(roles) => roles.iter().any(|r| granted.iter().any(|g| g == r)),
        }
    }
}

impl From<&str> for RequiredRoles {
    fn from(role: &str) -> Self {
        RequiredRoles::One(role.to_string())
    }
}

impl From<String> for RequiredRoles {
    fn from(role: String) -> Self {
        RequiredRoles::One(role)
    }
}

impl From<Vec<String>> for RequiredRoles {
    fn from(roles: Vec<String>) -> Self {
        RequiredRoles::Any(roles)
    }
}

impl From<Vec<&str>> for RequiredRoles {
    fn from(roles: Vec<&str>) -> Self {
        RequiredRoles::Any(roles.into_iter().map(str::to_string).collect())
    }
}

impl From<&[&str]> for RequiredRoles {
    fn from(roles: &[&str]) -> Self {
        RequiredRoles::Any(roles.iter().map(|r| r.to_string()).collect())
    }
}

impl<const N: usize> From<[&str; N]> for RequiredRoles {
    fn from(roles: [&str; N]) -> Self {
        RequiredRoles::Any(roles.iter().map(|r| r.to_string()).collect())
    }
}

/// Whether `user` holds the required role, or any of the required roles.
///
/// Matching is exact and case-sensitive. No user, a user without roles, or
/// an empty requirement list all yield `false`.
pub fn is_in_role(user: Option<&SessionClaims>, required: impl Into<RequiredRoles>) -> bool {
    let Some(user) = user else {
        return false;
    };
    if user.roles.is_empty() {
        return false;
    }
    required.into().matches(&user.roles)
}
