//! Session claims and the identity-provider inputs merged into them.

use serde::{Deserialize, Serialize};

/// The authoritative session record carried between requests.
///
/// `expires_at` is the access-token expiry in epoch milliseconds with the
/// clock-skew margin already applied. `iat`, `exp` and `jti` belong to the
/// session token itself and are stamped by the codec on every encode.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionClaims {
    /// Stable subject identifier.
    #[serde(default)]
    pub sub: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,

    /// Opaque access token presented to the backend API.
    #[serde(default)]
    pub access_token: String,

    /// Absent means the session cannot be refreshed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,

    /// Access-token expiry, epoch milliseconds, skew pre-applied.
    #[serde(default)]
    pub expires_at: i64,

    #[serde(default)]
    pub roles: Vec<String>,

    /// Session token issue time, epoch seconds.
    #[serde(default)]
    pub iat: i64,

    /// Session token expiry, epoch seconds.
    #[serde(default)]
    pub exp: i64,

    /// Session token id.
    #[serde(default)]
    pub jti: String,
}

impl SessionClaims {
    /// Whether these claims belong to a completed sign-in.
    pub fn is_signed_in(&self) -> bool {
        !self.access_token.is_empty()
    }

    /// Whether the access token may still be used at `now_ms`.
    pub fn is_access_token_valid_at(&self, now_ms: i64) -> bool {
        now_ms < self.expires_at
    }

    /// The refresh token, if a usable one is present.
    pub fn refresh_token(&self) -> Option<&str> {
        self.refresh_token.as_deref().filter(|t| !t.is_empty())
    }

    /// Public view of the session, without any token material.
    pub fn user_view(&self) -> UserView {
        UserView {
            subject: self.sub.clone(),
            name: self.name.clone(),
            email: self.email.clone(),
            roles: self.roles.clone(),
            expires_at: self.expires_at,
        }
    }
}

/// What the gateway reveals about a session to the browser.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserView {
    pub subject: String,
    pub name: Option<String>,
    pub email: Option<String>,
    pub roles: Vec<String>,
    pub expires_at: i64,
}

/// Tokens obtained from the authorization-code exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountGrant {
    pub access_token: String,
    pub refresh_token: Option<String>,
    /// Provider-stated expiry, epoch seconds.
    pub expires_at: i64,
    pub id_token: Option<String>,
}

/// Identity claims read from the provider's id token.
///
/// Only the named fields are kept; anything else in the id token (avatars,
/// tenant metadata, ...) is dropped on deserialization.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct Profile {
    #[serde(default)]
    pub sub: String,
    /// Object id, preferred over `sub` when present.
    #[serde(default)]
    pub oid: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    /// Some tenants emit addresses as a list.
    #[serde(default)]
    pub emails: Vec<String>,
    #[serde(default)]
    pub preferred_username: Option<String>,
    #[serde(default)]
    pub roles: Vec<String>,
}

impl Profile {
    /// Stable subject identifier for the session.
    pub fn subject_id(&self) -> &str {
        self.oid
            .as_deref()
            .filter(|oid| !oid.is_empty())
            .unwrap_or(&self.sub)
    }

    /// Best available email address.
    pub fn email(&self) -> Option<String> {
        self.email
            .clone()
            .or_else(|| self.emails.first().cloned())
            .or_else(|| {
                self.preferred_username
                    .clone()
                    .filter(|name| name.contains('@'))
            })
    }
}

/// The first reconciliation after a completed authorization-code exchange.
#[derive(Debug, Clone)]
pub struct SignIn {
    pub grant: AccountGrant,
    pub profile: Profile,
}
