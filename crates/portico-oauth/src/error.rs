//! Error types for the session gateway.

/// Result type alias for this crate.
pub type Result<T> = std::result::Result<T, OAuthError>;

/// Errors that can occur in the sign-in flow and gateway setup.
#[derive(Debug, thiserror::Error)]
pub enum OAuthError {
    /// Network/HTTP error.
    #[error("Network error: {0}")]
    Network(String),

    /// The identity provider rejected the request.
    #[error("Provider error: {0}")]
    Backend(String),

    /// Invalid request.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// The callback `state` did not match the one issued at sign-in.
    #[error("Sign-in state mismatch")]
    StateMismatch,

    /// Configuration error.
    #[error("Config error: {0}")]
    Config(String),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Session token could not be issued.
    #[error("Session error: {0}")]
    Session(String),

    /// The route needs a signed-in user.
    #[error("Sign-in required")]
    SignInRequired,

    /// The signed-in user lacks a required role.
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// The token lifecycle rejected the session.
    #[error(transparent)]
    Refresh(#[from] RefreshError),
}

impl From<reqwest::Error> for OAuthError {
    fn from(e: reqwest::Error) -> Self {
        OAuthError::Network(e.to_string())
    }
}

impl From<portico_config::ConfigError> for OAuthError {
    fn from(e: portico_config::ConfigError) -> Self {
        OAuthError::Config(e.to_string())
    }
}

/// Why a session's access token could not be renewed.
///
/// Every variant is fatal to the session: the caller discards it and asks
/// the user to sign in again. Nothing here is retried.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RefreshError {
    /// The session carries no refresh token.
    #[error("session has no refresh token")]
    NoRefreshToken,

    /// The provider answered with an error payload.
    #[error("provider rejected refresh: {}", provider_message(.code, .description))]
    Provider {
        code: String,
        description: Option<String>,
    },

    /// Non-success status without an error payload.
    #[error("token endpoint returned HTTP {0}")]
    HttpStatus(u16),

    /// The token endpoint could not be reached.
    #[error("token endpoint unreachable: {0}")]
    Network(String),

    /// A success-shaped response that cannot back a session.
    #[error("malformed token grant: {0}")]
    MalformedGrant(String),
}

fn provider_message(code: &str, description: &Option<String>) -> String {
    match description {
        Some(d) if !d.is_empty() => format!("{code} ({d})"),
        _ => code.to_string(),
    }
}

/// Errors raised while forwarding a request upstream.
#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    /// Upstream unreachable, reset, or failed mid-exchange.
    #[error("upstream connection failed: {0}")]
    Connection(String),

    /// The request could not be mapped onto the upstream URL.
    #[error("invalid upstream target: {0}")]
    InvalidUpstream(String),
}

impl From<reqwest::Error> for ProxyError {
    fn from(e: reqwest::Error) -> Self {
        ProxyError::Connection(e.to_string())
    }
}
