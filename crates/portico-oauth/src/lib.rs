//! OIDC session gateway.
//!
//! Signs users in against an OAuth 2.0 / OIDC identity provider, keeps the
//! resulting tokens in a signed session cookie, refreshes them as they
//! expire, and forwards API calls upstream with the live access token.
//!
//! # Components
//!
//! - [`oauth`] — PKCE flow: challenge generation, authorization URL, code exchange
//! - [`refresh`] — Refresh-token grant against the token endpoint
//! - [`lifecycle`] — Per-request sign-in / revalidate / refresh decision
//! - [`session`] — Signed session cookie codec
//! - [`roles`] — Role membership checks
//! - [`forwarder`] — Authenticated upstream forwarding
//! - [`proxy`] — Axum gateway server

pub mod claims;
pub mod error;
pub mod forwarder;
pub mod lifecycle;
pub mod oauth;
pub mod proxy;
pub mod refresh;
pub mod roles;
pub mod session;
pub mod signin;

pub use claims::{AccountGrant, Profile, SessionClaims, SignIn, UserView};
pub use error::{OAuthError, ProxyError, RefreshError, Result};
pub use forwarder::Forwarder;
pub use lifecycle::{Reconciled, TokenLifecycle};
pub use oauth::{OAuthConfig, PkceChallenge, TokenGrant};
pub use proxy::{Gateway, GatewayConfig, GatewayState, SessionUser, require_role};
pub use refresh::{HttpRefreshClient, RefreshClient, SharedRefreshClient};
pub use roles::{RequiredRoles, is_in_role};
pub use session::SessionCodec;
