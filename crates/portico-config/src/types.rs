//! Configuration types mapping to the TOML schema.
//!
//! Top-level config:
//! ```toml
//! [provider]               # identity provider (tenant, client, scopes)
//! [proxy]                  # upstream API the gateway forwards to
//! [session]                # session cookie, max-age, clock skew
//! [server]                 # bind address, public URL, CORS
//! ```

use serde::{Deserialize, Serialize};

use crate::{ConfigError, Result};

/// Env var overriding `proxy.upstream_url`.
pub const API_SERVER_URL_ENV: &str = "API_SERVER_URL";

/// Env var overriding `provider.tenant_id`.
pub const TENANT_ID_ENV: &str = "PORTICO_TENANT_ID";

/// Env var overriding `provider.client_id`.
pub const CLIENT_ID_ENV: &str = "PORTICO_CLIENT_ID";

/// Default identity provider authority.
pub const DEFAULT_AUTHORITY: &str = "https://login.microsoftonline.com";

/// Scopes requested on sign-in and on every refresh.
pub const DEFAULT_SCOPES: &[&str] = &["openid", "profile", "email", "offline_access"];

/// Default session lifetime (30 days).
pub const DEFAULT_SESSION_MAX_AGE_SECS: u64 = 30 * 24 * 60 * 60;

/// Default clock-skew margin subtracted from provider expiries (10 minutes).
pub const DEFAULT_CLOCK_SKEW_SECS: u64 = 10 * 60;

// ─────────────────────────────────────────────────────────────────────────────
// Top-level Config
// ─────────────────────────────────────────────────────────────────────────────

/// Root configuration structure.
///
/// All sections are optional so that partial configs (e.g., project-local
/// overrides) can be loaded and merged.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PorticoConfig {
    /// Identity provider configuration.
    pub provider: Option<ProviderConfig>,

    /// Upstream API proxy configuration.
    pub proxy: Option<ProxyConfig>,

    /// Session cookie configuration.
    pub session: Option<SessionConfig>,

    /// HTTP server configuration.
    pub server: Option<ServerConfig>,
}

impl PorticoConfig {
    /// Create an empty config.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        Ok(toml::from_str(toml_str)?)
    }

    /// Merge another config on top of this one (other takes priority).
    pub fn merge(&mut self, other: PorticoConfig) {
        if other.provider.is_some() {
            self.provider = other.provider;
        }

        if other.proxy.is_some() {
            self.proxy = other.proxy;
        }

        if other.session.is_some() {
            self.session = other.session;
        }

        if other.server.is_some() {
            self.server = other.server;
        }
    }

    /// Apply environment overrides from the process environment.
    pub fn apply_env(&mut self) {
        self.apply_env_with(|key| std::env::var(key).ok());
    }

    /// Apply environment overrides using a custom lookup.
    ///
    /// Empty values are ignored.
    pub fn apply_env_with(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let get = |key: &str| lookup(key).filter(|v| !v.is_empty());

        if let Some(url) = get(API_SERVER_URL_ENV) {
            self.proxy.get_or_insert_with(ProxyConfig::default).upstream_url = Some(url);
        }
        if let Some(tenant) = get(TENANT_ID_ENV) {
            self.provider
                .get_or_insert_with(ProviderConfig::default)
                .tenant_id = Some(tenant);
        }
        if let Some(client_id) = get(CLIENT_ID_ENV) {
            self.provider
                .get_or_insert_with(ProviderConfig::default)
                .client_id = Some(client_id);
        }
    }

    /// Provider section, or defaults.
    pub fn provider(&self) -> ProviderConfig {
        self.provider.clone().unwrap_or_default()
    }

    /// Proxy section, or defaults.
    pub fn proxy(&self) -> ProxyConfig {
        self.proxy.clone().unwrap_or_default()
    }

    /// Session section, or defaults.
    pub fn session(&self) -> SessionConfig {
        self.session.clone().unwrap_or_default()
    }

    /// Server section, or defaults.
    pub fn server(&self) -> ServerConfig {
        self.server.clone().unwrap_or_default()
    }

    /// Check that every value the gateway needs at startup is present.
    ///
    /// Secrets are checked separately through [`crate::secrets`].
    pub fn validate(&self) -> Result<()> {
        let provider = self.provider();
        if provider.tenant_id.as_deref().is_none_or(str::is_empty) {
            return Err(missing("tenant_id", "[provider]"));
        }
        if provider.client_id.as_deref().is_none_or(str::is_empty) {
            return Err(missing("client_id", "[provider]"));
        }
        if provider.scopes.is_empty() {
            return Err(missing("scopes", "[provider]"));
        }
        parse_url("provider.authority", &provider.authority)?;

        let proxy = self.proxy();
        let upstream = proxy
            .upstream_url
            .as_deref()
            .ok_or_else(|| missing("upstream_url", "[proxy]"))?;
        parse_url("proxy.upstream_url", upstream)?;
        if !proxy.mount_path.starts_with('/') || proxy.mount_path.len() < 2 {
            return Err(ConfigError::InvalidField {
                field: "proxy.mount_path".to_string(),
                reason: "must start with '/' and name a path segment".to_string(),
            });
        }

        let session = self.session();
        if session.max_age_secs == 0 {
            return Err(ConfigError::InvalidField {
                field: "session.max_age_secs".to_string(),
                reason: "must be greater than zero".to_string(),
            });
        }

        parse_url("server.public_url", &self.server().public_url)?;
        Ok(())
    }
}

fn missing(field: &str, context: &str) -> ConfigError {
    ConfigError::MissingField {
        field: field.to_string(),
        context: context.to_string(),
    }
}

fn parse_url(field: &str, value: &str) -> Result<url::Url> {
    url::Url::parse(value).map_err(|e| ConfigError::InvalidField {
        field: field.to_string(),
        reason: e.to_string(),
    })
}

// ─────────────────────────────────────────────────────────────────────────────
// Provider
// ─────────────────────────────────────────────────────────────────────────────

/// Identity provider configuration (`[provider]`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    /// Base authority URL, e.g. `https://login.microsoftonline.com`.
    pub authority: String,
    /// Tenant (directory) id.
    pub tenant_id: Option<String>,
    /// OAuth client id.
    pub client_id: Option<String>,
    /// OAuth client secret. Prefer `PORTICO_CLIENT_SECRET`.
    pub client_secret: Option<String>,
    /// Requested scopes.
    pub scopes: Vec<String>,
    /// Redirect URI registered with the provider.
    /// Defaults to `<server.public_url>/auth/callback`.
    pub redirect_uri: Option<String>,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            authority: DEFAULT_AUTHORITY.to_string(),
            tenant_id: None,
            client_id: None,
            client_secret: None,
            scopes: DEFAULT_SCOPES.iter().map(|s| s.to_string()).collect(),
            redirect_uri: None,
        }
    }
}

impl ProviderConfig {
    /// Base URL of the tenant's v2.0 OAuth endpoints.
    fn endpoint_base(&self) -> String {
        format!(
            "{}/{}/oauth2/v2.0",
            self.authority.trim_end_matches('/'),
            self.tenant_id.as_deref().unwrap_or_default()
        )
    }

    /// Token endpoint URL.
    pub fn token_url(&self) -> String {
        format!("{}/token", self.endpoint_base())
    }

    /// Authorization endpoint URL.
    pub fn authorize_url(&self) -> String {
        format!("{}/authorize", self.endpoint_base())
    }

    /// Scopes joined for the `scope` parameter.
    pub fn scope_string(&self) -> String {
        self.scopes.join(" ")
    }

    /// Whether the client secret is stored in plaintext in the config file.
    pub fn has_plaintext_secret(&self) -> bool {
        self.client_secret.as_deref().is_some_and(|s| !s.is_empty())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Proxy
// ─────────────────────────────────────────────────────────────────────────────

/// Upstream proxy configuration (`[proxy]`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProxyConfig {
    /// Upstream API base URL (`API_SERVER_URL`).
    pub upstream_url: Option<String>,
    /// Path prefix under which requests are proxied.
    pub mount_path: String,
    /// Reject requests without a session instead of forwarding them anonymously.
    pub require_session: bool,
    /// Roles of which the signed-in user must hold at least one.
    pub required_roles: Vec<String>,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            upstream_url: None,
            mount_path: "/api".to_string(),
            require_session: false,
            required_roles: Vec::new(),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Session
// ─────────────────────────────────────────────────────────────────────────────

/// Session cookie configuration (`[session]`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// HMAC secret used to sign session tokens. Prefer `PORTICO_SESSION_SECRET`.
    pub secret: Option<String>,
    /// Session cookie name.
    pub cookie_name: String,
    /// Session lifetime in seconds.
    pub max_age_secs: u64,
    /// Margin subtracted from provider-stated access-token expiry.
    pub clock_skew_secs: u64,
    /// Also apply the clock-skew margin to refreshed tokens.
    pub uniform_clock_skew: bool,
    /// Mark cookies `Secure`.
    pub secure_cookies: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            secret: None,
            cookie_name: "portico.session".to_string(),
            max_age_secs: DEFAULT_SESSION_MAX_AGE_SECS,
            clock_skew_secs: DEFAULT_CLOCK_SKEW_SECS,
            uniform_clock_skew: false,
            secure_cookies: true,
        }
    }
}

impl SessionConfig {
    /// Clock-skew margin in milliseconds.
    pub fn clock_skew_ms(&self) -> i64 {
        (self.clock_skew_secs as i64).saturating_mul(1000)
    }

    /// Whether the session secret is stored in plaintext in the config file.
    pub fn has_plaintext_secret(&self) -> bool {
        self.secret.as_deref().is_some_and(|s| !s.is_empty())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Server
// ─────────────────────────────────────────────────────────────────────────────

/// HTTP server configuration (`[server]`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address to bind to.
    pub bind: String,
    /// Externally visible base URL, used for the default redirect URI.
    pub public_url: String,
    /// CORS allowed origins (empty = no CORS).
    pub cors_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:3000".to_string(),
            public_url: "http://localhost:3000".to_string(),
            cors_origins: Vec::new(),
        }
    }
}

impl ServerConfig {
    /// Redirect URI derived from the public URL.
    pub fn default_redirect_uri(&self) -> String {
        format!("{}/auth/callback", self.public_url.trim_end_matches('/'))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_config() -> PorticoConfig {
        PorticoConfig::from_toml(
            r#"
[provider]
tenant_id = "contoso"
client_id = "client-123"

[proxy]
upstream_url = "http://localhost:8081"
"#,
        )
        .unwrap()
    }

    #[test]
    fn test_empty_config_parses() {
        let config = PorticoConfig::from_toml("").unwrap();
        assert!(config.provider.is_none());
        assert_eq!(config.session().cookie_name, "portico.session");
        assert_eq!(config.proxy().mount_path, "/api");
        assert!(config.proxy().required_roles.is_empty());
    }

    #[test]
    fn test_required_roles_parse() {
        let config = PorticoConfig::from_toml(
            r#"
[proxy]
required_roles = ["admin", "manager"]
"#,
        )
        .unwrap();
        assert_eq!(config.proxy().required_roles, vec!["admin", "manager"]);
    }

    #[test]
    fn test_section_defaults_fill_missing_fields() {
        let config = valid_config();
        let provider = config.provider();
        assert_eq!(provider.authority, DEFAULT_AUTHORITY);
        assert_eq!(
            provider.scope_string(),
            "openid profile email offline_access"
        );
        assert_eq!(config.session().clock_skew_ms(), 600_000);
    }

    #[test]
    fn test_provider_endpoints() {
        let provider = valid_config().provider();
        assert_eq!(
            provider.token_url(),
            "https://login.microsoftonline.com/contoso/oauth2/v2.0/token"
        );
        assert_eq!(
            provider.authorize_url(),
            "https://login.microsoftonline.com/contoso/oauth2/v2.0/authorize"
        );
    }

    #[test]
    fn test_authority_trailing_slash_trimmed() {
        let provider = ProviderConfig {
            authority: "https://idp.example.com/".to_string(),
            tenant_id: Some("t".to_string()),
            ..Default::default()
        };
        assert_eq!(
            provider.token_url(),
            "https://idp.example.com/t/oauth2/v2.0/token"
        );
    }

    #[test]
    fn test_merge_overrides_sections() {
        let mut base = valid_config();
        let overlay = PorticoConfig::from_toml(
            r#"
[proxy]
upstream_url = "http://api.internal"
mount_path = "/backend"
"#,
        )
        .unwrap();
        base.merge(overlay);

        assert_eq!(
            base.proxy().upstream_url.as_deref(),
            Some("http://api.internal")
        );
        assert_eq!(base.proxy().mount_path, "/backend");
        // untouched section preserved
        assert_eq!(base.provider().client_id.as_deref(), Some("client-123"));
    }

    #[test]
    fn test_env_overrides() {
        let mut config = PorticoConfig::new();
        config.apply_env_with(|key| match key {
            API_SERVER_URL_ENV => Some("http://from-env:9000".to_string()),
            TENANT_ID_ENV => Some("env-tenant".to_string()),
            CLIENT_ID_ENV => Some(String::new()),
            _ => None,
        });

        assert_eq!(
            config.proxy().upstream_url.as_deref(),
            Some("http://from-env:9000")
        );
        assert_eq!(config.provider().tenant_id.as_deref(), Some("env-tenant"));
        // empty env values are ignored
        assert!(config.provider().client_id.is_none());
    }

    #[test]
    fn test_validate_accepts_complete_config() {
        valid_config().validate().unwrap();
    }

    #[test]
    fn test_validate_missing_tenant() {
        let config = PorticoConfig::from_toml(
            r#"
[provider]
client_id = "c"

[proxy]
upstream_url = "http://localhost:8081"
"#,
        )
        .unwrap();
        let err = config.validate().unwrap_err();
        assert!(matches!(err, ConfigError::MissingField { ref field, .. } if field == "tenant_id"));
    }

    #[test]
    fn test_validate_missing_upstream() {
        let mut config = valid_config();
        config.proxy = None;
        let err = config.validate().unwrap_err();
        assert!(
            matches!(err, ConfigError::MissingField { ref field, .. } if field == "upstream_url")
        );
    }

    #[test]
    fn test_validate_rejects_bad_upstream_url() {
        let mut config = valid_config();
        config.proxy = Some(ProxyConfig {
            upstream_url: Some("not a url".to_string()),
            ..Default::default()
        });
        let err = config.validate().unwrap_err();
        assert!(matches!(err, ConfigError::InvalidField { .. }));
    }

    #[test]
    fn test_validate_rejects_root_mount_path() {
        let mut config = valid_config();
        config.proxy = Some(ProxyConfig {
            upstream_url: Some("http://localhost:8081".to_string()),
            mount_path: "/".to_string(),
            ..Default::default()
        });
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_default_redirect_uri() {
        let server = ServerConfig {
            public_url: "https://app.example.com/".to_string(),
            ..Default::default()
        };
        assert_eq!(
            server.default_redirect_uri(),
            "https://app.example.com/auth/callback"
        );
    }
}
