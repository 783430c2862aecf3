//! OAuth 2.0 / OIDC authorization-code flow against the identity provider.

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use portico_config::PorticoConfig;

use crate::claims::{AccountGrant, Profile};
use crate::error::{OAuthError, RefreshError, Result};

/// Provider endpoints and client credentials.
#[derive(Clone)]
pub struct OAuthConfig {
    pub client_id: String,
    pub client_secret: String,
    pub authorize_url: String,
    pub token_url: String,
    pub redirect_uri: String,
    pub scope: String,
}

impl std::fmt::Debug for OAuthConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OAuthConfig")
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .field("authorize_url", &self.authorize_url)
            .field("token_url", &self.token_url)
            .field("redirect_uri", &self.redirect_uri)
            .field("scope", &self.scope)
            .finish()
    }
}

impl OAuthConfig {
    /// Build from the loaded configuration and a resolved client secret.
    pub fn from_config(config: &PorticoConfig, client_secret: String) -> Self {
        let provider = config.provider();
        let redirect_uri = provider
            .redirect_uri
            .clone()
            .unwrap_or_else(|| config.server().default_redirect_uri());

        Self {
            client_id: provider.client_id.clone().unwrap_or_default(),
            client_secret,
            authorize_url: provider.authorize_url(),
            token_url: provider.token_url(),
            redirect_uri,
            scope: provider.scope_string(),
        }
    }
}

/// PKCE code verifier and challenge pair.
#[derive(Debug, Clone)]
pub struct PkceChallenge {
    pub verifier: String,
    pub challenge: String,
}

impl PkceChallenge {
    /// Generate a new PKCE challenge pair.
    pub fn generate() -> Self {
        let mut verifier_bytes = [0u8; 32];
        rand::rng().fill_bytes(&mut verifier_bytes);
        let verifier = URL_SAFE_NO_PAD.encode(verifier_bytes);
        let challenge = Self::challenge_for(&verifier);

        Self {
            verifier,
            challenge,
        }
    }

    /// S256 challenge for a verifier.
    pub fn challenge_for(verifier: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(verifier.as_bytes());
        URL_SAFE_NO_PAD.encode(hasher.finalize())
    }
}

/// Generate a random state string for CSRF protection.
pub fn generate_state() -> String {
    let mut state_bytes = [0u8; 32];
    rand::rng().fill_bytes(&mut state_bytes);
    URL_SAFE_NO_PAD.encode(state_bytes)
}

/// Build the authorization URL for the sign-in redirect.
pub fn build_authorization_url(config: &OAuthConfig, challenge: &str, state: &str) -> String {
    let params = [
        ("client_id", config.client_id.as_str()),
        ("response_type", "code"),
        ("redirect_uri", &config.redirect_uri),
        ("response_mode", "query"),
        ("scope", &config.scope),
        ("state", state),
        ("code_challenge", challenge),
        ("code_challenge_method", "S256"),
    ];

    let query = params
        .iter()
        .map(|(k, v)| format!("{}={}", k, urlencoding::encode(v)))
        .collect::<Vec<_>>()
        .join("&");

    format!("{}?{}", config.authorize_url, query)
}

// ─────────────────────────────────────────────────────────────────────────────
// Token endpoint shapes
// ─────────────────────────────────────────────────────────────────────────────

/// Successful token endpoint response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenGrant {
    pub access_token: String,
    #[serde(default)]
    pub token_type: Option<String>,
    #[serde(default)]
    pub scope: Option<String>,
    /// Lifetime in seconds.
    #[serde(default)]
    pub expires_in: u64,
    #[serde(default)]
    pub ext_expires_in: Option<u64>,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub id_token: Option<String>,
}

impl TokenGrant {
    /// Access-token lifetime in seconds.
    ///
    /// A missing, zero or out-of-range `expires_in` makes the grant unusable.
    pub fn lifetime_secs(&self) -> std::result::Result<i64, RefreshError> {
        i64::try_from(self.expires_in)
            .ok()
            .filter(|secs| *secs > 0)
            .ok_or_else(|| {
                RefreshError::MalformedGrant(format!("invalid expires_in: {}", self.expires_in))
            })
    }
}

/// Error payload from the token endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenErrorBody {
    pub error: String,
    #[serde(default)]
    pub error_description: Option<String>,
    #[serde(default)]
    pub error_codes: Vec<i64>,
    #[serde(default)]
    pub error_uri: Option<String>,
}

/// Either shape the token endpoint may answer with.
///
/// The error shape is tried first: a body carrying `error` is a failure
/// whatever else it contains.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum TokenEndpointResponse {
    Error(TokenErrorBody),
    Grant(TokenGrant),
}

/// Interpret a token endpoint response.
///
/// The body shape is decided before the status: an error-shaped body is a
/// failure even under a 200.
pub fn parse_token_response(
    status: reqwest::StatusCode,
    body: &[u8],
) -> std::result::Result<TokenGrant, RefreshError> {
    match serde_json::from_slice::<TokenEndpointResponse>(body) {
        Ok(TokenEndpointResponse::Error(err)) => Err(RefreshError::Provider {
            code: err.error,
            description: err.error_description,
        }),
        Ok(TokenEndpointResponse::Grant(_)) | Err(_) if !status.is_success() => {
            Err(RefreshError::HttpStatus(status.as_u16()))
        }
        Ok(TokenEndpointResponse::Grant(grant)) => Ok(grant),
        Err(e) => Err(RefreshError::MalformedGrant(e.to_string())),
    }
}

#[derive(Debug, Serialize)]
struct TokenExchangeRequest<'a> {
    grant_type: &'a str,
    client_id: &'a str,
    client_secret: &'a str,
    code: &'a str,
    redirect_uri: &'a str,
    code_verifier: &'a str,
    scope: &'a str,
}

/// Exchange an authorization code for the account grant.
pub async fn exchange_code_for_tokens(
    client: &reqwest::Client,
    config: &OAuthConfig,
    code: &str,
    verifier: &str,
) -> Result<AccountGrant> {
    let request_body = TokenExchangeRequest {
        grant_type: "authorization_code",
        client_id: &config.client_id,
        client_secret: &config.client_secret,
        code,
        redirect_uri: &config.redirect_uri,
        code_verifier: verifier,
        scope: &config.scope,
    };

    let response = client
        .post(&config.token_url)
        .form(&request_body)
        .send()
        .await
        .map_err(|e| OAuthError::Network(format!("Token exchange request failed: {}", e)))?;

    let status = response.status();
    let body = response
        .bytes()
        .await
        .map_err(|e| OAuthError::Network(format!("Failed to read token response: {}", e)))?;

    let grant = parse_token_response(status, &body)
        .map_err(|e| OAuthError::Backend(format!("Token exchange failed: {}", e)))?;

    if grant.access_token.is_empty() {
        return Err(OAuthError::Backend(
            "Token exchange returned no access token".to_string(),
        ));
    }

    let lifetime = grant
        .lifetime_secs()
        .map_err(|e| OAuthError::Backend(format!("Token exchange failed: {}", e)))?;

    let now = chrono::Utc::now().timestamp();
    Ok(AccountGrant {
        access_token: grant.access_token,
        refresh_token: grant.refresh_token.filter(|t| !t.is_empty()),
        expires_at: now.saturating_add(lifetime),
        id_token: grant.id_token,
    })
}

/// Read the profile claims from an id token.
///
/// The token arrives directly from the token endpoint over TLS, so its
/// payload is read without verifying the signature.
pub fn profile_from_id_token(id_token: &str) -> Result<Profile> {
    let payload = id_token
        .split('.')
        .nth(1)
        .filter(|p| !p.is_empty())
        .ok_or_else(|| OAuthError::InvalidRequest("id token is not a JWT".to_string()))?;

    let bytes = URL_SAFE_NO_PAD
        .decode(payload.trim_end_matches('='))
        .map_err(|e| OAuthError::Serialization(format!("id token payload: {}", e)))?;

    let profile: Profile = serde_json::from_slice(&bytes)
        .map_err(|e| OAuthError::Serialization(format!("id token claims: {}", e)))?;

    if profile.subject_id().is_empty() {
        return Err(OAuthError::InvalidRequest(
            "id token carries no subject".to_string(),
        ));
    }

    Ok(profile)
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::StatusCode;

    fn test_config() -> OAuthConfig {
        OAuthConfig {
            client_id: "client-123".to_string(),
            client_secret: "secret".to_string(),
            authorize_url: "https://login.example.com/t/oauth2/v2.0/authorize".to_string(),
            token_url: "https://login.example.com/t/oauth2/v2.0/token".to_string(),
            redirect_uri: "http://localhost:3000/auth/callback".to_string(),
            scope: "openid profile email offline_access".to_string(),
        }
    }

    fn id_token(claims: serde_json::Value) -> String {
        let header = URL_SAFE_NO_PAD.encode(r#"{"alg":"RS256","typ":"JWT"}"#);
        let payload = URL_SAFE_NO_PAD.encode(claims.to_string());
        format!("{}.{}.sig", header, payload)
    }

    #[test]
    fn test_pkce_generation() {
        let pkce = PkceChallenge::generate();
        assert!(!pkce.verifier.is_empty());
        assert_ne!(pkce.verifier, pkce.challenge);
        assert_eq!(PkceChallenge::challenge_for(&pkce.verifier), pkce.challenge);
    }

    #[test]
    fn test_pkce_rfc7636_vector() {
        assert_eq!(
            PkceChallenge::challenge_for("dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk"),
            "E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM"
        );
    }

    #[test]
    fn test_state_generation() {
        let state1 = generate_state();
        let state2 = generate_state();
        assert!(!state1.is_empty());
        assert_ne!(state1, state2);
    }

    #[test]
    fn test_authorization_url() {
        let url = build_authorization_url(&test_config(), "test_challenge", "test_state");

        assert!(url.starts_with("https://login.example.com/t/oauth2/v2.0/authorize?"));
        assert!(url.contains("client_id=client-123"));
        assert!(url.contains("response_type=code"));
        assert!(url.contains("code_challenge=test_challenge"));
        assert!(url.contains("state=test_state"));
        assert!(url.contains("scope=openid%20profile%20email%20offline_access"));
        assert!(url.contains("redirect_uri=http%3A%2F%2Flocalhost%3A3000%2Fauth%2Fcallback"));
    }

    #[test]
    fn test_debug_redacts_secret() {
        let rendered = format!("{:?}", test_config());
        assert!(!rendered.contains("\"secret\""));
        assert!(rendered.contains("<redacted>"));
    }

    #[test]
    fn test_parse_success_grant() {
        let body = br#"{"token_type":"Bearer","scope":"openid","expires_in":3600,"ext_expires_in":3600,"access_token":"A","refresh_token":"R","id_token":"I"}"#;
        let grant = parse_token_response(StatusCode::OK, body).unwrap();
        assert_eq!(grant.access_token, "A");
        assert_eq!(grant.refresh_token.as_deref(), Some("R"));
        assert_eq!(grant.expires_in, 3600);
    }

    #[test]
    fn test_parse_error_body_with_ok_status() {
        let body = br#"{"error":"invalid_grant","error_description":"AADSTS70000: expired","error_codes":[70000],"error_uri":"https://login.example.com/error"}"#;
        let err = parse_token_response(StatusCode::OK, body).unwrap_err();
        assert_eq!(
            err,
            RefreshError::Provider {
                code: "invalid_grant".to_string(),
                description: Some("AADSTS70000: expired".to_string()),
            }
        );
    }

    #[test]
    fn test_parse_error_body_with_error_status() {
        let body = br#"{"error":"invalid_client"}"#;
        let err = parse_token_response(StatusCode::UNAUTHORIZED, body).unwrap_err();
        assert!(matches!(err, RefreshError::Provider { ref code, .. } if code == "invalid_client"));
    }

    #[test]
    fn test_parse_non_json_error_status() {
        let err = parse_token_response(StatusCode::BAD_GATEWAY, b"<html>oops</html>").unwrap_err();
        assert_eq!(err, RefreshError::HttpStatus(502));
    }

    #[test]
    fn test_parse_grant_shape_with_error_status() {
        let body = br#"{"access_token":"A","expires_in":10}"#;
        let err = parse_token_response(StatusCode::INTERNAL_SERVER_ERROR, body).unwrap_err();
        assert_eq!(err, RefreshError::HttpStatus(500));
    }

    #[test]
    fn test_grant_lifetime_must_be_positive_and_in_range() {
        let grant = parse_token_response(StatusCode::OK, br#"{"access_token":"A","expires_in":3600}"#)
            .unwrap();
        assert_eq!(grant.lifetime_secs().unwrap(), 3600);

        let missing = parse_token_response(StatusCode::OK, br#"{"access_token":"A"}"#).unwrap();
        assert!(matches!(missing.lifetime_secs(), Err(RefreshError::MalformedGrant(_))));

        let zero = TokenGrant { expires_in: 0, ..grant.clone() };
        assert!(matches!(zero.lifetime_secs(), Err(RefreshError::MalformedGrant(_))));

        let huge = TokenGrant { expires_in: u64::MAX, ..grant };
        assert!(matches!(huge.lifetime_secs(), Err(RefreshError::MalformedGrant(_))));
    }

    #[test]
    fn test_parse_garbage_with_ok_status() {
        let err = parse_token_response(StatusCode::OK, b"not json").unwrap_err();
        assert!(matches!(err, RefreshError::MalformedGrant(_)));
    }

    #[test]
    fn test_profile_from_id_token() {
        let token = id_token(serde_json::json!({
            "sub": "s-1",
            "oid": "o-1",
            "name": "Ada Lovelace",
            "preferred_username": "ada@example.com",
            "roles": ["admin", "user"],
            "picture": "https://example.com/ada.png"
        }));
        let profile = profile_from_id_token(&token).unwrap();
        assert_eq!(profile.subject_id(), "o-1");
        assert_eq!(profile.name.as_deref(), Some("Ada Lovelace"));
        assert_eq!(profile.email().as_deref(), Some("ada@example.com"));
        assert_eq!(profile.roles, vec!["admin", "user"]);
    }

    #[test]
    fn test_profile_from_malformed_id_token() {
        assert!(profile_from_id_token("no-dots").is_err());
        assert!(profile_from_id_token("a.!!!.c").is_err());
        let no_subject = id_token(serde_json::json!({"name": "nobody"}));
        assert!(profile_from_id_token(&no_subject).is_err());
    }
}
