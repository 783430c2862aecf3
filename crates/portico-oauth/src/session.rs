//! Session token codec and cookie helpers.
//!
//! Claims travel to the browser as an HS256-signed JWT in an http-only
//! cookie. Anything that fails verification decodes as no session.
//!
//! Provider tokens make the JWT larger than a browser will store in one
//! cookie, so long tokens are split across `<name>.0`, `<name>.1`, ...
//! and joined again on read.

use std::sync::Arc;

use axum_extra::extract::CookieJar;
use axum_extra::extract::cookie::{Cookie, SameSite};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};

use portico_config::SessionConfig;

use crate::claims::SessionClaims;
use crate::error::{OAuthError, Result};

/// Recommended minimum secret length in bytes.
const MIN_SECRET_LEN: usize = 32;

/// Largest cookie value written before the token is chunked. Leaves room
/// for the name and attributes under the 4096-byte browser limit.
const MAX_COOKIE_VALUE: usize = 3900;

/// Signs and verifies session tokens.
#[derive(Clone)]
pub struct SessionCodec {
    encoding_key: Arc<EncodingKey>,
    decoding_key: Arc<DecodingKey>,
    validation: Arc<Validation>,
    cookie_name: String,
    max_age_secs: i64,
    secure: bool,
}

impl std::fmt::Debug for SessionCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionCodec")
            .field("cookie_name", &self.cookie_name)
            .field("max_age_secs", &self.max_age_secs)
            .field("secure", &self.secure)
            .finish_non_exhaustive()
    }
}

impl SessionCodec {
    /// Create a codec from the signing secret and session settings.
    pub fn new(secret: &[u8], config: &SessionConfig) -> Result<Self> {
        if secret.is_empty() {
            return Err(OAuthError::Session(
                "session secret is not configured".to_string(),
            ));
        }
        if secret.len() < MIN_SECRET_LEN {
            tracing::warn!(
                "Session secret is shorter than recommended ({} bytes)",
                MIN_SECRET_LEN
            );
        }

        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;

        Ok(Self {
            encoding_key: Arc::new(EncodingKey::from_secret(secret)),
            decoding_key: Arc::new(DecodingKey::from_secret(secret)),
            validation: Arc::new(validation),
            cookie_name: config.cookie_name.clone(),
            max_age_secs: i64::try_from(config.max_age_secs).unwrap_or(i64::MAX),
            secure: config.secure_cookies,
        })
    }

    pub fn cookie_name(&self) -> &str {
        &self.cookie_name
    }

    /// Sign claims into a session token.
    ///
    /// `iat`, `exp` and `jti` are re-stamped on every call.
    pub fn encode(&self, claims: &SessionClaims) -> Result<String> {
        let now = chrono::Utc::now().timestamp();
        let stamped = SessionClaims {
            iat: now,
            exp: now.saturating_add(self.max_age_secs),
            jti: uuid::Uuid::new_v4().to_string(),
            ..claims.clone()
        };

        encode(&Header::new(Algorithm::HS256), &stamped, &self.encoding_key)
            .map_err(|e| OAuthError::Session(format!("Failed to sign session: {}", e)))
    }

    /// Verify a session token. Invalid or expired tokens yield `None`.
    pub fn decode(&self, token: &str) -> Option<SessionClaims> {
        match decode::<SessionClaims>(token, &self.decoding_key, &self.validation) {
            Ok(data) => Some(data.claims),
            Err(e) => {
                tracing::debug!(error = %e, "Discarding session token");
                None
            }
        }
    }

    /// Read and verify the session from a jar, joining chunks if needed.
    pub fn from_jar(&self, jar: &CookieJar) -> Option<SessionClaims> {
        if let Some(cookie) = jar
            .get(&self.cookie_name)
            .filter(|c| !c.value().is_empty())
        {
            return self.decode(cookie.value());
        }

        let token: String = (0..)
            .map_while(|i| jar.get(&self.chunk_name(i)).map(|c| c.value().to_string()))
            .collect();
        if token.is_empty() {
            return None;
        }
        self.decode(&token)
    }

    /// Write a session token into the jar.
    ///
    /// Chunks left over from a previous, longer token are cleared.
    pub fn store(&self, jar: CookieJar, token: &str) -> CookieJar {
        let cookies: Vec<Cookie<'static>> = if token.len() <= MAX_COOKIE_VALUE {
            vec![self.cookie(self.cookie_name.clone(), token.to_string())]
        } else {
            let chunks: Vec<_> = token
                .as_bytes()
                .chunks(MAX_COOKIE_VALUE)
                .enumerate()
                .map(|(i, chunk)| {
                    self.cookie(self.chunk_name(i), String::from_utf8_lossy(chunk).into_owned())
                })
                .collect();
            tracing::debug!(
                bytes = token.len(),
                chunks = chunks.len(),
                "Session split across cookies"
            );
            chunks
        };

        let stale: Vec<String> = self
            .session_cookie_names(&jar)
            .into_iter()
            .filter(|name| !cookies.iter().any(|c| c.name() == name))
            .collect();
        let jar = stale
            .into_iter()
            .fold(jar, |jar, name| jar.add(self.removal(name)));
        cookies.into_iter().fold(jar, |jar, cookie| jar.add(cookie))
    }

    /// Clear the session cookie and any chunks present in the jar.
    pub fn clear(&self, jar: CookieJar) -> CookieJar {
        let mut names = self.session_cookie_names(&jar);
        if !names.contains(&self.cookie_name) {
            names.push(self.cookie_name.clone());
        }
        names
            .into_iter()
            .fold(jar, |jar, name| jar.add(self.removal(name)))
    }

    fn chunk_name(&self, index: usize) -> String {
        format!("{}.{}", self.cookie_name, index)
    }

    /// Names of the session cookie and its chunks present in `jar`.
    fn session_cookie_names(&self, jar: &CookieJar) -> Vec<String> {
        jar.iter()
            .map(|c| c.name())
            .filter(|name| {
                *name == self.cookie_name
                    || name
                        .strip_prefix(self.cookie_name.as_str())
                        .and_then(|rest| rest.strip_prefix('.'))
                        .is_some_and(|index| index.parse::<usize>().is_ok())
            })
            .map(str::to_string)
            .collect()
    }

    fn cookie(&self, name: String, value: String) -> Cookie<'static> {
        Cookie::build((name, value))
            .http_only(true)
            .secure(self.secure)
            .same_site(SameSite::Lax)
            .path("/")
            .max_age(time::Duration::seconds(self.max_age_secs))
            .build()
    }

    fn removal(&self, name: String) -> Cookie<'static> {
        Cookie::build((name, ""))
            .http_only(true)
            .secure(self.secure)
            .same_site(SameSite::Lax)
            .path("/")
            .max_age(time::Duration::ZERO)
            .build()
    }
}
