//! Secret resolution for the client secret and the session signing key.
//!
//! Resolution order:
//! 1. System keyring (if `keyring` feature enabled)
//! 2. Environment variable
//! 3. Config file (with warning)
//!
//! Keyring entries are stored as service="portico", user="<secret name>".

use crate::{ConfigError, Result};

/// Keyring service name.
#[cfg_attr(not(feature = "keyring"), allow(dead_code))]
const SERVICE_NAME: &str = "portico";

/// Secrets the gateway needs at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Secret {
    /// OAuth client secret presented to the token endpoint.
    ClientSecret,
    /// HMAC key signing session tokens.
    SessionSecret,
}

impl Secret {
    /// Environment variable holding this secret.
    pub fn env_var(&self) -> &'static str {
        match self {
            Secret::ClientSecret => "PORTICO_CLIENT_SECRET",
            Secret::SessionSecret => "PORTICO_SESSION_SECRET",
        }
    }

    /// Stable name used for keyring entries and error messages.
    pub fn name(&self) -> &'static str {
        match self {
            Secret::ClientSecret => "client_secret",
            Secret::SessionSecret => "session_secret",
        }
    }
}

/// Result of secret resolution with provenance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedSecret {
    /// The secret value.
    pub value: String,
    /// Where the secret was found.
    pub source: SecretSource,
}

/// Where a secret was resolved from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SecretSource {
    /// OS keyring.
    Keyring,
    /// Environment variable.
    EnvVar(String),
    /// Config file (plaintext, not recommended).
    ConfigFile,
}

impl std::fmt::Display for SecretSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SecretSource::Keyring => write!(f, "system keyring"),
            SecretSource::EnvVar(var) => write!(f, "env var {}", var),
            SecretSource::ConfigFile => write!(f, "config file (plaintext)"),
        }
    }
}

/// Resolve a secret using the full resolution chain.
pub fn resolve_secret(secret: Secret, config_value: Option<&str>) -> Option<ResolvedSecret> {
    resolve_secret_with(secret, config_value, |key| std::env::var(key).ok())
}

/// Resolve a secret with a custom environment lookup.
pub fn resolve_secret_with(
    secret: Secret,
    config_value: Option<&str>,
    env: impl Fn(&str) -> Option<String>,
) -> Option<ResolvedSecret> {
    // 1. Keyring
    if let Some(resolved) = get_from_keyring(secret) {
        return Some(resolved);
    }

    // 2. Environment variable
    let env_var = secret.env_var();
    if let Some(value) = env(env_var).filter(|v| !v.is_empty()) {
        return Some(ResolvedSecret {
            value,
            source: SecretSource::EnvVar(env_var.to_string()),
        });
    }

    // 3. Config file
    config_value
        .filter(|v| !v.is_empty())
        .map(|v| ResolvedSecret {
            value: v.to_string(),
            source: SecretSource::ConfigFile,
        })
}

/// Resolve a secret, failing with [`ConfigError::SecretNotFound`] when absent.
pub fn require_secret(secret: Secret, config_value: Option<&str>) -> Result<ResolvedSecret> {
    resolve_secret(secret, config_value).ok_or_else(|| ConfigError::SecretNotFound {
        name: secret.name().to_string(),
        env_var: secret.env_var().to_string(),
    })
}

/// Store a secret in the system keyring.
///
/// Returns an error message if the keyring is not available.
pub fn store_in_keyring(secret: Secret, value: &str) -> std::result::Result<(), String> {
    if value.is_empty() {
        return Err(format!("refusing to store an empty {}", secret.name()));
    }
    store_keyring_entry(secret, value)
}

/// Delete a secret from the system keyring.
pub fn delete_from_keyring(secret: Secret) -> std::result::Result<(), String> {
    delete_keyring_entry(secret)
}

// ─────────────────────────────────────────────────────────────────────────────
// Keyring implementation (feature-gated)
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(feature = "keyring")]
fn get_from_keyring(secret: Secret) -> Option<ResolvedSecret> {
    // Keep tests isolated from local machine state.
    if cfg!(test) {
        return None;
    }

    let entry = keyring::Entry::new(SERVICE_NAME, secret.name()).ok()?;
    let value = entry.get_password().ok()?;
    if value.is_empty() {
        return None;
    }
    Some(ResolvedSecret {
        value,
        source: SecretSource::Keyring,
    })
}

#[cfg(feature = "keyring")]
fn store_keyring_entry(secret: Secret, value: &str) -> std::result::Result<(), String> {
    if cfg!(test) {
        return Err("keyring access disabled in tests".to_string());
    }
    let entry = keyring::Entry::new(SERVICE_NAME, secret.name())
        .map_err(|e| format!("keyring error: {}", e))?;
    entry
        .set_password(value)
        .map_err(|e| format!("failed to store in keyring: {}", e))
}

#[cfg(feature = "keyring")]
fn delete_keyring_entry(secret: Secret) -> std::result::Result<(), String> {
    if cfg!(test) {
        return Err("keyring access disabled in tests".to_string());
    }
    let entry = keyring::Entry::new(SERVICE_NAME, secret.name())
        .map_err(|e| format!("keyring error: {}", e))?;
    entry
        .delete_credential()
        .map_err(|e| format!("failed to delete from keyring: {}", e))
}

// ─────────────────────────────────────────────────────────────────────────────
// Stubs when keyring feature is disabled
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(not(feature = "keyring"))]
const KEYRING_DISABLED: &str = "keyring support not compiled in (enable the 'keyring' feature)";

#[cfg(not(feature = "keyring"))]
fn get_from_keyring(_secret: Secret) -> Option<ResolvedSecret> {
    None
}

#[cfg(not(feature = "keyring"))]
fn store_keyring_entry(_secret: Secret, _value: &str) -> std::result::Result<(), String> {
    Err(KEYRING_DISABLED.to_string())
}

#[cfg(not(feature = "keyring"))]
fn delete_keyring_entry(_secret: Secret) -> std::result::Result<(), String> {
    Err(KEYRING_DISABLED.to_string())
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_var_wins_over_config() {
        let resolved = resolve_secret_with(Secret::ClientSecret, Some("from-file"), |key| {
            (key == "PORTICO_CLIENT_SECRET").then(|| "from-env".to_string())
        })
        .unwrap();
        assert_eq!(resolved.value, "from-env");
        assert_eq!(
            resolved.source,
            SecretSource::EnvVar("PORTICO_CLIENT_SECRET".to_string())
        );
    }

    #[test]
    fn test_config_fallback() {
        let resolved =
            resolve_secret_with(Secret::SessionSecret, Some("file-secret"), |_| None).unwrap();
        assert_eq!(resolved.value, "file-secret");
        assert_eq!(resolved.source, SecretSource::ConfigFile);
    }

    #[test]
    fn test_empty_values_are_not_secrets() {
        let resolved =
            resolve_secret_with(Secret::SessionSecret, Some(""), |_| Some(String::new()));
        assert!(resolved.is_none());
    }

    #[test]
    fn test_secret_source_display() {
        assert_eq!(SecretSource::Keyring.to_string(), "system keyring");
        assert_eq!(
            SecretSource::EnvVar("PORTICO_SESSION_SECRET".to_string()).to_string(),
            "env var PORTICO_SESSION_SECRET"
        );
        assert_eq!(
            SecretSource::ConfigFile.to_string(),
            "config file (plaintext)"
        );
    }

    #[test]
    fn test_secret_names() {
        assert_eq!(Secret::ClientSecret.name(), "client_secret");
        assert_eq!(Secret::SessionSecret.env_var(), "PORTICO_SESSION_SECRET");
    }

    #[test]
    fn test_store_rejects_empty_value() {
        let err = store_in_keyring(Secret::SessionSecret, "").unwrap_err();
        assert!(err.contains("session_secret"));
    }

    #[test]
    fn test_keyring_writes_unavailable_in_tests() {
        assert!(store_in_keyring(Secret::ClientSecret, "value").is_err());
        assert!(delete_from_keyring(Secret::ClientSecret).is_err());
    }
}
