//! Configuration system for the Portico gateway.
//!
//! Provides TOML-based configuration with:
//! - `[provider]`, `[proxy]`, `[session]` and `[server]` sections with defaults
//! - Config file layering (XDG user config + project-local overrides)
//! - Environment overrides (`API_SERVER_URL`, `PORTICO_TENANT_ID`, ...)
//! - Secret resolution (keyring → env var → config file)

pub mod discovery;
pub mod error;
pub mod secrets;
pub mod types;

pub use discovery::{
    LoadedConfig, load_config_file, load_config_with_options, xdg_config_dir, xdg_config_path,
};
pub use error::{ConfigError, Result};
pub use secrets::{
    ResolvedSecret, Secret, SecretSource, delete_from_keyring, require_secret, resolve_secret,
    store_in_keyring,
};
pub use types::*;
