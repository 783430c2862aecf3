//! CLI command handlers.

use std::path::PathBuf;

use anyhow::Result;
use portico_config::LoadedConfig;

pub mod check_config;
pub mod secret;
pub mod signin_url;
pub mod start;

/// Shared context for all commands.
#[derive(Debug, Clone)]
pub struct Context {
    /// Output as JSON for scripting.
    pub json_output: bool,
    /// Verbose output enabled.
    pub verbose: bool,
    /// User config directory override.
    pub config_dir: Option<PathBuf>,
}

impl Context {
    /// Discover and load configuration layers.
    pub fn load_config(&self) -> Result<LoadedConfig> {
        let loaded = portico_config::load_config_with_options(None, self.config_dir.as_deref())?;
        if self.verbose {
            for path in loaded.loaded_from() {
                eprintln!("config: {}", path.display());
            }
        }
        Ok(loaded)
    }
}
