//! Check-config command - load, validate and summarize configuration.

use anyhow::Result;
use clap::Args;

use portico_config::{ResolvedSecret, Secret, resolve_secret};

use super::Context;

/// Arguments for the check-config command.
#[derive(Args, Debug)]
pub struct CheckConfigArgs {}

/// Run the check-config command.
///
/// Exits with an error when validation fails or a secret is missing.
pub async fn run(_args: CheckConfigArgs, ctx: &Context) -> Result<()> {
    let loaded = ctx.load_config()?;
    let config = &loaded.config;

    let validation = config.validate();
    let client_secret = resolve_secret(
        Secret::ClientSecret,
        config.provider().client_secret.as_deref(),
    );
    let session_secret = resolve_secret(Secret::SessionSecret, config.session().secret.as_deref());

    let mut problems = Vec::new();
    if let Err(e) = &validation {
        problems.push(e.to_string());
    }
    for (secret, resolved) in [
        (Secret::ClientSecret, &client_secret),
        (Secret::SessionSecret, &session_secret),
    ] {
        if resolved.is_none() {
            problems.push(format!(
                "{} not found (set {})",
                secret.name(),
                secret.env_var()
            ));
        }
    }

    let proxy = config.proxy();
    let provider = config.provider();

    if ctx.json_output {
        let sources: Vec<_> = loaded
            .sources
            .iter()
            .map(|s| serde_json::json!({ "path": s.path.display().to_string(), "loaded": s.loaded }))
            .collect();
        let output = serde_json::json!({
            "valid": problems.is_empty(),
            "problems": problems,
            "warnings": loaded.warnings,
            "sources": sources,
            "token_url": provider.token_url(),
            "upstream_url": proxy.upstream_url,
            "mount_path": proxy.mount_path,
            "secrets": {
                "client_secret": source_label(&client_secret),
                "session_secret": source_label(&session_secret),
            },
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else {
        println!("Configuration");
        println!("-------------");
        let loaded_from = loaded.loaded_from();
        if loaded_from.is_empty() {
            println!("No config files loaded (using defaults and environment)");
        }
        for path in loaded_from {
            println!("  loaded: {}", path.display());
        }
        println!();
        println!("  token endpoint: {}", provider.token_url());
        println!(
            "  upstream:       {}",
            proxy.upstream_url.as_deref().unwrap_or("(not set)")
        );
        println!("  mount path:     {}", proxy.mount_path);
        println!(
            "  client secret:  {}",
            source_label(&client_secret).unwrap_or_else(|| "(missing)".to_string())
        );
        println!(
            "  session secret: {}",
            source_label(&session_secret).unwrap_or_else(|| "(missing)".to_string())
        );

        for warning in &loaded.warnings {
            println!("warning: {}", warning);
        }
        for problem in &problems {
            println!("error: {}", problem);
        }
        if problems.is_empty() {
            println!();
            println!("Configuration OK");
        }
    }

    if !problems.is_empty() {
        anyhow::bail!("configuration has {} problem(s)", problems.len());
    }
    Ok(())
}

fn source_label(secret: &Option<ResolvedSecret>) -> Option<String> {
    secret.as_ref().map(|s| s.source.to_string())
}
