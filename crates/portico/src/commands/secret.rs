//! Secret commands - store or remove gateway secrets in the system keyring.

use std::io::BufRead;

use anyhow::Result;
use clap::{Args, ValueEnum};

use portico_config::Secret;

use super::Context;

/// Secret names accepted on the command line.
#[derive(ValueEnum, Debug, Clone, Copy)]
pub enum SecretName {
    /// OAuth client secret
    ClientSecret,
    /// Session signing key
    SessionSecret,
}

impl From<SecretName> for Secret {
    fn from(name: SecretName) -> Self {
        match name {
            SecretName::ClientSecret => Secret::ClientSecret,
            SecretName::SessionSecret => Secret::SessionSecret,
        }
    }
}

/// Arguments for the set-secret command.
#[derive(Args, Debug)]
pub struct SetSecretArgs {
    /// Which secret to store
    #[arg(value_enum)]
    pub secret: SecretName,
}

/// Arguments for the delete-secret command.
#[derive(Args, Debug)]
pub struct DeleteSecretArgs {
    /// Which secret to remove
    #[arg(value_enum)]
    pub secret: SecretName,
}

/// Run the set-secret command. The value is read from the first line of stdin.
pub async fn run_set(args: SetSecretArgs, ctx: &Context) -> Result<()> {
    let secret = Secret::from(args.secret);

    if !ctx.json_output {
        eprintln!("Enter {} (one line on stdin):", secret.name());
    }
    let mut value = String::new();
    std::io::stdin().lock().read_line(&mut value)?;
    let value = value.trim();
    if value.is_empty() {
        anyhow::bail!("no value provided for {}", secret.name());
    }

    portico_config::store_in_keyring(secret, value).map_err(|e| {
        anyhow::anyhow!(
            "failed to store {}: {} (set {} instead)",
            secret.name(),
            e,
            secret.env_var()
        )
    })?;

    tracing::info!(secret = secret.name(), "Stored secret in keyring");
    report(ctx, secret, "stored")
}

/// Run the delete-secret command.
pub async fn run_delete(args: DeleteSecretArgs, ctx: &Context) -> Result<()> {
    let secret = Secret::from(args.secret);

    portico_config::delete_from_keyring(secret)
        .map_err(|e| anyhow::anyhow!("failed to delete {}: {}", secret.name(), e))?;

    tracing::info!(secret = secret.name(), "Removed secret from keyring");
    report(ctx, secret, "deleted")
}

fn report(ctx: &Context, secret: Secret, action: &str) -> Result<()> {
    if ctx.json_output {
        let output = serde_json::json!({ "secret": secret.name(), "keyring": action });
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else {
        println!("{} {} in system keyring", secret.name(), action);
    }
    Ok(())
}
