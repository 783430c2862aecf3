//! Signin-url command - print an authorization URL for diagnostics.

use anyhow::Result;
use clap::Args;

use portico_oauth::oauth::{self, OAuthConfig, PkceChallenge};

use super::Context;

/// Arguments for the signin-url command.
#[derive(Args, Debug)]
pub struct SigninUrlArgs {
    /// Also print the PKCE verifier and state
    #[arg(long)]
    pub show_pkce: bool,
}

/// Run the signin-url command.
pub async fn run(args: SigninUrlArgs, ctx: &Context) -> Result<()> {
    let loaded = ctx.load_config()?;
    let provider = loaded.config.provider();

    if provider.tenant_id.as_deref().is_none_or(str::is_empty) {
        anyhow::bail!("provider.tenant_id is not set (set PORTICO_TENANT_ID)");
    }
    if provider.client_id.as_deref().is_none_or(str::is_empty) {
        anyhow::bail!("provider.client_id is not set (set PORTICO_CLIENT_ID)");
    }

    // The authorization request carries no client secret.
    let config = OAuthConfig::from_config(&loaded.config, String::new());
    let pkce = PkceChallenge::generate();
    let state = oauth::generate_state();
    let url = oauth::build_authorization_url(&config, &pkce.challenge, &state);

    if ctx.json_output {
        let mut output = serde_json::json!({
            "url": url,
            "redirect_uri": config.redirect_uri,
        });
        if args.show_pkce {
            output["state"] = serde_json::json!(state);
            output["code_verifier"] = serde_json::json!(pkce.verifier);
        }
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else {
        println!("{}", url);
        if args.show_pkce {
            println!();
            println!("state:         {}", state);
            println!("code_verifier: {}", pkce.verifier);
        }
    }

    Ok(())
}
