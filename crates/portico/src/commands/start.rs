//! Start command - runs the session gateway.

use anyhow::{Context as _, Result};
use clap::Args;

use portico_oauth::Gateway;

use super::Context;

/// Arguments for the start command.
///
/// CLI arguments override config file values.
#[derive(Args, Debug)]
pub struct StartArgs {
    /// Address to bind to (overrides config)
    #[arg(short, long)]
    pub bind: Option<String>,

    /// Upstream API base URL (overrides config and API_SERVER_URL)
    #[arg(long)]
    pub upstream: Option<String>,

    /// Reject proxied requests without a session
    #[arg(long)]
    pub require_session: bool,
}

/// Run the start command.
pub async fn run(args: StartArgs, ctx: &Context) -> Result<()> {
    let loaded = ctx.load_config()?;
    for warning in &loaded.warnings {
        eprintln!("warning: {}", warning);
    }

    let mut config = loaded.config;
    if let Some(bind) = args.bind {
        let mut server = config.server();
        server.bind = bind;
        config.server = Some(server);
    }
    if args.upstream.is_some() || args.require_session {
        let mut proxy = config.proxy();
        if let Some(upstream) = args.upstream {
            proxy.upstream_url = Some(upstream);
        }
        proxy.require_session |= args.require_session;
        config.proxy = Some(proxy);
    }

    let gateway = Gateway::from_config(&config).context("Invalid gateway configuration")?;
    let gateway_config = gateway.config().clone();

    if !ctx.json_output {
        println!("Portico gateway");
        println!("  listen:   {}", gateway_config.bind_addr);
        println!("  upstream: {}", gateway.state().forwarder.upstream());
        println!("  mount:    {}", gateway_config.mount_path);
    }

    gateway
        .run_until(shutdown_signal())
        .await
        .context("Gateway server failed")?;

    tracing::info!("Gateway stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "Failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received, draining connections");
}
