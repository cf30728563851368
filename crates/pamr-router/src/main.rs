#![forbid(unsafe_code)]

use anyhow::{Context, Result};
use clap::Parser;
use pamr_common::MagicCookie;
use pamr_router::config::{Args, RouterConfig};
use pamr_router::{admin, metrics, run_with_shutdown, RouterState};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(args.verbose);

    if args.reload {
        return reload(&args);
    }

    let config = RouterConfig::try_from(args)
        .map_err(|e| anyhow::anyhow!("configuration error: {}", e))?;
    if let Err(e) = config.validate() {
        anyhow::bail!("configuration error: {}", e);
    }

    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(config.nb_workers)
        .enable_all()
        .build()
        .context("failed to build runtime")?
        .block_on(serve(config))
}

async fn serve(config: RouterConfig) -> Result<()> {
    if let Some(addr) = config.metrics_addr {
        metrics::install_exporter(addr)?;
    }

    let listen = config.listen;
    let state = Arc::new(RouterState::new(config)?);
    let listener = TcpListener::bind(listen)
        .await
        .with_context(|| format!("failed to bind {listen}"))?;
    info!("bound to {}", listen);

    let (shutdown_tx, _) = tokio::sync::watch::channel(());
    let signal_tx = shutdown_tx.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("received shutdown signal");
                signal_tx.send_replace(());
            }
            Err(e) => error!("cannot listen for shutdown signal: {}", e),
        }
    });

    if let Err(e) = run_with_shutdown(listener, state, shutdown_tx).await {
        error!("router error: {}", e);
        return Err(e.into());
    }
    Ok(())
}

fn reload(args: &Args) -> Result<()> {
    let addr = args.reload_target().map_err(|e| anyhow::anyhow!(e))?;
    let cookie: MagicCookie = args
        .cookie
        .as_deref()
        .context("--reload requires --cookie")?
        .parse()?;

    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to build runtime")?
        .block_on(admin::reload(addr, cookie))
        .with_context(|| format!("reload request to {addr} failed"))?;
    info!("router at {} reloaded its configuration", addr);
    Ok(())
}
