#![forbid(unsafe_code)]

use anyhow::Context;
use clap::{Parser, Subcommand};
use pamr_agent::{Agent, AgentConfig, ConnStatus, Echo, Ignore};
use pamr_common::types::DEFAULT_PORT;
use pamr_common::{AgentId, MagicCookie};
use std::net::SocketAddr;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Command-line PAMR agent.
#[derive(Parser)]
#[command(name = "pamr-agent", about = "PAMR agent")]
#[command(version)]
struct Cli {
    /// Router address.
    #[arg(long, short = 'r', default_value_t = SocketAddr::from(([127, 0, 0, 1], DEFAULT_PORT)), env = "PAMR_ROUTER")]
    router: SocketAddr,

    /// Reserved agent id to register with (requires --cookie).
    #[arg(long, requires = "cookie")]
    agent_id: Option<AgentId>,

    /// Magic cookie; random when omitted.
    #[arg(long)]
    cookie: Option<MagicCookie>,

    /// Increase log verbosity (repeat for more detail).
    #[arg(short = 'v', long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Stay registered and answer every request with its own payload.
    Echo,
    /// Stay registered and never answer.
    Sink,
    /// Send one request and print the reply.
    Send {
        /// Destination agent id.
        dst: AgentId,
        /// Request payload.
        message: String,
        /// Do not wait for a reply.
        #[arg(long)]
        one_way: bool,
    },
}

fn init_tracing(verbose: u8) {
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        EnvFilter::new(match verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        })
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn agent_config(cli: &Cli) -> AgentConfig {
    let mut config = AgentConfig::new(cli.router);
    config.agent_id = cli.agent_id;
    if let Some(cookie) = cli.cookie {
        config.cookie = cookie;
    }
    config
}

async fn serve_until_ctrl_c(agent: Agent) -> anyhow::Result<()> {
    println!("agent id: {}", agent.agent_id());
    let mut status = agent.status_watch();
    loop {
        tokio::select! {
            r = tokio::signal::ctrl_c() => {
                r.context("cannot listen for shutdown signal")?;
                info!("received shutdown signal");
                agent.shutdown();
                return Ok(());
            }
            changed = status.changed() => {
                if changed.is_err() {
                    anyhow::bail!("agent stopped");
                }
                let now = *status.borrow_and_update();
                match now {
                    ConnStatus::Connected => info!("tunnel up"),
                    ConnStatus::Connecting => info!("reconnecting"),
                    ConnStatus::Disconnected => warn!("tunnel down"),
                }
            }
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    let config = agent_config(&cli);

    match cli.command {
        Commands::Echo => {
            let agent = Agent::register(config, Echo).await?;
            serve_until_ctrl_c(agent).await
        }
        Commands::Sink => {
            let agent = Agent::register(config, Ignore).await?;
            serve_until_ctrl_c(agent).await
        }
        Commands::Send {
            dst,
            message,
            one_way,
        } => {
            let agent = Agent::register(config, Ignore).await?;
            let reply = tokio::time::timeout(
                Duration::from_secs(60),
                agent.send_msg(dst, message.as_bytes(), one_way),
            )
            .await
            .context("no reply within 60s")??;
            if let Some(reply) = reply {
                println!("{}", String::from_utf8_lossy(&reply));
            }
            agent.shutdown();
            Ok(())
        }
    }
}
