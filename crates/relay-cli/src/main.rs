mod config;

use crate::config::RelayConfig;
use clap::{Parser, Subcommand};
use relay_gateway::GatewayServer;
use relay_orchestrator::{GitCommand, Orchestrator, WorkflowCatalog};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "relay", about = "Relay: multi-agent workflow orchestrator")]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "relay.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the observer and tool-call gateway
    Serve {
        /// Host to bind to (overrides config)
        #[arg(long)]
        host: Option<String>,
        /// Port to listen on (overrides config)
        #[arg(short, long)]
        port: Option<u16>,
    },
    /// List the built-in workflow templates
    Templates,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    let cli = Cli::parse();
    let config = RelayConfig::load(&cli.config).await?;

    match cli.command {
        Commands::Serve { host, port } => {
            let addr = config.socket_addr(host.as_deref(), port)?;

            let mut orchestrator = Orchestrator::new(config.orchestrator.clone());
            if let Some(repo) = &config.git.repo_path {
                info!(repo = %repo.display(), "Version-control hooks enabled");
                let git = GitCommand::new(repo)
                    .with_timeout(Duration::from_secs(config.git.timeout_secs));
                orchestrator = orchestrator.with_version_control(Arc::new(git));
            }
            let orchestrator = Arc::new(orchestrator);
            orchestrator.spawn_metrics_loop().await;

            info!("Starting Relay gateway on {}", addr);
            GatewayServer::serve(addr, orchestrator.clone(), shutdown_signal()).await?;

            orchestrator.shutdown().await;
        }
        Commands::Templates => {
            let catalog = WorkflowCatalog::builtin();
            for name in catalog.names() {
                println!("{name}");
                for (index, step) in catalog.template_for(name).iter().enumerate() {
                    let trigger = if step.auto_trigger { "auto" } else { "manual" };
                    println!(
                        "  {}. {:<11} {:<7} {}",
                        index + 1,
                        step.agent.as_str(),
                        trigger,
                        step.description
                    );
                }
            }
        }
    }

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
