use std::net::SocketAddr;

use clap::Parser;
use tracing::{error, info};

use vidgate::cli::{self, Cli, Command};
use vidgate::config::Config;
use vidgate::logging::{self, LogConfig};
use vidgate::relay::{Relay, RelayConfig};
use vidgate::resolver::{Resolver, ResolverConfig};
use vidgate::server::http::{AppState, MiddlewareConfig};
use vidgate::server::startup::{run_server_with_config, ServerConfig};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    match cli.command {
        // No subcommand or explicit `start` both launch the server.
        None => run_server(None).await,
        Some(Command::Start { port }) => run_server(port).await,

        Some(Command::Version) => {
            cli::handle_version();
            Ok(())
        }
    }
}

/// Run the gateway server.
async fn run_server(port_override: Option<u16>) -> Result<(), Box<dyn std::error::Error>> {
    init_logging_from_env()?;

    // Fail fast: a missing upstream API key means the process cannot
    // serve a single request, so it refuses to start.
    let config = match Config::from_env() {
        Ok(config) => config,
        Err(err) => {
            error!(target: "config", "{err}");
            return Err(err.into());
        }
    };
    let port = port_override.unwrap_or(config.port);

    let resolver = Resolver::new(
        ResolverConfig::new(config.api_key.as_str()).with_timeout(config.resolve_timeout),
    )?;
    let relay = Relay::new(RelayConfig::default().with_timeout(config.relay_timeout))?;
    let state = AppState::new(resolver, relay);

    let middleware_config = MiddlewareConfig {
        allowed_origins: config.allowed_origins.clone(),
        ..MiddlewareConfig::default()
    };

    let handle = run_server_with_config(ServerConfig {
        state,
        middleware_config,
        bind_address: SocketAddr::from(([0, 0, 0, 0], port)),
    })
    .await?;
    info!(target: "gateway", "Server listening on port {}", handle.port());

    tokio::signal::ctrl_c().await?;
    info!(target: "gateway", "Shutdown signal received");
    handle.shutdown().await;
    info!(target: "gateway", "Gateway shut down");
    Ok(())
}

/// Initialize logging based on the VIDGATE_DEV environment variable.
fn init_logging_from_env() -> Result<(), Box<dyn std::error::Error>> {
    let log_config = if std::env::var("VIDGATE_DEV")
        .map(|v| !v.is_empty() && v != "0" && v.to_lowercase() != "false")
        .unwrap_or(false)
    {
        LogConfig::development()
    } else {
        LogConfig::production()
    };
    logging::init_logging(log_config)?;
    Ok(())
}
