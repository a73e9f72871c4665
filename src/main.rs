//! Blocknet CLI - runs a server or a client on a console bus.
//!
//! This is the main binary entry point. See the `blocknet` library for the
//! protocol, the endpoints and the bus.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use blocknet::bus::{BusBuilder, Channel, ClientSatellite, ServerSatellite};
use blocknet::console::{ConsoleBusiness, ConsoleInterface, Role};
use blocknet::Config;
use clap::{Args, Parser, Subcommand};

/// Grace period for background tasks once the bus stopped.
const RUNTIME_SHUTDOWN_GRACE: Duration = Duration::from_millis(500);

#[derive(Parser)]
#[command(name = "blocknet")]
#[command(version)]
#[command(about = "Framed, acknowledged TCP messaging over a satellite bus")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a server container and accept clients
    Server(AddressArgs),
    /// Run a client endpoint connected to a server
    Client(AddressArgs),
}

#[derive(Args)]
struct AddressArgs {
    /// Server host (listen host for `server`)
    #[arg(long)]
    host: Option<String>,
    /// Server port
    #[arg(long)]
    port: Option<u16>,
    /// Address file (`host=...&port=...`)
    #[arg(long)]
    config: Option<PathBuf>,
}

impl AddressArgs {
    fn load(self) -> Result<Config> {
        let config = Config::load(self.config.as_deref())?;
        Ok(config.with_address(self.host, self.port))
    }
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_secs()
        .init();

    let cli = Cli::parse();
    let (role, config) = match cli.command {
        Commands::Server(args) => (Role::Server, args.load()?),
        Commands::Client(args) => (Role::Client, args.load()?),
    };

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to build tokio runtime")?;
    runtime.block_on(run(role, config));
    // The stdin reader blocks a runtime thread until the next line.
    runtime.shutdown_timeout(RUNTIME_SHUTDOWN_GRACE);
    Ok(())
}

async fn run(role: Role, config: Config) {
    log::info!(
        "[Main] starting {} for {}:{}",
        role.as_str(),
        config.host,
        config.port
    );

    let builder = BusBuilder::new()
        .queue_capacity(config.queue_capacity)
        .attach(ConsoleBusiness::new(role))
        .attach(ConsoleInterface::stdio());
    let builder = match role {
        Role::Server => builder.attach(
            ServerSatellite::new(config.net, config.host, config.port).connect_on_start(true),
        ),
        Role::Client => builder.attach(
            ClientSatellite::new(config.net, config.host, config.port).connect_on_start(true),
        ),
    };
    let bus = builder.start();

    let poster = bus.poster();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                log::info!("[Main] Ctrl-C received, closing");
                if let Err(e) = poster.close(Channel::Interface).await {
                    log::debug!("[Main] close after stop: {e}");
                }
            }
            Err(e) => log::warn!("[Main] cannot listen for Ctrl-C: {e}"),
        }
    });

    bus.join().await;
}
