//! FDL/SIMM application runner
//!
//! Runs one application against a peer (normally the AACM manager):
//!
//! ```text
//! fdl-app publish simm                    # serve the SIMM catalog
//! fdl-app subscribe fdl_ --catalog simm   # consume a SIMM publisher
//! fdl-app publish --peer 10.0.0.2:8000 --publish-interval-ms 500
//! ```

use std::process;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args as ClapArgs, Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use fdl_app::config::{DEFAULT_DATA_BIND, DEFAULT_DATA_DEST, DEFAULT_PEER_ADDR};
use fdl_app::{run_sampler, AppConfig, Publisher, SampleStore, Subscriber, SyntheticSource};

/// Run an FDL/SIMM application
#[derive(Parser, Debug)]
#[command(name = "fdl-app", version, about)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Serve a catalog: answer subscriptions and publish samples
    Publish(SessionArgs),
    /// Subscribe to a peer's catalog and log what it publishes
    Subscribe(SessionArgs),
}

#[derive(ClapArgs, Debug)]
struct SessionArgs {
    /// Four-character application name
    #[arg(default_value = "simm")]
    name: String,

    /// Control peer address
    #[arg(long, default_value = DEFAULT_PEER_ADDR)]
    peer: String,

    /// Local address of the UDP data channel
    #[arg(long, default_value = DEFAULT_DATA_BIND)]
    data_bind: String,

    /// Destination of OPEN and PUBLISH datagrams
    #[arg(long, default_value = DEFAULT_DATA_DEST)]
    data_dest: String,

    /// Measurement-point catalog: simm or fdl
    #[arg(long, default_value = "simm")]
    catalog: String,

    /// Publish tick period
    #[arg(long, default_value_t = 1000)]
    publish_interval_ms: u64,

    /// How long to wait for each ack
    #[arg(long, default_value_t = 3000)]
    ack_timeout_ms: u64,
}

impl SessionArgs {
    fn into_config(self) -> Result<AppConfig> {
        Ok(AppConfig {
            app_name: AppConfig::parse_app_name(&self.name)?,
            catalog: AppConfig::catalog_by_name(&self.catalog)?,
            peer_addr: self.peer,
            data_bind: AppConfig::parse_addr("data bind", &self.data_bind)?,
            data_dest: AppConfig::parse_addr("data dest", &self.data_dest)?,
            publish_interval: Duration::from_millis(self.publish_interval_ms.max(1)),
            ack_timeout: Duration::from_millis(self.ack_timeout_ms),
            ..AppConfig::default()
        })
    }
}

fn main() {
    let args = Args::parse();
    if let Err(e) = run(args) {
        eprintln!("fdl-app: {e:#}");
        process::exit(1);
    }
}

#[tokio::main]
async fn run(args: Args) -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("fdl_app=info".parse()?)
                .add_directive("fdl_core=info".parse()?)
                .add_directive("fdl_protocol=info".parse()?),
        )
        .init();

    let cancel_token = CancellationToken::new();
    let shutdown_token = cancel_token.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Error waiting for Ctrl+C");
        }
        info!("Shutdown requested");
        shutdown_token.cancel();
    });

    match args.command {
        Command::Publish(session) => {
            let config = session.into_config().context("Invalid publisher arguments")?;
            info!(app = %config.app_name, peer = %config.peer_addr, "Starting publisher");

            let store = SampleStore::shared();
            let sampler = tokio::spawn(run_sampler(
                store.clone(),
                config.catalog,
                SyntheticSource::new(),
                config.publish_interval,
                cancel_token.clone(),
            ));

            let publisher = Publisher::start(config, store, cancel_token.clone())
                .await
                .context("Publisher failed to start")?;
            let result = publisher.run().await;
            cancel_token.cancel();
            let _ = sampler.await;
            result.context("Publisher stopped with an error")?;
        }
        Command::Subscribe(session) => {
            let config = session.into_config().context("Invalid subscriber arguments")?;
            info!(app = %config.app_name, peer = %config.peer_addr, "Starting subscriber");

            let subscriber = Subscriber::start(config, cancel_token.clone())
                .await
                .context("Subscriber failed to start")?;
            let received = subscriber.run().await.context("Subscriber stopped with an error")?;
            info!(received, "Subscriber done");
        }
    }

    Ok(())
}
