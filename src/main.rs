//! Binary entry point: load configuration, initialize tracing, subscribe the
//! addresses given on the command line, and log every delivered bet/claim
//! until Ctrl-C.

use std::str::FromStr;
use std::sync::Arc;

use clap::Parser;
use ethers::types::Address;
use eyre::{eyre, WrapErr};
use tokio::signal;
use tracing::info;
use tracing_subscriber::{filter::EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use prediction_watch::{Config, HttpTransport, PredictionMonitor};

#[derive(Parser, Debug)]
#[command(name = "prediction-watch", about = "Watch addresses betting on a prediction contract")]
struct Cli {
    /// Path to the JSON config file. Defaults apply when omitted.
    #[arg(long)]
    config: Option<String>,

    /// Addresses to watch (hex, 0x-prefixed).
    #[arg(required = true)]
    addresses: Vec<String>,
}

#[tokio::main]
async fn main() -> eyre::Result<()> {
    let filter = EnvFilter::from_default_env()
        .add_directive("ethers_providers=warn".parse()?)
        .add_directive("ethers=warn".parse()?)
        .add_directive("prediction_watch=info".parse()?);
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => Config::load_from_file(path)
            .await
            .wrap_err_with(|| format!("loading config from {}", path))?,
        None => Config::default(),
    };

    let addresses = cli
        .addresses
        .iter()
        .map(|raw| Address::from_str(raw).map_err(|e| eyre!("invalid address {}: {}", raw, e)))
        .collect::<eyre::Result<Vec<_>>>()?;

    let transport = Arc::new(HttpTransport::new(config.chain.ws_url.clone()));
    let monitor = PredictionMonitor::new(config, transport)?;

    let epoch = monitor.current_epoch().await?;
    let remaining_ms = monitor.time_until_next_round().await?;
    info!(epoch, remaining_ms, "Connected to prediction contract");

    let mut handles = Vec::new();
    for address in addresses {
        let snapshot = monitor.wallet_history(address).await?;
        info!(
            address = ?address,
            bulls = snapshot.bulls.len(),
            bears = snapshot.bears.len(),
            claims = snapshot.claims.len(),
            "Loaded wallet history"
        );

        handles.push(monitor.subscribe_to_new_bets(address, move |event| {
            info!(
                address = ?address,
                epoch = event.epoch,
                kind = %event.kind,
                amount = %event.amount,
                "New event"
            );
        }));
    }

    monitor.start().await;
    info!("Monitoring; press Ctrl-C to stop");

    signal::ctrl_c().await.wrap_err("waiting for shutdown signal")?;
    monitor.shutdown();
    drop(handles);
    info!("Stopped");
    Ok(())
}
