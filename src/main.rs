use clap::Parser;
use cli::Args;
use tokio_util::sync::CancellationToken;
use tracing_error::ErrorLayer;
use tracing_indicatif::IndicatifLayer;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

use crate::deployment::cmd::run_deployment;

pub mod abis;
pub mod artifact;
pub mod network;
pub mod paymaster;
pub mod serde_utils;
pub mod signer;
pub mod zksync;

mod cli;
mod config;
mod error;
mod report;
mod types;

mod deployment;

mod interactive;

async fn start(cancel: CancellationToken) -> eyre::Result<()> {
    let args = Args::parse();
    let yes = args.yes || args.non_interactive;

    let cmd = interactive::resolve_cmd(args).await?;

    if !yes && !interactive::confirm_deployment(&cmd)? {
        tracing::info!("Deployment aborted");
        return Ok(());
    }

    let result = run_deployment(cmd, cancel).await?;

    println!("Contract deployed to {:?}", result.contract_address);

    Ok(())
}

#[tokio::main]
async fn main() -> eyre::Result<()> {
    color_eyre::install()?;

    dotenv::dotenv().ok();

    let indicatif_layer = IndicatifLayer::new();

    let filter = EnvFilter::from_default_env();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(indicatif_layer.get_stderr_writer())
                .with_filter(filter),
        )
        .with(indicatif_layer)
        .with(ErrorLayer::default())
        .init();

    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("Interrupted, cancelling deployment");
                cancel.cancel();
            }
        }
    });

    match start(cancel).await {
        Ok(()) => Ok(()),
        Err(err) => {
            tracing::error!("{:?}", err);
            std::process::exit(1)
        }
    }
}
