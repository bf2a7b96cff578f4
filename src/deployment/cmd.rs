use std::path::PathBuf;

use eyre::Context;
use reqwest::Url;
use tokio_util::sync::CancellationToken;
use tracing::info;

use super::{Deployer, DeployerSettings, DeploymentRequest, DeploymentResult};
use crate::artifact::{self, ArtifactLoader, HardhatArtifactLoader};
use crate::cli::PrivateKey;
use crate::network::{EthersNetworkClient, NetworkClient};
use crate::paymaster::{self, PaymasterMode};
use crate::report::Report;
use crate::signer::{DeploymentSigner, LocalSigner};
use crate::types::{ChainId, GasPerPubdata};

/// Fully resolved inputs of one deployment.
#[derive(Debug)]
pub struct Cmd {
    pub network_name: String,
    pub rpc_url: Url,
    pub expected_chain_id: Option<ChainId>,
    pub private_key: PrivateKey,
    pub contract: String,
    pub constructor_args: Vec<String>,
    pub paymaster_address: String,
    pub paymaster_mode: PaymasterMode,
    pub gas_per_pubdata: GasPerPubdata,
    pub settings: DeployerSettings,
    pub artifacts_dir: PathBuf,
    pub deployments_dir: PathBuf,
}

pub async fn run_deployment(
    cmd: Cmd,
    cancel: CancellationToken,
) -> eyre::Result<DeploymentResult> {
    // Validated before anything touches the network
    let paymaster_params =
        paymaster::build(&cmd.paymaster_address, &cmd.paymaster_mode)?;

    let loader = HardhatArtifactLoader::new(&cmd.artifacts_dir);
    let artifact = loader
        .load(&cmd.contract)
        .await
        .with_context(|| format!("Loading artifact {}", cmd.contract))?;

    let network = EthersNetworkClient::new(&cmd.rpc_url)?;
    let chain_id = network.chain_id().await.context("Fetching chain id")?;

    if let Some(expected) = cmd.expected_chain_id {
        eyre::ensure!(
            expected.0 == chain_id,
            "Network {} is configured for chain {expected} but {} reports chain {chain_id}",
            cmd.network_name,
            cmd.rpc_url
        );
    }

    let signer = LocalSigner::new(&cmd.private_key, chain_id);

    info!(
        network = %cmd.network_name,
        chain_id,
        deployer = ?signer.address(),
        paymaster = ?paymaster_params.paymaster,
        flow = cmd.paymaster_mode.name(),
        "Deploying {}",
        cmd.contract
    );

    let request = DeploymentRequest::builder()
        .artifact(&artifact)
        .constructor_args(cmd.constructor_args.iter().cloned())
        .paymaster_params(paymaster_params.clone())
        .gas_per_pubdata(cmd.gas_per_pubdata)
        .build()?;

    let deployer = Deployer::new(network, signer, cmd.settings);
    let result = deployer.deploy(request, &cancel).await?;

    let report = Report {
        network: cmd.network_name.clone(),
        chain_id,
        contract: artifact::contract_name(&cmd.contract).to_string(),
        constructor_args: cmd.constructor_args.clone(),
        paymaster: paymaster_params,
        paymaster_flow: cmd.paymaster_mode.name().to_string(),
        deployment: result.clone().into(),
    };

    report.record(&cmd.deployments_dir).await;

    Ok(result)
}
