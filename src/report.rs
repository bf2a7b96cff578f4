use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{error, info};

use crate::paymaster::PaymasterParams;
use crate::report::contract_deployment::ContractDeployment;
use crate::serde_utils;

pub mod contract_deployment;

/// Record of a finished deployment, written next to previous ones so the
/// address can be looked up later.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Report {
    pub network: String,
    pub chain_id: u64,
    pub contract: String,

    #[serde(default)]
    pub constructor_args: Vec<String>,

    pub paymaster: PaymasterParams,
    pub paymaster_flow: String,

    pub deployment: ContractDeployment,
}

impl Report {
    /// `<deployments_dir>/<network>/<contract>.yaml`
    pub fn path(&self, deployments_dir: impl AsRef<Path>) -> PathBuf {
        deployments_dir
            .as_ref()
            .join(&self.network)
            .join(format!("{}.yaml", self.contract))
    }

    pub async fn write(
        &self,
        deployments_dir: impl AsRef<Path>,
    ) -> eyre::Result<PathBuf> {
        let path = self.path(deployments_dir);

        serde_utils::write_serialize(&path, self).await?;

        Ok(path)
    }

    /// Writes the report once the contract is already on chain. A failure
    /// is logged with the deployed address instead of being returned.
    pub async fn record(
        &self,
        deployments_dir: impl AsRef<Path>,
    ) -> Option<PathBuf> {
        match self.write(deployments_dir).await {
            Ok(path) => {
                info!("Report written to {}", path.display());
                Some(path)
            }
            Err(err) => {
                error!(
                    contract_address = ?self.deployment.address,
                    tx_hash = ?self.deployment.transaction_hash,
                    "Contract deployed but its report could not be written: {err:?}"
                );
                None
            }
        }
    }
}
