use ethers::types::{Address, H256, U256};
use serde::{Deserialize, Serialize};

use crate::deployment::DeploymentResult;

#[derive(Clone, Serialize, Deserialize, Debug, PartialEq, Eq)]
pub struct ContractDeployment {
    pub address: Address,
    pub transaction_hash: H256,
    pub deployer: Address,
    pub nonce: U256,
    #[serde(default)]
    pub block_number: Option<u64>,
}

impl From<DeploymentResult> for ContractDeployment {
    fn from(value: DeploymentResult) -> Self {
        Self {
            address: value.contract_address,
            transaction_hash: value.transaction_hash,
            deployer: value.deployer,
            nonce: value.nonce,
            block_number: value.block_number,
        }
    }
}
