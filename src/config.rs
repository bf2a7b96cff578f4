use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use eyre::{Context, ContextCompat};
use reqwest::Url;
use serde::{Deserialize, Serialize};

use crate::types::{ChainId, GasPerPubdata};
use crate::zksync::AddressDerivation;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub default_network: Option<String>,

    #[serde(default)]
    pub networks: HashMap<String, NetworkConfig>,

    #[serde(default)]
    pub misc: MiscConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkConfig {
    pub url: String,

    /// Paymaster used when none is given on the command line
    #[serde(default)]
    pub paymaster: Option<String>,

    #[serde(default)]
    pub gas_per_pubdata: Option<GasPerPubdata>,

    /// Checked against the node's chain id when set
    #[serde(default)]
    pub chain_id: Option<ChainId>,

    #[serde(default)]
    pub address_derivation: AddressDerivation,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MiscConfig {
    #[serde(default = "default::artifacts_dir")]
    pub artifacts_dir: PathBuf,

    #[serde(default = "default::deployments_dir")]
    pub deployments_dir: PathBuf,

    #[serde(default = "default::confirmation_timeout_secs")]
    pub confirmation_timeout_secs: u64,

    #[serde(default = "default::poll_interval_millis")]
    pub poll_interval_millis: u64,
}

impl Default for MiscConfig {
    fn default() -> Self {
        Self {
            artifacts_dir: default::artifacts_dir(),
            deployments_dir: default::deployments_dir(),
            confirmation_timeout_secs: default::confirmation_timeout_secs(),
            poll_interval_millis: default::poll_interval_millis(),
        }
    }
}

impl MiscConfig {
    pub fn confirmation_timeout(&self) -> Duration {
        Duration::from_secs(self.confirmation_timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_millis)
    }
}

impl Config {
    pub fn network(&self, name: &str) -> eyre::Result<&NetworkConfig> {
        self.networks.get(name).with_context(|| {
            let mut known: Vec<_> = self.networks.keys().collect();
            known.sort();

            format!("Unknown network {name}, configured networks: {known:?}")
        })
    }

    pub fn network_names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.networks.keys().cloned().collect();
        names.sort();
        names
    }
}

impl NetworkConfig {
    pub fn rpc_url(&self) -> eyre::Result<Url> {
        self.url
            .parse()
            .with_context(|| format!("Invalid RPC url {}", self.url))
    }
}

mod default {
    use std::path::PathBuf;

    pub fn artifacts_dir() -> PathBuf {
        PathBuf::from("artifacts-zk")
    }

    pub fn deployments_dir() -> PathBuf {
        PathBuf::from("deployments-zk")
    }

    pub fn confirmation_timeout_secs() -> u64 {
        120
    }

    pub fn poll_interval_millis() -> u64 {
        1_000
    }
}
