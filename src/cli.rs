use std::path::PathBuf;

use clap::{Parser, ValueEnum};
use ethers::types::Bytes;
use reqwest::Url;

use crate::types::GasPerPubdata;
use crate::zksync::AddressDerivation;

pub mod private_key;

pub use private_key::PrivateKey;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, strum::Display)]
#[clap(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum PaymasterFlow {
    General,
    ApprovalBased,
}

/// Deploys a compiled contract with its fee paid by a paymaster.
#[derive(Debug, Clone, Parser)]
#[clap(rename_all = "kebab-case", version)]
pub struct Args {
    /// Contract to deploy, either by name or fully qualified
    /// (`contracts/Token.sol:Token`)
    #[clap(env)]
    pub contract: Option<String>,

    /// Constructor arguments, in declaration order
    #[clap(short = 'a', long = "constructor-arg", allow_hyphen_values = true)]
    pub constructor_args: Vec<String>,

    /// Path to the network configuration file
    #[clap(short, long, env, default_value = "deploy.yaml")]
    pub config: PathBuf,

    /// Network from the configuration file to deploy to
    #[clap(short, long, env)]
    pub network: Option<String>,

    /// Private key of the deployer
    #[clap(short, long, env)]
    pub private_key: Option<PrivateKey>,

    /// The RPC Url to use for the deployment, overrides the network's url
    #[clap(short, long, env)]
    pub rpc_url: Option<Url>,

    /// Address of the paymaster sponsoring the deployment
    #[clap(long, env)]
    pub paymaster_address: Option<String>,

    /// How the paymaster is asked to sponsor the deployment
    #[clap(long, env, value_enum, default_value = "general")]
    pub paymaster_flow: PaymasterFlow,

    /// Token the paymaster charges in, for the approval based flow
    #[clap(long, env, required_if_eq("paymaster_flow", "approval-based"))]
    pub paymaster_token: Option<String>,

    /// Minimal token allowance, for the approval based flow
    #[clap(long, env, allow_hyphen_values = true, default_value = "0")]
    pub min_allowance: String,

    /// Extra input forwarded to the paymaster, hex encoded
    #[clap(long, env, default_value = "0x")]
    pub paymaster_inner_input: Bytes,

    /// Gas per pubdata byte limit
    #[clap(long, env)]
    pub gas_per_pubdata: Option<GasPerPubdata>,

    /// Seconds to wait for the deployment to be included in a block
    #[clap(long, env)]
    pub confirmation_timeout: Option<u64>,

    /// How the deployed contract's address is derived
    #[clap(long, env, value_enum)]
    pub address_derivation: Option<AddressDerivation>,

    /// Directory holding the compiled artifacts
    #[clap(long, env)]
    pub artifacts_dir: Option<PathBuf>,

    /// Directory deployment reports are written to
    #[clap(long, env)]
    pub deployments_dir: Option<PathBuf>,

    /// Fail instead of prompting for missing values
    #[clap(long)]
    pub non_interactive: bool,

    /// Don't ask for confirmation before broadcasting
    #[clap(short, long)]
    pub yes: bool,
}
