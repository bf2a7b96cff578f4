use eyre::ContextCompat;

use self::utils::{prompt_secret_handle_errors, prompt_text_handle_errors};
use crate::cli::{Args, PaymasterFlow};
use crate::config::{Config, NetworkConfig};
use crate::deployment::cmd::Cmd;
use crate::deployment::DeployerSettings;
use crate::paymaster::{self, Allowance, PaymasterMode};
use crate::serde_utils;

mod utils;

/// Merges command line, environment and config file, prompting for
/// whatever is still missing unless running non-interactively.
pub async fn resolve_cmd(args: Args) -> eyre::Result<Cmd> {
    let config: Config =
        serde_utils::read_deserialize_or_default(&args.config).await?;

    let interactive = !args.non_interactive;

    let network_name = match args.network.clone().or(config.default_network.clone()) {
        Some(name) => Some(name),
        None if args.rpc_url.is_some() => None,
        None if interactive && !config.networks.is_empty() => Some(
            inquire::Select::new("Network:", config.network_names()).prompt()?,
        ),
        None => None,
    };

    let network: Option<&NetworkConfig> = network_name
        .as_deref()
        .map(|name| config.network(name))
        .transpose()?;

    let rpc_url = match (args.rpc_url.clone(), network) {
        (Some(rpc_url), _) => rpc_url,
        (None, Some(network)) => network.rpc_url()?,
        (None, None) if interactive => prompt_text_handle_errors("Rpc Url:")?,
        (None, None) => eyre::bail!("Missing --rpc-url or --network"),
    };

    let private_key = match args.private_key.clone() {
        Some(private_key) => private_key,
        None if interactive => prompt_secret_handle_errors("Private key:")?,
        None => eyre::bail!("Missing --private-key"),
    };

    let contract = match args.contract.clone() {
        Some(contract) => contract,
        None if interactive => inquire::Text::new("Contract:").prompt()?,
        None => eyre::bail!("Missing contract to deploy"),
    };

    let paymaster_address = match args
        .paymaster_address
        .clone()
        .or_else(|| network.and_then(|network| network.paymaster.clone()))
    {
        Some(address) => address,
        None if interactive => inquire::Text::new("Paymaster address:").prompt()?,
        None => eyre::bail!("Missing --paymaster-address"),
    };

    let paymaster_mode = paymaster_mode(&args)?;

    let gas_per_pubdata = args
        .gas_per_pubdata
        .or_else(|| network.and_then(|network| network.gas_per_pubdata))
        .unwrap_or_default();

    let settings = DeployerSettings {
        confirmation_timeout: args
            .confirmation_timeout
            .map(std::time::Duration::from_secs)
            .unwrap_or_else(|| config.misc.confirmation_timeout()),
        poll_interval: config.misc.poll_interval(),
        address_derivation: args
            .address_derivation
            .or_else(|| network.map(|network| network.address_derivation))
            .unwrap_or_default(),
    };

    Ok(Cmd {
        network_name: network_name.unwrap_or_else(|| {
            rpc_url.host_str().unwrap_or("custom").to_string()
        }),
        expected_chain_id: network.and_then(|network| network.chain_id),
        rpc_url,
        private_key,
        contract,
        constructor_args: args.constructor_args.clone(),
        paymaster_address,
        paymaster_mode,
        gas_per_pubdata,
        settings,
        artifacts_dir: args
            .artifacts_dir
            .clone()
            .unwrap_or_else(|| config.misc.artifacts_dir.clone()),
        deployments_dir: args
            .deployments_dir
            .clone()
            .unwrap_or_else(|| config.misc.deployments_dir.clone()),
    })
}

fn paymaster_mode(args: &Args) -> eyre::Result<PaymasterMode> {
    let inner_input = args.paymaster_inner_input.clone();

    let mode = match args.paymaster_flow {
        PaymasterFlow::General => PaymasterMode::General { inner_input },
        PaymasterFlow::ApprovalBased => {
            let token = args
                .paymaster_token
                .as_deref()
                .context("Approval based flow requires --paymaster-token")?;

            let min_allowance: Allowance = args.min_allowance.parse()?;

            PaymasterMode::ApprovalBased {
                token: paymaster::parse_address(token)?,
                min_allowance,
                inner_input,
            }
        }
    };

    Ok(mode)
}

pub fn confirm_deployment(cmd: &Cmd) -> eyre::Result<bool> {
    println!("Network: {} ({})", cmd.network_name, cmd.rpc_url);
    println!("Contract: {}", cmd.contract);
    if !cmd.constructor_args.is_empty() {
        println!("Constructor arguments:");
        for arg in &cmd.constructor_args {
            println!("  {arg}");
        }
    }
    println!("Paymaster: {} ({})", cmd.paymaster_address, cmd.paymaster_mode.name());
    println!("Gas per pubdata: {}", cmd.gas_per_pubdata);

    Ok(inquire::Confirm::new("Deploy?").with_default(false).prompt()?)
}
