use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use ethers::providers::{Http, Middleware, Provider};
use ethers::types::{Address, BlockNumber, Bytes, TransactionReceipt, H256, U256, U64};
use eyre::Context;
use tracing::{debug, instrument};

use crate::abis::NonceHolder;
use crate::zksync::{Eip712Transaction, Fee, NONCE_HOLDER_ADDRESS};

/// The parts of a transaction receipt a deployment cares about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Receipt {
    pub transaction_hash: H256,
    pub block_number: Option<u64>,
    pub success: bool,
    pub contract_address: Option<Address>,
}

impl Receipt {
    pub fn is_included(&self) -> bool {
        self.block_number.is_some()
    }
}

impl From<TransactionReceipt> for Receipt {
    fn from(receipt: TransactionReceipt) -> Self {
        Self {
            transaction_hash: receipt.transaction_hash,
            block_number: receipt.block_number.map(|n| n.as_u64()),
            success: receipt.status == Some(U64::one()),
            contract_address: receipt.contract_address,
        }
    }
}

#[async_trait]
pub trait NetworkClient: Send + Sync {
    async fn chain_id(&self) -> eyre::Result<u64>;

    /// Nonce the next transaction from `address` has to use.
    async fn transaction_count(&self, address: Address) -> eyre::Result<U256>;

    /// Number of contracts `address` has created, which zkSync derives
    /// creation addresses from instead of the transaction nonce.
    async fn deployment_nonce(&self, address: Address) -> eyre::Result<U256>;

    async fn gas_price(&self) -> eyre::Result<U256>;

    /// Simulates `tx` and returns the fees it needs; rejections by the
    /// paymaster or a reverting constructor surface here.
    async fn estimate_fee(&self, tx: &Eip712Transaction) -> eyre::Result<Fee>;

    /// Broadcasts an already signed raw transaction.
    async fn submit(&self, raw: Bytes) -> eyre::Result<H256>;

    async fn receipt(&self, tx_hash: H256) -> eyre::Result<Option<Receipt>>;

    /// Polls until `tx_hash` is part of a block. Does not bound the wait,
    /// callers race it against their own timeout.
    async fn wait_for_receipt(
        &self,
        tx_hash: H256,
        poll_interval: Duration,
    ) -> eyre::Result<Receipt> {
        let mut interval = tokio::time::interval(poll_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            interval.tick().await;

            match self.receipt(tx_hash).await? {
                Some(receipt) if receipt.is_included() => return Ok(receipt),
                _ => debug!(?tx_hash, "Transaction not yet included"),
            }
        }
    }
}

/// [`NetworkClient`] talking JSON-RPC to a zkSync node.
#[derive(Debug, Clone)]
pub struct EthersNetworkClient {
    provider: Arc<Provider<Http>>,
}

impl EthersNetworkClient {
    pub fn new(rpc_url: &reqwest::Url) -> eyre::Result<Self> {
        let provider = Provider::try_from(rpc_url.as_str())
            .with_context(|| format!("Connecting to {rpc_url}"))?;

        Ok(Self {
            provider: Arc::new(provider),
        })
    }
}

#[async_trait]
impl NetworkClient for EthersNetworkClient {
    async fn chain_id(&self) -> eyre::Result<u64> {
        let chain_id = self.provider.get_chainid().await?;

        Ok(chain_id.as_u64())
    }

    async fn transaction_count(&self, address: Address) -> eyre::Result<U256> {
        let nonce = self
            .provider
            .get_transaction_count(address, Some(BlockNumber::Pending.into()))
            .await?;

        Ok(nonce)
    }

    async fn deployment_nonce(&self, address: Address) -> eyre::Result<U256> {
        let nonce_holder =
            NonceHolder::new(NONCE_HOLDER_ADDRESS, self.provider.clone());

        let nonce = nonce_holder
            .get_deployment_nonce(address)
            .call()
            .await
            .context("NonceHolder.getDeploymentNonce")?;

        Ok(nonce)
    }

    async fn gas_price(&self) -> eyre::Result<U256> {
        Ok(self.provider.get_gas_price().await?)
    }

    #[instrument(skip_all)]
    async fn estimate_fee(&self, tx: &Eip712Transaction) -> eyre::Result<Fee> {
        let fee: Fee = self
            .provider
            .request("zks_estimateFee", [tx.call_request()])
            .await
            .context("zks_estimateFee")?;

        debug!(?fee, "Estimated fee");

        Ok(fee)
    }

    #[instrument(skip_all)]
    async fn submit(&self, raw: Bytes) -> eyre::Result<H256> {
        let pending = self
            .provider
            .send_raw_transaction(raw)
            .await
            .context("eth_sendRawTransaction")?;

        Ok(pending.tx_hash())
    }

    async fn receipt(&self, tx_hash: H256) -> eyre::Result<Option<Receipt>> {
        let receipt = self
            .provider
            .get_transaction_receipt(tx_hash)
            .await
            .context("eth_getTransactionReceipt")?;

        Ok(receipt.map(Receipt::from))
    }
}
