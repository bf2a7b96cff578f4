use std::time::Duration;

use ethers::types::{Address, H256, U256};
use indicatif::ProgressStyle;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn, Span};
use tracing_indicatif::span_ext::IndicatifSpanExt;

use crate::error::{reason, DeploymentError};
use crate::network::{NetworkClient, Receipt};
use crate::signer::DeploymentSigner;
use crate::zksync::{self, AddressDerivation, Eip712Transaction};

pub mod cmd;
pub mod request;

pub use self::request::{DeploymentRequest, DeploymentRequestBuilder};

#[derive(Debug, Clone, Copy, PartialEq, Eq, derive_more::Display)]
pub enum DeploymentState {
    #[display(fmt = "unsubmitted")]
    Unsubmitted,
    #[display(fmt = "submitted")]
    Submitted,
    #[display(fmt = "confirmed")]
    Confirmed,
    #[display(fmt = "reverted")]
    Reverted,
    #[display(fmt = "timed out")]
    TimedOut,
    #[display(fmt = "rejected before submission")]
    RejectedPreSubmit,
    #[display(fmt = "indeterminate")]
    Indeterminate,
}

impl DeploymentState {
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Unsubmitted | Self::Submitted)
    }

    fn can_become(self, next: Self) -> bool {
        match self {
            Self::Unsubmitted => {
                matches!(next, Self::Submitted | Self::RejectedPreSubmit)
            }
            Self::Submitted => matches!(
                next,
                Self::Confirmed
                    | Self::Reverted
                    | Self::TimedOut
                    | Self::Indeterminate
            ),
            _ => false,
        }
    }

    fn for_error(self, err: &DeploymentError) -> Self {
        match (self, err) {
            (Self::Unsubmitted, _) => Self::RejectedPreSubmit,
            (_, DeploymentError::ConfirmationTimeout { .. }) => Self::TimedOut,
            (_, DeploymentError::TransactionReverted { .. }) => Self::Reverted,
            _ => Self::Indeterminate,
        }
    }
}

#[derive(Debug)]
struct StateTracker {
    state: DeploymentState,
}

impl StateTracker {
    fn new() -> Self {
        Self {
            state: DeploymentState::Unsubmitted,
        }
    }

    fn transition(&mut self, next: DeploymentState) {
        debug_assert!(
            self.state.can_become(next),
            "invalid transition {} -> {next}",
            self.state
        );

        if next.is_terminal() {
            info!(from = %self.state, state = %next, "Deployment finished");
        } else {
            info!(from = %self.state, to = %next, "Deployment state changed");
        }
        self.state = next;
    }

    fn fail(&mut self, err: DeploymentError) -> DeploymentError {
        let next = self.state.for_error(&err);
        self.transition(next);
        err
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentResult {
    pub contract_address: Address,
    pub transaction_hash: H256,
    pub deployer: Address,
    pub nonce: U256,
    pub block_number: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct DeployerSettings {
    pub confirmation_timeout: Duration,
    pub poll_interval: Duration,
    pub address_derivation: AddressDerivation,
}

impl Default for DeployerSettings {
    fn default() -> Self {
        Self {
            confirmation_timeout: Duration::from_secs(120),
            poll_interval: Duration::from_secs(1),
            address_derivation: AddressDerivation::default(),
        }
    }
}

/// Drives a single sponsored contract creation to confirmation.
///
/// Nothing is retried: a failed step is reported and the request is gone.
#[derive(Debug)]
pub struct Deployer<N, S> {
    network: N,
    signer: S,
    settings: DeployerSettings,
}

/// A signed transaction that hasn't been broadcast yet.
struct Prepared {
    tx: Eip712Transaction,
    raw: ethers::types::Bytes,
    deployment_nonce: U256,
}

impl<N, S> Deployer<N, S>
where
    N: NetworkClient,
    S: DeploymentSigner,
{
    pub fn new(network: N, signer: S, settings: DeployerSettings) -> Self {
        Self {
            network,
            signer,
            settings,
        }
    }

    pub fn signer(&self) -> &S {
        &self.signer
    }

    pub fn network(&self) -> &N {
        &self.network
    }

    #[instrument(skip_all, fields(contract = %request.artifact.contract_name))]
    pub async fn deploy(
        &self,
        request: DeploymentRequest<'_>,
        cancel: &CancellationToken,
    ) -> Result<DeploymentResult, DeploymentError> {
        let mut tracker = StateTracker::new();

        let prepared = self
            .prepare(request, cancel)
            .await
            .map_err(|err| tracker.fail(err))?;

        let Prepared {
            tx,
            raw,
            deployment_nonce,
        } = prepared;

        if cancel.is_cancelled() {
            return Err(tracker.fail(DeploymentError::Cancelled));
        }

        let tx_hash = self.network.submit(raw).await.map_err(|err| {
            tracker.fail(DeploymentError::BroadcastFailed(reason(&err)))
        })?;

        tracker.transition(DeploymentState::Submitted);
        info!(?tx_hash, nonce = %tx.nonce, "Deployment broadcast");

        let receipt = self
            .await_confirmation(tx_hash, cancel)
            .await
            .map_err(|err| tracker.fail(err))?;

        tracker.transition(DeploymentState::Confirmed);

        let derivation = self.settings.address_derivation;
        let derived = derivation.contract_address(
            tx.from,
            derivation.creation_nonce(tx.nonce, deployment_nonce),
        );

        let contract_address = match receipt.contract_address {
            Some(reported) => {
                if reported != derived {
                    warn!(
                        ?reported,
                        ?derived,
                        %derivation,
                        "Receipt reports a different contract address than derived"
                    );
                }
                reported
            }
            None => derived,
        };

        info!(?contract_address, ?tx_hash, "Contract deployed");

        Ok(DeploymentResult {
            contract_address,
            transaction_hash: tx_hash,
            deployer: tx.from,
            nonce: tx.nonce,
            block_number: receipt.block_number,
        })
    }

    /// Everything up to, but excluding, the broadcast.
    #[instrument(skip_all)]
    async fn prepare(
        &self,
        request: DeploymentRequest<'_>,
        cancel: &CancellationToken,
    ) -> Result<Prepared, DeploymentError> {
        let DeploymentRequest {
            artifact,
            constructor_args,
            paymaster_params,
            gas_per_pubdata,
        } = request;

        let constructor_input =
            artifact.encode_constructor_args(&constructor_args)?;

        let bytecode_hash = zksync::hash_bytecode(&artifact.bytecode)
            .map_err(|err| DeploymentError::InvalidBytecode(err.to_string()))?;

        for dep in &artifact.factory_deps {
            zksync::hash_bytecode(dep).map_err(|err| {
                DeploymentError::InvalidBytecode(format!("factory dependency: {err}"))
            })?;
        }

        if cancel.is_cancelled() {
            return Err(DeploymentError::Cancelled);
        }

        let from = self.signer.address();

        let chain_id = self.network.chain_id().await.map_err(|err| {
            DeploymentError::EstimationFailed(format!(
                "querying chain id: {}",
                reason(&err)
            ))
        })?;

        // Fetched per deployment so concurrent deployments from one signer
        // see each other's pending transactions
        let nonce =
            self.network.transaction_count(from).await.map_err(|err| {
                DeploymentError::EstimationFailed(format!(
                    "querying nonce: {}",
                    reason(&err)
                ))
            })?;

        let deployment_nonce =
            self.network.deployment_nonce(from).await.map_err(|err| {
                DeploymentError::EstimationFailed(format!(
                    "querying deployment nonce: {}",
                    reason(&err)
                ))
            })?;

        let gas_price = self.network.gas_price().await.map_err(|err| {
            DeploymentError::EstimationFailed(format!(
                "querying gas price: {}",
                reason(&err)
            ))
        })?;

        let mut factory_deps = vec![artifact.bytecode.clone()];
        factory_deps.extend(artifact.factory_deps.iter().cloned());

        let mut tx = Eip712Transaction {
            chain_id,
            from,
            to: zksync::CONTRACT_DEPLOYER_ADDRESS,
            nonce,
            value: U256::zero(),
            data: zksync::create_calldata(bytecode_hash, constructor_input),
            gas_limit: U256::zero(),
            max_fee_per_gas: gas_price,
            max_priority_fee_per_gas: U256::zero(),
            gas_per_pubdata: U256::from(*gas_per_pubdata),
            factory_deps,
            paymaster_params: Some(paymaster_params),
        };

        let fee = self
            .network
            .estimate_fee(&tx)
            .await
            .map_err(|err| DeploymentError::EstimationFailed(reason(&err)))?;

        tx.apply_fee(&fee);

        info!(
            chain_id,
            %nonce,
            gas_limit = %tx.gas_limit,
            max_fee_per_gas = %tx.max_fee_per_gas,
            "Assembled sponsored deployment"
        );

        let signature = self
            .signer
            .sign_transaction(&tx)
            .await
            .map_err(|err| DeploymentError::SigningFailed(reason(&err)))?;

        let raw = tx.rlp_signed(&signature);

        Ok(Prepared {
            tx,
            raw,
            deployment_nonce,
        })
    }

    #[instrument(skip(self, cancel))]
    async fn await_confirmation(
        &self,
        tx_hash: H256,
        cancel: &CancellationToken,
    ) -> Result<Receipt, DeploymentError> {
        Span::current().pb_set_style(&ProgressStyle::default_spinner());

        let timeout = self.settings.confirmation_timeout;
        let wait = tokio::time::timeout(
            timeout,
            self.network
                .wait_for_receipt(tx_hash, self.settings.poll_interval),
        );

        let receipt = tokio::select! {
            biased;

            _ = cancel.cancelled() => {
                return Err(DeploymentError::Indeterminate {
                    tx_hash,
                    reason: "cancelled while waiting for confirmation".to_string(),
                });
            }
            result = wait => match result {
                Err(_elapsed) => {
                    return Err(DeploymentError::ConfirmationTimeout {
                        tx_hash,
                        timeout,
                    });
                }
                Ok(Err(err)) => {
                    return Err(DeploymentError::Indeterminate {
                        tx_hash,
                        reason: reason(&err),
                    });
                }
                Ok(Ok(receipt)) => receipt,
            },
        };

        if !receipt.success {
            return Err(DeploymentError::TransactionReverted { tx_hash });
        }

        Ok(receipt)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use async_trait::async_trait;
    use ethers::types::Bytes;
    use ethers::utils::rlp;

    use super::*;
    use crate::artifact::tests::{artifact_with_abi, SINGLE_UINT_ABI};
    use crate::artifact::ContractArtifact;
    use crate::paymaster::{self, PaymasterMode};
    use crate::signer::tests::test_signer;
    use crate::signer::LocalSigner;
    use crate::types::GasPerPubdata;
    use crate::zksync::Fee;

    const CHAIN_ID: u64 = 300;
    const PAYMASTER: &str = "0x98546B226dbbA8230cf620635a1e4ab01F6A99B2";

    #[derive(Debug, Clone, Copy)]
    enum Inclusion {
        Success,
        Revert,
        Never,
    }

    struct FakeNetwork {
        chain_id: u64,
        nonce: U256,
        deployment_nonce: U256,
        receipt_address: Option<Address>,
        estimate_error: Option<&'static str>,
        submit_error: Option<&'static str>,
        inclusion: Inclusion,
        cancel_on_submit: Option<CancellationToken>,
        estimates: AtomicUsize,
        submitted: Mutex<Vec<Bytes>>,
    }

    impl FakeNetwork {
        fn new() -> Self {
            Self {
                chain_id: CHAIN_ID,
                nonce: U256::from(5),
                deployment_nonce: U256::zero(),
                receipt_address: None,
                estimate_error: None,
                submit_error: None,
                inclusion: Inclusion::Success,
                cancel_on_submit: None,
                estimates: AtomicUsize::new(0),
                submitted: Mutex::new(vec![]),
            }
        }

        fn submitted(&self) -> Vec<Bytes> {
            self.submitted.lock().unwrap().clone()
        }
    }

    fn tx_hash() -> H256 {
        H256::repeat_byte(0xaa)
    }

    #[async_trait]
    impl NetworkClient for FakeNetwork {
        async fn chain_id(&self) -> eyre::Result<u64> {
            Ok(self.chain_id)
        }

        async fn transaction_count(&self, _: Address) -> eyre::Result<U256> {
            Ok(self.nonce)
        }

        async fn deployment_nonce(&self, _: Address) -> eyre::Result<U256> {
            Ok(self.deployment_nonce)
        }

        async fn gas_price(&self) -> eyre::Result<U256> {
            Ok(U256::from(25_000_000))
        }

        async fn estimate_fee(&self, tx: &Eip712Transaction) -> eyre::Result<Fee> {
            self.estimates.fetch_add(1, Ordering::SeqCst);

            assert!(tx.paymaster_params.is_some());

            if let Some(err) = self.estimate_error {
                eyre::bail!("{err}");
            }

            Ok(Fee {
                gas_limit: U256::from(3_000_000),
                gas_per_pubdata_limit: U256::from(50_000),
                max_fee_per_gas: U256::from(25_000_000),
                max_priority_fee_per_gas: U256::zero(),
            })
        }

        async fn submit(&self, raw: Bytes) -> eyre::Result<H256> {
            if let Some(err) = self.submit_error {
                eyre::bail!("{err}");
            }

            self.submitted.lock().unwrap().push(raw);

            if let Some(cancel) = self.cancel_on_submit.as_ref() {
                cancel.cancel();
            }

            Ok(tx_hash())
        }

        async fn receipt(&self, tx_hash: H256) -> eyre::Result<Option<Receipt>> {
            let success = match self.inclusion {
                Inclusion::Success => true,
                Inclusion::Revert => false,
                Inclusion::Never => return Ok(None),
            };

            Ok(Some(Receipt {
                transaction_hash: tx_hash,
                block_number: Some(17),
                success,
                contract_address: self.receipt_address,
            }))
        }
    }

    fn settings() -> DeployerSettings {
        DeployerSettings {
            confirmation_timeout: Duration::from_millis(200),
            poll_interval: Duration::from_millis(10),
            address_derivation: AddressDerivation::Evm,
        }
    }

    fn deployer(network: FakeNetwork) -> Deployer<FakeNetwork, LocalSigner> {
        Deployer::new(network, test_signer(CHAIN_ID), settings())
    }

    fn sphnx() -> ContractArtifact {
        artifact_with_abi(SINGLE_UINT_ABI)
    }

    fn request<'a>(
        artifact: &'a ContractArtifact,
        args: &[&str],
    ) -> DeploymentRequest<'a> {
        DeploymentRequest::builder()
            .artifact(artifact)
            .constructor_args(args.iter().copied())
            .paymaster_params(
                paymaster::build(PAYMASTER, &PaymasterMode::general()).unwrap(),
            )
            .gas_per_pubdata(GasPerPubdata::DEFAULT)
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn deploys_with_general_paymaster() -> eyre::Result<()> {
        let deployer = deployer(FakeNetwork::new());
        let artifact = sphnx();

        let result = deployer
            .deploy(request(&artifact, &["2500000"]), &CancellationToken::new())
            .await?;

        let sender = deployer.signer().address();
        assert_eq!(result.deployer, sender);
        assert_eq!(result.nonce, U256::from(5));
        assert_eq!(result.transaction_hash, tx_hash());
        assert_eq!(result.block_number, Some(17));
        assert_eq!(
            result.contract_address,
            ethers::utils::get_contract_address(sender, U256::from(5))
        );

        let submitted = deployer.network().submitted();
        assert_eq!(submitted.len(), 1);

        let raw = &submitted[0];
        assert_eq!(raw[0], zksync::EIP712_TX_TYPE);

        let decoded = rlp::Rlp::new(&raw[1..]);
        let gas_limit: U256 = decoded.val_at(3)?;
        assert_eq!(gas_limit, U256::from(3_000_000));

        let to: Address = decoded.val_at(4)?;
        assert_eq!(to, zksync::CONTRACT_DEPLOYER_ADDRESS);

        let gas_per_pubdata: U256 = decoded.val_at(12)?;
        assert_eq!(gas_per_pubdata, U256::from(50_000));

        let paymaster: Address = decoded.at(15)?.val_at(0)?;
        assert_eq!(paymaster, paymaster::parse_address(PAYMASTER)?);

        let paymaster_input: Vec<u8> = decoded.at(15)?.val_at(1)?;
        assert_eq!(
            PaymasterMode::decode(&paymaster_input)?,
            PaymasterMode::general()
        );

        Ok(())
    }

    #[tokio::test]
    async fn zksync_derivation_uses_the_deployment_nonce() -> eyre::Result<()> {
        let mut network = FakeNetwork::new();
        network.deployment_nonce = U256::from(2);
        let mut deployer = deployer(network);
        deployer.settings.address_derivation = AddressDerivation::ZkSync;
        let artifact = sphnx();

        let result = deployer
            .deploy(request(&artifact, &["2500000"]), &CancellationToken::new())
            .await?;

        let sender = deployer.signer().address();
        assert_eq!(result.nonce, U256::from(5));
        assert_eq!(
            result.contract_address,
            AddressDerivation::ZkSync.contract_address(sender, U256::from(2))
        );
        assert_ne!(
            result.contract_address,
            AddressDerivation::ZkSync.contract_address(sender, U256::from(5))
        );

        Ok(())
    }

    #[tokio::test]
    async fn receipt_address_matches_deployment_nonce() -> eyre::Result<()> {
        let sender = test_signer(CHAIN_ID).address();
        let on_chain =
            AddressDerivation::ZkSync.contract_address(sender, U256::zero());

        let mut network = FakeNetwork::new();
        network.receipt_address = Some(on_chain);
        let mut deployer = deployer(network);
        deployer.settings.address_derivation = AddressDerivation::ZkSync;
        let artifact = sphnx();

        let result = deployer
            .deploy(request(&artifact, &["2500000"]), &CancellationToken::new())
            .await?;

        assert_eq!(result.nonce, U256::from(5));
        assert_eq!(result.contract_address, on_chain);

        Ok(())
    }

    #[tokio::test]
    async fn receipt_address_wins_over_derivation() -> eyre::Result<()> {
        let on_chain = Address::repeat_byte(0x42);

        let mut network = FakeNetwork::new();
        network.receipt_address = Some(on_chain);
        let deployer = deployer(network);
        let artifact = sphnx();

        let result = deployer
            .deploy(request(&artifact, &["2500000"]), &CancellationToken::new())
            .await?;

        assert_eq!(result.contract_address, on_chain);

        Ok(())
    }

    #[tokio::test]
    async fn argument_mismatch_never_reaches_the_network() {
        let deployer = deployer(FakeNetwork::new());
        let artifact = sphnx();

        let err = deployer
            .deploy(request(&artifact, &[]), &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, DeploymentError::ArgumentMismatch(_)));
        assert_eq!(deployer.network().estimates.load(Ordering::SeqCst), 0);
        assert!(deployer.network().submitted().is_empty());
    }

    #[tokio::test]
    async fn malformed_bytecode_is_rejected_locally() {
        let deployer = deployer(FakeNetwork::new());
        let mut artifact = sphnx();
        artifact.bytecode = Bytes::from(vec![0u8; 31]);

        let err = deployer
            .deploy(request(&artifact, &["1"]), &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, DeploymentError::InvalidBytecode(_)));
        assert!(err.is_pre_flight());
        assert_eq!(deployer.network().estimates.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn estimation_failure_keeps_the_node_reason() {
        let mut network = FakeNetwork::new();
        network.estimate_error =
            Some("Paymaster validation error: not enough balance");
        let deployer = deployer(network);
        let artifact = sphnx();

        let err = deployer
            .deploy(request(&artifact, &["2500000"]), &CancellationToken::new())
            .await
            .unwrap_err();

        match err {
            DeploymentError::EstimationFailed(reason) => {
                assert!(reason.contains("not enough balance"), "{reason}")
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(deployer.network().submitted().is_empty());
    }

    #[tokio::test]
    async fn signer_on_wrong_chain() {
        let mut network = FakeNetwork::new();
        network.chain_id = 324;
        let deployer = deployer(network);
        let artifact = sphnx();

        let err = deployer
            .deploy(request(&artifact, &["2500000"]), &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, DeploymentError::SigningFailed(_)), "{err:?}");
        assert!(deployer.network().submitted().is_empty());
    }

    #[tokio::test]
    async fn broadcast_rejection() {
        let mut network = FakeNetwork::new();
        network.submit_error = Some("nonce too low");
        let deployer = deployer(network);
        let artifact = sphnx();

        let err = deployer
            .deploy(request(&artifact, &["2500000"]), &CancellationToken::new())
            .await
            .unwrap_err();

        match &err {
            DeploymentError::BroadcastFailed(reason) => {
                assert!(reason.contains("nonce too low"))
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(err.is_retriable_with_fresh_nonce());
    }

    #[tokio::test]
    async fn reverted_deployment() {
        let mut network = FakeNetwork::new();
        network.inclusion = Inclusion::Revert;
        let deployer = deployer(network);
        let artifact = sphnx();

        let err = deployer
            .deploy(request(&artifact, &["2500000"]), &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            DeploymentError::TransactionReverted { tx_hash } if tx_hash == self::tx_hash()
        ));
    }

    #[tokio::test]
    async fn confirmation_timeout_instead_of_hanging() {
        let mut network = FakeNetwork::new();
        network.inclusion = Inclusion::Never;
        let deployer = deployer(network);
        let artifact = sphnx();

        let err = deployer
            .deploy(request(&artifact, &["2500000"]), &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(
            matches!(err, DeploymentError::ConfirmationTimeout { .. }),
            "{err:?}"
        );
        assert!(!err.requires_reconciliation());
        assert_eq!(deployer.network().submitted().len(), 1);
    }

    #[tokio::test]
    async fn cancellation_after_broadcast_is_indeterminate() {
        let cancel = CancellationToken::new();

        let mut network = FakeNetwork::new();
        network.inclusion = Inclusion::Never;
        network.cancel_on_submit = Some(cancel.clone());
        let deployer = deployer(network);
        let artifact = sphnx();

        let err = deployer
            .deploy(request(&artifact, &["2500000"]), &cancel)
            .await
            .unwrap_err();

        assert!(matches!(err, DeploymentError::Indeterminate { .. }), "{err:?}");
        assert_eq!(deployer.network().submitted().len(), 1);
    }

    #[tokio::test]
    async fn cancellation_before_broadcast_sends_nothing() {
        let cancel = CancellationToken::new();
        cancel.cancel();

        let deployer = deployer(FakeNetwork::new());
        let artifact = sphnx();

        let err = deployer
            .deploy(request(&artifact, &["2500000"]), &cancel)
            .await
            .unwrap_err();

        assert!(matches!(err, DeploymentError::Cancelled));
        assert!(deployer.network().submitted().is_empty());
    }

    #[test]
    fn state_machine() {
        use DeploymentState::*;

        assert!(Unsubmitted.can_become(Submitted));
        assert!(Unsubmitted.can_become(RejectedPreSubmit));
        assert!(!Unsubmitted.can_become(Confirmed));
        assert!(Submitted.can_become(Indeterminate));
        assert!(!Confirmed.can_become(Submitted));

        for state in [Confirmed, Reverted, TimedOut, RejectedPreSubmit, Indeterminate] {
            assert!(state.is_terminal());
        }
        assert!(!Submitted.is_terminal());

        let timeout = DeploymentError::ConfirmationTimeout {
            tx_hash: H256::zero(),
            timeout: Duration::from_secs(1),
        };
        assert_eq!(Submitted.for_error(&timeout), TimedOut);
        assert_eq!(Unsubmitted.for_error(&timeout), RejectedPreSubmit);
    }
}
