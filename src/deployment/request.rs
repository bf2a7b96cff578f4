use eyre::ContextCompat;

use crate::artifact::{ConstructorArg, ContractArtifact};
use crate::paymaster::PaymasterParams;
use crate::types::GasPerPubdata;

/// Everything needed for one sponsored deployment.
///
/// Not `Clone`: [`Deployer::deploy`](super::Deployer::deploy) takes it by
/// value so the same request can't be submitted twice.
#[derive(Debug)]
pub struct DeploymentRequest<'a> {
    pub artifact: &'a ContractArtifact,
    pub constructor_args: Vec<ConstructorArg>,
    pub paymaster_params: PaymasterParams,
    pub gas_per_pubdata: GasPerPubdata,
}

#[derive(Default, Debug)]
pub struct DeploymentRequestBuilder<'a> {
    artifact: Option<&'a ContractArtifact>,
    constructor_args: Vec<ConstructorArg>,
    paymaster_params: Option<PaymasterParams>,
    gas_per_pubdata: Option<GasPerPubdata>,
}

impl<'a> DeploymentRequest<'a> {
    pub fn builder() -> DeploymentRequestBuilder<'a> {
        DeploymentRequestBuilder::default()
    }
}

impl<'a> DeploymentRequestBuilder<'a> {
    pub fn artifact(mut self, artifact: &'a ContractArtifact) -> Self {
        self.artifact = Some(artifact);
        self
    }

    pub fn constructor_args<I, A>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = A>,
        A: Into<ConstructorArg>,
    {
        self.constructor_args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn paymaster_params(mut self, paymaster_params: PaymasterParams) -> Self {
        self.paymaster_params = Some(paymaster_params);
        self
    }

    pub fn gas_per_pubdata(mut self, gas_per_pubdata: GasPerPubdata) -> Self {
        self.gas_per_pubdata = Some(gas_per_pubdata);
        self
    }

    pub fn build(self) -> eyre::Result<DeploymentRequest<'a>> {
        Ok(DeploymentRequest {
            artifact: self
                .artifact
                .context("DeploymentRequestBuilder missing artifact")?,
            constructor_args: self.constructor_args,
            paymaster_params: self
                .paymaster_params
                .context("DeploymentRequestBuilder missing paymaster_params")?,
            gas_per_pubdata: self.gas_per_pubdata.unwrap_or_default(),
        })
    }
}
