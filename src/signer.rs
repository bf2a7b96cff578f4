use async_trait::async_trait;
use ethers::signers::{LocalWallet, Signer, Wallet};
use ethers::types::{Address, Signature};

use crate::cli::PrivateKey;
use crate::zksync::Eip712Transaction;

#[async_trait]
pub trait DeploymentSigner: Send + Sync {
    fn address(&self) -> Address;

    fn chain_id(&self) -> u64;

    async fn sign_transaction(
        &self,
        tx: &Eip712Transaction,
    ) -> eyre::Result<Signature>;
}

/// Signs with a private key held in memory.
#[derive(Debug, Clone)]
pub struct LocalSigner {
    wallet: LocalWallet,
}

impl LocalSigner {
    pub fn new(private_key: &PrivateKey, chain_id: u64) -> Self {
        let wallet = Wallet::from(private_key.key.clone()).with_chain_id(chain_id);

        Self { wallet }
    }
}

#[async_trait]
impl DeploymentSigner for LocalSigner {
    fn address(&self) -> Address {
        self.wallet.address()
    }

    fn chain_id(&self) -> u64 {
        self.wallet.chain_id()
    }

    async fn sign_transaction(
        &self,
        tx: &Eip712Transaction,
    ) -> eyre::Result<Signature> {
        eyre::ensure!(
            tx.chain_id == self.chain_id(),
            "Transaction is for chain {} but the signer is bound to chain {}",
            tx.chain_id,
            self.chain_id()
        );

        eyre::ensure!(
            tx.from == self.address(),
            "Transaction sender {:?} is not the signer {:?}",
            tx.from,
            self.address()
        );

        // Validates the factory dependencies before hashing
        tx.digest()?;

        Ok(self.wallet.sign_typed_data(tx).await?)
    }
}
