//! zkSync Era transaction plumbing: the type `0x71` EIP-712 transaction that
//! carries paymaster metadata, the system contract deployer calldata and the
//! address derivation rules used for contract creation.

use std::convert::Infallible;

use ethers::abi::{self, AbiEncode, Token};
use ethers::types::transaction::eip712::{EIP712Domain, Eip712};
use ethers::types::{Address, Bytes, Signature, H160, H256, U256};
use ethers::utils::{keccak256, rlp};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::abis::CreateCall;
use crate::paymaster::PaymasterParams;

pub const EIP712_TX_TYPE: u8 = 0x71;

/// The `ContractDeployer` system contract every creation is routed through.
pub const CONTRACT_DEPLOYER_ADDRESS: Address = H160([
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x80, 0x06,
]);

/// The `NonceHolder` system contract, keeper of the per-account deployment
/// nonce `create` derives addresses from.
pub const NONCE_HOLDER_ADDRESS: Address = H160([
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x80, 0x03,
]);

const EIP712_TRANSACTION_TYPE: &str = "Transaction(uint256 txType,uint256 from,uint256 to,uint256 gasLimit,uint256 gasPerPubdataByteLimit,uint256 maxFeePerGas,uint256 maxPriorityFeePerGas,uint256 paymaster,uint256 nonce,uint256 value,bytes data,bytes32[] factoryDeps,bytes paymasterInput)";

const MAX_BYTECODE_WORDS: usize = u16::MAX as usize;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum BytecodeError {
    #[error("bytecode is empty")]
    Empty,
    #[error("bytecode length {0} is not a multiple of 32")]
    NotWordAligned(usize),
    #[error("bytecode has an even number of words ({0})")]
    EvenWordCount(usize),
    #[error("bytecode is too long ({0} words)")]
    TooLong(usize),
}

/// Versioned hash zkSync uses to identify bytecode: `sha256` with the first
/// four bytes replaced by the version marker and the length in words.
pub fn hash_bytecode(bytecode: &[u8]) -> Result<H256, BytecodeError> {
    if bytecode.is_empty() {
        return Err(BytecodeError::Empty);
    }

    if bytecode.len() % 32 != 0 {
        return Err(BytecodeError::NotWordAligned(bytecode.len()));
    }

    let words = bytecode.len() / 32;

    if words > MAX_BYTECODE_WORDS {
        return Err(BytecodeError::TooLong(words));
    }

    if words % 2 == 0 {
        return Err(BytecodeError::EvenWordCount(words));
    }

    let digest = Sha256::digest(bytecode);

    let mut hash = [0u8; 32];
    hash.copy_from_slice(&digest);
    hash[0] = 1;
    hash[1] = 0;
    hash[2..4].copy_from_slice(&(words as u16).to_be_bytes());

    Ok(H256(hash))
}

/// Calldata for `ContractDeployer.create` with a zero salt.
pub fn create_calldata(bytecode_hash: H256, constructor_input: Bytes) -> Bytes {
    CreateCall {
        salt: [0u8; 32],
        bytecode_hash: bytecode_hash.0,
        input: constructor_input,
    }
    .encode()
    .into()
}

#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    clap::ValueEnum,
    strum::Display,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum AddressDerivation {
    /// `keccak256(rlp([sender, nonce]))`
    Evm,
    /// `keccak256(keccak256("zksyncCreate") ++ sender ++ nonce)`, where
    /// `nonce` is the account's deployment nonce held by `NonceHolder`
    #[default]
    #[serde(rename = "zksync")]
    #[value(name = "zksync")]
    #[strum(serialize = "zksync")]
    ZkSync,
}

impl AddressDerivation {
    /// Picks the nonce this derivation hashes, the transaction nonce for
    /// `Evm` and the deployment nonce for `ZkSync`.
    pub fn creation_nonce(self, tx_nonce: U256, deployment_nonce: U256) -> U256 {
        match self {
            Self::Evm => tx_nonce,
            Self::ZkSync => deployment_nonce,
        }
    }

    pub fn contract_address(self, sender: Address, nonce: U256) -> Address {
        match self {
            Self::Evm => ethers::utils::get_contract_address(sender, nonce),
            Self::ZkSync => {
                let prefix = keccak256(b"zksyncCreate");

                let mut nonce_bytes = [0u8; 32];
                nonce.to_big_endian(&mut nonce_bytes);

                let mut preimage = Vec::with_capacity(96);
                preimage.extend_from_slice(&prefix);
                preimage.extend_from_slice(H256::from(sender).as_bytes());
                preimage.extend_from_slice(&nonce_bytes);

                Address::from_slice(&keccak256(preimage)[12..])
            }
        }
    }
}

/// Fees returned by `zks_estimateFee`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fee {
    pub gas_limit: U256,
    pub gas_per_pubdata_limit: U256,
    pub max_fee_per_gas: U256,
    pub max_priority_fee_per_gas: U256,
}

/// An unsigned zkSync EIP-712 transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Eip712Transaction {
    pub chain_id: u64,
    pub from: Address,
    pub to: Address,
    pub nonce: U256,
    pub value: U256,
    pub data: Bytes,
    pub gas_limit: U256,
    pub max_fee_per_gas: U256,
    pub max_priority_fee_per_gas: U256,
    pub gas_per_pubdata: U256,
    /// Full bytecodes; only their hashes are part of the signed struct.
    pub factory_deps: Vec<Bytes>,
    pub paymaster_params: Option<PaymasterParams>,
}

impl Eip712Transaction {
    pub fn apply_fee(&mut self, fee: &Fee) {
        self.gas_limit = fee.gas_limit;
        self.max_fee_per_gas = fee.max_fee_per_gas;
        self.max_priority_fee_per_gas = fee.max_priority_fee_per_gas;
    }

    fn paymaster(&self) -> Address {
        self.paymaster_params
            .as_ref()
            .map(|params| params.paymaster)
            .unwrap_or_default()
    }

    fn paymaster_input(&self) -> Bytes {
        self.paymaster_params
            .as_ref()
            .map(|params| params.paymaster_input.clone())
            .unwrap_or_default()
    }

    fn factory_dep_hashes(&self) -> Result<Vec<H256>, BytecodeError> {
        self.factory_deps
            .iter()
            .map(|dep| hash_bytecode(dep))
            .collect()
    }

    pub fn digest(&self) -> Result<H256, BytecodeError> {
        // Hashes are validated up front so `encode_eip712` cannot fail
        self.factory_dep_hashes()?;

        let digest = self
            .encode_eip712()
            .unwrap_or_else(|never: Infallible| match never {});

        Ok(H256(digest))
    }

    /// `0x71 || rlp(fields)`, ready for `eth_sendRawTransaction`.
    pub fn rlp_signed(&self, signature: &Signature) -> Bytes {
        let mut stream = rlp::RlpStream::new();
        stream.begin_unbounded_list();

        stream.append(&self.nonce);
        stream.append(&self.max_priority_fee_per_gas);
        stream.append(&self.max_fee_per_gas);
        stream.append(&self.gas_limit);
        stream.append(&self.to);
        stream.append(&self.value);
        stream.append(&self.data.to_vec());

        let y_parity = signature.v.saturating_sub(27);
        stream.append(&y_parity);
        stream.append(&signature.r);
        stream.append(&signature.s);

        stream.append(&self.chain_id);
        stream.append(&self.from);
        stream.append(&self.gas_per_pubdata);

        stream.begin_list(self.factory_deps.len());
        for dep in &self.factory_deps {
            stream.append(&dep.to_vec());
        }

        stream.append(&signature.to_vec());

        match self.paymaster_params.as_ref() {
            Some(params) => {
                stream.begin_list(2);
                stream.append(&params.paymaster);
                stream.append(&params.paymaster_input.to_vec());
            }
            None => {
                stream.begin_list(0);
            }
        }

        stream.finalize_unbounded_list();

        let mut raw = vec![EIP712_TX_TYPE];
        raw.extend_from_slice(stream.as_raw());

        raw.into()
    }

    /// JSON body for `zks_estimateFee`.
    pub fn call_request(&self) -> CallRequest {
        CallRequest {
            from: self.from,
            to: self.to,
            value: self.value,
            data: self.data.clone(),
            transaction_type: U256::from(EIP712_TX_TYPE),
            eip712_meta: Eip712Meta {
                gas_per_pubdata: self.gas_per_pubdata,
                factory_deps: self
                    .factory_deps
                    .iter()
                    .map(|dep| dep.to_vec())
                    .collect(),
                custom_signature: None,
                paymaster_params: self.paymaster_params.as_ref().map(
                    |params| Eip712PaymasterParams {
                        paymaster: params.paymaster,
                        paymaster_input: params.paymaster_input.to_vec(),
                    },
                ),
            },
        }
    }
}

impl Eip712 for Eip712Transaction {
    type Error = Infallible;

    fn domain(&self) -> Result<EIP712Domain, Self::Error> {
        Ok(EIP712Domain {
            name: Some("zkSync".to_string()),
            version: Some("2".to_string()),
            chain_id: Some(U256::from(self.chain_id)),
            verifying_contract: None,
            salt: None,
        })
    }

    fn type_hash() -> Result<[u8; 32], Self::Error> {
        Ok(keccak256(EIP712_TRANSACTION_TYPE))
    }

    fn struct_hash(&self) -> Result<[u8; 32], Self::Error> {
        let dep_hashes: Vec<u8> = self
            .factory_dep_hashes()
            .unwrap_or_default()
            .iter()
            .flat_map(|hash| hash.0)
            .collect();

        let as_uint = |address: Address| {
            Token::Uint(U256::from_big_endian(address.as_bytes()))
        };

        let encoded = abi::encode(&[
            Token::FixedBytes(Self::type_hash()?.to_vec()),
            Token::Uint(U256::from(EIP712_TX_TYPE)),
            as_uint(self.from),
            as_uint(self.to),
            Token::Uint(self.gas_limit),
            Token::Uint(self.gas_per_pubdata),
            Token::Uint(self.max_fee_per_gas),
            Token::Uint(self.max_priority_fee_per_gas),
            as_uint(self.paymaster()),
            Token::Uint(self.nonce),
            Token::Uint(self.value),
            Token::FixedBytes(keccak256(&self.data).to_vec()),
            Token::FixedBytes(keccak256(dep_hashes).to_vec()),
            Token::FixedBytes(keccak256(self.paymaster_input()).to_vec()),
        ]);

        Ok(keccak256(encoded))
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CallRequest {
    pub from: Address,
    pub to: Address,
    pub value: U256,
    pub data: Bytes,
    #[serde(rename = "type")]
    pub transaction_type: U256,
    pub eip712_meta: Eip712Meta,
}

// The node expects raw byte arrays here, not hex strings
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Eip712Meta {
    pub gas_per_pubdata: U256,
    pub factory_deps: Vec<Vec<u8>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub custom_signature: Option<Vec<u8>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub paymaster_params: Option<Eip712PaymasterParams>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Eip712PaymasterParams {
    pub paymaster: Address,
    pub paymaster_input: Vec<u8>,
}
