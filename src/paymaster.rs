use std::fmt;
use std::str::FromStr;

use ethers::abi::{AbiDecode, AbiEncode};
use ethers::types::{Address, Bytes, U256};
use hex_literal::hex;
use serde::{Deserialize, Serialize};

use crate::abis::{ApprovalBasedCall, GeneralCall, IPaymasterFlowCalls};
use crate::error::DeploymentError;

/// `general(bytes)`
pub const GENERAL_SELECTOR: [u8; 4] = hex!("8c5a3445");
/// `approvalBased(address,uint256,bytes)`
pub const APPROVAL_BASED_SELECTOR: [u8; 4] = hex!("949431dc");

/// A token amount as the user wrote it, sign included.
///
/// The magnitude spans the whole `uint256` range; only negative amounts are
/// refused when encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Allowance {
    negative: bool,
    magnitude: U256,
}

impl Allowance {
    pub fn new(magnitude: U256) -> Self {
        Self {
            negative: false,
            magnitude,
        }
    }

    pub fn negative(magnitude: U256) -> Self {
        Self {
            negative: !magnitude.is_zero(),
            magnitude,
        }
    }

    pub fn is_negative(&self) -> bool {
        self.negative
    }

    fn to_uint(self) -> Result<U256, DeploymentError> {
        if self.negative {
            return Err(DeploymentError::InvalidAllowance(format!(
                "minimal allowance must not be negative, got {self}"
            )));
        }

        Ok(self.magnitude)
    }
}

impl From<U256> for Allowance {
    fn from(magnitude: U256) -> Self {
        Self::new(magnitude)
    }
}

impl fmt::Display for Allowance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.negative {
            write!(f, "-")?;
        }

        write!(f, "{}", self.magnitude)
    }
}

impl FromStr for Allowance {
    type Err = DeploymentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let (negative, digits) = match trimmed.strip_prefix('-') {
            Some(digits) => (true, digits),
            None => (false, trimmed.strip_prefix('+').unwrap_or(trimmed)),
        };

        if digits.is_empty() {
            return Err(DeploymentError::InvalidAllowance(format!(
                "{s}: no digits"
            )));
        }

        let magnitude = U256::from_dec_str(digits).map_err(|err| {
            DeploymentError::InvalidAllowance(format!("{s}: {err}"))
        })?;

        Ok(if negative {
            Self::negative(magnitude)
        } else {
            Self::new(magnitude)
        })
    }
}

/// How the paymaster is asked to sponsor the transaction.
#[derive(Debug, Clone, PartialEq, Eq, strum::IntoStaticStr)]
#[strum(serialize_all = "snake_case")]
pub enum PaymasterMode {
    General {
        inner_input: Bytes,
    },
    ApprovalBased {
        token: Address,
        min_allowance: Allowance,
        inner_input: Bytes,
    },
}

impl PaymasterMode {
    pub fn general() -> Self {
        Self::General {
            inner_input: Bytes::default(),
        }
    }

    pub fn name(&self) -> &'static str {
        self.into()
    }

    /// Recovers the mode from an encoded `paymasterInput`.
    pub fn decode(paymaster_input: &[u8]) -> eyre::Result<Self> {
        let call = IPaymasterFlowCalls::decode(paymaster_input)
            .map_err(|err| eyre::eyre!("Unknown paymaster flow: {err}"))?;

        let mode = match call {
            IPaymasterFlowCalls::General(GeneralCall { input }) => {
                Self::General { inner_input: input }
            }
            IPaymasterFlowCalls::ApprovalBased(ApprovalBasedCall {
                token,
                min_allowance,
                inner_input,
            }) => Self::ApprovalBased {
                token,
                min_allowance: Allowance::new(min_allowance),
                inner_input,
            },
        };

        Ok(mode)
    }

    fn encode(&self) -> Result<Bytes, DeploymentError> {
        let encoded = match self {
            Self::General { inner_input } => GeneralCall {
                input: inner_input.clone(),
            }
            .encode(),
            Self::ApprovalBased {
                token,
                min_allowance,
                inner_input,
            } => ApprovalBasedCall {
                token: *token,
                min_allowance: min_allowance.to_uint()?,
                inner_input: inner_input.clone(),
            }
            .encode(),
        };

        Ok(encoded.into())
    }
}

/// Sponsorship data attached to a transaction's EIP-712 metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymasterParams {
    pub paymaster: Address,
    pub paymaster_input: Bytes,
}

impl PaymasterParams {
    pub fn mode(&self) -> eyre::Result<PaymasterMode> {
        PaymasterMode::decode(&self.paymaster_input)
    }
}

/// Parses a hex encoded address, refusing anything that isn't exactly 20
/// bytes long.
pub fn parse_address(s: &str) -> Result<Address, DeploymentError> {
    let trimmed = s.trim();
    let hex_part = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed);

    let bytes = hex::decode(hex_part).map_err(|err| {
        DeploymentError::InvalidAddress(format!("{s}: {err}"))
    })?;

    address_from_slice(&bytes)
}

pub fn address_from_slice(bytes: &[u8]) -> Result<Address, DeploymentError> {
    if bytes.len() != Address::len_bytes() {
        return Err(DeploymentError::InvalidAddress(format!(
            "0x{}: expected 20 bytes, got {}",
            hex::encode(bytes),
            bytes.len()
        )));
    }

    Ok(Address::from_slice(bytes))
}

/// Encodes a sponsorship request for the paymaster at `paymaster_address`.
///
/// Pure and deterministic: identical inputs always produce identical params.
pub fn build(
    paymaster_address: &str,
    mode: &PaymasterMode,
) -> Result<PaymasterParams, DeploymentError> {
    let paymaster = parse_address(paymaster_address)?;

    build_for_address(paymaster, mode)
}

pub fn build_for_address(
    paymaster: Address,
    mode: &PaymasterMode,
) -> Result<PaymasterParams, DeploymentError> {
    Ok(PaymasterParams {
        paymaster,
        paymaster_input: mode.encode()?,
    })
}
