use std::collections::{BTreeMap, HashSet, VecDeque};
use std::fmt;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use ethers::abi::token::{LenientTokenizer, Tokenizer};
use ethers::abi::{self, Abi, Token};
use ethers::types::Bytes;
use eyre::Context;
use serde::Deserialize;
use tracing::{debug, instrument};

use crate::error::DeploymentError;

/// Compiled contract: bytecode plus the ABI whose constructor describes the
/// deployment arguments.
#[derive(Debug, Clone)]
pub struct ContractArtifact {
    pub contract_name: String,
    pub abi: Abi,
    pub bytecode: Bytes,
    /// Bytecode of contracts this one can deploy, shipped alongside it.
    pub factory_deps: Vec<Bytes>,
}

/// A single constructor argument, either still textual (as given on the
/// command line) or already typed.
#[derive(Debug, Clone, PartialEq)]
pub enum ConstructorArg {
    Text(String),
    Token(Token),
}

impl From<&str> for ConstructorArg {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for ConstructorArg {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<Token> for ConstructorArg {
    fn from(value: Token) -> Self {
        Self::Token(value)
    }
}

impl fmt::Display for ConstructorArg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text(text) => write!(f, "{text}"),
            Self::Token(token) => write!(f, "{token}"),
        }
    }
}

impl ContractArtifact {
    /// ABI-encodes `args` against the constructor, without the bytecode
    /// prefix.
    pub fn encode_constructor_args(
        &self,
        args: &[ConstructorArg],
    ) -> Result<Bytes, DeploymentError> {
        let params = self
            .abi
            .constructor
            .as_ref()
            .map(|constructor| constructor.inputs.as_slice())
            .unwrap_or_default();

        if params.len() != args.len() {
            return Err(DeploymentError::ArgumentMismatch(format!(
                "{} expects {} constructor argument(s), got {}",
                self.contract_name,
                params.len(),
                args.len()
            )));
        }

        let mut tokens = Vec::with_capacity(args.len());

        for (param, arg) in params.iter().zip(args) {
            let token = match arg {
                ConstructorArg::Text(text) => {
                    LenientTokenizer::tokenize(&param.kind, text).map_err(
                        |err| {
                            DeploymentError::ArgumentMismatch(format!(
                                "{} ({}): cannot parse {text:?}: {err}",
                                param.name, param.kind
                            ))
                        },
                    )?
                }
                ConstructorArg::Token(token) => {
                    if !token.type_check(&param.kind) {
                        return Err(DeploymentError::ArgumentMismatch(
                            format!(
                                "{} ({}): {token} has the wrong type",
                                param.name, param.kind
                            ),
                        ));
                    }

                    token.clone()
                }
            };

            tokens.push(token);
        }

        Ok(abi::encode(&tokens).into())
    }
}

#[async_trait]
pub trait ArtifactLoader: Send + Sync {
    async fn load(&self, name: &str) -> eyre::Result<ContractArtifact>;
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct HardhatArtifact {
    contract_name: String,
    abi: Abi,
    bytecode: Bytes,
    /// Bytecode hash to qualified contract name, ordered by hash.
    #[serde(default)]
    factory_deps: BTreeMap<String, String>,
}

/// Reads artifacts in the layout produced by hardhat's zksolc plugin:
/// `<root>/<source path>/<Contract>.json`.
#[derive(Debug, Clone)]
pub struct HardhatArtifactLoader {
    root: PathBuf,
}

impl HardhatArtifactLoader {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_owned(),
        }
    }

    async fn find(&self, name: &str) -> eyre::Result<PathBuf> {
        // Fully qualified: `contracts/Token.sol:Token`
        if let Some((source, contract)) = name.rsplit_once(':') {
            let path = self.root.join(source).join(format!("{contract}.json"));

            eyre::ensure!(
                path.exists(),
                "Artifact {name} not found at {}",
                path.display()
            );

            return Ok(path);
        }

        let file_name = format!("{name}.json");
        let mut found = Vec::new();
        let mut dirs = vec![self.root.clone()];

        while let Some(dir) = dirs.pop() {
            let mut entries = tokio::fs::read_dir(&dir)
                .await
                .with_context(|| format!("Reading {}", dir.display()))?;

            while let Some(entry) = entries.next_entry().await? {
                let path = entry.path();

                if entry.file_type().await?.is_dir() {
                    dirs.push(path);
                } else if entry.file_name().to_string_lossy() == file_name {
                    found.push(path);
                }
            }
        }

        match found.len() {
            0 => eyre::bail!(
                "Artifact {name} not found in {}",
                self.root.display()
            ),
            1 => Ok(found.remove(0)),
            _ => eyre::bail!(
                "Multiple artifacts named {name}, use the fully qualified name: {found:?}"
            ),
        }
    }

    async fn load_hardhat_artifact(
        &self,
        name: &str,
    ) -> eyre::Result<HardhatArtifact> {
        let path = self.find(name).await?;

        let content = tokio::fs::read_to_string(&path)
            .await
            .with_context(|| format!("Reading from {}", path.display()))?;

        serde_json::from_str(&content)
            .with_context(|| format!("Parsing artifact {}", path.display()))
    }
}

#[async_trait]
impl ArtifactLoader for HardhatArtifactLoader {
    #[instrument(skip(self))]
    async fn load(&self, name: &str) -> eyre::Result<ContractArtifact> {
        let artifact = self.load_hardhat_artifact(name).await?;

        let mut factory_deps = Vec::new();
        let mut seen = HashSet::new();
        let mut queue: VecDeque<String> =
            artifact.factory_deps.values().cloned().collect();

        while let Some(dep) = queue.pop_front() {
            if !seen.insert(dep.clone()) {
                continue;
            }

            debug!(%dep, "Loading factory dependency");

            let dep_artifact = self
                .load_hardhat_artifact(&dep)
                .await
                .with_context(|| format!("Factory dependency of {name}"))?;

            queue.extend(dep_artifact.factory_deps.values().cloned());

            if dep_artifact.bytecode != artifact.bytecode
                && !factory_deps.contains(&dep_artifact.bytecode)
            {
                factory_deps.push(dep_artifact.bytecode);
            }
        }

        let bytecode = artifact.bytecode;
        eyre::ensure!(!bytecode.is_empty(), "Artifact {name} has no bytecode");

        Ok(ContractArtifact {
            contract_name: artifact.contract_name,
            abi: artifact.abi,
            bytecode,
            factory_deps,
        })
    }
}

/// Contract name part of a possibly fully qualified artifact name.
pub fn contract_name(name: &str) -> &str {
    name.rsplit_once(':')
        .map(|(_, contract)| contract)
        .unwrap_or(name)
}

#[cfg(test)]
pub(crate) mod tests {
    use ethers::types::U256;
    use indoc::indoc;

    use super::*;

    pub const SINGLE_UINT_ABI: &str = indoc! {r#"
        [
            {
                "inputs": [{ "internalType": "uint256", "name": "initialSupply", "type": "uint256" }],
                "stateMutability": "nonpayable",
                "type": "constructor"
            },
            {
                "inputs": [],
                "name": "totalSupply",
                "outputs": [{ "internalType": "uint256", "name": "", "type": "uint256" }],
                "stateMutability": "view",
                "type": "function"
            }
        ]
    "#};

    pub fn artifact_with_abi(abi: &str) -> ContractArtifact {
        ContractArtifact {
            contract_name: "SPHNX".to_string(),
            abi: serde_json::from_str(abi).unwrap(),
            bytecode: Bytes::from(vec![0u8; 32]),
            factory_deps: vec![],
        }
    }

    #[test]
    fn encodes_single_integer_argument() {
        let artifact = artifact_with_abi(SINGLE_UINT_ABI);

        let encoded = artifact
            .encode_constructor_args(&["2500000".into()])
            .unwrap();

        assert_eq!(encoded.len(), 32);
        assert_eq!(U256::from_big_endian(&encoded), U256::from(2_500_000));
    }

    #[test]
    fn typed_arguments_are_type_checked() {
        let artifact = artifact_with_abi(SINGLE_UINT_ABI);

        let encoded = artifact
            .encode_constructor_args(&[Token::Uint(U256::from(7)).into()])
            .unwrap();
        assert_eq!(U256::from_big_endian(&encoded), U256::from(7));

        let err = artifact
            .encode_constructor_args(&[Token::Bool(true).into()])
            .unwrap_err();
        assert!(matches!(err, DeploymentError::ArgumentMismatch(_)));
    }

    #[test]
    fn arity_mismatch() {
        let artifact = artifact_with_abi(SINGLE_UINT_ABI);

        let err = artifact.encode_constructor_args(&[]).unwrap_err();
        assert!(matches!(err, DeploymentError::ArgumentMismatch(_)));

        let err = artifact
            .encode_constructor_args(&["1".into(), "2".into()])
            .unwrap_err();
        assert!(matches!(err, DeploymentError::ArgumentMismatch(_)));
    }

    #[test]
    fn unparsable_argument() {
        let artifact = artifact_with_abi(SINGLE_UINT_ABI);

        let err = artifact
            .encode_constructor_args(&["two and a half million".into()])
            .unwrap_err();

        assert!(matches!(err, DeploymentError::ArgumentMismatch(_)));
    }

    #[test]
    fn no_constructor_takes_no_arguments() {
        let artifact = artifact_with_abi("[]");

        assert!(artifact.encode_constructor_args(&[]).unwrap().is_empty());

        let err = artifact
            .encode_constructor_args(&["1".into()])
            .unwrap_err();
        assert!(matches!(err, DeploymentError::ArgumentMismatch(_)));
    }

    #[test]
    fn qualified_contract_names() {
        assert_eq!(contract_name("contracts/SPHNX.sol:SPHNX"), "SPHNX");
        assert_eq!(contract_name("SPHNX"), "SPHNX");
    }

    async fn write_artifact(
        root: &Path,
        source: &str,
        name: &str,
        bytecode: &str,
        factory_deps: &[(&str, &str)],
    ) -> eyre::Result<()> {
        let dir = root.join(source);
        tokio::fs::create_dir_all(&dir).await?;

        let factory_deps: BTreeMap<_, _> = factory_deps.iter().copied().collect();

        let artifact = serde_json::json!({
            "_format": "hh-zksolc-artifact-1",
            "contractName": name,
            "sourceName": source,
            "abi": serde_json::from_str::<serde_json::Value>(SINGLE_UINT_ABI)?,
            "bytecode": bytecode,
            "deployedBytecode": bytecode,
            "linkReferences": {},
            "deployedLinkReferences": {},
            "factoryDeps": factory_deps,
        });

        tokio::fs::write(
            dir.join(format!("{name}.json")),
            serde_json::to_string_pretty(&artifact)?,
        )
        .await?;

        tokio::fs::write(dir.join(format!("{name}.dbg.json")), "{}").await?;

        Ok(())
    }

    #[tokio::test]
    async fn loads_artifact_with_factory_deps() -> eyre::Result<()> {
        let dir = tempfile::tempdir()?;
        let word = |byte: u8| format!("0x{}", hex::encode([byte; 32]));

        write_artifact(
            dir.path(),
            "contracts/Factory.sol",
            "Factory",
            &word(1),
            &[("0x01", "contracts/Child.sol:Child")],
        )
        .await?;
        write_artifact(
            dir.path(),
            "contracts/Child.sol",
            "Child",
            &word(2),
            &[("0x02", "contracts/Grandchild.sol:Grandchild")],
        )
        .await?;
        write_artifact(
            dir.path(),
            "contracts/Grandchild.sol",
            "Grandchild",
            &word(3),
            &[],
        )
        .await?;

        let loader = HardhatArtifactLoader::new(dir.path());
        let artifact = loader.load("Factory").await?;

        assert_eq!(artifact.contract_name, "Factory");
        assert_eq!(artifact.bytecode, Bytes::from(vec![1u8; 32]));
        assert_eq!(
            artifact.factory_deps,
            vec![Bytes::from(vec![2u8; 32]), Bytes::from(vec![3u8; 32])]
        );
        assert!(artifact.abi.constructor.is_some());

        let qualified = loader.load("contracts/Child.sol:Child").await?;
        assert_eq!(qualified.contract_name, "Child");

        Ok(())
    }

    #[tokio::test]
    async fn factory_deps_are_ordered_by_hash() -> eyre::Result<()> {
        let dir = tempfile::tempdir()?;
        let word = |byte: u8| format!("0x{}", hex::encode([byte; 32]));

        write_artifact(
            dir.path(),
            "contracts/Factory.sol",
            "Factory",
            &word(1),
            &[
                ("0x0c", "contracts/C.sol:C"),
                ("0x0a", "contracts/A.sol:A"),
                ("0x0b", "contracts/B.sol:B"),
            ],
        )
        .await?;
        for (name, byte) in [("A", 0xa), ("B", 0xb), ("C", 0xc)] {
            write_artifact(
                dir.path(),
                &format!("contracts/{name}.sol"),
                name,
                &word(byte),
                &[],
            )
            .await?;
        }

        let loader = HardhatArtifactLoader::new(dir.path());
        let expected = vec![
            Bytes::from(vec![0xa; 32]),
            Bytes::from(vec![0xb; 32]),
            Bytes::from(vec![0xc; 32]),
        ];

        for _ in 0..3 {
            assert_eq!(loader.load("Factory").await?.factory_deps, expected);
        }

        Ok(())
    }

    #[tokio::test]
    async fn missing_artifact() -> eyre::Result<()> {
        let dir = tempfile::tempdir()?;
        let loader = HardhatArtifactLoader::new(dir.path());

        assert!(loader.load("Nope").await.is_err());

        Ok(())
    }
}
