use ethers::contract::abigen;

abigen!(
    IPaymasterFlow,
    r#"[
        function general(bytes input) external
        function approvalBased(address token, uint256 minAllowance, bytes innerInput) external
    ]"#
);

abigen!(
    ContractDeployer,
    r#"[
        function create(bytes32 salt, bytes32 bytecodeHash, bytes input) external payable returns (address)
    ]"#
);

abigen!(
    NonceHolder,
    r#"[
        function getDeploymentNonce(address account) external view returns (uint256)
    ]"#
);
