// SPDX-License-Identifier: MIT

use crate::common::retry::{is_network_message, retry_async};
use crate::domain::error::EngineError;
use crate::infrastructure::network::provider::HttpProvider;
use alloy::primitives::{Address, Bytes, U256};
use alloy::providers::Provider;
use alloy::sol;
use alloy::sol_types::SolCall;
use std::time::Duration;

sol! {
    #[sol(rpc)]
    interface IERC20 {
        function allowance(address owner, address spender) external view returns (uint256);
        function approve(address spender, uint256 amount) external returns (bool);
        function transferFrom(address from, address to, uint256 amount) external returns (bool);
        function balanceOf(address account) external view returns (uint256);
        function decimals() external view returns (uint8);
    }

    #[sol(rpc)]
    interface IErc4626Vault {
        function deposit(uint256 assets, address receiver) external returns (uint256 shares);
        function redeem(uint256 shares, address receiver, address owner) external returns (uint256 assets);
        function balanceOf(address account) external view returns (uint256);
        function decimals() external view returns (uint8);
    }

    #[sol(rpc)]
    interface ISimpleVault {
        function deposit(uint256 amount) external;
        function withdraw(uint256 shares) external;
        function balanceOf(address account) external view returns (uint256);
        function decimals() external view returns (uint8);
    }
}

const READ_RETRIES: usize = 3;
const READ_BASE_DELAY: Duration = Duration::from_secs(2);

/// RPC gateway for everything the pipeline reads from the chain. Writes
/// are calldata built here but signed and broadcast by the transaction
/// executor, which owns the nonce sequence.
#[derive(Clone)]
pub struct ChainClient {
    provider: HttpProvider,
}

impl ChainClient {
    pub fn new(provider: HttpProvider) -> Self {
        Self { provider }
    }

    pub fn provider(&self) -> &HttpProvider {
        &self.provider
    }

    pub async fn eth_balance(&self, account: Address) -> Result<U256, EngineError> {
        let provider = self.provider.clone();
        retry_async(
            move |_| {
                let provider = provider.clone();
                async move { provider.get_balance(account).await }
            },
            READ_RETRIES,
            READ_BASE_DELAY,
            |e| is_network_message(&e.to_string()),
        )
        .await
        .map_err(|e| EngineError::Connection(format!("ETH balance read failed: {e}")))
    }

    /// Sender nonce including transactions still in the mempool.
    pub async fn pending_nonce(&self, account: Address) -> Result<u64, EngineError> {
        let provider = self.provider.clone();
        retry_async(
            move |_| {
                let provider = provider.clone();
                async move { provider.get_transaction_count(account).pending().await }
            },
            READ_RETRIES,
            READ_BASE_DELAY,
            |e| is_network_message(&e.to_string()),
        )
        .await
        .map_err(|e| EngineError::Connection(format!("Nonce read failed: {e}")))
    }

    pub async fn erc20_balance(&self, token: Address, owner: Address) -> Result<U256, EngineError> {
        let contract = IERC20::new(token, self.provider.clone());
        retry_async(
            move |_| {
                let contract = contract.clone();
                async move { contract.balanceOf(owner).call().await }
            },
            READ_RETRIES,
            READ_BASE_DELAY,
            |e| is_network_message(&e.to_string()),
        )
        .await
        .map_err(|e| EngineError::Connection(format!("balanceOf read failed: {e}")))
    }

    pub async fn erc20_allowance(
        &self,
        token: Address,
        owner: Address,
        spender: Address,
    ) -> Result<U256, EngineError> {
        let contract = IERC20::new(token, self.provider.clone());
        retry_async(
            move |_| {
                let contract = contract.clone();
                async move { contract.allowance(owner, spender).call().await }
            },
            READ_RETRIES,
            READ_BASE_DELAY,
            |e| is_network_message(&e.to_string()),
        )
        .await
        .map_err(|e| EngineError::Connection(format!("allowance read failed: {e}")))
    }

    /// ERC-20 `decimals()`; vault shares are ERC-20s so this also serves
    /// share-decimal discovery.
    pub async fn token_decimals(&self, token: Address) -> Result<u8, EngineError> {
        let contract = IERC20::new(token, self.provider.clone());
        retry_async(
            move |_| {
                let contract = contract.clone();
                async move { contract.decimals().call().await }
            },
            READ_RETRIES,
            READ_BASE_DELAY,
            |e| is_network_message(&e.to_string()),
        )
        .await
        .map_err(|e| EngineError::Connection(format!("decimals read failed: {e}")))
    }

    pub async fn estimate_gas(
        &self,
        request: alloy::rpc::types::eth::TransactionRequest,
    ) -> Result<u64, EngineError> {
        let provider = self.provider.clone();
        retry_async(
            move |_| {
                let provider = provider.clone();
                let request = request.clone();
                async move { provider.estimate_gas(request).await }
            },
            READ_RETRIES,
            READ_BASE_DELAY,
            |e| is_network_message(&e.to_string()),
        )
        .await
        .map_err(|e| EngineError::Connection(format!("Gas estimate failed: {e}")))
    }

    // -- calldata builders -------------------------------------------------

    pub fn approve_calldata(spender: Address, amount: U256) -> Bytes {
        IERC20::approveCall { spender, amount }.abi_encode().into()
    }

    pub fn transfer_from_calldata(from: Address, to: Address, amount: U256) -> Bytes {
        IERC20::transferFromCall { from, to, amount }.abi_encode().into()
    }

    pub fn deposit_4626_calldata(assets: U256, receiver: Address) -> Bytes {
        IErc4626Vault::depositCall { assets, receiver }.abi_encode().into()
    }

    pub fn redeem_4626_calldata(shares: U256, receiver: Address, owner: Address) -> Bytes {
        IErc4626Vault::redeemCall {
            shares,
            receiver,
            owner,
        }
        .abi_encode()
        .into()
    }

    pub fn deposit_simple_calldata(amount: U256) -> Bytes {
        ISimpleVault::depositCall { amount }.abi_encode().into()
    }

    pub fn withdraw_simple_calldata(shares: U256) -> Bytes {
        ISimpleVault::withdrawCall { shares }.abi_encode().into()
    }
}
