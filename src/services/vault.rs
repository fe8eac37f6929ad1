// SPDX-License-Identifier: MIT

use crate::app::config::{VaultKind, VaultSettings};
use crate::common::units;
use crate::domain::error::EngineError;
use crate::infrastructure::data::token_registry::TokenDescriptor;
use crate::infrastructure::network::chain::ChainClient;
use crate::services::executor::TransactionExecutor;
use alloy::primitives::{Address, Bytes, U256};
use dashmap::DashMap;
use std::sync::Arc;

/// A vault deployment resolved for execution: the configured form plus
/// the share decimals all arithmetic runs at.
#[derive(Debug, Clone)]
pub struct VaultTarget {
    pub address: Address,
    pub kind: VaultKind,
    pub share_decimals: u8,
}

#[derive(Debug, Clone)]
pub struct DepositOutcome {
    /// Human-unit share delta at the vault's decimals.
    pub share_tokens: String,
    pub deposit_tx_hash: String,
}

#[derive(Debug, Clone)]
pub struct WithdrawOutcome {
    pub withdraw_tx_hash: String,
}

/// Post-swap deposit of received assets into a configured vault. The only
/// trusted number is the measured share-balance delta.
pub struct VaultGateway {
    chain: ChainClient,
    executor: Arc<TransactionExecutor>,
    // decimals() is immutable vault metadata; read once.
    decimals_cache: DashMap<Address, u8>,
}

impl VaultGateway {
    pub fn new(chain: ChainClient, executor: Arc<TransactionExecutor>) -> Self {
        Self {
            chain,
            executor,
            decimals_cache: DashMap::new(),
        }
    }

    /// Resolve deployment configuration into an executable target. The
    /// configured `share_decimals` wins over the on-chain read for vaults
    /// with broken metadata.
    pub async fn resolve(&self, settings: &VaultSettings) -> Result<VaultTarget, EngineError> {
        let share_decimals = match settings.share_decimals {
            Some(configured) => configured,
            None => self.share_decimals(settings.address).await?,
        };
        Ok(VaultTarget {
            address: settings.address,
            kind: settings.kind,
            share_decimals,
        })
    }

    pub async fn deposit(
        &self,
        token: &TokenDescriptor,
        vault: &VaultTarget,
        amount: U256,
        user: Address,
    ) -> Result<DepositOutcome, EngineError> {
        let executor_addr = self.executor.address();

        let held = self.chain.erc20_balance(token.address, executor_addr).await?;
        if held < amount {
            return Err(EngineError::InsufficientBalance {
                token: token.symbol.clone(),
                required: amount.to_string(),
                available: held.to_string(),
            });
        }

        self.ensure_vault_allowance(token.address, vault.address, amount)
            .await?;

        // The account credited with shares depends on the deposit form.
        let share_holder = match vault.kind {
            VaultKind::Erc4626 => user,
            VaultKind::Simple => executor_addr,
        };
        let before = self.chain.erc20_balance(vault.address, share_holder).await?;

        let data: Bytes = match vault.kind {
            VaultKind::Erc4626 => ChainClient::deposit_4626_calldata(amount, user),
            VaultKind::Simple => ChainClient::deposit_simple_calldata(amount),
        };
        let outcome = self
            .executor
            .send_call("vault:deposit", vault.address, data, U256::ZERO)
            .await?;

        let after = self.chain.erc20_balance(vault.address, share_holder).await?;
        let shares = after.saturating_sub(before);

        tracing::info!(
            target: "vault",
            vault = %format!("{:#x}", vault.address),
            token = %token.symbol,
            shares = %shares,
            tx_hash = %outcome.final_tx_hash,
            "Vault deposit confirmed"
        );

        Ok(DepositOutcome {
            share_tokens: units::from_atomic(shares, vault.share_decimals),
            deposit_tx_hash: outcome.final_tx_hash,
        })
    }

    /// Redeem shares back to assets. The caller measures the assets
    /// actually received by diffing the executor's token balance.
    pub async fn withdraw(
        &self,
        vault: &VaultTarget,
        shares: U256,
        user: Address,
    ) -> Result<WithdrawOutcome, EngineError> {
        let data: Bytes = match vault.kind {
            VaultKind::Erc4626 => {
                ChainClient::redeem_4626_calldata(shares, self.executor.address(), user)
            }
            VaultKind::Simple => ChainClient::withdraw_simple_calldata(shares),
        };
        let outcome = self
            .executor
            .send_call("vault:withdraw", vault.address, data, U256::ZERO)
            .await?;
        Ok(WithdrawOutcome {
            withdraw_tx_hash: outcome.final_tx_hash,
        })
    }

    async fn ensure_vault_allowance(
        &self,
        token: Address,
        vault: Address,
        amount: U256,
    ) -> Result<(), EngineError> {
        let executor_addr = self.executor.address();
        let allowance = self.chain.erc20_allowance(token, executor_addr, vault).await?;
        if allowance >= amount {
            return Ok(());
        }
        let data = ChainClient::approve_calldata(vault, U256::MAX);
        self.executor
            .send_call("vault:approve", token, data, U256::ZERO)
            .await?;
        Ok(())
    }

    async fn share_decimals(&self, vault: Address) -> Result<u8, EngineError> {
        if let Some(cached) = self.decimals_cache.get(&vault) {
            return Ok(*cached);
        }
        let decimals = self.chain.token_decimals(vault).await?;
        self.decimals_cache.insert(vault, decimals);
        Ok(decimals)
    }
}
