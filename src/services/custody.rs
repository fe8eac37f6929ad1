// SPDX-License-Identifier: MIT

use crate::domain::error::EngineError;
use crate::infrastructure::data::token_registry::TokenDescriptor;
use crate::infrastructure::network::chain::ChainClient;
use crate::services::executor::TransactionExecutor;
use alloy::primitives::{Address, U256};
use std::sync::Arc;

/// Guarantees the executor holds the swap amount and the router can pull
/// it before any quote transaction is broadcast.
pub struct CustodyManager {
    chain: ChainClient,
    executor: Arc<TransactionExecutor>,
    router: Address,
}

impl CustodyManager {
    pub fn new(chain: ChainClient, executor: Arc<TransactionExecutor>, router: Address) -> Self {
        Self {
            chain,
            executor,
            router,
        }
    }

    pub async fn ensure_custody(
        &self,
        token: &TokenDescriptor,
        atomic_amount: U256,
        user: Address,
    ) -> Result<(), EngineError> {
        let executor_addr = self.executor.address();

        if user == executor_addr {
            // Self-execution: the executor's own funds, only the router
            // allowance matters.
            self.ensure_router_allowance(token, user, atomic_amount).await
        } else {
            self.ensure_router_allowance(token, executor_addr, atomic_amount)
                .await?;
            self.pull_from_user(token, atomic_amount, user, executor_addr)
                .await
        }
    }

    async fn ensure_router_allowance(
        &self,
        token: &TokenDescriptor,
        owner: Address,
        atomic_amount: U256,
    ) -> Result<(), EngineError> {
        let allowance = self
            .chain
            .erc20_allowance(token.address, owner, self.router)
            .await?;
        if allowance >= atomic_amount {
            return Ok(());
        }

        tracing::info!(
            target: "custody",
            token = %token.symbol,
            router = %format!("{:#x}", self.router),
            "Granting max router allowance"
        );
        let data = ChainClient::approve_calldata(self.router, U256::MAX);
        self.executor
            .send_call("custody:approve", token.address, data, U256::ZERO)
            .await?;
        Ok(())
    }

    async fn pull_from_user(
        &self,
        token: &TokenDescriptor,
        atomic_amount: U256,
        user: Address,
        executor_addr: Address,
    ) -> Result<(), EngineError> {
        // A prior partial run may have left the funds in place already;
        // pulling again would double-draw the user.
        let held = self.chain.erc20_balance(token.address, executor_addr).await?;
        if held >= atomic_amount {
            tracing::debug!(
                target: "custody",
                token = %token.symbol,
                held = %held,
                "Executor already funded; skipping transferFrom"
            );
            return Ok(());
        }

        let approved = self
            .chain
            .erc20_allowance(token.address, user, executor_addr)
            .await?;
        if approved < atomic_amount {
            return Err(EngineError::InsufficientUserApproval {
                required: atomic_amount.to_string(),
                approved: approved.to_string(),
            });
        }

        tracing::info!(
            target: "custody",
            token = %token.symbol,
            amount = %atomic_amount,
            user = %format!("{:#x}", user),
            "Pulling funds into executor"
        );
        let data = ChainClient::transfer_from_calldata(user, executor_addr, atomic_amount);
        self.executor
            .send_call("custody:transfer_from", token.address, data, U256::ZERO)
            .await?;
        Ok(())
    }
}
