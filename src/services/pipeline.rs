// SPDX-License-Identifier: MIT

use crate::app::config::VaultSettings;
use crate::common::units;
use crate::domain::constants::MIN_SLIPPAGE_PERCENT;
use crate::domain::error::EngineError;
use crate::infrastructure::data::db::Database;
use crate::infrastructure::data::schema::{ExecutionRecord, ExecutionStatus, NewExecution, Plan};
use crate::infrastructure::data::token_registry::{TokenDescriptor, TokenRegistry};
use crate::infrastructure::network::chain::ChainClient;
use crate::infrastructure::network::quote::{QuoteClient, SwapQuoteRequest};
use crate::services::custody::CustodyManager;
use crate::services::executor::TransactionExecutor;
use crate::services::vault::VaultGateway;
use alloy::primitives::{Address, U256};
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;

/// One swap to perform: a scheduled plan iteration (`plan_id` set) or a
/// standalone swap that only leaves an audit row.
#[derive(Debug, Clone)]
pub struct SwapInstruction {
    pub plan_id: Option<String>,
    pub from_token: String,
    pub to_token: String,
    pub amount: String,
    pub user_address: String,
    pub slippage_percent: String,
}

impl SwapInstruction {
    pub fn for_plan(plan: &Plan) -> Self {
        Self {
            plan_id: Some(plan.id.clone()),
            from_token: plan.from_token.clone(),
            to_token: plan.to_token.clone(),
            amount: plan.amount.clone(),
            user_address: plan.user_address.clone(),
            slippage_percent: plan.slippage.clone(),
        }
    }
}

/// Slippage is a percent string with a 0.3% floor; values below it are
/// clamped, not rejected.
pub fn clamp_slippage(raw: &str) -> Result<String, EngineError> {
    let trimmed = raw.trim();
    if trimmed.starts_with('-') {
        return Err(EngineError::Validation {
            field: "slippage".into(),
            message: "must not be negative".into(),
        });
    }
    // Compare at fixed precision; four digits is plenty for percentages.
    let requested = units::to_atomic(trimmed, 4).map_err(|_| EngineError::Validation {
        field: "slippage".into(),
        message: format!("'{raw}' is not a decimal number"),
    })?;
    let floor = units::to_atomic(MIN_SLIPPAGE_PERCENT, 4)?;
    if requested < floor {
        Ok(MIN_SLIPPAGE_PERCENT.to_string())
    } else {
        Ok(trimmed.to_string())
    }
}

/// Orchestrates one DCA iteration: resolve -> custody -> quote -> execute
/// -> measure -> vault -> record.
pub struct SwapPipeline {
    db: Database,
    registry: Arc<TokenRegistry>,
    chain: ChainClient,
    quote: QuoteClient,
    executor: Arc<TransactionExecutor>,
    custody: CustodyManager,
    vaults: VaultGateway,
    vault_settings: HashMap<String, VaultSettings>,
    chain_id: u64,
}

impl SwapPipeline {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        db: Database,
        registry: Arc<TokenRegistry>,
        chain: ChainClient,
        quote: QuoteClient,
        executor: Arc<TransactionExecutor>,
        custody: CustodyManager,
        vaults: VaultGateway,
        vault_settings: HashMap<String, VaultSettings>,
        chain_id: u64,
    ) -> Self {
        let vault_settings = vault_settings
            .into_iter()
            .map(|(symbol, settings)| (symbol.to_uppercase(), settings))
            .collect();
        Self {
            db,
            registry,
            chain,
            quote,
            executor,
            custody,
            vaults,
            vault_settings,
            chain_id,
        }
    }

    /// Execute one iteration of a plan and advance it on success. The
    /// caller must have leased the plan row.
    pub async fn execute_plan(&self, plan: &Plan) -> Result<ExecutionRecord, EngineError> {
        let record = self.execute(SwapInstruction::for_plan(plan)).await?;

        let advanced = self
            .db
            .advance_plan_after_success(plan, Utc::now().naive_utc())
            .await?;
        if advanced.next_execution_at.is_none() {
            tracing::info!(
                target: "pipeline",
                plan_id = %plan.id,
                executions = advanced.execution_count,
                "Plan completed"
            );
        }
        Ok(record)
    }

    /// Execute a swap and persist exactly one Execution row for the
    /// terminal outcome. Failures never advance the plan.
    pub async fn execute(
        &self,
        instruction: SwapInstruction,
    ) -> Result<ExecutionRecord, EngineError> {
        match self.run(&instruction).await {
            Ok(record) => Ok(record),
            Err(error) => {
                if instruction.plan_id.is_some() {
                    let failed = self
                        .db
                        .record_execution(
                            NewExecution {
                                plan_id: instruction.plan_id.clone(),
                                from_amount: instruction.amount.clone(),
                                to_amount: "0".into(),
                                exchange_rate: "0".into(),
                                error_message: Some(error.to_string()),
                                ..Default::default()
                            },
                            ExecutionStatus::Failed,
                        )
                        .await;
                    if let Err(db_error) = failed {
                        tracing::error!(
                            target: "pipeline",
                            plan_id = ?instruction.plan_id,
                            error = %db_error,
                            "Could not record failed execution"
                        );
                    }
                }
                Err(error)
            }
        }
    }

    async fn run(&self, instruction: &SwapInstruction) -> Result<ExecutionRecord, EngineError> {
        let from = self.resolve_token(&instruction.from_token).await?;
        let to = self.resolve_token(&instruction.to_token).await?;

        let user: Address =
            instruction
                .user_address
                .parse()
                .map_err(|_| EngineError::Validation {
                    field: "user_address".into(),
                    message: format!("'{}' is not a 20-byte hex address", instruction.user_address),
                })?;

        // Always the descriptor's declared decimals, bridged USDC included.
        let atomic_amount = units::to_atomic(&instruction.amount, from.decimals)?;
        let slippage = clamp_slippage(&instruction.slippage_percent)?;

        self.custody.ensure_custody(&from, atomic_amount, user).await?;

        let swap = self
            .quote
            .create_swap(&SwapQuoteRequest {
                chain_id: self.chain_id,
                base_token: from.address,
                quote_token: to.address,
                amount: atomic_amount.to_string(),
                recipient: user,
                slippage_tolerance: slippage,
            })
            .await?;

        // Pre-measure only when a vault will consume the received tokens.
        let vault_target = match self.vault_settings.get(&to.symbol.to_uppercase()) {
            Some(settings) => Some(self.vaults.resolve(settings).await?),
            None => None,
        };
        let balance_before = match &vault_target {
            Some(_) => Some(
                self.chain
                    .erc20_balance(to.address, self.executor.address())
                    .await?,
            ),
            None => None,
        };

        let tag = instruction.plan_id.as_deref().unwrap_or("standalone");
        let outcome = self.executor.execute_batch(tag, &swap.transactions).await?;

        let mut vault_address = None;
        let mut share_tokens = None;
        let mut deposit_tx_hash = None;
        if let (Some(target), Some(before)) = (vault_target, balance_before) {
            let after = self
                .chain
                .erc20_balance(to.address, self.executor.address())
                .await?;
            let received = after.saturating_sub(before);
            if received > U256::ZERO {
                let deposit = self.vaults.deposit(&to, &target, received, user).await?;
                let vault_addr_str = format!("{:#x}", target.address);
                self.db
                    .add_vault_shares(
                        &instruction.user_address,
                        &vault_addr_str,
                        &to.symbol,
                        &deposit.share_tokens,
                        target.share_decimals,
                    )
                    .await?;
                vault_address = Some(vault_addr_str);
                share_tokens = Some(deposit.share_tokens);
                deposit_tx_hash = Some(deposit.deposit_tx_hash);
            } else {
                tracing::warn!(
                    target: "pipeline",
                    token = %to.symbol,
                    "No balance delta after swap; skipping vault deposit"
                );
            }
        }

        let record = self
            .db
            .record_execution(
                NewExecution {
                    plan_id: instruction.plan_id.clone(),
                    from_amount: instruction.amount.clone(),
                    to_amount: swap.display_to_amount.clone(),
                    exchange_rate: swap.estimation.effective_price.clone(),
                    gas_fee: Some(outcome.gas_cost_eth.clone()),
                    tx_hash: Some(outcome.final_tx_hash.clone()),
                    error_message: None,
                    vault_address,
                    share_tokens,
                    deposit_tx_hash,
                },
                ExecutionStatus::Success,
            )
            .await?;

        tracing::info!(
            target: "pipeline",
            plan_id = ?instruction.plan_id,
            from = %from.symbol,
            to = %to.symbol,
            amount = %instruction.amount,
            tx_hash = %outcome.final_tx_hash,
            gas_eth = %outcome.gas_cost_eth,
            "Swap executed"
        );
        Ok(record)
    }

    async fn resolve_token(&self, symbol: &str) -> Result<TokenDescriptor, EngineError> {
        self.registry
            .resolve(symbol, self.chain_id)
            .await
            .ok_or_else(|| EngineError::TokenNotFound {
                symbol: symbol.to_string(),
                chain_id: self.chain_id,
            })
    }
}
