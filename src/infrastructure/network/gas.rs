// SPDX-License-Identifier: MIT

use crate::common::retry::{is_network_message, retry_async};
use crate::domain::error::EngineError;
use crate::infrastructure::network::provider::HttpProvider;
use alloy::providers::Provider;
use alloy::rpc::types::BlockNumberOrTag;
use std::time::Duration;

// Arbitrum sequences FIFO; priority fees buy nothing, so the reward
// percentile and the fallback tip are kept low.
const REWARD_PERCENTILE: f64 = 20.0;
const FEE_HISTORY_BLOCKS: u64 = 5;
const FALLBACK_PRIORITY_FEE_WEI: u128 = 10_000_000; // 0.01 gwei

#[derive(Debug, Clone, Copy)]
pub struct GasFees {
    pub max_fee_per_gas: u128,
    pub max_priority_fee_per_gas: u128,
}

/// EIP-1559 fee estimate from `eth_feeHistory`, used when a quote
/// transaction carries no fee fields of its own.
#[derive(Clone)]
pub struct GasOracle {
    provider: HttpProvider,
}

impl GasOracle {
    pub fn new(provider: HttpProvider) -> Self {
        Self { provider }
    }

    pub async fn estimate_eip1559_fees(&self) -> Result<GasFees, EngineError> {
        let provider = self.provider.clone();
        let history = retry_async(
            move |_| {
                let provider = provider.clone();
                async move {
                    provider
                        .get_fee_history(
                            FEE_HISTORY_BLOCKS,
                            BlockNumberOrTag::Latest,
                            &[REWARD_PERCENTILE],
                        )
                        .await
                }
            },
            3,
            Duration::from_secs(2),
            |e| is_network_message(&e.to_string()),
        )
        .await
        .map_err(|e| EngineError::Connection(format!("Fee history failed: {e}")))?;

        let base_fee = *history
            .base_fee_per_gas
            .last()
            .ok_or_else(|| EngineError::Connection("Fee history returned no base fees".into()))?;

        let priority_fee = history
            .reward
            .as_deref()
            .map(|rewards| {
                let observed: Vec<u128> = rewards
                    .iter()
                    .filter_map(|block| block.first().copied())
                    .collect();
                if observed.is_empty() {
                    FALLBACK_PRIORITY_FEE_WEI
                } else {
                    observed.iter().sum::<u128>() / observed.len() as u128
                }
            })
            .unwrap_or(FALLBACK_PRIORITY_FEE_WEI);

        // One full base-fee step (12.5%) of headroom over the latest block.
        let max_base_fee = base_fee + base_fee / 8;

        Ok(GasFees {
            max_fee_per_gas: max_base_fee + priority_fee,
            max_priority_fee_per_gas: priority_fee,
        })
    }
}
