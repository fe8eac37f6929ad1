// SPDX-License-Identifier: MIT

use crate::common::retry::{is_nonce_message, retry_async};
use crate::common::units;
use crate::domain::constants::{GAS_BUFFER_PERCENT, NONCE_CACHE_WINDOW_SECS, RECEIPT_TIMEOUT_SECS};
use crate::domain::error::EngineError;
use crate::infrastructure::network::chain::ChainClient;
use crate::infrastructure::network::gas::GasOracle;
use crate::infrastructure::network::quote::TransactionPlan;
use alloy::consensus::{SignableTransaction, TxEip1559, TxEnvelope, TxLegacy};
use alloy::eips::eip2718::Encodable2718;
use alloy::network::TxSignerSync;
use alloy::primitives::{Address, Bytes, TxKind, U256};
use alloy::providers::Provider;
use alloy::rpc::types::eth::{TransactionInput, TransactionRequest};
use alloy::signers::local::PrivateKeySigner;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

const SEND_RETRIES: usize = 3;
const SEND_BASE_DELAY: Duration = Duration::from_secs(2);

/// Result of one batch: cumulative gas across all legs, hash of the last.
#[derive(Debug, Clone)]
pub struct BatchOutcome {
    pub final_tx_hash: String,
    pub gas_used: u64,
    pub gas_cost_eth: String,
}

#[derive(Debug, Clone, Copy)]
enum FeePlan {
    Eip1559 { max_fee: u128, priority_fee: u128 },
    Legacy { gas_price: u128 },
}

struct NonceCache {
    current: u64,
    updated_at: Instant,
}

/// Sequential signer/broadcaster. One hot key, one monotonic nonce
/// sequence; callers must route every signed transaction through here.
pub struct TransactionExecutor {
    chain: ChainClient,
    gas_oracle: GasOracle,
    signer: PrivateKeySigner,
    chain_id: u64,
    nonce_cache: Mutex<Option<NonceCache>>,
    // Single-writer: one batch occupies the executor at a time.
    batch_lock: Mutex<()>,
}

impl TransactionExecutor {
    pub fn new(
        chain: ChainClient,
        gas_oracle: GasOracle,
        signer: PrivateKeySigner,
        chain_id: u64,
    ) -> Self {
        Self {
            chain,
            gas_oracle,
            signer,
            chain_id,
            nonce_cache: Mutex::new(None),
            batch_lock: Mutex::new(()),
        }
    }

    pub fn address(&self) -> Address {
        self.signer.address()
    }

    /// Sign and broadcast a quote's transactions in order. The whole batch
    /// fails on the first leg that fails; the nonce cache is reset either
    /// way so the next batch starts from the chain's view.
    pub async fn execute_batch(
        &self,
        tag: &str,
        txs: &[TransactionPlan],
    ) -> Result<BatchOutcome, EngineError> {
        if txs.is_empty() {
            return Err(EngineError::Validation {
                field: "transactions".into(),
                message: "batch is empty".into(),
            });
        }

        let _writer = self.batch_lock.lock().await;
        self.reset_nonce().await;

        match self.run_batch(tag, txs).await {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                self.reset_nonce().await;
                Err(e)
            }
        }
    }

    /// Single-transaction convenience for custody and vault writes; same
    /// nonce/sign/broadcast path as a batch of one.
    pub async fn send_call(
        &self,
        tag: &str,
        to: Address,
        data: Bytes,
        value: U256,
    ) -> Result<BatchOutcome, EngineError> {
        let tx = TransactionPlan {
            chain_id: self.chain_id,
            to,
            data,
            value,
            gas: None,
            gas_price: None,
            max_fee_per_gas: None,
            max_priority_fee_per_gas: None,
        };
        self.execute_batch(tag, std::slice::from_ref(&tx)).await
    }

    async fn run_batch(
        &self,
        tag: &str,
        txs: &[TransactionPlan],
    ) -> Result<BatchOutcome, EngineError> {
        let mut gas_used_total = 0u64;
        let mut gas_cost_wei = U256::ZERO;
        let mut final_hash = String::new();

        for (index, tx) in txs.iter().enumerate() {
            if tx.chain_id != self.chain_id {
                return Err(EngineError::Validation {
                    field: "chain_id".into(),
                    message: format!("unsupported chain {} (expected {})", tx.chain_id, self.chain_id),
                });
            }

            if tx.value > U256::ZERO {
                let balance = self.chain.eth_balance(self.address()).await?;
                if balance < tx.value {
                    return Err(EngineError::InsufficientEth {
                        required: tx.value.to_string(),
                        available: balance.to_string(),
                    });
                }
            }

            let gas_limit = match tx.gas {
                Some(gas) => gas.saturating_to::<u64>(),
                None => buffered_gas_limit(self.estimate_gas(tx).await?),
            };

            let fees = match fee_plan_from(tx) {
                Some(plan) => plan,
                None => {
                    let oracle = self.gas_oracle.estimate_eip1559_fees().await?;
                    FeePlan::Eip1559 {
                        max_fee: oracle.max_fee_per_gas,
                        priority_fee: oracle.max_priority_fee_per_gas,
                    }
                }
            };

            let receipt = self.send_with_nonce_retry(tag, tx, gas_limit, fees).await?;

            if !receipt.status() {
                return Err(EngineError::Reverted {
                    hash: Some(format!("{:#x}", receipt.transaction_hash)),
                    reason: "execution reverted on chain".into(),
                });
            }

            let effective_price = if receipt.effective_gas_price > 0 {
                receipt.effective_gas_price
            } else {
                tx.gas_price.map(|p| p.saturating_to::<u128>()).unwrap_or(0)
            };
            gas_used_total = gas_used_total.saturating_add(receipt.gas_used);
            gas_cost_wei += U256::from(receipt.gas_used) * U256::from(effective_price);
            final_hash = format!("{:#x}", receipt.transaction_hash);

            tracing::debug!(
                target: "executor",
                tag,
                leg = index + 1,
                legs = txs.len(),
                tx_hash = %final_hash,
                gas_used = receipt.gas_used,
                "Transaction confirmed"
            );
        }

        Ok(BatchOutcome {
            final_tx_hash: final_hash,
            gas_used: gas_used_total,
            gas_cost_eth: units::wei_to_eth_string(gas_cost_wei),
        })
    }

    async fn send_with_nonce_retry(
        &self,
        tag: &str,
        tx: &TransactionPlan,
        gas_limit: u64,
        fees: FeePlan,
    ) -> Result<alloy::rpc::types::eth::TransactionReceipt, EngineError> {
        retry_async(
            |attempt| async move {
                // After a nonce-shaped failure the cache was dropped, so a
                // later attempt refetches from the chain's pending view.
                self.send_once(tag, tx, gas_limit, fees, attempt > 1).await
            },
            SEND_RETRIES,
            SEND_BASE_DELAY,
            EngineError::is_nonce,
        )
        .await
    }

    async fn send_once(
        &self,
        tag: &str,
        tx: &TransactionPlan,
        gas_limit: u64,
        fees: FeePlan,
        force_nonce_refresh: bool,
    ) -> Result<alloy::rpc::types::eth::TransactionReceipt, EngineError> {
        let nonce = self.next_nonce(force_nonce_refresh).await?;
        let raw = self.sign(tx, gas_limit, fees, nonce)?;

        let pending = match self.chain.provider().send_raw_transaction(&raw).await {
            Ok(pending) => pending,
            Err(e) => {
                let msg = e.to_string();
                if is_nonce_message(&msg) {
                    self.reset_nonce().await;
                    return Err(EngineError::Nonce(msg));
                }
                if let Some(reason) = revert_reason_from_message(&msg) {
                    return Err(EngineError::Reverted { hash: None, reason });
                }
                return Err(EngineError::Connection(format!("Tx send failed: {msg}")));
            }
        };

        tracing::debug!(target: "executor", tag, nonce, "Transaction broadcast; awaiting receipt");

        pending
            .with_timeout(Some(Duration::from_secs(RECEIPT_TIMEOUT_SECS)))
            .get_receipt()
            .await
            .map_err(|e| EngineError::Connection(format!("Receipt wait timeout: {e}")))
    }

    fn sign(
        &self,
        tx: &TransactionPlan,
        gas_limit: u64,
        fees: FeePlan,
        nonce: u64,
    ) -> Result<Vec<u8>, EngineError> {
        let signed: TxEnvelope = match fees {
            FeePlan::Eip1559 { max_fee, priority_fee } => {
                let mut inner = TxEip1559 {
                    chain_id: self.chain_id,
                    nonce,
                    gas_limit,
                    max_fee_per_gas: max_fee,
                    max_priority_fee_per_gas: priority_fee,
                    to: TxKind::Call(tx.to),
                    value: tx.value,
                    access_list: Default::default(),
                    input: tx.data.clone(),
                };
                let sig = self
                    .signer
                    .sign_transaction_sync(&mut inner)
                    .map_err(|e| EngineError::Internal(format!("Tx signing failed: {e}")))?;
                inner.into_signed(sig).into()
            }
            FeePlan::Legacy { gas_price } => {
                let mut inner = TxLegacy {
                    chain_id: Some(self.chain_id),
                    nonce,
                    gas_price,
                    gas_limit,
                    to: TxKind::Call(tx.to),
                    value: tx.value,
                    input: tx.data.clone(),
                };
                let sig = self
                    .signer
                    .sign_transaction_sync(&mut inner)
                    .map_err(|e| EngineError::Internal(format!("Tx signing failed: {e}")))?;
                inner.into_signed(sig).into()
            }
        };
        Ok(signed.encoded_2718())
    }

    async fn estimate_gas(&self, tx: &TransactionPlan) -> Result<u64, EngineError> {
        let request = TransactionRequest {
            from: Some(self.address()),
            to: Some(TxKind::Call(tx.to)),
            value: Some(tx.value),
            input: TransactionInput::new(tx.data.clone()),
            ..Default::default()
        };
        self.chain.estimate_gas(request).await.map_err(|e| {
            let msg = e.to_string();
            match revert_reason_from_message(&msg) {
                Some(reason) => EngineError::Reverted { hash: None, reason },
                None if msg.to_ascii_lowercase().contains("revert") => EngineError::Reverted {
                    hash: None,
                    reason: msg,
                },
                None => e,
            }
        })
    }

    async fn next_nonce(&self, force_refresh: bool) -> Result<u64, EngineError> {
        let mut guard = self.nonce_cache.lock().await;

        if !force_refresh {
            if let Some(cache) = guard.as_mut() {
                if cache.updated_at.elapsed() <= Duration::from_secs(NONCE_CACHE_WINDOW_SECS) {
                    cache.current += 1;
                    return Ok(cache.current);
                }
            }
        }

        let fresh = self.chain.pending_nonce(self.address()).await?;
        *guard = Some(NonceCache {
            current: fresh,
            updated_at: Instant::now(),
        });
        Ok(fresh)
    }

    async fn reset_nonce(&self) {
        *self.nonce_cache.lock().await = None;
    }

    #[cfg(test)]
    async fn seed_nonce(&self, nonce: u64) {
        *self.nonce_cache.lock().await = Some(NonceCache {
            current: nonce,
            updated_at: Instant::now(),
        });
    }
}

fn buffered_gas_limit(estimate: u64) -> u64 {
    estimate.saturating_mul(100 + GAS_BUFFER_PERCENT) / 100
}

/// Fee fields from the quote take priority: the EIP-1559 pair first, then
/// a legacy gas price. None means the caller asks the oracle.
fn fee_plan_from(tx: &TransactionPlan) -> Option<FeePlan> {
    if let Some(max_fee) = tx.max_fee_per_gas {
        let priority = tx
            .max_priority_fee_per_gas
            .map(|p| p.saturating_to::<u128>())
            .unwrap_or(0);
        return Some(FeePlan::Eip1559 {
            max_fee: max_fee.saturating_to::<u128>(),
            priority_fee: priority,
        });
    }
    tx.gas_price.map(|p| FeePlan::Legacy {
        gas_price: p.saturating_to::<u128>(),
    })
}

/// Decode a Solidity revert payload: Error(string) or Panic(uint256).
fn decode_revert_reason(data: &[u8]) -> Option<String> {
    const ERROR_SELECTOR: [u8; 4] = [0x08, 0xc3, 0x79, 0xa0];
    const PANIC_SELECTOR: [u8; 4] = [0x4e, 0x48, 0x7b, 0x71];

    if data.len() < 4 {
        return None;
    }
    if data[..4] == ERROR_SELECTOR {
        // offset (32) + length (32) + utf8 bytes.
        let body = &data[4..];
        if body.len() < 64 {
            return None;
        }
        let len = U256::from_be_slice(&body[32..64]).saturating_to::<usize>();
        let bytes = body.get(64..64 + len)?;
        return Some(String::from_utf8_lossy(bytes).into_owned());
    }
    if data[..4] == PANIC_SELECTOR {
        let body = &data[4..];
        if body.len() < 32 {
            return None;
        }
        let code = U256::from_be_slice(&body[..32]);
        return Some(format!("panic code {code:#x}"));
    }
    None
}

/// Fish a revert payload out of an RPC error message and decode it.
fn revert_reason_from_message(msg: &str) -> Option<String> {
    let start = msg.find("0x08c379a0").or_else(|| msg.find("0x4e487b71"))?;
    let hex_blob: String = msg[start + 2..]
        .chars()
        .take_while(|c| c.is_ascii_hexdigit())
        .collect();
    let bytes = hex::decode(&hex_blob).ok()?;
    decode_revert_reason(&bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::network::provider::ConnectionFactory;

    fn offline_executor() -> TransactionExecutor {
        let provider = ConnectionFactory::http("http://127.0.0.1:8545").expect("url");
        let chain = ChainClient::new(provider.clone());
        TransactionExecutor::new(
            chain,
            GasOracle::new(provider),
            PrivateKeySigner::random(),
            42161,
        )
    }

    fn plain_tx() -> TransactionPlan {
        TransactionPlan {
            chain_id: 42161,
            to: Address::from([0x11; 20]),
            data: Bytes::new(),
            value: U256::ZERO,
            gas: None,
            gas_price: None,
            max_fee_per_gas: None,
            max_priority_fee_per_gas: None,
        }
    }

    #[tokio::test]
    async fn cached_nonces_are_strictly_consecutive() {
        let executor = offline_executor();
        executor.seed_nonce(41).await;
        assert_eq!(executor.next_nonce(false).await.unwrap(), 42);
        assert_eq!(executor.next_nonce(false).await.unwrap(), 43);
        assert_eq!(executor.next_nonce(false).await.unwrap(), 44);
    }

    #[tokio::test]
    async fn empty_batch_is_rejected() {
        let executor = offline_executor();
        let err = executor.execute_batch("test", &[]).await.unwrap_err();
        assert!(matches!(err, EngineError::Validation { .. }));
    }

    #[tokio::test]
    async fn foreign_chain_id_is_rejected() {
        let executor = offline_executor();
        let mut tx = plain_tx();
        tx.chain_id = 1;
        let err = executor.execute_batch("test", &[tx]).await.unwrap_err();
        assert!(matches!(err, EngineError::Validation { field, .. } if field == "chain_id"));
    }

    #[test]
    fn gas_buffer_adds_twenty_percent() {
        assert_eq!(buffered_gas_limit(100_000), 120_000);
        assert_eq!(buffered_gas_limit(0), 0);
    }

    #[test]
    fn fee_overlay_prefers_eip1559_pair() {
        let mut tx = plain_tx();
        tx.max_fee_per_gas = Some(U256::from(100u64));
        tx.max_priority_fee_per_gas = Some(U256::from(2u64));
        tx.gas_price = Some(U256::from(50u64));
        match fee_plan_from(&tx).unwrap() {
            FeePlan::Eip1559 { max_fee, priority_fee } => {
                assert_eq!(max_fee, 100);
                assert_eq!(priority_fee, 2);
            }
            FeePlan::Legacy { .. } => panic!("expected EIP-1559"),
        }
    }

    #[test]
    fn fee_overlay_falls_back_to_legacy_then_oracle() {
        let mut tx = plain_tx();
        tx.gas_price = Some(U256::from(50u64));
        assert!(matches!(
            fee_plan_from(&tx),
            Some(FeePlan::Legacy { gas_price: 50 })
        ));

        let bare = plain_tx();
        assert!(fee_plan_from(&bare).is_none());
    }

    #[test]
    fn revert_reason_decodes_error_string() {
        // Error("Insufficient balance")
        let mut data = vec![0x08, 0xc3, 0x79, 0xa0];
        data.extend_from_slice(&U256::from(32u64).to_be_bytes::<32>());
        let reason = b"Insufficient balance";
        data.extend_from_slice(&U256::from(reason.len() as u64).to_be_bytes::<32>());
        let mut padded = reason.to_vec();
        padded.resize(32, 0);
        data.extend_from_slice(&padded);

        assert_eq!(
            decode_revert_reason(&data).as_deref(),
            Some("Insufficient balance")
        );

        let msg = format!("server returned an error: execution reverted, data: \"0x{}\"", hex::encode(&data));
        assert_eq!(
            revert_reason_from_message(&msg).as_deref(),
            Some("Insufficient balance")
        );
    }

    #[test]
    fn revert_reason_decodes_panic() {
        let mut data = vec![0x4e, 0x48, 0x7b, 0x71];
        data.extend_from_slice(&U256::from(0x11u64).to_be_bytes::<32>());
        assert_eq!(decode_revert_reason(&data).as_deref(), Some("panic code 0x11"));
    }

    #[test]
    fn garbage_revert_data_is_ignored() {
        assert!(decode_revert_reason(&[0x01, 0x02]).is_none());
        assert!(revert_reason_from_message("nonce too low").is_none());
    }
}
