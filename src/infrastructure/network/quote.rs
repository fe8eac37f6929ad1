// SPDX-License-Identifier: MIT

use crate::common::retry::retry_async;
use crate::domain::error::EngineError;
use crate::infrastructure::data::token_registry::TokenDescriptor;
use alloy::primitives::{Address, Bytes, U256};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use std::time::Duration;
use url::Url;

const QUOTE_RETRIES: usize = 3;
const QUOTE_BASE_DELAY: Duration = Duration::from_secs(5);

/// Client for the external quoting service. Transport failures are
/// retried with the network predicate; structural validation failures
/// are not.
#[derive(Clone)]
pub struct QuoteClient {
    http: reqwest::Client,
    endpoint: Url,
}

/// One swap leg as returned by the quoting service, typed at ingress.
/// The executor consumes this as an immutable value.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionPlan {
    pub chain_id: u64,
    pub to: Address,
    #[serde(default)]
    pub data: Bytes,
    #[serde(default)]
    pub value: U256,
    #[serde(default)]
    pub gas: Option<U256>,
    #[serde(default)]
    pub gas_price: Option<U256>,
    #[serde(default)]
    pub max_fee_per_gas: Option<U256>,
    #[serde(default)]
    pub max_priority_fee_per_gas: Option<U256>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SwapEstimation {
    pub effective_price: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SwapPlan {
    pub transactions: Vec<TransactionPlan>,
    #[serde(default)]
    pub display_from_amount: Option<String>,
    pub display_to_amount: String,
    pub estimation: SwapEstimation,
}

impl SwapPlan {
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.transactions.is_empty() {
            return Err(EngineError::QuoteUnavailable(
                "quote contains no transactions".into(),
            ));
        }
        if self.display_to_amount.trim().is_empty() {
            return Err(EngineError::QuoteUnavailable(
                "quote is missing displayToAmount".into(),
            ));
        }
        if self.estimation.effective_price.trim().is_empty() {
            return Err(EngineError::QuoteUnavailable(
                "quote is missing effectivePrice".into(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SwapQuoteRequest {
    pub chain_id: u64,
    pub base_token: Address,
    pub quote_token: Address,
    /// Atomic units of the base token, decimal string.
    pub amount: String,
    /// Always the end user; the executor only mediates custody.
    pub recipient: Address,
    /// Percent, already clamped by the caller.
    pub slippage_tolerance: String,
}

#[derive(Serialize)]
struct RpcRequest<'a, P: Serialize> {
    jsonrpc: &'static str,
    id: u32,
    method: &'a str,
    params: P,
}

#[derive(Deserialize)]
struct RpcResponse<T> {
    result: Option<T>,
    error: Option<RpcErrorBody>,
}

#[derive(Deserialize)]
struct RpcErrorBody {
    code: i64,
    message: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TokenPayload {
    symbol: String,
    chain_id: u64,
    address: Address,
    decimals: u8,
    #[serde(default)]
    name: Option<String>,
}

impl QuoteClient {
    pub fn new(
        endpoint: &str,
        connection_timeout_ms: u64,
        tool_timeout_ms: u64,
    ) -> Result<Self, EngineError> {
        let endpoint = Url::parse(endpoint)
            .map_err(|e| EngineError::Config(format!("Invalid quote endpoint '{endpoint}': {e}")))?;
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_millis(connection_timeout_ms))
            .timeout(Duration::from_millis(tool_timeout_ms))
            .build()
            .map_err(|e| EngineError::Config(format!("HTTP client build failed: {e}")))?;
        Ok(Self { http, endpoint })
    }

    /// Token descriptors for the given chains; feeds the registry at
    /// startup. Callers fall back to the static table when this fails.
    pub async fn get_tokens(&self, chain_ids: &[u64]) -> Result<Vec<TokenDescriptor>, EngineError> {
        let payload: Vec<TokenPayload> = self
            .call("getTokens", serde_json::json!({ "chainIds": chain_ids }))
            .await?;

        Ok(payload
            .into_iter()
            .map(|t| TokenDescriptor {
                name: t.name.unwrap_or_else(|| t.symbol.clone()),
                symbol: t.symbol,
                chain_id: t.chain_id,
                address: t.address,
                decimals: t.decimals,
            })
            .collect())
    }

    pub async fn create_swap(&self, request: &SwapQuoteRequest) -> Result<SwapPlan, EngineError> {
        let plan: SwapPlan = self.call("createSwap", request).await?;
        plan.validate()?;
        Ok(plan)
    }

    async fn call<P: Serialize + Clone, T: DeserializeOwned>(
        &self,
        method: &str,
        params: P,
    ) -> Result<T, EngineError> {
        retry_async(
            |_| {
                let params = params.clone();
                async move { self.call_once(method, params).await }
            },
            QUOTE_RETRIES,
            QUOTE_BASE_DELAY,
            EngineError::is_network,
        )
        .await
    }

    async fn call_once<P: Serialize, T: DeserializeOwned>(
        &self,
        method: &str,
        params: P,
    ) -> Result<T, EngineError> {
        let body = RpcRequest {
            jsonrpc: "2.0",
            id: 1,
            method,
            params,
        };

        let response = self
            .http
            .post(self.endpoint.clone())
            .json(&body)
            .send()
            .await
            .map_err(|e| EngineError::Connection(format!("network error calling {method}: {e}")))?;

        let status = response.status();
        if status.is_server_error() {
            return Err(EngineError::Connection(format!(
                "network error calling {method}: HTTP {status}"
            )));
        }
        if !status.is_success() {
            return Err(EngineError::QuoteUnavailable(format!(
                "{method} rejected with HTTP {status}"
            )));
        }

        let parsed: RpcResponse<T> = response.json().await.map_err(|e| {
            EngineError::QuoteUnavailable(format!("{method} returned invalid payload: {e}"))
        })?;

        if let Some(err) = parsed.error {
            return Err(EngineError::QuoteUnavailable(format!(
                "{method} failed with code {}: {}",
                err.code, err.message
            )));
        }
        parsed.result.ok_or_else(|| {
            EngineError::QuoteUnavailable(format!("{method} returned an empty result"))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn swap_plan_parses_typed_transactions() {
        let raw = serde_json::json!({
            "transactions": [{
                "chainId": 42161,
                "to": "0x1111111111111111111111111111111111111111",
                "data": "0xdeadbeef",
                "value": "0x0",
                "gas": "0x5208"
            }],
            "displayFromAmount": "100",
            "displayToAmount": "0.03",
            "estimation": { "effectivePrice": "3333.33" }
        });

        let plan: SwapPlan = serde_json::from_value(raw).expect("parse");
        plan.validate().expect("valid");
        assert_eq!(plan.transactions.len(), 1);
        let tx = &plan.transactions[0];
        assert_eq!(tx.chain_id, 42161);
        assert_eq!(tx.data.as_ref(), &[0xde, 0xad, 0xbe, 0xef]);
        assert_eq!(tx.gas, Some(U256::from(21_000u64)));
        assert!(tx.max_fee_per_gas.is_none());
    }

    #[test]
    fn empty_transaction_list_is_quote_unavailable() {
        let raw = serde_json::json!({
            "transactions": [],
            "displayToAmount": "0.03",
            "estimation": { "effectivePrice": "3333.33" }
        });
        let plan: SwapPlan = serde_json::from_value(raw).expect("parse");
        assert!(matches!(
            plan.validate(),
            Err(EngineError::QuoteUnavailable(_))
        ));
    }

    #[test]
    fn malformed_address_fails_at_ingress() {
        let raw = serde_json::json!({
            "transactions": [{
                "chainId": 42161,
                "to": "not-an-address",
                "data": "0x"
            }],
            "displayToAmount": "1",
            "estimation": { "effectivePrice": "1" }
        });
        assert!(serde_json::from_value::<SwapPlan>(raw).is_err());
    }

    #[test]
    fn token_payload_defaults_name_to_symbol() {
        let raw = serde_json::json!([{
            "symbol": "USDC",
            "chainId": 42161,
            "address": "0xaf88d065e77c8cC2239327C5EDb3A432268e5831",
            "decimals": 6
        }]);
        let payload: Vec<TokenPayload> = serde_json::from_value(raw).expect("parse");
        assert_eq!(payload[0].symbol, "USDC");
        assert!(payload[0].name.is_none());
    }
}
