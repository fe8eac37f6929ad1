// SPDX-License-Identifier: MIT

use crate::domain::constants::{ARBITRUM_CHAIN_ID, FALLBACK_TOKENS};
use crate::domain::error::EngineError;
use alloy::primitives::Address;
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Token metadata as served by the quoting service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenDescriptor {
    pub symbol: String,
    pub chain_id: u64,
    pub address: Address,
    pub decimals: u8,
    pub name: String,
}

/// Symbol -> descriptors, keyed by uppercased symbol. Derived state,
/// rebuilt at startup and replaced wholesale on refresh.
pub struct TokenRegistry {
    tokens: RwLock<HashMap<String, Vec<TokenDescriptor>>>,
}

impl TokenRegistry {
    pub fn new() -> Self {
        Self {
            tokens: RwLock::new(HashMap::new()),
        }
    }

    /// Registry seeded from the static Arbitrum table, for when the
    /// quoting service is unreachable at startup.
    pub fn with_fallback() -> Self {
        let registry = Self::new();
        {
            let mut map = registry
                .tokens
                .try_write()
                .expect("fresh registry lock is uncontended");
            for (symbol, address, decimals, name) in FALLBACK_TOKENS {
                map.entry((*symbol).to_string()).or_default().push(TokenDescriptor {
                    symbol: (*symbol).to_string(),
                    chain_id: ARBITRUM_CHAIN_ID,
                    address: *address,
                    decimals: *decimals,
                    name: (*name).to_string(),
                });
            }
        }
        registry
    }

    /// Insert one descriptor; duplicate (symbol, chain_id) is rejected.
    pub async fn insert(&self, descriptor: TokenDescriptor) -> Result<(), EngineError> {
        let mut map = self.tokens.write().await;
        Self::insert_into(&mut map, descriptor)
    }

    /// Replace the whole registry from a freshly fetched descriptor list.
    /// Any duplicate in the payload rejects the refresh, leaving the
    /// previous contents in place.
    pub async fn replace_all(
        &self,
        descriptors: Vec<TokenDescriptor>,
    ) -> Result<usize, EngineError> {
        let mut fresh: HashMap<String, Vec<TokenDescriptor>> = HashMap::new();
        let count = descriptors.len();
        for descriptor in descriptors {
            Self::insert_into(&mut fresh, descriptor)?;
        }
        *self.tokens.write().await = fresh;
        Ok(count)
    }

    /// Look up a token by (uppercased symbol, chain id). Insertion order
    /// decides between descriptors sharing a symbol across chains.
    pub async fn resolve(&self, symbol: &str, chain_id: u64) -> Option<TokenDescriptor> {
        let map = self.tokens.read().await;
        map.get(&symbol.to_uppercase())?
            .iter()
            .find(|d| d.chain_id == chain_id)
            .cloned()
    }

    pub async fn is_empty(&self) -> bool {
        self.tokens.read().await.is_empty()
    }

    pub async fn len(&self) -> usize {
        self.tokens.read().await.values().map(Vec::len).sum()
    }

    fn insert_into(
        map: &mut HashMap<String, Vec<TokenDescriptor>>,
        descriptor: TokenDescriptor,
    ) -> Result<(), EngineError> {
        let key = descriptor.symbol.to_uppercase();
        let entries = map.entry(key.clone()).or_default();
        if entries.iter().any(|d| d.chain_id == descriptor.chain_id) {
            return Err(EngineError::Validation {
                field: "token".into(),
                message: format!("duplicate ({key}, {})", descriptor.chain_id),
            });
        }
        entries.push(descriptor);
        Ok(())
    }
}

impl Default for TokenRegistry {
    fn default() -> Self {
        Self::new()
    }
}
