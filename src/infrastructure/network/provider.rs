// SPDX-License-Identifier: MIT

use crate::domain::error::EngineError;
use alloy::network::Ethereum;
use alloy::providers::RootProvider;
use url::Url;

pub type HttpProvider = RootProvider<Ethereum>;

/// The engine talks to exactly one chain over plain HTTP; no streaming
/// transports are needed for a poll-driven scheduler.
pub struct ConnectionFactory;

impl ConnectionFactory {
    pub fn http(rpc_url: &str) -> Result<HttpProvider, EngineError> {
        let url = Url::parse(rpc_url)
            .map_err(|e| EngineError::Config(format!("Invalid RPC URL '{rpc_url}': {e}")))?;
        Ok(RootProvider::new_http(url))
    }
}
