// SPDX-License-Identifier: MIT

use crate::domain::constants;
use crate::domain::error::EngineError;
use alloy::primitives::Address;
use config::{Config, Environment, File};
use serde::Deserialize;
use std::collections::HashMap;

#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    #[serde(default = "default_database_url")]
    pub database_url: String,

    #[serde(default = "default_rpc_url")]
    pub arbitrum_rpc_url: String,

    /// Quoting service endpoint.
    #[serde(default = "default_quote_url")]
    pub ember_mcp_server_url: String,

    /// Executor hot key. Absence disables the scheduler.
    pub private_key: Option<String>,

    #[serde(default = "default_interval_seconds")]
    pub scheduler_interval_seconds: u64,
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_executions: usize,

    /// Unset: scheduler runs iff a key is configured. Explicit `true`
    /// without a key is a fatal configuration error.
    pub enable_scheduler: Option<bool>,
    #[serde(default = "default_true")]
    pub enable_metrics: bool,

    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: usize,
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,

    #[serde(default = "default_tool_timeout_ms")]
    pub mcp_tool_timeout_ms: u64,
    #[serde(default = "default_connection_timeout_ms")]
    pub mcp_connection_timeout: u64,

    pub router_address: Option<Address>,

    /// Destination-token symbol -> vault deployment, from the config file.
    pub vaults: Option<HashMap<String, VaultSettings>>,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum VaultKind {
    Erc4626,
    Simple,
}

#[derive(Debug, Deserialize, Clone)]
pub struct VaultSettings {
    pub address: Address,
    #[serde(default = "default_vault_kind")]
    pub kind: VaultKind,
    /// Overrides the on-chain `decimals()` read for non-standard vaults.
    pub share_decimals: Option<u8>,
}

fn default_database_url() -> String {
    "sqlite://dca.db?mode=rwc".to_string()
}
fn default_rpc_url() -> String {
    "https://arb1.arbitrum.io/rpc".to_string()
}
fn default_quote_url() -> String {
    "http://127.0.0.1:3001/mcp".to_string()
}
fn default_interval_seconds() -> u64 {
    60
}
fn default_max_concurrent() -> usize {
    50
}
fn default_true() -> bool {
    true
}
fn default_retry_attempts() -> usize {
    3
}
fn default_retry_delay_ms() -> u64 {
    5_000
}
fn default_tool_timeout_ms() -> u64 {
    120_000
}
fn default_connection_timeout_ms() -> u64 {
    60_000
}
fn default_vault_kind() -> VaultKind {
    VaultKind::Erc4626
}

impl Settings {
    pub fn load_with_path(path: Option<&str>) -> Result<Self, EngineError> {
        dotenvy::dotenv().ok();

        let mut builder = Config::builder();
        match path {
            Some(path) => builder = builder.add_source(File::with_name(path).required(true)),
            None => builder = builder.add_source(File::with_name("config").required(false)),
        }
        builder = builder.add_source(Environment::default());

        let settings: Settings = builder.build()?.try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn load() -> Result<Self, EngineError> {
        Self::load_with_path(None)
    }

    fn validate(&self) -> Result<(), EngineError> {
        if self.enable_scheduler == Some(true) && self.private_key.is_none() {
            return Err(EngineError::Config(
                "ENABLE_SCHEDULER is set but PRIVATE_KEY is missing".to_string(),
            ));
        }
        if self.scheduler_interval_seconds == 0 {
            return Err(EngineError::Config(
                "SCHEDULER_INTERVAL_SECONDS must be positive".to_string(),
            ));
        }
        if self.max_concurrent_executions == 0 {
            return Err(EngineError::Config(
                "MAX_CONCURRENT_EXECUTIONS must be positive".to_string(),
            ));
        }
        Ok(())
    }

    pub fn scheduler_enabled(&self) -> bool {
        match self.enable_scheduler {
            Some(enabled) => enabled,
            None => self.private_key.is_some(),
        }
    }

    pub fn router(&self) -> Address {
        self.router_address.unwrap_or(constants::DEFAULT_ROUTER)
    }
}
