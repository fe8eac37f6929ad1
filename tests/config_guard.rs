// SPDX-License-Identifier: MIT

use dca_engine::app::config::Settings;

/// Defaults must deserialize without any environment at all; a fresh
/// checkout with an empty config is a valid (scheduler-less) deployment.
#[test]
fn defaults_deserialize_from_empty_source() {
    let settings: Settings = config::Config::builder()
        .build()
        .expect("empty config")
        .try_deserialize()
        .expect("defaults");

    assert_eq!(settings.arbitrum_rpc_url, "https://arb1.arbitrum.io/rpc");
    assert_eq!(settings.scheduler_interval_seconds, 60);
    assert_eq!(settings.max_concurrent_executions, 50);
    assert_eq!(settings.retry_attempts, 3);
    assert_eq!(settings.mcp_tool_timeout_ms, 120_000);
    assert_eq!(settings.mcp_connection_timeout, 60_000);
    assert!(settings.private_key.is_none());
    assert!(!settings.scheduler_enabled());
}
