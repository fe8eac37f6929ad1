// SPDX-License-Identifier: MIT

use alloy::signers::local::PrivateKeySigner;
use clap::Parser;
use dca_engine::app::config::Settings;
use dca_engine::app::logging::setup_logging;
use dca_engine::domain::constants::ARBITRUM_CHAIN_ID;
use dca_engine::domain::error::EngineError;
use dca_engine::infrastructure::data::db::Database;
use dca_engine::infrastructure::data::token_registry::TokenRegistry;
use dca_engine::infrastructure::network::chain::ChainClient;
use dca_engine::infrastructure::network::gas::GasOracle;
use dca_engine::infrastructure::network::provider::ConnectionFactory;
use dca_engine::infrastructure::network::quote::QuoteClient;
use dca_engine::services::custody::CustodyManager;
use dca_engine::services::executor::TransactionExecutor;
use dca_engine::services::pipeline::SwapPipeline;
use dca_engine::services::scheduler::{Scheduler, SchedulerConfig};
use dca_engine::services::vault::VaultGateway;
use std::str::FromStr;
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(author, version, about = "DCA execution engine for Arbitrum")]
struct Cli {
    /// Path to config file (default: config.{toml,yaml,...})
    #[arg(long)]
    config: Option<String>,

    /// Log level or tracing directive string
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Emit JSON logs
    #[arg(long, default_value_t = false)]
    json_logs: bool,

    /// Run a single scheduler tick and exit
    #[arg(long, default_value_t = false)]
    once: bool,
}

#[tokio::main]
async fn main() -> Result<(), EngineError> {
    let cli = Cli::parse();

    let settings = Settings::load_with_path(cli.config.as_deref())?;
    setup_logging(&cli.log_level, cli.json_logs);

    let db = Database::new(&settings.database_url).await?;

    let provider = ConnectionFactory::http(&settings.arbitrum_rpc_url)?;
    let chain = ChainClient::new(provider.clone());
    let gas_oracle = GasOracle::new(provider);
    let quote = QuoteClient::new(
        &settings.ember_mcp_server_url,
        settings.mcp_connection_timeout,
        settings.mcp_tool_timeout_ms,
    )?;

    // Registry bootstrap: quoting service first, static table when it is
    // unreachable.
    let registry = Arc::new(match quote.get_tokens(&[ARBITRUM_CHAIN_ID]).await {
        Ok(descriptors) => {
            let registry = TokenRegistry::new();
            match registry.replace_all(descriptors).await {
                Ok(count) => {
                    tracing::info!(target: "registry", tokens = count, "Token registry loaded");
                    registry
                }
                Err(e) => {
                    tracing::warn!(target: "registry", error = %e, "Token payload rejected; using fallback table");
                    TokenRegistry::with_fallback()
                }
            }
        }
        Err(e) => {
            tracing::warn!(target: "registry", error = %e, "getTokens failed; using fallback table");
            TokenRegistry::with_fallback()
        }
    });

    if !settings.scheduler_enabled() {
        tracing::warn!("Scheduler disabled: no PRIVATE_KEY configured. Nothing to run.");
        return Ok(());
    }
    let key = settings
        .private_key
        .as_deref()
        .ok_or_else(|| EngineError::Config("PRIVATE_KEY is missing".into()))?;
    let signer = PrivateKeySigner::from_str(key)
        .map_err(|e| EngineError::Config(format!("Invalid PRIVATE_KEY: {e}")))?;
    tracing::info!(executor = %format!("{:#x}", signer.address()), "Executor key loaded");

    let executor = Arc::new(TransactionExecutor::new(
        chain.clone(),
        gas_oracle,
        signer,
        ARBITRUM_CHAIN_ID,
    ));
    let custody = CustodyManager::new(chain.clone(), executor.clone(), settings.router());
    let vaults = VaultGateway::new(chain.clone(), executor.clone());
    let pipeline = Arc::new(SwapPipeline::new(
        db.clone(),
        registry,
        chain,
        quote,
        executor,
        custody,
        vaults,
        settings.vaults.clone().unwrap_or_default(),
        ARBITRUM_CHAIN_ID,
    ));

    let scheduler = Scheduler::new(db, pipeline, SchedulerConfig::from_settings(&settings));

    if cli.once {
        scheduler.tick_now().await?;
        return Ok(());
    }

    scheduler.start();

    if settings.enable_metrics {
        let scheduler = Arc::clone(&scheduler);
        tokio::spawn(async move {
            let mut ticker =
                tokio::time::interval(std::time::Duration::from_secs(60));
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let status = scheduler.status();
                tracing::info!(
                    target: "metrics",
                    total = status.total_executions,
                    ok = status.successful_executions,
                    failed = status.failed_executions,
                    active_plans = status.active_plans_count,
                    avg_ms = status.average_execution_time_ms,
                    "Scheduler status"
                );
            }
        });
    }

    tokio::signal::ctrl_c()
        .await
        .map_err(|e| EngineError::Internal(format!("Signal handler failed: {e}")))?;
    tracing::info!("Shutdown signal received");
    scheduler.stop();
    // Give in-flight logging a moment to drain; in-flight executions are
    // bounded by receipt timeouts and complete on their own.
    tokio::time::sleep(std::time::Duration::from_millis(200)).await;
    Ok(())
}
