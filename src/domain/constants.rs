// SPDX-License-Identifier: MIT

use alloy::primitives::{Address, address};

/// The engine executes on Arbitrum One only.
pub const ARBITRUM_CHAIN_ID: u64 = 42161;

/// Router the quoting service settles swaps through; pre-approval target.
pub const DEFAULT_ROUTER: Address = address!("0xEf1c6E67703c7BD7107eed8303Fbe6EC2554BF6B");

/// Native USDC on Arbitrum.
pub const USDC_NATIVE: Address = address!("0xaf88d065e77c8cC2239327C5EDb3A432268e5831");
/// Bridged USDC.e on Arbitrum. Same 6 decimals as native USDC.
pub const USDC_BRIDGED: Address = address!("0xFF970A61A04b1cA14834A43f5dE4533eBDDB5CC8");

pub const RECEIPT_TIMEOUT_SECS: u64 = 120;
pub const NONCE_CACHE_WINDOW_SECS: u64 = 5;
pub const BATCH_COOLDOWN_SECS: u64 = 1;

/// Gas limit safety buffer applied over eth_estimateGas, in percent.
pub const GAS_BUFFER_PERCENT: u64 = 20;

/// Quotes reject slippage below this floor; lower requests are clamped.
pub const MIN_SLIPPAGE_PERCENT: &str = "0.3";

/// Static descriptors used when the quoting service cannot be reached at
/// startup: (symbol, address, decimals, name).
pub const FALLBACK_TOKENS: &[(&str, Address, u8, &str)] = &[
    (
        "WETH",
        address!("0x82aF49447D8a07e3bd95BD0d56f35241523fBab1"),
        18,
        "Wrapped Ether",
    ),
    ("USDC", USDC_NATIVE, 6, "USD Coin"),
    ("USDC.E", USDC_BRIDGED, 6, "Bridged USDC"),
    (
        "USDT",
        address!("0xFd086bC7CD5C481DCC9C85ebE478A1C0b69FCbb9"),
        6,
        "Tether USD",
    ),
    (
        "DAI",
        address!("0xDA10009cBd5D07dd0CeCc66161FC93D7c9000da1"),
        18,
        "Dai Stablecoin",
    ),
    (
        "ARB",
        address!("0x912CE59144191C1204E64559FE8253a0e49E6548"),
        18,
        "Arbitrum",
    ),
    (
        "WBTC",
        address!("0x2f2a2543B76A4166549F7aaB2e75Bef0aefC5B0f"),
        8,
        "Wrapped BTC",
    ),
];
