// SPDX-License-Identifier: MIT

use crate::domain::error::EngineError;
use alloy::primitives::U256;
use alloy::primitives::utils::{format_units, parse_units};

/// Parse a human-unit decimal string into atomic units at `decimals`.
pub fn to_atomic(amount: &str, decimals: u8) -> Result<U256, EngineError> {
    let parsed = parse_units(amount.trim(), decimals).map_err(|e| EngineError::Validation {
        field: "amount".into(),
        message: format!("'{amount}' at {decimals} decimals: {e}"),
    })?;
    Ok(parsed.get_absolute())
}

/// Format atomic units back into a human-unit decimal string. Trailing
/// zeros and a bare trailing dot are trimmed ("1.500000" -> "1.5").
pub fn from_atomic(value: U256, decimals: u8) -> String {
    let raw = format_units(value, decimals).unwrap_or_else(|_| value.to_string());
    trim_decimal(&raw)
}

/// Exact addition of two human-unit decimal strings at `decimals`.
/// Both operands round-trip through atomic units so no float drift can
/// enter persisted share balances. The result keeps at least one
/// fractional digit ("10.0" + "99" -> "109.0"), the rendering the
/// holdings table stores.
pub fn add_decimal_strings(a: &str, b: &str, decimals: u8) -> Result<String, EngineError> {
    let sum = to_atomic(a, decimals)?
        .checked_add(to_atomic(b, decimals)?)
        .ok_or_else(|| EngineError::Validation {
            field: "shares".into(),
            message: format!("overflow adding {a} + {b}"),
        })?;
    let raw = format_units(sum, decimals).unwrap_or_else(|_| sum.to_string());
    Ok(trim_fraction_keep_one(&raw))
}

/// Total gas cost in ETH from accumulated wei.
pub fn wei_to_eth_string(wei: U256) -> String {
    from_atomic(wei, 18)
}

fn trim_decimal(raw: &str) -> String {
    if !raw.contains('.') {
        return raw.to_string();
    }
    let trimmed = raw.trim_end_matches('0').trim_end_matches('.');
    if trimmed.is_empty() {
        "0".to_string()
    } else {
        trimmed.to_string()
    }
}

/// Trim trailing fractional zeros but never the whole fraction:
/// "109.000000" -> "109.0", "1.500000" -> "1.5".
fn trim_fraction_keep_one(raw: &str) -> String {
    match raw.find('.') {
        None => raw.to_string(),
        Some(dot) => {
            let end = raw.trim_end_matches('0').len().max(dot + 2).min(raw.len());
            raw[..end].to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_human_amounts_at_declared_decimals() {
        assert_eq!(to_atomic("100", 6).unwrap(), U256::from(100_000_000u64));
        assert_eq!(to_atomic("0.5", 18).unwrap(), U256::from(500_000_000_000_000_000u128));
        assert_eq!(to_atomic("1.5", 6).unwrap(), U256::from(1_500_000u64));
    }

    #[test]
    fn rejects_malformed_amounts() {
        assert!(to_atomic("abc", 6).is_err());
        assert!(to_atomic("", 6).is_err());
    }

    #[test]
    fn formats_and_trims() {
        assert_eq!(from_atomic(U256::from(100_000_000u64), 6), "100");
        assert_eq!(from_atomic(U256::from(1_500_000u64), 6), "1.5");
        assert_eq!(from_atomic(U256::ZERO, 6), "0");
    }

    #[test]
    fn share_addition_is_exact_at_vault_decimals() {
        // 10.0 shares + 99 shares at 18 decimals, no float drift, and the
        // stored rendering keeps its fractional digit.
        let sum = add_decimal_strings("10.0", "99", 18).unwrap();
        assert_eq!(sum, "109.0");

        assert_eq!(add_decimal_strings("0.5", "0.25", 6).unwrap(), "0.75");
        assert_eq!(add_decimal_strings("0", "99", 18).unwrap(), "99.0");
    }

    #[test]
    fn gas_cost_formats_from_wei() {
        let wei = U256::from(1_000_000_000_000_000u64); // 0.001 ETH
        assert_eq!(wei_to_eth_string(wei), "0.001");
    }
}
