// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Conversions between decimal token amounts and on-chain base units.

use std::str::FromStr;

use alloy::primitives::U256;
use rust_decimal::Decimal;

use super::ledger::LedgerError;

/// Largest decimals value whose scale factor fits in a `u128`.
const MAX_TOKEN_DECIMALS: u8 = 38;

/// Convert a positive decimal amount into the token's smallest unit.
///
/// Fails with `InvalidAmount` when the amount is not positive or carries
/// more fractional digits than the token supports.
pub fn to_base_units(amount: Decimal, decimals: u8) -> Result<U256, LedgerError> {
    if amount <= Decimal::ZERO {
        return Err(LedgerError::InvalidAmount(
            "amount must be positive".to_string(),
        ));
    }
    parse_amount(&amount.normalize().to_string(), decimals)
}

/// Convert base units back into a decimal amount, saturating at `Decimal::MAX`.
pub fn from_base_units(amount: U256, decimals: u8) -> Decimal {
    Decimal::from_str(&format_amount(amount, decimals)).unwrap_or(Decimal::MAX)
}

/// Parse a human-readable amount to base units.
///
/// # Arguments
/// * `amount` - Amount as a string (e.g., "1.5")
/// * `decimals` - Number of decimals (18 for ETH, 6 for USDT)
pub fn parse_amount(amount: &str, decimals: u8) -> Result<U256, LedgerError> {
    if decimals > MAX_TOKEN_DECIMALS {
        return Err(LedgerError::InvalidAmount(format!(
            "token decimals {decimals} not supported"
        )));
    }

    let parts: Vec<&str> = amount.trim().split('.').collect();
    if parts.len() > 2 || parts[0].is_empty() {
        return Err(LedgerError::InvalidAmount(
            "Invalid amount format".to_string(),
        ));
    }

    let whole = parts[0]
        .parse::<u128>()
        .map_err(|_| LedgerError::InvalidAmount("Invalid whole number".to_string()))?;

    let decimal_part = if parts.len() == 2 {
        let dec_str = parts[1];
        if dec_str.len() > decimals as usize {
            return Err(LedgerError::InvalidAmount(format!(
                "Too many decimal places (max {})",
                decimals
            )));
        }
        if dec_str.is_empty() {
            0u128
        } else {
            let padded = format!("{:0<width$}", dec_str, width = decimals as usize);
            padded
                .parse::<u128>()
                .map_err(|_| LedgerError::InvalidAmount("Invalid decimal".to_string()))?
        }
    } else {
        0u128
    };

    let total = 10u128
        .checked_pow(decimals as u32)
        .and_then(|multiplier| whole.checked_mul(multiplier))
        .and_then(|w| w.checked_add(decimal_part))
        .ok_or_else(|| LedgerError::InvalidAmount("Amount overflow".to_string()))?;

    Ok(U256::from(total))
}

/// Format base units as a human-readable amount.
pub fn format_amount(amount: U256, decimals: u8) -> String {
    if amount.is_zero() {
        return "0".to_string();
    }

    let divisor = U256::from(10u64).pow(U256::from(decimals));
    let whole = amount / divisor;
    let remainder = amount % divisor;

    if remainder.is_zero() {
        whole.to_string()
    } else {
        let decimal_str = format!("{:0>width$}", remainder, width = decimals as usize);
        let trimmed = decimal_str.trim_end_matches('0');
        if trimmed.is_empty() {
            whole.to_string()
        } else {
            format!("{}.{}", whole, trimmed)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_parse_amount_usdt() {
        // 1.5 USDT = 1_500_000 (6 decimals)
        assert_eq!(parse_amount("1.5", 6).unwrap(), U256::from(1_500_000u64));
    }

    #[test]
    fn test_parse_amount_eth_small() {
        let result = parse_amount("0.001", 18).unwrap();
        assert_eq!(result, U256::from(1_000_000_000_000_000u64));
    }

    #[test]
    fn test_parse_amount_rejects_excess_precision() {
        assert!(matches!(
            parse_amount("1.0000001", 6),
            Err(LedgerError::InvalidAmount(_))
        ));
    }

    #[test]
    fn test_parse_amount_rejects_garbage() {
        assert!(parse_amount("1.2.3", 6).is_err());
        assert!(parse_amount(".5", 6).is_err());
        assert!(parse_amount("-1", 6).is_err());
    }

    #[test]
    fn test_to_base_units_requires_positive() {
        assert!(to_base_units(Decimal::ZERO, 6).is_err());
        assert!(to_base_units(dec!(-3), 6).is_err());
        assert_eq!(
            to_base_units(dec!(100.00), 6).unwrap(),
            U256::from(100_000_000u64)
        );
    }

    #[test]
    fn test_format_amount_usdt() {
        assert_eq!(format_amount(U256::from(1_000_000u64), 6), "1");
        assert_eq!(format_amount(U256::from(1_500_000u64), 6), "1.5");
        assert_eq!(format_amount(U256::ZERO, 6), "0");
    }

    #[test]
    fn test_from_base_units() {
        assert_eq!(from_base_units(U256::from(250_500_000u64), 6), dec!(250.5));
    }

    #[test]
    fn test_from_base_units_saturates() {
        assert_eq!(from_base_units(U256::MAX, 0), Decimal::MAX);
    }
}
