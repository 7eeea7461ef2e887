// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Fiat currency precision and rounding.

use rust_decimal::{Decimal, RoundingStrategy};

/// Minor-unit digits per supported payout currency (ISO 4217).
const MINOR_UNITS: [(&str, u32); 8] = [
    ("NGN", 2),
    ("USD", 2),
    ("EUR", 2),
    ("GBP", 2),
    ("GHS", 2),
    ("KES", 2),
    ("ZAR", 2),
    ("JPY", 0),
];

/// Normalize a currency code and check it is supported.
pub fn normalize_currency(code: &str) -> Option<String> {
    let code = code.trim().to_ascii_uppercase();
    minor_unit_digits(&code).map(|_| code)
}

pub fn minor_unit_digits(currency: &str) -> Option<u32> {
    MINOR_UNITS
        .iter()
        .find(|(code, _)| code.eq_ignore_ascii_case(currency.trim()))
        .map(|(_, digits)| *digits)
}

/// Round half-up (midpoints away from zero) to the currency's precision.
pub fn round_to_minor(amount: Decimal, currency: &str) -> Option<Decimal> {
    let digits = minor_unit_digits(currency)?;
    Some(amount.round_dp_with_strategy(digits, RoundingStrategy::MidpointAwayFromZero))
}

/// Integer minor units (e.g. kobo) for a fiat amount. `None` for
/// unsupported currencies, negative amounts or overflow.
pub fn to_minor_units(amount: Decimal, currency: &str) -> Option<u64> {
    let digits = minor_unit_digits(currency)?;
    let rounded = round_to_minor(amount, currency)?;
    let scaled = rounded.checked_mul(Decimal::from(10u64.checked_pow(digits)?))?;
    u64::try_from(scaled.trunc()).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn supported_currencies_normalize() {
        assert_eq!(normalize_currency(" ngn "), Some("NGN".to_string()));
        assert_eq!(normalize_currency("XYZ"), None);
    }

    #[test]
    fn rounding_is_half_up() {
        assert_eq!(round_to_minor(dec!(10.005), "NGN"), Some(dec!(10.01)));
        assert_eq!(round_to_minor(dec!(10.004), "NGN"), Some(dec!(10.00)));
        assert_eq!(round_to_minor(dec!(10.5), "JPY"), Some(dec!(11)));
    }

    #[test]
    fn minor_units_conversion() {
        assert_eq!(to_minor_units(dec!(180000), "NGN"), Some(18_000_000));
        assert_eq!(to_minor_units(dec!(25.505), "USD"), Some(2551));
        assert_eq!(to_minor_units(dec!(1200), "JPY"), Some(1200));
        assert_eq!(to_minor_units(dec!(-1), "NGN"), None);
        assert_eq!(to_minor_units(dec!(1), "XYZ"), None);
    }
}
