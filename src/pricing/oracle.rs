// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Rate oracle: live quotes with a TTL cache and static fallback rates.
//!
//! Rates are always "1 unit of token = X units of fiat". A failed live
//! lookup never fails a conversion by itself; the configured fallback rate
//! is returned instead and the quote is marked `stale`.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::{Decimal, RoundingStrategy};
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use utoipa::ToSchema;

use super::currency::{normalize_currency, round_to_minor};
use super::rate_cache::RateCache;

/// Source amounts derived from a fiat target never carry more digits than
/// this, whatever the token supports.
const MAX_DERIVED_SOURCE_DIGITS: u32 = 6;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PriceSourceError {
    #[error("price request failed: {0}")]
    Request(String),

    #[error("price response was invalid: {0}")]
    InvalidResponse(String),

    #[error("no price id for token {0}")]
    UnknownToken(String),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RateError {
    #[error("no rate available for {token}/{currency}")]
    Unavailable { token: String, currency: String },

    #[error("unsupported currency {0}")]
    UnsupportedCurrency(String),

    #[error("{amount} at rate {rate} is out of range")]
    Overflow { amount: Decimal, rate: Decimal },
}

/// Live price lookup.
#[async_trait]
pub trait PriceSource: Send + Sync {
    fn name(&self) -> &'static str;

    async fn fetch_rate(&self, token: &str, currency: &str) -> Result<Decimal, PriceSourceError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum QuoteSource {
    Live,
    Cached,
    Fallback,
}

/// A rate as returned by [`RateOracle::quote`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Quote {
    pub token: String,
    pub currency: String,
    #[schema(value_type = String)]
    pub rate: Decimal,
    /// `true` when the live lookup failed and a static rate was used.
    pub stale: bool,
    pub source: QuoteSource,
    pub quoted_at: DateTime<Utc>,
}

pub struct RateOracle {
    source: Arc<dyn PriceSource>,
    cache: Arc<RateCache>,
    fallback: RwLock<HashMap<(String, String), Decimal>>,
}

impl RateOracle {
    pub fn new(source: Arc<dyn PriceSource>, cache: Arc<RateCache>) -> Self {
        Self {
            source,
            cache,
            fallback: RwLock::new(default_fallback_rates()),
        }
    }

    /// Apply `(token, currency, rate)` overrides on top of the built-in table.
    pub fn with_fallback_overrides(self, overrides: &[(String, String, Decimal)]) -> Self {
        for (token, currency, rate) in overrides {
            self.set_fallback_rate(token, currency, *rate);
        }
        self
    }

    pub fn set_fallback_rate(&self, token: &str, currency: &str, rate: Decimal) {
        if let Ok(mut table) = self.fallback.write() {
            table.insert(pair_key(token, currency), rate);
        }
    }

    pub fn fallback_rate(&self, token: &str, currency: &str) -> Option<Decimal> {
        self.fallback
            .read()
            .ok()?
            .get(&pair_key(token, currency))
            .copied()
    }

    pub async fn quote(&self, token: &str, currency: &str) -> Result<Quote, RateError> {
        let currency = normalize_currency(currency)
            .ok_or_else(|| RateError::UnsupportedCurrency(currency.trim().to_string()))?;
        let token = token.trim().to_ascii_uppercase();

        if let Some(rate) = self.cache.get(&token, &currency) {
            return Ok(build_quote(token, currency, rate, QuoteSource::Cached));
        }

        match self.source.fetch_rate(&token, &currency).await {
            Ok(rate) if rate > Decimal::ZERO => {
                debug!(
                    token = %token,
                    currency = %currency,
                    rate = %rate,
                    source = self.source.name(),
                    "Live rate fetched"
                );
                self.cache.put(&token, &currency, rate);
                return Ok(build_quote(token, currency, rate, QuoteSource::Live));
            }
            Ok(rate) => {
                warn!(
                    token = %token,
                    currency = %currency,
                    rate = %rate,
                    "Ignoring non-positive live rate"
                );
            }
            Err(e) => {
                warn!(
                    token = %token,
                    currency = %currency,
                    error = %e,
                    "Live rate lookup failed, using fallback"
                );
            }
        }

        match self.fallback_rate(&token, &currency) {
            Some(rate) => Ok(build_quote(token, currency, rate, QuoteSource::Fallback)),
            None => Err(RateError::Unavailable { token, currency }),
        }
    }
}

/// `amount * rate`, rounded half-up to the currency's minor units.
pub fn convert(amount: Decimal, rate: Decimal, currency: &str) -> Result<Decimal, RateError> {
    let raw = amount
        .checked_mul(rate)
        .ok_or(RateError::Overflow { amount, rate })?;
    round_to_minor(raw, currency)
        .ok_or_else(|| RateError::UnsupportedCurrency(currency.to_string()))
}

/// Token amount needed to receive `fiat_amount` at `rate`, rounded half-up
/// to the token precision (capped at six digits).
pub fn source_amount_for_fiat(
    fiat_amount: Decimal,
    rate: Decimal,
    token_decimals: u8,
) -> Option<Decimal> {
    if rate <= Decimal::ZERO {
        return None;
    }
    let digits = u32::from(token_decimals).min(MAX_DERIVED_SOURCE_DIGITS);
    fiat_amount
        .checked_div(rate)
        .map(|amount| {
            amount.round_dp_with_strategy(digits, RoundingStrategy::MidpointAwayFromZero)
        })
}

fn build_quote(token: String, currency: String, rate: Decimal, source: QuoteSource) -> Quote {
    Quote {
        token,
        currency,
        rate,
        stale: source == QuoteSource::Fallback,
        source,
        quoted_at: Utc::now(),
    }
}

fn pair_key(token: &str, currency: &str) -> (String, String) {
    (
        token.trim().to_ascii_uppercase(),
        currency.trim().to_ascii_uppercase(),
    )
}

fn default_fallback_rates() -> HashMap<(String, String), Decimal> {
    let stable = [
        ("NGN", dec!(1650)),
        ("USD", dec!(1)),
        ("EUR", dec!(0.92)),
        ("GBP", dec!(0.8)),
    ];
    let table: [(&str, [(&str, Decimal); 4]); 4] = [
        (
            "ETH",
            [
                ("NGN", dec!(6500000)),
                ("USD", dec!(4000)),
                ("EUR", dec!(3700)),
                ("GBP", dec!(3200)),
            ],
        ),
        (
            "STRK",
            [
                ("NGN", dec!(1300)),
                ("USD", dec!(0.8)),
                ("EUR", dec!(0.74)),
                ("GBP", dec!(0.64)),
            ],
        ),
        ("USDC", stable),
        ("USDT", stable),
    ];

    table
        .iter()
        .flat_map(|(token, rates)| {
            rates
                .iter()
                .map(move |(currency, rate)| (pair_key(token, currency), *rate))
        })
        .collect()
}
