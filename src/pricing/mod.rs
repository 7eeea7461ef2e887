// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Token-to-fiat pricing.

pub mod coingecko;
pub mod currency;
pub mod oracle;
pub mod rate_cache;

pub use coingecko::CoinGeckoSource;
pub use currency::{minor_unit_digits, normalize_currency, round_to_minor, to_minor_units};
pub use oracle::{
    convert, source_amount_for_fiat, PriceSource, PriceSourceError, Quote, QuoteSource,
    RateError, RateOracle,
};
pub use rate_cache::RateCache;
