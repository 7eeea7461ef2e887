// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! CoinGecko simple-price lookup.

use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use rust_decimal::Decimal;
use serde_json::Value;

use super::oracle::{PriceSource, PriceSourceError};

#[derive(Debug, Clone)]
pub struct CoinGeckoSource {
    base_url: String,
    http: Client,
}

impl CoinGeckoSource {
    pub fn new(base_url: &str) -> Result<Self, PriceSourceError> {
        let http = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| PriceSourceError::Request(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            http,
        })
    }
}

/// CoinGecko coin id for a token symbol.
pub fn coin_id(token: &str) -> Option<&'static str> {
    match token.trim().to_ascii_uppercase().as_str() {
        "ETH" => Some("ethereum"),
        "USDC" => Some("usd-coin"),
        "USDT" => Some("tether"),
        "STRK" => Some("starknet"),
        _ => None,
    }
}

#[async_trait]
impl PriceSource for CoinGeckoSource {
    fn name(&self) -> &'static str {
        "coingecko"
    }

    async fn fetch_rate(&self, token: &str, currency: &str) -> Result<Decimal, PriceSourceError> {
        let id = coin_id(token).ok_or_else(|| PriceSourceError::UnknownToken(token.to_string()))?;
        let vs_currency = currency.to_ascii_lowercase();

        let response = self
            .http
            .get(format!("{}/simple/price", self.base_url))
            .query(&[("ids", id), ("vs_currencies", vs_currency.as_str())])
            .send()
            .await
            .map_err(|e| PriceSourceError::Request(e.to_string()))?;

        if !response.status().is_success() {
            return Err(PriceSourceError::Request(format!(
                "simple/price returned {}",
                response.status()
            )));
        }

        let body: HashMap<String, HashMap<String, Value>> = response
            .json()
            .await
            .map_err(|e| PriceSourceError::InvalidResponse(e.to_string()))?;

        extract_rate(&body, id, &vs_currency)
    }
}

fn extract_rate(
    body: &HashMap<String, HashMap<String, Value>>,
    id: &str,
    vs_currency: &str,
) -> Result<Decimal, PriceSourceError> {
    let value = body
        .get(id)
        .and_then(|prices| prices.get(vs_currency))
        .ok_or_else(|| {
            PriceSourceError::InvalidResponse(format!("no {vs_currency} price for {id}"))
        })?;

    let Value::Number(number) = value else {
        return Err(PriceSourceError::InvalidResponse(format!(
            "{id}/{vs_currency} price is not a number"
        )));
    };
    let text = number.to_string();
    Decimal::from_str(&text)
        .or_else(|_| Decimal::from_scientific(&text))
        .map_err(|e| PriceSourceError::InvalidResponse(format!("{id}/{vs_currency}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn body(json: &str) -> HashMap<String, HashMap<String, Value>> {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn coin_ids_cover_supported_tokens() {
        assert_eq!(coin_id("usdt"), Some("tether"));
        assert_eq!(coin_id("USDC"), Some("usd-coin"));
        assert_eq!(coin_id("ETH"), Some("ethereum"));
        assert_eq!(coin_id("DOGE"), None);
    }

    #[test]
    fn extract_rate_reads_nested_price() {
        let parsed = body(r#"{"tether":{"ngn":1532.47}}"#);
        assert_eq!(extract_rate(&parsed, "tether", "ngn").unwrap(), dec!(1532.47));
    }

    #[test]
    fn extract_rate_handles_scientific_notation() {
        let parsed = body(r#"{"tether":{"usd":1e0}}"#);
        assert_eq!(extract_rate(&parsed, "tether", "usd").unwrap(), dec!(1));
    }

    #[test]
    fn extract_rate_reports_missing_currency() {
        let parsed = body(r#"{"tether":{"usd":1.0}}"#);
        assert!(matches!(
            extract_rate(&parsed, "tether", "ngn"),
            Err(PriceSourceError::InvalidResponse(_))
        ));
    }

    #[tokio::test]
    async fn live_price_is_requested_by_coin_id() {
        let server = httpmock::MockServer::start_async().await;
        let price = server
            .mock_async(|when, then| {
                when.method(httpmock::Method::GET)
                    .path("/simple/price")
                    .query_param("ids", "tether")
                    .query_param("vs_currencies", "ngn");
                then.status(200)
                    .json_body(serde_json::json!({ "tether": { "ngn": 1532.47 } }));
            })
            .await;

        let source = CoinGeckoSource::new(&server.base_url()).unwrap();
        assert_eq!(source.fetch_rate("USDT", "NGN").await.unwrap(), dec!(1532.47));
        price.assert_async().await;
    }

    #[tokio::test]
    async fn rate_limited_lookup_is_a_request_error() {
        let server = httpmock::MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(httpmock::Method::GET).path("/simple/price");
                then.status(429);
            })
            .await;

        let source = CoinGeckoSource::new(&server.base_url()).unwrap();
        assert!(matches!(
            source.fetch_rate("USDT", "NGN").await,
            Err(PriceSourceError::Request(_))
        ));
    }

    #[tokio::test]
    async fn unknown_token_fails_without_request() {
        let source = CoinGeckoSource::new("http://127.0.0.1:9").unwrap();
        assert_eq!(
            source.fetch_rate("DOGE", "NGN").await.unwrap_err(),
            PriceSourceError::UnknownToken("DOGE".to_string())
        );
    }
}
