// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Settlement chain types: network description and the token registry.

use std::collections::HashMap;
use std::str::FromStr;

use alloy::primitives::Address;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::ledger::LedgerError;
use crate::config::{LedgerConfig, TokenSpec};

/// Settlement network configuration.
#[derive(Debug, Clone)]
pub struct NetworkConfig {
    /// Chain ID
    pub chain_id: u64,
    /// RPC endpoint URL
    pub rpc_url: String,
    /// Block explorer URL
    pub explorer_url: String,
}

impl NetworkConfig {
    pub fn from_ledger_config(config: &LedgerConfig) -> Self {
        Self {
            chain_id: config.chain_id,
            rpc_url: config.rpc_url.clone(),
            explorer_url: config.explorer_url.clone(),
        }
    }

    pub fn explorer_tx_url(&self, tx_hash: &str) -> String {
        format!("{}/tx/{}", self.explorer_url.trim_end_matches('/'), tx_hash)
    }
}

/// An ERC-20 token accepted for conversion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct SettlementToken {
    /// Upper-case symbol, e.g. `USDT`.
    pub symbol: String,
    /// Checksummed contract address.
    pub address: String,
    pub decimals: u8,
}

/// Parse an EVM address and return its checksummed form.
pub fn checksum_address(raw: &str) -> Result<String, LedgerError> {
    Address::from_str(raw.trim())
        .map(|address| address.to_checksum(None))
        .map_err(|e| LedgerError::InvalidAddress(format!("{}: {e}", raw.trim())))
}

/// Symbol lookup for the tokens this deployment settles.
#[derive(Debug, Clone, Default)]
pub struct TokenRegistry {
    tokens: HashMap<String, SettlementToken>,
}

impl TokenRegistry {
    pub fn from_specs(specs: &[TokenSpec]) -> Result<Self, LedgerError> {
        let mut tokens = HashMap::with_capacity(specs.len());
        for spec in specs {
            let address = Address::from_str(&spec.address).map_err(|e| {
                LedgerError::InvalidAddress(format!("token {}: {e}", spec.symbol))
            })?;
            tokens.insert(
                spec.symbol.to_ascii_uppercase(),
                SettlementToken {
                    symbol: spec.symbol.to_ascii_uppercase(),
                    address: address.to_checksum(None),
                    decimals: spec.decimals,
                },
            );
        }
        Ok(Self { tokens })
    }

    /// Case-insensitive lookup.
    pub fn get(&self, symbol: &str) -> Result<SettlementToken, LedgerError> {
        self.tokens
            .get(&symbol.trim().to_ascii_uppercase())
            .cloned()
            .ok_or_else(|| LedgerError::UnsupportedToken(symbol.trim().to_string()))
    }

    pub fn symbols(&self) -> Vec<String> {
        let mut symbols: Vec<String> = self.tokens.keys().cloned().collect();
        symbols.sort();
        symbols
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checksum_address_normalizes_case() {
        assert_eq!(
            checksum_address(" 0xf39fd6e51aad88f6f4ce6ab8827279cfffb92266 ").unwrap(),
            "0xf39Fd6e51aad88F6F4ce6aB8827279cffFb92266"
        );
        assert!(matches!(
            checksum_address("0x1234"),
            Err(LedgerError::InvalidAddress(_))
        ));
    }

    fn usdt_spec() -> TokenSpec {
        TokenSpec {
            symbol: "USDT".to_string(),
            address: "0x9e12ad42c4e4d2acfbade01a96446e48e6764b98".to_string(),
            decimals: 6,
        }
    }

    #[test]
    fn registry_lookup_is_case_insensitive() {
        let registry = TokenRegistry::from_specs(&[usdt_spec()]).unwrap();
        let token = registry.get("usdt").unwrap();
        assert_eq!(token.symbol, "USDT");
        assert_eq!(token.decimals, 6);
        assert!(token.address.starts_with("0x"));
    }

    #[test]
    fn registry_rejects_unknown_symbol() {
        let registry = TokenRegistry::from_specs(&[usdt_spec()]).unwrap();
        assert!(matches!(
            registry.get("DOGE"),
            Err(LedgerError::UnsupportedToken(symbol)) if symbol == "DOGE"
        ));
    }

    #[test]
    fn registry_rejects_bad_address() {
        let mut spec = usdt_spec();
        spec.address = "0xnot-an-address".to_string();
        assert!(matches!(
            TokenRegistry::from_specs(&[spec]),
            Err(LedgerError::InvalidAddress(_))
        ));
    }

    #[test]
    fn explorer_url_joins_without_double_slash() {
        let network = NetworkConfig {
            chain_id: 2810,
            rpc_url: "https://rpc.example".to_string(),
            explorer_url: "https://explorer.example/".to_string(),
        };
        assert_eq!(
            network.explorer_tx_url("0xabc"),
            "https://explorer.example/tx/0xabc"
        );
    }
}
