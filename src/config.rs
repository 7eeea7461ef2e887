// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Runtime Configuration
//!
//! All configuration is loaded from the environment once at startup into an
//! [`AppConfig`]. Missing provider or ledger settings do not abort startup;
//! the components that need them report `MissingConfig` when called and the
//! readiness probe reports `degraded`.
//!
//! ## Environment Variables
//!
//! | Variable | Description | Default |
//! |----------|-------------|---------|
//! | `HOST` | Server bind address | `0.0.0.0` |
//! | `PORT` | Server bind port | `8080` |
//! | `DATA_DIR` | Directory holding the settlement database | `./data` |
//! | `LOG_FORMAT` | Logging format (`json` or `pretty`) | `pretty` |
//! | `RUST_LOG` | Log level filter | `info,tower_http=debug` |
//! | `TLS_CERT_PATH` / `TLS_KEY_PATH` | PEM certificate and key; HTTPS when both set | unset |
//! | `LEDGER_RPC_URL` | Settlement chain JSON-RPC endpoint | Morph Holesky |
//! | `LEDGER_CHAIN_ID` | Settlement chain id | `2810` |
//! | `LEDGER_EXPLORER_URL` | Block explorer base URL | Morph Holesky explorer |
//! | `FIAT_BRIDGE_ADDRESS` | Bridge contract (allowance spender) | Required for ledger calls |
//! | `SETTLEMENT_TOKENS` | `SYMBOL:0xaddress:decimals,...` | Required for ledger calls |
//! | `LEDGER_SIGNER_KEYS` | Comma-separated custodial private keys (hex) | empty |
//! | `LEDGER_CONFIRMATION_TIMEOUT_SECS` | Receipt wait bound | `120` |
//! | `PAYSTACK_SECRET_KEY` | Provider bearer secret and webhook HMAC key | Required for payouts |
//! | `PAYSTACK_BASE_URL` | Provider API base URL | `https://api.paystack.co` |
//! | `WEBHOOK_DEV_MODE` | Accept unsigned webhooks when no secret is set (`dev` builds only) | `false` |
//! | `PRICE_API_BASE_URL` | Live price API base URL | `https://api.coingecko.com/api/v3` |
//! | `RATE_CACHE_TTL_SECS` | Quote cache TTL | `120` |
//! | `RATE_CACHE_CAPACITY` | Quote cache size | `256` |
//! | `FALLBACK_RATES` | `TOKEN:CUR=rate,...` static rate overrides | built-in table |
//! | `DEFAULT_FIAT_CURRENCY` | Currency assumed for chat intents | `NGN` |
//! | `INTENT_MIN_CONFIDENCE` | Minimum classifier confidence | `0.5` |
//! | `SETTLEMENT_CLAIM_TTL_SECS` | Lease on an in-flight settlement step | `600` |
//! | `MONITOR_INTERVAL_SECS` | Stuck-record monitor sweep interval | `60` |
//! | `AWAITING_WEBHOOK_ALERT_SECS` | Age at which a payout awaiting its webhook is flagged | `1800` |

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use rust_decimal::Decimal;
use tracing::warn;

pub const HOST_ENV: &str = "HOST";
pub const PORT_ENV: &str = "PORT";

/// Root directory for the embedded settlement database.
///
/// # Default
/// `./data`
pub const DATA_DIR_ENV: &str = "DATA_DIR";

pub const LOG_FORMAT_ENV: &str = "LOG_FORMAT";
pub const TLS_CERT_PATH_ENV: &str = "TLS_CERT_PATH";
pub const TLS_KEY_PATH_ENV: &str = "TLS_KEY_PATH";

pub const LEDGER_RPC_URL_ENV: &str = "LEDGER_RPC_URL";
pub const LEDGER_CHAIN_ID_ENV: &str = "LEDGER_CHAIN_ID";
pub const LEDGER_EXPLORER_URL_ENV: &str = "LEDGER_EXPLORER_URL";
pub const FIAT_BRIDGE_ADDRESS_ENV: &str = "FIAT_BRIDGE_ADDRESS";
pub const SETTLEMENT_TOKENS_ENV: &str = "SETTLEMENT_TOKENS";
pub const LEDGER_SIGNER_KEYS_ENV: &str = "LEDGER_SIGNER_KEYS";
pub const LEDGER_CONFIRMATION_TIMEOUT_ENV: &str = "LEDGER_CONFIRMATION_TIMEOUT_SECS";

pub const PAYSTACK_SECRET_KEY_ENV: &str = "PAYSTACK_SECRET_KEY";
pub const PAYSTACK_BASE_URL_ENV: &str = "PAYSTACK_BASE_URL";
pub const WEBHOOK_DEV_MODE_ENV: &str = "WEBHOOK_DEV_MODE";

pub const PRICE_API_BASE_URL_ENV: &str = "PRICE_API_BASE_URL";
pub const RATE_CACHE_TTL_ENV: &str = "RATE_CACHE_TTL_SECS";
pub const RATE_CACHE_CAPACITY_ENV: &str = "RATE_CACHE_CAPACITY";
pub const FALLBACK_RATES_ENV: &str = "FALLBACK_RATES";

pub const DEFAULT_FIAT_CURRENCY_ENV: &str = "DEFAULT_FIAT_CURRENCY";
pub const INTENT_MIN_CONFIDENCE_ENV: &str = "INTENT_MIN_CONFIDENCE";
pub const SETTLEMENT_CLAIM_TTL_ENV: &str = "SETTLEMENT_CLAIM_TTL_SECS";
pub const MONITOR_INTERVAL_ENV: &str = "MONITOR_INTERVAL_SECS";
pub const AWAITING_WEBHOOK_ALERT_ENV: &str = "AWAITING_WEBHOOK_ALERT_SECS";

const DEFAULT_RPC_URL: &str = "https://rpc-quicknode-holesky.morphl2.io";
const DEFAULT_CHAIN_ID: u64 = 2810;
const DEFAULT_EXPLORER_URL: &str = "https://explorer-holesky.morphl2.io";
const DEFAULT_PAYSTACK_BASE_URL: &str = "https://api.paystack.co";
const DEFAULT_PRICE_API_BASE_URL: &str = "https://api.coingecko.com/api/v3";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value for {name}: {reason}")]
    Invalid { name: &'static str, reason: String },
}

/// One `SETTLEMENT_TOKENS` entry before address validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenSpec {
    pub symbol: String,
    pub address: String,
    pub decimals: u8,
}

#[derive(Debug, Clone)]
pub struct LedgerConfig {
    pub rpc_url: String,
    pub chain_id: u64,
    pub explorer_url: String,
    pub bridge_address: Option<String>,
    pub tokens: Vec<TokenSpec>,
    pub signer_keys: Vec<String>,
    pub confirmation_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct BankProviderConfig {
    pub secret_key: Option<String>,
    pub base_url: String,
    pub webhook_dev_mode: bool,
}

#[derive(Debug, Clone)]
pub struct PricingConfig {
    pub api_base_url: String,
    pub cache_ttl: Duration,
    pub cache_capacity: usize,
    /// `(token, currency, rate)` overrides applied on top of the built-in table.
    pub fallback_overrides: Vec<(String, String, Decimal)>,
}

#[derive(Debug, Clone)]
pub struct SettlementConfig {
    pub claim_ttl: Duration,
    pub monitor_interval: Duration,
    pub awaiting_webhook_alert: Duration,
}

#[derive(Debug, Clone)]
pub struct IntentConfig {
    pub default_fiat_currency: String,
    pub min_confidence: f64,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub data_dir: PathBuf,
    pub tls_cert_path: Option<PathBuf>,
    pub tls_key_path: Option<PathBuf>,
    pub ledger: LedgerConfig,
    pub bank: BankProviderConfig,
    pub pricing: PricingConfig,
    pub settlement: SettlementConfig,
    pub intent: IntentConfig,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let port = parse_env(PORT_ENV, 8080u16)?;

        let tokens = match env_optional(SETTLEMENT_TOKENS_ENV) {
            Some(raw) => parse_token_specs(&raw)?,
            None => Vec::new(),
        };
        let signer_keys = env_optional(LEDGER_SIGNER_KEYS_ENV)
            .map(|raw| {
                raw.split(',')
                    .map(|key| key.trim().trim_start_matches("0x").to_string())
                    .filter(|key| !key.is_empty())
                    .collect()
            })
            .unwrap_or_default();

        let requested_dev_mode = env_flag(WEBHOOK_DEV_MODE_ENV);
        let webhook_dev_mode = requested_dev_mode && cfg!(feature = "dev");
        if requested_dev_mode && !webhook_dev_mode {
            warn!(
                "WEBHOOK_DEV_MODE is set but this build lacks the `dev` feature; webhook signatures stay enforced"
            );
        }

        let fallback_overrides = match env_optional(FALLBACK_RATES_ENV) {
            Some(raw) => parse_fallback_rates(&raw)?,
            None => Vec::new(),
        };

        let confirmation_timeout =
            Duration::from_secs(parse_env(LEDGER_CONFIRMATION_TIMEOUT_ENV, 120u64)?);
        let claim_ttl = Duration::from_secs(parse_env(SETTLEMENT_CLAIM_TTL_ENV, 600u64)?);
        check_claim_outlives_confirmation(confirmation_timeout, claim_ttl)?;

        Ok(Self {
            host: env_or_default(HOST_ENV, "0.0.0.0"),
            port,
            data_dir: PathBuf::from(env_or_default(DATA_DIR_ENV, "./data")),
            tls_cert_path: env_optional(TLS_CERT_PATH_ENV).map(PathBuf::from),
            tls_key_path: env_optional(TLS_KEY_PATH_ENV).map(PathBuf::from),
            ledger: LedgerConfig {
                rpc_url: env_or_default(LEDGER_RPC_URL_ENV, DEFAULT_RPC_URL),
                chain_id: parse_env(LEDGER_CHAIN_ID_ENV, DEFAULT_CHAIN_ID)?,
                explorer_url: env_or_default(LEDGER_EXPLORER_URL_ENV, DEFAULT_EXPLORER_URL),
                bridge_address: env_optional(FIAT_BRIDGE_ADDRESS_ENV),
                tokens,
                signer_keys,
                confirmation_timeout,
            },
            bank: BankProviderConfig {
                secret_key: env_optional(PAYSTACK_SECRET_KEY_ENV),
                base_url: env_or_default(PAYSTACK_BASE_URL_ENV, DEFAULT_PAYSTACK_BASE_URL),
                webhook_dev_mode,
            },
            pricing: PricingConfig {
                api_base_url: env_or_default(PRICE_API_BASE_URL_ENV, DEFAULT_PRICE_API_BASE_URL),
                cache_ttl: Duration::from_secs(parse_env(RATE_CACHE_TTL_ENV, 120u64)?),
                cache_capacity: parse_env(RATE_CACHE_CAPACITY_ENV, 256usize)?,
                fallback_overrides,
            },
            settlement: SettlementConfig {
                claim_ttl,
                monitor_interval: Duration::from_secs(parse_env(MONITOR_INTERVAL_ENV, 60u64)?),
                awaiting_webhook_alert: Duration::from_secs(parse_env(
                    AWAITING_WEBHOOK_ALERT_ENV,
                    1800u64,
                )?),
            },
            intent: IntentConfig {
                default_fiat_currency: env_or_default(DEFAULT_FIAT_CURRENCY_ENV, "NGN")
                    .to_ascii_uppercase(),
                min_confidence: parse_env(INTENT_MIN_CONFIDENCE_ENV, 0.5f64)?,
            },
        })
    }

    /// HTTPS is enabled only when both PEM paths are configured.
    pub fn tls_paths(&self) -> Option<(&PathBuf, &PathBuf)> {
        match (&self.tls_cert_path, &self.tls_key_path) {
            (Some(cert), Some(key)) => Some((cert, key)),
            _ => None,
        }
    }

    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join("settlement.redb")
    }
}

/// Parse `SYMBOL:0xaddress:decimals` entries separated by commas.
/// A claim that expires while a ledger transfer still waits for its receipt
/// could be taken over, and the transfer submitted twice.
pub fn check_claim_outlives_confirmation(
    confirmation_timeout: Duration,
    claim_ttl: Duration,
) -> Result<(), ConfigError> {
    if confirmation_timeout >= claim_ttl {
        return Err(ConfigError::Invalid {
            name: SETTLEMENT_CLAIM_TTL_ENV,
            reason: format!(
                "must exceed {LEDGER_CONFIRMATION_TIMEOUT_ENV} ({}s), got {}s",
                confirmation_timeout.as_secs(),
                claim_ttl.as_secs()
            ),
        });
    }
    Ok(())
}

pub fn parse_token_specs(raw: &str) -> Result<Vec<TokenSpec>, ConfigError> {
    let invalid = |reason: String| ConfigError::Invalid {
        name: SETTLEMENT_TOKENS_ENV,
        reason,
    };

    raw.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| {
            let parts: Vec<&str> = entry.split(':').map(str::trim).collect();
            let [symbol, address, decimals] = parts.as_slice() else {
                return Err(invalid(format!(
                    "`{entry}` is not SYMBOL:ADDRESS:DECIMALS"
                )));
            };
            if symbol.is_empty() || address.is_empty() {
                return Err(invalid(format!("`{entry}` has an empty field")));
            }
            let decimals = decimals
                .parse::<u8>()
                .map_err(|e| invalid(format!("`{entry}` decimals: {e}")))?;
            Ok(TokenSpec {
                symbol: symbol.to_ascii_uppercase(),
                address: address.to_string(),
                decimals,
            })
        })
        .collect()
}

/// Parse `TOKEN:CUR=rate` entries separated by commas.
pub fn parse_fallback_rates(raw: &str) -> Result<Vec<(String, String, Decimal)>, ConfigError> {
    let invalid = |reason: String| ConfigError::Invalid {
        name: FALLBACK_RATES_ENV,
        reason,
    };

    raw.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| {
            let (pair, rate) = entry
                .split_once('=')
                .ok_or_else(|| invalid(format!("`{entry}` is not TOKEN:CUR=rate")))?;
            let (token, currency) = pair
                .split_once(':')
                .ok_or_else(|| invalid(format!("`{entry}` is not TOKEN:CUR=rate")))?;
            let rate = Decimal::from_str(rate.trim())
                .map_err(|e| invalid(format!("`{entry}` rate: {e}")))?;
            if rate <= Decimal::ZERO {
                return Err(invalid(format!("`{entry}` rate must be positive")));
            }
            Ok((
                token.trim().to_ascii_uppercase(),
                currency.trim().to_ascii_uppercase(),
                rate,
            ))
        })
        .collect()
}

pub fn env_optional(name: &str) -> Option<String> {
    match std::env::var(name) {
        Ok(value) => {
            let trimmed = value.trim().to_string();
            if trimmed.is_empty() {
                None
            } else {
                Some(trimmed)
            }
        }
        Err(_) => None,
    }
}

pub fn env_or_default(name: &str, default: &str) -> String {
    env_optional(name).unwrap_or_else(|| default.to_string())
}

fn env_flag(name: &str) -> bool {
    env_optional(name)
        .map(|value| matches!(value.to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
        .unwrap_or(false)
}

fn parse_env<T>(name: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env_optional(name) {
        Some(raw) => raw.parse::<T>().map_err(|e| ConfigError::Invalid {
            name,
            reason: e.to_string(),
        }),
        None => Ok(default),
    }
}
