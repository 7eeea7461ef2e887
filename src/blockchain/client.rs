// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! EVM settlement chain client backed by alloy.

use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;

use alloy::{
    network::EthereumWallet,
    primitives::{Address, TxHash, U256},
    providers::{Provider, ProviderBuilder},
    signers::local::PrivateKeySigner,
};
use async_trait::async_trait;
use rust_decimal::Decimal;
use tracing::{info, warn};

use super::contracts::{IFiatBridge, IERC20};
use super::ledger::{LedgerClient, LedgerError, OfframpTransfer};
use super::types::{NetworkConfig, SettlementToken, TokenRegistry};
use super::units::{from_base_units, to_base_units};
use crate::config::LedgerConfig;

/// How a failed `send()` should be reported to the state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
enum SendFailure {
    /// Never reached the node; safe to retry.
    Network(String),
    /// The node answered with an error and did not accept the transaction.
    Rejected(String),
    /// Encoding or signing failed before broadcast.
    Local(String),
}

/// Ledger client for the configured settlement chain.
///
/// Owner accounts are custodial: each owner address must have a signer
/// loaded from `LEDGER_SIGNER_KEYS`. A request for an owner with no signer
/// is treated as a declined signature.
pub struct EvmLedgerClient {
    network: NetworkConfig,
    rpc_url: url::Url,
    bridge: Option<Address>,
    tokens: TokenRegistry,
    signers: HashMap<Address, PrivateKeySigner>,
    confirmation_timeout: Duration,
}

impl EvmLedgerClient {
    pub fn new(config: &LedgerConfig) -> Result<Self, LedgerError> {
        let network = NetworkConfig::from_ledger_config(config);
        let rpc_url: url::Url = network
            .rpc_url
            .parse()
            .map_err(|e: url::ParseError| LedgerError::MissingConfig(format!("rpc url: {e}")))?;

        let bridge = config
            .bridge_address
            .as_deref()
            .map(parse_address)
            .transpose()?;

        let mut signers = HashMap::new();
        for key in &config.signer_keys {
            let signer = create_signer(key)?;
            signers.insert(signer.address(), signer);
        }

        info!(
            chain_id = network.chain_id,
            tokens = ?config.tokens.iter().map(|t| t.symbol.as_str()).collect::<Vec<_>>(),
            signers = signers.len(),
            bridge_configured = bridge.is_some(),
            "Ledger client configured"
        );

        Ok(Self {
            tokens: TokenRegistry::from_specs(&config.tokens)?,
            network,
            rpc_url,
            bridge,
            signers,
            confirmation_timeout: config.confirmation_timeout,
        })
    }

    pub fn network(&self) -> &NetworkConfig {
        &self.network
    }

    /// Bridge contract and at least one settlement token are set.
    pub fn is_configured(&self) -> bool {
        self.bridge.is_some() && !self.tokens.symbols().is_empty()
    }

    fn wallet_for(&self, owner: Address) -> Option<EthereumWallet> {
        self.signers
            .get(&owner)
            .map(|signer| EthereumWallet::from(signer.clone()))
    }

    async fn receipt_status(
        &self,
        pending: alloy::providers::PendingTransactionBuilder<alloy::network::Ethereum>,
    ) -> Result<(String, bool), LedgerError> {
        let tx_hash = format!("{:?}", pending.tx_hash());
        match pending
            .with_timeout(Some(self.confirmation_timeout))
            .get_receipt()
            .await
        {
            Ok(receipt) => Ok((tx_hash, receipt.status())),
            Err(e) => {
                warn!(tx_hash = %tx_hash, error = %e, "No receipt within confirmation window");
                Err(LedgerError::ConfirmationTimeout { tx_hash })
            }
        }
    }
}

#[async_trait]
impl LedgerClient for EvmLedgerClient {
    fn token(&self, symbol: &str) -> Result<SettlementToken, LedgerError> {
        self.tokens.get(symbol)
    }

    fn spender(&self) -> Result<String, LedgerError> {
        self.bridge
            .map(|address| address.to_checksum(None))
            .ok_or_else(|| LedgerError::MissingConfig("FIAT_BRIDGE_ADDRESS".to_string()))
    }

    fn explorer_tx_url(&self, tx_hash: &str) -> Option<String> {
        Some(self.network.explorer_tx_url(tx_hash))
    }

    async fn get_balance(
        &self,
        token: &SettlementToken,
        owner: &str,
    ) -> Result<Decimal, LedgerError> {
        let owner = parse_address(owner)?;
        let provider = ProviderBuilder::new().connect_http(self.rpc_url.clone());
        let contract = IERC20::new(parse_address(&token.address)?, provider);

        let balance: U256 = contract
            .balanceOf(owner)
            .call()
            .await
            .map_err(|e| LedgerError::Network(e.to_string()))?;
        Ok(from_base_units(balance, token.decimals))
    }

    async fn get_allowance(
        &self,
        token: &SettlementToken,
        owner: &str,
        spender: &str,
    ) -> Result<Decimal, LedgerError> {
        let owner = parse_address(owner)?;
        let spender = parse_address(spender)?;
        let provider = ProviderBuilder::new().connect_http(self.rpc_url.clone());
        let contract = IERC20::new(parse_address(&token.address)?, provider);

        let allowance: U256 = contract
            .allowance(owner, spender)
            .call()
            .await
            .map_err(|e| LedgerError::Network(e.to_string()))?;
        Ok(from_base_units(allowance, token.decimals))
    }

    async fn approve(
        &self,
        token: &SettlementToken,
        owner: &str,
        spender: &str,
        amount: Decimal,
    ) -> Result<String, LedgerError> {
        let owner = parse_address(owner)?;
        let spender = parse_address(spender)?;
        let raw_amount = to_base_units(amount, token.decimals)?;
        let wallet = self.wallet_for(owner).ok_or_else(|| {
            LedgerError::ApprovalRejected(format!("no signer available for {owner}"))
        })?;

        let provider = ProviderBuilder::new()
            .wallet(wallet)
            .connect_http(self.rpc_url.clone());
        let contract = IERC20::new(parse_address(&token.address)?, provider);

        let pending = contract
            .approve(spender, raw_amount)
            .send()
            .await
            .map_err(|e| match classify_send_error(e) {
                SendFailure::Network(msg) => LedgerError::Network(msg),
                SendFailure::Rejected(msg) => LedgerError::ApprovalRejected(msg),
                SendFailure::Local(msg) => LedgerError::Build(msg),
            })?;

        let (tx_hash, success) = self.receipt_status(pending).await?;
        if !success {
            return Err(LedgerError::ApprovalFailed(tx_hash));
        }
        info!(tx_hash = %tx_hash, token = %token.symbol, "Approval confirmed");
        Ok(tx_hash)
    }

    async fn submit_transfer(&self, transfer: &OfframpTransfer) -> Result<String, LedgerError> {
        let owner = parse_address(&transfer.owner)?;
        let bridge = parse_address(&transfer.spender)?;
        let token_address = parse_address(&transfer.token.address)?;
        let token_amount = to_base_units(transfer.amount, transfer.token.decimals)?;
        let wallet = self.wallet_for(owner).ok_or_else(|| {
            LedgerError::TransferRejected(format!("no signer available for {owner}"))
        })?;

        let provider = ProviderBuilder::new()
            .wallet(wallet)
            .connect_http(self.rpc_url.clone());
        let contract = IFiatBridge::new(bridge, provider);

        let pending = contract
            .initiateOfframp(
                token_address,
                token_amount,
                U256::from(transfer.fiat_amount_minor),
                transfer.fiat_currency.clone(),
                transfer.correlation_id.clone(),
            )
            .send()
            .await
            .map_err(|e| match classify_send_error(e) {
                SendFailure::Network(msg) => LedgerError::Network(msg),
                SendFailure::Rejected(msg) => LedgerError::TransferRejected(msg),
                SendFailure::Local(msg) => LedgerError::Build(msg),
            })?;

        let (tx_hash, success) = self.receipt_status(pending).await?;
        if !success {
            return Err(LedgerError::TransferReverted(tx_hash));
        }
        info!(
            tx_hash = %tx_hash,
            conversion_id = %transfer.correlation_id,
            "Bridge transfer confirmed"
        );
        Ok(tx_hash)
    }

    async fn transaction_outcome(&self, tx_hash: &str) -> Result<Option<bool>, LedgerError> {
        let hash = TxHash::from_str(tx_hash)
            .map_err(|e| LedgerError::InvalidAddress(format!("Invalid tx hash: {e}")))?;
        let provider = ProviderBuilder::new().connect_http(self.rpc_url.clone());

        let receipt = provider
            .get_transaction_receipt(hash)
            .await
            .map_err(|e| LedgerError::Network(format!("Failed to get receipt: {e}")))?;
        Ok(receipt.map(|r| r.status()))
    }
}

fn classify_send_error(error: alloy::contract::Error) -> SendFailure {
    match error {
        alloy::contract::Error::TransportError(err) if err.is_error_resp() => {
            SendFailure::Rejected(err.to_string())
        }
        alloy::contract::Error::TransportError(err) if err.is_transport_error() => {
            SendFailure::Network(err.to_string())
        }
        other => SendFailure::Local(other.to_string()),
    }
}

fn parse_address(raw: &str) -> Result<Address, LedgerError> {
    Address::from_str(raw.trim()).map_err(|e| LedgerError::InvalidAddress(e.to_string()))
}

/// Create a signer from a hex private key (with or without `0x`).
pub fn create_signer(private_key_hex: &str) -> Result<PrivateKeySigner, LedgerError> {
    let key_bytes = alloy::hex::decode(private_key_hex.trim().trim_start_matches("0x"))
        .map_err(|e| LedgerError::MissingConfig(format!("invalid signer key: {e}")))?;

    PrivateKeySigner::from_slice(&key_bytes)
        .map_err(|e| LedgerError::MissingConfig(format!("invalid signer key: {e}")))
}
