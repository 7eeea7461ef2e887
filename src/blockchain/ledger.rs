// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Ledger client contract used by the settlement state machine.
//!
//! Implementations are stateless wrappers around the settlement chain. Write
//! operations block until the transaction is mined (or the confirmation wait
//! times out) so callers only ever observe a confirmed outcome or a typed
//! error.

use async_trait::async_trait;
use rust_decimal::Decimal;
use tracing::info;

use super::types::SettlementToken;

/// Approvals are sized at this multiple of the required amount so repeat
/// conversions usually skip the approval step.
pub const APPROVAL_BUFFER_MULTIPLIER: u32 = 2;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LedgerError {
    #[error("ledger RPC failure: {0}")]
    Network(String),

    /// The transaction could not be encoded or signed, so nothing was
    /// broadcast.
    #[error("transaction could not be built: {0}")]
    Build(String),

    #[error("ledger configuration missing: {0}")]
    MissingConfig(String),

    #[error("invalid address: {0}")]
    InvalidAddress(String),

    #[error("invalid amount: {0}")]
    InvalidAmount(String),

    #[error("unsupported token: {0}")]
    UnsupportedToken(String),

    #[error("approval rejected by signer: {0}")]
    ApprovalRejected(String),

    #[error("approval transaction failed: {0}")]
    ApprovalFailed(String),

    #[error("transfer rejected by signer: {0}")]
    TransferRejected(String),

    #[error("transfer reverted: {0}")]
    TransferReverted(String),

    /// The transaction was broadcast but no receipt arrived in time. Its
    /// outcome is unknown and it must be looked up, not resubmitted.
    #[error("confirmation timed out for {tx_hash}")]
    ConfirmationTimeout { tx_hash: String },
}

impl LedgerError {
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Network(_)
                | Self::Build(_)
                | Self::MissingConfig(_)
                | Self::ConfirmationTimeout { .. }
        )
    }
}

/// Result of [`LedgerClient::ensure_allowance`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllowanceOutcome {
    /// `true` when an approval transaction was sent and confirmed.
    pub approved: bool,
    pub tx_hash: Option<String>,
}

/// The value-moving bridge call for one conversion.
#[derive(Debug, Clone)]
pub struct OfframpTransfer {
    /// Bridge contract pulling the tokens.
    pub spender: String,
    pub token: SettlementToken,
    pub owner: String,
    pub amount: Decimal,
    pub fiat_currency: String,
    pub fiat_amount_minor: u64,
    /// Conversion id, embedded on-chain for reconciliation.
    pub correlation_id: String,
}

#[async_trait]
pub trait LedgerClient: Send + Sync {
    /// Resolve a token symbol against the deployment's registry.
    fn token(&self, symbol: &str) -> Result<SettlementToken, LedgerError>;

    /// Address of the bridge contract that receives allowances.
    fn spender(&self) -> Result<String, LedgerError>;

    fn explorer_tx_url(&self, tx_hash: &str) -> Option<String>;

    async fn get_balance(&self, token: &SettlementToken, owner: &str)
        -> Result<Decimal, LedgerError>;

    async fn get_allowance(
        &self,
        token: &SettlementToken,
        owner: &str,
        spender: &str,
    ) -> Result<Decimal, LedgerError>;

    /// Submit an approval and wait for its receipt. Returns the tx hash.
    async fn approve(
        &self,
        token: &SettlementToken,
        owner: &str,
        spender: &str,
        amount: Decimal,
    ) -> Result<String, LedgerError>;

    /// Submit the bridge transfer and wait for its receipt. Returns the tx hash.
    async fn submit_transfer(&self, transfer: &OfframpTransfer) -> Result<String, LedgerError>;

    /// `Some(success)` once mined, `None` while still pending or unknown.
    async fn transaction_outcome(&self, tx_hash: &str) -> Result<Option<bool>, LedgerError>;

    /// Make sure `spender` may pull at least `required` from `owner`.
    ///
    /// No-op when the current allowance already covers the amount. Approve
    /// sets the allowance rather than adding to it, so repeating this after
    /// an ambiguous failure cannot over-grant.
    async fn ensure_allowance(
        &self,
        token: &SettlementToken,
        owner: &str,
        spender: &str,
        required: Decimal,
    ) -> Result<AllowanceOutcome, LedgerError> {
        let current = self.get_allowance(token, owner, spender).await?;
        if current >= required {
            return Ok(AllowanceOutcome {
                approved: false,
                tx_hash: None,
            });
        }

        let target = required * Decimal::from(APPROVAL_BUFFER_MULTIPLIER);
        info!(
            token = %token.symbol,
            owner = %owner,
            current = %current,
            target = %target,
            "Allowance insufficient, submitting approval"
        );
        let tx_hash = self.approve(token, owner, spender, target).await?;

        Ok(AllowanceOutcome {
            approved: true,
            tx_hash: Some(tx_hash),
        })
    }
}
