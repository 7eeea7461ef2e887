// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Conversion request record and its lifecycle graph.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::pricing::{Quote, QuoteSource};
use crate::providers::BankAccountVerification;

/// Prefix of the provider-side transfer reference. The conversion id follows.
pub const PROVIDER_REFERENCE_PREFIX: &str = "offramp-";

/// Lifecycle states.
///
/// ```text
/// Draft → AmountQuoted → AccountVerified → AllowanceEnsured → LedgerSubmitted
///       → ProviderTransferCreated → Settled
/// AccountVerified..=ProviderTransferCreated → Failed
/// Draft..=LedgerSubmitted → Cancelled
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ConversionState {
    Draft,
    AmountQuoted,
    AccountVerified,
    AllowanceEnsured,
    LedgerSubmitted,
    ProviderTransferCreated,
    Settled,
    Failed,
    Cancelled,
}

impl ConversionState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Settled | Self::Failed | Self::Cancelled)
    }

    /// Whether `next` is a directed edge out of `self`.
    pub fn can_transition_to(self, next: ConversionState) -> bool {
        use ConversionState::*;
        matches!(
            (self, next),
            (Draft, AmountQuoted)
                | (AmountQuoted, AccountVerified)
                | (AccountVerified, AllowanceEnsured)
                | (AllowanceEnsured, LedgerSubmitted)
                | (LedgerSubmitted, ProviderTransferCreated)
                | (ProviderTransferCreated, Settled)
                | (AccountVerified, Failed)
                | (AllowanceEnsured, Failed)
                | (LedgerSubmitted, Failed)
                | (ProviderTransferCreated, Failed)
                | (Draft, Cancelled)
                | (AmountQuoted, Cancelled)
                | (AccountVerified, Cancelled)
                | (AllowanceEnsured, Cancelled)
                | (LedgerSubmitted, Cancelled)
        )
    }

    pub fn is_cancellable(self) -> bool {
        self.can_transition_to(ConversionState::Cancelled)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::AmountQuoted => "amount_quoted",
            Self::AccountVerified => "account_verified",
            Self::AllowanceEnsured => "allowance_ensured",
            Self::LedgerSubmitted => "ledger_submitted",
            Self::ProviderTransferCreated => "provider_transfer_created",
            Self::Settled => "settled",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for ConversionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Machine-readable reason recorded on `Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    UserDeclined,
    ApprovalFailed,
    TransferReverted,
    ProviderRejected,
    ProviderTransferFailed,
    ProviderTransferReversed,
}

impl FailureReason {
    pub fn code(self) -> &'static str {
        match self {
            Self::UserDeclined => "user_declined",
            Self::ApprovalFailed => "approval_failed",
            Self::TransferReverted => "transfer_reverted",
            Self::ProviderRejected => "provider_rejected",
            Self::ProviderTransferFailed => "provider_transfer_failed",
            Self::ProviderTransferReversed => "provider_transfer_reversed",
        }
    }

    /// Message shown to users. Never includes provider or chain text.
    pub fn user_message(self) -> &'static str {
        match self {
            Self::UserDeclined => "The transaction was not signed. Start a new conversion to try again.",
            Self::ApprovalFailed => "The token approval failed on-chain. No funds were moved.",
            Self::TransferReverted => "The on-chain transfer did not go through. No funds were moved.",
            Self::ProviderRejected => "The payout provider declined this transfer. Our team has been notified.",
            Self::ProviderTransferFailed => "The bank transfer failed. Our team has been notified.",
            Self::ProviderTransferReversed => "The bank transfer was reversed. Our team has been notified.",
        }
    }
}

/// Why a history entry was written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum TransitionCause {
    Created,
    RateQuoted,
    AccountVerified,
    AllowanceEnsured,
    LedgerSubmitted,
    ProviderTransferCreated,
    ProviderWebhook,
    UserCancelled,
    ApprovalFailed,
    TransferFailed,
    ProviderRejected,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct HistoryEntry {
    /// `None` only for the creation entry.
    pub from: Option<ConversionState>,
    pub to: ConversionState,
    pub at: DateTime<Utc>,
    pub cause: TransitionCause,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// The external step a claim protects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum SettlementStep {
    QuoteAmount,
    VerifyAccount,
    EnsureAllowance,
    SubmitLedgerTransfer,
    CreateProviderTransfer,
}

/// Marks a record as having an external call in progress.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct InFlightClaim {
    pub claim_id: String,
    pub step: SettlementStep,
    pub claimed_at: DateTime<Utc>,
}

/// Rate snapshot locked when the fiat amount was fixed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct LockedQuote {
    #[schema(value_type = String)]
    pub rate: Decimal,
    pub stale: bool,
    pub source: QuoteSource,
    pub quoted_at: DateTime<Utc>,
}

impl From<&Quote> for LockedQuote {
    fn from(quote: &Quote) -> Self {
        Self {
            rate: quote.rate,
            stale: quote.stale,
            source: quote.source,
            quoted_at: quote.quoted_at,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum MissingField {
    Token,
    Amount,
    FiatCurrency,
    /// Only reported by `proceed` before account verification.
    BankAccount,
}

impl MissingField {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Token => "token",
            Self::Amount => "amount",
            Self::FiatCurrency => "fiat_currency",
            Self::BankAccount => "bank_account",
        }
    }
}

/// Attempted edge that is not in the lifecycle graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IllegalTransition {
    pub from: ConversionState,
    pub to: ConversionState,
}

/// One crypto-to-fiat conversion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversionRequest {
    pub id: String,
    pub owner_address: String,
    pub source_token: Option<String>,
    pub source_amount: Option<Decimal>,
    /// Fiat amount asked for while drafting; the source amount is derived
    /// from it at quote time.
    pub target_fiat_amount: Option<Decimal>,
    pub fiat_currency: Option<String>,
    /// Locked at `AmountQuoted`.
    pub fiat_amount: Option<Decimal>,
    pub quote: Option<LockedQuote>,
    pub destination_account: Option<BankAccountVerification>,
    pub state: ConversionState,
    pub approval_tx_hash: Option<String>,
    pub ledger_tx_hash: Option<String>,
    /// Bridge transaction broadcast but not yet confirmed.
    pub pending_ledger_tx: Option<String>,
    pub provider_recipient_reference: Option<String>,
    pub provider_transfer_reference: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub failure_reason: Option<FailureReason>,
    /// Raw provider/chain detail. Internal only.
    pub failure_detail: Option<String>,
    pub history: Vec<HistoryEntry>,
    pub in_flight: Option<InFlightClaim>,
}

impl ConversionRequest {
    pub fn new_draft(
        owner_address: String,
        source_token: Option<String>,
        source_amount: Option<Decimal>,
        fiat_currency: Option<String>,
        target_fiat_amount: Option<Decimal>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            owner_address,
            source_token,
            source_amount,
            target_fiat_amount,
            fiat_currency,
            fiat_amount: None,
            quote: None,
            destination_account: None,
            state: ConversionState::Draft,
            approval_tx_hash: None,
            ledger_tx_hash: None,
            pending_ledger_tx: None,
            provider_recipient_reference: None,
            provider_transfer_reference: None,
            created_at: now,
            updated_at: now,
            failure_reason: None,
            failure_detail: None,
            history: vec![HistoryEntry {
                from: None,
                to: ConversionState::Draft,
                at: now,
                cause: TransitionCause::Created,
                detail: None,
            }],
            in_flight: None,
        }
    }

    /// Apply an edge of the lifecycle graph and append it to `history`.
    pub fn transition(
        &mut self,
        to: ConversionState,
        cause: TransitionCause,
        detail: Option<String>,
    ) -> Result<(), IllegalTransition> {
        if !self.state.can_transition_to(to) {
            return Err(IllegalTransition {
                from: self.state,
                to,
            });
        }
        let now = Utc::now();
        self.history.push(HistoryEntry {
            from: Some(self.state),
            to,
            at: now,
            cause,
            detail,
        });
        self.state = to;
        self.updated_at = now;
        Ok(())
    }

    pub fn fail(
        &mut self,
        reason: FailureReason,
        cause: TransitionCause,
        detail: Option<String>,
    ) -> Result<(), IllegalTransition> {
        self.transition(ConversionState::Failed, cause, Some(reason.code().to_string()))?;
        self.failure_reason = Some(reason);
        self.failure_detail = detail;
        self.in_flight = None;
        Ok(())
    }

    /// Whether the record has ever been in `state`.
    pub fn has_visited(&self, state: ConversionState) -> bool {
        self.history.iter().any(|entry| entry.to == state)
    }

    pub fn missing_fields(&self) -> Vec<MissingField> {
        let mut missing = Vec::new();
        if self.source_token.is_none() {
            missing.push(MissingField::Token);
        }
        if self.source_amount.is_none() && self.target_fiat_amount.is_none() {
            missing.push(MissingField::Amount);
        }
        if self.fiat_currency.is_none() {
            missing.push(MissingField::FiatCurrency);
        }
        missing
    }

    /// Provider-side reference carrying the conversion id.
    pub fn provider_reference(&self) -> String {
        format!("{PROVIDER_REFERENCE_PREFIX}{}", self.id)
    }

    /// A claim that has not outlived `ttl`.
    pub fn active_claim(&self, now: DateTime<Utc>, ttl: chrono::Duration) -> Option<&InFlightClaim> {
        self.in_flight
            .as_ref()
            .filter(|claim| now.signed_duration_since(claim.claimed_at) < ttl)
    }
}

/// Conversion id embedded in a provider reference, if it has our prefix.
pub fn conversion_id_from_reference(reference: &str) -> Option<&str> {
    reference
        .trim()
        .strip_prefix(PROVIDER_REFERENCE_PREFIX)
        .filter(|id| !id.is_empty())
}
