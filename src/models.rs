// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # API Data Models
//!
//! Request and response bodies of the REST API. All types derive
//! `Serialize`/`Deserialize` and `ToSchema` for JSON handling and the
//! OpenAPI document.
//!
//! Amounts are decimal strings (`"100.5"`), never floats.
//!
//! ## Model Categories
//!
//! - **Conversions**: create, amend and inspect conversion requests
//! - **Intents**: classifier output routed into drafts
//! - **Banks / Wallets**: helper reads for the chat client
//! - **Reconciliation**: anomaly listing

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::intent::{IntentClassification, RoutedDraft};
use crate::providers::{Bank, BankAccountVerification};
use crate::settlement::{
    ConversionRequest, ConversionState, FailureReason, HistoryEntry, MissingField, WalletBalance,
};
use crate::storage::AnomalyEvent;

// =============================================================================
// Wallet Address Type
// =============================================================================

/// Ethereum-compatible wallet address wrapper.
///
/// Format: `0x` followed by 40 hexadecimal characters (20 bytes). Checksum
/// validation happens in the ledger layer.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct WalletAddress(pub String);

impl std::fmt::Display for WalletAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for WalletAddress {
    fn from(value: &str) -> Self {
        WalletAddress(value.to_string())
    }
}

impl AsRef<str> for WalletAddress {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

// =============================================================================
// Conversion Models
// =============================================================================

/// Request to start a conversion. Only the owner is required; missing
/// fields keep the conversion in `draft`.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CreateConversionRequest {
    /// Wallet holding the tokens.
    pub owner_address: WalletAddress,
    /// Token symbol, e.g. `USDT`.
    #[serde(default)]
    pub token: Option<String>,
    /// Token amount to convert.
    #[serde(default)]
    pub amount: Option<Decimal>,
    /// ISO 4217 code, e.g. `NGN`.
    #[serde(default)]
    pub fiat_currency: Option<String>,
    /// Fiat amount to receive. Mutually exclusive with `amount`.
    #[serde(default)]
    pub fiat_amount: Option<Decimal>,
}

/// Fields to fill in on a draft.
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct AmendConversionRequest {
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub amount: Option<Decimal>,
    #[serde(default)]
    pub fiat_currency: Option<String>,
    #[serde(default)]
    pub fiat_amount: Option<Decimal>,
}

/// Destination bank account for the payout.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct BankAccountRequest {
    pub account_number: String,
    pub bank_code: String,
}

/// A conversion as shown to its owner.
///
/// Raw provider and chain failure text is never included; `failure_message`
/// is derived from the failure reason code.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ConversionResponse {
    pub id: String,
    pub owner_address: String,
    pub state: ConversionState,
    pub source_token: Option<String>,
    pub source_amount: Option<Decimal>,
    pub fiat_currency: Option<String>,
    /// Locked once the conversion is quoted.
    pub fiat_amount: Option<Decimal>,
    pub rate: Option<Decimal>,
    /// True when the rate came from the static fallback table.
    pub rate_is_estimate: bool,
    pub destination_account: Option<BankAccountVerification>,
    pub approval_tx_hash: Option<String>,
    pub ledger_tx_hash: Option<String>,
    /// Block explorer link for the bridge transaction.
    pub ledger_tx_url: Option<String>,
    pub provider_transfer_reference: Option<String>,
    /// Next input the user has to give, if any.
    pub missing_fields: Vec<MissingField>,
    pub failure_reason: Option<FailureReason>,
    pub failure_message: Option<String>,
    pub history: Vec<HistoryEntry>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ConversionResponse {
    pub fn from_record(record: ConversionRequest, ledger_tx_url: Option<String>) -> Self {
        let missing_fields = match record.state {
            ConversionState::Draft => record.missing_fields(),
            ConversionState::AmountQuoted => vec![MissingField::BankAccount],
            _ => Vec::new(),
        };
        Self {
            missing_fields,
            rate: record.quote.as_ref().map(|q| q.rate),
            rate_is_estimate: record.quote.as_ref().is_some_and(|q| q.stale),
            failure_message: record
                .failure_reason
                .map(|reason| reason.user_message().to_string()),
            id: record.id,
            owner_address: record.owner_address,
            state: record.state,
            source_token: record.source_token,
            source_amount: record.source_amount,
            fiat_currency: record.fiat_currency,
            fiat_amount: record.fiat_amount,
            destination_account: record.destination_account,
            approval_tx_hash: record.approval_tx_hash,
            ledger_tx_hash: record.ledger_tx_hash,
            ledger_tx_url,
            provider_transfer_reference: record.provider_transfer_reference,
            failure_reason: record.failure_reason,
            history: record.history,
            created_at: record.created_at,
            updated_at: record.updated_at,
        }
    }
}

// =============================================================================
// Intent Models
// =============================================================================

/// Classifier output for one chat message, routed for `owner_address`.
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct IntentRequest {
    pub owner_address: WalletAddress,
    /// Draft created by an earlier message of the same conversation.
    #[serde(default)]
    pub draft_id: Option<String>,
    pub classification: IntentClassification,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct IntentResponse {
    /// False when the message is not a conversion request.
    pub applicable: bool,
    pub intent: String,
    pub conversion: Option<ConversionResponse>,
    pub missing_fields: Vec<MissingField>,
    pub follow_up_questions: Vec<String>,
    pub assumptions: Vec<String>,
}

impl IntentResponse {
    pub fn not_applicable(intent: String) -> Self {
        Self {
            applicable: false,
            intent,
            conversion: None,
            missing_fields: Vec::new(),
            follow_up_questions: Vec::new(),
            assumptions: Vec::new(),
        }
    }

    pub fn from_draft(intent: String, draft: RoutedDraft, ledger_tx_url: Option<String>) -> Self {
        Self {
            applicable: true,
            intent,
            conversion: Some(ConversionResponse::from_record(draft.record, ledger_tx_url)),
            missing_fields: draft.missing_fields,
            follow_up_questions: draft.follow_up_questions,
            assumptions: draft.assumptions,
        }
    }
}

// =============================================================================
// Helper Read Models
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct BankListResponse {
    pub banks: Vec<Bank>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct BalanceResponse {
    pub address: WalletAddress,
    pub token: String,
    pub balance: Decimal,
}

impl From<WalletBalance> for BalanceResponse {
    fn from(value: WalletBalance) -> Self {
        Self {
            address: WalletAddress(value.address),
            token: value.token,
            balance: value.balance,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct AnomalyListResponse {
    pub anomalies: Vec<AnomalyEvent>,
    pub total: usize,
}
