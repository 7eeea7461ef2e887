// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Bank provider contract for the fiat payout leg.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::warn;
use utoipa::ToSchema;

/// A bank that can receive payouts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Bank {
    pub name: String,
    /// Provider bank code used for account resolution.
    pub code: String,
}

/// Outcome of a successful account resolution. Consumed once to populate a
/// conversion's destination account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct BankAccountVerification {
    pub account_number: String,
    pub bank_code: String,
    pub verified_account_name: String,
}

/// Provider-side payout recipient details.
#[derive(Debug, Clone)]
pub struct RecipientDetails<'a> {
    pub account_name: &'a str,
    pub account_number: &'a str,
    pub bank_code: &'a str,
    pub currency: &'a str,
}

/// Provider-side payout request. `reference` is unique per conversion and
/// makes creation idempotent on the provider.
#[derive(Debug, Clone)]
pub struct TransferRequest<'a> {
    pub amount_minor: u64,
    pub currency: &'a str,
    pub recipient_reference: &'a str,
    pub reference: &'a str,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BankProviderError {
    /// The provider reports the account/bank pairing as invalid.
    #[error("account verification failed")]
    VerificationFailed,

    /// Permanent refusal of a request (4xx other than rate limiting).
    #[error("provider rejected request ({status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("provider unavailable ({status})")]
    Unavailable { status: u16 },

    #[error("provider transport error: {0}")]
    Transport(String),

    #[error("provider response was invalid: {0}")]
    InvalidResponse(String),

    #[error("provider configuration missing: {0}")]
    MissingConfig(String),
}

impl BankProviderError {
    /// Whether the same request may be repeated. Creation calls are keyed by
    /// reference, so repeating after an ambiguous failure is safe.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Unavailable { .. }
                | Self::Transport(_)
                | Self::InvalidResponse(_)
                | Self::MissingConfig(_)
        )
    }
}

#[async_trait]
pub trait BankProvider: Send + Sync {
    /// Live bank listing. Callers normally want [`BankProvider::list_banks`].
    async fn fetch_banks(&self) -> Result<Vec<Bank>, BankProviderError>;

    async fn verify_account(
        &self,
        account_number: &str,
        bank_code: &str,
    ) -> Result<BankAccountVerification, BankProviderError>;

    /// Returns the provider's recipient reference.
    async fn create_recipient(
        &self,
        details: RecipientDetails<'_>,
    ) -> Result<String, BankProviderError>;

    /// Returns the provider transfer reference.
    async fn create_transfer(
        &self,
        request: TransferRequest<'_>,
    ) -> Result<String, BankProviderError>;

    /// Bank listing that never fails: provider errors fall back to the
    /// static list.
    async fn list_banks(&self) -> Vec<Bank> {
        match self.fetch_banks().await {
            Ok(banks) if !banks.is_empty() => banks,
            Ok(_) => {
                warn!("Bank provider returned an empty list, using fallback banks");
                fallback_banks()
            }
            Err(e) => {
                warn!(error = %e, "Bank listing failed, using fallback banks");
                fallback_banks()
            }
        }
    }
}

const FALLBACK_BANKS: [(&str, &str); 10] = [
    ("Access Bank", "044"),
    ("Guaranty Trust Bank", "058"),
    ("First Bank of Nigeria", "011"),
    ("Zenith Bank", "057"),
    ("United Bank For Africa", "033"),
    ("Fidelity Bank", "070"),
    ("Union Bank of Nigeria", "032"),
    ("Sterling Bank", "232"),
    ("Stanbic IBTC Bank", "221"),
    ("Wema Bank", "035"),
];

pub fn fallback_banks() -> Vec<Bank> {
    FALLBACK_BANKS
        .iter()
        .map(|(name, code)| Bank {
            name: (*name).to_string(),
            code: (*code).to_string(),
        })
        .collect()
}

/// Shape check done before any provider call.
///
/// NGN accounts are 10-digit NUBAN numbers; other currencies only need a
/// digit string. Bank codes are digit strings.
pub fn validate_account_shape(
    account_number: &str,
    bank_code: &str,
    currency: &str,
) -> Result<(), &'static str> {
    let account_number = account_number.trim();
    let bank_code = bank_code.trim();

    if account_number.is_empty() || !account_number.chars().all(|c| c.is_ascii_digit()) {
        return Err("account number must contain digits only");
    }
    if currency.eq_ignore_ascii_case("NGN") && account_number.len() != 10 {
        return Err("NGN account numbers must be 10 digits");
    }
    if bank_code.is_empty() || !bank_code.chars().all(|c| c.is_ascii_digit()) {
        return Err("bank code must contain digits only");
    }
    Ok(())
}
