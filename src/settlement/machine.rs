// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Settlement state machine.
//!
//! Each step that calls an external system runs in three writes:
//!
//! 1. **claim**: check the expected state, refuse if another caller holds a
//!    live claim, then mark the step in flight.
//! 2. the external call, with no record lock held.
//! 3. **commit**: check the claim is still ours, apply the result and the
//!    state edge, clear the claim. A retryable failure only clears the claim.
//!    A terminal failure moves the record to `Failed` in the same write.
//!
//! A caller that loses the claim race gets `TransitionInProgress` and makes
//! no external call, so duplicated `proceed` calls never duplicate an
//! approval, a ledger transfer or a provider transfer.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rust_decimal::Decimal;
use tracing::{error, info, warn};
use uuid::Uuid;

use super::error::{
    ledger_disposition, ledger_error, provider_disposition, Disposition, SettlementError,
};
use super::types::{
    ConversionRequest, ConversionState, InFlightClaim, LockedQuote, MissingField, SettlementStep,
    TransitionCause,
};
use crate::blockchain::{
    checksum_address, AllowanceOutcome, LedgerClient, LedgerError, OfframpTransfer,
};
use crate::pricing::{
    convert, normalize_currency, source_amount_for_fiat, to_minor_units, Quote, RateOracle,
};
use crate::providers::{
    validate_account_shape, Bank, BankProvider, BankProviderError, RecipientDetails,
    TransferRequest,
};
use crate::storage::{report_anomaly, AnomalyEvent, AnomalyKind, ConversionDb};

/// Fields for a new conversion. Anything but the owner may be missing.
#[derive(Debug, Clone, Default)]
pub struct NewConversion {
    pub owner_address: String,
    pub token: Option<String>,
    pub amount: Option<Decimal>,
    pub fiat_currency: Option<String>,
    /// Fiat amount to receive, when the user asked in fiat terms.
    pub fiat_amount: Option<Decimal>,
}

/// Fields that may be filled in while the record is a `Draft`.
#[derive(Debug, Clone, Default)]
pub struct DraftAmendment {
    pub token: Option<String>,
    pub amount: Option<Decimal>,
    pub fiat_currency: Option<String>,
    pub fiat_amount: Option<Decimal>,
}

impl DraftAmendment {
    pub fn is_empty(&self) -> bool {
        self.token.is_none()
            && self.amount.is_none()
            && self.fiat_currency.is_none()
            && self.fiat_amount.is_none()
    }
}

/// A token balance as reported by the ledger.
#[derive(Debug, Clone, PartialEq)]
pub struct WalletBalance {
    pub address: String,
    pub token: String,
    pub balance: Decimal,
}

pub struct SettlementService {
    db: Arc<ConversionDb>,
    ledger: Arc<dyn LedgerClient>,
    bank: Arc<dyn BankProvider>,
    oracle: Arc<RateOracle>,
    claim_ttl: chrono::Duration,
}

impl SettlementService {
    pub fn new(
        db: Arc<ConversionDb>,
        ledger: Arc<dyn LedgerClient>,
        bank: Arc<dyn BankProvider>,
        oracle: Arc<RateOracle>,
        claim_ttl: Duration,
    ) -> Self {
        Self {
            db,
            ledger,
            bank,
            oracle,
            claim_ttl: chrono::Duration::from_std(claim_ttl)
                .unwrap_or_else(|_| chrono::Duration::seconds(600)),
        }
    }

    // =========================================================================
    // Settlement-initiation interface
    // =========================================================================

    /// Create a `Draft` and quote it straight away when every field is
    /// present. An unavailable rate still stores the draft. Inputs that
    /// cannot be priced are refused and nothing is stored.
    pub async fn create_request(
        &self,
        input: NewConversion,
    ) -> Result<ConversionRequest, SettlementError> {
        let owner = checksum_address(&input.owner_address).map_err(ledger_error)?;
        let token = input
            .token
            .as_deref()
            .map(|symbol| self.validate_token(symbol, input.amount))
            .transpose()?;
        let fiat_currency = input.fiat_currency.as_deref().map(validate_currency).transpose()?;
        if input.amount.is_some() && input.fiat_amount.is_some() {
            return Err(SettlementError::InvalidAmount(
                "give either a token amount or a fiat amount, not both".to_string(),
            ));
        }
        if let Some(fiat_amount) = input.fiat_amount {
            ensure_positive(fiat_amount)?;
        }
        if let (None, Some(amount)) = (&token, input.amount) {
            ensure_positive(amount)?;
        }

        let mut request =
            ConversionRequest::new_draft(owner, token, input.amount, fiat_currency, input.fiat_amount);

        // The record is not visible yet, so it is priced without a claim and
        // nothing is stored when the inputs cannot be priced.
        if request.missing_fields().is_empty() {
            match self.price(&request).await {
                Ok(priced) => lock_quote(&mut request, priced)?,
                Err(
                    e @ (SettlementError::RateUnavailable { .. } | SettlementError::Retryable(_)),
                ) => {
                    warn!(conversion_id = %request.id, error = %e, "Draft left unquoted");
                }
                Err(e) => return Err(e),
            }
        }

        self.db.insert(&request)?;
        info!(
            conversion_id = %request.id,
            owner = %request.owner_address,
            token = ?request.source_token,
            state = %request.state,
            "Conversion created"
        );
        Ok(request)
    }

    /// Fill in draft fields. The source token cannot change once set.
    pub async fn amend_draft(
        &self,
        id: &str,
        amendment: DraftAmendment,
    ) -> Result<ConversionRequest, SettlementError> {
        if amendment.amount.is_some() && amendment.fiat_amount.is_some() {
            return Err(SettlementError::InvalidAmount(
                "give either a token amount or a fiat amount, not both".to_string(),
            ));
        }
        let currency = amendment
            .fiat_currency
            .as_deref()
            .map(validate_currency)
            .transpose()?;
        if let Some(fiat_amount) = amendment.fiat_amount {
            ensure_positive(fiat_amount)?;
        }

        let current = self.get_status(id)?;
        let symbol = match (&current.source_token, amendment.token.as_deref()) {
            (Some(existing), Some(requested)) if !existing.eq_ignore_ascii_case(requested.trim()) => {
                return Err(SettlementError::FieldLocked("source_token"));
            }
            (Some(existing), _) => Some(existing.clone()),
            (None, requested) => requested.map(str::to_string),
        };
        let token = match (symbol.as_deref(), amendment.amount) {
            (Some(symbol), amount) => Some(self.validate_token(symbol, amount)?),
            (None, Some(amount)) => {
                ensure_positive(amount)?;
                None
            }
            (None, None) => None,
        };

        let now = Utc::now();
        let ttl = self.claim_ttl;
        let (record, ()) = self.db.update::<_, SettlementError, _>(id, |record| {
            if record.state != ConversionState::Draft {
                return Err(SettlementError::InvalidStateTransition {
                    from: record.state,
                    attempted: "amend",
                });
            }
            if record.active_claim(now, ttl).is_some() {
                return Err(SettlementError::TransitionInProgress(record.id.clone()));
            }
            if record.source_token.is_none() {
                record.source_token = token;
            }
            if let Some(amount) = amendment.amount {
                record.source_amount = Some(amount);
                record.target_fiat_amount = None;
            }
            if let Some(fiat_amount) = amendment.fiat_amount {
                record.target_fiat_amount = Some(fiat_amount);
                record.source_amount = None;
            }
            if currency.is_some() {
                record.fiat_currency = currency;
            }
            record.updated_at = now;
            Ok(())
        })?;

        self.quote_if_complete(record).await
    }

    /// Verify the destination account: `AmountQuoted → AccountVerified`.
    ///
    /// A provider rejection of the pairing is user-correctable: the record
    /// stays `AmountQuoted` and `VerificationFailed` is returned.
    pub async fn submit_bank_account(
        &self,
        id: &str,
        account_number: &str,
        bank_code: &str,
    ) -> Result<ConversionRequest, SettlementError> {
        let current = self.get_status(id)?;
        if current.state != ConversionState::AmountQuoted {
            return Err(SettlementError::InvalidStateTransition {
                from: current.state,
                attempted: "verify a bank account for",
            });
        }
        let currency = current.fiat_currency.as_deref().unwrap_or_default();
        validate_account_shape(account_number, bank_code, currency)
            .map_err(|reason| SettlementError::InvalidBankAccount(reason.to_string()))?;

        let (record, claim_id) =
            self.claim(id, ConversionState::AmountQuoted, SettlementStep::VerifyAccount)?;

        match self
            .bank
            .verify_account(account_number.trim(), bank_code.trim())
            .await
        {
            Ok(verification) => self.commit(&record.id, &claim_id, |r| {
                r.destination_account = Some(verification);
                r.transition(
                    ConversionState::AccountVerified,
                    TransitionCause::AccountVerified,
                    None,
                )?;
                Ok(())
            }),
            Err(BankProviderError::VerificationFailed) => {
                self.release(&record.id, &claim_id);
                info!(conversion_id = %record.id, "Bank account verification failed");
                Err(SettlementError::VerificationFailed)
            }
            // Any other refusal (bad credentials, malformed request) is ours,
            // not the user's.
            Err(BankProviderError::Rejected { status, message }) => {
                self.release(&record.id, &claim_id);
                error!(
                    conversion_id = %record.id,
                    status,
                    message = %message,
                    "Bank provider refused account verification"
                );
                Err(SettlementError::ProviderRefused(format!(
                    "account verification refused ({status}): {message}"
                )))
            }
            Err(e) => {
                self.release(&record.id, &claim_id);
                warn!(conversion_id = %record.id, error = %e, "Bank account verification unavailable");
                Err(SettlementError::Retryable(e.to_string()))
            }
        }
    }

    /// Attempt the next eligible transition for the record's current state.
    pub async fn proceed(&self, id: &str) -> Result<ConversionRequest, SettlementError> {
        let record = self.get_status(id)?;
        match record.state {
            ConversionState::Draft => self.quote_draft(record).await,
            ConversionState::AmountQuoted => {
                Err(SettlementError::MissingFields(vec![MissingField::BankAccount]))
            }
            ConversionState::AccountVerified => self.ensure_allowance_step(record).await,
            ConversionState::AllowanceEnsured => self.ledger_transfer_step(record).await,
            ConversionState::LedgerSubmitted => self.provider_transfer_step(record).await,
            // Settlement is driven by the provider webhook.
            ConversionState::ProviderTransferCreated => Ok(record),
            ConversionState::Settled | ConversionState::Failed | ConversionState::Cancelled => {
                Err(SettlementError::InvalidStateTransition {
                    from: record.state,
                    attempted: "proceed with",
                })
            }
        }
    }

    /// User cancellation. Refused once the provider transfer was requested,
    /// while a step is in flight, or while a ledger transaction is pending.
    pub async fn cancel(&self, id: &str) -> Result<ConversionRequest, SettlementError> {
        let now = Utc::now();
        let ttl = self.claim_ttl;
        let (record, cancelled_from) = self.db.update::<_, SettlementError, _>(id, |record| {
            let from = record.state;
            if !from.is_cancellable() {
                return Err(SettlementError::InvalidStateTransition {
                    from,
                    attempted: "cancel",
                });
            }
            if record.active_claim(now, ttl).is_some() || record.pending_ledger_tx.is_some() {
                return Err(SettlementError::TransitionInProgress(record.id.clone()));
            }
            record.transition(ConversionState::Cancelled, TransitionCause::UserCancelled, None)?;
            record.in_flight = None;
            Ok(from)
        })?;

        info!(conversion_id = %record.id, from = %cancelled_from, "Conversion cancelled");
        if cancelled_from == ConversionState::LedgerSubmitted {
            let mut event = AnomalyEvent::new(AnomalyKind::CancelledAfterLedgerSubmission)
                .with_conversion(record.id.clone());
            if let Some(tx_hash) = &record.ledger_tx_hash {
                event = event.with_details(serde_json::json!({ "ledger_tx_hash": tx_hash }));
            }
            report_anomaly(&self.db, event);
        }
        Ok(record)
    }

    pub fn get_status(&self, id: &str) -> Result<ConversionRequest, SettlementError> {
        self.db
            .get(id)?
            .ok_or_else(|| SettlementError::NotFound(id.to_string()))
    }

    // =========================================================================
    // Helper reads
    // =========================================================================

    pub async fn list_banks(&self) -> Vec<Bank> {
        self.bank.list_banks().await
    }

    pub async fn wallet_balance(
        &self,
        address: &str,
        symbol: &str,
    ) -> Result<WalletBalance, SettlementError> {
        let address = checksum_address(address).map_err(ledger_error)?;
        let token = self.ledger.token(symbol).map_err(ledger_error)?;
        let balance = self
            .ledger
            .get_balance(&token, &address)
            .await
            .map_err(ledger_error)?;
        Ok(WalletBalance {
            address,
            token: token.symbol,
            balance,
        })
    }

    pub fn explorer_tx_url(&self, tx_hash: &str) -> Option<String> {
        self.ledger.explorer_tx_url(tx_hash)
    }

    // =========================================================================
    // Steps
    // =========================================================================

    async fn quote_if_complete(
        &self,
        record: ConversionRequest,
    ) -> Result<ConversionRequest, SettlementError> {
        if !record.missing_fields().is_empty() {
            return Ok(record);
        }
        let id = record.id.clone();
        match self.quote_draft(record).await {
            Ok(quoted) => Ok(quoted),
            Err(
                e @ (SettlementError::RateUnavailable { .. }
                | SettlementError::Retryable(_)
                | SettlementError::TransitionInProgress(_)),
            ) => {
                warn!(conversion_id = %id, error = %e, "Draft left unquoted");
                self.get_status(&id)
            }
            Err(e) => Err(e),
        }
    }

    /// `Draft → AmountQuoted`: price the request and lock the fiat amount.
    async fn quote_draft(
        &self,
        record: ConversionRequest,
    ) -> Result<ConversionRequest, SettlementError> {
        let missing = record.missing_fields();
        if !missing.is_empty() {
            return Err(SettlementError::MissingFields(missing));
        }
        let (record, claim_id) =
            self.claim(&record.id, ConversionState::Draft, SettlementStep::QuoteAmount)?;

        let priced = match self.price(&record).await {
            Ok(priced) => priced,
            Err(e) => {
                self.release(&record.id, &claim_id);
                return Err(e);
            }
        };
        self.commit(&record.id, &claim_id, |r| lock_quote(r, priced))
    }

    async fn price(
        &self,
        record: &ConversionRequest,
    ) -> Result<(Decimal, Decimal, Quote), SettlementError> {
        let (Some(symbol), Some(currency)) =
            (record.source_token.as_deref(), record.fiat_currency.as_deref())
        else {
            return Err(SettlementError::MissingFields(record.missing_fields()));
        };
        let token = self.ledger.token(symbol).map_err(ledger_error)?;
        let quote = self.oracle.quote(symbol, currency).await?;

        let source_amount = match (record.source_amount, record.target_fiat_amount) {
            (Some(amount), _) => amount,
            (None, Some(target)) => source_amount_for_fiat(target, quote.rate, token.decimals)
                .filter(|amount| *amount > Decimal::ZERO)
                .ok_or_else(|| {
                    SettlementError::InvalidAmount("fiat amount is too small".to_string())
                })?,
            (None, None) => {
                return Err(SettlementError::MissingFields(vec![MissingField::Amount]));
            }
        };

        let fiat_amount = convert(source_amount, quote.rate, &quote.currency)?;
        if fiat_amount <= Decimal::ZERO {
            return Err(SettlementError::InvalidAmount(
                "amount is too small to convert".to_string(),
            ));
        }
        Ok((source_amount, fiat_amount, quote))
    }

    /// `AccountVerified → AllowanceEnsured`. Balance is checked first so a
    /// short wallet never triggers an approval.
    async fn ensure_allowance_step(
        &self,
        record: ConversionRequest,
    ) -> Result<ConversionRequest, SettlementError> {
        let (record, claim_id) = self.claim(
            &record.id,
            ConversionState::AccountVerified,
            SettlementStep::EnsureAllowance,
        )?;

        let outcome = self.check_balance_and_approve(&record).await;

        match outcome {
            Ok(Ok(allowance)) => {
                let detail = allowance
                    .tx_hash
                    .clone()
                    .unwrap_or_else(|| "existing allowance".to_string());
                self.commit(&record.id, &claim_id, |r| {
                    if allowance.tx_hash.is_some() {
                        r.approval_tx_hash = allowance.tx_hash;
                    }
                    r.transition(
                        ConversionState::AllowanceEnsured,
                        TransitionCause::AllowanceEnsured,
                        Some(detail),
                    )?;
                    Ok(())
                })
            }
            Ok(Err(user_error)) => {
                self.release(&record.id, &claim_id);
                Err(user_error)
            }
            Err(e) => self.settle_ledger_failure(&record.id, &claim_id, e),
        }
    }

    /// Outer error: ledger failure. Inner error: user-correctable shortfall.
    async fn check_balance_and_approve(
        &self,
        record: &ConversionRequest,
    ) -> Result<Result<AllowanceOutcome, SettlementError>, LedgerError> {
        let (symbol, amount) = source_of(record)?;
        let token = self.ledger.token(symbol)?;
        let spender = self.ledger.spender()?;
        let available = self.ledger.get_balance(&token, &record.owner_address).await?;
        if available < amount {
            return Ok(Err(SettlementError::InsufficientBalance {
                required: amount,
                available,
            }));
        }
        let outcome = self
            .ledger
            .ensure_allowance(&token, &record.owner_address, &spender, amount)
            .await?;
        Ok(Ok(outcome))
    }

    /// `AllowanceEnsured → LedgerSubmitted`.
    ///
    /// A transfer whose confirmation timed out is looked up by hash on the
    /// next attempt, never resubmitted.
    async fn ledger_transfer_step(
        &self,
        record: ConversionRequest,
    ) -> Result<ConversionRequest, SettlementError> {
        let (record, claim_id) = self.claim(
            &record.id,
            ConversionState::AllowanceEnsured,
            SettlementStep::SubmitLedgerTransfer,
        )?;

        if let Some(pending) = record.pending_ledger_tx.clone() {
            return self.resolve_pending_transfer(&record, &claim_id, pending).await;
        }

        let transfer = match self.build_transfer(&record) {
            Ok(transfer) => transfer,
            Err(e) => {
                self.release(&record.id, &claim_id);
                return Err(e);
            }
        };

        match self.ledger.submit_transfer(&transfer).await {
            Ok(tx_hash) => {
                info!(conversion_id = %record.id, tx_hash = %tx_hash, "Ledger transfer confirmed");
                self.commit(&record.id, &claim_id, |r| {
                    r.ledger_tx_hash = Some(tx_hash.clone());
                    r.transition(
                        ConversionState::LedgerSubmitted,
                        TransitionCause::LedgerSubmitted,
                        Some(tx_hash),
                    )?;
                    Ok(())
                })
            }
            Err(LedgerError::ConfirmationTimeout { tx_hash }) => {
                warn!(
                    conversion_id = %record.id,
                    tx_hash = %tx_hash,
                    "Ledger transfer unconfirmed, will look it up on next attempt"
                );
                let message = format!("ledger transaction {tx_hash} is awaiting confirmation");
                self.commit_keeping_state(&record.id, &claim_id, |r| {
                    r.pending_ledger_tx = Some(tx_hash);
                })?;
                Err(SettlementError::Retryable(message))
            }
            Err(e) => self.settle_ledger_failure(&record.id, &claim_id, e),
        }
    }

    async fn resolve_pending_transfer(
        &self,
        record: &ConversionRequest,
        claim_id: &str,
        tx_hash: String,
    ) -> Result<ConversionRequest, SettlementError> {
        match self.ledger.transaction_outcome(&tx_hash).await {
            Ok(Some(true)) => {
                info!(conversion_id = %record.id, tx_hash = %tx_hash, "Pending ledger transfer confirmed");
                self.commit(&record.id, claim_id, |r| {
                    r.pending_ledger_tx = None;
                    r.ledger_tx_hash = Some(tx_hash.clone());
                    r.transition(
                        ConversionState::LedgerSubmitted,
                        TransitionCause::LedgerSubmitted,
                        Some(tx_hash),
                    )?;
                    Ok(())
                })
            }
            Ok(Some(false)) => self.settle_ledger_failure(
                &record.id,
                claim_id,
                LedgerError::TransferReverted(tx_hash),
            ),
            Ok(None) => {
                self.release(&record.id, claim_id);
                Err(SettlementError::Retryable(format!(
                    "ledger transaction {tx_hash} is still pending"
                )))
            }
            Err(e) => self.settle_ledger_failure(&record.id, claim_id, e),
        }
    }

    fn build_transfer(&self, record: &ConversionRequest) -> Result<OfframpTransfer, SettlementError> {
        let (symbol, amount) = source_of(record).map_err(ledger_error)?;
        let currency = record
            .fiat_currency
            .clone()
            .ok_or_else(|| SettlementError::MissingFields(vec![MissingField::FiatCurrency]))?;
        let fiat_amount_minor = record
            .fiat_amount
            .and_then(|amount| to_minor_units(amount, &currency))
            .ok_or_else(|| SettlementError::InvalidAmount("fiat amount is not set".to_string()))?;

        Ok(OfframpTransfer {
            spender: self.ledger.spender().map_err(ledger_error)?,
            token: self.ledger.token(symbol).map_err(ledger_error)?,
            owner: record.owner_address.clone(),
            amount,
            fiat_currency: currency,
            fiat_amount_minor,
            correlation_id: record.id.clone(),
        })
    }

    /// `LedgerSubmitted → ProviderTransferCreated`. Safe to repeat: the
    /// recipient reference is stored as soon as it exists and the transfer
    /// is keyed by the conversion's provider reference.
    async fn provider_transfer_step(
        &self,
        record: ConversionRequest,
    ) -> Result<ConversionRequest, SettlementError> {
        let (record, claim_id) = self.claim(
            &record.id,
            ConversionState::LedgerSubmitted,
            SettlementStep::CreateProviderTransfer,
        )?;

        let (Some(account), Some(currency), Some(amount_minor)) = (
            record.destination_account.clone(),
            record.fiat_currency.clone(),
            record
                .fiat_amount
                .zip(record.fiat_currency.as_deref())
                .and_then(|(amount, currency)| to_minor_units(amount, currency)),
        ) else {
            self.release(&record.id, &claim_id);
            error!(conversion_id = %record.id, "Ledger-submitted conversion lacks payout details");
            return Err(SettlementError::Storage(format!(
                "conversion {} lacks payout details",
                record.id
            )));
        };

        let recipient = match record.provider_recipient_reference.clone() {
            Some(existing) => existing,
            None => {
                let created = self
                    .bank
                    .create_recipient(RecipientDetails {
                        account_name: &account.verified_account_name,
                        account_number: &account.account_number,
                        bank_code: &account.bank_code,
                        currency: &currency,
                    })
                    .await;
                match created {
                    Ok(reference) => {
                        let stored = reference.clone();
                        self.update_claimed(&record.id, &claim_id, |r| {
                            r.provider_recipient_reference = Some(stored);
                        })?;
                        reference
                    }
                    Err(e) => return self.settle_provider_failure(&record.id, &claim_id, e),
                }
            }
        };

        let reference = record.provider_reference();
        let created = self
            .bank
            .create_transfer(TransferRequest {
                amount_minor,
                currency: &currency,
                recipient_reference: &recipient,
                reference: &reference,
            })
            .await;

        match created {
            Ok(transfer_reference) => {
                info!(
                    conversion_id = %record.id,
                    transfer_reference = %transfer_reference,
                    "Provider transfer created"
                );
                self.commit(&record.id, &claim_id, |r| {
                    r.provider_transfer_reference = Some(transfer_reference.clone());
                    r.transition(
                        ConversionState::ProviderTransferCreated,
                        TransitionCause::ProviderTransferCreated,
                        Some(transfer_reference),
                    )?;
                    Ok(())
                })
            }
            Err(e) => self.settle_provider_failure(&record.id, &claim_id, e),
        }
    }

    // =========================================================================
    // Claim discipline
    // =========================================================================

    fn claim(
        &self,
        id: &str,
        expected: ConversionState,
        step: SettlementStep,
    ) -> Result<(ConversionRequest, String), SettlementError> {
        let claim_id = Uuid::new_v4().to_string();
        let now = Utc::now();
        let ttl = self.claim_ttl;

        let (record, ()) = self.db.update::<_, SettlementError, _>(id, |record| {
            if record.state != expected {
                return Err(if record.state.is_terminal() {
                    SettlementError::InvalidStateTransition {
                        from: record.state,
                        attempted: "proceed with",
                    }
                } else {
                    SettlementError::TransitionInProgress(record.id.clone())
                });
            }
            if record.active_claim(now, ttl).is_some() {
                return Err(SettlementError::TransitionInProgress(record.id.clone()));
            }
            if let Some(stale) = &record.in_flight {
                warn!(
                    conversion_id = %record.id,
                    step = ?stale.step,
                    claimed_at = %stale.claimed_at,
                    "Taking over abandoned claim"
                );
            }
            record.in_flight = Some(InFlightClaim {
                claim_id: claim_id.clone(),
                step,
                claimed_at: now,
            });
            Ok(())
        })?;

        Ok((record, claim_id))
    }

    /// Apply a successful step and clear the claim.
    fn commit<F>(
        &self,
        id: &str,
        claim_id: &str,
        apply: F,
    ) -> Result<ConversionRequest, SettlementError>
    where
        F: FnOnce(&mut ConversionRequest) -> Result<(), SettlementError>,
    {
        let (record, ()) = self.db.update::<_, SettlementError, _>(id, |record| {
            ensure_claim_held(record, claim_id)?;
            let from = record.state;
            apply(record)?;
            record.in_flight = None;
            info!(conversion_id = %record.id, from = %from, to = %record.state, "Conversion transitioned");
            Ok(())
        })?;
        Ok(record)
    }

    /// Persist progress inside a claimed step without changing state.
    fn update_claimed<F>(&self, id: &str, claim_id: &str, apply: F) -> Result<(), SettlementError>
    where
        F: FnOnce(&mut ConversionRequest),
    {
        self.db.update::<_, SettlementError, _>(id, |record| {
            ensure_claim_held(record, claim_id)?;
            apply(record);
            Ok::<(), SettlementError>(())
        })?;
        Ok(())
    }

    /// Like `update_claimed`, but also releases the claim.
    fn commit_keeping_state<F>(
        &self,
        id: &str,
        claim_id: &str,
        apply: F,
    ) -> Result<(), SettlementError>
    where
        F: FnOnce(&mut ConversionRequest),
    {
        self.update_claimed(id, claim_id, |record| {
            apply(record);
            record.in_flight = None;
        })
    }

    /// Drop the claim after a failure that records nothing.
    fn release(&self, id: &str, claim_id: &str) {
        let released = self.db.update::<_, SettlementError, _>(id, |record| {
            if record
                .in_flight
                .as_ref()
                .is_some_and(|claim| claim.claim_id == claim_id)
            {
                record.in_flight = None;
            }
            Ok::<(), SettlementError>(())
        });
        if let Err(e) = released {
            error!(conversion_id = %id, error = %e, "Failed to release claim");
        }
    }

    fn settle_ledger_failure(
        &self,
        id: &str,
        claim_id: &str,
        err: LedgerError,
    ) -> Result<ConversionRequest, SettlementError> {
        let pending_cleared = matches!(err, LedgerError::TransferReverted(_));
        self.settle_failure(id, claim_id, ledger_disposition(err), pending_cleared)
    }

    fn settle_provider_failure(
        &self,
        id: &str,
        claim_id: &str,
        err: BankProviderError,
    ) -> Result<ConversionRequest, SettlementError> {
        self.settle_failure(id, claim_id, provider_disposition(err), false)
    }

    fn settle_failure(
        &self,
        id: &str,
        claim_id: &str,
        disposition: Disposition,
        clear_pending: bool,
    ) -> Result<ConversionRequest, SettlementError> {
        match disposition {
            Disposition::Surface(e) => {
                self.release(id, claim_id);
                warn!(conversion_id = %id, error = %e, "Settlement step failed, no transition");
                Err(e)
            }
            Disposition::Fail {
                reason,
                cause,
                detail,
            } => {
                warn!(
                    conversion_id = %id,
                    reason = reason.code(),
                    detail = %detail,
                    "Settlement step failed terminally"
                );
                self.db.update::<_, SettlementError, _>(id, |record| {
                    ensure_claim_held(record, claim_id)?;
                    if clear_pending {
                        record.pending_ledger_tx = None;
                    }
                    record.fail(reason, cause, Some(detail))?;
                    Ok::<(), SettlementError>(())
                })?;
                Err(SettlementError::ConversionFailed {
                    id: id.to_string(),
                    reason,
                })
            }
        }
    }

    fn validate_token(
        &self,
        symbol: &str,
        amount: Option<Decimal>,
    ) -> Result<String, SettlementError> {
        let token = self.ledger.token(symbol).map_err(ledger_error)?;
        if let Some(amount) = amount {
            crate::blockchain::units::to_base_units(amount, token.decimals).map_err(ledger_error)?;
        }
        Ok(token.symbol)
    }
}

/// Fix the fiat amount and move the record to `AmountQuoted`.
fn lock_quote(
    record: &mut ConversionRequest,
    (source_amount, fiat_amount, quote): (Decimal, Decimal, Quote),
) -> Result<(), SettlementError> {
    if quote.stale {
        warn!(conversion_id = %record.id, rate = %quote.rate, "Quoting with fallback rate");
    }
    let detail = format!("{} {}/{}", quote.rate, quote.token, quote.currency);
    record.source_amount = Some(source_amount);
    record.fiat_amount = Some(fiat_amount);
    record.quote = Some(LockedQuote::from(&quote));
    record.transition(ConversionState::AmountQuoted, TransitionCause::RateQuoted, Some(detail))?;
    Ok(())
}

fn ensure_claim_held(record: &ConversionRequest, claim_id: &str) -> Result<(), SettlementError> {
    match &record.in_flight {
        Some(claim) if claim.claim_id == claim_id => Ok(()),
        _ => {
            error!(conversion_id = %record.id, "Claim lost before commit");
            Err(SettlementError::TransitionInProgress(record.id.clone()))
        }
    }
}

fn source_of(record: &ConversionRequest) -> Result<(&str, Decimal), LedgerError> {
    match (record.source_token.as_deref(), record.source_amount) {
        (Some(symbol), Some(amount)) => Ok((symbol, amount)),
        _ => Err(LedgerError::InvalidAmount(format!(
            "conversion {} has no source amount",
            record.id
        ))),
    }
}

fn validate_currency(code: &str) -> Result<String, SettlementError> {
    normalize_currency(code).ok_or_else(|| SettlementError::UnsupportedCurrency(code.trim().to_string()))
}

fn ensure_positive(amount: Decimal) -> Result<(), SettlementError> {
    if amount <= Decimal::ZERO {
        return Err(SettlementError::InvalidAmount(
            "amount must be positive".to_string(),
        ));
    }
    Ok(())
}
