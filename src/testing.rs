// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! In-memory doubles for the ledger, bank provider and price source.
//!
//! Failures are scripted one-shot: `fail_*_with` makes the next call fail,
//! later calls succeed again.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use crate::blockchain::{LedgerClient, LedgerError, OfframpTransfer, SettlementToken};
use crate::config::IntentConfig;
use crate::intent::IntentRouter;
use crate::pricing::{PriceSource, PriceSourceError, RateCache, RateOracle};
use crate::providers::{
    Bank, BankAccountVerification, BankProvider, BankProviderError, RecipientDetails,
    TransferRequest, WebhookVerifier,
};
use crate::settlement::{SettlementService, WebhookReconciler};
use crate::state::{AppState, DependencyStatus};
use crate::storage::ConversionDb;

pub const OWNER: &str = "0xf39Fd6e51aad88F6F4ce6aB8827279cffFb92266";
pub const BRIDGE: &str = "0x2222222222222222222222222222222222222222";
pub const VALID_ACCOUNT: &str = "0123456789";
pub const VERIFIED_NAME: &str = "ADA OBI";

// =============================================================================
// Ledger
// =============================================================================

pub struct MockLedger {
    tokens: Vec<SettlementToken>,
    balance: Mutex<Decimal>,
    allowance: Mutex<Decimal>,
    approve_failure: Mutex<Option<LedgerError>>,
    transfer_failure: Mutex<Option<LedgerError>>,
    transfer_delay: Mutex<Duration>,
    outcomes: Mutex<HashMap<String, Option<bool>>>,
    pub approve_calls: AtomicUsize,
    pub submit_calls: AtomicUsize,
    pub last_transfer: Mutex<Option<OfframpTransfer>>,
}

impl MockLedger {
    pub fn new() -> Self {
        Self {
            tokens: vec![SettlementToken {
                symbol: "USDT".to_string(),
                address: "0x1111111111111111111111111111111111111111".to_string(),
                decimals: 6,
            }],
            balance: Mutex::new(dec!(1000000)),
            allowance: Mutex::new(Decimal::ZERO),
            approve_failure: Mutex::new(None),
            transfer_failure: Mutex::new(None),
            transfer_delay: Mutex::new(Duration::ZERO),
            outcomes: Mutex::new(HashMap::new()),
            approve_calls: AtomicUsize::new(0),
            submit_calls: AtomicUsize::new(0),
            last_transfer: Mutex::new(None),
        }
    }

    pub fn set_balance(&self, balance: Decimal) {
        *self.balance.lock().unwrap() = balance;
    }

    pub fn set_allowance(&self, allowance: Decimal) {
        *self.allowance.lock().unwrap() = allowance;
    }

    pub fn allowance(&self) -> Decimal {
        *self.allowance.lock().unwrap()
    }

    pub fn fail_approve_with(&self, err: LedgerError) {
        *self.approve_failure.lock().unwrap() = Some(err);
    }

    pub fn fail_transfer_with(&self, err: LedgerError) {
        *self.transfer_failure.lock().unwrap() = Some(err);
    }

    /// Delay before `submit_transfer` returns, to widen race windows.
    pub fn set_transfer_delay(&self, delay: Duration) {
        *self.transfer_delay.lock().unwrap() = delay;
    }

    pub fn set_outcome(&self, tx_hash: &str, outcome: Option<bool>) {
        self.outcomes
            .lock()
            .unwrap()
            .insert(tx_hash.to_string(), outcome);
    }
}

#[async_trait]
impl LedgerClient for MockLedger {
    fn token(&self, symbol: &str) -> Result<SettlementToken, LedgerError> {
        self.tokens
            .iter()
            .find(|t| t.symbol.eq_ignore_ascii_case(symbol.trim()))
            .cloned()
            .ok_or_else(|| LedgerError::UnsupportedToken(symbol.to_string()))
    }

    fn spender(&self) -> Result<String, LedgerError> {
        Ok(BRIDGE.to_string())
    }

    fn explorer_tx_url(&self, tx_hash: &str) -> Option<String> {
        Some(format!("https://explorer.test/tx/{tx_hash}"))
    }

    async fn get_balance(
        &self,
        _token: &SettlementToken,
        _owner: &str,
    ) -> Result<Decimal, LedgerError> {
        Ok(*self.balance.lock().unwrap())
    }

    async fn get_allowance(
        &self,
        _token: &SettlementToken,
        _owner: &str,
        _spender: &str,
    ) -> Result<Decimal, LedgerError> {
        Ok(self.allowance())
    }

    async fn approve(
        &self,
        _token: &SettlementToken,
        _owner: &str,
        _spender: &str,
        amount: Decimal,
    ) -> Result<String, LedgerError> {
        let n = self.approve_calls.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(err) = self.approve_failure.lock().unwrap().take() {
            return Err(err);
        }
        self.set_allowance(amount);
        Ok(format!("0xapprove{n}"))
    }

    async fn submit_transfer(&self, transfer: &OfframpTransfer) -> Result<String, LedgerError> {
        let n = self.submit_calls.fetch_add(1, Ordering::SeqCst) + 1;
        let delay = *self.transfer_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if let Some(err) = self.transfer_failure.lock().unwrap().take() {
            return Err(err);
        }
        *self.last_transfer.lock().unwrap() = Some(transfer.clone());
        Ok(format!("0xtransfer{n}"))
    }

    async fn transaction_outcome(&self, tx_hash: &str) -> Result<Option<bool>, LedgerError> {
        Ok(self
            .outcomes
            .lock()
            .unwrap()
            .get(tx_hash)
            .copied()
            .flatten())
    }
}

// =============================================================================
// Bank provider
// =============================================================================

pub struct MockBankProvider {
    listing_failure: Mutex<Option<BankProviderError>>,
    verify_failure: Mutex<Option<BankProviderError>>,
    recipient_failure: Mutex<Option<BankProviderError>>,
    transfer_failure: Mutex<Option<BankProviderError>>,
    pub verify_calls: AtomicUsize,
    pub recipient_calls: AtomicUsize,
    pub transfer_calls: AtomicUsize,
    /// `(amount_minor, currency, reference)` of the last transfer.
    pub last_transfer: Mutex<Option<(u64, String, String)>>,
}

impl MockBankProvider {
    pub fn new() -> Self {
        Self {
            listing_failure: Mutex::new(None),
            verify_failure: Mutex::new(None),
            recipient_failure: Mutex::new(None),
            transfer_failure: Mutex::new(None),
            verify_calls: AtomicUsize::new(0),
            recipient_calls: AtomicUsize::new(0),
            transfer_calls: AtomicUsize::new(0),
            last_transfer: Mutex::new(None),
        }
    }

    pub fn fail_bank_listing(&self, err: BankProviderError) {
        *self.listing_failure.lock().unwrap() = Some(err);
    }

    pub fn fail_verification_with(&self, err: BankProviderError) {
        *self.verify_failure.lock().unwrap() = Some(err);
    }

    pub fn fail_recipient_with(&self, err: BankProviderError) {
        *self.recipient_failure.lock().unwrap() = Some(err);
    }

    pub fn fail_transfer_with(&self, err: BankProviderError) {
        *self.transfer_failure.lock().unwrap() = Some(err);
    }
}

#[async_trait]
impl BankProvider for MockBankProvider {
    async fn fetch_banks(&self) -> Result<Vec<Bank>, BankProviderError> {
        if let Some(err) = self.listing_failure.lock().unwrap().take() {
            return Err(err);
        }
        Ok(vec![Bank {
            name: "Test Bank".to_string(),
            code: "999".to_string(),
        }])
    }

    async fn verify_account(
        &self,
        account_number: &str,
        bank_code: &str,
    ) -> Result<BankAccountVerification, BankProviderError> {
        self.verify_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = self.verify_failure.lock().unwrap().take() {
            return Err(err);
        }
        Ok(BankAccountVerification {
            account_number: account_number.to_string(),
            bank_code: bank_code.to_string(),
            verified_account_name: VERIFIED_NAME.to_string(),
        })
    }

    async fn create_recipient(
        &self,
        _details: RecipientDetails<'_>,
    ) -> Result<String, BankProviderError> {
        let n = self.recipient_calls.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(err) = self.recipient_failure.lock().unwrap().take() {
            return Err(err);
        }
        Ok(format!("RCP_{n}"))
    }

    async fn create_transfer(
        &self,
        request: TransferRequest<'_>,
    ) -> Result<String, BankProviderError> {
        let n = self.transfer_calls.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(err) = self.transfer_failure.lock().unwrap().take() {
            return Err(err);
        }
        *self.last_transfer.lock().unwrap() = Some((
            request.amount_minor,
            request.currency.to_string(),
            request.reference.to_string(),
        ));
        Ok(format!("TRF_{n}"))
    }
}

// =============================================================================
// Price source
// =============================================================================

pub struct MockPriceSource {
    rate: Mutex<Option<Decimal>>,
    pub calls: AtomicUsize,
}

impl MockPriceSource {
    pub fn with_rate(rate: Decimal) -> Self {
        Self {
            rate: Mutex::new(Some(rate)),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing() -> Self {
        Self {
            rate: Mutex::new(None),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn set_rate(&self, rate: Option<Decimal>) {
        *self.rate.lock().unwrap() = rate;
    }
}

#[async_trait]
impl PriceSource for MockPriceSource {
    fn name(&self) -> &'static str {
        "mock"
    }

    async fn fetch_rate(&self, _token: &str, _currency: &str) -> Result<Decimal, PriceSourceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.rate
            .lock()
            .unwrap()
            .ok_or_else(|| PriceSourceError::Request("mock price source is down".to_string()))
    }
}

// =============================================================================
// Wiring
// =============================================================================

/// A settlement service over a temporary database and fresh doubles.
pub struct Harness {
    pub service: Arc<SettlementService>,
    pub db: Arc<ConversionDb>,
    pub ledger: Arc<MockLedger>,
    pub bank: Arc<MockBankProvider>,
    pub prices: Arc<MockPriceSource>,
    pub oracle: Arc<RateOracle>,
    _dir: tempfile::TempDir,
}

impl Harness {
    /// Live rate 1800 for every pair.
    pub fn new() -> Self {
        Self::with_rate(dec!(1800))
    }

    pub fn with_rate(rate: Decimal) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let db = Arc::new(ConversionDb::open(&dir.path().join("settlement.redb")).unwrap());
        let ledger = Arc::new(MockLedger::new());
        let bank = Arc::new(MockBankProvider::new());
        let prices = Arc::new(MockPriceSource::with_rate(rate));
        // Zero TTL: every quote goes to the price source.
        let cache = Arc::new(RateCache::new(16, Duration::ZERO));
        let oracle = Arc::new(RateOracle::new(prices.clone(), cache));
        let service = Arc::new(SettlementService::new(
            db.clone(),
            ledger.clone(),
            bank.clone(),
            oracle.clone(),
            Duration::from_secs(600),
        ));
        Self {
            service,
            db,
            ledger,
            bank,
            prices,
            oracle,
            _dir: dir,
        }
    }

    /// Application state over this harness. Webhooks are verified against
    /// `webhook_secret`; with `None` every webhook is rejected.
    pub fn app_state(&self, webhook_secret: Option<&str>) -> AppState {
        let reconciler = Arc::new(WebhookReconciler::new(
            self.db.clone(),
            WebhookVerifier::new(webhook_secret.map(str::to_string), false),
        ));
        let intents = Arc::new(IntentRouter::new(
            self.service.clone(),
            &IntentConfig {
                default_fiat_currency: "NGN".to_string(),
                min_confidence: 0.5,
            },
        ));
        AppState::new(
            self.db.clone(),
            self.service.clone(),
            reconciler,
            intents,
            DependencyStatus {
                ledger_configured: true,
                bank_provider_configured: true,
            },
        )
    }
}
