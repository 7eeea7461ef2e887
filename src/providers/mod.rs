// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Fiat rail integration: the bank provider contract, the Paystack client
//! and inbound webhook signature checks.

pub mod bank;
pub mod paystack;
pub mod webhook_signature;

pub use bank::{
    fallback_banks, validate_account_shape, Bank, BankAccountVerification, BankProvider,
    BankProviderError, RecipientDetails, TransferRequest,
};
pub use paystack::PaystackClient;
pub use webhook_signature::{verify_webhook_signature, WebhookVerifier, SIGNATURE_HEADER};
