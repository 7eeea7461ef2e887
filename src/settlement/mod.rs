// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Settlement Module
//!
//! The conversion lifecycle: a persisted record moved through
//! quote, account verification, allowance, bridge transfer and provider
//! payout by [`SettlementService`], and closed by provider webhooks through
//! [`WebhookReconciler`].
//!
//! ```text
//! Draft → AmountQuoted → AccountVerified → AllowanceEnsured
//!       → LedgerSubmitted → ProviderTransferCreated → Settled
//! ```
//!
//! `Failed` and `Cancelled` are the other terminal states.

pub mod error;
pub mod machine;
pub mod monitor;
pub mod reconciler;
pub mod types;

pub use error::SettlementError;
pub use machine::{DraftAmendment, NewConversion, SettlementService, WalletBalance};
pub use monitor::{SettlementMonitor, SweepReport};
pub use reconciler::{AcceptReason, WebhookError, WebhookOutcome, WebhookReconciler};
pub use types::{
    ConversionRequest, ConversionState, FailureReason, HistoryEntry, InFlightClaim, LockedQuote,
    MissingField, SettlementStep, TransitionCause,
};
