// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Offramp Server - Crypto-to-Fiat Conversion Settlement Service
//!
//! Drives one conversion at a time from a chat intent to a bank payout:
//! quote, account verification, token allowance, on-chain bridge transfer
//! and provider transfer, then closes it from the provider's webhooks.
//!
//! ## Modules
//!
//! - `api` - HTTP API handlers (Axum)
//! - `blockchain` - Settlement chain client (allowances, bridge transfer)
//! - `providers` - Bank provider client and webhook signatures
//! - `pricing` - Rate oracle with cache and fallback table
//! - `settlement` - Conversion state machine and webhook reconciler
//! - `intent` - Classifier output to conversion drafts
//! - `storage` - Embedded settlement database (redb)

pub mod api;
pub mod blockchain;
pub mod config;
pub mod error;
pub mod intent;
pub mod models;
pub mod pricing;
pub mod providers;
pub mod settlement;
pub mod state;
pub mod storage;

#[cfg(test)]
pub mod testing;
