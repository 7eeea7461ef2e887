// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Settlement chain integration.
//!
//! This module provides:
//! - The [`LedgerClient`] contract used by the settlement state machine
//! - An alloy-backed implementation for EVM chains (balances, allowances,
//!   approvals and the bridge transfer)
//! - Decimal/base-unit conversions and the token registry

pub mod client;
pub mod contracts;
pub mod ledger;
pub mod types;
pub mod units;

pub use client::EvmLedgerClient;
pub use ledger::{AllowanceOutcome, LedgerClient, LedgerError, OfframpTransfer};
pub use types::{checksum_address, NetworkConfig, SettlementToken, TokenRegistry};
