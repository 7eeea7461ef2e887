// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Storage Module
//!
//! Durable state lives in a single redb file (`$DATA_DIR/settlement.redb`):
//! conversion records, the provider-reference index and the anomaly log.
//!
//! ## Important Notes
//!
//! - Records are only ever mutated through `ConversionDb::update`
//! - Records are never deleted implicitly

pub mod anomaly;
pub mod conversion_db;

pub use anomaly::{report_anomaly, AnomalyEvent, AnomalyKind};
pub use conversion_db::{ConversionDb, ConversionDbError, ConversionDbResult};
