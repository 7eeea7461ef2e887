// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Data-consistency anomalies.
//!
//! Anomalies never surface as user-visible errors. They are logged at
//! `warn` and persisted so operators can reconcile them by hand.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{error, warn};
use utoipa::ToSchema;

use super::conversion_db::ConversionDb;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum AnomalyKind {
    /// Webhook reference matches no conversion.
    UnmatchedReference,
    /// Webhook outcome contradicts a terminal state.
    ConflictingOutcome,
    ReversalAfterSettlement,
    /// Signed payload that could not be parsed.
    MalformedPayload,
    EventBeforeTransferCreated,
    /// User cancelled after tokens left the wallet.
    CancelledAfterLedgerSubmission,
}

impl AnomalyKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::UnmatchedReference => "unmatched_reference",
            Self::ConflictingOutcome => "conflicting_outcome",
            Self::ReversalAfterSettlement => "reversal_after_settlement",
            Self::MalformedPayload => "malformed_payload",
            Self::EventBeforeTransferCreated => "event_before_transfer_created",
            Self::CancelledAfterLedgerSubmission => "cancelled_after_ledger_submission",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, ToSchema)]
pub struct AnomalyEvent {
    pub event_id: String,
    pub timestamp: DateTime<Utc>,
    pub kind: AnomalyKind,
    pub conversion_id: Option<String>,
    pub provider_reference: Option<String>,
    /// Provider event type, for webhook anomalies.
    pub event_type: Option<String>,
    #[schema(value_type = Option<Object>)]
    pub details: Option<serde_json::Value>,
}

impl AnomalyEvent {
    pub fn new(kind: AnomalyKind) -> Self {
        Self {
            event_id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            kind,
            conversion_id: None,
            provider_reference: None,
            event_type: None,
            details: None,
        }
    }

    pub fn with_conversion(mut self, conversion_id: impl Into<String>) -> Self {
        self.conversion_id = Some(conversion_id.into());
        self
    }

    pub fn with_reference(mut self, reference: impl Into<String>) -> Self {
        self.provider_reference = Some(reference.into());
        self
    }

    pub fn with_event_type(mut self, event_type: impl Into<String>) -> Self {
        self.event_type = Some(event_type.into());
        self
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }
}

/// Log an anomaly and persist it. A storage failure is logged, not returned:
/// reporting must never fail the caller.
pub fn report_anomaly(db: &ConversionDb, event: AnomalyEvent) {
    warn!(
        kind = event.kind.as_str(),
        conversion_id = event.conversion_id.as_deref().unwrap_or("-"),
        provider_reference = event.provider_reference.as_deref().unwrap_or("-"),
        event_type = event.event_type.as_deref().unwrap_or("-"),
        "Settlement anomaly"
    );
    if let Err(e) = db.record_anomaly(&event) {
        error!(kind = event.kind.as_str(), error = %e, "Failed to persist anomaly");
    }
}
