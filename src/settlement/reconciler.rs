// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Provider webhook reconciliation.
//!
//! Delivery is at-least-once and unordered. Every signed event is accepted
//! unless the record is not yet ready for it; only a bad signature is
//! rejected. Duplicates and conflicts never touch the record.

use std::sync::Arc;

use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info, warn};
use utoipa::ToSchema;

use super::types::{
    conversion_id_from_reference, ConversionRequest, ConversionState, FailureReason,
    TransitionCause,
};
use crate::providers::WebhookVerifier;
use crate::storage::{report_anomaly, AnomalyEvent, AnomalyKind, ConversionDb, ConversionDbError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum AcceptReason {
    /// The event moved the record to a terminal state.
    Applied,
    Duplicate,
    /// Event type we do not act on.
    Ignored,
    Unmatched,
    Conflict,
    Malformed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WebhookOutcome {
    Accepted(AcceptReason),
    /// Signature missing or invalid.
    Rejected,
}

/// Internal failure. The provider should retry.
#[derive(Debug, thiserror::Error)]
pub enum WebhookError {
    #[error("conversion {conversion_id} is {state}, not awaiting provider events")]
    NotReady {
        conversion_id: String,
        state: ConversionState,
    },

    #[error("storage error: {0}")]
    Storage(#[from] ConversionDbError),
}

#[derive(Debug, Deserialize)]
struct ProviderEvent {
    event: String,
    #[serde(default)]
    data: EventData,
}

#[derive(Debug, Default, Deserialize)]
struct EventData {
    transfer_code: Option<String>,
    reference: Option<String>,
    status: Option<String>,
    failure_reason: Option<String>,
    reason: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TransferEvent {
    Success,
    Failed,
    Reversed,
}

impl TransferEvent {
    fn parse(event: &str) -> Option<Self> {
        match event {
            "transfer.success" => Some(Self::Success),
            "transfer.failed" => Some(Self::Failed),
            "transfer.reversed" => Some(Self::Reversed),
            _ => None,
        }
    }

    fn failure_reason(self) -> Option<FailureReason> {
        match self {
            Self::Success => None,
            Self::Failed => Some(FailureReason::ProviderTransferFailed),
            Self::Reversed => Some(FailureReason::ProviderTransferReversed),
        }
    }
}

/// Why an event left the record untouched. Aborts the write transaction.
enum Skip {
    Duplicate,
    Conflict(AnomalyKind),
    NotReady(ConversionState),
    Db(ConversionDbError),
}

impl From<ConversionDbError> for Skip {
    fn from(err: ConversionDbError) -> Self {
        Self::Db(err)
    }
}

pub struct WebhookReconciler {
    db: Arc<ConversionDb>,
    verifier: WebhookVerifier,
}

impl WebhookReconciler {
    pub fn new(db: Arc<ConversionDb>, verifier: WebhookVerifier) -> Self {
        Self { db, verifier }
    }

    pub fn is_configured(&self) -> bool {
        self.verifier.is_configured()
    }

    /// Safe to call any number of times with the same payload.
    pub fn handle(
        &self,
        raw_payload: &[u8],
        signature_header: Option<&str>,
    ) -> Result<WebhookOutcome, WebhookError> {
        if !self.verifier.verify(raw_payload, signature_header) {
            warn!(
                signature_present = signature_header.is_some(),
                "Webhook signature rejected"
            );
            return Ok(WebhookOutcome::Rejected);
        }

        let event: ProviderEvent = match serde_json::from_slice(raw_payload) {
            Ok(event) => event,
            Err(e) => {
                report_anomaly(
                    &self.db,
                    AnomalyEvent::new(AnomalyKind::MalformedPayload)
                        .with_details(json!({ "error": e.to_string() })),
                );
                return Ok(WebhookOutcome::Accepted(AcceptReason::Malformed));
            }
        };

        let Some(kind) = TransferEvent::parse(&event.event) else {
            debug!(event_type = %event.event, "Ignoring webhook event type");
            return Ok(WebhookOutcome::Accepted(AcceptReason::Ignored));
        };

        let reference = event
            .data
            .transfer_code
            .clone()
            .or_else(|| event.data.reference.clone());
        let Some(reference) = reference else {
            report_anomaly(
                &self.db,
                AnomalyEvent::new(AnomalyKind::MalformedPayload)
                    .with_event_type(event.event.clone())
                    .with_details(json!({ "error": "no transfer reference" })),
            );
            return Ok(WebhookOutcome::Accepted(AcceptReason::Malformed));
        };

        let Some(record) = self.resolve(&event.data)? else {
            report_anomaly(
                &self.db,
                AnomalyEvent::new(AnomalyKind::UnmatchedReference)
                    .with_reference(reference)
                    .with_event_type(event.event.clone()),
            );
            return Ok(WebhookOutcome::Accepted(AcceptReason::Unmatched));
        };

        let detail = event
            .data
            .failure_reason
            .clone()
            .or_else(|| event.data.reason.clone())
            .or_else(|| event.data.status.clone());

        let applied = self.db.update::<_, Skip, _>(&record.id, |record| {
            apply_event(record, kind, &event.event, detail)
        });

        match applied {
            Ok((record, ())) => {
                info!(
                    conversion_id = %record.id,
                    event_type = %event.event,
                    state = %record.state,
                    "Webhook applied"
                );
                Ok(WebhookOutcome::Accepted(AcceptReason::Applied))
            }
            Err(Skip::Duplicate) => {
                debug!(conversion_id = %record.id, event_type = %event.event, "Duplicate webhook");
                Ok(WebhookOutcome::Accepted(AcceptReason::Duplicate))
            }
            Err(Skip::Conflict(anomaly)) => {
                report_anomaly(
                    &self.db,
                    AnomalyEvent::new(anomaly)
                        .with_conversion(record.id.clone())
                        .with_reference(reference)
                        .with_event_type(event.event.clone())
                        .with_details(json!({ "state": record.state })),
                );
                Ok(WebhookOutcome::Accepted(AcceptReason::Conflict))
            }
            Err(Skip::NotReady(state)) => {
                report_anomaly(
                    &self.db,
                    AnomalyEvent::new(AnomalyKind::EventBeforeTransferCreated)
                        .with_conversion(record.id.clone())
                        .with_reference(reference)
                        .with_event_type(event.event.clone())
                        .with_details(json!({ "state": state })),
                );
                Err(WebhookError::NotReady {
                    conversion_id: record.id,
                    state,
                })
            }
            Err(Skip::Db(e)) => Err(WebhookError::Storage(e)),
        }
    }

    /// Transfer code index first, then our own `offramp-{id}` reference.
    fn resolve(&self, data: &EventData) -> Result<Option<ConversionRequest>, WebhookError> {
        if let Some(code) = data.transfer_code.as_deref() {
            if let Some(record) = self.db.find_by_provider_reference(code)? {
                return Ok(Some(record));
            }
        }
        if let Some(id) = data.reference.as_deref().and_then(conversion_id_from_reference) {
            return Ok(self.db.get(id)?);
        }
        Ok(None)
    }
}

fn apply_event(
    record: &mut ConversionRequest,
    kind: TransferEvent,
    event_type: &str,
    detail: Option<String>,
) -> Result<(), Skip> {
    match (record.state, kind) {
        (ConversionState::ProviderTransferCreated, TransferEvent::Success) => {
            record
                .transition(
                    ConversionState::Settled,
                    TransitionCause::ProviderWebhook,
                    Some(event_type.to_string()),
                )
                .map_err(|e| Skip::NotReady(e.from))?;
            Ok(())
        }
        (ConversionState::ProviderTransferCreated, _) => {
            let reason = kind
                .failure_reason()
                .unwrap_or(FailureReason::ProviderTransferFailed);
            record
                .fail(reason, TransitionCause::ProviderWebhook, detail)
                .map_err(|e| Skip::NotReady(e.from))?;
            Ok(())
        }
        (ConversionState::Settled, TransferEvent::Success) => Err(Skip::Duplicate),
        (ConversionState::Failed, _) if record.failure_reason == kind.failure_reason() => {
            Err(Skip::Duplicate)
        }
        (ConversionState::Settled, TransferEvent::Reversed) => {
            Err(Skip::Conflict(AnomalyKind::ReversalAfterSettlement))
        }
        (state, _) if state.is_terminal() => Err(Skip::Conflict(AnomalyKind::ConflictingOutcome)),
        (state, _) => Err(Skip::NotReady(state)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::webhook_signature::sign_payload;
    use crate::testing::{Harness, VALID_ACCOUNT};
    use rust_decimal_macros::dec;

    const SECRET: &str = "sk_test_webhook";

    fn reconciler(h: &Harness) -> WebhookReconciler {
        WebhookReconciler::new(
            h.db.clone(),
            WebhookVerifier::new(Some(SECRET.to_string()), false),
        )
    }

    fn event(kind: &str, transfer_code: &str, reference: &str) -> Vec<u8> {
        json!({
            "event": kind,
            "data": {
                "transfer_code": transfer_code,
                "reference": reference,
                "amount": 18000000,
                "status": kind.trim_start_matches("transfer."),
                "failure_reason": if kind == "transfer.failed" { Some("Account closed") } else { None },
            }
        })
        .to_string()
        .into_bytes()
    }

    fn deliver(r: &WebhookReconciler, body: &[u8]) -> Result<WebhookOutcome, WebhookError> {
        let signature = sign_payload(body, SECRET);
        r.handle(body, Some(&signature))
    }

    async fn awaiting_webhook(h: &Harness) -> ConversionRequest {
        let record = h
            .service
            .create_request(crate::settlement::NewConversion {
                owner_address: crate::testing::OWNER.to_string(),
                token: Some("USDT".into()),
                amount: Some(dec!(100)),
                fiat_currency: Some("NGN".into()),
                fiat_amount: None,
            })
            .await
            .unwrap();
        let mut record = h
            .service
            .submit_bank_account(&record.id, VALID_ACCOUNT, "058")
            .await
            .unwrap();
        while record.state != ConversionState::ProviderTransferCreated {
            record = h.service.proceed(&record.id).await.unwrap();
        }
        record
    }

    #[tokio::test]
    async fn success_event_settles_once() {
        let h = Harness::new();
        let r = reconciler(&h);
        let record = awaiting_webhook(&h).await;
        let code = record.provider_transfer_reference.clone().unwrap();
        let body = event("transfer.success", &code, &record.provider_reference());

        assert_eq!(
            deliver(&r, &body).unwrap(),
            WebhookOutcome::Accepted(AcceptReason::Applied)
        );
        let settled = h.service.get_status(&record.id).unwrap();
        assert_eq!(settled.state, ConversionState::Settled);

        assert_eq!(
            deliver(&r, &body).unwrap(),
            WebhookOutcome::Accepted(AcceptReason::Duplicate)
        );
        assert_eq!(h.service.get_status(&record.id).unwrap(), settled);
    }

    #[tokio::test]
    async fn failed_event_delivered_twice() {
        let h = Harness::new();
        let r = reconciler(&h);
        let record = awaiting_webhook(&h).await;
        let code = record.provider_transfer_reference.clone().unwrap();
        let body = event("transfer.failed", &code, &record.provider_reference());

        assert_eq!(
            deliver(&r, &body).unwrap(),
            WebhookOutcome::Accepted(AcceptReason::Applied)
        );
        let failed = h.service.get_status(&record.id).unwrap();
        assert_eq!(failed.state, ConversionState::Failed);
        assert_eq!(failed.failure_reason, Some(FailureReason::ProviderTransferFailed));
        assert_eq!(failed.failure_detail.as_deref(), Some("Account closed"));
        let history_len = failed.history.len();

        assert_eq!(
            deliver(&r, &body).unwrap(),
            WebhookOutcome::Accepted(AcceptReason::Duplicate)
        );
        assert_eq!(h.service.get_status(&record.id).unwrap().history.len(), history_len);
    }

    #[tokio::test]
    async fn reversal_marks_failed_with_reversal_reason() {
        let h = Harness::new();
        let r = reconciler(&h);
        let record = awaiting_webhook(&h).await;
        let body = event("transfer.reversed", "TRF_1", "");

        deliver(&r, &body).unwrap();
        let stored = h.service.get_status(&record.id).unwrap();
        assert_eq!(stored.failure_reason, Some(FailureReason::ProviderTransferReversed));
    }

    #[tokio::test]
    async fn reversal_after_settlement_is_an_anomaly() {
        let h = Harness::new();
        let r = reconciler(&h);
        let record = awaiting_webhook(&h).await;
        deliver(&r, &event("transfer.success", "TRF_1", "")).unwrap();
        let settled = h.service.get_status(&record.id).unwrap();

        assert_eq!(
            deliver(&r, &event("transfer.reversed", "TRF_1", "")).unwrap(),
            WebhookOutcome::Accepted(AcceptReason::Conflict)
        );
        assert_eq!(h.service.get_status(&record.id).unwrap(), settled);
        let anomalies = h.db.list_anomalies(10).unwrap();
        assert_eq!(anomalies[0].kind, AnomalyKind::ReversalAfterSettlement);
    }

    #[tokio::test]
    async fn correlates_by_reference_when_code_is_unknown() {
        let h = Harness::new();
        let r = reconciler(&h);
        let record = awaiting_webhook(&h).await;

        let body = event("transfer.success", "TRF_unknown", &record.provider_reference());
        assert_eq!(
            deliver(&r, &body).unwrap(),
            WebhookOutcome::Accepted(AcceptReason::Applied)
        );
    }

    #[tokio::test]
    async fn unmatched_reference_is_accepted_and_recorded() {
        let h = Harness::new();
        let r = reconciler(&h);

        let body = event("transfer.success", "TRF_nobody", "offramp-nobody");
        assert_eq!(
            deliver(&r, &body).unwrap(),
            WebhookOutcome::Accepted(AcceptReason::Unmatched)
        );
        let anomalies = h.db.list_anomalies(10).unwrap();
        assert_eq!(anomalies.len(), 1);
        assert_eq!(anomalies[0].kind, AnomalyKind::UnmatchedReference);
        assert_eq!(anomalies[0].provider_reference.as_deref(), Some("TRF_nobody"));
    }

    #[tokio::test]
    async fn bad_signature_is_rejected_without_mutation() {
        let h = Harness::new();
        let r = reconciler(&h);
        let record = awaiting_webhook(&h).await;
        let body = event("transfer.success", "TRF_1", "");

        assert_eq!(r.handle(&body, None).unwrap(), WebhookOutcome::Rejected);
        assert_eq!(
            r.handle(&body, Some(&sign_payload(&body, "wrong"))).unwrap(),
            WebhookOutcome::Rejected
        );
        assert_eq!(
            h.service.get_status(&record.id).unwrap().state,
            ConversionState::ProviderTransferCreated
        );
    }

    #[tokio::test]
    async fn unknown_event_types_are_ignored() {
        let h = Harness::new();
        let r = reconciler(&h);
        let body = br#"{"event":"charge.success","data":{"reference":"x"}}"#;
        assert_eq!(
            deliver(&r, body).unwrap(),
            WebhookOutcome::Accepted(AcceptReason::Ignored)
        );
    }

    #[tokio::test]
    async fn malformed_payload_is_accepted_and_recorded() {
        let h = Harness::new();
        let r = reconciler(&h);
        assert_eq!(
            deliver(&r, b"not json").unwrap(),
            WebhookOutcome::Accepted(AcceptReason::Malformed)
        );
        assert_eq!(h.db.list_anomalies(10).unwrap()[0].kind, AnomalyKind::MalformedPayload);
    }

    #[tokio::test]
    async fn early_event_asks_provider_to_retry() {
        let h = Harness::new();
        let r = reconciler(&h);
        let record = h
            .service
            .create_request(crate::settlement::NewConversion {
                owner_address: crate::testing::OWNER.to_string(),
                token: Some("USDT".into()),
                amount: Some(dec!(5)),
                fiat_currency: Some("NGN".into()),
                fiat_amount: None,
            })
            .await
            .unwrap();

        let body = event("transfer.success", "TRF_early", &record.provider_reference());
        assert!(matches!(
            deliver(&r, &body),
            Err(WebhookError::NotReady {
                state: ConversionState::AmountQuoted,
                ..
            })
        ));
        assert_eq!(
            h.service.get_status(&record.id).unwrap().state,
            ConversionState::AmountQuoted
        );
        assert_eq!(
            h.db.list_anomalies(10).unwrap()[0].kind,
            AnomalyKind::EventBeforeTransferCreated
        );
    }

    #[tokio::test]
    async fn cancelled_record_event_is_a_conflict() {
        let h = Harness::new();
        let r = reconciler(&h);
        let record = h
            .service
            .create_request(crate::settlement::NewConversion {
                owner_address: crate::testing::OWNER.to_string(),
                token: Some("USDT".into()),
                amount: Some(dec!(5)),
                fiat_currency: Some("NGN".into()),
                fiat_amount: None,
            })
            .await
            .unwrap();
        let cancelled = h.service.cancel(&record.id).await.unwrap();

        let body = event("transfer.success", "TRF_x", &record.provider_reference());
        assert_eq!(
            deliver(&r, &body).unwrap(),
            WebhookOutcome::Accepted(AcceptReason::Conflict)
        );
        assert_eq!(h.service.get_status(&record.id).unwrap(), cancelled);
    }

    #[test]
    fn dev_mode_without_secret_accepts_unsigned_events() {
        let dir = tempfile::tempdir().unwrap();
        let db = Arc::new(ConversionDb::open(&dir.path().join("w.redb")).unwrap());
        let body = br#"{"event":"transfer.success","data":{"reference":"offramp-x"}}"#;

        let dev = WebhookReconciler::new(db.clone(), WebhookVerifier::new(None, true));
        assert_eq!(
            dev.handle(body, None).unwrap(),
            WebhookOutcome::Accepted(AcceptReason::Unmatched)
        );

        let strict = WebhookReconciler::new(db, WebhookVerifier::new(None, false));
        assert_eq!(strict.handle(body, None).unwrap(), WebhookOutcome::Rejected);
    }
}
