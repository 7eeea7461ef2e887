// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Bank provider webhook endpoint.
//!
//! The provider retries any non-2xx delivery, so every verified event is
//! acknowledged with 200 (including duplicates, unmatched references and
//! conflicts, which are recorded as anomalies). Only a bad signature gets
//! 401, and only an internal failure gets 500.

use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    Json,
};
use serde::Serialize;
use tracing::{error, warn};
use utoipa::ToSchema;

use crate::{
    error::{ApiError, ErrorBody},
    providers::SIGNATURE_HEADER,
    settlement::{AcceptReason, WebhookError, WebhookOutcome},
    state::AppState,
};

/// Acknowledgement for an accepted event. The provider only looks at the
/// status code and `received`.
#[derive(Debug, Serialize, ToSchema)]
pub struct WebhookAck {
    pub received: bool,
    pub result: AcceptReason,
}

#[utoipa::path(
    post,
    path = "/webhooks/paystack",
    tag = "Reconciliation",
    request_body(content = String, description = "Raw provider event (JSON)", content_type = "application/json"),
    params(
        ("x-paystack-signature" = String, Header, description = "Hex HMAC-SHA512 of the raw body")
    ),
    responses(
        (status = 200, description = "Event accepted", body = WebhookAck),
        (status = 401, description = "Invalid signature", body = ErrorBody),
        (status = 500, description = "Not processed; the provider should retry", body = ErrorBody)
    )
)]
pub async fn paystack_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<WebhookAck>, ApiError> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|value| value.to_str().ok());

    match state.reconciler.handle(&body, signature) {
        Ok(WebhookOutcome::Accepted(result)) => Ok(Json(WebhookAck {
            received: true,
            result,
        })),
        Ok(WebhookOutcome::Rejected) => Err(ApiError::new(
            StatusCode::UNAUTHORIZED,
            "invalid_signature",
            "Invalid webhook signature",
        )),
        Err(WebhookError::NotReady {
            conversion_id,
            state,
        }) => {
            warn!(conversion_id = %conversion_id, state = %state, "Webhook arrived early; asking provider to retry");
            Err(ApiError::internal("Conversion not ready for this event"))
        }
        Err(e @ WebhookError::Storage(_)) => {
            error!(error = %e, "Webhook processing failed");
            Err(ApiError::internal("Webhook processing failed"))
        }
    }
}
