// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use tracing::error;
use utoipa::ToSchema;

use crate::settlement::SettlementError;

#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    /// Stable machine-readable code.
    pub code: &'static str,
    pub message: String,
}

/// Error body returned by every endpoint.
#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorBody {
    pub error: String,
    pub code: String,
}

impl ApiError {
    pub fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, "not_found", message)
    }

    pub fn bad_request(code: &'static str, message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, code, message)
    }

    pub fn unprocessable(code: &'static str, message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNPROCESSABLE_ENTITY, code, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "internal", message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(ErrorBody {
            error: self.message,
            code: self.code.to_string(),
        });
        (self.status, body).into_response()
    }
}

impl From<SettlementError> for ApiError {
    fn from(err: SettlementError) -> Self {
        let message = err.to_string();
        match err {
            SettlementError::NotFound(_) => Self::not_found(message),
            SettlementError::InvalidStateTransition { .. } => {
                Self::new(StatusCode::CONFLICT, "invalid_state_transition", message)
            }
            SettlementError::TransitionInProgress(_) => {
                Self::new(StatusCode::CONFLICT, "transition_in_progress", message)
            }
            SettlementError::FieldLocked(_) => {
                Self::new(StatusCode::CONFLICT, "field_locked", message)
            }
            SettlementError::MissingFields(_) => Self::unprocessable("missing_fields", message),
            SettlementError::InvalidAmount(_) => Self::bad_request("invalid_amount", message),
            SettlementError::InvalidAddress(_) => Self::bad_request("invalid_address", message),
            SettlementError::UnsupportedToken(_) => Self::bad_request("unsupported_token", message),
            SettlementError::UnsupportedCurrency(_) => {
                Self::bad_request("unsupported_currency", message)
            }
            SettlementError::InvalidBankAccount(_) => {
                Self::bad_request("invalid_bank_account", message)
            }
            SettlementError::VerificationFailed => {
                Self::unprocessable("verification_failed", message)
            }
            SettlementError::InsufficientBalance { .. } => {
                Self::unprocessable("insufficient_balance", message)
            }
            SettlementError::RateUnavailable { .. } => {
                Self::new(StatusCode::SERVICE_UNAVAILABLE, "rate_unavailable", message)
            }
            SettlementError::Retryable(detail) => {
                error!(error = %detail, "Retryable settlement failure");
                Self::new(
                    StatusCode::SERVICE_UNAVAILABLE,
                    "retryable",
                    "A dependent service is temporarily unavailable, please retry",
                )
            }
            SettlementError::ProviderRefused(detail) => {
                error!(error = %detail, "Bank provider refused request");
                Self::new(
                    StatusCode::BAD_GATEWAY,
                    "provider_error",
                    "The bank provider could not process the request, please try again later",
                )
            }
            // Raw provider/chain detail stays in the record and the logs.
            SettlementError::ConversionFailed { id, reason } => Self::unprocessable(
                "conversion_failed",
                format!("conversion {id} failed ({}): {}", reason.code(), reason.user_message()),
            ),
            SettlementError::Storage(detail) => {
                error!(error = %detail, "Settlement storage failure");
                Self::internal("Internal storage error")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settlement::{ConversionState, FailureReason, MissingField};
    use axum::body::to_bytes;

    #[test]
    fn constructors_set_status_and_code() {
        let nf = ApiError::not_found("missing");
        assert_eq!(nf.status, StatusCode::NOT_FOUND);
        assert_eq!(nf.code, "not_found");
        assert_eq!(nf.message, "missing");

        let bad = ApiError::bad_request("invalid_amount", "bad");
        assert_eq!(bad.status, StatusCode::BAD_REQUEST);
        assert_eq!(bad.code, "invalid_amount");

        let internal = ApiError::internal("oops");
        assert_eq!(internal.status, StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn into_response_returns_json_body() {
        let response = ApiError::bad_request("invalid_amount", "bad data").into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let body_bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = String::from_utf8(body_bytes.to_vec()).unwrap();
        assert_eq!(body, r#"{"error":"bad data","code":"invalid_amount"}"#);
    }

    #[test]
    fn settlement_errors_map_to_codes() {
        let cases = [
            (
                SettlementError::InvalidStateTransition {
                    from: ConversionState::Settled,
                    attempted: "cancel",
                },
                StatusCode::CONFLICT,
                "invalid_state_transition",
            ),
            (
                SettlementError::TransitionInProgress("x".into()),
                StatusCode::CONFLICT,
                "transition_in_progress",
            ),
            (
                SettlementError::MissingFields(vec![MissingField::BankAccount]),
                StatusCode::UNPROCESSABLE_ENTITY,
                "missing_fields",
            ),
            (
                SettlementError::FieldLocked("source_token"),
                StatusCode::CONFLICT,
                "field_locked",
            ),
            (
                SettlementError::RateUnavailable {
                    token: "ETH".into(),
                    currency: "JPY".into(),
                },
                StatusCode::SERVICE_UNAVAILABLE,
                "rate_unavailable",
            ),
            (
                SettlementError::ProviderRefused("401: Invalid key".into()),
                StatusCode::BAD_GATEWAY,
                "provider_error",
            ),
            (
                SettlementError::Storage("disk".into()),
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal",
            ),
        ];

        for (err, status, code) in cases {
            let api = ApiError::from(err);
            assert_eq!(api.status, status);
            assert_eq!(api.code, code);
        }
    }

    #[test]
    fn failure_messages_never_carry_raw_detail() {
        let api = ApiError::from(SettlementError::ConversionFailed {
            id: "abc".into(),
            reason: FailureReason::ProviderRejected,
        });
        assert_eq!(api.code, "conversion_failed");
        assert!(api.message.contains("provider_rejected"));

        let retry = ApiError::from(SettlementError::Retryable("rpc 10.0.0.3 refused".into()));
        assert!(!retry.message.contains("10.0.0.3"));

        let refused = ApiError::from(SettlementError::ProviderRefused("401: Invalid key".into()));
        assert!(!refused.message.contains("Invalid key"));
    }
}
