// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use axum::{
    body::Body,
    http::{HeaderName, Request},
    routing::{get, post},
    Router,
};
use tower_http::{
    cors::CorsLayer,
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::{DefaultOnResponse, TraceLayer},
};
use tracing::Level;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::{
    error::ErrorBody,
    intent::{ExtractedFields, IntentClassification},
    models::{
        AmendConversionRequest, AnomalyListResponse, BalanceResponse, BankAccountRequest,
        BankListResponse, ConversionResponse, CreateConversionRequest, IntentRequest,
        IntentResponse, WalletAddress,
    },
    providers::{Bank, BankAccountVerification},
    settlement::{
        AcceptReason, ConversionState, FailureReason, HistoryEntry, MissingField, TransitionCause,
    },
    state::AppState,
    storage::{AnomalyEvent, AnomalyKind},
};

pub mod banks;
pub mod conversions;
pub mod health;
pub mod intents;
pub mod reconciliation;
pub mod wallets;
pub mod webhooks;

const REQUEST_ID_HEADER: &str = "x-request-id";

pub fn router(state: AppState) -> Router {
    let v1_routes = Router::new()
        .route("/conversions", post(conversions::create_conversion))
        .route(
            "/conversions/{id}",
            get(conversions::get_conversion).patch(conversions::amend_conversion),
        )
        .route(
            "/conversions/{id}/bank-account",
            post(conversions::submit_bank_account),
        )
        .route("/conversions/{id}/proceed", post(conversions::proceed_conversion))
        .route("/conversions/{id}/cancel", post(conversions::cancel_conversion))
        .route("/intents", post(intents::route_intent))
        .route("/banks", get(banks::list_banks))
        .route(
            "/wallets/{address}/balances/{token}",
            get(wallets::get_balance),
        )
        .route(
            "/reconciliation/anomalies",
            get(reconciliation::list_anomalies),
        );

    let request_id = HeaderName::from_static(REQUEST_ID_HEADER);

    Router::new()
        .route("/health", get(health::health))
        .route("/health/live", get(health::liveness))
        .route("/health/ready", get(health::readiness))
        .route("/webhooks/paystack", post(webhooks::paystack_webhook))
        .nest("/v1", v1_routes)
        .with_state(state)
        .merge(SwaggerUi::new("/docs").url("/api-doc/openapi.json", ApiDoc::openapi()))
        .layer(PropagateRequestIdLayer::new(request_id.clone()))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|request: &Request<Body>| {
                    let request_id = request
                        .headers()
                        .get(REQUEST_ID_HEADER)
                        .and_then(|v| v.to_str().ok())
                        .unwrap_or("-");
                    tracing::info_span!(
                        "http_request",
                        method = %request.method(),
                        uri = %request.uri(),
                        request_id = %request_id,
                    )
                })
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(SetRequestIdLayer::new(request_id, MakeRequestUuid))
        .layer(CorsLayer::permissive())
}

#[derive(OpenApi)]
#[openapi(
    paths(
        conversions::create_conversion,
        conversions::get_conversion,
        conversions::amend_conversion,
        conversions::submit_bank_account,
        conversions::proceed_conversion,
        conversions::cancel_conversion,
        intents::route_intent,
        banks::list_banks,
        wallets::get_balance,
        reconciliation::list_anomalies,
        webhooks::paystack_webhook,
        health::health,
        health::liveness,
        health::readiness
    ),
    components(
        schemas(
            WalletAddress,
            CreateConversionRequest,
            AmendConversionRequest,
            BankAccountRequest,
            ConversionResponse,
            ConversionState,
            FailureReason,
            HistoryEntry,
            TransitionCause,
            MissingField,
            BankAccountVerification,
            IntentRequest,
            IntentResponse,
            IntentClassification,
            ExtractedFields,
            Bank,
            BankListResponse,
            BalanceResponse,
            AnomalyEvent,
            AnomalyKind,
            AnomalyListResponse,
            AcceptReason,
            webhooks::WebhookAck,
            ErrorBody,
            health::ReadyResponse,
            health::HealthChecks,
            health::HealthResponse
        )
    ),
    tags(
        (name = "Conversions", description = "Crypto-to-fiat conversion lifecycle"),
        (name = "Intents", description = "Chat intent routing into conversion drafts"),
        (name = "Banks", description = "Payout bank directory"),
        (name = "Wallets", description = "Wallet balance reads"),
        (name = "Reconciliation", description = "Provider webhooks and anomalies"),
        (name = "Health", description = "Liveness and readiness probes")
    )
)]
pub struct ApiDoc;
