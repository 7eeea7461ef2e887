// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Conversion lifecycle endpoints.
//!
//! Each handler is a thin shell over [`SettlementService`]; every state
//! change, and every refusal, comes from the state machine.
//!
//! [`SettlementService`]: crate::settlement::SettlementService

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};

use crate::{
    error::{ApiError, ErrorBody},
    models::{
        AmendConversionRequest, BankAccountRequest, ConversionResponse, CreateConversionRequest,
    },
    settlement::{ConversionRequest, DraftAmendment, NewConversion},
    state::AppState,
};

pub(crate) fn respond(state: &AppState, record: ConversionRequest) -> Json<ConversionResponse> {
    let ledger_tx_url = record
        .ledger_tx_hash
        .as_deref()
        .and_then(|hash| state.settlement.explorer_tx_url(hash));
    Json(ConversionResponse::from_record(record, ledger_tx_url))
}

/// Start a conversion.
///
/// When token, amount and currency are all present the conversion is
/// quoted immediately and returned as `amount_quoted`.
#[utoipa::path(
    post,
    path = "/v1/conversions",
    tag = "Conversions",
    request_body = CreateConversionRequest,
    responses(
        (status = 201, description = "Conversion created", body = ConversionResponse),
        (status = 400, description = "Invalid field", body = ErrorBody),
        (status = 503, description = "Rate unavailable", body = ErrorBody)
    )
)]
pub async fn create_conversion(
    State(state): State<AppState>,
    Json(request): Json<CreateConversionRequest>,
) -> Result<(StatusCode, Json<ConversionResponse>), ApiError> {
    let record = state
        .settlement
        .create_request(NewConversion {
            owner_address: request.owner_address.0,
            token: request.token,
            amount: request.amount,
            fiat_currency: request.fiat_currency,
            fiat_amount: request.fiat_amount,
        })
        .await?;
    Ok((StatusCode::CREATED, respond(&state, record)))
}

#[utoipa::path(
    get,
    path = "/v1/conversions/{id}",
    tag = "Conversions",
    params(("id" = String, Path, description = "Conversion id")),
    responses(
        (status = 200, description = "Current state", body = ConversionResponse),
        (status = 404, description = "Unknown conversion", body = ErrorBody)
    )
)]
pub async fn get_conversion(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ConversionResponse>, ApiError> {
    let record = state.settlement.get_status(&id)?;
    Ok(respond(&state, record))
}

/// Fill in missing fields of a draft.
#[utoipa::path(
    patch,
    path = "/v1/conversions/{id}",
    tag = "Conversions",
    params(("id" = String, Path, description = "Conversion id")),
    request_body = AmendConversionRequest,
    responses(
        (status = 200, description = "Draft updated", body = ConversionResponse),
        (status = 409, description = "Not a draft, or the token is already set", body = ErrorBody)
    )
)]
pub async fn amend_conversion(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<AmendConversionRequest>,
) -> Result<Json<ConversionResponse>, ApiError> {
    let record = state
        .settlement
        .amend_draft(
            &id,
            DraftAmendment {
                token: request.token,
                amount: request.amount,
                fiat_currency: request.fiat_currency,
                fiat_amount: request.fiat_amount,
            },
        )
        .await?;
    Ok(respond(&state, record))
}

/// Verify and attach the payout bank account.
#[utoipa::path(
    post,
    path = "/v1/conversions/{id}/bank-account",
    tag = "Conversions",
    params(("id" = String, Path, description = "Conversion id")),
    request_body = BankAccountRequest,
    responses(
        (status = 200, description = "Account verified", body = ConversionResponse),
        (status = 400, description = "Malformed account number or bank code", body = ErrorBody),
        (status = 422, description = "Account could not be verified", body = ErrorBody),
        (status = 502, description = "Bank provider refused the request", body = ErrorBody)
    )
)]
pub async fn submit_bank_account(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<BankAccountRequest>,
) -> Result<Json<ConversionResponse>, ApiError> {
    let record = state
        .settlement
        .submit_bank_account(&id, &request.account_number, &request.bank_code)
        .await?;
    Ok(respond(&state, record))
}

/// Run the next settlement step.
///
/// Safe to repeat: a step already in progress is refused with
/// `transition_in_progress` and never executed twice.
#[utoipa::path(
    post,
    path = "/v1/conversions/{id}/proceed",
    tag = "Conversions",
    params(("id" = String, Path, description = "Conversion id")),
    responses(
        (status = 200, description = "Step completed", body = ConversionResponse),
        (status = 409, description = "Step in progress or conversion finished", body = ErrorBody),
        (status = 422, description = "Missing input, insufficient balance or failed step", body = ErrorBody),
        (status = 503, description = "Dependency unavailable, retry later", body = ErrorBody)
    )
)]
pub async fn proceed_conversion(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ConversionResponse>, ApiError> {
    let record = state.settlement.proceed(&id).await?;
    Ok(respond(&state, record))
}

#[utoipa::path(
    post,
    path = "/v1/conversions/{id}/cancel",
    tag = "Conversions",
    params(("id" = String, Path, description = "Conversion id")),
    responses(
        (status = 200, description = "Conversion cancelled", body = ConversionResponse),
        (status = 409, description = "Too late to cancel", body = ErrorBody)
    )
)]
pub async fn cancel_conversion(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ConversionResponse>, ApiError> {
    let record = state.settlement.cancel(&id).await?;
    Ok(respond(&state, record))
}
