// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use axum::{extract::State, Json};

use crate::{
    error::{ApiError, ErrorBody},
    intent::RoutedIntent,
    models::{IntentRequest, IntentResponse},
    state::AppState,
};

/// Route classifier output for one chat message.
///
/// Conversion intents create a draft, or amend `draft_id`, and report the
/// follow-up questions for whatever is still missing. Anything else is
/// answered with `applicable: false` and no side effect.
#[utoipa::path(
    post,
    path = "/v1/intents",
    tag = "Intents",
    request_body = IntentRequest,
    responses(
        (status = 200, description = "Intent routed", body = IntentResponse),
        (status = 400, description = "Invalid extracted field", body = ErrorBody),
        (status = 404, description = "Unknown draft", body = ErrorBody)
    )
)]
pub async fn route_intent(
    State(state): State<AppState>,
    Json(request): Json<IntentRequest>,
) -> Result<Json<IntentResponse>, ApiError> {
    let intent = request.classification.intent.clone();
    let routed = state
        .intents
        .route(
            request.owner_address.as_ref(),
            request.draft_id.as_deref(),
            request.classification,
        )
        .await?;

    let response = match routed {
        RoutedIntent::NotApplicable { .. } => IntentResponse::not_applicable(intent),
        RoutedIntent::Draft(draft) => {
            let ledger_tx_url = draft
                .record
                .ledger_tx_hash
                .as_deref()
                .and_then(|hash| state.settlement.explorer_tx_url(hash));
            IntentResponse::from_draft(intent, *draft, ledger_tx_url)
        }
    };
    Ok(Json(response))
}
