// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use axum::{extract::State, Json};

use crate::{models::BankListResponse, state::AppState};

/// Banks that can receive payouts.
///
/// Never fails: when the provider is unreachable the static list is served.
#[utoipa::path(
    get,
    path = "/v1/banks",
    tag = "Banks",
    responses(
        (status = 200, description = "Bank directory", body = BankListResponse)
    )
)]
pub async fn list_banks(State(state): State<AppState>) -> Json<BankListResponse> {
    let banks = state.settlement.list_banks().await;
    Json(BankListResponse { banks })
}
