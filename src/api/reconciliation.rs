// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use axum::{
    extract::{Query, State},
    Json,
};
use serde::Deserialize;
use utoipa::IntoParams;

use crate::{
    error::{ApiError, ErrorBody},
    models::AnomalyListResponse,
    state::AppState,
};

const DEFAULT_LIMIT: usize = 100;
const MAX_LIMIT: usize = 1000;

#[derive(Debug, Deserialize, IntoParams)]
pub struct AnomalyQuery {
    /// Maximum number of anomalies, newest first (default 100, max 1000).
    pub limit: Option<usize>,
}

/// Reconciliation anomalies recorded by the webhook reconciler and the
/// state machine, newest first.
#[utoipa::path(
    get,
    path = "/v1/reconciliation/anomalies",
    tag = "Reconciliation",
    params(AnomalyQuery),
    responses(
        (status = 200, description = "Recorded anomalies", body = AnomalyListResponse),
        (status = 500, description = "Storage error", body = ErrorBody)
    )
)]
pub async fn list_anomalies(
    State(state): State<AppState>,
    Query(query): Query<AnomalyQuery>,
) -> Result<Json<AnomalyListResponse>, ApiError> {
    let limit = query.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);
    let anomalies = state.db.list_anomalies(limit).map_err(|e| {
        tracing::error!(error = %e, "Failed to list anomalies");
        ApiError::internal("Failed to list anomalies")
    })?;
    Ok(Json(AnomalyListResponse {
        total: anomalies.len(),
        anomalies,
    }))
}
