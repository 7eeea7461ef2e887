// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Wallet balance reads against the settlement chain.

use axum::{
    extract::{Path, State},
    Json,
};

use crate::{
    error::{ApiError, ErrorBody},
    models::BalanceResponse,
    state::AppState,
};

#[utoipa::path(
    get,
    path = "/v1/wallets/{address}/balances/{token}",
    tag = "Wallets",
    params(
        ("address" = String, Path, description = "Wallet address (0x-prefixed)"),
        ("token" = String, Path, description = "Token symbol, e.g. USDT")
    ),
    responses(
        (status = 200, description = "Token balance", body = BalanceResponse),
        (status = 400, description = "Invalid address or unsupported token", body = ErrorBody),
        (status = 503, description = "Chain unavailable", body = ErrorBody)
    )
)]
pub async fn get_balance(
    State(state): State<AppState>,
    Path((address, token)): Path<(String, String)>,
) -> Result<Json<BalanceResponse>, ApiError> {
    let balance = state.settlement.wallet_balance(&address, &token).await?;
    Ok(Json(balance.into()))
}

#[cfg(test)]
mod tests {
    use crate::api::router;
    use crate::testing::{Harness, OWNER};
    use axum::{
        body::{to_bytes, Body},
        http::{Request, StatusCode},
    };
    use rust_decimal_macros::dec;
    use tower::ServiceExt;

    async fn get(h: &Harness, uri: &str) -> (StatusCode, serde_json::Value) {
        let response = router(h.app_state(None))
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn returns_checksummed_balance() {
        let h = Harness::new();
        h.ledger.set_balance(dec!(42.5));
        let (status, body) = get(
            &h,
            &format!("/v1/wallets/{}/balances/usdt", OWNER.to_lowercase()),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["address"], OWNER);
        assert_eq!(body["token"], "USDT");
        assert_eq!(body["balance"], "42.5");
    }

    #[tokio::test]
    async fn rejects_unknown_token() {
        let h = Harness::new();
        let (status, body) = get(&h, &format!("/v1/wallets/{OWNER}/balances/DOGE")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], "unsupported_token");
    }
}
