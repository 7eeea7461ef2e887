// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Paystack integration for NGN bank payouts.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{info, warn};

use super::bank::{
    Bank, BankAccountVerification, BankProvider, BankProviderError, RecipientDetails,
    TransferRequest,
};
use crate::config::BankProviderConfig;

const TRANSFER_REASON: &str = "Crypto withdrawal";

/// Paystack wraps every payload as `{status, message, data}`.
#[derive(Debug, Deserialize)]
struct Envelope<T> {
    #[serde(default)]
    message: Option<String>,
    data: Option<T>,
}

#[derive(Debug, Deserialize)]
struct PaystackBank {
    name: String,
    code: String,
}

#[derive(Debug, Deserialize)]
struct ResolvedAccount {
    account_name: String,
}

#[derive(Debug, Deserialize)]
struct CreatedRecipient {
    recipient_code: String,
}

#[derive(Debug, Deserialize)]
struct CreatedTransfer {
    transfer_code: String,
}

#[derive(Debug, Clone)]
pub struct PaystackClient {
    base_url: String,
    secret_key: Option<String>,
    http: Client,
}

impl PaystackClient {
    pub fn new(config: &BankProviderConfig) -> Result<Self, BankProviderError> {
        let http = Client::builder()
            .timeout(Duration::from_secs(15))
            .build()
            .map_err(|e| BankProviderError::Transport(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            secret_key: config.secret_key.clone(),
            http,
        })
    }

    pub fn is_configured(&self) -> bool {
        self.secret_key.is_some()
    }

    fn secret(&self) -> Result<&str, BankProviderError> {
        self.secret_key
            .as_deref()
            .ok_or_else(|| BankProviderError::MissingConfig("PAYSTACK_SECRET_KEY".to_string()))
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<(StatusCode, Option<Envelope<T>>), BankProviderError> {
        let response = self
            .http
            .get(format!("{}{}", self.base_url, path))
            .bearer_auth(self.secret()?)
            .query(query)
            .send()
            .await
            .map_err(|e| BankProviderError::Transport(format!("GET {path} failed: {e}")))?;

        read_envelope(path, response).await
    }

    async fn post_json<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        payload: &Value,
        idempotency_key: Option<&str>,
    ) -> Result<(StatusCode, Option<Envelope<T>>), BankProviderError> {
        let mut request = self
            .http
            .post(format!("{}{}", self.base_url, path))
            .bearer_auth(self.secret()?)
            .json(payload);
        if let Some(key) = idempotency_key {
            request = request.header("Idempotency-Key", key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| BankProviderError::Transport(format!("POST {path} failed: {e}")))?;

        read_envelope(path, response).await
    }

    /// Look up a transfer this integration already created under `reference`.
    async fn existing_transfer(&self, reference: &str) -> Result<Option<String>, BankProviderError> {
        let path = format!("/transfer/verify/{reference}");
        let (status, envelope) = self.get_json::<CreatedTransfer>(&path, &[]).await?;
        if !status.is_success() {
            return Ok(None);
        }
        Ok(envelope.and_then(|e| e.data).map(|t| t.transfer_code))
    }
}

#[async_trait]
impl BankProvider for PaystackClient {
    async fn fetch_banks(&self) -> Result<Vec<Bank>, BankProviderError> {
        let (status, envelope) = self
            .get_json::<Vec<PaystackBank>>("/bank", &[("country", "nigeria")])
            .await?;
        let banks = expect_data("/bank", status, envelope)?;

        Ok(banks
            .into_iter()
            .map(|bank| Bank {
                name: bank.name,
                code: bank.code,
            })
            .collect())
    }

    async fn verify_account(
        &self,
        account_number: &str,
        bank_code: &str,
    ) -> Result<BankAccountVerification, BankProviderError> {
        let (status, envelope) = self
            .get_json::<ResolvedAccount>(
                "/bank/resolve",
                &[("account_number", account_number), ("bank_code", bank_code)],
            )
            .await?;

        // Paystack answers 422 for an unknown pairing, and 400 for some
        // malformed ones. Neither can succeed on retry.
        if status == StatusCode::UNPROCESSABLE_ENTITY || status == StatusCode::BAD_REQUEST {
            return Err(BankProviderError::VerificationFailed);
        }
        let resolved = expect_data("/bank/resolve", status, envelope)?;

        Ok(BankAccountVerification {
            account_number: account_number.to_string(),
            bank_code: bank_code.to_string(),
            verified_account_name: resolved.account_name,
        })
    }

    async fn create_recipient(
        &self,
        details: RecipientDetails<'_>,
    ) -> Result<String, BankProviderError> {
        let payload = json!({
            "type": "nuban",
            "name": details.account_name,
            "account_number": details.account_number,
            "bank_code": details.bank_code,
            "currency": details.currency,
        });

        let (status, envelope) = self
            .post_json::<CreatedRecipient>("/transferrecipient", &payload, None)
            .await?;
        let recipient = expect_data("/transferrecipient", status, envelope)?;
        Ok(recipient.recipient_code)
    }

    async fn create_transfer(
        &self,
        request: TransferRequest<'_>,
    ) -> Result<String, BankProviderError> {
        let payload = json!({
            "source": "balance",
            "amount": request.amount_minor,
            "currency": request.currency,
            "recipient": request.recipient_reference,
            "reason": TRANSFER_REASON,
            "reference": request.reference,
        });

        info!(
            reference = %request.reference,
            amount_minor = request.amount_minor,
            currency = %request.currency,
            "Paystack create_transfer: sending payout request"
        );

        let (status, envelope) = self
            .post_json::<CreatedTransfer>("/transfer", &payload, Some(request.reference))
            .await?;

        if status.is_client_error() && status != StatusCode::TOO_MANY_REQUESTS {
            // A repeat of a transfer Paystack already accepted is refused as a
            // duplicate reference. Resolve it to the original transfer.
            if let Some(transfer_code) = self.existing_transfer(request.reference).await? {
                warn!(
                    reference = %request.reference,
                    transfer_code = %transfer_code,
                    "Paystack create_transfer: reference already used, reusing existing transfer"
                );
                return Ok(transfer_code);
            }
        }

        let transfer = expect_data("/transfer", status, envelope)?;
        Ok(transfer.transfer_code)
    }
}

async fn read_envelope<T: serde::de::DeserializeOwned>(
    path: &str,
    response: reqwest::Response,
) -> Result<(StatusCode, Option<Envelope<T>>), BankProviderError> {
    let status = response.status();
    let body = response
        .text()
        .await
        .map_err(|e| BankProviderError::Transport(format!("{path} body read failed: {e}")))?;

    if !status.is_success() {
        // Error bodies carry only `message`; the data shape is irrelevant.
        let message = serde_json::from_str::<Envelope<Value>>(&body)
            .ok()
            .and_then(|e| e.message);
        return Ok((
            status,
            Some(Envelope {
                message,
                data: None,
            }),
        ));
    }

    let envelope = serde_json::from_str::<Envelope<T>>(&body)
        .map_err(|e| BankProviderError::InvalidResponse(format!("{path} invalid JSON: {e}")))?;
    Ok((status, Some(envelope)))
}

fn expect_data<T>(
    path: &str,
    status: StatusCode,
    envelope: Option<Envelope<T>>,
) -> Result<T, BankProviderError> {
    if let Some(error) = classify_status(status, envelope.as_ref().and_then(|e| e.message.clone()))
    {
        return Err(error);
    }
    envelope
        .and_then(|e| e.data)
        .ok_or_else(|| BankProviderError::InvalidResponse(format!("{path} response missing data")))
}

/// Map a non-success HTTP status into the provider error taxonomy.
pub fn classify_status(status: StatusCode, message: Option<String>) -> Option<BankProviderError> {
    if status.is_success() {
        return None;
    }
    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        return Some(BankProviderError::Unavailable {
            status: status.as_u16(),
        });
    }
    Some(BankProviderError::Rejected {
        status: status.as_u16(),
        message: message.unwrap_or_else(|| status.to_string()),
    })
}
