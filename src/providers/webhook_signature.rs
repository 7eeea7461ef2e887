// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Webhook signature verification (HMAC-SHA512 over the raw body).

use hmac::{Hmac, Mac};
use sha2::Sha512;
use tracing::warn;

type HmacSha512 = Hmac<Sha512>;

/// Header carrying the provider's hex-encoded signature.
pub const SIGNATURE_HEADER: &str = "x-paystack-signature";

/// Verify `signature_header` against an HMAC of `raw_payload`.
///
/// Missing, non-hex or mismatching signatures all return `false`. The
/// comparison is constant time.
pub fn verify_webhook_signature(
    raw_payload: &[u8],
    signature_header: Option<&str>,
    secret: &str,
) -> bool {
    let Some(signature) = signature_header.map(str::trim).filter(|s| !s.is_empty()) else {
        return false;
    };
    let Ok(expected) = hex::decode(signature) else {
        return false;
    };
    let Ok(mut mac) = HmacSha512::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(raw_payload);
    mac.verify_slice(&expected).is_ok()
}

/// Hex HMAC-SHA512 of a payload, for signing synthetic events in tests.
#[cfg(test)]
pub fn sign_payload(raw_payload: &[u8], secret: &str) -> String {
    let mut mac =
        HmacSha512::new_from_slice(secret.as_bytes()).expect("HMAC accepts keys of any length");
    mac.update(raw_payload);
    hex::encode(mac.finalize().into_bytes())
}

/// Applies the configured verification policy to inbound webhooks.
#[derive(Debug, Clone)]
pub struct WebhookVerifier {
    secret: Option<String>,
    dev_mode: bool,
}

impl WebhookVerifier {
    pub fn new(secret: Option<String>, dev_mode: bool) -> Self {
        Self { secret, dev_mode }
    }

    pub fn is_configured(&self) -> bool {
        self.secret.is_some()
    }

    /// With a secret, only a valid signature passes. Without one, events
    /// pass only in dev mode, and each bypass is logged.
    pub fn verify(&self, raw_payload: &[u8], signature_header: Option<&str>) -> bool {
        match &self.secret {
            Some(secret) => verify_webhook_signature(raw_payload, signature_header, secret),
            None if self.dev_mode => {
                warn!(
                    "WEBHOOK SIGNATURE CHECK DISABLED: accepting unsigned webhook because no secret is configured and dev mode is on"
                );
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "sk_test_secret";
    const BODY: &[u8] = br#"{"event":"transfer.success","data":{"reference":"offramp-1"}}"#;

    #[test]
    fn valid_signature_is_accepted() {
        let signature = sign_payload(BODY, SECRET);
        assert!(verify_webhook_signature(BODY, Some(&signature), SECRET));
    }

    #[test]
    fn tampered_body_is_rejected() {
        let signature = sign_payload(BODY, SECRET);
        let tampered = br#"{"event":"transfer.success","data":{"reference":"offramp-2"}}"#;
        assert!(!verify_webhook_signature(tampered, Some(&signature), SECRET));
    }

    #[test]
    fn missing_or_malformed_signature_is_rejected() {
        assert!(!verify_webhook_signature(BODY, None, SECRET));
        assert!(!verify_webhook_signature(BODY, Some(""), SECRET));
        assert!(!verify_webhook_signature(BODY, Some("not-hex"), SECRET));
        assert!(!verify_webhook_signature(BODY, Some("abcd"), SECRET));
    }

    #[test]
    fn wrong_secret_is_rejected() {
        let signature = sign_payload(BODY, "other");
        assert!(!verify_webhook_signature(BODY, Some(&signature), SECRET));
    }

    #[test]
    fn verifier_without_secret_rejects_outside_dev_mode() {
        let verifier = WebhookVerifier::new(None, false);
        assert!(!verifier.verify(BODY, None));
    }

    #[test]
    fn verifier_without_secret_accepts_in_dev_mode() {
        let verifier = WebhookVerifier::new(None, true);
        assert!(verifier.verify(BODY, None));
    }

    #[test]
    fn verifier_with_secret_ignores_dev_mode() {
        let verifier = WebhookVerifier::new(Some(SECRET.to_string()), true);
        assert!(!verifier.verify(BODY, None));
        let signature = sign_payload(BODY, SECRET);
        assert!(verifier.verify(BODY, Some(&signature)));
    }
}
