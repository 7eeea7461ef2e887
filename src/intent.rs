// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Intent Router
//!
//! Turns the output of the natural-language classifier into a conversion
//! draft. The classifier itself is external; this module only trusts its
//! structured fields and asks the user for whatever is still missing.

use std::sync::Arc;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use utoipa::ToSchema;

use crate::config::IntentConfig;
use crate::settlement::{
    ConversionRequest, ConversionState, DraftAmendment, MissingField, NewConversion,
    SettlementError, SettlementService,
};

pub const FIAT_CONVERSION_INTENT: &str = "fiat_conversion";

/// Confidence assumed when the classifier does not report one.
const DEFAULT_CONFIDENCE: f64 = 0.5;

/// Classifier output for one user message.
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct IntentClassification {
    pub intent: String,
    pub confidence: Option<f64>,
    #[serde(default)]
    pub extracted: ExtractedFields,
}

#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
pub struct ExtractedFields {
    pub token_in: Option<String>,
    #[schema(value_type = Option<String>)]
    pub amount_in: Option<Decimal>,
    #[schema(value_type = Option<String>)]
    pub fiat_amount: Option<Decimal>,
    pub fiat_currency: Option<String>,
}

/// A draft produced or amended from a classification.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RoutedDraft {
    pub record: ConversionRequest,
    pub missing_fields: Vec<MissingField>,
    /// One question per missing field, in the same order.
    pub follow_up_questions: Vec<String>,
    /// Defaults applied on the user's behalf.
    pub assumptions: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RoutedIntent {
    NotApplicable { intent: String, confidence: f64 },
    Draft(Box<RoutedDraft>),
}

pub struct IntentRouter {
    settlement: Arc<SettlementService>,
    default_fiat_currency: String,
    min_confidence: f64,
}

impl IntentRouter {
    pub fn new(settlement: Arc<SettlementService>, config: &IntentConfig) -> Self {
        Self {
            settlement,
            default_fiat_currency: config.default_fiat_currency.clone(),
            min_confidence: config.min_confidence,
        }
    }

    /// Create a draft for `owner`, or amend `draft_id` when given.
    ///
    /// A draft that ends up complete is returned already `AmountQuoted`.
    pub async fn route(
        &self,
        owner: &str,
        draft_id: Option<&str>,
        classification: IntentClassification,
    ) -> Result<RoutedIntent, SettlementError> {
        let confidence = classification.confidence.unwrap_or(DEFAULT_CONFIDENCE);
        let intent = classification.intent.trim();
        if !intent.eq_ignore_ascii_case(FIAT_CONVERSION_INTENT) || confidence < self.min_confidence
        {
            debug!(intent = %intent, confidence, "Intent not routed to settlement");
            return Ok(RoutedIntent::NotApplicable {
                intent: intent.to_string(),
                confidence,
            });
        }

        let extracted = classification.extracted;
        let mut assumptions = Vec::new();

        // The token amount is what the user holds; prefer it over a fiat target.
        let fiat_amount = match (extracted.amount_in, extracted.fiat_amount) {
            (Some(_), Some(fiat)) => {
                assumptions.push(format!(
                    "used the token amount and ignored the fiat amount {fiat}"
                ));
                None
            }
            (_, fiat) => fiat,
        };
        let token = extracted
            .token_in
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty());
        let fiat_currency = extracted
            .fiat_currency
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty());

        let record = match draft_id {
            Some(id) => {
                let current = self.settlement.get_status(id)?;
                if !current.owner_address.eq_ignore_ascii_case(owner.trim()) {
                    return Err(SettlementError::NotFound(id.to_string()));
                }
                if current.state != ConversionState::Draft {
                    debug!(conversion_id = %id, state = %current.state, "Draft already past drafting");
                    current
                } else {
                    let fiat_currency = match (fiat_currency, &current.fiat_currency) {
                        (Some(c), _) => Some(c),
                        (None, Some(_)) => None,
                        (None, None) => Some(self.assume_currency(&mut assumptions)),
                    };
                    self.settlement
                        .amend_draft(
                            id,
                            DraftAmendment {
                                token,
                                amount: extracted.amount_in,
                                fiat_currency,
                                fiat_amount,
                            },
                        )
                        .await?
                }
            }
            None => {
                let fiat_currency =
                    fiat_currency.unwrap_or_else(|| self.assume_currency(&mut assumptions));
                self.settlement
                    .create_request(NewConversion {
                        owner_address: owner.to_string(),
                        token,
                        amount: extracted.amount_in,
                        fiat_currency: Some(fiat_currency),
                        fiat_amount,
                    })
                    .await?
            }
        };

        let missing_fields = if record.state == ConversionState::Draft {
            record.missing_fields()
        } else {
            Vec::new()
        };
        let follow_up_questions = missing_fields
            .iter()
            .map(|field| follow_up_question(*field, &record))
            .collect();

        info!(
            conversion_id = %record.id,
            state = %record.state,
            missing = missing_fields.len(),
            "Intent routed"
        );

        Ok(RoutedIntent::Draft(Box::new(RoutedDraft {
            record,
            missing_fields,
            follow_up_questions,
            assumptions,
        })))
    }

    fn assume_currency(&self, assumptions: &mut Vec<String>) -> String {
        assumptions.push(format!(
            "fiat currency not given, assumed {}",
            self.default_fiat_currency
        ));
        self.default_fiat_currency.clone()
    }
}

fn follow_up_question(field: MissingField, record: &ConversionRequest) -> String {
    match field {
        MissingField::Token => "Which token would you like to convert?".to_string(),
        MissingField::Amount => match (&record.source_token, &record.fiat_currency) {
            (Some(token), Some(currency)) => format!(
                "How much {token} would you like to convert, or how much {currency} should you receive?"
            ),
            (Some(token), None) => format!("How much {token} would you like to convert?"),
            _ => "How much would you like to convert?".to_string(),
        },
        MissingField::FiatCurrency => {
            "Which currency should you receive (for example NGN or USD)?".to_string()
        }
        MissingField::BankAccount => {
            "Which bank account should receive the payout?".to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{Harness, OWNER};
    use rust_decimal_macros::dec;

    fn router(h: &Harness) -> IntentRouter {
        IntentRouter::new(
            h.service.clone(),
            &IntentConfig {
                default_fiat_currency: "NGN".to_string(),
                min_confidence: 0.5,
            },
        )
    }

    fn classification(confidence: Option<f64>, extracted: ExtractedFields) -> IntentClassification {
        IntentClassification {
            intent: FIAT_CONVERSION_INTENT.to_string(),
            confidence,
            extracted,
        }
    }

    fn draft(routed: RoutedIntent) -> RoutedDraft {
        match routed {
            RoutedIntent::Draft(draft) => *draft,
            other => panic!("expected a draft, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn complete_intent_is_quoted_immediately() {
        let h = Harness::new();
        let routed = router(&h)
            .route(
                OWNER,
                None,
                classification(
                    Some(0.9),
                    ExtractedFields {
                        token_in: Some("USDT".into()),
                        amount_in: Some(dec!(100)),
                        fiat_currency: Some("NGN".into()),
                        ..Default::default()
                    },
                ),
            )
            .await
            .unwrap();

        let draft = draft(routed);
        assert_eq!(draft.record.state, ConversionState::AmountQuoted);
        assert_eq!(draft.record.fiat_amount, Some(dec!(180000)));
        assert!(draft.missing_fields.is_empty());
        assert!(draft.assumptions.is_empty());
    }

    #[tokio::test]
    async fn missing_amount_yields_follow_up_and_assumed_currency() {
        let h = Harness::new();
        let draft = draft(
            router(&h)
                .route(
                    OWNER,
                    None,
                    classification(
                        None,
                        ExtractedFields {
                            token_in: Some("USDT".into()),
                            ..Default::default()
                        },
                    ),
                )
                .await
                .unwrap(),
        );

        assert_eq!(draft.record.state, ConversionState::Draft);
        assert_eq!(draft.record.fiat_currency.as_deref(), Some("NGN"));
        assert_eq!(draft.missing_fields, vec![MissingField::Amount]);
        assert_eq!(draft.follow_up_questions.len(), 1);
        assert!(draft.follow_up_questions[0].contains("USDT"));
        assert_eq!(draft.assumptions.len(), 1);
        assert!(draft.assumptions[0].contains("NGN"));
    }

    #[tokio::test]
    async fn follow_up_message_completes_the_draft() {
        let h = Harness::new();
        let router = router(&h);
        let first = draft(
            router
                .route(
                    OWNER,
                    None,
                    classification(
                        Some(0.8),
                        ExtractedFields {
                            fiat_currency: Some("NGN".into()),
                            fiat_amount: Some(dec!(50000)),
                            ..Default::default()
                        },
                    ),
                )
                .await
                .unwrap(),
        );
        assert_eq!(first.missing_fields, vec![MissingField::Token]);
        assert_eq!(
            first.follow_up_questions,
            vec!["Which token would you like to convert?".to_string()]
        );

        let second = draft(
            router
                .route(
                    OWNER,
                    Some(&first.record.id),
                    classification(
                        Some(0.8),
                        ExtractedFields {
                            token_in: Some("usdt".into()),
                            ..Default::default()
                        },
                    ),
                )
                .await
                .unwrap(),
        );
        assert_eq!(second.record.id, first.record.id);
        assert_eq!(second.record.state, ConversionState::AmountQuoted);
        assert!(second.assumptions.is_empty());
    }

    #[tokio::test]
    async fn other_intents_and_low_confidence_are_not_applicable() {
        let h = Harness::new();
        let router = router(&h);

        let other = IntentClassification {
            intent: "domain_analytics".to_string(),
            confidence: Some(0.99),
            extracted: ExtractedFields::default(),
        };
        assert!(matches!(
            router.route(OWNER, None, other).await.unwrap(),
            RoutedIntent::NotApplicable { .. }
        ));

        let unsure = classification(Some(0.2), ExtractedFields::default());
        assert!(matches!(
            router.route(OWNER, None, unsure).await.unwrap(),
            RoutedIntent::NotApplicable { confidence, .. } if confidence == 0.2
        ));
        assert!(h.db.list_open().unwrap().is_empty());
    }

    #[tokio::test]
    async fn both_amounts_prefers_token_amount() {
        let h = Harness::new();
        let draft = draft(
            router(&h)
                .route(
                    OWNER,
                    None,
                    classification(
                        Some(0.9),
                        ExtractedFields {
                            token_in: Some("USDT".into()),
                            amount_in: Some(dec!(10)),
                            fiat_amount: Some(dec!(999)),
                            fiat_currency: Some("NGN".into()),
                        },
                    ),
                )
                .await
                .unwrap(),
        );
        assert_eq!(draft.record.source_amount, Some(dec!(10)));
        assert_eq!(draft.record.fiat_amount, Some(dec!(18000)));
        assert_eq!(draft.assumptions.len(), 1);
    }

    #[tokio::test]
    async fn another_owners_draft_is_not_found() {
        let h = Harness::new();
        let router = router(&h);
        let first = draft(
            router
                .route(OWNER, None, classification(None, ExtractedFields::default()))
                .await
                .unwrap(),
        );

        let err = router
            .route(
                "0x70997970C51812dc3A010C7d01b50e0d17dc79C8",
                Some(&first.record.id),
                classification(None, ExtractedFields::default()),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, SettlementError::NotFound(_)));
    }
}
