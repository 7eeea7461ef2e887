// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use rust_decimal::Decimal;

use super::types::{
    ConversionState, FailureReason, IllegalTransition, MissingField, TransitionCause,
};
use crate::blockchain::LedgerError;
use crate::pricing::RateError;
use crate::providers::BankProviderError;
use crate::storage::ConversionDbError;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SettlementError {
    #[error("conversion not found: {0}")]
    NotFound(String),

    #[error("cannot {attempted} a conversion in state {from}")]
    InvalidStateTransition {
        from: ConversionState,
        attempted: &'static str,
    },

    /// Another caller holds the claim for this record's next step.
    #[error("conversion {0} has a step in progress")]
    TransitionInProgress(String),

    #[error("missing fields: {}", fields_list(.0))]
    MissingFields(Vec<MissingField>),

    #[error("invalid amount: {0}")]
    InvalidAmount(String),

    #[error("invalid address: {0}")]
    InvalidAddress(String),

    #[error("unsupported token: {0}")]
    UnsupportedToken(String),

    #[error("unsupported currency: {0}")]
    UnsupportedCurrency(String),

    /// A draft field that is already set and may not change.
    #[error("{0} can no longer be changed")]
    FieldLocked(&'static str),

    #[error("invalid bank account: {0}")]
    InvalidBankAccount(String),

    #[error("bank account could not be verified")]
    VerificationFailed,

    #[error("insufficient balance: {available} available, {required} required")]
    InsufficientBalance { required: Decimal, available: Decimal },

    #[error("no rate available for {token}/{currency}")]
    RateUnavailable { token: String, currency: String },

    /// The bank provider refused a call for a reason that is not the
    /// user's input, such as rejected credentials. Nothing was recorded.
    #[error("bank provider refused the request: {0}")]
    ProviderRefused(String),

    /// Transient failure. Nothing was recorded; `proceed` may be repeated.
    #[error("temporarily unavailable: {0}")]
    Retryable(String),

    /// The step failed terminally and the record is now `Failed`.
    #[error("conversion {id} failed: {}", reason.code())]
    ConversionFailed { id: String, reason: FailureReason },

    #[error("storage error: {0}")]
    Storage(String),
}

fn fields_list(fields: &[MissingField]) -> String {
    fields
        .iter()
        .map(|f| f.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

impl From<ConversionDbError> for SettlementError {
    fn from(err: ConversionDbError) -> Self {
        match err {
            ConversionDbError::NotFound(id) => Self::NotFound(id),
            other => Self::Storage(other.to_string()),
        }
    }
}

impl From<IllegalTransition> for SettlementError {
    fn from(err: IllegalTransition) -> Self {
        Self::InvalidStateTransition {
            from: err.from,
            attempted: "advance",
        }
    }
}

impl From<RateError> for SettlementError {
    fn from(err: RateError) -> Self {
        match err {
            RateError::Unavailable { token, currency } => Self::RateUnavailable { token, currency },
            RateError::UnsupportedCurrency(c) => Self::UnsupportedCurrency(c),
            e @ RateError::Overflow { .. } => Self::InvalidAmount(e.to_string()),
        }
    }
}

/// What a failed external call means for the record.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Disposition {
    /// No transition. The claim is released and the error returned.
    Surface(SettlementError),
    /// Terminal for this attempt: the record moves to `Failed`.
    Fail {
        reason: FailureReason,
        cause: TransitionCause,
        detail: String,
    },
}

pub(crate) fn ledger_disposition(err: LedgerError) -> Disposition {
    match err {
        LedgerError::Network(_)
        | LedgerError::Build(_)
        | LedgerError::MissingConfig(_)
        | LedgerError::ConfirmationTimeout { .. } => {
            Disposition::Surface(SettlementError::Retryable(err.to_string()))
        }
        LedgerError::InvalidAddress(detail) => {
            Disposition::Surface(SettlementError::InvalidAddress(detail))
        }
        LedgerError::InvalidAmount(detail) => {
            Disposition::Surface(SettlementError::InvalidAmount(detail))
        }
        LedgerError::UnsupportedToken(symbol) => {
            Disposition::Surface(SettlementError::UnsupportedToken(symbol))
        }
        LedgerError::ApprovalRejected(detail) => Disposition::Fail {
            reason: FailureReason::UserDeclined,
            cause: TransitionCause::ApprovalFailed,
            detail,
        },
        LedgerError::ApprovalFailed(detail) => Disposition::Fail {
            reason: FailureReason::ApprovalFailed,
            cause: TransitionCause::ApprovalFailed,
            detail,
        },
        LedgerError::TransferRejected(detail) => Disposition::Fail {
            reason: FailureReason::UserDeclined,
            cause: TransitionCause::TransferFailed,
            detail,
        },
        LedgerError::TransferReverted(detail) => Disposition::Fail {
            reason: FailureReason::TransferReverted,
            cause: TransitionCause::TransferFailed,
            detail,
        },
    }
}

/// Ledger failures outside a claimed step (reads, token lookups).
pub(crate) fn ledger_error(err: LedgerError) -> SettlementError {
    match ledger_disposition(err) {
        Disposition::Surface(e) => e,
        Disposition::Fail { detail, .. } => SettlementError::Retryable(detail),
    }
}

/// Classification for recipient/transfer creation. Account verification
/// handles `VerificationFailed` itself.
pub(crate) fn provider_disposition(err: BankProviderError) -> Disposition {
    match err {
        BankProviderError::Rejected { status, message } => Disposition::Fail {
            reason: FailureReason::ProviderRejected,
            cause: TransitionCause::ProviderRejected,
            detail: format!("{status}: {message}"),
        },
        BankProviderError::VerificationFailed => Disposition::Fail {
            reason: FailureReason::ProviderRejected,
            cause: TransitionCause::ProviderRejected,
            detail: "recipient account rejected".to_string(),
        },
        BankProviderError::Unavailable { .. }
        | BankProviderError::Transport(_)
        | BankProviderError::InvalidResponse(_)
        | BankProviderError::MissingConfig(_) => {
            Disposition::Surface(SettlementError::Retryable(err.to_string()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_declined_ledger_errors_fail_the_conversion() {
        assert!(matches!(
            ledger_disposition(LedgerError::ApprovalRejected("denied".into())),
            Disposition::Fail {
                reason: FailureReason::UserDeclined,
                ..
            }
        ));
        assert!(matches!(
            ledger_disposition(LedgerError::TransferReverted("0x01".into())),
            Disposition::Fail {
                reason: FailureReason::TransferReverted,
                cause: TransitionCause::TransferFailed,
                ..
            }
        ));
    }

    #[test]
    fn transient_ledger_errors_are_retryable() {
        assert!(matches!(
            ledger_disposition(LedgerError::Network("timeout".into())),
            Disposition::Surface(SettlementError::Retryable(_))
        ));
        assert!(matches!(
            ledger_disposition(LedgerError::ConfirmationTimeout {
                tx_hash: "0xabc".into()
            }),
            Disposition::Surface(SettlementError::Retryable(_))
        ));
    }

    #[test]
    fn provider_rejection_is_terminal_and_outage_is_not() {
        assert!(matches!(
            provider_disposition(BankProviderError::Rejected {
                status: 400,
                message: "Invalid recipient".into()
            }),
            Disposition::Fail {
                reason: FailureReason::ProviderRejected,
                ..
            }
        ));
        assert!(matches!(
            provider_disposition(BankProviderError::Unavailable { status: 502 }),
            Disposition::Surface(SettlementError::Retryable(_))
        ));
    }

    #[test]
    fn rate_overflow_is_an_amount_error() {
        let err = SettlementError::from(RateError::Overflow {
            amount: Decimal::MAX,
            rate: Decimal::TEN,
        });
        assert!(matches!(err, SettlementError::InvalidAmount(_)));
    }

    #[test]
    fn missing_fields_message_lists_fields() {
        let err = SettlementError::MissingFields(vec![MissingField::Token, MissingField::Amount]);
        assert_eq!(err.to_string(), "missing fields: token, amount");
    }

    #[test]
    fn db_not_found_maps_to_not_found() {
        let err: SettlementError = ConversionDbError::NotFound("Conversion x".into()).into();
        assert!(matches!(err, SettlementError::NotFound(_)));
    }
}
