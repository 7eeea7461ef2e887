// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Settlement Monitor
//!
//! Background task that sweeps open conversions and logs the ones that need
//! an operator's attention:
//!
//! - a step claim that outlived the claim TTL (the owning call died)
//! - a bridge transaction broadcast but never confirmed
//! - a provider transfer still awaiting its webhook after the alert age
//!
//! The monitor only reports. Advancing a record stays with `proceed` and the
//! webhook, so a sweep can never duplicate an external call.
//!
//! ## Shutdown
//!
//! Uses `tokio_util::sync::CancellationToken` for graceful shutdown.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::types::ConversionState;
use crate::config::SettlementConfig;
use crate::storage::ConversionDb;

/// Ids flagged by one sweep.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SweepReport {
    pub open: usize,
    pub expired_claims: Vec<String>,
    pub pending_ledger: Vec<String>,
    pub awaiting_webhook: Vec<String>,
}

impl SweepReport {
    pub fn is_clean(&self) -> bool {
        self.expired_claims.is_empty()
            && self.pending_ledger.is_empty()
            && self.awaiting_webhook.is_empty()
    }
}

pub struct SettlementMonitor {
    db: Arc<ConversionDb>,
    interval: Duration,
    claim_ttl: chrono::Duration,
    awaiting_webhook_alert: chrono::Duration,
}

impl SettlementMonitor {
    pub fn new(db: Arc<ConversionDb>, config: &SettlementConfig) -> Self {
        Self {
            db,
            interval: config.monitor_interval,
            claim_ttl: to_chrono(config.claim_ttl),
            awaiting_webhook_alert: to_chrono(config.awaiting_webhook_alert),
        }
    }

    /// Run sweeps until the cancellation token is triggered.
    ///
    /// ```rust,ignore
    /// tokio::spawn(monitor.run(shutdown.clone()));
    /// ```
    pub async fn run(self, shutdown: CancellationToken) {
        info!(
            interval_secs = self.interval.as_secs(),
            "Settlement monitor starting"
        );

        loop {
            if shutdown.is_cancelled() {
                info!("Settlement monitor shutting down");
                return;
            }

            self.sweep(Utc::now());

            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {},
                _ = shutdown.cancelled() => {
                    info!("Settlement monitor shutting down");
                    return;
                }
            }
        }
    }

    pub fn sweep(&self, now: DateTime<Utc>) -> SweepReport {
        let open = match self.db.list_open() {
            Ok(open) => open,
            Err(e) => {
                error!(error = %e, "Settlement monitor: failed to list open conversions");
                return SweepReport::default();
            }
        };

        let mut report = SweepReport {
            open: open.len(),
            ..SweepReport::default()
        };

        for record in &open {
            if let Some(claim) = &record.in_flight {
                if now.signed_duration_since(claim.claimed_at) >= self.claim_ttl {
                    warn!(
                        conversion_id = %record.id,
                        state = %record.state,
                        step = ?claim.step,
                        claimed_at = %claim.claimed_at,
                        "Settlement monitor: step claim expired"
                    );
                    report.expired_claims.push(record.id.clone());
                }
            }

            if let Some(tx_hash) = &record.pending_ledger_tx {
                warn!(
                    conversion_id = %record.id,
                    tx_hash = %tx_hash,
                    "Settlement monitor: ledger transfer awaiting confirmation"
                );
                report.pending_ledger.push(record.id.clone());
            }

            if record.state == ConversionState::ProviderTransferCreated
                && now.signed_duration_since(record.updated_at) >= self.awaiting_webhook_alert
            {
                warn!(
                    conversion_id = %record.id,
                    provider_reference = ?record.provider_transfer_reference,
                    since = %record.updated_at,
                    "Settlement monitor: provider transfer awaiting webhook"
                );
                report.awaiting_webhook.push(record.id.clone());
            }
        }

        debug!(
            open = report.open,
            clean = report.is_clean(),
            "Settlement monitor sweep finished"
        );
        report
    }
}

fn to_chrono(duration: Duration) -> chrono::Duration {
    chrono::Duration::from_std(duration).unwrap_or(chrono::Duration::MAX)
}
