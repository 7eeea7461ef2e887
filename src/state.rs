// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use std::sync::Arc;

use crate::intent::IntentRouter;
use crate::settlement::{SettlementService, WebhookReconciler};
use crate::storage::ConversionDb;

/// Whether external dependencies were configured at startup.
#[derive(Debug, Clone, Copy, Default)]
pub struct DependencyStatus {
    pub ledger_configured: bool,
    pub bank_provider_configured: bool,
}

#[derive(Clone)]
pub struct AppState {
    pub db: Arc<ConversionDb>,
    pub settlement: Arc<SettlementService>,
    pub reconciler: Arc<WebhookReconciler>,
    pub intents: Arc<IntentRouter>,
    pub dependencies: DependencyStatus,
}

impl AppState {
    pub fn new(
        db: Arc<ConversionDb>,
        settlement: Arc<SettlementService>,
        reconciler: Arc<WebhookReconciler>,
        intents: Arc<IntentRouter>,
        dependencies: DependencyStatus,
    ) -> Self {
        Self {
            db,
            settlement,
            reconciler,
            intents,
            dependencies,
        }
    }
}
