// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Embedded conversion database backed by redb (pure Rust, ACID).
//!
//! ## Table Layout
//!
//! - `conversions`: conversion id → serialized ConversionRequest
//! - `provider_references`: provider transfer reference → conversion id
//! - `anomalies`: `timestamp_be|event_id` → serialized AnomalyEvent
//!
//! Every record mutation goes through [`ConversionDb::update`], which
//! re-reads, checks and writes the record inside one write transaction.
//! That is the compare-and-set all state transitions rely on.

use std::path::Path;

use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};

use super::anomaly::AnomalyEvent;
use crate::settlement::types::ConversionRequest;

// =============================================================================
// Table Definitions
// =============================================================================

/// Primary table: conversion id → serialized ConversionRequest (JSON bytes).
const CONVERSIONS: TableDefinition<&str, &[u8]> = TableDefinition::new("conversions");

/// Index: provider transfer reference → conversion id. 1:1.
const PROVIDER_REFERENCES: TableDefinition<&str, &str> =
    TableDefinition::new("provider_references");

/// Anomalies, keyed for chronological scans.
const ANOMALIES: TableDefinition<&[u8], &[u8]> = TableDefinition::new("anomalies");

// =============================================================================
// Error Type
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum ConversionDbError {
    #[error("redb error: {0}")]
    Redb(#[from] redb::Error),

    #[error("redb database error: {0}")]
    RedbDatabase(#[from] redb::DatabaseError),

    #[error("redb transaction error: {0}")]
    RedbTransaction(#[from] redb::TransactionError),

    #[error("redb table error: {0}")]
    RedbTable(#[from] redb::TableError),

    #[error("redb storage error: {0}")]
    RedbStorage(#[from] redb::StorageError),

    #[error("redb commit error: {0}")]
    RedbCommit(#[from] redb::CommitError),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("provider reference {reference} already belongs to {conversion_id}")]
    ReferenceTaken {
        reference: String,
        conversion_id: String,
    },
}

pub type ConversionDbResult<T> = Result<T, ConversionDbError>;

fn anomaly_key(event: &AnomalyEvent) -> Vec<u8> {
    let millis = event.timestamp.timestamp_millis().max(0) as u64;
    let mut key = Vec::with_capacity(8 + 1 + event.event_id.len());
    key.extend_from_slice(&millis.to_be_bytes());
    key.push(b'|');
    key.extend_from_slice(event.event_id.as_bytes());
    key
}

// =============================================================================
// ConversionDb
// =============================================================================

pub struct ConversionDb {
    db: Database,
}

impl ConversionDb {
    /// Open (or create) the database at the given path.
    pub fn open(path: &Path) -> ConversionDbResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).ok();
        }
        let db = Database::create(path)?;

        // Pre-create all tables so later read transactions don't fail
        let write_txn = db.begin_write()?;
        {
            let _ = write_txn.open_table(CONVERSIONS)?;
            let _ = write_txn.open_table(PROVIDER_REFERENCES)?;
            let _ = write_txn.open_table(ANOMALIES)?;
        }
        write_txn.commit()?;

        Ok(Self { db })
    }

    /// Cheap read used by readiness probes.
    pub fn health_check(&self) -> ConversionDbResult<()> {
        let read_txn = self.db.begin_read()?;
        let _ = read_txn.open_table(CONVERSIONS)?;
        Ok(())
    }

    // =========================================================================
    // Conversions
    // =========================================================================

    /// Store a new record. Ids are never reused.
    pub fn insert(&self, request: &ConversionRequest) -> ConversionDbResult<()> {
        let json = serde_json::to_vec(request)?;
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(CONVERSIONS)?;
            if table.get(request.id.as_str())?.is_some() {
                return Err(ConversionDbError::AlreadyExists(request.id.clone()));
            }
            table.insert(request.id.as_str(), json.as_slice())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    pub fn get(&self, id: &str) -> ConversionDbResult<Option<ConversionRequest>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(CONVERSIONS)?;
        match table.get(id)? {
            Some(value) => Ok(Some(serde_json::from_slice(value.value())?)),
            None => Ok(None),
        }
    }

    /// Atomically read, mutate and write one record.
    ///
    /// `mutate` sees the committed record. Returning `Err` aborts the write
    /// transaction and leaves the record untouched. A provider transfer
    /// reference set by `mutate` is indexed in the same transaction.
    pub fn update<T, E, F>(&self, id: &str, mutate: F) -> Result<(ConversionRequest, T), E>
    where
        F: FnOnce(&mut ConversionRequest) -> Result<T, E>,
        E: From<ConversionDbError>,
    {
        self.update_record(id, mutate).map_err(E::from)?
    }

    fn update_record<T, E, F>(
        &self,
        id: &str,
        mutate: F,
    ) -> ConversionDbResult<Result<(ConversionRequest, T), E>>
    where
        F: FnOnce(&mut ConversionRequest) -> Result<T, E>,
    {
        let write_txn = self.db.begin_write()?;
        let outcome = {
            let mut table = write_txn.open_table(CONVERSIONS)?;
            let existing_bytes = {
                let existing = table
                    .get(id)?
                    .ok_or_else(|| ConversionDbError::NotFound(format!("Conversion {id}")))?;
                existing.value().to_vec()
            };
            let mut record: ConversionRequest = serde_json::from_slice(&existing_bytes)?;

            match mutate(&mut record) {
                Ok(value) => {
                    let json = serde_json::to_vec(&record)?;
                    table.insert(id, json.as_slice())?;

                    if let Some(reference) = record.provider_transfer_reference.as_deref() {
                        let mut refs = write_txn.open_table(PROVIDER_REFERENCES)?;
                        let owner = refs.get(reference)?.map(|v| v.value().to_string());
                        match owner {
                            Some(owner) if owner != id => {
                                return Err(ConversionDbError::ReferenceTaken {
                                    reference: reference.to_string(),
                                    conversion_id: owner,
                                });
                            }
                            Some(_) => {}
                            None => {
                                refs.insert(reference, id)?;
                            }
                        }
                    }
                    Ok((record, value))
                }
                Err(e) => Err(e),
            }
        };

        match outcome {
            Ok(done) => {
                write_txn.commit()?;
                Ok(Ok(done))
            }
            Err(e) => {
                write_txn.abort()?;
                Ok(Err(e))
            }
        }
    }

    pub fn find_by_provider_reference(
        &self,
        reference: &str,
    ) -> ConversionDbResult<Option<ConversionRequest>> {
        let read_txn = self.db.begin_read()?;
        let refs = read_txn.open_table(PROVIDER_REFERENCES)?;
        let Some(id) = refs.get(reference)?.map(|v| v.value().to_string()) else {
            return Ok(None);
        };
        let table = read_txn.open_table(CONVERSIONS)?;
        match table.get(id.as_str())? {
            Some(value) => Ok(Some(serde_json::from_slice(value.value())?)),
            None => Ok(None),
        }
    }

    /// Records not yet in a terminal state.
    pub fn list_open(&self) -> ConversionDbResult<Vec<ConversionRequest>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(CONVERSIONS)?;
        let mut open = Vec::new();
        for entry in table.iter()? {
            let (_, value) = entry?;
            let record: ConversionRequest = serde_json::from_slice(value.value())?;
            if !record.state.is_terminal() {
                open.push(record);
            }
        }
        Ok(open)
    }

    // =========================================================================
    // Anomalies
    // =========================================================================

    pub fn record_anomaly(&self, event: &AnomalyEvent) -> ConversionDbResult<()> {
        let json = serde_json::to_vec(event)?;
        let key = anomaly_key(event);
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(ANOMALIES)?;
            table.insert(key.as_slice(), json.as_slice())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    /// Most recent anomalies first.
    pub fn list_anomalies(&self, limit: usize) -> ConversionDbResult<Vec<AnomalyEvent>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(ANOMALIES)?;
        let mut events = Vec::with_capacity(limit.min(64));
        for entry in table.iter()?.rev() {
            if events.len() >= limit {
                break;
            }
            let (_, value) = entry?;
            events.push(serde_json::from_slice(value.value())?);
        }
        Ok(events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settlement::types::{ConversionState, TransitionCause};
    use crate::storage::anomaly::AnomalyKind;
    use rust_decimal_macros::dec;

    fn temp_db() -> (ConversionDb, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let db = ConversionDb::open(&dir.path().join("test.redb")).unwrap();
        (db, dir)
    }

    fn sample_request() -> ConversionRequest {
        ConversionRequest::new_draft(
            "0x1111111111111111111111111111111111111111".to_string(),
            Some("USDT".to_string()),
            Some(dec!(100)),
            Some("NGN".to_string()),
            None,
        )
    }

    #[test]
    fn insert_and_get() {
        let (db, _dir) = temp_db();
        let request = sample_request();
        db.insert(&request).unwrap();

        let stored = db.get(&request.id).unwrap().unwrap();
        assert_eq!(stored, request);
        assert!(db.get("missing").unwrap().is_none());
    }

    #[test]
    fn insert_rejects_duplicate_id() {
        let (db, _dir) = temp_db();
        let request = sample_request();
        db.insert(&request).unwrap();
        assert!(matches!(
            db.insert(&request),
            Err(ConversionDbError::AlreadyExists(_))
        ));
    }

    #[test]
    fn update_commits_mutation() {
        let (db, _dir) = temp_db();
        let request = sample_request();
        db.insert(&request).unwrap();

        let (updated, ()) = db
            .update::<_, ConversionDbError, _>(&request.id, |record| {
                record.fiat_amount = Some(dec!(180000));
                Ok(())
            })
            .unwrap();
        assert_eq!(updated.fiat_amount, Some(dec!(180000)));
        assert_eq!(db.get(&request.id).unwrap().unwrap().fiat_amount, Some(dec!(180000)));
    }

    #[test]
    fn failed_mutation_leaves_record_untouched() {
        let (db, _dir) = temp_db();
        let request = sample_request();
        db.insert(&request).unwrap();

        let result: Result<(ConversionRequest, ()), ConversionDbError> =
            db.update(&request.id, |record| {
                record.fiat_amount = Some(dec!(1));
                Err(ConversionDbError::NotFound("refused".into()))
            });
        assert!(result.is_err());
        assert_eq!(db.get(&request.id).unwrap().unwrap().fiat_amount, None);
    }

    #[test]
    fn update_missing_record_is_not_found() {
        let (db, _dir) = temp_db();
        let result = db.update::<(), ConversionDbError, _>("nope", |_| Ok(()));
        assert!(matches!(result, Err(ConversionDbError::NotFound(_))));
    }

    #[test]
    fn provider_reference_is_indexed_on_update() {
        let (db, _dir) = temp_db();
        let request = sample_request();
        db.insert(&request).unwrap();

        db.update::<_, ConversionDbError, _>(&request.id, |record| {
            record.provider_transfer_reference = Some("TRF_abc".into());
            Ok(())
        })
        .unwrap();

        let found = db.find_by_provider_reference("TRF_abc").unwrap().unwrap();
        assert_eq!(found.id, request.id);
        assert!(db.find_by_provider_reference("TRF_other").unwrap().is_none());
    }

    #[test]
    fn provider_reference_maps_to_one_conversion() {
        let (db, _dir) = temp_db();
        let first = sample_request();
        let second = sample_request();
        db.insert(&first).unwrap();
        db.insert(&second).unwrap();

        let set_ref = |id: &str| {
            db.update::<_, ConversionDbError, _>(id, |record| {
                record.provider_transfer_reference = Some("TRF_shared".into());
                Ok(())
            })
        };
        set_ref(&first.id).unwrap();
        assert!(matches!(
            set_ref(&second.id),
            Err(ConversionDbError::ReferenceTaken { .. })
        ));
        assert!(db.get(&second.id).unwrap().unwrap().provider_transfer_reference.is_none());
    }

    #[test]
    fn list_open_skips_terminal_records() {
        let (db, _dir) = temp_db();
        let open = sample_request();
        let cancelled = sample_request();
        db.insert(&open).unwrap();
        db.insert(&cancelled).unwrap();
        db.update::<_, ConversionDbError, _>(&cancelled.id, |record| {
            record
                .transition(ConversionState::Cancelled, TransitionCause::UserCancelled, None)
                .map_err(|_| ConversionDbError::NotFound("edge".into()))
        })
        .unwrap();

        let listed = db.list_open().unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, open.id);
    }

    #[test]
    fn anomalies_list_newest_first() {
        let (db, _dir) = temp_db();
        let mut older = AnomalyEvent::new(AnomalyKind::UnmatchedReference);
        older.timestamp = chrono::Utc::now() - chrono::Duration::seconds(10);
        let newer = AnomalyEvent::new(AnomalyKind::ConflictingOutcome);
        db.record_anomaly(&older).unwrap();
        db.record_anomaly(&newer).unwrap();

        let listed = db.list_anomalies(10).unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].kind, AnomalyKind::ConflictingOutcome);

        assert_eq!(db.list_anomalies(1).unwrap().len(), 1);
    }

    #[test]
    fn health_check_passes_on_open_db() {
        let (db, _dir) = temp_db();
        db.health_check().unwrap();
    }
}
