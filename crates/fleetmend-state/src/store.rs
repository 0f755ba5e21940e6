//! Record store — durable per-instance remediation state.
//!
//! [`RecordStore`] is the interface the controller programs against.
//! [`StateStore`] implements it on redb: every record is JSON-serialized
//! into one table keyed by instance id. The store supports both on-disk and
//! in-memory backends (the latter for testing).

use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableDatabase, ReadableTable};
use tracing::debug;

use crate::error::{StateError, StateResult};
use crate::tables::RECORDS;
use crate::types::*;

/// Point operations plus the fleet-wide pending scan.
pub trait RecordStore: Send + Sync {
    fn get_record(&self, instance_id: &str) -> StateResult<Option<RemediationRecord>>;

    /// Insert or replace the record for `record.instance_id`.
    fn put_record(&self, record: &RemediationRecord) -> StateResult<()>;

    /// Delete a record. Returns true if it existed.
    fn delete_record(&self, instance_id: &str) -> StateResult<bool>;

    fn list_records(&self) -> StateResult<Vec<RemediationRecord>>;

    /// Set `last_alarm_at`, creating an idle record if none exists.
    /// The remediation state of an existing record is preserved.
    fn record_alarm(&self, instance_id: &str, alarm_at: u64) -> StateResult<RemediationRecord>;

    /// Remove every record that [`RemediationRecord::is_stale`] at `cutoff`
    /// and return what was removed.
    fn expire_stale(&self, cutoff: u64) -> StateResult<Vec<RemediationRecord>>;

    /// Records currently in `PendingRestart`.
    fn list_pending(&self) -> StateResult<Vec<RemediationRecord>> {
        Ok(self
            .list_records()?
            .into_iter()
            .filter(RemediationRecord::is_pending)
            .collect())
    }

    fn count_pending(&self) -> StateResult<usize> {
        Ok(self.list_pending()?.len())
    }
}

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

fn decode(bytes: &[u8]) -> StateResult<RemediationRecord> {
    serde_json::from_slice(bytes).map_err(map_err!(Deserialize))
}

/// Thread-safe record store backed by redb.
#[derive(Clone)]
pub struct StateStore {
    db: Arc<Database>,
}

impl StateStore {
    /// Open (or create) a persistent record store at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!(?path, "record store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory record store (for testing).
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!("in-memory record store opened");
        Ok(store)
    }

    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        // Opening a table in a write transaction creates it if absent.
        txn.open_table(RECORDS).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }
}

impl RecordStore for StateStore {
    fn get_record(&self, instance_id: &str) -> StateResult<Option<RemediationRecord>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(RECORDS).map_err(map_err!(Table))?;
        match table.get(instance_id).map_err(map_err!(Read))? {
            Some(guard) => Ok(Some(decode(guard.value())?)),
            None => Ok(None),
        }
    }

    fn put_record(&self, record: &RemediationRecord) -> StateResult<()> {
        let value = serde_json::to_vec(record).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(RECORDS).map_err(map_err!(Table))?;
            table
                .insert(record.instance_id.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(instance_id = %record.instance_id, state = ?record.remediation_state, "record stored");
        Ok(())
    }

    fn delete_record(&self, instance_id: &str) -> StateResult<bool> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let existed;
        {
            let mut table = txn.open_table(RECORDS).map_err(map_err!(Table))?;
            existed = table.remove(instance_id).map_err(map_err!(Write))?.is_some();
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%instance_id, existed, "record deleted");
        Ok(existed)
    }

    fn list_records(&self) -> StateResult<Vec<RemediationRecord>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(RECORDS).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (_, value) = entry.map_err(map_err!(Read))?;
            results.push(decode(value.value())?);
        }
        Ok(results)
    }

    fn record_alarm(&self, instance_id: &str, alarm_at: u64) -> StateResult<RemediationRecord> {
        // Read and write inside one write transaction so a concurrent
        // transition to PendingRestart is never overwritten.
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let record;
        {
            let mut table = txn.open_table(RECORDS).map_err(map_err!(Table))?;
            let existing = match table.get(instance_id).map_err(map_err!(Read))? {
                Some(guard) => Some(decode(guard.value())?),
                None => None,
            };
            record = match existing {
                Some(mut rec) => {
                    rec.last_alarm_at = Some(alarm_at);
                    rec
                }
                None => RemediationRecord::alarm_only(instance_id, alarm_at),
            };
            let value = serde_json::to_vec(&record).map_err(map_err!(Serialize))?;
            table
                .insert(instance_id, value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%instance_id, alarm_at, "alarm recorded");
        Ok(record)
    }

    fn expire_stale(&self, cutoff: u64) -> StateResult<Vec<RemediationRecord>> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let mut expired = Vec::new();
        {
            let mut table = txn.open_table(RECORDS).map_err(map_err!(Table))?;
            for entry in table.iter().map_err(map_err!(Read))? {
                let (_, value) = entry.map_err(map_err!(Read))?;
                let record = decode(value.value())?;
                if record.is_stale(cutoff) {
                    expired.push(record);
                }
            }
            for record in &expired {
                table
                    .remove(record.instance_id.as_str())
                    .map_err(map_err!(Write))?;
            }
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(expired)
    }
}
