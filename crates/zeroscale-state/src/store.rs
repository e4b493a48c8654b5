//! StateStore — typed CRUD over enrollments and scaling history.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use redb::{Database, ReadableTable};
use serde::{Deserialize, Serialize};
use tracing::debug;

use zeroscale_core::{AppScalingHistory, ScalingStatus};

use crate::error::{StoreError, StoreResult};
use crate::tables::{APPLICATIONS, SCALING_HISTORIES};

/// Convert any `Display` error into a `StoreError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StoreError::$variant(e.to_string())
    };
}

/// Sort direction for history queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Order {
    Asc,
    Desc,
}

/// Persisted enrollment row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplicationRecord {
    pub app_id: String,
    pub breach_duration_secs: u32,
}

/// Thread-safe store backed by redb.
#[derive(Clone)]
pub struct StateStore {
    db: Arc<Database>,
}

impl StateStore {
    /// Open (or create) a persistent store at the given path.
    pub fn open(path: &Path) -> StoreResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!(?path, "state store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory store (for testing).
    pub fn open_in_memory() -> StoreResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        Ok(store)
    }

    /// Create all tables if they don't exist yet.
    fn ensure_tables(&self) -> StoreResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        // Opening a table in a write transaction creates it if absent.
        txn.open_table(APPLICATIONS).map_err(map_err!(Table))?;
        txn.open_table(SCALING_HISTORIES).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    // ── Applications ───────────────────────────────────────────────

    /// Insert or update an enrollment.
    pub fn save_application(&self, app_id: &str, breach_duration_secs: u32) -> StoreResult<()> {
        let record = ApplicationRecord {
            app_id: app_id.to_string(),
            breach_duration_secs,
        };
        let value = serde_json::to_vec(&record).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(APPLICATIONS).map_err(map_err!(Table))?;
            table
                .insert(app_id, value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%app_id, breach_duration_secs, "application saved");
        Ok(())
    }

    /// Delete an enrollment. Returns true if it existed.
    pub fn delete_application(&self, app_id: &str) -> StoreResult<bool> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let existed;
        {
            let mut table = txn.open_table(APPLICATIONS).map_err(map_err!(Table))?;
            existed = table.remove(app_id).map_err(map_err!(Write))?.is_some();
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%app_id, existed, "application deleted");
        Ok(existed)
    }

    /// All enrollments as app id → breach duration seconds.
    pub fn list_applications(&self) -> StoreResult<HashMap<String, u32>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(APPLICATIONS).map_err(map_err!(Table))?;
        let mut apps = HashMap::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (_, value) = entry.map_err(map_err!(Read))?;
            let record: ApplicationRecord =
                serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            apps.insert(record.app_id, record.breach_duration_secs);
        }
        Ok(apps)
    }

    // ── Scaling history ────────────────────────────────────────────

    /// Append one history row.
    pub fn save_scaling_history(&self, history: &AppScalingHistory) -> StoreResult<()> {
        let key = history_key(&history.app_id, history.timestamp);
        let value = serde_json::to_vec(history).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(SCALING_HISTORIES).map_err(map_err!(Table))?;
            table
                .insert(key.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(app_id = %history.app_id, status = ?history.status, "scaling history saved");
        Ok(())
    }

    /// History rows for an app with `start <= timestamp <= end`.
    ///
    /// `end < 0` means "now". Ignored rows are filtered out unless
    /// `include_all` is set.
    pub fn retrieve_scaling_histories(
        &self,
        app_id: &str,
        start: i64,
        end: i64,
        order: Order,
        include_all: bool,
    ) -> StoreResult<Vec<AppScalingHistory>> {
        let start = start.max(0);
        let end = if end < 0 { now_nanos() } else { end };

        let low = history_key(app_id, start);
        let high = history_key(app_id, end);

        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(SCALING_HISTORIES).map_err(map_err!(Table))?;

        let mut histories = Vec::new();
        for entry in table
            .range(low.as_str()..=high.as_str())
            .map_err(map_err!(Read))?
        {
            let (_, value) = entry.map_err(map_err!(Read))?;
            let history: AppScalingHistory =
                serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            if include_all || history.status != ScalingStatus::Ignored {
                histories.push(history);
            }
        }

        if order == Order::Desc {
            histories.reverse();
        }
        Ok(histories)
    }
}

/// Range-scannable history key: timestamps are zero-padded so that
/// lexicographic order equals numeric order within one app's prefix.
fn history_key(app_id: &str, timestamp: i64) -> String {
    format!("{app_id}:{:020}", timestamp.max(0))
}

fn now_nanos() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos() as i64
}
