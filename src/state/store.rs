//! State store trait and its redb-backed implementation.
//!
//! Records are keyed by state ID and consumed on first successful `take`:
//! - Stage must match the one the state was persisted under
//! - Expired records are removed and reported as such
//! - TTL is fixed per store

use anyhow::{Context, Result};
use redb::{Database, ReadableTable, ReadableTableMetadata, TableDefinition};
use std::path::PathBuf;
use tracing::{debug, warn};

use super::types::{AuthState, ResumptionToken, StateId, StoredState};
use crate::error::StateError;

/// Default state TTL (8 hours).
pub const DEFAULT_STATE_TTL_SECS: u64 = 8 * 60 * 60;

/// Longest accepted state TTL (30 days).
pub const MAX_STATE_TTL_SECS: u64 = 30 * 24 * 60 * 60;

/// Persistence for in-flight authentication state.
pub trait StateStore: Send + Sync {
    /// Persist a state under a stage and return a fresh ID for it.
    fn persist(&self, state: &AuthState, stage: &str) -> Result<StateId, StateError>;

    /// Consume the state stored under `id`, which must have been persisted
    /// under `stage`.
    fn take(&self, id: &StateId, stage: &str) -> Result<AuthState, StateError>;

    /// Remove expired records, returning how many were removed.
    fn evict_expired(&self) -> Result<usize, StateError>;

    /// Number of records currently held.
    fn len(&self) -> Result<usize, StateError>;

    fn is_empty(&self) -> Result<bool, StateError> {
        Ok(self.len()? == 0)
    }

    /// Consume the state a resumption token points at.
    fn resolve(&self, token: &ResumptionToken) -> Result<AuthState, StateError> {
        self.take(&token.id, &token.stage)
    }
}

/// redb table for state records (key: state ID, value: MessagePack bytes).
const STATE_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("auth_state");

enum Lookup {
    Missing,
    Mismatch(String),
    Found(StoredState),
}

/// State store backed by a redb database file.
pub struct RedbStateStore {
    db: Database,
    ttl_secs: u64,
}

impl RedbStateStore {
    /// Open or create a state store at the given path.
    pub fn open(path: PathBuf, ttl_secs: u64) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {:?}", parent))?;
        }

        let db = Database::create(&path)
            .with_context(|| format!("Failed to open state database: {:?}", path))?;

        let write_txn = db.begin_write()?;
        {
            let _ = write_txn.open_table(STATE_TABLE)?;
        }
        write_txn.commit()?;

        debug!(path = ?path, ttl_secs, "Opened state store");

        Ok(Self { db, ttl_secs })
    }

    pub fn ttl_secs(&self) -> u64 {
        self.ttl_secs
    }

    pub(crate) fn write_record(&self, id: &StateId, record: &StoredState) -> Result<()> {
        let data = rmp_serde::to_vec_named(record).context("Failed to serialize state")?;
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(STATE_TABLE)?;
            table.insert(id.as_str(), data.as_slice())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    /// Look up and, unless the stage differs, remove a record in one transaction.
    fn remove_matching(&self, id: &StateId, stage: &str) -> Result<Lookup> {
        let write_txn = self.db.begin_write()?;
        let lookup = {
            let mut table = write_txn.open_table(STATE_TABLE)?;
            let bytes = table.get(id.as_str())?.map(|v| v.value().to_vec());
            match bytes {
                None => Lookup::Missing,
                Some(bytes) => {
                    let record: StoredState =
                        rmp_serde::from_slice(&bytes).context("Failed to deserialize state")?;
                    if record.stage != stage && !record.is_expired() {
                        Lookup::Mismatch(record.stage)
                    } else {
                        table.remove(id.as_str())?;
                        Lookup::Found(record)
                    }
                }
            }
        };
        match lookup {
            Lookup::Found(_) => write_txn.commit()?,
            _ => write_txn.abort()?,
        }
        Ok(lookup)
    }

    fn expired_keys(&self) -> Result<Vec<String>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(STATE_TABLE)?;

        let mut ids = Vec::new();
        for entry in table.iter()? {
            let (key, value) = entry?;
            match rmp_serde::from_slice::<StoredState>(value.value()) {
                Ok(record) if record.is_expired() => ids.push(key.value().to_string()),
                Err(e) => {
                    warn!(key = key.value(), error = %e, "Failed to deserialize state, marking for deletion");
                    ids.push(key.value().to_string());
                }
                _ => {}
            }
        }
        Ok(ids)
    }

    fn remove_keys(&self, ids: &[String]) -> Result<usize> {
        let mut removed = 0;
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(STATE_TABLE)?;
            for id in ids {
                if table.remove(id.as_str())?.is_some() {
                    removed += 1;
                }
            }
        }
        write_txn.commit()?;
        Ok(removed)
    }

    fn count(&self) -> Result<usize> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(STATE_TABLE)?;
        Ok(table.len()? as usize)
    }
}

impl StateStore for RedbStateStore {
    fn persist(&self, state: &AuthState, stage: &str) -> Result<StateId, StateError> {
        let id = StateId::generate();
        let record = StoredState::new(state.clone(), stage, self.ttl_secs);
        self.write_record(&id, &record)?;
        debug!(state_id = %id, stage, "Persisted state");
        Ok(id)
    }

    fn take(&self, id: &StateId, stage: &str) -> Result<AuthState, StateError> {
        match self.remove_matching(id, stage)? {
            Lookup::Missing => Err(StateError::NotFound),
            Lookup::Mismatch(found) => Err(StateError::StageMismatch {
                expected: stage.to_string(),
                found,
            }),
            Lookup::Found(record) if record.is_expired() => Err(StateError::Expired),
            Lookup::Found(record) => Ok(record.state),
        }
    }

    fn evict_expired(&self) -> Result<usize, StateError> {
        let ids = self.expired_keys()?;
        if ids.is_empty() {
            return Ok(0);
        }
        Ok(self.remove_keys(&ids)?)
    }

    fn len(&self) -> Result<usize, StateError> {
        Ok(self.count()?)
    }
}
