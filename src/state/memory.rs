//! In-memory state store.
//!
//! Suitable for tests and single-instance development setups.
//! State is lost on restart.

use std::collections::HashMap;
use std::sync::RwLock;
use tracing::debug;

use super::store::{StateStore, DEFAULT_STATE_TTL_SECS};
use super::types::{AuthState, StateId, StoredState};
use crate::error::StateError;

/// Hash map backed state store.
#[derive(Debug)]
pub struct MemoryStateStore {
    records: RwLock<HashMap<StateId, StoredState>>,
    ttl_secs: u64,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::with_ttl(DEFAULT_STATE_TTL_SECS)
    }

    pub fn with_ttl(ttl_secs: u64) -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
            ttl_secs,
        }
    }

    fn poisoned() -> StateError {
        StateError::Backend(anyhow::anyhow!("state store lock poisoned"))
    }
}

impl Default for MemoryStateStore {
    fn default() -> Self {
        Self::new()
    }
}

impl StateStore for MemoryStateStore {
    fn persist(&self, state: &AuthState, stage: &str) -> Result<StateId, StateError> {
        let id = StateId::generate();
        let mut records = self.records.write().map_err(|_| Self::poisoned())?;
        records.insert(id.clone(), StoredState::new(state.clone(), stage, self.ttl_secs));
        debug!(state_id = %id, stage, "Persisted state");
        Ok(id)
    }

    fn take(&self, id: &StateId, stage: &str) -> Result<AuthState, StateError> {
        let mut records = self.records.write().map_err(|_| Self::poisoned())?;
        let record = records.get(id).ok_or(StateError::NotFound)?;

        if record.is_expired() {
            records.remove(id);
            return Err(StateError::Expired);
        }
        if record.stage != stage {
            return Err(StateError::StageMismatch {
                expected: stage.to_string(),
                found: record.stage.clone(),
            });
        }

        records
            .remove(id)
            .map(|record| record.state)
            .ok_or(StateError::NotFound)
    }

    fn evict_expired(&self) -> Result<usize, StateError> {
        let mut records = self.records.write().map_err(|_| Self::poisoned())?;
        let before = records.len();
        records.retain(|_, record| !record.is_expired());
        Ok(before - records.len())
    }

    fn len(&self) -> Result<usize, StateError> {
        let records = self.records.read().map_err(|_| Self::poisoned())?;
        Ok(records.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_take_once() {
        let store = MemoryStateStore::new();
        let id = store.persist(&AuthState::new("sp"), "saml:sp:sso").unwrap();

        assert!(store.take(&id, "saml:sp:sso").is_ok());
        assert!(matches!(
            store.take(&id, "saml:sp:sso"),
            Err(StateError::NotFound)
        ));
    }

    #[test]
    fn test_stage_mismatch() {
        let store = MemoryStateStore::new();
        let id = store.persist(&AuthState::default(), "core:UserPassBase").unwrap();

        assert!(matches!(
            store.take(&id, "core:cardinality"),
            Err(StateError::StageMismatch { .. })
        ));
        assert_eq!(store.len().unwrap(), 1);
    }

    #[test]
    fn test_zero_ttl_expires() {
        let store = MemoryStateStore::with_ttl(0);
        let id = store.persist(&AuthState::default(), "saml:sp:sso").unwrap();
        std::thread::sleep(std::time::Duration::from_millis(5));

        assert!(matches!(
            store.take(&id, "saml:sp:sso"),
            Err(StateError::Expired)
        ));
        assert_eq!(store.evict_expired().unwrap(), 0);
    }
}
