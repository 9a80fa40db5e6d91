//! Persisted authentication state.
//!
//! Every suspension point stores the in-flight state under a stage name
//! and hands the client an opaque ID; the matching entry point consumes it.

pub mod cleanup;
pub mod memory;
pub mod store;
pub mod types;

pub use cleanup::{spawn_cleanup_task, DEFAULT_CLEANUP_INTERVAL_SECS};
pub use memory::MemoryStateStore;
pub use store::{RedbStateStore, StateStore, DEFAULT_STATE_TTL_SECS, MAX_STATE_TTL_SECS};
pub use types::{
    AttributeSet, AuthState, CardinalityViolation, ChainPosition, NameId, ResumptionToken,
    StateId, StoredState,
};
