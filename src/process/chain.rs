//! Ordered filter execution with persisted suspension.

use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

use super::cardinality::CardinalityFilter;
use super::{ChainOutcome, FilterOutcome, ProcessingFilter};
use crate::config::FilterConfig;
use crate::error::{AuthFailure, Error, Result};
use crate::http::{BindingSender, RequestContext};
use crate::state::{AuthState, ChainPosition, StateId, StateStore};

/// Priority of filters that do not set `%priority`.
pub const DEFAULT_PRIORITY: i64 = 50;

/// Builds a filter from its configuration value and the gateway base URL.
pub type FilterFactory = fn(&Value, &str) -> Result<Box<dyn ProcessingFilter>>;

/// Filter class names to constructors.
pub struct FilterRegistry {
    factories: HashMap<String, FilterFactory>,
}

impl Default for FilterRegistry {
    fn default() -> Self {
        let mut registry = Self::empty();
        registry.register("core:Cardinality", |config, base_url| {
            Ok(Box::new(CardinalityFilter::from_config(config, base_url)?))
        });
        registry
    }
}

impl FilterRegistry {
    /// Registry without the built-in filters.
    pub fn empty() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    pub fn register(&mut self, class: impl Into<String>, factory: FilterFactory) {
        self.factories.insert(class.into(), factory);
    }

    pub fn build(&self, class: &str, config: &Value, base_url: &str) -> Result<Box<dyn ProcessingFilter>> {
        let factory = self
            .factories
            .get(class)
            .ok_or_else(|| Error::config(format!("Unknown processing filter class: {class}")))?;
        factory(config, base_url)
    }
}

fn priority_of(class: &str, config: &Value) -> Result<i64> {
    match config.get("%priority") {
        None => Ok(DEFAULT_PRIORITY),
        Some(value) => value.as_i64().ok_or_else(|| {
            Error::config(format!("{class}: %priority must be an integer"))
        }),
    }
}

/// The configured filter chain.
pub struct ProcessingChain {
    filters: Vec<Box<dyn ProcessingFilter>>,
    store: Arc<dyn StateStore>,
    sender: Arc<dyn BindingSender>,
}

impl ProcessingChain {
    /// Order filters by ascending priority, keeping configuration order for ties.
    pub fn new(
        filters: Vec<(i64, Box<dyn ProcessingFilter>)>,
        store: Arc<dyn StateStore>,
        sender: Arc<dyn BindingSender>,
    ) -> Self {
        let mut filters = filters;
        filters.sort_by_key(|(priority, _)| *priority);
        Self {
            filters: filters.into_iter().map(|(_, filter)| filter).collect(),
            store,
            sender,
        }
    }

    /// Build every configured filter. Any configuration error fails here.
    pub fn from_config(
        configs: &[FilterConfig],
        registry: &FilterRegistry,
        base_url: &str,
        store: Arc<dyn StateStore>,
        sender: Arc<dyn BindingSender>,
    ) -> Result<Self> {
        let mut filters = Vec::with_capacity(configs.len());
        for config in configs {
            let priority = priority_of(&config.class, &config.config)?;
            let filter = registry.build(&config.class, &config.config, base_url)?;
            debug!(class = %config.class, priority, "Configured processing filter");
            filters.push((priority, filter));
        }
        Ok(Self::new(filters, store, sender))
    }

    pub fn len(&self) -> usize {
        self.filters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }

    /// Filter names in execution order.
    pub fn names(&self) -> Vec<&str> {
        self.filters.iter().map(|f| f.name()).collect()
    }

    /// Run the chain from the first filter.
    pub fn run(&self, state: AuthState, ctx: &RequestContext) -> Result<ChainOutcome> {
        self.run_from(state, 0, ctx)
    }

    /// Continue a suspended chain.
    pub fn resume(&self, id: &StateId, stage: &str, ctx: &RequestContext) -> Result<ChainOutcome> {
        let state = self.store.take(id, stage)?;
        let next = state
            .processing
            .map(|position| position.next)
            .ok_or_else(|| Error::protocol("State is not suspended in the processing chain"))?;
        debug!(state_id = %id, next, "Resuming processing chain");
        self.run_from(state, next, ctx)
    }

    fn run_from(&self, mut state: AuthState, start: usize, ctx: &RequestContext) -> Result<ChainOutcome> {
        for (index, filter) in self.filters.iter().enumerate().skip(start) {
            match filter.process(&mut state, ctx)? {
                FilterOutcome::Continue => {}
                FilterOutcome::Suspend(suspension) => {
                    if suspension.terminal {
                        state.processing = None;
                    } else if state.is_passive() {
                        debug!(filter = filter.name(), "Passive request cannot suspend");
                        return Err(AuthFailure::NoPassive.into());
                    } else {
                        state.processing = Some(ChainPosition { next: index + 1 });
                    }
                    let id = self.store.persist(&state, &suspension.stage)?;

                    let mut params = suspension.params;
                    params.push(("StateId".to_string(), id.to_string()));
                    let dispatch = self.sender.redirect(&suspension.url, &params)?;

                    info!(
                        filter = filter.name(),
                        stage = %suspension.stage,
                        terminal = suspension.terminal,
                        state_id = %id,
                        "Processing chain suspended"
                    );
                    return Ok(ChainOutcome::Suspended(dispatch));
                }
            }
        }

        state.processing = None;
        info!(
            auth_id = state.auth_source_id.as_deref().unwrap_or_default(),
            attributes = state.attributes.len(),
            "Processing chain completed"
        );
        Ok(ChainOutcome::Completed(state))
    }
}
