//! Post-authentication processing filters.
//!
//! Filters run in a fixed order once a source has produced attributes.
//! Any filter may suspend the whole chain; the chain persists the state
//! with the position to resume at and redirects the user. Terminal
//! suspensions are persisted without a position.

pub mod cardinality;
pub mod chain;

use crate::error::Result;
use crate::http::{Dispatch, RequestContext};
use crate::state::AuthState;

pub use cardinality::{cardinality_error_report, CardinalityFilter, CARDINALITY_STAGE};
pub use chain::{FilterFactory, FilterRegistry, ProcessingChain, DEFAULT_PRIORITY};

/// Where a filter wants the user sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Suspension {
    /// Stage the state is persisted under.
    pub stage: String,
    pub url: String,
    /// Extra query parameters; the chain adds `StateId`.
    pub params: Vec<(String, String)>,
    /// The chain ends here and cannot be resumed. Terminal suspensions
    /// redirect even for passive requests.
    pub terminal: bool,
}

impl Suspension {
    pub fn new(stage: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            stage: stage.into(),
            url: url.into(),
            params: Vec::new(),
            terminal: false,
        }
    }

    /// A suspension that ends the flow, such as an error page.
    pub fn terminal(stage: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            terminal: true,
            ..Self::new(stage, url)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilterOutcome {
    Continue,
    Suspend(Suspension),
}

/// A processing filter.
pub trait ProcessingFilter: Send + Sync {
    /// Class name the filter was configured with.
    fn name(&self) -> &str;

    fn process(&self, state: &mut AuthState, ctx: &RequestContext) -> Result<FilterOutcome>;
}

/// Result of running the chain.
#[derive(Debug)]
pub enum ChainOutcome {
    Completed(AuthState),
    Suspended(Dispatch),
}
