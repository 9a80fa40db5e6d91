//! Authentication sources.
//!
//! A source decides how a user is authenticated. It either completes in a
//! single call (ECP, static IdP answers) or persists the state and returns
//! the dispatch that sends the user elsewhere.

pub mod userpass;

use std::any::Any;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::debug;

use crate::config::SourceConfig;
use crate::error::{Error, Result};
use crate::http::{BindingSender, Dispatch, RequestContext};
use crate::saml::{MetadataResolver, RequestSigner, SpSource};
use crate::state::{AuthState, StateStore};

pub use userpass::{LoginBackend, StaticUserBackend, UserPassConfig, UserPassSource};

/// Result of asking a source to authenticate.
#[derive(Debug)]
pub enum SourceOutcome {
    /// Attributes are filled in; processing can run.
    Completed(AuthState),
    /// State was persisted; write this response and wait for the user.
    Suspended(Dispatch),
}

/// An authentication source.
pub trait AuthSource: Send + Sync {
    /// Configured source ID.
    fn id(&self) -> &str;

    fn authenticate(&self, state: AuthState, ctx: &RequestContext) -> Result<SourceOutcome>;

    /// Concrete type access for source-specific resumption entry points.
    fn as_any(&self) -> &dyn Any;
}

/// Collaborators shared by every source.
#[derive(Clone)]
pub struct SourceServices {
    pub base_url: String,
    pub store: Arc<dyn StateStore>,
    pub sender: Arc<dyn BindingSender>,
    pub metadata: Arc<dyn MetadataResolver>,
    pub signer: Option<Arc<dyn RequestSigner>>,
}

/// Sources by ID, built once from configuration.
#[derive(Default)]
pub struct SourceRegistry {
    sources: HashMap<String, Arc<dyn AuthSource>>,
}

impl SourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build every configured source.
    pub fn from_config(
        configs: &BTreeMap<String, SourceConfig>,
        services: &SourceServices,
    ) -> Result<Self> {
        let mut registry = Self::new();
        for (id, config) in configs {
            let source: Arc<dyn AuthSource> = match config {
                SourceConfig::SamlSp(sp) => {
                    Arc::new(SpSource::new(id.clone(), sp.clone(), services.clone())?)
                }
                SourceConfig::UserPass(userpass) => {
                    Arc::new(UserPassSource::from_config(id.clone(), userpass, services)?)
                }
            };
            debug!(auth_id = %id, kind = config.type_name(), "Registered authentication source");
            registry.register(source)?;
        }
        Ok(registry)
    }

    pub fn register(&mut self, source: Arc<dyn AuthSource>) -> Result<()> {
        let id = source.id().to_string();
        if self.sources.contains_key(&id) {
            return Err(Error::config(format!("Duplicate authentication source: {id}")));
        }
        self.sources.insert(id, source);
        Ok(())
    }

    pub fn get(&self, id: &str) -> Result<&Arc<dyn AuthSource>> {
        self.sources
            .get(id)
            .ok_or_else(|| Error::config(format!("Unknown authentication source: {id}")))
    }

    /// Look up a source and require a concrete type.
    pub fn get_as<T: AuthSource + 'static>(&self, id: &str) -> Result<&T> {
        self.get(id)?
            .as_any()
            .downcast_ref::<T>()
            .ok_or_else(|| Error::config(format!("Authentication source {id} has the wrong type")))
    }

    /// Source that owns a state.
    pub fn for_state(&self, state: &AuthState) -> Result<&Arc<dyn AuthSource>> {
        let id = state
            .auth_source_id
            .as_deref()
            .ok_or_else(|| Error::protocol("State carries no authentication source"))?;
        self.get(id)
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.sources.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }
}
