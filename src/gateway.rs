//! Gateway orchestrator.
//!
//! Owns the configured sources, the processing chain and the shared
//! collaborators. Every inbound request maps to exactly one entry point;
//! each returns either the finished authentication or the response that
//! sends the user on.

use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::GatewayConfig;
use crate::error::{Error, Result};
use crate::http::{BindingSender, Dispatch, HttpDispatcher, RequestContext};
use crate::process::{
    cardinality_error_report, ChainOutcome, FilterRegistry, ProcessingChain,
};
use crate::saml::{
    MetadataResolver, RequestSigner, ResponseVerifier, RsaSha256Signer, SpSource, SSO_STAGE,
};
use crate::source::userpass::USERPASS_STAGE;
use crate::source::{SourceOutcome, SourceRegistry, SourceServices, UserPassSource};
use crate::state::{AuthState, CardinalityViolation, StateId, StateStore};

/// Result of a gateway entry point.
#[derive(Debug)]
pub enum AuthFlow {
    /// Authentication and processing finished.
    Completed(AuthState),
    /// Write this response; the flow continues on a later request.
    Suspended(Dispatch),
}

impl From<ChainOutcome> for AuthFlow {
    fn from(outcome: ChainOutcome) -> Self {
        match outcome {
            ChainOutcome::Completed(state) => AuthFlow::Completed(state),
            ChainOutcome::Suspended(dispatch) => AuthFlow::Suspended(dispatch),
        }
    }
}

/// Collaborators the gateway is built from.
pub struct GatewayParts {
    pub store: Arc<dyn StateStore>,
    pub sender: Arc<dyn BindingSender>,
    pub metadata: Arc<dyn MetadataResolver>,
    pub signer: Option<Arc<dyn RequestSigner>>,
    pub verifier: Arc<dyn ResponseVerifier>,
}

pub struct Gateway {
    sources: SourceRegistry,
    chain: ProcessingChain,
    store: Arc<dyn StateStore>,
    verifier: Arc<dyn ResponseVerifier>,
}

impl Gateway {
    /// Build sources and the processing chain. Configuration errors fail here.
    pub fn new(config: &GatewayConfig, parts: GatewayParts) -> Result<Self> {
        let services = SourceServices {
            base_url: config.base_url.clone(),
            store: Arc::clone(&parts.store),
            sender: Arc::clone(&parts.sender),
            metadata: parts.metadata,
            signer: parts.signer,
        };

        let sources = SourceRegistry::from_config(&config.sources, &services)?;
        let chain = ProcessingChain::from_config(
            &config.processing_filters,
            &FilterRegistry::default(),
            &config.base_url,
            Arc::clone(&parts.store),
            parts.sender,
        )?;

        info!(
            sources = sources.len(),
            filters = chain.len(),
            "Gateway configured"
        );

        Ok(Self {
            sources,
            chain,
            store: parts.store,
            verifier: parts.verifier,
        })
    }

    /// Build from configuration, loading metadata files relative to
    /// `base_dir` and the signing key if one is configured.
    pub fn from_config(
        config: &GatewayConfig,
        base_dir: &Path,
        store: Arc<dyn StateStore>,
        verifier: Arc<dyn ResponseVerifier>,
    ) -> Result<Self> {
        let metadata = config.metadata.resolver(base_dir)?;

        let signer = match config.signing {
            Some(ref signing) => {
                let signer: Arc<dyn RequestSigner> =
                    Arc::new(RsaSha256Signer::from_file(&base_dir.join(&signing.key_path))?);
                Some(signer)
            }
            None => None,
        };

        Self::new(
            config,
            GatewayParts {
                store,
                sender: Arc::new(HttpDispatcher::new()),
                metadata: Arc::new(metadata),
                signer,
                verifier,
            },
        )
    }

    pub fn sources(&self) -> &SourceRegistry {
        &self.sources
    }

    /// Start authenticating with a source.
    pub fn authenticate(
        &self,
        source_id: &str,
        mut state: AuthState,
        ctx: &RequestContext,
    ) -> Result<AuthFlow> {
        let source = self.sources.get(source_id)?;
        state.auth_source_id = Some(source_id.to_string());

        let outcome = source.authenticate(state, ctx);
        match self.observe(source_id, outcome)? {
            SourceOutcome::Completed(state) => self.process(state, ctx),
            SourceOutcome::Suspended(dispatch) => Ok(AuthFlow::Suspended(dispatch)),
        }
    }

    /// The discovery service returned with the chosen IdP.
    pub fn discovery_response(&self, id: &StateId, idp_entity_id: &str) -> Result<AuthFlow> {
        let state = self.store.take(id, SSO_STAGE)?;
        let source_id = state.auth_source_id.clone().unwrap_or_default();
        let source = self.sp_source_for(&state)?;

        let dispatch = self.observe(&source_id, source.select_idp(state, idp_entity_id))?;
        Ok(AuthFlow::Suspended(dispatch))
    }

    /// A SAML response arrived at the ACS of `source_id`.
    pub fn assertion_consumer(
        &self,
        source_id: &str,
        saml_response: &str,
        ctx: &RequestContext,
    ) -> Result<AuthFlow> {
        let source = self.sources.get_as::<SpSource>(source_id)?;
        let state = self.observe(
            source_id,
            source.handle_response(saml_response, self.verifier.as_ref()),
        )?;
        self.process(state, ctx)
    }

    /// The login form was posted.
    pub fn login(
        &self,
        id: &StateId,
        username: &str,
        password: &str,
        ctx: &RequestContext,
    ) -> Result<AuthFlow> {
        let state = self.store.take(id, USERPASS_STAGE)?;
        let source_id = state.auth_source_id.clone().unwrap_or_default();
        let source = self
            .sources
            .for_state(&state)?
            .as_any()
            .downcast_ref::<UserPassSource>()
            .ok_or_else(|| Error::protocol("State does not belong to a login form source"))?;

        let state = self.observe(&source_id, source.complete_login(state, username, password))?;
        self.process(state, ctx)
    }

    /// A filter's external step finished; continue the chain.
    pub fn resume_processing(
        &self,
        id: &StateId,
        stage: &str,
        ctx: &RequestContext,
    ) -> Result<AuthFlow> {
        Ok(self.chain.resume(id, stage, ctx)?.into())
    }

    /// Diagnostics for the cardinality error page.
    pub fn cardinality_report(&self, id: &StateId) -> Result<Vec<CardinalityViolation>> {
        cardinality_error_report(self.store.as_ref(), id)
    }

    /// SP metadata XML of a `saml:SP` source.
    pub fn sp_metadata(&self, source_id: &str) -> Result<String> {
        Ok(self.sources.get_as::<SpSource>(source_id)?.metadata_xml())
    }

    fn process(&self, state: AuthState, ctx: &RequestContext) -> Result<AuthFlow> {
        Ok(self.chain.run(state, ctx)?.into())
    }

    fn sp_source_for(&self, state: &AuthState) -> Result<&SpSource> {
        self.sources
            .for_state(state)?
            .as_any()
            .downcast_ref::<SpSource>()
            .ok_or_else(|| Error::protocol("State does not belong to a saml:SP source"))
    }

    /// Log failures by class: user-facing ones are expected outcomes.
    fn observe<T>(&self, source_id: &str, result: Result<T>) -> Result<T> {
        if let Err(ref e) = result {
            if e.is_user_facing() {
                debug!(auth_id = %source_id, code = ?e.code(), "Authentication failed");
            } else {
                warn!(auth_id = %source_id, error = %e, "Authentication aborted");
            }
        }
        result
    }
}
