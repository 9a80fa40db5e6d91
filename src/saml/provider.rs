//! SAML Service Provider authentication source.
//!
//! Handles SP-initiated SSO:
//! - IdP resolution from the requester's IDPList and the static IdP
//! - Discovery service round trip when several IdPs remain
//! - AuthnRequest construction, signing and dispatch
//! - Assertion consumption on the way back

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use chrono::{Duration, Utc};
use quick_xml::escape::escape;
use std::any::Any;
use tracing::{debug, info, warn};

use super::authn_request::{AuthnRequest, Scoping};
use super::bindings;
use super::config::SpConfig;
use super::constants::{AuthnContextComparison, Binding, STATUS_SUCCESS};
use super::metadata::{Endpoint, IdpMetadata};
use super::signature::ResponseVerifier;
use crate::error::{AuthFailure, Error, Result};
use crate::http::{Dispatch, RequestContext};
use crate::source::{AuthSource, SourceOutcome, SourceServices};
use crate::state::{AuthState, NameId, StateId};

/// Stage the state is persisted under while the user is at the IdP or at
/// the discovery service.
pub const SSO_STAGE: &str = "saml:sp:sso";

/// Outcome of IdP resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdpChoice {
    /// Send the AuthnRequest to this IdP.
    Single(String),
    /// Let the discovery service choose among these (empty: any).
    Discovery(Vec<String>),
}

/// `saml:SP` authentication source.
pub struct SpSource {
    id: String,
    config: SpConfig,
    entity_id: String,
    services: SourceServices,
}

impl SpSource {
    pub fn new(id: String, config: SpConfig, services: SourceServices) -> Result<Self> {
        config.validate()?;

        if config.sign_authn_request && services.signer.is_none() {
            return Err(Error::config(format!(
                "saml:SP source {id} signs AuthnRequests but no signing key is configured"
            )));
        }

        let entity_id = config.entity_id(&services.base_url, &id);
        Ok(Self {
            id,
            config,
            entity_id,
            services,
        })
    }

    pub fn entity_id(&self) -> &str {
        &self.entity_id
    }

    pub fn config(&self) -> &SpConfig {
        &self.config
    }

    pub fn acs_url(&self) -> String {
        self.config.acs_url(&self.services.base_url, &self.id)
    }

    fn discovery_return_url(&self, id: &StateId) -> String {
        format!(
            "{}/saml/sp/discoresp?AuthID={}",
            self.services.base_url.trim_end_matches('/'),
            id
        )
    }

    /// Decide which IdP to contact.
    pub fn resolve_idp(&self, state: &AuthState) -> Result<IdpChoice> {
        let static_idp = state.forced_idp.as_deref().or(self.config.idp.as_deref());

        let Some(requested) = state.idp_list.as_ref().filter(|list| !list.is_empty()) else {
            return Ok(match static_idp {
                Some(idp) => IdpChoice::Single(idp.to_string()),
                None => IdpChoice::Discovery(Vec::new()),
            });
        };

        let mut known: Vec<String> = Vec::new();
        for entity_id in requested {
            if known.contains(entity_id) {
                continue;
            }
            if self.services.metadata.resolve(entity_id).is_some() {
                known.push(entity_id.clone());
            } else {
                debug!(auth_id = %self.id, idp = %entity_id, "Dropping unknown IdP from IDPList");
            }
        }

        if known.is_empty() {
            return Err(AuthFailure::NoSupportedIdp.into());
        }

        if let Some(idp) = static_idp {
            if known.iter().any(|k| k == idp) {
                return Ok(IdpChoice::Single(idp.to_string()));
            }
            debug!(auth_id = %self.id, idp = %idp, "Static IdP not in IDPList");
            return Err(AuthFailure::NoAvailableIdp.into());
        }

        if known.len() == 1 {
            return Ok(IdpChoice::Single(known.remove(0)));
        }
        Ok(IdpChoice::Discovery(known))
    }

    /// Persist the state and send an AuthnRequest to the given IdP.
    pub fn start_sso(&self, idp_entity_id: &str, mut state: AuthState) -> Result<Dispatch> {
        let idp = self.services.metadata.resolve(idp_entity_id).ok_or_else(|| {
            Error::config(format!("No metadata for IdP {idp_entity_id}"))
        })?;

        let ecp = state.is_ecp();
        let found = if ecp {
            idp.find_endpoint(|b| b == Binding::Soap)
        } else {
            idp.find_endpoint(|b| b.is_front_channel())
        };
        let (binding, endpoint) = found.ok_or_else(|| {
            Error::config(format!("No supported SSO endpoint for IdP {}", idp.entity_id))
        })?;

        debug!(
            auth_id = %self.id,
            idp = %idp.entity_id,
            binding = %binding,
            location = %endpoint.location,
            "Selected SSO endpoint"
        );

        state.auth_source_id = Some(self.id.clone());
        state.expected_issuer = Some(idp.entity_id.clone());
        let id = self.services.store.persist(&state, SSO_STAGE)?;

        let xml = self.build_request(&id, &idp, endpoint, &state).to_xml();
        let signer = if self.config.sign_authn_request {
            self.services.signer.as_deref()
        } else {
            None
        };
        let message = if ecp {
            let xml = match signer {
                Some(signer) => signer.sign_enveloped(&xml, id.as_str())?,
                None => xml,
            };
            bindings::paos_message(&endpoint.location, &xml, &self.acs_url())
        } else {
            bindings::front_channel_message(
                binding,
                &endpoint.location,
                &xml,
                state.return_url.as_deref(),
                signer,
            )?
        };

        info!(
            auth_id = %self.id,
            idp = %idp.entity_id,
            request_id = %id,
            ecp,
            "Sending AuthnRequest"
        );
        Ok(self.services.sender.send(&message)?)
    }

    /// Persist the state and redirect to the discovery service.
    pub fn start_disco(&self, mut state: AuthState, candidates: &[String]) -> Result<Dispatch> {
        state.auth_source_id = Some(self.id.clone());
        let id = self.services.store.persist(&state, SSO_STAGE)?;

        let mut params = vec![
            ("entityID".to_string(), self.entity_id.clone()),
            ("return".to_string(), self.discovery_return_url(&id)),
            ("returnIDParam".to_string(), "idpentityid".to_string()),
        ];
        params.extend(
            candidates
                .iter()
                .map(|idp| ("IDPList[]".to_string(), idp.clone())),
        );
        if state.is_passive() {
            params.push(("isPassive".to_string(), "true".to_string()));
        }

        debug!(auth_id = %self.id, candidates = candidates.len(), "Redirecting to discovery service");
        Ok(self
            .services
            .sender
            .redirect(&self.config.disco_url(&self.services.base_url), &params)?)
    }

    /// Resume after the discovery service picked an IdP.
    pub fn handle_discovery_response(&self, id: &StateId, idp_entity_id: &str) -> Result<Dispatch> {
        let state = self.services.store.take(id, SSO_STAGE)?;
        self.select_idp(state, idp_entity_id)
    }

    /// Start SSO with the IdP the discovery service returned for a state
    /// already taken from the store.
    pub fn select_idp(&self, state: AuthState, idp_entity_id: &str) -> Result<Dispatch> {
        if let Some(list) = state.idp_list.as_ref().filter(|l| !l.is_empty()) {
            if !list.iter().any(|idp| idp == idp_entity_id) {
                return Err(AuthFailure::NoAvailableIdp.into());
            }
        }
        if self.services.metadata.resolve(idp_entity_id).is_none() {
            return Err(AuthFailure::NoSupportedIdp.into());
        }

        self.start_sso(idp_entity_id, state)
    }

    fn build_request(
        &self,
        id: &StateId,
        idp: &IdpMetadata,
        endpoint: &Endpoint,
        state: &AuthState,
    ) -> AuthnRequest {
        let protocol_binding = if state.is_ecp() {
            Binding::Paos
        } else {
            Binding::HttpPost
        };

        let mut request = AuthnRequest::new(id.as_str(), &self.entity_id)
            .with_destination(&endpoint.location)
            .with_acs_url(self.acs_url())
            .with_protocol_binding(protocol_binding)
            .force_authn(state.force_authn.unwrap_or(self.config.force_authn))
            .is_passive(state.is_passive.unwrap_or(self.config.is_passive));

        if let Some(ref name_id) = state.requested_name_id {
            request = request.with_subject(name_id.clone());
        }
        if let Some(ref policy) = self.config.name_id_policy {
            request = request.with_name_id_policy(policy.clone());
        }

        let class_ref = idp
            .authn_context_class_ref
            .as_ref()
            .or(state.authn_context_class_ref.as_ref())
            .or(self.config.authn_context_class_ref.as_ref());
        if let Some(class_ref) = class_ref {
            let comparison = state
                .authn_context_comparison
                .as_deref()
                .and_then(AuthnContextComparison::parse)
                .unwrap_or_else(|| self.config.comparison());
            request = request.with_authn_context(class_ref.clone(), comparison);
        }

        if let Some(ref name) = self.config.provider_name {
            request = request.with_provider_name(name.clone());
        }

        if !(self.config.disable_scoping || idp.disable_scoping) {
            let mut idp_list: Vec<String> = Vec::new();
            let sources = self
                .config
                .idp_list
                .iter()
                .chain(idp.idp_list.iter())
                .chain(state.idp_list.iter().flatten());
            for entity_id in sources {
                if !idp_list.contains(entity_id) {
                    idp_list.push(entity_id.clone());
                }
            }

            let mut requester_ids = self.config.requester_id.clone();
            requester_ids.extend(state.requester_ids.iter().cloned());

            request = request.with_scoping(Scoping {
                idp_list,
                proxy_count: state
                    .proxy_count
                    .or(idp.proxy_count)
                    .or(self.config.proxy_count),
                requester_ids,
            });
        }

        request
    }

    /// Consume a SAML response posted to the assertion consumer service.
    pub fn handle_response(
        &self,
        saml_response: &str,
        verifier: &dyn ResponseVerifier,
    ) -> Result<AuthState> {
        let decoded = BASE64
            .decode(saml_response.trim())
            .map_err(|_| Error::protocol("SAMLResponse is not valid base64"))?;
        let xml = String::from_utf8(decoded)
            .map_err(|_| Error::protocol("SAMLResponse is not valid UTF-8"))?;

        let response: samael::schema::Response = xml
            .parse()
            .map_err(|e| Error::protocol(format!("Failed to parse SAML response: {e}")))?;

        let issuer = response
            .issuer
            .as_ref()
            .and_then(|i| i.value.clone())
            .or_else(|| {
                response
                    .assertion
                    .as_ref()
                    .and_then(|a| a.issuer.value.clone())
            })
            .ok_or_else(|| Error::protocol("SAML response has no issuer"))?;

        let idp = self
            .services
            .metadata
            .resolve(&issuer)
            .ok_or_else(|| Error::protocol("SAML response from an unknown issuer"))?;
        verifier.verify(&xml, &idp)?;

        let request_id = response
            .in_response_to
            .as_deref()
            .and_then(StateId::parse)
            .ok_or_else(|| Error::protocol("SAML response does not answer a known request"))?;
        let mut state = self.services.store.take(&request_id, SSO_STAGE)?;

        if state.expected_issuer.as_deref() != Some(issuer.as_str()) {
            return Err(Error::protocol(
                "SAML response issuer differs from the IdP the request was sent to",
            ));
        }

        if let Some(ref status) = response.status {
            let status_value = status.status_code.value.as_deref();
            if status_value != Some(STATUS_SUCCESS) {
                let message = status
                    .status_message
                    .as_ref()
                    .and_then(|m| m.value.clone())
                    .unwrap_or_default();
                warn!(
                    auth_id = %self.id,
                    idp = %issuer,
                    status = ?status_value,
                    message = %message,
                    "IdP returned an error status"
                );
                return Err(AuthFailure::ResponseStatus.into());
            }
        }

        let assertion = response
            .assertion
            .as_ref()
            .ok_or_else(|| Error::protocol("SAML response contains no assertion"))?;

        let now = Utc::now();
        let skew = Duration::seconds(self.config.clock_skew_secs);
        if let Some(ref conditions) = assertion.conditions {
            if let Some(not_before) = conditions.not_before {
                if now < not_before - skew {
                    return Err(Error::protocol("SAML assertion not yet valid"));
                }
            }
            if let Some(not_on_or_after) = conditions.not_on_or_after {
                if now >= not_on_or_after + skew {
                    return Err(Error::protocol("SAML assertion has expired"));
                }
            }
        }

        if let Some(name_id) = assertion.subject.as_ref().and_then(|s| s.name_id.as_ref()) {
            state.subject = Some(NameId {
                value: name_id.value.clone(),
                format: name_id.format.clone(),
            });
        }

        for statement in assertion.attribute_statements.iter().flatten() {
            for attr in &statement.attributes {
                let Some(ref name) = attr.name else { continue };
                state
                    .attributes
                    .entry(name.clone())
                    .or_default()
                    .extend(attr.values.iter().filter_map(|v| v.value.clone()));
            }
        }

        state.source_entity_id = Some(issuer.clone());

        info!(
            auth_id = %self.id,
            idp = %issuer,
            attributes = state.attributes.len(),
            "SAML assertion accepted"
        );
        Ok(state)
    }

    /// SP metadata document for registration at IdPs.
    pub fn metadata_xml(&self) -> String {
        format!(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<md:EntityDescriptor xmlns:md="urn:oasis:names:tc:SAML:2.0:metadata" entityID="{}">
  <md:SPSSODescriptor AuthnRequestsSigned="{}" protocolSupportEnumeration="urn:oasis:names:tc:SAML:2.0:protocol">
    <md:AssertionConsumerService Binding="{}" Location="{}" index="0"/>
    <md:AssertionConsumerService Binding="{}" Location="{}" index="1"/>
  </md:SPSSODescriptor>
</md:EntityDescriptor>"#,
            escape(&self.entity_id),
            self.config.sign_authn_request,
            Binding::HttpPost.uri(),
            escape(&self.acs_url()),
            Binding::Paos.uri(),
            escape(&self.acs_url()),
        )
    }
}

impl AuthSource for SpSource {
    fn id(&self) -> &str {
        &self.id
    }

    fn authenticate(&self, mut state: AuthState, _ctx: &RequestContext) -> Result<SourceOutcome> {
        state.auth_source_id = Some(self.id.clone());

        let dispatch = match self.resolve_idp(&state)? {
            IdpChoice::Single(idp) => self.start_sso(&idp, state)?,
            IdpChoice::Discovery(_) if state.is_ecp() => {
                // The ECP client cannot be sent through discovery.
                return Err(AuthFailure::NoAvailableIdp.into());
            }
            IdpChoice::Discovery(candidates) => self.start_disco(state, &candidates)?,
        };
        Ok(SourceOutcome::Suspended(dispatch))
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
