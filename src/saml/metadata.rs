//! Identity provider metadata and its resolution.

use samael::metadata::EntityDescriptor;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use tracing::debug;

use super::constants::Binding;
use crate::error::{Error, Result};

/// A protocol endpoint advertised by an IdP.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Endpoint {
    /// Binding URI.
    pub binding: String,
    pub location: String,
}

impl Endpoint {
    pub fn binding(&self) -> Option<Binding> {
        Binding::from_uri(&self.binding)
    }
}

/// What the core needs to know about one IdP. Read-only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct IdpMetadata {
    pub entity_id: String,

    /// SSO endpoints in metadata order.
    #[serde(default)]
    pub sso_endpoints: Vec<Endpoint>,

    /// Base64 DER certificates (signing and encryption).
    #[serde(default)]
    pub certificates: Vec<String>,

    /// Overrides the AuthnContextClassRef requested from this IdP.
    #[serde(default)]
    pub authn_context_class_ref: Option<String>,

    #[serde(default)]
    pub disable_scoping: bool,

    /// Extra IdPs to list in Scoping when sending to this IdP.
    #[serde(default)]
    pub idp_list: Vec<String>,

    #[serde(default)]
    pub proxy_count: Option<u32>,
}

impl IdpMetadata {
    pub fn new(entity_id: impl Into<String>) -> Self {
        Self {
            entity_id: entity_id.into(),
            sso_endpoints: Vec::new(),
            certificates: Vec::new(),
            authn_context_class_ref: None,
            disable_scoping: false,
            idp_list: Vec::new(),
            proxy_count: None,
        }
    }

    pub fn with_endpoint(mut self, binding: Binding, location: impl Into<String>) -> Self {
        self.sso_endpoints.push(Endpoint {
            binding: binding.uri().to_string(),
            location: location.into(),
        });
        self
    }

    /// First SSO endpoint, in metadata order, whose binding is accepted.
    pub fn find_endpoint(&self, accept: impl Fn(Binding) -> bool) -> Option<(Binding, &Endpoint)> {
        self.sso_endpoints.iter().find_map(|endpoint| {
            endpoint
                .binding()
                .filter(|binding| accept(*binding))
                .map(|binding| (binding, endpoint))
        })
    }

    /// Build from a SAML metadata `EntityDescriptor` document.
    pub fn from_xml(xml: &str) -> Result<Self> {
        let entity: EntityDescriptor = xml
            .parse()
            .map_err(|e| Error::config(format!("Failed to parse IdP metadata: {e}")))?;

        let entity_id = entity
            .entity_id
            .clone()
            .ok_or_else(|| Error::config("IdP metadata missing entityID"))?;

        let descriptor = entity
            .idp_sso_descriptors
            .as_ref()
            .and_then(|d| d.first())
            .ok_or_else(|| {
                Error::config(format!("IdP metadata for {entity_id} has no IDPSSODescriptor"))
            })?;

        let sso_endpoints = descriptor
            .single_sign_on_services
            .iter()
            .map(|s| Endpoint {
                binding: s.binding.clone(),
                location: s.location.clone(),
            })
            .collect();

        let certificates = descriptor
            .key_descriptors
            .iter()
            .filter_map(|kd| kd.key_info.x509_data.as_ref())
            .flat_map(|x509| x509.certificates.iter())
            .map(|cert| cert.split_whitespace().collect::<String>())
            .collect();

        Ok(Self {
            entity_id,
            sso_endpoints,
            certificates,
            ..Self::new(String::new())
        })
    }
}

/// Looks up IdP metadata by entity ID.
pub trait MetadataResolver: Send + Sync {
    fn resolve(&self, entity_id: &str) -> Option<IdpMetadata>;
}

/// Resolver over a fixed set of entries loaded at startup.
#[derive(Debug, Clone, Default)]
pub struct StaticMetadataResolver {
    entries: HashMap<String, IdpMetadata>,
}

impl StaticMetadataResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_entries(entries: impl IntoIterator<Item = IdpMetadata>) -> Self {
        let mut resolver = Self::new();
        for entry in entries {
            resolver.insert(entry);
        }
        resolver
    }

    pub fn insert(&mut self, metadata: IdpMetadata) {
        debug!(
            idp = %metadata.entity_id,
            endpoints = metadata.sso_endpoints.len(),
            "Registered IdP metadata"
        );
        self.entries.insert(metadata.entity_id.clone(), metadata);
    }

    pub fn load_xml(&mut self, xml: &str) -> Result<()> {
        self.insert(IdpMetadata::from_xml(xml)?);
        Ok(())
    }

    pub fn load_file(&mut self, path: &Path) -> Result<()> {
        let xml = std::fs::read_to_string(path).map_err(|e| {
            Error::config(format!("Failed to read metadata {}: {e}", path.display()))
        })?;
        self.load_xml(&xml)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl MetadataResolver for StaticMetadataResolver {
    fn resolve(&self, entity_id: &str) -> Option<IdpMetadata> {
        self.entries.get(entity_id).cloned()
    }
}
