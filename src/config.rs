//! Gateway configuration, loaded from a JSON file.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::{Error, Result};
use crate::saml::{IdpMetadata, SpConfig, StaticMetadataResolver};
use crate::source::UserPassConfig;
use crate::state::{DEFAULT_CLEANUP_INTERVAL_SECS, DEFAULT_STATE_TTL_SECS, MAX_STATE_TTL_SECS};

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GatewayConfig {
    /// Public base URL of the gateway, e.g. `https://gw.example.org`.
    pub base_url: String,

    #[serde(default = "default_state_store_path")]
    pub state_store_path: PathBuf,

    /// Lifetime of a suspended authentication.
    #[serde(default = "default_state_ttl")]
    pub state_ttl_secs: u64,

    #[serde(default = "default_cleanup_interval")]
    pub cleanup_interval_secs: u64,

    /// Authentication sources by ID.
    #[serde(default)]
    pub sources: BTreeMap<String, SourceConfig>,

    #[serde(default)]
    pub metadata: MetadataConfig,

    /// Filters run after every successful authentication.
    #[serde(default)]
    pub processing_filters: Vec<FilterConfig>,

    #[serde(default)]
    pub signing: Option<SigningConfig>,
}

fn default_state_store_path() -> PathBuf {
    PathBuf::from("/var/lib/sentinel-federation/state.redb")
}

fn default_state_ttl() -> u64 {
    DEFAULT_STATE_TTL_SECS
}

fn default_cleanup_interval() -> u64 {
    DEFAULT_CLEANUP_INTERVAL_SECS
}

/// One authentication source, tagged by its type name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum SourceConfig {
    #[serde(rename = "saml:SP")]
    SamlSp(SpConfig),
    #[serde(rename = "core:UserPass")]
    UserPass(UserPassConfig),
}

impl SourceConfig {
    pub fn type_name(&self) -> &'static str {
        match self {
            SourceConfig::SamlSp(_) => "saml:SP",
            SourceConfig::UserPass(_) => "core:UserPass",
        }
    }
}

/// Remote IdP metadata.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MetadataConfig {
    /// Inline IdP entries.
    #[serde(default)]
    pub idps: Vec<IdpMetadata>,

    /// SAML metadata XML files.
    #[serde(default)]
    pub files: Vec<PathBuf>,
}

impl MetadataConfig {
    /// Build the resolver. Files are read relative to `base_dir`.
    pub fn resolver(&self, base_dir: &Path) -> Result<StaticMetadataResolver> {
        let mut resolver = StaticMetadataResolver::from_entries(self.idps.iter().cloned());
        for file in &self.files {
            let path = base_dir.join(file);
            resolver.load_file(&path)?;
            debug!(path = %path.display(), "Loaded IdP metadata");
        }
        Ok(resolver)
    }
}

/// A processing filter entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FilterConfig {
    /// Filter class, e.g. `core:Cardinality`.
    pub class: String,

    #[serde(default)]
    pub config: serde_json::Value,
}

/// SP signing key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SigningConfig {
    /// PKCS#8 PEM private key.
    pub key_path: PathBuf,
}

impl GatewayConfig {
    /// Minimal configuration with no sources.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            state_store_path: default_state_store_path(),
            state_ttl_secs: DEFAULT_STATE_TTL_SECS,
            cleanup_interval_secs: DEFAULT_CLEANUP_INTERVAL_SECS,
            sources: BTreeMap::new(),
            metadata: MetadataConfig::default(),
            processing_filters: Vec::new(),
            signing: None,
        }
    }

    /// Read, parse and validate a configuration file.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            Error::config(format!("Failed to read {}: {e}", path.display()))
        })?;
        let config: Self = serde_json::from_str(&raw).map_err(|e| {
            Error::config(format!("Invalid configuration in {}: {e}", path.display()))
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let url = url::Url::parse(&self.base_url)
            .map_err(|e| Error::config(format!("Invalid base_url {}: {e}", self.base_url)))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(Error::config(format!(
                "base_url must be http or https: {}",
                self.base_url
            )));
        }

        if self.state_ttl_secs == 0 {
            return Err(Error::config("state_ttl_secs must be positive"));
        }
        if self.state_ttl_secs > MAX_STATE_TTL_SECS {
            return Err(Error::config(format!(
                "state_ttl_secs must not exceed {MAX_STATE_TTL_SECS}"
            )));
        }
        if self.cleanup_interval_secs == 0 {
            return Err(Error::config("cleanup_interval_secs must be positive"));
        }

        for (id, source) in &self.sources {
            if id.is_empty() {
                return Err(Error::config("Authentication source IDs must not be empty"));
            }
            if let SourceConfig::SamlSp(sp) = source {
                sp.validate()
                    .map_err(|e| Error::config(format!("Source {id}: {e}")))?;
            }
        }

        for filter in &self.processing_filters {
            if filter.class.is_empty() {
                return Err(Error::config("Processing filter class must not be empty"));
            }
        }

        Ok(())
    }
}
