//! SAML Service Provider source configuration.

use serde::{Deserialize, Serialize};

use super::constants::AuthnContextComparison;
use crate::error::{Error, Result};

/// Requested `NameIDPolicy`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NameIdPolicy {
    pub format: String,

    #[serde(default = "default_true")]
    pub allow_create: bool,
}

/// Configuration of one `saml:SP` authentication source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SpConfig {
    /// SP entity ID (defaults to `<base_url>/saml/sp/metadata/<auth_id>`).
    #[serde(default)]
    pub entity_id: Option<String>,

    /// Static IdP. When unset, discovery picks one.
    #[serde(default)]
    pub idp: Option<String>,

    /// Discovery service URL (defaults to `<base_url>/saml/disco`).
    #[serde(default)]
    pub disco_url: Option<String>,

    #[serde(default)]
    pub name_id_policy: Option<NameIdPolicy>,

    #[serde(default)]
    pub authn_context_class_ref: Option<String>,

    /// `exact`, `minimum`, `maximum` or `better`.
    #[serde(default)]
    pub authn_context_comparison: Option<String>,

    #[serde(default)]
    pub force_authn: bool,

    #[serde(default)]
    pub is_passive: bool,

    #[serde(default)]
    pub provider_name: Option<String>,

    /// IdPs always listed in Scoping.
    #[serde(default)]
    pub idp_list: Vec<String>,

    #[serde(default)]
    pub proxy_count: Option<u32>,

    /// Never send a Scoping element.
    #[serde(default)]
    pub disable_scoping: bool,

    #[serde(default)]
    pub requester_id: Vec<String>,

    /// Sign AuthnRequests with the gateway key.
    #[serde(default = "default_true")]
    pub sign_authn_request: bool,

    /// Clock skew tolerance in seconds.
    #[serde(default = "default_clock_skew")]
    pub clock_skew_secs: i64,
}

fn default_true() -> bool {
    true
}

fn default_clock_skew() -> i64 {
    300 // 5 minutes
}

impl Default for SpConfig {
    fn default() -> Self {
        Self {
            entity_id: None,
            idp: None,
            disco_url: None,
            name_id_policy: None,
            authn_context_class_ref: None,
            authn_context_comparison: None,
            force_authn: false,
            is_passive: false,
            provider_name: None,
            idp_list: Vec::new(),
            proxy_count: None,
            disable_scoping: false,
            requester_id: Vec::new(),
            sign_authn_request: true,
            clock_skew_secs: default_clock_skew(),
        }
    }
}

impl SpConfig {
    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if matches!(self.entity_id.as_deref(), Some("")) {
            return Err(Error::config("saml:SP entity_id must not be empty"));
        }

        if matches!(self.idp.as_deref(), Some("")) {
            return Err(Error::config("saml:SP idp must not be empty"));
        }

        if let Some(ref comparison) = self.authn_context_comparison {
            if AuthnContextComparison::parse(comparison).is_none() {
                return Err(Error::config(format!(
                    "Invalid AuthnContextComparison: {comparison}"
                )));
            }
        }

        if self.clock_skew_secs < 0 {
            return Err(Error::config("clock_skew_secs must not be negative"));
        }

        Ok(())
    }

    pub fn entity_id(&self, base_url: &str, auth_id: &str) -> String {
        self.entity_id
            .clone()
            .unwrap_or_else(|| format!("{}/saml/sp/metadata/{}", trim(base_url), auth_id))
    }

    pub fn acs_url(&self, base_url: &str, auth_id: &str) -> String {
        format!("{}/saml/sp/acs/{}", trim(base_url), auth_id)
    }

    pub fn disco_url(&self, base_url: &str) -> String {
        self.disco_url
            .clone()
            .unwrap_or_else(|| format!("{}/saml/disco", trim(base_url)))
    }

    pub fn comparison(&self) -> AuthnContextComparison {
        self.authn_context_comparison
            .as_deref()
            .and_then(AuthnContextComparison::parse)
            .unwrap_or_default()
    }
}

fn trim(base_url: &str) -> &str {
    base_url.trim_end_matches('/')
}
