//! Authentication state types persisted between round trips.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::saml::constants::PAOS_BINDING;

/// Attribute name to ordered values. Values may repeat.
pub type AttributeSet = BTreeMap<String, Vec<String>>;

/// Opaque state identifier (20 random bytes, hex-encoded, `_`-prefixed).
///
/// The prefix keeps the value a valid XML NCName so it can double as the
/// AuthnRequest `ID`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StateId(String);

impl StateId {
    const BYTES: usize = 20;

    /// Generate a new random state ID.
    pub fn generate() -> Self {
        let bytes: [u8; Self::BYTES] = rand::random();
        Self(format!("_{}", hex::encode(bytes)))
    }

    /// Parse an ID received from a client.
    pub fn parse(s: &str) -> Option<Self> {
        let hex_part = s.strip_prefix('_')?;
        let bytes = hex::decode(hex_part).ok()?;
        if bytes.len() != Self::BYTES {
            return None;
        }
        Some(Self(s.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for StateId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A state ID together with the stage it was persisted under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResumptionToken {
    pub id: StateId,
    pub stage: String,
}

impl ResumptionToken {
    pub fn new(id: StateId, stage: impl Into<String>) -> Self {
        Self {
            id,
            stage: stage.into(),
        }
    }
}

/// SAML NameID value with its optional format URI.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NameId {
    pub value: String,
    pub format: Option<String>,
}

impl NameId {
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            format: None,
        }
    }

    pub fn with_format(mut self, format: impl Into<String>) -> Self {
        self.format = Some(format.into());
        self
    }
}

/// Position of the processing chain, persisted while a filter has it suspended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainPosition {
    /// Index of the next filter to run.
    pub next: usize,
}

/// One attribute that failed its cardinality bounds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CardinalityViolation {
    pub attribute: String,
    pub count: usize,
    pub min: Option<u64>,
    pub max: Option<u64>,
}

/// In-flight authentication context.
///
/// Created when the application asks for authentication, mutated by the
/// source and the filters, and persisted at every suspension point.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthState {
    /// Source that owns this authentication.
    pub auth_source_id: Option<String>,

    /// Username that replaces whatever the user presents.
    pub forced_username: Option<String>,

    /// NameID to request from the IdP.
    pub requested_name_id: Option<NameId>,

    pub authn_context_class_ref: Option<String>,
    pub authn_context_comparison: Option<String>,
    pub force_authn: Option<bool>,
    pub is_passive: Option<bool>,

    /// IdPs the requester allows.
    pub idp_list: Option<Vec<String>>,

    /// IdP named directly by the relying application.
    pub forced_idp: Option<String>,

    pub proxy_count: Option<u32>,
    pub requester_ids: Vec<String>,

    /// Binding hint; the PAOS binding selects ECP mode.
    pub binding: Option<String>,

    /// Where the user goes once authentication completes (RelayState).
    pub return_url: Option<String>,

    /// IdP we sent the AuthnRequest to.
    pub expected_issuer: Option<String>,

    /// Entity the assertion came from.
    pub source_entity_id: Option<String>,

    /// NameID asserted by the IdP.
    pub subject: Option<NameId>,

    pub attributes: AttributeSet,

    pub processing: Option<ChainPosition>,

    pub cardinality_errors: Vec<CardinalityViolation>,

    /// Keys the core does not interpret.
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl AuthState {
    pub fn new(auth_source_id: impl Into<String>) -> Self {
        Self {
            auth_source_id: Some(auth_source_id.into()),
            ..Self::default()
        }
    }

    /// ECP mode is selected by the PAOS binding hint.
    pub fn is_ecp(&self) -> bool {
        self.binding.as_deref() == Some(PAOS_BINDING)
    }

    pub fn is_passive(&self) -> bool {
        self.is_passive.unwrap_or(false)
    }

    /// Number of values for an attribute, 0 when absent.
    pub fn attribute_count(&self, name: &str) -> usize {
        self.attributes.get(name).map_or(0, Vec::len)
    }
}

/// Record stored by a state store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredState {
    pub stage: String,
    pub state: AuthState,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl StoredState {
    pub fn new(state: AuthState, stage: &str, ttl_secs: u64) -> Self {
        let now = Utc::now();
        Self {
            stage: stage.to_string(),
            state,
            created_at: now,
            expires_at: expiry(now, ttl_secs),
        }
    }

    pub fn is_expired(&self) -> bool {
        Utc::now() > self.expires_at
    }
}

/// `now + ttl_secs`, saturating at the latest representable time.
fn expiry(now: DateTime<Utc>, ttl_secs: u64) -> DateTime<Utc> {
    i64::try_from(ttl_secs)
        .ok()
        .and_then(chrono::Duration::try_seconds)
        .and_then(|ttl| now.checked_add_signed(ttl))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_id_roundtrip() {
        let id = StateId::generate();
        assert!(id.as_str().starts_with('_'));
        assert_eq!(id.as_str().len(), 41);
        assert_eq!(StateId::parse(id.as_str()), Some(id));
    }

    #[test]
    fn test_state_id_rejects_invalid() {
        assert!(StateId::parse("").is_none());
        assert!(StateId::parse("abcd").is_none());
        assert!(StateId::parse("_abcd").is_none());
        assert!(StateId::parse("_not-valid-hex").is_none());
        let unprefixed = hex::encode([7u8; 20]);
        assert!(StateId::parse(&unprefixed).is_none());
    }

    #[test]
    fn test_ecp_mode_detection() {
        let mut state = AuthState::new("ecp-source");
        assert!(!state.is_ecp());
        state.binding = Some(PAOS_BINDING.to_string());
        assert!(state.is_ecp());
    }

    #[test]
    fn test_attribute_count() {
        let mut state = AuthState::default();
        state.attributes.insert(
            "mail".to_string(),
            vec!["a@example.org".to_string(), "a@example.org".to_string()],
        );
        assert_eq!(state.attribute_count("mail"), 2);
        assert_eq!(state.attribute_count("cn"), 0);
    }

    #[test]
    fn test_stored_state_expiry() {
        let mut stored = StoredState::new(AuthState::default(), "saml:sp:sso", 3600);
        assert!(!stored.is_expired());
        stored.expires_at = Utc::now() - chrono::Duration::seconds(10);
        assert!(stored.is_expired());
    }

    #[test]
    fn test_huge_ttl_saturates() {
        for ttl in [u64::MAX, i64::MAX as u64, 10_000_000_000_000_000] {
            let stored = StoredState::new(AuthState::default(), "saml:sp:sso", ttl);
            assert!(!stored.is_expired());
            assert!(stored.expires_at > stored.created_at);
        }
    }

    #[test]
    fn test_state_survives_messagepack() {
        let mut state = AuthState::new("default-sp");
        state.extra.insert("saml:RelayState".to_string(), serde_json::json!("x"));
        state.processing = Some(ChainPosition { next: 3 });
        let bytes = rmp_serde::to_vec_named(&state).unwrap();
        let decoded: AuthState = rmp_serde::from_slice(&bytes).unwrap();
        assert_eq!(decoded, state);
    }
}
