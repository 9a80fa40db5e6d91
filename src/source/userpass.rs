//! Username/password authentication source.

use serde::{Deserialize, Serialize};
use std::any::Any;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use subtle::ConstantTimeEq;
use tracing::{debug, info, warn};

use super::{AuthSource, SourceOutcome, SourceServices};
use crate::error::{AuthFailure, Error, Result};
use crate::http::{BindingSender, RequestContext};
use crate::state::{AttributeSet, AuthState, StateId, StateStore};

/// Stage the state is persisted under while the login form is shown.
pub const USERPASS_STAGE: &str = "core:UserPassBase";

/// Verifies a username and password and returns the user's attributes.
pub trait LoginBackend: Send + Sync {
    /// Wrong credentials fail with `AuthFailure::WrongUserPass`.
    fn login(&self, username: &str, password: &str) -> Result<AttributeSet>;
}

/// Configuration of one `core:UserPass` source.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UserPassConfig {
    /// Username that replaces whatever the user types.
    #[serde(default)]
    pub forced_username: Option<String>,

    /// `username:password` to attributes.
    #[serde(default)]
    pub users: BTreeMap<String, AttributeSet>,
}

struct StaticUser {
    password: String,
    attributes: AttributeSet,
}

/// Users listed in configuration.
pub struct StaticUserBackend {
    users: HashMap<String, StaticUser>,
}

impl StaticUserBackend {
    /// Build from `username:password` keys.
    pub fn from_entries(entries: &BTreeMap<String, AttributeSet>) -> Result<Self> {
        let mut users = HashMap::new();
        for (key, attributes) in entries {
            let (username, password) = key.split_once(':').ok_or_else(|| {
                Error::config(format!(
                    "Invalid user entry {key:?}: expected username:password"
                ))
            })?;
            if username.is_empty() {
                return Err(Error::config("Invalid user entry: empty username"));
            }
            users.insert(
                username.to_string(),
                StaticUser {
                    password: password.to_string(),
                    attributes: attributes.clone(),
                },
            );
        }
        Ok(Self { users })
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }
}

impl LoginBackend for StaticUserBackend {
    fn login(&self, username: &str, password: &str) -> Result<AttributeSet> {
        let Some(user) = self.users.get(username) else {
            return Err(AuthFailure::WrongUserPass.into());
        };
        if !bool::from(user.password.as_bytes().ct_eq(password.as_bytes())) {
            return Err(AuthFailure::WrongUserPass.into());
        }
        Ok(user.attributes.clone())
    }
}

/// Source that checks a username and password.
///
/// In ECP mode the credentials come from HTTP Basic authentication and the
/// source never suspends. Otherwise the user is sent to the login form and
/// the form post comes back through [`UserPassSource::handle_login`].
pub struct UserPassSource {
    id: String,
    forced_username: Option<String>,
    backend: Arc<dyn LoginBackend>,
    base_url: String,
    store: Arc<dyn StateStore>,
    sender: Arc<dyn BindingSender>,
}

impl UserPassSource {
    pub fn new(
        id: String,
        backend: Arc<dyn LoginBackend>,
        forced_username: Option<String>,
        services: &SourceServices,
    ) -> Self {
        Self {
            id,
            forced_username,
            backend,
            base_url: services.base_url.trim_end_matches('/').to_string(),
            store: Arc::clone(&services.store),
            sender: Arc::clone(&services.sender),
        }
    }

    pub fn from_config(id: String, config: &UserPassConfig, services: &SourceServices) -> Result<Self> {
        let backend = StaticUserBackend::from_entries(&config.users)?;
        Ok(Self::new(
            id,
            Arc::new(backend),
            config.forced_username.clone(),
            services,
        ))
    }

    pub fn login_url(&self) -> String {
        format!("{}/core/loginuserpass", self.base_url)
    }

    /// Resume after the login form was posted.
    pub fn handle_login(&self, id: &StateId, username: &str, password: &str) -> Result<AuthState> {
        let state = self.store.take(id, USERPASS_STAGE)?;
        self.complete_login(state, username, password)
    }

    /// Check the posted credentials for a state already taken from the store.
    pub fn complete_login(&self, mut state: AuthState, username: &str, password: &str) -> Result<AuthState> {
        let username = state
            .forced_username
            .clone()
            .or_else(|| self.forced_username.clone())
            .unwrap_or_else(|| username.to_string());

        state.attributes = self.login(&username, password)?;
        Ok(state)
    }

    fn login(&self, username: &str, password: &str) -> Result<AttributeSet> {
        match self.backend.login(username, password) {
            Ok(attributes) => {
                info!(auth_id = %self.id, username = %username, "User logged in");
                Ok(attributes)
            }
            Err(e) => {
                warn!(auth_id = %self.id, username = %username, error = %e, "Login failed");
                Err(e)
            }
        }
    }
}

impl AuthSource for UserPassSource {
    fn id(&self) -> &str {
        &self.id
    }

    fn authenticate(&self, mut state: AuthState, ctx: &RequestContext) -> Result<SourceOutcome> {
        state.auth_source_id = Some(self.id.clone());
        if let Some(ref forced) = self.forced_username {
            state.forced_username = Some(forced.clone());
        }

        if state.is_ecp() {
            let credentials = ctx.basic_credentials();
            let (Some(username), Some(password)) = (credentials.username, credentials.password)
            else {
                debug!(auth_id = %self.id, "ECP request without complete credentials");
                return Err(AuthFailure::WrongUserPass.into());
            };

            let username = state.forced_username.clone().unwrap_or(username);
            state.attributes = self.login(&username, &password)?;
            return Ok(SourceOutcome::Completed(state));
        }

        if state.is_passive() {
            return Err(AuthFailure::NoPassive.into());
        }

        let token = self.store.persist(&state, USERPASS_STAGE)?;
        let dispatch = self.sender.redirect(
            &self.login_url(),
            &[("AuthState".to_string(), token.to_string())],
        )?;
        debug!(auth_id = %self.id, state_id = %token, "Redirecting to login form");
        Ok(SourceOutcome::Suspended(dispatch))
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StateError;
    use crate::saml::constants::PAOS_BINDING;
    use crate::testing::{self, RecordingBackend};
    use base64::{engine::general_purpose::STANDARD as BASE64, Engine};

    fn ecp_state() -> AuthState {
        let mut state = AuthState::new("userpass");
        state.binding = Some(PAOS_BINDING.to_string());
        state
    }

    fn basic(value: &str) -> RequestContext {
        RequestContext::new("POST", "/ecp")
            .with_header("Authorization", format!("Basic {}", BASE64.encode(value)))
    }

    fn source(backend: Arc<RecordingBackend>, forced: Option<&str>) -> UserPassSource {
        UserPassSource::new(
            "userpass".to_string(),
            backend,
            forced.map(str::to_string),
            &testing::services(),
        )
    }

    #[test]
    fn test_ecp_passes_credentials_through() {
        let backend = Arc::new(RecordingBackend::accepting("username", "password"));
        let outcome = source(backend.clone(), None)
            .authenticate(ecp_state(), &basic("username:password"))
            .unwrap();

        let SourceOutcome::Completed(state) = outcome else {
            panic!("ECP must not suspend");
        };
        assert_eq!(state.attributes["username"], vec!["username".to_string()]);
        assert_eq!(backend.calls(), vec![("username".to_string(), "password".to_string())]);
    }

    #[test]
    fn test_ecp_forced_username_wins() {
        let backend = Arc::new(RecordingBackend::accepting("forcedUsername", "password"));
        let outcome = source(backend.clone(), Some("forcedUsername"))
            .authenticate(ecp_state(), &basic("username:password"))
            .unwrap();

        assert!(matches!(outcome, SourceOutcome::Completed(_)));
        assert_eq!(backend.calls()[0].0, "forcedUsername");
    }

    #[test]
    fn test_ecp_missing_username() {
        let backend = Arc::new(RecordingBackend::accepting("username", "password"));
        let err = source(backend.clone(), None)
            .authenticate(ecp_state(), &basic(":password"))
            .unwrap_err();
        assert_eq!(err.code(), Some("WRONGUSERPASS"));
        assert!(backend.calls().is_empty());
    }

    #[test]
    fn test_ecp_missing_password() {
        let backend = Arc::new(RecordingBackend::accepting("username", "password"));
        let err = source(backend.clone(), None)
            .authenticate(ecp_state(), &basic("username"))
            .unwrap_err();
        assert_eq!(err.code(), Some("WRONGUSERPASS"));
        assert!(backend.calls().is_empty());
    }

    #[test]
    fn test_ecp_without_authorization_header() {
        let backend = Arc::new(RecordingBackend::accepting("username", "password"));
        let err = source(backend, None)
            .authenticate(ecp_state(), &RequestContext::new("POST", "/ecp"))
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Authentication(AuthFailure::WrongUserPass)
        ));
    }

    #[test]
    fn test_interactive_login_roundtrip() {
        let services = testing::services();
        let backend = Arc::new(RecordingBackend::accepting("forced", "pw"));
        let source = UserPassSource::new(
            "userpass".to_string(),
            backend.clone(),
            Some("forced".to_string()),
            &services,
        );

        let outcome = source
            .authenticate(AuthState::new("userpass"), &RequestContext::new("GET", "/"))
            .unwrap();
        let SourceOutcome::Suspended(dispatch) = outcome else {
            panic!("interactive login must suspend");
        };
        let location = dispatch.location().unwrap().to_string();
        assert!(location.starts_with("https://gw.example.org/core/loginuserpass?AuthState=_"));

        let token = location.split("AuthState=").nth(1).unwrap();
        let id = StateId::parse(token).unwrap();

        let state = source.handle_login(&id, "typed-by-user", "pw").unwrap();
        assert_eq!(backend.calls()[0].0, "forced");
        assert_eq!(state.auth_source_id.as_deref(), Some("userpass"));

        // Tokens are single use
        let err = source.handle_login(&id, "forced", "pw").unwrap_err();
        assert!(matches!(err, Error::State(StateError::NotFound)));
    }

    #[test]
    fn test_interactive_wrong_password_consumes_state() {
        let services = testing::services();
        let source = UserPassSource::from_config(
            "userpass".to_string(),
            &UserPassConfig {
                forced_username: None,
                users: BTreeMap::from([(
                    "alice:secret".to_string(),
                    AttributeSet::from([("uid".to_string(), vec!["alice".to_string()])]),
                )]),
            },
            &services,
        )
        .unwrap();

        let id = services.store.persist(&AuthState::new("userpass"), USERPASS_STAGE).unwrap();
        let err = source.handle_login(&id, "alice", "wrong").unwrap_err();
        assert_eq!(err.code(), Some("WRONGUSERPASS"));
        assert!(services.store.is_empty().unwrap());
    }

    #[test]
    fn test_passive_interactive_fails() {
        let backend = Arc::new(RecordingBackend::accepting("u", "p"));
        let mut state = AuthState::new("userpass");
        state.is_passive = Some(true);
        let err = source(backend, None)
            .authenticate(state, &RequestContext::new("GET", "/"))
            .unwrap_err();
        assert_eq!(err.code(), Some("NOPASSIVE"));
    }

    #[test]
    fn test_static_backend() {
        let backend = StaticUserBackend::from_entries(&BTreeMap::from([(
            "alice:s3:cret".to_string(),
            AttributeSet::from([("uid".to_string(), vec!["alice".to_string()])]),
        )]))
        .unwrap();

        assert_eq!(backend.login("alice", "s3:cret").unwrap()["uid"], vec!["alice"]);
        assert!(backend.login("alice", "s3:cre").is_err());
        assert!(backend.login("bob", "s3:cret").is_err());
    }

    #[test]
    fn test_static_backend_rejects_bad_entries() {
        let err = StaticUserBackend::from_entries(&BTreeMap::from([(
            "no-colon".to_string(),
            AttributeSet::new(),
        )]))
        .err()
        .unwrap();
        assert!(matches!(err, Error::Config(_)));
    }
}
