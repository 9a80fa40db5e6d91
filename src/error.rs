//! Error taxonomy for the authentication core.
//!
//! User-facing failures carry a fixed code and never name the entities
//! involved. Everything else is operator-visible.

use thiserror::Error;

/// Result alias used across the crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// User-facing authentication failure codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AuthFailure {
    /// Missing or wrong username/password.
    WrongUserPass,
    /// None of the IdPs the requester allows are known to us.
    NoSupportedIdp,
    /// The configured IdP is not among the ones the requester allows.
    NoAvailableIdp,
    /// Passive request that would need user interaction.
    NoPassive,
    /// The IdP answered with a non-success status.
    ResponseStatus,
}

impl AuthFailure {
    /// Stable code shown on the error page.
    pub const fn code(&self) -> &'static str {
        match self {
            AuthFailure::WrongUserPass => "WRONGUSERPASS",
            AuthFailure::NoSupportedIdp => "NOSUPPORTEDIDP",
            AuthFailure::NoAvailableIdp => "NOAVAILABLEIDP",
            AuthFailure::NoPassive => "NOPASSIVE",
            AuthFailure::ResponseStatus => "RESPONSESTATUS",
        }
    }

    const fn message(&self) -> &'static str {
        match self {
            AuthFailure::WrongUserPass => "incorrect username or password",
            AuthFailure::NoSupportedIdp => "no supported identity provider",
            AuthFailure::NoAvailableIdp => "identity provider not available",
            AuthFailure::NoPassive => "passive authentication not possible",
            AuthFailure::ResponseStatus => "identity provider returned an error status",
        }
    }
}

impl std::fmt::Display for AuthFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.message(), self.code())
    }
}

/// Failures while turning an outbound message into an HTTP response.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Unsupported binding: {0}")]
    UnsupportedBinding(String),

    #[error("Failed to encode message: {0}")]
    Encoding(String),
}

/// State store failures.
#[derive(Debug, Error)]
pub enum StateError {
    #[error("State not found")]
    NotFound,

    #[error("State expired")]
    Expired,

    #[error("State stage mismatch: expected {expected}, found {found}")]
    StageMismatch { expected: String, found: String },

    #[error("State store failure: {0}")]
    Backend(#[from] anyhow::Error),
}

/// Top-level error for every public operation.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Authentication failed: {0}")]
    Authentication(AuthFailure),

    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    #[error(transparent)]
    State(#[from] StateError),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl Error {
    pub fn config(msg: impl Into<String>) -> Self {
        Error::Config(msg.into())
    }

    pub fn protocol(msg: impl Into<String>) -> Self {
        Error::Protocol(msg.into())
    }

    /// True when the error should be rendered on the end-user error page
    /// rather than as an operator-visible 500.
    pub fn is_user_facing(&self) -> bool {
        matches!(
            self,
            Error::Authentication(_)
                | Error::State(StateError::NotFound)
                | Error::State(StateError::Expired)
                | Error::State(StateError::StageMismatch { .. })
        )
    }

    /// Error code for user-facing failures.
    pub fn code(&self) -> Option<&'static str> {
        match self {
            Error::Authentication(failure) => Some(failure.code()),
            Error::State(StateError::NotFound)
            | Error::State(StateError::Expired)
            | Error::State(StateError::StageMismatch { .. }) => Some("NOSTATE"),
            _ => None,
        }
    }
}

impl From<AuthFailure> for Error {
    fn from(failure: AuthFailure) -> Self {
        Error::Authentication(failure)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auth_failure_codes() {
        let err: Error = AuthFailure::WrongUserPass.into();
        assert_eq!(err.code(), Some("WRONGUSERPASS"));
        assert!(err.is_user_facing());
        assert_eq!(Error::from(AuthFailure::NoPassive).code(), Some("NOPASSIVE"));
    }

    #[test]
    fn test_dispatch_error_is_not_user_facing() {
        let err: Error = DispatchError::InvalidUrl("smtp://invalidurl".to_string()).into();
        assert!(!err.is_user_facing());
        assert_eq!(err.code(), None);
        assert_eq!(err.to_string(), "Invalid URL: smtp://invalidurl");
    }

    #[test]
    fn test_state_errors_are_user_facing() {
        let err: Error = StateError::Expired.into();
        assert!(err.is_user_facing());
        assert_eq!(err.code(), Some("NOSTATE"));

        let backend: Error = StateError::Backend(anyhow::anyhow!("disk full")).into();
        assert!(!backend.is_user_facing());
    }

    #[test]
    fn test_config_message_is_preserved() {
        let err = Error::config("Minimum cardinality must be a positive integer");
        assert!(err.to_string().contains("Minimum cardinality"));
    }
}
