//! Inbound request context.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use std::collections::HashMap;

/// The parts of an inbound HTTP request the core needs.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    pub method: String,
    pub path: String,
    pub headers: HashMap<String, Vec<String>>,
}

/// Credentials presented through HTTP Basic authentication.
///
/// Either half may be missing: a header without a colon carries only a
/// username, and an empty username is treated as absent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BasicCredentials {
    pub username: Option<String>,
    pub password: Option<String>,
}

impl RequestContext {
    pub fn new(method: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            path: path.into(),
            headers: HashMap::new(),
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers
            .entry(name.into())
            .or_default()
            .push(value.into());
        self
    }

    /// First value of a header (case-insensitive).
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .and_then(|(_, values)| values.first())
            .map(|s| s.as_str())
    }

    /// Decode HTTP Basic credentials from the `Authorization` header.
    pub fn basic_credentials(&self) -> BasicCredentials {
        let Some(header) = self.header("authorization") else {
            return BasicCredentials::default();
        };
        let Some((scheme, encoded)) = header.split_once(' ') else {
            return BasicCredentials::default();
        };
        if !scheme.eq_ignore_ascii_case("basic") {
            return BasicCredentials::default();
        }

        let decoded = match BASE64
            .decode(encoded.trim())
            .ok()
            .and_then(|bytes| String::from_utf8(bytes).ok())
        {
            Some(decoded) => decoded,
            None => return BasicCredentials::default(),
        };

        let (username, password) = match decoded.split_once(':') {
            Some((user, pass)) => (user.to_string(), Some(pass.to_string())),
            None => (decoded, None),
        };

        BasicCredentials {
            username: Some(username).filter(|u| !u.is_empty()),
            password,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn with_auth(value: &str) -> RequestContext {
        RequestContext::new("GET", "/").with_header("Authorization", value)
    }

    #[test]
    fn test_header_lookup_is_case_insensitive() {
        let ctx = RequestContext::new("GET", "/").with_header("Content-Type", "text/xml");
        assert_eq!(ctx.header("content-type"), Some("text/xml"));
        assert_eq!(ctx.header("accept"), None);
    }

    #[test]
    fn test_basic_credentials() {
        let ctx = with_auth(&format!("Basic {}", BASE64.encode("username:password")));
        let creds = ctx.basic_credentials();
        assert_eq!(creds.username.as_deref(), Some("username"));
        assert_eq!(creds.password.as_deref(), Some("password"));
    }

    #[test]
    fn test_password_may_contain_colon() {
        let ctx = with_auth(&format!("basic {}", BASE64.encode("user:pa:ss")));
        assert_eq!(ctx.basic_credentials().password.as_deref(), Some("pa:ss"));
    }

    #[test]
    fn test_missing_username() {
        let ctx = with_auth(&format!("Basic {}", BASE64.encode(":password")));
        let creds = ctx.basic_credentials();
        assert!(creds.username.is_none());
        assert_eq!(creds.password.as_deref(), Some("password"));
    }

    #[test]
    fn test_missing_password() {
        let ctx = with_auth(&format!("Basic {}", BASE64.encode("username")));
        let creds = ctx.basic_credentials();
        assert_eq!(creds.username.as_deref(), Some("username"));
        assert!(creds.password.is_none());
    }

    #[test]
    fn test_no_or_foreign_authorization() {
        assert_eq!(
            RequestContext::new("GET", "/").basic_credentials(),
            BasicCredentials::default()
        );
        assert_eq!(with_auth("Bearer abc").basic_credentials(), BasicCredentials::default());
        assert_eq!(with_auth("Basic !!!").basic_credentials(), BasicCredentials::default());
    }
}
