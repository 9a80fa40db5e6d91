//! Sentinel Federation Gateway
//!
//! Authentication orchestration core of a SAML federation gateway:
//! pluggable authentication sources (SAML Service Provider, username and
//! password), IdP resolution with discovery, and a post-authentication
//! processing chain. Suspended flows are persisted in a state store and
//! resumed through the [`gateway::Gateway`] entry points.

pub mod config;
pub mod error;
pub mod gateway;
pub mod http;
pub mod process;
pub mod saml;
pub mod source;
pub mod state;

#[cfg(test)]
pub(crate) mod testing;

pub use config::GatewayConfig;
pub use error::{AuthFailure, Error, Result};
pub use gateway::{AuthFlow, Gateway, GatewayParts};
