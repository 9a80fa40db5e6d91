//! SAML 2.0 Service Provider support.
//!
//! Builds and signs AuthnRequests, resolves IdP metadata and consumes the
//! IdP's response. Everything flows through the `saml:SP` source in
//! [`provider`].

pub mod authn_request;
pub mod bindings;
pub mod canonical;
pub mod config;
pub mod constants;
pub mod metadata;
pub mod provider;
pub mod signature;

pub use authn_request::{AuthnRequest, RequestedAuthnContext, Scoping};
pub use config::{NameIdPolicy, SpConfig};
pub use constants::{AuthnContextComparison, Binding};
pub use metadata::{Endpoint, IdpMetadata, MetadataResolver, StaticMetadataResolver};
pub use provider::{IdpChoice, SpSource, SSO_STAGE};
pub use signature::{
    sign_enveloped, AcceptUnsigned, RequestSigner, ResponseVerifier, RsaSha256Signer,
};
