//! SAML 2.0 URIs used by the gateway.

/// SAML 2.0 assertion namespace.
pub const SAML_NS: &str = "urn:oasis:names:tc:SAML:2.0:assertion";

/// SAML 2.0 protocol namespace.
pub const SAMLP_NS: &str = "urn:oasis:names:tc:SAML:2.0:protocol";

pub const SOAP_ENV_NS: &str = "http://schemas.xmlsoap.org/soap/envelope/";
pub const PAOS_NS: &str = "urn:liberty:paos:2003-08";
pub const ECP_NS: &str = "urn:oasis:names:tc:SAML:2.0:profiles:SSO:ecp";

pub const HTTP_REDIRECT_BINDING: &str = "urn:oasis:names:tc:SAML:2.0:bindings:HTTP-Redirect";
pub const HTTP_POST_BINDING: &str = "urn:oasis:names:tc:SAML:2.0:bindings:HTTP-POST";
pub const SOAP_BINDING: &str = "urn:oasis:names:tc:SAML:2.0:bindings:SOAP";
pub const PAOS_BINDING: &str = "urn:oasis:names:tc:SAML:2.0:bindings:PAOS";

/// Top-level success status code.
pub const STATUS_SUCCESS: &str = "urn:oasis:names:tc:SAML:2.0:status:Success";

pub const RSA_SHA256_SIG_ALG: &str = "http://www.w3.org/2001/04/xmldsig-more#rsa-sha256";

pub const XMLDSIG_NS: &str = "http://www.w3.org/2000/09/xmldsig#";
pub const ENVELOPED_SIGNATURE_TRANSFORM: &str = "http://www.w3.org/2000/09/xmldsig#enveloped-signature";
pub const SHA256_DIGEST: &str = "http://www.w3.org/2001/04/xmlenc#sha256";

// ============================================================================
// Bindings
// ============================================================================

/// Bindings the gateway can send an AuthnRequest over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Binding {
    HttpRedirect,
    HttpPost,
    /// IdP-side SOAP endpoint, reached through an ECP client.
    Soap,
    /// Reverse SOAP towards the ECP client.
    Paos,
}

impl Binding {
    #[must_use]
    pub const fn uri(&self) -> &'static str {
        match self {
            Self::HttpRedirect => HTTP_REDIRECT_BINDING,
            Self::HttpPost => HTTP_POST_BINDING,
            Self::Soap => SOAP_BINDING,
            Self::Paos => PAOS_BINDING,
        }
    }

    #[must_use]
    pub fn from_uri(uri: &str) -> Option<Self> {
        match uri {
            HTTP_REDIRECT_BINDING => Some(Self::HttpRedirect),
            HTTP_POST_BINDING => Some(Self::HttpPost),
            SOAP_BINDING => Some(Self::Soap),
            PAOS_BINDING => Some(Self::Paos),
            _ => None,
        }
    }

    /// Browser bindings usable for interactive SSO.
    #[must_use]
    pub const fn is_front_channel(&self) -> bool {
        matches!(self, Self::HttpRedirect | Self::HttpPost)
    }
}

impl std::fmt::Display for Binding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.uri())
    }
}

// ============================================================================
// Authentication context
// ============================================================================

/// Comparison attribute of `RequestedAuthnContext`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum AuthnContextComparison {
    #[default]
    Exact,
    Minimum,
    Maximum,
    Better,
}

impl AuthnContextComparison {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Exact => "exact",
            Self::Minimum => "minimum",
            Self::Maximum => "maximum",
            Self::Better => "better",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "exact" => Some(Self::Exact),
            "minimum" => Some(Self::Minimum),
            "maximum" => Some(Self::Maximum),
            "better" => Some(Self::Better),
            _ => None,
        }
    }
}
