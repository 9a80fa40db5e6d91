//! Outbound dispatch: turning an encoded SAML message or a plain redirect
//! into the HTTP response the transport writes.

use quick_xml::escape::escape;
use serde::Serialize;
use tracing::debug;
use url::Url;

use crate::error::DispatchError;
use crate::saml::constants::{Binding, ECP_NS, PAOS_NS, SOAP_ENV_NS};

/// A message ready to be delivered over a binding.
///
/// `parameters` are the binding's form/query fields, already encoded and
/// signed (`SAMLRequest`, `RelayState`, `SigAlg`, `Signature`). SOAP-style
/// bindings carry the raw XML in `body` instead.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    pub destination: String,
    pub binding: Binding,
    pub parameters: Vec<(String, String)>,
    pub body: Option<String>,
    /// Where the ECP client posts the IdP's answer.
    pub response_consumer_url: Option<String>,
}

/// What the transport should send back to the client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Dispatch {
    Redirect { location: String },
    PostForm { action: String, fields: Vec<(String, String)> },
    Soap { body: String },
}

impl Dispatch {
    pub fn status_code(&self) -> u16 {
        match self {
            Dispatch::Redirect { .. } => 302,
            Dispatch::PostForm { .. } | Dispatch::Soap { .. } => 200,
        }
    }

    /// Redirect target, if this is a redirect.
    pub fn location(&self) -> Option<&str> {
        match self {
            Dispatch::Redirect { location } => Some(location),
            _ => None,
        }
    }

    /// Render a POST form as an auto-submitting HTML page.
    pub fn to_html(&self) -> Option<String> {
        let Dispatch::PostForm { action, fields } = self else {
            return None;
        };

        let inputs: String = fields
            .iter()
            .map(|(name, value)| {
                format!(
                    r#"<input type="hidden" name="{}" value="{}"/>"#,
                    escape(name),
                    escape(value)
                )
            })
            .collect::<Vec<_>>()
            .join("\n        ");

        Some(format!(
            r#"<!DOCTYPE html>
<html>
<head>
    <meta charset="UTF-8">
    <title>POST data</title>
</head>
<body onload="document.forms[0].submit()">
    <form method="post" action="{}">
        {}
        <noscript>
            <input type="submit" value="Continue"/>
        </noscript>
    </form>
</body>
</html>"#,
            escape(action),
            inputs
        ))
    }
}

/// Delivers outbound messages and plain redirects.
pub trait BindingSender: Send + Sync {
    fn send(&self, message: &OutboundMessage) -> Result<Dispatch, DispatchError>;

    fn redirect(&self, url: &str, params: &[(String, String)]) -> Result<Dispatch, DispatchError>;
}

/// Default sender: validates URLs and encodes the binding's HTTP shape.
#[derive(Debug, Clone, Default)]
pub struct HttpDispatcher;

impl HttpDispatcher {
    pub fn new() -> Self {
        Self
    }

    fn check_url(url: &str) -> Result<Url, DispatchError> {
        let parsed = Url::parse(url).map_err(|_| DispatchError::InvalidUrl(url.to_string()))?;
        match parsed.scheme() {
            "http" | "https" => Ok(parsed),
            _ => Err(DispatchError::InvalidUrl(url.to_string())),
        }
    }

    /// Append query parameters, keeping any query the URL already has.
    fn with_query(url: &str, params: &[(String, String)]) -> String {
        if params.is_empty() {
            return url.to_string();
        }
        let query = params
            .iter()
            .map(|(k, v)| format!("{}={}", urlencoding::encode(k), urlencoding::encode(v)))
            .collect::<Vec<_>>()
            .join("&");
        let separator = if url.contains('?') { '&' } else { '?' };
        format!("{url}{separator}{query}")
    }

    fn paos_envelope(message: &OutboundMessage) -> Result<String, DispatchError> {
        let body = message
            .body
            .as_deref()
            .ok_or_else(|| DispatchError::Encoding("PAOS message without body".to_string()))?;
        let consumer = message.response_consumer_url.as_deref().ok_or_else(|| {
            DispatchError::Encoding("PAOS message without response consumer".to_string())
        })?;

        Ok(format!(
            concat!(
                r#"<S:Envelope xmlns:S="{soap}">"#,
                r#"<S:Header>"#,
                r#"<paos:Request xmlns:paos="{paos}" S:actor="http://schemas.xmlsoap.org/soap/actor/next" S:mustUnderstand="1" responseConsumerURL="{consumer}" service="{ecp}"/>"#,
                r#"<ecp:Request xmlns:ecp="{ecp}" S:actor="http://schemas.xmlsoap.org/soap/actor/next" S:mustUnderstand="1" IsPassive="false"/>"#,
                r#"</S:Header>"#,
                r#"<S:Body>{body}</S:Body>"#,
                r#"</S:Envelope>"#
            ),
            soap = SOAP_ENV_NS,
            paos = PAOS_NS,
            ecp = ECP_NS,
            consumer = escape(consumer),
            body = body,
        ))
    }
}

impl BindingSender for HttpDispatcher {
    fn send(&self, message: &OutboundMessage) -> Result<Dispatch, DispatchError> {
        Self::check_url(&message.destination)?;

        let dispatch = match message.binding {
            Binding::HttpRedirect => Dispatch::Redirect {
                location: Self::with_query(&message.destination, &message.parameters),
            },
            Binding::HttpPost => Dispatch::PostForm {
                action: message.destination.clone(),
                fields: message.parameters.clone(),
            },
            Binding::Paos => Dispatch::Soap {
                body: Self::paos_envelope(message)?,
            },
            Binding::Soap => {
                return Err(DispatchError::UnsupportedBinding(
                    Binding::Soap.uri().to_string(),
                ))
            }
        };

        debug!(
            destination = %message.destination,
            binding = %message.binding,
            "Dispatching SAML message"
        );
        Ok(dispatch)
    }

    fn redirect(&self, url: &str, params: &[(String, String)]) -> Result<Dispatch, DispatchError> {
        Self::check_url(url)?;
        Ok(Dispatch::Redirect {
            location: Self::with_query(url, params),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_redirect_appends_query() {
        let dispatch = HttpDispatcher::new()
            .redirect(
                "https://disco.example.org/ds?lang=en",
                &params(&[("entityID", "https://sp/x"), ("IDPList[]", "a b")]),
            )
            .unwrap();
        assert_eq!(
            dispatch.location(),
            Some("https://disco.example.org/ds?lang=en&entityID=https%3A%2F%2Fsp%2Fx&IDPList%5B%5D=a%20b")
        );
        assert_eq!(dispatch.status_code(), 302);
    }

    #[test]
    fn test_rejects_non_http_scheme() {
        let err = HttpDispatcher::new()
            .redirect("smtp://invalidurl", &[])
            .unwrap_err();
        assert_eq!(err.to_string(), "Invalid URL: smtp://invalidurl");

        let err = HttpDispatcher::new().redirect("not a url", &[]).unwrap_err();
        assert!(matches!(err, DispatchError::InvalidUrl(_)));
    }

    #[test]
    fn test_post_form() {
        let message = OutboundMessage {
            destination: "https://idp.example.org/sso".to_string(),
            binding: Binding::HttpPost,
            parameters: params(&[("SAMLRequest", "PHg+"), ("RelayState", "<r>")]),
            body: None,
            response_consumer_url: None,
        };
        let dispatch = HttpDispatcher::new().send(&message).unwrap();
        let html = dispatch.to_html().unwrap();
        assert!(html.contains(r#"action="https://idp.example.org/sso""#));
        assert!(html.contains(r#"name="SAMLRequest" value="PHg+""#));
        assert!(html.contains(r#"name="RelayState" value="&lt;r&gt;""#));

        let dispatch = Dispatch::PostForm {
            action: "https://idp.example.org/sso?a=1&b=2".to_string(),
            fields: params(&[("RelayState", r#"x" onmouseover='y'"#)]),
        };
        let html = dispatch.to_html().unwrap();
        assert!(html.contains(r#"action="https://idp.example.org/sso?a=1&amp;b=2""#));
        assert!(html.contains(r#"value="x&quot; onmouseover=&apos;y&apos;""#));
    }

    #[test]
    fn test_paos_envelope() {
        let message = OutboundMessage {
            destination: "https://idp.example.org/soap".to_string(),
            binding: Binding::Paos,
            parameters: Vec::new(),
            body: Some("<samlp:AuthnRequest/>".to_string()),
            response_consumer_url: Some("https://sp.example.org/acs".to_string()),
        };
        let Dispatch::Soap { body } = HttpDispatcher::new().send(&message).unwrap() else {
            panic!("expected SOAP dispatch");
        };
        assert!(body.contains(r#"responseConsumerURL="https://sp.example.org/acs""#));
        assert!(body.contains("<S:Body><samlp:AuthnRequest/></S:Body>"));
    }

    #[test]
    fn test_plain_soap_is_not_sendable() {
        let message = OutboundMessage {
            destination: "https://idp.example.org/soap".to_string(),
            binding: Binding::Soap,
            parameters: Vec::new(),
            body: Some("<x/>".to_string()),
            response_consumer_url: None,
        };
        assert!(matches!(
            HttpDispatcher::new().send(&message),
            Err(DispatchError::UnsupportedBinding(_))
        ));
    }
}
