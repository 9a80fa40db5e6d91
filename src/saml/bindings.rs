//! Binding-specific encoding and signing of outbound SAML requests.
//!
//! - HTTP-Redirect: deflate + base64, detached signature over the query
//! - HTTP-POST: base64, SimpleSign over the form fields
//! - PAOS: raw XML, wrapped in a SOAP envelope by the sender

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use std::io::Write;

use super::constants::Binding;
use super::signature::{encode_signature, RequestSigner};
use crate::error::{DispatchError, Result};
use crate::http::OutboundMessage;

/// Deflate and base64 encode for the redirect binding.
pub fn deflate_and_encode(xml: &str) -> Result<String> {
    let mut encoder =
        flate2::write::DeflateEncoder::new(Vec::new(), flate2::Compression::default());
    encoder
        .write_all(xml.as_bytes())
        .map_err(|e| DispatchError::Encoding(e.to_string()))?;
    let compressed = encoder
        .finish()
        .map_err(|e| DispatchError::Encoding(e.to_string()))?;
    Ok(BASE64.encode(compressed))
}

/// HTTP-Redirect message with an optional detached signature.
pub fn redirect_message(
    destination: &str,
    xml: &str,
    relay_state: Option<&str>,
    signer: Option<&dyn RequestSigner>,
) -> Result<OutboundMessage> {
    let encoded = deflate_and_encode(xml)?;
    let mut parameters = vec![("SAMLRequest".to_string(), encoded)];
    if let Some(rs) = relay_state {
        parameters.push(("RelayState".to_string(), rs.to_string()));
    }

    if let Some(signer) = signer {
        parameters.push(("SigAlg".to_string(), signer.algorithm_uri().to_string()));
        let to_sign = parameters
            .iter()
            .map(|(k, v)| format!("{}={}", k, urlencoding::encode(v)))
            .collect::<Vec<_>>()
            .join("&");
        let signature = signer.sign(to_sign.as_bytes())?;
        parameters.push(("Signature".to_string(), encode_signature(&signature)));
    }

    Ok(OutboundMessage {
        destination: destination.to_string(),
        binding: Binding::HttpRedirect,
        parameters,
        body: None,
        response_consumer_url: None,
    })
}

/// HTTP-POST message, SimpleSign-signed when a signer is given.
pub fn post_message(
    destination: &str,
    xml: &str,
    relay_state: Option<&str>,
    signer: Option<&dyn RequestSigner>,
) -> Result<OutboundMessage> {
    let mut parameters = vec![("SAMLRequest".to_string(), BASE64.encode(xml))];
    if let Some(rs) = relay_state {
        parameters.push(("RelayState".to_string(), rs.to_string()));
    }

    if let Some(signer) = signer {
        parameters.push(("SigAlg".to_string(), signer.algorithm_uri().to_string()));
        let to_sign = parameters
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join("&");
        let signature = signer.sign(to_sign.as_bytes())?;
        parameters.push(("Signature".to_string(), encode_signature(&signature)));
    }

    Ok(OutboundMessage {
        destination: destination.to_string(),
        binding: Binding::HttpPost,
        parameters,
        body: None,
        response_consumer_url: None,
    })
}

/// PAOS message handed to an ECP client.
pub fn paos_message(destination: &str, xml: &str, response_consumer_url: &str) -> OutboundMessage {
    OutboundMessage {
        destination: destination.to_string(),
        binding: Binding::Paos,
        parameters: Vec::new(),
        body: Some(xml.to_string()),
        response_consumer_url: Some(response_consumer_url.to_string()),
    }
}

/// Encode a message for the given front-channel binding.
pub fn front_channel_message(
    binding: Binding,
    destination: &str,
    xml: &str,
    relay_state: Option<&str>,
    signer: Option<&dyn RequestSigner>,
) -> Result<OutboundMessage> {
    match binding {
        Binding::HttpRedirect => redirect_message(destination, xml, relay_state, signer),
        Binding::HttpPost => post_message(destination, xml, relay_state, signer),
        other => Err(DispatchError::UnsupportedBinding(other.uri().to_string()).into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::saml::signature::RsaSha256Signer;
    use flate2::read::DeflateDecoder;
    use ring::signature::{UnparsedPublicKey, RSA_PKCS1_2048_8192_SHA256};
    use std::io::Read;

    const TEST_KEY: &str = include_str!("../../testdata/sp-key.pem");

    fn param<'a>(message: &'a OutboundMessage, name: &str) -> Option<&'a str> {
        message
            .parameters
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    #[test]
    fn test_deflate_roundtrip() {
        let xml = "<samlp:AuthnRequest ID=\"_x\"/>";
        let encoded = deflate_and_encode(xml).unwrap();
        let compressed = BASE64.decode(encoded).unwrap();
        let mut inflated = String::new();
        DeflateDecoder::new(compressed.as_slice())
            .read_to_string(&mut inflated)
            .unwrap();
        assert_eq!(inflated, xml);
    }

    #[test]
    fn test_unsigned_redirect() {
        let message = redirect_message("https://idp/sso", "<x/>", Some("/app"), None).unwrap();
        assert_eq!(message.binding, Binding::HttpRedirect);
        assert_eq!(param(&message, "RelayState"), Some("/app"));
        assert!(param(&message, "Signature").is_none());
    }

    #[test]
    fn test_signed_redirect_verifies() {
        let signer = RsaSha256Signer::from_pem(TEST_KEY).unwrap();
        let message =
            redirect_message("https://idp/sso", "<x/>", Some("/app?a=b"), Some(&signer)).unwrap();

        let names: Vec<&str> = message.parameters.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(names, ["SAMLRequest", "RelayState", "SigAlg", "Signature"]);

        let signed = format!(
            "SAMLRequest={}&RelayState={}&SigAlg={}",
            urlencoding::encode(param(&message, "SAMLRequest").unwrap()),
            urlencoding::encode("/app?a=b"),
            urlencoding::encode(signer.algorithm_uri()),
        );
        let signature = BASE64.decode(param(&message, "Signature").unwrap()).unwrap();
        let public = UnparsedPublicKey::new(&RSA_PKCS1_2048_8192_SHA256, signer.public_key_der());
        assert!(public.verify(signed.as_bytes(), &signature).is_ok());
    }

    #[test]
    fn test_simple_sign_post_verifies() {
        let signer = RsaSha256Signer::from_pem(TEST_KEY).unwrap();
        let message = post_message("https://idp/sso", "<x/>", None, Some(&signer)).unwrap();
        assert_eq!(param(&message, "SAMLRequest"), Some(BASE64.encode("<x/>").as_str()));

        let signed = format!(
            "SAMLRequest={}&SigAlg={}",
            BASE64.encode("<x/>"),
            signer.algorithm_uri()
        );
        let signature = BASE64.decode(param(&message, "Signature").unwrap()).unwrap();
        let public = UnparsedPublicKey::new(&RSA_PKCS1_2048_8192_SHA256, signer.public_key_der());
        assert!(public.verify(signed.as_bytes(), &signature).is_ok());
    }

    #[test]
    fn test_front_channel_rejects_soap() {
        assert!(front_channel_message(Binding::Soap, "https://idp", "<x/>", None, None).is_err());
    }
}
