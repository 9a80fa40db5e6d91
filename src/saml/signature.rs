//! Signing of outbound requests and verification hooks for inbound responses.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use ring::digest::{digest, SHA256};
use ring::rand::SystemRandom;
use ring::signature::{RsaKeyPair, RSA_PKCS1_SHA256};
use std::path::Path;
use tracing::warn;

use super::canonical::{canonicalize, EXC_C14N};
use super::constants::{
    ENVELOPED_SIGNATURE_TRANSFORM, RSA_SHA256_SIG_ALG, SHA256_DIGEST, XMLDSIG_NS,
};
use super::metadata::IdpMetadata;
use crate::error::{Error, Result};

/// Produces detached signatures over binding payloads.
pub trait RequestSigner: Send + Sync {
    /// `SigAlg` URI sent alongside the signature.
    fn algorithm_uri(&self) -> &str;

    fn sign(&self, payload: &[u8]) -> Result<Vec<u8>>;

    /// Embed an enveloped XML signature over the element with ID
    /// `reference_id`, for bindings that carry the XML itself.
    fn sign_enveloped(&self, xml: &str, reference_id: &str) -> Result<String> {
        sign_enveloped(self, xml, reference_id)
    }
}

/// Insert a `ds:Signature` over the whole document right after its
/// `saml:Issuer`. The digest and `SignedInfo` use exclusive C14N.
pub fn sign_enveloped<S: RequestSigner + ?Sized>(
    signer: &S,
    xml: &str,
    reference_id: &str,
) -> Result<String> {
    let digest_value = BASE64.encode(digest(&SHA256, canonicalize(xml)?.as_bytes()));

    let signed_info_content = format!(
        concat!(
            r#"<ds:CanonicalizationMethod Algorithm="{c14n}"></ds:CanonicalizationMethod>"#,
            r#"<ds:SignatureMethod Algorithm="{alg}"></ds:SignatureMethod>"#,
            r##"<ds:Reference URI="#{id}"><ds:Transforms>"##,
            r#"<ds:Transform Algorithm="{enveloped}"></ds:Transform>"#,
            r#"<ds:Transform Algorithm="{c14n}"></ds:Transform>"#,
            r#"</ds:Transforms><ds:DigestMethod Algorithm="{sha256}"></ds:DigestMethod>"#,
            r#"<ds:DigestValue>{digest}</ds:DigestValue></ds:Reference>"#,
        ),
        c14n = EXC_C14N,
        alg = signer.algorithm_uri(),
        id = quick_xml::escape::escape(reference_id),
        enveloped = ENVELOPED_SIGNATURE_TRANSFORM,
        sha256 = SHA256_DIGEST,
        digest = digest_value,
    );

    // Canonical SignedInfo carries the ds declaration itself
    let signed_info = canonicalize(&format!(
        r#"<ds:SignedInfo xmlns:ds="{XMLDSIG_NS}">{signed_info_content}</ds:SignedInfo>"#
    ))?;
    let signature_value = encode_signature(&signer.sign(signed_info.as_bytes())?);

    let signature = format!(
        r#"<ds:Signature xmlns:ds="{XMLDSIG_NS}"><ds:SignedInfo>{signed_info_content}</ds:SignedInfo><ds:SignatureValue>{signature_value}</ds:SignatureValue></ds:Signature>"#
    );

    const ISSUER_END: &str = "</saml:Issuer>";
    let at = xml
        .find(ISSUER_END)
        .map(|pos| pos + ISSUER_END.len())
        .ok_or_else(|| Error::protocol("Cannot sign a request without an Issuer"))?;

    let mut signed = String::with_capacity(xml.len() + signature.len());
    signed.push_str(&xml[..at]);
    signed.push_str(&signature);
    signed.push_str(&xml[at..]);
    Ok(signed)
}

/// RSA-SHA256 (PKCS#1 v1.5) signer.
pub struct RsaSha256Signer {
    key_pair: RsaKeyPair,
    rng: SystemRandom,
}

impl std::fmt::Debug for RsaSha256Signer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RsaSha256Signer")
            .field("modulus_bits", &(self.key_pair.public().modulus_len() * 8))
            .finish()
    }
}

impl RsaSha256Signer {
    /// Create a signer from a PEM private key (PKCS#8 or PKCS#1).
    pub fn from_pem(pem: &str) -> Result<Self> {
        let der = pem_to_der(pem, "PRIVATE KEY")
            .or_else(|| pem_to_der(pem, "RSA PRIVATE KEY"))
            .ok_or_else(|| Error::config("Invalid private key PEM"))?;

        let key_pair = RsaKeyPair::from_pkcs8(&der)
            .or_else(|_| RsaKeyPair::from_der(&der))
            .map_err(|e| Error::config(format!("Invalid RSA key: {e}")))?;

        Ok(Self {
            key_pair,
            rng: SystemRandom::new(),
        })
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let pem = std::fs::read_to_string(path).map_err(|e| {
            Error::config(format!("Failed to read signing key {}: {e}", path.display()))
        })?;
        Self::from_pem(&pem)
    }

    /// DER-encoded public key, for verification.
    pub fn public_key_der(&self) -> &[u8] {
        self.key_pair.public().as_ref()
    }
}

impl RequestSigner for RsaSha256Signer {
    fn algorithm_uri(&self) -> &str {
        RSA_SHA256_SIG_ALG
    }

    fn sign(&self, payload: &[u8]) -> Result<Vec<u8>> {
        let mut signature = vec![0u8; self.key_pair.public().modulus_len()];
        self.key_pair
            .sign(&RSA_PKCS1_SHA256, &self.rng, payload, &mut signature)
            .map_err(|e| Error::Internal(anyhow::anyhow!("RSA signing failed: {e}")))?;
        Ok(signature)
    }
}

/// Checks the signature of an inbound SAML response against the issuing
/// IdP's metadata.
pub trait ResponseVerifier: Send + Sync {
    fn verify(&self, xml: &str, idp: &IdpMetadata) -> Result<()>;
}

/// Accepts every response. Development setups only.
#[derive(Debug, Clone, Default)]
pub struct AcceptUnsigned;

impl ResponseVerifier for AcceptUnsigned {
    fn verify(&self, _xml: &str, idp: &IdpMetadata) -> Result<()> {
        warn!(idp = %idp.entity_id, "Accepting SAML response without signature verification");
        Ok(())
    }
}

/// Base64 of a signature, as carried in the `Signature` parameter.
pub fn encode_signature(signature: &[u8]) -> String {
    BASE64.encode(signature)
}

/// Extract DER bytes from a PEM block with the given label.
pub fn pem_to_der(pem: &str, label: &str) -> Option<Vec<u8>> {
    let begin = format!("-----BEGIN {}-----", label);
    let end = format!("-----END {}-----", label);

    let start = pem.find(&begin)? + begin.len();
    let end_pos = pem.find(&end)?;
    if end_pos < start {
        return None;
    }

    let b64_data: String = pem[start..end_pos]
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect();

    BASE64.decode(b64_data).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ring::signature::{UnparsedPublicKey, RSA_PKCS1_2048_8192_SHA256};

    const TEST_KEY: &str = include_str!("../../testdata/sp-key.pem");
    const TEST_CERT: &str = include_str!("../../testdata/sp-cert.pem");

    #[test]
    fn test_sign_and_verify() {
        let signer = RsaSha256Signer::from_pem(TEST_KEY).unwrap();
        let payload = b"SAMLRequest=abc&RelayState=def&SigAlg=ghi";
        let signature = signer.sign(payload).unwrap();
        assert_eq!(signature.len(), 256);

        let public = UnparsedPublicKey::new(&RSA_PKCS1_2048_8192_SHA256, signer.public_key_der());
        assert!(public.verify(payload, &signature).is_ok());
        assert!(public.verify(b"tampered", &signature).is_err());
    }

    #[test]
    fn test_algorithm_uri() {
        let signer = RsaSha256Signer::from_pem(TEST_KEY).unwrap();
        assert_eq!(
            signer.algorithm_uri(),
            "http://www.w3.org/2001/04/xmldsig-more#rsa-sha256"
        );
    }

    #[test]
    fn test_invalid_pem() {
        let err = RsaSha256Signer::from_pem("not a key").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
        // A certificate is not a private key
        assert!(RsaSha256Signer::from_pem(TEST_CERT).is_err());
    }

    fn between<'a>(xml: &'a str, start: &str, end: &str) -> &'a str {
        let from = xml.find(start).unwrap() + start.len();
        let to = from + xml[from..].find(end).unwrap();
        &xml[from..to]
    }

    #[test]
    fn test_enveloped_signature_verifies() {
        let signer = RsaSha256Signer::from_pem(TEST_KEY).unwrap();
        let xml = r#"<samlp:AuthnRequest xmlns:samlp="urn:oasis:names:tc:SAML:2.0:protocol" xmlns:saml="urn:oasis:names:tc:SAML:2.0:assertion" ID="_abc" Version="2.0"><saml:Issuer>https://sp.example.org</saml:Issuer><samlp:NameIDPolicy AllowCreate="true"/></samlp:AuthnRequest>"#;

        let signed = signer.sign_enveloped(xml, "_abc").unwrap();
        assert!(signed.contains(r##"<ds:Reference URI="#_abc">"##));
        assert!(signed.contains("</saml:Issuer><ds:Signature"));

        // Removing the signature restores the digested document
        let signature = format!(
            "<ds:Signature{}</ds:Signature>",
            between(&signed, "<ds:Signature", "</ds:Signature>")
        );
        let stripped = signed.replace(&signature, "");
        assert_eq!(stripped, xml);
        let expected_digest = BASE64.encode(digest(&SHA256, canonicalize(xml).unwrap().as_bytes()));
        assert_eq!(between(&signed, "<ds:DigestValue>", "</ds:DigestValue>"), expected_digest);

        let signed_info = canonicalize(&format!(
            r#"<ds:SignedInfo xmlns:ds="{XMLDSIG_NS}">{}</ds:SignedInfo>"#,
            between(&signed, "<ds:SignedInfo>", "</ds:SignedInfo>")
        ))
        .unwrap();
        let signature_value = BASE64
            .decode(between(&signed, "<ds:SignatureValue>", "</ds:SignatureValue>"))
            .unwrap();
        let public = UnparsedPublicKey::new(&RSA_PKCS1_2048_8192_SHA256, signer.public_key_der());
        assert!(public.verify(signed_info.as_bytes(), &signature_value).is_ok());
    }

    #[test]
    fn test_enveloped_signature_needs_issuer() {
        let signer = RsaSha256Signer::from_pem(TEST_KEY).unwrap();
        assert!(signer.sign_enveloped("<Request ID=\"_x\"/>", "_x").is_err());
    }

    #[test]
    fn test_pem_to_der() {
        assert!(pem_to_der(TEST_CERT, "CERTIFICATE").is_some());
        assert!(pem_to_der(TEST_CERT, "PRIVATE KEY").is_none());
    }
}
