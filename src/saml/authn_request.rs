//! SAML AuthnRequest construction.
//!
//! The request is built with a small builder and serialized by hand: the
//! gateway only ever emits this one protocol message.

use chrono::{DateTime, SecondsFormat, Utc};
use quick_xml::escape::escape;

use super::constants::{AuthnContextComparison, Binding, SAMLP_NS, SAML_NS};
use super::config::NameIdPolicy;
use crate::state::NameId;

/// `RequestedAuthnContext` element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestedAuthnContext {
    pub class_refs: Vec<String>,
    pub comparison: AuthnContextComparison,
}

/// `Scoping` element.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Scoping {
    pub idp_list: Vec<String>,
    pub proxy_count: Option<u32>,
    pub requester_ids: Vec<String>,
}

impl Scoping {
    fn is_empty(&self) -> bool {
        self.idp_list.is_empty() && self.proxy_count.is_none() && self.requester_ids.is_empty()
    }
}

/// Authentication request sent from the gateway to an IdP.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthnRequest {
    pub id: String,
    pub issue_instant: DateTime<Utc>,
    pub issuer: String,
    pub destination: Option<String>,
    pub assertion_consumer_service_url: Option<String>,
    /// Binding the IdP should answer with.
    pub protocol_binding: Option<Binding>,
    pub subject: Option<NameId>,
    pub name_id_policy: Option<NameIdPolicy>,
    pub requested_authn_context: Option<RequestedAuthnContext>,
    pub force_authn: bool,
    pub is_passive: bool,
    pub provider_name: Option<String>,
    pub scoping: Option<Scoping>,
}

impl AuthnRequest {
    #[must_use]
    pub fn new(id: impl Into<String>, issuer: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            issue_instant: Utc::now(),
            issuer: issuer.into(),
            destination: None,
            assertion_consumer_service_url: None,
            protocol_binding: None,
            subject: None,
            name_id_policy: None,
            requested_authn_context: None,
            force_authn: false,
            is_passive: false,
            provider_name: None,
            scoping: None,
        }
    }

    #[must_use]
    pub fn with_destination(mut self, url: impl Into<String>) -> Self {
        self.destination = Some(url.into());
        self
    }

    #[must_use]
    pub fn with_acs_url(mut self, url: impl Into<String>) -> Self {
        self.assertion_consumer_service_url = Some(url.into());
        self
    }

    #[must_use]
    pub fn with_protocol_binding(mut self, binding: Binding) -> Self {
        self.protocol_binding = Some(binding);
        self
    }

    #[must_use]
    pub fn with_subject(mut self, name_id: NameId) -> Self {
        self.subject = Some(name_id);
        self
    }

    #[must_use]
    pub fn with_name_id_policy(mut self, policy: NameIdPolicy) -> Self {
        self.name_id_policy = Some(policy);
        self
    }

    #[must_use]
    pub fn with_authn_context(
        mut self,
        class_ref: impl Into<String>,
        comparison: AuthnContextComparison,
    ) -> Self {
        self.requested_authn_context = Some(RequestedAuthnContext {
            class_refs: vec![class_ref.into()],
            comparison,
        });
        self
    }

    #[must_use]
    pub const fn force_authn(mut self, force: bool) -> Self {
        self.force_authn = force;
        self
    }

    #[must_use]
    pub const fn is_passive(mut self, passive: bool) -> Self {
        self.is_passive = passive;
        self
    }

    #[must_use]
    pub fn with_provider_name(mut self, name: impl Into<String>) -> Self {
        self.provider_name = Some(name.into());
        self
    }

    /// Set Scoping; an empty one is dropped.
    #[must_use]
    pub fn with_scoping(mut self, scoping: Scoping) -> Self {
        self.scoping = Some(scoping).filter(|s| !s.is_empty());
        self
    }

    /// Serialize to XML.
    pub fn to_xml(&self) -> String {
        let mut xml = String::with_capacity(1024);

        xml.push_str(&format!(
            r#"<samlp:AuthnRequest xmlns:samlp="{}" xmlns:saml="{}" ID="{}" Version="2.0" IssueInstant="{}""#,
            SAMLP_NS,
            SAML_NS,
            escape(&self.id),
            self.issue_instant.to_rfc3339_opts(SecondsFormat::Secs, true),
        ));
        if let Some(ref destination) = self.destination {
            push_attr(&mut xml, "Destination", destination);
        }
        if let Some(ref acs) = self.assertion_consumer_service_url {
            push_attr(&mut xml, "AssertionConsumerServiceURL", acs);
        }
        if let Some(binding) = self.protocol_binding {
            push_attr(&mut xml, "ProtocolBinding", binding.uri());
        }
        push_attr(&mut xml, "ForceAuthn", bool_str(self.force_authn));
        push_attr(&mut xml, "IsPassive", bool_str(self.is_passive));
        if let Some(ref name) = self.provider_name {
            push_attr(&mut xml, "ProviderName", name);
        }
        xml.push('>');

        xml.push_str(&format!("<saml:Issuer>{}</saml:Issuer>", escape(&self.issuer)));

        if let Some(ref name_id) = self.subject {
            xml.push_str("<saml:Subject><saml:NameID");
            if let Some(ref format) = name_id.format {
                push_attr(&mut xml, "Format", format);
            }
            xml.push_str(&format!(
                ">{}</saml:NameID></saml:Subject>",
                escape(&name_id.value)
            ));
        }

        if let Some(ref policy) = self.name_id_policy {
            xml.push_str("<samlp:NameIDPolicy");
            push_attr(&mut xml, "Format", &policy.format);
            push_attr(&mut xml, "AllowCreate", bool_str(policy.allow_create));
            xml.push_str("/>");
        }

        if let Some(ref context) = self.requested_authn_context {
            xml.push_str("<samlp:RequestedAuthnContext");
            push_attr(&mut xml, "Comparison", context.comparison.as_str());
            xml.push('>');
            for class_ref in &context.class_refs {
                xml.push_str(&format!(
                    "<saml:AuthnContextClassRef>{}</saml:AuthnContextClassRef>",
                    escape(class_ref)
                ));
            }
            xml.push_str("</samlp:RequestedAuthnContext>");
        }

        if let Some(ref scoping) = self.scoping {
            xml.push_str("<samlp:Scoping");
            if let Some(count) = scoping.proxy_count {
                push_attr(&mut xml, "ProxyCount", &count.to_string());
            }
            xml.push('>');
            if !scoping.idp_list.is_empty() {
                xml.push_str("<samlp:IDPList>");
                for provider in &scoping.idp_list {
                    xml.push_str("<samlp:IDPEntry");
                    push_attr(&mut xml, "ProviderID", provider);
                    xml.push_str("/>");
                }
                xml.push_str("</samlp:IDPList>");
            }
            for requester in &scoping.requester_ids {
                xml.push_str(&format!(
                    "<samlp:RequesterID>{}</samlp:RequesterID>",
                    escape(requester)
                ));
            }
            xml.push_str("</samlp:Scoping>");
        }

        xml.push_str("</samlp:AuthnRequest>");
        xml
    }
}

fn push_attr(xml: &mut String, name: &str, value: &str) {
    xml.push_str(&format!(r#" {}="{}""#, name, escape(value)));
}

const fn bool_str(value: bool) -> &'static str {
    if value {
        "true"
    } else {
        "false"
    }
}
