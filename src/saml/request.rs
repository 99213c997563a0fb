//! Second-factor authentication request.

use chrono::{DateTime, Utc};
use quick_xml::escape::escape;
use tracing::debug;

use super::{ASSERTION_NS, PROTOCOL_NS};
use crate::config::StepUpConfig;
use crate::error::{StepUpError, StepUpResult};

/// NameID format sent in the request subject.
pub const NAME_ID_FORMAT_UNSPECIFIED: &str = "urn:oasis:names:tc:SAML:1.1:nameid-format:unspecified";

/// How the gateway compares the requested assurance level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparison {
    Minimum,
}

impl Comparison {
    pub fn as_str(&self) -> &'static str {
        match self {
            Comparison::Minimum => "minimum",
        }
    }
}

/// A `samlp:AuthnRequest` for the step-up gateway.
#[derive(Debug, Clone)]
pub struct AuthenticationRequest {
    pub id: String,
    pub issuer: String,
    pub destination: String,
    pub assertion_consumer_service_url: String,
    pub name_id: String,
    pub requested_assurance_level: String,
    pub comparison: Comparison,
    pub issue_instant: DateTime<Utc>,
}

/// Step-up subject identifier for a user of a home organization.
///
/// `@` is replaced in the composed string, so it never survives in either
/// the organization or the user part.
pub fn name_id(user_id: &str, home_organization: &str) -> String {
    format!("urn:collab:person:{}:{}", home_organization, user_id).replace('@', "_")
}

impl AuthenticationRequest {
    /// Build a request with a fresh id.
    ///
    /// Issuer comes from the local SP section and destination from the
    /// gateway section; either being absent is a configuration error.
    pub fn build(
        config: &StepUpConfig,
        user_id: &str,
        home_organization: &str,
        assurance_level: &str,
        callback_url: &str,
    ) -> StepUpResult<Self> {
        let sp = config
            .local_sp
            .as_ref()
            .ok_or_else(|| StepUpError::config("service provider configuration is missing"))?;
        let gateway = config
            .gateway
            .as_ref()
            .ok_or_else(|| StepUpError::config("identity provider configuration is missing"))?;

        let request = Self {
            id: format!("_id{}", uuid::Uuid::new_v4()),
            issuer: sp.entity_id.clone(),
            destination: gateway.sso_location.clone(),
            assertion_consumer_service_url: callback_url.to_string(),
            name_id: name_id(user_id, home_organization),
            requested_assurance_level: assurance_level.to_string(),
            comparison: Comparison::Minimum,
            issue_instant: Utc::now(),
        };

        debug!(request_id = %request.id, name_id = %request.name_id, "Created AuthnRequest");
        Ok(request)
    }

    /// Serialize to the XML text that gets signed.
    pub fn to_xml(&self) -> String {
        format!(
            concat!(
                r#"<samlp:AuthnRequest xmlns:samlp="{protocol}" xmlns:saml="{assertion}" "#,
                r#"AssertionConsumerServiceURL="{acs}" Destination="{destination}" ID="{id}" "#,
                r#"IssueInstant="{instant}" Version="2.0">"#,
                r#"<saml:Issuer>{issuer}</saml:Issuer>"#,
                r#"<saml:Subject><saml:NameID Format="{format}">{name_id}</saml:NameID></saml:Subject>"#,
                r#"<samlp:RequestedAuthnContext Comparison="{comparison}">"#,
                r#"<saml:AuthnContextClassRef>{loa}</saml:AuthnContextClassRef>"#,
                r#"</samlp:RequestedAuthnContext>"#,
                r#"</samlp:AuthnRequest>"#
            ),
            protocol = PROTOCOL_NS,
            assertion = ASSERTION_NS,
            acs = escape(self.assertion_consumer_service_url.as_str()),
            destination = escape(self.destination.as_str()),
            id = escape(self.id.as_str()),
            instant = self.issue_instant.format("%Y-%m-%dT%H:%M:%SZ"),
            issuer = escape(self.issuer.as_str()),
            format = NAME_ID_FORMAT_UNSPECIFIED,
            name_id = escape(self.name_id.as_str()),
            comparison = self.comparison.as_str(),
            loa = escape(self.requested_assurance_level.as_str()),
        )
    }
}
