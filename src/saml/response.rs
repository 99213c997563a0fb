//! Gateway response verification.
//!
//! Verification and claim extraction are a single step. Identities are only
//! read from assertions covered by a signature that was checked against a
//! trusted gateway certificate, and only from the element that signature
//! covers.

use chrono::{DateTime, Duration, Utc};
use thiserror::Error;
use tracing::{debug, warn};

use super::claims::{ClaimsIdentity, AUTHENTICATION_INSTANT_CLAIM, NAME_IDENTIFIER_CLAIM};
use super::codec::decode_response;
use super::{ASSERTION_NS, PROTOCOL_NS};
use crate::config::{StepUpConfig, AUTHENTICATION_METHOD_CLAIM};
use crate::error::{StepUpError, StepUpResult};
use crate::xmldsig::engine::DSIG_NS;
use crate::xmldsig::{parse, verify_enveloped, Element, TrustedCertificate};

/// Top-level status code of a successful response.
pub const STATUS_SUCCESS: &str = "urn:oasis:names:tc:SAML:2.0:status:Success";

const BEARER: &str = "urn:oasis:names:tc:SAML:2.0:cm:bearer";

/// Status reported by the gateway.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponseStatus {
    Success,
    Failure(String),
}

/// A response whose signature and trust conditions were checked.
///
/// Only the verifier constructs these.
#[derive(Debug, Clone)]
pub struct VerifiedResponse {
    request_id: String,
    status: ResponseStatus,
    status_message: Option<String>,
    identities: Vec<ClaimsIdentity>,
}

impl VerifiedResponse {
    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    pub fn status(&self) -> &ResponseStatus {
        &self.status
    }

    pub fn status_message(&self) -> Option<&str> {
        self.status_message.as_deref()
    }

    /// One identity per verified assertion, in document order.
    pub fn identities(&self) -> &[ClaimsIdentity] {
        &self.identities
    }
}

/// Why a response was rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RejectReason {
    #[error("invalid signature: {0}")]
    InvalidSignature(String),
    #[error("untrusted response: {0}")]
    Untrusted(String),
    #[error("response answers request {actual:?}, expected {expected}")]
    RequestIdMismatch {
        expected: String,
        actual: Option<String>,
    },
    #[error("gateway returned status {0}")]
    Status(String),
}

/// A rejected response.
///
/// `status_message` is only set when the gateway's status came from a
/// response whose signature verified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rejection {
    pub reason: RejectReason,
    pub status_message: Option<String>,
}

impl Rejection {
    fn new(reason: RejectReason) -> Self {
        Self {
            reason,
            status_message: None,
        }
    }

    fn untrusted(detail: impl Into<String>) -> Self {
        Self::new(RejectReason::Untrusted(detail.into()))
    }
}

/// Outcome of verifying a response.
#[derive(Debug, Clone)]
pub enum Verification {
    Verified(VerifiedResponse),
    Rejected(Rejection),
}

/// Checks gateway responses against the configured trust settings.
#[derive(Debug, Clone)]
pub struct ResponseVerifier {
    gateway_entity_id: String,
    audience: String,
    trusted: Vec<TrustedCertificate>,
    clock_skew: Duration,
    now: Option<DateTime<Utc>>,
}

impl ResponseVerifier {
    pub fn new(
        gateway_entity_id: impl Into<String>,
        audience: impl Into<String>,
        trusted: Vec<TrustedCertificate>,
        clock_skew_secs: i64,
    ) -> StepUpResult<Self> {
        let clock_skew = Duration::try_seconds(clock_skew_secs)
            .filter(|skew| *skew >= Duration::zero())
            .ok_or_else(|| {
                StepUpError::config(format!("invalid clock skew: {} seconds", clock_skew_secs))
            })?;
        Ok(Self {
            gateway_entity_id: gateway_entity_id.into(),
            audience: audience.into(),
            trusted,
            clock_skew,
            now: None,
        })
    }

    /// Build a verifier trusting the configured gateway certificates.
    pub fn from_config(config: &StepUpConfig) -> StepUpResult<Self> {
        let sp = config
            .local_sp
            .as_ref()
            .ok_or_else(|| StepUpError::config("service provider configuration is missing"))?;
        let gateway = config
            .gateway
            .as_ref()
            .ok_or_else(|| StepUpError::config("identity provider configuration is missing"))?;

        let mut trusted = Vec::new();
        for source in gateway.trusted_certificates() {
            let pem = source
                .load_pem()
                .map_err(|e| StepUpError::config(format!("{:#}", e)))?;
            trusted.push(TrustedCertificate::from_pem(&pem)?);
        }

        Self::new(
            gateway.entity_id.clone(),
            sp.entity_id.clone(),
            trusted,
            config.clock_skew_secs,
        )
    }

    /// Evaluate time conditions at a fixed instant instead of the clock.
    pub fn at(mut self, now: DateTime<Utc>) -> Self {
        self.now = Some(now);
        self
    }

    /// Verify a base64 encoded response solicited by `expected_request_id`.
    ///
    /// Undecodable or unparsable input is an error; every other failure is
    /// a [`Verification::Rejected`] outcome.
    pub fn verify(
        &self,
        encoded_response: &str,
        expected_request_id: &str,
    ) -> StepUpResult<Verification> {
        let xml = decode_response(encoded_response)?;
        let root = parse(&xml)?;

        match self.evaluate(&root, expected_request_id) {
            Ok(verified) => {
                debug!(
                    request_id = %expected_request_id,
                    identities = verified.identities.len(),
                    "Response verified"
                );
                Ok(Verification::Verified(verified))
            }
            Err(rejection) => {
                warn!(request_id = %expected_request_id, reason = %rejection.reason, "Response rejected");
                Ok(Verification::Rejected(rejection))
            }
        }
    }

    fn evaluate(&self, root: &Element, expected: &str) -> Result<VerifiedResponse, Rejection> {
        if !root.is(PROTOCOL_NS, "Response") {
            return Err(Rejection::untrusted("document is not a SAML Response"));
        }

        let response_signed = match root.child(DSIG_NS, "Signature") {
            Some(_) => {
                verify_enveloped(root, root, &self.trusted)
                    .map_err(|e| Rejection::new(RejectReason::InvalidSignature(e.to_string())))?;
                true
            }
            None => false,
        };

        let in_response_to = root.attr("InResponseTo");
        if in_response_to != Some(expected) {
            return Err(Rejection::new(RejectReason::RequestIdMismatch {
                expected: expected.to_string(),
                actual: in_response_to.map(str::to_string),
            }));
        }

        if let Some(issuer) = root.child(ASSERTION_NS, "Issuer") {
            self.check_issuer(issuer)?;
        }

        let status = root
            .child(PROTOCOL_NS, "Status")
            .ok_or_else(|| Rejection::untrusted("response has no status"))?;
        let status_code = status
            .child(PROTOCOL_NS, "StatusCode")
            .and_then(|c| c.attr("Value"))
            .ok_or_else(|| Rejection::untrusted("response has no status code"))?;
        let status_message = status
            .child(PROTOCOL_NS, "StatusMessage")
            .map(|m| m.text().trim().to_string())
            .filter(|m| response_signed && !m.is_empty());

        if status_code != STATUS_SUCCESS {
            return Err(Rejection {
                reason: RejectReason::Status(status_code.to_string()),
                status_message,
            });
        }

        if root.child(ASSERTION_NS, "EncryptedAssertion").is_some() {
            return Err(Rejection::untrusted("encrypted assertions are not supported"));
        }

        let assertions: Vec<&Element> = root.children_named(ASSERTION_NS, "Assertion").collect();
        if !response_signed && assertions.is_empty() {
            return Err(Rejection::untrusted("response is not signed"));
        }

        let now = self.now.unwrap_or_else(Utc::now);
        let mut identities = Vec::with_capacity(assertions.len());
        for assertion in assertions {
            if assertion.child(DSIG_NS, "Signature").is_some() {
                verify_enveloped(root, assertion, &self.trusted)
                    .map_err(|e| Rejection::new(RejectReason::InvalidSignature(e.to_string())))?;
            } else if !response_signed {
                return Err(Rejection::untrusted("assertion is not signed"));
            }
            identities.push(self.check_assertion(assertion, expected, now)?);
        }

        Ok(VerifiedResponse {
            request_id: expected.to_string(),
            status: ResponseStatus::Success,
            status_message,
            identities,
        })
    }

    fn check_issuer(&self, issuer: &Element) -> Result<(), Rejection> {
        let value = issuer.text();
        if value.trim() != self.gateway_entity_id {
            return Err(Rejection::untrusted(format!("unexpected issuer '{}'", value.trim())));
        }
        Ok(())
    }

    fn check_assertion(
        &self,
        assertion: &Element,
        expected: &str,
        now: DateTime<Utc>,
    ) -> Result<ClaimsIdentity, Rejection> {
        let issuer = assertion
            .child(ASSERTION_NS, "Issuer")
            .ok_or_else(|| Rejection::untrusted("assertion has no issuer"))?;
        self.check_issuer(issuer)?;

        let conditions = assertion
            .child(ASSERTION_NS, "Conditions")
            .ok_or_else(|| Rejection::untrusted("assertion has no conditions"))?;
        self.check_window(conditions.attr("NotBefore"), conditions.attr("NotOnOrAfter"), now)?;

        let audience_ok = conditions
            .children_named(ASSERTION_NS, "AudienceRestriction")
            .flat_map(|r| r.children_named(ASSERTION_NS, "Audience"))
            .any(|a| a.text().trim() == self.audience);
        if !audience_ok {
            return Err(Rejection::untrusted(format!(
                "assertion audience does not include '{}'",
                self.audience
            )));
        }

        let subject = assertion
            .child(ASSERTION_NS, "Subject")
            .ok_or_else(|| Rejection::untrusted("assertion has no subject"))?;
        self.check_subject_confirmation(subject, expected, now)?;

        let mut identity = ClaimsIdentity::new();
        if let Some(name_id) = subject.child(ASSERTION_NS, "NameID") {
            identity.add(NAME_IDENTIFIER_CLAIM, name_id.text().trim());
        }

        for statement in assertion.children_named(ASSERTION_NS, "AuthnStatement") {
            if let Some(class_ref) = statement
                .child(ASSERTION_NS, "AuthnContext")
                .and_then(|c| c.child(ASSERTION_NS, "AuthnContextClassRef"))
            {
                identity.add(AUTHENTICATION_METHOD_CLAIM, class_ref.text().trim());
            }
            if let Some(instant) = statement.attr("AuthnInstant") {
                identity.add(AUTHENTICATION_INSTANT_CLAIM, instant);
            }
        }

        for statement in assertion.children_named(ASSERTION_NS, "AttributeStatement") {
            for attribute in statement.children_named(ASSERTION_NS, "Attribute") {
                let Some(name) = attribute.attr("Name") else {
                    continue;
                };
                for value in attribute.children_named(ASSERTION_NS, "AttributeValue") {
                    identity.add(name, value.text());
                }
            }
        }

        Ok(identity)
    }

    /// At least one bearer confirmation must be within its window. Every
    /// bearer confirmation that names a request must name this one.
    fn check_subject_confirmation(
        &self,
        subject: &Element,
        expected: &str,
        now: DateTime<Utc>,
    ) -> Result<(), Rejection> {
        let mut confirmed = false;
        for confirmation in subject.children_named(ASSERTION_NS, "SubjectConfirmation") {
            if confirmation.attr("Method") != Some(BEARER) {
                continue;
            }
            let Some(data) = confirmation.child(ASSERTION_NS, "SubjectConfirmationData") else {
                continue;
            };
            if let Some(in_response_to) = data.attr("InResponseTo") {
                if in_response_to != expected {
                    return Err(Rejection::new(RejectReason::RequestIdMismatch {
                        expected: expected.to_string(),
                        actual: Some(in_response_to.to_string()),
                    }));
                }
            }
            if data.attr("NotOnOrAfter").is_some()
                && self
                    .check_window(data.attr("NotBefore"), data.attr("NotOnOrAfter"), now)
                    .is_ok()
            {
                confirmed = true;
            }
        }

        if !confirmed {
            return Err(Rejection::untrusted("no valid bearer subject confirmation"));
        }
        Ok(())
    }

    fn check_window(
        &self,
        not_before: Option<&str>,
        not_on_or_after: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<(), Rejection> {
        if let Some(not_before) = not_before {
            let earliest = parse_instant(not_before)?
                .checked_sub_signed(self.clock_skew)
                .ok_or_else(|| Rejection::untrusted("NotBefore out of range"))?;
            if now < earliest {
                return Err(Rejection::untrusted("assertion not yet valid"));
            }
        }
        if let Some(not_on_or_after) = not_on_or_after {
            let latest = parse_instant(not_on_or_after)?
                .checked_add_signed(self.clock_skew)
                .ok_or_else(|| Rejection::untrusted("NotOnOrAfter out of range"))?;
            if now >= latest {
                return Err(Rejection::untrusted("assertion has expired"));
            }
        }
        Ok(())
    }
}

fn parse_instant(value: &str) -> Result<DateTime<Utc>, Rejection> {
    DateTime::parse_from_rfc3339(value.trim())
        .map(|t| t.with_timezone(&Utc))
        .map_err(|_| Rejection::untrusted(format!("invalid timestamp '{}'", value)))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::saml::claims::extract_claim;
    use crate::xmldsig::sign_enveloped;
    use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
    use ring::signature::RsaKeyPair;
    use x509_parser::pem::Pem;

    pub(crate) const GATEWAY_ENTITY_ID: &str = "https://gateway.example.org/metadata";
    pub(crate) const SP_ENTITY_ID: &str = "https://adfs.example.org/stepup";
    pub(crate) const GATEWAY_CERT: &str = include_str!("../../tests/fixtures/gateway-cert.pem");
    const GATEWAY_KEY: &str = include_str!("../../tests/fixtures/gateway-key.pem");
    const SP_CERT: &str = include_str!("../../tests/fixtures/sp-cert.pem");
    const LOA2: &str = "http://stepup.example.org/assurance/loa2";
    const LOA3: &str = "http://stepup.example.org/assurance/loa3";

    pub(crate) struct TestAssertion {
        pub id: String,
        pub issuer: String,
        pub audience: String,
        pub in_response_to: String,
        pub loa: String,
        pub valid_for_secs: i64,
        pub attributes: Vec<(String, String)>,
        pub signed: bool,
    }

    pub(crate) struct TestResponse {
        pub id: String,
        pub in_response_to: String,
        pub issuer: String,
        pub status_code: String,
        pub status_message: Option<String>,
        pub assertions: Vec<TestAssertion>,
        pub signed: bool,
    }

    impl TestAssertion {
        pub(crate) fn new(id: &str, request_id: &str, loa: &str) -> Self {
            Self {
                id: id.to_string(),
                issuer: GATEWAY_ENTITY_ID.to_string(),
                audience: SP_ENTITY_ID.to_string(),
                in_response_to: request_id.to_string(),
                loa: loa.to_string(),
                valid_for_secs: 300,
                attributes: Vec::new(),
                signed: false,
            }
        }

        fn xml(&self) -> String {
            let now = Utc::now();
            let attributes = if self.attributes.is_empty() {
                String::new()
            } else {
                let values: String = self
                    .attributes
                    .iter()
                    .map(|(name, value)| {
                        format!(
                            r#"<saml:Attribute Name="{}"><saml:AttributeValue>{}</saml:AttributeValue></saml:Attribute>"#,
                            name, value
                        )
                    })
                    .collect();
                format!("<saml:AttributeStatement>{}</saml:AttributeStatement>", values)
            };
            format!(
                concat!(
                    r#"<saml:Assertion ID="{id}" Version="2.0" IssueInstant="{now}">"#,
                    r#"<saml:Issuer>{issuer}</saml:Issuer>"#,
                    r#"<saml:Subject><saml:NameID>urn:collab:person:example.org:j_doe_example.org</saml:NameID>"#,
                    r#"<saml:SubjectConfirmation Method="urn:oasis:names:tc:SAML:2.0:cm:bearer">"#,
                    r#"<saml:SubjectConfirmationData InResponseTo="{irt}" NotOnOrAfter="{until}" Recipient="https://adfs.example.org/adfs/ls/"/>"#,
                    r#"</saml:SubjectConfirmation></saml:Subject>"#,
                    r#"<saml:Conditions NotBefore="{before}" NotOnOrAfter="{until}">"#,
                    r#"<saml:AudienceRestriction><saml:Audience>{audience}</saml:Audience></saml:AudienceRestriction>"#,
                    r#"</saml:Conditions>"#,
                    r#"<saml:AuthnStatement AuthnInstant="{now}"><saml:AuthnContext>"#,
                    r#"<saml:AuthnContextClassRef>{loa}</saml:AuthnContextClassRef>"#,
                    r#"</saml:AuthnContext></saml:AuthnStatement>{attributes}"#,
                    r#"</saml:Assertion>"#
                ),
                id = self.id,
                now = instant(now),
                issuer = self.issuer,
                irt = self.in_response_to,
                until = instant(now + Duration::seconds(self.valid_for_secs)),
                before = instant(now - Duration::seconds(60)),
                audience = self.audience,
                loa = self.loa,
                attributes = attributes,
            )
        }
    }

    impl TestResponse {
        /// A successful, response-signed answer to `request_id` carrying one
        /// assertion at LoA 2.
        pub(crate) fn success(request_id: &str) -> Self {
            Self {
                id: "_r1".to_string(),
                in_response_to: request_id.to_string(),
                issuer: GATEWAY_ENTITY_ID.to_string(),
                status_code: STATUS_SUCCESS.to_string(),
                status_message: None,
                assertions: vec![TestAssertion::new("_a1", request_id, LOA2)],
                signed: true,
            }
        }

        pub(crate) fn failure(request_id: &str, message: &str) -> Self {
            Self {
                status_code: "urn:oasis:names:tc:SAML:2.0:status:Responder".to_string(),
                status_message: Some(message.to_string()),
                assertions: Vec::new(),
                ..Self::success(request_id)
            }
        }

        pub(crate) fn xml(&self) -> String {
            let status_message = self
                .status_message
                .as_ref()
                .map(|m| format!("<samlp:StatusMessage>{}</samlp:StatusMessage>", m))
                .unwrap_or_default();
            let assertions: String = self.assertions.iter().map(TestAssertion::xml).collect();
            let mut xml = format!(
                concat!(
                    r#"<samlp:Response xmlns:samlp="urn:oasis:names:tc:SAML:2.0:protocol" "#,
                    r#"xmlns:saml="urn:oasis:names:tc:SAML:2.0:assertion" ID="{id}" Version="2.0" "#,
                    r#"IssueInstant="{now}" InResponseTo="{irt}" Destination="https://adfs.example.org/adfs/ls/">"#,
                    r#"<saml:Issuer>{issuer}</saml:Issuer>"#,
                    r#"<samlp:Status><samlp:StatusCode Value="{code}"/>{message}</samlp:Status>"#,
                    r#"{assertions}</samlp:Response>"#
                ),
                id = self.id,
                now = instant(Utc::now()),
                irt = self.in_response_to,
                issuer = self.issuer,
                code = self.status_code,
                message = status_message,
                assertions = assertions,
            );

            let key = gateway_key();
            let der = gateway_der();
            for assertion in self.assertions.iter().filter(|a| a.signed) {
                xml = sign_enveloped(&xml, &assertion.id, &key, &der).unwrap();
            }
            if self.signed {
                xml = sign_enveloped(&xml, &self.id, &key, &der).unwrap();
            }
            xml
        }

        pub(crate) fn encoded(&self) -> String {
            BASE64.encode(self.xml())
        }
    }

    fn instant(t: DateTime<Utc>) -> String {
        t.format("%Y-%m-%dT%H:%M:%SZ").to_string()
    }

    fn pem_block(pem: &str) -> Vec<u8> {
        Pem::iter_from_buffer(pem.as_bytes()).next().unwrap().unwrap().contents
    }

    fn gateway_key() -> RsaKeyPair {
        RsaKeyPair::from_pkcs8(&pem_block(GATEWAY_KEY)).unwrap()
    }

    fn gateway_der() -> Vec<u8> {
        pem_block(GATEWAY_CERT)
    }

    pub(crate) fn verifier() -> ResponseVerifier {
        ResponseVerifier::new(
            GATEWAY_ENTITY_ID,
            SP_ENTITY_ID,
            vec![TrustedCertificate::from_pem(GATEWAY_CERT).unwrap()],
            300,
        )
        .unwrap()
    }

    fn verified(verification: Verification) -> VerifiedResponse {
        match verification {
            Verification::Verified(v) => v,
            Verification::Rejected(r) => panic!("unexpected rejection: {:?}", r),
        }
    }

    fn rejected(verification: Verification) -> Rejection {
        match verification {
            Verification::Verified(_) => panic!("unexpected verification"),
            Verification::Rejected(r) => r,
        }
    }

    fn is_untrusted(rejection: &Rejection) -> bool {
        matches!(rejection.reason, RejectReason::Untrusted(_))
    }

    #[test]
    fn test_signed_response_verifies() {
        let response = verified(verifier().verify(&TestResponse::success("_id1").encoded(), "_id1").unwrap());
        assert_eq!(response.request_id(), "_id1");
        assert_eq!(response.status(), &ResponseStatus::Success);
        assert_eq!(response.identities().len(), 1);

        let identity = &response.identities()[0];
        assert_eq!(identity.find(AUTHENTICATION_METHOD_CLAIM).unwrap().value, LOA2);
        assert_eq!(
            identity.find(NAME_IDENTIFIER_CLAIM).unwrap().value,
            "urn:collab:person:example.org:j_doe_example.org"
        );
        assert!(identity.find(AUTHENTICATION_INSTANT_CLAIM).is_some());
    }

    #[test]
    fn test_signed_assertions_without_response_signature() {
        let mut response = TestResponse::success("_id1");
        response.signed = false;
        response.assertions[0].signed = true;
        verified(verifier().verify(&response.encoded(), "_id1").unwrap());
    }

    #[test]
    fn test_unsigned_response_rejected() {
        let mut response = TestResponse::success("_id1");
        response.signed = false;
        assert!(is_untrusted(&rejected(verifier().verify(&response.encoded(), "_id1").unwrap())));
    }

    #[test]
    fn test_one_unsigned_assertion_rejects_all() {
        let mut response = TestResponse::success("_id1");
        response.signed = false;
        response.assertions[0].signed = true;
        response.assertions.push(TestAssertion::new("_a2", "_id1", LOA3));
        assert!(is_untrusted(&rejected(verifier().verify(&response.encoded(), "_id1").unwrap())));
    }

    #[test]
    fn test_untrusted_signer_rejected() {
        let sp_only = ResponseVerifier::new(
            GATEWAY_ENTITY_ID,
            SP_ENTITY_ID,
            vec![TrustedCertificate::from_pem(SP_CERT).unwrap()],
            300,
        )
        .unwrap();
        let rejection = rejected(sp_only.verify(&TestResponse::success("_id1").encoded(), "_id1").unwrap());
        assert!(matches!(rejection.reason, RejectReason::InvalidSignature(_)));
    }

    #[test]
    fn test_secondary_certificate_trusted() {
        let rollover = ResponseVerifier::new(
            GATEWAY_ENTITY_ID,
            SP_ENTITY_ID,
            vec![
                TrustedCertificate::from_pem(SP_CERT).unwrap(),
                TrustedCertificate::from_pem(GATEWAY_CERT).unwrap(),
            ],
            300,
        )
        .unwrap();
        verified(rollover.verify(&TestResponse::success("_id1").encoded(), "_id1").unwrap());
    }

    #[test]
    fn test_request_id_mismatch() {
        let rejection = rejected(verifier().verify(&TestResponse::success("_id1").encoded(), "_id2").unwrap());
        assert_eq!(
            rejection.reason,
            RejectReason::RequestIdMismatch {
                expected: "_id2".to_string(),
                actual: Some("_id1".to_string()),
            }
        );
    }

    #[test]
    fn test_subject_confirmation_bound_to_request() {
        let mut response = TestResponse::success("_id1");
        response.assertions[0].in_response_to = "_other".to_string();
        let rejection = rejected(verifier().verify(&response.encoded(), "_id1").unwrap());
        assert!(matches!(rejection.reason, RejectReason::RequestIdMismatch { .. }));
    }

    #[test]
    fn test_failure_status_carries_message() {
        let response = TestResponse::failure("_id1", "Authentication cancelled by user");
        let rejection = rejected(verifier().verify(&response.encoded(), "_id1").unwrap());
        assert!(matches!(rejection.reason, RejectReason::Status(_)));
        assert_eq!(
            rejection.status_message.as_deref(),
            Some("Authentication cancelled by user")
        );
    }

    #[test]
    fn test_unsigned_failure_hides_message() {
        let mut response = TestResponse::failure("_id1", "attacker text");
        response.signed = false;
        let rejection = rejected(verifier().verify(&response.encoded(), "_id1").unwrap());
        assert!(matches!(rejection.reason, RejectReason::Status(_)));
        assert_eq!(rejection.status_message, None);
    }

    #[test]
    fn test_wrong_audience_rejected() {
        let mut response = TestResponse::success("_id1");
        response.assertions[0].audience = "https://other.example.org".to_string();
        assert!(is_untrusted(&rejected(verifier().verify(&response.encoded(), "_id1").unwrap())));
    }

    #[test]
    fn test_wrong_issuer_rejected() {
        let mut response = TestResponse::success("_id1");
        response.issuer = "https://evil.example.org".to_string();
        assert!(is_untrusted(&rejected(verifier().verify(&response.encoded(), "_id1").unwrap())));

        let mut response = TestResponse::success("_id1");
        response.assertions[0].issuer = "https://evil.example.org".to_string();
        assert!(is_untrusted(&rejected(verifier().verify(&response.encoded(), "_id1").unwrap())));
    }

    #[test]
    fn test_expired_assertion_rejected() {
        let mut response = TestResponse::success("_id1");
        response.assertions[0].valid_for_secs = -3600;
        assert!(is_untrusted(&rejected(verifier().verify(&response.encoded(), "_id1").unwrap())));
    }

    #[test]
    fn test_clock_skew_and_fixed_clock() {
        let encoded = TestResponse::success("_id1").encoded();
        // Valid for 300s plus 300s of skew.
        let later = Utc::now() + Duration::seconds(500);
        verified(verifier().at(later).verify(&encoded, "_id1").unwrap());

        let much_later = Utc::now() + Duration::seconds(3600);
        rejected(verifier().at(much_later).verify(&encoded, "_id1").unwrap());
    }

    #[test]
    fn test_out_of_range_clock_skew_is_a_configuration_error() {
        let trusted = || vec![TrustedCertificate::from_pem(GATEWAY_CERT).unwrap()];
        for skew in [i64::MAX, i64::MIN, -1] {
            let err = ResponseVerifier::new(GATEWAY_ENTITY_ID, SP_ENTITY_ID, trusted(), skew)
                .unwrap_err();
            assert_eq!(err.code(), "ERROR_0002");
        }
    }

    #[test]
    fn test_window_at_the_edge_of_time_rejected() {
        // A skew chrono accepts, added to a far future instant, leaves its range.
        let verifier = ResponseVerifier::new(
            GATEWAY_ENTITY_ID,
            SP_ENTITY_ID,
            vec![TrustedCertificate::from_pem(GATEWAY_CERT).unwrap()],
            i64::MAX / 1000,
        )
        .unwrap();
        let rejection = verifier
            .check_window(None, Some("9999-12-31T23:59:59Z"), Utc::now())
            .unwrap_err();
        assert!(is_untrusted(&rejection));
    }

    #[test]
    fn test_tampered_response_rejected() {
        let xml = TestResponse::success("_id1").xml().replace(LOA2, LOA3);
        let rejection = rejected(verifier().verify(&BASE64.encode(xml), "_id1").unwrap());
        assert!(matches!(rejection.reason, RejectReason::InvalidSignature(_)));
    }

    #[test]
    fn test_duplicate_signed_id_rejected() {
        let xml = TestResponse::success("_id1")
            .xml()
            .replace("</samlp:Response>", r#"<samlp:Extensions ID="_r1"/></samlp:Response>"#);
        let rejection = rejected(verifier().verify(&BASE64.encode(xml), "_id1").unwrap());
        assert!(matches!(rejection.reason, RejectReason::InvalidSignature(_)));
    }

    #[test]
    fn test_two_identities_in_order() {
        let mut response = TestResponse::success("_id1");
        response.assertions.push(TestAssertion::new("_a2", "_id1", LOA3));
        let verified = verified(verifier().verify(&response.encoded(), "_id1").unwrap());
        assert_eq!(verified.identities().len(), 2);
        assert_eq!(
            extract_claim(verified.identities(), AUTHENTICATION_METHOD_CLAIM).unwrap().value,
            LOA2
        );
    }

    #[test]
    fn test_attributes_become_claims() {
        let mut response = TestResponse::success("_id1");
        response.assertions[0]
            .attributes
            .push(("urn:mace:dir:attribute-def:mail".to_string(), "j.doe@example.org".to_string()));
        let verified = verified(verifier().verify(&response.encoded(), "_id1").unwrap());
        let mail = verified.identities()[0].find("urn:mace:dir:attribute-def:mail").unwrap();
        assert_eq!(mail.value, "j.doe@example.org");
    }

    #[test]
    fn test_success_without_assertions_has_no_identities() {
        let mut response = TestResponse::success("_id1");
        response.assertions.clear();
        let verified = verified(verifier().verify(&response.encoded(), "_id1").unwrap());
        assert!(verified.identities().is_empty());
    }

    #[test]
    fn test_undecodable_input_is_error() {
        assert!(verifier().verify("%%%", "_id1").is_err());
        assert!(verifier().verify(&BASE64.encode("not xml"), "_id1").is_err());
    }

    #[test]
    fn test_other_document_rejected() {
        let encoded = BASE64.encode(r#"<samlp:AuthnRequest xmlns:samlp="urn:oasis:names:tc:SAML:2.0:protocol"/>"#);
        assert!(is_untrusted(&rejected(verifier().verify(&encoded, "_id1").unwrap())));
    }

    #[test]
    fn test_from_config() {
        let mut config = crate::saml::request::tests::sample_config();
        if let Some(gateway) = config.gateway.as_mut() {
            gateway.signing_certificate = crate::config::CertificateSource::Pem(GATEWAY_CERT.to_string());
        }
        let verifier = ResponseVerifier::from_config(&config).unwrap();
        verified(verifier.verify(&TestResponse::success("_id1").encoded(), "_id1").unwrap());

        config.gateway = None;
        assert!(ResponseVerifier::from_config(&config).is_err());
    }
}
