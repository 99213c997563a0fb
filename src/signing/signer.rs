//! Signs the outbound authentication request.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use tracing::debug;

use super::store::SigningCertificate;
use crate::error::{StepUpError, StepUpResult};
use crate::saml::request::AuthenticationRequest;
use crate::xmldsig::engine::{DSIG_NS, RSA_SHA256};
use crate::xmldsig::{parse, sign_enveloped};

/// A signed request, ready for transport.
///
/// `request_xml` is exactly the text that was signed. It must reach the
/// gateway without being re-serialized.
#[derive(Debug, Clone)]
pub struct SignedEnvelope {
    pub request_id: String,
    pub request_xml: String,
    pub signature_algorithm: &'static str,
    pub signature_value: String,
    /// Base64 of `request_xml`.
    pub encoded: String,
}

/// Serialize `request` and sign it with the certificate's private key.
pub fn sign(
    request: &AuthenticationRequest,
    certificate: &SigningCertificate,
) -> StepUpResult<SignedEnvelope> {
    let key_pair = certificate.private_key.as_deref().ok_or_else(|| {
        StepUpError::config(format!(
            "certificate with thumbprint {} has no private key",
            certificate.thumbprint
        ))
    })?;

    let xml = request.to_xml();
    let signed = sign_enveloped(&xml, &request.id, key_pair, &certificate.certificate_der)?;

    let signature_value = parse(&signed)?
        .child(DSIG_NS, "Signature")
        .and_then(|s| s.child(DSIG_NS, "SignatureValue"))
        .map(|v| v.text())
        .ok_or_else(|| StepUpError::Signing("signature value missing".to_string()))?;

    debug!(request_id = %request.id, thumbprint = %certificate.thumbprint, "Signed authentication request");

    Ok(SignedEnvelope {
        request_id: request.id.clone(),
        encoded: BASE64.encode(signed.as_bytes()),
        request_xml: signed,
        signature_algorithm: RSA_SHA256,
        signature_value,
    })
}
