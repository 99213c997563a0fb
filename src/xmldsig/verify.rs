//! Enveloped XML signature verification.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use ring::digest;
use thiserror::Error;
use tracing::debug;
use x509_parser::pem::Pem;
use x509_parser::prelude::*;

use super::c14n::canonicalize;
use super::engine::{engine, DSIG_NS, ENVELOPED_SIGNATURE, EXC_C14N, SHA256_DIGEST};
use super::tree::Element;
use crate::error::{StepUpError, StepUpResult};

/// Why an enveloped signature was not accepted.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SignatureError {
    #[error("element is not signed")]
    Missing,
    #[error("malformed signature: {0}")]
    Malformed(String),
    #[error("signature reference does not point at the enveloping element")]
    ReferenceMismatch,
    #[error("signed ID '{0}' is not unique in the document")]
    DuplicateId(String),
    #[error("unsupported algorithm: {0}")]
    UnsupportedAlgorithm(String),
    #[error("digest mismatch")]
    DigestMismatch,
    #[error("signature value does not verify against any trusted certificate")]
    InvalidSignature,
}

/// A certificate whose key is trusted to sign responses.
#[derive(Debug, Clone)]
pub struct TrustedCertificate {
    subject: String,
    rsa_public_key: Vec<u8>,
}

impl TrustedCertificate {
    /// Load the first certificate from PEM text.
    pub fn from_pem(pem: &str) -> StepUpResult<Self> {
        for block in Pem::iter_from_buffer(pem.as_bytes()) {
            let block =
                block.map_err(|e| StepUpError::config(format!("invalid PEM: {:?}", e)))?;
            if block.label == "CERTIFICATE" {
                return Self::from_der(&block.contents);
            }
        }
        Err(StepUpError::config("no CERTIFICATE block in PEM"))
    }

    /// Load a DER encoded certificate.
    pub fn from_der(der: &[u8]) -> StepUpResult<Self> {
        let (_, cert) = X509Certificate::from_der(der)
            .map_err(|e| StepUpError::config(format!("invalid certificate: {:?}", e)))?;
        let rsa_public_key = rsa_public_key(&cert)?;
        Ok(Self {
            subject: cert.subject().to_string(),
            rsa_public_key,
        })
    }

    /// Subject distinguished name, for logs.
    pub fn subject(&self) -> &str {
        &self.subject
    }
}

/// DER `RSAPublicKey` of a certificate, as ring expects it.
pub(crate) fn rsa_public_key(cert: &X509Certificate<'_>) -> StepUpResult<Vec<u8>> {
    let spki = cert.public_key();
    match spki.parsed() {
        Ok(x509_parser::public_key::PublicKey::RSA(_)) => {
            let bytes: &[u8] = &spki.subject_public_key.data;
            Ok(bytes.to_vec())
        }
        _ => Err(StepUpError::config("certificate does not carry an RSA key")),
    }
}

/// Verify the enveloped signature that is a direct child of `signed`.
///
/// `document` is the root the element was taken from; the signed ID must
/// be unique in it.
pub fn verify_enveloped(
    document: &Element,
    signed: &Element,
    trusted: &[TrustedCertificate],
) -> Result<(), SignatureError> {
    let mut signatures = signed.children_named(DSIG_NS, "Signature");
    let signature = signatures.next().ok_or(SignatureError::Missing)?;
    if signatures.next().is_some() {
        return Err(SignatureError::Malformed("more than one signature".to_string()));
    }

    let id = signed
        .attr("ID")
        .ok_or_else(|| SignatureError::Malformed("signed element has no ID".to_string()))?;
    if document.count_id(id) != 1 {
        return Err(SignatureError::DuplicateId(id.to_string()));
    }

    let signed_info = required(signature, "SignedInfo")?;

    let c14n_method = algorithm(required(signed_info, "CanonicalizationMethod")?)?;
    if c14n_method != EXC_C14N {
        return Err(SignatureError::UnsupportedAlgorithm(c14n_method.to_string()));
    }

    let signature_method = algorithm(required(signed_info, "SignatureMethod")?)?;
    if !engine().supports(signature_method) {
        return Err(SignatureError::UnsupportedAlgorithm(signature_method.to_string()));
    }

    let mut references = signed_info.children_named(DSIG_NS, "Reference");
    let reference = references
        .next()
        .ok_or_else(|| SignatureError::Malformed("no Reference".to_string()))?;
    if references.next().is_some() {
        return Err(SignatureError::Malformed("more than one Reference".to_string()));
    }

    let uri = reference.attr("URI").unwrap_or_default();
    if uri.strip_prefix('#') != Some(id) {
        return Err(SignatureError::ReferenceMismatch);
    }

    if let Some(transforms) = reference.child(DSIG_NS, "Transforms") {
        for transform in transforms.elements() {
            let alg = algorithm(transform)?;
            if alg != ENVELOPED_SIGNATURE && alg != EXC_C14N {
                return Err(SignatureError::UnsupportedAlgorithm(alg.to_string()));
            }
            if transform.elements().next().is_some() {
                return Err(SignatureError::UnsupportedAlgorithm(
                    "transform parameters (InclusiveNamespaces)".to_string(),
                ));
            }
        }
    }

    let digest_method = algorithm(required(reference, "DigestMethod")?)?;
    if digest_method != SHA256_DIGEST {
        return Err(SignatureError::UnsupportedAlgorithm(digest_method.to_string()));
    }

    let expected_digest = decode_b64(&required(reference, "DigestValue")?.text())?;
    let canonical = canonicalize(signed, Some(signature));
    let actual_digest = digest::digest(&digest::SHA256, canonical.as_bytes());
    if actual_digest.as_ref() != expected_digest.as_slice() {
        return Err(SignatureError::DigestMismatch);
    }

    let signature_value = decode_b64(&required(signature, "SignatureValue")?.text())?;
    let canonical_signed_info = canonicalize(signed_info, None);

    for cert in trusted {
        if engine().verify(
            signature_method,
            &cert.rsa_public_key,
            canonical_signed_info.as_bytes(),
            &signature_value,
        ) {
            debug!(subject = %cert.subject, id = %id, "Signature verified");
            return Ok(());
        }
    }

    Err(SignatureError::InvalidSignature)
}

fn required<'a>(parent: &'a Element, local: &str) -> Result<&'a Element, SignatureError> {
    parent
        .child(DSIG_NS, local)
        .ok_or_else(|| SignatureError::Malformed(format!("missing {}", local)))
}

fn algorithm(element: &Element) -> Result<&str, SignatureError> {
    element
        .attr("Algorithm")
        .ok_or_else(|| SignatureError::Malformed(format!("{} without Algorithm", element.local)))
}

fn decode_b64(text: &str) -> Result<Vec<u8>, SignatureError> {
    let compact: String = text.chars().filter(|c| !c.is_whitespace()).collect();
    BASE64
        .decode(compact)
        .map_err(|e| SignatureError::Malformed(format!("bad base64: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::xmldsig::sign::sign_enveloped;
    use crate::xmldsig::tree::parse;
    use ring::signature::RsaKeyPair;

    const SP_CERT: &str = include_str!("../../tests/fixtures/sp-cert.pem");
    const SP_KEY: &str = include_str!("../../tests/fixtures/sp-key.pem");
    const GATEWAY_CERT: &str = include_str!("../../tests/fixtures/gateway-cert.pem");

    const DOC: &str = r#"<samlp:Response xmlns:samlp="urn:oasis:names:tc:SAML:2.0:protocol" xmlns:saml="urn:oasis:names:tc:SAML:2.0:assertion" ID="_resp1">
  <saml:Issuer>https://gateway.example.org</saml:Issuer>
  <samlp:Status><samlp:StatusCode Value="urn:oasis:names:tc:SAML:2.0:status:Success"/></samlp:Status>
</samlp:Response>"#;

    fn pem_der(pem: &str, label: &str) -> Vec<u8> {
        Pem::iter_from_buffer(pem.as_bytes())
            .map(|p| p.unwrap())
            .find(|p| p.label == label)
            .unwrap()
            .contents
    }

    fn signed_doc() -> String {
        let key = RsaKeyPair::from_pkcs8(&pem_der(SP_KEY, "PRIVATE KEY")).unwrap();
        sign_enveloped(DOC, "_resp1", &key, &pem_der(SP_CERT, "CERTIFICATE")).unwrap()
    }

    fn trusted() -> Vec<TrustedCertificate> {
        vec![TrustedCertificate::from_pem(SP_CERT).unwrap()]
    }

    #[test]
    fn test_sign_then_verify() {
        let signed = signed_doc();
        let root = parse(&signed).unwrap();
        assert_eq!(verify_enveloped(&root, &root, &trusted()), Ok(()));
    }

    #[test]
    fn test_signing_leaves_document_untouched() {
        let signed = signed_doc();
        let start = signed.find("<ds:Signature").unwrap();
        let end = signed.find("</ds:Signature>").unwrap() + "</ds:Signature>".len();
        let stripped = format!("{}{}", &signed[..start], &signed[end..]);
        assert_eq!(stripped, DOC);
    }

    #[test]
    fn test_untrusted_certificate_rejected() {
        let signed = signed_doc();
        let root = parse(&signed).unwrap();
        let other = vec![TrustedCertificate::from_pem(GATEWAY_CERT).unwrap()];
        assert_eq!(
            verify_enveloped(&root, &root, &other),
            Err(SignatureError::InvalidSignature)
        );
    }

    #[test]
    fn test_secondary_certificate_accepted() {
        let signed = signed_doc();
        let root = parse(&signed).unwrap();
        let both = vec![
            TrustedCertificate::from_pem(GATEWAY_CERT).unwrap(),
            TrustedCertificate::from_pem(SP_CERT).unwrap(),
        ];
        assert_eq!(verify_enveloped(&root, &root, &both), Ok(()));
    }

    #[test]
    fn test_tampered_content_rejected() {
        let signed = signed_doc().replace("https://gateway.example.org<", "https://evil.example.org<");
        let root = parse(&signed).unwrap();
        assert_eq!(
            verify_enveloped(&root, &root, &trusted()),
            Err(SignatureError::DigestMismatch)
        );
    }

    #[test]
    fn test_unsigned_rejected() {
        let root = parse(DOC).unwrap();
        assert_eq!(
            verify_enveloped(&root, &root, &trusted()),
            Err(SignatureError::Missing)
        );
    }

    #[test]
    fn test_reference_to_other_element_rejected() {
        let signed = signed_doc().replace("URI=\"#_resp1\"", "URI=\"#_other\"");
        let root = parse(&signed).unwrap();
        assert_eq!(
            verify_enveloped(&root, &root, &trusted()),
            Err(SignatureError::ReferenceMismatch)
        );
    }

    #[test]
    fn test_trusted_certificate_from_garbage() {
        assert!(TrustedCertificate::from_pem("not a pem").is_err());
    }
}
