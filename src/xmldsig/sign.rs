//! Enveloped XML signatures.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use ring::digest;
use ring::signature::RsaKeyPair;

use super::c14n::canonicalize;
use super::engine::{engine, DSIG_NS, ENVELOPED_SIGNATURE, EXC_C14N, RSA_SHA256, SHA256_DIGEST};
use super::tree::parse;
use crate::error::{StepUpError, StepUpResult};

/// Sign the element carrying `ID="reference_id"` and return the document
/// with the `ds:Signature` inserted after that element's `Issuer`.
///
/// Everything outside the inserted signature is left byte for byte as it
/// was passed in; the returned text must be transmitted unmodified.
pub fn sign_enveloped(
    xml: &str,
    reference_id: &str,
    key_pair: &RsaKeyPair,
    certificate_der: &[u8],
) -> StepUpResult<String> {
    let document = parse(xml)?;
    if document.count_id(reference_id) != 1 {
        return Err(StepUpError::Signing(format!(
            "expected exactly one element with ID '{}'",
            reference_id
        )));
    }
    let target = document
        .find_by_id(reference_id)
        .ok_or_else(|| StepUpError::Signing("reference element not found".to_string()))?;
    if target.child(DSIG_NS, "Signature").is_some() {
        return Err(StepUpError::Signing("element is already signed".to_string()));
    }

    let digest_value = digest::digest(&digest::SHA256, canonicalize(target, None).as_bytes());

    let signed_info = build_signed_info(reference_id, &BASE64.encode(digest_value));
    let canonical_signed_info = canonicalize(&parse(&signed_info)?, None);
    let signature_value = engine().sign_sha256(key_pair, canonical_signed_info.as_bytes())?;

    let mut signature = String::new();
    signature.push_str("<ds:Signature xmlns:ds=\"");
    signature.push_str(DSIG_NS);
    signature.push_str("\">");
    signature.push_str(&signed_info);
    signature.push_str("<ds:SignatureValue>");
    signature.push_str(&BASE64.encode(signature_value));
    signature.push_str("</ds:SignatureValue><ds:KeyInfo><ds:X509Data><ds:X509Certificate>");
    signature.push_str(&BASE64.encode(certificate_der));
    signature.push_str("</ds:X509Certificate></ds:X509Data></ds:KeyInfo></ds:Signature>");

    let at = insertion_point(xml, reference_id)?;
    let mut signed = String::with_capacity(xml.len() + signature.len());
    signed.push_str(&xml[..at]);
    signed.push_str(&signature);
    signed.push_str(&xml[at..]);
    Ok(signed)
}

fn build_signed_info(reference_id: &str, digest_b64: &str) -> String {
    let mut s = String::new();
    s.push_str("<ds:SignedInfo xmlns:ds=\"");
    s.push_str(DSIG_NS);
    s.push_str("\"><ds:CanonicalizationMethod Algorithm=\"");
    s.push_str(EXC_C14N);
    s.push_str("\"></ds:CanonicalizationMethod><ds:SignatureMethod Algorithm=\"");
    s.push_str(RSA_SHA256);
    s.push_str("\"></ds:SignatureMethod><ds:Reference URI=\"#");
    s.push_str(reference_id);
    s.push_str("\"><ds:Transforms><ds:Transform Algorithm=\"");
    s.push_str(ENVELOPED_SIGNATURE);
    s.push_str("\"></ds:Transform><ds:Transform Algorithm=\"");
    s.push_str(EXC_C14N);
    s.push_str("\"></ds:Transform></ds:Transforms><ds:DigestMethod Algorithm=\"");
    s.push_str(SHA256_DIGEST);
    s.push_str("\"></ds:DigestMethod><ds:DigestValue>");
    s.push_str(digest_b64);
    s.push_str("</ds:DigestValue></ds:Reference></ds:SignedInfo>");
    s
}

/// Byte offset right after the signed element's `Issuer` end tag, or right
/// after its start tag when it has no issuer.
fn insertion_point(xml: &str, reference_id: &str) -> StepUpResult<usize> {
    let id_pos = find_id_attribute(xml, reference_id)
        .ok_or_else(|| StepUpError::Signing("cannot locate signed element".to_string()))?;
    let start_tag_end = xml[id_pos..]
        .find('>')
        .map(|p| id_pos + p + 1)
        .ok_or_else(|| StepUpError::Signing("unterminated start tag".to_string()))?;

    // The issuer, when present, is the first child of a SAML request,
    // response or assertion.
    let rest = &xml[start_tag_end..];
    let first_child = rest.trim_start();
    if first_child.starts_with('<') && local_name(&first_child[1..]) == "Issuer" {
        let mut search = start_tag_end;
        while let Some(p) = xml[search..].find("</") {
            let tag_start = search + p + 2;
            let tag_end = xml[tag_start..]
                .find('>')
                .map(|q| tag_start + q)
                .ok_or_else(|| StepUpError::Signing("unterminated end tag".to_string()))?;
            if local_name(&xml[tag_start..tag_end]) == "Issuer" {
                return Ok(tag_end + 1);
            }
            search = tag_end;
        }
        return Err(StepUpError::Signing("unterminated Issuer element".to_string()));
    }

    Ok(start_tag_end)
}

/// Offset of an `ID` attribute with the given value. Attributes whose name
/// merely ends in `ID`, such as `InResponseTo` or `RequestID`, do not match.
fn find_id_attribute(xml: &str, reference_id: &str) -> Option<usize> {
    let double = format!("ID=\"{}\"", reference_id);
    let single = format!("ID='{}'", reference_id);
    [double, single]
        .iter()
        .flat_map(|needle| xml.match_indices(needle.as_str()).map(|(pos, _)| pos))
        .filter(|&pos| xml[..pos].ends_with(|c: char| c.is_ascii_whitespace()))
        .min()
}

fn local_name(tag: &str) -> &str {
    let name_end = tag
        .find(|c: char| c.is_whitespace() || c == '>' || c == '/')
        .unwrap_or(tag.len());
    let name = &tag[..name_end];
    name.rsplit(':').next().unwrap_or(name)
}
