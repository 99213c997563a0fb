//! Browser transport encoding.
//!
//! Outbound: raw deflate then base64 for the auto-submitting form.
//! Inbound: the postback fields carrying the gateway response and the
//! echoed request id.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use flate2::read::DeflateDecoder;
use flate2::write::DeflateEncoder;
use flate2::Compression;
use std::collections::HashMap;
use std::io::{Read, Write};
use tracing::debug;

use crate::error::{StepUpError, StepUpResult};
use crate::signing::SignedEnvelope;

/// Form field carrying the compressed request.
pub const SAML_REQUEST_FIELD: &str = "SAMLRequest";
/// Form field carrying the gateway response.
pub const SAML_RESPONSE_FIELD: &str = "SAMLResponse";
/// Form field carrying the echoed request id.
pub const REQUEST_ID_FIELD: &str = "RequestId";
/// Form field carrying the relay context.
pub const RELAY_STATE_FIELD: &str = "RelayState";

/// Largest request or response accepted after decoding.
pub const MAX_DECODED_SIZE: usize = 256 * 1024;

/// What the browser posts to the gateway.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportPackage {
    pub compressed_encoded_request: String,
    pub target_url: String,
    /// The callback URL the gateway returns to.
    pub relay_context: String,
}

/// Compress and encode a signed request for transport.
pub fn encode(
    envelope: &SignedEnvelope,
    target_url: &str,
    relay_context: &str,
) -> StepUpResult<TransportPackage> {
    let mut encoder = DeflateEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(envelope.request_xml.as_bytes())
        .and_then(|_| encoder.finish())
        .map(|compressed| TransportPackage {
            compressed_encoded_request: BASE64.encode(compressed),
            target_url: target_url.to_string(),
            relay_context: relay_context.to_string(),
        })
        .map_err(|e| StepUpError::Signing(format!("failed to compress request: {}", e)))
}

/// Reverse of [`encode`]: base64 decode and inflate a request.
pub fn inflate_request(encoded: &str) -> StepUpResult<String> {
    let compressed = decode_base64(encoded)?;
    let mut decoder = DeflateDecoder::new(compressed.as_slice()).take(MAX_DECODED_SIZE as u64 + 1);
    let mut xml = String::new();
    decoder
        .read_to_string(&mut xml)
        .map_err(|e| StepUpError::decode(format!("failed to inflate request: {}", e)))?;
    if xml.len() > MAX_DECODED_SIZE {
        return Err(StepUpError::decode("inflated request exceeds size limit"));
    }
    Ok(xml)
}

/// Decode the base64 response text posted back by the browser.
pub fn decode_response(encoded: &str) -> StepUpResult<String> {
    let bytes = decode_base64(encoded)?;
    String::from_utf8(bytes).map_err(|_| StepUpError::decode("response is not valid UTF-8"))
}

fn decode_base64(encoded: &str) -> StepUpResult<Vec<u8>> {
    let compact: String = encoded.chars().filter(|c| !c.is_ascii_whitespace()).collect();
    if compact.len() > MAX_DECODED_SIZE / 3 * 4 + 4 {
        return Err(StepUpError::decode("payload exceeds size limit"));
    }
    BASE64
        .decode(compact)
        .map_err(|e| StepUpError::decode(format!("invalid base64: {}", e)))
}

/// The postback payload relayed by the browser.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProofData {
    fields: HashMap<String, String>,
}

impl ProofData {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse an `application/x-www-form-urlencoded` body.
    pub fn from_form_body(body: &str) -> StepUpResult<Self> {
        let mut proof = Self::new();
        for pair in body.split('&').filter(|p| !p.is_empty()) {
            let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
            proof.insert(form_decode(key)?, form_decode(value)?);
        }
        Ok(proof)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.fields.insert(key.into(), value.into());
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.fields.get(key).map(String::as_str)
    }
}

fn form_decode(value: &str) -> StepUpResult<String> {
    urlencoding::decode(&value.replace('+', " "))
        .map(|v| v.into_owned())
        .map_err(|e| StepUpError::decode(format!("invalid form encoding: {}", e)))
}

/// The fields of a postback the verifier needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundProof {
    pub request_id: String,
    pub encoded_response: String,
}

/// Extract the request id and encoded response from a postback.
pub fn decode(proof: &ProofData) -> StepUpResult<InboundProof> {
    let encoded_response = required(proof, SAML_RESPONSE_FIELD)?;
    let request_id = required(proof, REQUEST_ID_FIELD)?;
    debug!(request_id = %request_id, "Decoded proof data");
    Ok(InboundProof {
        request_id,
        encoded_response,
    })
}

fn required(proof: &ProofData, field: &str) -> StepUpResult<String> {
    match proof.get(field).map(str::trim) {
        Some(value) if !value.is_empty() => Ok(value.to_string()),
        _ => Err(StepUpError::decode(format!("proof data has no {}", field))),
    }
}
