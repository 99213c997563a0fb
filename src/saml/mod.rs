//! SAML protocol messages exchanged with the step-up gateway.
//!
//! Builds the second-factor AuthnRequest, moves it through the browser and
//! verifies the gateway's answer.

pub mod claims;
pub mod codec;
pub mod request;
pub mod response;

/// SAML 2.0 protocol namespace (`samlp`).
pub const PROTOCOL_NS: &str = "urn:oasis:names:tc:SAML:2.0:protocol";
/// SAML 2.0 assertion namespace (`saml`).
pub const ASSERTION_NS: &str = "urn:oasis:names:tc:SAML:2.0:assertion";

pub use claims::{extract_claim, AuthenticationClaim, ClaimsIdentity};
pub use codec::{decode, encode, InboundProof, ProofData, TransportPackage};
pub use request::{name_id, AuthenticationRequest, Comparison};
pub use response::{
    RejectReason, Rejection, ResponseStatus, ResponseVerifier, Verification, VerifiedResponse,
};
