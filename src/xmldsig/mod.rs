//! XML digital signatures (enveloped, exclusive C14N, RSA-SHA256).
//!
//! The outbound request is signed and inbound responses are verified with
//! the same canonicalizer, over the same owned element tree.

pub mod c14n;
pub mod engine;
pub mod sign;
pub mod tree;
pub mod verify;

pub use engine::{engine, SignatureEngine, RSA_SHA256};
pub use sign::sign_enveloped;
pub use tree::{parse, Element, Node};
pub use verify::{verify_enveloped, SignatureError, TrustedCertificate};
