//! Signing key lookup and request signing.

pub mod resolver;
pub mod signer;
pub mod store;

pub use resolver::resolve;
pub use signer::{sign, SignedEnvelope};
pub use store::{CertificateStore, FileCertificateStore, OpenStore, SigningCertificate, Thumbprint};
