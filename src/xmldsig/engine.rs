//! Process-wide signature engine.
//!
//! SHA-256 signature support is switched on exactly once per process, on
//! first use, behind a `OnceLock`. Concurrent first callers all observe the
//! same engine; there is no teardown.

use ring::rand::SystemRandom;
use ring::signature::{self, RsaKeyPair};
use std::sync::OnceLock;
use tracing::debug;

use crate::error::{StepUpError, StepUpResult};

/// XML digital signature namespace.
pub const DSIG_NS: &str = "http://www.w3.org/2000/09/xmldsig#";
/// Exclusive canonicalization without comments.
pub const EXC_C14N: &str = "http://www.w3.org/2001/10/xml-exc-c14n#";
/// Enveloped signature transform.
pub const ENVELOPED_SIGNATURE: &str = "http://www.w3.org/2000/09/xmldsig#enveloped-signature";
/// SHA-256 digest method.
pub const SHA256_DIGEST: &str = "http://www.w3.org/2001/04/xmlenc#sha256";
/// RSA-SHA256 signature method, the one used for outbound requests.
pub const RSA_SHA256: &str = "http://www.w3.org/2001/04/xmldsig-more#rsa-sha256";
pub const RSA_SHA384: &str = "http://www.w3.org/2001/04/xmldsig-more#rsa-sha384";
pub const RSA_SHA512: &str = "http://www.w3.org/2001/04/xmldsig-more#rsa-sha512";

static ENGINE: OnceLock<SignatureEngine> = OnceLock::new();

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RsaDigest {
    Sha256,
    Sha384,
    Sha512,
}

/// Registered signature methods and the shared random source.
#[derive(Debug)]
pub struct SignatureEngine {
    rng: SystemRandom,
    methods: Vec<(&'static str, RsaDigest)>,
}

/// The process-wide engine, initialized on first call.
pub fn engine() -> &'static SignatureEngine {
    ENGINE.get_or_init(|| {
        debug!("Enabling RSA-SHA256 XML signature support");
        SignatureEngine {
            rng: SystemRandom::new(),
            methods: vec![
                (RSA_SHA256, RsaDigest::Sha256),
                (RSA_SHA384, RsaDigest::Sha384),
                (RSA_SHA512, RsaDigest::Sha512),
            ],
        }
    })
}

impl SignatureEngine {
    /// Whether a signature method URI is accepted for verification.
    pub fn supports(&self, method: &str) -> bool {
        self.lookup(method).is_some()
    }

    /// Sign `message` with RSA-SHA256 (PKCS#1 v1.5).
    pub fn sign_sha256(&self, key_pair: &RsaKeyPair, message: &[u8]) -> StepUpResult<Vec<u8>> {
        let mut signature = vec![0u8; key_pair.public().modulus_len()];
        key_pair
            .sign(&signature::RSA_PKCS1_SHA256, &self.rng, message, &mut signature)
            .map_err(|_| StepUpError::Signing("RSA-SHA256 signing failed".to_string()))?;
        Ok(signature)
    }

    /// Verify an RSA signature with the method named by `method`.
    ///
    /// `rsa_public_key` is the DER `RSAPublicKey` from a certificate.
    pub fn verify(
        &self,
        method: &str,
        rsa_public_key: &[u8],
        message: &[u8],
        signature_value: &[u8],
    ) -> bool {
        let params: &'static signature::RsaParameters = match self.lookup(method) {
            Some(RsaDigest::Sha256) => &signature::RSA_PKCS1_2048_8192_SHA256,
            Some(RsaDigest::Sha384) => &signature::RSA_PKCS1_2048_8192_SHA384,
            Some(RsaDigest::Sha512) => &signature::RSA_PKCS1_2048_8192_SHA512,
            None => return false,
        };
        signature::UnparsedPublicKey::new(params, rsa_public_key)
            .verify(message, signature_value)
            .is_ok()
    }

    fn lookup(&self, method: &str) -> Option<RsaDigest> {
        self.methods
            .iter()
            .find(|(uri, _)| *uri == method)
            .map(|(_, digest)| *digest)
    }
}
