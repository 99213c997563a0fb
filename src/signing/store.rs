//! Trusted certificate store.
//!
//! A store is opened read-only for the duration of one lookup. The open
//! handle is released when it is dropped, so every exit path of a lookup
//! closes it, including early returns with `?`.

use ring::digest;
use ring::signature::{KeyPair, RsaKeyPair};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};
use x509_parser::pem::Pem;
use x509_parser::prelude::*;

use crate::error::{StepUpError, StepUpResult};
use crate::xmldsig::verify::rsa_public_key;

/// A store of certificates that can be searched by thumbprint.
pub trait CertificateStore: Send + Sync {
    /// Open the store read-only. Dropping the handle closes it.
    fn open_read_only(&self) -> StepUpResult<Box<dyn OpenStore + '_>>;
}

/// An open, read-only view of a certificate store.
pub trait OpenStore {
    /// All certificates whose thumbprint equals `thumbprint`, in store order.
    fn find_by_thumbprint(&self, thumbprint: &Thumbprint) -> Vec<SigningCertificate>;
}

/// SHA-1 fingerprint of a DER certificate, upper-case hex.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Thumbprint(String);

impl Thumbprint {
    /// Parse a thumbprint as typed or pasted by an operator.
    ///
    /// Case is ignored, as are spaces, colons and the invisible marks that
    /// certificate dialogs put in front of copied values.
    pub fn parse(value: &str) -> StepUpResult<Self> {
        let hex: String = value
            .chars()
            .filter(|c| !c.is_whitespace() && *c != ':' && !is_invisible(*c))
            .map(|c| c.to_ascii_uppercase())
            .collect();

        if hex.len() != 40 || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(StepUpError::config(format!(
                "invalid certificate thumbprint '{}'",
                value.trim()
            )));
        }
        Ok(Self(hex))
    }

    /// Thumbprint of a DER encoded certificate.
    pub fn of_der(der: &[u8]) -> Self {
        let hash = digest::digest(&digest::SHA1_FOR_LEGACY_USE_ONLY, der);
        Self(hash.as_ref().iter().map(|b| format!("{:02X}", b)).collect())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Thumbprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn is_invisible(c: char) -> bool {
    matches!(c, '\u{200B}'..='\u{200F}' | '\u{202A}'..='\u{202E}' | '\u{FEFF}')
}

/// A certificate found in the store, with its private key when usable.
#[derive(Clone)]
pub struct SigningCertificate {
    pub thumbprint: Thumbprint,
    pub certificate_der: Vec<u8>,
    pub private_key: Option<Arc<RsaKeyPair>>,
}

impl SigningCertificate {
    pub fn has_private_key(&self) -> bool {
        self.private_key.is_some()
    }
}

impl fmt::Debug for SigningCertificate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigningCertificate")
            .field("thumbprint", &self.thumbprint)
            .field("has_private_key", &self.has_private_key())
            .finish()
    }
}

/// A directory of PEM files.
///
/// Each `.pem` file holds one `CERTIFICATE` and optionally its key as
/// PKCS#8 `PRIVATE KEY` or PKCS#1 `RSA PRIVATE KEY`.
#[derive(Debug, Clone)]
pub struct FileCertificateStore {
    dir: PathBuf,
}

impl FileCertificateStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl CertificateStore for FileCertificateStore {
    fn open_read_only(&self) -> StepUpResult<Box<dyn OpenStore + '_>> {
        let entries = std::fs::read_dir(&self.dir).map_err(|e| {
            StepUpError::config(format!(
                "cannot open certificate store {:?}: {}",
                self.dir, e
            ))
        })?;

        let mut paths: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| p.extension().is_some_and(|ext| ext == "pem"))
            .collect();
        paths.sort();

        debug!(store = ?self.dir, files = paths.len(), "Opened certificate store");

        let mut certificates = Vec::with_capacity(paths.len());
        for path in paths {
            match load_pem_file(&path) {
                Ok(cert) => certificates.push(cert),
                Err(e) => warn!(file = ?path, error = %e, "Skipping unreadable store entry"),
            }
        }

        Ok(Box::new(FileStoreHandle {
            dir: &self.dir,
            certificates,
        }))
    }
}

struct FileStoreHandle<'a> {
    dir: &'a Path,
    certificates: Vec<SigningCertificate>,
}

impl OpenStore for FileStoreHandle<'_> {
    fn find_by_thumbprint(&self, thumbprint: &Thumbprint) -> Vec<SigningCertificate> {
        self.certificates
            .iter()
            .filter(|c| &c.thumbprint == thumbprint)
            .cloned()
            .collect()
    }
}

impl Drop for FileStoreHandle<'_> {
    fn drop(&mut self) {
        debug!(store = ?self.dir, "Closing certificate store");
    }
}

fn load_pem_file(path: &Path) -> StepUpResult<SigningCertificate> {
    let data = std::fs::read(path)
        .map_err(|e| StepUpError::config(format!("cannot read {:?}: {}", path, e)))?;

    let mut certificate_der = None;
    let mut key_blocks = Vec::new();
    for block in Pem::iter_from_buffer(&data) {
        let block = block.map_err(|e| StepUpError::config(format!("invalid PEM: {:?}", e)))?;
        match block.label.as_str() {
            "CERTIFICATE" if certificate_der.is_none() => certificate_der = Some(block.contents),
            "PRIVATE KEY" | "RSA PRIVATE KEY" => key_blocks.push(block),
            _ => {}
        }
    }

    let certificate_der =
        certificate_der.ok_or_else(|| StepUpError::config("no CERTIFICATE block"))?;
    let (_, cert) = X509Certificate::from_der(&certificate_der)
        .map_err(|e| StepUpError::config(format!("invalid certificate: {:?}", e)))?;
    let public_key = rsa_public_key(&cert)?;

    let private_key = key_blocks
        .iter()
        .filter_map(|block| {
            let parsed = if block.label == "PRIVATE KEY" {
                RsaKeyPair::from_pkcs8(&block.contents)
            } else {
                RsaKeyPair::from_der(&block.contents)
            };
            parsed.ok()
        })
        .find(|key| key.public_key().as_ref() == public_key.as_slice())
        .map(Arc::new);

    Ok(SigningCertificate {
        thumbprint: Thumbprint::of_der(&certificate_der),
        certificate_der,
        private_key,
    })
}
