//! Signing certificate lookup by thumbprint.

use tracing::{debug, error};

use super::store::{CertificateStore, SigningCertificate, Thumbprint};
use crate::error::{StepUpError, StepUpResult};

/// Find the signing certificate for `thumbprint` in `store`.
///
/// The store is opened read-only for this call only and closed before
/// returning, whether or not a usable certificate was found. The first
/// match that carries a usable private key wins.
pub fn resolve(store: &dyn CertificateStore, thumbprint: &str) -> StepUpResult<SigningCertificate> {
    let result = lookup(store, thumbprint);
    if let Err(ref e) = result {
        error!(code = e.code(), thumbprint = %thumbprint.trim(), error = %e, "Signing certificate lookup failed");
    }
    result
}

fn lookup(store: &dyn CertificateStore, thumbprint: &str) -> StepUpResult<SigningCertificate> {
    let thumbprint = Thumbprint::parse(thumbprint)?;
    let handle = store.open_read_only()?;

    let matches = handle.find_by_thumbprint(&thumbprint);
    if matches.is_empty() {
        return Err(StepUpError::config(format!(
            "no certificate found with thumbprint {}",
            thumbprint
        )));
    }

    let certificate = matches
        .into_iter()
        .find(SigningCertificate::has_private_key)
        .ok_or_else(|| {
            StepUpError::config(format!(
                "certificate with thumbprint {} has no private key",
                thumbprint
            ))
        })?;

    debug!(thumbprint = %certificate.thumbprint, "Resolved signing certificate");
    Ok(certificate)
}
