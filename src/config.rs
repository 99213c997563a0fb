//! Step-up adapter configuration.
//!
//! The configuration is read once at startup and shared as an immutable
//! snapshot (`Arc<StepUpConfig>`) for the lifetime of the process.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Claim type the host honors for the second factor.
pub const AUTHENTICATION_METHOD_CLAIM: &str =
    "http://schemas.microsoft.com/ws/2008/06/identity/claims/authenticationmethod";

/// Step-up adapter configuration snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StepUpConfig {
    /// Home organization used to build the step-up NameID.
    #[serde(default)]
    pub schac_home_organization: String,

    /// Minimal level of assurance requested from the gateway.
    #[serde(default)]
    pub minimal_loa: String,

    /// Claim type extracted from the gateway response.
    #[serde(default = "default_claim_type")]
    pub authentication_method_claim_type: String,

    /// Clock skew tolerance in seconds.
    #[serde(default = "default_clock_skew")]
    pub clock_skew_secs: i64,

    /// Local service provider (this adapter).
    #[serde(default)]
    pub local_sp: Option<LocalSpConfig>,

    /// Step-up gateway (the identity provider).
    #[serde(default)]
    pub gateway: Option<GatewayConfig>,
}

/// Local service provider settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LocalSpConfig {
    /// SP Entity ID, used as the request issuer and expected audience.
    pub entity_id: String,

    /// Thumbprint of the signing certificate in the certificate store.
    pub signing_certificate: String,

    /// Directory holding the trusted certificate store.
    #[serde(default = "default_certificate_store")]
    pub certificate_store: PathBuf,
}

/// Step-up gateway settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GatewayConfig {
    /// Gateway Entity ID, the expected issuer of responses.
    pub entity_id: String,

    /// Gateway single sign-on location (request Destination).
    pub sso_location: String,

    /// Endpoint the browser posts the request to (defaults to `sso_location`).
    #[serde(default)]
    pub endpoint: Option<String>,

    /// Certificate the gateway signs responses with.
    pub signing_certificate: CertificateSource,

    /// Second certificate accepted during gateway key rollover.
    #[serde(default)]
    pub secondary_signing_certificate: Option<CertificateSource>,
}

/// Where a trusted certificate comes from.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CertificateSource {
    /// PEM file on disk.
    Path(PathBuf),
    /// Inline PEM.
    Pem(String),
}

fn default_claim_type() -> String {
    AUTHENTICATION_METHOD_CLAIM.to_string()
}

/// Largest accepted clock skew tolerance (one hour).
pub const MAX_CLOCK_SKEW_SECS: i64 = 3600;

fn default_clock_skew() -> i64 {
    300 // 5 minutes
}

fn default_certificate_store() -> PathBuf {
    PathBuf::from("/etc/stepup-adapter/certificates")
}

impl Default for StepUpConfig {
    fn default() -> Self {
        Self {
            schac_home_organization: String::new(),
            minimal_loa: String::new(),
            authentication_method_claim_type: default_claim_type(),
            clock_skew_secs: default_clock_skew(),
            local_sp: None,
            gateway: None,
        }
    }
}

impl StepUpConfig {
    /// Load the configuration snapshot from a JSON file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read configuration: {:?}", path))?;
        let config: StepUpConfig = serde_json::from_str(&data)
            .with_context(|| format!("Failed to parse configuration: {:?}", path))?;
        Ok(config)
    }

    /// Validate the configuration.
    ///
    /// Absent `local_sp` or `gateway` sections are accepted here; they are
    /// reported when a request is built.
    pub fn validate(&self) -> Result<(), String> {
        if self.schac_home_organization.is_empty() {
            return Err("schac_home_organization is required".to_string());
        }

        if self.minimal_loa.is_empty() {
            return Err("minimal_loa is required".to_string());
        }

        if self.clock_skew_secs < 0 {
            return Err("clock_skew_secs must not be negative".to_string());
        }

        if self.clock_skew_secs > MAX_CLOCK_SKEW_SECS {
            return Err(format!(
                "clock_skew_secs must not exceed {}",
                MAX_CLOCK_SKEW_SECS
            ));
        }

        if let Some(ref sp) = self.local_sp {
            if sp.entity_id.is_empty() {
                return Err("local_sp.entity_id is required".to_string());
            }
            if sp.signing_certificate.trim().is_empty() {
                return Err("local_sp.signing_certificate is required".to_string());
            }
        }

        if let Some(ref gateway) = self.gateway {
            if gateway.entity_id.is_empty() {
                return Err("gateway.entity_id is required".to_string());
            }
            if gateway.sso_location.is_empty() {
                return Err("gateway.sso_location is required".to_string());
            }
        }

        Ok(())
    }
}

impl GatewayConfig {
    /// URL the auto-submitting form posts to.
    pub fn post_endpoint(&self) -> &str {
        self.endpoint.as_deref().unwrap_or(&self.sso_location)
    }

    /// All certificates trusted for response signatures, primary first.
    pub fn trusted_certificates(&self) -> impl Iterator<Item = &CertificateSource> {
        std::iter::once(&self.signing_certificate)
            .chain(self.secondary_signing_certificate.as_ref())
    }
}

impl CertificateSource {
    /// Read the PEM text.
    pub fn load_pem(&self) -> Result<String> {
        match self {
            CertificateSource::Path(path) => std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read certificate: {:?}", path)),
            CertificateSource::Pem(pem) => Ok(pem.clone()),
        }
    }
}
