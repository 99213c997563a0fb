//! Host plugin surface.
//!
//! Thin wiring between the federation host's authentication callbacks and
//! [`StepUpController`]. The host creates one [`AuthenticationContext`] per
//! attempt; the controller for that attempt lives inside it.

use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, error, info};

use crate::config::{StepUpConfig, AUTHENTICATION_METHOD_CLAIM};
use crate::controller::{Completion, StepUpController};
use crate::presentation::Presentation;
use crate::saml::{AuthenticationClaim, ProofData};
use crate::signing::CertificateStore;

/// Identity claim types the adapter accepts from the host.
pub const WINDOWS_ACCOUNT_NAME_CLAIM: &str =
    "http://schemas.microsoft.com/ws/2008/06/identity/claims/windowsaccountname";
pub const UPN_CLAIM: &str = "http://schemas.xmlsoap.org/ws/2005/05/identity/claims/upn";

/// Static description of the adapter shown by the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdapterMetadata {
    pub admin_name: String,
    pub authentication_method: String,
    pub available_lcids: Vec<u32>,
    pub friendly_names: HashMap<u32, String>,
    pub descriptions: HashMap<u32, String>,
    pub identity_claims: Vec<String>,
    pub requires_identity: bool,
}

impl Default for AdapterMetadata {
    fn default() -> Self {
        let lcids = [1033, 1043];
        Self {
            admin_name: "Step-up Authentication".to_string(),
            authentication_method: AUTHENTICATION_METHOD_CLAIM.to_string(),
            available_lcids: lcids.to_vec(),
            friendly_names: lcids
                .iter()
                .map(|lcid| (*lcid, "Second factor authentication".to_string()))
                .collect(),
            descriptions: lcids
                .iter()
                .map(|lcid| (*lcid, "Authenticate with your second factor".to_string()))
                .collect(),
            identity_claims: vec![WINDOWS_ACCOUNT_NAME_CLAIM.to_string(), UPN_CLAIM.to_string()],
            requires_identity: true,
        }
    }
}

/// Per-attempt state the host keeps between the two phases.
#[derive(Default)]
pub struct AuthenticationContext {
    pub activity_id: String,
    controller: Option<StepUpController>,
}

impl AuthenticationContext {
    pub fn new(activity_id: impl Into<String>) -> Self {
        Self {
            activity_id: activity_id.into(),
            ..Self::default()
        }
    }
}

/// The callbacks a federation host invokes on an authentication adapter.
pub trait AuthenticationAdapter {
    fn metadata(&self) -> AdapterMetadata;

    fn is_available_for_user(
        &self,
        identity_claim: &AuthenticationClaim,
        context: &AuthenticationContext,
    ) -> bool;

    fn on_authentication_pipeline_load(&mut self);

    fn on_authentication_pipeline_unload(&mut self);

    /// Start the step-up for the user. `callback_url` is where the gateway
    /// sends the browser back to.
    fn begin_authentication(
        &self,
        identity_claim: &AuthenticationClaim,
        callback_url: &str,
        context: &mut AuthenticationContext,
    ) -> Presentation;

    /// Finish the step-up. `Ok` carries the claims for the host, `Err` the
    /// page to show instead.
    fn try_end_authentication(
        &self,
        context: &mut AuthenticationContext,
        proof: &ProofData,
    ) -> Result<Vec<AuthenticationClaim>, Presentation>;

    fn on_error(&self, error: &dyn std::error::Error) -> Presentation;
}

/// The step-up adapter.
pub struct StepUpAdapter {
    config: Arc<StepUpConfig>,
    store: Arc<dyn CertificateStore>,
}

impl StepUpAdapter {
    pub fn new(config: Arc<StepUpConfig>, store: Arc<dyn CertificateStore>) -> Self {
        Self { config, store }
    }
}

impl AuthenticationAdapter for StepUpAdapter {
    fn metadata(&self) -> AdapterMetadata {
        AdapterMetadata::default()
    }

    fn is_available_for_user(
        &self,
        _identity_claim: &AuthenticationClaim,
        _context: &AuthenticationContext,
    ) -> bool {
        true
    }

    fn on_authentication_pipeline_load(&mut self) {
        match self.config.validate() {
            Ok(()) => info!(
                home_organization = %self.config.schac_home_organization,
                minimal_loa = %self.config.minimal_loa,
                "Step-up adapter loaded"
            ),
            Err(e) => error!(code = "ERROR_0002", error = %e, "Step-up adapter configuration is invalid"),
        }
    }

    fn on_authentication_pipeline_unload(&mut self) {
        info!("Step-up adapter unloaded");
    }

    fn begin_authentication(
        &self,
        identity_claim: &AuthenticationClaim,
        callback_url: &str,
        context: &mut AuthenticationContext,
    ) -> Presentation {
        debug!(activity_id = %context.activity_id, "Enter BeginAuthentication");
        let mut controller = StepUpController::new(self.config.clone(), self.store.clone());
        let presentation = controller.begin(identity_claim, callback_url);
        context.controller = Some(controller);
        presentation
    }

    fn try_end_authentication(
        &self,
        context: &mut AuthenticationContext,
        proof: &ProofData,
    ) -> Result<Vec<AuthenticationClaim>, Presentation> {
        debug!(activity_id = %context.activity_id, "Enter TryEndAuthentication");
        let Some(controller) = context.controller.as_mut() else {
            error!(activity_id = %context.activity_id, "No step-up in progress for this context");
            return Err(Presentation::failed());
        };

        match controller.complete(proof) {
            Completion::Accepted(claims) => Ok(claims),
            Completion::Rejected(presentation) => Err(presentation),
        }
    }

    fn on_error(&self, err: &dyn std::error::Error) -> Presentation {
        error!(error = %err, "Error occurred");
        Presentation::failed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::saml::codec::{REQUEST_ID_FIELD, SAML_RESPONSE_FIELD};
    use crate::saml::request::tests::sample_config;
    use crate::signing::FileCertificateStore;

    fn adapter() -> StepUpAdapter {
        StepUpAdapter::new(
            Arc::new(sample_config()),
            Arc::new(FileCertificateStore::new("/nonexistent/stepup-store")),
        )
    }

    fn user() -> AuthenticationClaim {
        AuthenticationClaim::new(WINDOWS_ACCOUNT_NAME_CLAIM, "jdoe")
    }

    #[test]
    fn test_metadata() {
        let metadata = adapter().metadata();
        assert_eq!(metadata.available_lcids, vec![1033, 1043]);
        assert!(metadata.friendly_names.contains_key(&1043));
        assert!(metadata.identity_claims.contains(&WINDOWS_ACCOUNT_NAME_CLAIM.to_string()));
    }

    #[test]
    fn test_always_available() {
        assert!(adapter().is_available_for_user(&user(), &AuthenticationContext::new("a1")));
    }

    #[test]
    fn test_begin_failure_is_generic() {
        // The store directory does not exist.
        let adapter = adapter();
        let mut context = AuthenticationContext::new("a1");
        let presentation = adapter.begin_authentication(&user(), "https://adfs/cb", &mut context);
        assert_eq!(presentation, Presentation::failed());

        let proof = ProofData::new()
            .with(SAML_RESPONSE_FIELD, "PHg+PC94Pg==")
            .with(REQUEST_ID_FIELD, "_id1");
        assert!(adapter.try_end_authentication(&mut context, &proof).is_err());
    }

    #[test]
    fn test_end_without_begin() {
        let mut context = AuthenticationContext::new("a1");
        let result = adapter().try_end_authentication(&mut context, &ProofData::new());
        assert_eq!(result, Err(Presentation::failed()));
    }

    #[test]
    fn test_on_error() {
        let err = std::io::Error::new(std::io::ErrorKind::Other, "host failure");
        assert!(adapter().on_error(&err).is_failure());
    }
}
