//! Step-up protocol controller.
//!
//! `Idle -> AwaitingProof -> {Accepted, Rejected}`. One controller serves one
//! authentication attempt. Every failure inside `begin` or `complete` ends in
//! a failure presentation; errors are logged and never shown to the browser.

use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::config::StepUpConfig;
use crate::error::{StepUpError, StepUpResult};
use crate::presentation::{AuthFailedForm, AuthForm, Presentation};
use crate::saml::{
    codec, extract_claim, AuthenticationClaim, AuthenticationRequest, ProofData, ResponseVerifier,
    TransportPackage, Verification,
};
use crate::signing::{self, CertificateStore};

/// Protocol state of one authentication attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtocolState {
    Idle,
    AwaitingProof { request_id: String },
    Accepted,
    Rejected,
}

/// Result of `complete`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Completion {
    /// Claims for the host, possibly empty.
    Accepted(Vec<AuthenticationClaim>),
    Rejected(Presentation),
}

/// Drives one step-up attempt.
pub struct StepUpController {
    config: Arc<StepUpConfig>,
    store: Arc<dyn CertificateStore>,
    state: ProtocolState,
}

impl StepUpController {
    pub fn new(config: Arc<StepUpConfig>, store: Arc<dyn CertificateStore>) -> Self {
        Self {
            config,
            store,
            state: ProtocolState::Idle,
        }
    }

    /// Recreate a controller waiting for the answer to `request_id`.
    ///
    /// For hosts that keep only the issued request id between the two
    /// phases.
    pub fn resume(
        config: Arc<StepUpConfig>,
        store: Arc<dyn CertificateStore>,
        request_id: impl Into<String>,
    ) -> Self {
        Self {
            config,
            store,
            state: ProtocolState::AwaitingProof {
                request_id: request_id.into(),
            },
        }
    }

    pub fn state(&self) -> &ProtocolState {
        &self.state
    }

    /// The request id issued by `begin`, while waiting for proof.
    pub fn request_id(&self) -> Option<&str> {
        match self.state {
            ProtocolState::AwaitingProof { ref request_id } => Some(request_id),
            _ => None,
        }
    }

    /// Build, sign and encode a request for the user named by
    /// `identity_claim`, to be posted to the gateway.
    pub fn begin(&mut self, identity_claim: &AuthenticationClaim, callback_url: &str) -> Presentation {
        if self.state != ProtocolState::Idle {
            warn!(state = ?self.state, "Step-up already started for this attempt");
            self.state = ProtocolState::Rejected;
            return Presentation::failed();
        }

        match self.prepare(identity_claim, callback_url) {
            Ok((request_id, package)) => {
                info!(request_id = %request_id, target_url = %package.target_url, "Step-up request issued");
                self.state = ProtocolState::AwaitingProof { request_id };
                Presentation::Form(AuthForm::new(package))
            }
            Err(e) => {
                error!(code = e.code(), error = %e, "Error while initiating authentication");
                self.state = ProtocolState::Rejected;
                Presentation::failed()
            }
        }
    }

    fn prepare(
        &self,
        identity_claim: &AuthenticationClaim,
        callback_url: &str,
    ) -> StepUpResult<(String, TransportPackage)> {
        let config = self.config.as_ref();
        let request = AuthenticationRequest::build(
            config,
            &identity_claim.value,
            &config.schac_home_organization,
            &config.minimal_loa,
            callback_url,
        )?;

        // build() has already checked both sections.
        let (Some(sp), Some(gateway)) = (config.local_sp.as_ref(), config.gateway.as_ref()) else {
            return Err(StepUpError::config("SAML configuration is incomplete"));
        };

        let certificate = signing::resolve(self.store.as_ref(), &sp.signing_certificate)?;
        let envelope = signing::sign(&request, &certificate)?;
        let package = codec::encode(&envelope, gateway.post_endpoint(), callback_url)?;
        Ok((envelope.request_id, package))
    }

    /// Verify the gateway's answer relayed in `proof`.
    ///
    /// Only valid while awaiting proof; in any other state the attempt is
    /// rejected.
    pub fn complete(&mut self, proof: &ProofData) -> Completion {
        let expected = match self.state {
            ProtocolState::AwaitingProof { ref request_id } => request_id.clone(),
            ref other => {
                warn!(state = ?other, "Proof received without an outstanding request");
                self.state = ProtocolState::Rejected;
                return Completion::Rejected(Presentation::failed());
            }
        };

        let completion = match self.verify(proof, &expected) {
            Ok(completion) => completion,
            Err(e) => {
                error!(code = e.code(), request_id = %expected, error = %e, "Error while processing the SAML response");
                Completion::Rejected(Presentation::failed())
            }
        };

        self.state = match completion {
            Completion::Accepted(_) => ProtocolState::Accepted,
            Completion::Rejected(_) => ProtocolState::Rejected,
        };
        completion
    }

    fn verify(&self, proof: &ProofData, expected: &str) -> StepUpResult<Completion> {
        let inbound = codec::decode(proof)?;
        info!(request_id = %inbound.request_id, "Received response for request");

        if inbound.request_id != expected {
            warn!(
                request_id = %inbound.request_id,
                expected = %expected,
                "Proof data echoes a different request id"
            );
            return Ok(Completion::Rejected(Presentation::failed()));
        }

        let verifier = ResponseVerifier::from_config(&self.config)?;
        let response = match verifier.verify(&inbound.encoded_response, expected)? {
            Verification::Verified(response) => response,
            Verification::Rejected(rejection) => {
                return Ok(Completion::Rejected(Presentation::Failed(AuthFailedForm::new(
                    rejection.status_message,
                ))));
            }
        };

        let identities = response.identities();
        if identities.len() > 1 {
            warn!(count = identities.len(), "Using only the first identity of the response");
        }
        let first = &identities[..identities.len().min(1)];
        let claim = extract_claim(first, &self.config.authentication_method_claim_type);
        if claim.is_none() {
            debug!(
                claim_type = %self.config.authentication_method_claim_type,
                "Response carries no authentication method claim"
            );
        }

        info!(request_id = %expected, "Successfully processed response");
        Ok(Completion::Accepted(claim.into_iter().collect()))
    }
}
