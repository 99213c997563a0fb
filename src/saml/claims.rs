//! Claims extracted from verified assertions.

use serde::Serialize;

/// Claim type of the assertion subject.
pub const NAME_IDENTIFIER_CLAIM: &str =
    "http://schemas.xmlsoap.org/ws/2005/05/identity/claims/nameidentifier";

/// Claim type of the assertion's authentication instant.
pub const AUTHENTICATION_INSTANT_CLAIM: &str =
    "http://schemas.microsoft.com/ws/2008/06/identity/claims/authenticationinstant";

/// A single claim handed to the host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuthenticationClaim {
    #[serde(rename = "type")]
    pub claim_type: String,
    pub value: String,
}

impl AuthenticationClaim {
    pub fn new(claim_type: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            claim_type: claim_type.into(),
            value: value.into(),
        }
    }
}

/// The claims of one verified assertion, in document order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClaimsIdentity {
    claims: Vec<AuthenticationClaim>,
}

impl ClaimsIdentity {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, claim_type: impl Into<String>, value: impl Into<String>) {
        self.claims.push(AuthenticationClaim::new(claim_type, value));
    }

    /// First claim of `claim_type`.
    pub fn find(&self, claim_type: &str) -> Option<&AuthenticationClaim> {
        self.claims.iter().find(|c| c.claim_type == claim_type)
    }
}

/// First claim of `claim_type` across `identities`, scanned in order.
///
/// Returns `None` when there are no identities or none has the claim.
pub fn extract_claim(identities: &[ClaimsIdentity], claim_type: &str) -> Option<AuthenticationClaim> {
    identities
        .iter()
        .find_map(|identity| identity.find(claim_type))
        .cloned()
}
