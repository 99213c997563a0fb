//! Step-up (second factor) authentication adapter.
//!
//! Issues a signed SAML AuthnRequest to a step-up gateway for a user that
//! already holds a primary identity, then verifies the gateway's response
//! and hands the authentication method claim back to the federation host.

pub mod adapter;
pub mod config;
pub mod controller;
pub mod error;
pub mod presentation;
pub mod saml;
pub mod signing;
pub mod xmldsig;

pub use adapter::{AdapterMetadata, AuthenticationAdapter, AuthenticationContext, StepUpAdapter};
pub use config::StepUpConfig;
pub use controller::{Completion, ProtocolState, StepUpController};
pub use error::{StepUpError, StepUpResult};
pub use presentation::Presentation;
