//! Pages handed to the host for rendering.
//!
//! Every interpolated value is HTML-escaped. Nothing in here carries
//! internal error detail.

use quick_xml::escape::escape;
use tracing::debug;

use crate::saml::codec::{RELAY_STATE_FIELD, SAML_REQUEST_FIELD};
use crate::saml::TransportPackage;

/// Page title while the browser posts to the gateway.
pub const WORKING_TITLE: &str = "Working...";
/// Page title of the failure page.
pub const FAILED_TITLE: &str = "Authentication failed";

/// What the host shows the browser.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Presentation {
    Form(AuthForm),
    Failed(AuthFailedForm),
}

impl Presentation {
    /// Generic failure page without any detail.
    pub fn failed() -> Self {
        Presentation::Failed(AuthFailedForm::new(None))
    }

    pub fn form_html(&self, lcid: u32) -> String {
        match self {
            Presentation::Form(form) => form.form_html(lcid),
            Presentation::Failed(form) => form.form_html(lcid),
        }
    }

    pub fn page_title(&self, _lcid: u32) -> &'static str {
        match self {
            Presentation::Form(_) => WORKING_TITLE,
            Presentation::Failed(_) => FAILED_TITLE,
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, Presentation::Failed(_))
    }
}

/// Auto-submitting form that posts the signed request to the gateway.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthForm {
    package: TransportPackage,
}

impl AuthForm {
    pub fn new(package: TransportPackage) -> Self {
        Self { package }
    }

    pub fn package(&self) -> &TransportPackage {
        &self.package
    }

    pub fn form_html(&self, _lcid: u32) -> String {
        debug!(target_url = %self.package.target_url, "Rendering step-up form");
        format!(
            concat!(
                "<div id=\"loginArea\">\n",
                "  <form method=\"post\" id=\"stepUpForm\" action=\"{action}\">\n",
                "    <input type=\"hidden\" name=\"{request_field}\" value=\"{request}\" />\n",
                "    <input type=\"hidden\" name=\"{relay_field}\" value=\"{relay}\" />\n",
                "    <noscript><input type=\"submit\" value=\"Continue\" /></noscript>\n",
                "  </form>\n",
                "  <script type=\"text/javascript\">document.getElementById('stepUpForm').submit();</script>\n",
                "</div>\n"
            ),
            action = escape(self.package.target_url.as_str()),
            request_field = SAML_REQUEST_FIELD,
            request = escape(self.package.compressed_encoded_request.as_str()),
            relay_field = RELAY_STATE_FIELD,
            relay = escape(self.package.relay_context.as_str()),
        )
    }
}

/// Failure page, optionally showing the gateway's status message.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuthFailedForm {
    status_message: Option<String>,
}

impl AuthFailedForm {
    pub fn new(status_message: Option<String>) -> Self {
        Self { status_message }
    }

    pub fn status_message(&self) -> Option<&str> {
        self.status_message.as_deref()
    }

    pub fn form_html(&self, _lcid: u32) -> String {
        let mut html = String::from(
            "<div id=\"error\">\n  <p>Second factor authentication failed. Please try again or contact your help desk.</p>\n",
        );
        if let Some(ref message) = self.status_message {
            html.push_str("  <p class=\"statusMessage\">");
            html.push_str(&escape(message.as_str()));
            html.push_str("</p>\n");
        }
        html.push_str("</div>\n");
        html
    }
}
