//! Outbound email dispatch.
//!
//! ```text
//! Mailer::dispatch -> MailTransport::send -> classify -> (fallback) MailTransport::send
//! ```
//!
//! - [`transport`]: SMTP client built from one [`crate::config::TransportConfig`]
//! - [`classify`]: decides whether a failure may be retried over implicit TLS
//! - [`dispatch`]: the orchestrator tying both together

pub mod classify;
pub mod dispatch;
pub mod transport;

use lettre::Message;
use lettre::message::header::ContentType;
use lettre::message::{Mailbox, MultiPart, SinglePart};
use serde::{Deserialize, Serialize};

use crate::error::DispatchError;

pub use classify::{Classification, classify};
pub use dispatch::Mailer;
pub use transport::{MailTransport, SmtpClient, SmtpTransportFactory, TransportFactory};

/// A notification email to deliver.
///
/// Both bodies may be absent; the message is then sent with an empty body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MailRequest {
    /// Recipient address, or a comma-separated list of addresses.
    pub to: String,
    pub subject: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub html: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

impl MailRequest {
    pub fn new(to: impl Into<String>, subject: impl Into<String>) -> Self {
        Self {
            to: to.into(),
            subject: subject.into(),
            html: None,
            text: None,
        }
    }

    pub fn with_html(mut self, html: impl Into<String>) -> Self {
        self.html = Some(html.into());
        self
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }
}

/// Build the RFC 5322 message for a request.
///
/// HTML plus text becomes `multipart/alternative`; a single body is sent as
/// is; no body yields an empty `text/plain` part.
///
/// # Errors
/// Returns [`DispatchError::InvalidRequest`] for malformed addresses or an
/// empty recipient list.
pub fn build_message(from: &str, request: &MailRequest) -> Result<Message, DispatchError> {
    let from: Mailbox = from.parse().map_err(|e| {
        DispatchError::InvalidRequest(format!("invalid 'from' address '{}': {}", from, e))
    })?;

    let recipients: Vec<&str> = request
        .to
        .split(',')
        .map(str::trim)
        .filter(|addr| !addr.is_empty())
        .collect();
    if recipients.is_empty() {
        return Err(DispatchError::InvalidRequest(
            "'to' must contain at least one email address".to_string(),
        ));
    }

    let mut builder = Message::builder().from(from).subject(request.subject.clone());
    for addr in recipients {
        let mailbox: Mailbox = addr.parse().map_err(|e| {
            DispatchError::InvalidRequest(format!("invalid 'to' address '{}': {}", addr, e))
        })?;
        builder = builder.to(mailbox);
    }

    let built = match (&request.html, &request.text) {
        (Some(html), Some(text)) => {
            builder.multipart(MultiPart::alternative_plain_html(text.clone(), html.clone()))
        }
        (Some(html), None) => builder.singlepart(SinglePart::html(html.clone())),
        (None, Some(text)) => builder.header(ContentType::TEXT_PLAIN).body(text.clone()),
        (None, None) => builder.header(ContentType::TEXT_PLAIN).body(String::new()),
    };

    built.map_err(|e| DispatchError::InvalidRequest(format!("failed to build email: {}", e)))
}
