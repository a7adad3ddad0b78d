//! Centralized error types for notimailer using thiserror.
//!
//! Configuration problems, per-attempt SMTP failures, dispatch outcomes and
//! queue consumer errors each get their own type.

use std::fmt;

use thiserror::Error;

/// Errors related to configuration resolution.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("missing required setting: {0}")]
    Missing(String),
    #[error("invalid setting {key}: {message}")]
    Invalid { key: String, message: String },
    #[error("TLS configuration error: {0}")]
    Tls(String),
}

/// SMTP command in flight when a send attempt failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SmtpCommand {
    /// Connection establishment: DNS, TCP, implicit TLS, greeting and EHLO.
    Conn,
    StartTls,
    Auth,
    /// Envelope and body transmission (MAIL, RCPT, DATA).
    Message,
    Quit,
    /// NOOP health check on a pooled connection.
    Noop,
}

impl fmt::Display for SmtpCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SmtpCommand::Conn => "CONN",
            SmtpCommand::StartTls => "STARTTLS",
            SmtpCommand::Auth => "AUTH",
            SmtpCommand::Message => "MESSAGE",
            SmtpCommand::Quit => "QUIT",
            SmtpCommand::Noop => "NOOP",
        };
        f.write_str(name)
    }
}

/// Coarse category of a failed send attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Connection establishment exceeded the connection timeout.
    ConnectTimeout,
    /// The route to the server is unavailable.
    NetworkUnreachable,
    /// A command round trip exceeded the socket timeout.
    SocketTimeout,
    /// Host name resolution failed or yielded no IPv4 address.
    Resolve,
    /// The server answered with a 4xx/5xx reply.
    Rejected,
    /// The server does not offer a capability the configuration requires.
    Unsupported,
    /// Any other protocol, TLS or I/O failure.
    Protocol,
}

/// A single failed send attempt.
///
/// `source()` yields the failure of the fallback attempt, when one was made
/// and also failed.
#[derive(Error, Debug)]
#[error("{message}")]
pub struct SendError {
    pub kind: FailureKind,
    pub message: String,
    /// SMTP reply code, when the server answered.
    pub code: Option<u16>,
    pub command: SmtpCommand,
    /// Set by the dispatcher once the failure has been classified.
    pub transient: bool,
    #[source]
    pub fallback: Option<Box<SendError>>,
}

impl SendError {
    pub fn new(kind: FailureKind, command: SmtpCommand, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            code: None,
            command,
            transient: false,
            fallback: None,
        }
    }

    pub fn with_code(mut self, code: Option<u16>) -> Self {
        self.code = code;
        self
    }

    /// Display helper for log fields.
    pub fn code_display(&self) -> String {
        self.code
            .map(|c| c.to_string())
            .unwrap_or_else(|| "none".to_string())
    }
}

/// Errors surfaced by [`crate::mail::Mailer::dispatch`].
#[derive(Error, Debug)]
pub enum DispatchError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("invalid mail request: {0}")]
    InvalidRequest(String),
    /// The primary attempt's failure, with the fallback failure chained.
    #[error("delivery failed: {0}")]
    Delivery(SendError),
}

impl DispatchError {
    /// The primary attempt's failure, if the request reached the network.
    pub fn send_error(&self) -> Option<&SendError> {
        match self {
            DispatchError::Delivery(e) => Some(e),
            _ => None,
        }
    }
}

/// Errors related to the AMQP consumer.
#[derive(Error, Debug)]
pub enum ConsumerError {
    #[error("AMQP error: {0}")]
    Amqp(String),
    #[error("undecodable delivery: {0}")]
    Decode(String),
}

impl From<lapin::Error> for ConsumerError {
    fn from(value: lapin::Error) -> Self {
        ConsumerError::Amqp(value.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn config_error_display() {
        let err = ConfigError::Missing("SMTP_HOST".to_string());
        assert_eq!(err.to_string(), "missing required setting: SMTP_HOST");

        let err = ConfigError::Invalid {
            key: "SMTP_PORT".to_string(),
            message: "must be between 1 and 65535".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "invalid setting SMTP_PORT: must be between 1 and 65535"
        );
    }

    #[test]
    fn smtp_command_display() {
        assert_eq!(SmtpCommand::Conn.to_string(), "CONN");
        assert_eq!(SmtpCommand::StartTls.to_string(), "STARTTLS");
        assert_eq!(SmtpCommand::Message.to_string(), "MESSAGE");
    }

    #[test]
    fn send_error_chains_fallback_as_source() {
        let fallback = SendError::new(
            FailureKind::Rejected,
            SmtpCommand::Auth,
            "535 authentication failed",
        )
        .with_code(Some(535));
        let mut primary = SendError::new(
            FailureKind::ConnectTimeout,
            SmtpCommand::Conn,
            "connection timed out",
        );
        primary.fallback = Some(Box::new(fallback));

        assert_eq!(primary.to_string(), "connection timed out");
        let source = primary.source().expect("fallback should be the source");
        assert_eq!(source.to_string(), "535 authentication failed");
    }

    #[test]
    fn send_error_without_fallback_has_no_source() {
        let err = SendError::new(FailureKind::Protocol, SmtpCommand::Quit, "broken pipe");
        assert!(err.source().is_none());
        assert_eq!(err.code_display(), "none");
    }

    #[test]
    fn dispatch_error_display() {
        let err = DispatchError::Delivery(
            SendError::new(FailureKind::Rejected, SmtpCommand::Message, "550 no such user")
                .with_code(Some(550)),
        );
        assert_eq!(err.to_string(), "delivery failed: 550 no such user");
        assert_eq!(err.send_error().and_then(|e| e.code), Some(550));

        let err = DispatchError::InvalidRequest("bad address".to_string());
        assert_eq!(err.to_string(), "invalid mail request: bad address");
        assert!(err.send_error().is_none());
    }

    #[test]
    fn consumer_error_display() {
        let err = ConsumerError::Decode("expected value".to_string());
        assert_eq!(err.to_string(), "undecodable delivery: expected value");
    }
}
