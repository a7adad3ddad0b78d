// src/lib.rs
//! notimailer - queue-driven SMTP notification mailer with implicit-TLS fallback.

pub mod cli;
pub mod config;
pub mod consumer;
pub mod error;
pub mod mail;
pub mod metrics;

// Re-export commonly used types
pub use cli::LogFormat;
pub use consumer::{MailConsumer, decode_delivery};
pub use error::{ConfigError, ConsumerError, DispatchError, FailureKind, SendError, SmtpCommand};
pub use mail::{
    Classification, MailRequest, MailTransport, Mailer, SmtpClient, SmtpTransportFactory,
    TransportFactory, build_message, classify,
};
pub use metrics::{MetricsServer, register_metric_descriptions};
