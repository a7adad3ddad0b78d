//! Configuration resolution for notimailer.
//!
//! Everything is read from flat named settings (normally the process
//! environment) through [`SettingsSource`].

mod secret;
mod service;
mod settings;
mod transport;

pub use secret::SecretString;
pub use service::{
    DEFAULT_AMQP_CONCURRENCY, DEFAULT_AMQP_PATTERN, DEFAULT_AMQP_QUEUE, DEFAULT_AMQP_URL,
    ServiceConfig,
};
pub use settings::{EnvSettings, Setting, SettingsSource};
pub use transport::{
    DEFAULT_CONNECTION_TIMEOUT_MS, DEFAULT_SOCKET_TIMEOUT_MS, Encryption, FALLBACK_FROM,
    IMPLICIT_TLS_PORT, SUBMISSION_PORT, SmtpAuth, TransportConfig, TransportMode,
    resolve_from_address,
};

#[cfg(test)]
mod tests;
