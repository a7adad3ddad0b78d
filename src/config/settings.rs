//! Named settings and their alias keys.

use std::collections::HashMap;

/// A flat source of named string settings.
///
/// Values are looked up on every call, so a source backed by the process
/// environment reflects changes made while the service is running.
pub trait SettingsSource: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
}

/// Settings read from the process environment.
#[derive(Debug, Clone, Copy, Default)]
pub struct EnvSettings;

impl EnvSettings {
    /// Load a `.env` file from the working directory, if present, then read
    /// the process environment.
    pub fn load() -> Self {
        match dotenvy::dotenv() {
            Ok(path) => tracing::debug!(path = %path.display(), "Loaded .env file"),
            Err(e) if e.not_found() => {}
            Err(e) => tracing::warn!(error = %e, "Failed to load .env file"),
        }
        EnvSettings
    }
}

impl SettingsSource for EnvSettings {
    fn get(&self, key: &str) -> Option<String> {
        std::env::var(key).ok()
    }
}

impl SettingsSource for HashMap<String, String> {
    fn get(&self, key: &str) -> Option<String> {
        HashMap::get(self, key).cloned()
    }
}

/// Logical settings understood by the resolvers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Setting {
    Host,
    Port,
    Username,
    Password,
    Encryption,
    Debug,
    Pool,
    ConnectionTimeout,
    SocketTimeout,
    TlsRejectUnauthorized,
    From,
    AmqpUrl,
    AmqpQueue,
    AmqpPattern,
    AmqpConcurrency,
    MetricsPort,
}

impl Setting {
    /// Candidate keys, in priority order.
    pub const fn keys(self) -> &'static [&'static str] {
        match self {
            Setting::Host => &["SMTP_HOST"],
            Setting::Port => &["SMTP_PORT"],
            Setting::Username => &["SMTP_USER", "SMTP_USERNAME"],
            Setting::Password => &["SMTP_PASS", "SMTP_PASSWORD"],
            Setting::Encryption => &["SMTP_ENCRYPTION"],
            Setting::Debug => &["SMTP_DEBUG"],
            Setting::Pool => &["SMTP_POOL"],
            Setting::ConnectionTimeout => &["SMTP_CONNECTION_TIMEOUT"],
            Setting::SocketTimeout => &["SMTP_SOCKET_TIMEOUT"],
            Setting::TlsRejectUnauthorized => &["SMTP_TLS_REJECT_UNAUTHORIZED"],
            Setting::From => &["SMTP_FROM"],
            Setting::AmqpUrl => &["AMQP_URL"],
            Setting::AmqpQueue => &["AMQP_QUEUE"],
            Setting::AmqpPattern => &["AMQP_PATTERN"],
            Setting::AmqpConcurrency => &["AMQP_CONCURRENCY"],
            Setting::MetricsPort => &["METRICS_PORT"],
        }
    }

    /// Primary key, used in error messages.
    pub const fn key(self) -> &'static str {
        self.keys()[0]
    }

    /// First non-empty value among the candidate keys.
    pub fn lookup<S: SettingsSource + ?Sized>(self, settings: &S) -> Option<String> {
        self.keys()
            .iter()
            .filter_map(|key| settings.get(key))
            .find(|value| !value.trim().is_empty())
    }

    /// Boolean flag: true only for a case-insensitive `"true"`.
    pub fn flag<S: SettingsSource + ?Sized>(self, settings: &S, default: bool) -> bool {
        match self.lookup(settings) {
            Some(value) => value.trim().eq_ignore_ascii_case("true"),
            None => default,
        }
    }

    /// Positive integer, falling back to `default` when absent, non-numeric or zero.
    pub fn positive_or<S: SettingsSource + ?Sized>(self, settings: &S, default: u64) -> u64 {
        self.lookup(settings)
            .and_then(|value| value.trim().parse::<u64>().ok())
            .filter(|n| *n > 0)
            .unwrap_or(default)
    }
}
