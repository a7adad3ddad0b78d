//! SMTP transport configuration resolved from flat settings.

use std::time::Duration;

use super::secret::SecretString;
use super::settings::{Setting, SettingsSource};
use crate::error::ConfigError;

/// Conventional STARTTLS submission port.
pub const SUBMISSION_PORT: u16 = 587;

/// Conventional implicit-TLS port.
pub const IMPLICIT_TLS_PORT: u16 = 465;

pub const DEFAULT_CONNECTION_TIMEOUT_MS: u64 = 10_000;
pub const DEFAULT_SOCKET_TIMEOUT_MS: u64 = 15_000;

/// Sender used when neither `SMTP_FROM` nor a username is configured.
pub const FALLBACK_FROM: &str = "no-reply@example.com";

/// Encryption mode requested through `SMTP_ENCRYPTION`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Encryption {
    /// `ssl`: implicit TLS.
    Ssl,
    /// `tls`: STARTTLS.
    Tls,
    /// Anything else.
    #[default]
    None,
}

impl Encryption {
    pub fn from_token(token: &str) -> Self {
        match token.trim().to_ascii_lowercase().as_str() {
            "ssl" => Encryption::Ssl,
            "tls" => Encryption::Tls,
            _ => Encryption::None,
        }
    }
}

/// Username/password pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SmtpAuth {
    pub username: String,
    pub password: SecretString,
}

/// How the client negotiates TLS for one configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportMode {
    /// TLS from the first byte.
    ImplicitTls,
    /// STARTTLS, failing when the server does not offer it.
    RequiredStartTls,
    /// STARTTLS when the server offers it, plaintext otherwise.
    Opportunistic,
}

/// Immutable SMTP transport configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportConfig {
    pub host: String,
    /// Unset means the mode's default port.
    pub port: Option<u16>,
    pub secure: bool,
    pub require_tls: bool,
    pub auth: Option<SmtpAuth>,
    pub connection_timeout: Duration,
    pub socket_timeout: Duration,
    /// Only applied on the STARTTLS path.
    pub tls_reject_unauthorized: bool,
    pub pooled: bool,
    pub debug_logging: bool,
}

impl TransportConfig {
    /// Resolve a transport configuration from named settings.
    ///
    /// # Errors
    /// Returns [`ConfigError::Missing`] when no host is configured and
    /// [`ConfigError::Invalid`] when a port is present but not in 1..=65535.
    pub fn resolve<S: SettingsSource + ?Sized>(settings: &S) -> Result<Self, ConfigError> {
        let host = Setting::Host
            .lookup(settings)
            .map(|h| h.trim().to_string())
            .ok_or_else(|| ConfigError::Missing(Setting::Host.key().to_string()))?;

        let port = Setting::Port
            .lookup(settings)
            .map(|raw| parse_port(&raw))
            .transpose()?;

        let auth = match (
            Setting::Username.lookup(settings),
            Setting::Password.lookup(settings),
        ) {
            (Some(username), Some(password)) => Some(SmtpAuth {
                username,
                password: SecretString::new(password),
            }),
            _ => None,
        };

        let encryption = Setting::Encryption
            .lookup(settings)
            .map(|token| Encryption::from_token(&token))
            .unwrap_or_default();

        // Port 465 selects implicit TLS whatever the token says.
        let secure = encryption == Encryption::Ssl || port == Some(IMPLICIT_TLS_PORT);
        let require_tls = encryption == Encryption::Tls && !secure;

        let tls_reject_unauthorized = if encryption == Encryption::Tls {
            Setting::TlsRejectUnauthorized.flag(settings, true)
        } else {
            true
        };

        Ok(Self {
            host,
            port,
            secure,
            require_tls,
            auth,
            connection_timeout: Duration::from_millis(
                Setting::ConnectionTimeout.positive_or(settings, DEFAULT_CONNECTION_TIMEOUT_MS),
            ),
            socket_timeout: Duration::from_millis(
                Setting::SocketTimeout.positive_or(settings, DEFAULT_SOCKET_TIMEOUT_MS),
            ),
            tls_reject_unauthorized,
            pooled: Setting::Pool.flag(settings, false),
            debug_logging: Setting::Debug.flag(settings, false),
        })
    }

    /// Port actually dialed: the configured one or the mode's default.
    pub fn effective_port(&self) -> u16 {
        self.port.unwrap_or(if self.secure {
            IMPLICIT_TLS_PORT
        } else {
            SUBMISSION_PORT
        })
    }

    pub fn mode(&self) -> TransportMode {
        if self.secure {
            TransportMode::ImplicitTls
        } else if self.require_tls {
            TransportMode::RequiredStartTls
        } else {
            TransportMode::Opportunistic
        }
    }

    /// Implicit-TLS configuration used for the single fallback attempt.
    ///
    /// Host, credentials and timeouts carry over; everything else is forced.
    pub fn fallback(&self) -> Self {
        Self {
            host: self.host.clone(),
            port: Some(IMPLICIT_TLS_PORT),
            secure: true,
            require_tls: false,
            auth: self.auth.clone(),
            connection_timeout: self.connection_timeout,
            socket_timeout: self.socket_timeout,
            tls_reject_unauthorized: true,
            pooled: false,
            debug_logging: false,
        }
    }
}

fn parse_port(raw: &str) -> Result<u16, ConfigError> {
    let invalid = || ConfigError::Invalid {
        key: Setting::Port.key().to_string(),
        message: format!("'{}' is not a port between 1 and 65535", raw),
    };
    match raw.trim().parse::<u16>() {
        Ok(0) | Err(_) => Err(invalid()),
        Ok(port) => Ok(port),
    }
}

/// Sender address for one dispatch.
///
/// `SMTP_FROM`, else the resolved username, else [`FALLBACK_FROM`].
pub fn resolve_from_address<S: SettingsSource + ?Sized>(settings: &S) -> String {
    Setting::From
        .lookup(settings)
        .or_else(|| Setting::Username.lookup(settings))
        .map(|s| s.trim().to_string())
        .unwrap_or_else(|| FALLBACK_FROM.to_string())
}
