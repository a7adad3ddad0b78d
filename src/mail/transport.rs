//! SMTP transport client.
//!
//! [`SmtpClient`] drives lettre's low-level [`AsyncSmtpConnection`] so that
//! connection establishment and later command round trips get independent
//! time budgets. Hosts are resolved to IPv4 only; the host name is still
//! used for TLS server name verification.
//!
//! # Testability
//!
//! [`MailTransport`] and [`TransportFactory`] let the dispatcher run against
//! mock transports in tests while production uses [`SmtpTransportFactory`].

use std::io;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use lettre::Message;
use lettre::transport::smtp::Error as SmtpError;
use lettre::transport::smtp::authentication::{Credentials, Mechanism};
use lettre::transport::smtp::client::{AsyncSmtpConnection, TlsParameters};
use lettre::transport::smtp::extension::ClientId;

use crate::config::{TransportConfig, TransportMode};
use crate::error::{ConfigError, FailureKind, SendError, SmtpCommand};
use crate::mail::classify::mentions_unreachable;

/// Idle connections kept by a pooled client.
pub const MAX_IDLE_CONNECTIONS: usize = 5;

const AUTH_MECHANISMS: &[Mechanism] = &[Mechanism::Plain, Mechanism::Login];

// =============================================================================
// Transport traits
// =============================================================================

/// A configured mail transport.
#[async_trait]
pub trait MailTransport: Send + Sync {
    /// Configuration this transport was built from.
    fn config(&self) -> &TransportConfig;

    /// Perform one send attempt.
    async fn send(&self, message: &Message) -> Result<(), SendError>;
}

/// Builds transports from configurations.
pub trait TransportFactory: Send + Sync {
    /// # Errors
    /// Returns [`ConfigError::Tls`] when TLS parameters cannot be built.
    fn build(&self, config: TransportConfig) -> Result<Arc<dyn MailTransport>, ConfigError>;
}

/// Production factory producing [`SmtpClient`]s.
#[derive(Debug, Default, Clone, Copy)]
pub struct SmtpTransportFactory;

impl TransportFactory for SmtpTransportFactory {
    fn build(&self, config: TransportConfig) -> Result<Arc<dyn MailTransport>, ConfigError> {
        Ok(Arc::new(SmtpClient::new(config)?))
    }
}

// =============================================================================
// SmtpClient
// =============================================================================

/// SMTP client for one [`TransportConfig`].
///
/// A pooled client keeps up to [`MAX_IDLE_CONNECTIONS`] authenticated
/// connections; each is checked out by exactly one send at a time.
///
/// The socket timeout bounds each protocol step as a whole, not each read or
/// write. Message transmission (MAIL, RCPT and DATA) is a single step, so a
/// large message over a slow link fails with
/// [`FailureKind::SocketTimeout`] once the total exceeds the budget, even
/// while bytes are still moving.
pub struct SmtpClient {
    config: TransportConfig,
    /// Used for implicit TLS and STARTTLS.
    tls: TlsParameters,
    credentials: Option<Credentials>,
    hello_name: ClientId,
    idle: Mutex<Vec<AsyncSmtpConnection>>,
}

impl SmtpClient {
    /// # Errors
    /// Returns [`ConfigError::Tls`] when TLS parameters cannot be built.
    pub fn new(config: TransportConfig) -> Result<Self, ConfigError> {
        // Certificate checks are only relaxed on the STARTTLS path.
        let accept_invalid =
            config.mode() == TransportMode::RequiredStartTls && !config.tls_reject_unauthorized;
        let tls = TlsParameters::builder(config.host.clone())
            .dangerous_accept_invalid_certs(accept_invalid)
            .build()
            .map_err(|e| ConfigError::Tls(e.to_string()))?;

        let credentials = config.auth.as_ref().map(|auth| {
            Credentials::new(auth.username.clone(), auth.password.expose().to_string())
        });

        Ok(Self {
            config,
            tls,
            credentials,
            hello_name: ClientId::default(),
            idle: Mutex::new(Vec::new()),
        })
    }

    /// Number of idle pooled connections.
    pub fn idle_connections(&self) -> usize {
        self.idle.lock().map(|idle| idle.len()).unwrap_or(0)
    }

    fn log_step(&self, command: SmtpCommand, detail: &str) {
        if self.config.debug_logging {
            tracing::info!(host = %self.config.host, command = %command, "{}", detail);
        } else {
            tracing::debug!(host = %self.config.host, command = %command, "{}", detail);
        }
    }

    /// Run one command under the socket timeout.
    async fn timed<T, F>(&self, command: SmtpCommand, fut: F) -> Result<T, SendError>
    where
        F: Future<Output = Result<T, SmtpError>>,
    {
        match tokio::time::timeout(self.config.socket_timeout, fut).await {
            Ok(result) => result.map_err(|e| from_smtp_error(&e, command)),
            Err(_) => Err(SendError::new(
                FailureKind::SocketTimeout,
                command,
                format!(
                    "{} timed out after {}ms",
                    command,
                    self.config.socket_timeout.as_millis()
                ),
            )),
        }
    }

    /// Open, secure and authenticate a new connection.
    async fn connect(&self) -> Result<AsyncSmtpConnection, SendError> {
        let host = self.config.host.as_str();
        let port = self.config.effective_port();
        let budget = self.config.connection_timeout;
        let wrapper = self.config.secure.then(|| self.tls.clone());

        let establish = async {
            let addr = resolve_ipv4(host, port).await?;
            self.log_step(SmtpCommand::Conn, &format!("connecting to {}", addr));
            AsyncSmtpConnection::connect_tokio1(addr, Some(budget), &self.hello_name, wrapper, None)
                .await
                .map_err(|e| from_smtp_error(&e, SmtpCommand::Conn))
        };

        let mut conn = match tokio::time::timeout(budget, establish).await {
            Ok(result) => result?,
            Err(_) => {
                return Err(SendError::new(
                    FailureKind::ConnectTimeout,
                    SmtpCommand::Conn,
                    format!(
                        "connection to {}:{} timed out after {}ms",
                        host,
                        port,
                        budget.as_millis()
                    ),
                ));
            }
        };

        let upgrade = match self.config.mode() {
            TransportMode::ImplicitTls => false,
            TransportMode::RequiredStartTls => {
                if !conn.can_starttls() {
                    conn.abort().await;
                    return Err(SendError::new(
                        FailureKind::Unsupported,
                        SmtpCommand::StartTls,
                        format!("{} does not advertise STARTTLS", host),
                    ));
                }
                true
            }
            TransportMode::Opportunistic => conn.can_starttls(),
        };

        if upgrade {
            self.log_step(SmtpCommand::StartTls, "upgrading connection");
            let result = self
                .timed(
                    SmtpCommand::StartTls,
                    conn.starttls(self.tls.clone(), &self.hello_name),
                )
                .await;
            if let Err(e) = result {
                conn.abort().await;
                return Err(e);
            }
        }

        if let Some(credentials) = &self.credentials {
            self.log_step(SmtpCommand::Auth, "authenticating");
            let result = self
                .timed(SmtpCommand::Auth, conn.auth(AUTH_MECHANISMS, credentials))
                .await;
            if let Err(e) = result {
                conn.abort().await;
                return Err(e);
            }
        }

        Ok(conn)
    }

    /// Take a healthy idle connection, discarding stale ones.
    async fn checkout(&self) -> Option<AsyncSmtpConnection> {
        if !self.config.pooled {
            return None;
        }
        loop {
            let candidate = self.idle.lock().ok().and_then(|mut idle| idle.pop());
            let mut conn = candidate?;
            let alive = !conn.has_broken()
                && matches!(
                    tokio::time::timeout(self.config.socket_timeout, conn.test_connected()).await,
                    Ok(true)
                );
            if alive {
                self.log_step(SmtpCommand::Noop, "reusing pooled connection");
                return Some(conn);
            }
            self.log_step(SmtpCommand::Noop, "discarding stale pooled connection");
            conn.abort().await;
        }
    }

    /// Return a connection to the pool or close it.
    async fn release(&self, conn: AsyncSmtpConnection) {
        let leftover = if self.config.pooled && !conn.has_broken() {
            match self.idle.lock() {
                Ok(mut idle) if idle.len() < MAX_IDLE_CONNECTIONS => {
                    idle.push(conn);
                    None
                }
                _ => Some(conn),
            }
        } else {
            Some(conn)
        };

        if let Some(mut conn) = leftover {
            self.log_step(SmtpCommand::Quit, "closing connection");
            if self.timed(SmtpCommand::Quit, conn.quit()).await.is_err() {
                conn.abort().await;
            }
        }
    }
}

#[async_trait]
impl MailTransport for SmtpClient {
    fn config(&self) -> &TransportConfig {
        &self.config
    }

    async fn send(&self, message: &Message) -> Result<(), SendError> {
        let mut conn = match self.checkout().await {
            Some(conn) => conn,
            None => self.connect().await?,
        };

        self.log_step(SmtpCommand::Message, "sending message");
        let body = message.formatted();
        let result = self
            .timed(SmtpCommand::Message, conn.send(message.envelope(), &body))
            .await;

        match result {
            Ok(response) => {
                self.log_step(
                    SmtpCommand::Message,
                    &format!("accepted with code {}", response.code()),
                );
                self.release(conn).await;
                Ok(())
            }
            Err(e) => {
                conn.abort().await;
                Err(e)
            }
        }
    }
}

impl std::fmt::Debug for SmtpClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SmtpClient")
            .field("host", &self.config.host)
            .field("port", &self.config.effective_port())
            .field("mode", &self.config.mode())
            .field("has_credentials", &self.credentials.is_some())
            .field("idle_connections", &self.idle_connections())
            .finish()
    }
}

// =============================================================================
// Helpers
// =============================================================================

/// Resolve `host` to its first IPv4 address.
async fn resolve_ipv4(host: &str, port: u16) -> Result<SocketAddr, SendError> {
    let mut addrs = tokio::net::lookup_host((host, port)).await.map_err(|e| {
        let kind = if e.kind() == io::ErrorKind::NetworkUnreachable {
            FailureKind::NetworkUnreachable
        } else {
            FailureKind::Resolve
        };
        SendError::new(kind, SmtpCommand::Conn, format!("failed to resolve {}: {}", host, e))
    })?;

    addrs.find(SocketAddr::is_ipv4).ok_or_else(|| {
        SendError::new(
            FailureKind::Resolve,
            SmtpCommand::Conn,
            format!("no IPv4 address found for {}", host),
        )
    })
}

/// Map a lettre error to a [`SendError`] for `command`.
fn from_smtp_error(err: &SmtpError, command: SmtpCommand) -> SendError {
    let code = err
        .status()
        .and_then(|status| status.to_string().parse::<u16>().ok());
    let message = err.to_string();

    let kind = if err.is_transient() || err.is_permanent() {
        FailureKind::Rejected
    } else {
        match io_error_kind(err) {
            Some(io::ErrorKind::TimedOut) if command == SmtpCommand::Conn => {
                FailureKind::ConnectTimeout
            }
            Some(io::ErrorKind::TimedOut) => FailureKind::SocketTimeout,
            Some(io::ErrorKind::NetworkUnreachable) => FailureKind::NetworkUnreachable,
            _ if mentions_unreachable(&message) => FailureKind::NetworkUnreachable,
            _ => FailureKind::Protocol,
        }
    };

    SendError::new(kind, command, message).with_code(code)
}

/// First I/O error kind in the source chain.
fn io_error_kind(err: &(dyn std::error::Error + 'static)) -> Option<io::ErrorKind> {
    let mut current = Some(err);
    while let Some(e) = current {
        if let Some(io_err) = e.downcast_ref::<io::Error>() {
            return Some(io_err.kind());
        }
        current = e.source();
    }
    None
}
