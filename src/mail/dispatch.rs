//! Dispatch orchestration with a single implicit-TLS fallback.

use std::sync::Arc;

use tracing::{error, info, warn};

use crate::config::{SettingsSource, TransportConfig, resolve_from_address};
use crate::error::{ConfigError, DispatchError, FailureKind, SendError, SmtpCommand};
use crate::mail::classify::classify;
use crate::mail::transport::{MailTransport, SmtpTransportFactory, TransportFactory};
use crate::mail::{MailRequest, build_message};

/// Sends notification emails through the configured primary transport.
///
/// When the primary attempt fails with a connectivity error on the
/// submission port, exactly one more attempt is made over implicit TLS on
/// port 465. No other retries happen.
///
/// The primary transport is built once so pooled connections survive
/// across dispatches; the fallback transport is built per use.
pub struct Mailer {
    settings: Arc<dyn SettingsSource>,
    factory: Arc<dyn TransportFactory>,
    primary: Arc<dyn MailTransport>,
}

impl Mailer {
    /// Create a mailer backed by real SMTP clients.
    ///
    /// # Errors
    /// Returns [`ConfigError`] when the transport configuration is invalid.
    pub fn new(settings: Arc<dyn SettingsSource>) -> Result<Self, ConfigError> {
        Self::with_factory(settings, Arc::new(SmtpTransportFactory))
    }

    /// Create a mailer with a custom transport factory (for testing).
    ///
    /// # Errors
    /// Returns [`ConfigError`] when the transport configuration is invalid.
    pub fn with_factory(
        settings: Arc<dyn SettingsSource>,
        factory: Arc<dyn TransportFactory>,
    ) -> Result<Self, ConfigError> {
        let config = TransportConfig::resolve(settings.as_ref())?;
        let primary = factory.build(config)?;
        Ok(Self {
            settings,
            factory,
            primary,
        })
    }

    /// Configuration of the primary transport.
    pub fn primary_config(&self) -> &TransportConfig {
        self.primary.config()
    }

    /// Deliver one email.
    ///
    /// # Errors
    /// - [`DispatchError::InvalidRequest`] when the message cannot be built
    /// - [`DispatchError::Delivery`] with the primary attempt's failure; a
    ///   failed fallback attempt is chained as its source
    pub async fn dispatch(&self, request: &MailRequest) -> Result<(), DispatchError> {
        let from = resolve_from_address(self.settings.as_ref());
        let message = build_message(&from, request)?;
        let config = self.primary.config();

        info!(
            to = %request.to,
            subject = %request.subject,
            host = %config.host,
            port = config.effective_port(),
            "Sending email"
        );

        let mut primary_error = match self.primary.send(&message).await {
            Ok(()) => {
                metrics::counter!("notimailer_emails_sent_total", "via" => "primary").increment(1);
                info!(to = %request.to, subject = %request.subject, "Email sent");
                return Ok(());
            }
            Err(e) => e,
        };

        error!(
            to = %request.to,
            command = %primary_error.command,
            code = %primary_error.code_display(),
            error = %primary_error,
            "Email send failed"
        );

        primary_error.transient = classify(&primary_error, config.port).transient;
        if !primary_error.transient {
            metrics::counter!("notimailer_emails_failed_total").increment(1);
            return Err(DispatchError::Delivery(primary_error));
        }

        warn!(
            host = %config.host,
            "Primary SMTP connection failed on port 587, retrying once over implicit TLS on port 465"
        );
        metrics::counter!("notimailer_fallback_attempts_total").increment(1);

        match self.send_fallback(&message).await {
            Ok(()) => {
                metrics::counter!("notimailer_emails_sent_total", "via" => "fallback").increment(1);
                info!(
                    to = %request.to,
                    subject = %request.subject,
                    "Email sent via implicit TLS fallback"
                );
                Ok(())
            }
            Err(fallback_error) => {
                error!(
                    to = %request.to,
                    command = %fallback_error.command,
                    code = %fallback_error.code_display(),
                    error = %fallback_error,
                    "Implicit TLS fallback failed"
                );
                metrics::counter!("notimailer_emails_failed_total").increment(1);
                primary_error.fallback = Some(Box::new(fallback_error));
                Err(DispatchError::Delivery(primary_error))
            }
        }
    }

    async fn send_fallback(&self, message: &lettre::Message) -> Result<(), SendError> {
        let transport = self
            .factory
            .build(self.primary.config().fallback())
            .map_err(|e| SendError::new(FailureKind::Protocol, SmtpCommand::Conn, e.to_string()))?;
        transport.send(message).await
    }
}

impl std::fmt::Debug for Mailer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let config = self.primary.config();
        f.debug_struct("Mailer")
            .field("host", &config.host)
            .field("port", &config.effective_port())
            .field("mode", &config.mode())
            .finish()
    }
}
