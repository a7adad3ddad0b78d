//! Prometheus metrics exposition server.
//!
//! Serves notimailer counters in Prometheus format when `METRICS_PORT` is
//! configured.

use anyhow::Result;
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Register all metric descriptions for Prometheus.
///
/// Called once after the recorder is installed.
pub fn register_metric_descriptions() {
    use metrics::{describe_counter, describe_gauge};

    describe_counter!(
        "notimailer_emails_sent_total",
        "Total number of emails accepted by the SMTP server, labelled by attempt (primary or fallback)"
    );
    describe_counter!(
        "notimailer_emails_failed_total",
        "Total number of emails that could not be delivered"
    );
    describe_counter!(
        "notimailer_fallback_attempts_total",
        "Total number of implicit TLS fallback attempts on port 465"
    );
    describe_counter!(
        "notimailer_messages_received_total",
        "Total number of queue deliveries received"
    );
    describe_counter!(
        "notimailer_messages_rejected_total",
        "Total number of queue deliveries that could not be decoded"
    );

    describe_gauge!(
        "notimailer_build_info",
        "Build information with version label (always 1)"
    );
}

/// Metrics server for Prometheus exposition.
pub struct MetricsServer {
    port: u16,
}

impl MetricsServer {
    /// Use port 0 to let the OS assign a port.
    pub fn new(port: u16) -> Self {
        Self { port }
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Install the global recorder and serve `/metrics` until cancelled.
    ///
    /// # Errors
    ///
    /// Returns an error if the exporter cannot be installed.
    pub async fn run(self, cancel: CancellationToken) -> Result<()> {
        let addr: SocketAddr = ([0, 0, 0, 0], self.port).into();

        // The recorder can only be installed once per process
        PrometheusBuilder::new()
            .with_http_listener(addr)
            .install()
            .map_err(|e| anyhow::anyhow!("Failed to install Prometheus exporter: {}", e))?;

        register_metric_descriptions();
        initialize_metrics();

        info!(port = self.port, "Metrics server started on /metrics");

        cancel.cancelled().await;

        info!("Metrics server shutting down");

        Ok(())
    }
}

/// Initialize all known metrics so they are visible from startup.
pub fn initialize_metrics() {
    use metrics::{counter, gauge};

    gauge!("notimailer_build_info", "version" => env!("CARGO_PKG_VERSION")).set(1.0);

    counter!("notimailer_emails_sent_total", "via" => "primary").absolute(0);
    counter!("notimailer_emails_sent_total", "via" => "fallback").absolute(0);
    counter!("notimailer_emails_failed_total").absolute(0);
    counter!("notimailer_fallback_attempts_total").absolute(0);
    counter!("notimailer_messages_received_total").absolute(0);
    counter!("notimailer_messages_rejected_total").absolute(0);

    tracing::debug!("Metrics initialized to zero");
}
