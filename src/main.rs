//! notimailer - queue-driven SMTP notification mailer.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use notimailer::cli::{Cli, LogFormat};
use notimailer::config::{
    EnvSettings, SUBMISSION_PORT, ServiceConfig, SettingsSource, TransportConfig,
    resolve_from_address,
};
use notimailer::{MailConsumer, MailRequest, Mailer, MetricsServer};

/// Initialize the tracing subscriber with the specified log format.
fn init_logging(format: LogFormat) {
    let filter = tracing_subscriber::EnvFilter::from_default_env()
        .add_directive(tracing::Level::INFO.into());

    match format {
        LogFormat::Text => {
            tracing_subscriber::fmt()
                .with_writer(std::io::stderr)
                .with_env_filter(filter)
                .init();
        }
        LogFormat::Json => {
            tracing_subscriber::fmt()
                .with_writer(std::io::stderr)
                .json()
                .with_current_span(true)
                .with_span_list(false)
                .flatten_event(true)
                .with_env_filter(filter)
                .init();
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(cli.log_format);

    let settings: Arc<dyn SettingsSource> = Arc::new(EnvSettings::load());

    // Fail fast on invalid configuration
    let transport = match TransportConfig::resolve(settings.as_ref()) {
        Ok(c) => c,
        Err(e) => {
            error!(error = %e, "Invalid SMTP configuration");
            std::process::exit(1);
        }
    };
    let service = match ServiceConfig::resolve(settings.as_ref()) {
        Ok(c) => c,
        Err(e) => {
            error!(error = %e, "Invalid service configuration");
            std::process::exit(1);
        }
    };

    if cli.validate {
        print_summary(&transport, &service, settings.as_ref());
        return Ok(());
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    match cli.send_test {
        Some(to) => runtime.block_on(send_test(settings, &to)),
        None => runtime.block_on(run(settings, service)),
    }
}

fn print_summary(transport: &TransportConfig, service: &ServiceConfig, settings: &dyn SettingsSource) {
    println!("Configuration is valid");
    println!(
        "  SMTP: {}:{} ({:?})",
        transport.host,
        transport.effective_port(),
        transport.mode()
    );
    println!(
        "  Auth: {}",
        transport
            .auth
            .as_ref()
            .map(|a| a.username.as_str())
            .unwrap_or("none")
    );
    println!("  From: {}", resolve_from_address(settings));
    println!(
        "  Timeouts: connect {}ms, socket {}ms",
        transport.connection_timeout.as_millis(),
        transport.socket_timeout.as_millis()
    );
    println!("  Pool: {}", if transport.pooled { "enabled" } else { "disabled" });
    println!(
        "  Implicit TLS fallback: {}",
        if transport.port == Some(SUBMISSION_PORT) {
            "enabled"
        } else {
            "disabled"
        }
    );
    println!(
        "  Queue: {} (pattern {}, concurrency {})",
        service.queue, service.pattern, service.concurrency
    );
    match service.metrics_port {
        Some(port) => println!("  Metrics: enabled (port {})", port),
        None => println!("  Metrics: disabled"),
    }
}

/// Send one test email and exit.
async fn send_test(settings: Arc<dyn SettingsSource>, to: &str) -> Result<()> {
    let mailer = Mailer::new(settings)?;
    let request = MailRequest::new(to, "notimailer test email")
        .with_text("This is a test email sent by notimailer.")
        .with_html("<p>This is a test email sent by <b>notimailer</b>.</p>");

    match mailer.dispatch(&request).await {
        Ok(()) => {
            println!("Test email sent to {}", to);
            Ok(())
        }
        Err(e) => Err(anyhow::Error::new(e).context("Test email failed")),
    }
}

/// Main async entry point.
async fn run(settings: Arc<dyn SettingsSource>, service: ServiceConfig) -> Result<()> {
    let mailer = Arc::new(Mailer::new(settings)?);

    let cancel = CancellationToken::new();

    let metrics_handle = match service.metrics_port {
        Some(port) => {
            let server = MetricsServer::new(port);
            let cancel_metrics = cancel.clone();
            info!(port, "Starting metrics server");
            Some(tokio::spawn(async move {
                if let Err(e) = server.run(cancel_metrics).await {
                    error!(error = %e, "Metrics server error");
                }
            }))
        }
        None => {
            info!("Metrics server disabled");
            None
        }
    };

    // Setup signal handler for graceful shutdown
    let cancel_clone = cancel.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for ctrl-c signal");
            return;
        }
        info!("Received shutdown signal, initiating graceful shutdown");
        cancel_clone.cancel();
    });

    info!(
        host = %mailer.primary_config().host,
        queue = %service.queue,
        "notimailer starting"
    );

    let consumer = MailConsumer::new(service, mailer);
    let consumer_result = consumer.run(cancel.clone()).await;

    // Stop the metrics server whatever ended the consumer
    cancel.cancel();
    if let Some(handle) = metrics_handle {
        let _ = tokio::time::timeout(Duration::from_secs(2), handle).await;
    }

    match consumer_result {
        Ok(()) => {
            info!("notimailer shutdown complete");
            Ok(())
        }
        Err(e) => {
            error!(error = %e, "Consumer error");
            Err(anyhow::anyhow!("Consumer error: {}", e))
        }
    }
}
