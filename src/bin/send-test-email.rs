//! Publish one test notification request to the queue.
//!
//! Uses `AMQP_URL`, `AMQP_QUEUE` and `AMQP_PATTERN` like the service, and
//! `TEST_TO` for the recipient.

use anyhow::{Context, Result};
use lapin::options::{BasicPublishOptions, QueueDeclareOptions};
use lapin::types::FieldTable;
use lapin::{BasicProperties, Connection, ConnectionProperties};
use serde::Serialize;
use tracing::info;

use notimailer::MailRequest;
use notimailer::config::{EnvSettings, ServiceConfig};

const DEFAULT_TEST_TO: &str = "you@example.com";

#[derive(Serialize)]
struct Envelope<'a> {
    pattern: &'a str,
    data: &'a MailRequest,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let settings = EnvSettings::load();
    let service = ServiceConfig::resolve(&settings)?;
    let to = std::env::var("TEST_TO")
        .ok()
        .filter(|v| !v.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_TEST_TO.to_string());

    let request = MailRequest::new(to, "Test email from notimailer")
        .with_html("<p>This is a <b>test email</b> sent through the notification queue.</p>")
        .with_text("This is a test email sent through the notification queue.");
    let payload = serde_json::to_vec(&Envelope {
        pattern: &service.pattern,
        data: &request,
    })?;

    let connection = Connection::connect(&service.amqp_url, ConnectionProperties::default())
        .await
        .context("Failed to connect to RabbitMQ")?;
    let channel = connection.create_channel().await?;

    channel
        .queue_declare(
            &service.queue,
            QueueDeclareOptions {
                durable: true,
                ..Default::default()
            },
            FieldTable::default(),
        )
        .await?;

    channel
        .basic_publish(
            "",
            &service.queue,
            BasicPublishOptions::default(),
            &payload,
            BasicProperties::default()
                .with_delivery_mode(2)
                .with_content_type("application/json".into()),
        )
        .await?
        .await?;

    info!(to = %request.to, queue = %service.queue, "Test notification published");
    Ok(())
}
