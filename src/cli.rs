//! Command-line interface for notimailer using clap.
//!
//! Settings come from the environment (and `.env`); the CLI only selects
//! the run mode and log format.

use clap::{Parser, ValueEnum};

/// Log output format.
#[derive(Debug, Clone, Copy, Default, ValueEnum)]
pub enum LogFormat {
    /// Human-readable text format (default).
    #[default]
    Text,
    /// Structured JSON format for log aggregation.
    Json,
}

/// Queue-driven SMTP notification mailer.
#[derive(Parser, Debug)]
#[command(name = "notimailer")]
#[command(version)]
#[command(about = "Queue-driven SMTP notification mailer with implicit TLS fallback")]
pub struct Cli {
    /// Validate configuration and exit.
    #[arg(long = "validate", conflicts_with = "send_test")]
    pub validate: bool,

    /// Send one test email to this address and exit.
    #[arg(long = "send-test", value_name = "TO")]
    pub send_test: Option<String>,

    /// Log format: text or json.
    #[arg(long = "log-format", value_enum, default_value_t = LogFormat::Text, env = "LOG_FORMAT")]
    pub log_format: LogFormat,
}
