//! Failure classification for the implicit-TLS retry.
//!
//! Only connectivity failures on the submission port are worth retrying:
//! networks that block 587 usually let 465 through, while anything else
//! (rejections, auth failures, other ports) would fail the same way again.

use crate::config::SUBMISSION_PORT;
use crate::error::{FailureKind, SendError, SmtpCommand};

/// Outcome of [`classify`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Classification {
    /// The failure warrants one implicit-TLS retry.
    pub transient: bool,
}

/// Classify a failed attempt against the port that was attempted.
///
/// `attempted_port` is the configured port; an unset port never qualifies.
pub fn classify(error: &SendError, attempted_port: Option<u16>) -> Classification {
    let connectivity = is_connect_timeout(error) || is_network_unreachable(error);
    Classification {
        transient: connectivity && attempted_port == Some(SUBMISSION_PORT),
    }
}

// A refused connection surfaces as `Protocol` during `CONN` and is permanent.
fn is_connect_timeout(error: &SendError) -> bool {
    if error.kind == FailureKind::ConnectTimeout {
        return true;
    }
    error.command == SmtpCommand::Conn && error.message.to_ascii_uppercase().contains("ETIMEDOUT")
}

fn is_network_unreachable(error: &SendError) -> bool {
    error.kind == FailureKind::NetworkUnreachable || mentions_unreachable(&error.message)
}

/// Whether an error text reports an unreachable network.
pub(crate) fn mentions_unreachable(message: &str) -> bool {
    let upper = message.to_ascii_uppercase();
    upper.contains("ENETUNREACH") || upper.contains("NETWORK IS UNREACHABLE")
}
