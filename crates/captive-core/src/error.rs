// ── Core error types ──
//
// The engine's failure taxonomy. Consumers never see HTTP status codes or
// JSON parse failures directly: the `From<captive_api::Error>` impl
// translates transport-layer errors into connection, auth, or command
// variants, and each component raises its own typed failures on top.

use std::time::Duration;

use thiserror::Error;

/// Unified error type for the core crate.
#[derive(Debug, Error)]
pub enum CoreError {
    // ── Connection errors ────────────────────────────────────────────
    #[error("Cannot connect to device at {url}: {reason}")]
    ConnectionFailed { url: String, reason: String },

    #[error("Authentication failed: {message}")]
    AuthenticationFailed { message: String },

    #[error("Operation timed out after {}", humantime::format_duration(*.limit))]
    Timeout { limit: Duration },

    // ── Command errors ───────────────────────────────────────────────
    #[error("Command `{command}` failed: {source}")]
    Command {
        command: String,
        #[source]
        source: captive_api::Error,
    },

    // ── Address allocation ───────────────────────────────────────────
    #[error("IP pool '{pool}' not found on device")]
    PoolNotFound { pool: String },

    #[error("IP pool '{pool}' exhausted (range {range})")]
    PoolExhausted { pool: String, range: String },

    #[error("IP pool '{pool}' has an unusable range: {value}")]
    InvalidRange { pool: String, value: String },

    // ── Access control ───────────────────────────────────────────────
    #[error("No lease resolves client '{client}'")]
    NoLeaseForClient { client: String },

    // ── Provisioning ─────────────────────────────────────────────────
    #[error("Provisioning step '{step}' failed: {source}")]
    ProvisionFailed {
        step: String,
        #[source]
        source: Box<CoreError>,
    },

    // ── Portal assets ────────────────────────────────────────────────
    #[error("Upload of '{file}' failed: {reason}")]
    Upload { file: String, reason: String },

    #[error("'{file}' did not appear on the device after {waited_ms}ms")]
    VerificationFailed { file: String, waited_ms: u64 },

    #[error("{operation} was cancelled")]
    Cancelled { operation: String },

    // ── Router directory ─────────────────────────────────────────────
    #[error("Router not found: {id}")]
    RouterNotFound { id: String },

    #[error("No router serves user '{user}'")]
    NoRouterForUser { user: String },

    // ── Configuration / validation ───────────────────────────────────
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Validation failed: {message}")]
    ValidationFailed { message: String },

    // ── Internal errors ──────────────────────────────────────────────
    #[error("Internal error: {0}")]
    Internal(String),
}

impl CoreError {
    /// Wrap a failed device command, keeping the command text for context.
    ///
    /// Auth and connectivity failures surfacing mid-session keep their
    /// own variants so callers can tell "device gone" from "bad command".
    pub fn from_command(command: &captive_api::Request, err: captive_api::Error) -> Self {
        match err {
            captive_api::Error::Authentication { .. } | captive_api::Error::Timeout { .. } => {
                Self::from(err)
            }
            captive_api::Error::Transport(ref e) if e.is_connect() || e.is_timeout() => {
                Self::from(err)
            }
            source => Self::Command {
                command: command.to_string(),
                source,
            },
        }
    }

    /// Returns `true` if the device reported the target object as missing.
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::Command { source, .. } => source.is_not_found(),
            Self::RouterNotFound { .. } | Self::PoolNotFound { .. } => true,
            _ => false,
        }
    }

    /// Returns `true` if retrying the whole call later may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::ConnectionFailed { .. } | Self::Timeout { .. } => true,
            Self::Command { source, .. } => source.is_transient(),
            Self::ProvisionFailed { source, .. } => source.is_transient(),
            _ => false,
        }
    }
}

// ── Conversion from transport-layer errors ───────────────────────────

impl From<captive_api::Error> for CoreError {
    fn from(err: captive_api::Error) -> Self {
        match err {
            captive_api::Error::Authentication { message } => {
                CoreError::AuthenticationFailed { message }
            }
            captive_api::Error::Transport(ref e) => {
                if e.is_timeout() {
                    CoreError::Timeout {
                        limit: Duration::ZERO,
                    }
                } else if e.is_connect() {
                    CoreError::ConnectionFailed {
                        url: e
                            .url()
                            .map_or_else(|| "<unknown>".into(), ToString::to_string),
                        reason: e.to_string(),
                    }
                } else {
                    CoreError::Command {
                        command: "<transport>".into(),
                        source: err,
                    }
                }
            }
            captive_api::Error::InvalidUrl(e) => CoreError::Config {
                message: format!("Invalid URL: {e}"),
            },
            captive_api::Error::Timeout { timeout_secs } => CoreError::Timeout {
                limit: Duration::from_secs(timeout_secs),
            },
            captive_api::Error::Tls(msg) => CoreError::ConnectionFailed {
                url: String::new(),
                reason: format!("TLS error: {msg}"),
            },
            captive_api::Error::Command { ref path, .. } => CoreError::Command {
                command: path.clone(),
                source: err,
            },
            captive_api::Error::Deserialization { message, body: _ } => {
                CoreError::Internal(format!("Deserialization error: {message}"))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rejected(detail: &str) -> captive_api::Error {
        captive_api::Error::Command {
            path: "/ip/pool/remove".into(),
            status: 400,
            message: "Bad Request".into(),
            detail: Some(detail.into()),
        }
    }

    #[test]
    fn command_errors_keep_the_command_text() {
        let req = captive_api::Request::remove("/ip/pool", "*1");
        let err = CoreError::from_command(&req, rejected("no such item"));
        assert!(err.to_string().contains("/ip/pool/remove =.id=*1"));
        assert!(err.is_not_found());
    }

    #[test]
    fn auth_errors_are_not_command_errors() {
        let req = captive_api::Request::print("/interface");
        let err = CoreError::from_command(
            &req,
            captive_api::Error::Authentication {
                message: "nope".into(),
            },
        );
        assert!(matches!(err, CoreError::AuthenticationFailed { .. }));
    }

    #[test]
    fn provision_failure_is_transient_if_cause_is() {
        let err = CoreError::ProvisionFailed {
            step: "bridge".into(),
            source: Box::new(CoreError::Timeout {
                limit: Duration::from_secs(5),
            }),
        };
        assert!(err.is_transient());
        assert!(!CoreError::from(rejected("failure: already have such name")).is_transient());
    }

    #[test]
    fn sub_second_timeouts_keep_their_precision() {
        let err = CoreError::Timeout {
            limit: Duration::from_millis(500),
        };
        assert_eq!(err.to_string(), "Operation timed out after 500ms");
    }
}
