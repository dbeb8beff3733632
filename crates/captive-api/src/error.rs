use thiserror::Error;

/// Top-level error type for the `captive-api` crate.
///
/// Covers every failure mode of the device's REST command bridge:
/// authentication, transport, command rejection, and response decoding.
/// `captive-core` maps these into its provisioning error taxonomy.
#[derive(Debug, Error)]
pub enum Error {
    // ── Authentication ──────────────────────────────────────────────
    /// Login failed (wrong credentials, disabled user, missing policy).
    #[error("Authentication failed: {message}")]
    Authentication { message: String },

    // ── Transport ───────────────────────────────────────────────────
    /// HTTP transport error (connection refused, DNS failure, etc.)
    #[error("HTTP transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// URL parsing error.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// Request timed out.
    #[error("Request timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    /// TLS handshake or certificate error.
    #[error("TLS error: {0}")]
    Tls(String),

    // ── Device ──────────────────────────────────────────────────────
    /// The device rejected a command (parsed from the `{error, message, detail}` body).
    #[error("Device rejected {path} (HTTP {status}): {message}")]
    Command {
        path: String,
        status: u16,
        message: String,
        detail: Option<String>,
    },

    // ── Data ────────────────────────────────────────────────────────
    /// JSON deserialization failed, with the raw body for debugging.
    #[error("Deserialization error: {message}")]
    Deserialization { message: String, body: String },
}

impl Error {
    /// Returns `true` if this is a transient error worth retrying.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport(e) => e.is_timeout() || e.is_connect(),
            Self::Timeout { .. } => true,
            _ => false,
        }
    }

    /// Returns `true` if the device reported the target object as missing.
    ///
    /// RouterOS answers `remove`/`set` on a vanished id with
    /// `no such item`, which callers treat as already-absent.
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::Command {
                status, detail, message, ..
            } => {
                *status == 404
                    || detail
                        .as_deref()
                        .unwrap_or(message)
                        .to_ascii_lowercase()
                        .contains("no such item")
            }
            _ => false,
        }
    }

    /// The device-supplied detail text, if any.
    pub fn detail(&self) -> Option<&str> {
        match self {
            Self::Command { detail, .. } => detail.as_deref(),
            _ => None,
        }
    }
}
