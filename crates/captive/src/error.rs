//! CLI error types with miette diagnostics.
//!
//! Maps `CoreError` and `ConfigError` into user-facing errors with
//! actionable help text and a process exit code.

use std::time::Duration;

use miette::Diagnostic;
use thiserror::Error;

use captive_config::ConfigError;
use captive_core::CoreError;

pub mod exit_code {
    pub const GENERAL: i32 = 1;
    pub const USAGE: i32 = 2;
    pub const AUTH: i32 = 3;
    pub const NOT_FOUND: i32 = 4;
    pub const CONNECTION: i32 = 7;
    pub const TIMEOUT: i32 = 8;
    pub const INTERRUPTED: i32 = 130;
}

#[derive(Debug, Error, Diagnostic)]
pub enum CliError {
    // ── Connection ───────────────────────────────────────────────────
    #[error("Could not connect to router at {url}")]
    #[diagnostic(
        code(captive::connection_failed),
        help(
            "Check that the router is reachable and its REST API (www-ssl) is enabled.\n\
             Reason: {reason}\n\
             Try: captive clients --insecure"
        )
    )]
    ConnectionFailed { url: String, reason: String },

    // ── Authentication ───────────────────────────────────────────────
    #[error("Authentication failed")]
    #[diagnostic(
        code(captive::auth_failed),
        help(
            "Verify the API user's name and password.\n\
             Run: captive config set-password --profile {profile}"
        )
    )]
    AuthFailed { profile: String },

    #[error("No credentials configured for profile '{profile}'")]
    #[diagnostic(
        code(captive::no_credentials),
        help(
            "Configure credentials with: captive config init\n\
             Or set CAPTIVE_USERNAME and CAPTIVE_PASSWORD."
        )
    )]
    NoCredentials { profile: String },

    // ── Resources ────────────────────────────────────────────────────
    #[error("{resource_type} '{identifier}' not found")]
    #[diagnostic(code(captive::not_found), help("{hint}"))]
    NotFound {
        resource_type: String,
        identifier: String,
        hint: String,
    },

    // ── Device ───────────────────────────────────────────────────────
    #[error("{message}")]
    #[diagnostic(code(captive::device))]
    Device { message: String },

    #[error("Provisioning stopped at step '{step}'")]
    #[diagnostic(
        code(captive::provision_failed),
        help(
            "{reason}\n\
             Steps before it were applied; re-running `captive provision` is safe."
        )
    )]
    ProvisionFailed { step: String, reason: String },

    // ── Validation ───────────────────────────────────────────────────
    #[error("Invalid value for {field}: {reason}")]
    #[diagnostic(code(captive::validation))]
    Validation { field: String, reason: String },

    // ── Configuration ────────────────────────────────────────────────
    #[error("Profile '{name}' not found in configuration")]
    #[diagnostic(
        code(captive::profile_not_found),
        help(
            "Available profiles: {available}\n\
             Create one with: captive config init"
        )
    )]
    ProfileNotFound { name: String, available: String },

    #[error("No router configured")]
    #[diagnostic(
        code(captive::no_config),
        help(
            "Create a profile with: captive config init\n\
             Or pass --url. Expected config at: {path}"
        )
    )]
    NoConfig { path: String },

    #[error(transparent)]
    #[diagnostic(code(captive::config))]
    Config(Box<figment::Error>),

    // ── Interactive ──────────────────────────────────────────────────
    #[error("Destructive operation '{action}' requires confirmation")]
    #[diagnostic(
        code(captive::confirmation_required),
        help("Use --yes (-y) to skip confirmation in non-interactive contexts.")
    )]
    NonInteractiveRequiresYes { action: String },

    // ── Timeout ──────────────────────────────────────────────────────
    #[error("Operation timed out after {}", humantime::format_duration(*.limit))]
    #[diagnostic(
        code(captive::timeout),
        help("Raise defaults.operation_timeout or --timeout, or check the router's load.")
    )]
    Timeout { limit: Duration },

    #[error("Interrupted: {operation} was cancelled")]
    #[diagnostic(
        code(captive::interrupted),
        help("Re-run the command; every step is safe to repeat.")
    )]
    Interrupted { operation: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl CliError {
    /// Map this error to an exit code for process termination.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::ConnectionFailed { .. } => exit_code::CONNECTION,
            Self::AuthFailed { .. } | Self::NoCredentials { .. } => exit_code::AUTH,
            Self::NotFound { .. } | Self::ProfileNotFound { .. } => exit_code::NOT_FOUND,
            Self::Timeout { .. } => exit_code::TIMEOUT,
            Self::Interrupted { .. } => exit_code::INTERRUPTED,
            Self::Validation { .. } | Self::NonInteractiveRequiresYes { .. } | Self::NoConfig { .. } => {
                exit_code::USAGE
            }
            _ => exit_code::GENERAL,
        }
    }
}

impl From<figment::Error> for CliError {
    fn from(err: figment::Error) -> Self {
        Self::Config(Box::new(err))
    }
}

// ── CoreError → CliError mapping ─────────────────────────────────────

impl From<CoreError> for CliError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::ConnectionFailed { url, reason } => Self::ConnectionFailed { url, reason },

            CoreError::AuthenticationFailed { .. } => Self::AuthFailed {
                profile: "current".into(),
            },

            CoreError::Timeout { limit } => Self::Timeout { limit },

            CoreError::Cancelled { operation } => Self::Interrupted { operation },

            CoreError::ProvisionFailed { step, source } => Self::ProvisionFailed {
                step,
                reason: source.to_string(),
            },

            CoreError::PoolNotFound { pool } => Self::NotFound {
                resource_type: "IP pool".into(),
                identifier: pool,
                hint: "Run: captive provision".into(),
            },

            CoreError::NoLeaseForClient { client } => Self::NotFound {
                resource_type: "lease for client".into(),
                identifier: client,
                hint: "Run: captive allocate <owner> first, or check the DHCP leases.".into(),
            },

            CoreError::RouterNotFound { id } => Self::NotFound {
                resource_type: "router".into(),
                identifier: id,
                hint: "Run: captive config profiles".into(),
            },

            CoreError::NoRouterForUser { user } => Self::NotFound {
                resource_type: "router for user".into(),
                identifier: user,
                hint: "List the user under a profile's `users` in the config file.".into(),
            },

            CoreError::ValidationFailed { message } | CoreError::Config { message } => {
                Self::Validation {
                    field: "input".into(),
                    reason: message,
                }
            }

            other => Self::Device {
                message: other.to_string(),
            },
        }
    }
}

// ── ConfigError → CliError mapping ───────────────────────────────────

impl From<ConfigError> for CliError {
    fn from(err: ConfigError) -> Self {
        match err {
            ConfigError::Validation { field, reason } => Self::Validation { field, reason },
            ConfigError::NoCredentials { profile } => Self::NoCredentials { profile },
            ConfigError::UnknownProfile { profile } => Self::ProfileNotFound {
                name: profile,
                available: "(see: captive config profiles)".into(),
            },
            ConfigError::Figment(e) => Self::Config(e),
            ConfigError::Io(e) => Self::Io(e),
            ConfigError::Serialization(e) => Self::Validation {
                field: "config".into(),
                reason: format!("failed to serialize config: {e}"),
            },
        }
    }
}
