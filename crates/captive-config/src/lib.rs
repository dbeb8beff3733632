//! Shared configuration for the captive CLI and embedding services.
//!
//! TOML router profiles, credential resolution (env + keyring + plaintext),
//! and translation to `captive_core::DeviceConfig` / `EngineConfig`. The
//! hotspot topology and access policy live in the same file so every
//! router provisioned from it gets the same portal.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use captive_core::{
    AccessPolicy, DeviceConfig, EngineConfig, ProvisionConfig, TlsVerification, VerifyBackoff,
};

const KEYRING_SERVICE: &str = "captive";

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("no credentials configured for profile '{profile}'")]
    NoCredentials { profile: String },

    #[error("profile '{profile}' not found")]
    UnknownProfile { profile: String },

    #[error("failed to serialize config: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

// ── TOML config structs ─────────────────────────────────────────────

/// Top-level TOML configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    /// Default profile name.
    pub default_profile: Option<String>,

    /// Global defaults.
    #[serde(default)]
    pub defaults: Defaults,

    /// Named router profiles.
    #[serde(default)]
    pub profiles: HashMap<String, Profile>,

    /// Topology applied to every provisioned router.
    #[serde(default)]
    pub hotspot: ProvisionConfig,

    /// How paid clients are let through.
    #[serde(default)]
    pub access: AccessPolicy,

    /// Portal upload verification backoff.
    #[serde(default)]
    pub verify: VerifyBackoff,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            default_profile: Some("default".into()),
            defaults: Defaults::default(),
            profiles: HashMap::new(),
            hotspot: ProvisionConfig::default(),
            access: AccessPolicy::default(),
            verify: VerifyBackoff::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Defaults {
    #[serde(default = "default_output")]
    pub output: String,

    #[serde(default = "default_color")]
    pub color: String,

    #[serde(default)]
    pub insecure: bool,

    /// Require a certificate the system CA store trusts.
    #[serde(default)]
    pub verify_tls: bool,

    /// Per-request timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout: u64,

    /// Bound on a whole operation (`"2m"`, `"90s"`). Unbounded if unset.
    #[serde(default)]
    pub operation_timeout: Option<String>,

    /// Timeout for one portal file upload.
    #[serde(default = "default_transfer_timeout")]
    pub transfer_timeout: String,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            output: default_output(),
            color: default_color(),
            insecure: false,
            verify_tls: false,
            timeout: default_timeout(),
            operation_timeout: None,
            transfer_timeout: default_transfer_timeout(),
        }
    }
}

fn default_output() -> String {
    "table".into()
}
fn default_color() -> String {
    "auto".into()
}
fn default_timeout() -> u64 {
    30
}
fn default_transfer_timeout() -> String {
    "2m".into()
}

/// A named router profile.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Profile {
    /// Router base URL (e.g., "https://10.0.0.1").
    pub url: String,

    /// API username.
    pub username: Option<String>,

    /// Password (plaintext -- prefer keyring or env var).
    pub password: Option<String>,

    /// Environment variable name containing the password.
    pub password_env: Option<String>,

    /// Path to custom CA certificate.
    pub ca_cert: Option<PathBuf>,

    /// Override insecure TLS setting.
    pub insecure: Option<bool>,

    /// Verify the router certificate against the system CA store.
    pub verify_tls: Option<bool>,

    /// Override request timeout (seconds).
    pub timeout: Option<u64>,

    /// Keep the connection open between commands (default on).
    pub keepalive: Option<bool>,

    /// Building this router serves.
    pub building: Option<String>,

    /// Directory id, assigned when the router is registered.
    pub router_id: Option<Uuid>,

    /// When the router was registered.
    pub registered_at: Option<DateTime<Utc>>,

    /// Users whose subscriptions are served by this router.
    #[serde(default)]
    pub users: Vec<String>,
}

impl Config {
    /// Look up a profile by name.
    pub fn profile(&self, name: &str) -> Result<&Profile, ConfigError> {
        self.profiles
            .get(name)
            .ok_or_else(|| ConfigError::UnknownProfile {
                profile: name.into(),
            })
    }

    /// The profile holding a directory id.
    pub fn profile_by_router_id(&self, id: Uuid) -> Option<(&str, &Profile)> {
        self.profiles
            .iter()
            .find(|(_, p)| p.router_id == Some(id))
            .map(|(name, p)| (name.as_str(), p))
    }

    /// The profile serving a user, if any lists them.
    pub fn profile_for_user(&self, user_id: &str) -> Option<(&str, &Profile)> {
        self.profiles
            .iter()
            .find(|(_, p)| p.users.iter().any(|u| u == user_id))
            .map(|(name, p)| (name.as_str(), p))
    }
}

// ── Config file path ────────────────────────────────────────────────

/// Resolve the config file path via XDG / platform conventions.
pub fn config_path() -> PathBuf {
    ProjectDirs::from("net", "spiderlan", "captive").map_or_else(
        || {
            let mut p = dirs_fallback();
            p.push("config.toml");
            p
        },
        |dirs| dirs.config_dir().join("config.toml"),
    )
}

fn dirs_fallback() -> PathBuf {
    let mut p = PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()));
    p.push(".config");
    p.push("captive");
    p
}

// ── Config loading ──────────────────────────────────────────────────

/// Load the full Config from the canonical file + environment.
pub fn load_config() -> Result<Config, ConfigError> {
    load_config_from(&config_path())
}

/// Load from an explicit file path, still layering `CAPTIVE_*` env vars.
pub fn load_config_from(path: &Path) -> Result<Config, ConfigError> {
    let figment = Figment::new()
        .merge(Serialized::defaults(Config::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed("CAPTIVE_").split("__"));

    let config: Config = figment.extract()?;
    config.hotspot.validate().map_err(|e| ConfigError::Validation {
        field: "hotspot".into(),
        reason: e.to_string(),
    })?;
    config.verify.validate().map_err(|e| ConfigError::Validation {
        field: "verify".into(),
        reason: e.to_string(),
    })?;
    Ok(config)
}

/// Load config, returning a default if the file doesn't exist.
pub fn load_config_or_default() -> Config {
    load_config().unwrap_or_default()
}

// ── Config saving ───────────────────────────────────────────────────

/// Serialize config to TOML and write to the canonical config path.
pub fn save_config(cfg: &Config) -> Result<(), ConfigError> {
    save_config_to(cfg, &config_path())
}

pub fn save_config_to(cfg: &Config, path: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let toml_str = toml::to_string_pretty(cfg)?;
    std::fs::write(path, toml_str)?;
    Ok(())
}

// ── Credential resolution (without CLI flags) ───────────────────────

/// Store a profile's password in the system keyring.
pub fn store_password(profile_name: &str, password: &str) -> Result<(), ConfigError> {
    let entry = keyring::Entry::new(KEYRING_SERVICE, &format!("{profile_name}/password"))
        .map_err(|e| ConfigError::Validation {
            field: "keyring".into(),
            reason: e.to_string(),
        })?;
    entry
        .set_password(password)
        .map_err(|e| ConfigError::Validation {
            field: "keyring".into(),
            reason: e.to_string(),
        })
}

/// Resolve the username and password for a profile.
pub fn resolve_credentials(
    profile: &Profile,
    profile_name: &str,
) -> Result<(String, SecretString), ConfigError> {
    let username = profile
        .username
        .clone()
        .or_else(|| std::env::var("CAPTIVE_USERNAME").ok())
        .ok_or_else(|| ConfigError::NoCredentials {
            profile: profile_name.into(),
        })?;

    // 1. Profile's password_env → env var lookup
    if let Some(ref env_name) = profile.password_env {
        if let Ok(pw) = std::env::var(env_name) {
            return Ok((username, SecretString::from(pw)));
        }
    }

    // 2. Global env var
    if let Ok(pw) = std::env::var("CAPTIVE_PASSWORD") {
        return Ok((username, SecretString::from(pw)));
    }

    // 3. Keyring
    if let Ok(entry) = keyring::Entry::new(KEYRING_SERVICE, &format!("{profile_name}/password")) {
        if let Ok(pw) = entry.get_password() {
            return Ok((username, SecretString::from(pw)));
        }
    }

    // 4. Plaintext in config
    if let Some(ref pw) = profile.password {
        return Ok((username, SecretString::from(pw.clone())));
    }

    Err(ConfigError::NoCredentials {
        profile: profile_name.into(),
    })
}

/// TLS mode for a profile.
///
/// `insecure` wins, then a custom CA, then `verify_tls`. With none of them
/// set the certificate is not checked, since routers ship self-signed ones.
pub fn tls_for(profile: &Profile, defaults: &Defaults) -> TlsVerification {
    if profile.insecure.unwrap_or(defaults.insecure) {
        TlsVerification::DangerAcceptInvalid
    } else if let Some(ref ca_path) = profile.ca_cert {
        TlsVerification::CustomCa(ca_path.clone())
    } else if profile.verify_tls.unwrap_or(defaults.verify_tls) {
        TlsVerification::SystemDefaults
    } else {
        TlsVerification::DangerAcceptInvalid
    }
}

pub fn parse_url(raw: &str) -> Result<url::Url, ConfigError> {
    raw.parse().map_err(|_| ConfigError::Validation {
        field: "url".into(),
        reason: format!("invalid URL: {raw}"),
    })
}

/// Build a `DeviceConfig` from a profile, without CLI flag overrides.
pub fn profile_to_device_config(
    profile: &Profile,
    profile_name: &str,
    defaults: &Defaults,
) -> Result<DeviceConfig, ConfigError> {
    let url = parse_url(&profile.url)?;
    let (username, password) = resolve_credentials(profile, profile_name)?;

    let mut device = DeviceConfig::new(url, username, password);
    device.tls = tls_for(profile, defaults);
    device.timeout = Duration::from_secs(profile.timeout.unwrap_or(defaults.timeout));
    device.keepalive = profile.keepalive.unwrap_or(true);
    Ok(device)
}

fn parse_duration(field: &str, raw: &str) -> Result<Duration, ConfigError> {
    humantime::parse_duration(raw).map_err(|e| ConfigError::Validation {
        field: field.into(),
        reason: format!("'{raw}': {e}"),
    })
}

/// Build the engine configuration from the file's shared sections.
pub fn engine_config(cfg: &Config) -> Result<EngineConfig, ConfigError> {
    let operation_timeout = cfg
        .defaults
        .operation_timeout
        .as_deref()
        .map(|raw| parse_duration("operation_timeout", raw))
        .transpose()?;
    let transfer_timeout = parse_duration("transfer_timeout", &cfg.defaults.transfer_timeout)?;

    Ok(EngineConfig {
        provision: cfg.hotspot.clone(),
        access: cfg.access.clone(),
        verify: cfg.verify,
        operation_timeout,
        transfer_timeout: Some(transfer_timeout),
    })
}
