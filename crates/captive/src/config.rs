//! Profile resolution and the profile-backed router directory.
//!
//! The TOML types and credential chain live in `captive-config`; this module
//! layers the CLI flags on top and exposes the profiles to the engine as a
//! `RouterDirectory`, so fleet commands (`sweep`) and router registration
//! work without a database.

use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use secrecy::SecretString;
use uuid::Uuid;

use captive_config::{Config, Profile};
use captive_core::{CoreError, DeviceConfig, RouterDirectory, RouterRecord, TlsVerification};

use crate::cli::GlobalOpts;
use crate::error::CliError;

pub use captive_config::{config_path, load_config_or_default, save_config};

/// Stand-in router address for `--dry-run` without a profile.
const DRY_RUN_URL: &str = "https://192.0.2.1";

// ── Profile resolution ───────────────────────────────────────────────

/// Resolve the active profile name from CLI flags and config.
pub fn active_profile_name(global: &GlobalOpts, config: &Config) -> String {
    global
        .profile
        .clone()
        .or_else(|| config.default_profile.clone())
        .unwrap_or_else(|| "default".into())
}

/// Apply CLI overrides (`--url`, `--username`) to a profile.
fn with_overrides(profile: &Profile, global: &GlobalOpts) -> Profile {
    let mut effective = profile.clone();
    if let Some(ref url) = global.url {
        effective.url.clone_from(url);
    }
    if let Some(ref username) = global.username {
        effective.username = Some(username.clone());
    }
    effective
}

fn apply_flags(device: &mut DeviceConfig, global: &GlobalOpts) {
    if global.insecure {
        device.tls = TlsVerification::DangerAcceptInvalid;
    }
    if let Some(secs) = global.timeout {
        device.timeout = Duration::from_secs(secs);
    }
}

/// Build the `DeviceConfig` for the active profile plus CLI overrides.
///
/// Without a matching profile, `--url` and the `CAPTIVE_*` credential
/// variables alone are enough. Under `--dry-run` nothing is contacted, so
/// missing credentials or URL fall back to placeholders.
pub fn resolve_device(global: &GlobalOpts, cfg: &Config) -> Result<(String, DeviceConfig), CliError> {
    let name = active_profile_name(global, cfg);

    let base = match cfg.profiles.get(&name) {
        Some(profile) => with_overrides(profile, global),
        None => match global.url {
            Some(_) => with_overrides(&Profile::default(), global),
            None if global.dry_run => Profile {
                url: DRY_RUN_URL.into(),
                ..with_overrides(&Profile::default(), global)
            },
            None => {
                return Err(CliError::NoConfig {
                    path: config_path().display().to_string(),
                });
            }
        },
    };

    let resolved = captive_config::profile_to_device_config(&base, &name, &cfg.defaults);
    let mut device = match resolved {
        Ok(device) => device,
        Err(captive_config::ConfigError::NoCredentials { .. }) if global.dry_run => {
            let url = captive_config::parse_url(&base.url)?;
            DeviceConfig::new(url, "dry-run", SecretString::from(String::new()))
        }
        Err(e) => return Err(e.into()),
    };
    apply_flags(&mut device, global);
    Ok((name, device))
}

// ── Profile directory ────────────────────────────────────────────────

/// Router directory backed by the config file's profiles.
///
/// A profile is a router; `building` and `users` map subscribers to it.
/// Registering a router writes its id back into the active profile.
/// Profiles never registered get an id for the lifetime of the process.
pub struct ProfileDirectory {
    state: Mutex<DirectoryState>,
    active: String,
    path: Option<PathBuf>,
    insecure: bool,
    timeout: Option<u64>,
}

struct DirectoryState {
    config: Config,
    ephemeral: Vec<(String, Uuid)>,
}

impl ProfileDirectory {
    /// `path` is where registrations are saved; `None` keeps them in memory.
    pub fn new(config: Config, global: &GlobalOpts, path: Option<PathBuf>) -> Self {
        let active = active_profile_name(global, &config);
        let ephemeral = config
            .profiles
            .iter()
            .filter(|(_, p)| p.router_id.is_none())
            .map(|(name, _)| (name.clone(), Uuid::new_v4()))
            .collect();
        Self {
            state: Mutex::new(DirectoryState { config, ephemeral }),
            active,
            path,
            insecure: global.insecure,
            timeout: global.timeout,
        }
    }

    fn state(&self) -> MutexGuard<'_, DirectoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl DirectoryState {
    fn id_of(&self, name: &str, profile: &Profile) -> Option<Uuid> {
        profile.router_id.or_else(|| {
            self.ephemeral
                .iter()
                .find(|(n, _)| n == name)
                .map(|(_, id)| *id)
        })
    }

    fn find(&self, id: Uuid) -> Option<(&str, &Profile)> {
        self.config
            .profiles
            .iter()
            .find(|(name, p)| self.id_of(name, p) == Some(id))
            .map(|(name, p)| (name.as_str(), p))
    }

    fn record(&self, name: &str, profile: &Profile) -> Option<RouterRecord> {
        let id = self.id_of(name, profile)?;
        let host = captive_config::parse_url(&profile.url)
            .ok()
            .and_then(|u| u.host_str().map(str::to_owned))
            .unwrap_or_default();
        let mut record = RouterRecord::new(profile.building.clone().unwrap_or_default(), name, host);
        record.id = id;
        if let Some(at) = profile.registered_at {
            record.created_at = at;
        }
        Some(record)
    }
}

#[async_trait]
impl RouterDirectory for ProfileDirectory {
    async fn create_router(&self, record: &RouterRecord, device: &DeviceConfig) -> Result<(), CoreError> {
        let mut state = self.state();
        let profile = state
            .config
            .profiles
            .entry(self.active.clone())
            .or_insert_with(|| Profile {
                url: device.url.to_string(),
                username: Some(device.username.clone()),
                ..Profile::default()
            });
        profile.router_id = Some(record.id);
        profile.building = Some(record.building_id.clone());
        profile.registered_at = Some(record.created_at);

        if let Some(ref path) = self.path {
            captive_config::save_config_to(&state.config, path).map_err(|e| CoreError::Config {
                message: e.to_string(),
            })?;
        }
        Ok(())
    }

    async fn router(&self, id: Uuid) -> Result<RouterRecord, CoreError> {
        let state = self.state();
        state
            .find(id)
            .and_then(|(name, p)| state.record(name, p))
            .ok_or_else(|| CoreError::RouterNotFound { id: id.to_string() })
    }

    async fn router_for_user(&self, user_id: &str) -> Result<RouterRecord, CoreError> {
        let state = self.state();
        state
            .config
            .profile_for_user(user_id)
            .and_then(|(name, p)| state.record(name, p))
            .ok_or_else(|| CoreError::NoRouterForUser {
                user: user_id.to_owned(),
            })
    }

    async fn device(&self, router: &RouterRecord) -> Result<DeviceConfig, CoreError> {
        let state = self.state();
        let (name, profile) = state
            .find(router.id)
            .ok_or_else(|| CoreError::RouterNotFound {
                id: router.id.to_string(),
            })?;
        let mut device =
            captive_config::profile_to_device_config(profile, name, &state.config.defaults)
                .map_err(|e| CoreError::Config {
                    message: e.to_string(),
                })?;
        if self.insecure {
            device.tls = TlsVerification::DangerAcceptInvalid;
        }
        if let Some(secs) = self.timeout {
            device.timeout = Duration::from_secs(secs);
        }
        Ok(device)
    }
}
