// ── Portal asset publisher ──
//
// Replaces the hotspot's HTML templates. For each file: remove the old
// copy, push the new one over the bulk channel, then poll the device's
// file table until it shows up. The device indexes uploads
// asynchronously, so the poll backs off exponentially up to a deadline.

use std::path::Path;
use std::time::Duration;

use tokio::time::{Instant, sleep};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::{DeviceConfig, VerifyBackoff};
use crate::error::CoreError;
use crate::session::{FileTransfer, Session};

pub(crate) const FILE: &str = "/file";

/// One template file, stored on the device as `<directory>/<name>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortalFile {
    name: String,
    contents: Vec<u8>,
}

impl PortalFile {
    /// `name` is a bare file name (`login.html`); it may not contain path
    /// separators.
    pub fn new(name: impl Into<String>, contents: impl Into<Vec<u8>>) -> Result<Self, CoreError> {
        let name = name.into();
        if name.is_empty() || name.contains(['/', '\\']) || name == "." || name == ".." {
            return Err(CoreError::ValidationFailed {
                message: format!("invalid portal file name '{name}'"),
            });
        }
        Ok(Self {
            name,
            contents: contents.into(),
        })
    }

    /// Read a local file; the remote name is its file name.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, CoreError> {
        let path = path.as_ref();
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| CoreError::ValidationFailed {
                message: format!("not a file path: {}", path.display()),
            })?;
        let contents = tokio::fs::read(path).await.map_err(|e| CoreError::Config {
            message: format!("cannot read {}: {e}", path.display()),
        })?;
        Self::new(name, contents)
    }

    /// Every regular file directly inside `dir`, sorted by name.
    pub async fn load_dir(dir: impl AsRef<Path>) -> Result<Vec<Self>, CoreError> {
        let dir = dir.as_ref();
        let read_err = |e: std::io::Error| CoreError::Config {
            message: format!("cannot read {}: {e}", dir.display()),
        };
        let mut entries = tokio::fs::read_dir(dir).await.map_err(read_err)?;
        let mut files = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(read_err)? {
            if entry.file_type().await.map_err(read_err)?.is_file() {
                files.push(Self::load(entry.path()).await?);
            }
        }
        files.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(files)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn contents(&self) -> &[u8] {
        &self.contents
    }
}

/// Publishes portal files into one remote directory.
#[derive(Debug, Clone)]
pub struct PortalPublisher {
    directory: String,
    backoff: VerifyBackoff,
}

impl PortalPublisher {
    pub fn new(directory: impl Into<String>, backoff: VerifyBackoff) -> Self {
        Self {
            directory: directory.into(),
            backoff,
        }
    }

    fn remote_name(&self, file: &PortalFile) -> String {
        format!("{}/{}", self.directory.trim_end_matches('/'), file.name)
    }

    /// Publish `files` in order, stopping at the first failure.
    pub async fn publish(
        &self,
        session: &mut Session,
        transfer: &dyn FileTransfer,
        device: &DeviceConfig,
        files: &[PortalFile],
        cancel: &CancellationToken,
    ) -> Result<(), CoreError> {
        for file in files {
            let remote = self.remote_name(file);
            if cancel.is_cancelled() {
                return Err(cancelled(&remote));
            }

            for existing in session.print(FILE, &[("name", remote.as_str())]).await? {
                if let Some(id) = existing.id() {
                    session.remove(FILE, id).await?;
                }
            }

            transfer
                .put(device, &remote, &file.contents)
                .await
                .map_err(|e| {
                    warn!(file = %remote, error = %e, "upload failed");
                    CoreError::Upload {
                        file: remote.clone(),
                        reason: e.to_string(),
                    }
                })?;

            self.verify(session, &remote, cancel).await?;
            info!(file = %remote, bytes = file.contents.len(), "portal file published");
        }
        Ok(())
    }

    async fn verify(
        &self,
        session: &mut Session,
        remote: &str,
        cancel: &CancellationToken,
    ) -> Result<(), CoreError> {
        let started = Instant::now();
        let deadline = started + Duration::from_millis(self.backoff.deadline_ms);
        let mut delay = Duration::from_millis(self.backoff.initial_delay_ms.max(1));
        let max_delay = Duration::from_millis(self.backoff.max_delay_ms).max(delay);

        loop {
            if !session.print(FILE, &[("name", remote)]).await?.is_empty() {
                return Ok(());
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(CoreError::VerificationFailed {
                    file: remote.to_owned(),
                    waited_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
                });
            }

            let wait = delay.min(deadline - now);
            debug!(file = remote, wait_ms = wait.as_millis(), "file not visible yet");
            tokio::select! {
                () = cancel.cancelled() => return Err(cancelled(remote)),
                () = sleep(wait) => {}
            }
            delay = (delay * 2).min(max_delay);
        }
    }
}

fn cancelled(remote: &str) -> CoreError {
    CoreError::Cancelled {
        operation: format!("publishing {remote}"),
    }
}
