// ── Device sessions ──
//
// A `Session` owns one live link to one device. Commands are issued
// strictly in sequence through `&mut self`; `close` consumes the session,
// so a closed session cannot be reused and cannot be closed twice.
//
// The link itself comes from a `Transport`, which keeps the engine
// independent of the wire protocol: the REST adapter in `crate::rest` and
// the in-memory `crate::sim` device both plug in here.

use async_trait::async_trait;
use captive_api::{Record, Request};
use tracing::{debug, warn};

use crate::config::DeviceConfig;
use crate::error::CoreError;

// ── Seams ───────────────────────────────────────────────────────────

/// Opens authenticated links to devices.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn open(&self, device: &DeviceConfig) -> Result<Box<dyn Link>, CoreError>;
}

/// One open connection to a device.
#[async_trait]
pub trait Link: Send {
    async fn execute(&mut self, request: &Request) -> Result<Vec<Record>, captive_api::Error>;

    async fn close(&mut self) -> Result<(), captive_api::Error>;
}

/// Bulk file channel, disjoint from the command link.
#[async_trait]
pub trait FileTransfer: Send + Sync {
    async fn put(
        &self,
        device: &DeviceConfig,
        remote_name: &str,
        contents: &[u8],
    ) -> Result<(), captive_api::Error>;
}

// ── Session ─────────────────────────────────────────────────────────

pub struct Session {
    link: Box<dyn Link>,
    device: String,
    commands: usize,
}

impl Session {
    /// Open a session through `transport`.
    pub async fn open(transport: &dyn Transport, device: &DeviceConfig) -> Result<Self, CoreError> {
        let link = transport.open(device).await?;
        debug!(device = %device.url, "session opened");
        Ok(Self {
            link,
            device: device.url.to_string(),
            commands: 0,
        })
    }

    /// The device this session talks to.
    pub fn device(&self) -> &str {
        &self.device
    }

    /// Number of commands issued so far.
    pub fn commands(&self) -> usize {
        self.commands
    }

    /// Execute one command.
    pub async fn execute(&mut self, request: &Request) -> Result<Vec<Record>, CoreError> {
        self.commands += 1;
        debug!(device = %self.device, command = %request, "exec");
        self.link.execute(request).await.map_err(|e| {
            warn!(device = %self.device, command = %request, error = %e, "command failed");
            CoreError::from_command(request, e)
        })
    }

    /// `print` on `class`, filtered by exact attribute matches.
    pub async fn print(
        &mut self,
        class: &str,
        filters: &[(&str, &str)],
    ) -> Result<Vec<Record>, CoreError> {
        let request = filters
            .iter()
            .fold(Request::print(class), |req, (k, v)| req.query(*k, *v));
        self.execute(&request).await
    }

    /// `add` on `class`; returns the id the device assigned, if reported.
    pub async fn add(
        &mut self,
        class: &str,
        attrs: &[(&str, &str)],
    ) -> Result<Option<String>, CoreError> {
        let request = attrs
            .iter()
            .fold(Request::add(class), |req, (k, v)| req.attr(*k, *v));
        let records = self.execute(&request).await?;
        Ok(records.first().and_then(Record::id).map(str::to_owned))
    }

    /// `set` attributes on the object `id`.
    pub async fn set(
        &mut self,
        class: &str,
        id: &str,
        attrs: &[(&str, &str)],
    ) -> Result<(), CoreError> {
        let request = attrs
            .iter()
            .fold(Request::set(class, id), |req, (k, v)| req.attr(*k, *v));
        self.execute(&request).await.map(drop)
    }

    /// `remove` the object `id`. Returns `false` if it was already gone.
    pub async fn remove(&mut self, class: &str, id: &str) -> Result<bool, CoreError> {
        match self.execute(&Request::remove(class, id)).await {
            Ok(_) => Ok(true),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Close the link. Never fails: close errors are logged.
    pub async fn close(mut self) {
        match self.link.close().await {
            Ok(()) => debug!(device = %self.device, commands = self.commands, "session closed"),
            Err(e) => warn!(device = %self.device, error = %e, "session close failed"),
        }
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("device", &self.device)
            .field("commands", &self.commands)
            .finish_non_exhaustive()
    }
}
