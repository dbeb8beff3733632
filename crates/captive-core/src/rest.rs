// ── REST transport adapter ──
//
// Plugs the `captive-api` REST command bridge into the session seams.
// Opening a link builds a keep-alive HTTP client and probes the device
// identity so bad credentials fail at open rather than mid-provisioning.

use std::time::Duration;

use async_trait::async_trait;
use captive_api::{FileChannel, Record, Request, RestClient};
use tracing::debug;

use crate::config::DeviceConfig;
use crate::error::CoreError;
use crate::session::{FileTransfer, Link, Transport};

/// Opens REST command links.
#[derive(Debug, Clone, Copy, Default)]
pub struct RestTransport;

#[async_trait]
impl Transport for RestTransport {
    async fn open(&self, device: &DeviceConfig) -> Result<Box<dyn Link>, CoreError> {
        let client = RestClient::new(
            device.url.clone(),
            device.username.clone(),
            device.password.clone(),
            &device.transport_config(),
        )?;

        let identity = client.identity().await.map_err(|e| match e {
            captive_api::Error::Authentication { message } => {
                CoreError::AuthenticationFailed { message }
            }
            captive_api::Error::Transport(ref inner) if !inner.is_timeout() => {
                CoreError::ConnectionFailed {
                    url: device.url.to_string(),
                    reason: e.to_string(),
                }
            }
            other => CoreError::from(other),
        })?;
        debug!(device = %device.url, identity, "connected");

        Ok(Box::new(RestLink {
            client: Some(client),
        }))
    }
}

/// One REST link. The HTTP pool is dropped on close.
pub struct RestLink {
    client: Option<RestClient>,
}

#[async_trait]
impl Link for RestLink {
    async fn execute(&mut self, request: &Request) -> Result<Vec<Record>, captive_api::Error> {
        match &self.client {
            Some(client) => client.execute(request).await,
            None => Err(captive_api::Error::Command {
                path: request.path().to_owned(),
                status: 0,
                message: "link is closed".into(),
                detail: None,
            }),
        }
    }

    async fn close(&mut self) -> Result<(), captive_api::Error> {
        self.client = None;
        Ok(())
    }
}

/// Bulk uploads over a dedicated HTTP client.
#[derive(Debug, Clone, Copy)]
pub struct RestFileTransfer {
    timeout: Duration,
}

impl RestFileTransfer {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl Default for RestFileTransfer {
    fn default() -> Self {
        Self::new(Duration::from_secs(120))
    }
}

#[async_trait]
impl FileTransfer for RestFileTransfer {
    async fn put(
        &self,
        device: &DeviceConfig,
        remote_name: &str,
        contents: &[u8],
    ) -> Result<(), captive_api::Error> {
        let channel = FileChannel::new(
            device.url.clone(),
            device.username.clone(),
            device.password.clone(),
            &device.transport_config(),
            self.timeout,
        )?;
        channel.put(remote_name, contents).await
    }
}
