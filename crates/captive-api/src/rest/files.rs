// Bulk file channel
//
// Portal templates are pushed through a dedicated client, separate from
// the command link: payloads are whole HTML documents rather than short
// key=value words, and they get their own (longer) timeout.

use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};
use serde_json::json;
use tracing::debug;
use url::Url;

use crate::error::Error;
use crate::rest::client::parse_response;
use crate::transport::TransportConfig;

/// Uploads whole files to one device.
pub struct FileChannel {
    http: reqwest::Client,
    base_url: Url,
    username: String,
    password: SecretString,
    timeout: Duration,
}

impl FileChannel {
    /// Build a file channel sharing TLS settings with the command link.
    pub fn new(
        base_url: Url,
        username: impl Into<String>,
        password: SecretString,
        transport: &TransportConfig,
        timeout: Duration,
    ) -> Result<Self, Error> {
        let http = transport.for_bulk_transfer(timeout).build_client()?;
        Ok(Self {
            http,
            base_url,
            username: username.into(),
            password,
            timeout,
        })
    }

    /// Create a channel with a pre-built `reqwest::Client`.
    pub fn with_client(
        http: reqwest::Client,
        base_url: Url,
        username: impl Into<String>,
        password: SecretString,
    ) -> Self {
        Self {
            http,
            base_url,
            username: username.into(),
            password,
            timeout: Duration::from_secs(120),
        }
    }

    /// Store `contents` under `remote_name` (e.g. `hotspot/login.html`).
    ///
    /// `PUT /rest/file` with `{"name": ..., "contents": ...}`. The device
    /// creates the file; callers remove any previous copy first.
    pub async fn put(&self, remote_name: &str, contents: &[u8]) -> Result<(), Error> {
        let text = std::str::from_utf8(contents).map_err(|e| Error::Command {
            path: "/file".into(),
            status: 0,
            message: format!("{remote_name} is not valid UTF-8: {e}"),
            detail: None,
        })?;

        let url = Url::parse(&format!(
            "{}/rest/file",
            self.base_url.as_str().trim_end_matches('/')
        ))?;
        debug!(remote_name, bytes = contents.len(), "PUT {}", url);

        let resp = self
            .http
            .put(url)
            .basic_auth(&self.username, Some(self.password.expose_secret()))
            .json(&json!({
                "name": remote_name,
                "contents": text,
            }))
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    Error::Timeout {
                        timeout_secs: self.timeout.as_secs(),
                    }
                } else {
                    Error::Transport(e)
                }
            })?;

        parse_response("/file", resp).await?;
        Ok(())
    }
}
