// REST command bridge client
//
// Wraps `reqwest::Client` with basic-auth, URL construction under `/rest`,
// and the device's response conventions. Every console command is reachable
// as `POST /rest/<path>`: attribute words become JSON members and query words
// are sent as the `.query` array. Callers only ever see `Vec<Record>`.

use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::debug;
use url::Url;

use crate::command::{Record, Request};
use crate::error::Error;
use crate::transport::TransportConfig;

/// HTTP client for one device's REST command bridge.
///
/// Holds a pooled, keep-alive `reqwest::Client`; cheap requests issued
/// back-to-back reuse the same TCP/TLS connection.
pub struct RestClient {
    http: reqwest::Client,
    base_url: Url,
    username: String,
    password: SecretString,
}

/// Error body returned by the device on 4xx/5xx.
#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    detail: Option<String>,
}

impl RestClient {
    /// Create a new client from a `TransportConfig`.
    ///
    /// The `base_url` is the device root, e.g. `https://192.168.88.1`.
    pub fn new(
        base_url: Url,
        username: impl Into<String>,
        password: SecretString,
        transport: &TransportConfig,
    ) -> Result<Self, Error> {
        let http = transport.build_client()?;
        Ok(Self::with_client(http, base_url, username, password))
    }

    /// Create a client with a pre-built `reqwest::Client`.
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
        }
    }

    /// The device base URL.
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    // ── URL builders ─────────────────────────────────────────────────

    /// Build `{base}/rest{path}`.
    pub(crate) fn rest_url(&self, path: &str) -> Result<Url, Error> {
        let full = format!(
            "{}/rest/{}",
            self.base_url.as_str().trim_end_matches('/'),
            path.trim_start_matches('/')
        );
        Ok(Url::parse(&full)?)
    }

    // ── Session probe ────────────────────────────────────────────────

    /// Fetch the device identity, verifying reachability and credentials.
    ///
    /// `GET /rest/system/identity`
    pub async fn identity(&self) -> Result<String, Error> {
        let url = self.rest_url("/system/identity")?;
        debug!("GET {}", url);

        let resp = self
            .http
            .get(url)
            .basic_auth(&self.username, Some(self.password.expose_secret()))
            .send()
            .await
            .map_err(Error::Transport)?;

        let records = parse_response("/system/identity", resp).await?;
        Ok(records
            .first()
            .and_then(|r| r.get("name"))
            .unwrap_or_default()
            .to_owned())
    }

    // ── Command execution ────────────────────────────────────────────

    /// Execute one command and return the device's records.
    ///
    /// `POST /rest{path}` with attributes as members and queries under `.query`.
    pub async fn execute(&self, request: &Request) -> Result<Vec<Record>, Error> {
        let url = self.rest_url(request.path())?;
        debug!(command = %request, "POST {}", url);

        let resp = self
            .http
            .post(url)
            .basic_auth(&self.username, Some(self.password.expose_secret()))
            .json(&request_body(request))
            .send()
            .await
            .map_err(Error::Transport)?;

        parse_response(request.path(), resp).await
    }
}

// ── Body / response helpers ─────────────────────────────────────────

fn request_body(request: &Request) -> Value {
    let mut body = Map::new();
    for (key, value) in request.attributes() {
        body.insert(key.to_owned(), Value::String(value.to_owned()));
    }
    let queries: Vec<Value> = request
        .queries()
        .map(|(k, v)| Value::String(format!("{k}={v}")))
        .collect();
    if !queries.is_empty() {
        body.insert(".query".into(), Value::Array(queries));
    }
    Value::Object(body)
}

/// Turn a device response into records, or a typed error.
pub(crate) async fn parse_response(
    path: &str,
    resp: reqwest::Response,
) -> Result<Vec<Record>, Error> {
    let status = resp.status();

    if status == reqwest::StatusCode::UNAUTHORIZED {
        return Err(Error::Authentication {
            message: "device rejected credentials".into(),
        });
    }

    let body = resp.text().await.map_err(Error::Transport)?;

    if !status.is_success() {
        let parsed: Option<ErrorBody> = serde_json::from_str(&body).ok();
        let (message, detail) = parsed.map_or_else(
            || (body.clone(), None),
            |b| (b.message.unwrap_or_else(|| status.to_string()), b.detail),
        );
        return Err(Error::Command {
            path: path.to_owned(),
            status: status.as_u16(),
            message,
            detail,
        });
    }

    if body.trim().is_empty() {
        return Ok(Vec::new());
    }

    let value: Value = serde_json::from_str(&body).map_err(|e| Error::Deserialization {
        message: e.to_string(),
        body: body.clone(),
    })?;

    records_from_value(value).map_err(|message| Error::Deserialization { message, body })
}

fn records_from_value(value: Value) -> Result<Vec<Record>, String> {
    match value {
        Value::Null => Ok(Vec::new()),
        Value::Array(items) => items
            .into_iter()
            .map(|item| match item {
                Value::Object(map) => Ok(record_from_object(map)),
                other => Err(format!("expected object in response array, got {other}")),
            })
            .collect(),
        Value::Object(map) if map.is_empty() => Ok(Vec::new()),
        Value::Object(map) => Ok(vec![record_from_object(map)]),
        other => Err(format!("unexpected response shape: {other}")),
    }
}

fn record_from_object(map: Map<String, Value>) -> Record {
    map.into_iter()
        .filter_map(|(k, v)| match v {
            Value::Null => None,
            Value::String(s) => Some((k, s)),
            other => Some((k, other.to_string())),
        })
        .collect()
}
