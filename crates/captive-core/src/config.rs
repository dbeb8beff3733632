// ── Runtime engine configuration ──
//
// These types describe *which* device to talk to and *what* to put on it.
// They never touch disk: `captive-config` (or the embedding service) builds
// them and hands them to the orchestrator.

use std::net::Ipv4Addr;
use std::time::Duration;

use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::model::{AddressRange, Ipv4Cidr};

// ── Device connection ───────────────────────────────────────────────

/// TLS verification strategy.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum TlsVerification {
    /// System CA store (strict).
    SystemDefaults,
    /// Custom CA certificate file.
    CustomCa(std::path::PathBuf),
    /// Skip verification. Routers ship self-signed certificates.
    #[default]
    DangerAcceptInvalid,
}

impl From<&TlsVerification> for captive_api::TlsMode {
    fn from(tls: &TlsVerification) -> Self {
        match tls {
            TlsVerification::SystemDefaults => Self::System,
            TlsVerification::CustomCa(path) => Self::CustomCa(path.clone()),
            TlsVerification::DangerAcceptInvalid => Self::DangerAcceptInvalid,
        }
    }
}

/// Connection parameters for a single device.
#[derive(Debug, Clone)]
pub struct DeviceConfig {
    /// Device URL (e.g., `https://10.0.0.1`).
    pub url: Url,
    pub username: String,
    pub password: SecretString,
    /// Hold the TCP connection open between commands of one session.
    pub keepalive: bool,
    /// Per-request timeout.
    pub timeout: Duration,
    pub tls: TlsVerification,
}

impl DeviceConfig {
    pub fn new(url: Url, username: impl Into<String>, password: SecretString) -> Self {
        Self {
            url,
            username: username.into(),
            password,
            keepalive: true,
            timeout: Duration::from_secs(30),
            tls: TlsVerification::default(),
        }
    }

    /// Identity used for per-device serialization: `host:port`.
    pub fn key(&self) -> String {
        let host = self.url.host_str().unwrap_or_default();
        match self.url.port_or_known_default() {
            Some(port) => format!("{host}:{port}"),
            None => host.to_owned(),
        }
    }

    pub(crate) fn transport_config(&self) -> captive_api::TransportConfig {
        captive_api::TransportConfig {
            tls: (&self.tls).into(),
            timeout: self.timeout,
            keepalive: self.keepalive.then(|| Duration::from_secs(60)),
        }
    }
}

// ── Hotspot topology ────────────────────────────────────────────────

/// Hotspot login methods, as the device spells them.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum LoginMethod {
    Cookie,
    HttpChap,
    HttpPap,
    MacCookie,
    Mac,
    Trial,
}

/// What happens to forwarded traffic that no allow rule matches.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, strum::Display,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum ForwardPolicy {
    /// Trailing drop-all rule in the forward chain.
    #[default]
    Deny,
    /// No drop rule; the hotspot alone gates clients.
    Allow,
}

/// Everything the topology provisioner puts on a device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProvisionConfig {
    pub wan_interface: String,
    pub bridge: String,
    /// Hotspot gateway address bound to the bridge.
    pub gateway: Ipv4Cidr,
    pub pool_name: String,
    pub pool_range: AddressRange,
    pub dhcp_server: String,
    /// Device duration syntax (`1h`, `30m`).
    pub lease_time: String,
    pub dns_servers: Vec<Ipv4Addr>,
    pub hotspot_name: String,
    pub profile_name: String,
    pub dns_name: String,
    pub html_directory: String,
    pub login_by: Vec<LoginMethod>,
    pub cookie_lifetime: String,
    pub addresses_per_mac: u32,
    /// Wireless is configured only when set and a radio exists.
    pub ssid: Option<String>,
    pub wireless_mode: String,
    pub walled_garden: Vec<String>,
    pub forward_policy: ForwardPolicy,
    /// Hotspot user profile whose login page sends clients to payment.
    pub payment_user_profile: String,
}

impl Default for ProvisionConfig {
    fn default() -> Self {
        Self {
            wan_interface: "ether1".into(),
            bridge: "bridge1".into(),
            gateway: Ipv4Cidr::new(Ipv4Addr::new(10, 5, 50, 1), 24)
                .unwrap_or_else(|_| unreachable!("/24 is a valid prefix")),
            pool_name: "hs-pool-1".into(),
            pool_range: AddressRange::new(
                Ipv4Addr::new(10, 5, 50, 2),
                Ipv4Addr::new(10, 5, 50, 254),
            )
            .unwrap_or_else(|_| unreachable!("range bounds are ordered")),
            dhcp_server: "dhcp1".into(),
            lease_time: "1h".into(),
            dns_servers: vec![Ipv4Addr::new(8, 8, 8, 8), Ipv4Addr::new(8, 8, 4, 4)],
            hotspot_name: "SPIDERLAN".into(),
            profile_name: "hsprof1".into(),
            dns_name: "hotspot.spiderlan.net".into(),
            html_directory: "hotspot".into(),
            login_by: vec![
                LoginMethod::Cookie,
                LoginMethod::HttpChap,
                LoginMethod::HttpPap,
                LoginMethod::MacCookie,
            ],
            cookie_lifetime: "3d".into(),
            addresses_per_mac: 2,
            ssid: None,
            wireless_mode: "ap-bridge".into(),
            walled_garden: Vec::new(),
            forward_policy: ForwardPolicy::default(),
            payment_user_profile: "redirect-to-payment".into(),
        }
    }
}

impl ProvisionConfig {
    /// Reject combinations the device would accept but that cannot work.
    pub fn validate(&self) -> Result<(), crate::CoreError> {
        let invalid = |message: String| Err(crate::CoreError::ValidationFailed { message });
        if !self.gateway.contains(self.pool_range.start())
            || !self.gateway.contains(self.pool_range.end())
        {
            return invalid(format!(
                "pool range {} is outside gateway network {}",
                self.pool_range,
                self.gateway.network_cidr()
            ));
        }
        if self.pool_range.contains(self.gateway.address()) {
            return invalid(format!(
                "pool range {} contains the gateway address {}",
                self.pool_range,
                self.gateway.address()
            ));
        }
        if self.wan_interface == self.bridge {
            return invalid("WAN interface and LAN bridge must differ".into());
        }
        if self.login_by.is_empty() {
            return invalid("at least one hotspot login method is required".into());
        }
        Ok(())
    }

    pub(crate) fn login_by_value(&self) -> String {
        self.login_by
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(",")
    }

    pub(crate) fn dns_servers_value(&self) -> String {
        self.dns_servers
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(",")
    }
}

// ── Access policy ───────────────────────────────────────────────────

/// How the access gate marks a client as allowed. Exactly one per gate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "strategy", rename_all = "kebab-case")]
pub enum AccessPolicy {
    /// Firewall address-list membership keyed by the client's address.
    AddressList {
        #[serde(default = "default_paid_list")]
        list: String,
    },
    /// Hotspot active-table entry keyed by the client's MAC.
    ActiveSession,
}

fn default_paid_list() -> String {
    "hs-paid".into()
}

impl Default for AccessPolicy {
    fn default() -> Self {
        Self::AddressList {
            list: default_paid_list(),
        }
    }
}

// ── Publisher backoff ───────────────────────────────────────────────

/// Bounded exponential backoff for upload verification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VerifyBackoff {
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    /// Overall budget per file.
    pub deadline_ms: u64,
}

impl Default for VerifyBackoff {
    fn default() -> Self {
        Self {
            initial_delay_ms: 200,
            max_delay_ms: 2_000,
            deadline_ms: 15_000,
        }
    }
}

impl VerifyBackoff {
    /// A zero initial delay never grows, so polling would not back off.
    pub fn validate(&self) -> Result<(), crate::CoreError> {
        let invalid = |message: String| Err(crate::CoreError::ValidationFailed { message });
        if self.initial_delay_ms == 0 {
            return invalid("verify.initial_delay_ms must be greater than zero".into());
        }
        if self.max_delay_ms < self.initial_delay_ms {
            return invalid(format!(
                "verify.max_delay_ms ({}) is below initial_delay_ms ({})",
                self.max_delay_ms, self.initial_delay_ms
            ));
        }
        Ok(())
    }
}

// ── Engine ──────────────────────────────────────────────────────────

/// Everything the orchestrator needs besides the devices themselves.
#[derive(Debug, Clone, Default)]
pub struct EngineConfig {
    pub provision: ProvisionConfig,
    pub access: AccessPolicy,
    pub verify: VerifyBackoff,
    /// Caller-level bound on one orchestrator call. `None` = unbounded.
    pub operation_timeout: Option<Duration>,
    /// Timeout for one bulk file transfer.
    pub transfer_timeout: Option<Duration>,
}
