// ── Topology steps ──
//
// One function per provisioning step (the firewall lives in its own
// module). Each returns the step's status; errors are classified by the
// caller according to the step's criticality.

use captive_api::Request;
use tracing::{debug, warn};

use crate::allocator::POOL;
use crate::config::ProvisionConfig;
use crate::error::CoreError;
use crate::session::Session;

use super::ensure::Ensure;
use super::report::StepStatus;

pub(crate) const INTERFACE: &str = "/interface";
pub(crate) const BRIDGE: &str = "/interface/bridge";
pub(crate) const BRIDGE_PORT: &str = "/interface/bridge/port";
pub(crate) const WIRELESS: &str = "/interface/wireless";
pub(crate) const WIRELESS_CAP: &str = "/interface/wireless/cap";
pub(crate) const ADDRESS: &str = "/ip/address";
pub(crate) const DHCP_CLIENT: &str = "/ip/dhcp-client";
pub(crate) const DHCP_SERVER: &str = "/ip/dhcp-server";
pub(crate) const DHCP_NETWORK: &str = "/ip/dhcp-server/network";
pub(crate) const HOTSPOT: &str = "/ip/hotspot";
pub(crate) const HOTSPOT_PROFILE: &str = "/ip/hotspot/profile";
pub(crate) const WALLED_GARDEN: &str = "/ip/hotspot/walled-garden/ip";
pub(crate) const NAT: &str = "/ip/firewall/nat";

/// Interfaces found on the device, by kind.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Interfaces {
    pub ethernet: Vec<String>,
    pub wireless: Vec<String>,
}

// ── 0. Discovery ────────────────────────────────────────────────────

pub(crate) async fn discover(session: &mut Session) -> Result<Interfaces, CoreError> {
    let mut found = Interfaces::default();
    for record in session.print(INTERFACE, &[]).await? {
        let Some(name) = record.get("name") else {
            continue;
        };
        match record.get("type") {
            Some("ether") => found.ethernet.push(name.to_owned()),
            Some("wlan") => found.wireless.push(name.to_owned()),
            _ => {}
        }
    }
    debug!(ethernet = ?found.ethernet, wireless = ?found.wireless, "interfaces discovered");
    Ok(found)
}

// ── 1. WAN isolation ────────────────────────────────────────────────

pub(crate) async fn isolate_wan(
    session: &mut Session,
    config: &ProvisionConfig,
) -> Result<StepStatus, CoreError> {
    let wan = config.wan_interface.as_str();
    let mut status = StepStatus::Unchanged;

    // The uplink must never be switched into the hotspot LAN.
    for port in session.print(BRIDGE_PORT, &[("interface", wan)]).await? {
        if let Some(id) = port.id() {
            if session.remove(BRIDGE_PORT, id).await? {
                status = status.merge(StepStatus::Updated);
            }
        }
    }

    // A DHCP client on the LAN side would fight the hotspot's own server.
    let stray = session
        .print(DHCP_CLIENT, &[("interface", config.bridge.as_str())])
        .await?;
    for client in stray {
        if let Some(id) = client.id() {
            if session.remove(DHCP_CLIENT, id).await? {
                status = status.merge(StepStatus::Updated);
            }
        }
    }

    let uplink = Ensure::new(DHCP_CLIENT)
        .key("interface", wan)
        .attr("disabled", "no")
        .run(session)
        .await?;
    Ok(status.merge(uplink))
}

// ── 2-4. Bridge, ports, gateway ─────────────────────────────────────

pub(crate) async fn bridge(
    session: &mut Session,
    config: &ProvisionConfig,
) -> Result<StepStatus, CoreError> {
    Ensure::new(BRIDGE)
        .key("name", config.bridge.as_str())
        .run(session)
        .await
}

pub(crate) async fn bridge_ports(
    session: &mut Session,
    config: &ProvisionConfig,
    interfaces: &Interfaces,
) -> Result<StepStatus, CoreError> {
    let mut status = StepStatus::Unchanged;
    for iface in interfaces
        .ethernet
        .iter()
        .filter(|name| **name != config.wan_interface)
    {
        status = status.merge(ensure_bridge_port(session, iface, &config.bridge).await?);
    }
    Ok(status)
}

/// Make `iface` a port of `bridge`, moving it out of any other bridge.
pub(crate) async fn ensure_bridge_port(
    session: &mut Session,
    iface: &str,
    bridge: &str,
) -> Result<StepStatus, CoreError> {
    let memberships = session.print(BRIDGE_PORT, &[("interface", iface)]).await?;
    if memberships.iter().any(|p| p.get("bridge") == Some(bridge)) {
        return Ok(StepStatus::Unchanged);
    }

    let mut status = StepStatus::Created;
    for port in &memberships {
        if let Some(id) = port.id() {
            debug!(iface, from = port.get("bridge"), to = bridge, "moving bridge port");
            session.remove(BRIDGE_PORT, id).await?;
            status = StepStatus::Updated;
        }
    }
    session
        .add(BRIDGE_PORT, &[("interface", iface), ("bridge", bridge)])
        .await?;
    Ok(status)
}

pub(crate) async fn gateway_address(
    session: &mut Session,
    config: &ProvisionConfig,
) -> Result<StepStatus, CoreError> {
    Ensure::new(ADDRESS)
        .key("address", config.gateway.to_string())
        .key("interface", config.bridge.as_str())
        .on_add("network", config.gateway.network().to_string())
        .run(session)
        .await
}

// ── 5-7. Pool, DHCP, hotspot profile ────────────────────────────────

pub(crate) async fn pool(
    session: &mut Session,
    config: &ProvisionConfig,
) -> Result<StepStatus, CoreError> {
    Ensure::new(POOL)
        .key("name", config.pool_name.as_str())
        .attr("ranges", config.pool_range.to_string())
        .run(session)
        .await
}

pub(crate) async fn dhcp(
    session: &mut Session,
    config: &ProvisionConfig,
) -> Result<StepStatus, CoreError> {
    let server = Ensure::new(DHCP_SERVER)
        .key("name", config.dhcp_server.as_str())
        .attr("interface", config.bridge.as_str())
        .attr("address-pool", config.pool_name.as_str())
        .attr("lease-time", config.lease_time.as_str())
        .attr("disabled", "no")
        .run(session)
        .await?;
    let network = Ensure::new(DHCP_NETWORK)
        .key("address", config.gateway.network_cidr())
        .attr("gateway", config.gateway.address().to_string())
        .attr("dns-server", config.dns_servers_value())
        .run(session)
        .await?;
    Ok(server.merge(network))
}

pub(crate) async fn hotspot_profile(
    session: &mut Session,
    config: &ProvisionConfig,
) -> Result<StepStatus, CoreError> {
    Ensure::new(HOTSPOT_PROFILE)
        .key("name", config.profile_name.as_str())
        .attr("hotspot-address", config.gateway.address().to_string())
        .attr("dns-name", config.dns_name.as_str())
        .attr("html-directory", config.html_directory.as_str())
        .attr("login-by", config.login_by_value())
        .attr("http-cookie-lifetime", config.cookie_lifetime.as_str())
        .run(session)
        .await
}

// ── 8. Walled garden ────────────────────────────────────────────────

/// Each domain is independent: one rejected entry does not stop the rest.
pub(crate) async fn walled_garden(
    session: &mut Session,
    config: &ProvisionConfig,
) -> Result<StepStatus, CoreError> {
    if config.walled_garden.is_empty() {
        return Ok(StepStatus::Skipped);
    }
    let mut status = StepStatus::Unchanged;
    for domain in &config.walled_garden {
        let outcome = Ensure::new(WALLED_GARDEN)
            .key("dst-host", domain.as_str())
            .attr("action", "accept")
            .run(session)
            .await;
        match outcome {
            Ok(s) => status = status.merge(s),
            Err(e) => {
                warn!(domain = %domain, error = %e, "walled-garden entry failed");
                status = status.merge(StepStatus::Failed(format!("{domain}: {e}")));
            }
        }
    }
    Ok(status)
}

// ── 9. Wireless ─────────────────────────────────────────────────────

pub(crate) async fn wireless(
    session: &mut Session,
    config: &ProvisionConfig,
    interfaces: &Interfaces,
) -> Result<StepStatus, CoreError> {
    let (Some(radio), Some(ssid)) = (interfaces.wireless.first(), config.ssid.as_deref()) else {
        debug!("no radio or no SSID; wireless left untouched");
        return Ok(StepStatus::Skipped);
    };

    // A CAPsMAN-managed radio ignores local settings.
    session
        .execute(&Request::new(format!("{WIRELESS_CAP}/set")).attr("enabled", "no"))
        .await?;

    let radio_status = Ensure::new(WIRELESS)
        .key("name", radio.as_str())
        .attr("ssid", ssid)
        .attr("mode", config.wireless_mode.as_str())
        .attr("disabled", "no")
        .run(session)
        .await?;
    let port_status = ensure_bridge_port(session, radio, &config.bridge).await?;
    Ok(radio_status.merge(port_status))
}

// ── 10. NAT ─────────────────────────────────────────────────────────

pub(crate) async fn nat(
    session: &mut Session,
    config: &ProvisionConfig,
) -> Result<StepStatus, CoreError> {
    Ensure::new(NAT)
        .key("chain", "srcnat")
        .key("action", "masquerade")
        .key("out-interface", config.wan_interface.as_str())
        .run(session)
        .await
}

// ── 12. Hotspot server ──────────────────────────────────────────────

/// Created when absent, enabled when disabled, otherwise left alone.
pub(crate) async fn hotspot(
    session: &mut Session,
    config: &ProvisionConfig,
) -> Result<StepStatus, CoreError> {
    let existing = session
        .print(HOTSPOT, &[("name", config.hotspot_name.as_str())])
        .await?;

    match existing.first() {
        None => {
            let per_mac = config.addresses_per_mac.to_string();
            session
                .add(
                    HOTSPOT,
                    &[
                        ("name", config.hotspot_name.as_str()),
                        ("interface", config.bridge.as_str()),
                        ("profile", config.profile_name.as_str()),
                        ("address-pool", config.pool_name.as_str()),
                        ("addresses-per-mac", per_mac.as_str()),
                        ("disabled", "no"),
                    ],
                )
                .await?;
            Ok(StepStatus::Created)
        }
        Some(server) if server.flag("disabled") => {
            let id = server
                .id()
                .ok_or_else(|| CoreError::Internal("hotspot record without .id".into()))?;
            session.set(HOTSPOT, id, &[("disabled", "no")]).await?;
            Ok(StepStatus::Updated)
        }
        Some(_) => Ok(StepStatus::Unchanged),
    }
}
