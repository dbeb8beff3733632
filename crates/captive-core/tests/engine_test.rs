#![allow(clippy::unwrap_used)]
// End-to-end engine tests against the in-memory device.

use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use pretty_assertions::assert_eq;
use secrecy::SecretString;

use captive_api::Record;
use captive_core::{
    AccessPolicy, ClientKey, CoreError, DeviceConfig, EngineConfig, FileTransfer, ForwardPolicy,
    Link, MacAddress, MemoryDirectory, Orchestrator, PortalFile, ProvisionConfig, SimulatedDevice,
    Step, StepStatus, Transport, VerifyBackoff,
};

// ── Helpers ─────────────────────────────────────────────────────────

const LEASE: &str = "/ip/dhcp-server/lease";
const POOL: &str = "/ip/pool";
const FILTER: &str = "/ip/firewall/filter";
const ADDRESS_LIST: &str = "/ip/firewall/address-list";
const ACTIVE: &str = "/ip/hotspot/active";

fn device_at(host: &str) -> DeviceConfig {
    DeviceConfig::new(
        format!("https://{host}").parse().unwrap(),
        "admin",
        SecretString::from("secret".to_string()),
    )
}

fn device() -> DeviceConfig {
    device_at("10.0.0.1")
}

fn engine_config() -> EngineConfig {
    EngineConfig {
        provision: ProvisionConfig {
            ssid: Some("SPIDERLAN".into()),
            walled_garden: vec!["pay.example.com".into()],
            ..ProvisionConfig::default()
        },
        ..EngineConfig::default()
    }
}

fn orchestrator_with(sim: &SimulatedDevice, config: EngineConfig) -> Orchestrator {
    Orchestrator::new(
        config,
        Arc::new(sim.clone()),
        Arc::new(sim.clone()),
        Arc::new(MemoryDirectory::new()),
    )
}

fn orchestrator(sim: &SimulatedDevice) -> Orchestrator {
    orchestrator_with(sim, engine_config())
}

fn seed_pool(sim: &SimulatedDevice, ranges: &str) {
    sim.seed(
        POOL,
        Record::new().with("name", "hs-pool-1").with("ranges", ranges),
    );
}

fn seed_lease(sim: &SimulatedDevice, address: Ipv4Addr) {
    sim.seed(
        LEASE,
        Record::new()
            .with("address", address.to_string())
            .with("mac-address", MacAddress::placeholder_for(address).as_str()),
    );
}

fn ip(s: &str) -> Ipv4Addr {
    s.parse().unwrap()
}

fn position(rows: &[Record], comment: &str) -> usize {
    rows.iter()
        .position(|r| r.get("comment") == Some(comment))
        .unwrap()
}

// ── Provisioning ────────────────────────────────────────────────────

#[tokio::test]
async fn provisioning_twice_converges() {
    let sim = SimulatedDevice::router();
    let orch = orchestrator(&sim);

    let first = orch.provision_device(&device()).await.unwrap();
    let after_first = sim.snapshot();
    let issued = sim.commands().len();

    let second = orch.provision_device(&device()).await.unwrap();
    assert_eq!(sim.snapshot(), after_first);
    assert!(first.changed() > 0);
    assert_eq!(second.changed(), 0);

    // The only write on a converged device is the CAP toggle.
    let repeated: Vec<String> = sim.commands()[issued..]
        .iter()
        .filter(|c| !c.split_whitespace().next().unwrap().ends_with("/print"))
        .cloned()
        .collect();
    assert_eq!(repeated, ["/interface/wireless/cap/set =enabled=no"]);
}

#[tokio::test]
async fn provisioning_builds_the_hotspot_topology() {
    let sim = SimulatedDevice::router();
    let report = orchestrator(&sim).provision_device(&device()).await.unwrap();

    assert_eq!(report.steps.len(), Step::ALL.len());
    assert_eq!(report.status(Step::Hotspot), Some(&StepStatus::Created));
    assert_eq!(sim.count("/interface/bridge"), 1);
    assert_eq!(sim.count("/interface/bridge/port"), 5); // ether2-5 + wlan1
    assert_eq!(sim.count("/ip/hotspot"), 1);
    assert_eq!(sim.count("/ip/firewall/nat"), 1);

    let pool = &sim.records(POOL)[0];
    assert_eq!(pool.get("ranges"), Some("10.5.50.2-10.5.50.254"));

    let radio = &sim.records("/interface/wireless")[0];
    assert_eq!(radio.get("ssid"), Some("SPIDERLAN"));
    assert_eq!(radio.get("disabled"), Some("no"));
}

#[tokio::test]
async fn three_ethernets_and_no_radio() {
    let sim = SimulatedDevice::new().with_interfaces(&["ether1", "ether2", "ether3"], &[]);
    let report = orchestrator(&sim).provision_device(&device()).await.unwrap();

    assert_eq!(report.status(Step::Wireless), Some(&StepStatus::Skipped));
    assert!(
        sim.commands()
            .iter()
            .all(|c| !c.starts_with("/interface/wireless"))
    );

    let ports = sim.records("/interface/bridge/port");
    let bridged: Vec<&str> = ports.iter().filter_map(|p| p.get("interface")).collect();
    assert_eq!(bridged, ["ether2", "ether3"]);
    assert!(ports.iter().all(|p| p.get("bridge") == Some("bridge1")));
}

#[tokio::test]
async fn no_ssid_means_no_wireless_commands() {
    let sim = SimulatedDevice::router();
    let config = EngineConfig::default();
    orchestrator_with(&sim, config)
        .provision_device(&device())
        .await
        .unwrap();
    assert!(
        sim.commands()
            .iter()
            .all(|c| !c.starts_with("/interface/wireless"))
    );
}

#[tokio::test]
async fn wan_is_isolated_from_the_lan() {
    let sim = SimulatedDevice::router();
    sim.seed("/interface/bridge", Record::new().with("name", "bridge1"));
    sim.seed(
        "/interface/bridge/port",
        Record::new().with("interface", "ether1").with("bridge", "bridge1"),
    );
    sim.seed(
        "/ip/dhcp-client",
        Record::new().with("interface", "bridge1").with("disabled", "no"),
    );
    sim.seed(
        "/ip/dhcp-client",
        Record::new().with("interface", "ether1").with("disabled", "true"),
    );

    let report = orchestrator(&sim).provision_device(&device()).await.unwrap();
    assert_eq!(report.status(Step::IsolateWan), Some(&StepStatus::Updated));

    let ports = sim.records("/interface/bridge/port");
    assert!(ports.iter().all(|p| p.get("interface") != Some("ether1")));

    let clients = sim.records("/ip/dhcp-client");
    assert_eq!(clients.len(), 1);
    assert_eq!(clients[0].get("interface"), Some("ether1"));
    assert_eq!(clients[0].get("disabled"), Some("no"));
}

#[tokio::test]
async fn port_in_another_bridge_is_moved() {
    let sim = SimulatedDevice::router();
    sim.seed(
        "/interface/bridge/port",
        Record::new().with("interface", "ether2").with("bridge", "bridge-old"),
    );
    orchestrator(&sim).provision_device(&device()).await.unwrap();

    let ether2: Vec<Record> = sim
        .records("/interface/bridge/port")
        .into_iter()
        .filter(|p| p.get("interface") == Some("ether2"))
        .collect();
    assert_eq!(ether2.len(), 1);
    assert_eq!(ether2[0].get("bridge"), Some("bridge1"));
}

#[tokio::test]
async fn drifted_pool_range_is_corrected() {
    let sim = SimulatedDevice::router();
    seed_pool(&sim, "10.5.50.100-10.5.50.110");
    let report = orchestrator(&sim).provision_device(&device()).await.unwrap();

    assert_eq!(report.status(Step::Pool), Some(&StepStatus::Updated));
    assert_eq!(sim.count(POOL), 1);
    assert_eq!(sim.records(POOL)[0].get("ranges"), Some("10.5.50.2-10.5.50.254"));
}

#[tokio::test]
async fn disabled_hotspot_is_enabled_not_recreated() {
    let sim = SimulatedDevice::router();
    sim.seed(
        "/ip/hotspot",
        Record::new().with("name", "SPIDERLAN").with("disabled", "true"),
    );
    let report = orchestrator(&sim).provision_device(&device()).await.unwrap();

    assert_eq!(report.status(Step::Hotspot), Some(&StepStatus::Updated));
    assert_eq!(sim.count("/ip/hotspot"), 1);
    assert_eq!(sim.records("/ip/hotspot")[0].get("disabled"), Some("no"));
}

// ── Firewall ────────────────────────────────────────────────────────

#[tokio::test]
async fn default_deny_keeps_drop_rule_last() {
    let sim = SimulatedDevice::router();
    orchestrator(&sim).provision_device(&device()).await.unwrap();

    let rules = sim.records(FILTER);
    let drop = position(&rules, "captive:drop-forward");
    assert_eq!(drop, rules.len() - 1);
    assert!(position(&rules, "captive:authorized") < drop);
    assert!(position(&rules, "captive:established") < drop);

    let authorized = &rules[position(&rules, "captive:authorized")];
    assert_eq!(authorized.get("src-address-list"), Some("hs-paid"));
}

#[tokio::test]
async fn bypass_rules_are_removed_and_ours_kept() {
    let sim = SimulatedDevice::router();
    sim.seed(
        FILTER,
        Record::new()
            .with("chain", "forward")
            .with("src-address", "10.5.50.0/24")
            .with("action", "accept"),
    );
    sim.seed(
        FILTER,
        Record::new()
            .with("chain", "input")
            .with("action", "accept")
            .with("comment", "operator rule"),
    );
    orchestrator(&sim).provision_device(&device()).await.unwrap();

    let rules = sim.records(FILTER);
    assert!(rules.iter().all(|r| r.get("src-address") != Some("10.5.50.0/24")));
    assert!(rules.iter().any(|r| r.get("comment") == Some("operator rule")));
}

#[tokio::test]
async fn allow_policy_removes_the_drop_rule() {
    let sim = SimulatedDevice::router();
    orchestrator(&sim).provision_device(&device()).await.unwrap();
    assert!(sim.records(FILTER).iter().any(|r| r.get("action") == Some("drop")));

    let mut config = engine_config();
    config.provision.forward_policy = ForwardPolicy::Allow;
    orchestrator_with(&sim, config)
        .provision_device(&device())
        .await
        .unwrap();
    assert!(sim.records(FILTER).iter().all(|r| r.get("action") != Some("drop")));
}

#[tokio::test]
async fn active_session_policy_matches_hotspot_auth() {
    let sim = SimulatedDevice::router();
    let config = EngineConfig {
        access: AccessPolicy::ActiveSession,
        ..engine_config()
    };
    orchestrator_with(&sim, config)
        .provision_device(&device())
        .await
        .unwrap();

    let rules = sim.records(FILTER);
    let authorized = &rules[position(&rules, "captive:authorized")];
    assert_eq!(authorized.get("hotspot"), Some("auth"));
    assert_eq!(authorized.get("src-address-list"), None);
}

// ── Failure handling ────────────────────────────────────────────────

#[tokio::test]
async fn critical_failure_aborts_with_step_name() {
    let sim = SimulatedDevice::router();
    sim.fail_on("/ip/pool/add");

    let err = orchestrator(&sim)
        .provision_device(&device())
        .await
        .unwrap_err();
    match err {
        CoreError::ProvisionFailed { step, .. } => assert_eq!(step, "pool"),
        other => panic!("expected ProvisionFailed, got: {other:?}"),
    }
    assert_eq!(sim.count("/ip/hotspot"), 0);
    assert_eq!((sim.opens(), sim.closes()), (1, 1));
}

#[tokio::test]
async fn advisory_failure_is_recorded_and_run_continues() {
    let sim = SimulatedDevice::router();
    sim.fail_on("/ip/hotspot/walled-garden");

    let report = orchestrator(&sim).provision_device(&device()).await.unwrap();
    assert!(matches!(
        report.status(Step::WalledGarden),
        Some(StepStatus::Failed(_))
    ));
    assert_eq!(report.advisory_failures().count(), 1);
    assert_eq!(report.status(Step::Hotspot), Some(&StepStatus::Created));
}

#[tokio::test]
async fn rerun_after_failure_recovers() {
    let sim = SimulatedDevice::router();
    sim.fail_on("/ip/firewall/nat/add");
    assert!(orchestrator(&sim).provision_device(&device()).await.is_err());

    sim.clear_failures();
    orchestrator(&sim).provision_device(&device()).await.unwrap();
    assert_eq!(sim.count("/ip/firewall/nat"), 1);
    assert_eq!(sim.count("/interface/bridge"), 1);
}

#[tokio::test]
async fn session_closes_whichever_command_fails() {
    let clean = SimulatedDevice::router();
    orchestrator(&clean).provision_device(&device()).await.unwrap();
    let total = clean.commands().len();

    for index in 0..total {
        let sim = SimulatedDevice::router();
        sim.fail_at(index);
        let _ = orchestrator(&sim).provision_device(&device()).await;
        assert_eq!(
            (sim.opens(), sim.closes()),
            (1, 1),
            "unbalanced session when command {index} failed"
        );
    }
}

#[derive(Debug, Clone, Copy)]
enum GateOp {
    Admit,
    Revoke,
    Publish,
}

/// A device with a pool, one paid client and a portal page already present.
fn served_device() -> SimulatedDevice {
    let sim = SimulatedDevice::new();
    seed_pool(&sim, "10.5.50.2-10.5.50.254");
    sim.seed(
        LEASE,
        Record::new()
            .with("address", "10.5.50.9")
            .with("mac-address", "AA:BB:CC:DD:EE:07")
            .with("comment", "owner:user-7"),
    );
    sim.seed(
        ADDRESS_LIST,
        Record::new()
            .with("list", "hs-paid")
            .with("address", "10.5.50.9")
            .with("comment", "owner:user-7"),
    );
    sim.seed(FILE, Record::new().with("name", "hotspot/login.html"));
    sim
}

async fn run_gate_op(orch: &Orchestrator, op: GateOp) -> Result<(), CoreError> {
    match op {
        GateOp::Admit => orch.admit_on(&device(), "user-42").await.map(drop),
        GateOp::Revoke => orch
            .revoke_on(&device(), ClientKey::owner("user-7"))
            .await
            .map(drop),
        GateOp::Publish => orch.publish_on(&device(), login_page()).await,
    }
}

#[tokio::test]
async fn access_operations_close_whichever_command_fails() {
    for op in [GateOp::Admit, GateOp::Revoke, GateOp::Publish] {
        let clean = served_device();
        run_gate_op(&orchestrator(&clean), op).await.unwrap();
        let total = clean.commands().len();
        assert!(total > 0, "{op:?} issued no commands");

        for index in 0..total {
            let sim = served_device();
            sim.fail_at(index);
            let err = run_gate_op(&orchestrator(&sim), op).await.unwrap_err();
            assert!(
                matches!(err, CoreError::Command { .. }),
                "{op:?} at command {index}: {err:?}"
            );
            assert_eq!(
                (sim.opens(), sim.closes()),
                (1, 1),
                "unbalanced session when {op:?} command {index} failed"
            );
        }
    }
}

#[tokio::test]
async fn shutdown_interrupts_a_stalled_provision() {
    let sim = SimulatedDevice::router();
    sim.stall_on("/ip/pool");
    let orch = orchestrator(&sim);
    let dev = device();

    let (result, ()) = tokio::join!(orch.provision_device(&dev), async {
        tokio::time::sleep(Duration::from_millis(50)).await;
        orch.shutdown();
    });

    let err = result.unwrap_err();
    assert!(matches!(err, CoreError::Cancelled { .. }), "got: {err:?}");
    assert_eq!((sim.opens(), sim.closes()), (1, 1));
    assert_eq!(sim.count(POOL), 0);
}

#[tokio::test]
async fn shutdown_refuses_new_operations() {
    let sim = SimulatedDevice::new();
    seed_pool(&sim, "10.5.50.2-10.5.50.254");
    let orch = orchestrator(&sim);
    orch.shutdown();

    let err = orch.admit_on(&device(), "user-42").await.unwrap_err();
    assert!(matches!(err, CoreError::Cancelled { .. }));
    assert_eq!((sim.opens(), sim.closes()), (0, 0));
    assert!(sim.commands().is_empty());
}

#[tokio::test]
async fn refused_connection_opens_nothing() {
    let sim = SimulatedDevice::router();
    sim.refuse_connections(true);

    let err = orchestrator(&sim)
        .provision_device(&device())
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::ConnectionFailed { .. }));
    assert!(err.is_transient());
    assert_eq!((sim.opens(), sim.closes()), (0, 0));
}

// ── Address allocation ──────────────────────────────────────────────

#[tokio::test]
async fn allocation_skips_leased_addresses() {
    let sim = SimulatedDevice::new();
    seed_pool(&sim, "10.5.50.2-10.5.50.254");
    for d in 2..=9 {
        seed_lease(&sim, Ipv4Addr::new(10, 5, 50, d));
    }

    let address = orchestrator(&sim)
        .allocate_on(&device(), "user-42")
        .await
        .unwrap();
    assert_eq!(address, ip("10.5.50.10"));

    let lease = sim
        .records(LEASE)
        .into_iter()
        .find(|l| l.get("comment") == Some("owner:user-42"))
        .unwrap();
    assert_eq!(lease.get("address"), Some("10.5.50.10"));
    assert_eq!(lease.get("mac-address"), Some("02:00:0A:05:32:0A"));
    assert_eq!(lease.get("server"), Some("dhcp1"));
}

#[tokio::test]
async fn allocation_compares_numerically() {
    let sim = SimulatedDevice::new();
    seed_pool(&sim, "10.5.50.2-10.5.50.10");
    for d in 2..=8 {
        seed_lease(&sim, Ipv4Addr::new(10, 5, 50, d));
    }
    let address = orchestrator(&sim).allocate_on(&device(), "u").await.unwrap();
    assert_eq!(address, ip("10.5.50.9"));
}

#[tokio::test]
async fn allocation_is_idempotent_per_owner() {
    let sim = SimulatedDevice::new();
    seed_pool(&sim, "10.5.50.2-10.5.50.254");
    let orch = orchestrator(&sim);

    let first = orch.allocate_on(&device(), "user-42").await.unwrap();
    let second = orch.allocate_on(&device(), "user-42").await.unwrap();
    assert_eq!(first, second);
    assert_eq!(sim.count(LEASE), 1);

    let other = orch.allocate_on(&device(), "user-43").await.unwrap();
    assert_eq!(other, ip("10.5.50.3"));
}

#[tokio::test]
async fn exhausted_pool_is_reported() {
    let sim = SimulatedDevice::new();
    seed_pool(&sim, "10.5.50.2-10.5.50.3");
    seed_lease(&sim, ip("10.5.50.2"));
    seed_lease(&sim, ip("10.5.50.3"));

    let err = orchestrator(&sim)
        .allocate_on(&device(), "user-42")
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::PoolExhausted { .. }));
    assert_eq!(sim.count(LEASE), 2);
}

#[tokio::test]
async fn missing_or_malformed_pool() {
    let sim = SimulatedDevice::new();
    let err = orchestrator(&sim)
        .allocate_on(&device(), "user-42")
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::PoolNotFound { .. }));

    seed_pool(&sim, "not-a-range");
    let err = orchestrator(&sim)
        .allocate_on(&device(), "user-42")
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::InvalidRange { .. }));
}

#[tokio::test]
async fn allocation_carries_across_octets() {
    let sim = SimulatedDevice::new();
    seed_pool(&sim, "10.5.50.250-10.5.51.10");
    for d in 250..=255 {
        seed_lease(&sim, Ipv4Addr::new(10, 5, 50, d));
    }
    let address = orchestrator(&sim).allocate_on(&device(), "a").await.unwrap();
    assert_eq!(address, ip("10.5.51.0"));

    let sim = SimulatedDevice::new();
    seed_pool(&sim, "10.5.255.254-10.6.0.10");
    seed_lease(&sim, ip("10.5.255.254"));
    seed_lease(&sim, ip("10.5.255.255"));
    let address = orchestrator(&sim).allocate_on(&device(), "b").await.unwrap();
    assert_eq!(address, ip("10.6.0.0"));
}

// ── Access gate ─────────────────────────────────────────────────────

#[tokio::test]
async fn user_42_is_admitted_and_revoked() {
    let sim = SimulatedDevice::router();
    let orch = orchestrator(&sim);
    orch.provision_device(&device()).await.unwrap();

    let admission = orch.admit_on(&device(), "user-42").await.unwrap();
    assert_eq!(admission.address, ip("10.5.50.2"));
    assert!(admission.granted);

    let entries = sim.records(ADDRESS_LIST);
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].get("list"), Some("hs-paid"));
    assert_eq!(entries[0].get("address"), Some("10.5.50.2"));
    assert_eq!(entries[0].get("comment"), Some("owner:user-42"));

    // Granting again changes nothing.
    let again = orch.admit_on(&device(), "user-42").await.unwrap();
    assert!(!again.granted);
    assert_eq!(sim.count(ADDRESS_LIST), 1);
    assert_eq!(sim.count(LEASE), 1);

    let connected = orch.connected_on(&device()).await.unwrap();
    assert_eq!(connected.len(), 1);
    assert_eq!(connected[0].owner.as_deref(), Some("user-42"));
    assert_eq!(connected[0].address, Some(ip("10.5.50.2")));
    assert_eq!(connected[0].mac, None);

    let removed = orch
        .revoke_on(&device(), ClientKey::owner("user-42"))
        .await
        .unwrap();
    assert_eq!(removed, 1);
    assert_eq!(sim.count(ADDRESS_LIST), 0);

    // Revoking twice is a no-op.
    let removed = orch
        .revoke_on(&device(), ClientKey::owner("user-42"))
        .await
        .unwrap();
    assert_eq!(removed, 0);
    assert_eq!((sim.opens(), sim.closes()), (6, 6));
}

#[tokio::test]
async fn grant_without_lease_fails() {
    let sim = SimulatedDevice::router();
    let err = orchestrator(&sim)
        .grant_on(&device(), ClientKey::owner("ghost"))
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::NoLeaseForClient { .. }));
    assert_eq!(sim.count(ADDRESS_LIST), 0);
}

#[tokio::test]
async fn grant_by_address_needs_no_lease() {
    let sim = SimulatedDevice::new();
    let orch = orchestrator(&sim);
    let key: ClientKey = "10.5.50.77".parse().unwrap();

    assert!(orch.grant_on(&device(), key.clone()).await.unwrap());
    assert_eq!(sim.records(ADDRESS_LIST)[0].get("comment"), Some("owner:10.5.50.77"));
    assert_eq!(orch.revoke_on(&device(), key).await.unwrap(), 1);
}

#[tokio::test]
async fn active_session_policy_keys_on_mac() {
    let sim = SimulatedDevice::new();
    let orch = orchestrator_with(
        &sim,
        EngineConfig {
            access: AccessPolicy::ActiveSession,
            ..engine_config()
        },
    );

    // A placeholder MAC does not identify a client yet.
    seed_lease(&sim, ip("10.5.50.2"));
    sim.seed(
        LEASE,
        Record::new()
            .with("address", "10.5.50.3")
            .with("mac-address", "AA:BB:CC:DD:EE:01")
            .with("comment", "owner:user-7"),
    );
    let err = orch
        .grant_on(&device(), "10.5.50.2".parse().unwrap())
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::NoLeaseForClient { .. }));

    assert!(orch.grant_on(&device(), ClientKey::owner("user-7")).await.unwrap());
    let active = sim.records(ACTIVE);
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].get("mac-address"), Some("AA:BB:CC:DD:EE:01"));

    let connected = orch.connected_on(&device()).await.unwrap();
    assert_eq!(connected[0].owner.as_deref(), Some("user-7"));

    let removed = orch
        .revoke_on(&device(), "aa:bb:cc:dd:ee:01".parse().unwrap())
        .await
        .unwrap();
    assert_eq!(removed, 1);
    assert_eq!(sim.count(ACTIVE), 0);
}

#[tokio::test]
async fn randomized_local_mac_is_a_real_client() {
    let sim = SimulatedDevice::new();
    let orch = orchestrator_with(
        &sim,
        EngineConfig {
            access: AccessPolicy::ActiveSession,
            ..engine_config()
        },
    );
    sim.seed(
        LEASE,
        Record::new()
            .with("address", "10.5.50.4")
            .with("mac-address", "02:00:5E:3A:91:C4")
            .with("comment", "owner:user-8"),
    );

    assert!(orch.grant_on(&device(), ClientKey::owner("user-8")).await.unwrap());
    let active = sim.records(ACTIVE);
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].get("mac-address"), Some("02:00:5E:3A:91:C4"));
}

#[tokio::test]
async fn payment_redirect_is_idempotent() {
    let sim = SimulatedDevice::new();
    let orch = orchestrator(&sim);
    let mac = MacAddress::new("aa:bb:cc:dd:ee:ff");
    let url: url::Url = "https://pay.example.com/checkout?plan=1".parse().unwrap();

    orch.redirect_on(&device(), mac.clone(), url.clone()).await.unwrap();
    orch.redirect_on(&device(), mac, url).await.unwrap();

    let garden = sim.records("/ip/hotspot/walled-garden/ip");
    assert_eq!(garden.len(), 1);
    assert_eq!(garden[0].get("dst-host"), Some("pay.example.com"));

    let users = sim.records("/ip/hotspot/user");
    assert_eq!(users.len(), 1);
    assert_eq!(users[0].get("name"), Some("AA:BB:CC:DD:EE:FF"));
    assert_eq!(users[0].get("profile"), Some("redirect-to-payment"));
    assert_eq!(sim.count("/ip/hotspot/user/profile"), 1);
}

// ── Portal assets ───────────────────────────────────────────────────

fn login_page() -> Vec<PortalFile> {
    vec![PortalFile::new("login.html", "<html>login</html>").unwrap()]
}

#[tokio::test]
async fn publish_replaces_existing_file() {
    let sim = SimulatedDevice::new();
    sim.seed(FILE, Record::new().with("name", "hotspot/login.html"));
    let orch = orchestrator(&sim);

    orch.publish_on(&device(), login_page()).await.unwrap();

    let files = sim.records(FILE);
    assert_eq!(files.len(), 1);
    assert_eq!(files[0].get("size"), Some("18"));
    assert_eq!(
        sim.uploaded("hotspot/login.html").unwrap(),
        b"<html>login</html>"
    );
}

const FILE: &str = "/file";

#[tokio::test(start_paused = true)]
async fn publish_waits_for_slow_indexing() {
    let sim = SimulatedDevice::new();
    sim.delay_file_visibility(3);
    orchestrator(&sim)
        .publish_on(&device(), login_page())
        .await
        .unwrap();
    assert_eq!(sim.count(FILE), 1);
}

#[tokio::test(start_paused = true)]
async fn publish_fails_when_file_never_appears() {
    let sim = SimulatedDevice::new();
    sim.drop_uploads(true);

    let err = orchestrator(&sim)
        .publish_on(&device(), login_page())
        .await
        .unwrap_err();
    match err {
        CoreError::VerificationFailed { file, waited_ms } => {
            assert_eq!(file, "hotspot/login.html");
            assert!(waited_ms >= 15_000);
        }
        other => panic!("expected VerificationFailed, got: {other:?}"),
    }
    assert_eq!((sim.opens(), sim.closes()), (1, 1));
}

#[tokio::test]
async fn rejected_upload_is_reported_and_session_closed() {
    let sim = SimulatedDevice::new();
    sim.fail_uploads(true);

    let err = orchestrator(&sim)
        .publish_on(&device(), login_page())
        .await
        .unwrap_err();
    match err {
        CoreError::Upload { file, reason } => {
            assert_eq!(file, "hotspot/login.html");
            assert!(reason.contains("simulated upload failure"), "{reason}");
        }
        other => panic!("expected Upload, got: {other:?}"),
    }
    assert!(sim.uploaded("hotspot/login.html").is_none());
    assert_eq!((sim.opens(), sim.closes()), (1, 1));
}

#[tokio::test(start_paused = true)]
async fn zero_initial_delay_still_backs_off() {
    let sim = SimulatedDevice::new();
    sim.drop_uploads(true);
    let config = EngineConfig {
        verify: VerifyBackoff {
            initial_delay_ms: 0,
            max_delay_ms: 2_000,
            deadline_ms: 200,
        },
        ..engine_config()
    };

    let err = orchestrator_with(&sim, config)
        .publish_on(&device(), login_page())
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::VerificationFailed { .. }));

    // 1, 2, 4 ... 128ms waits, then the deadline: a handful of polls.
    let polls = sim
        .commands()
        .iter()
        .filter(|c| c.starts_with("/file/print"))
        .count();
    assert!(polls <= 12, "verification polled {polls} times");
}

#[tokio::test]
async fn publish_respects_shutdown() {
    let sim = SimulatedDevice::new();
    let orch = orchestrator(&sim);
    orch.shutdown();

    let err = orch.publish_on(&device(), login_page()).await.unwrap_err();
    assert!(matches!(err, CoreError::Cancelled { .. }));
    assert!(sim.uploaded("hotspot/login.html").is_none());
}

#[tokio::test(start_paused = true)]
async fn operation_timeout_still_closes_session() {
    let sim = SimulatedDevice::new();
    sim.drop_uploads(true);
    let config = EngineConfig {
        operation_timeout: Some(Duration::from_millis(1_500)),
        ..engine_config()
    };

    let err = orchestrator_with(&sim, config)
        .publish_on(&device(), login_page())
        .await
        .unwrap_err();
    match &err {
        CoreError::Timeout { limit } => assert_eq!(*limit, Duration::from_millis(1_500)),
        other => panic!("expected Timeout, got: {other:?}"),
    }
    assert_eq!(err.to_string(), "Operation timed out after 1s 500ms");
    assert_eq!((sim.opens(), sim.closes()), (1, 1));
}

// ── Directory-backed operations ─────────────────────────────────────

/// Routes each host to its own simulated device.
#[derive(Clone, Default)]
struct Fleet {
    devices: HashMap<String, SimulatedDevice>,
}

impl Fleet {
    fn get(&self, device: &DeviceConfig) -> SimulatedDevice {
        self.devices[device.url.host_str().unwrap()].clone()
    }
}

#[async_trait]
impl Transport for Fleet {
    async fn open(&self, device: &DeviceConfig) -> Result<Box<dyn Link>, CoreError> {
        self.get(device).open(device).await
    }
}

#[async_trait]
impl FileTransfer for Fleet {
    async fn put(
        &self,
        device: &DeviceConfig,
        remote_name: &str,
        contents: &[u8],
    ) -> Result<(), captive_api::Error> {
        self.get(device).put(device, remote_name, contents).await
    }
}

#[tokio::test]
async fn routers_are_registered_and_swept() {
    let north = SimulatedDevice::router();
    let south = SimulatedDevice::router();
    let fleet = Fleet {
        devices: HashMap::from([
            ("10.0.0.1".to_owned(), north.clone()),
            ("10.0.0.2".to_owned(), south.clone()),
        ]),
    };
    let directory = Arc::new(MemoryDirectory::new());
    let orch = Orchestrator::new(
        engine_config(),
        Arc::new(fleet.clone()),
        Arc::new(fleet),
        directory.clone(),
    );

    let registered = orch
        .provision_router("north-hall", "north-gw", &device_at("10.0.0.1"))
        .await
        .unwrap();
    assert_eq!(registered.router.host, "10.0.0.1");
    orch.provision_router("south-hall", "south-gw", &device_at("10.0.0.2"))
        .await
        .unwrap();

    directory.assign_user("user-1", "north-hall");
    directory.assign_user("user-2", "south-hall");
    directory.assign_user("user-3", "south-hall");

    for user in ["user-1", "user-2", "user-3"] {
        assert!(orch.admit(user).await.unwrap().granted);
    }
    assert_eq!(north.count(ADDRESS_LIST), 1);
    assert_eq!(south.count(ADDRESS_LIST), 2);

    let report = orch.reprovision(registered.router.id).await.unwrap();
    assert_eq!(report.changed(), 0);

    let expired: Vec<String> = ["user-1", "user-3", "nobody"]
        .into_iter()
        .map(String::from)
        .collect();
    let mut outcomes = orch.revoke_expired(&expired).await;
    outcomes.sort_by(|a, b| a.user_id.cmp(&b.user_id));

    assert_eq!(outcomes.len(), 3);
    assert!(outcomes[0].error.is_some()); // nobody
    assert_eq!(outcomes[1].removed, 1); // user-1
    assert_eq!(outcomes[2].removed, 1); // user-3
    assert_eq!(north.count(ADDRESS_LIST), 0);
    assert_eq!(south.count(ADDRESS_LIST), 1);
    assert_eq!(north.opens(), north.closes());
    assert_eq!(south.opens(), south.closes());

    let connected = orch
        .list_connected_clients(registered.router.id)
        .await
        .unwrap();
    assert!(connected.is_empty());
}

#[tokio::test]
async fn unknown_router_and_user() {
    let sim = SimulatedDevice::router();
    let orch = orchestrator(&sim);

    let err = orch.reprovision(uuid::Uuid::new_v4()).await.unwrap_err();
    assert!(matches!(err, CoreError::RouterNotFound { .. }));

    let err = orch.grant_access("user-404").await.unwrap_err();
    assert!(matches!(err, CoreError::NoRouterForUser { .. }));
    assert_eq!(sim.opens(), 0);
}
