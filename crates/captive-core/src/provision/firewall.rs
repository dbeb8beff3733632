// ── Firewall policy ──
//
// Managed filter rules are identified by a `captive:<role>` comment so
// they can be found again regardless of position. Rules without our tag
// are left alone, except blanket forward-accepts for the hotspot network,
// which would let unauthenticated clients bypass the portal.

use tracing::info;

use crate::config::{AccessPolicy, ForwardPolicy, ProvisionConfig};
use crate::error::CoreError;
use crate::session::Session;

use super::ensure::Ensure;
use super::report::StepStatus;

pub(crate) const FILTER: &str = "/ip/firewall/filter";

const TAG_PREFIX: &str = "captive:";
const DROP_FORWARD: &str = "captive:drop-forward";

/// One managed rule: its comment tag plus the attributes that define it.
struct ManagedRule {
    comment: &'static str,
    attrs: Vec<(&'static str, String)>,
}

fn managed_rules(config: &ProvisionConfig, access: &AccessPolicy) -> Vec<ManagedRule> {
    let bridge = config.bridge.clone();
    let gateway = config.gateway.address().to_string();

    let authorized = match access {
        AccessPolicy::AddressList { list } => ("src-address-list", list.clone()),
        AccessPolicy::ActiveSession => ("hotspot", "auth".to_owned()),
    };

    vec![
        ManagedRule {
            comment: "captive:established",
            attrs: vec![
                ("chain", "forward".into()),
                ("connection-state", "established,related".into()),
                ("action", "accept".into()),
            ],
        },
        ManagedRule {
            comment: "captive:authorized",
            attrs: vec![
                ("chain", "forward".into()),
                ("in-interface", bridge.clone()),
                authorized,
                ("action", "accept".into()),
            ],
        },
        ManagedRule {
            comment: "captive:lan-to-gateway",
            attrs: vec![
                ("chain", "input".into()),
                ("in-interface", bridge.clone()),
                ("dst-address", gateway),
                ("action", "accept".into()),
            ],
        },
        ManagedRule {
            comment: "captive:dhcp",
            attrs: vec![
                ("chain", "input".into()),
                ("in-interface", bridge.clone()),
                ("protocol", "udp".into()),
                ("dst-port", "67-68".into()),
                ("action", "accept".into()),
            ],
        },
        ManagedRule {
            comment: "captive:web",
            attrs: vec![
                ("chain", "input".into()),
                ("in-interface", bridge),
                ("protocol", "tcp".into()),
                ("dst-port", "80,443".into()),
                ("action", "accept".into()),
            ],
        },
    ]
}

pub(crate) async fn firewall(
    session: &mut Session,
    config: &ProvisionConfig,
    access: &AccessPolicy,
) -> Result<StepStatus, CoreError> {
    let mut status = remove_bypass_rules(session, config).await?;

    let drop_id = match config.forward_policy {
        ForwardPolicy::Deny => {
            let (s, id) = ensure_drop_rule(session, config).await?;
            status = status.merge(s);
            id
        }
        ForwardPolicy::Allow => {
            status = status.merge(remove_drop_rule(session).await?);
            None
        }
    };

    for rule in managed_rules(config, access) {
        let mut ensure = Ensure::new(FILTER).key("comment", rule.comment);
        for (key, value) in rule.attrs {
            ensure = ensure.attr(key, value);
        }
        if let Some(id) = &drop_id {
            ensure = ensure.on_add("place-before", id.clone());
        }
        status = status.merge(ensure.run(session).await?);
    }
    Ok(status)
}

/// Forward-accepts from the hotspot network that we did not create.
async fn remove_bypass_rules(
    session: &mut Session,
    config: &ProvisionConfig,
) -> Result<StepStatus, CoreError> {
    let network = config.gateway.network_cidr();
    let rules = session
        .print(
            FILTER,
            &[
                ("chain", "forward"),
                ("src-address", network.as_str()),
                ("action", "accept"),
            ],
        )
        .await?;

    let mut status = StepStatus::Unchanged;
    for rule in &rules {
        let managed = rule
            .get("comment")
            .is_some_and(|c| c.starts_with(TAG_PREFIX));
        if managed {
            continue;
        }
        if let Some(id) = rule.id() {
            info!(rule = id, network = %network, "removing portal bypass rule");
            if session.remove(FILTER, id).await? {
                status = StepStatus::Updated;
            }
        }
    }
    Ok(status)
}

async fn ensure_drop_rule(
    session: &mut Session,
    config: &ProvisionConfig,
) -> Result<(StepStatus, Option<String>), CoreError> {
    let status = Ensure::new(FILTER)
        .key("comment", DROP_FORWARD)
        .attr("chain", "forward")
        .attr("in-interface", config.bridge.as_str())
        .attr("action", "drop")
        .run(session)
        .await?;
    let id = session
        .print(FILTER, &[("comment", DROP_FORWARD)])
        .await?
        .first()
        .and_then(|r| r.id())
        .map(str::to_owned);
    Ok((status, id))
}

async fn remove_drop_rule(session: &mut Session) -> Result<StepStatus, CoreError> {
    let mut status = StepStatus::Unchanged;
    for rule in session.print(FILTER, &[("comment", DROP_FORWARD)]).await? {
        if let Some(id) = rule.id() {
            if session.remove(FILTER, id).await? {
                status = StepStatus::Updated;
            }
        }
    }
    Ok(status)
}
