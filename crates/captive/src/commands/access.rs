//! Address allocation and access gate handlers.

use std::net::Ipv4Addr;

use serde::Serialize;
use tabled::Tabled;

use captive_core::{Admission, ClientKey, ConnectedClient, MacAddress, SweepOutcome};

use crate::cli::{ClientArgs, OwnerArgs, PaymentRedirectArgs, SweepArgs};
use crate::error::CliError;
use crate::output;

use super::{Context, util};

// ── Table rows ──────────────────────────────────────────────────────

#[derive(Tabled)]
struct ClientRow {
    #[tabled(rename = "MAC")]
    mac: String,
    #[tabled(rename = "Address")]
    address: String,
    #[tabled(rename = "Owner")]
    owner: String,
}

impl From<&ConnectedClient> for ClientRow {
    fn from(c: &ConnectedClient) -> Self {
        Self {
            mac: c.mac.as_ref().map_or_else(|| "-".into(), ToString::to_string),
            address: c.address.map_or_else(|| "-".into(), |a| a.to_string()),
            owner: c.owner.clone().unwrap_or_else(|| "-".into()),
        }
    }
}

#[derive(Tabled)]
struct SweepRow {
    #[tabled(rename = "User")]
    user: String,
    #[tabled(rename = "Router")]
    router: String,
    #[tabled(rename = "Removed")]
    removed: usize,
    #[tabled(rename = "Error")]
    error: String,
}

impl From<&SweepOutcome> for SweepRow {
    fn from(o: &SweepOutcome) -> Self {
        Self {
            user: o.user_id.clone(),
            router: o.router_id.map_or_else(|| "-".into(), |id| id.to_string()),
            removed: o.removed,
            error: o.error.clone().unwrap_or_default(),
        }
    }
}

#[derive(Serialize)]
struct Allocation {
    owner: String,
    address: Ipv4Addr,
}

#[derive(Serialize)]
struct GateChange {
    client: String,
    changed: usize,
}

fn parse_client(raw: &str) -> ClientKey {
    match raw.parse::<ClientKey>() {
        Ok(key) => key,
        Err(never) => match never {},
    }
}

// ── Handlers ────────────────────────────────────────────────────────

pub async fn allocate(ctx: &Context<'_>, args: OwnerArgs) -> Result<(), CliError> {
    let (_, device) = ctx.device()?;
    let address = ctx.orchestrator.allocate_on(&device, &args.owner).await?;
    let out = output::render_single(
        &ctx.global.output,
        &Allocation {
            owner: args.owner,
            address,
        },
        |a| format!("{} -> {}", a.owner, a.address),
        |a| a.address.to_string(),
    );
    output::print_output(&out, ctx.global.quiet);
    Ok(())
}

pub async fn admit(ctx: &Context<'_>, args: OwnerArgs) -> Result<(), CliError> {
    let (_, device) = ctx.device()?;
    let admission: Admission = ctx.orchestrator.admit_on(&device, &args.owner).await?;
    let owner = args.owner;
    let out = output::render_single(
        &ctx.global.output,
        &admission,
        |a| {
            let state = if a.granted { "granted" } else { "already allowed" };
            format!("{owner} -> {} ({state})", a.address)
        },
        |a| a.address.to_string(),
    );
    output::print_output(&out, ctx.global.quiet);
    Ok(())
}

pub async fn grant(ctx: &Context<'_>, args: ClientArgs) -> Result<(), CliError> {
    let (_, device) = ctx.device()?;
    let key = parse_client(&args.client);
    let granted = ctx.orchestrator.grant_on(&device, key).await?;
    let out = output::render_single(
        &ctx.global.output,
        &GateChange {
            client: args.client,
            changed: usize::from(granted),
        },
        |g| {
            if g.changed > 0 {
                format!("Granted {}", g.client)
            } else {
                format!("{} already allowed", g.client)
            }
        },
        |g| g.changed.to_string(),
    );
    output::print_output(&out, ctx.global.quiet);
    Ok(())
}

pub async fn revoke(ctx: &Context<'_>, args: ClientArgs) -> Result<(), CliError> {
    let (_, device) = ctx.device()?;
    if !util::confirm(&format!("Revoke access for {}?", args.client), ctx.global)? {
        return Ok(());
    }
    let key = parse_client(&args.client);
    let removed = ctx.orchestrator.revoke_on(&device, key).await?;
    let out = output::render_single(
        &ctx.global.output,
        &GateChange {
            client: args.client,
            changed: removed,
        },
        |g| format!("Removed {} entr(y/ies) for {}", g.changed, g.client),
        |g| g.changed.to_string(),
    );
    output::print_output(&out, ctx.global.quiet);
    Ok(())
}

/// Revoke every listed user on whichever router serves them.
///
/// Per-user failures are reported in the output; the exit status is
/// non-zero only if nothing could be swept at all.
pub async fn sweep(ctx: &Context<'_>, args: SweepArgs) -> Result<(), CliError> {
    if !util::confirm(
        &format!("Revoke access for {} user(s)?", args.users.len()),
        ctx.global,
    )? {
        return Ok(());
    }
    let outcomes = util::with_spinner(
        "Sweeping expired subscriptions",
        ctx.global,
        ctx.orchestrator.revoke_expired(&args.users),
    )
    .await;

    let out = output::render_list(&ctx.global.output, &outcomes, |o| SweepRow::from(o), |o| {
        format!("{} {}", o.user_id, o.removed)
    });
    output::print_output(&out, ctx.global.quiet);

    if outcomes.iter().all(|o| o.error.is_some()) {
        let reason = outcomes
            .first()
            .and_then(|o| o.error.clone())
            .unwrap_or_default();
        return Err(CliError::Device {
            message: format!("sweep failed for every user: {reason}"),
        });
    }
    Ok(())
}

pub async fn clients(ctx: &Context<'_>) -> Result<(), CliError> {
    let (_, device) = ctx.device()?;
    let clients = ctx.orchestrator.connected_on(&device).await?;
    let out = output::render_list(&ctx.global.output, &clients, |c| ClientRow::from(c), |c| {
        c.mac
            .as_ref()
            .map(ToString::to_string)
            .or_else(|| c.address.map(|a| a.to_string()))
            .unwrap_or_default()
    });
    output::print_output(&out, ctx.global.quiet);
    Ok(())
}

pub async fn payment_redirect(ctx: &Context<'_>, args: PaymentRedirectArgs) -> Result<(), CliError> {
    let mac = MacAddress::parse(&args.mac).ok_or_else(|| CliError::Validation {
        field: "mac".into(),
        reason: format!("not a MAC address: {}", args.mac),
    })?;
    let url: url::Url = args.url.parse().map_err(|_| CliError::Validation {
        field: "url".into(),
        reason: format!("invalid URL: {}", args.url),
    })?;
    let (_, device) = ctx.device()?;
    ctx.orchestrator.redirect_on(&device, mac.clone(), url.clone()).await?;
    if !ctx.global.quiet {
        eprintln!("{mac} will be sent to {url}");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_argument_is_classified_by_shape() {
        assert_eq!(
            parse_client("10.5.50.7"),
            ClientKey::Address(Ipv4Addr::new(10, 5, 50, 7))
        );
        assert!(matches!(parse_client("AA:BB:CC:DD:EE:FF"), ClientKey::Mac(_)));
        assert_eq!(parse_client("user-42"), ClientKey::owner("user-42"));
    }

    #[test]
    fn rows_fill_missing_fields() {
        let row = ClientRow::from(&ConnectedClient {
            mac: None,
            address: Some(Ipv4Addr::new(10, 5, 50, 2)),
            owner: None,
        });
        assert_eq!(row.mac, "-");
        assert_eq!(row.address, "10.5.50.2");
    }
}
