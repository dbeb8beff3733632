// ── Access gate ──
//
// Grants and revokes a client's internet reachability. Exactly one
// `AccessPolicy` is in force per gate:
//
// - `AddressList`: the client's leased address is a member of a firewall
//   address list that the "authorized" forward rule matches on.
// - `ActiveSession`: the client's MAC is logged into the hotspot directly.
//
// Every entry the gate writes carries an `owner:<key>` comment, so revoke
// finds it again even when the lease behind it has moved or vanished.

use std::collections::BTreeSet;
use std::net::Ipv4Addr;

use captive_api::Record;
use tracing::{debug, info};
use url::Url;

use crate::allocator::AddressAllocator;
use crate::config::AccessPolicy;
use crate::error::CoreError;
use crate::model::{ClientKey, ConnectedClient, MacAddress, OwnerTag};
use crate::provision::{Ensure, WALLED_GARDEN};
use crate::session::Session;

pub(crate) const ADDRESS_LIST: &str = "/ip/firewall/address-list";
pub(crate) const ACTIVE: &str = "/ip/hotspot/active";
pub(crate) const HOTSPOT_USER: &str = "/ip/hotspot/user";
pub(crate) const HOTSPOT_USER_PROFILE: &str = "/ip/hotspot/user/profile";

#[derive(Debug, Clone)]
pub struct AccessGate {
    policy: AccessPolicy,
    allocator: AddressAllocator,
}

impl AccessGate {
    /// `allocator` is used only to look up leases when resolving keys.
    pub fn new(policy: AccessPolicy, allocator: AddressAllocator) -> Self {
        Self { policy, allocator }
    }

    pub fn policy(&self) -> &AccessPolicy {
        &self.policy
    }

    // ── Grant ────────────────────────────────────────────────────────

    /// Allow `key` through the gate. Returns `false` if it already was.
    pub async fn grant(&self, session: &mut Session, key: &ClientKey) -> Result<bool, CoreError> {
        let tag = key.tag();
        let created = match &self.policy {
            AccessPolicy::AddressList { list } => {
                let address = self
                    .resolve_address(session, key)
                    .await?
                    .ok_or_else(|| no_lease(key))?
                    .to_string();
                let existing = session
                    .print(
                        ADDRESS_LIST,
                        &[("list", list.as_str()), ("address", address.as_str())],
                    )
                    .await?;
                if existing.is_empty() {
                    session
                        .add(
                            ADDRESS_LIST,
                            &[
                                ("list", list.as_str()),
                                ("address", address.as_str()),
                                ("comment", tag.as_str()),
                            ],
                        )
                        .await?;
                    true
                } else {
                    false
                }
            }
            AccessPolicy::ActiveSession => {
                let mac = self
                    .resolve_mac(session, key)
                    .await?
                    .ok_or_else(|| no_lease(key))?;
                let existing = session
                    .print(ACTIVE, &[("mac-address", mac.as_str())])
                    .await?;
                if existing.is_empty() {
                    session
                        .add(
                            ACTIVE,
                            &[("mac-address", mac.as_str()), ("comment", tag.as_str())],
                        )
                        .await?;
                    true
                } else {
                    false
                }
            }
        };

        if created {
            info!(client = %key, "access granted");
        } else {
            debug!(client = %key, "access already granted");
        }
        Ok(created)
    }

    // ── Revoke ───────────────────────────────────────────────────────

    /// Remove every entry for `key`. Returns how many were removed; zero
    /// (nothing to revoke) is not an error.
    pub async fn revoke(&self, session: &mut Session, key: &ClientKey) -> Result<usize, CoreError> {
        let tag = key.tag();
        let (class, ids) = match &self.policy {
            AccessPolicy::AddressList { list } => {
                let mut ids = ids_of(
                    &session
                        .print(
                            ADDRESS_LIST,
                            &[("list", list.as_str()), ("comment", tag.as_str())],
                        )
                        .await?,
                );
                if let Some(address) = self.resolve_address(session, key).await? {
                    let address = address.to_string();
                    ids.extend(ids_of(
                        &session
                            .print(
                                ADDRESS_LIST,
                                &[("list", list.as_str()), ("address", address.as_str())],
                            )
                            .await?,
                    ));
                }
                (ADDRESS_LIST, ids)
            }
            AccessPolicy::ActiveSession => {
                let mut ids = ids_of(&session.print(ACTIVE, &[("comment", tag.as_str())]).await?);
                if let Some(mac) = self.resolve_mac(session, key).await? {
                    ids.extend(ids_of(
                        &session
                            .print(ACTIVE, &[("mac-address", mac.as_str())])
                            .await?,
                    ));
                }
                (ACTIVE, ids)
            }
        };

        let mut removed = 0;
        for id in ids {
            if session.remove(class, &id).await? {
                removed += 1;
            }
        }

        if removed == 0 {
            debug!(client = %key, "nothing to revoke");
        } else {
            info!(client = %key, removed, "access revoked");
        }
        Ok(removed)
    }

    // ── Listing ──────────────────────────────────────────────────────

    /// Clients currently let through by this gate's policy.
    pub async fn connected(&self, session: &mut Session) -> Result<Vec<ConnectedClient>, CoreError> {
        match &self.policy {
            AccessPolicy::AddressList { list } => {
                let entries = session.print(ADDRESS_LIST, &[("list", list.as_str())]).await?;
                let leases = self.allocator.leases(session).await?;
                Ok(entries
                    .iter()
                    .map(|entry| {
                        let address = entry.get("address").and_then(|a| a.parse().ok());
                        let lease = address.and_then(|a| leases.iter().find(|l| l.address == a));
                        ConnectedClient {
                            mac: lease.and_then(|l| l.client_mac().cloned()),
                            address,
                            owner: owner_of(entry)
                                .or_else(|| lease.and_then(|l| l.owner.clone())),
                        }
                    })
                    .collect())
            }
            AccessPolicy::ActiveSession => {
                let entries = session.print(ACTIVE, &[]).await?;
                Ok(entries
                    .iter()
                    .filter_map(|entry| {
                        let owner = owner_of(entry)?;
                        Some(ConnectedClient {
                            mac: entry.get("mac-address").map(MacAddress::new),
                            address: entry.get("address").and_then(|a| a.parse().ok()),
                            owner: Some(owner),
                        })
                    })
                    .collect())
            }
        }
    }

    // ── Payment redirect ─────────────────────────────────────────────

    /// Let `mac` reach the payment host before login and bind it to the
    /// hotspot user profile whose login page redirects there.
    pub async fn redirect_to_payment(
        &self,
        session: &mut Session,
        mac: &MacAddress,
        payment_url: &Url,
        profile: &str,
    ) -> Result<(), CoreError> {
        let host = payment_url
            .host_str()
            .ok_or_else(|| CoreError::ValidationFailed {
                message: format!("payment URL has no host: {payment_url}"),
            })?;

        Ensure::new(WALLED_GARDEN)
            .key("dst-host", host)
            .attr("action", "accept")
            .on_add("comment", "payment page")
            .run(session)
            .await?;
        Ensure::new(HOTSPOT_USER_PROFILE)
            .key("name", profile)
            .run(session)
            .await?;
        Ensure::new(HOTSPOT_USER)
            .key("name", mac.as_str())
            .attr("mac-address", mac.as_str())
            .attr("profile", profile)
            .run(session)
            .await?;

        info!(client = %mac, host, "client redirected to payment");
        Ok(())
    }

    // ── Key resolution ───────────────────────────────────────────────

    async fn resolve_address(
        &self,
        session: &mut Session,
        key: &ClientKey,
    ) -> Result<Option<Ipv4Addr>, CoreError> {
        let lease = match key {
            ClientKey::Address(address) => return Ok(Some(*address)),
            ClientKey::Mac(mac) => self.allocator.lease_for_mac(session, mac).await?,
            ClientKey::Owner(owner) => self.allocator.lease_for_owner(session, owner).await?,
        };
        Ok(lease.map(|l| l.address))
    }

    /// Placeholder MACs written at allocation time do not resolve.
    async fn resolve_mac(
        &self,
        session: &mut Session,
        key: &ClientKey,
    ) -> Result<Option<MacAddress>, CoreError> {
        let lease = match key {
            ClientKey::Mac(mac) => return Ok(Some(mac.clone())),
            ClientKey::Address(address) => {
                self.allocator.lease_for_address(session, *address).await?
            }
            ClientKey::Owner(owner) => self.allocator.lease_for_owner(session, owner).await?,
        };
        Ok(lease.and_then(|l| l.client_mac().cloned()))
    }
}

fn no_lease(key: &ClientKey) -> CoreError {
    CoreError::NoLeaseForClient {
        client: key.to_string(),
    }
}

fn ids_of(records: &[Record]) -> BTreeSet<String> {
    records
        .iter()
        .filter_map(Record::id)
        .map(str::to_owned)
        .collect()
}

fn owner_of(entry: &Record) -> Option<String> {
    entry
        .get("comment")
        .and_then(OwnerTag::owner_of)
        .map(str::to_owned)
}
