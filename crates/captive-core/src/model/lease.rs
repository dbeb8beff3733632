// ── DHCP lease records ──

use std::net::Ipv4Addr;

use captive_api::Record;
use serde::{Deserialize, Serialize};

use super::identity::{MacAddress, OwnerTag};

/// A DHCP lease as stored on the device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lease {
    pub id: String,
    pub address: Ipv4Addr,
    pub mac: Option<MacAddress>,
    /// Owner id parsed from an `owner:<id>` comment.
    pub owner: Option<String>,
    pub server: Option<String>,
    pub dynamic: bool,
}

impl Lease {
    /// Build from a `/ip/dhcp-server/lease/print` record.
    ///
    /// Records without an id or a parseable IPv4 address are not leases the
    /// engine can reason about and yield `None`.
    pub fn from_record(record: &Record) -> Option<Self> {
        let id = record.id()?.to_owned();
        let address = record.get("address")?.parse().ok()?;
        Some(Self {
            id,
            address,
            mac: record
                .get("mac-address")
                .filter(|m| !m.is_empty())
                .map(MacAddress::new),
            owner: record
                .get("comment")
                .and_then(OwnerTag::owner_of)
                .map(str::to_owned),
            server: record.get("server").map(str::to_owned),
            dynamic: record.flag("dynamic"),
        })
    }

    /// The client MAC, unless it is still the allocation placeholder.
    pub fn client_mac(&self) -> Option<&MacAddress> {
        self.mac
            .as_ref()
            .filter(|m| !m.is_placeholder_for(self.address))
    }
}
