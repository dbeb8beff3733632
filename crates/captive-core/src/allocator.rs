// ── Address allocator ──
//
// Hands out addresses from a device-side IP pool by writing static DHCP
// leases. The device's lease table is the only allocation state: an
// address is in use iff a lease references it. Callers serialize
// allocations per device (the orchestrator holds the device lock), so the
// read-then-add below is not racing another allocator in this process.

use std::collections::HashSet;
use std::net::Ipv4Addr;

use tracing::{debug, info};

use crate::error::CoreError;
use crate::model::{AddressRange, Lease, MacAddress, OwnerTag, next_address};
use crate::session::Session;

pub(crate) const POOL: &str = "/ip/pool";
pub(crate) const LEASE: &str = "/ip/dhcp-server/lease";

/// Allocates from one named pool, writing leases for one DHCP server.
#[derive(Debug, Clone)]
pub struct AddressAllocator {
    pool: String,
    server: Option<String>,
}

impl AddressAllocator {
    pub fn new(pool: impl Into<String>) -> Self {
        Self {
            pool: pool.into(),
            server: None,
        }
    }

    /// Bind new leases to a specific DHCP server.
    #[must_use]
    pub fn with_server(mut self, server: impl Into<String>) -> Self {
        self.server = Some(server.into());
        self
    }

    pub fn pool(&self) -> &str {
        &self.pool
    }

    /// The pool's (first) range as configured on the device.
    pub async fn pool_range(&self, session: &mut Session) -> Result<AddressRange, CoreError> {
        let pools = session.print(POOL, &[("name", self.pool.as_str())]).await?;
        let pool = pools.first().ok_or_else(|| CoreError::PoolNotFound {
            pool: self.pool.clone(),
        })?;
        let ranges = pool.get("ranges").unwrap_or_default();
        AddressRange::first_of(ranges).map_err(|_| CoreError::InvalidRange {
            pool: self.pool.clone(),
            value: ranges.to_owned(),
        })
    }

    /// Every lease on the device, across servers.
    pub async fn leases(&self, session: &mut Session) -> Result<Vec<Lease>, CoreError> {
        let records = session.print(LEASE, &[]).await?;
        Ok(records.iter().filter_map(Lease::from_record).collect())
    }

    pub async fn lease_for_owner(
        &self,
        session: &mut Session,
        owner: &str,
    ) -> Result<Option<Lease>, CoreError> {
        let tag = OwnerTag::new(owner);
        let records = session.print(LEASE, &[("comment", tag.as_str())]).await?;
        Ok(records.iter().find_map(Lease::from_record))
    }

    pub async fn lease_for_mac(
        &self,
        session: &mut Session,
        mac: &MacAddress,
    ) -> Result<Option<Lease>, CoreError> {
        let records = session
            .print(LEASE, &[("mac-address", mac.as_str())])
            .await?;
        Ok(records.iter().find_map(Lease::from_record))
    }

    pub async fn lease_for_address(
        &self,
        session: &mut Session,
        address: Ipv4Addr,
    ) -> Result<Option<Lease>, CoreError> {
        let address = address.to_string();
        let records = session
            .print(LEASE, &[("address", address.as_str())])
            .await?;
        Ok(records.iter().find_map(Lease::from_record))
    }

    /// Allocate an address for `owner`.
    ///
    /// An owner that already holds a lease inside the pool range gets that
    /// address back and no lease is written.
    pub async fn allocate(&self, session: &mut Session, owner: &str) -> Result<Ipv4Addr, CoreError> {
        let range = self.pool_range(session).await?;
        let leases = self.leases(session).await?;

        let tag = OwnerTag::new(owner);
        if let Some(existing) = leases
            .iter()
            .find(|l| l.owner.as_deref() == Some(owner) && range.contains(l.address))
        {
            debug!(owner, address = %existing.address, "owner already holds a lease");
            return Ok(existing.address);
        }

        let used: HashSet<Ipv4Addr> = leases.iter().map(|l| l.address).collect();
        let address = first_free(range, &used).ok_or_else(|| CoreError::PoolExhausted {
            pool: self.pool.clone(),
            range: range.to_string(),
        })?;

        let address_str = address.to_string();
        let mac = MacAddress::placeholder_for(address);
        let mut attrs = vec![
            ("address", address_str.as_str()),
            ("mac-address", mac.as_str()),
            ("comment", tag.as_str()),
        ];
        if let Some(server) = &self.server {
            attrs.push(("server", server.as_str()));
        }
        session.add(LEASE, &attrs).await?;

        info!(pool = %self.pool, owner, %address, "address allocated");
        Ok(address)
    }
}

/// Lowest address of `range` not in `used`.
pub fn first_free(range: AddressRange, used: &HashSet<Ipv4Addr>) -> Option<Ipv4Addr> {
    let mut candidate = range.start();
    loop {
        if !range.contains(candidate) {
            return None;
        }
        if !used.contains(&candidate) {
            return Some(candidate);
        }
        candidate = next_address(candidate)?;
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn ip(s: &str) -> Ipv4Addr {
        s.parse().unwrap()
    }

    #[test]
    fn skips_used_addresses_numerically() {
        let range: AddressRange = "10.5.50.2-10.5.50.254".parse().unwrap();
        let used: HashSet<Ipv4Addr> = (2..=9).map(|d| Ipv4Addr::new(10, 5, 50, d)).collect();
        assert_eq!(first_free(range, &used), Some(ip("10.5.50.10")));
    }

    #[test]
    fn exhausted_range_yields_none() {
        let range: AddressRange = "10.5.50.2-10.5.50.4".parse().unwrap();
        let used: HashSet<Ipv4Addr> = (2..=4).map(|d| Ipv4Addr::new(10, 5, 50, d)).collect();
        assert_eq!(first_free(range, &used), None);
    }

    #[test]
    fn walks_across_octet_boundary() {
        let range: AddressRange = "10.5.50.254-10.5.51.3".parse().unwrap();
        let used: HashSet<Ipv4Addr> = [ip("10.5.50.254"), ip("10.5.50.255")].into();
        assert_eq!(first_free(range, &used), Some(ip("10.5.51.0")));
    }

    #[test]
    fn top_of_address_space_terminates() {
        let range: AddressRange = "255.255.255.255".parse().unwrap();
        let used: HashSet<Ipv4Addr> = [ip("255.255.255.255")].into();
        assert_eq!(first_free(range, &used), None);
    }
}
