// ── Client identity types ──
//
// MacAddress and ClientKey identify the subscriber a grant or revoke is
// about. OwnerTag is the comment marker written next to every lease and
// allow-list entry so it can be found (and removed) again unambiguously.

use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

// ── MacAddress ──────────────────────────────────────────────────────

/// MAC address, normalized to uppercase colon-separated format
/// (`AA:BB:CC:DD:EE:FF`), the form the device prints.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MacAddress(String);

impl MacAddress {
    /// Create a normalized MAC address from any common format.
    /// Accepts colon-separated, dash-separated, or bare hex.
    pub fn new(raw: impl AsRef<str>) -> Self {
        let raw = raw.as_ref().trim().to_uppercase().replace('-', ":");
        if raw.len() == 12 && !raw.contains(':') {
            let pairs: Vec<&str> = (0..6).filter_map(|i| raw.get(i * 2..i * 2 + 2)).collect();
            return Self(pairs.join(":"));
        }
        Self(raw)
    }

    /// Strictly parse a MAC address: six hex octets.
    pub fn parse(raw: &str) -> Option<Self> {
        let mac = Self::new(raw);
        let octets: Vec<&str> = mac.0.split(':').collect();
        let valid = octets.len() == 6
            && octets
                .iter()
                .all(|o| o.len() == 2 && o.chars().all(|c| c.is_ascii_hexdigit()));
        valid.then_some(mac)
    }

    /// Locally administered stand-in for a lease whose client has not been
    /// seen yet. Derived from the address, so two placeholders never collide.
    pub fn placeholder_for(addr: Ipv4Addr) -> Self {
        let [a, b, c, d] = addr.octets();
        Self(format!("02:00:{a:02X}:{b:02X}:{c:02X}:{d:02X}"))
    }

    /// Whether this is the placeholder written for `addr` rather than a
    /// real client MAC. Other `02:00:` MACs are real randomized addresses.
    pub fn is_placeholder_for(&self, addr: Ipv4Addr) -> bool {
        *self == Self::placeholder_for(addr) || self.0 == "00:00:00:00:00:00"
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for MacAddress {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::new(s))
    }
}

// ── OwnerTag ────────────────────────────────────────────────────────

const OWNER_PREFIX: &str = "owner:";

/// `owner:<id>` comment marker linking device objects back to a client key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OwnerTag(String);

impl OwnerTag {
    pub fn new(owner: impl fmt::Display) -> Self {
        Self(format!("{OWNER_PREFIX}{owner}"))
    }

    /// Extract the owner id from a device comment, if it carries a tag.
    pub fn owner_of(comment: &str) -> Option<&str> {
        comment.strip_prefix(OWNER_PREFIX).filter(|o| !o.is_empty())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OwnerTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ── ClientKey ───────────────────────────────────────────────────────

/// Who a grant or revoke is for.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ClientKey {
    /// A client's hardware address.
    Mac(MacAddress),
    /// A leased IPv4 address.
    Address(Ipv4Addr),
    /// An application-level owner id (user id) resolved through its lease.
    Owner(String),
}

impl ClientKey {
    pub fn owner(id: impl Into<String>) -> Self {
        Self::Owner(id.into())
    }

    /// Tag written on entries created for this key.
    pub fn tag(&self) -> OwnerTag {
        OwnerTag::new(self)
    }
}

impl FromStr for ClientKey {
    type Err = std::convert::Infallible;

    /// Addresses and MACs are recognized by shape; anything else is an owner id.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if let Ok(addr) = s.parse::<Ipv4Addr>() {
            return Ok(Self::Address(addr));
        }
        if let Some(mac) = MacAddress::parse(s) {
            return Ok(Self::Mac(mac));
        }
        Ok(Self::Owner(s.to_owned()))
    }
}

impl fmt::Display for ClientKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Mac(mac) => write!(f, "{mac}"),
            Self::Address(addr) => write!(f, "{addr}"),
            Self::Owner(id) => f.write_str(id),
        }
    }
}
