// ── IPv4 addressing ──
//
// Addresses are compared and stepped as `u32`; dotted quads exist only at
// the protocol boundary (parsing device records, building commands).

use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid {kind} '{input}'")]
pub struct AddressParseError {
    pub kind: &'static str,
    pub input: String,
}

impl AddressParseError {
    fn new(kind: &'static str, input: &str) -> Self {
        Self {
            kind,
            input: input.to_owned(),
        }
    }
}

/// The address following `addr`, carrying across octets
/// (`10.5.50.255` -> `10.5.51.0`). `None` past `255.255.255.255`.
pub fn next_address(addr: Ipv4Addr) -> Option<Ipv4Addr> {
    u32::from(addr).checked_add(1).map(Ipv4Addr::from)
}

// ── AddressRange ────────────────────────────────────────────────────

/// Inclusive, contiguous IPv4 range (`start-end` on the wire).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct AddressRange {
    start: Ipv4Addr,
    end: Ipv4Addr,
}

impl AddressRange {
    pub fn new(start: Ipv4Addr, end: Ipv4Addr) -> Result<Self, AddressParseError> {
        if u32::from(start) > u32::from(end) {
            return Err(AddressParseError::new(
                "address range",
                &format!("{start}-{end}"),
            ));
        }
        Ok(Self { start, end })
    }

    pub fn start(&self) -> Ipv4Addr {
        self.start
    }

    pub fn end(&self) -> Ipv4Addr {
        self.end
    }

    pub fn contains(&self, addr: Ipv4Addr) -> bool {
        (u32::from(self.start)..=u32::from(self.end)).contains(&u32::from(addr))
    }

    /// Number of addresses in the range.
    pub fn len(&self) -> u64 {
        u64::from(u32::from(self.end) - u32::from(self.start)) + 1
    }

    pub fn is_empty(&self) -> bool {
        false
    }

    /// Parse a device pool `ranges` value, taking the first range when the
    /// pool lists several (`a-b,c-d`). A lone address is a one-address range.
    pub fn first_of(ranges: &str) -> Result<Self, AddressParseError> {
        let first = ranges
            .split(',')
            .map(str::trim)
            .find(|s| !s.is_empty())
            .ok_or_else(|| AddressParseError::new("address range", ranges))?;
        first.parse()
    }
}

impl FromStr for AddressRange {
    type Err = AddressParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parse = |part: &str| {
            part.trim()
                .parse::<Ipv4Addr>()
                .map_err(|_| AddressParseError::new("address range", s))
        };
        match s.split_once('-') {
            Some((start, end)) => Self::new(parse(start)?, parse(end)?),
            None => {
                let addr = parse(s)?;
                Self::new(addr, addr)
            }
        }
    }
}

impl fmt::Display for AddressRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.start, self.end)
    }
}

impl TryFrom<String> for AddressRange {
    type Error = AddressParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<AddressRange> for String {
    fn from(range: AddressRange) -> Self {
        range.to_string()
    }
}

// ── Ipv4Cidr ────────────────────────────────────────────────────────

/// Interface address with prefix length, e.g. the hotspot gateway `10.5.50.1/24`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Ipv4Cidr {
    address: Ipv4Addr,
    prefix: u8,
}

impl Ipv4Cidr {
    pub fn new(address: Ipv4Addr, prefix: u8) -> Result<Self, AddressParseError> {
        if prefix > 32 {
            return Err(AddressParseError::new(
                "CIDR",
                &format!("{address}/{prefix}"),
            ));
        }
        Ok(Self { address, prefix })
    }

    pub fn address(&self) -> Ipv4Addr {
        self.address
    }

    pub fn prefix(&self) -> u8 {
        self.prefix
    }

    pub fn netmask(&self) -> u32 {
        match self.prefix {
            0 => 0,
            p => u32::MAX << (32 - u32::from(p)),
        }
    }

    pub fn network(&self) -> Ipv4Addr {
        Ipv4Addr::from(u32::from(self.address) & self.netmask())
    }

    /// The network in CIDR notation (`10.5.50.0/24`).
    pub fn network_cidr(&self) -> String {
        format!("{}/{}", self.network(), self.prefix)
    }

    pub fn contains(&self, addr: Ipv4Addr) -> bool {
        u32::from(addr) & self.netmask() == u32::from(self.network())
    }
}

impl FromStr for Ipv4Cidr {
    type Err = AddressParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (addr, prefix) = s
            .split_once('/')
            .ok_or_else(|| AddressParseError::new("CIDR", s))?;
        let address = addr
            .trim()
            .parse::<Ipv4Addr>()
            .map_err(|_| AddressParseError::new("CIDR", s))?;
        let prefix = prefix
            .trim()
            .parse::<u8>()
            .map_err(|_| AddressParseError::new("CIDR", s))?;
        Self::new(address, prefix)
    }
}

impl fmt::Display for Ipv4Cidr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.address, self.prefix)
    }
}

impl TryFrom<String> for Ipv4Cidr {
    type Error = AddressParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Ipv4Cidr> for String {
    fn from(cidr: Ipv4Cidr) -> Self {
        cidr.to_string()
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
    fn next_address_rolls_last_octet() {
        assert_eq!(next_address(ip("10.5.50.9")), Some(ip("10.5.50.10")));
        assert_eq!(next_address(ip("10.5.50.255")), Some(ip("10.5.51.0")));
    }

    #[test]
    fn next_address_carries_through_all_octets() {
        assert_eq!(next_address(ip("10.5.255.255")), Some(ip("10.6.0.0")));
        assert_eq!(next_address(ip("10.255.255.255")), Some(ip("11.0.0.0")));
        assert_eq!(next_address(ip("255.255.255.255")), None);
    }

    #[test]
    fn range_compares_numerically() {
        let range: AddressRange = "10.5.50.2-10.5.50.10".parse().unwrap();
        // "10.5.50.9" > "10.5.50.10" as strings; numerically it is inside.
        assert!(range.contains(ip("10.5.50.9")));
        assert!(range.contains(ip("10.5.50.10")));
        assert!(!range.contains(ip("10.5.50.11")));
        assert_eq!(range.len(), 9);
    }

    #[test]
    fn range_rejects_inverted_bounds() {
        assert!("10.5.50.20-10.5.50.2".parse::<AddressRange>().is_err());
    }

    #[test]
    fn first_of_takes_first_range() {
        let range = AddressRange::first_of("10.0.0.2-10.0.0.9, 10.0.1.2-10.0.1.9").unwrap();
        assert_eq!(range.to_string(), "10.0.0.2-10.0.0.9");

        let single = AddressRange::first_of("10.0.0.7").unwrap();
        assert_eq!(single.start(), single.end());
        assert!(AddressRange::first_of("").is_err());
    }

    #[test]
    fn cidr_network() {
        let cidr: Ipv4Cidr = "10.5.50.1/24".parse().unwrap();
        assert_eq!(cidr.network_cidr(), "10.5.50.0/24");
        assert!(cidr.contains(ip("10.5.50.254")));
        assert!(!cidr.contains(ip("10.5.51.1")));
        assert!("10.5.50.1/33".parse::<Ipv4Cidr>().is_err());
        assert!("10.5.50.1".parse::<Ipv4Cidr>().is_err());
    }
}
