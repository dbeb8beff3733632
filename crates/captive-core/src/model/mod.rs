// ── Domain model ──

pub mod address;
pub mod identity;
pub mod lease;
pub mod router;

pub use address::{AddressParseError, AddressRange, Ipv4Cidr, next_address};
pub use identity::{ClientKey, MacAddress, OwnerTag};
pub use lease::Lease;
pub use router::{ConnectedClient, RouterRecord};
