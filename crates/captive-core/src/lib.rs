// captive-core: Captive-portal provisioning and access-control engine.
//
// Drives one hotspot router at a time: provisions its bridge, DHCP, NAT,
// firewall and hotspot topology, allocates client addresses, and gates
// internet access per subscriber. Device I/O goes through the `Transport`
// seam; `rest` adapts the RouterOS REST bridge, `sim` is an in-memory device.

pub mod access;
pub mod allocator;
pub mod config;
pub mod directory;
pub mod error;
pub mod model;
pub mod orchestrator;
pub mod portal;
pub mod provision;
pub mod rest;
pub mod session;
pub mod sim;

// ── Primary re-exports ──────────────────────────────────────────────
pub use access::AccessGate;
pub use allocator::AddressAllocator;
pub use config::{
    AccessPolicy, DeviceConfig, EngineConfig, ForwardPolicy, LoginMethod, ProvisionConfig,
    TlsVerification, VerifyBackoff,
};
pub use directory::{MemoryDirectory, RouterDirectory};
pub use error::CoreError;
pub use orchestrator::{Admission, Orchestrator, Provisioned, SweepOutcome};
pub use portal::{PortalFile, PortalPublisher};
pub use provision::{Criticality, ProvisionReport, Provisioner, Step, StepReport, StepStatus};
pub use rest::{RestFileTransfer, RestTransport};
pub use session::{FileTransfer, Link, Session, Transport};
pub use sim::SimulatedDevice;

// ── Model re-exports ────────────────────────────────────────────────
pub use model::{
    AddressRange, ClientKey, ConnectedClient, Ipv4Cidr, Lease, MacAddress, OwnerTag, RouterRecord,
};
