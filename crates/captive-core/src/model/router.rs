// ── Router records and connected clients ──

use std::net::Ipv4Addr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::identity::MacAddress;

/// Persisted metadata for one managed router.
///
/// Owned by the surrounding application's store; the engine only creates
/// records through the directory and reads them back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouterRecord {
    pub id: Uuid,
    pub building_id: String,
    pub name: String,
    pub host: String,
    pub created_at: DateTime<Utc>,
}

impl RouterRecord {
    pub fn new(building_id: impl Into<String>, name: impl Into<String>, host: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            building_id: building_id.into(),
            name: name.into(),
            host: host.into(),
            created_at: Utc::now(),
        }
    }
}

/// A client currently holding access through the gate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectedClient {
    pub mac: Option<MacAddress>,
    pub address: Option<Ipv4Addr>,
    pub owner: Option<String>,
}
