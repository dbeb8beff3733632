// ── Router directory ──
//
// The engine does not persist routers. The embedding application owns the
// store (database, config file) and exposes it through `RouterDirectory`.

use async_trait::async_trait;
use dashmap::DashMap;
use uuid::Uuid;

use crate::config::DeviceConfig;
use crate::error::CoreError;
use crate::model::RouterRecord;

#[async_trait]
pub trait RouterDirectory: Send + Sync {
    /// Persist a newly provisioned router together with its credentials.
    async fn create_router(&self, record: &RouterRecord, device: &DeviceConfig)
    -> Result<(), CoreError>;

    /// `RouterNotFound` if absent.
    async fn router(&self, id: Uuid) -> Result<RouterRecord, CoreError>;

    /// The router serving a user's building. `NoRouterForUser` if none.
    async fn router_for_user(&self, user_id: &str) -> Result<RouterRecord, CoreError>;

    /// Connection parameters for a router.
    async fn device(&self, router: &RouterRecord) -> Result<DeviceConfig, CoreError>;
}

/// Process-local directory. Users are assigned to buildings explicitly.
#[derive(Debug, Default)]
pub struct MemoryDirectory {
    routers: DashMap<Uuid, (RouterRecord, DeviceConfig)>,
    users: DashMap<String, String>,
}

impl MemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `user_id` lives in `building_id`.
    pub fn assign_user(&self, user_id: impl Into<String>, building_id: impl Into<String>) {
        self.users.insert(user_id.into(), building_id.into());
    }

    pub fn routers(&self) -> Vec<RouterRecord> {
        self.routers.iter().map(|e| e.value().0.clone()).collect()
    }
}

#[async_trait]
impl RouterDirectory for MemoryDirectory {
    async fn create_router(
        &self,
        record: &RouterRecord,
        device: &DeviceConfig,
    ) -> Result<(), CoreError> {
        self.routers
            .insert(record.id, (record.clone(), device.clone()));
        Ok(())
    }

    async fn router(&self, id: Uuid) -> Result<RouterRecord, CoreError> {
        self.routers
            .get(&id)
            .map(|e| e.value().0.clone())
            .ok_or_else(|| CoreError::RouterNotFound { id: id.to_string() })
    }

    async fn router_for_user(&self, user_id: &str) -> Result<RouterRecord, CoreError> {
        let no_router = || CoreError::NoRouterForUser {
            user: user_id.to_owned(),
        };
        let building = self.users.get(user_id).ok_or_else(no_router)?.value().clone();
        self.routers
            .iter()
            .find(|e| e.value().0.building_id == building)
            .map(|e| e.value().0.clone())
            .ok_or_else(no_router)
    }

    async fn device(&self, router: &RouterRecord) -> Result<DeviceConfig, CoreError> {
        self.routers
            .get(&router.id)
            .map(|e| e.value().1.clone())
            .ok_or_else(|| CoreError::RouterNotFound {
                id: router.id.to_string(),
            })
    }
}
