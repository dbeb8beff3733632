// ── Provisioning orchestrator ──
//
// The upstream entry point. Every operation follows the same frame:
//
//   lock device -> open session -> work (under the operation timeout)
//   -> close session -> release lock
//
// Shutdown interrupts any stage of the frame. The close runs on every exit
// path once a session is open, including errors, timeouts and shutdown, and
// operations against the same device never interleave. Different devices
// proceed in parallel.

use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::sync::Arc;

use dashmap::DashMap;
use futures_util::future::{BoxFuture, join_all};
use serde::Serialize;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;
use uuid::Uuid;

use crate::access::AccessGate;
use crate::allocator::AddressAllocator;
use crate::config::{DeviceConfig, EngineConfig};
use crate::directory::RouterDirectory;
use crate::error::CoreError;
use crate::model::{ClientKey, ConnectedClient, MacAddress, RouterRecord};
use crate::portal::{PortalFile, PortalPublisher};
use crate::provision::{ProvisionReport, Provisioner};
use crate::session::{FileTransfer, Session, Transport};

/// Result of registering a new router.
#[derive(Debug, Clone, Serialize)]
pub struct Provisioned {
    pub router: RouterRecord,
    pub report: ProvisionReport,
}

/// Result of the first-grant flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Admission {
    pub address: Ipv4Addr,
    /// `false` if the client was already allowed.
    pub granted: bool,
}

/// Per-user outcome of an expiry sweep.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SweepOutcome {
    pub user_id: String,
    pub router_id: Option<Uuid>,
    pub removed: usize,
    pub error: Option<String>,
}

struct Inner {
    config: EngineConfig,
    transport: Arc<dyn Transport>,
    files: Arc<dyn FileTransfer>,
    directory: Arc<dyn RouterDirectory>,
    provisioner: Provisioner,
    allocator: AddressAllocator,
    gate: AccessGate,
    publisher: PortalPublisher,
    locks: DashMap<String, Arc<Mutex<()>>>,
    cancel: CancellationToken,
}

/// Cheaply cloneable handle; clones share the lock table.
#[derive(Clone)]
pub struct Orchestrator {
    inner: Arc<Inner>,
}

impl Orchestrator {
    pub fn new(
        config: EngineConfig,
        transport: Arc<dyn Transport>,
        files: Arc<dyn FileTransfer>,
        directory: Arc<dyn RouterDirectory>,
    ) -> Self {
        let allocator = AddressAllocator::new(config.provision.pool_name.clone())
            .with_server(config.provision.dhcp_server.clone());
        let provisioner = Provisioner::new(config.provision.clone(), config.access.clone());
        let gate = AccessGate::new(config.access.clone(), allocator.clone());
        let publisher =
            PortalPublisher::new(config.provision.html_directory.clone(), config.verify);
        Self {
            inner: Arc::new(Inner {
                config,
                transport,
                files,
                directory,
                provisioner,
                allocator,
                gate,
                publisher,
                locks: DashMap::new(),
                cancel: CancellationToken::new(),
            }),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    /// Token observed by every device operation and by portal verification.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.inner.cancel.clone()
    }

    /// Cancel in-flight and future device operations.
    pub fn shutdown(&self) {
        self.inner.cancel.cancel();
    }

    // ── Session frame ────────────────────────────────────────────────

    async fn run_on_device<T, F>(
        &self,
        device: &DeviceConfig,
        operation: &'static str,
        work: F,
    ) -> Result<T, CoreError>
    where
        F: for<'s> FnOnce(&'s mut Session) -> BoxFuture<'s, Result<T, CoreError>>,
    {
        let key = device.key();
        let cancel = &self.inner.cancel;
        let lock = self.inner.locks.entry(key.clone()).or_default().clone();
        let _guard = tokio::select! {
            () = cancel.cancelled() => return Err(interrupted(operation)),
            guard = lock.lock_owned() => guard,
        };
        debug!(device = %key, operation, "device lock acquired");

        let mut session = tokio::select! {
            () = cancel.cancelled() => return Err(interrupted(operation)),
            session = Session::open(self.inner.transport.as_ref(), device) => session?,
        };

        // Shutdown abandons the in-flight command; the session is still closed.
        let run = async {
            tokio::select! {
                () = cancel.cancelled() => Err(interrupted(operation)),
                result = work(&mut session) => result,
            }
        };
        let result = match self.inner.config.operation_timeout {
            Some(limit) => tokio::time::timeout(limit, run)
                .await
                .unwrap_or(Err(CoreError::Timeout { limit })),
            None => run.await,
        };
        session.close().await;

        if let Err(e) = &result {
            warn!(device = %key, operation, error = %e, "operation failed");
        }
        result
    }

    async fn device_for(&self, router_id: Uuid) -> Result<DeviceConfig, CoreError> {
        let router = self.inner.directory.router(router_id).await?;
        self.inner.directory.device(&router).await
    }

    async fn device_for_user(&self, user_id: &str) -> Result<(RouterRecord, DeviceConfig), CoreError> {
        let router = self.inner.directory.router_for_user(user_id).await?;
        let device = self.inner.directory.device(&router).await?;
        Ok((router, device))
    }

    // ── Provisioning ─────────────────────────────────────────────────

    /// Provision a device and register it with the directory.
    ///
    /// The router is recorded only after provisioning succeeded.
    pub async fn provision_router(
        &self,
        building_id: &str,
        name: &str,
        device: &DeviceConfig,
    ) -> Result<Provisioned, CoreError> {
        let report = self.provision_device(device).await?;
        let router = RouterRecord::new(
            building_id,
            name,
            device.url.host_str().unwrap_or_default(),
        );
        self.inner.directory.create_router(&router, device).await?;
        info!(router = %router.id, building = building_id, "router registered");
        Ok(Provisioned { router, report })
    }

    /// Re-run provisioning against a registered router.
    pub async fn reprovision(&self, router_id: Uuid) -> Result<ProvisionReport, CoreError> {
        let device = self.device_for(router_id).await?;
        self.provision_device(&device).await
    }

    /// Provision a device without touching the directory.
    pub async fn provision_device(&self, device: &DeviceConfig) -> Result<ProvisionReport, CoreError> {
        let provisioner = self.inner.provisioner.clone();
        self.run_on_device(device, "provision", move |s| {
            Box::pin(async move { provisioner.provision(s).await })
        })
        .await
    }

    // ── Addressing & access ──────────────────────────────────────────

    pub async fn allocate_address(&self, user_id: &str) -> Result<Ipv4Addr, CoreError> {
        let (_, device) = self.device_for_user(user_id).await?;
        self.allocate_on(&device, user_id).await
    }

    pub async fn allocate_on(&self, device: &DeviceConfig, owner: &str) -> Result<Ipv4Addr, CoreError> {
        let allocator = self.inner.allocator.clone();
        let owner = owner.to_owned();
        self.run_on_device(device, "allocate", move |s| {
            Box::pin(async move { allocator.allocate(s, &owner).await })
        })
        .await
    }

    /// Allocate an address for the user if needed, then grant access.
    /// Both happen in one session under one lock.
    pub async fn admit(&self, user_id: &str) -> Result<Admission, CoreError> {
        let (_, device) = self.device_for_user(user_id).await?;
        self.admit_on(&device, user_id).await
    }

    pub async fn admit_on(&self, device: &DeviceConfig, owner: &str) -> Result<Admission, CoreError> {
        let allocator = self.inner.allocator.clone();
        let gate = self.inner.gate.clone();
        let owner = owner.to_owned();
        self.run_on_device(device, "admit", move |s| {
            Box::pin(async move {
                let address = allocator.allocate(s, &owner).await?;
                let granted = gate.grant(s, &ClientKey::Owner(owner)).await?;
                Ok(Admission { address, granted })
            })
        })
        .await
    }

    pub async fn grant_access(&self, user_id: &str) -> Result<bool, CoreError> {
        let (_, device) = self.device_for_user(user_id).await?;
        self.grant_on(&device, ClientKey::owner(user_id)).await
    }

    pub async fn revoke_access(&self, user_id: &str) -> Result<usize, CoreError> {
        let (_, device) = self.device_for_user(user_id).await?;
        self.revoke_on(&device, ClientKey::owner(user_id)).await
    }

    pub async fn grant_client(&self, router_id: Uuid, key: ClientKey) -> Result<bool, CoreError> {
        let device = self.device_for(router_id).await?;
        self.grant_on(&device, key).await
    }

    pub async fn revoke_client(&self, router_id: Uuid, key: ClientKey) -> Result<usize, CoreError> {
        let device = self.device_for(router_id).await?;
        self.revoke_on(&device, key).await
    }

    pub async fn grant_on(&self, device: &DeviceConfig, key: ClientKey) -> Result<bool, CoreError> {
        let gate = self.inner.gate.clone();
        self.run_on_device(device, "grant", move |s| {
            Box::pin(async move { gate.grant(s, &key).await })
        })
        .await
    }

    pub async fn revoke_on(&self, device: &DeviceConfig, key: ClientKey) -> Result<usize, CoreError> {
        let gate = self.inner.gate.clone();
        self.run_on_device(device, "revoke", move |s| {
            Box::pin(async move { gate.revoke(s, &key).await })
        })
        .await
    }

    /// Revoke every listed user whose subscription lapsed.
    ///
    /// Users are grouped by router; each router is swept in one session and
    /// routers are swept concurrently. Failures are reported per user and
    /// never stop the rest of the sweep.
    pub async fn revoke_expired(&self, user_ids: &[String]) -> Vec<SweepOutcome> {
        let mut outcomes = Vec::new();
        let mut by_router: HashMap<Uuid, (DeviceConfig, Vec<String>)> = HashMap::new();

        for user_id in user_ids {
            match self.device_for_user(user_id).await {
                Ok((router, device)) => {
                    by_router
                        .entry(router.id)
                        .or_insert_with(|| (device, Vec::new()))
                        .1
                        .push(user_id.clone());
                }
                Err(e) => outcomes.push(SweepOutcome {
                    user_id: user_id.clone(),
                    router_id: None,
                    removed: 0,
                    error: Some(e.to_string()),
                }),
            }
        }

        let sweeps = by_router
            .iter()
            .map(|(router_id, (device, users))| self.sweep_router(*router_id, device, users));
        for batch in join_all(sweeps).await {
            outcomes.extend(batch);
        }

        let removed: usize = outcomes.iter().map(|o| o.removed).sum();
        info!(users = user_ids.len(), removed, "expiry sweep finished");
        outcomes
    }

    async fn sweep_router(
        &self,
        router_id: Uuid,
        device: &DeviceConfig,
        users: &[String],
    ) -> Vec<SweepOutcome> {
        let gate = self.inner.gate.clone();
        let pending = users.to_vec();
        let result = self
            .run_on_device(device, "sweep", move |s| {
                Box::pin(async move {
                    let mut outcomes = Vec::with_capacity(pending.len());
                    for user_id in pending {
                        let key = ClientKey::owner(user_id.clone());
                        let (removed, error) = match gate.revoke(s, &key).await {
                            Ok(n) => (n, None),
                            Err(e) => (0, Some(e.to_string())),
                        };
                        outcomes.push(SweepOutcome {
                            user_id,
                            router_id: Some(router_id),
                            removed,
                            error,
                        });
                    }
                    Ok(outcomes)
                })
            })
            .await;

        result.unwrap_or_else(|e| {
            let reason = e.to_string();
            users
                .iter()
                .map(|user_id| SweepOutcome {
                    user_id: user_id.clone(),
                    router_id: Some(router_id),
                    removed: 0,
                    error: Some(reason.clone()),
                })
                .collect()
        })
    }

    pub async fn list_connected_clients(
        &self,
        router_id: Uuid,
    ) -> Result<Vec<ConnectedClient>, CoreError> {
        let device = self.device_for(router_id).await?;
        self.connected_on(&device).await
    }

    pub async fn connected_on(&self, device: &DeviceConfig) -> Result<Vec<ConnectedClient>, CoreError> {
        let gate = self.inner.gate.clone();
        self.run_on_device(device, "list-clients", move |s| {
            Box::pin(async move { gate.connected(s).await })
        })
        .await
    }

    // ── Portal & payment ─────────────────────────────────────────────

    pub async fn publish_portal_assets(
        &self,
        router_id: Uuid,
        files: Vec<PortalFile>,
    ) -> Result<(), CoreError> {
        let device = self.device_for(router_id).await?;
        self.publish_on(&device, files).await
    }

    pub async fn publish_on(&self, device: &DeviceConfig, files: Vec<PortalFile>) -> Result<(), CoreError> {
        let publisher = self.inner.publisher.clone();
        let transfer = Arc::clone(&self.inner.files);
        let cancel = self.inner.cancel.clone();
        let target = device.clone();
        self.run_on_device(device, "publish", move |s| {
            Box::pin(async move {
                publisher
                    .publish(s, transfer.as_ref(), &target, &files, &cancel)
                    .await
            })
        })
        .await
    }

    pub async fn redirect_to_payment(
        &self,
        router_id: Uuid,
        mac: MacAddress,
        payment_url: Url,
    ) -> Result<(), CoreError> {
        let device = self.device_for(router_id).await?;
        self.redirect_on(&device, mac, payment_url).await
    }

    pub async fn redirect_on(
        &self,
        device: &DeviceConfig,
        mac: MacAddress,
        payment_url: Url,
    ) -> Result<(), CoreError> {
        let gate = self.inner.gate.clone();
        let profile = self.inner.config.provision.payment_user_profile.clone();
        self.run_on_device(device, "payment-redirect", move |s| {
            Box::pin(async move {
                gate.redirect_to_payment(s, &mac, &payment_url, &profile)
                    .await
            })
        })
        .await
    }
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("devices", &self.inner.locks.len())
            .finish_non_exhaustive()
    }
}

fn interrupted(operation: &str) -> CoreError {
    CoreError::Cancelled {
        operation: operation.to_owned(),
    }
}
