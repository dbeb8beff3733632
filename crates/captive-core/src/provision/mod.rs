// ── Topology provisioner ──
//
// Runs the provisioning steps in dependency order against one session.
// Every step is lookup-before-write, so re-running after a partial failure
// converges instead of duplicating objects. Critical failures abort the
// run; advisory failures are logged, recorded in the report, and skipped.

mod ensure;
mod firewall;
mod report;
mod steps;

pub use report::{Criticality, ProvisionReport, Step, StepReport, StepStatus};
pub use steps::Interfaces;

pub(crate) use ensure::Ensure;
pub(crate) use steps::WALLED_GARDEN;

use tracing::{error, info, warn};

use crate::config::{AccessPolicy, ProvisionConfig};
use crate::error::CoreError;
use crate::session::Session;

/// Applies a `ProvisionConfig` to a device.
#[derive(Debug, Clone)]
pub struct Provisioner {
    config: ProvisionConfig,
    access: AccessPolicy,
}

impl Provisioner {
    pub fn new(config: ProvisionConfig, access: AccessPolicy) -> Self {
        Self { config, access }
    }

    pub fn config(&self) -> &ProvisionConfig {
        &self.config
    }

    /// Provision the device behind `session`.
    ///
    /// Returns the per-step report when every critical step succeeded,
    /// otherwise `CoreError::ProvisionFailed` naming the first failing step.
    pub async fn provision(&self, session: &mut Session) -> Result<ProvisionReport, CoreError> {
        self.config.validate()?;
        let config = &self.config;
        let mut report = ProvisionReport::new(session.device());
        let mut interfaces = Interfaces::default();

        for step in Step::ALL {
            let result = match step {
                Step::Discover => steps::discover(session).await.map(|found| {
                    interfaces = found;
                    StepStatus::Unchanged
                }),
                Step::IsolateWan => steps::isolate_wan(session, config).await,
                Step::Bridge => steps::bridge(session, config).await,
                Step::BridgePorts => steps::bridge_ports(session, config, &interfaces).await,
                Step::GatewayAddress => steps::gateway_address(session, config).await,
                Step::Pool => steps::pool(session, config).await,
                Step::Dhcp => steps::dhcp(session, config).await,
                Step::HotspotProfile => steps::hotspot_profile(session, config).await,
                Step::WalledGarden => steps::walled_garden(session, config).await,
                Step::Wireless => steps::wireless(session, config, &interfaces).await,
                Step::Nat => steps::nat(session, config).await,
                Step::Firewall => firewall::firewall(session, config, &self.access).await,
                Step::Hotspot => steps::hotspot(session, config).await,
            };

            match result {
                Ok(status) => {
                    info!(step = %step, status = %status, "provisioning step done");
                    report.record(step, status);
                }
                Err(e) if step.criticality() == Criticality::Advisory => {
                    warn!(step = %step, error = %e, "advisory step failed, continuing");
                    report.record(step, StepStatus::Failed(e.to_string()));
                }
                Err(e) => {
                    error!(step = %step, error = %e, "critical step failed");
                    return Err(CoreError::ProvisionFailed {
                        step: step.to_string(),
                        source: Box::new(e),
                    });
                }
            }
        }

        info!(
            device = %report.device,
            changed = report.changed(),
            "provisioning complete"
        );
        Ok(report)
    }
}
