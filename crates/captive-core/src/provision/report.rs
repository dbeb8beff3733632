// ── Provisioning outcome ──

use serde::Serialize;

/// The provisioning steps, in dependency order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, strum::Display)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum Step {
    Discover,
    IsolateWan,
    Bridge,
    BridgePorts,
    GatewayAddress,
    Pool,
    Dhcp,
    HotspotProfile,
    WalledGarden,
    Wireless,
    Nat,
    Firewall,
    Hotspot,
}

/// Whether a failed step aborts the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, strum::Display)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum Criticality {
    Critical,
    Advisory,
}

impl Step {
    pub const ALL: [Step; 13] = [
        Self::Discover,
        Self::IsolateWan,
        Self::Bridge,
        Self::BridgePorts,
        Self::GatewayAddress,
        Self::Pool,
        Self::Dhcp,
        Self::HotspotProfile,
        Self::WalledGarden,
        Self::Wireless,
        Self::Nat,
        Self::Firewall,
        Self::Hotspot,
    ];

    pub fn criticality(self) -> Criticality {
        match self {
            Self::WalledGarden | Self::Wireless => Criticality::Advisory,
            _ => Criticality::Critical,
        }
    }
}

/// What a step did to the device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case", tag = "status", content = "reason")]
pub enum StepStatus {
    Created,
    Updated,
    Unchanged,
    Skipped,
    Failed(String),
}

impl std::fmt::Display for StepStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Created => f.write_str("created"),
            Self::Updated => f.write_str("updated"),
            Self::Unchanged => f.write_str("unchanged"),
            Self::Skipped => f.write_str("skipped"),
            Self::Failed(reason) => write!(f, "failed: {reason}"),
        }
    }
}

impl StepStatus {
    /// Combine the outcomes of two sub-operations of one step.
    ///
    /// Failure wins, then creation, then update; `Skipped` only survives
    /// when nothing else happened.
    #[must_use]
    pub fn merge(self, other: Self) -> Self {
        fn rank(s: &StepStatus) -> u8 {
            match s {
                StepStatus::Failed(_) => 4,
                StepStatus::Created => 3,
                StepStatus::Updated => 2,
                StepStatus::Unchanged => 1,
                StepStatus::Skipped => 0,
            }
        }
        match (self, other) {
            (Self::Failed(a), Self::Failed(b)) => Self::Failed(format!("{a}; {b}")),
            (a, b) if rank(&a) >= rank(&b) => a,
            (_, b) => b,
        }
    }

    /// Whether the device was modified.
    pub fn changed(&self) -> bool {
        matches!(self, Self::Created | Self::Updated)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StepReport {
    pub step: Step,
    pub criticality: Criticality,
    #[serde(flatten)]
    pub status: StepStatus,
}

/// Per-step record of one provisioning run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProvisionReport {
    pub device: String,
    pub steps: Vec<StepReport>,
}

impl ProvisionReport {
    pub fn new(device: impl Into<String>) -> Self {
        Self {
            device: device.into(),
            steps: Vec::new(),
        }
    }

    pub(crate) fn record(&mut self, step: Step, status: StepStatus) {
        self.steps.push(StepReport {
            step,
            criticality: step.criticality(),
            status,
        });
    }

    pub fn status(&self, step: Step) -> Option<&StepStatus> {
        self.steps.iter().find(|s| s.step == step).map(|s| &s.status)
    }

    /// Advisory steps that failed; the run still completed.
    pub fn advisory_failures(&self) -> impl Iterator<Item = &StepReport> {
        self.steps
            .iter()
            .filter(|s| matches!(s.status, StepStatus::Failed(_)))
    }

    /// Number of steps that modified the device.
    pub fn changed(&self) -> usize {
        self.steps.iter().filter(|s| s.status.changed()).count()
    }
}
