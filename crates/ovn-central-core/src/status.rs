//! Unit-level status derived from a pass, and database health checks.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::cluster::BootstrapState;
use crate::config::CentralConfig;
use crate::deferred::{DeferredAction, DeferredQueue};
use crate::error::GatewayError;
use crate::observe::Observations;
use crate::storage::CentralState;
use crate::tls::CertRole;
use crate::types::{ClusterKind, ClusterStatus};

/// Workload state reported to the operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkloadState {
    Active,
    Blocked,
    Waiting,
    Maintenance,
}

impl fmt::Display for WorkloadState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkloadState::Active => write!(f, "active"),
            WorkloadState::Blocked => write!(f, "blocked"),
            WorkloadState::Waiting => write!(f, "waiting"),
            WorkloadState::Maintenance => write!(f, "maintenance"),
        }
    }
}

/// Workload state with its message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkloadStatus {
    pub state: WorkloadState,
    pub message: String,
}

impl WorkloadStatus {
    fn new(state: WorkloadState, message: impl Into<String>) -> Self {
        Self {
            state,
            message: message.into(),
        }
    }
}

impl fmt::Display for WorkloadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.state, self.message)
    }
}

/// Derive the workload status. The first matching rule wins.
pub fn assess(
    config: &CentralConfig,
    observations: Option<&Observations>,
    state: &CentralState,
    statuses: &[(ClusterKind, Result<ClusterStatus, GatewayError>)],
) -> WorkloadStatus {
    if let Err(err) = config.validate() {
        return WorkloadStatus::new(
            WorkloadState::Blocked,
            format!("Invalid configuration: {}.", err),
        );
    }

    let Some(obs) = observations else {
        return WorkloadStatus::new(WorkloadState::Waiting, "Waiting for unit information");
    };

    if obs.peers.is_empty() {
        return WorkloadStatus::new(
            WorkloadState::Blocked,
            "Requires peers to operate, add more units. A minimum of 3 is required for HA",
        );
    }

    if !obs.certificates_requested && state.certificates.cluster_bundle().is_none() {
        return WorkloadStatus::new(WorkloadState::Blocked, "'certificates' missing");
    }
    if state.certificates.current(CertRole::Server).is_none() {
        return WorkloadStatus::new(
            WorkloadState::Waiting,
            "'certificates' awaiting server certificate data",
        );
    }

    for cluster in ClusterKind::ALL {
        if let Some(BootstrapState::Failed { reason, .. }) =
            state.cluster(cluster).map(|p| &p.bootstrap)
        {
            return WorkloadStatus::new(
                WorkloadState::Blocked,
                format!("{} cluster bootstrap failed: {}", cluster.display_name(), reason),
            );
        }
    }

    let unjoined: Vec<&str> = ClusterKind::ALL
        .iter()
        .filter(|c| !state.is_joined(**c))
        .map(|c| c.db_name())
        .collect();
    if !unjoined.is_empty() {
        return WorkloadStatus::new(
            WorkloadState::Waiting,
            format!("Waiting for cluster membership: {}", unjoined.join(", ")),
        );
    }

    if let Some(message) = deferred_message(&state.deferred) {
        return WorkloadStatus::new(WorkloadState::Active, message);
    }

    let message = cluster_message(statuses, obs.northd_active);
    if message.is_empty() {
        WorkloadStatus::new(WorkloadState::Active, "Unit is ready")
    } else {
        WorkloadStatus::new(WorkloadState::Active, format!("Unit is ready ({})", message))
    }
}

/// Summary of queued events, if any.
pub fn deferred_message(queue: &DeferredQueue) -> Option<String> {
    let mut parts = Vec::new();

    let mut services = queue.targets(DeferredAction::Restart);
    if !services.is_empty() {
        services.sort();
        parts.push(format!("Services queued for restart: {}", services.join(", ")));
    }
    let mut hooks = queue.targets(DeferredAction::Hook);
    if !hooks.is_empty() {
        hooks.sort();
        parts.push(format!(
            "Hooks skipped due to disabled auto restarts: {}",
            hooks.join(", ")
        ));
    }

    (!parts.is_empty()).then(|| parts.join(". "))
}

/// Leadership and northd summary, e.g. `leader: ovnnb_db northd: active`.
pub fn cluster_message(
    statuses: &[(ClusterKind, Result<ClusterStatus, GatewayError>)],
    northd_active: Option<bool>,
) -> String {
    let leading: Vec<&str> = statuses
        .iter()
        .filter(|(_, s)| s.as_ref().map(ClusterStatus::is_leader).unwrap_or(false))
        .map(|(c, _)| c.db_name())
        .collect();

    let mut msg = Vec::new();
    if !leading.is_empty() {
        msg.push(format!("leader: {}", leading.join(", ")));
    }
    if northd_active == Some(true) {
        msg.push("northd: active".to_string());
    }
    msg.join(" ")
}

/// Health of one clustered database.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DbHealth {
    Ok,
    Warning,
    Critical,
}

impl DbHealth {
    /// Classify the `Status` line of a cluster status report.
    pub fn classify(status: &str) -> Self {
        match status.trim() {
            "cluster member" => DbHealth::Ok,
            "joining cluster" | "leaving cluster" => DbHealth::Warning,
            _ => DbHealth::Critical,
        }
    }

    /// Monitoring plugin exit code.
    pub fn exit_code(&self) -> u8 {
        match self {
            DbHealth::Ok => 0,
            DbHealth::Warning => 1,
            DbHealth::Critical => 2,
        }
    }

    /// Check result for one database, with a monitoring-style message.
    pub fn check(
        cluster: ClusterKind,
        status: &Result<ClusterStatus, GatewayError>,
    ) -> (DbHealth, String) {
        match status {
            Ok(status) => match DbHealth::classify(&status.status) {
                DbHealth::Ok => (
                    DbHealth::Ok,
                    format!("OK: OVN {} database is OK", cluster.short_name()),
                ),
                health => (
                    health,
                    format!(
                        "{}: cluster status for {} db is {}",
                        health,
                        cluster.short_name(),
                        status.status
                    ),
                ),
            },
            Err(err) => (DbHealth::Critical, format!("CRITICAL: {}", err)),
        }
    }
}

impl fmt::Display for DbHealth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DbHealth::Ok => write!(f, "OK"),
            DbHealth::Warning => write!(f, "WARNING"),
            DbHealth::Critical => write!(f, "CRITICAL"),
        }
    }
}
