//! Operator-facing actions.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::cluster::{ClusterAdminGateway, Confirmation, KickRequest, UnitMap};
use crate::config::CentralConfig;
use crate::deferred::{
    DeferredEvent, DeferredRestartScheduler, RestartSelector, RunReport, ServiceManager,
};
use crate::error::{Error, Result};
use crate::reconcile::{TlsMaterialSink, TlsRotationHook};
use crate::storage::CentralState;
use crate::types::{ClusterKind, ClusterStatus, ServerId, Unit};

/// One server in a formatted status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FormattedServer {
    #[serde(rename = "Address")]
    pub address: String,
    #[serde(rename = "Unit")]
    pub unit: String,
}

/// Status of one cluster as presented to the operator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FormattedStatus {
    #[serde(rename = "Cluster ID")]
    pub cluster_id: String,
    #[serde(rename = "Server ID")]
    pub server_id: String,
    #[serde(rename = "Address")]
    pub address: String,
    #[serde(rename = "Status")]
    pub status: String,
    #[serde(rename = "Role")]
    pub role: String,
    #[serde(rename = "Term")]
    pub term: u64,
    #[serde(rename = "Leader")]
    pub leader: Option<String>,
    #[serde(rename = "Vote")]
    pub vote: Option<String>,
    #[serde(rename = "Election timer")]
    pub election_timer: Option<u64>,
    #[serde(rename = "Log")]
    pub log: String,
    #[serde(rename = "Entries not yet committed")]
    pub entries_not_yet_committed: u64,
    #[serde(rename = "Entries not yet applied")]
    pub entries_not_yet_applied: u64,
    #[serde(rename = "Servers")]
    pub servers: BTreeMap<String, FormattedServer>,
    pub unit_map: UnitMap,
}

impl FormattedStatus {
    /// Format a status, associating servers with deployment units.
    pub fn new(status: &ClusterStatus, units: &[Unit]) -> Result<Self> {
        let unit_map = UnitMap::build(status, units).map_err(Error::StatusParsing)?;
        let servers = status
            .servers
            .iter()
            .map(|server| {
                (
                    server.server_id.to_string(),
                    FormattedServer {
                        address: server.address.clone(),
                        unit: unit_map.unit_for(&server.server_id).to_string(),
                    },
                )
            })
            .collect();

        Ok(Self {
            cluster_id: status.cluster_id.clone(),
            server_id: status.server_id.to_string(),
            address: status.address.clone(),
            status: status.status.clone(),
            role: status.role.to_string(),
            term: status.term,
            leader: status.leader.clone(),
            vote: status.vote.clone(),
            election_timer: status.election_timer_ms,
            log: status.log.clone(),
            entries_not_yet_committed: status.entries_not_yet_committed,
            entries_not_yet_applied: status.entries_not_yet_applied,
            servers,
            unit_map,
        })
    }
}

/// Result of `cluster-status`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClusterStatusReport {
    pub ovnsb: FormattedStatus,
    pub ovnnb: FormattedStatus,
}

/// `cluster-status`: status of both clusters with unit mapping.
pub fn cluster_status(
    gateway: &dyn ClusterAdminGateway,
    units: &[Unit],
) -> Result<ClusterStatusReport> {
    let sb = gateway.status(ClusterKind::Southbound)?;
    let nb = gateway.status(ClusterKind::Northbound)?;
    Ok(ClusterStatusReport {
        ovnsb: FormattedStatus::new(&sb, units)?,
        ovnnb: FormattedStatus::new(&nb, units)?,
    })
}

/// `cluster-kick`: remove members by server ID.
///
/// Fails before touching the cluster unless at least one ID is given and the
/// operator confirmed. Returns a message per kicked cluster.
pub fn cluster_kick(
    gateway: &mut dyn ClusterAdminGateway,
    sb_server_id: Option<&str>,
    nb_server_id: Option<&str>,
    i_really_mean_it: bool,
) -> Result<BTreeMap<ClusterKind, String>> {
    let targets: Vec<(ClusterKind, ServerId)> = [
        (ClusterKind::Southbound, sb_server_id),
        (ClusterKind::Northbound, nb_server_id),
    ]
    .into_iter()
    .filter_map(|(cluster, id)| {
        let id = id.map(str::trim).filter(|id| !id.is_empty())?;
        Some((cluster, ServerId::new(id)))
    })
    .collect();

    if targets.is_empty() {
        return Err(Error::Action(
            "At least one server ID to kick must be specified.".to_string(),
        ));
    }
    let confirmation = Confirmation::from_flag(i_really_mean_it).ok_or_else(|| {
        Error::Action("Kicking a cluster member requires 'i-really-mean-it'.".to_string())
    })?;

    let mut kicked = BTreeMap::new();
    let mut failures = Vec::new();
    for (cluster, server_id) in targets {
        let request = KickRequest::new(cluster, server_id, confirmation);
        match gateway.kick(&request) {
            Ok(()) => {
                tracing::info!(%cluster, server_id = %request.server_id(), "kick requested");
                kicked.insert(
                    cluster,
                    format!("requested kick of {}", request.server_id()),
                );
            }
            Err(err) => {
                tracing::error!(%cluster, server_id = %request.server_id(), error = %err, "kick failed");
                failures.push(format!(
                    "Failed to kick {} cluster member {}: {}",
                    cluster.display_name(),
                    request.server_id(),
                    err
                ));
            }
        }
    }

    if failures.is_empty() {
        Ok(kicked)
    } else {
        Err(Error::Action(failures.join("; ")))
    }
}

/// `restart-services`.
///
/// `deferred_only` releases queued restarts. Otherwise the services in
/// `service_list` are restarted now, or every managed service when the list is
/// empty. `deferred_only` with a list is refused. `run_hooks` runs deferred
/// hooks first.
pub fn restart_services(
    state: &mut CentralState,
    config: &CentralConfig,
    services: &mut dyn ServiceManager,
    tls: &mut dyn TlsMaterialSink,
    deferred_only: bool,
    service_list: &str,
    run_hooks: bool,
) -> Result<RunReport> {
    let selector = RestartSelector::parse(service_list);
    let CentralState {
        certificates,
        installed_tls,
        deferred,
        ..
    } = state;
    let mut scheduler = DeferredRestartScheduler::new(deferred, false);
    let mut hook = TlsRotationHook::new(certificates, installed_tls, tls);

    match (deferred_only, selector) {
        (true, RestartSelector::Services(_)) => Err(Error::Action(
            "Cannot set deferred-only and services".to_string(),
        )),
        (true, RestartSelector::All) => {
            Ok(scheduler.run_pending(&RestartSelector::All, run_hooks, services, &mut hook))
        }
        (false, selector) => {
            let names: Vec<String> = match selector {
                RestartSelector::All => config.services.clone(),
                RestartSelector::Services(names) => names.into_iter().collect(),
            };
            let mut report = if run_hooks {
                let none = RestartSelector::Services(Default::default());
                scheduler.run_pending(&none, true, services, &mut hook)
            } else {
                RunReport::default()
            };
            let restarted = scheduler.restart_now(&names, services);
            report.restarted.extend(restarted.restarted);
            report.failures.extend(restarted.failures);
            Ok(report)
        }
    }
}

/// `run-deferred-hooks`: run deferred hooks, then every queued restart,
/// regardless of the restart policy.
pub fn run_deferred_hooks(
    state: &mut CentralState,
    services: &mut dyn ServiceManager,
    tls: &mut dyn TlsMaterialSink,
) -> RunReport {
    let CentralState {
        certificates,
        installed_tls,
        deferred,
        ..
    } = state;
    let mut scheduler = DeferredRestartScheduler::new(deferred, false);
    let mut hook = TlsRotationHook::new(certificates, installed_tls, tls);
    scheduler.run_pending(&RestartSelector::All, true, services, &mut hook)
}

/// `show-deferred-events`.
pub fn show_deferred_events(state: &CentralState) -> Vec<DeferredEvent> {
    state.deferred.events().to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::deferred::DeferredAction;
    use crate::error::{GatewayError, RestartError, TlsInstallError};
    use crate::tls::{BundleParts, CertRole, CertificateBundle};
    use crate::types::{MemberRole, ServerEntry};
    use chrono::Utc;
    use pretty_assertions::assert_eq;

    #[derive(Default)]
    struct FakeServices {
        restarted: Vec<String>,
    }

    impl ServiceManager for FakeServices {
        fn restart(&mut self, service: &str) -> std::result::Result<(), RestartError> {
            self.restarted.push(service.to_string());
            Ok(())
        }
    }

    #[derive(Default)]
    struct FakeTls {
        installed: Vec<(CertRole, u64)>,
    }

    impl TlsMaterialSink for FakeTls {
        fn install(
            &mut self,
            role: CertRole,
            bundle: &CertificateBundle,
        ) -> std::result::Result<(), TlsInstallError> {
            self.installed.push((role, bundle.version()));
            Ok(())
        }
    }

    fn bundle(version: u64) -> CertificateBundle {
        BundleParts {
            private_key: Some("KEY".into()),
            certificate: Some(format!("CERT-{}", version)),
            ca: Some("CA".into()),
            chain: None,
            version: Some(version),
        }
        .assemble()
        .unwrap()
    }

    /// Queued northd restart and a pending rotation from v1 to v2.
    fn deferred_state() -> CentralState {
        let mut state = CentralState::default();
        state.certificates.update(CertRole::Server, bundle(2));
        state.installed_tls.insert(CertRole::Server, bundle(1));
        state
            .deferred
            .enqueue(DeferredAction::Restart, "ovn-northd", "configuration changed", Utc::now());
        state
            .deferred
            .enqueue(DeferredAction::Hook, "tls-rotation", "server certificate version 2", Utc::now());
        state
    }

    #[derive(Default)]
    struct FakeGateway {
        servers: Vec<ServerEntry>,
        kicks: Vec<(ClusterKind, String)>,
    }

    impl ClusterAdminGateway for FakeGateway {
        fn status(&self, cluster: ClusterKind) -> std::result::Result<ClusterStatus, GatewayError> {
            Ok(ClusterStatus {
                cluster_id: format!("{}-cid", cluster),
                server_id: ServerId::new("aa11"),
                address: "ssl:10.0.0.1:6644".into(),
                status: "cluster member".into(),
                role: MemberRole::Leader,
                term: 3,
                leader: Some("self".into()),
                election_timer_ms: Some(4000),
                servers: self.servers.clone(),
                ..Default::default()
            })
        }

        fn set_election_timer(&mut self, _: ClusterKind, _: u64) -> std::result::Result<(), GatewayError> {
            Ok(())
        }

        fn set_inactivity_probe(&mut self, _: ClusterKind, _: u64) -> std::result::Result<(), GatewayError> {
            Ok(())
        }

        fn kick(&mut self, request: &KickRequest) -> std::result::Result<(), GatewayError> {
            self.kicks
                .push((request.cluster(), request.server_id().to_string()));
            Ok(())
        }

        fn leave(&mut self, _: ClusterKind) -> std::result::Result<(), GatewayError> {
            Ok(())
        }
    }

    fn units() -> Vec<Unit> {
        vec![
            Unit::new("ovn-central/0", "10.0.0.1"),
            Unit::new("ovn-central/1", "10.0.0.2"),
        ]
    }

    #[test]
    fn test_cluster_status_maps_units() {
        let gateway = FakeGateway {
            servers: vec![
                ServerEntry::new("aa11", "ssl:10.0.0.1:6644"),
                ServerEntry::new("bb22", "ssl:10.0.0.2:6644"),
                ServerEntry::new("cc33", "ssl:10.0.0.3:6644"),
            ],
            ..Default::default()
        };
        let report = cluster_status(&gateway, &units()).unwrap();
        let json = serde_json::to_value(&report).unwrap();

        assert_eq!(
            json["ovnsb"]["unit_map"],
            serde_json::json!({
                "aa11": "ovn-central/0",
                "bb22": "ovn-central/1",
                "UNKNOWN": ["cc33"],
            })
        );
        assert_eq!(json["ovnnb"]["Servers"]["cc33"]["Unit"], "UNKNOWN");
        assert_eq!(json["ovnsb"]["Role"], "leader");
        assert_eq!(json["ovnsb"]["Election timer"], 4000);
    }

    #[test]
    fn test_cluster_status_rejects_bad_address() {
        let gateway = FakeGateway {
            servers: vec![ServerEntry::new("ffff", "987dajSA")],
            ..Default::default()
        };
        let err = cluster_status(&gateway, &units()).unwrap_err();
        assert!(err
            .to_string()
            .starts_with("Failed to parse OVN cluster status."));
    }

    #[test]
    fn test_kick_without_confirmation_never_calls_gateway() {
        let mut gateway = FakeGateway::default();
        let err = cluster_kick(&mut gateway, Some("cc33"), None, false).unwrap_err();
        assert!(matches!(err, Error::Action(_)));
        assert!(gateway.kicks.is_empty());
    }

    #[test]
    fn test_kick_requires_an_id() {
        let mut gateway = FakeGateway::default();
        assert!(cluster_kick(&mut gateway, Some(""), None, true).is_err());
        assert!(gateway.kicks.is_empty());
    }

    #[test]
    fn test_kick_both_clusters() {
        let mut gateway = FakeGateway::default();
        let kicked = cluster_kick(&mut gateway, Some("cc33"), Some("dd44"), true).unwrap();
        assert_eq!(kicked.len(), 2);
        assert_eq!(
            gateway.kicks,
            vec![
                (ClusterKind::Southbound, "cc33".to_string()),
                (ClusterKind::Northbound, "dd44".to_string()),
            ]
        );
    }

    #[test]
    fn test_restart_deferred_only() {
        let mut state = deferred_state();
        let (mut services, mut tls) = (FakeServices::default(), FakeTls::default());
        let config = CentralConfig::default();

        let report =
            restart_services(&mut state, &config, &mut services, &mut tls, true, "", false).unwrap();
        assert_eq!(report.restarted, vec!["ovn-northd".to_string()]);
        assert!(report.hooks_run.is_empty());
        assert!(tls.installed.is_empty());
        assert_eq!(state.deferred.targets(DeferredAction::Hook), vec!["tls-rotation".to_string()]);
        assert!(state.deferred.targets(DeferredAction::Restart).is_empty());

        let err = restart_services(&mut state, &config, &mut services, &mut tls, true, "ovn-northd", false)
            .unwrap_err();
        assert!(matches!(err, Error::Action(_)));
    }

    #[test]
    fn test_restart_listed_services() {
        let mut state = deferred_state();
        let (mut services, mut tls) = (FakeServices::default(), FakeTls::default());

        let report = restart_services(
            &mut state,
            &CentralConfig::default(),
            &mut services,
            &mut tls,
            false,
            "ovn-northd, ovn-ovsdb-server-sb",
            false,
        )
        .unwrap();
        assert_eq!(
            services.restarted,
            vec!["ovn-northd".to_string(), "ovn-ovsdb-server-sb".to_string()]
        );
        assert!(report.is_success());
        assert!(!state.deferred.contains(DeferredAction::Restart, "ovn-northd"));
        assert!(state.deferred.contains(DeferredAction::Hook, "tls-rotation"));
    }

    #[test]
    fn test_restart_empty_list_means_all_managed() {
        let mut state = CentralState::default();
        let (mut services, mut tls) = (FakeServices::default(), FakeTls::default());
        let config = CentralConfig::default().with_services(["ovn-northd", "ovn-ovsdb-server-nb"]);

        let report =
            restart_services(&mut state, &config, &mut services, &mut tls, false, " ", false).unwrap();
        assert_eq!(
            report.restarted,
            vec!["ovn-northd".to_string(), "ovn-ovsdb-server-nb".to_string()]
        );
    }

    #[test]
    fn test_restart_runs_hooks_first() {
        let mut state = deferred_state();
        let (mut services, mut tls) = (FakeServices::default(), FakeTls::default());

        let report = restart_services(
            &mut state,
            &CentralConfig::default(),
            &mut services,
            &mut tls,
            false,
            "ovn-ovsdb-server-nb",
            true,
        )
        .unwrap();
        assert_eq!(report.hooks_run, vec!["tls-rotation".to_string()]);
        assert_eq!(tls.installed, vec![(CertRole::Server, 2)]);
        assert_eq!(services.restarted, vec!["ovn-ovsdb-server-nb".to_string()]);
        // Only the listed service; the queued northd restart waits.
        assert!(state.deferred.contains(DeferredAction::Restart, "ovn-northd"));
        assert_eq!(state.installed_tls[&CertRole::Server].version(), 2);
    }
}
