//! The reconcile pass.
//!
//! [`reconcile`] is the single entry point the surrounding runtime invokes. It
//! may be called any number of times; with unchanged observations a second
//! pass performs no side effects.
//!
//! One pass, in order:
//! 1. validate observations, absorb certificates, query cluster status
//! 2. bootstrap every cluster the local member has not joined
//! 3. step election timer and inactivity probe (leader only)
//! 4. install rotated TLS material and route restarts through the scheduler
//! 5. derive the workload status

use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;

use crate::cluster::{
    is_server_in_cluster, reconcile_inactivity_probe, BootstrapContext, BootstrapOutcome, ClusterAdminGateway,
    ClusterBootstrapper, ClusterDatabase, ClusterMembershipModel, ElectionTimerReconciler,
    MembershipDelta, ProbeOutcome, TimerOutcome,
};
use crate::config::CentralConfig;
use crate::deferred::{
    ChangeDisposition, DeferredAction, DeferredRestartScheduler, HookRunner, RestartSelector,
    RunReport, ServiceManager, TLS_ROTATION_HOOK,
};
use crate::error::{GatewayError, ReconcileError, RestartError, TlsInstallError};
use crate::observe::RawObservations;
use crate::status::{self, WorkloadState, WorkloadStatus};
use crate::storage::CentralState;
use crate::tls::{CertRole, CertificateBundle, CertificateStore};
use crate::types::{ClusterKind, ClusterStatus};

/// Writes TLS material where the services read it.
pub trait TlsMaterialSink {
    /// Replace the material for `role`. Must not leave partial files behind.
    fn install(&mut self, role: CertRole, bundle: &CertificateBundle)
        -> Result<(), TlsInstallError>;
}

/// External collaborators used by a pass.
pub struct Collaborators<'a> {
    pub gateway: &'a mut dyn ClusterAdminGateway,
    pub database: &'a mut dyn ClusterDatabase,
    pub services: &'a mut dyn ServiceManager,
    pub tls: &'a mut dyn TlsMaterialSink,
}

/// A side effect performed during a pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "effect", rename_all = "kebab-case")]
pub enum SideEffect {
    ClusterCreated {
        cluster: ClusterKind,
    },
    JoinRequested {
        cluster: ClusterKind,
    },
    ElectionTimerStep {
        cluster: ClusterKind,
        from_ms: u64,
        to_ms: u64,
    },
    InactivityProbeSet {
        cluster: ClusterKind,
        probe_ms: u64,
    },
    TlsInstalled {
        role: CertRole,
        version: u64,
    },
    ServiceRestarted {
        service: String,
    },
    HookRun {
        hook: String,
    },
    Deferred {
        action: DeferredAction,
        target: String,
    },
}

impl fmt::Display for SideEffect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SideEffect::ClusterCreated { cluster } => write!(f, "created {} cluster", cluster),
            SideEffect::JoinRequested { cluster } => write!(f, "requested join of {} cluster", cluster),
            SideEffect::ElectionTimerStep {
                cluster,
                from_ms,
                to_ms,
            } => write!(f, "{} election timer {} ms -> {} ms", cluster, from_ms, to_ms),
            SideEffect::InactivityProbeSet { cluster, probe_ms } => {
                write!(f, "{} inactivity probe set to {} ms", cluster, probe_ms)
            }
            SideEffect::TlsInstalled { role, version } => {
                write!(f, "installed {} TLS material version {}", role, version)
            }
            SideEffect::ServiceRestarted { service } => write!(f, "restarted {}", service),
            SideEffect::HookRun { hook } => write!(f, "ran hook {}", hook),
            SideEffect::Deferred { action, target } => write!(f, "deferred {} of {}", action, target),
        }
    }
}

/// Everything a pass did and found.
#[derive(Debug, Clone, Serialize)]
pub struct PassReport {
    pub effects: Vec<SideEffect>,
    pub problems: Vec<ReconcileError>,
    pub membership: BTreeMap<ClusterKind, MembershipDelta>,
    pub workload: WorkloadStatus,
    /// The designated first member joined both clusters; announce readiness.
    pub publish_ready: bool,
    /// Address clients should use to reach this unit.
    pub client_address: Option<String>,
}

impl Default for PassReport {
    fn default() -> Self {
        Self {
            effects: Vec::new(),
            problems: Vec::new(),
            membership: BTreeMap::new(),
            workload: WorkloadStatus {
                state: WorkloadState::Maintenance,
                message: String::new(),
            },
            publish_ready: false,
            client_address: None,
        }
    }
}

impl PassReport {
    /// Whether the pass changed anything outside its own state.
    pub fn has_side_effects(&self) -> bool {
        !self.effects.is_empty()
    }

    fn absorb_run(&mut self, run: RunReport) {
        self.effects
            .extend(run.hooks_run.into_iter().map(|hook| SideEffect::HookRun { hook }));
        self.effects.extend(
            run.restarted
                .into_iter()
                .map(|service| SideEffect::ServiceRestarted { service }),
        );
        self.problems
            .extend(run.failures.into_iter().map(ReconcileError::from));
    }
}

/// Run one reconcile pass.
pub fn reconcile(
    state: &mut CentralState,
    config: &CentralConfig,
    raw: RawObservations,
    io: &mut Collaborators<'_>,
) -> PassReport {
    let mut report = PassReport::default();

    let config_valid = match config.validate() {
        Ok(()) => true,
        Err(err) => {
            tracing::error!(error = %err, "invalid configuration, runtime parameters left alone");
            report
                .problems
                .push(ReconcileError::NotReady(format!("invalid configuration: {}", err)));
            false
        }
    };

    // 1. Observations.
    let observations = match raw.validate() {
        Ok(observations) => observations,
        Err(err) => {
            tracing::debug!(error = %err, "observations incomplete");
            report.problems.push(err);
            report.workload = status::assess(config, None, state, &[]);
            return report;
        }
    };
    report.problems.extend(observations.not_ready.iter().cloned());

    for (role, bundle) in &observations.certificates {
        state.certificates.update(*role, bundle.clone());
    }

    let statuses: Vec<(ClusterKind, Result<ClusterStatus, GatewayError>)> = ClusterKind::ALL
        .iter()
        .map(|cluster| (*cluster, io.gateway.status(*cluster)))
        .collect();

    let units = observations.all_units();
    for (cluster, status) in &statuses {
        let Ok(status) = status else { continue };
        let delta = ClusterMembershipModel::observe(&units, &status.servers);
        for orphan in delta.orphans() {
            tracing::warn!(
                %cluster,
                address = %orphan.address,
                server_id = ?orphan.server_id,
                "cluster member has no unit, remove it with cluster-kick if it is gone"
            );
        }
        report.membership.insert(*cluster, delta);
    }

    // 2. Bootstrap.
    let peers = observations.member_peers();
    let cluster_certificate = state.certificates.cluster_bundle().cloned();
    let ctx = BootstrapContext {
        local: &observations.local,
        peers: &peers,
        designated_first: observations.is_designated_first(),
        cluster_ready: observations.cluster_ready,
        certificate: cluster_certificate.as_ref(),
        max_attempts: config.max_join_attempts.max(1),
    };

    for (cluster, status) in &statuses {
        let progress = state.clusters.entry(*cluster).or_default();
        if progress.bootstrap.is_joined() {
            if let Err(err) = status {
                tracing::warn!(%cluster, error = %err, "joined cluster is unreachable");
                report
                    .problems
                    .push(ReconcileError::Unreachable(err.to_string()));
            }
            continue;
        }

        let outcome = ClusterBootstrapper::new(*cluster).step(
            &mut progress.bootstrap,
            &ctx,
            status.as_ref(),
            &mut *io.database,
        );
        match outcome {
            BootstrapOutcome::Created => report
                .effects
                .push(SideEffect::ClusterCreated { cluster: *cluster }),
            BootstrapOutcome::JoinRequested => report
                .effects
                .push(SideEffect::JoinRequested { cluster: *cluster }),
            BootstrapOutcome::NotReady(reason) => report
                .problems
                .push(ReconcileError::NotReady(format!("{}: {}", cluster, reason))),
            BootstrapOutcome::AwaitingMembership => report.problems.push(
                ReconcileError::NotReady(format!("{}: waiting for cluster membership", cluster)),
            ),
            BootstrapOutcome::Retrying { attempt, reason } => {
                report.problems.push(ReconcileError::NotReady(format!(
                    "{}: join attempt {} failed: {}",
                    cluster, attempt, reason
                )))
            }
            BootstrapOutcome::Failed { reason } | BootstrapOutcome::StillFailed { reason } => {
                report.problems.push(ReconcileError::Rejected(format!(
                    "{}: bootstrap failed: {}",
                    cluster, reason
                )))
            }
            BootstrapOutcome::Joined { .. } | BootstrapOutcome::AlreadyJoined => {}
        }
    }

    // 3. Runtime parameters.
    if config_valid {
        let reconciler = ElectionTimerReconciler::default();
        for (cluster, status) in &statuses {
            let Ok(status) = status else { continue };
            let progress = state.clusters.entry(*cluster).or_default();
            if !progress.bootstrap.is_joined() {
                continue;
            }

            match reconciler.advance(
                *cluster,
                status,
                config.election_timer_ms(),
                &mut progress.election_timer,
                &mut *io.gateway,
            ) {
                TimerOutcome::Applied { from_ms, to_ms } => {
                    report.effects.push(SideEffect::ElectionTimerStep {
                        cluster: *cluster,
                        from_ms,
                        to_ms,
                    })
                }
                TimerOutcome::Rejected { to_ms, reason } => {
                    report.problems.push(ReconcileError::Rejected(format!(
                        "{}: election timer step to {} ms: {}",
                        cluster, to_ms, reason
                    )))
                }
                TimerOutcome::Unreachable(reason) => report
                    .problems
                    .push(ReconcileError::Unreachable(format!("{}: {}", cluster, reason))),
                TimerOutcome::NotLeader
                | TimerOutcome::Unknown
                | TimerOutcome::Converged
                | TimerOutcome::Awaiting { .. } => {}
            }

            match reconcile_inactivity_probe(
                *cluster,
                status,
                config.inactivity_probe_ms(),
                &mut progress.applied_probe_ms,
                &mut *io.gateway,
            ) {
                ProbeOutcome::Applied { to_ms } => {
                    report.effects.push(SideEffect::InactivityProbeSet {
                        cluster: *cluster,
                        probe_ms: to_ms,
                    })
                }
                ProbeOutcome::Rejected { reason } => report.problems.push(
                    ReconcileError::Rejected(format!("{}: inactivity probe: {}", cluster, reason)),
                ),
                ProbeOutcome::Unreachable(reason) => report
                    .problems
                    .push(ReconcileError::Unreachable(format!("{}: {}", cluster, reason))),
                ProbeOutcome::NotLeader | ProbeOutcome::Converged => {}
            }
        }
    }

    // 4. TLS rotation and restarts.
    let auto_restart = config.enable_auto_restarts;
    let re_enabled = auto_restart && state.auto_restarts_last_seen == Some(false);
    state.auto_restarts_last_seen = Some(auto_restart);

    let CentralState {
        certificates,
        installed_tls,
        deferred,
        config_digests,
        ..
    } = state;
    let mut scheduler = DeferredRestartScheduler::new(deferred, auto_restart);

    if re_enabled && !scheduler.list_pending().is_empty() {
        tracing::info!("automatic restarts enabled again, releasing deferred events");
        let mut hook = TlsRotationHook::new(certificates, installed_tls, &mut *io.tls);
        let run = scheduler.run_pending(&RestartSelector::All, true, &mut *io.services, &mut hook);
        let installed = std::mem::take(&mut hook.installed_now);
        report.effects.extend(
            installed
                .into_iter()
                .map(|(role, version)| SideEffect::TlsInstalled { role, version }),
        );
        report.absorb_run(run);
    }

    let mut changes: Vec<(String, String)> = Vec::new();
    let mut note_change = |service: &str, reason: String| {
        if !changes.iter().any(|(s, _)| s == service) {
            changes.push((service.to_string(), reason));
        }
    };

    for (role, bundle) in pending_tls(certificates, installed_tls) {
        let version = bundle.version();
        let unchanged = installed_tls
            .get(&role)
            .is_some_and(|current| !bundle.material_differs(current));
        if unchanged {
            tracing::debug!(%role, version, "certificate reissued with identical material");
            installed_tls.insert(role, bundle);
            continue;
        }
        let first_install = !installed_tls.contains_key(&role);
        if auto_restart || first_install {
            match io.tls.install(role, &bundle) {
                Ok(()) => {
                    tracing::info!(
                        %role,
                        version,
                        fingerprint = %bundle.fingerprint(),
                        "TLS material installed"
                    );
                    installed_tls.insert(role, bundle.clone());
                    report
                        .effects
                        .push(SideEffect::TlsInstalled { role, version });
                }
                Err(err) => {
                    tracing::error!(%role, version, error = %err, "TLS installation failed");
                    report
                        .problems
                        .push(ReconcileError::RestartFailure(err.to_string()));
                    continue;
                }
            }
        } else if scheduler.defer_hook(
            TLS_ROTATION_HOOK,
            &format!("{} certificate version {}", role, version),
        ) {
            report.effects.push(SideEffect::Deferred {
                action: DeferredAction::Hook,
                target: TLS_ROTATION_HOOK.to_string(),
            });
        }
        for service in config.tls_services() {
            note_change(service, format!("{} certificate version {}", role, version));
        }
    }

    for (service, digest) in &observations.config_digests {
        match config_digests.insert(service.clone(), digest.clone()) {
            Some(previous) if previous != *digest => {
                note_change(service, "configuration changed".to_string())
            }
            _ => {}
        }
    }

    for (service, reason) in changes {
        match scheduler.on_config_change(&service, &reason, &mut *io.services) {
            ChangeDisposition::Restarted => {
                report.effects.push(SideEffect::ServiceRestarted { service })
            }
            ChangeDisposition::Queued { new_entry: true } => {
                report.effects.push(SideEffect::Deferred {
                    action: DeferredAction::Restart,
                    target: service,
                })
            }
            ChangeDisposition::Queued { new_entry: false } => {}
            ChangeDisposition::RestartFailed(err) => report.problems.push(err.into()),
        }
    }

    // 5. Status.
    let both_joined = ClusterKind::ALL.iter().all(|c| state.is_joined(*c));
    report.publish_ready = both_joined && observations.is_designated_first();
    report.client_address = both_joined.then(|| observations.local.address.clone());
    report.workload = status::assess(config, Some(&observations), state, &statuses);

    tracing::info!(
        effects = report.effects.len(),
        problems = report.problems.len(),
        workload = %report.workload,
        "reconcile pass complete"
    );
    report
}

/// Bundles whose version is newer than what is installed.
pub fn pending_tls(
    certificates: &CertificateStore,
    installed: &BTreeMap<CertRole, CertificateBundle>,
) -> Vec<(CertRole, CertificateBundle)> {
    [CertRole::Server, CertRole::Peer]
        .into_iter()
        .filter_map(|role| {
            let bundle = certificates.current(role)?;
            let stale = installed
                .get(&role)
                .map_or(true, |current| current.version() < bundle.version());
            stale.then(|| (role, bundle.clone()))
        })
        .collect()
}

/// Runs the deferred `tls-rotation` hook: installs every pending bundle.
pub struct TlsRotationHook<'a> {
    certificates: &'a CertificateStore,
    installed: &'a mut BTreeMap<CertRole, CertificateBundle>,
    sink: &'a mut dyn TlsMaterialSink,
    /// Bundles installed by this runner.
    pub installed_now: Vec<(CertRole, u64)>,
}

impl<'a> TlsRotationHook<'a> {
    pub fn new(
        certificates: &'a CertificateStore,
        installed: &'a mut BTreeMap<CertRole, CertificateBundle>,
        sink: &'a mut dyn TlsMaterialSink,
    ) -> Self {
        Self {
            certificates,
            installed,
            sink,
            installed_now: Vec::new(),
        }
    }
}

impl HookRunner for TlsRotationHook<'_> {
    fn run_hook(&mut self, hook: &str) -> Result<(), RestartError> {
        if hook != TLS_ROTATION_HOOK {
            return Err(RestartError::new(hook, "unknown hook"));
        }
        for (role, bundle) in pending_tls(self.certificates, self.installed) {
            let unchanged = self
                .installed
                .get(&role)
                .is_some_and(|current| !bundle.material_differs(current));
            if !unchanged {
                self.sink
                    .install(role, &bundle)
                    .map_err(|err| RestartError::new(hook, err.to_string()))?;
                tracing::info!(%role, version = bundle.version(), "deferred TLS material installed");
                self.installed_now.push((role, bundle.version()));
            }
            self.installed.insert(role, bundle);
        }
        Ok(())
    }
}

/// Leave both clusters before the unit goes away.
///
/// With `local_host` known, a cluster that no longer lists it is skipped.
/// Failures never abort; the member then has to be kicked from a remaining unit.
pub fn depart(
    gateway: &mut dyn ClusterAdminGateway,
    local_host: Option<&str>,
) -> Vec<ReconcileError> {
    let mut problems = Vec::new();
    for cluster in ClusterKind::ALL {
        if let Some(host) = local_host {
            if let Ok(status) = gateway.status(cluster) {
                if !is_server_in_cluster(host, &status) {
                    tracing::info!(%cluster, %host, "not a cluster member, nothing to leave");
                    continue;
                }
            }
        }
        match gateway.leave(cluster) {
            Ok(()) => tracing::info!(%cluster, "left cluster"),
            Err(err) => {
                tracing::warn!(
                    %cluster,
                    error = %err,
                    "unable to leave cluster, run cluster-kick from a remaining unit"
                );
                problems.push(ReconcileError::from(err));
            }
        }
    }
    problems
}
