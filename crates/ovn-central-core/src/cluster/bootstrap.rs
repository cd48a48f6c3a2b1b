//! Bringing the local unit into each cluster.
//!
//! Per cluster the local member moves through
//! `Uninitialized -> Initializing | Joining -> Joined`, or into `Failed` once a
//! non-retryable error occurs or the attempt budget runs out. `Failed` is left
//! again as soon as the prerequisites (certificate, peer addresses) change.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{GatewayError, JoinError};
use crate::tls::CertificateBundle;
use crate::types::{ClusterKind, ClusterStatus, ServerId, Unit};

/// On-disk cluster database handle of the local unit.
pub trait ClusterDatabase {
    /// Server ID recorded in the local database file, if one exists.
    fn server_id(&self, cluster: ClusterKind) -> Option<ServerId>;

    /// Create a fresh single-member cluster database.
    fn create_cluster(&mut self, cluster: ClusterKind, local: &str) -> Result<(), JoinError>;

    /// Create a database that joins an existing cluster through `remotes`.
    fn join_cluster(
        &mut self,
        cluster: ClusterKind,
        local: &str,
        remotes: &[String],
    ) -> Result<(), JoinError>;
}

/// Bootstrap state of the local member of one cluster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "state", rename_all = "kebab-case")]
pub enum BootstrapState {
    #[default]
    Uninitialized,
    Initializing {
        attempts: u32,
    },
    Joining {
        attempts: u32,
    },
    Joined {
        server_id: ServerId,
    },
    Failed {
        reason: String,
        /// Prerequisites in effect when the failure happened.
        prerequisites: String,
    },
}

impl BootstrapState {
    /// Whether the member is confirmed part of the cluster.
    pub fn is_joined(&self) -> bool {
        matches!(self, BootstrapState::Joined { .. })
    }

    fn attempts(&self) -> u32 {
        match self {
            BootstrapState::Initializing { attempts } | BootstrapState::Joining { attempts } => {
                *attempts
            }
            _ => 0,
        }
    }
}

impl fmt::Display for BootstrapState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BootstrapState::Uninitialized => write!(f, "uninitialized"),
            BootstrapState::Initializing { .. } => write!(f, "initializing"),
            BootstrapState::Joining { .. } => write!(f, "joining"),
            BootstrapState::Joined { server_id } => write!(f, "joined ({})", server_id),
            BootstrapState::Failed { reason, .. } => write!(f, "failed: {}", reason),
        }
    }
}

/// Inputs for one bootstrap step.
#[derive(Debug, Clone, Copy)]
pub struct BootstrapContext<'a> {
    /// The local unit.
    pub local: &'a Unit,
    /// Other member-hosting units with known addresses.
    pub peers: &'a [Unit],
    /// Local unit is the lowest-ranked member-hosting unit.
    pub designated_first: bool,
    /// An established cluster has been announced.
    pub cluster_ready: bool,
    /// Certificate securing cluster traffic.
    pub certificate: Option<&'a CertificateBundle>,
    /// Attempt budget before the member is marked failed.
    pub max_attempts: u32,
}

impl BootstrapContext<'_> {
    /// Fingerprint of the prerequisites, used to leave `Failed`.
    pub fn prerequisites(&self) -> String {
        let mut peers: Vec<&str> = self.peers.iter().map(|p| p.address.as_str()).collect();
        peers.sort_unstable();
        format!(
            "cert={};peers={}",
            self.certificate
                .map(|c| c.version().to_string())
                .unwrap_or_else(|| "none".to_string()),
            peers.join(",")
        )
    }
}

/// What one bootstrap step did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BootstrapOutcome {
    /// Already joined; nothing to do.
    AlreadyJoined,
    /// Membership confirmed during this step.
    Joined { server_id: ServerId },
    /// Database exists; waiting for the cluster to list the local server.
    AwaitingMembership,
    /// A prerequisite is missing.
    NotReady(String),
    /// A fresh cluster database was created.
    Created,
    /// A join database was created.
    JoinRequested,
    /// An attempt failed with a retryable error.
    Retrying { attempt: u32, reason: String },
    /// The member entered `Failed` during this step.
    Failed { reason: String },
    /// The member stays `Failed`; prerequisites are unchanged.
    StillFailed { reason: String },
}

impl BootstrapOutcome {
    /// Whether this step wrote to the local database.
    pub fn is_mutation(&self) -> bool {
        matches!(
            self,
            BootstrapOutcome::Created | BootstrapOutcome::JoinRequested
        )
    }
}

/// Drives one cluster's bootstrap state machine.
pub struct ClusterBootstrapper {
    cluster: ClusterKind,
}

impl ClusterBootstrapper {
    /// Create a bootstrapper for `cluster`.
    pub fn new(cluster: ClusterKind) -> Self {
        Self { cluster }
    }

    /// Advance the state machine by one step.
    pub fn step(
        &self,
        state: &mut BootstrapState,
        ctx: &BootstrapContext<'_>,
        status: Result<&ClusterStatus, &GatewayError>,
        db: &mut dyn ClusterDatabase,
    ) -> BootstrapOutcome {
        let cluster = self.cluster;

        match state {
            BootstrapState::Joined { .. } => return BootstrapOutcome::AlreadyJoined,
            BootstrapState::Failed {
                reason,
                prerequisites,
            } => {
                if *prerequisites == ctx.prerequisites() {
                    return BootstrapOutcome::StillFailed {
                        reason: reason.clone(),
                    };
                }
                tracing::info!(%cluster, "prerequisites changed, retrying bootstrap");
                *state = BootstrapState::Uninitialized;
            }
            _ => {}
        }

        if let Some(server_id) = db.server_id(cluster) {
            return self.confirm(state, server_id, status);
        }

        let local = cluster.connection_string(&ctx.local.address);
        let attempts = state.attempts() + 1;

        let result = if ctx.designated_first && !ctx.cluster_ready {
            tracing::info!(%cluster, %local, "initializing new cluster");
            *state = BootstrapState::Initializing {
                attempts: attempts - 1,
            };
            db.create_cluster(cluster, &local)
                .map(|()| BootstrapOutcome::Created)
        } else {
            if !ctx.cluster_ready {
                return BootstrapOutcome::NotReady(
                    "waiting for the first member to initialize the cluster".to_string(),
                );
            }
            if ctx.peers.is_empty() {
                return BootstrapOutcome::NotReady("no peer addresses available".to_string());
            }
            if ctx.certificate.is_none() {
                return BootstrapOutcome::NotReady("no certificate available".to_string());
            }
            let remotes: Vec<String> = ctx
                .peers
                .iter()
                .map(|p| cluster.connection_string(&p.address))
                .collect();
            tracing::info!(%cluster, %local, remotes = ?remotes, "joining cluster");
            *state = BootstrapState::Joining {
                attempts: attempts - 1,
            };
            db.join_cluster(cluster, &local, &remotes)
                .map(|()| BootstrapOutcome::JoinRequested)
        };

        match result {
            Ok(outcome) => {
                set_attempts(state, attempts);
                outcome
            }
            Err(err) if err.is_retryable() && attempts < ctx.max_attempts => {
                tracing::warn!(%cluster, attempt = attempts, error = %err, "bootstrap attempt failed");
                set_attempts(state, attempts);
                BootstrapOutcome::Retrying {
                    attempt: attempts,
                    reason: err.to_string(),
                }
            }
            Err(err) => {
                tracing::error!(%cluster, attempt = attempts, error = %err, "bootstrap failed");
                let reason = err.to_string();
                *state = BootstrapState::Failed {
                    reason: reason.clone(),
                    prerequisites: ctx.prerequisites(),
                };
                BootstrapOutcome::Failed { reason }
            }
        }
    }

    fn confirm(
        &self,
        state: &mut BootstrapState,
        server_id: ServerId,
        status: Result<&ClusterStatus, &GatewayError>,
    ) -> BootstrapOutcome {
        let listed = match status {
            Ok(status) => status.server_id.matches(&server_id) || status.contains_server(&server_id),
            Err(_) => false,
        };
        if listed {
            tracing::info!(cluster = %self.cluster, %server_id, "member joined cluster");
            *state = BootstrapState::Joined {
                server_id: server_id.clone(),
            };
            return BootstrapOutcome::Joined { server_id };
        }
        if *state == BootstrapState::Uninitialized {
            *state = BootstrapState::Joining { attempts: 0 };
        }
        BootstrapOutcome::AwaitingMembership
    }
}

fn set_attempts(state: &mut BootstrapState, value: u32) {
    match state {
        BootstrapState::Initializing { attempts } | BootstrapState::Joining { attempts } => {
            *attempts = value
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tls::BundleParts;
    use crate::types::{MemberRole, ServerEntry};

    #[derive(Default)]
    struct FakeDatabase {
        server_id: Option<ServerId>,
        created: Vec<String>,
        joined: Vec<(String, Vec<String>)>,
        failures: Vec<JoinError>,
    }

    impl ClusterDatabase for FakeDatabase {
        fn server_id(&self, _: ClusterKind) -> Option<ServerId> {
            self.server_id.clone()
        }

        fn create_cluster(&mut self, _: ClusterKind, local: &str) -> Result<(), JoinError> {
            if let Some(err) = self.failures.pop() {
                return Err(err);
            }
            self.created.push(local.to_string());
            self.server_id = Some(ServerId::new("aa11"));
            Ok(())
        }

        fn join_cluster(&mut self, _: ClusterKind, local: &str, remotes: &[String]) -> Result<(), JoinError> {
            if let Some(err) = self.failures.pop() {
                return Err(err);
            }
            self.joined.push((local.to_string(), remotes.to_vec()));
            self.server_id = Some(ServerId::new("bb22"));
            Ok(())
        }
    }

    fn cert(version: u64) -> CertificateBundle {
        BundleParts {
            private_key: Some("KEY".into()),
            certificate: Some("CERT".into()),
            ca: Some("CA".into()),
            chain: None,
            version: Some(version),
        }
        .assemble()
        .unwrap()
    }

    fn status_with(ids: &[&str]) -> ClusterStatus {
        ClusterStatus {
            server_id: ServerId::new(ids[0]),
            role: MemberRole::Follower,
            servers: ids
                .iter()
                .enumerate()
                .map(|(i, id)| ServerEntry::new(*id, format!("ssl:10.0.0.{}:6644", i + 1)))
                .collect(),
            ..Default::default()
        }
    }

    fn unreachable() -> GatewayError {
        GatewayError::unreachable(ClusterKind::Southbound, "no socket")
    }

    #[test]
    fn test_first_member_initializes() {
        let local = Unit::new("ovn-central/0", "10.0.0.1");
        let ctx = BootstrapContext {
            local: &local,
            peers: &[],
            designated_first: true,
            cluster_ready: false,
            certificate: None,
            max_attempts: 3,
        };
        let bootstrapper = ClusterBootstrapper::new(ClusterKind::Southbound);
        let mut db = FakeDatabase::default();
        let mut state = BootstrapState::Uninitialized;
        let err = unreachable();

        let outcome = bootstrapper.step(&mut state, &ctx, Err(&err), &mut db);
        assert_eq!(outcome, BootstrapOutcome::Created);
        assert_eq!(db.created, vec!["ssl:10.0.0.1:6644".to_string()]);
        assert!(matches!(state, BootstrapState::Initializing { attempts: 1 }));

        // Database exists now; status not yet available.
        let outcome = bootstrapper.step(&mut state, &ctx, Err(&err), &mut db);
        assert_eq!(outcome, BootstrapOutcome::AwaitingMembership);

        let status = status_with(&["aa11"]);
        let outcome = bootstrapper.step(&mut state, &ctx, Ok(&status), &mut db);
        assert_eq!(
            outcome,
            BootstrapOutcome::Joined {
                server_id: ServerId::new("aa11")
            }
        );
        assert_eq!(db.created.len(), 1);

        let outcome = bootstrapper.step(&mut state, &ctx, Ok(&status), &mut db);
        assert_eq!(outcome, BootstrapOutcome::AlreadyJoined);
    }

    #[test]
    fn test_join_requires_peers_and_certificate() {
        let local = Unit::new("ovn-central/1", "10.0.0.2");
        let peers = vec![Unit::new("ovn-central/0", "10.0.0.1")];
        let bootstrapper = ClusterBootstrapper::new(ClusterKind::Northbound);
        let mut db = FakeDatabase::default();
        let mut state = BootstrapState::Uninitialized;
        let err = unreachable();

        let mut ctx = BootstrapContext {
            local: &local,
            peers: &[],
            designated_first: false,
            cluster_ready: true,
            certificate: None,
            max_attempts: 3,
        };
        assert!(matches!(
            bootstrapper.step(&mut state, &ctx, Err(&err), &mut db),
            BootstrapOutcome::NotReady(_)
        ));

        ctx.peers = &peers;
        assert!(matches!(
            bootstrapper.step(&mut state, &ctx, Err(&err), &mut db),
            BootstrapOutcome::NotReady(_)
        ));

        let bundle = cert(1);
        ctx.certificate = Some(&bundle);
        assert_eq!(
            bootstrapper.step(&mut state, &ctx, Err(&err), &mut db),
            BootstrapOutcome::JoinRequested
        );
        assert_eq!(
            db.joined,
            vec![(
                "ssl:10.0.0.2:6643".to_string(),
                vec!["ssl:10.0.0.1:6643".to_string()]
            )]
        );
        assert!(db.created.is_empty());
    }

    #[test]
    fn test_non_first_member_waits_for_cluster() {
        let local = Unit::new("ovn-central/1", "10.0.0.2");
        let peers = vec![Unit::new("ovn-central/0", "10.0.0.1")];
        let bundle = cert(1);
        let ctx = BootstrapContext {
            local: &local,
            peers: &peers,
            designated_first: false,
            cluster_ready: false,
            certificate: Some(&bundle),
            max_attempts: 3,
        };
        let mut db = FakeDatabase::default();
        let mut state = BootstrapState::Uninitialized;
        let err = unreachable();
        let outcome =
            ClusterBootstrapper::new(ClusterKind::Northbound).step(&mut state, &ctx, Err(&err), &mut db);
        assert!(matches!(outcome, BootstrapOutcome::NotReady(_)));
        assert!(db.joined.is_empty());
    }

    #[test]
    fn test_retries_are_bounded() {
        let local = Unit::new("ovn-central/1", "10.0.0.2");
        let peers = vec![Unit::new("ovn-central/0", "10.0.0.1")];
        let bundle = cert(1);
        let ctx = BootstrapContext {
            local: &local,
            peers: &peers,
            designated_first: false,
            cluster_ready: true,
            certificate: Some(&bundle),
            max_attempts: 2,
        };
        let bootstrapper = ClusterBootstrapper::new(ClusterKind::Southbound);
        let mut db = FakeDatabase {
            failures: vec![
                JoinError::Retryable("peer not listening".into()),
                JoinError::Retryable("network unreachable".into()),
            ],
            ..Default::default()
        };
        let mut state = BootstrapState::Uninitialized;
        let err = unreachable();

        assert!(matches!(
            bootstrapper.step(&mut state, &ctx, Err(&err), &mut db),
            BootstrapOutcome::Retrying { attempt: 1, .. }
        ));
        assert!(matches!(
            bootstrapper.step(&mut state, &ctx, Err(&err), &mut db),
            BootstrapOutcome::Failed { .. }
        ));
        assert!(matches!(state, BootstrapState::Failed { .. }));

        // Unchanged prerequisites: stays failed without touching the database.
        assert!(matches!(
            bootstrapper.step(&mut state, &ctx, Err(&err), &mut db),
            BootstrapOutcome::StillFailed { .. }
        ));
        assert!(db.joined.is_empty());
    }

    #[test]
    fn test_failed_recovers_on_new_certificate() {
        let local = Unit::new("ovn-central/1", "10.0.0.2");
        let peers = vec![Unit::new("ovn-central/0", "10.0.0.1")];
        let old = cert(1);
        let mut ctx = BootstrapContext {
            local: &local,
            peers: &peers,
            designated_first: false,
            cluster_ready: true,
            certificate: Some(&old),
            max_attempts: 3,
        };
        let bootstrapper = ClusterBootstrapper::new(ClusterKind::Southbound);
        let mut db = FakeDatabase {
            failures: vec![JoinError::NonRetryable("certificate rejected".into())],
            ..Default::default()
        };
        let mut state = BootstrapState::Uninitialized;
        let err = unreachable();

        assert!(matches!(
            bootstrapper.step(&mut state, &ctx, Err(&err), &mut db),
            BootstrapOutcome::Failed { .. }
        ));

        let new = cert(2);
        ctx.certificate = Some(&new);
        assert_eq!(
            bootstrapper.step(&mut state, &ctx, Err(&err), &mut db),
            BootstrapOutcome::JoinRequested
        );
    }

    #[test]
    fn test_existing_database_is_not_recreated() {
        let local = Unit::new("ovn-central/0", "10.0.0.1");
        let ctx = BootstrapContext {
            local: &local,
            peers: &[],
            designated_first: true,
            cluster_ready: false,
            certificate: None,
            max_attempts: 3,
        };
        let mut db = FakeDatabase {
            server_id: Some(ServerId::new("aa11")),
            ..Default::default()
        };
        let mut state = BootstrapState::Uninitialized;
        let status = status_with(&["aa11"]);

        let outcome = ClusterBootstrapper::new(ClusterKind::Northbound).step(
            &mut state,
            &ctx,
            Ok(&status),
            &mut db,
        );
        assert!(matches!(outcome, BootstrapOutcome::Joined { .. }));
        assert!(db.created.is_empty());
    }
}
