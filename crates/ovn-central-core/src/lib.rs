//! OVN Central - lifecycle reconciliation for the clustered OVN databases.
//!
//! This crate drives the Northbound and Southbound Raft clusters that back
//! `ovn-northd`. It does not replicate anything itself; it observes and steers
//! externally running `ovsdb-server` instances through their admin surface:
//! - Initializing or joining each cluster from a fresh unit
//! - Stepping the election timer within the store's 2x change limit
//! - Rotating TLS material without dropping consensus
//! - Deferring disruptive restarts when automatic restarts are disabled
//!
//! # Architecture
//!
//! External systems are reached through traits:
//! - [`ClusterAdminGateway`] - `cluster/status`, timer changes, kick, leave
//! - [`ClusterDatabase`] - the on-disk database file of the local member
//! - [`ServiceManager`] - service restarts
//! - [`TlsMaterialSink`] - where TLS material is written
//!
//! All cross-pass state lives in [`CentralState`], persisted by [`StateStore`].
//!
//! # Usage
//!
//! ```ignore
//! use ovn_central_core::{reconcile, CentralConfig, Collaborators, StateStore};
//!
//! let store = StateStore::open("/var/lib/ovn-central/state")?;
//! let mut state = store.load()?;
//!
//! let report = reconcile(&mut state, &config, observations, &mut Collaborators {
//!     gateway: &mut gateway,
//!     database: &mut database,
//!     services: &mut services,
//!     tls: &mut tls,
//! });
//! store.save(&state)?;
//! ```

pub mod actions;
pub mod cluster;
pub mod config;
pub mod deferred;
pub mod error;
pub mod observe;
pub mod reconcile;
pub mod status;
pub mod storage;
pub mod tls;
pub mod types;

// Re-export main types
pub use cluster::{
    BootstrapState, ClusterAdminGateway, ClusterBootstrapper, ClusterDatabase,
    ClusterMembershipModel, Confirmation, ElectionTimerReconciler, KickRequest, UnitMap,
};
pub use config::CentralConfig;
pub use deferred::{
    DeferredAction, DeferredEvent, DeferredQueue, DeferredRestartScheduler, HookRunner,
    RestartSelector, RunReport, ServiceManager,
};
pub use error::{
    ConfigError, Error, GatewayError, JoinError, ReconcileError, RestartError, Result,
    TlsInstallError,
};
pub use observe::{Observations, RawObservations};
pub use reconcile::{depart, reconcile, Collaborators, PassReport, SideEffect, TlsMaterialSink};
pub use status::{DbHealth, WorkloadState, WorkloadStatus};
pub use storage::{CentralState, StateStore};
pub use tls::{BundleParts, CertRole, CertificateBundle, CertificateStore};
pub use types::{ClusterKind, ClusterStatus, MemberRole, ServerEntry, ServerId, Unit, UnitId};
