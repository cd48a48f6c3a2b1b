//! Cluster lifecycle.
//!
//! This module provides:
//! - [`ClusterAdminGateway`] - Contract with the store's admin surface
//! - [`ClusterBootstrapper`] - Initializing or joining each cluster
//! - [`ElectionTimerReconciler`] - Stepwise runtime parameter convergence
//! - [`ClusterMembershipModel`] - Expected vs. reported membership

pub mod bootstrap;
pub mod gateway;
pub mod membership;
pub mod timer;

pub use bootstrap::{
    BootstrapContext, BootstrapOutcome, BootstrapState, ClusterBootstrapper, ClusterDatabase,
};
pub use gateway::{ClusterAdminGateway, Confirmation, KickRequest};
pub use membership::{
    is_server_in_cluster, ClusterMembershipModel, MemberClass, MemberObservation, MembershipDelta,
    UnitMap, UNKNOWN_UNIT,
};
pub use timer::{
    plan, reconcile_inactivity_probe, ElectionTimerReconciler, PendingStep, ProbeOutcome,
    TimerBounds, TimerOutcome, TimerProgress,
};
