//! Convergence of per-cluster runtime parameters.
//!
//! The store refuses an election timer change of more than 2x in either
//! direction, so a large change is walked through intermediate values, one
//! confirmed step per reconcile pass. The inactivity probe has no such limit
//! and is set in one step.

use serde::{Deserialize, Serialize};

use crate::cluster::gateway::ClusterAdminGateway;
use crate::error::GatewayError;
use crate::types::{ClusterKind, ClusterStatus};

/// Inclusive bounds on the election timer, in whatever unit the caller plans in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerBounds {
    pub min: u64,
    pub max: u64,
}

impl TimerBounds {
    /// Bounds in seconds as accepted in configuration.
    pub const SECONDS: TimerBounds = TimerBounds { min: 1, max: 60 };

    /// Bounds in milliseconds as used by the store.
    pub const MILLIS: TimerBounds = TimerBounds {
        min: 1000,
        max: 60_000,
    };

    /// Clamp a value into the bounds.
    pub fn clamp(&self, value: u64) -> u64 {
        value.clamp(self.min, self.max)
    }
}

/// Compute the intermediate values leading from `current` to `desired`.
///
/// Every step stays within a factor of two of the previous value: doubling
/// is capped at the target when increasing, and halving rounds up when
/// decreasing. The sequence ends exactly at `desired` (clamped to `bounds`).
/// An empty plan means nothing to change.
pub fn plan(current: u64, desired: u64, bounds: TimerBounds) -> Vec<u64> {
    let target = bounds.clamp(desired);
    if current == target {
        return Vec::new();
    }
    if current == 0 {
        return vec![target];
    }

    let mut steps = Vec::new();
    let mut value = current;
    while value != target {
        value = if target > value {
            value.saturating_mul(2).min(target)
        } else {
            value.div_ceil(2).max(target)
        };
        steps.push(value);
    }
    steps
}

/// A step that the store acknowledged but does not report yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingStep {
    /// Value the store reported when the step was issued.
    pub from_ms: u64,
    /// Value requested.
    pub to_ms: u64,
    /// Raft term the step was issued in.
    pub term: u64,
}

/// Cross-pass progress of election timer convergence for one cluster.
///
/// Only confirmed (acknowledged) steps are recorded.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimerProgress {
    /// Step acknowledged but not yet visible in status.
    pub pending: Option<PendingStep>,
    /// Reason the last step was refused, if it was.
    pub last_rejection: Option<String>,
}

/// What one pass did for a cluster's election timer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TimerOutcome {
    /// The local member is not the leader; only the leader changes the timer.
    NotLeader,
    /// Status did not carry a timer value.
    Unknown,
    /// Observed value equals the desired one.
    Converged,
    /// A previously acknowledged step is not visible yet.
    Awaiting { to_ms: u64 },
    /// A step was applied and acknowledged.
    Applied { from_ms: u64, to_ms: u64 },
    /// The store refused the step; it is retried on the next pass.
    Rejected { to_ms: u64, reason: String },
    /// The store could not be reached.
    Unreachable(String),
}

impl TimerOutcome {
    /// Whether this outcome mutated the store.
    pub fn is_mutation(&self) -> bool {
        matches!(self, TimerOutcome::Applied { .. })
    }
}

/// Drives the election timer of one cluster toward the desired value.
pub struct ElectionTimerReconciler {
    bounds: TimerBounds,
}

impl Default for ElectionTimerReconciler {
    fn default() -> Self {
        Self::new(TimerBounds::MILLIS)
    }
}

impl ElectionTimerReconciler {
    /// Create a reconciler planning within `bounds` (milliseconds).
    pub fn new(bounds: TimerBounds) -> Self {
        Self { bounds }
    }

    /// Advance convergence by at most one step.
    pub fn advance(
        &self,
        cluster: ClusterKind,
        status: &ClusterStatus,
        desired_ms: u64,
        progress: &mut TimerProgress,
        gateway: &mut dyn ClusterAdminGateway,
    ) -> TimerOutcome {
        if !status.is_leader() {
            tracing::debug!(%cluster, "not cluster leader, leaving election timer alone");
            return TimerOutcome::NotLeader;
        }
        let Some(observed) = status.election_timer_ms else {
            return TimerOutcome::Unknown;
        };

        if let Some(pending) = progress.pending {
            if pending.to_ms == observed || pending.term != status.term || pending.from_ms != observed
            {
                progress.pending = None;
            }
        }

        let steps = plan(observed, desired_ms, self.bounds);
        let Some(&next) = steps.first() else {
            progress.pending = None;
            progress.last_rejection = None;
            return TimerOutcome::Converged;
        };

        if let Some(pending) = progress.pending {
            if pending.to_ms == next {
                tracing::debug!(%cluster, step_ms = next, "waiting for election timer step to show");
                return TimerOutcome::Awaiting { to_ms: next };
            }
        }

        tracing::info!(
            %cluster,
            from_ms = observed,
            step_ms = next,
            target_ms = desired_ms,
            remaining = steps.len(),
            "changing election timer"
        );
        match gateway.set_election_timer(cluster, next) {
            Ok(()) => {
                progress.pending = Some(PendingStep {
                    from_ms: observed,
                    to_ms: next,
                    term: status.term,
                });
                progress.last_rejection = None;
                TimerOutcome::Applied {
                    from_ms: observed,
                    to_ms: next,
                }
            }
            Err(GatewayError::Rejected { reason, .. }) => {
                tracing::error!(%cluster, step_ms = next, %reason, "election timer step rejected");
                progress.last_rejection = Some(reason.clone());
                TimerOutcome::Rejected {
                    to_ms: next,
                    reason,
                }
            }
            Err(GatewayError::Unreachable { reason, .. }) => TimerOutcome::Unreachable(reason),
        }
    }
}

/// What one pass did for a cluster's inactivity probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeOutcome {
    NotLeader,
    Converged,
    Applied { to_ms: u64 },
    Rejected { reason: String },
    Unreachable(String),
}

/// Set the inactivity probe in one step when it differs from the last
/// confirmed value.
pub fn reconcile_inactivity_probe(
    cluster: ClusterKind,
    status: &ClusterStatus,
    desired_ms: u64,
    applied_ms: &mut Option<u64>,
    gateway: &mut dyn ClusterAdminGateway,
) -> ProbeOutcome {
    if !status.is_leader() {
        return ProbeOutcome::NotLeader;
    }
    if *applied_ms == Some(desired_ms) {
        return ProbeOutcome::Converged;
    }
    match gateway.set_inactivity_probe(cluster, desired_ms) {
        Ok(()) => {
            tracing::info!(%cluster, probe_ms = desired_ms, "inactivity probe set");
            *applied_ms = Some(desired_ms);
            ProbeOutcome::Applied { to_ms: desired_ms }
        }
        Err(GatewayError::Rejected { reason, .. }) => {
            tracing::error!(%cluster, %reason, "inactivity probe change rejected");
            ProbeOutcome::Rejected { reason }
        }
        Err(GatewayError::Unreachable { reason, .. }) => ProbeOutcome::Unreachable(reason),
    }
}
