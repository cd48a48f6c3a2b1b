//! Error types for ovn-central-core.

use serde::Serialize;
use thiserror::Error;

use crate::types::ClusterKind;

/// Errors surfaced by the core outside of a reconcile pass.
#[derive(Debug, Error)]
pub enum Error {
    /// Error in the persisted state database.
    #[error("storage error: {0}")]
    Storage(#[from] sled::Error),

    /// Error during serialization/deserialization.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Invalid configuration.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// An operator action failed.
    #[error("action failed: {0}")]
    Action(String),

    /// Cluster status output could not be interpreted.
    #[error("Failed to parse OVN cluster status. {0}")]
    StatusParsing(String),

    /// The admin surface failed a request.
    #[error(transparent)]
    Gateway(#[from] GatewayError),
}

/// Invalid configuration values.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// Election timer outside the accepted range.
    #[error("'ovsdb-server-election-timer' must be > {min} < {max}")]
    ElectionTimerOutOfRange { value: u64, min: u64, max: u64 },

    /// Inactivity probe of zero.
    #[error("'ovsdb-server-inactivity-probe' must be a positive number of seconds")]
    InactivityProbeZero,

    /// No services configured.
    #[error("at least one service must be managed")]
    NoServices,

    /// Join attempts must be bounded and non-zero.
    #[error("'max-join-attempts' must be at least 1")]
    NoJoinAttempts,
}

/// Failure reported by the cluster admin surface.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GatewayError {
    /// The local instance is not reachable or not part of a cluster yet.
    #[error("{cluster} database unreachable: {reason}")]
    Unreachable { cluster: ClusterKind, reason: String },

    /// The store declined the request.
    #[error("{cluster} database rejected request: {reason}")]
    Rejected { cluster: ClusterKind, reason: String },
}

impl GatewayError {
    /// Build an `Unreachable` error.
    pub fn unreachable(cluster: ClusterKind, reason: impl Into<String>) -> Self {
        GatewayError::Unreachable {
            cluster,
            reason: reason.into(),
        }
    }

    /// Build a `Rejected` error.
    pub fn rejected(cluster: ClusterKind, reason: impl Into<String>) -> Self {
        GatewayError::Rejected {
            cluster,
            reason: reason.into(),
        }
    }
}

/// Failure while creating or joining a cluster database.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum JoinError {
    /// Transient failure: network unreachable, peer not yet listening.
    #[error("retryable join failure: {0}")]
    Retryable(String),

    /// Permanent failure: certificate rejected, protocol mismatch.
    #[error("join failure: {0}")]
    NonRetryable(String),
}

impl JoinError {
    /// Whether a later attempt may succeed without operator intervention.
    pub fn is_retryable(&self) -> bool {
        matches!(self, JoinError::Retryable(_))
    }
}

/// Failure restarting a service or running a deferred hook.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[error("{target}: {reason}")]
pub struct RestartError {
    /// Service or hook name.
    pub target: String,
    /// Failure description.
    pub reason: String,
}

impl RestartError {
    /// Create a restart error.
    pub fn new(target: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            reason: reason.into(),
        }
    }
}

/// Failure writing TLS material where the services read it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("failed to install TLS material: {0}")]
pub struct TlsInstallError(pub String);

/// Outcome classification for problems met during a reconcile pass.
///
/// None of these abort a pass; they are collected in the pass report.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[serde(tag = "kind", content = "message", rename_all = "kebab-case")]
pub enum ReconcileError {
    /// A prerequisite is missing; retried on the next pass.
    #[error("not ready: {0}")]
    NotReady(String),

    /// The admin surface declined a request.
    #[error("rejected: {0}")]
    Rejected(String),

    /// The admin surface could not be reached after the member had joined.
    #[error("unreachable: {0}")]
    Unreachable(String),

    /// A service restart or deferred hook failed; the entry stays queued.
    #[error("restart failure: {0}")]
    RestartFailure(String),
}

impl From<RestartError> for ReconcileError {
    fn from(err: RestartError) -> Self {
        ReconcileError::RestartFailure(err.to_string())
    }
}

impl From<GatewayError> for ReconcileError {
    fn from(err: GatewayError) -> Self {
        match err {
            GatewayError::Unreachable { .. } => ReconcileError::Unreachable(err.to_string()),
            GatewayError::Rejected { .. } => ReconcileError::Rejected(err.to_string()),
        }
    }
}

/// Result alias for core operations.
pub type Result<T> = std::result::Result<T, Error>;
