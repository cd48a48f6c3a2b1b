//! Contract with the external administrative control surface of the store.

use crate::error::GatewayError;
use crate::types::{ClusterKind, ClusterStatus, ServerId};

/// Administrative operations consumed by the core.
///
/// Calls are synchronous. A call that fails with
/// [`GatewayError::Unreachable`] is treated as "not ready, retry next pass".
pub trait ClusterAdminGateway {
    /// Status of the local member of `cluster`.
    fn status(&self, cluster: ClusterKind) -> Result<ClusterStatus, GatewayError>;

    /// Change the Raft election timer. The store refuses steps beyond 2x.
    fn set_election_timer(&mut self, cluster: ClusterKind, millis: u64)
        -> Result<(), GatewayError>;

    /// Change the inactivity probe of the client listeners.
    fn set_inactivity_probe(
        &mut self,
        cluster: ClusterKind,
        millis: u64,
    ) -> Result<(), GatewayError>;

    /// Remove a member by server ID.
    fn kick(&mut self, request: &KickRequest) -> Result<(), GatewayError>;

    /// Ask the local member to leave `cluster`.
    fn leave(&mut self, cluster: ClusterKind) -> Result<(), GatewayError>;
}

/// Proof that an operator explicitly confirmed a destructive operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Confirmation(());

impl Confirmation {
    /// Obtain a confirmation from the operator's flag. `false` yields nothing.
    pub fn from_flag(i_really_mean_it: bool) -> Option<Self> {
        i_really_mean_it.then_some(Confirmation(()))
    }
}

/// A confirmed request to kick a member.
///
/// Only constructible with a [`Confirmation`], and always addressed by server
/// ID, never by network address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KickRequest {
    cluster: ClusterKind,
    server_id: ServerId,
}

impl KickRequest {
    /// Build a kick request.
    pub fn new(cluster: ClusterKind, server_id: ServerId, _confirmed: Confirmation) -> Self {
        Self { cluster, server_id }
    }

    /// Target cluster.
    pub fn cluster(&self) -> ClusterKind {
        self.cluster
    }

    /// Target server.
    pub fn server_id(&self) -> &ServerId {
        &self.server_id
    }
}
