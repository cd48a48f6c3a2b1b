//! Shared types for the OVN central reconciliation core.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Identity of one of the two clustered OVN databases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClusterKind {
    /// The Northbound database (`OVN_Northbound`).
    Northbound,
    /// The Southbound database (`OVN_Southbound`).
    Southbound,
}

impl ClusterKind {
    /// Both clusters, Northbound first.
    pub const ALL: [ClusterKind; 2] = [ClusterKind::Northbound, ClusterKind::Southbound];

    /// OVSDB schema name.
    pub fn schema_name(&self) -> &'static str {
        match self {
            ClusterKind::Northbound => "OVN_Northbound",
            ClusterKind::Southbound => "OVN_Southbound",
        }
    }

    /// Name of the database process, also used for its control socket.
    pub fn db_name(&self) -> &'static str {
        match self {
            ClusterKind::Northbound => "ovnnb_db",
            ClusterKind::Southbound => "ovnsb_db",
        }
    }

    /// Key used in operator action output.
    pub fn action_key(&self) -> &'static str {
        match self {
            ClusterKind::Northbound => "ovnnb",
            ClusterKind::Southbound => "ovnsb",
        }
    }

    /// Short name (`nb` / `sb`).
    pub fn short_name(&self) -> &'static str {
        match self {
            ClusterKind::Northbound => "nb",
            ClusterKind::Southbound => "sb",
        }
    }

    /// Port clients connect to.
    pub fn client_port(&self) -> u16 {
        match self {
            ClusterKind::Northbound => 6641,
            ClusterKind::Southbound => 6642,
        }
    }

    /// Port used for Raft traffic between cluster members.
    pub fn cluster_port(&self) -> u16 {
        match self {
            ClusterKind::Northbound => 6643,
            ClusterKind::Southbound => 6644,
        }
    }

    /// Human readable name.
    pub fn display_name(&self) -> &'static str {
        match self {
            ClusterKind::Northbound => "Northbound",
            ClusterKind::Southbound => "Southbound",
        }
    }

    /// Cluster-protocol connection string for a host, e.g. `ssl:10.0.0.1:6643`.
    pub fn connection_string(&self, host: &str) -> String {
        if host.contains(':') && !host.starts_with('[') {
            format!("ssl:[{}]:{}", host, self.cluster_port())
        } else {
            format!("ssl:{}:{}", host, self.cluster_port())
        }
    }
}

impl fmt::Display for ClusterKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.short_name())
    }
}

impl FromStr for ClusterKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "nb" | "ovnnb" | "northbound" | "ovn_northbound" => Ok(ClusterKind::Northbound),
            "sb" | "ovnsb" | "southbound" | "ovn_southbound" => Ok(ClusterKind::Southbound),
            other => Err(format!("unknown cluster '{}'", other)),
        }
    }
}

/// Opaque server identifier assigned by the store.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ServerId(String);

impl ServerId {
    /// Wrap a server identifier.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the identifier.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether `other` names this server.
    ///
    /// `cluster/status` prints abbreviated IDs (first four hex digits) next to
    /// full ones, so a prefix match in either direction counts.
    pub fn matches(&self, other: &ServerId) -> bool {
        !self.0.is_empty()
            && !other.0.is_empty()
            && (self.0.starts_with(&other.0) || other.0.starts_with(&self.0))
    }
}

impl fmt::Display for ServerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ServerId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// Deployment unit identifier, e.g. `ovn-central/0`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UnitId(String);

impl UnitId {
    /// Wrap a unit identifier.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the identifier.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Numeric rank taken from the `app/N` suffix. Unparseable names sort last.
    pub fn rank(&self) -> u64 {
        self.0
            .rsplit_once('/')
            .and_then(|(_, n)| n.parse().ok())
            .unwrap_or(u64::MAX)
    }
}

impl fmt::Display for UnitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for UnitId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// A participant in the deployment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Unit {
    /// Stable identifier.
    pub id: UnitId,
    /// Address bound for cluster traffic.
    pub address: String,
    /// Whether this unit is expected to host cluster members.
    pub hosts_member: bool,
}

impl Unit {
    /// Create a unit that hosts cluster members.
    pub fn new(id: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            id: UnitId::new(id),
            address: address.into(),
            hosts_member: true,
        }
    }

    /// Mark the unit as not hosting members.
    pub fn without_member(mut self) -> Self {
        self.hosts_member = false;
        self
    }
}

/// Role of a server within its Raft cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum MemberRole {
    Leader,
    Follower,
    Candidate,
    #[default]
    Unknown,
}

impl fmt::Display for MemberRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MemberRole::Leader => write!(f, "leader"),
            MemberRole::Follower => write!(f, "follower"),
            MemberRole::Candidate => write!(f, "candidate"),
            MemberRole::Unknown => write!(f, "unknown"),
        }
    }
}

impl FromStr for MemberRole {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.trim() {
            "leader" => MemberRole::Leader,
            "follower" => MemberRole::Follower,
            "candidate" => MemberRole::Candidate,
            _ => MemberRole::Unknown,
        })
    }
}

/// A server listed in a cluster status report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerEntry {
    /// Server identifier as reported by the store.
    pub server_id: ServerId,
    /// Cluster-protocol address, e.g. `ssl:10.0.0.1:6644`.
    pub address: String,
}

impl ServerEntry {
    /// Create a server entry.
    pub fn new(server_id: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            server_id: ServerId::new(server_id),
            address: address.into(),
        }
    }

    /// Host part of the address.
    pub fn host(&self) -> Result<&str, String> {
        parse_member_host(&self.address)
    }
}

/// Extract the host from a `proto:host:port` cluster address.
///
/// IPv6 hosts are bracketed (`ssl:[fd00::1]:6644`).
pub fn parse_member_host(address: &str) -> Result<&str, String> {
    let malformed = || {
        format!(
            "cluster member address has unexpected format: {}",
            address
        )
    };
    let (proto, rest) = address.split_once(':').ok_or_else(malformed)?;
    let (host, port) = rest.rsplit_once(':').ok_or_else(malformed)?;
    if proto.is_empty() || host.is_empty() || port.parse::<u16>().is_err() {
        return Err(malformed());
    }
    let host = host.trim_start_matches('[').trim_end_matches(']');
    if host.is_empty() || (host.contains(':') && !rest.starts_with('[')) {
        return Err(malformed());
    }
    Ok(host)
}

/// Status of the local member of one cluster, as reported by the admin surface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ClusterStatus {
    /// Cluster identifier.
    pub cluster_id: String,
    /// Local server identifier.
    pub server_id: ServerId,
    /// Local cluster-protocol address.
    pub address: String,
    /// Membership status text, e.g. `cluster member`.
    pub status: String,
    /// Local role.
    pub role: MemberRole,
    /// Current term.
    pub term: u64,
    /// Leader identifier; `self` when the local server leads.
    pub leader: Option<String>,
    /// Vote cast in the current term.
    pub vote: Option<String>,
    /// Active election timer in milliseconds.
    pub election_timer_ms: Option<u64>,
    /// Log range text.
    pub log: String,
    /// Entries not yet committed.
    pub entries_not_yet_committed: u64,
    /// Entries not yet applied.
    pub entries_not_yet_applied: u64,
    /// All servers known to the cluster.
    pub servers: Vec<ServerEntry>,
}

impl ClusterStatus {
    /// Whether the local server is the cluster leader.
    pub fn is_leader(&self) -> bool {
        self.role == MemberRole::Leader
    }

    /// Leader server identifier, resolving `self`.
    pub fn leader_id(&self) -> Option<ServerId> {
        match self.leader.as_deref() {
            Some("self") => Some(self.server_id.clone()),
            Some(id) if !id.is_empty() && id != "unknown" => Some(ServerId::new(id)),
            _ if self.is_leader() => Some(self.server_id.clone()),
            _ => None,
        }
    }

    /// Role of a listed server, as far as the local view can tell.
    pub fn member_role(&self, id: &ServerId) -> MemberRole {
        if self.server_id.matches(id) {
            return self.role;
        }
        match self.leader_id() {
            Some(leader) if leader.matches(id) => MemberRole::Leader,
            _ => MemberRole::Unknown,
        }
    }

    /// Whether a server with the given identifier is a member.
    pub fn contains_server(&self, id: &ServerId) -> bool {
        self.servers.iter().any(|s| s.server_id.matches(id))
    }

    /// Whether any member is reachable at the given host.
    pub fn contains_host(&self, host: &str) -> bool {
        self.servers
            .iter()
            .any(|s| s.host().map(|h| h == host).unwrap_or(false))
    }
}
