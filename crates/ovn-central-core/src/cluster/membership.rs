//! Desired vs. observed cluster membership.

use std::collections::BTreeMap;

use serde::ser::{SerializeMap, Serializer};
use serde::Serialize;

use crate::types::{parse_member_host, ClusterStatus, ServerEntry, ServerId, Unit, UnitId};

/// Key under which servers without a matching unit are listed.
pub const UNKNOWN_UNIT: &str = "UNKNOWN";

/// Classification of one address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum MemberClass {
    /// A unit is expected here and the cluster reports a member.
    ExpectedPresent,
    /// A unit is expected here but the cluster has no member at its address.
    ExpectedMissing,
    /// The cluster reports a member no unit accounts for. Never removed
    /// automatically.
    Orphan,
}

/// One classified address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MemberObservation {
    pub address: String,
    pub unit: Option<UnitId>,
    pub server_id: Option<ServerId>,
    pub class: MemberClass,
}

/// Result of comparing expected units with reported members.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MembershipDelta {
    pub members: Vec<MemberObservation>,
}

impl MembershipDelta {
    /// Entries of a given class.
    pub fn with_class(&self, class: MemberClass) -> impl Iterator<Item = &MemberObservation> {
        self.members.iter().filter(move |m| m.class == class)
    }

    /// Orphaned members, surfaced for an operator decision.
    pub fn orphans(&self) -> Vec<&MemberObservation> {
        self.with_class(MemberClass::Orphan).collect()
    }

    /// Units expected but not yet members.
    pub fn missing(&self) -> Vec<&MemberObservation> {
        self.with_class(MemberClass::ExpectedMissing).collect()
    }

    /// Whether every expected unit is present and nothing is orphaned.
    pub fn is_converged(&self) -> bool {
        self.members
            .iter()
            .all(|m| m.class == MemberClass::ExpectedPresent)
    }
}

/// Pure comparison of expected and observed membership.
pub struct ClusterMembershipModel;

impl ClusterMembershipModel {
    /// Classify every known address.
    ///
    /// `reported` are the servers the admin surface lists for one cluster.
    /// Servers whose address cannot be parsed are treated as orphans keyed by
    /// their raw address.
    pub fn observe(units: &[Unit], reported: &[ServerEntry]) -> MembershipDelta {
        let mut by_host: BTreeMap<String, &ServerEntry> = BTreeMap::new();
        let mut unparsed = Vec::new();
        for server in reported {
            match server.host() {
                Ok(host) => {
                    by_host.insert(host.to_string(), server);
                }
                Err(_) => unparsed.push(server),
            }
        }

        let mut members = Vec::new();
        for unit in units.iter().filter(|u| u.hosts_member) {
            match by_host.remove(&unit.address) {
                Some(server) => members.push(MemberObservation {
                    address: unit.address.clone(),
                    unit: Some(unit.id.clone()),
                    server_id: Some(server.server_id.clone()),
                    class: MemberClass::ExpectedPresent,
                }),
                None => members.push(MemberObservation {
                    address: unit.address.clone(),
                    unit: Some(unit.id.clone()),
                    server_id: None,
                    class: MemberClass::ExpectedMissing,
                }),
            }
        }

        let orphans = by_host
            .into_iter()
            .chain(unparsed.into_iter().map(|s| (s.address.clone(), s)));
        for (address, server) in orphans {
            tracing::debug!(%address, server_id = %server.server_id, "orphaned cluster member");
            members.push(MemberObservation {
                address,
                unit: None,
                server_id: Some(server.server_id.clone()),
                class: MemberClass::Orphan,
            });
        }

        MembershipDelta { members }
    }
}

/// Association of server IDs with deployment units.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UnitMap {
    pub mapped: BTreeMap<ServerId, UnitId>,
    pub unknown: Vec<ServerId>,
}

impl UnitMap {
    /// Map every server of `status` to the unit bound to its host.
    ///
    /// Fails if a server address is not of the form `proto:host:port`.
    pub fn build(status: &ClusterStatus, units: &[Unit]) -> Result<Self, String> {
        let mut map = UnitMap::default();
        for server in &status.servers {
            let host = parse_member_host(&server.address)?;
            match units.iter().find(|u| u.address == host) {
                Some(unit) => {
                    map.mapped.insert(server.server_id.clone(), unit.id.clone());
                }
                None => map.unknown.push(server.server_id.clone()),
            }
        }
        Ok(map)
    }

    /// Unit hosting `server_id`, or [`UNKNOWN_UNIT`].
    pub fn unit_for(&self, server_id: &ServerId) -> &str {
        self.mapped
            .get(server_id)
            .map(UnitId::as_str)
            .unwrap_or(UNKNOWN_UNIT)
    }
}

impl Serialize for UnitMap {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let extra = usize::from(!self.unknown.is_empty());
        let mut map = serializer.serialize_map(Some(self.mapped.len() + extra))?;
        for (server, unit) in &self.mapped {
            map.serialize_entry(server, unit)?;
        }
        if !self.unknown.is_empty() {
            map.serialize_entry(UNKNOWN_UNIT, &self.unknown)?;
        }
        map.end()
    }
}

/// Whether a server bound to `host` still appears in `status`.
pub fn is_server_in_cluster(host: &str, status: &ClusterStatus) -> bool {
    status.contains_host(host)
}
