//! Validated external observations.
//!
//! The surrounding runtime hands over a loosely typed JSON document describing
//! the deployment. It is checked once, up front: anything missing becomes a
//! "not ready" reason instead of a failure halfway through a pass.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::ReconcileError;
use crate::tls::{BundleParts, CertRole, CertificateBundle};
use crate::types::{Unit, UnitId};

/// A peer unit as reported by the runtime.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct RawUnit {
    pub unit: Option<String>,
    pub bound_address: Option<String>,
    /// Defaults to `true`.
    pub hosts_member: Option<bool>,
}

/// A certificate response as reported by the runtime.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct RawCertificate {
    pub key: Option<String>,
    pub cert: Option<String>,
    pub ca: Option<String>,
    pub chain: Option<String>,
    pub version: Option<u64>,
}

impl From<RawCertificate> for BundleParts {
    fn from(raw: RawCertificate) -> Self {
        BundleParts {
            private_key: raw.key,
            certificate: raw.cert,
            ca: raw.ca,
            chain: raw.chain,
            version: raw.version,
        }
    }
}

/// Certificate responses per role.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawCertificates {
    pub server: Option<RawCertificate>,
    pub peer: Option<RawCertificate>,
}

/// Observation document delivered by the runtime before each pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct RawObservations {
    pub local_unit: Option<String>,
    pub local_address: Option<String>,
    #[serde(default)]
    pub units: Vec<RawUnit>,
    /// The first member announced an established cluster.
    #[serde(default)]
    pub cluster_ready: bool,
    #[serde(default)]
    pub certificates: RawCertificates,
    /// `None` when the installed northd cannot tell.
    pub northd_active: Option<bool>,
    /// Digest of the rendered configuration files, per service.
    #[serde(default)]
    pub config_digests: BTreeMap<String, String>,
}

/// Observations that passed validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Observations {
    pub local: Unit,
    pub peers: Vec<Unit>,
    pub cluster_ready: bool,
    pub certificates: Vec<(CertRole, CertificateBundle)>,
    pub northd_active: Option<bool>,
    pub config_digests: BTreeMap<String, String>,
    /// Whether the certificates relation delivered anything at all.
    pub certificates_requested: bool,
    /// Reasons parts of the input were dropped.
    pub not_ready: Vec<ReconcileError>,
}

impl RawObservations {
    /// Validate into typed observations.
    ///
    /// Fails only when the local unit itself is unknown; everything else that
    /// is incomplete is dropped and listed in [`Observations::not_ready`].
    pub fn validate(self) -> Result<Observations, ReconcileError> {
        let local_id = self
            .local_unit
            .filter(|u| !u.trim().is_empty())
            .ok_or_else(|| ReconcileError::NotReady("local unit name unknown".to_string()))?;
        let local_address = self
            .local_address
            .filter(|a| !a.trim().is_empty())
            .ok_or_else(|| ReconcileError::NotReady("local address unknown".to_string()))?;

        let mut not_ready = Vec::new();
        let mut peers = Vec::new();
        for raw in self.units {
            let Some(id) = raw.unit.filter(|u| !u.trim().is_empty()) else {
                not_ready.push(ReconcileError::NotReady("peer without unit name".to_string()));
                continue;
            };
            if id == local_id {
                continue;
            }
            let Some(address) = raw.bound_address.filter(|a| !a.trim().is_empty()) else {
                tracing::debug!(unit = %id, "peer has not published an address yet");
                not_ready.push(ReconcileError::NotReady(format!("{} has no bound address", id)));
                continue;
            };
            let mut unit = Unit::new(id, address);
            unit.hosts_member = raw.hosts_member.unwrap_or(true);
            peers.push(unit);
        }
        peers.sort_by_key(|u| (u.id.rank(), u.id.clone()));

        let certificates_requested =
            self.certificates.server.is_some() || self.certificates.peer.is_some();
        let mut certificates = Vec::new();
        for (role, raw) in [
            (CertRole::Server, self.certificates.server),
            (CertRole::Peer, self.certificates.peer),
        ] {
            let Some(raw) = raw else { continue };
            match BundleParts::from(raw).assemble() {
                Ok(bundle) => certificates.push((role, bundle)),
                Err(missing) => {
                    tracing::debug!(%role, %missing, "incomplete certificate response");
                    not_ready.push(ReconcileError::NotReady(format!(
                        "{} certificate incomplete: missing {}",
                        role, missing
                    )));
                }
            }
        }

        Ok(Observations {
            local: Unit::new(local_id, local_address),
            peers,
            cluster_ready: self.cluster_ready,
            certificates,
            northd_active: self.northd_active,
            config_digests: self.config_digests,
            certificates_requested,
            not_ready,
        })
    }
}

impl Observations {
    /// Local unit followed by its peers.
    pub fn all_units(&self) -> Vec<Unit> {
        std::iter::once(self.local.clone())
            .chain(self.peers.iter().cloned())
            .collect()
    }

    /// Peers expected to host cluster members.
    pub fn member_peers(&self) -> Vec<Unit> {
        self.peers.iter().filter(|p| p.hosts_member).cloned().collect()
    }

    /// Whether the local unit is the lowest-ranked member-hosting unit.
    pub fn is_designated_first(&self) -> bool {
        if !self.local.hosts_member {
            return false;
        }
        let key = |id: &UnitId| (id.rank(), id.clone());
        self.peers
            .iter()
            .filter(|p| p.hosts_member)
            .all(|p| key(&p.id) > key(&self.local.id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(json: &str) -> RawObservations {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn test_validate_complete_document() {
        let obs = raw(r#"{
            "local-unit": "ovn-central/1",
            "local-address": "10.0.0.2",
            "units": [
                {"unit": "ovn-central/2", "bound-address": "10.0.0.3"},
                {"unit": "ovn-central/0", "bound-address": "10.0.0.1"}
            ],
            "cluster-ready": true,
            "certificates": {
                "server": {"key": "KEY", "cert": "CERT", "ca": "CA", "version": 1}
            },
            "northd-active": true
        }"#)
        .validate()
        .unwrap();

        assert_eq!(obs.local.address, "10.0.0.2");
        let peers: Vec<_> = obs.peers.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(peers, vec!["ovn-central/0", "ovn-central/2"]);
        assert_eq!(obs.certificates.len(), 1);
        assert!(obs.not_ready.is_empty());
        assert!(!obs.is_designated_first());
    }

    #[test]
    fn test_missing_fields_become_not_ready() {
        let obs = raw(r#"{
            "local-unit": "ovn-central/0",
            "local-address": "10.0.0.1",
            "units": [{"unit": "ovn-central/1"}],
            "certificates": {"server": {"key": "KEY", "cert": "CERT", "version": 1}}
        }"#)
        .validate()
        .unwrap();

        assert!(obs.peers.is_empty());
        assert!(obs.certificates.is_empty());
        assert!(obs.certificates_requested);
        assert_eq!(obs.not_ready.len(), 2);
        assert!(obs.is_designated_first());
    }

    #[test]
    fn test_unknown_local_unit_fails() {
        let err = raw(r#"{"local-address": "10.0.0.1"}"#).validate().unwrap_err();
        assert!(matches!(err, ReconcileError::NotReady(_)));
    }

    #[test]
    fn test_designated_first_ignores_non_members() {
        let obs = raw(r#"{
            "local-unit": "ovn-central/3",
            "local-address": "10.0.0.4",
            "units": [{"unit": "ovn-central/0", "bound-address": "10.0.0.1", "hosts-member": false}]
        }"#)
        .validate()
        .unwrap();
        assert!(obs.is_designated_first());
        assert!(obs.member_peers().is_empty());
    }
}
