//! Versioned TLS material for inter-member and client connections.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// What a certificate bundle is used for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CertRole {
    /// Certificate presented to clients.
    Server,
    /// Certificate used between cluster members.
    Peer,
}

impl fmt::Display for CertRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CertRole::Server => write!(f, "server"),
            CertRole::Peer => write!(f, "peer"),
        }
    }
}

/// Key, certificate and CA chain, replaced as one unit.
///
/// A bundle can only be obtained complete, through [`BundleParts::assemble`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertificateBundle {
    private_key: String,
    certificate: String,
    ca: String,
    chain: Option<String>,
    version: u64,
}

impl CertificateBundle {
    /// Private key (PEM).
    pub fn private_key(&self) -> &str {
        &self.private_key
    }

    /// Certificate (PEM).
    pub fn certificate(&self) -> &str {
        &self.certificate
    }

    /// Issuing CA (PEM).
    pub fn ca(&self) -> &str {
        &self.ca
    }

    /// Intermediate chain, if any.
    pub fn chain(&self) -> Option<&str> {
        self.chain.as_deref()
    }

    /// Issuance version.
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Contents of the CA file: CA followed by the chain.
    pub fn ca_file_contents(&self) -> String {
        match self.chain.as_deref() {
            Some(chain) if !chain.is_empty() => format!("{}\n{}", self.ca, chain),
            _ => self.ca.clone(),
        }
    }

    /// SHA-256 of the certificate PEM, hex encoded.
    pub fn fingerprint(&self) -> String {
        hex::encode(Sha256::digest(self.certificate.as_bytes()))
    }

    /// Whether key, certificate or CA differ from `other`.
    pub fn material_differs(&self, other: &CertificateBundle) -> bool {
        self.private_key != other.private_key
            || self.certificate != other.certificate
            || self.ca_file_contents() != other.ca_file_contents()
    }
}

/// Pieces of a certificate response, possibly incomplete.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BundleParts {
    pub private_key: Option<String>,
    pub certificate: Option<String>,
    pub ca: Option<String>,
    pub chain: Option<String>,
    pub version: Option<u64>,
}

impl BundleParts {
    /// Assemble a bundle, or name the first missing part.
    pub fn assemble(self) -> Result<CertificateBundle, &'static str> {
        fn present(value: Option<String>, name: &'static str) -> Result<String, &'static str> {
            value.filter(|v| !v.trim().is_empty()).ok_or(name)
        }

        Ok(CertificateBundle {
            private_key: present(self.private_key, "key")?,
            certificate: present(self.certificate, "cert")?,
            ca: present(self.ca, "ca")?,
            chain: self.chain.filter(|c| !c.trim().is_empty()),
            version: self.version.ok_or("version")?,
        })
    }
}

/// Current TLS material per role.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertificateStore {
    bundles: BTreeMap<CertRole, CertificateBundle>,
}

impl CertificateStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the bundle for `role` if `bundle` carries a higher version.
    ///
    /// Returns whether the stored bundle changed. Stale or equal versions are
    /// discarded.
    pub fn update(&mut self, role: CertRole, bundle: CertificateBundle) -> bool {
        match self.bundles.get(&role) {
            Some(current) if bundle.version <= current.version => {
                tracing::debug!(
                    %role,
                    current = current.version,
                    offered = bundle.version,
                    "discarding stale certificate bundle"
                );
                false
            }
            previous => {
                tracing::info!(
                    %role,
                    version = bundle.version,
                    previous = previous.map(|b| b.version),
                    fingerprint = %bundle.fingerprint(),
                    "certificate bundle updated"
                );
                self.bundles.insert(role, bundle);
                true
            }
        }
    }

    /// Current bundle for `role`.
    pub fn current(&self, role: CertRole) -> Option<&CertificateBundle> {
        self.bundles.get(&role)
    }

    /// Bundle used to secure cluster traffic: the peer bundle, else the server one.
    pub fn cluster_bundle(&self) -> Option<&CertificateBundle> {
        self.current(CertRole::Peer)
            .or_else(|| self.current(CertRole::Server))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bundle(version: u64, cert: &str) -> CertificateBundle {
        BundleParts {
            private_key: Some("KEY".into()),
            certificate: Some(cert.into()),
            ca: Some("CA".into()),
            chain: None,
            version: Some(version),
        }
        .assemble()
        .unwrap()
    }

    #[test]
    fn test_assemble_requires_all_parts() {
        let parts = BundleParts {
            private_key: Some("KEY".into()),
            certificate: None,
            ca: Some("CA".into()),
            chain: None,
            version: Some(1),
        };
        assert_eq!(parts.assemble(), Err("cert"));

        let parts = BundleParts {
            private_key: Some("KEY".into()),
            certificate: Some("CERT".into()),
            ca: Some("  ".into()),
            chain: None,
            version: Some(1),
        };
        assert_eq!(parts.assemble(), Err("ca"));
    }

    #[test]
    fn test_update_is_monotonic() {
        let mut store = CertificateStore::new();
        assert!(store.current(CertRole::Server).is_none());

        assert!(store.update(CertRole::Server, bundle(2, "B")));
        assert!(!store.update(CertRole::Server, bundle(1, "A")));
        assert!(!store.update(CertRole::Server, bundle(2, "C")));
        assert_eq!(store.current(CertRole::Server).unwrap().certificate(), "B");

        assert!(store.update(CertRole::Server, bundle(5, "D")));
        assert_eq!(store.current(CertRole::Server).unwrap().version(), 5);
    }

    #[test]
    fn test_versions_never_decrease() {
        let mut store = CertificateStore::new();
        let mut last = 0;
        for version in [3, 1, 7, 7, 2, 9, 8] {
            store.update(CertRole::Peer, bundle(version, "X"));
            let current = store.current(CertRole::Peer).unwrap().version();
            assert!(current >= last);
            last = current;
        }
        assert_eq!(last, 9);
    }

    #[test]
    fn test_ca_file_contents() {
        let mut parts = BundleParts {
            private_key: Some("KEY".into()),
            certificate: Some("CERT".into()),
            ca: Some("CA".into()),
            chain: Some("CHAIN".into()),
            version: Some(1),
        };
        assert_eq!(parts.clone().assemble().unwrap().ca_file_contents(), "CA\nCHAIN");
        parts.chain = None;
        assert_eq!(parts.assemble().unwrap().ca_file_contents(), "CA");
    }

    #[test]
    fn test_cluster_bundle_prefers_peer() {
        let mut store = CertificateStore::new();
        store.update(CertRole::Server, bundle(1, "S"));
        assert_eq!(store.cluster_bundle().unwrap().certificate(), "S");
        store.update(CertRole::Peer, bundle(1, "P"));
        assert_eq!(store.cluster_bundle().unwrap().certificate(), "P");
    }

    #[test]
    fn test_fingerprint_is_stable_hex() {
        let fp = bundle(1, "CERT").fingerprint();
        assert_eq!(fp.len(), 64);
        assert_eq!(fp, bundle(2, "CERT").fingerprint());
        assert_ne!(fp, bundle(1, "OTHER").fingerprint());
    }
}
