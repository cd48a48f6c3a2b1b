//! Cross-pass state, persisted in sled.

use std::collections::BTreeMap;
use std::path::Path;
use std::thread;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use sled::{Db, Tree};

use crate::cluster::{BootstrapState, TimerProgress};
use crate::deferred::DeferredQueue;
use crate::error::Result;
use crate::tls::{CertRole, CertificateBundle, CertificateStore};
use crate::types::ClusterKind;

/// Tree holding the reconciler state.
const STATE_TREE: &str = "central_state";

/// Key of the state document.
const KEY_STATE: &[u8] = b"state";

/// Attempts to take the database lock before giving up.
const LOCK_ATTEMPTS: u32 = 100;

/// Pause between lock attempts.
const LOCK_RETRY_DELAY: Duration = Duration::from_millis(20);

/// Per-cluster progress.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterProgress {
    pub bootstrap: BootstrapState,
    pub election_timer: TimerProgress,
    /// Last inactivity probe the store acknowledged.
    pub applied_probe_ms: Option<u64>,
}

/// Everything the reconciler keeps between passes.
///
/// Only values the store or service manager confirmed are recorded.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CentralState {
    pub clusters: BTreeMap<ClusterKind, ClusterProgress>,
    pub certificates: CertificateStore,
    /// TLS material written to disk, per role.
    pub installed_tls: BTreeMap<CertRole, CertificateBundle>,
    pub deferred: DeferredQueue,
    /// Whether automatic restarts were enabled during the last pass.
    pub auto_restarts_last_seen: Option<bool>,
    /// Digest of the rendered configuration last seen, per service.
    pub config_digests: BTreeMap<String, String>,
}

impl CentralState {
    /// Progress of one cluster, created on first use.
    pub fn cluster_mut(&mut self, cluster: ClusterKind) -> &mut ClusterProgress {
        self.clusters.entry(cluster).or_default()
    }

    /// Progress of one cluster.
    pub fn cluster(&self, cluster: ClusterKind) -> Option<&ClusterProgress> {
        self.clusters.get(&cluster)
    }

    /// Whether the local member joined `cluster`.
    pub fn is_joined(&self, cluster: ClusterKind) -> bool {
        self.cluster(cluster)
            .map(|p| p.bootstrap.is_joined())
            .unwrap_or(false)
    }
}

/// sled-backed store for [`CentralState`].
pub struct StateStore {
    db: Db,
    tree: Tree,
}

impl StateStore {
    /// Open or create the store under `path`.
    ///
    /// A handle dropped just before is released asynchronously by sled's
    /// flusher, so lock contention is retried for about two seconds.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut attempt = 1;
        loop {
            match sled::open(path) {
                Ok(db) => return Self::with_db(db),
                Err(err) if is_lock_contention(&err) && attempt < LOCK_ATTEMPTS => {
                    tracing::debug!(path = %path.display(), attempt, "state store locked, retrying");
                    attempt += 1;
                    thread::sleep(LOCK_RETRY_DELAY);
                }
                Err(err) => return Err(err.into()),
            }
        }
    }

    /// Open a throwaway in-memory store.
    pub fn temporary() -> Result<Self> {
        let db = sled::Config::new().temporary(true).open()?;
        Self::with_db(db)
    }

    fn with_db(db: Db) -> Result<Self> {
        let tree = db.open_tree(STATE_TREE)?;
        Ok(Self { db, tree })
    }

    /// Load the state; a fresh store yields the default state.
    pub fn load(&self) -> Result<CentralState> {
        match self.tree.get(KEY_STATE)? {
            Some(bytes) => Ok(serde_json::from_slice(&bytes)?),
            None => Ok(CentralState::default()),
        }
    }

    /// Replace the stored state and flush it to disk.
    pub fn save(&self, state: &CentralState) -> Result<()> {
        let bytes = serde_json::to_vec(state)?;
        self.tree.insert(KEY_STATE, bytes)?;
        self.flush()
    }

    /// Flush pending writes.
    pub fn flush(&self) -> Result<()> {
        self.db.flush()?;
        Ok(())
    }
}

/// Whether sled failed because another handle holds the directory lock.
fn is_lock_contention(err: &sled::Error) -> bool {
    match err {
        sled::Error::Io(io) => {
            io.kind() == std::io::ErrorKind::WouldBlock
                || io.to_string().contains("could not acquire lock")
        }
        _ => false,
    }
}
