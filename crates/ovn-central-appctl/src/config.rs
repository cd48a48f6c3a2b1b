//! Locations of the OVN tools, sockets and files.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use ovn_central_core::ClusterKind;

/// Default directory holding the control sockets.
pub const DEFAULT_RUNDIR: &str = "/var/run/ovn";

/// Default directory for TLS material.
pub const DEFAULT_SYSCONFDIR: &str = "/etc/ovn";

/// Default directory for the database files.
pub const DEFAULT_DBDIR: &str = "/var/lib/ovn";

/// Default directory for the database schemas.
pub const DEFAULT_SCHEMADIR: &str = "/usr/share/ovn";

/// Paths and programs used by the appctl collaborators.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct AppctlConfig {
    pub rundir: PathBuf,
    pub sysconfdir: PathBuf,
    pub dbdir: PathBuf,
    pub schemadir: PathBuf,
    pub appctl: String,
    pub nbctl: String,
    pub sbctl: String,
    pub ovsdb_tool: String,
    pub systemctl: String,
}

impl Default for AppctlConfig {
    fn default() -> Self {
        Self {
            rundir: PathBuf::from(DEFAULT_RUNDIR),
            sysconfdir: PathBuf::from(DEFAULT_SYSCONFDIR),
            dbdir: PathBuf::from(DEFAULT_DBDIR),
            schemadir: PathBuf::from(DEFAULT_SCHEMADIR),
            appctl: "ovn-appctl".to_string(),
            nbctl: "ovn-nbctl".to_string(),
            sbctl: "ovn-sbctl".to_string(),
            ovsdb_tool: "ovsdb-tool".to_string(),
            systemctl: "systemctl".to_string(),
        }
    }
}

impl AppctlConfig {
    /// Set the control socket directory.
    pub fn with_rundir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.rundir = dir.into();
        self
    }

    /// Set the TLS material directory.
    pub fn with_sysconfdir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.sysconfdir = dir.into();
        self
    }

    /// Set the database directory.
    pub fn with_dbdir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.dbdir = dir.into();
        self
    }

    /// Control socket of a database server, e.g. `/var/run/ovn/ovnsb_db.ctl`.
    pub fn control_socket(&self, cluster: ClusterKind) -> PathBuf {
        self.rundir.join(format!("{}.ctl", cluster.db_name()))
    }

    /// Database file, e.g. `/var/lib/ovn/ovnsb_db.db`.
    pub fn db_file(&self, cluster: ClusterKind) -> PathBuf {
        self.dbdir.join(format!("{}.db", cluster.db_name()))
    }

    /// Schema file, e.g. `/usr/share/ovn/ovn-sb.ovsschema`.
    pub fn schema_file(&self, cluster: ClusterKind) -> PathBuf {
        self.schemadir
            .join(format!("ovn-{}.ovsschema", cluster.short_name()))
    }

    /// `ovn-nbctl` or `ovn-sbctl`.
    pub fn ctl_program(&self, cluster: ClusterKind) -> &str {
        match cluster {
            ClusterKind::Northbound => &self.nbctl,
            ClusterKind::Southbound => &self.sbctl,
        }
    }

    /// Directory TLS material is written to.
    pub fn tls_dir(&self) -> &Path {
        &self.sysconfdir
    }
}
