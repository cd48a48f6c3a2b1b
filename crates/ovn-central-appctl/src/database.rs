//! Local cluster database files managed with `ovsdb-tool`.

use ovn_central_core::{ClusterDatabase, ClusterKind, JoinError, ServerId};

use crate::config::AppctlConfig;
use crate::error::Error;
use crate::runner::{CommandRunner, SystemRunner};

/// Diagnostics that will not go away by retrying.
const PERMANENT_MARKERS: &[&str] = &[
    "certificate",
    "protocol",
    "schema",
    "permission denied",
    "not a clustered database",
];

/// [`ClusterDatabase`] backed by `ovsdb-tool`.
pub struct OvsdbTool<R = SystemRunner> {
    config: AppctlConfig,
    runner: R,
}

impl OvsdbTool<SystemRunner> {
    pub fn new(config: AppctlConfig) -> Self {
        Self::with_runner(config, SystemRunner)
    }
}

impl<R: CommandRunner> OvsdbTool<R> {
    pub fn with_runner(config: AppctlConfig, runner: R) -> Self {
        Self { config, runner }
    }

    pub fn runner(&self) -> &R {
        &self.runner
    }

    fn run(&self, args: Vec<String>) -> Result<String, JoinError> {
        self.runner
            .run_checked(&self.config.ovsdb_tool, &args)
            .map_err(classify)
    }
}

/// Sort a tool failure into retryable or not.
fn classify(err: Error) -> JoinError {
    match &err {
        Error::Spawn { .. } => JoinError::NonRetryable(err.to_string()),
        _ => {
            let detail = err.detail();
            let lowered = detail.to_ascii_lowercase();
            if PERMANENT_MARKERS.iter().any(|m| lowered.contains(m)) {
                JoinError::NonRetryable(detail)
            } else {
                JoinError::Retryable(detail)
            }
        }
    }
}

impl<R: CommandRunner> ClusterDatabase for OvsdbTool<R> {
    fn server_id(&self, cluster: ClusterKind) -> Option<ServerId> {
        let file = self.config.db_file(cluster);
        if !file.exists() {
            return None;
        }
        match self.run(vec!["db-sid".to_string(), file.display().to_string()]) {
            Ok(out) if !out.trim().is_empty() => Some(ServerId::new(out.trim())),
            Ok(_) => None,
            Err(e) => {
                tracing::warn!(%cluster, error = %e, "failed to read server ID from database file");
                None
            }
        }
    }

    fn create_cluster(&mut self, cluster: ClusterKind, local: &str) -> Result<(), JoinError> {
        tracing::info!(%cluster, %local, "creating cluster database");
        self.run(vec![
            "create-cluster".to_string(),
            self.config.db_file(cluster).display().to_string(),
            self.config.schema_file(cluster).display().to_string(),
            local.to_string(),
        ])
        .map(|_| ())
    }

    fn join_cluster(
        &mut self,
        cluster: ClusterKind,
        local: &str,
        remotes: &[String],
    ) -> Result<(), JoinError> {
        tracing::info!(%cluster, %local, remotes = ?remotes, "joining cluster");
        let mut args = vec![
            "join-cluster".to_string(),
            self.config.db_file(cluster).display().to_string(),
            cluster.schema_name().to_string(),
            local.to_string(),
        ];
        args.extend(remotes.iter().cloned());
        self.run(args).map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::testing::ScriptedRunner;
    use crate::runner::CommandOutput;

    fn tool(dbdir: &std::path::Path, responses: Vec<CommandOutput>) -> OvsdbTool<ScriptedRunner> {
        OvsdbTool::with_runner(
            AppctlConfig::default().with_dbdir(dbdir),
            ScriptedRunner::new(responses),
        )
    }

    #[test]
    fn test_server_id_requires_database_file() {
        let dir = tempfile::tempdir().unwrap();
        let db = tool(dir.path(), vec![CommandOutput::ok("e8c5232f-864c\n")]);
        assert_eq!(db.server_id(ClusterKind::Northbound), None);
        assert!(db.runner().calls().is_empty());

        std::fs::write(dir.path().join("ovnnb_db.db"), b"").unwrap();
        assert_eq!(
            db.server_id(ClusterKind::Northbound),
            Some(ServerId::new("e8c5232f-864c"))
        );
    }

    #[test]
    fn test_join_cluster_arguments() {
        let dir = tempfile::tempdir().unwrap();
        let mut db = tool(dir.path(), vec![]);
        db.join_cluster(
            ClusterKind::Southbound,
            "ssl:10.0.0.2:6644",
            &["ssl:10.0.0.1:6644".to_string(), "ssl:10.0.0.3:6644".to_string()],
        )
        .unwrap();
        let expected = format!(
            "ovsdb-tool join-cluster {}/ovnsb_db.db OVN_Southbound ssl:10.0.0.2:6644 ssl:10.0.0.1:6644 ssl:10.0.0.3:6644",
            dir.path().display()
        );
        assert_eq!(db.runner().calls(), vec![expected]);
    }

    #[test]
    fn test_create_cluster_uses_schema_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut db = tool(dir.path(), vec![]);
        db.create_cluster(ClusterKind::Northbound, "ssl:10.0.0.1:6643").unwrap();
        let calls = db.runner().calls();
        assert!(calls[0].contains("create-cluster"));
        assert!(calls[0].ends_with("/usr/share/ovn/ovn-nb.ovsschema ssl:10.0.0.1:6643"));
    }

    #[test]
    fn test_failures_are_classified() {
        let dir = tempfile::tempdir().unwrap();
        let mut db = tool(
            dir.path(),
            vec![
                CommandOutput::failed(1, "I/O error: resource temporarily unavailable"),
                CommandOutput::failed(1, "ssl: certificate verify failed"),
            ],
        );
        let first = db.join_cluster(ClusterKind::Northbound, "ssl:a:6643", &[]).unwrap_err();
        assert!(first.is_retryable());
        let second = db.join_cluster(ClusterKind::Northbound, "ssl:a:6643", &[]).unwrap_err();
        assert_eq!(
            second,
            JoinError::NonRetryable("ssl: certificate verify failed".to_string())
        );
    }
}
