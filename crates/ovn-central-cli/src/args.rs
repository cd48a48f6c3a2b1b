//! Command-line arguments and configuration loading.

use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Parser, Subcommand};

use ovn_central_appctl::config::{DEFAULT_DBDIR, DEFAULT_RUNDIR, DEFAULT_SYSCONFDIR};
use ovn_central_appctl::AppctlConfig;
use ovn_central_core::CentralConfig;

use crate::formatter::OutputFormat;

/// Default directory for the persisted reconcile state.
pub const DEFAULT_STATE_DIR: &str = "/var/lib/ovn-central";

/// Default pause between passes in watch mode, in seconds.
pub const DEFAULT_WATCH_INTERVAL_SECS: u64 = 30;

/// Lifecycle management for the clustered OVN Northbound and Southbound databases.
#[derive(Parser, Debug)]
#[command(name = "ovn-central")]
#[command(version, about = "OVN central database lifecycle manager", long_about = None)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalArgs,

    #[command(subcommand)]
    pub command: Command,
}

/// Options shared by every subcommand.
#[derive(clap::Args, Debug, Clone)]
pub struct GlobalArgs {
    /// Directory holding the persisted reconcile state.
    #[arg(long, global = true, default_value = DEFAULT_STATE_DIR)]
    pub state_dir: PathBuf,

    /// JSON configuration file.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// JSON observation document written by the runtime.
    #[arg(long, global = true)]
    pub observations: Option<PathBuf>,

    /// Directory holding the database control sockets.
    #[arg(long, global = true, default_value = DEFAULT_RUNDIR)]
    pub rundir: PathBuf,

    /// Directory TLS material is written to.
    #[arg(long, global = true, default_value = DEFAULT_SYSCONFDIR)]
    pub sysconfdir: PathBuf,

    /// Directory holding the database files.
    #[arg(long, global = true, default_value = DEFAULT_DBDIR)]
    pub dbdir: PathBuf,

    /// Override the election timer, in seconds.
    #[arg(long, global = true)]
    pub election_timer: Option<u64>,

    /// Override the inactivity probe, in seconds.
    #[arg(long, global = true)]
    pub inactivity_probe: Option<u64>,

    /// Override whether services may be restarted automatically.
    #[arg(long, global = true)]
    pub enable_auto_restarts: Option<bool>,

    /// Output format.
    #[arg(long, global = true, value_enum, default_value_t = OutputFormat::Table)]
    pub format: OutputFormat,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Run a reconcile pass, or keep running passes with --watch.
    Reconcile {
        /// Keep reconciling until interrupted.
        #[arg(long)]
        watch: bool,

        /// Seconds between passes in watch mode.
        #[arg(long, default_value_t = DEFAULT_WATCH_INTERVAL_SECS)]
        interval: u64,
    },

    /// Show the status of both clusters.
    ClusterStatus,

    /// Remove a member from a cluster by server ID.
    ClusterKick {
        /// Southbound server ID to kick.
        #[arg(long)]
        sb_server_id: Option<String>,

        /// Northbound server ID to kick.
        #[arg(long)]
        nb_server_id: Option<String>,

        /// Confirm the destructive operation.
        #[arg(long)]
        i_really_mean_it: bool,
    },

    /// Restart services with pending restarts or the listed services.
    RestartServices {
        /// Restart only services with deferred restarts.
        #[arg(long)]
        deferred_only: bool,

        /// Comma separated services to restart; empty restarts every managed service.
        #[arg(long, default_value = "")]
        services: String,

        /// Run deferred hooks before restarting.
        #[arg(long)]
        run_hooks: bool,
    },

    /// Run deferred hooks and then every queued restart.
    RunDeferredHooks,

    /// List deferred restarts and hooks.
    ShowDeferredEvents,

    /// Monitoring check of both databases.
    DbHealth,

    /// Leave both clusters before this unit is removed.
    Depart,
}

/// Configuration for a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub central: CentralConfig,
    pub appctl: AppctlConfig,
    pub state_dir: PathBuf,
    pub observations: Option<PathBuf>,
}

impl GlobalArgs {
    /// Load the configuration file, if any, and apply command-line overrides.
    pub fn into_settings(self) -> anyhow::Result<Settings> {
        let mut central = match &self.config {
            Some(path) => load_config(path)?,
            None => CentralConfig::default(),
        };
        if let Some(secs) = self.election_timer {
            central = central.with_election_timer(secs);
        }
        if let Some(secs) = self.inactivity_probe {
            central = central.with_inactivity_probe(secs);
        }
        if let Some(enabled) = self.enable_auto_restarts {
            central = central.with_auto_restarts(enabled);
        }

        let appctl = AppctlConfig::default()
            .with_rundir(self.rundir)
            .with_sysconfdir(self.sysconfdir)
            .with_dbdir(self.dbdir);

        Ok(Settings {
            central,
            appctl,
            state_dir: self.state_dir,
            observations: self.observations,
        })
    }
}

fn load_config(path: &Path) -> anyhow::Result<CentralConfig> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading configuration {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("parsing configuration {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cli = Cli::try_parse_from(["ovn-central", "cluster-status"]).unwrap();
        assert_eq!(cli.command, Command::ClusterStatus);
        assert_eq!(cli.global.format, OutputFormat::Table);

        let settings = cli.global.into_settings().unwrap();
        assert_eq!(settings.central, CentralConfig::default());
        assert_eq!(settings.state_dir, PathBuf::from(DEFAULT_STATE_DIR));
        assert_eq!(settings.appctl, AppctlConfig::default());
    }

    #[test]
    fn test_kick_arguments() {
        let cli = Cli::try_parse_from([
            "ovn-central",
            "cluster-kick",
            "--sb-server-id",
            "aa11",
            "--i-really-mean-it",
        ])
        .unwrap();
        assert_eq!(
            cli.command,
            Command::ClusterKick {
                sb_server_id: Some("aa11".to_string()),
                nb_server_id: None,
                i_really_mean_it: true,
            }
        );
    }

    #[test]
    fn test_overrides_apply_on_top_of_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(
            &path,
            r#"{"ovsdb-server-election-timer": 10, "enable-auto-restarts": false}"#,
        )
        .unwrap();

        let cli = Cli::try_parse_from([
            "ovn-central",
            "reconcile",
            "--config",
            path.to_str().unwrap(),
            "--inactivity-probe",
            "120",
            "--rundir",
            "/run/ovn",
        ])
        .unwrap();
        let settings = cli.global.into_settings().unwrap();
        assert_eq!(settings.central.election_timer_secs, 10);
        assert_eq!(settings.central.inactivity_probe_secs, 120);
        assert!(!settings.central.enable_auto_restarts);
        assert_eq!(settings.appctl.rundir, PathBuf::from("/run/ovn"));
    }

    #[test]
    fn test_unreadable_config_is_an_error() {
        let cli = Cli::try_parse_from([
            "ovn-central",
            "show-deferred-events",
            "--config",
            "/nonexistent/ovn-central.json",
        ])
        .unwrap();
        assert!(cli.global.into_settings().is_err());
    }
}
