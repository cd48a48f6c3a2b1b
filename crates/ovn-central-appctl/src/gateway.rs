//! Cluster administration through `ovn-appctl` and the `ovn-*ctl` tools.

use ovn_central_core::{ClusterAdminGateway, ClusterKind, ClusterStatus, GatewayError, KickRequest};

use crate::config::AppctlConfig;
use crate::error::Error;
use crate::runner::{CommandRunner, SystemRunner};
use crate::status_parser::parse_cluster_status;

/// [`ClusterAdminGateway`] backed by the control sockets of the local
/// `ovsdb-server` processes.
pub struct AppctlGateway<R = SystemRunner> {
    config: AppctlConfig,
    runner: R,
}

impl AppctlGateway<SystemRunner> {
    /// Gateway running the real tools.
    pub fn new(config: AppctlConfig) -> Self {
        Self::with_runner(config, SystemRunner)
    }
}

impl<R: CommandRunner> AppctlGateway<R> {
    /// Gateway using a custom command runner.
    pub fn with_runner(config: AppctlConfig, runner: R) -> Self {
        Self { config, runner }
    }

    /// The command runner.
    pub fn runner(&self) -> &R {
        &self.runner
    }

    fn appctl(&self, cluster: ClusterKind, command: &str, extra: &[String]) -> Result<String, Error> {
        let mut args = vec![
            "-t".to_string(),
            self.config.control_socket(cluster).display().to_string(),
            command.to_string(),
            cluster.schema_name().to_string(),
        ];
        args.extend_from_slice(extra);
        self.runner.run_checked(&self.config.appctl, &args)
    }

    fn ctl(&self, cluster: ClusterKind, args: &[&str]) -> Result<String, Error> {
        let socket = self
            .config
            .rundir
            .join(format!("{}.sock", cluster.db_name()));
        let mut full = vec![format!("--db=unix:{}", socket.display())];
        full.extend(args.iter().map(|a| a.to_string()));
        self.runner.run_checked(self.config.ctl_program(cluster), &full)
    }
}

/// A failed mutation is a rejection unless the server could not be reached.
fn mutation_error(cluster: ClusterKind, err: Error) -> GatewayError {
    if err.is_unreachable() {
        GatewayError::unreachable(cluster, err.detail())
    } else {
        GatewayError::rejected(cluster, err.detail())
    }
}

impl<R: CommandRunner> ClusterAdminGateway for AppctlGateway<R> {
    fn status(&self, cluster: ClusterKind) -> Result<ClusterStatus, GatewayError> {
        let output = self
            .appctl(cluster, "cluster/status", &[])
            .map_err(|e| GatewayError::unreachable(cluster, e.detail()))?;
        parse_cluster_status(&output).map_err(|e| GatewayError::unreachable(cluster, e.to_string()))
    }

    fn set_election_timer(&mut self, cluster: ClusterKind, millis: u64) -> Result<(), GatewayError> {
        tracing::info!(%cluster, millis, "changing election timer");
        self.appctl(cluster, "cluster/change-election-timer", &[millis.to_string()])
            .map(|_| ())
            .map_err(|e| mutation_error(cluster, e))
    }

    fn set_inactivity_probe(&mut self, cluster: ClusterKind, millis: u64) -> Result<(), GatewayError> {
        let uuids = self
            .ctl(cluster, &["--bare", "--columns=_uuid", "find", "connection"])
            .map_err(|e| GatewayError::unreachable(cluster, e.detail()))?;
        let probe = format!("inactivity_probe={}", millis);
        let mut updated = 0;
        for uuid in uuids.split_whitespace() {
            self.ctl(cluster, &["set", "connection", uuid, probe.as_str()])
                .map_err(|e| mutation_error(cluster, e))?;
            updated += 1;
        }
        if updated == 0 {
            return Err(GatewayError::unreachable(cluster, "no listener connections configured"));
        }
        tracing::info!(%cluster, millis, connections = updated, "set inactivity probe");
        Ok(())
    }

    fn kick(&mut self, request: &KickRequest) -> Result<(), GatewayError> {
        let cluster = request.cluster();
        tracing::warn!(%cluster, server_id = %request.server_id(), "kicking server from cluster");
        self.appctl(cluster, "cluster/kick", &[request.server_id().to_string()])
            .map(|_| ())
            .map_err(|e| mutation_error(cluster, e))
    }

    fn leave(&mut self, cluster: ClusterKind) -> Result<(), GatewayError> {
        tracing::info!(%cluster, "leaving cluster");
        self.appctl(cluster, "cluster/leave", &[])
            .map(|_| ())
            .map_err(|e| mutation_error(cluster, e))
    }
}

#[cfg(test)]
mod tests {
    use ovn_central_core::{Confirmation, ServerId};

    use super::*;
    use crate::runner::testing::ScriptedRunner;
    use crate::runner::CommandOutput;

    const STATUS: &str = "\
Cluster ID: 6a8f (6a8f9149-3368-4bae-88c5-d6fe2be9b847)
Server ID: e8c5 (e8c5232f-864c-4e61-990d-e54c666be4bc)
Address: ssl:10.5.0.24:6644
Status: cluster member
Role: follower
Term: 2
Leader: f4d0
Election timer: 4000
Servers:
    e8c5 (e8c5 at ssl:10.5.0.24:6644) (self)
    f4d0 (f4d0 at ssl:10.5.0.4:6644)
";

    fn gateway(responses: Vec<CommandOutput>) -> AppctlGateway<ScriptedRunner> {
        AppctlGateway::with_runner(AppctlConfig::default(), ScriptedRunner::new(responses))
    }

    #[test]
    fn test_status_invokes_control_socket() {
        let gw = gateway(vec![CommandOutput::ok(STATUS)]);
        let status = gw.status(ClusterKind::Southbound).unwrap();
        assert_eq!(status.leader_id(), Some(ServerId::new("f4d0")));
        assert_eq!(
            gw.runner().calls(),
            vec!["ovn-appctl -t /var/run/ovn/ovnsb_db.ctl cluster/status OVN_Southbound"]
        );
    }

    #[test]
    fn test_status_failure_is_unreachable() {
        let gw = gateway(vec![CommandOutput::failed(1, "cannot connect to socket")]);
        let err = gw.status(ClusterKind::Northbound).unwrap_err();
        assert_eq!(
            err,
            GatewayError::unreachable(ClusterKind::Northbound, "cannot connect to socket")
        );
    }

    #[test]
    fn test_timer_change_rejected() {
        let mut gw = gateway(vec![CommandOutput::failed(
            2,
            "election timer must be at most 2x the current value",
        )]);
        let err = gw.set_election_timer(ClusterKind::Northbound, 9000).unwrap_err();
        assert!(matches!(err, GatewayError::Rejected { .. }));
        assert_eq!(
            gw.runner().calls(),
            vec![
                "ovn-appctl -t /var/run/ovn/ovnnb_db.ctl cluster/change-election-timer OVN_Northbound 9000"
            ]
        );
    }

    #[test]
    fn test_inactivity_probe_updates_every_listener() {
        let mut gw = gateway(vec![CommandOutput::ok("uuid-1\n\nuuid-2\n")]);
        gw.set_inactivity_probe(ClusterKind::Southbound, 60000).unwrap();
        assert_eq!(
            gw.runner().calls(),
            vec![
                "ovn-sbctl --db=unix:/var/run/ovn/ovnsb_db.sock --bare --columns=_uuid find connection",
                "ovn-sbctl --db=unix:/var/run/ovn/ovnsb_db.sock set connection uuid-1 inactivity_probe=60000",
                "ovn-sbctl --db=unix:/var/run/ovn/ovnsb_db.sock set connection uuid-2 inactivity_probe=60000",
            ]
        );
    }

    #[test]
    fn test_mutation_without_server_is_unreachable() {
        let mut gw = gateway(vec![CommandOutput::failed(
            1,
            "ovn-appctl: cannot connect to \"/var/run/ovn/ovnsb_db.ctl\" (No such file or directory)",
        )]);
        let err = gw.set_election_timer(ClusterKind::Southbound, 8000).unwrap_err();
        assert!(matches!(err, GatewayError::Unreachable { .. }));

        let mut missing = AppctlGateway::new(AppctlConfig {
            appctl: "/nonexistent/ovn-appctl".to_string(),
            ..AppctlConfig::default()
        });
        let err = missing.leave(ClusterKind::Northbound).unwrap_err();
        assert!(matches!(err, GatewayError::Unreachable { .. }));
    }

    #[test]
    fn test_kick_unknown_server_is_rejected() {
        let mut gw = gateway(vec![CommandOutput::failed(2, "unknown server")]);
        let confirmed = Confirmation::from_flag(true).unwrap();
        let request = KickRequest::new(ClusterKind::Northbound, ServerId::new("ffff"), confirmed);
        let err = gw.kick(&request).unwrap_err();
        assert_eq!(err, GatewayError::rejected(ClusterKind::Northbound, "unknown server"));
    }

    #[test]
    fn test_kick_and_leave() {
        let mut gw = gateway(vec![]);
        let confirmed = Confirmation::from_flag(true).unwrap();
        let request = KickRequest::new(ClusterKind::Northbound, ServerId::new("f4d0"), confirmed);
        gw.kick(&request).unwrap();
        gw.leave(ClusterKind::Southbound).unwrap();
        assert_eq!(
            gw.runner().calls(),
            vec![
                "ovn-appctl -t /var/run/ovn/ovnnb_db.ctl cluster/kick OVN_Northbound f4d0",
                "ovn-appctl -t /var/run/ovn/ovnsb_db.ctl cluster/leave OVN_Southbound",
            ]
        );
    }
}
