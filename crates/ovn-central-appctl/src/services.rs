//! Service restarts through systemd.

use ovn_central_core::{RestartError, ServiceManager};

use crate::config::AppctlConfig;
use crate::runner::{CommandRunner, SystemRunner};

/// [`ServiceManager`] that runs `systemctl restart <service>`.
pub struct SystemdServices<R = SystemRunner> {
    systemctl: String,
    runner: R,
}

impl SystemdServices<SystemRunner> {
    pub fn new(config: &AppctlConfig) -> Self {
        Self::with_runner(config, SystemRunner)
    }
}

impl<R: CommandRunner> SystemdServices<R> {
    pub fn with_runner(config: &AppctlConfig, runner: R) -> Self {
        Self {
            systemctl: config.systemctl.clone(),
            runner,
        }
    }
}

impl<R: CommandRunner> ServiceManager for SystemdServices<R> {
    fn restart(&mut self, service: &str) -> Result<(), RestartError> {
        tracing::info!(%service, "restarting service");
        self.runner
            .run_checked(&self.systemctl, &["restart".to_string(), service.to_string()])
            .map(|_| ())
            .map_err(|e| RestartError::new(service, e.detail()))
    }
}
