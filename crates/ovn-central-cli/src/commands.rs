//! Subcommand execution.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;

use anyhow::Context;

use ovn_central_appctl::{AppctlConfig, AppctlGateway, OvsdbTool, SystemdServices, TlsFiles};
use ovn_central_core::{
    actions, depart, reconcile, CentralConfig, ClusterAdminGateway, ClusterKind, Collaborators,
    DbHealth, PassReport, RawObservations, StateStore, Unit,
};

use crate::args::{Command, Settings};
use crate::formatter::Formatter;

/// Read the observation document.
pub fn load_observations(path: &Path) -> anyhow::Result<RawObservations> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading observations {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("parsing observations {}", path.display()))
}

/// Units known from the observation document, for mapping servers to units.
fn known_units(observations: Option<&Path>) -> anyhow::Result<Vec<Unit>> {
    let Some(path) = observations else {
        return Ok(Vec::new());
    };
    match load_observations(path)?.validate() {
        Ok(observations) => Ok(observations.all_units()),
        Err(err) => {
            tracing::warn!(error = %err, "observations incomplete, units will show as UNKNOWN");
            Ok(Vec::new())
        }
    }
}

/// Address of the local unit from the observation document, if known.
fn local_address(observations: Option<&Path>) -> anyhow::Result<Option<String>> {
    let Some(path) = observations else {
        return Ok(None);
    };
    Ok(load_observations(path)?
        .local_address
        .filter(|a| !a.trim().is_empty()))
}

/// Runs reconcile passes against the local OVN installation.
///
/// The state store is opened for the duration of one pass only, so operator
/// actions can run between passes.
pub struct Reconciler {
    central: CentralConfig,
    appctl: AppctlConfig,
    state_dir: PathBuf,
    observations: Option<PathBuf>,
}

impl Reconciler {
    pub fn new(settings: &Settings) -> Self {
        Self {
            central: settings.central.clone(),
            appctl: settings.appctl.clone(),
            state_dir: settings.state_dir.clone(),
            observations: settings.observations.clone(),
        }
    }

    /// Run one pass and persist the resulting state.
    pub fn pass(&self) -> anyhow::Result<PassReport> {
        let raw = match &self.observations {
            Some(path) => load_observations(path)?,
            None => RawObservations::default(),
        };

        let store = StateStore::open(&self.state_dir)
            .with_context(|| format!("opening state in {}", self.state_dir.display()))?;
        let mut state = store.load()?;

        let mut gateway = AppctlGateway::new(self.appctl.clone());
        let mut database = OvsdbTool::new(self.appctl.clone());
        let mut services = SystemdServices::new(&self.appctl);
        let mut tls = TlsFiles::from_config(&self.appctl);
        let report = reconcile(
            &mut state,
            &self.central,
            raw,
            &mut Collaborators {
                gateway: &mut gateway,
                database: &mut database,
                services: &mut services,
                tls: &mut tls,
            },
        );

        store.save(&state)?;
        tracing::debug!(state_dir = %self.state_dir.display(), "state saved");
        Ok(report)
    }
}

/// Keep running passes until interrupted.
async fn watch(reconciler: Reconciler, interval: Duration, formatter: &dyn Formatter) -> anyhow::Result<()> {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    let mut reconciler = Some(reconciler);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let Some(current) = reconciler.take() else { break };
                let (result, current) = tokio::task::spawn_blocking(move || {
                    let result = current.pass();
                    (result, current)
                })
                .await
                .context("reconcile task panicked")?;
                reconciler = Some(current);
                match result {
                    Ok(report) => println!("{}", formatter.pass_report(&report)),
                    Err(e) => tracing::error!(error = %e, "reconcile pass failed"),
                }
            }
            signal = tokio::signal::ctrl_c() => {
                if let Err(e) = signal {
                    tracing::error!(error = %e, "failed to listen for ctrl+c");
                }
                tracing::info!("received shutdown signal");
                break;
            }
        }
    }
    Ok(())
}

/// Execute a subcommand.
pub async fn execute(
    command: Command,
    settings: Settings,
    formatter: &dyn Formatter,
) -> anyhow::Result<ExitCode> {
    match command {
        Command::Reconcile { watch: true, interval } => {
            watch(
                Reconciler::new(&settings),
                Duration::from_secs(interval.max(1)),
                formatter,
            )
            .await?;
        }
        Command::Reconcile { watch: false, .. } => {
            let reconciler = Reconciler::new(&settings);
            let report = tokio::task::spawn_blocking(move || reconciler.pass())
                .await
                .context("reconcile task panicked")??;
            println!("{}", formatter.pass_report(&report));
        }
        Command::ClusterStatus => {
            let gateway = AppctlGateway::new(settings.appctl.clone());
            let units = known_units(settings.observations.as_deref())?;
            let report = actions::cluster_status(&gateway, &units)?;
            println!("{}", formatter.cluster_status(&report));
        }
        Command::ClusterKick {
            sb_server_id,
            nb_server_id,
            i_really_mean_it,
        } => {
            let mut gateway = AppctlGateway::new(settings.appctl.clone());
            let kicked = actions::cluster_kick(
                &mut gateway,
                sb_server_id.as_deref(),
                nb_server_id.as_deref(),
                i_really_mean_it,
            )?;
            println!("{}", formatter.kick_result(&kicked));
        }
        Command::RestartServices {
            deferred_only,
            services: service_list,
            run_hooks,
        } => {
            let store = StateStore::open(&settings.state_dir)?;
            let mut state = store.load()?;
            let mut services = SystemdServices::new(&settings.appctl);
            let mut tls = TlsFiles::from_config(&settings.appctl);
            let report = actions::restart_services(
                &mut state,
                &settings.central,
                &mut services,
                &mut tls,
                deferred_only,
                &service_list,
                run_hooks,
            );
            store.save(&state)?;
            let report = report?;
            println!("{}", formatter.run_report(&report));
            if !report.is_success() {
                return Ok(ExitCode::FAILURE);
            }
        }
        Command::RunDeferredHooks => {
            let store = StateStore::open(&settings.state_dir)?;
            let mut state = store.load()?;
            let mut services = SystemdServices::new(&settings.appctl);
            let mut tls = TlsFiles::from_config(&settings.appctl);
            let report = actions::run_deferred_hooks(&mut state, &mut services, &mut tls);
            store.save(&state)?;
            println!("{}", formatter.run_report(&report));
            if !report.is_success() {
                return Ok(ExitCode::FAILURE);
            }
        }
        Command::ShowDeferredEvents => {
            let store = StateStore::open(&settings.state_dir)?;
            let state = store.load()?;
            println!("{}", formatter.deferred_events(&actions::show_deferred_events(&state)));
        }
        Command::DbHealth => {
            let gateway = AppctlGateway::new(settings.appctl.clone());
            return Ok(db_health(&gateway));
        }
        Command::Depart => {
            let mut gateway = AppctlGateway::new(settings.appctl.clone());
            let local = local_address(settings.observations.as_deref())?;
            let problems = depart(&mut gateway, local.as_deref());
            for problem in &problems {
                eprintln!("{}", problem);
            }
            if !problems.is_empty() {
                return Ok(ExitCode::FAILURE);
            }
        }
    }
    Ok(ExitCode::SUCCESS)
}

/// Print one line per database; exit with the monitoring code of the worst.
fn db_health(gateway: &dyn ClusterAdminGateway) -> ExitCode {
    let mut worst = DbHealth::Ok;
    for cluster in [ClusterKind::Northbound, ClusterKind::Southbound] {
        let (health, message) = DbHealth::check(cluster, &gateway.status(cluster));
        println!("{}", message);
        worst = worst.max(health);
    }
    ExitCode::from(worst.exit_code())
}
