//! OVN Central command-line tool
//!
//! Reconciles the clustered OVN databases on this unit and exposes the
//! operator actions.

mod args;
mod commands;
mod formatter;

use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use args::Cli;

#[tokio::main]
async fn main() -> ExitCode {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "ovn_central=info,ovn_central_core=info,ovn_central_appctl=info".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let formatter = formatter::create_formatter(cli.global.format);

    let result = async {
        let settings = cli.global.into_settings()?;
        tracing::debug!(
            state_dir = %settings.state_dir.display(),
            rundir = %settings.appctl.rundir.display(),
            "configuration loaded"
        );
        commands::execute(cli.command, settings, &*formatter).await
    }
    .await;

    match result {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}
