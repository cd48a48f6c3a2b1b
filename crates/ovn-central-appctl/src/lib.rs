//! OVN Central Appctl - command line backed collaborators for the core.
//!
//! Implements the external traits of `ovn-central-core` on top of the OVN
//! tooling installed on the host:
//! - [`AppctlGateway`] - `ovn-appctl cluster/*` and `ovn-{nb,sb}ctl`
//! - [`OvsdbTool`] - `ovsdb-tool create-cluster`, `join-cluster`, `db-sid`
//! - [`SystemdServices`] - `systemctl restart`
//! - [`TlsFiles`] - PEM files under the OVN sysconfdir
//!
//! Every collaborator takes a [`CommandRunner`], so the exact command lines
//! can be checked without the tools present.
//!
//! # Quick Start
//!
//! ```ignore
//! use ovn_central_appctl::{AppctlConfig, AppctlGateway};
//! use ovn_central_core::{ClusterAdminGateway, ClusterKind};
//!
//! let gateway = AppctlGateway::new(AppctlConfig::default());
//! let status = gateway.status(ClusterKind::Southbound)?;
//! println!("leader: {:?}", status.leader_id());
//! ```

pub mod config;
pub mod database;
pub mod error;
pub mod gateway;
pub mod runner;
pub mod services;
pub mod status_parser;
pub mod tls_files;

pub use config::AppctlConfig;
pub use database::OvsdbTool;
pub use error::Error;
pub use gateway::AppctlGateway;
pub use runner::{CommandOutput, CommandRunner, SystemRunner};
pub use services::SystemdServices;
pub use status_parser::parse_cluster_status;
pub use tls_files::{TlsFiles, TlsLayout};
