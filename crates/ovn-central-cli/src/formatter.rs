//! Output formatters for action results.

use std::collections::BTreeMap;

use clap::ValueEnum;
use comfy_table::{Cell, Table};
use serde::Serialize;

use ovn_central_core::actions::{ClusterStatusReport, FormattedStatus};
use ovn_central_core::{ClusterKind, DeferredEvent, PassReport, RunReport};

/// Output format for results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// ASCII table format
    Table,
    /// JSON format
    Json,
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OutputFormat::Table => write!(f, "table"),
            OutputFormat::Json => write!(f, "json"),
        }
    }
}

/// Trait for formatting action results.
pub trait Formatter: Send + Sync {
    fn cluster_status(&self, report: &ClusterStatusReport) -> String;

    fn kick_result(&self, kicked: &BTreeMap<ClusterKind, String>) -> String;

    fn run_report(&self, report: &RunReport) -> String;

    fn deferred_events(&self, events: &[DeferredEvent]) -> String;

    fn pass_report(&self, report: &PassReport) -> String;
}

/// Create a formatter for the given output format.
pub fn create_formatter(format: OutputFormat) -> Box<dyn Formatter> {
    match format {
        OutputFormat::Table => Box::new(TableFormatter),
        OutputFormat::Json => Box::new(JsonFormatter),
    }
}

/// Table formatter using comfy-table.
pub struct TableFormatter;

impl Formatter for TableFormatter {
    fn cluster_status(&self, report: &ClusterStatusReport) -> String {
        [("ovnnb", &report.ovnnb), ("ovnsb", &report.ovnsb)]
            .into_iter()
            .map(|(name, status)| format!("{}\n{}", name, format_status_table(status)))
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    fn kick_result(&self, kicked: &BTreeMap<ClusterKind, String>) -> String {
        let mut table = Table::new();
        table.set_header(vec!["Cluster", "Result"]);
        for (cluster, message) in kicked {
            table.add_row(vec![cluster.display_name(), message.as_str()]);
        }
        table.to_string()
    }

    fn run_report(&self, report: &RunReport) -> String {
        let mut table = Table::new();
        table.set_header(vec!["Target", "Outcome"]);
        for hook in &report.hooks_run {
            table.add_row(vec![hook.clone(), "hook run".to_string()]);
        }
        for service in &report.restarted {
            table.add_row(vec![service.clone(), "restarted".to_string()]);
        }
        for failure in &report.failures {
            table.add_row(vec![failure.target.clone(), format!("failed: {}", failure.reason)]);
        }
        if report.hooks_run.is_empty() && report.restarted.is_empty() && report.failures.is_empty() {
            return "Nothing to do".to_string();
        }
        table.to_string()
    }

    fn deferred_events(&self, events: &[DeferredEvent]) -> String {
        if events.is_empty() {
            return "No deferred events".to_string();
        }
        let mut table = Table::new();
        table.set_header(vec!["Action", "Target", "Reason", "Created"]);
        for event in events {
            table.add_row(vec![
                Cell::new(event.action),
                Cell::new(&event.target),
                Cell::new(&event.reason),
                Cell::new(event.created_at.format("%Y-%m-%d %H:%M:%S UTC")),
            ]);
        }
        table.to_string()
    }

    fn pass_report(&self, report: &PassReport) -> String {
        let mut output = format!("Status: {}", report.workload);

        if !report.effects.is_empty() {
            let mut table = Table::new();
            table.set_header(vec!["Side effect"]);
            for effect in &report.effects {
                table.add_row(vec![effect.to_string()]);
            }
            output.push_str("\n\n");
            output.push_str(&table.to_string());
        }

        if !report.problems.is_empty() {
            let mut table = Table::new();
            table.set_header(vec!["Problem"]);
            for problem in &report.problems {
                table.add_row(vec![problem.to_string()]);
            }
            output.push_str("\n\n");
            output.push_str(&table.to_string());
        }

        output
    }
}

fn format_status_table(status: &FormattedStatus) -> String {
    let optional = |v: &Option<String>| v.clone().unwrap_or_default();

    let mut table = Table::new();
    table.set_header(vec!["Field", "Value"]);
    let rows = [
        ("Cluster ID", status.cluster_id.clone()),
        ("Server ID", status.server_id.clone()),
        ("Address", status.address.clone()),
        ("Status", status.status.clone()),
        ("Role", status.role.clone()),
        ("Term", status.term.to_string()),
        ("Leader", optional(&status.leader)),
        ("Vote", optional(&status.vote)),
        (
            "Election timer",
            status.election_timer.map(|t| t.to_string()).unwrap_or_default(),
        ),
        ("Log", status.log.clone()),
        ("Entries not yet committed", status.entries_not_yet_committed.to_string()),
        ("Entries not yet applied", status.entries_not_yet_applied.to_string()),
    ];
    for (field, value) in rows {
        table.add_row(vec![field.to_string(), value]);
    }

    let mut servers = Table::new();
    servers.set_header(vec!["Server", "Address", "Unit"]);
    for (id, server) in &status.servers {
        servers.add_row(vec![id.as_str(), server.address.as_str(), server.unit.as_str()]);
    }

    format!("{}\n{}", table, servers)
}

/// JSON formatter.
pub struct JsonFormatter;

fn to_json<T: Serialize + ?Sized>(value: &T) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|e| format!("{{\"error\": \"{}\"}}", e))
}

impl Formatter for JsonFormatter {
    fn cluster_status(&self, report: &ClusterStatusReport) -> String {
        to_json(report)
    }

    fn kick_result(&self, kicked: &BTreeMap<ClusterKind, String>) -> String {
        let by_key: BTreeMap<&str, &String> = kicked
            .iter()
            .map(|(cluster, message)| (cluster.action_key(), message))
            .collect();
        to_json(&by_key)
    }

    fn run_report(&self, report: &RunReport) -> String {
        to_json(report)
    }

    fn deferred_events(&self, events: &[DeferredEvent]) -> String {
        to_json(events)
    }

    fn pass_report(&self, report: &PassReport) -> String {
        to_json(report)
    }
}
