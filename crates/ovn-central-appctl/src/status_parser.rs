//! Parser for `ovn-appctl cluster/status` output.

use ovn_central_core::{ClusterStatus, MemberRole, ServerEntry, ServerId};

use crate::error::{Error, Result};

/// Parse the text report of `cluster/status <schema>`.
///
/// Identifier fields print as `abcd (abcd1234-...)`; the full form in
/// parentheses is kept. `Servers:` is followed by indented lines of the form
/// `abcd (abcd at ssl:10.0.0.1:6644) ...`.
pub fn parse_cluster_status(text: &str) -> Result<ClusterStatus> {
    let mut status = ClusterStatus::default();
    let mut seen_server_id = false;
    let mut in_servers = false;

    for line in text.lines() {
        if line.starts_with(char::is_whitespace) {
            if in_servers && !line.trim().is_empty() {
                status.servers.push(parse_server_line(line.trim())?);
            }
            continue;
        }
        in_servers = false;

        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let value = value.trim();
        match key.trim() {
            "Cluster ID" => status.cluster_id = full_identifier(value).to_string(),
            "Server ID" => {
                status.server_id = ServerId::new(full_identifier(value));
                seen_server_id = true;
            }
            "Address" => status.address = value.to_string(),
            "Status" => status.status = value.to_string(),
            "Role" => status.role = value.parse().unwrap_or(MemberRole::Unknown),
            "Term" => status.term = parse_number("Term", value)?,
            "Leader" => status.leader = non_empty(value),
            "Vote" => status.vote = non_empty(value),
            "Election timer" => status.election_timer_ms = Some(parse_number("Election timer", value)?),
            "Log" => status.log = value.to_string(),
            "Entries not yet committed" => {
                status.entries_not_yet_committed = parse_number("Entries not yet committed", value)?
            }
            "Entries not yet applied" => {
                status.entries_not_yet_applied = parse_number("Entries not yet applied", value)?
            }
            "Servers" => in_servers = true,
            _ => {}
        }
    }

    if !seen_server_id {
        return Err(Error::Parse("cluster status has no Server ID".to_string()));
    }
    Ok(status)
}

fn full_identifier(value: &str) -> &str {
    match (value.find('('), value.rfind(')')) {
        (Some(open), Some(close)) if open < close => &value[open + 1..close],
        _ => value.split_whitespace().next().unwrap_or(value),
    }
}

fn non_empty(value: &str) -> Option<String> {
    (!value.is_empty()).then(|| value.to_string())
}

fn parse_number(field: &str, value: &str) -> Result<u64> {
    value
        .parse()
        .map_err(|_| Error::Parse(format!("{} is not a number: '{}'", field, value)))
}

fn parse_server_line(line: &str) -> Result<ServerEntry> {
    let malformed = || Error::Parse(format!("unexpected server line: '{}'", line));
    let id = line.split_whitespace().next().ok_or_else(malformed)?;
    let (_, rest) = line.split_once(" at ").ok_or_else(malformed)?;
    let address = rest.split(')').next().ok_or_else(malformed)?.trim();
    if address.is_empty() {
        return Err(malformed());
    }
    Ok(ServerEntry::new(id, address))
}
