/// INFO reply parsing
///
/// The body is a list of `field:value` lines grouped under `# Section`
/// headers. Servers from 2.4 on report replication state here, which is
/// how older servers are asked who their master is.
use tracing::debug;

use super::Role;
use crate::error::{ResilisError, ResilisResult};

/// One `field:value` line of an INFO body
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InfoEntry<'a> {
    /// Last `# Section` header seen before this line
    pub section: Option<&'a str>,
    pub field: &'a str,
    pub value: &'a str,
}

/// Iterator over the entries of an INFO body
pub struct InfoEntries<'a> {
    lines: std::str::Split<'a, [char; 2]>,
    section: Option<&'a str>,
}

impl<'a> Iterator for InfoEntries<'a> {
    type Item = InfoEntry<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        for line in self.lines.by_ref() {
            if line.is_empty() {
                continue;
            }
            if line.starts_with('#') {
                self.section = Some(line.trim_start_matches(['#', ' ', '\t']));
                continue;
            }
            match line.split_once(':') {
                Some((field, value)) => {
                    return Some(InfoEntry {
                        section: self.section,
                        field,
                        value,
                    })
                }
                None => debug!("Skipping INFO line without separator: {:?}", line),
            }
        }
        None
    }
}

/// Entries of `body` in order
pub fn entries(body: &str) -> InfoEntries<'_> {
    InfoEntries {
        lines: body.split(['\r', '\n']),
        section: None,
    }
}

/// Value of the first entry named `field`
pub fn find_field<'a>(body: &'a str, field: &str) -> Option<&'a str> {
    entries(body)
        .find(|entry| entry.field == field)
        .map(|entry| entry.value)
}

/// Replication role as reported by INFO.
///
/// `role:slave` marks a replica, whose master is taken from `master_host`
/// and `master_port`. Any other role value means the node is a master.
pub fn parse_replication_info(body: &str) -> ResilisResult<Role> {
    let mut role = None;
    let mut master_host = None;
    let mut master_port = None;

    for entry in entries(body) {
        match entry.field {
            "role" => role = Some(entry.value),
            "master_host" => master_host = Some(entry.value),
            "master_port" => master_port = Some(entry.value),
            _ => {}
        }
    }

    let role = role.ok_or_else(|| ResilisError::malformed("INFO has no role field"))?;
    if !role.eq_ignore_ascii_case("slave") && !role.eq_ignore_ascii_case("replica") {
        return Ok(Role::Master);
    }

    let host = master_host
        .filter(|host| !host.is_empty())
        .ok_or_else(|| ResilisError::malformed("replica INFO has no master_host"))?;
    let port = master_port
        .ok_or_else(|| ResilisError::malformed("replica INFO has no master_port"))?;
    let port = port
        .trim()
        .parse::<u16>()
        .map_err(|_| ResilisError::malformed(format!("invalid master_port {:?}", port)))?;

    Ok(Role::Replica {
        host: host.to_string(),
        port,
    })
}
