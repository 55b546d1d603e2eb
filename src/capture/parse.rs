//! Parsers for the text output of system capture commands.
//!
//! Kept platform-independent so they can be tested everywhere.

use crate::capture::types::{AppSnapshot, ConnectionState, RawConnection};
use crate::capture::CaptureError;

/// Separator between the frontmost app and the running app list.
pub const FRONTMOST_SEPARATOR: &str = ":::";

/// Separator between running app names.
pub const APP_LIST_SEPARATOR: char = '|';

/// Parse `Frontmost:::App1|App2|...` as printed by the app enumeration script.
pub fn parse_app_list(output: &str) -> Result<AppSnapshot, CaptureError> {
    let output = output.trim();
    let (frontmost, list) =
        output
            .split_once(FRONTMOST_SEPARATOR)
            .ok_or_else(|| CaptureError::UnexpectedOutput {
                command: "osascript".to_string(),
                output: output.to_string(),
            })?;

    let frontmost = Some(frontmost.trim()).filter(|name| !name.is_empty());
    Ok(AppSnapshot::new(list.split(APP_LIST_SEPARATOR), frontmost))
}

/// Parse `lsof -F pcnT` field output into remote endpoints.
///
/// Each file set starts with an `f` line; `p`/`c` lines name the owning
/// process, `n` carries `local->remote`, and `TST=` carries the TCP state.
/// Listening sockets (no `->`) are skipped.
pub fn parse_lsof_fields(output: &str) -> Vec<RawConnection> {
    let mut connections = Vec::new();
    let mut command = String::new();
    let mut pending: Option<RawConnection> = None;

    for line in output.lines() {
        let line = line.trim();
        let Some(tag) = line.chars().next() else {
            continue;
        };
        let value = &line[tag.len_utf8()..];

        match tag {
            'p' => {
                connections.extend(pending.take());
                command.clear();
            }
            'f' => connections.extend(pending.take()),
            'c' => command = value.to_string(),
            'n' => {
                connections.extend(pending.take());
                pending = parse_node(value, &command);
            }
            'T' => {
                if let (Some(conn), Some(state)) = (pending.as_mut(), value.strip_prefix("ST=")) {
                    conn.state = ConnectionState::from_tcp_state(state);
                }
            }
            _ => {}
        }
    }

    connections.extend(pending);
    connections
}

/// Parse a single `local->remote [(STATE)]` node description.
fn parse_node(node: &str, command: &str) -> Option<RawConnection> {
    let (node, state) = match node.split_once(" (") {
        Some((addr, state)) => (addr, ConnectionState::from_tcp_state(state)),
        None => (node, ConnectionState::Unknown),
    };

    let (_, remote) = node.split_once("->")?;
    let (host, port) = split_host_port(remote.trim())?;
    let app_name = if command.is_empty() { "Unknown" } else { command };

    Some(RawConnection::new(host, port, app_name, state))
}

/// Split `1.2.3.4:443` or `[2606:4700::1]:443` into host and port.
pub fn split_host_port(endpoint: &str) -> Option<(&str, u16)> {
    let (host, port) = if let Some(rest) = endpoint.strip_prefix('[') {
        let (host, port) = rest.split_once("]:")?;
        (host, port)
    } else {
        endpoint.rsplit_once(':')?
    };

    let port = port.parse::<u16>().ok().filter(|p| *p != 0)?;
    if host.is_empty() {
        return None;
    }
    Some((host, port))
}
