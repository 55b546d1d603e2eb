//! macOS capture source built on system command-line tools.
//!
//! Apps come from System Events via `osascript`, sockets from `lsof`, and DNS
//! queries from a long-running `tcpdump` on port 53. `tcpdump` needs root;
//! app enumeration needs the Accessibility permission.

use crate::capture::dns::DnsCapture;
use crate::capture::parse::{parse_app_list, parse_lsof_fields};
use crate::capture::types::{AppSnapshot, RawConnection};
use crate::capture::{CaptureError, CaptureSource};
use std::process::Command;

const APP_LIST_SCRIPT: &str = r#"
tell application "System Events"
    set appList to {}
    set frontAppName to ""
    try
        set frontAppName to name of first application process whose frontmost is true
    end try
    repeat with theProcess in application processes
        if background only of theProcess is false then
            set end of appList to name of theProcess
        end if
    end repeat
    set AppleScript's text item delimiters to "|"
    set appListString to appList as string
    set AppleScript's text item delimiters to ""
    return frontAppName & ":::" & appListString
end tell
"#;

const PERMISSION_SCRIPT: &str = r#"
tell application "System Events"
    try
        return name of first application process whose frontmost is true
    on error
        return "ERROR: No accessibility permissions"
    end try
end tell
"#;

/// The macOS capture source.
#[derive(Debug, Clone, Default)]
pub struct MacOSCapture {
    /// Network interface passed to tcpdump
    pub interface: Option<String>,
}

impl MacOSCapture {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CaptureSource for MacOSCapture {
    fn snapshot_apps(&mut self) -> Result<AppSnapshot, CaptureError> {
        let output = run("osascript", &["-e", APP_LIST_SCRIPT])?;
        parse_app_list(&output)
    }

    fn snapshot_connections(&mut self) -> Result<Vec<RawConnection>, CaptureError> {
        let output = run("lsof", &["-i", "-n", "-P", "-F", "pcnT"])?;
        Ok(parse_lsof_fields(&output))
    }

    fn dns_query_stream(&mut self) -> Result<Option<DnsCapture>, CaptureError> {
        let interface = self.interface.as_deref().unwrap_or("any");
        let mut command = Command::new("tcpdump");
        command.args(["-i", interface, "port", "53", "-l", "-n", "-t"]);
        DnsCapture::spawn(command).map(Some)
    }
}

/// Check whether the Accessibility permission needed for app enumeration is granted.
pub fn check_permission() -> bool {
    match run("osascript", &["-e", PERMISSION_SCRIPT]) {
        Ok(output) => !output.contains("ERROR"),
        Err(e) => {
            tracing::warn!(error = %e, "accessibility check failed");
            false
        }
    }
}

fn run(program: &str, args: &[&str]) -> Result<String, CaptureError> {
    let output = Command::new(program)
        .args(args)
        .output()
        .map_err(|e| CaptureError::CommandFailed {
            command: program.to_string(),
            message: e.to_string(),
        })?;

    // lsof exits 1 when some files could not be listed; its stdout is still usable
    if !output.status.success() && output.stdout.is_empty() {
        return Err(CaptureError::CommandFailed {
            command: program.to_string(),
            message: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }

    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}
