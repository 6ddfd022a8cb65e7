//! Output formatting utilities for the CLI
//!
//! Tables for the session and tunnel listings, colored status lines and
//! the fatal error report.

use std::fmt::Display;
use std::path::Path;

use tabled::{settings::Style, Table, Tabled};

use rv_core::Session;
use rv_launcher::registry::TunnelInfo;

/// Format discovered sessions as a table, numbered as the menu expects
pub fn format_sessions(sessions: &[Session]) -> String {
    if sessions.is_empty() {
        return "No VNC sessions found".to_string();
    }

    #[derive(Tabled)]
    struct SessionRow {
        #[tabled(rename = "#")]
        number: usize,
        #[tabled(rename = "NAME")]
        name: String,
        #[tabled(rename = "DISPLAY")]
        display: u16,
        #[tabled(rename = "DESKTOP")]
        desktop: String,
    }

    let rows: Vec<SessionRow> = sessions
        .iter()
        .enumerate()
        .map(|(i, s)| SessionRow {
            number: i + 1,
            name: s.name.clone(),
            display: s.display,
            desktop: s.desktop.clone(),
        })
        .collect();

    Table::new(rows).with(Style::rounded()).to_string()
}

/// Format the open SSH tunnels as a table
pub fn format_tunnels(tunnels: &[TunnelInfo]) -> String {
    if tunnels.is_empty() {
        return "No SSH tunnels opened by this program".to_string();
    }

    #[derive(Tabled)]
    struct TunnelRow {
        #[tabled(rename = "LOCAL PORT")]
        local_port: u16,
        #[tabled(rename = "DESKTOP")]
        session: String,
        #[tabled(rename = "REMOTE CONNECTION")]
        remote: String,
        #[tabled(rename = "PID")]
        pid: String,
    }

    let rows: Vec<TunnelRow> = tunnels
        .iter()
        .map(|t| TunnelRow {
            local_port: t.local_port,
            session: t.session_name.clone(),
            remote: t.remote_endpoint.clone(),
            pid: t
                .pid
                .map(|p| p.to_string())
                .unwrap_or_else(|| "-".to_string()),
        })
        .collect();

    Table::new(rows).with(Style::rounded()).to_string()
}

/// Text shown when the run aborts
pub fn format_fatal(error: &dyn Display, support_contact: &str, log_file: Option<&Path>) -> String {
    let mut report = String::new();
    report.push_str("\n****** PROGRAM ERROR ******\n\n");
    report.push_str(&format!("Error message: {}\n\n", error));
    report.push_str("If you need troubleshooting assistance:\n");
    report.push_str(&format!("* Contact {}\n", support_contact));
    if let Some(path) = log_file {
        report.push_str(&format!("* Attach log file at: {}\n", path.display()));
    }
    report
}

/// Print the fatal error report in red
pub fn print_fatal(error: &dyn Display, support_contact: &str, log_file: Option<&Path>) {
    use crossterm::style::{Color, Print, ResetColor, SetForegroundColor};

    let mut stdout = std::io::stdout();
    let _ = crossterm::execute!(
        stdout,
        SetForegroundColor(Color::Red),
        Print(format_fatal(error, support_contact, log_file)),
        ResetColor
    );
}

/// Print an error message in red with an X prefix
///
/// Outputs to stderr with red coloring for error feedback to the user.
pub fn print_error(msg: &str) {
    use crossterm::style::{Color, Print, ResetColor, SetForegroundColor};

    let mut stderr = std::io::stderr();
    let _ = crossterm::execute!(
        stderr,
        SetForegroundColor(Color::Red),
        Print("✗ "),
        ResetColor,
        Print(msg),
        Print("\n")
    );
}

/// Print a warning message in yellow with a warning symbol prefix
pub fn print_warning(msg: &str) {
    use crossterm::style::{Color, Print, ResetColor, SetForegroundColor};

    let mut stderr = std::io::stderr();
    let _ = crossterm::execute!(
        stderr,
        SetForegroundColor(Color::Yellow),
        Print("⚠ "),
        ResetColor,
        Print(msg),
        Print("\n")
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_listings() {
        assert_eq!(format_sessions(&[]), "No VNC sessions found");
        assert_eq!(format_tunnels(&[]), "No SSH tunnels opened by this program");
    }

    #[test]
    fn test_session_table_is_numbered_from_one() {
        let sessions = vec![
            Session::new(1, "nickel1 Nickel Status", "user"),
            Session::new(2, "nickel2 Nickel Spec", "user"),
        ];
        let table = format_sessions(&sessions);
        assert!(table.contains("DESKTOP"));
        assert!(table.contains("NickelSpec"));
        assert!(table.contains("nickel2 Nickel Spec"));
        assert!(table.contains("│ 2 "));
    }

    #[test]
    fn test_tunnel_table() {
        let tunnels = vec![TunnelInfo {
            local_port: 5901,
            remote_endpoint: "user@noir.ucolick.org:5901".to_string(),
            session_name: "NickelStatus".to_string(),
            pid: None,
        }];
        let table = format_tunnels(&tunnels);
        assert!(table.contains("5901"));
        assert!(table.contains("user@noir.ucolick.org:5901"));
        assert!(table.contains(" - "));
    }

    #[test]
    fn test_fatal_report() {
        let report = format_fatal(&"boom", "the night assistant", Some(Path::new("logs/x.log")));
        assert!(report.contains("****** PROGRAM ERROR ******"));
        assert!(report.contains("Error message: boom"));
        assert!(report.contains("* Contact the night assistant"));
        assert!(report.contains("logs/x.log"));
    }
}
