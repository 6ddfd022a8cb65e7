//! Core domain types

use std::fmt;

/// First VNC port; display `n` listens on `VNC_BASE_PORT + n`
pub const VNC_BASE_PORT: u16 = 5900;

/// A remote desktop discovered on the telescope server
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    /// Short name used to match tunnels (e.g. "blue")
    pub name: String,
    /// Remote X display number
    pub display: u16,
    /// Full desktop label as reported by the server
    pub desktop: String,
    /// Account that owns the session on the server
    pub owner: String,
}

impl Session {
    /// Create a session from a display number and desktop label.
    ///
    /// The name is every word of the label after the first, concatenated.
    pub fn new(display: u16, desktop: impl Into<String>, owner: impl Into<String>) -> Self {
        let desktop = desktop.into();
        let name = desktop.split_whitespace().skip(1).collect::<String>();
        Self {
            name,
            display,
            desktop,
            owner: owner.into(),
        }
    }

    /// Remote TCP port of this session's VNC server
    pub fn remote_port(&self) -> u16 {
        VNC_BASE_PORT.saturating_add(self.display)
    }
}

impl fmt::Display for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:12} {:5} {}", self.name, self.display, self.desktop)
    }
}

/// Instrument account resolved to its telescope and control server
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Account {
    /// Account name as given on the command line
    pub name: String,
    /// Telescope the account belongs to
    pub telescope: &'static str,
    /// Instrument queried for VNC sessions
    pub instrument: &'static str,
    /// Short host name of the VNC server
    pub server: &'static str,
}

/// (account, telescope, instrument, server)
const ACCOUNTS: &[(&str, &str, &str, &str)] = &[
    ("shane", "shane", "kast", "shimmy"),
    ("nickel", "nickel", "nickel", "noir"),
    ("apf", "apf", "apf", "frankfurt.apf"),
];

impl Account {
    /// Look up an account by name (case-insensitive)
    pub fn resolve(name: &str) -> Option<Self> {
        let lower = name.to_lowercase();
        ACCOUNTS
            .iter()
            .find(|(account, ..)| *account == lower)
            .map(|(_, telescope, instrument, server)| Self {
                name: lower.clone(),
                telescope,
                instrument,
                server,
            })
    }

    /// Fully qualified server host name
    pub fn server_host(&self, domain: &str) -> String {
        if domain.is_empty() {
            self.server.to_string()
        } else {
            format!("{}.{}", self.server, domain)
        }
    }

    /// Names of every known account
    pub fn known() -> impl Iterator<Item = &'static str> {
        ACCOUNTS.iter().map(|(account, ..)| *account)
    }
}

impl fmt::Display for Account {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({} on {})", self.name, self.instrument, self.telescope)
    }
}
