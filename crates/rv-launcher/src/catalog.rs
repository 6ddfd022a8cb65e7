//! Sessions discovered on the telescope server

use rv_core::Session;

/// Remote command that lists an instrument's VNC sessions
pub fn status_command(instrument: &str) -> String {
    format!("vncstatus {}", instrument)
}

/// Sessions available for this run, in discovery order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionCatalog {
    sessions: Vec<Session>,
}

impl SessionCatalog {
    pub fn new(sessions: Vec<Session>) -> Self {
        Self { sessions }
    }

    /// Parse `vncstatus` output.
    ///
    /// Each line is `display - desktop label`. Blank and `#` lines are
    /// skipped; a `Usage` line means the instrument is not served by this
    /// host and ends parsing.
    pub fn parse_status_output(text: &str, instrument: &str, host: &str, owner: &str) -> Self {
        let mut sessions = Vec::new();

        for line in text.lines().map(str::trim) {
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let (display, desktop) = match line.split_once('-') {
                Some((d, rest)) => (d.trim(), rest.trim()),
                None => (line, ""),
            };

            if display == "Usage" || display.starts_with("Usage:") {
                tracing::error!("{} not supported on host {}", instrument, host);
                break;
            }

            match display.parse::<u16>() {
                Ok(number) => sessions.push(Session::new(number, desktop, owner)),
                Err(_) => tracing::warn!("Skipping unparsable vncstatus line: {:?}", line),
            }
        }

        tracing::debug!("  Got {} sessions", sessions.len());
        for s in &sessions {
            tracing::debug!("{}", s);
        }

        Self { sessions }
    }

    /// Session at 1-based menu position `index`
    pub fn get(&self, index: usize) -> Option<&Session> {
        index.checked_sub(1).and_then(|i| self.sessions.get(i))
    }

    /// Session by name
    pub fn find(&self, name: &str) -> Option<&Session> {
        self.sessions.iter().find(|s| s.name == name)
    }

    pub fn sessions(&self) -> &[Session] {
        &self.sessions
    }

    pub fn iter(&self) -> impl Iterator<Item = &Session> {
        self.sessions.iter()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
