//! Core error types for rovnc

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Top-level error type for the launcher
#[derive(Error, Debug)]
pub enum RvError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Authentication error
    #[error("Authentication error: {0}")]
    Auth(#[from] AuthError),

    /// Tunnel error
    #[error("Tunnel error: {0}")]
    Tunnel(#[from] TunnelError),

    /// Remote command error
    #[error("Remote command error: {0}")]
    Remote(#[from] RemoteCommandError),

    /// Child process launch error
    #[error("Launch error: {0}")]
    Launch(#[from] LaunchError),

    /// Menu command error
    #[error("{0}")]
    Command(#[from] CommandError),

    /// Discovery found nothing to open
    #[error("No VNC sessions found for instrument '{0}'")]
    NoSessions(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl RvError {
    /// Whether this error must abort the run through the shutdown path.
    ///
    /// Everything else is reported at the smallest enclosing operation and
    /// the operator carries on.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            RvError::Config(_) | RvError::Auth(_) | RvError::NoSessions(_)
        )
    }
}

/// Configuration-related errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Config file not found
    #[error("Config file not found: {0}")]
    NotFound(PathBuf),

    /// None of the candidate config files exist
    #[error("No config file found in: {0:?}")]
    NoCandidate(Vec<PathBuf>),

    /// Invalid configuration
    #[error("Invalid config: {0}")]
    Invalid(String),

    /// TOML parse error
    #[error("TOML parse error: {0}")]
    Parse(#[from] toml::de::Error),

    /// Unknown instrument account
    #[error("Invalid instrument account: \"{0}\"")]
    UnknownAccount(String),

    /// SSH private key missing
    #[error("SSH private key path does not exist: {0}")]
    MissingKey(PathBuf),
}

/// Authentication errors
#[derive(Error, Debug)]
pub enum AuthError {
    /// The SSH key was not accepted by the telescope server
    #[error("Could not validate SSH key for {account}@{server}")]
    KeyRejected { account: String, server: String },

    /// Firewall refused the credentials
    #[error("Firewall authentication failed for {user}@{address}")]
    FirewallRejected { user: String, address: String },

    /// No credential could be obtained
    #[error("No credential available: {0}")]
    NoCredential(String),
}

/// Tunnel errors. All of these are recoverable: the session is skipped.
#[derive(Error, Debug)]
pub enum TunnelError {
    /// Every candidate local port was reported in use
    #[error("Could not find an open local port for {remote} after {attempts} candidates")]
    NoFreePort { remote: String, attempts: u16 },

    /// The forwarding process exited before the tunnel came up
    #[error("Tunnel process died on launch (local port {local_port})")]
    ProcessDied { local_port: u16 },

    /// The local listener never appeared
    #[error("SSH tunnel on local port {local_port} failed to open after {waited:?}")]
    Timeout { local_port: u16, waited: Duration },

    /// The registry already holds a record for this port
    #[error("Local port {0} is already registered")]
    DuplicatePort(u16),

    /// The forwarding process could not be spawned
    #[error("Failed to spawn tunnel process: {0}")]
    Spawn(#[from] LaunchError),

    /// Shutdown has started; no new tunnels are recorded
    #[error("Not opening a tunnel for '{0}': shutting down")]
    ShuttingDown(String),
}

/// Remote command errors. Callers treat these as "no data".
#[derive(Error, Debug)]
pub enum RemoteCommandError {
    /// The command did not complete in time
    #[error("Remote command '{command}' timed out after {timeout:?}")]
    Timeout { command: String, timeout: Duration },

    /// The command ran but exited unsuccessfully
    #[error("Remote command '{command}' failed with {status}")]
    Failed { command: String, status: String },

    /// The ssh client could not be started
    #[error("Failed to run ssh: {0}")]
    Spawn(#[from] LaunchError),

    /// Waiting on the ssh client failed
    #[error("I/O error running remote command: {0}")]
    Io(#[from] std::io::Error),
}

/// Child process launch errors
#[derive(Error, Debug)]
pub enum LaunchError {
    /// The program could not be started
    #[error("Failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// The program exited immediately
    #[error("{program} exited immediately")]
    ExitedImmediately { program: String },

    /// A helper program needed for this launch is missing
    #[error("Required program '{0}' not found in PATH")]
    MissingProgram(String),

    /// Shutdown has started; no new processes are tracked
    #[error("Not starting {0}: shutting down")]
    ShuttingDown(String),
}

/// Interactive menu errors
#[derive(Error, Debug, PartialEq, Eq)]
pub enum CommandError {
    /// Input did not match any menu command
    #[error("Unrecognized command: \"{0}\"")]
    Unrecognized(String),

    /// Session index out of range
    #[error("Unrecognized desktop: \"{0}\"")]
    UnknownDesktop(String),
}
