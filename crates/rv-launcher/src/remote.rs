//! Remote command execution over the system ssh client

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use rv_core::config::TunnelSettings;
use rv_core::error::{LaunchError, RemoteCommandError};

use crate::process::CommandSpec;

/// Options passed to every ssh and scp invocation
pub const SSH_OPTIONS: &[&str] = &[
    "-oStrictHostKeyChecking=no",
    "-oKexAlgorithms=+diffie-hellman-group1-sha1",
    "-oCompression=yes",
];

/// How the launcher authenticates to the telescope server
#[derive(Clone, PartialEq, Eq)]
pub enum Credential {
    /// Private key file
    Key(PathBuf),
    /// Password typed by the operator
    Password(String),
}

impl Credential {
    pub fn is_key(&self) -> bool {
        matches!(self, Credential::Key(_))
    }

    /// Wrap an ssh-family command line so it authenticates with this credential.
    ///
    /// Key credentials add `-i <key>`. Passwords are fed through `sshpass -e`
    /// with the secret in the child's environment.
    pub fn wrap(&self, program: &str, args: Vec<String>) -> CommandSpec {
        match self {
            Credential::Key(key) => CommandSpec::new(program)
                .args(args)
                .args(["-i".to_string(), key.to_string_lossy().into_owned()]),
            Credential::Password(password) => CommandSpec::new("sshpass")
                .args(["-e", program])
                .args(args)
                .env("SSHPASS", password.as_str()),
        }
    }
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Credential::Key(key) => f.debug_tuple("Key").field(key).finish(),
            Credential::Password(_) => f.write_str("Password(..)"),
        }
    }
}

/// Build the command that runs `command` on `host` as `user`
pub fn ssh_command(credential: &Credential, host: &str, user: &str, command: &str) -> CommandSpec {
    let mut args = vec![
        host.to_string(),
        "-l".to_string(),
        user.to_string(),
        "-T".to_string(),
    ];
    args.extend(SSH_OPTIONS.iter().map(|o| o.to_string()));
    let spec = credential.wrap("ssh", args);
    spec.arg(command)
}

/// Build the command that forwards `local_port` to `remote_port` on `host`
pub fn forward_command(
    credential: &Credential,
    host: &str,
    user: &str,
    local_port: u16,
    remote_port: u16,
) -> CommandSpec {
    let mut args = vec![
        "-l".to_string(),
        user.to_string(),
        "-L".to_string(),
        format!("{}:localhost:{}", local_port, remote_port),
        "-N".to_string(),
        "-T".to_string(),
        host.to_string(),
    ];
    args.extend(SSH_OPTIONS.iter().map(|o| o.to_string()));
    credential.wrap("ssh", args)
}

/// Build the command that copies `source` to `user@host:destination`
pub fn scp_command(
    credential: &Credential,
    source: &Path,
    host: &str,
    user: &str,
    destination: &str,
) -> CommandSpec {
    let args: Vec<String> = SSH_OPTIONS.iter().map(|o| o.to_string()).collect();
    credential.wrap("scp", args).args([
        source.to_string_lossy().into_owned(),
        format!("{}@{}:{}", user, host, destination),
    ])
}

/// Drop the noise ssh prints about known hosts and key exchange
pub fn strip_warnings(output: &str) -> String {
    output
        .lines()
        .filter(|line| !line.contains("Warning: "))
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string()
}

/// Runs commands on and copies files to the telescope server
#[async_trait]
pub trait RemoteShell: Send + Sync {
    /// Run `command` on `host` as `user` and return its cleaned output
    async fn run(
        &self,
        host: &str,
        user: &str,
        command: &str,
    ) -> Result<String, RemoteCommandError>;

    /// Copy a local file to `user@host:destination`
    async fn upload(
        &self,
        source: &Path,
        host: &str,
        user: &str,
        destination: &str,
    ) -> Result<(), RemoteCommandError>;
}

/// [`RemoteShell`] backed by the ssh and scp binaries
#[derive(Debug, Clone)]
pub struct SshRemoteShell {
    credential: Credential,
    command_timeout: Duration,
    upload_timeout: Duration,
}

impl SshRemoteShell {
    pub fn new(credential: Credential, settings: &TunnelSettings) -> Self {
        Self {
            credential,
            command_timeout: settings.remote_command_timeout,
            upload_timeout: settings.upload_timeout,
        }
    }

    async fn execute(
        spec: &CommandSpec,
        label: &str,
        timeout: Duration,
    ) -> Result<std::process::Output, RemoteCommandError> {
        tracing::debug!("{}", spec);

        let mut cmd = spec.to_command();
        cmd.stdout(Stdio::piped()).stderr(Stdio::piped());
        let child = cmd.spawn().map_err(|source| {
            if source.kind() == std::io::ErrorKind::NotFound {
                LaunchError::MissingProgram(spec.program.clone())
            } else {
                LaunchError::Spawn {
                    program: spec.program.clone(),
                    source,
                }
            }
        })?;

        // Dropping the child on timeout kills it
        match tokio::time::timeout(timeout, child.wait_with_output()).await {
            Ok(output) => Ok(output?),
            Err(_) => Err(RemoteCommandError::Timeout {
                command: label.to_string(),
                timeout,
            }),
        }
    }
}

#[async_trait]
impl RemoteShell for SshRemoteShell {
    async fn run(
        &self,
        host: &str,
        user: &str,
        command: &str,
    ) -> Result<String, RemoteCommandError> {
        let spec = ssh_command(&self.credential, host, user, command);
        let output = Self::execute(&spec, command, self.command_timeout).await?;

        if !output.status.success() {
            tracing::debug!("Command '{}' exited with {}", command, output.status);
        }

        let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
        text.push_str(&String::from_utf8_lossy(&output.stderr));
        let cleaned = strip_warnings(&text);
        tracing::debug!("Output: {:?}", cleaned);
        Ok(cleaned)
    }

    async fn upload(
        &self,
        source: &Path,
        host: &str,
        user: &str,
        destination: &str,
    ) -> Result<(), RemoteCommandError> {
        let spec = scp_command(&self.credential, source, host, user, destination);
        let output = Self::execute(&spec, "scp", self.upload_timeout).await?;

        if output.status.success() {
            Ok(())
        } else {
            Err(RemoteCommandError::Failed {
                command: "scp".to_string(),
                status: output.status.to_string(),
            })
        }
    }
}
