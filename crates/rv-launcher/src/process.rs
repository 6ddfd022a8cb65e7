//! Child process spawning and handles
//!
//! Every external program the launcher starts (ssh forwarders, viewers,
//! the sound player) goes through a [`ProcessSpawner`] and is held as a
//! [`ManagedChild`]. Whoever holds the handle owns the process and is
//! responsible for terminating it.

use std::fmt;
use std::io;
use std::process::Stdio;

use rv_core::error::LaunchError;

/// A fully described command line
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandSpec {
    /// Program to run
    pub program: String,
    /// Arguments
    pub args: Vec<String>,
    /// Extra environment variables; never logged
    pub env: Vec<(String, String)>,
}

impl CommandSpec {
    /// Create a command for a program
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: Vec::new(),
        }
    }

    /// Append one argument
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Append several arguments
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Set an environment variable for the child
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Build a tokio command with stdio detached
    pub fn to_command(&self) -> tokio::process::Command {
        let mut cmd = tokio::process::Command::new(&self.program);
        cmd.args(&self.args)
            .envs(self.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true);
        cmd
    }

    /// Position of an argument, used by tests to pick values out
    pub fn arg_after(&self, flag: &str) -> Option<&str> {
        self.args
            .iter()
            .position(|a| a == flag)
            .and_then(|i| self.args.get(i + 1))
            .map(String::as_str)
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

/// Handle to a running child process
pub trait ManagedChild: Send {
    /// OS process id, if still known
    fn id(&self) -> Option<u32>;

    /// Program name, for log output
    fn program(&self) -> &str;

    /// Whether the process has exited (reaps it if so)
    fn has_exited(&mut self) -> bool;

    /// Ask the process to exit
    fn terminate(&mut self) -> io::Result<()>;

    /// Kill the process outright
    fn kill(&mut self) -> io::Result<()>;
}

/// Starts child processes
pub trait ProcessSpawner: Send + Sync {
    /// Spawn a detached child running `spec`
    fn spawn(&self, spec: &CommandSpec) -> Result<Box<dyn ManagedChild>, LaunchError>;
}

/// Spawner backed by `tokio::process`
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemSpawner;

impl ProcessSpawner for SystemSpawner {
    fn spawn(&self, spec: &CommandSpec) -> Result<Box<dyn ManagedChild>, LaunchError> {
        let child = spec.to_command().spawn().map_err(|source| {
            if source.kind() == io::ErrorKind::NotFound {
                LaunchError::MissingProgram(spec.program.clone())
            } else {
                LaunchError::Spawn {
                    program: spec.program.clone(),
                    source,
                }
            }
        })?;

        tracing::debug!("Spawned {} (pid {:?})", spec.program, child.id());
        Ok(Box::new(SystemChild {
            program: spec.program.clone(),
            child,
        }))
    }
}

/// A real OS child process
pub struct SystemChild {
    program: String,
    child: tokio::process::Child,
}

impl ManagedChild for SystemChild {
    fn id(&self) -> Option<u32> {
        self.child.id()
    }

    fn program(&self) -> &str {
        &self.program
    }

    fn has_exited(&mut self) -> bool {
        !matches!(self.child.try_wait(), Ok(None))
    }

    #[cfg(unix)]
    fn terminate(&mut self) -> io::Result<()> {
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid;

        match self.child.id() {
            Some(pid) => kill(Pid::from_raw(pid as i32), Signal::SIGTERM).map_err(io::Error::from),
            None => Ok(()),
        }
    }

    #[cfg(not(unix))]
    fn terminate(&mut self) -> io::Result<()> {
        self.child.start_kill()
    }

    fn kill(&mut self) -> io::Result<()> {
        self.child.start_kill()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_spec_display_hides_env() {
        let spec = CommandSpec::new("sshpass")
            .args(["-e", "ssh", "-T"])
            .env("SSHPASS", "hunter2");
        let shown = spec.to_string();
        assert_eq!(shown, "sshpass -e ssh -T");
        assert!(!shown.contains("hunter2"));
    }

    #[test]
    fn test_arg_after() {
        let spec = CommandSpec::new("ssh").args(["-L", "5901:localhost:5902", "-N"]);
        assert_eq!(spec.arg_after("-L"), Some("5901:localhost:5902"));
        assert_eq!(spec.arg_after("-N"), None);
        assert_eq!(spec.arg_after("-i"), None);
    }

    #[tokio::test]
    async fn test_missing_program_is_reported() {
        let spec = CommandSpec::new("rovnc-definitely-not-a-program");
        let err = SystemSpawner.spawn(&spec).err().unwrap();
        assert!(matches!(err, LaunchError::MissingProgram(_)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_system_child_terminate() {
        let spec = CommandSpec::new("sleep").arg("30");
        let mut child = SystemSpawner.spawn(&spec).unwrap();
        assert!(!child.has_exited());
        child.terminate().unwrap();

        let mut exited = false;
        for _ in 0..50 {
            if child.has_exited() {
                exited = true;
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        }
        assert!(exited);
    }
}
