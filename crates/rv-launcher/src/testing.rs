//! In-memory stand-ins for the probe, spawner, remote shell and firewall

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;

use rv_core::error::{LaunchError, RemoteCommandError};

use crate::auth::Firewall;
use crate::probe::{PortCheck, PortStatus};
use crate::process::{CommandSpec, ManagedChild, ProcessSpawner};
use crate::remote::RemoteShell;

/// Probe answering from a set of ports marked in use
#[derive(Clone, Default)]
pub struct FakeProbe {
    in_use: Arc<Mutex<HashSet<u16>>>,
    unknown: Arc<AtomicBool>,
}

impl FakeProbe {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn occupy(&self, port: u16) {
        self.in_use.lock().insert(port);
    }

    pub fn vacate(&self, port: u16) {
        self.in_use.lock().remove(&port);
    }

    pub fn occupy_range(&self, ports: std::ops::Range<u16>) {
        self.in_use.lock().extend(ports);
    }

    /// Answer `Unknown` for every port
    pub fn set_unknown(&self, unknown: bool) {
        self.unknown.store(unknown, Ordering::SeqCst);
    }
}

#[async_trait]
impl PortCheck for FakeProbe {
    async fn status(&self, port: u16) -> PortStatus {
        if self.unknown.load(Ordering::SeqCst) {
            PortStatus::Unknown
        } else if self.in_use.lock().contains(&port) {
            PortStatus::InUse
        } else {
            PortStatus::Free
        }
    }

    fn name(&self) -> &'static str {
        "fake"
    }
}

struct ChildState {
    program: String,
    pid: u32,
    exited: AtomicBool,
    kills: AtomicUsize,
    terminates: AtomicUsize,
    stubborn: AtomicBool,
    listening: Mutex<Option<(FakeProbe, u16)>>,
}

/// Child handle whose observers share its state
#[derive(Clone)]
pub struct FakeChild {
    state: Arc<ChildState>,
}

static NEXT_PID: AtomicU32 = AtomicU32::new(1000);

impl FakeChild {
    pub fn new(program: &str) -> Self {
        Self {
            state: Arc::new(ChildState {
                program: program.to_string(),
                pid: NEXT_PID.fetch_add(1, Ordering::SeqCst),
                exited: AtomicBool::new(false),
                kills: AtomicUsize::new(0),
                terminates: AtomicUsize::new(0),
                stubborn: AtomicBool::new(false),
                listening: Mutex::new(None),
            }),
        }
    }

    pub fn exit(&self) {
        self.state.exited.store(true, Ordering::SeqCst);
        if let Some((probe, port)) = self.state.listening.lock().take() {
            probe.vacate(port);
        }
    }

    /// Keep running through SIGTERM; only `kill` stops it
    pub fn ignore_terminate(&self, stubborn: bool) {
        self.state.stubborn.store(stubborn, Ordering::SeqCst);
    }

    pub fn kill_count(&self) -> usize {
        self.state.kills.load(Ordering::SeqCst)
    }

    pub fn terminate_count(&self) -> usize {
        self.state.terminates.load(Ordering::SeqCst)
    }

    /// Kills plus terminates
    pub fn stop_count(&self) -> usize {
        self.kill_count() + self.terminate_count()
    }

    pub fn is_alive(&self) -> bool {
        !self.state.exited.load(Ordering::SeqCst)
    }

    pub fn program(&self) -> &str {
        &self.state.program
    }
}

impl ManagedChild for FakeChild {
    fn id(&self) -> Option<u32> {
        Some(self.state.pid)
    }

    fn program(&self) -> &str {
        &self.state.program
    }

    fn has_exited(&mut self) -> bool {
        !self.is_alive()
    }

    fn terminate(&mut self) -> io::Result<()> {
        self.state.terminates.fetch_add(1, Ordering::SeqCst);
        if !self.state.stubborn.load(Ordering::SeqCst) {
            self.exit();
        }
        Ok(())
    }

    fn kill(&mut self) -> io::Result<()> {
        self.state.kills.fetch_add(1, Ordering::SeqCst);
        self.exit();
        Ok(())
    }
}

/// Spawner that records commands and hands out [`FakeChild`]ren.
///
/// Forwarders (commands with `-L`) mark their local port in use on the
/// attached probe unless told to stay silent or die.
#[derive(Clone, Default)]
pub struct FakeSpawner {
    probe: Option<FakeProbe>,
    spawned: Arc<Mutex<Vec<(CommandSpec, FakeChild)>>>,
    die_on_launch: Arc<AtomicBool>,
    never_listen: Arc<AtomicBool>,
    missing: Arc<Mutex<HashSet<String>>>,
}

impl FakeSpawner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_probe(probe: FakeProbe) -> Self {
        Self {
            probe: Some(probe),
            ..Self::default()
        }
    }

    pub fn die_on_launch(&self, die: bool) {
        self.die_on_launch.store(die, Ordering::SeqCst);
    }

    pub fn never_listen(&self, silent: bool) {
        self.never_listen.store(silent, Ordering::SeqCst);
    }

    pub fn set_missing(&self, program: &str) {
        self.missing.lock().insert(program.to_string());
    }

    pub fn specs(&self) -> Vec<CommandSpec> {
        self.spawned.lock().iter().map(|(s, _)| s.clone()).collect()
    }

    pub fn children(&self) -> Vec<FakeChild> {
        self.spawned.lock().iter().map(|(_, c)| c.clone()).collect()
    }

    /// Children whose command line mentions `needle` as an argument
    pub fn children_with_arg(&self, needle: &str) -> Vec<FakeChild> {
        self.spawned
            .lock()
            .iter()
            .filter(|(s, _)| s.program == needle || s.args.iter().any(|a| a == needle))
            .map(|(_, c)| c.clone())
            .collect()
    }

    pub fn count(&self) -> usize {
        self.spawned.lock().len()
    }
}

impl ProcessSpawner for FakeSpawner {
    fn spawn(&self, spec: &CommandSpec) -> Result<Box<dyn ManagedChild>, LaunchError> {
        if self.missing.lock().contains(&spec.program) {
            return Err(LaunchError::MissingProgram(spec.program.clone()));
        }

        let child = FakeChild::new(&spec.program);
        if self.die_on_launch.load(Ordering::SeqCst) {
            child.exit();
        } else if !self.never_listen.load(Ordering::SeqCst) {
            let local = spec
                .arg_after("-L")
                .and_then(|m| m.split(':').next())
                .and_then(|p| p.parse::<u16>().ok());
            if let (Some(probe), Some(port)) = (&self.probe, local) {
                probe.occupy(port);
                *child.state.listening.lock() = Some((probe.clone(), port));
            }
        }

        self.spawned.lock().push((spec.clone(), child.clone()));
        Ok(Box::new(child))
    }
}

/// Remote shell answering from canned responses keyed by command
#[derive(Clone, Default)]
pub struct FakeRemote {
    responses: Arc<Mutex<HashMap<String, String>>>,
    failing: Arc<AtomicBool>,
    calls: Arc<Mutex<Vec<(String, String, String)>>>,
    uploads: Arc<Mutex<Vec<(PathBuf, String)>>>,
}

impl FakeRemote {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(&self, command: &str, output: &str) {
        self.responses
            .lock()
            .insert(command.to_string(), output.to_string());
    }

    /// Make every call time out
    pub fn fail(&self) {
        self.failing.store(true, Ordering::SeqCst);
    }

    /// (host, user, command) of every call
    pub fn calls(&self) -> Vec<(String, String, String)> {
        self.calls.lock().clone()
    }

    pub fn uploads(&self) -> Vec<(PathBuf, String)> {
        self.uploads.lock().clone()
    }
}

#[async_trait]
impl RemoteShell for FakeRemote {
    async fn run(
        &self,
        host: &str,
        user: &str,
        command: &str,
    ) -> Result<String, RemoteCommandError> {
        self.calls
            .lock()
            .push((host.to_string(), user.to_string(), command.to_string()));
        if self.failing.load(Ordering::SeqCst) {
            return Err(RemoteCommandError::Timeout {
                command: command.to_string(),
                timeout: std::time::Duration::from_secs(6),
            });
        }
        Ok(self.responses.lock().get(command).cloned().unwrap_or_default())
    }

    async fn upload(
        &self,
        source: &Path,
        host: &str,
        user: &str,
        destination: &str,
    ) -> Result<(), RemoteCommandError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(RemoteCommandError::Failed {
                command: "scp".to_string(),
                status: "exit status: 1".to_string(),
            });
        }
        self.uploads
            .lock()
            .push((source.to_path_buf(), format!("{}@{}:{}", user, host, destination)));
        Ok(())
    }
}

/// Firewall that accepts or rejects every request
#[derive(Clone)]
pub struct FakeFirewall {
    accept: bool,
    sign_ons: Arc<AtomicUsize>,
    sign_offs: Arc<AtomicUsize>,
}

impl FakeFirewall {
    pub fn new(accept: bool) -> Self {
        Self {
            accept,
            sign_ons: Arc::new(AtomicUsize::new(0)),
            sign_offs: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn sign_ons(&self) -> usize {
        self.sign_ons.load(Ordering::SeqCst)
    }

    pub fn sign_offs(&self) -> usize {
        self.sign_offs.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Firewall for FakeFirewall {
    async fn sign_on(&self, _password: &str) -> bool {
        self.sign_ons.fetch_add(1, Ordering::SeqCst);
        self.accept
    }

    async fn sign_off(&self, _password: &str) -> bool {
        self.sign_offs.fetch_add(1, Ordering::SeqCst);
        self.accept
    }

    fn describe(&self) -> String {
        "observer@fw.test".to_string()
    }
}
