//! VNC viewer processes

use parking_lot::Mutex;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use rv_core::config::LauncherConfig;
use rv_core::error::LaunchError;

use crate::process::{CommandSpec, ManagedChild, ProcessSpawner};

/// How viewers are started
#[derive(Debug, Clone, Default)]
pub struct ViewerSettings {
    /// Viewer binary; `None` means the operator connects by hand
    pub program: Option<String>,
    /// Extra arguments placed right after the program
    pub args: Vec<String>,
    /// Prefix for the server target (e.g. `vnc://`)
    pub prefix: String,
    /// Pass `-ViewOnly`
    pub view_only: bool,
}

impl ViewerSettings {
    pub fn from_config(config: &LauncherConfig, view_only: bool) -> Self {
        Self {
            program: config.viewer_program().map(str::to_string),
            args: config.viewer_args(),
            prefix: config.vncprefix.clone(),
            view_only,
        }
    }
}

/// How long viewers get to exit after SIGTERM before they are killed
pub const VIEWER_EXIT_GRACE: Duration = Duration::from_secs(1);

const EXIT_POLL: Duration = Duration::from_millis(50);

struct Viewers {
    handles: Vec<Box<dyn ManagedChild>>,
    closed: bool,
}

/// Launches viewers and keeps their handles until shutdown
pub struct ViewerSupervisor {
    settings: ViewerSettings,
    spawner: Arc<dyn ProcessSpawner>,
    viewers: Mutex<Viewers>,
}

impl ViewerSupervisor {
    pub fn new(settings: ViewerSettings, spawner: Arc<dyn ProcessSpawner>) -> Self {
        Self {
            settings,
            spawner,
            viewers: Mutex::new(Viewers {
                handles: Vec::new(),
                closed: false,
            }),
        }
    }

    pub fn settings(&self) -> &ViewerSettings {
        &self.settings
    }

    /// Command line for a viewer of `host:port`, or `None` without a viewer
    pub fn viewer_command(
        &self,
        host: &str,
        port: u16,
        geometry: Option<&str>,
    ) -> Option<CommandSpec> {
        let program = self.settings.program.as_deref()?;

        let mut spec = CommandSpec::new(program).args(self.settings.args.iter().cloned());
        if self.settings.view_only {
            spec = spec.arg("-ViewOnly");
        }
        if let Some(geometry) = geometry.filter(|g| !g.is_empty()) {
            spec = spec.arg(format!("-geometry={}", geometry));
        }

        // macOS `open` takes a URL with a single colon
        let is_open = Path::new(program)
            .file_name()
            .map(|name| name == "open")
            .unwrap_or(false);
        let target = if is_open {
            format!("{}{}:{}", self.settings.prefix, host, port)
        } else {
            format!("{}{}::{}", self.settings.prefix, host, port)
        };

        Some(spec.arg(target))
    }

    /// Start a viewer and track it.
    ///
    /// Returns `Ok(false)` when no viewer is configured. Once
    /// `terminate_all` has run nothing new is started.
    pub fn launch(
        &self,
        host: &str,
        port: u16,
        geometry: Option<&str>,
    ) -> Result<bool, LaunchError> {
        let Some(spec) = self.viewer_command(host, port, geometry) else {
            tracing::info!("No VNC viewer application specified");
            tracing::info!("Open your VNC viewer manually to {}:{}", host, port);
            return Ok(false);
        };

        let mut viewers = self.viewers.lock();
        if viewers.closed {
            return Err(LaunchError::ShuttingDown(spec.program));
        }
        tracing::debug!("VNC viewer command: {}", spec);
        let child = self.spawner.spawn(&spec)?;
        viewers.handles.push(child);
        Ok(true)
    }

    /// Terminate every tracked viewer and refuse new launches.
    ///
    /// Viewers still running after [`VIEWER_EXIT_GRACE`] are killed.
    /// Returns how many were still running when asked to exit.
    pub async fn terminate_all(&self) -> usize {
        let children = {
            let mut viewers = self.viewers.lock();
            viewers.closed = true;
            std::mem::take(&mut viewers.handles)
        };

        let mut running = Vec::new();
        for mut child in children.into_iter().rev() {
            tracing::debug!("Terminating VNC process {:?}", child.id());
            if child.has_exited() {
                continue;
            }
            match child.terminate() {
                Ok(()) => running.push(child),
                Err(e) => {
                    tracing::error!("Failed to terminate VNC viewer {:?}: {}", child.id(), e);
                    running.push(child);
                }
            }
        }
        let terminated = running.len();

        let deadline = Instant::now() + VIEWER_EXIT_GRACE;
        loop {
            running.retain_mut(|child| !child.has_exited());
            if running.is_empty() || Instant::now() >= deadline {
                break;
            }
            tokio::time::sleep(EXIT_POLL).await;
        }

        for mut child in running {
            tracing::warn!("VNC viewer {:?} ignored SIGTERM; killing it", child.id());
            if let Err(e) = child.kill() {
                tracing::error!("Failed to kill VNC viewer {:?}: {}", child.id(), e);
            }
        }
        terminated
    }

    /// Number of viewers launched and not yet terminated
    pub fn len(&self) -> usize {
        self.viewers.lock().handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.viewers.lock().handles.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeSpawner;

    fn supervisor(program: Option<&str>, view_only: bool) -> (ViewerSupervisor, FakeSpawner) {
        let spawner = FakeSpawner::new();
        let settings = ViewerSettings {
            program: program.map(str::to_string),
            args: vec!["-Shared".to_string()],
            prefix: String::new(),
            view_only,
        };
        (ViewerSupervisor::new(settings, Arc::new(spawner.clone())), spawner)
    }

    #[test]
    fn test_viewer_command_layout() {
        let (viewers, _) = supervisor(Some("/usr/bin/vncviewer"), true);
        let spec = viewers.viewer_command("localhost", 5901, Some("+0+0")).unwrap();

        assert_eq!(spec.program, "/usr/bin/vncviewer");
        assert_eq!(
            spec.args,
            vec!["-Shared", "-ViewOnly", "-geometry=+0+0", "localhost::5901"]
        );
    }

    #[test]
    fn test_open_uses_single_colon() {
        let settings = ViewerSettings {
            program: Some("open".to_string()),
            prefix: "vnc://".to_string(),
            ..ViewerSettings::default()
        };
        let viewers = ViewerSupervisor::new(settings, Arc::new(FakeSpawner::new()));
        let spec = viewers.viewer_command("localhost", 5902, None).unwrap();
        assert_eq!(spec.args, vec!["vnc://localhost:5902"]);
    }

    #[test]
    fn test_no_viewer_is_not_an_error() {
        let (viewers, spawner) = supervisor(None, false);
        assert!(!viewers.launch("localhost", 5901, None).unwrap());
        assert_eq!(spawner.count(), 0);
        assert!(viewers.is_empty());
    }

    #[tokio::test]
    async fn test_terminate_all_visits_each_once() {
        let (viewers, spawner) = supervisor(Some("vncviewer"), false);
        for port in 5901..5904 {
            assert!(viewers.launch("localhost", port, None).unwrap());
        }
        spawner.children()[1].exit();

        assert_eq!(viewers.terminate_all().await, 2);
        assert!(viewers.is_empty());
        assert_eq!(viewers.terminate_all().await, 0);

        let stops: Vec<usize> = spawner.children().iter().map(|c| c.terminate_count()).collect();
        assert_eq!(stops, vec![1, 0, 1]);
        let kills: Vec<usize> = spawner.children().iter().map(|c| c.kill_count()).collect();
        assert_eq!(kills, vec![0, 0, 0]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stubborn_viewer_is_killed_after_grace() {
        let (viewers, spawner) = supervisor(Some("vncviewer"), false);
        viewers.launch("localhost", 5901, None).unwrap();
        spawner.children()[0].ignore_terminate(true);

        let started = Instant::now();
        assert_eq!(viewers.terminate_all().await, 1);

        let child = &spawner.children()[0];
        assert_eq!(child.terminate_count(), 1);
        assert_eq!(child.kill_count(), 1);
        assert!(!child.is_alive());
        assert!(started.elapsed() >= VIEWER_EXIT_GRACE);
    }

    #[tokio::test]
    async fn test_no_launch_after_terminate_all() {
        let (viewers, spawner) = supervisor(Some("vncviewer"), false);
        viewers.terminate_all().await;

        let err = viewers.launch("localhost", 5901, None).unwrap_err();
        assert!(matches!(err, LaunchError::ShuttingDown(_)));
        assert_eq!(spawner.count(), 0);
        assert!(viewers.is_empty());
    }

    #[test]
    fn test_launch_failure_tracks_nothing() {
        let (viewers, spawner) = supervisor(Some("vncviewer"), false);
        spawner.set_missing("vncviewer");

        let err = viewers.launch("localhost", 5901, None).unwrap_err();
        assert!(matches!(err, LaunchError::MissingProgram(_)));
        assert!(viewers.is_empty());
    }
}
