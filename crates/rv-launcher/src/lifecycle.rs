//! Launcher lifecycle: start-up, menu dispatch and shutdown
//!
//! ```text
//! Initializing -> Discovering -> Ready -> Running -> ShuttingDown -> Terminated
//! ```
//!
//! Shutdown can be requested from the menu, from a fatal error and from a
//! signal handler. Only the first request does any work.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use tokio::task::{AbortHandle, JoinHandle};

use rv_core::error::{AuthError, CommandError, RvError};
use rv_core::Session;

use crate::auth::{secure_key_permissions, validate_ssh_key};
use crate::catalog::{status_command, SessionCatalog};
use crate::layout::{self, WindowLayout};
use crate::menu::MenuCommand;
use crate::registry::TunnelInfo;
use crate::remote::Credential;
use crate::sound::{SOUND_REMOTE_PORT, SOUND_SESSION_NAME};
use crate::state::LauncherState;
use crate::tunnel::TunnelRequest;
use crate::version;

/// Where the launcher is in its life
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Phase {
    Initializing,
    Discovering,
    Ready,
    Running,
    ShuttingDown,
    Terminated,
}

/// What a menu command produced for display
#[derive(Debug)]
pub enum MenuOutcome {
    /// Nothing to show
    Idle,
    Sessions(Vec<Session>),
    Tunnels(Vec<TunnelInfo>),
    /// The operator asked to quit
    Quit,
}

/// Drives one run of the launcher
#[derive(Clone)]
pub struct LifecycleController {
    state: Arc<LauncherState>,
}

impl LifecycleController {
    pub fn new(state: LauncherState) -> Self {
        Self {
            state: Arc::new(state),
        }
    }

    pub fn state(&self) -> &Arc<LauncherState> {
        &self.state
    }

    pub fn phase(&self) -> Phase {
        self.state.phase()
    }

    /// Validate, authenticate, discover and open the default sessions.
    ///
    /// Session launches continue in the background. Errors returned here
    /// are fatal for the run.
    pub async fn start(&self) -> Result<(), RvError> {
        let state = &self.state;

        state.config.check(state.options.credential.is_key())?;
        tracing::debug!("Checking local ports with {}", state.probe.name());

        state.advance(Phase::Discovering);
        self.authenticate().await?;

        let catalog = self.discover().await;
        if catalog.is_empty() && !state.options.auth_only {
            return Err(RvError::NoSessions(state.options.account.instrument.to_string()));
        }
        if state.catalog.set(catalog).is_err() {
            tracing::warn!("Sessions were already discovered; keeping the first list");
        }

        let screen = if state.options.auth_only {
            None
        } else {
            layout::detect_screen_size().await
        };
        let layout = WindowLayout::compute(
            screen,
            state.config.window_size,
            state.config.window_positions.as_deref(),
        );
        if state.layout.set(layout).is_err() {
            tracing::warn!("Window layout was already computed; keeping the first one");
        }
        state.advance(Phase::Ready);

        if state.options.auth_only {
            tracing::info!("Authenticated; not starting any VNC sessions");
        } else {
            for name in self.default_sessions() {
                self.open_session(name);
                tokio::time::sleep(state.config.tunnel.launch_stagger).await;
            }
            if state.sound_enabled() {
                self.spawn_sound();
            }
        }

        state.advance(Phase::Running);
        Ok(())
    }

    async fn authenticate(&self) -> Result<(), RvError> {
        let state = &self.state;

        if let Some(firewall) = &state.firewall {
            let password = state
                .options
                .firewall_password
                .as_deref()
                .ok_or_else(|| AuthError::NoCredential("firewall password".to_string()))?;
            if !firewall.sign_on(password).await {
                tracing::debug!("Firewall {} refused sign-on", firewall.describe());
                return Err(AuthError::FirewallRejected {
                    user: state.config.firewall_user.clone().unwrap_or_default(),
                    address: state.config.firewall_address.clone().unwrap_or_default(),
                }
                .into());
            }
            state.firewall_open.store(true, Ordering::SeqCst);
        }

        if let Credential::Key(key) = &state.options.credential {
            if let Err(e) = secure_key_permissions(key) {
                tracing::error!(
                    "Cannot set {} to the correct mode, ssh may fail: {}",
                    key.display(),
                    e
                );
            }
            let validated =
                validate_ssh_key(state.remote.as_ref(), &state.server, &state.remote_user).await;
            if let Err(e) = validated {
                tracing::error!(
                    "Could not validate SSH key. Contact {} for other options to connect remotely.",
                    state.config.support_contact
                );
                return Err(e.into());
            }
        } else {
            tracing::info!("Using password authentication for {}", state.remote_user);
        }
        Ok(())
    }

    async fn discover(&self) -> SessionCatalog {
        let state = &self.state;
        let instrument = state.options.account.instrument;
        tracing::info!(
            "Connecting to {}@{} to get VNC sessions list",
            state.remote_user,
            state.server
        );

        match state
            .remote
            .run(&state.server, &state.remote_user, &status_command(instrument))
            .await
        {
            Ok(output) => SessionCatalog::parse_status_output(
                &output,
                instrument,
                &state.server,
                &state.remote_user,
            ),
            Err(e) => {
                tracing::error!("  Failed: {}", e);
                SessionCatalog::default()
            }
        }
    }

    /// Names to open at start-up: configured ones that exist, else all
    fn default_sessions(&self) -> Vec<String> {
        let catalog = self.state.catalog();
        match &self.state.config.default_sessions {
            Some(wanted) => wanted
                .iter()
                .filter(|name| {
                    let found = catalog.find(name).is_some();
                    if !found {
                        tracing::warn!("Configured session '{}' was not discovered", name);
                    }
                    found
                })
                .cloned()
                .collect(),
            None => catalog.iter().map(|s| s.name.clone()).collect(),
        }
    }

    /// Open a session in the background; failures are logged by the task
    pub fn open_session(&self, name: String) -> AbortHandle {
        let controller = self.clone();
        self.track(tokio::spawn(async move {
            if let Err(e) = controller.launch_session(&name).await {
                tracing::error!("Failed to open '{}': {}", name, e);
            }
        }))
    }

    /// Remember a background launch so shutdown can cancel it
    fn track(&self, handle: JoinHandle<()>) -> AbortHandle {
        let abort = handle.abort_handle();
        let mut workers = self.state.workers.lock();
        workers.retain(|w| !w.is_finished());
        workers.push(handle);
        abort
    }

    /// Wait until every background launch has finished or been cancelled
    pub async fn wait_for_launches(&self) {
        loop {
            let workers = std::mem::take(&mut *self.state.workers.lock());
            if workers.is_empty() {
                return;
            }
            for worker in workers {
                if let Err(e) = worker.await {
                    if !e.is_cancelled() {
                        tracing::error!("Background launch failed: {}", e);
                    }
                }
            }
        }
    }

    /// Tunnel to a session and start its viewer
    pub async fn launch_session(&self, name: &str) -> Result<(), RvError> {
        let state = &self.state;
        tracing::info!("Opening VNCviewer for '{}'", name);

        let Some(session) = state.catalog().find(name) else {
            tracing::error!("No server VNC session found for '{}'.", name);
            return Ok(());
        };

        let request = TunnelRequest {
            remote_host: state.server.clone(),
            remote_user: state.remote_user.clone(),
            credential: state.options.credential.clone(),
            remote_port: session.remote_port(),
            session_name: session.name.clone(),
        };
        let local_port = state.tunnels.open_tunnel(&request).await.map_err(|e| {
            tracing::error!("Failed to open SSH tunnel for {}", request.remote_endpoint());
            e
        })?;

        let geometry = state.layout().geometry_hint(state.viewers.len());
        state
            .viewers
            .launch("localhost", local_port, geometry.as_deref())?;
        Ok(())
    }

    fn spawn_sound(&self) -> AbortHandle {
        let controller = self.clone();
        self.track(tokio::spawn(async move {
            if let Err(e) = controller.restart_audio().await {
                tracing::error!("Unable to start soundplay. See log for details.");
                tracing::debug!("soundplay failed: {}", e);
            }
        }))
    }

    /// (Re)start the sound player behind its own tunnel
    pub async fn restart_audio(&self) -> Result<(), RvError> {
        let state = &self.state;
        let request = TunnelRequest {
            remote_host: state.server.clone(),
            remote_user: state.remote_user.clone(),
            credential: state.options.credential.clone(),
            remote_port: SOUND_REMOTE_PORT,
            session_name: SOUND_SESSION_NAME.to_string(),
        };
        let local_port = state.tunnels.open_tunnel(&request).await?;
        state
            .sound
            .start("localhost", local_port, state.options.account.instrument)?;
        Ok(())
    }

    /// Carry out one menu command.
    ///
    /// Errors are never fatal; the caller reports them and prompts again.
    /// Sessions and the sound player open in the background so the menu
    /// stays responsive.
    pub async fn dispatch(&self, command: MenuCommand) -> Result<MenuOutcome, RvError> {
        let state = &self.state;
        if command != MenuCommand::Empty {
            tracing::debug!("Received command {:?}", command);
        }

        match command {
            MenuCommand::Empty => Ok(MenuOutcome::Idle),
            MenuCommand::ListSessions => {
                Ok(MenuOutcome::Sessions(state.catalog().sessions().to_vec()))
            }
            MenuCommand::OpenSession(index) => {
                let name = state
                    .catalog()
                    .get(index)
                    .map(|s| s.name.clone())
                    .ok_or_else(|| CommandError::UnknownDesktop(index.to_string()))?;
                self.open_session(name);
                Ok(MenuOutcome::Idle)
            }
            MenuCommand::Reposition => {
                let moved =
                    layout::reposition_windows(state.catalog().sessions(), state.layout()).await;
                if let Err(e) = moved {
                    tracing::error!("Failed to reposition windows, see log");
                    tracing::debug!("wmctrl failed: {}", e);
                }
                Ok(MenuOutcome::Idle)
            }
            MenuCommand::RestartAudio => {
                if state.sound_enabled() {
                    self.spawn_sound();
                } else {
                    tracing::warn!("Sounds are not enabled on this install. See config file.");
                }
                Ok(MenuOutcome::Idle)
            }
            MenuCommand::UploadLog => {
                self.upload_log().await?;
                Ok(MenuOutcome::Idle)
            }
            MenuCommand::ListTunnels => Ok(MenuOutcome::Tunnels(state.registry.list())),
            MenuCommand::CloseTunnel(port) => {
                state.tunnels.close_tunnel(port);
                Ok(MenuOutcome::Idle)
            }
            MenuCommand::CheckVersion => {
                match &state.config.version_url {
                    Some(url) => {
                        version::check_version(url, &state.options.version).await;
                    }
                    None => tracing::warn!("No version_url configured; cannot check for updates"),
                }
                Ok(MenuOutcome::Idle)
            }
            MenuCommand::Quit => Ok(MenuOutcome::Quit),
        }
    }

    async fn upload_log(&self) -> Result<(), RvError> {
        let state = &self.state;
        let Some(log_file) = state.options.log_file.as_deref() else {
            tracing::warn!("No log file to upload");
            return Ok(());
        };
        let name = log_file
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "rovnc.log".to_string());

        state
            .remote
            .upload(log_file, &state.server, &state.remote_user, &name)
            .await?;
        tracing::info!("  Uploaded {}", name);
        tracing::info!("  to {}@{}:{}", state.remote_user, state.server, name);
        Ok(())
    }

    /// Tear everything down in order: pending launches, sound, tunnels,
    /// firewall, viewers.
    ///
    /// Returns `false` when shutdown already ran.
    pub async fn shutdown(&self, reason: Option<&str>) -> bool {
        let state = &self.state;
        if !state.begin_shutdown() {
            tracing::debug!("Shutdown already performed");
            return false;
        }
        if let Some(reason) = reason {
            tracing::info!("{}", reason);
        }

        // Dropping a half-opened forwarder kills it
        for worker in state.workers.lock().drain(..) {
            worker.abort();
        }

        state.sound.shutdown();

        for record in state.registry.drain() {
            record.close();
        }

        if state.firewall_open.swap(false, Ordering::SeqCst) {
            if let (Some(firewall), Some(password)) =
                (&state.firewall, state.options.firewall_password.as_deref())
            {
                firewall.sign_off(password).await;
            }
        }

        tracing::info!("Terminating all VNC sessions.");
        let terminated = state.viewers.terminate_all().await;
        tracing::debug!("Terminated {} VNC viewers", terminated);

        state.finish_shutdown();
        tracing::info!("EXITING APP");
        true
    }
}
