//! Sound player process
//!
//! At most one player runs at a time; starting a new one stops the old.

use parking_lot::Mutex;
use std::sync::Arc;

use rv_core::config::LauncherConfig;
use rv_core::error::LaunchError;

use crate::process::{CommandSpec, ManagedChild, ProcessSpawner};

/// Remote port the sound server listens on
pub const SOUND_REMOTE_PORT: u16 = 9798;

/// Tunnel session name used for the sound server
pub const SOUND_SESSION_NAME: &str = "soundplay";

/// Player binary shipped for this platform
pub fn default_player() -> Option<&'static str> {
    match (std::env::consts::OS, std::env::consts::ARCH) {
        ("macos", _) => Some("soundplay-107050-8.6.3-macosx10.5-ix86+x86_64"),
        ("linux", "x86_64") => Some("soundplay-107098-8.6.3-linux-x86_64"),
        ("linux", _) => Some("soundplay-107098-8.6.3-linux-ix86"),
        _ => None,
    }
}

/// Supervises the single sound player
pub struct SoundSupervisor {
    program: Option<String>,
    aplay: Option<String>,
    spawner: Arc<dyn ProcessSpawner>,
    player: Mutex<Player>,
}

#[derive(Default)]
struct Player {
    child: Option<Box<dyn ManagedChild>>,
    closed: bool,
}

impl SoundSupervisor {
    pub fn new(
        program: Option<String>,
        aplay: Option<String>,
        spawner: Arc<dyn ProcessSpawner>,
    ) -> Self {
        Self {
            program,
            aplay,
            spawner,
            player: Mutex::new(Player::default()),
        }
    }

    pub fn from_config(config: &LauncherConfig, spawner: Arc<dyn ProcessSpawner>) -> Self {
        let program = config
            .soundplayer
            .clone()
            .or_else(|| default_player().map(str::to_string));
        Self::new(program, config.aplay.clone(), spawner)
    }

    /// Command line for a player connected to `host:port`
    pub fn player_command(&self, host: &str, port: u16, instrument: &str) -> Option<CommandSpec> {
        let program = self.program.as_deref()?;
        let mut spec = CommandSpec::new(program).args([
            "-s".to_string(),
            host.to_string(),
            "-p".to_string(),
            port.to_string(),
            "-i".to_string(),
            instrument.to_string(),
        ]);
        if let Some(aplay) = self.aplay.as_deref().filter(|a| !a.is_empty()) {
            spec = spec.args(["-a", aplay]);
        }
        Some(spec)
    }

    /// Start the player, replacing any running one
    pub fn start(&self, host: &str, port: u16, instrument: &str) -> Result<(), LaunchError> {
        let spec = self
            .player_command(host, port, instrument)
            .ok_or_else(|| LaunchError::MissingProgram("soundplay".to_string()))?;

        let mut player = self.player.lock();
        if player.closed {
            return Err(LaunchError::ShuttingDown(spec.program));
        }
        Self::stop_child(player.child.take());

        tracing::info!("Starting soundplay for {} via {}:{}", instrument, host, port);
        tracing::debug!("soundplay command: {}", spec);
        let mut child = self.spawner.spawn(&spec)?;
        if child.has_exited() {
            return Err(LaunchError::ExitedImmediately {
                program: spec.program,
            });
        }
        player.child = Some(child);
        Ok(())
    }

    /// Stop the player if one is running; returns whether one was
    pub fn stop(&self) -> bool {
        Self::stop_child(self.player.lock().child.take())
    }

    /// Stop the player and refuse to start another
    pub fn shutdown(&self) -> bool {
        let mut player = self.player.lock();
        player.closed = true;
        Self::stop_child(player.child.take())
    }

    fn stop_child(child: Option<Box<dyn ManagedChild>>) -> bool {
        let Some(mut child) = child else {
            return false;
        };

        if child.has_exited() {
            tracing::debug!("soundplay already exited");
            return false;
        }

        tracing::info!("Terminating soundplay");
        if let Err(e) = child.terminate() {
            tracing::error!("Failed to terminate soundplay: {}", e);
        }
        true
    }

    pub fn is_running(&self) -> bool {
        self.player
            .lock()
            .child
            .as_mut()
            .map(|child| !child.has_exited())
            .unwrap_or(false)
    }
}
