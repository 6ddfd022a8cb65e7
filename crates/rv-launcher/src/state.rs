//! Launcher state management

use parking_lot::Mutex;
use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, OnceLock};
use tokio::task::JoinHandle;

use rv_core::config::LauncherConfig;
use rv_core::Account;

use crate::auth::Firewall;
use crate::catalog::SessionCatalog;
use crate::layout::WindowLayout;
use crate::lifecycle::Phase;
use crate::probe::PortCheck;
use crate::process::ProcessSpawner;
use crate::registry::TunnelRegistry;
use crate::remote::{Credential, RemoteShell};
use crate::sound::SoundSupervisor;
use crate::tunnel::TunnelManager;
use crate::viewer::{ViewerSettings, ViewerSupervisor};

/// Choices made on the command line for this run
#[derive(Clone)]
pub struct LaunchOptions {
    /// Instrument account being observed
    pub account: Account,
    /// How to log in to the telescope server
    pub credential: Credential,
    /// Authenticate only; open no sessions
    pub auth_only: bool,
    /// Skip the sound player
    pub no_sound: bool,
    /// Open viewers in view-only mode
    pub view_only: bool,
    /// Current log file, for upload
    pub log_file: Option<PathBuf>,
    /// Running program version
    pub version: String,
    /// Firewall password, when a firewall is configured
    pub firewall_password: Option<String>,
}

/// Collaborators the launcher talks to the outside world through
pub struct LauncherDeps {
    pub probe: Arc<dyn PortCheck>,
    pub spawner: Arc<dyn ProcessSpawner>,
    pub remote: Arc<dyn RemoteShell>,
    pub firewall: Option<Arc<dyn Firewall>>,
}

/// Everything one run of the launcher owns
pub struct LauncherState {
    /// Configuration
    pub config: LauncherConfig,
    /// Command-line choices
    pub options: LaunchOptions,
    /// Fully qualified telescope server
    pub server: String,
    /// Login used on the server
    pub remote_user: String,
    pub probe: Arc<dyn PortCheck>,
    pub registry: Arc<TunnelRegistry>,
    pub tunnels: TunnelManager,
    pub viewers: ViewerSupervisor,
    pub sound: SoundSupervisor,
    pub remote: Arc<dyn RemoteShell>,
    pub firewall: Option<Arc<dyn Firewall>>,
    /// Filled once discovery has run
    pub catalog: OnceLock<SessionCatalog>,
    /// Filled once the screen has been measured
    pub layout: OnceLock<WindowLayout>,
    /// Set while the firewall sign-on is active
    pub firewall_open: AtomicBool,
    /// Background launches that may still be running
    pub(crate) workers: Mutex<Vec<JoinHandle<()>>>,
    phase: Mutex<Phase>,
}

impl LauncherState {
    /// Create new launcher state
    pub fn new(config: LauncherConfig, options: LaunchOptions, deps: LauncherDeps) -> Self {
        let server = options.account.server_host(&config.server_domain);
        let remote_user = if options.credential.is_key() {
            config.ssh_account.clone()
        } else {
            options.account.name.clone()
        };

        let registry = Arc::new(TunnelRegistry::new(config.local_port_start));
        let tunnels = TunnelManager::new(
            Arc::clone(&registry),
            Arc::clone(&deps.probe),
            Arc::clone(&deps.spawner),
            config.tunnel.clone(),
        );
        let viewers = ViewerSupervisor::new(
            ViewerSettings::from_config(&config, options.view_only),
            Arc::clone(&deps.spawner),
        );
        let sound = SoundSupervisor::from_config(&config, Arc::clone(&deps.spawner));

        Self {
            config,
            options,
            server,
            remote_user,
            probe: deps.probe,
            registry,
            tunnels,
            viewers,
            sound,
            remote: deps.remote,
            firewall: deps.firewall,
            catalog: OnceLock::new(),
            layout: OnceLock::new(),
            firewall_open: AtomicBool::new(false),
            workers: Mutex::new(Vec::new()),
            phase: Mutex::new(Phase::Initializing),
        }
    }

    pub fn phase(&self) -> Phase {
        *self.phase.lock()
    }

    /// Move forward to `next`; refused once shutdown has begun
    pub fn advance(&self, next: Phase) -> bool {
        let mut phase = self.phase.lock();
        if *phase >= Phase::ShuttingDown || next <= *phase || next >= Phase::ShuttingDown {
            return false;
        }
        tracing::debug!("Launcher phase {:?} -> {:?}", *phase, next);
        *phase = next;
        true
    }

    /// Enter `ShuttingDown`. Only the first caller gets `true`.
    pub fn begin_shutdown(&self) -> bool {
        let mut phase = self.phase.lock();
        if *phase >= Phase::ShuttingDown {
            return false;
        }
        tracing::debug!("Launcher phase {:?} -> {:?}", *phase, Phase::ShuttingDown);
        *phase = Phase::ShuttingDown;
        true
    }

    pub(crate) fn finish_shutdown(&self) {
        *self.phase.lock() = Phase::Terminated;
    }

    /// Discovered sessions; empty before discovery
    pub fn catalog(&self) -> &SessionCatalog {
        static EMPTY: OnceLock<SessionCatalog> = OnceLock::new();
        self.catalog
            .get()
            .unwrap_or_else(|| EMPTY.get_or_init(SessionCatalog::default))
    }

    /// Window layout; empty before it is computed
    pub fn layout(&self) -> &WindowLayout {
        static EMPTY: OnceLock<WindowLayout> = OnceLock::new();
        self.layout
            .get()
            .unwrap_or_else(|| EMPTY.get_or_init(WindowLayout::default))
    }

    /// Whether the sound player should run this session
    pub fn sound_enabled(&self) -> bool {
        !self.options.no_sound && !self.config.nosound
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeProbe, FakeRemote, FakeSpawner};

    fn state(credential: Credential) -> LauncherState {
        let options = LaunchOptions {
            account: Account::resolve("shane").unwrap(),
            credential,
            auth_only: false,
            no_sound: false,
            view_only: false,
            log_file: None,
            version: "0.9.2".to_string(),
            firewall_password: None,
        };
        let deps = LauncherDeps {
            probe: Arc::new(FakeProbe::new()),
            spawner: Arc::new(FakeSpawner::new()),
            remote: Arc::new(FakeRemote::new()),
            firewall: None,
        };
        LauncherState::new(LauncherConfig::default(), options, deps)
    }

    #[test]
    fn test_remote_user_follows_credential() {
        let keyed = state(Credential::Key(PathBuf::from("id_rsa")));
        assert_eq!(keyed.remote_user, "user");
        assert_eq!(keyed.server, "shimmy.ucolick.org");

        let password = state(Credential::Password("pw".to_string()));
        assert_eq!(password.remote_user, "shane");
    }

    #[test]
    fn test_phase_only_moves_forward() {
        let s = state(Credential::Key(PathBuf::from("id_rsa")));
        assert_eq!(s.phase(), Phase::Initializing);
        assert!(s.advance(Phase::Discovering));
        assert!(!s.advance(Phase::Initializing));
        assert!(!s.advance(Phase::ShuttingDown));
        assert!(s.advance(Phase::Running));
    }

    #[test]
    fn test_shutdown_guard() {
        let s = state(Credential::Key(PathBuf::from("id_rsa")));
        assert!(s.begin_shutdown());
        assert!(!s.begin_shutdown());
        assert!(!s.advance(Phase::Running));
        s.finish_shutdown();
        assert!(!s.begin_shutdown());
        assert_eq!(s.phase(), Phase::Terminated);
    }

    #[test]
    fn test_empty_catalog_before_discovery() {
        let s = state(Credential::Key(PathBuf::from("id_rsa")));
        assert!(s.catalog().is_empty());
        assert!(s.layout().is_empty());
    }
}
