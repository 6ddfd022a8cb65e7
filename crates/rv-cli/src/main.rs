//! rovnc CLI
//!
//! Opens SSH tunnels to the VNC sessions of a telescope control server,
//! starts a viewer for each, and keeps a menu running until the operator
//! quits. Every run ends through the same shutdown and exits with status 1.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::io::BufReader;

use rovnc::logging::{self, LogHandle, LOG_DIR};
use rovnc::menu::run_menu;
use rovnc::output::{print_error, print_fatal, print_warning};
use rovnc::prompt::prompt_password;
use rv_core::config::{load_launcher_config, LauncherConfig};
use rv_core::error::{AuthError, ConfigError, RvError};
use rv_core::Account;
use rv_launcher::auth::{Firewall, TelnetFirewall};
use rv_launcher::probe::PortProbe;
use rv_launcher::process::SystemSpawner;
use rv_launcher::remote::{Credential, SshRemoteShell};
use rv_launcher::{LaunchOptions, LauncherDeps, LauncherState, LifecycleController};

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Parser)]
#[command(name = "rovnc")]
#[command(author, version, about = "Open VNC sessions for remote observing")]
struct Cli {
    /// Instrument account (shane, nickel or apf)
    #[arg(default_value = "nickel")]
    account: String,

    /// Authenticate only; open no VNC sessions
    #[arg(long)]
    authonly: bool,

    /// Do not start the sound player
    #[arg(long)]
    nosound: bool,

    /// Open viewers in view-only mode
    #[arg(long)]
    viewonly: bool,

    /// Log in with a password instead of the SSH key
    #[arg(long, hide = true)]
    nosshkey: bool,

    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let log = match logging::init_logging(Path::new(LOG_DIR), cli.verbose) {
        Ok(log) => log,
        Err(e) => {
            print_error(&format!("Unable to create logger in '{}': {}", LOG_DIR, e));
            std::process::exit(1);
        }
    };

    tracing::debug!("***** PROGRAM STARTED *****");
    tracing::debug!("Command: {}", std::env::args().collect::<Vec<_>>().join(" "));
    log_system_info();

    run(cli, &log).await;

    tracing::debug!("***** PROGRAM ENDED *****");
    drop(log);
    std::process::exit(1);
}

fn log_system_info() {
    tracing::debug!("rovnc v{}", VERSION);
    tracing::debug!(
        "Host: {} User: {} Platform: {}/{}",
        gethostname::gethostname().to_string_lossy(),
        whoami::username(),
        std::env::consts::OS,
        std::env::consts::ARCH
    );
}

async fn run(cli: Cli, log: &LogHandle) {
    let default_contact = LauncherConfig::default().support_contact;
    let controller = match prepare(&cli, log) {
        Ok(controller) => controller,
        Err(e) => {
            tracing::debug!("PROGRAM ERROR: {:?}", e);
            print_fatal(&format!("{:#}", e), &default_contact, Some(&log.path));
            return;
        }
    };

    let outcome = tokio::select! {
        result = operate(&controller) => result,
        signal = shutdown_signal() => {
            print_warning(&format!("Received {}, shutting down", signal));
            Ok(())
        }
    };

    if let Err(e) = outcome {
        tracing::debug!("PROGRAM ERROR: {:?}", e);
        let support = &controller.state().config.support_contact;
        print_fatal(&e, support, Some(&log.path));
    }

    controller.shutdown(None).await;
}

/// Load configuration, collect credentials and build the controller
fn prepare(cli: &Cli, log: &LogHandle) -> Result<LifecycleController> {
    let (_, config) =
        load_launcher_config(cli.config.as_deref()).context("Unable to load configuration")?;

    let account = Account::resolve(&cli.account)
        .ok_or_else(|| ConfigError::UnknownAccount(cli.account.clone()))?;
    tracing::info!(
        "Account {} on telescope {} ({})",
        account.name,
        account.telescope,
        account.server_host(&config.server_domain)
    );

    let credential = if cli.nosshkey || config.nosshkey {
        let prompt = format!("Password for user {}: ", account.name);
        let password = prompt_password(&prompt)
            .map_err(|e| AuthError::NoCredential(format!("password prompt failed: {}", e)))?;
        Credential::Password(password)
    } else {
        Credential::Key(config.ssh_key.clone())
    };

    let (firewall, firewall_password) = match config.firewall() {
        Some(settings) => {
            let prompt = format!("Firewall password for {}: ", settings.user);
            let password = prompt_password(&prompt)
                .map_err(|e| AuthError::NoCredential(format!("firewall prompt failed: {}", e)))?;
            let firewall: Arc<dyn Firewall> = Arc::new(TelnetFirewall::new(settings));
            (Some(firewall), Some(password))
        }
        None => (None, None),
    };

    let deps = LauncherDeps {
        probe: Arc::new(PortProbe::detect()),
        spawner: Arc::new(SystemSpawner),
        remote: Arc::new(SshRemoteShell::new(credential.clone(), &config.tunnel)),
        firewall,
    };
    let options = LaunchOptions {
        account,
        credential,
        auth_only: cli.authonly,
        no_sound: cli.nosound,
        view_only: cli.viewonly,
        log_file: Some(log.path.clone()),
        version: VERSION.to_string(),
        firewall_password,
    };

    Ok(LifecycleController::new(LauncherState::new(config, options, deps)))
}

/// Start up, then hand the terminal to the menu
async fn operate(controller: &LifecycleController) -> Result<(), RvError> {
    if let Some(url) = controller.state().config.version_url.clone() {
        tokio::spawn(async move {
            rv_launcher::version::check_version(&url, VERSION).await;
        });
    }

    controller.start().await?;

    let stdin = BufReader::new(tokio::io::stdin());
    run_menu(controller, stdin, VERSION).await;
    Ok(())
}

/// Resolves with the name of the first termination signal received
async fn shutdown_signal() -> &'static str {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => "Ctrl+C",
        _ = terminate => "SIGTERM",
    }
}
