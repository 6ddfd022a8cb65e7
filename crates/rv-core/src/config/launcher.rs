//! Launcher configuration

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use super::serde_utils::{duration_millis, duration_secs};
use crate::error::ConfigError;

/// Site configuration for the launcher
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LauncherConfig {
    /// Path to the VNC viewer, or "none" to connect manually
    pub vncviewer: Option<String>,

    /// Extra arguments passed to the viewer, whitespace separated
    pub vncargs: Option<String>,

    /// Prefix placed before the server target (e.g. "vnc://")
    pub vncprefix: String,

    /// Path to the sound player binary
    pub soundplayer: Option<String>,

    /// Local audio playback command handed to the sound player
    pub aplay: Option<String>,

    /// First local port tried for tunnels
    pub local_port_start: u16,

    /// Fixed viewer window size (width, height)
    pub window_size: Option<[u32; 2]>,

    /// Fixed viewer window positions, used cyclically
    pub window_positions: Option<Vec<[i32; 2]>>,

    /// Use password authentication instead of the SSH key
    pub nosshkey: bool,

    /// Do not start the sound player
    pub nosound: bool,

    /// Private key used for every ssh/scp invocation
    pub ssh_key: PathBuf,

    /// Account used on the telescope server when authenticating by key
    pub ssh_account: String,

    /// DNS domain of the telescope servers
    pub server_domain: String,

    /// Sessions opened at start-up; all discovered sessions when unset
    pub default_sessions: Option<Vec<String>>,

    /// Firewall host for sign-on
    pub firewall_address: Option<String>,

    /// Firewall port for sign-on
    pub firewall_port: Option<u16>,

    /// Firewall user for sign-on
    pub firewall_user: Option<String>,

    /// URL of the published manifest for the version check
    pub version_url: Option<String>,

    /// Who to contact when something goes wrong
    pub support_contact: String,

    /// Tunnel and remote command tunables
    pub tunnel: TunnelSettings,
}

impl Default for LauncherConfig {
    fn default() -> Self {
        Self {
            vncviewer: None,
            vncargs: None,
            vncprefix: String::new(),
            soundplayer: None,
            aplay: None,
            local_port_start: 5901,
            window_size: None,
            window_positions: None,
            nosshkey: false,
            nosound: false,
            ssh_key: super::default_config_dir().join("id_rsa"),
            ssh_account: "user".to_string(),
            server_domain: "ucolick.org".to_string(),
            default_sessions: None,
            firewall_address: None,
            firewall_port: None,
            firewall_user: None,
            version_url: None,
            support_contact: "your observatory support staff".to_string(),
            tunnel: TunnelSettings::default(),
        }
    }
}

impl LauncherConfig {
    /// The viewer to launch, if any
    pub fn viewer_program(&self) -> Option<&str> {
        self.vncviewer
            .as_deref()
            .map(str::trim)
            .filter(|v| !v.is_empty() && !v.eq_ignore_ascii_case("none"))
    }

    /// Viewer arguments split on whitespace
    pub fn viewer_args(&self) -> Vec<String> {
        self.vncargs
            .as_deref()
            .map(|a| a.split_whitespace().map(str::to_string).collect())
            .unwrap_or_default()
    }

    /// Firewall sign-on settings, when all three keys are present
    pub fn firewall(&self) -> Option<FirewallSettings> {
        match (&self.firewall_address, self.firewall_port, &self.firewall_user) {
            (Some(address), Some(port), Some(user)) => Some(FirewallSettings {
                address: address.clone(),
                port,
                user: user.clone(),
            }),
            _ => None,
        }
    }

    /// Expand `~` and environment variables in path-like settings
    pub fn expand_paths(&mut self) {
        for value in [&mut self.vncviewer, &mut self.soundplayer, &mut self.aplay]
            .into_iter()
            .flatten()
        {
            *value = super::expand_path(value);
        }
        self.ssh_key = PathBuf::from(super::expand_path(&self.ssh_key.to_string_lossy()));
    }

    /// Validate the configuration before anything is started
    pub fn check(&self, use_ssh_key: bool) -> Result<(), ConfigError> {
        if self.viewer_program().is_none() {
            tracing::warn!("Config parameter 'vncviewer' undefined.");
            tracing::warn!("You will need to open your vnc viewer manually.");
        }

        if self.local_port_start == 0 {
            return Err(ConfigError::Invalid(
                "local_port_start must be greater than zero".to_string(),
            ));
        }
        if u32::from(self.local_port_start) + u32::from(self.tunnel.port_search_limit)
            > u32::from(u16::MAX)
        {
            return Err(ConfigError::Invalid(format!(
                "local_port_start {} leaves no room for {} candidate ports",
                self.local_port_start, self.tunnel.port_search_limit
            )));
        }
        if self.tunnel.port_search_limit == 0 || self.tunnel.liveness_attempts == 0 {
            return Err(ConfigError::Invalid(
                "tunnel search and liveness bounds must be greater than zero".to_string(),
            ));
        }

        if use_ssh_key && !self.ssh_key.exists() {
            return Err(ConfigError::MissingKey(self.ssh_key.clone()));
        }

        Ok(())
    }
}

/// Firewall sign-on endpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FirewallSettings {
    pub address: String,
    pub port: u16,
    pub user: String,
}

/// Bounds for tunnel set-up and remote commands
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TunnelSettings {
    /// Consecutive local ports tried before giving up
    pub port_search_limit: u16,

    /// Liveness polls after the forwarder starts
    pub liveness_attempts: u32,

    /// Delay between liveness polls
    #[serde(rename = "liveness_interval_ms", with = "duration_millis")]
    pub liveness_interval: Duration,

    /// Delay between consecutive session launches
    #[serde(rename = "launch_stagger_ms", with = "duration_millis")]
    pub launch_stagger: Duration,

    /// Upper bound for a remote command
    #[serde(rename = "remote_command_timeout_secs", with = "duration_secs")]
    pub remote_command_timeout: Duration,

    /// Upper bound for the log upload
    #[serde(rename = "upload_timeout_secs", with = "duration_secs")]
    pub upload_timeout: Duration,
}

impl Default for TunnelSettings {
    fn default() -> Self {
        Self {
            port_search_limit: 100,
            liveness_attempts: 50,
            liveness_interval: Duration::from_millis(100),
            launch_stagger: Duration::from_millis(50),
            remote_command_timeout: Duration::from_secs(6),
            upload_timeout: Duration::from_secs(10),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config: LauncherConfig = toml::from_str("").unwrap();
        assert_eq!(config.local_port_start, 5901);
        assert_eq!(config.tunnel.port_search_limit, 100);
        assert_eq!(config.tunnel.liveness_attempts, 50);
        assert_eq!(config.tunnel.liveness_interval, Duration::from_millis(100));
        assert!(config.viewer_program().is_none());
        assert!(config.firewall().is_none());
    }

    #[test]
    fn test_full_config() {
        let toml = r#"
vncviewer = "/usr/bin/vncviewer"
vncargs = "-Shared -FullColor"
vncprefix = "vnc://"
soundplayer = "soundplay"
aplay = "aplay -q"
local_port_start = 6100
window_size = [800, 600]
window_positions = [[0, 0], [800, 0]]
nosound = true
default_sessions = ["Kastblue", "Kastred"]
firewall_address = "fw.example.org"
firewall_port = 23
firewall_user = "observer"

[tunnel]
port_search_limit = 20
liveness_interval_ms = 250
remote_command_timeout_secs = 3
"#;
        let config: LauncherConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.viewer_args(), vec!["-Shared", "-FullColor"]);
        assert_eq!(config.window_size, Some([800, 600]));
        assert_eq!(config.window_positions.as_ref().map(Vec::len), Some(2));
        assert!(config.nosound);
        assert_eq!(config.tunnel.port_search_limit, 20);
        assert_eq!(config.tunnel.liveness_attempts, 50);
        assert_eq!(config.tunnel.liveness_interval, Duration::from_millis(250));
        assert_eq!(config.tunnel.remote_command_timeout, Duration::from_secs(3));

        let fw = config.firewall().unwrap();
        assert_eq!(fw.address, "fw.example.org");
        assert_eq!(fw.port, 23);
    }

    #[test]
    fn test_viewer_none_is_manual() {
        for raw in ["none", "None", "NONE", "  "] {
            let config = LauncherConfig {
                vncviewer: Some(raw.to_string()),
                ..Default::default()
            };
            assert!(config.viewer_program().is_none(), "{raw:?}");
        }
    }

    #[test]
    fn test_check_rejects_missing_key() {
        let config = LauncherConfig {
            ssh_key: PathBuf::from("/nonexistent/id_rsa"),
            ..Default::default()
        };
        assert!(matches!(config.check(true), Err(ConfigError::MissingKey(_))));
        assert!(config.check(false).is_ok());
    }

    #[test]
    fn test_check_rejects_port_overflow() {
        let config = LauncherConfig {
            local_port_start: 65500,
            ..Default::default()
        };
        assert!(matches!(config.check(false), Err(ConfigError::Invalid(_))));
    }
}
