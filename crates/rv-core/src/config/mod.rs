//! Configuration management for rovnc

mod launcher;
pub mod serde_utils;

pub use launcher::{FirewallSettings, LauncherConfig, TunnelSettings};

use crate::error::ConfigError;
use std::path::{Path, PathBuf};

/// Config files tried in the working directory, in order of preference
const LOCAL_CONFIG_FILES: &[&str] = &["local_config.toml", "rovnc.toml"];

/// Get the default configuration directory
pub fn default_config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("rovnc")
}

/// Get the default configuration file path
pub fn default_config_path() -> PathBuf {
    default_config_dir().join("config.toml")
}

/// Load configuration from a file
pub fn load_config<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, ConfigError> {
    if !path.exists() {
        return Err(ConfigError::NotFound(path.to_path_buf()));
    }

    let content = std::fs::read_to_string(path)
        .map_err(|e| ConfigError::Invalid(format!("Failed to read config: {}", e)))?;
    tracing::debug!("Contents of config file {:?}:\n{}", path, content);

    let config: T = toml::from_str(&content)?;
    Ok(config)
}

/// Find the config file to use.
///
/// An explicitly requested file must exist. Otherwise the first existing
/// file among the local candidates and the default path wins.
pub fn locate_config(explicit: Option<&Path>) -> Result<PathBuf, ConfigError> {
    if let Some(path) = explicit {
        if !path.is_file() {
            return Err(ConfigError::NotFound(path.to_path_buf()));
        }
        return Ok(path.to_path_buf());
    }

    let mut candidates: Vec<PathBuf> = LOCAL_CONFIG_FILES.iter().map(PathBuf::from).collect();
    candidates.push(default_config_path());

    candidates
        .iter()
        .find(|p| p.is_file())
        .cloned()
        .ok_or(ConfigError::NoCandidate(candidates))
}

/// Locate, load and post-process the launcher configuration
pub fn load_launcher_config(
    explicit: Option<&Path>,
) -> Result<(PathBuf, LauncherConfig), ConfigError> {
    let path = locate_config(explicit)?;
    tracing::info!("Using config file: {}", path.display());

    let mut config: LauncherConfig = load_config(&path)?;
    config.expand_paths();
    tracing::debug!("Parsed configuration: {:#?}", config);

    Ok((path, config))
}

/// Expand a leading `~` and any `$VAR`/`${VAR}` references.
///
/// Unknown variables are left as written.
pub fn expand_path(raw: &str) -> String {
    let tilde_expanded = match raw.strip_prefix('~') {
        Some(rest) if rest.is_empty() || rest.starts_with('/') => match dirs::home_dir() {
            Some(home) => format!("{}{}", home.display(), rest),
            None => raw.to_string(),
        },
        _ => raw.to_string(),
    };

    let mut out = String::with_capacity(tilde_expanded.len());
    let mut chars = tilde_expanded.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '$' {
            out.push(c);
            continue;
        }

        let braced = chars.peek() == Some(&'{');
        if braced {
            chars.next();
        }
        let mut name = String::new();
        while let Some(&n) = chars.peek() {
            if n.is_ascii_alphanumeric() || n == '_' {
                name.push(n);
                chars.next();
            } else {
                break;
            }
        }
        let closed = braced && chars.peek() == Some(&'}');
        if closed {
            chars.next();
        }

        match std::env::var(&name) {
            Ok(value) if !name.is_empty() && (!braced || closed) => out.push_str(&value),
            _ => {
                out.push('$');
                if braced {
                    out.push('{');
                }
                out.push_str(&name);
                if closed {
                    out.push('}');
                }
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_locate_explicit_missing() {
        let err = locate_config(Some(Path::new("/nonexistent/rovnc.toml"))).unwrap_err();
        assert!(matches!(err, ConfigError::NotFound(_)));
    }

    #[test]
    fn test_locate_explicit_existing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("site.toml");
        std::fs::write(&path, "vncviewer = \"none\"\n").unwrap();
        assert_eq!(locate_config(Some(&path)).unwrap(), path);
    }

    #[test]
    fn test_load_launcher_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("site.toml");
        std::fs::write(&path, "vncviewer = \"vncviewer\"\nlocal_port_start = 6001\n").unwrap();

        let (found, config) = load_launcher_config(Some(&path)).unwrap();
        assert_eq!(found, path);
        assert_eq!(config.local_port_start, 6001);
        assert_eq!(config.viewer_program(), Some("vncviewer"));
    }

    #[test]
    fn test_load_invalid_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.toml");
        std::fs::write(&path, "local_port_start = \"not a number\"\n").unwrap();
        let err = load_launcher_config(Some(&path)).unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_expand_path_variables() {
        std::env::set_var("RV_TEST_VIEWER_DIR", "/opt/tiger");
        assert_eq!(expand_path("$RV_TEST_VIEWER_DIR/vncviewer"), "/opt/tiger/vncviewer");
        assert_eq!(expand_path("${RV_TEST_VIEWER_DIR}/bin"), "/opt/tiger/bin");
        assert_eq!(expand_path("$RV_TEST_UNSET_VAR/x"), "$RV_TEST_UNSET_VAR/x");
        assert_eq!(expand_path("/usr/bin/vncviewer"), "/usr/bin/vncviewer");
    }

    #[test]
    fn test_expand_path_tilde() {
        if let Some(home) = dirs::home_dir() {
            assert_eq!(expand_path("~/bin/viewer"), format!("{}/bin/viewer", home.display()));
        }
        assert_eq!(expand_path("~other/bin"), "~other/bin");
    }
}
