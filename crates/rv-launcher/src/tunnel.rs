//! SSH tunnel set-up
//!
//! Opening a tunnel picks a free local port, spawns an `ssh -L` forwarder,
//! waits for its local listener to appear and records it in the
//! [`TunnelRegistry`]. Every failure is returned to the caller; a
//! forwarder that never comes up is killed before returning.

use std::sync::Arc;
use std::time::Instant;

use rv_core::config::TunnelSettings;
use rv_core::error::TunnelError;

use crate::probe::{PortCheck, PortStatus};
use crate::process::{ManagedChild, ProcessSpawner};
use crate::registry::{Claim, TunnelRecord, TunnelRegistry};
use crate::remote::{forward_command, Credential};

/// Where a tunnel should lead and what it is for
#[derive(Debug, Clone)]
pub struct TunnelRequest {
    pub remote_host: String,
    pub remote_user: String,
    pub credential: Credential,
    pub remote_port: u16,
    pub session_name: String,
}

impl TunnelRequest {
    /// `user@host:port` of the far end
    pub fn remote_endpoint(&self) -> String {
        format!("{}@{}:{}", self.remote_user, self.remote_host, self.remote_port)
    }
}

/// Holds a session name claim; released on drop, including cancellation
struct ClaimGuard<'a> {
    registry: &'a TunnelRegistry,
    name: &'a str,
}

impl<'a> ClaimGuard<'a> {
    fn new(registry: &'a TunnelRegistry, name: &'a str) -> Self {
        Self { registry, name }
    }
}

impl Drop for ClaimGuard<'_> {
    fn drop(&mut self) {
        self.registry.release_claim(self.name);
    }
}

/// Opens tunnels and records them in the registry
pub struct TunnelManager {
    registry: Arc<TunnelRegistry>,
    probe: Arc<dyn PortCheck>,
    spawner: Arc<dyn ProcessSpawner>,
    settings: TunnelSettings,
}

impl TunnelManager {
    pub fn new(
        registry: Arc<TunnelRegistry>,
        probe: Arc<dyn PortCheck>,
        spawner: Arc<dyn ProcessSpawner>,
        settings: TunnelSettings,
    ) -> Self {
        Self {
            registry,
            probe,
            spawner,
            settings,
        }
    }

    pub fn registry(&self) -> &Arc<TunnelRegistry> {
        &self.registry
    }

    /// Open (or reuse) a tunnel and return its local port.
    ///
    /// An existing tunnel is reused when its session name matches, without
    /// comparing the remote end. A caller that finds the name being opened
    /// by someone else waits for that attempt and reuses its result.
    pub async fn open_tunnel(&self, request: &TunnelRequest) -> Result<u16, TunnelError> {
        let name = request.session_name.as_str();
        let mut waiting = false;
        let _claim = loop {
            match self.registry.claim_session(name) {
                Claim::Existing(port) => {
                    tracing::info!("Found existing SSH tunnel on port {} for {}", port, name);
                    return Ok(port);
                }
                Claim::Claimed => break ClaimGuard::new(&self.registry, name),
                Claim::Pending => {
                    if !waiting {
                        tracing::debug!("Waiting for the tunnel being opened for {}", name);
                        waiting = true;
                    }
                    tokio::time::sleep(self.settings.liveness_interval).await;
                }
                Claim::Closed => return Err(TunnelError::ShuttingDown(name.to_string())),
            }
        };

        let remote_endpoint = request.remote_endpoint();
        let local_port = self.find_free_port(&remote_endpoint).await?;

        tracing::info!(
            "Opening SSH tunnel for {} on local port {}.",
            remote_endpoint,
            local_port
        );
        let spec = forward_command(
            &request.credential,
            &request.remote_host,
            &request.remote_user,
            local_port,
            request.remote_port,
        );
        tracing::debug!("ssh command: {}", spec);

        let mut child = self.spawner.spawn(&spec)?;
        if child.has_exited() {
            return Err(TunnelError::ProcessDied { local_port });
        }

        self.wait_for_listener(local_port, child.as_mut()).await?;

        let record = TunnelRecord {
            local_port,
            remote_endpoint,
            session_name: name.to_string(),
            child,
        };
        if let Err(record) = self.registry.record(record) {
            record.close();
            if self.registry.is_closed() {
                return Err(TunnelError::ShuttingDown(name.to_string()));
            }
            tracing::error!("Local port {} was registered while the tunnel opened", local_port);
            return Err(TunnelError::DuplicatePort(local_port));
        }

        Ok(local_port)
    }

    /// Close the tunnel on `local_port`; false when there is none
    pub fn close_tunnel(&self, local_port: u16) -> bool {
        match self.registry.release(local_port) {
            Some(record) => {
                record.close();
                true
            }
            None => {
                tracing::info!("No SSH tunnel registered on port {}", local_port);
                false
            }
        }
    }

    /// Walk up from the registry cursor until a port is free
    async fn find_free_port(&self, remote_endpoint: &str) -> Result<u16, TunnelError> {
        for _ in 0..self.settings.port_search_limit {
            let port = self.registry.reserve_next_port();
            if self.registry.contains(port) {
                continue;
            }

            match self.probe.status(port).await {
                PortStatus::Free => return Ok(port),
                PortStatus::InUse => {
                    tracing::debug!("Port {} is in use.", port);
                }
                PortStatus::Unknown => {
                    tracing::warn!(
                        "Cannot tell whether port {} is in use ({} probe); assuming it is free",
                        port,
                        self.probe.name()
                    );
                    return Ok(port);
                }
            }
        }

        tracing::error!(
            "Could not find an open local port for SSH tunnel to {}",
            remote_endpoint
        );
        self.registry.reset_cursor();
        Err(TunnelError::NoFreePort {
            remote: remote_endpoint.to_string(),
            attempts: self.settings.port_search_limit,
        })
    }

    /// Poll until the forwarder listens on `local_port`.
    ///
    /// Kills the child on every failure path.
    async fn wait_for_listener(
        &self,
        local_port: u16,
        child: &mut dyn ManagedChild,
    ) -> Result<(), TunnelError> {
        let started = Instant::now();

        for _ in 0..self.settings.liveness_attempts {
            if child.has_exited() {
                return Err(TunnelError::ProcessDied { local_port });
            }

            match self.probe.status(local_port).await {
                PortStatus::InUse => {
                    tracing::debug!(
                        "Tunnel on port {} up after {:?}",
                        local_port,
                        started.elapsed()
                    );
                    return Ok(());
                }
                PortStatus::Unknown => {
                    tokio::time::sleep(self.settings.liveness_interval).await;
                    if child.has_exited() {
                        return Err(TunnelError::ProcessDied { local_port });
                    }
                    tracing::warn!(
                        "Cannot verify tunnel on port {}; continuing since ssh is still running",
                        local_port
                    );
                    return Ok(());
                }
                PortStatus::Free => {
                    tokio::time::sleep(self.settings.liveness_interval).await;
                }
            }
        }

        if let Err(e) = child.kill() {
            tracing::debug!("Failed to kill stalled tunnel process: {}", e);
        }
        Err(TunnelError::Timeout {
            local_port,
            waited: started.elapsed(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeProbe, FakeSpawner};
    use std::collections::HashSet;
    use std::path::PathBuf;
    use std::time::Duration;

    fn settings() -> TunnelSettings {
        TunnelSettings {
            liveness_interval: Duration::from_millis(10),
            ..TunnelSettings::default()
        }
    }

    fn setup() -> (TunnelManager, FakeProbe, FakeSpawner) {
        let probe = FakeProbe::new();
        let spawner = FakeSpawner::with_probe(probe.clone());
        let manager = TunnelManager::new(
            Arc::new(TunnelRegistry::new(5901)),
            Arc::new(probe.clone()),
            Arc::new(spawner.clone()),
            settings(),
        );
        (manager, probe, spawner)
    }

    fn request(name: &str, remote_port: u16) -> TunnelRequest {
        TunnelRequest {
            remote_host: "noir.ucolick.org".to_string(),
            remote_user: "user".to_string(),
            credential: Credential::Key(PathBuf::from("id_rsa")),
            remote_port,
            session_name: name.to_string(),
        }
    }

    #[tokio::test]
    async fn test_open_tunnel_records_port() {
        let (manager, _, spawner) = setup();

        let port = manager.open_tunnel(&request("Nickelstatus", 5902)).await.unwrap();
        assert_eq!(port, 5901);
        assert_eq!(spawner.count(), 1);
        assert_eq!(spawner.specs()[0].arg_after("-L"), Some("5901:localhost:5902"));

        let listed = manager.registry().list();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].remote_endpoint, "user@noir.ucolick.org:5902");
        assert_eq!(listed[0].session_name, "Nickelstatus");
    }

    #[tokio::test]
    async fn test_reuse_by_session_name_spawns_nothing() {
        let (manager, _, spawner) = setup();

        let first = manager.open_tunnel(&request("Nickelspec", 5903)).await.unwrap();
        let second = manager.open_tunnel(&request("Nickelspec", 5903)).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(spawner.count(), 1);
        assert_eq!(manager.registry().len(), 1);
    }

    #[tokio::test]
    async fn test_reuse_matches_name_only() {
        // A same-named session on another host reuses the first tunnel
        let (manager, _, spawner) = setup();

        let first = manager.open_tunnel(&request("status", 5901)).await.unwrap();
        let mut other = request("status", 5907);
        other.remote_host = "shimmy.ucolick.org".to_string();
        let second = manager.open_tunnel(&other).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(spawner.count(), 1);
        assert_eq!(
            manager.registry().list()[0].remote_endpoint,
            "user@noir.ucolick.org:5901"
        );
    }

    #[tokio::test]
    async fn test_skips_ports_in_use() {
        let (manager, probe, _) = setup();
        probe.occupy(5901);
        probe.occupy(5902);

        let port = manager.open_tunnel(&request("a", 5902)).await.unwrap();
        assert_eq!(port, 5903);
    }

    #[tokio::test]
    async fn test_exhausted_search_leaves_registry_unchanged() {
        let (manager, probe, spawner) = setup();
        let existing = manager.open_tunnel(&request("first", 5901)).await.unwrap();

        probe.occupy_range(5901..6100);
        let err = manager.open_tunnel(&request("second", 5902)).await.unwrap_err();

        assert!(matches!(err, TunnelError::NoFreePort { attempts: 100, .. }));
        assert_eq!(spawner.count(), 1);
        let ports: Vec<u16> = manager.registry().list().iter().map(|t| t.local_port).collect();
        assert_eq!(ports, vec![existing]);
    }

    #[tokio::test]
    async fn test_exhaustion_resets_cursor() {
        let (manager, probe, _) = setup();
        probe.occupy_range(5901..6001);
        assert!(manager.open_tunnel(&request("a", 5902)).await.is_err());

        probe.vacate(5901);
        let port = manager.open_tunnel(&request("a", 5902)).await.unwrap();
        assert_eq!(port, 5901);
    }

    #[tokio::test]
    async fn test_died_on_launch_fails_fast() {
        let (manager, _, spawner) = setup();
        spawner.die_on_launch(true);

        let started = Instant::now();
        let err = manager.open_tunnel(&request("a", 5902)).await.unwrap_err();

        assert!(matches!(err, TunnelError::ProcessDied { local_port: 5901 }));
        // full liveness budget here is 50 x 10ms
        assert!(started.elapsed() < Duration::from_millis(250));
        assert!(manager.registry().is_empty());
    }

    #[tokio::test]
    async fn test_timeout_kills_forwarder() {
        let (manager, _, spawner) = setup();
        spawner.never_listen(true);

        let err = manager.open_tunnel(&request("a", 5902)).await.unwrap_err();

        assert!(matches!(err, TunnelError::Timeout { local_port: 5901, .. }));
        let children = spawner.children();
        assert_eq!(children.len(), 1);
        assert_eq!(children[0].kill_count(), 1);
        assert!(manager.registry().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_probe_is_treated_as_free() {
        let (manager, probe, _) = setup();
        probe.set_unknown(true);

        let port = manager.open_tunnel(&request("a", 5902)).await.unwrap();
        assert_eq!(port, 5901);
        assert!(manager.registry().contains(5901));
    }

    #[tokio::test]
    async fn test_missing_ssh_is_a_launch_error() {
        let (manager, _, spawner) = setup();
        spawner.set_missing("ssh");

        let err = manager.open_tunnel(&request("a", 5902)).await.unwrap_err();
        assert!(matches!(err, TunnelError::Spawn(_)));
    }

    #[tokio::test]
    async fn test_concurrent_opens_get_distinct_ports() {
        let (manager, probe, _) = setup();
        probe.occupy(5903);
        let manager = Arc::new(manager);

        let tasks: Vec<_> = (0..8)
            .map(|i| {
                let manager = Arc::clone(&manager);
                tokio::spawn(async move {
                    manager.open_tunnel(&request(&format!("s{}", i), 5901 + i)).await
                })
            })
            .collect();

        let mut ports = HashSet::new();
        for task in tasks {
            ports.insert(task.await.unwrap().unwrap());
        }

        assert_eq!(ports.len(), 8);
        assert!(!ports.contains(&5903));
        assert_eq!(manager.registry().len(), 8);
    }

    #[tokio::test]
    async fn test_concurrent_opens_for_one_name_share_a_forwarder() {
        let (manager, probe, spawner) = setup();
        spawner.never_listen(true);
        let manager = Arc::new(manager);

        let open = |manager: Arc<TunnelManager>| {
            tokio::spawn(async move { manager.open_tunnel(&request("Nickelspec", 5903)).await })
        };
        let first = open(Arc::clone(&manager));
        tokio::time::sleep(Duration::from_millis(5)).await;
        let second = open(Arc::clone(&manager));
        tokio::time::sleep(Duration::from_millis(5)).await;
        probe.occupy(5901);

        assert_eq!(first.await.unwrap().unwrap(), 5901);
        assert_eq!(second.await.unwrap().unwrap(), 5901);
        assert_eq!(spawner.count(), 1);
        let listed = manager.registry().list();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].session_name, "Nickelspec");
    }

    #[tokio::test]
    async fn test_failed_open_releases_the_name() {
        let (manager, _, spawner) = setup();
        spawner.die_on_launch(true);
        let manager = Arc::new(manager);

        let failing = {
            let manager = Arc::clone(&manager);
            tokio::spawn(async move { manager.open_tunnel(&request("a", 5902)).await })
        };
        assert!(failing.await.unwrap().is_err());

        spawner.die_on_launch(false);
        let port = manager.open_tunnel(&request("a", 5902)).await.unwrap();
        assert!(manager.registry().contains(port));
    }

    #[tokio::test]
    async fn test_open_after_drain_is_refused() {
        let (manager, probe, spawner) = setup();
        spawner.never_listen(true);
        let manager = Arc::new(manager);

        let opening = {
            let manager = Arc::clone(&manager);
            tokio::spawn(async move { manager.open_tunnel(&request("late", 5902)).await })
        };
        tokio::time::sleep(Duration::from_millis(5)).await;
        manager.registry().drain();
        probe.occupy(5901);

        let err = opening.await.unwrap().unwrap_err();
        assert!(matches!(err, TunnelError::ShuttingDown(_)));
        assert!(manager.registry().is_empty());
        assert_eq!(spawner.children()[0].kill_count(), 1);

        let err = manager.open_tunnel(&request("other", 5904)).await.unwrap_err();
        assert!(matches!(err, TunnelError::ShuttingDown(_)));
        assert_eq!(spawner.count(), 1);
    }

    #[tokio::test]
    async fn test_close_tunnel_twice() {
        let (manager, _, spawner) = setup();
        let port = manager.open_tunnel(&request("a", 5902)).await.unwrap();

        assert!(manager.close_tunnel(port));
        assert!(!manager.close_tunnel(port));
        assert_eq!(spawner.children()[0].kill_count(), 1);
    }
}
