//! Local port availability probing
//!
//! The probe asks the operating system whether anything is listening on
//! a local TCP port. It is used both to pick a free port for a new tunnel
//! and to decide when a freshly spawned forwarder has come up.

use async_trait::async_trait;
use std::io;
use tokio::net::TcpListener;
use tokio::process::Command;

/// Result of probing a local port
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortStatus {
    /// Something is listening on the port
    InUse,
    /// Nothing is listening on the port
    Free,
    /// The probe could not decide
    Unknown,
}

/// Checks whether a local port is in use
#[async_trait]
pub trait PortCheck: Send + Sync {
    /// Probe a single port
    async fn status(&self, port: u16) -> PortStatus;

    /// Short name of the probing method, for logs
    fn name(&self) -> &'static str;
}

/// How ports are probed on this host
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeStrategy {
    /// `ss -ltn`
    Ss,
    /// `lsof -nP -iTCP:<port> -sTCP:LISTEN`
    Lsof,
    /// `netstat -an`
    Netstat,
    /// Look for forwarders in `ps aux`
    Ps,
    /// Try to bind the port ourselves
    Bind,
}

impl ProbeStrategy {
    /// Pick the first available listing tool, falling back to binding
    pub fn detect() -> Self {
        let candidates = [
            ("ss", ProbeStrategy::Ss),
            ("lsof", ProbeStrategy::Lsof),
            ("netstat", ProbeStrategy::Netstat),
            ("ps", ProbeStrategy::Ps),
        ];

        candidates
            .into_iter()
            .find(|(tool, _)| which::which(tool).is_ok())
            .map(|(_, strategy)| strategy)
            .unwrap_or(ProbeStrategy::Bind)
    }

    fn as_str(self) -> &'static str {
        match self {
            ProbeStrategy::Ss => "ss",
            ProbeStrategy::Lsof => "lsof",
            ProbeStrategy::Netstat => "netstat",
            ProbeStrategy::Ps => "ps",
            ProbeStrategy::Bind => "bind",
        }
    }
}

/// Port probe backed by system tools
#[derive(Debug, Clone, Copy)]
pub struct PortProbe {
    strategy: ProbeStrategy,
}

impl PortProbe {
    /// Create a probe using the best strategy available on this host
    pub fn detect() -> Self {
        let strategy = ProbeStrategy::detect();
        tracing::debug!("Probing local ports with {}", strategy.as_str());
        Self { strategy }
    }

    /// Create a probe with a fixed strategy
    pub fn with_strategy(strategy: ProbeStrategy) -> Self {
        Self { strategy }
    }

    pub fn strategy(&self) -> ProbeStrategy {
        self.strategy
    }

    async fn run_tool(program: &str, args: &[String]) -> io::Result<(bool, String)> {
        let output = Command::new(program)
            .args(args)
            .stdin(std::process::Stdio::null())
            .kill_on_drop(true)
            .output()
            .await?;
        Ok((
            output.status.success(),
            String::from_utf8_lossy(&output.stdout).into_owned(),
        ))
    }

    async fn probe_with_tool(&self, port: u16) -> io::Result<PortStatus> {
        let status = match self.strategy {
            ProbeStrategy::Ss => {
                let (ok, out) = Self::run_tool("ss", &["-ltn".to_string()]).await?;
                if !ok {
                    return Ok(PortStatus::Unknown);
                }
                in_use(ss_lists_port(&out, port))
            }
            ProbeStrategy::Lsof => {
                let args = [
                    "-nP".to_string(),
                    format!("-iTCP:{}", port),
                    "-sTCP:LISTEN".to_string(),
                ];
                // lsof exits 1 when nothing matches
                let (_, out) = Self::run_tool("lsof", &args).await?;
                in_use(!out.trim().is_empty())
            }
            ProbeStrategy::Netstat => {
                let (ok, out) = Self::run_tool("netstat", &["-an".to_string()]).await?;
                if !ok {
                    return Ok(PortStatus::Unknown);
                }
                in_use(netstat_lists_port(&out, port))
            }
            ProbeStrategy::Ps => {
                let (ok, out) = Self::run_tool("ps", &["aux".to_string()]).await?;
                if !ok {
                    return Ok(PortStatus::Unknown);
                }
                in_use(ps_lists_forward(&out, port))
            }
            ProbeStrategy::Bind => bind_probe(port).await,
        };
        Ok(status)
    }
}

#[async_trait]
impl PortCheck for PortProbe {
    async fn status(&self, port: u16) -> PortStatus {
        match self.probe_with_tool(port).await {
            Ok(status) => status,
            Err(e) => {
                tracing::debug!(
                    "Port probe '{}' failed for {}: {}",
                    self.strategy.as_str(),
                    port,
                    e
                );
                PortStatus::Unknown
            }
        }
    }

    fn name(&self) -> &'static str {
        self.strategy.as_str()
    }
}

fn in_use(listed: bool) -> PortStatus {
    if listed {
        PortStatus::InUse
    } else {
        PortStatus::Free
    }
}

/// Probe a port by trying to bind it on the loopback interface
pub async fn bind_probe(port: u16) -> PortStatus {
    match TcpListener::bind(("127.0.0.1", port)).await {
        Ok(_) => PortStatus::Free,
        Err(e) if e.kind() == io::ErrorKind::AddrInUse => PortStatus::InUse,
        Err(e) => {
            tracing::debug!("Bind probe on {} inconclusive: {}", port, e);
            PortStatus::Unknown
        }
    }
}

fn ss_lists_port(output: &str, port: u16) -> bool {
    let suffix = format!(":{}", port);
    output
        .lines()
        .skip(1)
        .filter_map(|line| line.split_whitespace().nth(3))
        .any(|local| local.ends_with(&suffix))
}

fn netstat_lists_port(output: &str, port: u16) -> bool {
    let colon = format!(":{}", port);
    let dot = format!(".{}", port);
    output
        .lines()
        .filter(|line| line.contains("LISTEN"))
        .filter_map(|line| line.split_whitespace().nth(3))
        .any(|local| local.ends_with(&colon) || local.ends_with(&dot))
}

fn ps_lists_forward(output: &str, port: u16) -> bool {
    let needle = format!("{}:", port);
    output
        .lines()
        .filter(|line| line.contains("ssh"))
        .any(|line| line.split_whitespace().any(|word| word.starts_with(&needle)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_bind_probe_reports_bound_port() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let probe = PortProbe::with_strategy(ProbeStrategy::Bind);
        assert_eq!(probe.status(port).await, PortStatus::InUse);

        drop(listener);
        assert_eq!(probe.status(port).await, PortStatus::Free);
    }

    #[tokio::test]
    async fn test_detected_probe_sees_listener() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let probe = PortProbe::detect();
        if probe.strategy() == ProbeStrategy::Ps {
            // ps only sees ssh forwarders
            return;
        }
        assert_ne!(probe.status(port).await, PortStatus::Free);
    }

    #[test]
    fn test_parse_ss() {
        let out = "\
State  Recv-Q Send-Q Local Address:Port  Peer Address:Port Process
LISTEN 0      128        127.0.0.1:5901       0.0.0.0:*
LISTEN 0      128            [::1]:5902          [::]:*
LISTEN 0      128          0.0.0.0:59010      0.0.0.0:*
";
        assert!(ss_lists_port(out, 5901));
        assert!(ss_lists_port(out, 5902));
        assert!(!ss_lists_port(out, 5903));
        assert!(ss_lists_port(out, 59010));
    }

    #[test]
    fn test_parse_netstat() {
        let linux = "tcp        0      0 127.0.0.1:5901          0.0.0.0:*               LISTEN\n";
        let bsd = "tcp4       0      0  127.0.0.1.5902         *.*                    LISTEN\n";
        let established =
            "tcp4       0      0  127.0.0.1.5903         127.0.0.1.52000        ESTABLISHED\n";

        assert!(netstat_lists_port(linux, 5901));
        assert!(netstat_lists_port(bsd, 5902));
        assert!(!netstat_lists_port(established, 5903));
    }

    #[test]
    fn test_parse_ps() {
        let out = "\
user  4242  0.0  0.1  ssh -l nickel -L 5901:localhost:5902 -N -T noir.ucolick.org
user  4243  0.0  0.1  vim notes-5903:todo
";
        assert!(ps_lists_forward(out, 5901));
        assert!(!ps_lists_forward(out, 5902));
        assert!(!ps_lists_forward(out, 5903));
    }
}
