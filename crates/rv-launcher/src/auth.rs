//! Authentication against the telescope server and the site firewall

use async_trait::async_trait;
use std::io;
use std::path::Path;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use rv_core::config::FirewallSettings;
use rv_core::error::AuthError;

use crate::remote::RemoteShell;

/// Check that the SSH key logs in as `account` on `host`
pub async fn validate_ssh_key(
    remote: &dyn RemoteShell,
    host: &str,
    account: &str,
) -> Result<(), AuthError> {
    tracing::info!("Validating ssh key...");

    match remote.run(host, account, "whoami").await {
        Ok(output) if output.trim() == account => {
            tracing::info!("  SSH key OK");
            Ok(())
        }
        Ok(output) => {
            tracing::debug!("whoami returned {:?}", output);
            tracing::error!("  SSH key invalid");
            Err(AuthError::KeyRejected {
                account: account.to_string(),
                server: host.to_string(),
            })
        }
        Err(e) => {
            tracing::error!("  Failed: {}", e);
            Err(AuthError::KeyRejected {
                account: account.to_string(),
                server: host.to_string(),
            })
        }
    }
}

/// Make the private key readable by its owner only
#[cfg(unix)]
pub fn secure_key_permissions(key: &Path) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;

    let mut perms = std::fs::metadata(key)?.permissions();
    if perms.mode() & 0o777 != 0o400 {
        perms.set_mode(0o400);
        std::fs::set_permissions(key, perms)?;
        tracing::debug!("Set mode 0400 on {}", key.display());
    }
    Ok(())
}

#[cfg(not(unix))]
pub fn secure_key_permissions(_key: &Path) -> io::Result<()> {
    Ok(())
}

/// Site firewall that must be signed on before tunnels work
#[async_trait]
pub trait Firewall: Send + Sync {
    /// Sign on; true when the firewall authorized the user
    async fn sign_on(&self, password: &str) -> bool;

    /// Sign off from all services
    async fn sign_off(&self, password: &str) -> bool;

    /// `user@address:port`, for logs
    fn describe(&self) -> String;
}

const SIGN_ON_CHOICE: &str = "1";
const SIGN_OFF_CHOICE: &str = "2";
const SIGNED_ON: &str = "User authorized for standard services";
const SIGNED_OFF: &str = "User was signed off from all services";

/// Firewall spoken to over its line-oriented telnet menu
#[derive(Debug, Clone)]
pub struct TelnetFirewall {
    settings: FirewallSettings,
    read_timeout: Duration,
}

impl TelnetFirewall {
    pub fn new(settings: FirewallSettings) -> Self {
        Self {
            settings,
            read_timeout: Duration::from_secs(5),
        }
    }

    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    /// Walk the menu, pick `choice` and return everything printed after
    async fn dialogue(&self, password: &str, choice: &str) -> io::Result<String> {
        let address = (self.settings.address.as_str(), self.settings.port);
        let mut stream = tokio::time::timeout(self.read_timeout, TcpStream::connect(address))
            .await
            .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "connect timed out"))??;

        let mut seen = Vec::new();
        self.read_until(&mut stream, &mut seen, "User: ").await?;
        stream
            .write_all(format!("{}\n", self.settings.user).as_bytes())
            .await?;
        self.read_until(&mut stream, &mut seen, "password: ").await?;
        stream.write_all(format!("{}\n", password).as_bytes()).await?;
        self.read_until(&mut stream, &mut seen, "Enter your choice: ").await?;
        stream.write_all(format!("{}\n", choice).as_bytes()).await?;

        let mut rest = Vec::new();
        tokio::time::timeout(self.read_timeout, stream.read_to_end(&mut rest))
            .await
            .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "firewall did not close"))??;
        Ok(String::from_utf8_lossy(&rest).into_owned())
    }

    /// Read until `prompt` has been seen, consuming it from `seen`
    async fn read_until<R>(
        &self,
        reader: &mut R,
        seen: &mut Vec<u8>,
        prompt: &str,
    ) -> io::Result<()>
    where
        R: AsyncRead + Unpin,
    {
        let needle = prompt.as_bytes();
        let mut chunk = [0u8; 512];
        loop {
            if let Some(pos) = seen.windows(needle.len()).position(|w| w == needle) {
                seen.drain(..pos + needle.len());
                return Ok(());
            }

            let n = tokio::time::timeout(self.read_timeout, reader.read(&mut chunk))
                .await
                .map_err(|_| {
                    let message = format!("no '{}' prompt", prompt.trim());
                    io::Error::new(io::ErrorKind::TimedOut, message)
                })??;
            if n == 0 {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    format!("connection closed before '{}' prompt", prompt.trim()),
                ));
            }
            seen.extend_from_slice(&chunk[..n]);
        }
    }
}

#[async_trait]
impl Firewall for TelnetFirewall {
    async fn sign_on(&self, password: &str) -> bool {
        tracing::info!("Authenticating through firewall as:");
        tracing::info!(" {}", self.describe());

        match self.dialogue(password, SIGN_ON_CHOICE).await {
            Ok(result) if result.contains(SIGNED_ON) => {
                tracing::info!("{}", SIGNED_ON);
                true
            }
            Ok(result) => {
                tracing::error!("{}", result.trim());
                false
            }
            Err(e) => {
                tracing::error!("Unable to authenticate through firewall");
                tracing::debug!("Firewall dialogue failed: {}", e);
                false
            }
        }
    }

    async fn sign_off(&self, password: &str) -> bool {
        tracing::info!("Signing off of firewall authentication");

        match self.dialogue(password, SIGN_OFF_CHOICE).await {
            Ok(result) if result.contains(SIGNED_OFF) => {
                tracing::info!("{}", SIGNED_OFF);
                true
            }
            Ok(result) => {
                tracing::error!("{}", result.trim());
                false
            }
            Err(e) => {
                tracing::error!("Unable to close firewall authentication!");
                tracing::debug!("Firewall dialogue failed: {}", e);
                false
            }
        }
    }

    fn describe(&self) -> String {
        format!(
            "{}@{}:{}",
            self.settings.user, self.settings.address, self.settings.port
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeRemote;
    use tokio::io::{AsyncBufReadExt, BufReader};
    use tokio::net::TcpListener;

    /// Serve one firewall session and return the lines the client sent
    async fn serve_once(listener: TcpListener, reply: &'static str) -> Vec<String> {
        let (stream, _) = listener.accept().await.unwrap();
        let (read, mut write) = stream.into_split();
        let mut lines = BufReader::new(read).lines();
        let mut received = Vec::new();

        for prompt in ["User: ", "password: ", "Enter your choice: "] {
            write.write_all(prompt.as_bytes()).await.unwrap();
            received.push(lines.next_line().await.unwrap().unwrap());
        }
        write.write_all(reply.as_bytes()).await.unwrap();
        received
    }

    async fn firewall() -> (TelnetFirewall, TcpListener) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let fw = TelnetFirewall::new(FirewallSettings {
            address: "127.0.0.1".to_string(),
            port,
            user: "observer".to_string(),
        })
        .with_read_timeout(Duration::from_secs(2));
        (fw, listener)
    }

    #[tokio::test]
    async fn test_sign_on_dialogue() {
        let (fw, listener) = firewall().await;
        let server = tokio::spawn(serve_once(
            listener,
            "\nUser authorized for standard services\n",
        ));

        assert!(fw.sign_on("hunter2").await);
        assert_eq!(server.await.unwrap(), vec!["observer", "hunter2", "1"]);
    }

    #[tokio::test]
    async fn test_sign_off_dialogue() {
        let (fw, listener) = firewall().await;
        let server = tokio::spawn(serve_once(
            listener,
            "User was signed off from all services\n",
        ));

        assert!(fw.sign_off("hunter2").await);
        assert_eq!(server.await.unwrap()[2], "2");
    }

    #[tokio::test]
    async fn test_rejected_sign_on() {
        let (fw, listener) = firewall().await;
        let server = tokio::spawn(serve_once(listener, "Authentication failed\n"));

        assert!(!fw.sign_on("wrong").await);
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_unreachable_firewall() {
        let (fw, listener) = firewall().await;
        drop(listener);
        assert!(!fw.sign_on("hunter2").await);
    }

    #[tokio::test]
    async fn test_validate_ssh_key() {
        let remote = FakeRemote::new();
        remote.respond("whoami", "user");
        assert!(validate_ssh_key(&remote, "noir.ucolick.org", "user").await.is_ok());

        let err = validate_ssh_key(&remote, "noir.ucolick.org", "nickel")
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::KeyRejected { .. }));
    }

    #[tokio::test]
    async fn test_validate_ssh_key_remote_failure() {
        let remote = FakeRemote::new();
        remote.fail();
        assert!(validate_ssh_key(&remote, "noir.ucolick.org", "user").await.is_err());
    }

    #[cfg(unix)]
    #[test]
    fn test_secure_key_permissions() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let key = dir.path().join("id_rsa");
        std::fs::write(&key, "key").unwrap();
        std::fs::set_permissions(&key, std::fs::Permissions::from_mode(0o644)).unwrap();

        secure_key_permissions(&key).unwrap();
        let mode = std::fs::metadata(&key).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o400);
    }
}
