//! Encryption helper process.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::TcpStream;
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::error::ClientError;

/// Default helper URI.
pub const DEFAULT_HELPER_URI: &str = "mongodb://localhost:27020";

/// Default helper executable.
pub const DEFAULT_SPAWN_PATH: &str = "mongocryptd";

/// Default helper arguments.
pub const DEFAULT_SPAWN_ARGS: &[&str] = &["--idleShutdownTimeoutSecs=60"];

/// How to find or start the encryption helper.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HelperOptions {
    /// Where the helper listens.
    pub uri: String,
    /// Assume the helper is managed externally; never probe or spawn it.
    pub bypass_spawn: bool,
    /// Executable to spawn when the helper is not running.
    pub spawn_path: PathBuf,
    /// Arguments passed to the spawned helper.
    pub spawn_args: Vec<String>,
}

impl Default for HelperOptions {
    fn default() -> Self {
        Self {
            uri: DEFAULT_HELPER_URI.to_string(),
            bypass_spawn: false,
            spawn_path: PathBuf::from(DEFAULT_SPAWN_PATH),
            spawn_args: DEFAULT_SPAWN_ARGS.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl HelperOptions {
    /// `host:port` extracted from [`HelperOptions::uri`].
    pub fn address(&self) -> Result<String, ClientError> {
        let rest = self.uri.strip_prefix("mongodb://").unwrap_or(&self.uri);
        let authority = rest
            .split(['/', '?'])
            .next()
            .unwrap_or_default()
            .rsplit('@')
            .next()
            .unwrap_or_default();

        match authority.rsplit_once(':') {
            Some((host, port)) if !host.is_empty() && port.parse::<u16>().is_ok() => {
                Ok(authority.to_string())
            }
            _ => Err(ClientError::Construction(format!(
                "helper uri {:?} has no host:port",
                self.uri
            ))),
        }
    }
}

/// Makes sure the encryption helper is reachable.
#[async_trait]
pub trait EncryptionHelper: Send + Sync {
    /// Succeeds once the helper accepts connections.
    async fn ensure_reachable(&self, options: &HelperOptions) -> Result<(), ClientError>;
}

/// Probes the helper over TCP and spawns it when absent.
#[derive(Debug, Clone)]
pub struct ProcessHelper {
    probe_attempts: u32,
    probe_interval: Duration,
}

impl Default for ProcessHelper {
    fn default() -> Self {
        Self {
            probe_attempts: 20,
            probe_interval: Duration::from_millis(250),
        }
    }
}

impl ProcessHelper {
    /// Creates a helper that re-probes `attempts` times, `interval` apart,
    /// after spawning.
    pub fn new(attempts: u32, interval: Duration) -> Self {
        Self {
            probe_attempts: attempts,
            probe_interval: interval,
        }
    }

    async fn probe(&self, address: &str) -> bool {
        matches!(
            tokio::time::timeout(self.probe_interval, TcpStream::connect(address)).await,
            Ok(Ok(_))
        )
    }
}

#[async_trait]
impl EncryptionHelper for ProcessHelper {
    async fn ensure_reachable(&self, options: &HelperOptions) -> Result<(), ClientError> {
        let address = options.address()?;

        if self.probe(&address).await {
            debug!(address = %address, "Encryption helper already running");
            return Ok(());
        }

        info!(path = %options.spawn_path.display(), "Spawning encryption helper");
        // The helper outlives this call; it shuts itself down when idle.
        Command::new(&options.spawn_path)
            .args(&options.spawn_args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| {
                ClientError::Construction(format!(
                    "cannot spawn {}: {e}",
                    options.spawn_path.display()
                ))
            })?;

        for _ in 0..self.probe_attempts {
            tokio::time::sleep(self.probe_interval).await;
            if self.probe(&address).await {
                debug!(address = %address, "Encryption helper reachable");
                return Ok(());
            }
        }

        warn!(address = %address, "Encryption helper unreachable after spawning");
        Err(ClientError::Construction(format!(
            "encryption helper unreachable at {address}"
        )))
    }
}
