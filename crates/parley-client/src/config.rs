//! Client configuration
//!
//! Loaded from a TOML file with `PARLEY_CLIENT__*` environment overrides.
//! Command-line flags are applied on top by the binary.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use parley_common::protocol::HEARTBEAT_INTERVAL_SECS;
use parley_common::transport::RdtConfig;
use parley_common::ClientKind;

/// Main client configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// NPLT server address (host:port)
    #[serde(default = "default_server_addr")]
    pub server_addr: String,

    /// Connection attempts before giving up
    #[serde(default = "default_connect_retries")]
    pub connect_retries: u32,

    /// Fixed delay between connection attempts
    #[serde(default = "default_retry_backoff")]
    pub retry_backoff_ms: u64,

    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval_ms: u64,

    /// Local address for the RDT endpoint (port 0 picks one)
    #[serde(default = "default_rdt_bind_addr")]
    pub rdt_bind_addr: SocketAddr,

    /// Announced in UDP_REGISTER; only `cli` receives files over RDT
    #[serde(default)]
    pub client_kind: ClientKind,

    /// Where completed downloads are written
    #[serde(default = "default_download_dir")]
    pub download_dir: PathBuf,

    /// Upper bound on a single RDT download
    #[serde(default = "default_transfer_timeout")]
    pub transfer_timeout_secs: u64,

    #[serde(default)]
    pub rdt: RdtConfig,
}

fn default_server_addr() -> String {
    "127.0.0.1:9999".to_string()
}

fn default_connect_retries() -> u32 {
    3
}

fn default_retry_backoff() -> u64 {
    2000
}

fn default_heartbeat_interval() -> u64 {
    HEARTBEAT_INTERVAL_SECS * 1000
}

fn default_rdt_bind_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 0))
}

fn default_download_dir() -> PathBuf {
    PathBuf::from("downloads")
}

fn default_transfer_timeout() -> u64 {
    60
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_addr: default_server_addr(),
            connect_retries: default_connect_retries(),
            retry_backoff_ms: default_retry_backoff(),
            heartbeat_interval_ms: default_heartbeat_interval(),
            rdt_bind_addr: default_rdt_bind_addr(),
            client_kind: ClientKind::default(),
            download_dir: default_download_dir(),
            transfer_timeout_secs: default_transfer_timeout(),
            rdt: RdtConfig::default(),
        }
    }
}

impl ClientConfig {
    /// Load configuration from file and environment
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let mut builder = config::Config::builder();

        if path.exists() {
            builder = builder.add_source(config::File::from(path).required(false));
        }

        builder = builder.add_source(
            config::Environment::with_prefix("PARLEY_CLIENT")
                .separator("__")
                .try_parsing(true),
        );

        let config: ClientConfig = builder.build()?.try_deserialize()?;
        if config.connect_retries == 0 {
            anyhow::bail!("connect_retries must be at least 1");
        }
        Ok(config)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub fn transfer_timeout(&self) -> Duration {
        Duration::from_secs(self.transfer_timeout_secs)
    }

    /// Generate a sample configuration file
    pub fn generate_sample_config() -> String {
        r#"# parley client configuration

# NPLT server address
server_addr = "127.0.0.1:9999"

# Connection attempts and the fixed delay between them
connect_retries = 3
retry_backoff_ms = 2000

# Heartbeat sentinel period
heartbeat_interval_ms = 30000

# Local RDT endpoint (port 0 picks a free port)
rdt_bind_addr = "0.0.0.0:0"

# cli, web or desktop; only cli receives files over RDT
client_kind = "cli"

# Downloads
download_dir = "downloads"
transfer_timeout_secs = 60
"#
        .to_string()
    }
}
