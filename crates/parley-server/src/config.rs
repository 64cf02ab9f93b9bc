//! Server configuration

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use parley_common::protocol::{
    HEARTBEAT_INTERVAL_SECS, SESSION_TIMEOUT_SECS, TIMEOUT_SWEEP_INTERVAL_SECS,
};
use parley_common::transport::RdtConfig;

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Address for NPLT (TCP) connections
    #[serde(default = "default_listen_addr")]
    pub listen_addr: SocketAddr,

    /// Address for the RDT (UDP) endpoint
    #[serde(default = "default_rdt_listen_addr")]
    pub rdt_listen_addr: SocketAddr,

    /// Host clients should send RDT ACKs to; announced in download offers
    #[serde(default = "default_advertised_host")]
    pub advertised_host: String,

    /// Maximum concurrent NPLT sessions
    #[serde(default = "default_max_clients")]
    pub max_clients: usize,

    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval_ms: u64,

    /// Sessions silent for longer than this are closed
    #[serde(default = "default_session_timeout")]
    pub session_timeout_ms: u64,

    #[serde(default = "default_timeout_sweep_interval")]
    pub timeout_sweep_interval_ms: u64,

    /// Largest upload accepted through FILE_METADATA
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: u64,

    /// Where completed uploads are written
    #[serde(default = "default_upload_dir")]
    pub upload_dir: PathBuf,

    /// How long shutdown waits for connections to drain
    #[serde(default = "default_drain_timeout")]
    pub drain_timeout_secs: u64,

    #[serde(default)]
    pub models: ModelsConfig,

    #[serde(default)]
    pub rdt: RdtConfig,
}

fn default_listen_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 9999))
}

fn default_rdt_listen_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 9998))
}

fn default_advertised_host() -> String {
    "127.0.0.1".to_string()
}

fn default_max_clients() -> usize {
    10
}

fn default_heartbeat_interval() -> u64 {
    HEARTBEAT_INTERVAL_SECS * 1000
}

fn default_session_timeout() -> u64 {
    SESSION_TIMEOUT_SECS * 1000
}

fn default_timeout_sweep_interval() -> u64 {
    TIMEOUT_SWEEP_INTERVAL_SECS * 1000
}

fn default_max_upload_bytes() -> u64 {
    64 * 1024 * 1024 // 64MB
}

fn default_upload_dir() -> PathBuf {
    PathBuf::from("uploads")
}

fn default_drain_timeout() -> u64 {
    10
}

/// Models the built-in catalog can switch between
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelsConfig {
    #[serde(default = "default_model")]
    pub default: String,

    #[serde(default = "default_available_models")]
    pub available: Vec<String>,
}

fn default_model() -> String {
    "echo-small".to_string()
}

fn default_available_models() -> Vec<String> {
    vec!["echo-small".to_string(), "echo-large".to_string()]
}

impl Default for ModelsConfig {
    fn default() -> Self {
        Self {
            default: default_model(),
            available: default_available_models(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            rdt_listen_addr: default_rdt_listen_addr(),
            advertised_host: default_advertised_host(),
            max_clients: default_max_clients(),
            heartbeat_interval_ms: default_heartbeat_interval(),
            session_timeout_ms: default_session_timeout(),
            timeout_sweep_interval_ms: default_timeout_sweep_interval(),
            max_upload_bytes: default_max_upload_bytes(),
            upload_dir: default_upload_dir(),
            drain_timeout_secs: default_drain_timeout(),
            models: ModelsConfig::default(),
            rdt: RdtConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Load configuration from file, with environment overrides
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        if path.exists() {
            let builder = config::Config::builder()
                .add_source(config::File::from(path))
                .add_source(
                    config::Environment::with_prefix("PARLEY_SERVER")
                        .separator("__")
                        .try_parsing(true),
                );

            let config: ServerConfig = builder.build()?.try_deserialize()?;
            config.validate()?;
            return Ok(config);
        }

        tracing::warn!(
            "Configuration file not found at {:?}, using development defaults",
            path
        );
        Ok(Self::development_config())
    }

    /// Loopback-only defaults for local development
    pub fn development_config() -> Self {
        Self {
            listen_addr: SocketAddr::from(([127, 0, 0, 1], 9999)),
            rdt_listen_addr: SocketAddr::from(([127, 0, 0, 1], 9998)),
            ..Self::default()
        }
    }

    fn validate(&self) -> anyhow::Result<()> {
        if self.max_clients == 0 {
            anyhow::bail!("max_clients must be at least 1");
        }
        if self.rdt.window_size == 0 {
            anyhow::bail!("rdt.window_size must be at least 1");
        }
        if self.session_timeout_ms <= self.heartbeat_interval_ms {
            anyhow::bail!("session_timeout_ms must exceed heartbeat_interval_ms");
        }
        if !self.models.available.contains(&self.models.default) {
            anyhow::bail!("models.default '{}' is not in models.available", self.models.default);
        }
        Ok(())
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub fn session_timeout(&self) -> Duration {
        Duration::from_millis(self.session_timeout_ms)
    }

    pub fn timeout_sweep_interval(&self) -> Duration {
        Duration::from_millis(self.timeout_sweep_interval_ms)
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_secs(self.drain_timeout_secs)
    }

    /// Generate a sample configuration file
    pub fn generate_sample_config() -> String {
        r#"# parley server configuration

# Address for NPLT (TCP) chat connections
listen_addr = "0.0.0.0:9999"

# Address for the RDT (UDP) file-transfer endpoint
rdt_listen_addr = "0.0.0.0:9998"

# Host announced to clients in download offers
advertised_host = "127.0.0.1"

# Connections beyond this are closed at accept time
max_clients = 10

# Heartbeat sentinel period and silence timeout
heartbeat_interval_ms = 30000
session_timeout_ms = 90000
timeout_sweep_interval_ms = 30000

# Uploads (FILE_METADATA + FILE_DATA)
max_upload_bytes = 67108864
upload_dir = "/var/lib/parley/uploads"

# Graceful shutdown drain period
drain_timeout_secs = 10

[models]
default = "echo-small"
available = ["echo-small", "echo-large"]

[rdt]
# Maximum unacknowledged packets in flight
window_size = 5

# Retransmission timer for the oldest unacknowledged packet
retransmit_timeout_ms = 100

# Timer expiries without progress before a transfer fails
max_retransmissions = 50
"#
        .to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sample_config_parses() {
        let config: ServerConfig = config::Config::builder()
            .add_source(config::File::from_str(
                &ServerConfig::generate_sample_config(),
                config::FileFormat::Toml,
            ))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();

        assert_eq!(config.max_clients, 10);
        assert_eq!(config.rdt.window_size, 5);
        assert_eq!(config.rdt.completion_linger_ms, 2000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_defaults() {
        let config = ServerConfig::default();
        assert_eq!(config.heartbeat_interval(), Duration::from_secs(30));
        assert_eq!(config.session_timeout(), Duration::from_secs(90));
        assert_eq!(config.max_upload_bytes, 64 * 1024 * 1024);
    }

    #[test]
    fn test_missing_file_falls_back_to_development() {
        let config = ServerConfig::load(Path::new("/nonexistent/parley.toml")).unwrap();
        assert!(config.listen_addr.ip().is_loopback());
    }

    #[test]
    fn test_validate_rejects_unknown_default_model() {
        let mut config = ServerConfig::default();
        config.models.default = "gpt-nonexistent".to_string();
        assert!(config.validate().is_err());
    }
}
