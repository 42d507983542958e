//! Configuration file for the daemon and the client CLI.
//!
//! ```toml
//! [server]
//! bind = "0.0.0.0:12381"
//! root = "root"
//! max_connections = 10
//!
//! [client]
//! connect_timeout_secs = 10
//! ```
//!
//! Every key is optional. Command-line flags override whatever is loaded.

use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::channel::Timeouts;
use crate::protocol::{timeouts, DEFAULT_PORT};

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub client: ClientConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Listen address (host:port)
    pub bind: String,
    /// Directory holding one subdirectory per stored folder
    pub root: PathBuf,
    /// Sessions served at once; further connections wait
    pub max_connections: usize,
    pub read_timeout_secs: u64,
    pub write_timeout_secs: u64,
    /// Append session events here in addition to tracing output
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_file: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub connect_timeout_secs: u64,
    pub read_timeout_secs: u64,
    pub write_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: format!("0.0.0.0:{DEFAULT_PORT}"),
            root: PathBuf::from("root"),
            max_connections: 10,
            read_timeout_secs: timeouts::READ_MS / 1000,
            write_timeout_secs: timeouts::WRITE_MS / 1000,
            log_file: None,
        }
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: timeouts::CONNECT_MS / 1000,
            read_timeout_secs: timeouts::READ_MS / 1000,
            write_timeout_secs: timeouts::WRITE_MS / 1000,
        }
    }
}

impl ServerConfig {
    pub fn timeouts(&self) -> Timeouts {
        Timeouts {
            read: Duration::from_secs(self.read_timeout_secs),
            write: Duration::from_secs(self.write_timeout_secs),
        }
    }
}

impl ClientConfig {
    pub fn timeouts(&self) -> Timeouts {
        Timeouts {
            read: Duration::from_secs(self.read_timeout_secs),
            write: Duration::from_secs(self.write_timeout_secs),
        }
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: Self = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// `path` if given, otherwise defaults
    pub fn load_or_default(path: Option<&Path>) -> anyhow::Result<Self> {
        match path {
            Some(p) => Self::load(p),
            None => Ok(Self::default()),
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.server.max_connections == 0 {
            anyhow::bail!("server.max_connections must be at least 1");
        }
        if self.server.read_timeout_secs == 0 || self.server.write_timeout_secs == 0 {
            anyhow::bail!("server timeouts must be at least 1 second");
        }
        if self.client.connect_timeout_secs == 0
            || self.client.read_timeout_secs == 0
            || self.client.write_timeout_secs == 0
        {
            anyhow::bail!("client timeouts must be at least 1 second");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.server.bind, "0.0.0.0:12381");
        assert_eq!(config.server.root, PathBuf::from("root"));
        assert_eq!(config.server.max_connections, 10);
        assert_eq!(config.server.timeouts(), Timeouts::default());
        assert_eq!(config.client.connect_timeout(), Duration::from_secs(10));
        config.validate().unwrap();
    }

    #[test]
    fn test_partial_file_keeps_other_defaults() {
        let config: Config = toml::from_str(
            r#"
            [server]
            root = "/srv/folders"
            max_connections = 4
            "#,
        )
        .unwrap();
        assert_eq!(config.server.root, PathBuf::from("/srv/folders"));
        assert_eq!(config.server.max_connections, 4);
        assert_eq!(config.server.bind, "0.0.0.0:12381");
        assert_eq!(config.client.read_timeout_secs, 30);
    }

    #[test]
    fn test_partial_file_on_disk_keeps_other_defaults() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("foldsync.toml");
        fs::write(
            &path,
            "[server]\nlog_file = \"server.log\"\n\n[client]\nconnect_timeout_secs = 3\n",
        )
        .unwrap();

        let loaded = Config::load(&path).unwrap();
        assert_eq!(loaded.server.max_connections, 10);
        assert_eq!(loaded.server.log_file, Some(PathBuf::from("server.log")));
        assert_eq!(loaded.client.connect_timeout_secs, 3);
    }

    #[test]
    fn test_zero_workers_rejected() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("bad.toml");
        fs::write(&path, "[server]\nmax_connections = 0\n").unwrap();
        assert!(Config::load(&path).is_err());
    }
}
