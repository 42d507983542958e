//! Shared CLI helpers and small reusable Clap fragments

use anyhow::{Context, Result};
use clap::{ArgAction, Parser};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use crate::config::{ClientConfig, Config, ServerConfig};
use crate::protocol::DEFAULT_PORT;
use crate::url::{parse_remote_url, Remote};

/// Options of the foldsyncd daemon. Anything given here overrides the
/// config file.
#[derive(Clone, Debug, Parser)]
#[command(author, version, about = "foldsync server daemon")]
pub struct DaemonOpts {
    /// Bind address (host:port) [default: 0.0.0.0:12381]
    #[arg(long)]
    pub bind: Option<String>,

    /// Directory that stores uploaded folders [default: root]
    #[arg(long)]
    pub root: Option<PathBuf>,

    /// Sessions served at once [default: 10]
    #[arg(long)]
    pub max_connections: Option<usize>,

    /// Per-read inactivity limit in seconds [default: 30]
    #[arg(long)]
    pub read_timeout_secs: Option<u64>,

    /// Append session events to this file
    #[arg(long)]
    pub log_file: Option<PathBuf>,

    /// TOML configuration file
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// More output (-v debug, -vv trace)
    #[arg(short, long, action = ArgAction::Count)]
    pub verbose: u8,
}

impl DaemonOpts {
    /// Config file (or defaults) with command-line overrides applied
    pub fn server_config(&self) -> Result<ServerConfig> {
        let mut config = Config::load_or_default(self.config.as_deref())
            .with_context(|| format!("load config {:?}", self.config))?
            .server;
        if let Some(bind) = &self.bind {
            config.bind = bind.clone();
        }
        if let Some(root) = &self.root {
            config.root = root.clone();
        }
        if let Some(n) = self.max_connections {
            anyhow::ensure!(n > 0, "--max-connections must be at least 1");
            config.max_connections = n;
        }
        if let Some(secs) = self.read_timeout_secs {
            anyhow::ensure!(secs > 0, "--read-timeout-secs must be at least 1");
            config.read_timeout_secs = secs;
        }
        if self.log_file.is_some() {
            config.log_file = self.log_file.clone();
        }
        Ok(config)
    }
}

/// Where the client connects
#[derive(Clone, Debug, Parser)]
pub struct RemoteOpts {
    /// Server as foldsync://host[:port]
    #[arg(long, conflicts_with_all = ["host", "port"])]
    pub remote: Option<String>,

    /// Server host name or address
    #[arg(long, default_value = "127.0.0.1")]
    pub host: String,

    /// Server port
    #[arg(long, default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// Connect timeout in seconds [default: 10]
    #[arg(long)]
    pub connect_timeout_secs: Option<u64>,

    /// TOML configuration file ([client] section)
    #[arg(long)]
    pub config: Option<PathBuf>,
}

impl RemoteOpts {
    pub fn remote(&self) -> Result<Remote> {
        match &self.remote {
            Some(url) => parse_remote_url(url)
                .with_context(|| format!("invalid remote {url:?}, expected foldsync://host[:port]")),
            None => Ok(Remote {
                host: self.host.clone(),
                port: self.port,
            }),
        }
    }

    pub fn client_config(&self) -> Result<ClientConfig> {
        let mut config = Config::load_or_default(self.config.as_deref())
            .with_context(|| format!("load config {:?}", self.config))?
            .client;
        if let Some(secs) = self.connect_timeout_secs {
            anyhow::ensure!(secs > 0, "--connect-timeout-secs must be at least 1");
            config.connect_timeout_secs = secs;
        }
        Ok(config)
    }
}

/// `RUST_LOG` wins; otherwise info, raised by each -v.
pub fn init_tracing(verbose: u8) {
    let default = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}
