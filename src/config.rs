//! JSON configuration
//!
//! One file describes every listener: stage-chain servers and plain
//! bridges. Component maps (stages, dialers) are tagged by `"name"`.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::common::{Address, Network};
use crate::dialer::DialerConfig;
use crate::error::{Error, Result};
use crate::stage::StageConfig;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub log: LogConfig,

    /// Stage-chain listeners
    #[serde(default)]
    pub servers: Vec<ServerConfig>,

    /// Listener-to-endpoint relays
    #[serde(default)]
    pub bridges: Vec<BridgeConfig>,
}

impl Config {
    /// Load configuration from a JSON file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("failed to read config file: {}", e)))?;
        Self::from_json(&content)
    }

    /// Parse configuration from a JSON string
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Config = serde_json::from_str(json)
            .map_err(|e| Error::Config(format!("failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Startup-fatal checks: at least one listener, every bind and
    /// endpoint address well-formed.
    pub fn validate(&self) -> Result<()> {
        if self.servers.is_empty() && self.bridges.is_empty() {
            return Err(Error::Config("no servers or bridges configured".into()));
        }
        for server in &self.servers {
            parse_address("server", &server.address)?;
        }
        for bridge in &self.bridges {
            parse_address("bridge", &bridge.address)?;
            parse_address("bridge endpoint", &bridge.endpoint.address)?;
        }
        Ok(())
    }

    /// A minimal local SOCKS5 server, for `--gen-config`.
    pub fn default_socks_server() -> Self {
        Config {
            log: LogConfig::default(),
            servers: vec![ServerConfig {
                tag: "socks-in".to_string(),
                network: Network::Tcp,
                address: "0.0.0.0:1080".to_string(),
                stages: vec![StageConfig::Socks5 {
                    network: Network::Tcp,
                    address: String::new(),
                    dialer: DialerConfig::Direct,
                }],
            }],
            bridges: Vec::new(),
        }
    }
}

fn parse_address(what: &str, address: &str) -> Result<Address> {
    Address::parse_host_port(address)
        .ok_or_else(|| Error::Config(format!("bad {} address: {}", what, address)))
}

/// Log configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Log level: trace, debug, info, warn, error
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

/// One stage-chain listener
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Tag for logging; defaults to the bind address when empty.
    #[serde(default)]
    pub tag: String,

    #[serde(default)]
    pub network: Network,

    /// Bind address (`host:port`)
    pub address: String,

    /// Stage chain, applied in order to every accepted connection
    #[serde(default)]
    pub stages: Vec<StageConfig>,
}

/// One listener relayed verbatim to a fixed endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeConfig {
    #[serde(default)]
    pub tag: String,

    #[serde(default)]
    pub network: Network,

    /// Bind address (`host:port`)
    pub address: String,

    pub endpoint: EndpointConfig,
}

/// Remote side of a bridge
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointConfig {
    #[serde(default)]
    pub network: Network,

    pub address: String,
}
