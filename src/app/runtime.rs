//! Runtime: configuration-driven assembly and lifecycle
//!
//! Builds every listener from the parsed config at startup, spawns one
//! task per listener, and fans a broadcast shutdown out to all of them
//! on Ctrl-C. In-flight sessions drain naturally.

use std::sync::Arc;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::common::Address;
use crate::config::{BridgeConfig, Config, ServerConfig};
use crate::dialer::{self, DialerConfig, DirectDialer};
use crate::error::{Error, Result};
use crate::registry::Registry;
use crate::stage::{self, build_stage, Pipeline, StageConfig};

use super::bridge::Bridge;
use super::server::StreamServer;

pub struct Runtime {
    servers: Vec<Arc<StreamServer>>,
    bridges: Vec<Arc<Bridge>>,
    shutdown_tx: broadcast::Sender<()>,
}

impl Runtime {
    /// Build the runtime from configuration. Component construction is
    /// front-loaded so a broken config fails here, before anything
    /// listens.
    pub async fn from_config(config: &Config) -> Result<Self> {
        let (shutdown_tx, _) = broadcast::channel(1);

        let dialer_registry: Registry<DialerConfig> = Registry::new();
        dialer::register_defaults(&dialer_registry)?;
        let stage_registry: Registry<StageConfig> = Registry::new();
        stage::register_defaults(&stage_registry)?;

        let mut servers = Vec::new();
        for server_config in &config.servers {
            servers.push(Arc::new(
                Self::build_server(&stage_registry, server_config).await?,
            ));
        }

        let mut bridges = Vec::new();
        for bridge_config in &config.bridges {
            bridges.push(Arc::new(Self::build_bridge(bridge_config)?));
        }

        Ok(Self {
            servers,
            bridges,
            shutdown_tx,
        })
    }

    async fn build_server(
        registry: &Registry<StageConfig>,
        config: &ServerConfig,
    ) -> Result<StreamServer> {
        let mut stages = Vec::with_capacity(config.stages.len());
        for stage_config in &config.stages {
            // Known-component check against the seeded registry
            registry.resolve(stage_config.name())?;
            stages.push(build_stage(stage_config).await?);
        }

        Ok(StreamServer::new(
            tag_or_address(&config.tag, &config.address),
            config.network,
            &config.address,
            Arc::new(Pipeline::new(stages)),
        ))
    }

    fn build_bridge(config: &BridgeConfig) -> Result<Bridge> {
        let endpoint = Address::parse_host_port(&config.endpoint.address).ok_or_else(|| {
            Error::Config(format!(
                "bad bridge endpoint address: {}",
                config.endpoint.address
            ))
        })?;

        Ok(Bridge::new(
            tag_or_address(&config.tag, &config.address),
            config.network,
            &config.address,
            (config.endpoint.network, endpoint),
            Arc::new(DirectDialer::new()),
        ))
    }

    /// Stop every accept loop. Idempotent.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }

    fn spawn_listeners(&self) -> Vec<JoinHandle<()>> {
        let mut handles = Vec::new();

        for server in &self.servers {
            let server = server.clone();
            let shutdown_rx = self.shutdown_tx.subscribe();
            handles.push(tokio::spawn(async move {
                if let Err(e) = server.run(shutdown_rx).await {
                    error!(error = %e, "server failed");
                }
            }));
        }

        for bridge in &self.bridges {
            let bridge = bridge.clone();
            let shutdown_rx = self.shutdown_tx.subscribe();
            handles.push(tokio::spawn(async move {
                if let Err(e) = bridge.run(shutdown_rx).await {
                    error!(error = %e, "bridge failed");
                }
            }));
        }

        handles
    }

    /// Run until Ctrl-C, then stop accept loops and wait for them.
    pub async fn run(&self) -> Result<()> {
        let handles = self.spawn_listeners();
        info!(
            servers = self.servers.len(),
            bridges = self.bridges.len(),
            "runtime started"
        );

        tokio::signal::ctrl_c().await?;
        info!("shutting down");
        self.shutdown();

        for handle in handles {
            let _ = handle.await;
        }
        Ok(())
    }
}

fn tag_or_address(tag: &str, address: &str) -> String {
    if tag.is_empty() {
        address.to_string()
    } else {
        tag.to_string()
    }
}
