//! Dialer Layer
//!
//! A dialer opens an outbound transport connection given a network type
//! and address. Decorators wrap an owned inner dialer, composed once at
//! construction time:
//!
//! ```text
//! direct                    plain TCP/UDP connect
//! counter(direct)           per-destination dial telemetry
//! pool(counter(direct))     connection reuse with idle eviction
//! ```
//!
//! Dial failures are never retried inside this layer; retry policy, if
//! any, belongs to the caller.

mod counting;
mod direct;
mod pool;

pub use counting::CountingDialer;
pub use direct::{DirectDialer, UdpStream};
pub use pool::PooledDialer;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::common::{parse_interval, Address, Network, Stream};
use crate::error::{Error, Result};
use crate::registry::Registry;

/// Unified dialer trait
#[async_trait]
pub trait Dialer: Send + Sync {
    /// Open an outbound connection to `addr` over `network`.
    async fn dial(&self, network: Network, addr: &Address) -> Result<Stream>;
}

/// Dialer configuration, tagged by component name
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "name", rename_all = "lowercase")]
pub enum DialerConfig {
    Direct,
    Counter {
        interval: String,
        dialer: Box<DialerConfig>,
    },
    Pool {
        idle_time: u64,
        max_connect: usize,
        dialer: Box<DialerConfig>,
    },
}

impl Default for DialerConfig {
    fn default() -> Self {
        DialerConfig::Direct
    }
}

impl DialerConfig {
    /// Component name this config resolves under.
    pub fn name(&self) -> &'static str {
        match self {
            DialerConfig::Direct => "direct",
            DialerConfig::Counter { .. } => "counter",
            DialerConfig::Pool { .. } => "pool",
        }
    }
}

/// Seed a registry with the default prototype for every dialer kind.
pub fn register_defaults(registry: &Registry<DialerConfig>) -> Result<()> {
    registry.register("direct", DialerConfig::Direct)?;
    registry.register(
        "counter",
        DialerConfig::Counter {
            interval: "60s".to_string(),
            dialer: Box::new(DialerConfig::Direct),
        },
    )?;
    registry.register(
        "pool",
        DialerConfig::Pool {
            idle_time: 90,
            max_connect: 6,
            dialer: Box::new(DialerConfig::Direct),
        },
    )?;
    Ok(())
}

/// Build a dialer from its configuration.
///
/// Decorators own their inner dialer exclusively; the whole chain is
/// constructed here and never rewired afterwards.
pub fn build_dialer(config: &DialerConfig) -> Result<Arc<dyn Dialer>> {
    match config {
        DialerConfig::Direct => Ok(Arc::new(DirectDialer::new())),
        DialerConfig::Counter { interval, dialer } => {
            let interval = parse_interval(interval)?;
            let inner = build_dialer(dialer)?;
            Ok(Arc::new(CountingDialer::new(interval, inner)))
        }
        DialerConfig::Pool {
            idle_time,
            max_connect,
            dialer,
        } => {
            if *idle_time == 0 {
                return Err(Error::Config("pool idle_time must be non-zero".into()));
            }
            if *max_connect == 0 {
                return Err(Error::Config("pool max_connect must be non-zero".into()));
            }
            let inner = build_dialer(dialer)?;
            Ok(Arc::new(PooledDialer::new(
                Duration::from_secs(*idle_time),
                *max_connect,
                inner,
            )))
        }
    }
}
