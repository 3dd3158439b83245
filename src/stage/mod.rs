//! Stream-stage pipeline
//!
//! An accepted connection is threaded through an ordered, immutable
//! chain of stages. A stage either hands a (possibly replaced) stream
//! to the next stage or attaches it to a relay, ending the chain.

mod courier;
mod passthrough;
mod socks5;
mod tls;

pub use courier::CourierStage;
pub use passthrough::PassthroughStage;
pub use socks5::Socks5Stage;
pub use tls::TlsStage;

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::common::{Address, Network, Stream};
use crate::courier::{detect_local_country, Courier, IpList, DEFAULT_ECHO_ENDPOINT};
use crate::dialer::{build_dialer, DialerConfig};
use crate::error::{Error, Result};
use crate::registry::Registry;

/// What a stage did with the connection.
pub enum StageOutput {
    /// Hand this stream to the next stage.
    Next(Stream),
    /// A relay now owns the connection; the chain stops here.
    Attached,
}

impl std::fmt::Debug for StageOutput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StageOutput::Next(_) => f.write_str("Next"),
            StageOutput::Attached => f.write_str("Attached"),
        }
    }
}

/// Unified stream stage trait
#[async_trait]
pub trait StreamStage: Send + Sync {
    async fn transform(&self, stream: Stream) -> Result<StageOutput>;

    fn name(&self) -> &'static str;
}

/// Stage configuration, tagged by component name
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "name", rename_all = "lowercase")]
pub enum StageConfig {
    Socks5 {
        #[serde(default)]
        network: Network,
        /// Upstream SOCKS5 proxy; empty means act as the server itself.
        #[serde(default)]
        address: String,
        #[serde(default)]
        dialer: DialerConfig,
    },
    Courier {
        #[serde(default)]
        network: Network,
        /// Upstream SOCKS5 proxy; empty means always route direct.
        #[serde(default)]
        address: String,
        #[serde(default)]
        ipv4: String,
        #[serde(default)]
        ipv6: String,
        /// Address-echo endpoint for egress detection.
        #[serde(default)]
        echo: Option<String>,
        #[serde(default)]
        dialer: DialerConfig,
    },
    Passthrough,
    Tls,
}

impl StageConfig {
    pub fn name(&self) -> &'static str {
        match self {
            StageConfig::Socks5 { .. } => "socks5",
            StageConfig::Courier { .. } => "courier",
            StageConfig::Passthrough => "passthrough",
            StageConfig::Tls => "tls",
        }
    }
}

/// Seed a registry with the default prototype for every stage kind.
pub fn register_defaults(registry: &Registry<StageConfig>) -> Result<()> {
    registry.register(
        "socks5",
        StageConfig::Socks5 {
            network: Network::Tcp,
            address: String::new(),
            dialer: DialerConfig::Direct,
        },
    )?;
    registry.register(
        "courier",
        StageConfig::Courier {
            network: Network::Tcp,
            address: String::new(),
            ipv4: String::new(),
            ipv6: String::new(),
            echo: None,
            dialer: DialerConfig::Direct,
        },
    )?;
    registry.register("passthrough", StageConfig::Passthrough)?;
    registry.register("tls", StageConfig::Tls)?;
    Ok(())
}

fn parse_upstream(network: Network, address: &str) -> Result<Option<(Network, Address)>> {
    if address.is_empty() {
        return Ok(None);
    }
    let addr = Address::parse_host_port(address)
        .ok_or_else(|| Error::Config(format!("bad upstream address: {}", address)))?;
    Ok(Some((network, addr)))
}

/// Build a stage from its configuration. Courier construction performs
/// the one-time table load and egress detection, so startup fails fast
/// on a broken geo setup.
pub async fn build_stage(config: &StageConfig) -> Result<Arc<dyn StreamStage>> {
    match config {
        StageConfig::Socks5 {
            network,
            address,
            dialer,
        } => {
            let dialer = build_dialer(dialer)?;
            let upstream = parse_upstream(*network, address)?;
            Ok(Arc::new(Socks5Stage::new(upstream, dialer)))
        }
        StageConfig::Courier {
            network,
            address,
            ipv4,
            ipv6,
            echo,
            dialer,
        } => {
            let dialer = build_dialer(dialer)?;
            let upstream = parse_upstream(*network, address)?;

            let mut ip_list = IpList::new();
            if !ipv4.is_empty() {
                ip_list.load_table(ipv4)?;
            }
            if !ipv6.is_empty() {
                ip_list.load_table(ipv6)?;
            }

            let echo = echo.as_deref().unwrap_or(DEFAULT_ECHO_ENDPOINT);
            let local_country = detect_local_country(&ip_list, echo).await?;

            Ok(Arc::new(CourierStage::new(Courier::new(
                Arc::new(ip_list),
                local_country,
                upstream,
                dialer,
            ))))
        }
        StageConfig::Passthrough => Ok(Arc::new(PassthroughStage)),
        StageConfig::Tls => Ok(Arc::new(TlsStage)),
    }
}

/// Ordered, immutable stage chain bound to one listener.
pub struct Pipeline {
    stages: Vec<Arc<dyn StreamStage>>,
}

impl Pipeline {
    pub fn new(stages: Vec<Arc<dyn StreamStage>>) -> Self {
        Self { stages }
    }

    /// Apply the stages strictly in order. The first error aborts the
    /// session; a stage attaching a relay ends the chain. A stream that
    /// falls off the end simply drops, closing the connection.
    pub async fn process(&self, mut stream: Stream) -> Result<()> {
        for stage in &self.stages {
            debug!(stage = stage.name(), "applying stage");
            match stage.transform(stream).await? {
                StageOutput::Next(next) => stream = next,
                StageOutput::Attached => return Ok(()),
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::IntoStream;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct OrderProbe {
        order: Arc<parking_lot::Mutex<Vec<&'static str>>>,
        tag: &'static str,
        attach: bool,
    }

    #[async_trait]
    impl StreamStage for OrderProbe {
        async fn transform(&self, stream: Stream) -> Result<StageOutput> {
            self.order.lock().push(self.tag);
            if self.attach {
                drop(stream);
                Ok(StageOutput::Attached)
            } else {
                Ok(StageOutput::Next(stream))
            }
        }

        fn name(&self) -> &'static str {
            self.tag
        }
    }

    struct FailingStage(AtomicUsize);

    #[async_trait]
    impl StreamStage for FailingStage {
        async fn transform(&self, _stream: Stream) -> Result<StageOutput> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Err(Error::Protocol("broken".into()))
        }

        fn name(&self) -> &'static str {
            "failing"
        }
    }

    fn memory_stream() -> Stream {
        let (near, _far) = tokio::io::duplex(64);
        near.into_stream()
    }

    #[tokio::test]
    async fn stages_run_strictly_in_order() {
        let order = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let pipeline = Pipeline::new(vec![
            Arc::new(OrderProbe { order: order.clone(), tag: "first", attach: false }),
            Arc::new(OrderProbe { order: order.clone(), tag: "second", attach: false }),
            Arc::new(OrderProbe { order: order.clone(), tag: "third", attach: true }),
        ]);

        pipeline.process(memory_stream()).await.unwrap();
        assert_eq!(*order.lock(), vec!["first", "second", "third"]);
    }

    #[tokio::test]
    async fn attachment_stops_the_chain() {
        let order = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let pipeline = Pipeline::new(vec![
            Arc::new(OrderProbe { order: order.clone(), tag: "terminal", attach: true }),
            Arc::new(OrderProbe { order: order.clone(), tag: "after", attach: false }),
        ]);

        pipeline.process(memory_stream()).await.unwrap();
        assert_eq!(*order.lock(), vec!["terminal"]);
    }

    #[tokio::test]
    async fn error_aborts_and_skips_later_stages() {
        let order = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let pipeline = Pipeline::new(vec![
            Arc::new(FailingStage(AtomicUsize::new(0))),
            Arc::new(OrderProbe { order: order.clone(), tag: "after", attach: false }),
        ]);

        assert!(pipeline.process(memory_stream()).await.is_err());
        assert!(order.lock().is_empty());
    }

    #[tokio::test]
    async fn empty_pipeline_drops_the_stream() {
        let pipeline = Pipeline::new(Vec::new());
        pipeline.process(memory_stream()).await.unwrap();
    }

    #[tokio::test]
    async fn concurrent_sessions_keep_independent_order() {
        let order = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let pipeline = Arc::new(Pipeline::new(vec![
            Arc::new(OrderProbe { order: order.clone(), tag: "a", attach: false }),
            Arc::new(OrderProbe { order: order.clone(), tag: "b", attach: true }),
        ]));

        let mut handles = Vec::new();
        for _ in 0..16 {
            let pipeline = pipeline.clone();
            handles.push(tokio::spawn(async move {
                pipeline.process(memory_stream()).await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        // Per-session ordering holds: counting suffices because each
        // session pushes "a" before "b".
        let order = order.lock();
        assert_eq!(order.len(), 32);
        let mut pending = 0i32;
        for tag in order.iter() {
            match *tag {
                "a" => pending += 1,
                "b" => pending -= 1,
                _ => unreachable!(),
            }
            assert!(pending >= 0);
        }
        assert_eq!(pending, 0);
    }

    #[test]
    fn stage_config_deserializes_by_name() {
        let config: StageConfig = serde_json::from_str(
            r#"{"name":"socks5","address":"10.0.0.1:1080",
                "dialer":{"name":"direct"}}"#,
        )
        .unwrap();
        assert_eq!(config.name(), "socks5");

        let config: StageConfig = serde_json::from_str(r#"{"name":"passthrough"}"#).unwrap();
        assert_eq!(config.name(), "passthrough");
    }

    #[test]
    fn registry_defaults_resolve() {
        let registry = Registry::new();
        register_defaults(&registry).unwrap();
        assert_eq!(registry.resolve("socks5").unwrap().name(), "socks5");
        assert_eq!(registry.resolve("courier").unwrap().name(), "courier");
        assert_eq!(registry.resolve("tls").unwrap().name(), "tls");
        assert!(registry.resolve("socks4").is_err());
    }

    #[tokio::test]
    async fn build_rejects_bad_upstream_address() {
        let config = StageConfig::Socks5 {
            network: Network::Tcp,
            address: "not-an-address".to_string(),
            dialer: DialerConfig::Direct,
        };
        assert!(build_stage(&config).await.is_err());
    }
}
