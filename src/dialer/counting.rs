//! Counting dialer - per-destination dial telemetry
//!
//! Forwards every dial to the inner dialer unconditionally; telemetry
//! loss never impacts the data path. Samples go through a bounded
//! channel to a background aggregator that logs one structured summary
//! per interval tick and resets.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};

use crate::common::{Address, Network, Stream};
use crate::error::Result;

use super::Dialer;

/// Bounded sample channel capacity; overflow drops the sample.
const SAMPLE_CHANNEL_CAPACITY: usize = 512;

pub struct CountingDialer {
    inner: Arc<dyn Dialer>,
    samples: mpsc::Sender<(Network, String)>,
}

impl CountingDialer {
    pub fn new(interval: Duration, inner: Arc<dyn Dialer>) -> Self {
        let (samples, rx) = mpsc::channel(SAMPLE_CHANNEL_CAPACITY);
        tokio::spawn(aggregate(rx, interval));
        Self { inner, samples }
    }
}

#[async_trait]
impl Dialer for CountingDialer {
    async fn dial(&self, network: Network, addr: &Address) -> Result<Stream> {
        if self
            .samples
            .try_send((network, addr.to_string()))
            .is_err()
        {
            info!(%network, address = %addr, "dial sample dropped, channel full");
        }
        self.inner.dial(network, addr).await
    }
}

/// Background aggregator: accumulates per-destination counts and emits
/// one summary per tick. Exits when the owning dialer is dropped.
async fn aggregate(mut rx: mpsc::Receiver<(Network, String)>, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let mut counts: HashMap<String, HashMap<String, u64>> = HashMap::new();

    loop {
        tokio::select! {
            sample = rx.recv() => match sample {
                Some((network, address)) => {
                    *counts
                        .entry(network.to_string())
                        .or_default()
                        .entry(address)
                        .or_insert(0) += 1;
                }
                None => break,
            },
            _ = ticker.tick() => {
                if counts.is_empty() {
                    continue;
                }
                match serde_json::to_string(&counts) {
                    Ok(summary) => info!(counts = %summary, "dial counter"),
                    Err(e) => warn!(error = %e, "failed to serialize dial counts"),
                }
                counts.clear();
            }
        }
    }
}
