//! Bridge mode: relay every accepted connection to a fixed endpoint

use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use crate::common::{relay, Address, Network};
use crate::dialer::Dialer;
use crate::error::Result;

use super::listener::Listener;

/// Pairs each accepted connection with a fresh connection dialed to the
/// configured endpoint and relays bytes verbatim between the two.
pub struct Bridge {
    tag: String,
    network: Network,
    address: String,
    endpoint: (Network, Address),
    dialer: Arc<dyn Dialer>,
}

impl Bridge {
    pub fn new(
        tag: impl Into<String>,
        network: Network,
        address: impl Into<String>,
        endpoint: (Network, Address),
        dialer: Arc<dyn Dialer>,
    ) -> Self {
        Self {
            tag: tag.into(),
            network,
            address: address.into(),
            endpoint,
            dialer,
        }
    }

    pub async fn run(&self, mut shutdown: broadcast::Receiver<()>) -> Result<()> {
        let listener = Listener::bind(self.network, &self.address).await?;
        info!(
            tag = %self.tag,
            address = %listener.local_addr()?,
            endpoint = %self.endpoint.1,
            "bridge listening"
        );

        loop {
            tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok((inbound, peer)) => {
                        debug!(tag = %self.tag, peer = %peer, "bridging");

                        let (network, endpoint) = self.endpoint.clone();
                        let dialer = self.dialer.clone();
                        let tag = self.tag.clone();
                        tokio::spawn(async move {
                            match dialer.dial(network, &endpoint).await {
                                Ok(outbound) => {
                                    let (up, down) = relay(inbound, outbound).await;
                                    debug!(tag = %tag, peer = %peer, up, down, "bridge closed");
                                }
                                Err(e) => {
                                    warn!(
                                        tag = %tag,
                                        endpoint = %endpoint,
                                        error = %e,
                                        "endpoint dial failed"
                                    );
                                }
                            }
                        });
                    }
                    Err(e) => {
                        error!(tag = %self.tag, error = %e, "accept failed");
                    }
                },
                _ = shutdown.recv() => {
                    info!(tag = %self.tag, "bridge stopping");
                    break;
                }
            }
        }
        Ok(())
    }
}
