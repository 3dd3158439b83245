//! Listen-mode server: one listener, one stage chain

use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use crate::common::Network;
use crate::error::Result;
use crate::stage::Pipeline;

use super::listener::Listener;

/// Runs accepted connections through an immutable stage chain, one task
/// per session. Accept errors are logged and skipped; session errors
/// close that session only.
pub struct StreamServer {
    tag: String,
    network: Network,
    address: String,
    pipeline: Arc<Pipeline>,
}

impl StreamServer {
    pub fn new(
        tag: impl Into<String>,
        network: Network,
        address: impl Into<String>,
        pipeline: Arc<Pipeline>,
    ) -> Self {
        Self {
            tag: tag.into(),
            network,
            address: address.into(),
            pipeline,
        }
    }

    pub async fn run(&self, mut shutdown: broadcast::Receiver<()>) -> Result<()> {
        let listener = Listener::bind(self.network, &self.address).await?;
        info!(
            tag = %self.tag,
            network = %self.network,
            address = %listener.local_addr()?,
            "server listening"
        );

        let mut sessions: u64 = 0;
        loop {
            tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        sessions += 1;
                        debug!(tag = %self.tag, peer = %peer, session = sessions, "accepted");

                        let pipeline = self.pipeline.clone();
                        let tag = self.tag.clone();
                        tokio::spawn(async move {
                            if let Err(e) = pipeline.process(stream).await {
                                warn!(tag = %tag, peer = %peer, error = %e, "session aborted");
                            }
                        });
                    }
                    Err(e) => {
                        error!(tag = %self.tag, error = %e, "accept failed");
                    }
                },
                _ = shutdown.recv() => {
                    info!(tag = %self.tag, sessions, "server stopping");
                    break;
                }
            }
        }
        Ok(())
    }
}
