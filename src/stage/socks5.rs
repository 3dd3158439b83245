use std::sync::Arc;

use async_trait::async_trait;

use crate::common::{Address, Network, Stream};
use crate::dialer::Dialer;
use crate::error::Result;
use crate::socks5;
use crate::stage::{StageOutput, StreamStage};

/// Terminal SOCKS5 stage. With an upstream configured, sessions are
/// relayed through that proxy; without one, this acts as the SOCKS5
/// server and dials targets itself.
pub struct Socks5Stage {
    upstream: Option<(Network, Address)>,
    dialer: Arc<dyn Dialer>,
}

impl Socks5Stage {
    pub fn new(upstream: Option<(Network, Address)>, dialer: Arc<dyn Dialer>) -> Self {
        Self { upstream, dialer }
    }
}

#[async_trait]
impl StreamStage for Socks5Stage {
    async fn transform(&self, stream: Stream) -> Result<StageOutput> {
        match &self.upstream {
            Some((network, addr)) => {
                socks5::proxy_through(stream, self.dialer.clone(), *network, addr).await?;
            }
            None => {
                socks5::serve(stream, self.dialer.clone()).await?;
            }
        }
        Ok(StageOutput::Attached)
    }

    fn name(&self) -> &'static str {
        "socks5"
    }
}
