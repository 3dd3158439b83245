use async_trait::async_trait;

use crate::common::Stream;
use crate::courier::Courier;
use crate::error::Result;
use crate::stage::{StageOutput, StreamStage};

/// Terminal geo-routing stage. Each session runs a SOCKS5 server
/// handshake and is then relayed either directly or through the
/// configured upstream, per the courier's decision.
pub struct CourierStage {
    courier: Courier,
}

impl CourierStage {
    pub fn new(courier: Courier) -> Self {
        Self { courier }
    }
}

#[async_trait]
impl StreamStage for CourierStage {
    async fn transform(&self, stream: Stream) -> Result<StageOutput> {
        self.courier.handle(stream).await?;
        Ok(StageOutput::Attached)
    }

    fn name(&self) -> &'static str {
        "courier"
    }
}
