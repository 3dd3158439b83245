use async_trait::async_trait;

use crate::common::Stream;
use crate::error::Result;
use crate::stage::{StageOutput, StreamStage};

/// Identity stage, useful as a chain placeholder.
pub struct PassthroughStage;

#[async_trait]
impl StreamStage for PassthroughStage {
    async fn transform(&self, stream: Stream) -> Result<StageOutput> {
        Ok(StageOutput::Next(stream))
    }

    fn name(&self) -> &'static str {
        "passthrough"
    }
}
