use async_trait::async_trait;

use crate::common::Stream;
use crate::error::{Error, Result};
use crate::stage::{StageOutput, StreamStage};

/// Placeholder for a TLS unwrap stage. Configurable so chains can name
/// it, but sessions reaching it are refused until an implementation
/// lands.
pub struct TlsStage;

#[async_trait]
impl StreamStage for TlsStage {
    async fn transform(&self, _stream: Stream) -> Result<StageOutput> {
        Err(Error::Unsupported("tls stage".into()))
    }

    fn name(&self) -> &'static str {
        "tls"
    }
}
