//! Stream abstraction
//!
//! Unified stream type for all layers to operate on. Stages, dialers
//! and the relay only ever see a `Stream`, never a raw socket type.

use tokio::io::{AsyncRead, AsyncWrite};

/// The core stream type used throughout the application.
pub type Stream = Box<dyn AsyncReadWrite + Unpin + Send>;

/// Combined trait for async read + write
pub trait AsyncReadWrite: AsyncRead + AsyncWrite {}

impl<T: AsyncRead + AsyncWrite> AsyncReadWrite for T {}

/// Trait for types that can be converted into a Stream
pub trait IntoStream {
    fn into_stream(self) -> Stream;
}

impl<T> IntoStream for T
where
    T: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    fn into_stream(self) -> Stream {
        Box::new(self)
    }
}
