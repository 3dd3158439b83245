//! Bidirectional relay between two streams
//!
//! Each direction runs as its own copy loop; whichever finishes first
//! shuts down its peer writer, which unblocks the other loop through
//! ordinary close semantics. No cross-task signalling.

use bytes::BytesMut;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::debug;

use super::Stream;

/// Relay buffer size (32KB)
const RELAY_BUFFER_SIZE: usize = 32 * 1024;

/// Copy bytes between `a` and `b` until both directions have finished.
/// Returns `(a_to_b, b_to_a)` byte totals.
pub async fn relay(a: Stream, b: Stream) -> (u64, u64) {
    let (mut a_read, mut a_write) = tokio::io::split(a);
    let (mut b_read, mut b_write) = tokio::io::split(b);

    let forward = async move {
        let mut buf = BytesMut::zeroed(RELAY_BUFFER_SIZE);
        let mut total: u64 = 0;

        loop {
            let n = match a_read.read(&mut buf).await {
                Ok(0) => break,
                Ok(n) => n,
                Err(_) => break,
            };

            if b_write.write_all(&buf[..n]).await.is_err() {
                break;
            }
            if b_write.flush().await.is_err() {
                break;
            }

            total += n as u64;
        }

        let _ = b_write.shutdown().await;
        total
    };

    let backward = async move {
        let mut buf = BytesMut::zeroed(RELAY_BUFFER_SIZE);
        let mut total: u64 = 0;

        loop {
            let n = match b_read.read(&mut buf).await {
                Ok(0) => break,
                Ok(n) => n,
                Err(_) => break,
            };

            if a_write.write_all(&buf[..n]).await.is_err() {
                break;
            }
            if a_write.flush().await.is_err() {
                break;
            }

            total += n as u64;
        }

        let _ = a_write.shutdown().await;
        total
    };

    let (forward, backward) = tokio::join!(forward, backward);
    debug!(forward, backward, "relay finished");
    (forward, backward)
}
