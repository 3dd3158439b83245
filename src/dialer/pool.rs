//! Pooled dialer - connection reuse with idle eviction
//!
//! One sub-pool per distinct `(network, address)` destination, created
//! lazily on first dial. Returned connections park in a bounded ready
//! queue; a per-pool ticker drains the queue once no activity has been
//! observed for the idle period.

use std::collections::{HashMap, VecDeque};
use std::pin::Pin;
use std::sync::{Arc, Weak};
use std::task::{Context, Poll};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::time::Instant;
use tracing::debug;

use crate::common::{Address, Network, Stream};
use crate::error::{Error, Result};

use super::Dialer;

pub struct PooledDialer {
    inner: Arc<dyn Dialer>,
    idle_time: Duration,
    max_connect: usize,
    pools: RwLock<HashMap<(Network, String), Arc<SubPool>>>,
}

impl PooledDialer {
    pub fn new(idle_time: Duration, max_connect: usize, inner: Arc<dyn Dialer>) -> Self {
        Self {
            inner,
            idle_time,
            max_connect,
            pools: RwLock::new(HashMap::new()),
        }
    }

    fn subpool(&self, network: Network, addr: &Address) -> Arc<SubPool> {
        let key = (network, addr.to_string());
        if let Some(pool) = self.pools.read().get(&key) {
            return pool.clone();
        }

        // Lazy create, double-checked under the write lock
        let mut pools = self.pools.write();
        if let Some(pool) = pools.get(&key) {
            return pool.clone();
        }
        let pool = SubPool::start(network, addr.to_string(), self.max_connect, self.idle_time);
        pools.insert(key, pool.clone());
        pool
    }

    /// Drop every parked connection in every sub-pool and let the
    /// eviction tickers wind down.
    pub fn close(&self) {
        let pools = std::mem::take(&mut *self.pools.write());
        for pool in pools.values() {
            pool.drain();
        }
    }

    #[cfg(test)]
    fn parked_count(&self, network: Network, addr: &Address) -> usize {
        let key = (network, addr.to_string());
        self.pools
            .read()
            .get(&key)
            .map(|p| p.parked.lock().len())
            .unwrap_or(0)
    }
}

#[async_trait]
impl Dialer for PooledDialer {
    async fn dial(&self, network: Network, addr: &Address) -> Result<Stream> {
        let pool = self.subpool(network, addr);
        pool.check_key(network, addr)?;

        if let Some(stream) = pool.acquire() {
            debug!(%network, address = %addr, "reusing pooled connection");
            return Ok(Box::new(PooledStream {
                inner: Some(stream),
                pool,
            }));
        }

        let stream = self.inner.dial(network, addr).await?;
        pool.touch();
        // The fresh connection belongs to the caller alone; it only
        // enters the ready queue once the caller is done with it.
        Ok(Box::new(PooledStream {
            inner: Some(stream),
            pool,
        }))
    }
}

/// Reusable-connection cache for one `(network, address)` destination.
struct SubPool {
    network: Network,
    address: String,
    max_connect: usize,
    idle_time: Duration,
    parked: Mutex<VecDeque<Stream>>,
    last_activity: Mutex<Instant>,
}

impl SubPool {
    fn start(
        network: Network,
        address: String,
        max_connect: usize,
        idle_time: Duration,
    ) -> Arc<Self> {
        let pool = Arc::new(Self {
            network,
            address,
            max_connect,
            idle_time,
            parked: Mutex::new(VecDeque::with_capacity(max_connect)),
            last_activity: Mutex::new(Instant::now()),
        });
        tokio::spawn(evict_loop(Arc::downgrade(&pool)));
        pool
    }

    /// Defensive check against key collisions: this pool only serves
    /// the destination it was created for.
    fn check_key(&self, network: Network, addr: &Address) -> Result<()> {
        let address = addr.to_string();
        if network != self.network || address != self.address {
            return Err(Error::CrossPool(format!(
                "pool bound to {}/{}, dialed {}/{}",
                self.network, self.address, network, address
            )));
        }
        Ok(())
    }

    fn touch(&self) {
        *self.last_activity.lock() = Instant::now();
    }

    fn acquire(&self) -> Option<Stream> {
        let stream = self.parked.lock().pop_front();
        if stream.is_some() {
            self.touch();
        }
        stream
    }

    fn park(&self, stream: Stream) {
        let mut parked = self.parked.lock();
        if parked.len() >= self.max_connect {
            debug!(
                network = %self.network,
                address = %self.address,
                "ready queue full, closing returned connection"
            );
            return;
        }
        parked.push_back(stream);
        drop(parked);
        self.touch();
    }

    fn drain(&self) {
        let drained: Vec<Stream> = self.parked.lock().drain(..).collect();
        if !drained.is_empty() {
            debug!(
                network = %self.network,
                address = %self.address,
                count = drained.len(),
                "evicting idle pooled connections"
            );
        }
    }
}

/// Per-pool eviction ticker. Drains the ready queue once the pool has
/// seen no activity for a full idle period; exits when the owning
/// dialer (and all outstanding handles) are gone.
async fn evict_loop(pool: Weak<SubPool>) {
    let idle_time = match pool.upgrade() {
        Some(p) => p.idle_time,
        None => return,
    };
    loop {
        tokio::time::sleep(idle_time).await;
        match pool.upgrade() {
            Some(p) => {
                if p.last_activity.lock().elapsed() >= p.idle_time {
                    p.drain();
                }
            }
            None => break,
        }
    }
}

/// Pool-tracked connection handle. On drop the live stream goes back to
/// its sub-pool's ready queue instead of closing, unless the queue is
/// already full.
struct PooledStream {
    inner: Option<Stream>,
    pool: Arc<SubPool>,
}

impl Drop for PooledStream {
    fn drop(&mut self) {
        if let Some(stream) = self.inner.take() {
            self.pool.park(stream);
        }
    }
}

impl AsyncRead for PooledStream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        match self.inner.as_mut() {
            Some(stream) => Pin::new(stream).poll_read(cx, buf),
            None => Poll::Ready(Err(gone())),
        }
    }
}

impl AsyncWrite for PooledStream {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        match self.inner.as_mut() {
            Some(stream) => Pin::new(stream).poll_write(cx, buf),
            None => Poll::Ready(Err(gone())),
        }
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        match self.inner.as_mut() {
            Some(stream) => Pin::new(stream).poll_flush(cx),
            None => Poll::Ready(Err(gone())),
        }
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        match self.inner.as_mut() {
            Some(stream) => Pin::new(stream).poll_shutdown(cx),
            None => Poll::Ready(Err(gone())),
        }
    }
}

fn gone() -> std::io::Error {
    std::io::Error::new(std::io::ErrorKind::NotConnected, "pooled stream detached")
}
