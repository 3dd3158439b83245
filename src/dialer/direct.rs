//! Direct dialer - plain TCP/UDP connections, no caching

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::pin::Pin;
use std::task::{Context, Poll};

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::{TcpStream, UdpSocket};

use crate::common::{Address, Network, Stream};
use crate::error::Result;

use super::Dialer;

/// Opens a fresh transport connection for every dial. Errors surface
/// verbatim (refused, timeout, resolution failure).
pub struct DirectDialer;

impl DirectDialer {
    pub fn new() -> Self {
        Self
    }
}

impl Default for DirectDialer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Dialer for DirectDialer {
    async fn dial(&self, network: Network, addr: &Address) -> Result<Stream> {
        match network {
            Network::Tcp => {
                let stream = match addr {
                    Address::Socket(socket_addr) => TcpStream::connect(socket_addr).await?,
                    Address::Domain(domain, port) => {
                        TcpStream::connect(format!("{}:{}", domain, port)).await?
                    }
                };

                // Disable Nagle's algorithm for lower latency
                stream.set_nodelay(true)?;

                Ok(Box::new(stream))
            }
            Network::Udp => {
                let bind_addr = match addr {
                    Address::Socket(s) if s.is_ipv6() => {
                        SocketAddr::new(IpAddr::V6(Ipv6Addr::UNSPECIFIED), 0)
                    }
                    _ => SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0),
                };
                let socket = UdpSocket::bind(bind_addr).await?;
                match addr {
                    Address::Socket(socket_addr) => socket.connect(socket_addr).await?,
                    Address::Domain(domain, port) => {
                        socket.connect(format!("{}:{}", domain, port)).await?
                    }
                }
                Ok(Box::new(UdpStream::new(socket)))
            }
        }
    }
}

/// Connected-UDP wrapper implementing AsyncRead + AsyncWrite so UDP
/// fits the same `Stream` abstraction as TCP.
pub struct UdpStream {
    socket: UdpSocket,
    read_buf: Vec<u8>,
    read_pos: usize,
    read_len: usize,
}

impl UdpStream {
    pub fn new(socket: UdpSocket) -> Self {
        Self {
            socket,
            read_buf: vec![0u8; 65535],
            read_pos: 0,
            read_len: 0,
        }
    }

    /// Wrap a socket with one datagram already received on its behalf,
    /// served before anything read from the socket itself.
    pub fn with_initial(socket: UdpSocket, datagram: &[u8]) -> Self {
        let mut stream = Self::new(socket);
        let len = datagram.len().min(stream.read_buf.len());
        stream.read_buf[..len].copy_from_slice(&datagram[..len]);
        stream.read_len = len;
        stream
    }
}

impl AsyncRead for UdpStream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        // Serve any datagram remainder first
        if self.read_pos < self.read_len {
            let remaining = self.read_len - self.read_pos;
            let to_copy = remaining.min(buf.remaining());
            buf.put_slice(&self.read_buf[self.read_pos..self.read_pos + to_copy]);
            self.read_pos += to_copy;
            return Poll::Ready(Ok(()));
        }

        let this = self.get_mut();
        let mut recv_buf = ReadBuf::new(&mut this.read_buf);
        match this.socket.poll_recv(cx, &mut recv_buf) {
            Poll::Ready(Ok(())) => {
                this.read_len = recv_buf.filled().len();
                this.read_pos = 0;

                let to_copy = this.read_len.min(buf.remaining());
                buf.put_slice(&this.read_buf[..to_copy]);
                this.read_pos = to_copy;

                Poll::Ready(Ok(()))
            }
            Poll::Ready(Err(e)) => Poll::Ready(Err(e)),
            Poll::Pending => Poll::Pending,
        }
    }
}

impl AsyncWrite for UdpStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        self.socket.poll_send(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}
