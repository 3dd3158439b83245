//! Inbound socket binding shared by servers and bridges

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;

use tokio::net::{TcpListener, UdpSocket};

use crate::common::{IntoStream, Network, Stream};
use crate::dialer::UdpStream;
use crate::error::Result;

/// A bound inbound socket yielding one `Stream` per peer.
pub enum Listener {
    Tcp(TcpListener),
    Udp(Arc<UdpSocket>),
}

impl Listener {
    pub async fn bind(network: Network, address: &str) -> Result<Self> {
        match network {
            Network::Tcp => Ok(Listener::Tcp(TcpListener::bind(address).await?)),
            Network::Udp => Ok(Listener::Udp(Arc::new(UdpSocket::bind(address).await?))),
        }
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        match self {
            Listener::Tcp(listener) => Ok(listener.local_addr()?),
            Listener::Udp(socket) => Ok(socket.local_addr()?),
        }
    }

    /// Wait for the next peer. TCP accepts a connection; UDP receives
    /// the peer's first datagram and binds a connected per-peer socket
    /// that replays it, so both fit the stream abstraction.
    pub async fn accept(&self) -> Result<(Stream, SocketAddr)> {
        match self {
            Listener::Tcp(listener) => {
                let (conn, peer) = listener.accept().await?;
                conn.set_nodelay(true)?;
                Ok((conn.into_stream(), peer))
            }
            Listener::Udp(socket) => {
                let mut datagram = vec![0u8; 65535];
                let (len, peer) = socket.recv_from(&mut datagram).await?;

                let bind_addr = if peer.is_ipv6() {
                    SocketAddr::new(IpAddr::V6(Ipv6Addr::UNSPECIFIED), 0)
                } else {
                    SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0)
                };
                let conn = UdpSocket::bind(bind_addr).await?;
                conn.connect(peer).await?;

                let stream = UdpStream::with_initial(conn, &datagram[..len]);
                Ok((Box::new(stream), peer))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;

    #[tokio::test]
    async fn tcp_accept_yields_a_stream() {
        let listener = Listener::bind(Network::Tcp, "127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let connect = TcpStream::connect(addr);
        let accept = listener.accept();
        let (client, accepted) = tokio::join!(connect, accept);

        let mut client = client.unwrap();
        let (mut stream, peer) = accepted.unwrap();
        assert_eq!(peer, client.local_addr().unwrap());

        client.write_all(b"hello").await.unwrap();
        let mut buf = [0u8; 5];
        stream.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"hello");
    }

    #[tokio::test]
    async fn udp_accept_replays_the_first_datagram() {
        let listener = Listener::bind(Network::Udp, "127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        client.send_to(b"first", addr).await.unwrap();

        let (mut stream, peer) = listener.accept().await.unwrap();
        assert_eq!(peer, client.local_addr().unwrap());

        let mut buf = [0u8; 5];
        stream.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"first");

        // Replies come from the per-peer socket
        stream.write_all(b"pong").await.unwrap();
        let mut buf = [0u8; 16];
        let (n, _) = client.recv_from(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"pong");
    }
}
