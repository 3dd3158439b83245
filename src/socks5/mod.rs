//! SOCKS5 protocol engine
//!
//! Stateless codec for the CONNECT-only, no-auth subset of RFC 1928,
//! plus the two relay compositions built on it. No state is kept beyond
//! the connection being negotiated.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::debug;

use crate::common::{relay, Address, Network, Stream};
use crate::dialer::Dialer;
use crate::error::{Error, Result};

const SOCKS_VERSION: u8 = 0x05;
const AUTH_NONE: u8 = 0x00;

const CMD_CONNECT: u8 = 0x01;

const ATYP_IPV4: u8 = 0x01;
const ATYP_DOMAIN: u8 = 0x03;
const ATYP_IPV6: u8 = 0x04;

const REP_SUCCESS: u8 = 0x00;

/// Server-side handshake: negotiate no-auth, read the CONNECT request
/// and return the target the client asked for. The success reply is not
/// sent here; the caller reflects the bound address once the outbound
/// side is known.
pub async fn accept<S>(stream: &mut S) -> Result<Address>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut head = [0u8; 2];
    stream.read_exact(&mut head).await?;

    if head[0] != SOCKS_VERSION {
        return Err(Error::Protocol(format!(
            "unsupported SOCKS version: {}",
            head[0]
        )));
    }
    if head[1] == 0 {
        return Err(Error::Protocol("no auth methods offered".into()));
    }

    let mut methods = vec![0u8; head[1] as usize];
    stream.read_exact(&mut methods).await?;
    if !methods.contains(&AUTH_NONE) {
        return Err(Error::Protocol("no acceptable auth method".into()));
    }

    stream.write_all(&[SOCKS_VERSION, AUTH_NONE]).await?;

    let mut request = [0u8; 4];
    stream.read_exact(&mut request).await?;
    if request[0] != SOCKS_VERSION || request[1] != CMD_CONNECT || request[2] != 0 {
        return Err(Error::Protocol(format!(
            "unsupported request: {:?}",
            &request[..3]
        )));
    }

    read_address(stream, request[3]).await
}

/// Client-side handshake against an upstream SOCKS5 server: request a
/// CONNECT to `target` and return the bound address the server reports.
pub async fn connect<S>(stream: &mut S, target: &Address) -> Result<Address>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    stream
        .write_all(&[SOCKS_VERSION, 1, AUTH_NONE])
        .await?;

    let mut selection = [0u8; 2];
    stream.read_exact(&mut selection).await?;
    if selection[0] != SOCKS_VERSION || selection[1] != AUTH_NONE {
        return Err(Error::Protocol(format!(
            "server selected unsupported auth: {:?}",
            selection
        )));
    }

    let mut request = vec![SOCKS_VERSION, CMD_CONNECT, 0];
    push_address(&mut request, target);
    stream.write_all(&request).await?;

    let mut reply = [0u8; 4];
    stream.read_exact(&mut reply).await?;
    if reply[0] != SOCKS_VERSION || reply[1] != REP_SUCCESS || reply[2] != 0 {
        return Err(Error::Protocol(format!(
            "connect rejected: {:?}",
            &reply[..3]
        )));
    }

    read_address(stream, reply[3]).await
}

/// Reflect a bound address: `{5,0,0,atyp}` + address bytes + port.
pub async fn write_bind_address<S>(stream: &mut S, addr: &Address) -> Result<()>
where
    S: AsyncWrite + Unpin,
{
    let mut reply = vec![SOCKS_VERSION, REP_SUCCESS, 0];
    push_address(&mut reply, addr);
    stream.write_all(&reply).await?;
    Ok(())
}

/// Reflect a bound address given as a `"host:port"` string. Falls back
/// to raw bytes with port 0 when the string does not split cleanly.
pub async fn write_bind_str<S>(stream: &mut S, addr: &str) -> Result<()>
where
    S: AsyncWrite + Unpin,
{
    let addr = Address::parse_host_port(addr)
        .unwrap_or_else(|| Address::Domain(addr.to_string(), 0));
    write_bind_address(stream, &addr).await
}

/// The generic failure byte pair sent when the outbound dial fails.
pub async fn reply_failure<S>(stream: &mut S) -> Result<()>
where
    S: AsyncWrite + Unpin,
{
    stream.write_all(&[SOCKS_VERSION, 1, 0]).await?;
    Ok(())
}

/// Relay a downstream SOCKS5 client through an upstream SOCKS5 server:
/// learn the client's target, open it via the upstream (nested client
/// handshake), reflect the bound address and attach the bidirectional
/// relay.
pub async fn proxy_through(
    mut downstream: Stream,
    dialer: Arc<dyn Dialer>,
    network: Network,
    upstream_addr: &Address,
) -> Result<()> {
    let mut upstream = dialer.dial(network, upstream_addr).await?;
    let target = accept(&mut downstream).await?;
    let bound = connect(&mut upstream, &target).await?;
    write_bind_address(&mut downstream, &bound).await?;

    debug!(target = %target, upstream = %upstream_addr, "socks5 proxy attached");
    tokio::spawn(relay(downstream, upstream));
    Ok(())
}

/// Terminate a downstream SOCKS5 client locally: dial the requested
/// target directly, reflect it as the bound address and attach the
/// bidirectional relay. On dial failure the generic failure bytes go
/// back before the session is aborted.
pub async fn serve(mut downstream: Stream, dialer: Arc<dyn Dialer>) -> Result<()> {
    let target = accept(&mut downstream).await?;

    let upstream = match dialer.dial(Network::Tcp, &target).await {
        Ok(stream) => stream,
        Err(e) => {
            let _ = reply_failure(&mut downstream).await;
            return Err(e);
        }
    };
    write_bind_address(&mut downstream, &target).await?;

    debug!(target = %target, "socks5 server attached");
    tokio::spawn(relay(downstream, upstream));
    Ok(())
}

fn push_address(buf: &mut Vec<u8>, addr: &Address) {
    match addr {
        Address::Socket(SocketAddr::V4(v4)) => {
            buf.push(ATYP_IPV4);
            buf.extend_from_slice(&v4.ip().octets());
            buf.extend_from_slice(&v4.port().to_be_bytes());
        }
        Address::Socket(SocketAddr::V6(v6)) => {
            buf.push(ATYP_IPV6);
            buf.extend_from_slice(&v6.ip().octets());
            buf.extend_from_slice(&v6.port().to_be_bytes());
        }
        Address::Domain(domain, port) => {
            buf.push(ATYP_DOMAIN);
            buf.push(domain.len() as u8);
            buf.extend_from_slice(domain.as_bytes());
            buf.extend_from_slice(&port.to_be_bytes());
        }
    }
}

async fn read_address<S>(stream: &mut S, atyp: u8) -> Result<Address>
where
    S: AsyncRead + Unpin,
{
    let addr = match atyp {
        ATYP_IPV4 => {
            let mut octets = [0u8; 4];
            stream.read_exact(&mut octets).await?;
            let port = read_port(stream).await?;
            Address::Socket(SocketAddr::new(IpAddr::V4(Ipv4Addr::from(octets)), port))
        }
        ATYP_DOMAIN => {
            let mut len = [0u8; 1];
            stream.read_exact(&mut len).await?;
            let mut domain = vec![0u8; len[0] as usize];
            stream.read_exact(&mut domain).await?;
            let port = read_port(stream).await?;
            Address::Domain(String::from_utf8_lossy(&domain).to_string(), port)
        }
        ATYP_IPV6 => {
            let mut octets = [0u8; 16];
            stream.read_exact(&mut octets).await?;
            let port = read_port(stream).await?;
            Address::Socket(SocketAddr::new(IpAddr::V6(Ipv6Addr::from(octets)), port))
        }
        other => {
            return Err(Error::Protocol(format!(
                "unsupported address type: {}",
                other
            )));
        }
    };
    Ok(addr)
}

async fn read_port<S>(stream: &mut S) -> Result<u16>
where
    S: AsyncRead + Unpin,
{
    let mut port = [0u8; 2];
    stream.read_exact(&mut port).await?;
    Ok(u16::from_be_bytes(port))
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use crate::common::IntoStream;
    use tokio::io::duplex;

    #[tokio::test]
    async fn server_handshake_decodes_ipv4_connect() {
        let (mut client, mut server) = duplex(256);

        let server_task = tokio::spawn(async move { accept(&mut server).await });

        // Greeting: version 5, one method, no-auth
        client.write_all(&[5, 1, 0]).await.unwrap();
        // CONNECT 127.0.0.1:80
        client
            .write_all(&[5, 1, 0, 1, 127, 0, 0, 1, 0, 80])
            .await
            .unwrap();

        let mut selection = [0u8; 2];
        client.read_exact(&mut selection).await.unwrap();
        assert_eq!(selection, [5, 0]);

        let target = server_task.await.unwrap().unwrap();
        assert_eq!(
            target,
            Address::Socket("127.0.0.1:80".parse().unwrap())
        );
    }

    #[tokio::test]
    async fn client_and_server_handshakes_interoperate() {
        let (mut client, mut server) = duplex(256);
        let target = Address::Socket("[2001:db8::1]:443".parse().unwrap());
        let bound = Address::Socket("198.51.100.7:1080".parse().unwrap());

        let bound_for_server = bound.clone();
        let server_task = tokio::spawn(async move {
            let target = accept(&mut server).await?;
            write_bind_address(&mut server, &bound_for_server).await?;
            Ok::<Address, Error>(target)
        });

        let reported = connect(&mut client, &target).await.unwrap();
        assert_eq!(reported, bound);
        assert_eq!(server_task.await.unwrap().unwrap(), target);
    }

    #[tokio::test]
    async fn domain_targets_round_trip() {
        let (mut client, mut server) = duplex(256);
        let target = Address::domain("example.com", 8443);

        let server_task = tokio::spawn(async move {
            let target = accept(&mut server).await?;
            write_bind_address(&mut server, &Address::unspecified()).await?;
            Ok::<Address, Error>(target)
        });

        connect(&mut client, &target).await.unwrap();
        assert_eq!(server_task.await.unwrap().unwrap(), target);
    }

    #[tokio::test]
    async fn rejects_zero_auth_methods() {
        let (mut client, mut server) = duplex(256);
        let server_task = tokio::spawn(async move { accept(&mut server).await });

        client.write_all(&[5, 0]).await.unwrap();

        let err = server_task.await.unwrap().unwrap_err();
        assert!(matches!(err, Error::Protocol(_)));
    }

    #[tokio::test]
    async fn rejects_missing_no_auth() {
        let (mut client, mut server) = duplex(256);
        let server_task = tokio::spawn(async move { accept(&mut server).await });

        // Only username/password offered
        client.write_all(&[5, 1, 2]).await.unwrap();

        let err = server_task.await.unwrap().unwrap_err();
        assert!(matches!(err, Error::Protocol(_)));
    }

    #[tokio::test]
    async fn rejects_wrong_version() {
        let (mut client, mut server) = duplex(256);
        let server_task = tokio::spawn(async move { accept(&mut server).await });

        client.write_all(&[4, 1, 0]).await.unwrap();

        let err = server_task.await.unwrap().unwrap_err();
        assert!(matches!(err, Error::Protocol(_)));
    }

    #[tokio::test]
    async fn bind_str_falls_back_to_raw_bytes() {
        let (mut near, mut far) = duplex(256);

        write_bind_str(&mut near, "opaque-name").await.unwrap();

        let mut head = [0u8; 4];
        far.read_exact(&mut head).await.unwrap();
        assert_eq!(head, [5, 0, 0, 3]);
        let mut len = [0u8; 1];
        far.read_exact(&mut len).await.unwrap();
        let mut name = vec![0u8; len[0] as usize];
        far.read_exact(&mut name).await.unwrap();
        assert_eq!(name, b"opaque-name");
        let mut port = [0u8; 2];
        far.read_exact(&mut port).await.unwrap();
        assert_eq!(u16::from_be_bytes(port), 0);
    }

    struct FailingDialer;

    #[async_trait]
    impl Dialer for FailingDialer {
        async fn dial(&self, _network: Network, _addr: &Address) -> Result<Stream> {
            Err(Error::Transport("refused".into()))
        }
    }

    #[tokio::test]
    async fn serve_replies_failure_when_dial_fails() {
        let (mut client, server) = duplex(256);

        let serve_task =
            tokio::spawn(serve(server.into_stream(), Arc::new(FailingDialer)));

        client.write_all(&[5, 1, 0]).await.unwrap();
        let mut selection = [0u8; 2];
        client.read_exact(&mut selection).await.unwrap();
        assert_eq!(selection, [5, 0]);

        client
            .write_all(&[5, 1, 0, 1, 127, 0, 0, 1, 0, 80])
            .await
            .unwrap();

        let mut failure = [0u8; 3];
        client.read_exact(&mut failure).await.unwrap();
        assert_eq!(failure, [5, 1, 0]);

        assert!(serve_task.await.unwrap().is_err());
    }

    /// Dialer stub whose far end echoes everything back.
    struct EchoDialer;

    #[async_trait]
    impl Dialer for EchoDialer {
        async fn dial(&self, _network: Network, _addr: &Address) -> Result<Stream> {
            let (near, far) = duplex(256);
            tokio::spawn(async move {
                let (mut read, mut write) = tokio::io::split(far);
                let _ = tokio::io::copy(&mut read, &mut write).await;
            });
            Ok(near.into_stream())
        }
    }

    #[tokio::test]
    async fn serve_relays_to_dialed_target() {
        let (mut client, server) = duplex(256);

        tokio::spawn(serve(server.into_stream(), Arc::new(EchoDialer)));

        client.write_all(&[5, 1, 0]).await.unwrap();
        let mut selection = [0u8; 2];
        client.read_exact(&mut selection).await.unwrap();
        client
            .write_all(&[5, 1, 0, 1, 127, 0, 0, 1, 0, 80])
            .await
            .unwrap();

        // Bind reply reflects the dialed target
        let mut reply = [0u8; 10];
        client.read_exact(&mut reply).await.unwrap();
        assert_eq!(&reply[..4], &[5, 0, 0, 1]);
        assert_eq!(&reply[4..8], &[127, 0, 0, 1]);
        assert_eq!(u16::from_be_bytes([reply[8], reply[9]]), 80);

        // Data now round-trips through the echo target
        client.write_all(b"payload").await.unwrap();
        let mut echoed = [0u8; 7];
        client.read_exact(&mut echoed).await.unwrap();
        assert_eq!(&echoed, b"payload");
    }
}
