//! Geo-routing engine
//!
//! Decides direct-vs-proxy per connection: targets whose range segment
//! matches the process's own egress country are dialed directly,
//! everything else goes through the configured upstream SOCKS5 proxy.

mod ip_list;

pub use ip_list::{IpList, IpSegment};

use std::net::IpAddr;
use std::sync::Arc;

use serde::Deserialize;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, info};

use crate::common::{relay, Address, Network, Stream};
use crate::dialer::Dialer;
use crate::error::{Error, Result};
use crate::socks5;

/// Default address-echo endpoint used for egress detection.
pub const DEFAULT_ECHO_ENDPOINT: &str = "http://httpbin.org/ip";

/// 64-bit range key for an address. IPv4 packs the four octets
/// big-endian. IPv6 packs the first eight octets big-endian, which is
/// enough for range comparisons as long as tables use the same
/// reduction. Domains and anything unrecognized yield 0.
pub fn ip_key(addr: &Address) -> u64 {
    match addr.ip() {
        Some(ip) => key_of(ip),
        None => 0,
    }
}

fn key_of(ip: IpAddr) -> u64 {
    match ip {
        IpAddr::V4(v4) => u32::from(v4) as u64,
        IpAddr::V6(v6) => {
            let octets = v6.octets();
            let mut high = [0u8; 8];
            high.copy_from_slice(&octets[..8]);
            u64::from_be_bytes(high)
        }
    }
}

/// Routing decision for one target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Direct,
    Proxy,
}

pub struct Courier {
    ip_list: Arc<IpList>,
    local_country: String,
    upstream: Option<(Network, Address)>,
    dialer: Arc<dyn Dialer>,
}

impl Courier {
    pub fn new(
        ip_list: Arc<IpList>,
        local_country: impl Into<String>,
        upstream: Option<(Network, Address)>,
        dialer: Arc<dyn Dialer>,
    ) -> Self {
        Self {
            ip_list,
            local_country: local_country.into(),
            upstream,
            dialer,
        }
    }

    /// Pure decision: direct when there is no upstream, the target has
    /// no usable range key, or it sits in the egress country's segment.
    pub fn decide(&self, target: &Address) -> Route {
        if self.upstream.is_none() {
            return Route::Direct;
        }
        let key = ip_key(target);
        if key == 0 {
            return Route::Direct;
        }
        if self.ip_list.find(key).short_name == self.local_country {
            return Route::Direct;
        }
        Route::Proxy
    }

    /// Accept a SOCKS5 request on `conn`, route its target, reflect the
    /// bound address and attach the bidirectional relay.
    pub async fn handle(&self, mut conn: Stream) -> Result<()> {
        let target = socks5::accept(&mut conn).await?;

        match (self.decide(&target), &self.upstream) {
            (Route::Proxy, Some((network, addr))) => {
                debug!(target = %target, upstream = %addr, "courier: proxy route");
                let mut upstream = self.dialer.dial(*network, addr).await?;
                let bound = socks5::connect(&mut upstream, &target).await?;
                socks5::write_bind_address(&mut conn, &bound).await?;
                tokio::spawn(relay(conn, upstream));
            }
            _ => {
                debug!(target = %target, "courier: direct route");
                let upstream = self.dialer.dial(Network::Tcp, &target).await?;
                socks5::write_bind_address(&mut conn, &target).await?;
                tokio::spawn(relay(conn, upstream));
            }
        }
        Ok(())
    }
}

#[derive(Deserialize)]
struct EchoReply {
    origin: String,
}

/// Resolve the process's public egress IP through an address-echo HTTP
/// endpoint returning `{"origin": "<ip>"}`. Failure here is fatal to
/// courier construction.
pub async fn detect_egress_ip(echo_endpoint: &str) -> Result<IpAddr> {
    let rest = echo_endpoint
        .strip_prefix("http://")
        .ok_or_else(|| Error::Config(format!("echo endpoint must be http://: {}", echo_endpoint)))?;
    let (authority, path) = match rest.split_once('/') {
        Some((authority, path)) => (authority, format!("/{}", path)),
        None => (rest, "/".to_string()),
    };
    let host = authority.split(':').next().unwrap_or(authority);
    let connect_to = if authority.contains(':') {
        authority.to_string()
    } else {
        format!("{}:80", authority)
    };

    let mut stream = TcpStream::connect(&connect_to).await?;
    let request = format!(
        "GET {} HTTP/1.1\r\nHost: {}\r\nAccept: application/json\r\nConnection: close\r\n\r\n",
        path, host
    );
    stream.write_all(request.as_bytes()).await?;

    let mut response = Vec::new();
    stream.read_to_end(&mut response).await?;

    let response = String::from_utf8_lossy(&response);
    let body = response
        .split_once("\r\n\r\n")
        .map(|(_, body)| body)
        .ok_or_else(|| Error::Transport("malformed echo response".into()))?;
    // Some endpoints send chunked bodies; scan for the JSON object.
    let json_start = body
        .find('{')
        .ok_or_else(|| Error::Transport("no JSON body in echo response".into()))?;
    let json_end = body[json_start..]
        .find('}')
        .map(|i| json_start + i + 1)
        .ok_or_else(|| Error::Transport("no JSON body in echo response".into()))?;

    let reply: EchoReply = serde_json::from_str(&body[json_start..json_end])
        .map_err(|e| Error::Transport(format!("bad echo reply: {}", e)))?;

    // "origin" may carry a comma-separated list behind proxies
    let ip_str = reply.origin.split(',').next().unwrap_or("").trim();
    ip_str
        .parse()
        .map_err(|_| Error::Transport(format!("echo returned non-IP origin: {}", reply.origin)))
}

/// Look up the egress country once at startup.
pub async fn detect_local_country(ip_list: &IpList, echo_endpoint: &str) -> Result<String> {
    let egress = detect_egress_ip(echo_endpoint).await?;
    let key = key_of(egress);
    let segment = ip_list.find(key);
    info!(egress = %egress, country = %segment.short_name, "resolved egress country");
    Ok(segment.short_name)
}
