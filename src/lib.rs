//! Subflow - a composable TCP/UDP stream proxy
//!
//! # Architecture
//!
//! ```text
//! Listener (TCP/UDP)
//! → Stage chain (SOCKS5 / Courier / Passthrough / TLS stub)
//! → Dialer (direct / counting / pooled)
//! → Bidirectional relay
//! ```
//!
//! ## Core Principles
//!
//! - Every accepted connection is threaded through an ordered chain of
//!   stream stages; a stage either hands the connection onward or
//!   attaches it to a relay and ends the chain.
//! - Outbound connections are opened through a pluggable [`dialer::Dialer`];
//!   decorators (counting, pooling) compose at construction time.
//! - Routing decisions (direct vs. upstream proxy) only depend on the
//!   courier's sorted IP range table and the process's egress country.
//!
//! ## Module Structure
//!
//! ```text
//! src/
//! ├── common/          # Address, Stream, relay, interval parsing
//! ├── registry.rs      # name → prototype component registry
//! ├── dialer/          # direct, counting, pooled dialers
//! ├── socks5/          # SOCKS5 codec and proxy composition
//! ├── courier/         # IP range table + geo routing engine
//! ├── stage/           # stream stage chain
//! └── app/             # runtime, listen-mode server, bridge mode
//! ```

pub mod common;
pub mod error;

pub mod registry;

pub mod dialer;
pub mod socks5;

pub mod courier;
pub mod stage;

pub mod app;
pub mod config;
