//! Application orchestration: listeners, bridges and the runtime

mod bridge;
mod listener;
mod runtime;
mod server;

pub use bridge::Bridge;
pub use listener::Listener;
pub use runtime::Runtime;
pub use server::StreamServer;
