//! Core types shared by every layer

mod address;
mod interval;
mod relay;
mod stream;

pub use address::{Address, Network};
pub use interval::parse_interval;
pub use relay::relay;
pub use stream::{AsyncReadWrite, IntoStream, Stream};

pub use crate::error::Result;
