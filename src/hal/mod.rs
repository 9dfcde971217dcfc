//! Concrete implementations of the traits in [`crate::traits`].
//!
//! # Available Implementations
//!
//! - `tcp`: TCP client transport
//! - `udp`: UDP datagram transport
//! - `serial`: serial port transport (requires `serial` feature)
//! - `mock`: controller doubles for tests
//!
//! The transports are generic over a [`FrameCodec`](crate::codec::FrameCodec),
//! so one implementation serves every protocol:
//!
//! ```rust,no_run
//! use rs_trackside::hal::TcpTransport;
//! use rs_trackside::protocol::marklin_can::{network, NetworkCodec};
//!
//! let transport = TcpTransport::<NetworkCodec>::new("192.168.1.2", network::TCP_PORT);
//! ```

pub mod mock;
mod stream;
pub mod tcp;
pub mod udp;

#[cfg(feature = "serial")]
pub mod serial;

pub use mock::*;
pub use stream::WRITE_QUEUE_FRAMES;
pub use tcp::TcpTransport;
pub use udp::UdpTransport;

#[cfg(feature = "serial")]
pub use serial::SerialTransport;
