//! Trait definitions at the kernel's two seams.
//!
//! - `controller`: the bridge into the domain model (decoders, inputs,
//!   outputs) plus the value types that cross it
//! - `transport`: the link to the hardware
//!
//! # Controller bridge
//!
//! - [`DecoderController`]: locomotive decoders
//! - [`InputController`]: sensors
//! - [`OutputController`]: accessories, signals, turnouts
//!
//! # Transports
//!
//! [`Transport`] is implemented by the TCP, UDP and serial transports in
//! [`crate::hal`] and by each protocol's simulator.

pub mod controller;
pub mod transport;

pub use controller::*;
pub use transport::*;
