//! # rs-trackside
//!
//! Protocol kernels for model railway command stations: Märklin CAN
//! (Central Station, Gleisbox) and the Traintastic-DIY serial/TCP protocol.
//!
//! ## Features
//!
//! - **One kernel per interface**: each runs its protocol on a dedicated worker thread
//! - **Pluggable transports**: TCP, UDP, serial (`serial` feature) and in-process simulators
//! - **Startup state machine**: discovery, descriptor download, device configuration, catalog download
//! - **Controller bridge**: decoders, inputs and outputs of the domain model are updated on the application thread
//! - **Write suppression**: repeated output values are not sent twice
//!
//! ## Architecture
//!
//! - `traits` - Controller bridge and transport abstractions
//! - `codec` - Frame codecs, CRC-16 and XOR checksums, stream resynchronisation
//! - `kernel` - Generic kernel, worker thread, startup sequence, request queue
//! - `protocol` - Märklin CAN and DIY protocol engines with simulators
//! - `hal` - Concrete transports and mock controllers
//! - `output_map` - Channel/action reconciliation for outputs
//!
//! ## Example
//!
//! ```rust
//! use std::cell::RefCell;
//! use std::rc::Rc;
//! use std::time::Duration;
//!
//! use rs_trackside::config::CanConfig;
//! use rs_trackside::hal::{MockDecoderController, MockInputController, MockOutputController};
//! use rs_trackside::kernel::{Kernel, KernelState};
//! use rs_trackside::logging::Logger;
//! use rs_trackside::protocol::marklin_can::{CanSimulation, MarklinCan};
//!
//! let mut kernel: Kernel<MarklinCan> = Kernel::new(
//!     CanConfig::default(),
//!     CanSimulation::new(),
//!     Logger::new("cs2"),
//! );
//! kernel.set_decoder_controller(Rc::new(RefCell::new(MockDecoderController::new())));
//! kernel.set_input_controller(Rc::new(RefCell::new(MockInputController::new())));
//! kernel.set_output_controller(Rc::new(RefCell::new(MockOutputController::for_protocol::<MarklinCan>())));
//!
//! kernel.start().unwrap();
//! assert!(kernel.run_until(Duration::from_secs(5), |k| k.state() == KernelState::Started));
//!
//! kernel.system_go().unwrap();
//! kernel.stop();
//! ```

#![warn(missing_docs)]

/// Configuration snapshots and TOML loading.
pub mod config;
/// Error types.
pub mod error;
/// Tracing setup and the per-kernel logger handle.
pub mod logging;

/// Controller bridge and transport traits.
pub mod traits;

/// Frame codecs and checksums.
pub mod codec;

/// Generic protocol kernel.
pub mod kernel;

/// Transports and mock controllers.
pub mod hal;

/// Protocol implementations.
pub mod protocol;

/// Output map reconciliation.
pub mod output_map;

// Re-exports for convenience
pub use config::{CanConfig, Config, DiyConfig, LogConfig, NetworkConfig, SerialConfig};
pub use error::{CommandError, DecodeError, KernelError, OutputMapError, TransportError};
pub use kernel::{Kernel, KernelState, Notification, Protocol};
pub use logging::Logger;
pub use output_map::{OutputAction, OutputMap, OutputMapItem, PairAction, SingleAction};
pub use traits::{
    // Controller bridge
    DecoderChangeFlags,
    DecoderController,
    DecoderKey,
    DecoderProtocol,
    DecoderState,
    DecoderUpdate,
    Direction,
    InputChannel,
    InputController,
    OutputChannel,
    OutputController,
    TriState,
    // Transport
    Link,
    LinkEvent,
    Transport,
};
