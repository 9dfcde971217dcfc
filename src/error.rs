//! Error types shared by transports, codecs and kernels.
//!
//! Decoding errors never cross the worker thread boundary: they are
//! recovered inside the kernel and only show up in the log. Transport
//! failures travel to the application thread as plain data inside a
//! [`Notification`](crate::kernel::Notification).

use std::io;

use thiserror::Error;

use crate::traits::OutputChannel;

/// Failure of the underlying byte link.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Socket or serial port I/O failure.
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
    /// The peer closed the connection.
    #[error("connection closed by peer")]
    Closed,
    /// The configured host or device could not be resolved.
    #[error("invalid address: {0}")]
    InvalidAddress(String),
    /// Serial port could not be opened or configured.
    #[error("serial port error: {0}")]
    Serial(String),
    /// `start()` was called on a transport that is already running.
    #[error("transport already started")]
    AlreadyStarted,
}

/// Failure while parsing a payload that is longer than one frame
/// (descriptors, locomotive lists).
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    /// Input ended before a fixed-size field.
    #[error("truncated input: needed {needed} bytes, {available} available")]
    Truncated {
        /// Bytes required by the field.
        needed: usize,
        /// Bytes left in the input.
        available: usize,
    },
    /// A NUL terminated string ran off the end of the input.
    #[error("unterminated string")]
    UnterminatedString,
    /// A field carried a value outside its documented range.
    #[error("invalid value {value} for {field}")]
    InvalidValue {
        /// Field name.
        field: &'static str,
        /// Raw value.
        value: u32,
    },
    /// Compressed payload could not be inflated.
    #[error("decompression failed: {0}")]
    Decompress(String),
}

/// Synchronous rejection of an outgoing domain command.
///
/// Returned before anything is posted to the worker, so a rejected
/// command never reaches the transport.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CommandError {
    /// Address outside the range supported by the channel.
    #[error("address {address} out of range {min}..={max}")]
    AddressOutOfRange {
        /// Requested address.
        address: u32,
        /// Lowest valid address.
        min: u32,
        /// Highest valid address.
        max: u32,
    },
    /// The protocol has no such channel.
    #[error("unsupported channel")]
    UnsupportedChannel,
    /// The decoder protocol/address has no wire representation.
    #[error("decoder cannot be addressed by this protocol")]
    UnknownDecoder,
    /// The kernel is not running.
    #[error("kernel not running")]
    NotRunning,
    /// The operation is only available on the simulation transport.
    #[error("only available in simulation")]
    NotSimulation,
}

/// Failure of a kernel lifecycle operation.
#[derive(Debug, Error)]
pub enum KernelError {
    /// `start()` called twice without `stop()`.
    #[error("kernel already running")]
    AlreadyRunning,
    /// The worker thread could not be spawned.
    #[error("failed to spawn worker thread: {0}")]
    Spawn(#[source] io::Error),
    /// The transport was lost with a crashed worker thread.
    #[error("transport unavailable")]
    TransportUnavailable,
}

/// Rejected output map edit. The map is left unchanged.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum OutputMapError {
    /// No interface assigned.
    #[error("no interface assigned")]
    NoInterface,
    /// The interface does not handle this channel.
    #[error("channel {0:?} not supported by the interface")]
    UnsupportedChannel(OutputChannel),
    /// The operation needs an address channel.
    #[error("channel uses object ids")]
    ObjectChannel,
    /// The operation needs an object id channel.
    #[error("channel uses addresses")]
    AddressChannel,
    /// Every address of the channel is taken.
    #[error("no unused address left")]
    NoFreeAddress,
    /// The address is already part of the map.
    #[error("address {0} already mapped")]
    DuplicateAddress(u32),
    /// The address is not part of the map.
    #[error("address {0} not mapped")]
    UnknownAddress(u32),
    /// Address outside the channel's range.
    #[error("address {address} out of range {min}..={max}")]
    AddressOutOfRange {
        /// Requested address.
        address: u32,
        /// Lowest valid address.
        min: u32,
        /// Highest valid address.
        max: u32,
    },
    /// An address channel keeps at least one address.
    #[error("cannot remove the last address")]
    LastAddress,
    /// The interface knows no such object.
    #[error("unknown object id {0}")]
    UnknownObject(u32),
    /// No item or action at that position.
    #[error("no such item or action")]
    NoSuchAction,
    /// The action does not fit the channel.
    #[error("action does not match the channel")]
    ActionMismatch,
}
