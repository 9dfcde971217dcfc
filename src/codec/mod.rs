//! Frame codecs and byte-stream resynchronisation.
//!
//! Each wire protocol implements [`FrameCodec`] for its message type.
//! Stream transports (TCP, serial) feed raw reads into a
//! [`StreamDecoder`], which hands out complete frames and drops garbage
//! one byte at a time until the stream lines up with a frame boundary
//! again.
//!
//! # Example
//!
//! ```rust
//! use rs_trackside::codec::StreamDecoder;
//! use rs_trackside::protocol::diy::{DiyCodec, Message};
//!
//! let mut decoder = StreamDecoder::<DiyCodec>::new();
//! let mut frames = Vec::new();
//!
//! // two garbage bytes, then a heartbeat
//! let dropped = decoder.feed(&[0x5A, 0xA5, 0x00, 0x00], |m| frames.push(m));
//!
//! assert_eq!(dropped, 2);
//! assert_eq!(frames, vec![Message::Heartbeat]);
//! ```

mod crc;

use core::marker::PhantomData;

use tracing::warn;

pub use crc::{crc16, crc16_update, xor, CRC16_BLOCK, CRC16_INIT, CRC16_POLY};

/// Result of trying to decode one frame from the head of a buffer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Decoded<M> {
    /// A complete, valid frame of `len` bytes.
    Frame {
        /// Parsed message.
        message: M,
        /// Bytes consumed.
        len: usize,
    },
    /// The head looks like a frame but more bytes are needed.
    Incomplete,
    /// The head byte cannot start a valid frame.
    Invalid,
}

/// Byte layout of one protocol's frames.
pub trait FrameCodec {
    /// Message type carried by one frame.
    type Message;

    /// Upper bound for the encoded size of a single frame.
    const MAX_FRAME_LEN: usize;

    /// Append the wire bytes of `message` to `out`.
    fn encode(message: &Self::Message, out: &mut Vec<u8>);

    /// Try to decode a frame starting at `bytes[0]`.
    fn decode(bytes: &[u8]) -> Decoded<Self::Message>;
}

/// Incremental decoder for a byte stream carrying `C` frames.
pub struct StreamDecoder<C: FrameCodec> {
    buffer: Vec<u8>,
    capacity: usize,
    _codec: PhantomData<C>,
}

impl<C: FrameCodec> StreamDecoder<C> {
    /// Creates a decoder with room for a few maximum-size frames.
    pub fn new() -> Self {
        Self::with_capacity(C::MAX_FRAME_LEN * 4)
    }

    /// Creates a decoder with an explicit buffer bound.
    ///
    /// The bound is raised to `C::MAX_FRAME_LEN` if smaller.
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(C::MAX_FRAME_LEN);
        Self {
            buffer: Vec::with_capacity(capacity),
            capacity,
            _codec: PhantomData,
        }
    }

    /// Bytes buffered but not yet decoded.
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    /// Discard buffered bytes.
    pub fn clear(&mut self) {
        self.buffer.clear();
    }

    /// Feed `bytes`, calling `deliver` once per complete frame in stream
    /// order. Returns how many bytes were dropped as garbage.
    pub fn feed(&mut self, mut bytes: &[u8], mut deliver: impl FnMut(C::Message)) -> usize {
        let mut garbage: Vec<u8> = Vec::new();
        let mut dropped_total = 0;

        loop {
            let take = (self.capacity - self.buffer.len()).min(bytes.len());
            self.buffer.extend_from_slice(&bytes[..take]);
            bytes = &bytes[take..];

            let mut pos = 0;
            while pos < self.buffer.len() {
                match C::decode(&self.buffer[pos..]) {
                    Decoded::Frame { message, len } => {
                        dropped_total += report_dropped(&mut garbage);
                        deliver(message);
                        pos += len;
                    }
                    Decoded::Incomplete => break,
                    Decoded::Invalid => {
                        garbage.push(self.buffer[pos]);
                        pos += 1;
                    }
                }
            }
            self.buffer.drain(..pos);

            if bytes.is_empty() {
                break;
            }
            if self.buffer.len() == self.capacity {
                // full of an unfinishable frame
                garbage.push(self.buffer.remove(0));
            }
        }

        dropped_total + report_dropped(&mut garbage)
    }
}

impl<C: FrameCodec> Default for StreamDecoder<C> {
    fn default() -> Self {
        Self::new()
    }
}

fn report_dropped(garbage: &mut Vec<u8>) -> usize {
    let n = garbage.len();
    if n > 0 {
        warn!("received malformed data, dropped {} bytes: {}", n, to_hex(garbage));
        garbage.clear();
    }
    n
}

/// Render bytes as space separated upper-case hex.
///
/// ```rust
/// assert_eq!(rs_trackside::codec::to_hex(&[0x01, 0xAB]), "01 AB");
/// ```
pub fn to_hex(bytes: &[u8]) -> String {
    let mut s = String::with_capacity(bytes.len() * 3);
    for (i, b) in bytes.iter().enumerate() {
        if i > 0 {
            s.push(' ');
        }
        s.push_str(&format!("{:02X}", b));
    }
    s
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Two-byte frames: `0xAA` marker followed by a payload byte.
    struct PairCodec;

    impl FrameCodec for PairCodec {
        type Message = u8;
        const MAX_FRAME_LEN: usize = 2;

        fn encode(message: &u8, out: &mut Vec<u8>) {
            out.extend_from_slice(&[0xAA, *message]);
        }

        fn decode(bytes: &[u8]) -> Decoded<u8> {
            match bytes {
                [] => Decoded::Incomplete,
                [0xAA] => Decoded::Incomplete,
                [0xAA, b, ..] => Decoded::Frame {
                    message: *b,
                    len: 2,
                },
                _ => Decoded::Invalid,
            }
        }
    }

    #[test]
    fn delivers_frames_in_order() {
        let mut d = StreamDecoder::<PairCodec>::new();
        let mut out = Vec::new();
        let dropped = d.feed(&[0xAA, 1, 0xAA, 2], |m| out.push(m));
        assert_eq!(dropped, 0);
        assert_eq!(out, vec![1, 2]);
    }

    #[test]
    fn waits_for_split_frame() {
        let mut d = StreamDecoder::<PairCodec>::new();
        let mut out = Vec::new();
        d.feed(&[0xAA], |m| out.push(m));
        assert!(out.is_empty());
        assert_eq!(d.pending(), 1);
        d.feed(&[7], |m| out.push(m));
        assert_eq!(out, vec![7]);
        assert_eq!(d.pending(), 0);
    }

    #[test]
    fn drops_garbage_before_frame() {
        let mut d = StreamDecoder::<PairCodec>::new();
        let mut out = Vec::new();
        let dropped = d.feed(&[1, 2, 3, 0xAA, 9], |m| out.push(m));
        assert_eq!(dropped, 3);
        assert_eq!(out, vec![9]);
    }

    #[test]
    fn input_larger_than_buffer() {
        let mut d = StreamDecoder::<PairCodec>::with_capacity(2);
        let mut out = Vec::new();
        let mut bytes = Vec::new();
        for i in 0..10u8 {
            PairCodec::encode(&i, &mut bytes);
        }
        let dropped = d.feed(&bytes, |m| out.push(m));
        assert_eq!(dropped, 0);
        assert_eq!(out, (0..10).collect::<Vec<_>>());
    }

    #[test]
    fn hex_rendering() {
        assert_eq!(to_hex(&[]), "");
        assert_eq!(to_hex(&[0x00, 0x0F, 0xF0]), "00 0F F0");
    }
}
