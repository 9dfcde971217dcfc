//! CAN frames over TCP/UDP.
//!
//! Every frame is 13 bytes: big-endian 32-bit id, DLC, then 8 data bytes
//! (unused bytes zero).

use super::message::Message;
use crate::codec::{Decoded, FrameCodec};

/// Bytes per network frame.
pub const FRAME_LEN: usize = 13;
/// Local UDP port the command station sends to.
pub const UDP_LOCAL_PORT: u16 = 15730;
/// UDP port of the command station.
pub const UDP_REMOTE_PORT: u16 = 15731;
/// TCP port of the command station.
pub const TCP_PORT: u16 = 15731;

/// [`FrameCodec`] for the 13-byte network framing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NetworkCodec;

impl FrameCodec for NetworkCodec {
    type Message = Message;
    const MAX_FRAME_LEN: usize = FRAME_LEN;

    fn encode(message: &Message, out: &mut Vec<u8>) {
        out.extend_from_slice(&message.id.to_be_bytes());
        out.push(message.dlc.min(8));
        let mut data = [0u8; 8];
        data[..message.payload().len()].copy_from_slice(message.payload());
        out.extend_from_slice(&data);
    }

    fn decode(bytes: &[u8]) -> Decoded<Message> {
        if bytes.len() < FRAME_LEN {
            return Decoded::Incomplete;
        }
        let dlc = bytes[4];
        // ids are 29 bits
        if dlc > 8 || bytes[0] & 0xE0 != 0 {
            return Decoded::Invalid;
        }
        let mut data = [0u8; 8];
        data.copy_from_slice(&bytes[5..FRAME_LEN]);
        Decoded::Frame {
            message: Message {
                id: u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
                dlc,
                data,
            },
            len: FRAME_LEN,
        }
    }
}
