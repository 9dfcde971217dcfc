//! DIY protocol frames.
//!
//! Every frame is `opcode, [length], data..., checksum`:
//!
//! | Byte | Meaning |
//! |------|---------|
//! | 0 | opcode; the low nibble is the data length |
//! | 1 | only if the nibble is `0xF`: data length (the data then starts at byte 2) |
//! | ... | data |
//! | last | XOR of all preceding bytes |
//!
//! Throttle messages pack a locomotive address into two bytes; the high
//! byte carries flag bits:
//!
//! | Bit | Meaning |
//! |-----|---------|
//! | 7 | long (DCC) address |
//! | 6 | subscribe (only in `ThrottleSubUnsub`) |
//! | 5..0 | address bits 13..8 |

use core::fmt;

use crate::codec::{to_hex, xor, Decoded, FrameCodec};
use crate::traits::Direction;

/// Longest data part: one length byte plus 255 bytes.
pub const MAX_DATA_LEN: usize = 1 + 255;
/// Longest frame.
pub const MAX_FRAME_LEN: usize = 1 + MAX_DATA_LEN + 1;
/// Longest info text.
pub const MAX_INFO_LEN: usize = 255;
/// Highest locomotive address that fits the packed field.
pub const LOCO_ADDRESS_MAX: u16 = 0x3FFF;

const ADDRESS_LONG: u8 = 0x80;
const ADDRESS_SUBSCRIBE: u8 = 0x40;
const ADDRESS_HIGH_MASK: u8 = 0x3F;

const SPEED_SET: u8 = 0x80;
const DIRECTION_SET: u8 = 0x40;
const DIRECTION_FORWARD: u8 = 0x01;

const FUNCTION_NUMBER_MASK: u8 = 0x7F;
const FUNCTION_ON: u8 = 0x80;

// ============================================================================
// Opcodes
// ============================================================================

/// Known opcodes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum OpCode {
    /// Keep-alive.
    Heartbeat = 0x00,
    /// Ask for an input state.
    GetInputState = 0x12,
    /// Input state report.
    SetInputState = 0x13,
    /// Ask for an output state.
    GetOutputState = 0x22,
    /// Set an output / output state report.
    SetOutputState = 0x23,
    /// Throttle (un)subscribes to a locomotive.
    ThrottleSubUnsub = 0x34,
    /// Throttle function change.
    ThrottleSetFunction = 0x35,
    /// Throttle speed/direction change.
    ThrottleSetSpeedDirection = 0x37,
    /// Ask for the feature flags.
    GetFeatures = 0xE0,
    /// Feature flags report.
    Features = 0xE4,
    /// Ask for the info string.
    GetInfo = 0xF0,
    /// Info string.
    Info = 0xFF,
}

impl OpCode {
    /// Map a raw byte to a known opcode.
    pub const fn from_u8(value: u8) -> Option<Self> {
        Some(match value {
            0x00 => OpCode::Heartbeat,
            0x12 => OpCode::GetInputState,
            0x13 => OpCode::SetInputState,
            0x22 => OpCode::GetOutputState,
            0x23 => OpCode::SetOutputState,
            0x34 => OpCode::ThrottleSubUnsub,
            0x35 => OpCode::ThrottleSetFunction,
            0x37 => OpCode::ThrottleSetSpeedDirection,
            0xE0 => OpCode::GetFeatures,
            0xE4 => OpCode::Features,
            0xF0 => OpCode::GetInfo,
            0xFF => OpCode::Info,
            _ => return None,
        })
    }
}

/// Total frame size from the first bytes of a frame.
///
/// `None` if the length byte of a variable-length frame is not there yet.
pub fn frame_size(header: &[u8]) -> Option<usize> {
    let opcode = *header.first()?;
    let data_size = match opcode & 0x0F {
        0x0F => 1 + *header.get(1)? as usize,
        n => n as usize,
    };
    Some(1 + data_size + 1)
}

// ============================================================================
// Raw frame
// ============================================================================

/// Raw frame bytes including the checksum.
#[derive(Clone, PartialEq, Eq)]
pub struct Frame {
    bytes: heapless::Vec<u8, MAX_FRAME_LEN>,
}

impl Frame {
    /// Build a frame with a correct checksum.
    ///
    /// For fixed-length opcodes `data` must match the length nibble. For
    /// variable-length opcodes (`0x?F`) `data` is the content after the
    /// length byte, which is filled in here.
    pub fn new(opcode: u8, data: &[u8]) -> Option<Self> {
        let mut bytes = heapless::Vec::new();
        bytes.push(opcode).ok()?;
        match opcode & 0x0F {
            0x0F => {
                let len = u8::try_from(data.len()).ok()?;
                bytes.push(len).ok()?;
            }
            n if n as usize == data.len() => {}
            _ => return None,
        }
        bytes.extend_from_slice(data).ok()?;
        bytes.push(0).ok()?;
        let mut frame = Self { bytes };
        frame.update_checksum();
        Some(frame)
    }

    /// Copy exactly one frame from the start of `bytes`.
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        let size = frame_size(bytes)?;
        let slice = bytes.get(..size)?;
        let bytes = heapless::Vec::from_slice(slice).ok()?;
        Some(Self { bytes })
    }

    /// Wire bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Wire bytes, mutable. The checksum is not updated.
    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        &mut self.bytes
    }

    /// Frame size in bytes.
    pub fn size(&self) -> usize {
        self.bytes.len()
    }

    /// Opcode byte.
    pub fn opcode(&self) -> u8 {
        self.bytes[0]
    }

    /// Data bytes, after the length byte for variable-length frames.
    pub fn data(&self) -> &[u8] {
        let start = if self.opcode() & 0x0F == 0x0F { 2 } else { 1 };
        &self.bytes[start..self.bytes.len() - 1]
    }

    /// Transmitted checksum.
    pub fn checksum(&self) -> u8 {
        self.bytes[self.bytes.len() - 1]
    }

    /// Checksum computed over the frame.
    pub fn calc_checksum(&self) -> u8 {
        xor(&self.bytes[..self.bytes.len() - 1])
    }

    /// True if both checksums agree.
    pub fn is_checksum_valid(&self) -> bool {
        self.checksum() == self.calc_checksum()
    }

    /// Recompute and store the checksum.
    pub fn update_checksum(&mut self) {
        let checksum = self.calc_checksum();
        let last = self.bytes.len() - 1;
        self.bytes[last] = checksum;
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Frame[{}]", to_hex(&self.bytes))
    }
}

// ============================================================================
// Field types
// ============================================================================

/// Input or output state on the wire.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub enum IoState {
    /// Not known.
    #[default]
    Undefined,
    /// Off.
    False,
    /// On.
    True,
    /// Address not usable on the device.
    Invalid,
}

impl IoState {
    /// Wire value.
    pub const fn to_u8(self) -> u8 {
        match self {
            IoState::Undefined => 0,
            IoState::False => 1,
            IoState::True => 2,
            IoState::Invalid => 3,
        }
    }

    /// Parse a wire value; unknown values count as invalid.
    pub const fn from_u8(value: u8) -> Self {
        match value {
            0 => IoState::Undefined,
            1 => IoState::False,
            2 => IoState::True,
            _ => IoState::Invalid,
        }
    }
}

impl From<bool> for IoState {
    fn from(value: bool) -> Self {
        if value {
            IoState::True
        } else {
            IoState::False
        }
    }
}

/// Packed locomotive address.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LocoAddress {
    /// Address, 0..=0x3FFF.
    pub address: u16,
    /// DCC long address.
    pub long: bool,
}

impl LocoAddress {
    /// Creates an address; bits above 13 are dropped.
    pub const fn new(address: u16, long: bool) -> Self {
        Self {
            address: address & LOCO_ADDRESS_MAX,
            long,
        }
    }

    /// Pack into the two wire bytes, with an optional subscribe bit.
    pub const fn encode(self, subscribe: bool) -> [u8; 2] {
        let mut high = ((self.address >> 8) as u8) & ADDRESS_HIGH_MASK;
        if self.long {
            high |= ADDRESS_LONG;
        }
        if subscribe {
            high |= ADDRESS_SUBSCRIBE;
        }
        [high, self.address as u8]
    }

    /// Unpack two wire bytes. Returns the address and the subscribe bit.
    pub const fn decode(bytes: [u8; 2]) -> (Self, bool) {
        let address = (((bytes[0] & ADDRESS_HIGH_MASK) as u16) << 8) | bytes[1] as u16;
        (
            Self {
                address,
                long: bytes[0] & ADDRESS_LONG != 0,
            },
            bytes[0] & ADDRESS_SUBSCRIBE != 0,
        )
    }

    /// True for long DCC addresses.
    pub const fn is_long_address(self) -> bool {
        self.long
    }
}

impl fmt::Display for LocoAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.address, if self.long { "L" } else { "" })
    }
}

/// Throttle speed as `step` of `max` steps. `max == 0` is an emergency stop.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SpeedStep {
    /// Current step.
    pub step: u8,
    /// Step count.
    pub max: u8,
}

impl SpeedStep {
    /// Emergency stop marker.
    pub const EMERGENCY_STOP: Self = Self { step: 0, max: 0 };

    /// True if this encodes an emergency stop.
    pub const fn is_emergency_stop(self) -> bool {
        self.max == 0
    }

    /// Throttle position 0.0 to 1.0.
    pub fn throttle(self) -> f32 {
        if self.max == 0 {
            0.0
        } else {
            (self.step as f32 / self.max as f32).min(1.0)
        }
    }

    /// Nearest step for `throttle` out of `max`.
    pub fn from_throttle(throttle: f32, max: u8) -> Self {
        let step = (throttle.clamp(0.0, 1.0) * max as f32).round() as u8;
        Self { step, max }
    }
}

/// Feature flags reported by the device.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Features(pub [u8; 4]);

impl Features {
    /// Flag byte 0: inputs.
    pub const INPUT: u8 = 0x01;
    /// Flag byte 0: outputs.
    pub const OUTPUT: u8 = 0x02;
    /// Flag byte 0: throttles.
    pub const THROTTLE: u8 = 0x04;

    /// Build from the three known flags.
    pub const fn new(input: bool, output: bool, throttle: bool) -> Self {
        let mut flags = 0;
        if input {
            flags |= Self::INPUT;
        }
        if output {
            flags |= Self::OUTPUT;
        }
        if throttle {
            flags |= Self::THROTTLE;
        }
        Self([flags, 0, 0, 0])
    }

    /// Device has inputs.
    pub const fn has_input(&self) -> bool {
        self.0[0] & Self::INPUT != 0
    }

    /// Device has outputs.
    pub const fn has_output(&self) -> bool {
        self.0[0] & Self::OUTPUT != 0
    }

    /// Device has throttles.
    pub const fn has_throttle(&self) -> bool {
        self.0[0] & Self::THROTTLE != 0
    }
}

// ============================================================================
// Message
// ============================================================================

/// Parsed DIY message.
#[derive(Clone, Debug, PartialEq)]
pub enum Message {
    /// Keep-alive.
    Heartbeat,
    /// Ask for an input state.
    GetInputState {
        /// Input address.
        address: u16,
    },
    /// Input state.
    SetInputState {
        /// Input address.
        address: u16,
        /// State.
        state: IoState,
    },
    /// Ask for an output state.
    GetOutputState {
        /// Output address.
        address: u16,
    },
    /// Output state.
    SetOutputState {
        /// Output address.
        address: u16,
        /// State.
        state: IoState,
    },
    /// Throttle (un)subscription.
    ThrottleSubUnsub {
        /// Throttle id.
        throttle_id: u16,
        /// Locomotive.
        address: LocoAddress,
        /// Subscribe or unsubscribe.
        subscribe: bool,
    },
    /// Throttle function change.
    ThrottleSetFunction {
        /// Throttle id.
        throttle_id: u16,
        /// Locomotive.
        address: LocoAddress,
        /// Function number, 0..=127.
        function: u8,
        /// Function value.
        value: bool,
    },
    /// Throttle speed and/or direction change.
    ThrottleSetSpeedDirection {
        /// Throttle id.
        throttle_id: u16,
        /// Locomotive.
        address: LocoAddress,
        /// Speed, if set.
        speed: Option<SpeedStep>,
        /// Direction, if set.
        direction: Option<Direction>,
    },
    /// Ask for feature flags.
    GetFeatures,
    /// Feature flags.
    Features(Features),
    /// Ask for the info text.
    GetInfo,
    /// Info text.
    Info(heapless::String<MAX_INFO_LEN>),
}

impl Message {
    /// Info message; text is truncated to 255 bytes.
    pub fn info(text: &str) -> Self {
        let mut s = heapless::String::new();
        for c in text.chars() {
            if s.push(c).is_err() {
                break;
            }
        }
        Message::Info(s)
    }

    /// Opcode of this message.
    pub fn opcode(&self) -> OpCode {
        match self {
            Message::Heartbeat => OpCode::Heartbeat,
            Message::GetInputState { .. } => OpCode::GetInputState,
            Message::SetInputState { .. } => OpCode::SetInputState,
            Message::GetOutputState { .. } => OpCode::GetOutputState,
            Message::SetOutputState { .. } => OpCode::SetOutputState,
            Message::ThrottleSubUnsub { .. } => OpCode::ThrottleSubUnsub,
            Message::ThrottleSetFunction { .. } => OpCode::ThrottleSetFunction,
            Message::ThrottleSetSpeedDirection { .. } => OpCode::ThrottleSetSpeedDirection,
            Message::GetFeatures => OpCode::GetFeatures,
            Message::Features(_) => OpCode::Features,
            Message::GetInfo => OpCode::GetInfo,
            Message::Info(_) => OpCode::Info,
        }
    }

    /// Encode into a frame with a valid checksum.
    pub fn to_frame(&self) -> Frame {
        let opcode = self.opcode() as u8;
        let mut data: heapless::Vec<u8, MAX_DATA_LEN> = heapless::Vec::new();
        // capacities below are fixed by the opcode table, pushes cannot fail
        let _ = match self {
            Message::Heartbeat | Message::GetFeatures | Message::GetInfo => Ok(()),
            Message::GetInputState { address } | Message::GetOutputState { address } => {
                data.extend_from_slice(&address.to_be_bytes())
            }
            Message::SetInputState { address, state }
            | Message::SetOutputState { address, state } => {
                let [hi, lo] = address.to_be_bytes();
                data.extend_from_slice(&[hi, lo, state.to_u8()])
            }
            Message::ThrottleSubUnsub {
                throttle_id,
                address,
                subscribe,
            } => {
                let [ih, il] = throttle_id.to_be_bytes();
                let [ah, al] = address.encode(*subscribe);
                data.extend_from_slice(&[ih, il, ah, al])
            }
            Message::ThrottleSetFunction {
                throttle_id,
                address,
                function,
                value,
            } => {
                let [ih, il] = throttle_id.to_be_bytes();
                let [ah, al] = address.encode(false);
                let mut f = function & FUNCTION_NUMBER_MASK;
                if *value {
                    f |= FUNCTION_ON;
                }
                data.extend_from_slice(&[ih, il, ah, al, f])
            }
            Message::ThrottleSetSpeedDirection {
                throttle_id,
                address,
                speed,
                direction,
            } => {
                let [ih, il] = throttle_id.to_be_bytes();
                let [ah, al] = address.encode(false);
                let mut flags = 0;
                let (step, max) = match speed {
                    Some(s) => {
                        flags |= SPEED_SET;
                        (s.step, s.max)
                    }
                    None => (0, 0),
                };
                match direction {
                    Some(Direction::Forward) => flags |= DIRECTION_SET | DIRECTION_FORWARD,
                    Some(Direction::Reverse) => flags |= DIRECTION_SET,
                    Some(Direction::Unknown) | None => {}
                }
                data.extend_from_slice(&[ih, il, ah, al, step, max, flags])
            }
            Message::Features(features) => data.extend_from_slice(&features.0),
            Message::Info(text) => data.extend_from_slice(text.as_bytes()),
        };

        match Frame::new(opcode, &data) {
            Some(frame) => frame,
            None => unreachable_frame(opcode),
        }
    }

    /// Parse a frame. Checksum is not checked here.
    pub fn from_frame(frame: &Frame) -> Option<Self> {
        let opcode = OpCode::from_u8(frame.opcode())?;
        let d = frame.data();
        let be = |i: usize| u16::from_be_bytes([d[i], d[i + 1]]);
        Some(match opcode {
            OpCode::Heartbeat => Message::Heartbeat,
            OpCode::GetInputState => Message::GetInputState { address: be(0) },
            OpCode::SetInputState => Message::SetInputState {
                address: be(0),
                state: IoState::from_u8(d[2]),
            },
            OpCode::GetOutputState => Message::GetOutputState { address: be(0) },
            OpCode::SetOutputState => Message::SetOutputState {
                address: be(0),
                state: IoState::from_u8(d[2]),
            },
            OpCode::ThrottleSubUnsub => {
                let (address, subscribe) = LocoAddress::decode([d[2], d[3]]);
                Message::ThrottleSubUnsub {
                    throttle_id: be(0),
                    address,
                    subscribe,
                }
            }
            OpCode::ThrottleSetFunction => Message::ThrottleSetFunction {
                throttle_id: be(0),
                address: LocoAddress::decode([d[2], d[3]]).0,
                function: d[4] & FUNCTION_NUMBER_MASK,
                value: d[4] & FUNCTION_ON != 0,
            },
            OpCode::ThrottleSetSpeedDirection => {
                let flags = d[6];
                Message::ThrottleSetSpeedDirection {
                    throttle_id: be(0),
                    address: LocoAddress::decode([d[2], d[3]]).0,
                    speed: (flags & SPEED_SET != 0).then_some(SpeedStep {
                        step: d[4],
                        max: d[5],
                    }),
                    direction: (flags & DIRECTION_SET != 0).then_some(
                        if flags & DIRECTION_FORWARD != 0 {
                            Direction::Forward
                        } else {
                            Direction::Reverse
                        },
                    ),
                }
            }
            OpCode::GetFeatures => Message::GetFeatures,
            OpCode::Features => Message::Features(Features([d[0], d[1], d[2], d[3]])),
            OpCode::GetInfo => Message::GetInfo,
            OpCode::Info => Message::info(&String::from_utf8_lossy(d)),
        })
    }
}

#[cold]
fn unreachable_frame(opcode: u8) -> Frame {
    // every opcode above encodes a data length that matches its nibble
    tracing::error!("internal encoding error for opcode 0x{:02X}", opcode);
    Frame {
        bytes: heapless::Vec::from_slice(&[0x00, 0x00]).unwrap_or_default(),
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Message::Heartbeat => f.write_str("Heartbeat"),
            Message::GetInputState { address } => write!(f, "GetInputState address={}", address),
            Message::SetInputState { address, state } => {
                write!(f, "SetInputState address={} state={:?}", address, state)
            }
            Message::GetOutputState { address } => write!(f, "GetOutputState address={}", address),
            Message::SetOutputState { address, state } => {
                write!(f, "SetOutputState address={} state={:?}", address, state)
            }
            Message::ThrottleSubUnsub {
                throttle_id,
                address,
                subscribe,
            } => write!(
                f,
                "ThrottleSubUnsub throttle={} address={} {}",
                throttle_id,
                address,
                if *subscribe { "subscribe" } else { "unsubscribe" }
            ),
            Message::ThrottleSetFunction {
                throttle_id,
                address,
                function,
                value,
            } => write!(
                f,
                "ThrottleSetFunction throttle={} address={} F{}={}",
                throttle_id, address, function, value
            ),
            Message::ThrottleSetSpeedDirection {
                throttle_id,
                address,
                speed,
                direction,
            } => {
                write!(f, "ThrottleSetSpeedDirection throttle={} address={}", throttle_id, address)?;
                match speed {
                    Some(s) if s.is_emergency_stop() => f.write_str(" estop")?,
                    Some(s) => write!(f, " speed={}/{}", s.step, s.max)?,
                    None => {}
                }
                if let Some(d) = direction {
                    write!(f, " direction={}", d)?;
                }
                Ok(())
            }
            Message::GetFeatures => f.write_str("GetFeatures"),
            Message::Features(features) => write!(
                f,
                "Features input={} output={} throttle={}",
                features.has_input(),
                features.has_output(),
                features.has_throttle()
            ),
            Message::GetInfo => f.write_str("GetInfo"),
            Message::Info(text) => write!(f, "Info \"{}\"", text),
        }
    }
}

// ============================================================================
// Codec
// ============================================================================

/// [`FrameCodec`] for DIY byte streams.
#[derive(Debug, Clone, Copy, Default)]
pub struct DiyCodec;

impl FrameCodec for DiyCodec {
    type Message = Message;
    const MAX_FRAME_LEN: usize = MAX_FRAME_LEN;

    fn encode(message: &Message, out: &mut Vec<u8>) {
        out.extend_from_slice(message.to_frame().as_bytes());
    }

    fn decode(bytes: &[u8]) -> Decoded<Message> {
        let Some(&first) = bytes.first() else {
            return Decoded::Incomplete;
        };
        if OpCode::from_u8(first).is_none() {
            return Decoded::Invalid;
        }
        let Some(size) = frame_size(bytes) else {
            return Decoded::Incomplete;
        };
        if bytes.len() < size {
            return Decoded::Incomplete;
        }
        let Some(frame) = Frame::from_bytes(bytes) else {
            return Decoded::Invalid;
        };
        if !frame.is_checksum_valid() {
            return Decoded::Invalid;
        }
        match Message::from_frame(&frame) {
            Some(message) => Decoded::Frame { message, len: size },
            None => Decoded::Invalid,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(m: &Message) -> Message {
        let mut bytes = Vec::new();
        DiyCodec::encode(m, &mut bytes);
        match DiyCodec::decode(&bytes) {
            Decoded::Frame { message, len } => {
                assert_eq!(len, bytes.len());
                message
            }
            other => panic!("decode failed: {:?}", other),
        }
    }

    // =========================================================================
    // Wire layout
    // =========================================================================

    #[test]
    fn heartbeat_bytes() {
        assert_eq!(Message::Heartbeat.to_frame().as_bytes(), &[0x00, 0x00]);
    }

    #[test]
    fn set_output_state_bytes() {
        let m = Message::SetOutputState {
            address: 0x0102,
            state: IoState::True,
        };
        assert_eq!(
            m.to_frame().as_bytes(),
            &[0x23, 0x01, 0x02, 0x02, 0x23 ^ 0x01 ^ 0x02 ^ 0x02]
        );
    }

    #[test]
    fn speed_direction_bytes() {
        let m = Message::ThrottleSetSpeedDirection {
            throttle_id: 7,
            address: LocoAddress::new(1234, true),
            speed: Some(SpeedStep { step: 10, max: 126 }),
            direction: Some(Direction::Forward),
        };
        let frame = m.to_frame();
        let b = frame.as_bytes();
        assert_eq!(b.len(), 9);
        assert_eq!(&b[..8], &[0x37, 0x00, 0x07, 0x84, 0xD2, 10, 126, 0xC1]);
        assert!(frame.is_checksum_valid());
    }

    #[test]
    fn info_uses_length_byte() {
        let frame = Message::info("abc").to_frame();
        assert_eq!(&frame.as_bytes()[..5], &[0xFF, 3, b'a', b'b', b'c']);
        assert_eq!(frame.size(), 6);
        assert_eq!(frame.data(), b"abc");
    }

    #[test]
    fn frame_size_from_header() {
        assert_eq!(frame_size(&[0x00]), Some(2));
        assert_eq!(frame_size(&[0x13]), Some(5));
        assert_eq!(frame_size(&[0xFF]), None);
        assert_eq!(frame_size(&[0xFF, 4]), Some(7));
        assert_eq!(frame_size(&[]), None);
    }

    #[test]
    fn frame_new_rejects_wrong_length() {
        assert!(Frame::new(0x13, &[1, 2]).is_none());
        assert!(Frame::new(0x13, &[1, 2, 3]).is_some());
    }

    // =========================================================================
    // Round trips
    // =========================================================================

    #[test]
    fn messages_roundtrip() {
        let messages = [
            Message::Heartbeat,
            Message::GetInputState { address: 65535 },
            Message::SetInputState {
                address: 1,
                state: IoState::Invalid,
            },
            Message::ThrottleSubUnsub {
                throttle_id: 0xBEEF,
                address: LocoAddress::new(3, false),
                subscribe: true,
            },
            Message::ThrottleSetFunction {
                throttle_id: 1,
                address: LocoAddress::new(0x3FFF, true),
                function: 28,
                value: true,
            },
            Message::ThrottleSetSpeedDirection {
                throttle_id: 2,
                address: LocoAddress::new(5, false),
                speed: None,
                direction: Some(Direction::Reverse),
            },
            Message::Features(Features::new(true, false, true)),
            Message::GetInfo,
            Message::info("DIY v1.0"),
        ];
        for m in &messages {
            assert_eq!(&roundtrip(m), m);
        }
    }

    // =========================================================================
    // Checksum and decoding
    // =========================================================================

    #[test]
    fn flipped_bit_invalidates_checksum() {
        let mut frame = Message::SetInputState {
            address: 42,
            state: IoState::True,
        }
        .to_frame();
        frame.as_bytes_mut()[2] ^= 0x10;
        assert!(!frame.is_checksum_valid());
        frame.update_checksum();
        assert!(frame.is_checksum_valid());
    }

    #[test]
    fn decode_incomplete_and_invalid() {
        assert_eq!(DiyCodec::decode(&[]), Decoded::Incomplete);
        assert_eq!(DiyCodec::decode(&[0x13, 0x00]), Decoded::Incomplete);
        assert_eq!(DiyCodec::decode(&[0xFF]), Decoded::Incomplete);
        assert_eq!(DiyCodec::decode(&[0x99, 0x00]), Decoded::Invalid);
        assert_eq!(DiyCodec::decode(&[0x00, 0x01]), Decoded::Invalid);
    }

    #[test]
    fn unknown_state_reads_invalid() {
        let frame = Frame::new(0x13, &[0, 5, 9]).unwrap();
        assert_eq!(
            Message::from_frame(&frame),
            Some(Message::SetInputState {
                address: 5,
                state: IoState::Invalid
            })
        );
    }

    #[test]
    fn speed_step_throttle() {
        assert_eq!(SpeedStep { step: 63, max: 126 }.throttle(), 0.5);
        assert_eq!(SpeedStep { step: 200, max: 100 }.throttle(), 1.0);
        assert!(SpeedStep::EMERGENCY_STOP.is_emergency_stop());
        assert_eq!(SpeedStep::from_throttle(0.5, 126), SpeedStep { step: 63, max: 126 });
    }

    #[test]
    fn display_formats() {
        assert_eq!(Message::Heartbeat.to_string(), "Heartbeat");
        assert_eq!(
            Message::GetInputState { address: 3 }.to_string(),
            "GetInputState address=3"
        );
    }
}
