//! Controller bridge between kernels and the domain model.
//!
//! Kernels never touch decoders, inputs or outputs directly. On the
//! application thread they call the controller traits below, which the
//! domain model implements. The reverse direction (domain → kernel) goes
//! through kernel methods such as `set_output` and `decoder_changed`.
//!
//! | Trait | Kernel → domain | Domain queries |
//! |-------|-----------------|----------------|
//! | [`DecoderController`] | [`update_decoder`](DecoderController::update_decoder) | [`get_decoder`](DecoderController::get_decoder) |
//! | [`InputController`] | [`update_input_value`](InputController::update_input_value) | [`input_addresses`](InputController::input_addresses) |
//! | [`OutputController`] | [`update_output_value`](OutputController::update_output_value) | address allocation and validation |

use core::fmt;
use core::ops::{BitOr, BitOrAssign};

use serde::{Deserialize, Serialize};

// ============================================================================
// Values
// ============================================================================

/// Last known value of a binary input or output.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TriState {
    /// Not reported yet.
    #[default]
    Undefined,
    /// Off / free / inactive.
    False,
    /// On / occupied / active.
    True,
}

impl From<bool> for TriState {
    fn from(value: bool) -> Self {
        if value {
            TriState::True
        } else {
            TriState::False
        }
    }
}

impl TriState {
    /// `Some(bool)` once the value is known.
    pub const fn as_bool(self) -> Option<bool> {
        match self {
            TriState::Undefined => None,
            TriState::False => Some(false),
            TriState::True => Some(true),
        }
    }
}

/// Locomotive travel direction as reported by a decoder.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Forward.
    Forward,
    /// Reverse.
    Reverse,
    /// Never reported.
    #[default]
    Unknown,
}

impl Direction {
    /// The opposite direction; `Unknown` stays `Unknown`.
    pub const fn inverted(self) -> Self {
        match self {
            Direction::Forward => Direction::Reverse,
            Direction::Reverse => Direction::Forward,
            Direction::Unknown => Direction::Unknown,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Direction::Forward => "forward",
            Direction::Reverse => "reverse",
            Direction::Unknown => "unknown",
        })
    }
}

// ============================================================================
// Decoders
// ============================================================================

/// Track protocol spoken by a locomotive decoder.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum DecoderProtocol {
    /// Märklin Motorola.
    Motorola,
    /// DCC with a short (1..=127) address.
    DccShort,
    /// DCC with a long address.
    DccLong,
    /// Märklin mfx.
    Mfx,
    /// Selectrix.
    Selectrix,
}

impl DecoderProtocol {
    /// Picks short or long DCC by address.
    pub const fn dcc(address: u16) -> Self {
        if address > 127 {
            DecoderProtocol::DccLong
        } else {
            DecoderProtocol::DccShort
        }
    }

    /// True for both DCC variants.
    pub const fn is_dcc(self) -> bool {
        matches!(self, DecoderProtocol::DccShort | DecoderProtocol::DccLong)
    }
}

/// Identifies one decoder in the domain model.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DecoderKey {
    /// Track protocol.
    pub protocol: DecoderProtocol,
    /// Protocol address.
    pub address: u16,
}

impl DecoderKey {
    /// Creates a key.
    pub const fn new(protocol: DecoderProtocol, address: u16) -> Self {
        Self { protocol, address }
    }
}

impl fmt::Display for DecoderKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}:{}", self.protocol, self.address)
    }
}

/// Snapshot of a decoder, copied out of the domain model.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DecoderState {
    /// Which decoder.
    pub key: DecoderKey,
    /// Throttle position, 0.0 to 1.0.
    pub throttle: f32,
    /// Travel direction.
    pub direction: Direction,
    /// Emergency stop latched.
    pub emergency_stop: bool,
    /// Number of speed steps the decoder uses.
    pub speed_steps: u8,
    /// Function number and value pairs.
    pub functions: Vec<(u8, bool)>,
}

impl DecoderState {
    /// A stopped decoder with no functions.
    pub fn new(key: DecoderKey) -> Self {
        Self {
            key,
            throttle: 0.0,
            direction: Direction::Forward,
            emergency_stop: false,
            speed_steps: 126,
            functions: Vec::new(),
        }
    }

    /// Value of function `number`, if the decoder has it.
    pub fn function(&self, number: u8) -> Option<bool> {
        self.functions
            .iter()
            .find(|(n, _)| *n == number)
            .map(|(_, v)| *v)
    }

    /// Apply a kernel update to this snapshot.
    pub fn apply(&mut self, update: &DecoderUpdate) {
        if let Some(throttle) = update.throttle {
            self.throttle = throttle.clamp(0.0, 1.0);
        }
        if let Some(direction) = update.direction {
            self.direction = direction;
        }
        if let Some(estop) = update.emergency_stop {
            self.emergency_stop = estop;
        }
        if let Some((number, value)) = update.function {
            match self.functions.iter_mut().find(|(n, _)| *n == number) {
                Some(f) => f.1 = value,
                None => self.functions.push((number, value)),
            }
        }
    }
}

/// What changed on a decoder, for `decoder_changed` calls.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct DecoderChangeFlags(u8);

impl DecoderChangeFlags {
    /// Nothing.
    pub const NONE: Self = Self(0);
    /// Emergency stop toggled.
    pub const EMERGENCY_STOP: Self = Self(0x01);
    /// Direction changed.
    pub const DIRECTION: Self = Self(0x02);
    /// Throttle moved.
    pub const THROTTLE: Self = Self(0x04);
    /// Speed step count changed.
    pub const SPEED_STEPS: Self = Self(0x08);
    /// A function value changed; see the function number argument.
    pub const FUNCTION_VALUE: Self = Self(0x40);

    /// True if every bit of `other` is set.
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// True if any bit of `other` is set.
    pub const fn intersects(self, other: Self) -> bool {
        self.0 & other.0 != 0
    }

    /// Raw bits.
    pub const fn bits(self) -> u8 {
        self.0
    }
}

impl BitOr for DecoderChangeFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for DecoderChangeFlags {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

/// State reported by the hardware for one decoder.
///
/// Only the fields that are `Some` changed.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct DecoderUpdate {
    /// New throttle position, 0.0 to 1.0.
    pub throttle: Option<f32>,
    /// New direction.
    pub direction: Option<Direction>,
    /// Emergency stop set or released.
    pub emergency_stop: Option<bool>,
    /// Function number and value.
    pub function: Option<(u8, bool)>,
}

impl DecoderUpdate {
    /// Throttle change.
    pub fn throttle(value: f32) -> Self {
        Self {
            throttle: Some(value),
            ..Self::default()
        }
    }

    /// Direction change.
    pub fn direction(direction: Direction) -> Self {
        Self {
            direction: Some(direction),
            ..Self::default()
        }
    }

    /// Emergency stop.
    pub fn emergency_stop(value: bool) -> Self {
        Self {
            emergency_stop: Some(value),
            ..Self::default()
        }
    }

    /// Function change.
    pub fn function(number: u8, value: bool) -> Self {
        Self {
            function: Some((number, value)),
            ..Self::default()
        }
    }

    /// True if nothing is set.
    pub fn is_empty(&self) -> bool {
        self.throttle.is_none()
            && self.direction.is_none()
            && self.emergency_stop.is_none()
            && self.function.is_none()
    }
}

// ============================================================================
// Channels
// ============================================================================

/// Input address space.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum InputChannel {
    /// Generic inputs.
    Input,
    /// s88 feedback bus.
    S88,
}

/// Output address space.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum OutputChannel {
    /// Generic outputs.
    Output,
    /// Accessory decoders, protocol chosen by the command station.
    Accessory,
    /// Motorola accessory decoders.
    AccessoryMotorola,
    /// DCC accessory decoders.
    AccessoryDcc,
    /// Selectrix accessory decoders.
    AccessorySelectrix,
    /// DCC extended accessory packets.
    DccExt,
    /// Turnout objects.
    Turnout,
    /// ECoS objects, addressed by object id instead of address.
    EcosObject,
}

impl OutputChannel {
    /// Accessory channels drive paired outputs.
    pub const fn is_accessory(self) -> bool {
        matches!(
            self,
            OutputChannel::Accessory
                | OutputChannel::AccessoryMotorola
                | OutputChannel::AccessoryDcc
                | OutputChannel::AccessorySelectrix
        )
    }

    /// Channels that address a single object by id.
    pub const fn uses_object_id(self) -> bool {
        matches!(self, OutputChannel::EcosObject)
    }
}

// ============================================================================
// Controller traits
// ============================================================================

/// Domain side of locomotive decoders.
pub trait DecoderController {
    /// Snapshot of the decoder with `key`, if the domain has one.
    fn get_decoder(&self, key: DecoderKey) -> Option<DecoderState>;

    /// Apply a hardware reported change. Returns false if there is no
    /// such decoder.
    fn update_decoder(&mut self, key: DecoderKey, update: &DecoderUpdate) -> bool;
}

/// Domain side of sensor inputs.
pub trait InputController {
    /// Addresses on `channel` that the domain has inputs for.
    fn input_addresses(&self, channel: InputChannel) -> Vec<u32>;

    /// Store a value reported by the hardware.
    fn update_input_value(&mut self, channel: InputChannel, address: u32, value: TriState);
}

/// Domain side of outputs.
pub trait OutputController {
    /// Channels this controller handles.
    fn output_channels(&self) -> &[OutputChannel];

    /// Inclusive address range of `channel`, `None` for object id channels
    /// or unknown channels.
    fn output_address_min_max(&self, channel: OutputChannel) -> Option<(u32, u32)>;

    /// Addresses on `channel` already claimed by outputs.
    fn output_addresses(&self, channel: OutputChannel) -> Vec<u32>;

    /// True if `id` names an object on an object id channel.
    fn is_output_id(&self, _channel: OutputChannel, _id: u32) -> bool {
        false
    }

    /// In range and not claimed yet.
    fn is_output_address_available(&self, channel: OutputChannel, address: u32) -> bool {
        match self.output_address_min_max(channel) {
            Some((min, max)) if (min..=max).contains(&address) => {
                !self.output_addresses(channel).contains(&address)
            }
            _ => false,
        }
    }

    /// Lowest free address on `channel`.
    fn get_unused_output_address(&self, channel: OutputChannel) -> Option<u32> {
        let (min, max) = self.output_address_min_max(channel)?;
        let used = self.output_addresses(channel);
        (min..=max).find(|a| !used.contains(a))
    }

    /// Store a value reported by the hardware.
    fn update_output_value(&mut self, channel: OutputChannel, address: u32, value: TriState);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tristate_from_bool() {
        assert_eq!(TriState::from(true), TriState::True);
        assert_eq!(TriState::from(false), TriState::False);
        assert_eq!(TriState::Undefined.as_bool(), None);
        assert_eq!(TriState::True.as_bool(), Some(true));
    }

    #[test]
    fn dcc_protocol_by_address() {
        assert_eq!(DecoderProtocol::dcc(3), DecoderProtocol::DccShort);
        assert_eq!(DecoderProtocol::dcc(127), DecoderProtocol::DccShort);
        assert_eq!(DecoderProtocol::dcc(128), DecoderProtocol::DccLong);
    }

    #[test]
    fn change_flags_combine() {
        let flags = DecoderChangeFlags::THROTTLE | DecoderChangeFlags::DIRECTION;
        assert!(flags.contains(DecoderChangeFlags::THROTTLE));
        assert!(flags.contains(DecoderChangeFlags::DIRECTION));
        assert!(!flags.contains(DecoderChangeFlags::FUNCTION_VALUE));
    }

    #[test]
    fn change_flags_contains_needs_every_bit() {
        let flags = DecoderChangeFlags::THROTTLE;
        let speed = DecoderChangeFlags::THROTTLE | DecoderChangeFlags::EMERGENCY_STOP;
        assert!(!flags.contains(speed));
        assert!(flags.intersects(speed));
        assert!(!flags.intersects(DecoderChangeFlags::DIRECTION));
        assert!(flags.contains(DecoderChangeFlags::NONE));
        assert!((flags | DecoderChangeFlags::EMERGENCY_STOP).contains(speed));
    }

    #[test]
    fn decoder_state_apply() {
        let mut state = DecoderState::new(DecoderKey::new(DecoderProtocol::Mfx, 5));
        state.apply(&DecoderUpdate::throttle(1.5));
        assert_eq!(state.throttle, 1.0);
        state.apply(&DecoderUpdate::function(3, true));
        state.apply(&DecoderUpdate::function(3, false));
        assert_eq!(state.function(3), Some(false));
        assert_eq!(state.functions.len(), 1);
    }

    #[test]
    fn accessory_channels() {
        assert!(OutputChannel::AccessoryDcc.is_accessory());
        assert!(!OutputChannel::EcosObject.is_accessory());
        assert!(OutputChannel::EcosObject.uses_object_id());
    }
}
