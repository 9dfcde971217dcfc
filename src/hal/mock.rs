//! Mock controllers for testing kernels without a domain model.
//!
//! Each mock records what the kernel told it, so tests can assert on the
//! public fields after pumping events.
//!
//! # Available Mocks
//!
//! | Mock | Trait | Purpose |
//! |------|-------|---------|
//! | [`MockDecoderController`] | [`DecoderController`] | Decoder table plus update log |
//! | [`MockInputController`] | [`InputController`] | Known addresses plus reported values |
//! | [`MockOutputController`] | [`OutputController`] | Address ranges, claimed addresses, reported values |
//!
//! # Example
//!
//! ```rust
//! use rs_trackside::hal::MockOutputController;
//! use rs_trackside::protocol::diy::Diy;
//! use rs_trackside::traits::{OutputChannel, OutputController, TriState};
//!
//! let mut outputs = MockOutputController::for_protocol::<Diy>().with_addresses(OutputChannel::Output, &[1, 2]);
//! assert_eq!(outputs.get_unused_output_address(OutputChannel::Output), Some(3));
//!
//! outputs.update_output_value(OutputChannel::Output, 2, TriState::True);
//! assert_eq!(outputs.value(OutputChannel::Output, 2), TriState::True);
//! ```

use std::collections::{BTreeMap, HashMap};

use crate::kernel::Protocol;
use crate::traits::{
    DecoderController, DecoderKey, DecoderState, DecoderUpdate, InputChannel, InputController,
    OutputChannel, OutputController, TriState,
};

// ============================================================================
// Decoders
// ============================================================================

/// Mock decoder controller.
///
/// # Example
///
/// ```rust
/// use rs_trackside::hal::MockDecoderController;
/// use rs_trackside::traits::{DecoderController, DecoderKey, DecoderProtocol, DecoderUpdate};
///
/// let key = DecoderKey::new(DecoderProtocol::Mfx, 5);
/// let mut decoders = MockDecoderController::new().with_decoder(key);
///
/// assert!(decoders.update_decoder(key, &DecoderUpdate::throttle(0.5)));
/// assert_eq!(decoders.get_decoder(key).unwrap().throttle, 0.5);
/// assert_eq!(decoders.updates.len(), 1);
/// ```
#[derive(Debug, Default)]
pub struct MockDecoderController {
    /// Known decoders.
    pub decoders: BTreeMap<DecoderKey, DecoderState>,
    /// Every update received, including ones for unknown decoders.
    pub updates: Vec<(DecoderKey, DecoderUpdate)>,
}

impl MockDecoderController {
    /// No decoders.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a decoder in its default state.
    pub fn with_decoder(mut self, key: DecoderKey) -> Self {
        self.decoders.insert(key, DecoderState::new(key));
        self
    }

    /// Add or replace a decoder.
    pub fn insert(&mut self, state: DecoderState) {
        self.decoders.insert(state.key, state);
    }
}

impl DecoderController for MockDecoderController {
    fn get_decoder(&self, key: DecoderKey) -> Option<DecoderState> {
        self.decoders.get(&key).cloned()
    }

    fn update_decoder(&mut self, key: DecoderKey, update: &DecoderUpdate) -> bool {
        self.updates.push((key, update.clone()));
        match self.decoders.get_mut(&key) {
            Some(state) => {
                state.apply(update);
                true
            }
            None => false,
        }
    }
}

// ============================================================================
// Inputs
// ============================================================================

/// Mock input controller.
#[derive(Debug, Default)]
pub struct MockInputController {
    /// Addresses the domain has inputs for.
    pub addresses: BTreeMap<InputChannel, Vec<u32>>,
    /// Last value per input.
    pub values: HashMap<(InputChannel, u32), TriState>,
    /// Every value received, in order.
    pub updates: Vec<(InputChannel, u32, TriState)>,
}

impl MockInputController {
    /// No inputs.
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim `addresses` on `channel`.
    pub fn with_addresses(mut self, channel: InputChannel, addresses: &[u32]) -> Self {
        self.addresses
            .entry(channel)
            .or_default()
            .extend_from_slice(addresses);
        self
    }

    /// Last value of an input, `Undefined` if never reported.
    pub fn value(&self, channel: InputChannel, address: u32) -> TriState {
        self.values
            .get(&(channel, address))
            .copied()
            .unwrap_or_default()
    }
}

impl InputController for MockInputController {
    fn input_addresses(&self, channel: InputChannel) -> Vec<u32> {
        self.addresses.get(&channel).cloned().unwrap_or_default()
    }

    fn update_input_value(&mut self, channel: InputChannel, address: u32, value: TriState) {
        self.values.insert((channel, address), value);
        self.updates.push((channel, address, value));
    }
}

// ============================================================================
// Outputs
// ============================================================================

/// Mock output controller.
#[derive(Debug, Default)]
pub struct MockOutputController {
    /// Channels handled.
    pub channels: Vec<OutputChannel>,
    /// Address range per channel.
    pub ranges: BTreeMap<OutputChannel, (u32, u32)>,
    /// Claimed addresses per channel.
    pub addresses: BTreeMap<OutputChannel, Vec<u32>>,
    /// Known object ids per object id channel.
    pub object_ids: BTreeMap<OutputChannel, Vec<u32>>,
    /// Last value per output.
    pub values: HashMap<(OutputChannel, u32), TriState>,
    /// Every value received, in order.
    pub updates: Vec<(OutputChannel, u32, TriState)>,
}

impl MockOutputController {
    /// Empty controller without channels.
    pub fn new() -> Self {
        Self::default()
    }

    /// Channels and ranges of protocol `P`.
    pub fn for_protocol<P: Protocol>() -> Self {
        let mut mock = Self::new();
        for &(channel, min, max) in P::OUTPUT_CHANNELS {
            mock.channels.push(channel);
            mock.ranges.insert(channel, (min, max));
        }
        mock
    }

    /// Add an object id channel knowing `ids`.
    pub fn with_object_channel(mut self, channel: OutputChannel, ids: &[u32]) -> Self {
        if !self.channels.contains(&channel) {
            self.channels.push(channel);
        }
        self.object_ids.insert(channel, ids.to_vec());
        self
    }

    /// Claim `addresses` on `channel`.
    pub fn with_addresses(mut self, channel: OutputChannel, addresses: &[u32]) -> Self {
        self.claim(channel, addresses);
        self
    }

    /// Claim `addresses` on `channel`.
    pub fn claim(&mut self, channel: OutputChannel, addresses: &[u32]) {
        self.addresses
            .entry(channel)
            .or_default()
            .extend_from_slice(addresses);
    }

    /// Last value of an output, `Undefined` if never reported.
    pub fn value(&self, channel: OutputChannel, address: u32) -> TriState {
        self.values
            .get(&(channel, address))
            .copied()
            .unwrap_or_default()
    }
}

impl OutputController for MockOutputController {
    fn output_channels(&self) -> &[OutputChannel] {
        &self.channels
    }

    fn output_address_min_max(&self, channel: OutputChannel) -> Option<(u32, u32)> {
        if channel.uses_object_id() {
            return None;
        }
        self.ranges.get(&channel).copied()
    }

    fn output_addresses(&self, channel: OutputChannel) -> Vec<u32> {
        self.addresses.get(&channel).cloned().unwrap_or_default()
    }

    fn is_output_id(&self, channel: OutputChannel, id: u32) -> bool {
        self.object_ids
            .get(&channel)
            .is_some_and(|ids| ids.contains(&id))
    }

    fn update_output_value(&mut self, channel: OutputChannel, address: u32, value: TriState) {
        self.values.insert((channel, address), value);
        self.updates.push((channel, address, value));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::marklin_can::MarklinCan;
    use crate::traits::DecoderProtocol;

    #[test]
    fn unknown_decoder_update_is_logged() {
        let mut decoders = MockDecoderController::new();
        let key = DecoderKey::new(DecoderProtocol::DccShort, 3);
        assert!(!decoders.update_decoder(key, &DecoderUpdate::emergency_stop(true)));
        assert_eq!(decoders.updates.len(), 1);
        assert!(decoders.get_decoder(key).is_none());
    }

    #[test]
    fn inputs_record_values() {
        let mut inputs = MockInputController::new().with_addresses(InputChannel::S88, &[1, 5]);
        assert_eq!(inputs.input_addresses(InputChannel::S88), vec![1, 5]);
        assert!(inputs.input_addresses(InputChannel::Input).is_empty());
        inputs.update_input_value(InputChannel::S88, 5, TriState::True);
        assert_eq!(inputs.value(InputChannel::S88, 5), TriState::True);
        assert_eq!(inputs.value(InputChannel::S88, 1), TriState::Undefined);
    }

    #[test]
    fn outputs_follow_protocol_ranges() {
        let outputs = MockOutputController::for_protocol::<MarklinCan>()
            .with_addresses(OutputChannel::AccessoryDcc, &[1, 2, 4]);
        assert_eq!(outputs.output_channels().len(), 3);
        assert_eq!(
            outputs.output_address_min_max(OutputChannel::AccessoryDcc),
            Some((1, 4096))
        );
        assert_eq!(
            outputs.get_unused_output_address(OutputChannel::AccessoryDcc),
            Some(3)
        );
        assert!(outputs.is_output_address_available(OutputChannel::AccessoryMotorola, 2048));
        assert!(!outputs.is_output_address_available(OutputChannel::AccessoryMotorola, 2049));
        assert!(!outputs.is_output_address_available(OutputChannel::AccessoryDcc, 4));
    }

    #[test]
    fn object_channel() {
        let outputs = MockOutputController::new().with_object_channel(OutputChannel::EcosObject, &[1000]);
        assert!(outputs.is_output_id(OutputChannel::EcosObject, 1000));
        assert!(!outputs.is_output_id(OutputChannel::EcosObject, 1001));
        assert_eq!(outputs.output_address_min_max(OutputChannel::EcosObject), None);
    }
}
