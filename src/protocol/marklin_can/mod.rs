//! Märklin CAN protocol.
//!
//! The bus of the Central Station 2/3, Gleisbox and Mobile Station 2,
//! reached over TCP or UDP (13-byte frames, see [`network`]). Nodes are
//! found with a ping broadcast and describe themselves through status
//! data descriptors; the locomotive list is downloaded as a compressed
//! config data stream.
//!
//! | Module | Contents |
//! |--------|----------|
//! | [`message`] | CAN frames and typed views |
//! | [`network`] | 13-byte TCP/UDP framing |
//! | [`uid`] | UID ranges for locomotives and accessories |
//! | [`status_data`] | node descriptors |
//! | [`stream`] | config data stream reassembly |
//! | [`locomotive_list`] | `lokomotive.cs2` parsing |
//! | [`node`] | node registry |
//! | [`kernel`] | the worker-side [`CanEngine`] |
//! | [`simulation`] | an in-process bus |

pub mod kernel;
pub mod locomotive_list;
pub mod message;
pub mod network;
pub mod node;
pub mod simulation;
pub mod status_data;
pub mod stream;
pub mod uid;

pub use kernel::{CanCommand, CanEngine, CanNotice, CanTimer, PowerState};
pub use locomotive_list::{Function, FunctionRole, Locomotive, LocomotiveList};
pub use message::{calc_hash, Command, Message, SystemSubCommand};
pub use network::NetworkCodec;
pub use node::{DeviceId, Node, NodeRegistry};
pub use simulation::{CanSimulation, SimulationOptions};

use crate::config::CanConfig;
use crate::error::CommandError;
use crate::kernel::{Kernel, KernelState, Protocol};
use crate::traits::{DecoderChangeFlags, DecoderState, InputChannel, OutputChannel};

/// Protocol marker for [`Kernel<MarklinCan>`].
#[derive(Debug)]
pub struct MarklinCan;

impl Protocol for MarklinCan {
    const NAME: &'static str = "marklin_can";

    const STARTUP: &'static [KernelState] = &[
        KernelState::Initial,
        KernelState::DiscoverNodes,
        KernelState::ReadNodeDescriptors,
        KernelState::ConfigureDevice,
        KernelState::DownloadCatalog,
        KernelState::Started,
    ];

    const INPUT_CHANNELS: &'static [(InputChannel, u32, u32)] =
        &[(InputChannel::S88, 1, kernel::S88_CONTACT_MAX)];

    const OUTPUT_CHANNELS: &'static [(OutputChannel, u32, u32)] = &[
        (OutputChannel::AccessoryMotorola, 1, 2048),
        (OutputChannel::AccessoryDcc, 1, 4096),
        (OutputChannel::AccessorySelectrix, 1, 2048),
    ];

    type Message = Message;
    type Config = CanConfig;
    type Command = CanCommand;
    type Notice = CanNotice;
    type Timer = CanTimer;
    type Engine = CanEngine;

    fn engine(config: CanConfig, _simulation: bool) -> CanEngine {
        CanEngine::new(config)
    }

    fn is_keepalive(message: &Message) -> bool {
        message.command() == Some(Command::Ping)
    }
}

impl Kernel<MarklinCan> {
    /// Switch accessory output `address` on `channel`.
    pub fn set_output(
        &self,
        channel: OutputChannel,
        address: u32,
        value: bool,
    ) -> Result<(), CommandError> {
        Self::check_output_address(channel, address)?;
        self.post(CanCommand::SetOutput {
            channel,
            address,
            value,
        })
    }

    /// Send a decoder change to the bus.
    pub fn decoder_changed(
        &self,
        state: &DecoderState,
        flags: DecoderChangeFlags,
        function: u8,
    ) -> Result<(), CommandError> {
        let uid = uid::locomotive_uid(state.key).ok_or(CommandError::UnknownDecoder)?;
        self.post(CanCommand::DecoderChanged {
            uid,
            state: state.clone(),
            flags,
            function,
        })
    }

    /// Track power on.
    pub fn system_go(&self) -> Result<(), CommandError> {
        self.post(CanCommand::System(SystemSubCommand::SystemGo))
    }

    /// Track power off.
    pub fn system_stop(&self) -> Result<(), CommandError> {
        self.post(CanCommand::System(SystemSubCommand::SystemStop))
    }

    /// Stop all locomotives, keep track power.
    pub fn system_halt(&self) -> Result<(), CommandError> {
        self.post(CanCommand::System(SystemSubCommand::SystemHalt))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::{DecoderKey, DecoderProtocol};

    #[test]
    fn address_ranges() {
        assert_eq!(MarklinCan::input_address_range(InputChannel::S88), Some((1, 16384)));
        assert_eq!(
            MarklinCan::output_address_range(OutputChannel::AccessoryDcc),
            Some((1, 4096))
        );
        assert_eq!(MarklinCan::output_address_range(OutputChannel::Output), None);
    }

    #[test]
    fn rejects_out_of_range_accessory() {
        assert_eq!(
            Kernel::<MarklinCan>::check_output_address(OutputChannel::AccessoryMotorola, 2049),
            Err(CommandError::AddressOutOfRange {
                address: 2049,
                min: 1,
                max: 2048
            })
        );
        assert_eq!(
            Kernel::<MarklinCan>::check_output_address(OutputChannel::EcosObject, 1),
            Err(CommandError::UnsupportedChannel)
        );
    }

    #[test]
    fn decoder_without_uid_is_rejected() {
        let kernel = Kernel::<MarklinCan>::new(
            CanConfig::default(),
            CanSimulation::new(),
            crate::logging::Logger::new("cs2"),
        );
        let state = DecoderState::new(DecoderKey::new(DecoderProtocol::Motorola, 2000));
        assert_eq!(
            kernel.decoder_changed(&state, DecoderChangeFlags::THROTTLE, 0),
            Err(CommandError::UnknownDecoder)
        );
    }

    #[test]
    fn ping_is_keepalive() {
        assert!(MarklinCan::is_keepalive(&Message::ping(1)));
        assert!(!MarklinCan::is_keepalive(&Message::system_go()));
    }
}
