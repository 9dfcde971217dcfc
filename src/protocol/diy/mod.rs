//! Traintastic-DIY protocol.
//!
//! A small frame protocol for home-built interfaces over serial or TCP.
//! Devices report which features they have (inputs, outputs, throttles)
//! and the kernel only uses what was reported.
//!
//! | Module | Contents |
//! |--------|----------|
//! | [`message`] | frames, typed messages, [`DiyCodec`] |
//! | [`kernel`] | the worker-side [`DiyEngine`] |
//! | [`simulation`] | an in-process device |

pub mod kernel;
pub mod message;
pub mod simulation;

use tracing::{debug, warn};

pub use kernel::{DiyCommand, DiyEngine, DiyNotice, DiyTimer, SimulateInputAction};
pub use message::{DiyCodec, Features, Frame, IoState, LocoAddress, Message, OpCode, SpeedStep};
pub use simulation::{DiySimulation, SimulationOptions};

use crate::config::DiyConfig;
use crate::error::CommandError;
use crate::kernel::{AppContext, Kernel, KernelState, Protocol};
use crate::traits::{
    DecoderChangeFlags, DecoderKey, DecoderProtocol, DecoderState, DecoderUpdate, InputChannel,
    OutputChannel,
};

/// Default TCP port of DIY network interfaces.
pub const DEFAULT_TCP_PORT: u16 = 5550;

/// Protocol marker for [`Kernel<Diy>`].
#[derive(Debug)]
pub struct Diy;

impl Protocol for Diy {
    const NAME: &'static str = "diy";

    const STARTUP: &'static [KernelState] = &[
        KernelState::Initial,
        KernelState::DiscoverNodes,
        KernelState::ConfigureDevice,
        KernelState::DownloadCatalog,
        KernelState::Started,
    ];

    const INPUT_CHANNELS: &'static [(InputChannel, u32, u32)] = &[(InputChannel::Input, 1, 65535)];

    const OUTPUT_CHANNELS: &'static [(OutputChannel, u32, u32)] =
        &[(OutputChannel::Output, 1, 65535)];

    type Message = Message;
    type Config = DiyConfig;
    type Command = DiyCommand;
    type Notice = DiyNotice;
    type Timer = DiyTimer;
    type Engine = DiyEngine;

    fn engine(config: DiyConfig, _simulation: bool) -> DiyEngine {
        DiyEngine::new(config)
    }

    fn is_keepalive(message: &Message) -> bool {
        matches!(message, Message::Heartbeat)
    }

    fn on_notice(notice: &DiyNotice, app: &mut AppContext<'_, Self>) {
        match notice {
            DiyNotice::Features(features) => {
                if features.has_input() {
                    let addresses = wire_addresses(app.input_addresses(InputChannel::Input));
                    if !addresses.is_empty() {
                        app.post(DiyCommand::QueryInputs(addresses));
                    }
                }
                if features.has_output() {
                    let addresses = wire_addresses(app.output_addresses(OutputChannel::Output));
                    if !addresses.is_empty() {
                        app.post(DiyCommand::QueryOutputs(addresses));
                    }
                }
            }
            DiyNotice::InvalidInput(address) => {
                if app
                    .input_addresses(InputChannel::Input)
                    .contains(&(*address as u32))
                {
                    warn!("input {} is not available on the device", address);
                }
            }
            DiyNotice::InvalidOutput(address) => {
                if app
                    .output_addresses(OutputChannel::Output)
                    .contains(&(*address as u32))
                {
                    warn!("output {} is not available on the device", address);
                }
            }
            DiyNotice::ThrottleSubscribed {
                throttle_id,
                address,
            } => {
                app.post(DiyCommand::ThrottleSync {
                    throttle_id: *throttle_id,
                    address: *address,
                    state: find_decoder(app, *address),
                });
            }
            DiyNotice::ThrottleSpeedDirection {
                address,
                speed,
                direction,
                ..
            } => {
                let Some(decoder) = find_decoder(app, *address) else {
                    debug!("throttle speed for unknown locomotive {}", address);
                    return;
                };
                app.post(DiyCommand::ThrottleBind {
                    address: *address,
                    key: decoder.key,
                });
                let mut update = DecoderUpdate::default();
                match speed {
                    Some(speed) if speed.is_emergency_stop() => update.emergency_stop = Some(true),
                    Some(speed) => {
                        update.emergency_stop = Some(false);
                        update.throttle = Some(speed.throttle());
                    }
                    None => {}
                }
                update.direction = *direction;
                if !update.is_empty() {
                    app.update_decoder(decoder.key, &update);
                }
            }
            DiyNotice::ThrottleFunction {
                throttle_id,
                address,
                function,
                value,
            } => {
                let decoder = find_decoder(app, *address);
                if let Some(decoder) = &decoder {
                    app.post(DiyCommand::ThrottleBind {
                        address: *address,
                        key: decoder.key,
                    });
                }
                match decoder {
                    Some(decoder) if decoder.function(*function).is_some() => {
                        app.update_decoder(decoder.key, &DecoderUpdate::function(*function, *value));
                    }
                    _ => {
                        // unknown function: tell the throttle it is off
                        app.post(DiyCommand::ThrottleFunction {
                            throttle_id: *throttle_id,
                            address: *address,
                            function: *function,
                            value: false,
                        });
                    }
                }
            }
            DiyNotice::Info(_) | DiyNotice::ThrottleUnsubscribed { .. } => {}
        }
    }
}

fn wire_addresses(addresses: Vec<u32>) -> Vec<u16> {
    addresses
        .into_iter()
        .filter_map(|a| u16::try_from(a).ok())
        .filter(|a| *a >= 1)
        .collect()
}

/// Decoder for a throttle address: the matching DCC variant first, then
/// any other protocol using the same number.
fn find_decoder(app: &AppContext<'_, Diy>, address: LocoAddress) -> Option<DecoderState> {
    let order = if address.is_long_address() {
        [DecoderProtocol::DccLong, DecoderProtocol::DccShort]
    } else {
        [DecoderProtocol::DccShort, DecoderProtocol::DccLong]
    };
    order
        .into_iter()
        .chain([
            DecoderProtocol::Motorola,
            DecoderProtocol::Mfx,
            DecoderProtocol::Selectrix,
        ])
        .find_map(|protocol| app.decoder(DecoderKey::new(protocol, address.address)))
}

impl Kernel<Diy> {
    /// Drive output `address`. Repeating the last requested value sends
    /// nothing.
    pub fn set_output(&self, address: u32, value: bool) -> Result<(), CommandError> {
        Self::check_output_address(OutputChannel::Output, address)?;
        self.post(DiyCommand::SetOutput {
            address: address as u16,
            value,
        })
    }

    /// Tell subscribed throttles about a decoder change.
    pub fn decoder_changed(
        &self,
        state: &DecoderState,
        flags: DecoderChangeFlags,
        function: u8,
    ) -> Result<(), CommandError> {
        self.post(DiyCommand::DecoderChanged {
            state: state.clone(),
            flags,
            function,
        })
    }

    /// Change an input as if the device had reported it. Simulation only.
    pub fn simulate_input_change(
        &self,
        address: u32,
        action: SimulateInputAction,
    ) -> Result<(), CommandError> {
        if !self.is_simulation() {
            return Err(CommandError::NotSimulation);
        }
        Self::check_input_address(InputChannel::Input, address)?;
        self.post(DiyCommand::SimulateInputChange {
            address: address as u16,
            action,
        })
    }

    /// Ask the device again for the state of these inputs.
    pub fn request_input_states(&self, addresses: &[u32]) -> Result<(), CommandError> {
        for address in addresses {
            Self::check_input_address(InputChannel::Input, *address)?;
        }
        self.post(DiyCommand::QueryInputs(wire_addresses(addresses.to_vec())))
    }
}
