//! DIY worker-side engine.
//!
//! Startup asks the device for its info text and feature flags. The
//! feature reply (or running out of handshake attempts) completes the
//! startup. From then on the engine:
//!
//! - mirrors input and output states, forwarding only changes
//! - skips output writes that repeat the last requested value
//! - tracks throttle subscriptions and echoes decoder changes to them
//! - sends a heartbeat when the line goes quiet and fails the kernel if
//!   the heartbeat goes unanswered

use std::collections::{BTreeSet, HashMap};
use std::time::Duration;

use tracing::{debug, info, warn};

use super::message::{Features, IoState, LocoAddress, Message, SpeedStep};
use super::Diy;
use crate::config::DiyConfig;
use crate::kernel::{AddressCache, Context, Engine, FrameLog, KernelState, Protocol};
use crate::traits::{
    DecoderChangeFlags, DecoderKey, DecoderState, Direction, InputChannel, OutputChannel, TriState,
};

/// Step count reported to a throttle for a decoder with automatic speed
/// steps (`speed_steps == 0`).
pub const AUTO_SPEED_STEPS: u8 = u8::MAX;

/// Timers of the DIY engine.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DiyTimer {
    /// Line idle; send a heartbeat or give up.
    Heartbeat,
    /// Feature request unanswered.
    Handshake,
}

/// How a simulated input changes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SimulateInputAction {
    /// Force off.
    SetFalse,
    /// Force on.
    SetTrue,
    /// Invert; an unknown input becomes on.
    Toggle,
}

/// Commands posted from the application thread.
#[derive(Debug)]
pub enum DiyCommand {
    /// Drive an output.
    SetOutput {
        /// Output address.
        address: u16,
        /// Requested value.
        value: bool,
    },
    /// Ask the device for these input states.
    QueryInputs(Vec<u16>),
    /// Ask the device for these output states.
    QueryOutputs(Vec<u16>),
    /// A decoder changed in the domain model.
    DecoderChanged {
        /// Decoder snapshot after the change.
        state: DecoderState,
        /// What changed.
        flags: DecoderChangeFlags,
        /// Function number, for function changes.
        function: u8,
    },
    /// Send the full decoder state to a newly subscribed throttle.
    ThrottleSync {
        /// Throttle id.
        throttle_id: u16,
        /// Address the throttle asked for.
        address: LocoAddress,
        /// Decoder found for that address.
        state: Option<DecoderState>,
    },
    /// Route changes of decoder `key` to the throttles subscribed to
    /// `address`. Ignored once no throttle is subscribed any more.
    ThrottleBind {
        /// Address the throttles use.
        address: LocoAddress,
        /// Decoder resolved for that address.
        key: DecoderKey,
    },
    /// Send one function value to a throttle.
    ThrottleFunction {
        /// Throttle id.
        throttle_id: u16,
        /// Locomotive.
        address: LocoAddress,
        /// Function number.
        function: u8,
        /// Value.
        value: bool,
    },
    /// Change an input as if the device reported it.
    SimulateInputChange {
        /// Input address.
        address: u16,
        /// Change.
        action: SimulateInputAction,
    },
}

/// Notices posted to the application thread.
#[derive(Debug, Clone, PartialEq)]
pub enum DiyNotice {
    /// Device info text.
    Info(String),
    /// Device feature flags; startup is complete.
    Features(Features),
    /// The device reported an input it cannot provide.
    InvalidInput(u16),
    /// The device reported an output it cannot drive.
    InvalidOutput(u16),
    /// A throttle subscribed to a locomotive.
    ThrottleSubscribed {
        /// Throttle id.
        throttle_id: u16,
        /// Locomotive.
        address: LocoAddress,
    },
    /// A throttle released a locomotive.
    ThrottleUnsubscribed {
        /// Throttle id.
        throttle_id: u16,
        /// Locomotive.
        address: LocoAddress,
    },
    /// A throttle changed speed or direction.
    ThrottleSpeedDirection {
        /// Throttle id.
        throttle_id: u16,
        /// Locomotive.
        address: LocoAddress,
        /// New speed, if set.
        speed: Option<SpeedStep>,
        /// New direction, if set.
        direction: Option<Direction>,
    },
    /// A throttle changed a function.
    ThrottleFunction {
        /// Throttle id.
        throttle_id: u16,
        /// Locomotive.
        address: LocoAddress,
        /// Function number.
        function: u8,
        /// Value.
        value: bool,
    },
}

/// Worker-side DIY state machine.
pub struct DiyEngine {
    config: DiyConfig,
    features: Option<Features>,
    handshake_attempts: u8,
    heartbeat_pending: bool,
    inputs: AddressCache<InputChannel, IoState>,
    outputs: AddressCache<OutputChannel, IoState>,
    requested: HashMap<u16, bool>,
    throttles: HashMap<LocoAddress, BTreeSet<u16>>,
    bound: HashMap<DecoderKey, LocoAddress>,
}

impl DiyEngine {
    /// Fresh engine; every cache starts unknown.
    pub fn new(config: DiyConfig) -> Self {
        Self {
            config,
            features: None,
            handshake_attempts: 0,
            heartbeat_pending: false,
            inputs: AddressCache::new(),
            outputs: AddressCache::new(),
            requested: HashMap::new(),
            throttles: HashMap::new(),
            bound: HashMap::new(),
        }
    }

    fn heartbeat_timeout(&self) -> Duration {
        Duration::from_millis(self.config.heartbeat_timeout_ms as u64)
    }

    fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.config.handshake_timeout_ms as u64)
    }

    fn has_input(&self) -> bool {
        self.features.is_some_and(|f| f.has_input())
    }

    fn has_output(&self) -> bool {
        self.features.is_some_and(|f| f.has_output())
    }

    fn has_throttle(&self) -> bool {
        self.features.is_some_and(|f| f.has_throttle())
    }

    fn restart_heartbeat(&mut self, ctx: &mut Context<'_, Diy>) {
        self.heartbeat_pending = false;
        ctx.start_timer(DiyTimer::Heartbeat, self.heartbeat_timeout());
    }

    fn finish_startup(&mut self, ctx: &mut Context<'_, Diy>) {
        while ctx.state() != KernelState::Started {
            if ctx.advance().is_none() {
                break;
            }
        }
    }

    fn features_received(&mut self, features: Features, ctx: &mut Context<'_, Diy>) {
        self.features = Some(features);
        ctx.cancel_timer(DiyTimer::Handshake);
        if ctx.state() == KernelState::DiscoverNodes {
            self.finish_startup(ctx);
        }
        ctx.notice(DiyNotice::Features(features));
    }

    fn input_state(&mut self, address: u16, state: IoState, ctx: &mut Context<'_, Diy>) {
        if !in_range(Diy::input_address_range(InputChannel::Input), address) {
            warn!(interface = %ctx.logger().id(), "input address {} out of range, dropped", address);
            return;
        }
        if !self.has_input() {
            debug!(interface = %ctx.logger().id(), "input {} reported without input feature", address);
            return;
        }
        if !self.inputs.update(InputChannel::Input, address as u32, state) {
            return;
        }
        match state {
            IoState::Invalid => ctx.notice(DiyNotice::InvalidInput(address)),
            other => ctx.notify_input(InputChannel::Input, address as u32, to_tristate(other)),
        }
    }

    fn output_state(&mut self, address: u16, state: IoState, ctx: &mut Context<'_, Diy>) {
        if !in_range(Diy::output_address_range(OutputChannel::Output), address) {
            warn!(interface = %ctx.logger().id(), "output address {} out of range, dropped", address);
            return;
        }
        if !self.has_output() {
            debug!(interface = %ctx.logger().id(), "output {} reported without output feature", address);
            return;
        }
        match state {
            IoState::True | IoState::False => {
                self.requested.insert(address, state == IoState::True);
            }
            IoState::Undefined | IoState::Invalid => {
                self.requested.remove(&address);
            }
        }
        if !self.outputs.update(OutputChannel::Output, address as u32, state) {
            return;
        }
        match state {
            IoState::Invalid => ctx.notice(DiyNotice::InvalidOutput(address)),
            other => ctx.notify_output(OutputChannel::Output, address as u32, to_tristate(other)),
        }
    }

    fn subscribe(&mut self, throttle_id: u16, address: LocoAddress) -> bool {
        self.throttles.entry(address).or_default().insert(throttle_id)
    }

    fn unsubscribe(&mut self, throttle_id: u16, address: LocoAddress) {
        if let Some(ids) = self.throttles.get_mut(&address) {
            ids.remove(&throttle_id);
            if ids.is_empty() {
                self.throttles.remove(&address);
                self.bound.retain(|_, a| *a != address);
            }
        }
    }

    fn bind(&mut self, address: LocoAddress, key: DecoderKey) {
        if self.throttles.contains_key(&address) {
            self.bound.insert(key, address);
        }
    }

    fn send_decoder_state(
        &mut self,
        throttle_id: u16,
        address: LocoAddress,
        state: &DecoderState,
        ctx: &mut Context<'_, Diy>,
    ) {
        ctx.send(&speed_direction(throttle_id, address, state));
        for (function, value) in &state.functions {
            ctx.send(&Message::ThrottleSetFunction {
                throttle_id,
                address,
                function: *function,
                value: *value,
            });
        }
    }

    fn decoder_changed(
        &mut self,
        state: &DecoderState,
        flags: DecoderChangeFlags,
        function: u8,
        ctx: &mut Context<'_, Diy>,
    ) {
        if !self.has_throttle() {
            return;
        }
        let Some(address) = self.bound.get(&state.key).copied() else {
            return;
        };
        let Some(ids) = self.throttles.get(&address) else {
            return;
        };
        let speed_changed = flags.intersects(
            DecoderChangeFlags::THROTTLE
                | DecoderChangeFlags::EMERGENCY_STOP
                | DecoderChangeFlags::DIRECTION
                | DecoderChangeFlags::SPEED_STEPS,
        );
        let function_value = if flags.contains(DecoderChangeFlags::FUNCTION_VALUE) {
            state.function(function)
        } else {
            None
        };
        for throttle_id in ids.clone() {
            if speed_changed {
                ctx.send(&speed_direction(throttle_id, address, state));
            }
            if let Some(value) = function_value {
                ctx.send(&Message::ThrottleSetFunction {
                    throttle_id,
                    address,
                    function,
                    value,
                });
            }
        }
    }

    fn simulate_input(&mut self, address: u16, action: SimulateInputAction, ctx: &mut Context<'_, Diy>) {
        if !ctx.is_simulation() {
            warn!(interface = %ctx.logger().id(), "input simulation requires the simulation transport");
            return;
        }
        let state = match action {
            SimulateInputAction::SetFalse => IoState::False,
            SimulateInputAction::SetTrue => IoState::True,
            SimulateInputAction::Toggle => match self.inputs.get(InputChannel::Input, address as u32) {
                IoState::True => IoState::False,
                _ => IoState::True,
            },
        };
        self.receive(Message::SetInputState { address, state }, ctx);
    }
}

fn to_tristate(state: IoState) -> TriState {
    match state {
        IoState::False => TriState::False,
        IoState::True => TriState::True,
        IoState::Undefined | IoState::Invalid => TriState::Undefined,
    }
}

fn in_range(range: Option<(u32, u32)>, address: u16) -> bool {
    range.is_some_and(|(min, max)| (min..=max).contains(&(address as u32)))
}

fn speed_direction(throttle_id: u16, address: LocoAddress, state: &DecoderState) -> Message {
    let speed = if state.emergency_stop {
        SpeedStep::EMERGENCY_STOP
    } else {
        let max = match state.speed_steps {
            0 => AUTO_SPEED_STEPS,
            steps => steps,
        };
        SpeedStep::from_throttle(state.throttle, max)
    };
    let direction = match state.direction {
        Direction::Unknown => None,
        d => Some(d),
    };
    Message::ThrottleSetSpeedDirection {
        throttle_id,
        address,
        speed: Some(speed),
        direction,
    }
}

impl Engine<Diy> for DiyEngine {
    fn start(&mut self, ctx: &mut Context<'_, Diy>) {
        ctx.advance();
        ctx.send(&Message::GetInfo);
        ctx.send(&Message::GetFeatures);
        self.handshake_attempts = 1;
        ctx.start_timer(DiyTimer::Handshake, self.handshake_timeout());
        self.restart_heartbeat(ctx);
    }

    fn receive(&mut self, message: Message, ctx: &mut Context<'_, Diy>) {
        self.restart_heartbeat(ctx);
        match message {
            Message::Heartbeat => {}
            Message::Features(features) => self.features_received(features, ctx),
            Message::Info(text) => {
                info!(interface = %ctx.logger().id(), "device: {}", text);
                ctx.notice(DiyNotice::Info(text.to_string()));
            }
            Message::SetInputState { address, state } => self.input_state(address, state, ctx),
            Message::SetOutputState { address, state } => self.output_state(address, state, ctx),
            Message::ThrottleSubUnsub {
                throttle_id,
                address,
                subscribe,
            } => {
                if !self.has_throttle() {
                    return;
                }
                if subscribe {
                    self.subscribe(throttle_id, address);
                    ctx.notice(DiyNotice::ThrottleSubscribed {
                        throttle_id,
                        address,
                    });
                } else {
                    self.unsubscribe(throttle_id, address);
                    ctx.send(&Message::ThrottleSubUnsub {
                        throttle_id,
                        address,
                        subscribe: false,
                    });
                    ctx.notice(DiyNotice::ThrottleUnsubscribed {
                        throttle_id,
                        address,
                    });
                }
            }
            Message::ThrottleSetFunction {
                throttle_id,
                address,
                function,
                value,
            } => {
                if !self.has_throttle() {
                    return;
                }
                self.subscribe(throttle_id, address);
                ctx.notice(DiyNotice::ThrottleFunction {
                    throttle_id,
                    address,
                    function,
                    value,
                });
            }
            Message::ThrottleSetSpeedDirection {
                throttle_id,
                address,
                speed,
                direction,
            } => {
                if !self.has_throttle() {
                    return;
                }
                self.subscribe(throttle_id, address);
                ctx.notice(DiyNotice::ThrottleSpeedDirection {
                    throttle_id,
                    address,
                    speed,
                    direction,
                });
            }
            request @ (Message::GetInputState { .. }
            | Message::GetOutputState { .. }
            | Message::GetFeatures
            | Message::GetInfo) => {
                debug!(interface = %ctx.logger().id(), "ignoring request from device: {}", request);
            }
        }
    }

    fn command(&mut self, command: DiyCommand, ctx: &mut Context<'_, Diy>) {
        match command {
            DiyCommand::SetOutput { address, value } => {
                if matches!(self.features, Some(f) if !f.has_output()) {
                    warn!(interface = %ctx.logger().id(), "device has no outputs, output {} not set", address);
                    return;
                }
                if self.requested.get(&address) == Some(&value) {
                    debug!(interface = %ctx.logger().id(), "output {} already {}", address, value);
                    return;
                }
                self.requested.insert(address, value);
                ctx.send(&Message::SetOutputState {
                    address,
                    state: value.into(),
                });
            }
            DiyCommand::QueryInputs(addresses) => {
                if self.has_input() {
                    for address in addresses {
                        ctx.send(&Message::GetInputState { address });
                    }
                }
            }
            DiyCommand::QueryOutputs(addresses) => {
                if self.has_output() {
                    for address in addresses {
                        ctx.send(&Message::GetOutputState { address });
                    }
                }
            }
            DiyCommand::DecoderChanged {
                state,
                flags,
                function,
            } => self.decoder_changed(&state, flags, function, ctx),
            DiyCommand::ThrottleSync {
                throttle_id,
                address,
                state,
            } => match state {
                Some(state) => {
                    self.bind(address, state.key);
                    self.send_decoder_state(throttle_id, address, &state, ctx);
                }
                None => {
                    debug!(interface = %ctx.logger().id(), "no decoder for throttle {} address {}", throttle_id, address);
                }
            },
            DiyCommand::ThrottleBind { address, key } => self.bind(address, key),
            DiyCommand::ThrottleFunction {
                throttle_id,
                address,
                function,
                value,
            } => {
                ctx.send(&Message::ThrottleSetFunction {
                    throttle_id,
                    address,
                    function,
                    value,
                });
            }
            DiyCommand::SimulateInputChange { address, action } => {
                self.simulate_input(address, action, ctx)
            }
        }
    }

    fn timer(&mut self, timer: DiyTimer, ctx: &mut Context<'_, Diy>) {
        match timer {
            DiyTimer::Heartbeat => {
                if self.heartbeat_pending {
                    ctx.fail("heartbeat timeout, device not responding");
                    return;
                }
                ctx.send(&Message::Heartbeat);
                self.heartbeat_pending = true;
                ctx.start_timer(DiyTimer::Heartbeat, self.heartbeat_timeout());
            }
            DiyTimer::Handshake => {
                if ctx.state() != KernelState::DiscoverNodes {
                    return;
                }
                if self.handshake_attempts < self.config.request_attempts {
                    self.handshake_attempts += 1;
                    ctx.send(&Message::GetFeatures);
                    ctx.start_timer(DiyTimer::Handshake, self.handshake_timeout());
                } else {
                    warn!(
                        interface = %ctx.logger().id(),
                        "no feature report after {} attempts, continuing without features",
                        self.handshake_attempts
                    );
                    self.finish_startup(ctx);
                }
            }
        }
    }

    fn set_config(&mut self, config: DiyConfig, _ctx: &mut Context<'_, Diy>) {
        self.config = config;
    }

    fn frame_log(&self) -> FrameLog {
        FrameLog {
            rx_tx: self.config.debug_log_rx_tx,
            keepalive: self.config.debug_log_heartbeat,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::DecoderProtocol;

    #[test]
    fn speed_direction_for_running_decoder() {
        let mut state = DecoderState::new(DecoderKey::new(DecoderProtocol::DccShort, 3));
        state.throttle = 0.5;
        state.direction = Direction::Reverse;
        let m = speed_direction(1, LocoAddress::new(3, false), &state);
        assert_eq!(
            m,
            Message::ThrottleSetSpeedDirection {
                throttle_id: 1,
                address: LocoAddress::new(3, false),
                speed: Some(SpeedStep { step: 63, max: 126 }),
                direction: Some(Direction::Reverse),
            }
        );
    }

    #[test]
    fn speed_direction_for_stopped_decoder() {
        let mut state = DecoderState::new(DecoderKey::new(DecoderProtocol::DccLong, 1000));
        state.emergency_stop = true;
        state.direction = Direction::Unknown;
        match speed_direction(9, LocoAddress::new(1000, true), &state) {
            Message::ThrottleSetSpeedDirection {
                speed, direction, ..
            } => {
                assert_eq!(speed, Some(SpeedStep::EMERGENCY_STOP));
                assert_eq!(direction, None);
            }
            other => panic!("unexpected {}", other),
        }
    }

    #[test]
    fn speed_direction_uses_decoder_speed_steps() {
        let mut state = DecoderState::new(DecoderKey::new(DecoderProtocol::DccShort, 3));
        state.throttle = 0.5;
        state.speed_steps = 28;
        match speed_direction(1, LocoAddress::new(3, false), &state) {
            Message::ThrottleSetSpeedDirection { speed, .. } => {
                assert_eq!(speed, Some(SpeedStep { step: 14, max: 28 }));
            }
            other => panic!("unexpected {}", other),
        }

        state.speed_steps = 0;
        state.throttle = 1.0;
        match speed_direction(1, LocoAddress::new(3, false), &state) {
            Message::ThrottleSetSpeedDirection { speed, .. } => {
                assert_eq!(speed, Some(SpeedStep { step: 255, max: AUTO_SPEED_STEPS }));
            }
            other => panic!("unexpected {}", other),
        }
    }

    #[test]
    fn io_address_range() {
        let range = Diy::input_address_range(InputChannel::Input);
        assert!(!in_range(range, 0));
        assert!(in_range(range, 1));
        assert!(in_range(range, u16::MAX));
        assert!(!in_range(None, 1));
    }

    #[test]
    fn bind_needs_a_subscribed_throttle() {
        let mut engine = DiyEngine::new(DiyConfig::default());
        let address = LocoAddress::new(3, false);
        let key = DecoderKey::new(DecoderProtocol::DccShort, 3);
        engine.bind(address, key);
        assert!(engine.bound.is_empty());

        engine.subscribe(9, address);
        engine.bind(address, key);
        assert_eq!(engine.bound.get(&key), Some(&address));
    }

    #[test]
    fn tristate_mapping() {
        assert_eq!(to_tristate(IoState::True), TriState::True);
        assert_eq!(to_tristate(IoState::False), TriState::False);
        assert_eq!(to_tristate(IoState::Invalid), TriState::Undefined);
    }

    #[test]
    fn unsubscribe_last_throttle_unbinds() {
        let mut engine = DiyEngine::new(DiyConfig::default());
        let address = LocoAddress::new(3, false);
        let key = DecoderKey::new(DecoderProtocol::DccShort, 3);
        assert!(engine.subscribe(1, address));
        assert!(engine.subscribe(2, address));
        assert!(!engine.subscribe(2, address));
        engine.bound.insert(key, address);

        engine.unsubscribe(1, address);
        assert!(engine.bound.contains_key(&key));
        engine.unsubscribe(2, address);
        assert!(!engine.bound.contains_key(&key));
        assert!(engine.throttles.is_empty());
    }
}
