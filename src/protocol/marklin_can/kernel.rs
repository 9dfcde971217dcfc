//! Märklin CAN worker-side engine.
//!
//! Startup walks through these steps:
//!
//! 1. **DiscoverNodes**: broadcast a ping and collect answers until the
//!    discovery timer runs out.
//! 2. **ReadNodeDescriptors**: read the status data descriptors of every
//!    node, one request at a time.
//! 3. **ConfigureDevice**: push the default accessory switch time, if one
//!    is configured.
//! 4. **DownloadCatalog**: fetch and parse the locomotive list, if enabled.
//! 5. **Started**: replay commands posted while starting.
//!
//! Every request is retried within the configured budget; running out of
//! attempts logs a warning and moves on with what is known.

use std::time::Duration;

use tracing::{debug, info, warn};

use super::locomotive_list::LocomotiveList;
use super::message::{
    calc_hash, AccessoryControl, Command, LocomotiveDirection, Message, SystemSubCommand,
    FUNCTION_MAX, SPEED_MAX,
};
use super::node::{Node, NodeRegistry};
use super::status_data::{ConfigurationDescription, DeviceDescription, ReadingDescription};
use super::stream::{ConfigDataStreamCollector, StreamStatus};
use super::uid;
use super::MarklinCan;
use crate::config::CanConfig;
use crate::kernel::{AddressCache, Context, Engine, FrameLog, KernelState, PendingRequestQueue, Retry};
use crate::traits::{
    DecoderChangeFlags, DecoderState, DecoderUpdate, Direction, InputChannel, OutputChannel,
    TriState,
};

/// Config data file holding the locomotive list.
pub const LOCOMOTIVE_LIST_FILE: &str = "loks";
/// Highest s88 contact number.
pub const S88_CONTACT_MAX: u32 = 16384;

const STATUS_QUEUE_CAPACITY: usize = 64;

/// Timers of the CAN engine.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CanTimer {
    /// Ping answers are collected until this fires.
    Discovery,
    /// Status data request unanswered.
    Request,
    /// Switch time not acknowledged.
    Configure,
    /// Locomotive list stream stalled.
    Catalog,
}

/// Track power as reported by the command station.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PowerState {
    /// Track power off.
    Stop,
    /// Track power on.
    Go,
    /// Power on, all locomotives stopped.
    Halt,
}

/// Commands posted from the application thread.
#[derive(Debug)]
pub enum CanCommand {
    /// Switch an accessory output.
    SetOutput {
        /// Accessory channel.
        channel: OutputChannel,
        /// Output address.
        address: u32,
        /// Coil on or off.
        value: bool,
    },
    /// A decoder changed in the domain model.
    DecoderChanged {
        /// Locomotive UID.
        uid: u32,
        /// Decoder snapshot after the change.
        state: DecoderState,
        /// What changed.
        flags: DecoderChangeFlags,
        /// Function number, for function changes.
        function: u8,
    },
    /// System command for every device.
    System(SystemSubCommand),
}

/// Notices posted to the application thread.
#[derive(Debug, Clone, PartialEq)]
pub enum CanNotice {
    /// Track power changed.
    Power(PowerState),
    /// A node appeared or its descriptors were read.
    NodeChanged(Node),
    /// The locomotive list was downloaded.
    LocomotiveList(LocomotiveList),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct StatusRequest {
    uid: u32,
    index: u8,
}

/// Worker-side Märklin CAN state machine.
pub struct CanEngine {
    config: CanConfig,
    nodes: NodeRegistry,
    requests: PendingRequestQueue<StatusRequest, STATUS_QUEUE_CAPACITY>,
    status_data: Vec<u8>,
    configure_attempts: u8,
    catalog_attempts: u8,
    collector: Option<ConfigDataStreamCollector>,
    inputs: AddressCache<InputChannel>,
    outputs: AddressCache<OutputChannel>,
    deferred: Vec<CanCommand>,
}

impl CanEngine {
    /// Fresh engine with an empty node registry.
    pub fn new(config: CanConfig) -> Self {
        let attempts = config.request_attempts;
        Self {
            config,
            nodes: NodeRegistry::new(),
            requests: PendingRequestQueue::new(attempts),
            status_data: Vec::new(),
            configure_attempts: 0,
            catalog_attempts: 0,
            collector: None,
            inputs: AddressCache::new(),
            outputs: AddressCache::new(),
            deferred: Vec::new(),
        }
    }

    /// Nodes discovered so far.
    pub fn nodes(&self) -> &NodeRegistry {
        &self.nodes
    }

    fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.config.request_timeout_ms as u64)
    }

    fn send(&self, mut message: Message, ctx: &mut Context<'_, MarklinCan>) -> bool {
        message.set_hash(calc_hash(self.config.node_uid));
        ctx.send(&message)
    }

    // ========================================================================
    // Discovery and descriptors
    // ========================================================================

    fn ping_reply(&mut self, message: &Message, ctx: &mut Context<'_, MarklinCan>) {
        let Some(reply) = message.ping_reply_fields() else {
            return;
        };
        let known = self.nodes.get(reply.uid).is_some();
        if !self.nodes.upsert(&reply) {
            return;
        }
        let Some(node) = self.nodes.get(reply.uid) else {
            return;
        };
        info!(
            interface = %ctx.logger().id(),
            "node 0x{:08X} {} v{}.{}",
            node.uid, node.device_id, node.version.0, node.version.1
        );
        ctx.notice(CanNotice::NodeChanged(node.clone()));

        // late joiners get their descriptors read too
        if !known
            && matches!(
                ctx.state(),
                KernelState::ReadNodeDescriptors
                    | KernelState::ConfigureDevice
                    | KernelState::DownloadCatalog
                    | KernelState::Started
            )
        {
            self.queue_request(reply.uid, 0, ctx);
            self.next_request(ctx);
        }
    }

    fn discovery_done(&mut self, ctx: &mut Context<'_, MarklinCan>) {
        if ctx.state() != KernelState::DiscoverNodes {
            return;
        }
        info!(interface = %ctx.logger().id(), "{} node(s) found", self.nodes.len());
        ctx.advance();
        for uid in self.nodes.uids() {
            self.queue_request(uid, 0, ctx);
        }
        self.next_request(ctx);
    }

    fn queue_request(&mut self, uid: u32, index: u8, ctx: &mut Context<'_, MarklinCan>) {
        if !self.requests.push(StatusRequest { uid, index }) {
            warn!(
                interface = %ctx.logger().id(),
                "status data queue full, skipping node 0x{:08X} index {}", uid, index
            );
        }
    }

    fn send_request(&self, request: StatusRequest, ctx: &mut Context<'_, MarklinCan>) {
        self.send(
            Message::status_data_config(self.config.node_uid, request.uid, request.index),
            ctx,
        );
        ctx.start_timer(CanTimer::Request, self.request_timeout());
    }

    fn next_request(&mut self, ctx: &mut Context<'_, MarklinCan>) {
        if let Some(request) = self.requests.send_next().copied() {
            self.status_data.clear();
            self.send_request(request, ctx);
        } else if !self.requests.is_in_flight() && ctx.state() == KernelState::ReadNodeDescriptors {
            ctx.cancel_timer(CanTimer::Request);
            self.configure(ctx);
        }
    }

    fn status_data_reply(&mut self, uid: u32, index: u8, ctx: &mut Context<'_, MarklinCan>) {
        let expected = self.requests.head().copied();
        if !self.requests.is_in_flight() || expected != Some(StatusRequest { uid, index }) {
            // answer to someone else's request
            self.status_data.clear();
            return;
        }
        ctx.cancel_timer(CanTimer::Request);
        self.requests.complete();
        let bytes = std::mem::take(&mut self.status_data);
        if let Err(e) = self.store_descriptor(uid, index, &bytes, ctx) {
            warn!(
                interface = %ctx.logger().id(),
                "node 0x{:08X} descriptor {}: {}", uid, index, e
            );
        }
        self.next_request(ctx);
    }

    fn store_descriptor(
        &mut self,
        uid: u32,
        index: u8,
        bytes: &[u8],
        ctx: &mut Context<'_, MarklinCan>,
    ) -> Result<(), crate::error::DecodeError> {
        let Some(node) = self.nodes.get_mut(uid) else {
            return Ok(());
        };
        let last = if index == 0 {
            let description = DeviceDescription::from_bytes(bytes)?;
            let last = description.last_index();
            debug!(
                interface = %ctx.logger().id(),
                "node 0x{:08X} is {} with {} reading(s), {} configuration(s)",
                uid,
                description.device_name,
                description.number_of_readings,
                description.number_of_configuration_channels
            );
            node.description = Some(description);
            for next in 1..=last {
                if !self.requests.push(StatusRequest { uid, index: next }) {
                    warn!(interface = %ctx.logger().id(), "status data queue full");
                    break;
                }
            }
            last
        } else {
            let Some(description) = &node.description else {
                return Ok(());
            };
            let readings = description.number_of_readings;
            let last = description.last_index();
            if index <= readings {
                node.readings.insert(index, ReadingDescription::from_bytes(bytes)?);
            } else {
                node.configurations
                    .insert(index, ConfigurationDescription::from_bytes(bytes)?);
            }
            last
        };

        if index == last {
            if self.config.debug_status_data_config {
                let name = format!("node_{:08X}.json", uid);
                if let Err(e) = ctx.logger().dump_json(&name, &*node) {
                    warn!(interface = %ctx.logger().id(), "failed to dump {}: {}", name, e);
                }
            }
            ctx.notice(CanNotice::NodeChanged(node.clone()));
        }
        Ok(())
    }

    // ========================================================================
    // Configure and catalog
    // ========================================================================

    fn configure(&mut self, ctx: &mut Context<'_, MarklinCan>) {
        if ctx.state() != KernelState::ReadNodeDescriptors {
            return;
        }
        ctx.advance();
        match self.config.switch_time_units() {
            Some(units) => {
                self.configure_attempts = 1;
                self.send(Message::accessory_switch_time(units), ctx);
                ctx.start_timer(CanTimer::Configure, self.request_timeout());
            }
            None => self.download_catalog(ctx),
        }
    }

    fn download_catalog(&mut self, ctx: &mut Context<'_, MarklinCan>) {
        if ctx.state() != KernelState::ConfigureDevice {
            return;
        }
        ctx.cancel_timer(CanTimer::Configure);
        ctx.advance();
        if self.config.download_locomotive_list {
            self.catalog_attempts = 0;
            self.request_catalog(ctx);
        } else {
            self.finish_startup(ctx);
        }
    }

    fn request_catalog(&mut self, ctx: &mut Context<'_, MarklinCan>) {
        if self.catalog_attempts >= self.config.request_attempts.max(1) {
            warn!(
                interface = %ctx.logger().id(),
                "no locomotive list after {} attempts", self.catalog_attempts
            );
            self.collector = None;
            self.finish_startup(ctx);
            return;
        }
        self.catalog_attempts += 1;
        self.collector = Some(ConfigDataStreamCollector::new(LOCOMOTIVE_LIST_FILE));
        self.send(Message::config_data(self.config.node_uid, LOCOMOTIVE_LIST_FILE), ctx);
        ctx.start_timer(CanTimer::Catalog, self.request_timeout());
    }

    fn config_data_stream(&mut self, message: &Message, ctx: &mut Context<'_, MarklinCan>) {
        let Some(collector) = self.collector.as_mut() else {
            return;
        };
        match collector.process(message) {
            StreamStatus::Collecting => {
                ctx.start_timer(CanTimer::Catalog, self.request_timeout());
            }
            StreamStatus::Complete => {
                ctx.cancel_timer(CanTimer::Catalog);
                if let Some(collector) = self.collector.take() {
                    self.locomotive_list(collector.into_data(), ctx);
                }
                self.finish_startup(ctx);
            }
            error => {
                warn!(interface = %ctx.logger().id(), "locomotive list stream: {:?}", error);
                ctx.cancel_timer(CanTimer::Catalog);
                self.request_catalog(ctx);
            }
        }
    }

    fn locomotive_list(&mut self, data: Vec<u8>, ctx: &mut Context<'_, MarklinCan>) {
        if self.config.debug_config_stream {
            let name = format!("{}.bin", LOCOMOTIVE_LIST_FILE);
            if let Err(e) = ctx.logger().dump(&name, &data) {
                warn!(interface = %ctx.logger().id(), "failed to dump {}: {}", name, e);
            }
        }
        match LocomotiveList::from_config_data(&data) {
            Ok(list) => {
                info!(interface = %ctx.logger().id(), "{} locomotive(s) in list", list.len());
                ctx.notice(CanNotice::LocomotiveList(list));
            }
            Err(e) => warn!(interface = %ctx.logger().id(), "invalid locomotive list: {}", e),
        }
    }

    fn finish_startup(&mut self, ctx: &mut Context<'_, MarklinCan>) {
        while ctx.state() != KernelState::Started {
            if ctx.advance().is_none() {
                return;
            }
        }
        for command in std::mem::take(&mut self.deferred) {
            self.execute(command, ctx);
        }
    }

    // ========================================================================
    // Routing
    // ========================================================================

    fn system_response(&mut self, message: &Message, ctx: &mut Context<'_, MarklinCan>) {
        let Some(sub) = message.system_sub_command() else {
            return;
        };
        let power = match sub {
            SystemSubCommand::SystemStop => Some(PowerState::Stop),
            SystemSubCommand::SystemGo => Some(PowerState::Go),
            SystemSubCommand::SystemHalt => Some(PowerState::Halt),
            SystemSubCommand::LocomotiveEmergencyStop => {
                if let Some(key) = message.uid().and_then(uid::decoder_key) {
                    ctx.notify_decoder(key, DecoderUpdate::emergency_stop(true));
                }
                None
            }
            SystemSubCommand::AccessorySwitchTime => {
                if ctx.state() == KernelState::ConfigureDevice {
                    self.download_catalog(ctx);
                }
                None
            }
            _ => None,
        };
        // power changes are broadcast, so the uid must be zero
        if let Some(power) = power.filter(|_| message.uid() == Some(0)) {
            ctx.notice(CanNotice::Power(power));
        }
    }

    fn locomotive_response(&mut self, message: &Message, ctx: &mut Context<'_, MarklinCan>) {
        let Some(key) = message.uid().and_then(uid::decoder_key) else {
            return;
        };
        if let Some(speed) = message.speed() {
            let throttle = speed.min(SPEED_MAX) as f32 / SPEED_MAX as f32;
            ctx.notify_decoder(key, DecoderUpdate::throttle(throttle));
        } else if let Some(direction) = message.direction() {
            match direction {
                LocomotiveDirection::Forward => {
                    ctx.notify_decoder(key, DecoderUpdate::direction(Direction::Forward))
                }
                LocomotiveDirection::Reverse => {
                    ctx.notify_decoder(key, DecoderUpdate::direction(Direction::Reverse))
                }
                LocomotiveDirection::Same | LocomotiveDirection::Inverse => {}
            }
        } else if let Some((number, value)) = message.function() {
            ctx.notify_decoder(key, DecoderUpdate::function(number, value));
        }
    }

    fn accessory_response(&mut self, message: &Message, ctx: &mut Context<'_, MarklinCan>) {
        let Some(control) = message.accessory_control_fields() else {
            return;
        };
        let Some((channel, address)) = uid::accessory_address(control.uid, control.position) else {
            return;
        };
        let value = TriState::from(control.current != 0);
        if self.outputs.update(channel, address, value) {
            ctx.notify_output(channel, address, value);
        }
    }

    fn feedback(&mut self, message: &Message, ctx: &mut Context<'_, MarklinCan>) {
        let Some(state) = message.feedback_state_fields() else {
            return;
        };
        let contact = state.contact_id as u32;
        if !(1..=S88_CONTACT_MAX).contains(&contact) {
            return;
        }
        let value = TriState::from(state.state_new != 0);
        if self.inputs.update(InputChannel::S88, contact, value) {
            ctx.notify_input(InputChannel::S88, contact, value);
        }
    }

    // ========================================================================
    // Commands
    // ========================================================================

    fn execute(&mut self, command: CanCommand, ctx: &mut Context<'_, MarklinCan>) {
        match command {
            CanCommand::SetOutput {
                channel,
                address,
                value,
            } => {
                let Some((uid, position)) = uid::accessory_uid(channel, address) else {
                    warn!(interface = %ctx.logger().id(), "no accessory for {:?} {}", channel, address);
                    return;
                };
                // best effort: skip writes matching the last reported value
                if self.outputs.get(channel, address) == TriState::from(value) {
                    debug!(interface = %ctx.logger().id(), "{:?} {} already {}", channel, address, value);
                    return;
                }
                self.send(
                    Message::accessory_control(AccessoryControl {
                        uid,
                        position,
                        current: value as u8,
                        switch_time: None,
                    }),
                    ctx,
                );
            }
            CanCommand::DecoderChanged {
                uid,
                state,
                flags,
                function,
            } => {
                for message in decoder_messages(uid, &state, flags, function) {
                    self.send(message, ctx);
                }
            }
            CanCommand::System(sub) => {
                self.send(Message::system(sub, 0), ctx);
            }
        }
    }
}

/// Frames for a decoder change.
fn decoder_messages(
    uid: u32,
    state: &DecoderState,
    flags: DecoderChangeFlags,
    function: u8,
) -> Vec<Message> {
    let mut messages = Vec::new();
    if flags.contains(DecoderChangeFlags::EMERGENCY_STOP) && state.emergency_stop {
        messages.push(Message::locomotive_emergency_stop(uid));
    } else if flags.contains(DecoderChangeFlags::THROTTLE)
        || flags.contains(DecoderChangeFlags::EMERGENCY_STOP)
    {
        messages.push(Message::locomotive_speed(uid, speed_value(state.throttle)));
    }
    if flags.contains(DecoderChangeFlags::DIRECTION) {
        match state.direction {
            Direction::Forward => {
                messages.push(Message::locomotive_direction(uid, LocomotiveDirection::Forward))
            }
            Direction::Reverse => {
                messages.push(Message::locomotive_direction(uid, LocomotiveDirection::Reverse))
            }
            Direction::Unknown => {}
        }
    }
    if flags.contains(DecoderChangeFlags::FUNCTION_VALUE) && function <= FUNCTION_MAX {
        if let Some(value) = state.function(function) {
            messages.push(Message::locomotive_function(uid, function, value));
        }
    }
    messages
}

/// Throttle (0.0..=1.0) to wire speed.
fn speed_value(throttle: f32) -> u16 {
    (throttle.clamp(0.0, 1.0) * SPEED_MAX as f32).round() as u16
}

impl Engine<MarklinCan> for CanEngine {
    fn start(&mut self, ctx: &mut Context<'_, MarklinCan>) {
        self.nodes.clear();
        self.requests.clear();
        self.status_data.clear();
        self.collector = None;
        self.inputs.clear();
        self.outputs.clear();

        ctx.advance();
        self.send(Message::ping(self.config.node_uid), ctx);
        ctx.start_timer(
            CanTimer::Discovery,
            Duration::from_millis(self.config.discovery_timeout_ms as u64),
        );
    }

    fn receive(&mut self, message: Message, ctx: &mut Context<'_, MarklinCan>) {
        let Some(command) = message.command() else {
            debug!(interface = %ctx.logger().id(), "unknown command 0x{:02X}", message.command_byte());
            return;
        };
        match command {
            Command::Ping if message.is_response() => self.ping_reply(&message, ctx),
            Command::StatusDataConfig => {
                if message.is_status_data_packet() {
                    if self.requests.is_in_flight() {
                        self.status_data.extend_from_slice(message.payload());
                    }
                } else if let Some((uid, index, _)) = message.status_data_reply() {
                    self.status_data_reply(uid, index, ctx);
                }
            }
            Command::ConfigDataStream => self.config_data_stream(&message, ctx),
            Command::System if message.is_response() => self.system_response(&message, ctx),
            Command::LocomotiveSpeed | Command::LocomotiveDirection | Command::LocomotiveFunction
                if message.is_response() =>
            {
                self.locomotive_response(&message, ctx)
            }
            Command::AccessoryControl if message.is_response() => {
                self.accessory_response(&message, ctx)
            }
            Command::FeedbackEvent => self.feedback(&message, ctx),
            _ => {}
        }
    }

    fn command(&mut self, command: CanCommand, ctx: &mut Context<'_, MarklinCan>) {
        if ctx.state() == KernelState::Started {
            self.execute(command, ctx);
        } else {
            debug!(interface = %ctx.logger().id(), "holding {:?} until started", command);
            self.deferred.push(command);
        }
    }

    fn timer(&mut self, timer: CanTimer, ctx: &mut Context<'_, MarklinCan>) {
        match timer {
            CanTimer::Discovery => self.discovery_done(ctx),
            CanTimer::Request => match self.requests.retry() {
                Retry::Resend(request) => {
                    let request = *request;
                    self.status_data.clear();
                    self.send_request(request, ctx);
                }
                Retry::GaveUp(request) => {
                    warn!(
                        interface = %ctx.logger().id(),
                        "node 0x{:08X} did not answer status data request {}",
                        request.uid, request.index
                    );
                    self.next_request(ctx);
                }
                Retry::Idle => {}
            },
            CanTimer::Configure => {
                if ctx.state() != KernelState::ConfigureDevice {
                    return;
                }
                if self.configure_attempts < self.config.request_attempts {
                    self.configure_attempts += 1;
                    if let Some(units) = self.config.switch_time_units() {
                        self.send(Message::accessory_switch_time(units), ctx);
                    }
                    ctx.start_timer(CanTimer::Configure, self.request_timeout());
                } else {
                    warn!(interface = %ctx.logger().id(), "switch time not acknowledged");
                    self.download_catalog(ctx);
                }
            }
            CanTimer::Catalog => {
                if ctx.state() == KernelState::DownloadCatalog {
                    warn!(interface = %ctx.logger().id(), "locomotive list download timed out");
                    self.request_catalog(ctx);
                }
            }
        }
    }

    fn set_config(&mut self, config: CanConfig, _ctx: &mut Context<'_, MarklinCan>) {
        self.requests.set_max_attempts(config.request_attempts);
        self.config = config;
    }

    fn frame_log(&self) -> FrameLog {
        FrameLog {
            rx_tx: self.config.debug_log_rx_tx,
            keepalive: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::{DecoderKey, DecoderProtocol};

    fn mfx(address: u16) -> DecoderState {
        DecoderState::new(DecoderKey::new(DecoderProtocol::Mfx, address))
    }

    #[test]
    fn speed_scaling() {
        assert_eq!(speed_value(0.0), 0);
        assert_eq!(speed_value(0.5), 500);
        assert_eq!(speed_value(1.0), 1000);
        assert_eq!(speed_value(1.7), 1000);
        assert_eq!(speed_value(-1.0), 0);
    }

    #[test]
    fn emergency_stop_wins_over_throttle() {
        let mut state = mfx(5);
        state.emergency_stop = true;
        state.throttle = 0.8;
        let messages = decoder_messages(
            0x4005,
            &state,
            DecoderChangeFlags::EMERGENCY_STOP | DecoderChangeFlags::THROTTLE,
            0,
        );
        assert_eq!(messages, vec![Message::locomotive_emergency_stop(0x4005)]);
    }

    #[test]
    fn releasing_emergency_stop_sends_speed() {
        let mut state = mfx(5);
        state.throttle = 0.25;
        let messages = decoder_messages(0x4005, &state, DecoderChangeFlags::EMERGENCY_STOP, 0);
        assert_eq!(messages, vec![Message::locomotive_speed(0x4005, 250)]);
    }

    #[test]
    fn direction_and_function() {
        let mut state = mfx(5);
        state.direction = Direction::Reverse;
        state.functions = vec![(3, true)];
        let messages = decoder_messages(
            0x4005,
            &state,
            DecoderChangeFlags::DIRECTION | DecoderChangeFlags::FUNCTION_VALUE,
            3,
        );
        assert_eq!(
            messages,
            vec![
                Message::locomotive_direction(0x4005, LocomotiveDirection::Reverse),
                Message::locomotive_function(0x4005, 3, true),
            ]
        );
        // unknown direction and missing functions send nothing
        state.direction = Direction::Unknown;
        assert!(decoder_messages(
            0x4005,
            &state,
            DecoderChangeFlags::DIRECTION | DecoderChangeFlags::FUNCTION_VALUE,
            4
        )
        .is_empty());
    }

    #[test]
    fn fresh_engine_has_no_nodes() {
        let engine = CanEngine::new(CanConfig::default());
        assert!(engine.nodes().is_empty());
        assert_eq!(
            engine.frame_log(),
            FrameLog {
                rx_tx: false,
                keepalive: false
            }
        );
    }
}
