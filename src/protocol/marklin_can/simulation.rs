//! In-process Märklin CAN bus with one Gleisbox.
//!
//! Replies are encoded with [`NetworkCodec`] and decoded again through a
//! [`StreamDecoder`] before they reach the kernel. Replies are released in
//! order of their due time, so an accessory's delayed switch-off cannot
//! overtake later confirmations.

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::sync::mpsc::Sender;
use std::time::Duration;

use tokio::sync::mpsc::{self, UnboundedSender};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::warn;

use super::locomotive_list;
use super::message::{
    calc_hash, AccessoryControl, Command, FeedbackState, Message, PingReply, SystemSubCommand,
};
use super::network::NetworkCodec;
use super::node::DeviceId;
use super::status_data::{
    status_data_config_reply, ConfigurationDescription, ConfigurationKind, DeviceDescription,
    ReadingDescription,
};
use super::stream::config_data_stream;
use crate::codec::{FrameCodec, StreamDecoder};
use crate::error::TransportError;
use crate::traits::{Link, Transport};

/// UID of the simulated Gleisbox.
pub const SIMULATED_NODE_UID: u32 = 0x4743_1234;

/// Locomotive list served for the `loks` request.
pub const SIMULATED_LOCOMOTIVES: &str = "[lokomotive]
version
 .minor=3
lokomotive
 .name=BR 86
 .adresse=0x6
 .typ=mfx
 .sid=0x6
 .mfxuid=0x7fe7e2e1
 .funktionen
 ..nr=0
 ..typ=1
 .funktionen
 ..nr=1
 ..typ=137
lokomotive
 .name=V 200
 .adresse=0xc8
 .typ=dcc
lokomotive
 .name=Köf
 .adresse=0x3
 .typ=mm2_prg
";

/// Accessory switch time used until the kernel configures one, 10 ms units.
const DEFAULT_SWITCH_TIME: u16 = 20;

/// Simulator behaviour.
#[derive(Debug, Clone)]
pub struct SimulationOptions {
    /// Answer requests at all.
    pub respond: bool,
    /// Announce a wrong CRC for config data streams.
    pub corrupt_crc: bool,
    /// Delay before a reply arrives.
    pub reply_delay: Duration,
    /// Locomotive list text served as `loks`.
    pub locomotive_list: String,
}

impl Default for SimulationOptions {
    fn default() -> Self {
        Self {
            respond: true,
            corrupt_crc: false,
            reply_delay: Duration::from_millis(5),
            locomotive_list: SIMULATED_LOCOMOTIVES.to_string(),
        }
    }
}

type Reply = Reverse<(Instant, u64, Vec<u8>)>;

/// Simulated CAN bus implementing [`Transport`].
pub struct CanSimulation {
    options: SimulationOptions,
    wire_tap: Option<Sender<Message>>,
    switch_time: u16,
    feedback: Vec<(u16, bool)>,
    sequence: u64,
    replies: Option<UnboundedSender<(Instant, u64, Vec<u8>)>>,
    reader: Option<JoinHandle<()>>,
}

impl CanSimulation {
    /// A well-behaved bus.
    pub fn new() -> Self {
        Self::with_options(SimulationOptions::default())
    }

    /// Bus with explicit options.
    pub fn with_options(options: SimulationOptions) -> Self {
        Self {
            options,
            wire_tap: None,
            switch_time: DEFAULT_SWITCH_TIME,
            feedback: Vec::new(),
            sequence: 0,
            replies: None,
            reader: None,
        }
    }

    /// Copy every frame the kernel sends to `tap`.
    pub fn with_wire_tap(mut self, tap: Sender<Message>) -> Self {
        self.wire_tap = Some(tap);
        self
    }

    /// Never answer anything.
    pub fn never_respond(mut self) -> Self {
        self.options.respond = false;
        self
    }

    /// Announce wrong CRCs for config data streams.
    pub fn corrupt_crc(mut self) -> Self {
        self.options.corrupt_crc = true;
        self
    }

    /// Delay every reply by `delay`.
    pub fn with_reply_delay(mut self, delay: Duration) -> Self {
        self.options.reply_delay = delay;
        self
    }

    /// Report an s88 contact change right after start.
    pub fn with_feedback(mut self, contact: u16, occupied: bool) -> Self {
        self.feedback.push((contact, occupied));
        self
    }

    /// Current options.
    pub fn options(&self) -> &SimulationOptions {
        &self.options
    }

    fn description() -> DeviceDescription {
        DeviceDescription {
            number_of_readings: 1,
            number_of_configuration_channels: 1,
            user_defined: 0,
            serial_number: 0x1234,
            article_number: "60116".into(),
            device_name: "Gleisbox".into(),
            nickname: String::new(),
        }
    }

    fn descriptor(index: u8) -> Option<Vec<u8>> {
        match index {
            0 => Some(Self::description().to_bytes()),
            1 => Some(
                ReadingDescription {
                    channel: 1,
                    power: -3,
                    colors: [0x30, 0xF0, 0xE0, 0xC0],
                    zero: 0,
                    range_end: [1000, 2000, 2500, 3000],
                    description: "TRACK".into(),
                    label_start: "0.000".into(),
                    label_end: "3.000".into(),
                    unit: "A".into(),
                }
                .to_bytes(),
            ),
            2 => Some(
                ConfigurationDescription {
                    channel: 1,
                    description: "Track protocol".into(),
                    kind: ConfigurationKind::List {
                        default: 0,
                        items: vec!["MM2".into(), "DCC".into(), "mfx".into()],
                    },
                }
                .to_bytes(),
            ),
            _ => None,
        }
    }

    fn response(message: &Message) -> Message {
        let mut reply = *message;
        reply.set_response(true);
        reply
    }

    /// Replies to `message` with their delay relative to the reply delay.
    fn reply_to(&mut self, message: &Message) -> Vec<(Duration, Message)> {
        if message.is_response() {
            return Vec::new();
        }
        let at_once = Duration::ZERO;
        let Some(command) = message.command() else {
            return Vec::new();
        };
        match command {
            Command::Ping => vec![(
                at_once,
                Message::ping_reply(PingReply {
                    uid: SIMULATED_NODE_UID,
                    version_major: 1,
                    version_minor: 39,
                    device_id: DeviceId::GLEISBOX.0,
                }),
            )],
            Command::StatusDataConfig => {
                let Some((uid, index)) = message.status_data_request() else {
                    return Vec::new();
                };
                if uid != SIMULATED_NODE_UID {
                    return Vec::new();
                }
                let Some(bytes) = Self::descriptor(index) else {
                    return Vec::new();
                };
                status_data_config_reply(SIMULATED_NODE_UID, uid, index, &bytes)
                    .into_iter()
                    .map(|m| (at_once, m))
                    .collect()
            }
            Command::System => {
                if let Some(units) = message.switch_time() {
                    self.switch_time = units;
                }
                match message.system_sub_command() {
                    Some(
                        SystemSubCommand::SystemStop
                        | SystemSubCommand::SystemGo
                        | SystemSubCommand::SystemHalt
                        | SystemSubCommand::LocomotiveEmergencyStop
                        | SystemSubCommand::AccessorySwitchTime,
                    ) => vec![(at_once, Self::response(message))],
                    _ => Vec::new(),
                }
            }
            Command::AccessoryControl => {
                let Some(control) = message.accessory_control_fields() else {
                    return Vec::new();
                };
                let mut replies = vec![(at_once, Self::response(message))];
                if control.current != 0 {
                    let time = control.switch_time.unwrap_or(self.switch_time);
                    let off = Message::accessory_control(AccessoryControl {
                        current: 0,
                        ..control
                    });
                    replies.push((
                        Duration::from_millis(time as u64 * 10),
                        Self::response(&off),
                    ));
                }
                replies
            }
            Command::LocomotiveSpeed | Command::LocomotiveDirection | Command::LocomotiveFunction => {
                vec![(at_once, Self::response(message))]
            }
            Command::ConfigData => {
                if message.config_data_name() != Some(super::kernel::LOCOMOTIVE_LIST_FILE) {
                    return Vec::new();
                }
                let data = match locomotive_list::compress(self.options.locomotive_list.as_bytes()) {
                    Ok(data) => data,
                    Err(e) => {
                        warn!("simulated locomotive list: {}", e);
                        return Vec::new();
                    }
                };
                let mut frames = config_data_stream(SIMULATED_NODE_UID, &data);
                if self.options.corrupt_crc {
                    if let Some((length, crc)) = frames.first().and_then(|m| m.config_data_stream_header()) {
                        frames[0] = Message::config_data_stream_start(SIMULATED_NODE_UID, length, !crc);
                    }
                }
                frames.into_iter().map(|m| (at_once, m)).collect()
            }
            _ => Vec::new(),
        }
    }

    fn queue(&mut self, after: Duration, message: &Message) {
        let Some(replies) = &self.replies else {
            return;
        };
        let mut message = *message;
        if !message.is_status_data_packet() {
            message.set_hash(calc_hash(SIMULATED_NODE_UID));
        }
        let mut bytes = Vec::with_capacity(NetworkCodec::MAX_FRAME_LEN);
        NetworkCodec::encode(&message, &mut bytes);
        self.sequence += 1;
        let _ = replies.send((Instant::now() + after, self.sequence, bytes));
    }
}

impl Default for CanSimulation {
    fn default() -> Self {
        Self::new()
    }
}

async fn wait_until(due: Option<Instant>) {
    match due {
        Some(due) => tokio::time::sleep_until(due).await,
        None => std::future::pending().await,
    }
}

impl Transport<Message> for CanSimulation {
    fn start(&mut self, link: Link<Message>) -> Result<(), TransportError> {
        if self.reader.is_some() {
            return Err(TransportError::AlreadyStarted);
        }
        let (tx, mut rx) = mpsc::unbounded_channel::<(Instant, u64, Vec<u8>)>();
        self.reader = Some(tokio::spawn(async move {
            let mut decoder = StreamDecoder::<NetworkCodec>::new();
            let mut pending: BinaryHeap<Reply> = BinaryHeap::new();
            loop {
                let next = pending.peek().map(|Reverse((due, _, _))| *due);
                tokio::select! {
                    reply = rx.recv() => match reply {
                        Some(reply) => pending.push(Reverse(reply)),
                        None => break,
                    },
                    _ = wait_until(next) => {
                        let now = Instant::now();
                        while pending.peek().is_some_and(|Reverse((due, _, _))| *due <= now) {
                            if let Some(Reverse((_, _, bytes))) = pending.pop() {
                                decoder.feed(&bytes, |message| {
                                    link.deliver(message);
                                });
                            }
                        }
                    }
                }
            }
        }));
        self.replies = Some(tx);

        let delay = self.options.reply_delay;
        for (contact, occupied) in std::mem::take(&mut self.feedback) {
            let event = Message::feedback_state(FeedbackState {
                device_id: 1,
                contact_id: contact,
                state_old: !occupied as u8,
                state_new: occupied as u8,
                time: 0,
            });
            self.queue(delay, &event);
        }
        Ok(())
    }

    fn stop(&mut self) {
        self.replies = None;
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
    }

    fn send(&mut self, message: &Message) -> bool {
        if self.replies.is_none() {
            return false;
        }
        if let Some(tap) = &self.wire_tap {
            let _ = tap.send(*message);
        }
        if !self.options.respond {
            return true;
        }
        let delay = self.options.reply_delay;
        for (after, reply) in self.reply_to(message) {
            self.queue(delay + after, &reply);
        }
        true
    }

    fn is_simulation(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::marklin_can::locomotive_list::LocomotiveList;
    use crate::protocol::marklin_can::stream::{ConfigDataStreamCollector, StreamStatus};

    fn messages(replies: Vec<(Duration, Message)>) -> Vec<Message> {
        replies.into_iter().map(|(_, m)| m).collect()
    }

    #[test]
    fn answers_ping() {
        let mut sim = CanSimulation::new();
        let replies = messages(sim.reply_to(&Message::ping(1)));
        assert_eq!(replies.len(), 1);
        let reply = replies[0].ping_reply_fields().unwrap();
        assert_eq!(reply.uid, SIMULATED_NODE_UID);
        assert_eq!(reply.device_id, DeviceId::GLEISBOX.0);
    }

    #[test]
    fn answers_descriptors() {
        let mut sim = CanSimulation::new();
        let replies = messages(sim.reply_to(&Message::status_data_config(1, SIMULATED_NODE_UID, 0)));
        let (last, packets) = replies.split_last().unwrap();
        assert_eq!(last.status_data_reply(), Some((SIMULATED_NODE_UID, 0, packets.len() as u8)));
        let bytes: Vec<u8> = packets.iter().flat_map(|m| m.payload().to_vec()).collect();
        assert_eq!(DeviceDescription::from_bytes(&bytes), Ok(CanSimulation::description()));

        assert!(sim.reply_to(&Message::status_data_config(1, SIMULATED_NODE_UID, 3)).is_empty());
        assert!(sim.reply_to(&Message::status_data_config(1, 0x1111, 0)).is_empty());
    }

    #[test]
    fn accessory_switches_off_after_switch_time() {
        let mut sim = CanSimulation::new();
        sim.reply_to(&Message::accessory_switch_time(50));
        let on = Message::accessory_control(AccessoryControl {
            uid: 0x3000,
            position: 1,
            current: 1,
            switch_time: None,
        });
        let replies = sim.reply_to(&on);
        assert_eq!(replies.len(), 2);
        assert!(replies[0].1.is_response());
        assert_eq!(replies[1].0, Duration::from_millis(500));
        assert_eq!(replies[1].1.accessory_control_fields().unwrap().current, 0);
    }

    #[test]
    fn serves_locomotive_list() {
        let mut sim = CanSimulation::new();
        let frames = messages(sim.reply_to(&Message::config_data(1, "loks")));
        let mut collector = ConfigDataStreamCollector::new("loks");
        let statuses: Vec<_> = frames.iter().map(|m| collector.process(m)).collect();
        assert_eq!(statuses.last(), Some(&StreamStatus::Complete));
        let list = LocomotiveList::from_config_data(collector.data()).unwrap();
        assert_eq!(list.len(), 3);
    }

    #[test]
    fn corrupt_crc_breaks_stream() {
        let mut sim = CanSimulation::new().corrupt_crc();
        let frames = messages(sim.reply_to(&Message::config_data(1, "loks")));
        let mut collector = ConfigDataStreamCollector::new("loks");
        let statuses: Vec<_> = frames.iter().map(|m| collector.process(m)).collect();
        assert_eq!(statuses.last(), Some(&StreamStatus::ErrorInvalidCrc));
    }

    #[test]
    fn responses_are_not_answered() {
        let mut sim = CanSimulation::new();
        let mut go = Message::system_go();
        assert_eq!(sim.reply_to(&go).len(), 1);
        go.set_response(true);
        assert!(sim.reply_to(&go).is_empty());
    }

    #[tokio::test]
    async fn replies_go_through_the_decoder() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut sim = CanSimulation::new().with_reply_delay(Duration::ZERO);
        sim.start(Link::new(tx)).unwrap();
        assert!(sim.send(&Message::ping(1)));
        match rx.recv().await {
            Some(crate::traits::LinkEvent::Received(m)) => {
                assert_eq!(m.ping_reply_fields().map(|p| p.uid), Some(SIMULATED_NODE_UID));
            }
            other => panic!("unexpected {:?}", other),
        }
        sim.stop();
    }
}
