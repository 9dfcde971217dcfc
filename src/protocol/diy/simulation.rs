//! In-process DIY device.
//!
//! Replies are encoded to bytes and run back through a
//! [`StreamDecoder`], so the simulator exercises the same framing path as
//! a serial or TCP link. Frames a real device sends on its own, such as
//! throttle requests, can be queued with [`DiySimulation::with_unsolicited`];
//! they follow the feature report.

use std::collections::HashMap;
use std::sync::mpsc::Sender;
use std::time::Duration;

use tokio::sync::mpsc::{self, UnboundedSender};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use super::message::{DiyCodec, Features, IoState, Message};
use crate::codec::{FrameCodec, StreamDecoder};
use crate::error::TransportError;
use crate::traits::{Link, Transport};

/// Simulator behaviour.
#[derive(Debug, Clone)]
pub struct SimulationOptions {
    /// Answer requests at all.
    pub respond: bool,
    /// Flip a bit in every reply's checksum.
    pub corrupt_checksum: bool,
    /// Delay before a reply arrives.
    pub reply_delay: Duration,
    /// Feature flags reported.
    pub features: Features,
    /// Info text reported.
    pub info: String,
}

impl Default for SimulationOptions {
    fn default() -> Self {
        Self {
            respond: true,
            corrupt_checksum: false,
            reply_delay: Duration::from_millis(5),
            features: Features::new(true, true, true),
            info: format!("rs-trackside DIY simulator {}", env!("CARGO_PKG_VERSION")),
        }
    }
}

/// Simulated DIY device implementing [`Transport`].
pub struct DiySimulation {
    options: SimulationOptions,
    wire_tap: Option<Sender<Message>>,
    inputs: HashMap<u16, IoState>,
    outputs: HashMap<u16, IoState>,
    unsolicited: Vec<Message>,
    replies: Option<UnboundedSender<(Instant, Vec<u8>)>>,
    reader: Option<JoinHandle<()>>,
}

impl DiySimulation {
    /// A well-behaved device with every feature.
    pub fn new() -> Self {
        Self::with_options(SimulationOptions::default())
    }

    /// Device with explicit options.
    pub fn with_options(options: SimulationOptions) -> Self {
        Self {
            options,
            wire_tap: None,
            inputs: HashMap::new(),
            outputs: HashMap::new(),
            unsolicited: Vec::new(),
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

    /// Answer with broken checksums.
    pub fn corrupt_checksums(mut self) -> Self {
        self.options.corrupt_checksum = true;
        self
    }

    /// Report these features.
    pub fn with_features(mut self, features: Features) -> Self {
        self.options.features = features;
        self
    }

    /// Delay every reply by `delay`.
    pub fn with_reply_delay(mut self, delay: Duration) -> Self {
        self.options.reply_delay = delay;
        self
    }

    /// Preset an input the device reports when asked. Unknown addresses
    /// report [`IoState::Invalid`].
    pub fn with_input(mut self, address: u16, state: IoState) -> Self {
        self.inputs.insert(address, state);
        self
    }

    /// Queue a frame the device sends unprompted, right after its first
    /// feature report. Queued frames keep their order.
    pub fn with_unsolicited(mut self, message: Message) -> Self {
        self.unsolicited.push(message);
        self
    }

    /// Current options.
    pub fn options(&self) -> &SimulationOptions {
        &self.options
    }

    fn reply_to(&mut self, message: &Message) -> Vec<Message> {
        match message {
            Message::Heartbeat => vec![Message::Heartbeat],
            Message::GetInfo => vec![Message::info(&self.options.info)],
            Message::GetFeatures => std::iter::once(Message::Features(self.options.features))
                .chain(self.unsolicited.drain(..))
                .collect(),
            Message::GetInputState { address } => vec![Message::SetInputState {
                address: *address,
                state: self.inputs.get(address).copied().unwrap_or(IoState::Invalid),
            }],
            Message::GetOutputState { address } => vec![Message::SetOutputState {
                address: *address,
                state: self.outputs.get(address).copied().unwrap_or(IoState::Invalid),
            }],
            Message::SetOutputState { address, state } => {
                self.outputs.insert(*address, *state);
                vec![message.clone()]
            }
            _ => Vec::new(),
        }
    }
}

impl Default for DiySimulation {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport<Message> for DiySimulation {
    fn start(&mut self, link: Link<Message>) -> Result<(), TransportError> {
        if self.reader.is_some() {
            return Err(TransportError::AlreadyStarted);
        }
        let (tx, mut rx) = mpsc::unbounded_channel::<(Instant, Vec<u8>)>();
        self.reader = Some(tokio::spawn(async move {
            let mut decoder = StreamDecoder::<DiyCodec>::new();
            while let Some((due, bytes)) = rx.recv().await {
                tokio::time::sleep_until(due).await;
                decoder.feed(&bytes, |message| {
                    link.deliver(message);
                });
            }
        }));
        self.replies = Some(tx);
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
            let _ = tap.send(message.clone());
        }
        if !self.options.respond {
            return true;
        }
        let due = Instant::now() + self.options.reply_delay;
        for reply in self.reply_to(message) {
            let mut bytes = Vec::new();
            DiyCodec::encode(&reply, &mut bytes);
            if self.options.corrupt_checksum {
                if let Some(last) = bytes.last_mut() {
                    *last ^= 0x01;
                }
            }
            if let Some(replies) = &self.replies {
                let _ = replies.send((due, bytes));
            }
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
    use crate::protocol::diy::LocoAddress;

    #[test]
    fn replies_follow_requests() {
        let mut sim = DiySimulation::new().with_input(4, IoState::True);
        assert_eq!(sim.reply_to(&Message::Heartbeat), vec![Message::Heartbeat]);
        assert_eq!(
            sim.reply_to(&Message::GetInputState { address: 4 }),
            vec![Message::SetInputState {
                address: 4,
                state: IoState::True
            }]
        );
        assert_eq!(
            sim.reply_to(&Message::GetFeatures),
            vec![Message::Features(Features::new(true, true, true))]
        );
    }

    #[test]
    fn unsolicited_frames_follow_the_first_feature_report() {
        let throttle = Message::ThrottleSubUnsub {
            throttle_id: 2,
            address: LocoAddress::new(3, false),
            subscribe: true,
        };
        let mut sim = DiySimulation::new().with_unsolicited(throttle.clone());
        let features = Message::Features(Features::new(true, true, true));
        assert_eq!(sim.reply_to(&Message::GetFeatures), vec![features.clone(), throttle]);
        assert_eq!(sim.reply_to(&Message::GetFeatures), vec![features]);
    }

    #[test]
    fn outputs_are_remembered() {
        let mut sim = DiySimulation::new();
        let set = Message::SetOutputState {
            address: 7,
            state: IoState::True,
        };
        assert_eq!(sim.reply_to(&set), vec![set.clone()]);
        assert_eq!(sim.reply_to(&Message::GetOutputState { address: 7 }), vec![set]);
    }

    #[test]
    fn send_before_start_fails() {
        let mut sim = DiySimulation::new();
        assert!(!sim.send(&Message::Heartbeat));
        assert!(sim.is_simulation());
    }

    #[tokio::test]
    async fn replies_go_through_the_decoder() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut sim = DiySimulation::new().with_reply_delay(Duration::ZERO);
        sim.start(Link::new(tx)).unwrap();
        assert!(sim.send(&Message::GetInfo));
        match rx.recv().await {
            Some(crate::traits::LinkEvent::Received(Message::Info(text))) => {
                assert!(text.starts_with("rs-trackside DIY simulator"));
            }
            other => panic!("unexpected {:?}", other),
        }
        sim.stop();
    }
}
