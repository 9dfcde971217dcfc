//! Protocol policy traits.
//!
//! A wire protocol plugs into the generic kernel through two traits:
//!
//! | Trait | Runs on | Responsibility |
//! |-------|---------|----------------|
//! | [`Protocol`] | both threads | associated types, startup steps, address ranges, app-side notice handling |
//! | [`Engine`] | worker thread | state machine, caches, request queue, encoding commands |
//!
//! The engine owns all protocol state. It talks to the outside world only
//! through the [`Context`] it is handed on every call.

use core::fmt;
use core::hash::Hash;
use std::cell::RefCell;
use std::rc::Rc;

use super::state::KernelState;
use super::worker::{Context, Inbound};
use crate::traits::{
    DecoderController, DecoderKey, DecoderState, DecoderUpdate, InputChannel, InputController,
    OutputChannel, OutputController,
};

/// Static description of a wire protocol.
pub trait Protocol: fmt::Debug + Sized + 'static {
    /// Worker thread name and log label.
    const NAME: &'static str;

    /// Ordered startup states, ending in [`KernelState::Started`].
    const STARTUP: &'static [KernelState];

    /// Input channels with their inclusive address ranges.
    const INPUT_CHANNELS: &'static [(InputChannel, u32, u32)];

    /// Output channels with their inclusive address ranges.
    const OUTPUT_CHANNELS: &'static [(OutputChannel, u32, u32)];

    /// One wire frame.
    type Message: Clone + fmt::Debug + fmt::Display + Send + 'static;
    /// Configuration snapshot.
    type Config: Clone + fmt::Debug + Send + 'static;
    /// Command posted from the application thread.
    type Command: fmt::Debug + Send + 'static;
    /// Protocol specific notification for the application thread.
    type Notice: fmt::Debug + Send + 'static;
    /// Timer identifiers.
    type Timer: Copy + Eq + Hash + fmt::Debug + Send + 'static;
    /// Worker-side state machine.
    type Engine: Engine<Self>;

    /// Build the engine for one run.
    fn engine(config: Self::Config, simulation: bool) -> Self::Engine;

    /// Keep-alive frames are only logged when explicitly requested.
    fn is_keepalive(_message: &Self::Message) -> bool {
        false
    }

    /// Handle a notice on the application thread.
    ///
    /// Runs before the user's notice hook.
    fn on_notice(_notice: &Self::Notice, _app: &mut AppContext<'_, Self>) {}

    /// Address range of an input channel.
    fn input_address_range(channel: InputChannel) -> Option<(u32, u32)> {
        Self::INPUT_CHANNELS
            .iter()
            .find(|(c, _, _)| *c == channel)
            .map(|(_, min, max)| (*min, *max))
    }

    /// Address range of an output channel.
    fn output_address_range(channel: OutputChannel) -> Option<(u32, u32)> {
        Self::OUTPUT_CHANNELS
            .iter()
            .find(|(c, _, _)| *c == channel)
            .map(|(_, min, max)| (*min, *max))
    }
}

/// Which frames get logged.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FrameLog {
    /// Log received and sent frames.
    pub rx_tx: bool,
    /// Include keep-alive frames.
    pub keepalive: bool,
}

impl FrameLog {
    /// Should `message` be logged?
    pub fn enabled<P: Protocol>(&self, message: &P::Message) -> bool {
        self.rx_tx && (self.keepalive || !P::is_keepalive(message))
    }
}

/// Worker-side protocol state machine.
///
/// Every method runs on the worker thread; none may block.
pub trait Engine<P: Protocol>: Send + 'static {
    /// Transport is up; kick off the startup sequence.
    fn start(&mut self, ctx: &mut Context<'_, P>);

    /// A complete, valid frame arrived.
    fn receive(&mut self, message: P::Message, ctx: &mut Context<'_, P>);

    /// A command from the application thread.
    fn command(&mut self, command: P::Command, ctx: &mut Context<'_, P>);

    /// A timer started through the context expired.
    fn timer(&mut self, timer: P::Timer, ctx: &mut Context<'_, P>);

    /// A new configuration snapshot replaces the current one.
    fn set_config(&mut self, config: P::Config, ctx: &mut Context<'_, P>);

    /// Current frame logging settings.
    fn frame_log(&self) -> FrameLog;
}

/// Application-thread view handed to [`Protocol::on_notice`].
pub struct AppContext<'a, P: Protocol> {
    pub(super) decoders: Option<&'a Rc<RefCell<dyn DecoderController>>>,
    pub(super) inputs: Option<&'a Rc<RefCell<dyn InputController>>>,
    pub(super) outputs: Option<&'a Rc<RefCell<dyn OutputController>>>,
    pub(super) commands: Option<&'a tokio::sync::mpsc::UnboundedSender<Inbound<P>>>,
}

impl<P: Protocol> AppContext<'_, P> {
    /// Snapshot of a decoder from the decoder controller.
    pub fn decoder(&self, key: DecoderKey) -> Option<DecoderState> {
        self.decoders?.borrow().get_decoder(key)
    }

    /// Push a decoder update into the domain model.
    pub fn update_decoder(&self, key: DecoderKey, update: &DecoderUpdate) -> bool {
        match self.decoders {
            Some(decoders) => decoders.borrow_mut().update_decoder(key, update),
            None => false,
        }
    }

    /// Input addresses the domain knows on `channel`.
    pub fn input_addresses(&self, channel: InputChannel) -> Vec<u32> {
        self.inputs
            .map(|inputs| inputs.borrow().input_addresses(channel))
            .unwrap_or_default()
    }

    /// Output addresses the domain knows on `channel`.
    pub fn output_addresses(&self, channel: OutputChannel) -> Vec<u32> {
        self.outputs
            .map(|outputs| outputs.borrow().output_addresses(channel))
            .unwrap_or_default()
    }

    /// Post a command back into the worker.
    pub fn post(&self, command: P::Command) -> bool {
        match self.commands {
            Some(tx) => tx.send(Inbound::Command(command)).is_ok(),
            None => false,
        }
    }
}
