//! Generic protocol kernel.
//!
//! A [`Kernel`] is the application-thread handle of one hardware interface.
//! It owns a transport and a worker thread; the protocol itself is plugged
//! in through the [`Protocol`] and [`Engine`] policy traits.
//!
//! # Lifecycle
//!
//! | Call | Effect |
//! |------|--------|
//! | [`Kernel::new`] | stores config, transport and logger |
//! | `set_*_controller` | wires the domain model (before `start`) |
//! | [`Kernel::start`] | spawns the worker, starts the transport, runs the startup sequence |
//! | [`Kernel::process_events`] | applies worker notifications to the controllers |
//! | [`Kernel::stop`] | stops the worker, joins it and takes the transport back |
//!
//! # Example
//!
//! ```rust
//! use std::cell::RefCell;
//! use std::rc::Rc;
//! use std::time::Duration;
//!
//! use rs_trackside::config::DiyConfig;
//! use rs_trackside::hal::{MockDecoderController, MockInputController, MockOutputController};
//! use rs_trackside::kernel::{Kernel, KernelState};
//! use rs_trackside::logging::Logger;
//! use rs_trackside::protocol::diy::{Diy, DiySimulation};
//!
//! let mut kernel: Kernel<Diy> = Kernel::new(
//!     DiyConfig::default(),
//!     DiySimulation::new(),
//!     Logger::new("diy"),
//! );
//! kernel.set_decoder_controller(Rc::new(RefCell::new(MockDecoderController::new())));
//! kernel.set_input_controller(Rc::new(RefCell::new(MockInputController::new())));
//! kernel.set_output_controller(Rc::new(RefCell::new(MockOutputController::for_protocol::<Diy>())));
//!
//! kernel.start().unwrap();
//! assert!(kernel.run_until(Duration::from_secs(2), |k| k.state() == KernelState::Started));
//! kernel.stop();
//! assert_eq!(kernel.state(), KernelState::Offline);
//! ```

pub mod cache;
mod protocol;
mod request_queue;
mod state;
mod worker;

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

pub use cache::AddressCache;
pub use protocol::{AppContext, Engine, FrameLog, Protocol};
pub use request_queue::{PendingRequestQueue, Retry};
pub use state::{KernelState, StartupSequence};
pub use worker::{BoxedTransport, Context};

use crate::error::{CommandError, KernelError};
use crate::logging::Logger;
use crate::traits::{
    DecoderController, DecoderKey, DecoderUpdate, InputChannel, InputController, OutputChannel,
    OutputController, Transport, TriState,
};
use worker::{Inbound, WorkerHandle};

/// Worker → application thread message.
#[derive(Debug)]
pub enum Notification<P: Protocol> {
    /// Lifecycle state changed.
    State(KernelState),
    /// Why the kernel entered [`KernelState::Error`].
    Error(String),
    /// Input value changed.
    Input {
        /// Channel.
        channel: InputChannel,
        /// Address.
        address: u32,
        /// New value.
        value: TriState,
    },
    /// Output value changed.
    Output {
        /// Channel.
        channel: OutputChannel,
        /// Address.
        address: u32,
        /// New value.
        value: TriState,
    },
    /// Decoder state reported by the hardware.
    Decoder {
        /// Which decoder.
        key: DecoderKey,
        /// What changed.
        update: DecoderUpdate,
    },
    /// Protocol specific.
    Protocol(P::Notice),
}

/// Application-thread handle of one interface.
///
/// Not `Send`: it lives on the application thread together with the
/// controllers it calls.
pub struct Kernel<P: Protocol> {
    config: P::Config,
    logger: Logger,
    transport: Option<BoxedTransport<P>>,
    simulation: bool,
    worker: Option<WorkerHandle<P>>,
    events: Option<Receiver<Notification<P>>>,
    state: KernelState,
    last_error: Option<String>,
    decoders: Option<Rc<RefCell<dyn DecoderController>>>,
    inputs: Option<Rc<RefCell<dyn InputController>>>,
    outputs: Option<Rc<RefCell<dyn OutputController>>>,
    state_hook: Option<Box<dyn FnMut(KernelState)>>,
    notice_hook: Option<Box<dyn FnMut(&P::Notice)>>,
}

impl<P: Protocol> Kernel<P> {
    /// Creates a stopped kernel.
    pub fn new(config: P::Config, transport: impl Transport<P::Message>, logger: Logger) -> Self {
        Self::with_boxed_transport(config, Box::new(transport), logger)
    }

    /// Like [`new`](Self::new) for an already boxed transport.
    pub fn with_boxed_transport(
        config: P::Config,
        transport: BoxedTransport<P>,
        logger: Logger,
    ) -> Self {
        let simulation = transport.is_simulation();
        Self {
            config,
            logger,
            transport: Some(transport),
            simulation,
            worker: None,
            events: None,
            state: KernelState::Offline,
            last_error: None,
            decoders: None,
            inputs: None,
            outputs: None,
            state_hook: None,
            notice_hook: None,
        }
    }

    // ========================================================================
    // Wiring
    // ========================================================================

    /// Set the decoder controller. Must happen before [`start`](Self::start).
    pub fn set_decoder_controller(&mut self, controller: Rc<RefCell<dyn DecoderController>>) {
        debug_assert!(!self.is_running(), "controllers are fixed while running");
        self.decoders = Some(controller);
    }

    /// Set the input controller. Must happen before [`start`](Self::start).
    pub fn set_input_controller(&mut self, controller: Rc<RefCell<dyn InputController>>) {
        debug_assert!(!self.is_running(), "controllers are fixed while running");
        self.inputs = Some(controller);
    }

    /// Set the output controller. Must happen before [`start`](Self::start).
    pub fn set_output_controller(&mut self, controller: Rc<RefCell<dyn OutputController>>) {
        debug_assert!(!self.is_running(), "controllers are fixed while running");
        self.outputs = Some(controller);
    }

    /// Called on every state change, on the application thread.
    pub fn on_state_changed(&mut self, hook: impl FnMut(KernelState) + 'static) {
        self.state_hook = Some(Box::new(hook));
    }

    /// Called for every protocol notice, after the protocol's own handling.
    pub fn on_notice(&mut self, hook: impl FnMut(&P::Notice) + 'static) {
        self.notice_hook = Some(Box::new(hook));
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Spawn the worker and begin the startup sequence.
    pub fn start(&mut self) -> Result<(), KernelError> {
        if self.worker.is_some() {
            return Err(KernelError::AlreadyRunning);
        }
        debug_assert!(
            self.decoders.is_some() && self.inputs.is_some() && self.outputs.is_some(),
            "set the decoder, input and output controllers before start()"
        );
        let transport = self
            .transport
            .take()
            .ok_or(KernelError::TransportUnavailable)?;

        // late notifications from a previous run
        self.process_events();

        let (tx, rx) = mpsc::channel();
        let engine = P::engine(self.config.clone(), self.simulation);
        let worker = worker::spawn::<P>(engine, transport, tx, self.logger.clone())?;

        info!(interface = %self.logger.id(), "{} kernel started", P::NAME);
        self.worker = Some(worker);
        self.events = Some(rx);
        self.last_error = None;
        self.set_state(KernelState::Initial);
        Ok(())
    }

    /// Stop the worker and join it. Safe to call when not running.
    pub fn stop(&mut self) {
        let Some(worker) = self.worker.take() else {
            return;
        };
        self.transport = worker.shutdown();
        info!(interface = %self.logger.id(), "{} kernel stopped", P::NAME);
        self.set_state(KernelState::Offline);
    }

    /// True between `start` and `stop`.
    pub fn is_running(&self) -> bool {
        self.worker.is_some()
    }

    /// State as last reported by the worker.
    pub fn state(&self) -> KernelState {
        self.state
    }

    /// Reason of the last failure.
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// True if the transport is a simulator.
    pub fn is_simulation(&self) -> bool {
        self.simulation
    }

    /// The logger handle.
    pub fn logger(&self) -> &Logger {
        &self.logger
    }

    /// Current configuration.
    pub fn config(&self) -> &P::Config {
        &self.config
    }

    /// Replace the configuration; a running worker gets a copy.
    pub fn set_config(&mut self, config: P::Config) {
        if let Some(worker) = &self.worker {
            worker.post(Inbound::Config(config.clone()));
        }
        self.config = config;
    }

    /// Post a command into the worker. Never blocks.
    pub fn post(&self, command: P::Command) -> Result<(), CommandError> {
        match &self.worker {
            Some(worker) if worker.post(Inbound::Command(command)) => Ok(()),
            _ => Err(CommandError::NotRunning),
        }
    }

    /// Reject `address` unless `channel` supports it.
    pub fn check_output_address(channel: OutputChannel, address: u32) -> Result<(), CommandError> {
        let (min, max) = P::output_address_range(channel).ok_or(CommandError::UnsupportedChannel)?;
        if (min..=max).contains(&address) {
            Ok(())
        } else {
            Err(CommandError::AddressOutOfRange { address, min, max })
        }
    }

    /// Reject `address` unless `channel` supports it.
    pub fn check_input_address(channel: InputChannel, address: u32) -> Result<(), CommandError> {
        let (min, max) = P::input_address_range(channel).ok_or(CommandError::UnsupportedChannel)?;
        if (min..=max).contains(&address) {
            Ok(())
        } else {
            Err(CommandError::AddressOutOfRange { address, min, max })
        }
    }

    // ========================================================================
    // Event loop integration
    // ========================================================================

    /// Apply every queued notification. Returns how many were handled.
    pub fn process_events(&mut self) -> usize {
        let Some(rx) = self.events.take() else {
            return 0;
        };
        let mut handled = 0;
        while let Ok(notification) = rx.try_recv() {
            self.dispatch(notification);
            handled += 1;
        }
        self.events = Some(rx);
        handled
    }

    /// Block up to `timeout` for one notification and apply it.
    pub fn wait_event(&mut self, timeout: Duration) -> bool {
        let Some(rx) = self.events.take() else {
            return false;
        };
        let received = rx.recv_timeout(timeout);
        self.events = Some(rx);
        match received {
            Ok(notification) => {
                self.dispatch(notification);
                true
            }
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => false,
        }
    }

    /// Process notifications until `done` holds or `timeout` passes.
    pub fn run_until(&mut self, timeout: Duration, mut done: impl FnMut(&Self) -> bool) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            self.process_events();
            if done(self) {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            self.wait_event((deadline - now).min(Duration::from_millis(10)));
        }
    }

    fn set_state(&mut self, state: KernelState) {
        if self.state == state {
            return;
        }
        self.state = state;
        if let Some(hook) = &mut self.state_hook {
            hook(state);
        }
    }

    fn dispatch(&mut self, notification: Notification<P>) {
        match notification {
            Notification::State(state) => {
                if self.worker.is_some() {
                    self.set_state(state);
                } else {
                    debug!(interface = %self.logger.id(), "late state {} after stop", state);
                }
            }
            Notification::Error(reason) => {
                warn!(interface = %self.logger.id(), "interface offline: {}", reason);
                self.last_error = Some(reason);
            }
            Notification::Input {
                channel,
                address,
                value,
            } => {
                if let Some(inputs) = &self.inputs {
                    inputs
                        .borrow_mut()
                        .update_input_value(channel, address, value);
                }
            }
            Notification::Output {
                channel,
                address,
                value,
            } => {
                if let Some(outputs) = &self.outputs {
                    outputs
                        .borrow_mut()
                        .update_output_value(channel, address, value);
                }
            }
            Notification::Decoder { key, update } => {
                if let Some(decoders) = &self.decoders {
                    if !decoders.borrow_mut().update_decoder(key, &update) {
                        debug!(interface = %self.logger.id(), "no decoder {}", key);
                    }
                }
            }
            Notification::Protocol(notice) => {
                let mut app = AppContext {
                    decoders: self.decoders.as_ref(),
                    inputs: self.inputs.as_ref(),
                    outputs: self.outputs.as_ref(),
                    commands: self.worker.as_ref().map(|w| w.sender()),
                };
                P::on_notice(&notice, &mut app);
                if let Some(hook) = &mut self.notice_hook {
                    hook(&notice);
                }
            }
        }
    }
}

impl<P: Protocol> Drop for Kernel<P> {
    fn drop(&mut self) {
        self.stop();
    }
}
