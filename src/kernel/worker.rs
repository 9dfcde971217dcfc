//! The kernel's worker thread.
//!
//! One OS thread per kernel, running a current-thread tokio runtime. The
//! worker owns the transport, the engine and all timers. It talks to the
//! application thread over two channels:
//!
//! ```text
//!  app thread ── Inbound (tokio mpsc) ──▶ worker ── Notification (std mpsc) ──▶ app thread
//! ```
//!
//! Transport reads arrive on a third channel (`LinkEvent`). Everything is
//! handled by a single `select!` loop, so the engine never runs
//! concurrently with itself.

use std::collections::HashMap;
use std::sync::mpsc::Sender;
use std::thread::JoinHandle;
use std::time::Duration;

use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::{debug, error, info, trace, warn};

use super::protocol::{Engine, FrameLog, Protocol};
use super::state::{KernelState, StartupSequence};
use super::Notification;
use crate::error::KernelError;
use crate::logging::Logger;
use crate::traits::{
    DecoderKey, DecoderUpdate, InputChannel, Link, LinkEvent, OutputChannel, Transport, TriState,
};

/// Boxed transport for protocol `P`.
pub type BoxedTransport<P> = Box<dyn Transport<<P as Protocol>::Message>>;

/// Message from the application thread (and timers) into the worker.
pub(crate) enum Inbound<P: Protocol> {
    Command(P::Command),
    Config(P::Config),
    Timer(P::Timer, u64),
    Shutdown,
}

// ============================================================================
// Timers
// ============================================================================

/// Generation-tagged one-shot timers.
///
/// Each start bumps the generation; an expiry only fires if its generation
/// is still the active one, so a restarted or cancelled timer whose sleep
/// already finished is ignored.
pub(crate) struct Timers<P: Protocol> {
    tx: UnboundedSender<Inbound<P>>,
    active: HashMap<P::Timer, (u64, tokio::task::JoinHandle<()>)>,
    next_generation: u64,
}

impl<P: Protocol> Timers<P> {
    fn new(tx: UnboundedSender<Inbound<P>>) -> Self {
        Self {
            tx,
            active: HashMap::new(),
            next_generation: 0,
        }
    }

    fn start(&mut self, timer: P::Timer, after: Duration) {
        self.next_generation += 1;
        let generation = self.next_generation;
        let tx = self.tx.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(after).await;
            let _ = tx.send(Inbound::Timer(timer, generation));
        });
        if let Some((_, old)) = self.active.insert(timer, (generation, handle)) {
            old.abort();
        }
    }

    fn cancel(&mut self, timer: P::Timer) {
        if let Some((_, handle)) = self.active.remove(&timer) {
            handle.abort();
        }
    }

    fn is_active(&self, timer: P::Timer) -> bool {
        self.active.contains_key(&timer)
    }

    /// Claim an expiry. True if it belongs to the live generation.
    fn take(&mut self, timer: P::Timer, generation: u64) -> bool {
        match self.active.get(&timer) {
            Some((live, _)) if *live == generation => {
                self.active.remove(&timer);
                true
            }
            _ => false,
        }
    }

    fn cancel_all(&mut self) {
        for (_, (_, handle)) in self.active.drain() {
            handle.abort();
        }
    }
}

// ============================================================================
// Context
// ============================================================================

/// Everything an [`Engine`] may touch besides its own state.
pub struct Context<'a, P: Protocol> {
    transport: &'a mut dyn Transport<P::Message>,
    notifier: &'a Sender<Notification<P>>,
    timers: &'a mut Timers<P>,
    sequence: &'a mut StartupSequence,
    logger: &'a Logger,
    frame_log: FrameLog,
    simulation: bool,
}

impl<P: Protocol> Context<'_, P> {
    /// Write a frame. Returns false if the transport's buffer is full.
    pub fn send(&mut self, message: &P::Message) -> bool {
        if self.frame_log.enabled::<P>(message) {
            debug!(target: "rs_trackside::frames", interface = %self.logger.id(), "tx {}", message);
        } else {
            trace!(target: "rs_trackside::frames", interface = %self.logger.id(), "tx {}", message);
        }
        let ok = self.transport.send(message);
        if !ok {
            warn!(interface = %self.logger.id(), "write buffer full, dropped {}", message);
        }
        ok
    }

    /// Post a notification to the application thread.
    pub fn notify(&mut self, notification: Notification<P>) {
        // the receiver is gone only while the kernel is being dropped
        let _ = self.notifier.send(notification);
    }

    /// Notify a changed input value.
    pub fn notify_input(&mut self, channel: InputChannel, address: u32, value: TriState) {
        self.notify(Notification::Input {
            channel,
            address,
            value,
        });
    }

    /// Notify a changed output value.
    pub fn notify_output(&mut self, channel: OutputChannel, address: u32, value: TriState) {
        self.notify(Notification::Output {
            channel,
            address,
            value,
        });
    }

    /// Notify a decoder change.
    pub fn notify_decoder(&mut self, key: DecoderKey, update: DecoderUpdate) {
        self.notify(Notification::Decoder { key, update });
    }

    /// Post a protocol notice.
    pub fn notice(&mut self, notice: P::Notice) {
        self.notify(Notification::Protocol(notice));
    }

    /// Current lifecycle state.
    pub fn state(&self) -> KernelState {
        self.sequence.current()
    }

    /// Enter the next startup state and tell the application.
    pub fn advance(&mut self) -> Option<KernelState> {
        let next = self.sequence.advance()?;
        info!(interface = %self.logger.id(), "state {}", next);
        self.notify(Notification::State(next));
        Some(next)
    }

    /// Start or restart `timer`.
    pub fn start_timer(&mut self, timer: P::Timer, after: Duration) {
        self.timers.start(timer, after);
    }

    /// Cancel `timer`; a pending expiry is discarded.
    pub fn cancel_timer(&mut self, timer: P::Timer) {
        self.timers.cancel(timer);
    }

    /// True while `timer` is pending.
    pub fn is_timer_active(&self, timer: P::Timer) -> bool {
        self.timers.is_active(timer)
    }

    /// The interface logger.
    pub fn logger(&self) -> &Logger {
        self.logger
    }

    /// True when running on a simulation transport.
    pub fn is_simulation(&self) -> bool {
        self.simulation
    }

    /// Enter [`KernelState::Error`]: stop timers and transport, tell the
    /// application why.
    pub fn fail(&mut self, reason: impl Into<String>) {
        let reason = reason.into();
        if self.sequence.is_failed() {
            return;
        }
        error!(interface = %self.logger.id(), "{}", reason);
        self.sequence.fail();
        self.timers.cancel_all();
        self.transport.stop();
        self.notify(Notification::Error(reason));
        self.notify(Notification::State(KernelState::Error));
    }
}

// ============================================================================
// Worker
// ============================================================================

/// Handle held by the application thread.
pub(crate) struct WorkerHandle<P: Protocol> {
    tx: UnboundedSender<Inbound<P>>,
    thread: JoinHandle<BoxedTransport<P>>,
}

impl<P: Protocol> WorkerHandle<P> {
    pub(crate) fn sender(&self) -> &UnboundedSender<Inbound<P>> {
        &self.tx
    }

    pub(crate) fn post(&self, inbound: Inbound<P>) -> bool {
        self.tx.send(inbound).is_ok()
    }

    /// Stop the worker and wait for it. Returns the transport unless the
    /// worker panicked.
    pub(crate) fn shutdown(self) -> Option<BoxedTransport<P>> {
        let _ = self.tx.send(Inbound::Shutdown);
        match self.thread.join() {
            Ok(transport) => Some(transport),
            Err(_) => {
                error!("{} worker thread panicked", P::NAME);
                None
            }
        }
    }
}

struct Worker<P: Protocol> {
    engine: P::Engine,
    transport: BoxedTransport<P>,
    notifier: Sender<Notification<P>>,
    logger: Logger,
    timers: Timers<P>,
    sequence: StartupSequence,
    simulation: bool,
}

/// Spawn the worker thread for one kernel run.
pub(crate) fn spawn<P: Protocol>(
    engine: P::Engine,
    transport: BoxedTransport<P>,
    notifier: Sender<Notification<P>>,
    logger: Logger,
) -> Result<WorkerHandle<P>, KernelError> {
    let (tx, rx) = mpsc::unbounded_channel();
    let simulation = transport.is_simulation();
    let worker = Worker::<P> {
        engine,
        transport,
        notifier,
        logger,
        timers: Timers::new(tx.clone()),
        sequence: StartupSequence::new(P::STARTUP),
        simulation,
    };

    let thread = std::thread::Builder::new()
        .name(P::NAME.to_string())
        .spawn(move || worker.run_blocking(rx))
        .map_err(KernelError::Spawn)?;

    Ok(WorkerHandle { tx, thread })
}

impl<P: Protocol> Worker<P> {
    fn run_blocking(self, inbound: UnboundedReceiver<Inbound<P>>) -> BoxedTransport<P> {
        let runtime = match tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
        {
            Ok(runtime) => runtime,
            Err(e) => {
                let reason = format!("failed to build worker runtime: {e}");
                error!(interface = %self.logger.id(), "{}", reason);
                let _ = self.notifier.send(Notification::Error(reason));
                let _ = self.notifier.send(Notification::State(KernelState::Error));
                return self.transport;
            }
        };
        runtime.block_on(self.run(inbound))
    }

    async fn run(mut self, mut inbound: UnboundedReceiver<Inbound<P>>) -> BoxedTransport<P> {
        let (link_tx, mut link_rx) = mpsc::unbounded_channel::<LinkEvent<P::Message>>();
        // keeps link_rx open after the transport drops its senders
        let _link_keepalive = link_tx.clone();

        let initial = self.sequence.begin();
        info!(interface = %self.logger.id(), "state {}", initial);
        let _ = self.notifier.send(Notification::State(initial));

        match self.transport.start(Link::new(link_tx)) {
            Ok(()) => self.dispatch(|engine, ctx| engine.start(ctx)),
            Err(e) => self.dispatch(|_, ctx| ctx.fail(format!("transport start failed: {e}"))),
        }

        loop {
            tokio::select! {
                event = inbound.recv() => match event {
                    None | Some(Inbound::Shutdown) => break,
                    Some(Inbound::Command(command)) => {
                        if self.sequence.is_failed() {
                            debug!(interface = %self.logger.id(), "ignoring {:?} after failure", command);
                        } else {
                            self.dispatch(|engine, ctx| engine.command(command, ctx));
                        }
                    }
                    Some(Inbound::Config(config)) => {
                        self.dispatch(|engine, ctx| engine.set_config(config, ctx));
                    }
                    Some(Inbound::Timer(timer, generation)) => {
                        if self.timers.take(timer, generation) && !self.sequence.is_failed() {
                            self.dispatch(|engine, ctx| engine.timer(timer, ctx));
                        }
                    }
                },
                Some(event) = link_rx.recv() => match event {
                    LinkEvent::Received(message) => {
                        if !self.sequence.is_failed() {
                            self.log_rx(&message);
                            self.dispatch(|engine, ctx| engine.receive(message, ctx));
                        }
                    }
                    LinkEvent::Failed(e) => {
                        self.dispatch(|_, ctx| ctx.fail(format!("transport failure: {e}")));
                    }
                },
            }
        }

        self.timers.cancel_all();
        self.transport.stop();
        self.sequence.reset();
        debug!(interface = %self.logger.id(), "worker stopped");
        self.transport
    }

    fn log_rx(&self, message: &P::Message) {
        if self.engine.frame_log().enabled::<P>(message) {
            debug!(target: "rs_trackside::frames", interface = %self.logger.id(), "rx {}", message);
        } else {
            trace!(target: "rs_trackside::frames", interface = %self.logger.id(), "rx {}", message);
        }
    }

    fn dispatch(&mut self, f: impl FnOnce(&mut P::Engine, &mut Context<'_, P>)) {
        let frame_log = self.engine.frame_log();
        let mut ctx = Context {
            transport: &mut *self.transport,
            notifier: &self.notifier,
            timers: &mut self.timers,
            sequence: &mut self.sequence,
            logger: &self.logger,
            frame_log,
            simulation: self.simulation,
        };
        f(&mut self.engine, &mut ctx);
    }
}
