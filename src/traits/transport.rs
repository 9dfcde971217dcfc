//! Transport abstraction.
//!
//! A transport moves whole messages between a kernel and the hardware.
//! Decoding happens inside the transport, so the kernel only ever sees
//! complete, checksum-valid messages.
//!
//! # Threading
//!
//! The kernel moves its transport into the worker thread and calls every
//! method from there, inside the worker's tokio runtime. `start` may spawn
//! tasks on that runtime. Received messages and failures come back
//! through the [`Link`] given to `start`.

use tokio::sync::mpsc::UnboundedSender;

use crate::error::TransportError;

/// Event sent from a transport to its kernel.
#[derive(Debug)]
pub enum LinkEvent<M> {
    /// A complete, valid message.
    Received(M),
    /// The link is unusable.
    Failed(TransportError),
}

/// Sending half handed to a transport on `start`.
#[derive(Debug)]
pub struct Link<M> {
    tx: UnboundedSender<LinkEvent<M>>,
}

impl<M> Clone for Link<M> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

impl<M> Link<M> {
    /// Wraps the kernel's event channel.
    pub fn new(tx: UnboundedSender<LinkEvent<M>>) -> Self {
        Self { tx }
    }

    /// Forward a received message. Returns false once the kernel is gone.
    pub fn deliver(&self, message: M) -> bool {
        self.tx.send(LinkEvent::Received(message)).is_ok()
    }

    /// Report a fatal link error.
    pub fn fail(&self, error: TransportError) {
        let _ = self.tx.send(LinkEvent::Failed(error));
    }
}

/// Byte link to a command station, parameterised by message type.
pub trait Transport<M>: Send + 'static {
    /// Begin asynchronous I/O. Called on the worker runtime.
    fn start(&mut self, link: Link<M>) -> Result<(), TransportError>;

    /// Cancel pending I/O and release the handle. Idempotent.
    fn stop(&mut self);

    /// Queue `message` for writing. Returns false if the write buffer is
    /// full or the transport is not running; never blocks.
    fn send(&mut self, message: &M) -> bool;

    /// True for in-process simulators.
    fn is_simulation(&self) -> bool {
        false
    }
}
