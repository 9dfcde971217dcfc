//! Framed I/O task shared by the byte-stream transports.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::codec::{FrameCodec, StreamDecoder};
use crate::error::TransportError;
use crate::traits::Link;

/// Frames that may wait for the writer before `send` reports overflow.
pub const WRITE_QUEUE_FRAMES: usize = 64;

const READ_BUFFER: usize = 1024;

/// Write queue and task handle of a running transport.
#[derive(Debug, Default)]
pub(crate) struct Pump {
    outgoing: Option<mpsc::Sender<Vec<u8>>>,
    task: Option<JoinHandle<()>>,
}

impl Pump {
    pub(crate) fn is_running(&self) -> bool {
        self.task.is_some()
    }

    /// Channel for a new run; the receiver goes to the I/O task.
    pub(crate) fn open(&mut self) -> mpsc::Receiver<Vec<u8>> {
        let (tx, rx) = mpsc::channel(WRITE_QUEUE_FRAMES);
        self.outgoing = Some(tx);
        rx
    }

    pub(crate) fn attach(&mut self, task: JoinHandle<()>) {
        self.task = Some(task);
    }

    pub(crate) fn stop(&mut self) {
        self.outgoing = None;
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }

    /// Encode and queue one frame.
    pub(crate) fn send<C: FrameCodec>(&self, message: &C::Message) -> bool {
        let Some(outgoing) = &self.outgoing else {
            return false;
        };
        let mut bytes = Vec::with_capacity(C::MAX_FRAME_LEN);
        C::encode(message, &mut bytes);
        match outgoing.try_send(bytes) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                warn!("write queue full, frame dropped");
                false
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }
}

/// Move frames between `stream` and the kernel until either side closes.
pub(crate) async fn run<C, S>(stream: S, mut outgoing: mpsc::Receiver<Vec<u8>>, link: Link<C::Message>)
where
    C: FrameCodec,
    S: AsyncRead + AsyncWrite,
{
    let (mut reader, mut writer) = tokio::io::split(stream);
    let mut decoder = StreamDecoder::<C>::new();
    let mut buf = [0u8; READ_BUFFER];

    loop {
        tokio::select! {
            read = reader.read(&mut buf) => match read {
                Ok(0) => {
                    link.fail(TransportError::Closed);
                    break;
                }
                Ok(n) => {
                    decoder.feed(&buf[..n], |message| {
                        link.deliver(message);
                    });
                }
                Err(e) => {
                    link.fail(TransportError::Io(e));
                    break;
                }
            },
            frame = outgoing.recv() => match frame {
                Some(bytes) => {
                    if let Err(e) = writer.write_all(&bytes).await {
                        link.fail(TransportError::Io(e));
                        break;
                    }
                }
                None => break,
            },
        }
    }
    debug!("stream closed");
}
