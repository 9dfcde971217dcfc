//! UDP datagram transport.
//!
//! Each outgoing frame is one datagram. Incoming datagrams may carry
//! several frames back to back; a trailing partial frame is dropped since
//! datagrams never continue each other.

use core::marker::PhantomData;

use tokio::net::UdpSocket;
use tracing::{info, warn};

use super::stream::Pump;
use crate::codec::{to_hex, Decoded, FrameCodec};
use crate::config::NetworkConfig;
use crate::error::TransportError;
use crate::traits::{Link, Transport};

const DATAGRAM_MAX: usize = 1500;

/// Frames of codec `C` exchanged as UDP datagrams.
#[derive(Debug)]
pub struct UdpTransport<C> {
    hostname: String,
    remote_port: u16,
    local_port: u16,
    pump: Pump,
    _codec: PhantomData<fn() -> C>,
}

impl<C> UdpTransport<C> {
    /// Send to `hostname:remote_port`, listen on `local_port`.
    pub fn new(hostname: impl Into<String>, remote_port: u16, local_port: u16) -> Self {
        Self {
            hostname: hostname.into(),
            remote_port,
            local_port,
            pump: Pump::default(),
            _codec: PhantomData,
        }
    }

    /// Transport from config; `remote_port` applies when none is set.
    pub fn from_config(config: &NetworkConfig, remote_port: u16, local_port: u16) -> Self {
        Self::new(
            config.hostname.as_str(),
            config.port_or(remote_port),
            local_port,
        )
    }

    /// Remote endpoint as `host:port`.
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.hostname, self.remote_port)
    }

    /// Local port datagrams are received on.
    pub fn local_port(&self) -> u16 {
        self.local_port
    }
}

/// Split one datagram into frames. Returns the number of bytes dropped.
pub fn decode_datagram<C: FrameCodec>(datagram: &[u8], mut deliver: impl FnMut(C::Message)) -> usize {
    let mut pos = 0;
    let mut dropped = 0;
    while pos < datagram.len() {
        match C::decode(&datagram[pos..]) {
            Decoded::Frame { message, len } => {
                deliver(message);
                pos += len;
            }
            Decoded::Invalid => {
                dropped += 1;
                pos += 1;
            }
            Decoded::Incomplete => {
                dropped += datagram.len() - pos;
                break;
            }
        }
    }
    if dropped > 0 {
        warn!("dropped {} bytes of datagram: {}", dropped, to_hex(datagram));
    }
    dropped
}

impl<C> Transport<C::Message> for UdpTransport<C>
where
    C: FrameCodec + Send + 'static,
    C::Message: Send + 'static,
{
    fn start(&mut self, link: Link<C::Message>) -> Result<(), TransportError> {
        if self.pump.is_running() {
            return Err(TransportError::AlreadyStarted);
        }
        if self.hostname.is_empty() {
            return Err(TransportError::InvalidAddress(self.endpoint()));
        }
        let mut outgoing = self.pump.open();
        let endpoint = self.endpoint();
        let local_port = self.local_port;
        self.pump.attach(tokio::spawn(async move {
            let socket = match UdpSocket::bind(("0.0.0.0", local_port)).await {
                Ok(socket) => socket,
                Err(e) => {
                    warn!("bind to port {} failed: {}", local_port, e);
                    link.fail(TransportError::Io(e));
                    return;
                }
            };
            let lookup = tokio::net::lookup_host(endpoint.clone()).await;
            let remote = match lookup {
                Ok(mut addrs) => match addrs.next() {
                    Some(addr) => addr,
                    None => {
                        link.fail(TransportError::InvalidAddress(endpoint));
                        return;
                    }
                },
                Err(_) => {
                    link.fail(TransportError::InvalidAddress(endpoint));
                    return;
                }
            };
            info!("udp {} <-> port {}", remote, local_port);

            let mut buf = [0u8; DATAGRAM_MAX];
            loop {
                tokio::select! {
                    received = socket.recv_from(&mut buf) => match received {
                        Ok((n, from)) => {
                            if from.ip() != remote.ip() {
                                continue;
                            }
                            decode_datagram::<C>(&buf[..n], |message| {
                                link.deliver(message);
                            });
                        }
                        Err(e) => {
                            link.fail(TransportError::Io(e));
                            break;
                        }
                    },
                    datagram = outgoing.recv() => match datagram {
                        Some(bytes) => {
                            if let Err(e) = socket.send_to(&bytes, remote).await {
                                link.fail(TransportError::Io(e));
                                break;
                            }
                        }
                        None => break,
                    },
                }
            }
        }));
        Ok(())
    }

    fn stop(&mut self) {
        self.pump.stop();
    }

    fn send(&mut self, message: &C::Message) -> bool {
        self.pump.send::<C>(message)
    }
}
