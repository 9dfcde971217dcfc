//! TCP client transport.

use core::marker::PhantomData;

use tokio::net::TcpStream;
use tracing::{info, warn};

use super::stream::{self, Pump};
use crate::codec::FrameCodec;
use crate::config::NetworkConfig;
use crate::error::TransportError;
use crate::traits::{Link, Transport};

/// Frames of codec `C` over a TCP connection.
///
/// `start` returns at once; the connection is made on the worker runtime
/// and a failed connect is reported through the link.
#[derive(Debug)]
pub struct TcpTransport<C> {
    hostname: String,
    port: u16,
    pump: Pump,
    _codec: PhantomData<fn() -> C>,
}

impl<C> TcpTransport<C> {
    /// Transport to `hostname:port`.
    pub fn new(hostname: impl Into<String>, port: u16) -> Self {
        Self {
            hostname: hostname.into(),
            port,
            pump: Pump::default(),
            _codec: PhantomData,
        }
    }

    /// Transport from config, `default_port` when none is set.
    pub fn from_config(config: &NetworkConfig, default_port: u16) -> Self {
        Self::new(config.hostname.as_str(), config.port_or(default_port))
    }

    /// Remote endpoint as `host:port`.
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.hostname, self.port)
    }
}

impl<C> Transport<C::Message> for TcpTransport<C>
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
        let outgoing = self.pump.open();
        let endpoint = self.endpoint();
        self.pump.attach(tokio::spawn(async move {
            let socket = match TcpStream::connect(endpoint.as_str()).await {
                Ok(socket) => socket,
                Err(e) => {
                    warn!("connect to {} failed: {}", endpoint, e);
                    link.fail(TransportError::Io(e));
                    return;
                }
            };
            if let Err(e) = socket.set_nodelay(true) {
                warn!("set_nodelay failed: {}", e);
            }
            info!("connected to {}", endpoint);
            stream::run::<C, _>(socket, outgoing, link).await;
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::diy::{DiyCodec, Message};
    use crate::traits::LinkEvent;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::sync::mpsc;

    #[test]
    fn endpoint_from_config() {
        let config = NetworkConfig::default().with_hostname("10.0.0.7");
        let transport = TcpTransport::<DiyCodec>::from_config(&config, 5550);
        assert_eq!(transport.endpoint(), "10.0.0.7:5550");
    }

    #[test]
    fn send_before_start_fails() {
        let mut transport = TcpTransport::<DiyCodec>::new("localhost", 5550);
        assert!(!transport.send(&Message::Heartbeat));
        assert!(!transport.is_simulation());
    }

    #[tokio::test]
    async fn exchanges_frames() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut transport = TcpTransport::<DiyCodec>::new("127.0.0.1", port);
        transport.start(Link::new(tx)).unwrap();
        assert!(matches!(
            transport.start(Link::new(mpsc::unbounded_channel().0)),
            Err(TransportError::AlreadyStarted)
        ));

        let (mut peer, _) = listener.accept().await.unwrap();
        assert!(transport.send(&Message::Heartbeat));
        let mut buf = [0u8; 2];
        peer.read_exact(&mut buf).await.unwrap();
        assert_eq!(buf, [0x00, 0x00]);

        // garbage byte first, then a heartbeat
        peer.write_all(&[0x77, 0x00, 0x00]).await.unwrap();
        match rx.recv().await {
            Some(LinkEvent::Received(message)) => assert_eq!(message, Message::Heartbeat),
            other => panic!("unexpected {:?}", other),
        }

        drop(peer);
        assert!(matches!(
            rx.recv().await,
            Some(LinkEvent::Failed(TransportError::Closed))
        ));
        transport.stop();
        transport.stop();
    }
}
