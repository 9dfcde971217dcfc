//! Serial port transport (8N1).

use core::marker::PhantomData;

use tokio_serial::{DataBits, Parity, SerialPortBuilderExt, StopBits};
use tracing::info;

use super::stream::{self, Pump};
use crate::codec::FrameCodec;
use crate::config::{FlowControl, SerialConfig};
use crate::error::TransportError;
use crate::traits::{Link, Transport};

/// Frames of codec `C` over a serial port.
#[derive(Debug)]
pub struct SerialTransport<C> {
    config: SerialConfig,
    pump: Pump,
    _codec: PhantomData<fn() -> C>,
}

impl<C> SerialTransport<C> {
    /// Transport for the port in `config`.
    pub fn new(config: SerialConfig) -> Self {
        Self {
            config,
            pump: Pump::default(),
            _codec: PhantomData,
        }
    }

    /// Port settings.
    pub fn config(&self) -> &SerialConfig {
        &self.config
    }
}

impl<C> Transport<C::Message> for SerialTransport<C>
where
    C: FrameCodec + Send + 'static,
    C::Message: Send + 'static,
{
    fn start(&mut self, link: Link<C::Message>) -> Result<(), TransportError> {
        if self.pump.is_running() {
            return Err(TransportError::AlreadyStarted);
        }
        let flow_control = match self.config.flow_control {
            FlowControl::None => tokio_serial::FlowControl::None,
            FlowControl::Hardware => tokio_serial::FlowControl::Hardware,
        };
        let port = tokio_serial::new(self.config.device.as_str(), self.config.baudrate)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .flow_control(flow_control)
            .open_native_async()
            .map_err(|e| TransportError::Serial(format!("{}: {}", self.config.device, e)))?;
        info!(
            "opened {} at {} baud",
            self.config.device, self.config.baudrate
        );

        let outgoing = self.pump.open();
        self.pump
            .attach(tokio::spawn(stream::run::<C, _>(port, outgoing, link)));
        Ok(())
    }

    fn stop(&mut self) {
        self.pump.stop();
    }

    fn send(&mut self, message: &C::Message) -> bool {
        self.pump.send::<C>(message)
    }
}
