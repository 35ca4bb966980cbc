//! In-memory loopback transport

use tokio::io::DuplexStream;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::port::{PortHandle, PortOpener};
use crate::types::SerialOptions;
use crate::{AresplotError, Result};

/// Opens in-memory ports backed by [`tokio::io::duplex`].
///
/// Each successful open hands the device end to the paired [`LoopbackDevices`]
/// receiver, where an emulator or a test drives it.
#[derive(Debug, Clone)]
pub struct LoopbackOpener {
    devices: mpsc::UnboundedSender<LoopbackDevice>,
}

/// Receives the device end of every port opened by a [`LoopbackOpener`].
#[derive(Debug)]
pub struct LoopbackDevices {
    rx: mpsc::UnboundedReceiver<LoopbackDevice>,
}

/// Device side of a loopback port.
#[derive(Debug)]
pub struct LoopbackDevice {
    pub stream: DuplexStream,
    pub options: SerialOptions,
    lost: CancellationToken,
}

impl LoopbackOpener {
    pub fn new() -> (Self, LoopbackDevices) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { devices: tx }, LoopbackDevices { rx })
    }
}

impl LoopbackDevices {
    /// Wait for the next opened port.
    pub async fn next(&mut self) -> Option<LoopbackDevice> {
        self.rx.recv().await
    }
}

impl LoopbackDevice {
    /// Simulate the cable being pulled.
    pub fn disconnect(&self) {
        info!(path = %self.options.path, "Loopback device disconnected");
        self.lost.cancel();
    }

    pub fn into_stream(self) -> DuplexStream {
        self.stream
    }
}

#[async_trait::async_trait]
impl PortOpener for LoopbackOpener {
    async fn open(&self, options: &SerialOptions) -> Result<PortHandle> {
        if self.devices.is_closed() {
            return Err(AresplotError::connection_failed(format!("no device attached at {}", options.path)));
        }

        let (host, device) = tokio::io::duplex(options.buffer_size.max(1));
        let (reader, writer) = tokio::io::split(host);
        let lost = CancellationToken::new();

        let device = LoopbackDevice { stream: device, options: options.clone(), lost: lost.clone() };
        self.devices
            .send(device)
            .map_err(|_| AresplotError::connection_failed(format!("no device attached at {}", options.path)))?;

        debug!(path = %options.path, baud = options.baud_rate, "Loopback port opened");
        Ok(PortHandle::new(Box::new(reader), Box::new(writer), options.clone()).with_lost_token(lost))
    }
}
