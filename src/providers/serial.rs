//! Native serial ports via `tokio-serial`

use tokio_serial::{DataBits, FlowControl as SerialFlow, Parity as SerialParity, SerialPortBuilderExt, StopBits};
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::port::{LossDetectingReader, PortHandle, PortOpener};
use crate::types::{FlowControl, Parity, SerialOptions};
use crate::{AresplotError, Result};

/// Opens operating-system serial ports.
#[derive(Debug, Clone, Copy, Default)]
pub struct SerialPortOpener;

#[async_trait::async_trait]
impl PortOpener for SerialPortOpener {
    async fn open(&self, options: &SerialOptions) -> Result<PortHandle> {
        let data_bits = match options.data_bits {
            7 => DataBits::Seven,
            _ => DataBits::Eight,
        };
        let stop_bits = match options.stop_bits {
            2 => StopBits::Two,
            _ => StopBits::One,
        };
        let parity = match options.parity {
            Parity::None => SerialParity::None,
            Parity::Even => SerialParity::Even,
            Parity::Odd => SerialParity::Odd,
        };
        let flow_control = match options.flow_control {
            FlowControl::None => SerialFlow::None,
            FlowControl::Hardware => SerialFlow::Hardware,
        };

        let stream = tokio_serial::new(&options.path, options.baud_rate)
            .data_bits(data_bits)
            .stop_bits(stop_bits)
            .parity(parity)
            .flow_control(flow_control)
            .open_native_async()
            .map_err(|e| AresplotError::connection_failed_with_source(format!("open {}", options.path), Box::new(e)))?;

        info!(path = %options.path, baud = options.baud_rate, "Serial port opened");
        let (reader, writer) = tokio::io::split(stream);
        // Unplugging surfaces as a read error, never as a separate notification
        let lost = CancellationToken::new();
        let reader = LossDetectingReader::new(reader, lost.clone());
        Ok(PortHandle::new(Box::new(reader), Box::new(writer), options.clone()).with_lost_token(lost))
    }
}
