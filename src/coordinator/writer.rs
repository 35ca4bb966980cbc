//! Writable half of the port, held by the coordinator for control frames

use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use crate::port::{BoxedWriter, PortHandle};
use crate::{AresplotError, Result};

/// Sequenced writer for outbound Aresplot frames.
///
/// Taken from the port at connect and handed back at disconnect. A failed
/// or stalled write hands it back too, and the next send takes it again.
pub struct ControlWriter {
    writer: Option<BoxedWriter>,
    write_timeout: Duration,
    sent_frames: u64,
}

impl std::fmt::Debug for ControlWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ControlWriter")
            .field("held", &self.writer.is_some())
            .field("write_timeout", &self.write_timeout)
            .field("sent_frames", &self.sent_frames)
            .finish()
    }
}

impl ControlWriter {
    /// A writer whose sends give up after `write_timeout`.
    pub fn new(write_timeout: Duration) -> Self {
        Self { writer: None, write_timeout, sent_frames: 0 }
    }

    /// Take the writer from `port`. Returns whether one is now held.
    pub fn acquire(&mut self, port: &mut PortHandle) -> bool {
        if self.writer.is_none() {
            self.writer = port.take_writer();
            debug!(acquired = self.writer.is_some(), "Control writer acquire");
        }
        self.writer.is_some()
    }

    pub fn release(&mut self, port: &mut PortHandle) {
        if let Some(writer) = self.writer.take() {
            port.restore_writer(writer);
        }
    }

    pub fn is_held(&self) -> bool {
        self.writer.is_some()
    }

    pub fn sent_frames(&self) -> u64 {
        self.sent_frames
    }

    /// Write one whole frame and flush it.
    ///
    /// A device that stops draining its receive buffer fails the send after
    /// the write timeout instead of holding up the caller.
    pub async fn send(&mut self, port: &mut PortHandle, frame: &[u8]) -> Result<()> {
        if !self.acquire(port) {
            return Err(AresplotError::connection_failed("port has no writable half"));
        }
        let Some(writer) = self.writer.as_mut() else {
            return Err(AresplotError::connection_failed("port has no writable half"));
        };

        let write = async {
            writer.write_all(frame).await?;
            writer.flush().await
        };
        let result = match tokio::time::timeout(self.write_timeout, write).await {
            Ok(result) => result,
            Err(_) => Err(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                format!("device did not accept {} bytes within {:?}", frame.len(), self.write_timeout),
            )),
        };

        match result {
            Ok(()) => {
                self.sent_frames += 1;
                Ok(())
            }
            Err(e) => {
                warn!("Control write failed, releasing writer: {}", e);
                self.release(port);
                Err(AresplotError::stream("control frame write", e))
            }
        }
    }
}
