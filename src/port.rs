//! Port abstraction for serial transports

use std::io::ErrorKind;
use std::pin::Pin;
use std::task::{Context, Poll};
use pin_project_lite::pin_project;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{trace, warn};

use crate::Result;
use crate::types::SerialOptions;

/// Readable half of an open port.
pub type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;
/// Writable half of an open port.
pub type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Trait for serial transports
///
/// Openers abstract over real serial ports, in-memory loopbacks, and anything
/// else that yields a byte stream in each direction. Options are validated by
/// the coordinator before `open` is called.
#[async_trait::async_trait]
pub trait PortOpener: Send + Sync + 'static {
    /// Open the port described by `options`
    async fn open(&self, options: &SerialOptions) -> Result<PortHandle>;
}

/// An open port held by the coordinator.
///
/// The readable half is lent to the worker for the duration of a session; the
/// writable half stays here for control-plane sends.
pub struct PortHandle {
    reader: Option<BoxedReader>,
    writer: Option<BoxedWriter>,
    lost: CancellationToken,
    options: SerialOptions,
}

impl std::fmt::Debug for PortHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PortHandle")
            .field("path", &self.options.path)
            .field("reader", &self.reader.is_some())
            .field("writer", &self.writer.is_some())
            .field("lost", &self.lost.is_cancelled())
            .finish()
    }
}

impl PortHandle {
    pub fn new(reader: BoxedReader, writer: BoxedWriter, options: SerialOptions) -> Self {
        Self { reader: Some(reader), writer: Some(writer), lost: CancellationToken::new(), options }
    }

    /// Use `lost` to signal an external disconnect from the transport.
    pub fn with_lost_token(mut self, lost: CancellationToken) -> Self {
        self.lost = lost;
        self
    }

    pub fn options(&self) -> &SerialOptions {
        &self.options
    }

    /// Fires when the transport reports the device is gone.
    pub fn lost_token(&self) -> CancellationToken {
        self.lost.clone()
    }

    pub fn is_lost(&self) -> bool {
        self.lost.is_cancelled()
    }

    /// Lend the readable half to a session.
    pub fn lease_reader(&mut self) -> Option<(ReaderLease, oneshot::Receiver<BoxedReader>)> {
        self.reader.take().map(ReaderLease::new)
    }

    pub fn restore_reader(&mut self, reader: BoxedReader) {
        self.reader = Some(reader);
    }

    pub fn has_reader(&self) -> bool {
        self.reader.is_some()
    }

    pub fn take_writer(&mut self) -> Option<BoxedWriter> {
        self.writer.take()
    }

    pub fn restore_writer(&mut self, writer: BoxedWriter) {
        self.writer = Some(writer);
    }
}

/// `ENODEV`, reported by Linux and macOS once a USB serial adapter is unplugged
#[cfg(unix)]
const ENODEV: i32 = 19;

/// Whether a read error means the device itself is gone.
pub fn is_device_gone(error: &std::io::Error) -> bool {
    if matches!(
        error.kind(),
        ErrorKind::BrokenPipe
            | ErrorKind::NotConnected
            | ErrorKind::UnexpectedEof
            | ErrorKind::ConnectionReset
            | ErrorKind::ConnectionAborted
    ) {
        return true;
    }
    #[cfg(unix)]
    if error.raw_os_error() == Some(ENODEV) {
        return true;
    }
    false
}

pin_project! {
    /// Readable half that fires a port's `lost` token on end of stream or
    /// when [`is_device_gone`] matches a read error.
    ///
    /// Transports without their own hot-unplug notification wrap their
    /// reader in this so the coordinator sees an external disconnect.
    pub struct LossDetectingReader<R> {
        #[pin]
        inner: R,
        lost: CancellationToken,
    }
}

impl<R> LossDetectingReader<R> {
    pub fn new(inner: R, lost: CancellationToken) -> Self {
        Self { inner, lost }
    }
}

impl<R: AsyncRead> AsyncRead for LossDetectingReader<R> {
    fn poll_read(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<std::io::Result<()>> {
        let this = self.project();
        let before = buf.filled().len();
        let poll = this.inner.poll_read(cx, buf);

        match &poll {
            Poll::Ready(Ok(())) if buf.filled().len() == before && buf.remaining() > 0 => {
                if !this.lost.is_cancelled() {
                    warn!("Port reached end of stream");
                    this.lost.cancel();
                }
            }
            Poll::Ready(Err(e)) if is_device_gone(e) => {
                if !this.lost.is_cancelled() {
                    warn!("Port device gone: {}", e);
                    this.lost.cancel();
                }
            }
            _ => {}
        }
        poll
    }
}

/// Exclusive loan of a port's readable half.
///
/// Dropping the lease returns the reader to the lender exactly once, whether
/// the session ended normally, was cancelled, or unwound.
pub struct ReaderLease {
    reader: Option<BoxedReader>,
    release: Option<oneshot::Sender<BoxedReader>>,
}

impl std::fmt::Debug for ReaderLease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReaderLease").field("held", &self.reader.is_some()).finish()
    }
}

impl ReaderLease {
    pub fn new(reader: BoxedReader) -> (Self, oneshot::Receiver<BoxedReader>) {
        let (tx, rx) = oneshot::channel();
        (Self { reader: Some(reader), release: Some(tx) }, rx)
    }
}

impl AsyncRead for ReaderLease {
    fn poll_read(mut self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<std::io::Result<()>> {
        match self.reader.as_mut() {
            Some(reader) => Pin::new(reader).poll_read(cx, buf),
            None => Poll::Ready(Err(std::io::Error::other("reader already released"))),
        }
    }
}

impl Drop for ReaderLease {
    fn drop(&mut self) {
        if let (Some(reader), Some(release)) = (self.reader.take(), self.release.take()) {
            trace!("Reader lease released");
            // The lender may already be gone; the reader is then dropped with it
            let _ = release.send(reader);
        }
    }
}
