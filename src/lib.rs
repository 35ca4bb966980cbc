//! Serial telemetry acquisition with the Aresplot MCU monitoring protocol.
//!
//! Aresplot reads a byte stream from a serial port (or a simulated source),
//! decodes it with one of several protocol codecs, batches the decoded samples,
//! and delivers them to consumers at a bounded cadence. For MCUs speaking the
//! Aresplot protocol it also drives the request/ACK control plane: subscribing
//! to variables, writing variables, and setting the sample rate.
//!
//! # Features
//!
//! - **Codecs**: Default text, FireWater, JustFloat, Aresplot, and sandboxed user parsers
//! - **Control plane**: `START_MONITOR`, `SET_VARIABLE`, `SET_SAMPLE_RATE` with ACK tracking
//! - **Streams**: batches, events, state and metrics as `futures::Stream`s
//! - **Testing**: in-memory loopback ports and a software MCU emulator
//!
//! # Architecture
//!
//! ```text
//! port reader ──► Worker (StreamPump → Batcher) ──► Coordinator ──► handles / streams
//!                     ▲                                  │
//!                     └──────── WorkerCommand ◄──────────┘──► ControlWriter ──► port writer
//! ```
//!
//! ## Example (simulated source)
//!
//! ```rust,no_run
//! use aresplot::{Aresplot, SessionConfig, SimConfig, UpdateRate};
//! use futures::StreamExt;
//!
//! #[tokio::main]
//! async fn main() -> aresplot::Result<()> {
//!     let (handle, _devices) = Aresplot::loopback();
//!     handle.start(SessionConfig::simulated(SimConfig::default())).await?;
//!
//!     let mut batches = handle.batches(UpdateRate::Max(30));
//!     while let Some(batch) = batches.next().await {
//!         println!("{} samples", batch.len());
//!     }
//!     Ok(())
//! }
//! ```

// Core types and error handling
mod error;
#[cfg_attr(any(test, feature = "benchmark"), path = "test_utils.rs")]
#[cfg(any(test, feature = "benchmark"))]
pub mod test_utils;
pub mod types;

// Decoding and batching
pub mod batch;
pub mod codec;
pub mod pump;

// Transport and control plane
pub mod coordinator;
pub mod port;
pub mod providers;
pub mod worker;

// Consumers and tooling
pub mod emulator;
pub mod export;
pub mod stream;

// Core exports
pub use error::*;
pub use types::*;

// Main API exports
pub use batch::Metrics;
pub use codec::{Codec, ParseOutcome, ParserStatus};
pub use coordinator::{CoordinatorEvent, CoordinatorHandle, EventKind, HandlerId};
pub use port::{PortHandle, PortOpener};
pub use providers::{LoopbackDevices, LoopbackOpener};
#[cfg(feature = "serial")]
pub use providers::SerialPortOpener;
pub use stream::CoalesceExt;

use coordinator::Coordinator;

/// Unified entry point for Aresplot coordinators.
///
/// Each method spawns a coordinator and its worker on the current tokio
/// runtime and returns the handle used to drive them.
///
/// ```rust,no_run
/// use aresplot::{Aresplot, SerialOptions};
///
/// # #[tokio::main]
/// # async fn main() -> aresplot::Result<()> {
/// let (handle, mut devices) = Aresplot::loopback();
/// handle.connect(SerialOptions::default().with_path("loop0")).await?;
/// let device = devices.next().await;
/// # Ok(())
/// # }
/// ```
pub struct Aresplot;

impl Aresplot {
    /// Spawn a coordinator over `opener` with default settings.
    pub fn spawn<O: PortOpener>(opener: O) -> CoordinatorHandle {
        Coordinator::spawn(opener, CoordinatorConfig::default())
    }

    pub fn spawn_with_config<O: PortOpener>(opener: O, config: CoordinatorConfig) -> CoordinatorHandle {
        Coordinator::spawn(opener, config)
    }

    /// Spawn a coordinator over in-memory ports.
    ///
    /// Every `connect` hands the device end of the new port to the returned
    /// [`LoopbackDevices`], where an [`emulator::McuEmulator`] or a test can
    /// drive it.
    pub fn loopback() -> (CoordinatorHandle, LoopbackDevices) {
        let (opener, devices) = LoopbackOpener::new();
        (Self::spawn(opener), devices)
    }

    /// Spawn a coordinator over operating-system serial ports.
    #[cfg(feature = "serial")]
    pub fn serial() -> CoordinatorHandle {
        Self::spawn(SerialPortOpener)
    }
}
