//! Software MCU speaking the Aresplot protocol.
//!
//! [`McuEmulator`] models the firmware side: a byte-wise receive state
//! machine, a variable memory map, and the service tick that sends pending
//! ACKs, error reports, and periodic `MONITOR_DATA`. [`McuEmulator::spawn`]
//! runs it against the device end of a loopback port.
//!
//! ```rust,no_run
//! use aresplot::emulator::McuEmulator;
//! use aresplot::providers::LoopbackOpener;
//! use aresplot::types::AresType;
//!
//! # async fn demo() {
//! let (opener, mut devices) = LoopbackOpener::new();
//! // hand `opener` to the coordinator and connect, then:
//! let device = devices.next().await.unwrap();
//! let mut mcu = McuEmulator::new();
//! mcu.define(0x2000_0000, AresType::Float32, 1.5);
//! let running = mcu.spawn(device.into_stream());
//! # }
//! ```

mod rx;

pub use rx::{RX_BUFFER_SIZE, RxEvent, RxMachine};

use std::collections::BTreeMap;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::codec::build_frame;
use crate::types::{AckStatus, AresType, CommandId, MAX_SUBSCRIPTIONS};

/// Sample period after reset or `SET_SAMPLE_RATE(0)`.
pub const DEFAULT_SAMPLE_PERIOD_MS: u32 = 10;
/// Longest error message the MCU queues.
pub const MAX_ERROR_MESSAGE_LEN: usize = RX_BUFFER_SIZE - 8;
/// Service tick cadence of the spawned emulator.
const SERVICE_TICK: Duration = Duration::from_millis(1);

/// One entry of the emulated memory.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Variable {
    pub original_type: AresType,
    value: f64,
}

impl Variable {
    fn new(original_type: AresType, value: f32) -> Option<Self> {
        let value = store(original_type, value)?;
        Some(Self { original_type, value })
    }

    /// The value as the MCU reports it in `MONITOR_DATA`.
    pub fn as_f32(&self) -> f32 {
        self.value as f32
    }
}

/// Cast `value` into `ty` the way a store through a typed pointer does.
fn store(ty: AresType, value: f32) -> Option<f64> {
    let stored = match ty {
        AresType::Int8 => value as i8 as f64,
        AresType::UInt8 => value as u8 as f64,
        AresType::Int16 => value as i16 as f64,
        AresType::UInt16 => value as u16 as f64,
        AresType::Int32 => value as i32 as f64,
        AresType::UInt32 => value as u32 as f64,
        AresType::Float32 => value as f64,
        AresType::Bool => {
            if value != 0.0 {
                1.0
            } else {
                0.0
            }
        }
        AresType::Float64 => return None,
    };
    Some(stored)
}

/// Emulated Aresplot MCU
#[derive(Debug)]
pub struct McuEmulator {
    rx: RxMachine,
    memory: BTreeMap<u32, Variable>,
    monitored: Vec<(u32, u8)>,
    monitoring: bool,
    sample_period_ms: u32,
    last_sample_ms: u32,
    pending_ack: Option<(u8, AckStatus)>,
    pending_error: Option<(u8, Vec<u8>)>,
    strict_addresses: bool,
    now_ms: u32,
}

impl Default for McuEmulator {
    fn default() -> Self {
        Self::new()
    }
}

impl McuEmulator {
    pub fn new() -> Self {
        Self {
            rx: RxMachine::new(),
            memory: BTreeMap::new(),
            monitored: Vec::new(),
            monitoring: false,
            sample_period_ms: DEFAULT_SAMPLE_PERIOD_MS,
            last_sample_ms: 0,
            pending_ack: None,
            pending_error: None,
            strict_addresses: false,
            now_ms: 0,
        }
    }

    /// Reject `SET_VARIABLE` to undefined addresses with `ERR_ADDR_INVALID`.
    pub fn with_strict_addresses(mut self) -> Self {
        self.strict_addresses = true;
        self
    }

    /// Place a variable in memory. FLOAT64 is not representable and is ignored.
    pub fn define(&mut self, address: u32, original_type: AresType, value: f32) -> bool {
        match Variable::new(original_type, value) {
            Some(variable) => {
                self.memory.insert(address, variable);
                true
            }
            None => false,
        }
    }

    pub fn variable(&self, address: u32) -> Option<Variable> {
        self.memory.get(&address).copied()
    }

    pub fn monitored(&self) -> &[(u32, u8)] {
        &self.monitored
    }

    pub fn is_monitoring(&self) -> bool {
        self.monitoring && !self.monitored.is_empty()
    }

    pub fn sample_period_ms(&self) -> u32 {
        self.sample_period_ms
    }

    /// Queue an `ERROR_REPORT`. Returns false while one is already queued.
    pub fn report_error(&mut self, code: u8, message: &[u8]) -> bool {
        if self.pending_error.is_some() {
            return false;
        }
        let len = message.len().min(MAX_ERROR_MESSAGE_LEN);
        self.pending_error = Some((code, message[..len].to_vec()));
        true
    }

    /// Feed received bytes through the receive state machine.
    pub fn feed(&mut self, bytes: &[u8]) {
        for &byte in bytes {
            match self.rx.feed(byte) {
                Some(RxEvent::Frame { cmd, payload }) => self.process(cmd, &payload),
                Some(RxEvent::ChecksumMismatch { cmd }) => {
                    debug!(cmd, "Checksum mismatch");
                    self.queue_ack(cmd, AckStatus::ErrChecksum);
                }
                None => {}
            }
        }
    }

    fn queue_ack(&mut self, cmd: u8, status: AckStatus) {
        // A newer ACK replaces one that was not sent yet
        self.pending_ack = Some((cmd, status));
    }

    fn process(&mut self, cmd: u8, payload: &[u8]) {
        trace!(cmd, len = payload.len(), "Frame received");
        let status = match CommandId::from_u8(cmd) {
            Some(CommandId::StartMonitor) => self.start_monitor(payload),
            Some(CommandId::SetVariable) => self.set_variable(payload),
            Some(CommandId::SetSampleRate) => self.set_sample_rate(payload),
            _ => AckStatus::ErrUnknownCmd,
        };
        self.queue_ack(cmd, status);
    }

    fn start_monitor(&mut self, payload: &[u8]) -> AckStatus {
        self.monitoring = false;
        self.monitored.clear();

        let Some(&count) = payload.first() else {
            return AckStatus::ErrInvalidPayload;
        };
        let count = count as usize;
        if count == 0 {
            return AckStatus::Ok;
        }
        if count > MAX_SUBSCRIPTIONS {
            return AckStatus::ErrMcuBusy;
        }
        if payload.len() != 1 + count * 5 {
            return AckStatus::ErrInvalidPayload;
        }

        self.monitored = payload[1..]
            .chunks_exact(5)
            .map(|entry| (u32::from_le_bytes([entry[0], entry[1], entry[2], entry[3]]), entry[4]))
            .collect();
        self.monitoring = true;
        self.last_sample_ms = self.now_ms;
        info!(count, "Monitoring started");
        AckStatus::Ok
    }

    fn set_variable(&mut self, payload: &[u8]) -> AckStatus {
        let Ok(payload) = <&[u8; 9]>::try_from(payload) else {
            return AckStatus::ErrInvalidPayload;
        };
        let address = u32::from_le_bytes([payload[0], payload[1], payload[2], payload[3]]);
        let value = f32::from_le_bytes([payload[5], payload[6], payload[7], payload[8]]);

        let Some(original_type) = AresType::from_u8(payload[4]) else {
            return AckStatus::ErrTypeUnsupported;
        };
        if self.strict_addresses && !self.memory.contains_key(&address) {
            return AckStatus::ErrAddrInvalid;
        }
        match Variable::new(original_type, value) {
            Some(variable) => {
                debug!(address, ?original_type, value, "Variable written");
                self.memory.insert(address, variable);
                AckStatus::Ok
            }
            None => AckStatus::ErrTypeUnsupported,
        }
    }

    fn set_sample_rate(&mut self, payload: &[u8]) -> AckStatus {
        let Ok(bytes) = <[u8; 4]>::try_from(payload) else {
            return AckStatus::ErrInvalidPayload;
        };
        let rate_hz = u32::from_le_bytes(bytes);
        self.sample_period_ms = if rate_hz == 0 { DEFAULT_SAMPLE_PERIOD_MS } else { (1000 / rate_hz).max(1) };
        self.last_sample_ms = self.now_ms;
        debug!(rate_hz, period_ms = self.sample_period_ms, "Sample rate set");
        AckStatus::Ok
    }

    fn monitor_payload(&self, now_ms: u32) -> Vec<u8> {
        let mut payload = Vec::with_capacity(4 + self.monitored.len() * 4);
        payload.extend_from_slice(&now_ms.to_le_bytes());
        for (address, ty) in &self.monitored {
            let value = match (self.memory.get(address), AresType::from_u8(*ty)) {
                (Some(variable), Some(ty)) if ty != AresType::Float64 => variable.as_f32(),
                _ => 0.0,
            };
            payload.extend_from_slice(&value.to_le_bytes());
        }
        payload
    }

    /// Run one service tick at MCU time `now_ms`, returning frames to transmit.
    ///
    /// Order: pending ACK, pending error report, then monitor data when the
    /// sample period has elapsed.
    pub fn service_tick(&mut self, now_ms: u32) -> Vec<Vec<u8>> {
        self.now_ms = now_ms;
        let mut out = Vec::new();

        if let Some((cmd, status)) = self.pending_ack.take() {
            push_frame(&mut out, CommandId::Ack, &[cmd, status.as_u8()]);
        }
        if let Some((code, message)) = self.pending_error.take() {
            let mut payload = Vec::with_capacity(1 + message.len());
            payload.push(code);
            payload.extend(message);
            push_frame(&mut out, CommandId::ErrorReport, &payload);
        }
        if self.is_monitoring() && now_ms.wrapping_sub(self.last_sample_ms) >= self.sample_period_ms {
            push_frame(&mut out, CommandId::MonitorData, &self.monitor_payload(now_ms));
            self.last_sample_ms = now_ms;
        }
        out
    }

    /// Drive the emulator over `stream` until cancelled or the host closes it.
    pub fn spawn(self, stream: DuplexStream) -> RunningEmulator {
        let cancel = CancellationToken::new();
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = tokio::spawn(self.run(stream, rx, cancel.clone()));
        RunningEmulator { commands: tx, cancel, handle }
    }

    async fn run(
        mut self,
        mut stream: DuplexStream,
        mut commands: mpsc::UnboundedReceiver<EmulatorCommand>,
        cancel: CancellationToken,
    ) -> McuEmulator {
        let started = Instant::now();
        let mut tick = interval(SERVICE_TICK);
        tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut buf = [0u8; 256];

        info!("MCU emulator running");
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                read = stream.read(&mut buf) => match read {
                    Ok(0) => break,
                    Ok(n) => self.feed(&buf[..n]),
                    Err(e) => {
                        warn!("Emulator read failed: {}", e);
                        break;
                    }
                },
                Some(command) = commands.recv() => match command {
                    EmulatorCommand::ReportError { code, message } => {
                        self.report_error(code, &message);
                    }
                    EmulatorCommand::Define { address, original_type, value } => {
                        self.define(address, original_type, value);
                    }
                },
                _ = tick.tick() => {
                    let now_ms = started.elapsed().as_millis() as u32;
                    for frame in self.service_tick(now_ms) {
                        if let Err(e) = stream.write_all(&frame).await {
                            debug!("Host closed the stream: {}", e);
                            return self;
                        }
                    }
                }
            }
        }
        info!("MCU emulator stopped");
        self
    }
}

fn push_frame(out: &mut Vec<Vec<u8>>, command: CommandId, payload: &[u8]) {
    match build_frame(command.as_u8(), payload) {
        Ok(frame) => out.push(frame),
        Err(e) => warn!(%command, "Frame dropped: {}", e),
    }
}

#[derive(Debug)]
enum EmulatorCommand {
    ReportError { code: u8, message: Vec<u8> },
    Define { address: u32, original_type: AresType, value: f32 },
}

/// A spawned [`McuEmulator`].
#[derive(Debug)]
pub struct RunningEmulator {
    commands: mpsc::UnboundedSender<EmulatorCommand>,
    cancel: CancellationToken,
    handle: JoinHandle<McuEmulator>,
}

impl RunningEmulator {
    /// Queue an `ERROR_REPORT` for the next service tick.
    pub fn report_error(&self, code: u8, message: impl Into<Vec<u8>>) {
        let _ = self.commands.send(EmulatorCommand::ReportError { code, message: message.into() });
    }

    pub fn define(&self, address: u32, original_type: AresType, value: f32) {
        let _ = self.commands.send(EmulatorCommand::Define { address, original_type, value });
    }

    /// Stop the task and hand back the emulator for inspection.
    pub async fn stop(self) -> Option<McuEmulator> {
        self.cancel.cancel();
        self.handle.await.ok()
    }
}
