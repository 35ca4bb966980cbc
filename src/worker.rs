//! Worker task owning the stream pump, codecs, and batcher

use tokio::io::AsyncReadExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval, interval_at};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::batch::Batcher;
use crate::codec::{self, ParserStatus};
use crate::port::ReaderLease;
use crate::pump::{Decoded, SessionClock, SimGenerator, StreamPump};
use crate::types::{AckStatus, Batch, CoordinatorConfig, ParserSelection, SimConfig, Source};

/// Bytes requested from the reader per read turn.
const READ_CHUNK: usize = 4096;

/// Host -> worker messages
#[derive(Debug)]
pub enum WorkerCommand {
    Start(Box<StartSession>),
    Stop,
    UpdateActiveParser(ParserSelection),
    UpdateSimConfig(SimConfig),
}

/// Everything a session needs, moved into the worker at start.
#[derive(Debug)]
pub struct StartSession {
    pub source: Source,
    pub parser: ParserSelection,
    pub sim: SimConfig,
    /// Readable half of the port; required for serial sessions
    pub reader: Option<ReaderLease>,
    /// Cancelled by the host to stop the session promptly
    pub cancel: CancellationToken,
}

/// Worker -> host messages
#[derive(Debug, Clone, PartialEq)]
pub enum WorkerEvent {
    DataBatch(Batch),
    Status(String),
    ParserStatus(ParserStatus),
    Ack { cmd_id: u8, status: AckStatus },
    McuError { code: u8, message: Vec<u8> },
    Warn(String),
    Info(String),
    /// Sent once per session, after the reader is released and the final batch is out
    SessionEnded(SessionEnd),
}

/// Why a session loop exited.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEnd {
    /// Host requested stop (cancellation is not a fault)
    Stopped,
    /// The reader returned end of stream
    EndOfStream,
    /// A read failed
    StreamFault(String),
}

/// Handles returned by [`Worker::spawn`]
#[derive(Debug)]
pub struct WorkerChannels {
    pub commands: mpsc::UnboundedSender<WorkerCommand>,
    pub events: mpsc::UnboundedReceiver<WorkerEvent>,
    pub handle: JoinHandle<()>,
}

/// Worker loop
///
/// Runs one session at a time. Between sessions it only records parser and
/// simulation updates for the next start.
pub struct Worker {
    config: CoordinatorConfig,
    commands: mpsc::UnboundedReceiver<WorkerCommand>,
    events: mpsc::UnboundedSender<WorkerEvent>,
    parser: ParserSelection,
    sim: SimConfig,
}

impl Worker {
    /// Spawn the worker task
    ///
    /// The task exits when the command sender is dropped.
    pub fn spawn(config: CoordinatorConfig) -> WorkerChannels {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        let worker = Worker {
            config,
            commands: command_rx,
            events: event_tx,
            parser: ParserSelection::default(),
            sim: SimConfig::default(),
        };
        let handle = tokio::spawn(worker.run());

        WorkerChannels { commands: command_tx, events: event_rx, handle }
    }

    async fn run(mut self) {
        info!("Worker started");
        let mut sessions = 0u64;

        while let Some(command) = self.commands.recv().await {
            match command {
                WorkerCommand::Start(start) => {
                    sessions += 1;
                    self.run_session(*start).await;
                }
                WorkerCommand::Stop => trace!("Stop while idle"),
                WorkerCommand::UpdateActiveParser(selection) => {
                    debug!(protocol = ?selection.protocol, "Parser stored for next session");
                    self.parser = selection;
                }
                WorkerCommand::UpdateSimConfig(sim) => self.sim = sim,
            }
        }

        info!("Worker ended after {} sessions", sessions);
    }

    async fn run_session(&mut self, start: StartSession) {
        let StartSession { source, parser, sim, reader, cancel } = start;
        self.parser = parser;
        self.sim = sim;

        let clock = SessionClock::start();
        let mut batcher = Batcher::new(self.config.flush_interval(), self.config.max_batch_samples);
        self.emit(WorkerEvent::Status("collecting".into()));

        let end = match (source, reader) {
            (Source::Simulated, reader) => {
                drop(reader);
                self.run_simulation(&cancel, &mut batcher, clock).await
            }
            (Source::Serial, Some(lease)) => self.run_serial(lease, &cancel, &mut batcher, clock).await,
            (Source::Serial, None) => {
                error!("Serial session started without a reader");
                SessionEnd::StreamFault("no reader supplied".into())
            }
        };

        self.emit(WorkerEvent::DataBatch(batcher.drain()));
        info!(?end, "Session ended");
        self.emit(WorkerEvent::Status("stopped".into()));
        self.emit(WorkerEvent::SessionEnded(end));
    }

    async fn run_serial(
        &mut self,
        mut lease: ReaderLease,
        cancel: &CancellationToken,
        batcher: &mut Batcher,
        clock: SessionClock,
    ) -> SessionEnd {
        let (codec, status) = codec::activate(&self.parser, self.config.garbage_flush_threshold);
        self.emit(WorkerEvent::ParserStatus(status));

        let mut pump = StreamPump::new(codec, self.config.forced_break_len, READ_CHUNK * 2)
            .with_garbage_flush_threshold(self.config.garbage_flush_threshold);
        let mut chunk = vec![0u8; READ_CHUNK];
        let mut frames = Vec::new();

        let mut flush = interval(self.config.flush_interval());
        flush.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(protocol = ?pump.codec().protocol(), "Serial session started");

        let end = loop {
            tokio::select! {
                _ = cancel.cancelled() => break SessionEnd::Stopped,
                command = self.commands.recv() => match command {
                    None => break SessionEnd::Stopped,
                    Some(command) => {
                        if let Some(end) = self.on_session_command(command, Some(&mut pump)) {
                            break end;
                        }
                    }
                },
                read = lease.read(&mut chunk) => match read {
                    Ok(0) => break SessionEnd::EndOfStream,
                    Ok(n) => {
                        let timestamp_ms = clock.now_ms();
                        pump.ingest(&chunk[..n], &mut frames);
                        for frame in frames.drain(..) {
                            self.route(Decoded::from_frame(frame, timestamp_ms), batcher);
                        }
                    }
                    Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                    Err(e) => {
                        error!("Read failed: {}", e);
                        break SessionEnd::StreamFault(e.to_string());
                    }
                },
                _ = flush.tick() => {
                    if let Some(batch) = batcher.flush_if_due(Instant::now()) {
                        self.emit(WorkerEvent::DataBatch(batch));
                    }
                }
            }
        };

        pump.clear();
        // Release the reader before the final batch goes out
        drop(lease);
        debug!(stats = ?pump.stats(), "Pump stopped");
        end
    }

    async fn run_simulation(
        &mut self,
        cancel: &CancellationToken,
        batcher: &mut Batcher,
        clock: SessionClock,
    ) -> SessionEnd {
        let tick = self.config.sim_tick();
        let tick_ms = tick.as_secs_f64() * 1000.0;
        let mut generator = SimGenerator::new(self.sim);

        let mut ticker = interval_at(Instant::now() + tick, tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(channels = self.sim.num_channels, frequency = self.sim.frequency, "Simulation started");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => return SessionEnd::Stopped,
                command = self.commands.recv() => match command {
                    None => return SessionEnd::Stopped,
                    Some(command) => {
                        if let Some(end) = self.on_session_command(command, None) {
                            return end;
                        }
                        if generator.config() != &self.sim {
                            generator.set_config(self.sim);
                        }
                    }
                },
                _ = ticker.tick() => {
                    for sample in generator.tick(clock.now_ms(), tick_ms) {
                        if let Some(batch) = batcher.push(sample) {
                            self.emit(WorkerEvent::DataBatch(batch));
                        }
                    }
                    // The tick is the flush boundary
                    if let Some(batch) = batcher.flush() {
                        self.emit(WorkerEvent::DataBatch(batch));
                    }
                }
            }
        }
    }

    fn on_session_command(&mut self, command: WorkerCommand, pump: Option<&mut StreamPump>) -> Option<SessionEnd> {
        match command {
            WorkerCommand::Stop => return Some(SessionEnd::Stopped),
            WorkerCommand::Start(start) => {
                warn!("Start received while a session is running");
                drop(start);
                self.emit(WorkerEvent::Warn("session already running".into()));
            }
            WorkerCommand::UpdateActiveParser(selection) => {
                self.parser = selection;
                if let Some(pump) = pump {
                    let (codec, status) = codec::activate(&self.parser, self.config.garbage_flush_threshold);
                    pump.replace_codec(codec);
                    self.emit(WorkerEvent::ParserStatus(status));
                }
            }
            WorkerCommand::UpdateSimConfig(sim) => {
                debug!(?sim, "Simulation config updated");
                self.sim = sim;
            }
        }
        None
    }

    fn route(&self, decoded: Decoded, batcher: &mut Batcher) {
        match decoded {
            Decoded::Sample(sample) => {
                if let Some(batch) = batcher.push(sample) {
                    self.emit(WorkerEvent::DataBatch(batch));
                }
            }
            // Control events must not overtake samples parsed before them
            Decoded::Ack { cmd_id, status } => {
                self.flush_pending(batcher);
                trace!(cmd_id, %status, "ACK");
                self.emit(WorkerEvent::Ack { cmd_id, status });
            }
            Decoded::McuError { code, message } => {
                self.flush_pending(batcher);
                warn!(code, "MCU error report");
                self.emit(WorkerEvent::McuError { code, message });
            }
            Decoded::Nothing => {}
        }
    }

    fn flush_pending(&self, batcher: &mut Batcher) {
        if let Some(batch) = batcher.flush() {
            self.emit(WorkerEvent::DataBatch(batch));
        }
    }

    fn emit(&self, event: WorkerEvent) {
        if self.events.send(event).is_err() {
            trace!("Host dropped the event receiver");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::build_frame;
    use crate::port::ReaderLease;
    use crate::types::{ProtocolKind, Sample};
    use std::time::Duration;
    use tokio::io::AsyncWriteExt;

    fn serial_start(protocol: ProtocolKind, lease: ReaderLease, cancel: CancellationToken) -> WorkerCommand {
        WorkerCommand::Start(Box::new(StartSession {
            source: Source::Serial,
            parser: ParserSelection::builtin(protocol),
            sim: SimConfig::default(),
            reader: Some(lease),
            cancel,
        }))
    }

    /// Collect events until the session ends.
    async fn until_ended(events: &mut mpsc::UnboundedReceiver<WorkerEvent>) -> Vec<WorkerEvent> {
        let mut seen = Vec::new();
        while let Some(event) = events.recv().await {
            let done = matches!(event, WorkerEvent::SessionEnded(_));
            seen.push(event);
            if done {
                break;
            }
        }
        seen
    }

    fn samples(events: &[WorkerEvent]) -> Vec<Sample> {
        events
            .iter()
            .filter_map(|e| match e {
                WorkerEvent::DataBatch(b) => Some(b.samples.clone()),
                _ => None,
            })
            .flatten()
            .collect()
    }

    #[tokio::test(start_paused = true)]
    async fn serial_session_parses_and_releases_reader() {
        let mut worker = Worker::spawn(CoordinatorConfig::default());
        let (mut device, host) = tokio::io::duplex(1024);
        let (lease, returned) = ReaderLease::new(Box::new(host));
        let cancel = CancellationToken::new();

        worker.commands.send(serial_start(ProtocolKind::Default, lease, cancel.clone())).unwrap();
        device.write_all(b"1, 2 3\r\n4,5,6\n").await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        cancel.cancel();
        let events = until_ended(&mut worker.events).await;

        assert!(events.contains(&WorkerEvent::ParserStatus(ParserStatus::Active(ProtocolKind::Default))));
        let values: Vec<Vec<f64>> = samples(&events).into_iter().map(|s| s.values).collect();
        assert_eq!(values, vec![vec![1.0, 2.0, 3.0], vec![4.0, 5.0, 6.0]]);
        assert_eq!(events.last(), Some(&WorkerEvent::SessionEnded(SessionEnd::Stopped)));
        assert!(returned.await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn ack_flushes_preceding_samples_first() {
        let mut worker = Worker::spawn(CoordinatorConfig::default());
        let (mut device, host) = tokio::io::duplex(1024);
        let (lease, _returned) = ReaderLease::new(Box::new(host));

        worker.commands.send(serial_start(ProtocolKind::Aresplot, lease, CancellationToken::new())).unwrap();

        let mut payload = 7u32.to_le_bytes().to_vec();
        payload.extend_from_slice(&1.5f32.to_le_bytes());
        let mut bytes = build_frame(0x81, &payload).unwrap();
        bytes.extend(build_frame(0x82, &[0x01, 0x00]).unwrap());
        device.write_all(&bytes).await.unwrap();
        drop(device);

        let events = until_ended(&mut worker.events).await;
        let batch_at = events.iter().position(|e| matches!(e, WorkerEvent::DataBatch(b) if !b.is_empty())).unwrap();
        let ack_at = events.iter().position(|e| matches!(e, WorkerEvent::Ack { .. })).unwrap();
        assert!(batch_at < ack_at);
        assert_eq!(events.last(), Some(&WorkerEvent::SessionEnded(SessionEnd::EndOfStream)));
    }

    #[tokio::test(start_paused = true)]
    async fn simulation_emits_per_tick_and_applies_config() {
        let mut worker = Worker::spawn(CoordinatorConfig::default());
        let cancel = CancellationToken::new();
        let sim = SimConfig { num_channels: 2, frequency: 1000.0, amplitude: 1.0 };

        worker
            .commands
            .send(WorkerCommand::Start(Box::new(StartSession {
                source: Source::Simulated,
                parser: ParserSelection::default(),
                sim,
                reader: None,
                cancel: cancel.clone(),
            })))
            .unwrap();

        // Status, then the first tick
        assert_eq!(worker.events.recv().await, Some(WorkerEvent::Status("collecting".into())));
        match worker.events.recv().await {
            Some(WorkerEvent::DataBatch(batch)) => {
                assert_eq!(batch.len(), 10);
                assert!(batch.samples.iter().all(|s| s.values.len() == 2));
            }
            other => panic!("unexpected {:?}", other),
        }

        worker
            .commands
            .send(WorkerCommand::UpdateSimConfig(SimConfig { num_channels: 5, frequency: 100.0, amplitude: 1.0 }))
            .unwrap();
        match worker.events.recv().await {
            Some(WorkerEvent::DataBatch(batch)) => {
                assert_eq!(batch.len(), 1);
                assert_eq!(batch.samples[0].values.len(), 5);
            }
            other => panic!("unexpected {:?}", other),
        }

        worker.commands.send(WorkerCommand::Stop).unwrap();
        let events = until_ended(&mut worker.events).await;
        assert_eq!(events.last(), Some(&WorkerEvent::SessionEnded(SessionEnd::Stopped)));

        let stamps: Vec<f64> = samples(&events).iter().map(|s| s.timestamp_ms).collect();
        assert!(stamps.windows(2).all(|w| w[0] <= w[1]));
    }

    #[tokio::test(start_paused = true)]
    async fn parser_swap_mid_session_reports_status() {
        let mut worker = Worker::spawn(CoordinatorConfig::default());
        let (_device, host) = tokio::io::duplex(64);
        let (lease, _returned) = ReaderLease::new(Box::new(host));
        let cancel = CancellationToken::new();

        worker.commands.send(serial_start(ProtocolKind::Default, lease, cancel.clone())).unwrap();
        worker
            .commands
            .send(WorkerCommand::UpdateActiveParser(ParserSelection::new(
                ProtocolKind::Custom,
                Some("fn parse(bytes) { throw \"bad\"; }".into()),
            )))
            .unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        cancel.cancel();

        let events = until_ended(&mut worker.events).await;
        let fallback = events.iter().any(|e| matches!(e, WorkerEvent::ParserStatus(status) if status.is_fallback()));
        assert!(fallback);
    }

    #[tokio::test]
    async fn serial_without_reader_faults_session() {
        let mut worker = Worker::spawn(CoordinatorConfig::default());
        worker
            .commands
            .send(WorkerCommand::Start(Box::new(StartSession {
                source: Source::Serial,
                parser: ParserSelection::default(),
                sim: SimConfig::default(),
                reader: None,
                cancel: CancellationToken::new(),
            })))
            .unwrap();

        let events = until_ended(&mut worker.events).await;
        assert!(matches!(events.last(), Some(WorkerEvent::SessionEnded(SessionEnd::StreamFault(_)))));
    }

    #[tokio::test]
    async fn worker_exits_when_host_drops_commands() {
        let WorkerChannels { commands, events: _events, handle } = Worker::spawn(CoordinatorConfig::default());
        drop(commands);
        handle.await.unwrap();
    }
}
