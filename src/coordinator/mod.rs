//! Control-plane coordinator.
//!
//! The [`Coordinator`] is an actor task that owns the connection state
//! machine, the open port, the Aresplot request table, and the host-side
//! history. Everything else talks to it through a [`CoordinatorHandle`].
//!
//! ```text
//! Disconnected ──connect()──▶ Connecting ──ok──▶ Connected
//!                              └──fail──▶ Disconnected
//! Connected    ──start()──▶ Collecting
//! Collecting   ──stop()/fault/lost──▶ Stopping ──▶ Connected | Disconnected
//! any          ──worker gone──▶ Faulted
//! ```
//!
//! The worker streams batches, ACKs, and MCU error reports back over its
//! event channel; the coordinator folds them into metrics and republishes
//! them on the [`EventBus`].

mod events;
mod requests;
mod writer;

pub use events::{CoordinatorEvent, EventBus, EventHandler, EventKind, HandlerId};
pub use requests::{PendingRequests, Request, Resolution, SLOT_COUNT};
pub use writer::ControlWriter;

use futures::{Stream, StreamExt};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::time::{Instant, MissedTickBehavior, interval_at, sleep_until};
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::{BroadcastStream, WatchStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::batch::{BufferEstimate, Metrics, RateMeter, SampleHistory};
use crate::codec::{ParserStatus, build_set_sample_rate, build_set_variable, build_start_monitor};
use crate::port::{BoxedReader, PortHandle, PortOpener};
use crate::stream::CoalesceExt;
use crate::worker::{SessionEnd, StartSession, Worker, WorkerChannels, WorkerCommand, WorkerEvent};
use crate::types::{
    AresType, Batch, CommandId, ConnectionState, CoordinatorConfig, ParserSelection, ProtocolKind, Sample,
    SerialOptions, SessionConfig, SimConfig, Source, SubscriptionSet, UpdateRate,
};
use crate::{AresplotError, Result};

const INTENT_CAPACITY: usize = 64;
const EVENT_CAPACITY: usize = 1024;

type Reply<T> = oneshot::Sender<T>;

enum Intent {
    Connect { options: SerialOptions, reply: Reply<Result<()>> },
    Disconnect { reply: Reply<Result<()>> },
    Start { config: Box<SessionConfig>, reply: Reply<Result<()>> },
    Stop { reply: Reply<Result<()>> },
    UpdateParser { selection: ParserSelection, reply: Reply<Result<()>> },
    UpdateSimConfig { sim: SimConfig, reply: Reply<Result<()>> },
    Subscribe { subscriptions: SubscriptionSet, reply: Reply<Result<()>> },
    WriteVariable { address: u32, original_type: AresType, value: f32, reply: Reply<Result<()>> },
    SetSampleRate { rate_hz: u32, reply: Reply<Result<()>> },
    On { kind: Option<EventKind>, handler: EventHandler, reply: Reply<HandlerId> },
    Off { id: HandlerId, reply: Reply<bool> },
    History { reply: Reply<Vec<Sample>> },
    Acknowledged { reply: Reply<SubscriptionSet> },
}

/// What to do with the port once the running session has ended.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
enum AfterStop {
    #[default]
    Stay,
    Disconnect { external: bool },
}

struct ActiveSession {
    cancel: CancellationToken,
    source: Source,
    protocol: ProtocolKind,
    reader_return: Option<oneshot::Receiver<BoxedReader>>,
}

/// Coordinator actor
pub struct Coordinator<O: PortOpener> {
    config: CoordinatorConfig,
    opener: O,
    state: ConnectionState,
    state_tx: watch::Sender<ConnectionState>,
    metrics_tx: watch::Sender<Metrics>,
    bus: EventBus,
    intents: mpsc::Receiver<Intent>,
    shutdown: CancellationToken,

    worker_commands: mpsc::UnboundedSender<WorkerCommand>,
    worker_events: mpsc::UnboundedReceiver<WorkerEvent>,
    worker_handle: tokio::task::JoinHandle<()>,
    worker_gone: bool,
    fault_reason: Option<String>,

    port: Option<PortHandle>,
    lost: Option<CancellationToken>,
    lost_armed: bool,
    writer: ControlWriter,

    session: Option<ActiveSession>,
    session_config: SessionConfig,
    after_stop: AfterStop,
    stop_waiters: Vec<Reply<Result<()>>>,

    pending: PendingRequests,
    acknowledged: SubscriptionSet,

    history: SampleHistory,
    rate: RateMeter,
    total_points: u64,
}

impl<O: PortOpener> Coordinator<O> {
    /// Spawn the coordinator together with its worker task.
    pub fn spawn(opener: O, config: CoordinatorConfig) -> CoordinatorHandle {
        let worker = Worker::spawn(config.clone());
        Self::spawn_with_worker(opener, config, worker)
    }

    /// Spawn against an already running worker.
    pub fn spawn_with_worker(opener: O, config: CoordinatorConfig, worker: WorkerChannels) -> CoordinatorHandle {
        let (intent_tx, intent_rx) = mpsc::channel(INTENT_CAPACITY);
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);
        let (metrics_tx, metrics_rx) = watch::channel(Metrics::default());
        let bus = EventBus::new(EVENT_CAPACITY);
        let events = bus.sender().subscribe();
        let shutdown = CancellationToken::new();

        let coordinator = Coordinator {
            pending: PendingRequests::new(config.request_timeout()),
            history: SampleHistory::new(config.max_points),
            rate: RateMeter::new(config.rate_window(), config.rate_decay()),
            opener,
            state: ConnectionState::Disconnected,
            state_tx,
            metrics_tx,
            bus,
            intents: intent_rx,
            shutdown: shutdown.clone(),
            worker_commands: worker.commands,
            worker_events: worker.events,
            worker_handle: worker.handle,
            worker_gone: false,
            fault_reason: None,
            port: None,
            lost: None,
            lost_armed: false,
            writer: ControlWriter::new(config.request_timeout()),
            session: None,
            session_config: SessionConfig::default(),
            after_stop: AfterStop::Stay,
            stop_waiters: Vec::new(),
            acknowledged: SubscriptionSet::default(),
            total_points: 0,
            config: config.clone(),
        };
        tokio::spawn(coordinator.run());

        CoordinatorHandle {
            intents: intent_tx,
            state: state_rx,
            metrics: metrics_rx,
            events,
            shutdown,
            emission_hz: config.emission_hz(),
        }
    }

    async fn run(mut self) {
        info!("Coordinator started");
        let window = self.config.rate_window();
        let mut metrics_tick = interval_at(Instant::now() + window, window);
        metrics_tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            let deadline = self.pending.next_deadline();
            let lost = self.lost.clone().filter(|_| self.lost_armed);

            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                intent = self.intents.recv() => match intent {
                    Some(intent) => self.handle_intent(intent).await,
                    None => break,
                },
                event = self.worker_events.recv(), if !self.worker_gone => match event {
                    Some(event) => self.on_worker_event(event).await,
                    None => self.fault("worker terminated"),
                },
                _ = wait_lost(lost) => self.on_port_lost(),
                _ = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    self.expire_requests().await;
                }
                _ = metrics_tick.tick() => self.publish_metrics(),
            }
        }

        self.teardown().await;
    }

    async fn handle_intent(&mut self, intent: Intent) {
        match intent {
            Intent::Connect { options, reply } => {
                let result = self.connect(options).await;
                let _ = reply.send(result);
            }
            Intent::Disconnect { reply } => self.disconnect(reply),
            Intent::Start { config, reply } => {
                let _ = reply.send(self.start(*config));
            }
            Intent::Stop { reply } => self.stop(reply),
            Intent::UpdateParser { selection, reply } => {
                let _ = reply.send(self.update_parser(selection));
            }
            Intent::UpdateSimConfig { sim, reply } => {
                let _ = reply.send(self.update_sim_config(sim));
            }
            Intent::Subscribe { subscriptions, reply } => {
                let frame = build_start_monitor(subscriptions.entries());
                self.request("subscribe", CommandId::StartMonitor, frame, reply, Some(subscriptions)).await;
            }
            Intent::WriteVariable { address, original_type, value, reply } => {
                let frame = build_set_variable(address, original_type, value);
                self.request("write a variable", CommandId::SetVariable, frame, reply, None).await;
            }
            Intent::SetSampleRate { rate_hz, reply } => {
                let frame = build_set_sample_rate(rate_hz);
                self.request("set the sample rate", CommandId::SetSampleRate, frame, reply, None).await;
            }
            Intent::On { kind, handler, reply } => {
                let _ = reply.send(self.bus.on(kind, handler));
            }
            Intent::Off { id, reply } => {
                let _ = reply.send(self.bus.off(id));
            }
            Intent::History { reply } => {
                let _ = reply.send(self.history.snapshot());
            }
            Intent::Acknowledged { reply } => {
                let _ = reply.send(self.acknowledged.clone());
            }
        }
    }

    fn ensure_alive(&self) -> Result<()> {
        match &self.fault_reason {
            Some(reason) => Err(AresplotError::WorkerFaulted { reason: reason.clone() }),
            None => Ok(()),
        }
    }

    async fn connect(&mut self, options: SerialOptions) -> Result<()> {
        self.ensure_alive()?;
        if self.state != ConnectionState::Disconnected {
            return Err(AresplotError::invalid_state("connect", self.state));
        }
        options.validate()?;

        self.transition(ConnectionState::Connecting);
        info!(path = %options.path, baud = options.baud_rate, "Opening port");

        match self.opener.open(&options).await {
            Ok(mut port) => {
                self.writer.acquire(&mut port);
                self.lost = Some(port.lost_token());
                self.lost_armed = true;
                self.port = Some(port);
                self.session_config.serial = options.clone();
                self.transition(ConnectionState::Connected);
                self.bus.emit(CoordinatorEvent::Connected { path: options.path });
                Ok(())
            }
            Err(e) => {
                warn!("Open failed: {}", e);
                self.transition(ConnectionState::Disconnected);
                Err(e)
            }
        }
    }

    fn disconnect(&mut self, reply: Reply<Result<()>>) {
        match self.state {
            ConnectionState::Disconnected | ConnectionState::Faulted => {
                let _ = reply.send(Ok(()));
            }
            ConnectionState::Connecting | ConnectionState::Connected => {
                self.close_port(false);
                let _ = reply.send(Ok(()));
            }
            ConnectionState::Collecting => {
                self.after_stop = AfterStop::Disconnect { external: false };
                self.stop_waiters.push(reply);
                self.begin_stop();
            }
            ConnectionState::Stopping => {
                if self.after_stop == AfterStop::Stay {
                    self.after_stop = AfterStop::Disconnect { external: false };
                }
                self.stop_waiters.push(reply);
            }
        }
    }

    fn start(&mut self, config: SessionConfig) -> Result<()> {
        self.ensure_alive()?;
        let selection = config.parser_selection();
        selection.validate()?;
        config.sim.validate()?;

        let leased = match (config.source, self.state) {
            (_, ConnectionState::Collecting | ConnectionState::Stopping | ConnectionState::Connecting) => {
                return Err(AresplotError::invalid_state("start", self.state));
            }
            (Source::Serial, ConnectionState::Connected) => {
                let port = self.port.as_mut().ok_or(AresplotError::ConnectionLost)?;
                let lease = port
                    .lease_reader()
                    .ok_or_else(|| AresplotError::connection_failed("port reader is still leased"))?;
                Some(lease)
            }
            (Source::Serial, state) => return Err(AresplotError::invalid_state("start a serial session", state)),
            (Source::Simulated, _) => None,
        };
        let (reader, reader_return) = leased.unzip();

        let cancel = self.shutdown.child_token();
        let start = StartSession {
            source: config.source,
            parser: selection.clone(),
            sim: config.sim,
            reader,
            cancel: cancel.clone(),
        };
        self.send_worker(WorkerCommand::Start(Box::new(start)))?;

        info!(source = ?config.source, protocol = ?selection.protocol, "Session starting");
        self.session = Some(ActiveSession { cancel, source: config.source, protocol: selection.protocol, reader_return });
        self.session_config = config;
        self.after_stop = AfterStop::Stay;
        self.history.clear();
        self.rate.reset(Instant::now());
        self.total_points = 0;
        self.transition(ConnectionState::Collecting);
        self.publish_metrics();
        Ok(())
    }

    fn stop(&mut self, reply: Reply<Result<()>>) {
        match self.state {
            ConnectionState::Collecting => {
                self.stop_waiters.push(reply);
                self.begin_stop();
            }
            ConnectionState::Stopping => self.stop_waiters.push(reply),
            _ => {
                let _ = reply.send(Ok(()));
            }
        }
    }

    fn begin_stop(&mut self) {
        self.transition(ConnectionState::Stopping);
        if let Some(session) = &self.session {
            session.cancel.cancel();
        }
        let _ = self.worker_commands.send(WorkerCommand::Stop);
    }

    fn update_parser(&mut self, selection: ParserSelection) -> Result<()> {
        self.ensure_alive()?;
        let running = matches!(self.state, ConnectionState::Collecting | ConnectionState::Stopping);
        if running
            && selection.protocol != self.session_config.protocol
            && !self.config.allow_parser_update_while_collecting
        {
            return Err(AresplotError::invalid_state("change protocol", self.state));
        }
        selection.validate()?;

        self.session_config.protocol = selection.protocol;
        self.session_config.parser_source = selection.parser_source.clone();
        if let Some(session) = self.session.as_mut() {
            session.protocol = selection.protocol;
        }
        self.send_worker(WorkerCommand::UpdateActiveParser(selection))
    }

    fn update_sim_config(&mut self, sim: SimConfig) -> Result<()> {
        self.ensure_alive()?;
        sim.validate()?;
        self.session_config.sim = sim;
        self.send_worker(WorkerCommand::UpdateSimConfig(sim))
    }

    fn send_worker(&mut self, command: WorkerCommand) -> Result<()> {
        if self.worker_commands.send(command).is_err() {
            self.fault("worker command channel closed");
            return self.ensure_alive();
        }
        Ok(())
    }

    /// Aresplot requests need a running serial session speaking Aresplot.
    fn request_guard(&self, operation: &'static str) -> Result<()> {
        self.ensure_alive()?;
        if self.state != ConnectionState::Collecting {
            return Err(AresplotError::invalid_state(operation, self.state));
        }
        match &self.session {
            Some(session) if session.source == Source::Serial && session.protocol == ProtocolKind::Aresplot => Ok(()),
            _ => Err(AresplotError::config("the Aresplot protocol is not active on a serial session")),
        }
    }

    async fn request(
        &mut self,
        operation: &'static str,
        command: CommandId,
        frame: Result<Vec<u8>>,
        reply: Reply<Result<()>>,
        subscriptions: Option<SubscriptionSet>,
    ) {
        let frame = match self.request_guard(operation).and(frame) {
            Ok(frame) => frame,
            Err(e) => {
                let _ = reply.send(Err(e));
                return;
            }
        };
        let mut request = Request::new(command, frame, reply);
        request.subscriptions = subscriptions;
        self.submit(request).await;
    }

    async fn submit(&mut self, request: Request) {
        if self.pending.is_pending(request.command) {
            self.pending.queue(request);
            return;
        }
        let Some(port) = self.port.as_mut() else {
            request.fail(AresplotError::ConnectionLost);
            return;
        };

        match self.writer.send(port, &request.frame).await {
            Ok(()) => {
                debug!(command = %request.command, len = request.frame.len(), "Request sent");
                self.pending.track(request, Instant::now());
            }
            Err(e) => request.fail(e),
        }
    }

    /// Send the next request for `command` once the previous one resolved.
    async fn dispatch_queued(&mut self, command: CommandId) {
        while let Some(next) = self.pending.take_queued(command) {
            self.submit(next).await;
            if self.pending.is_pending(command) {
                break;
            }
        }
    }

    async fn expire_requests(&mut self) {
        for command in self.pending.expire(Instant::now()) {
            self.dispatch_queued(command).await;
        }
    }

    async fn on_worker_event(&mut self, event: WorkerEvent) {
        match event {
            WorkerEvent::DataBatch(batch) => self.on_batch(batch),
            WorkerEvent::Status(status) => self.bus.emit(CoordinatorEvent::Status(status)),
            WorkerEvent::ParserStatus(status) => {
                let fault = match &status {
                    ParserStatus::FellBack { reason, .. } => Some(reason.clone()),
                    ParserStatus::Active(_) => None,
                };
                self.bus.emit(CoordinatorEvent::ParserStatus(status));
                if let Some(reason) = fault {
                    self.bus.emit(CoordinatorEvent::Error(Arc::new(AresplotError::user_parser(reason))));
                }
            }
            WorkerEvent::Ack { cmd_id, status } => {
                self.bus.emit(CoordinatorEvent::AckReceived { cmd_id, status });
                match self.pending.resolve(cmd_id, status, Instant::now()) {
                    Some(resolution) => {
                        debug!(command = %resolution.command, %status, elapsed = ?resolution.elapsed, "Request resolved");
                        if status.is_ok() {
                            if let Some(subscriptions) = resolution.subscriptions {
                                self.acknowledged = subscriptions;
                            }
                        }
                        self.dispatch_queued(resolution.command).await;
                    }
                    None => debug!(cmd_id, %status, "Unsolicited ACK"),
                }
            }
            WorkerEvent::McuError { code, message } => {
                let message = String::from_utf8_lossy(&message).into_owned();
                warn!(code, %message, "MCU error report");
                self.bus.emit(CoordinatorEvent::McuError { code, message });
            }
            WorkerEvent::Warn(message) => warn!("Worker: {}", message),
            WorkerEvent::Info(message) => info!("Worker: {}", message),
            WorkerEvent::SessionEnded(end) => self.on_session_ended(end),
        }
    }

    fn on_batch(&mut self, batch: Batch) {
        let points = batch.point_count();
        self.history.extend(&batch);
        self.total_points += points as u64;
        self.rate.record(points, Instant::now());
        self.bus.emit(CoordinatorEvent::DataBatch(Arc::new(batch)));
        self.publish_metrics();
    }

    fn on_session_ended(&mut self, end: SessionEnd) {
        let Some(session) = self.session.take() else {
            debug!(?end, "Session end without an active session");
            return;
        };

        if let Some(mut returned) = session.reader_return {
            match (returned.try_recv(), self.port.as_mut()) {
                (Ok(reader), Some(port)) => port.restore_reader(reader),
                (Ok(_), None) => debug!("Reader returned after the port closed"),
                (Err(_), _) => warn!("Worker did not return the reader"),
            }
        }

        if let SessionEnd::StreamFault(reason) = &end {
            error!("Session ended on stream fault: {}", reason);
            let source = std::io::Error::other(reason.clone());
            self.bus.emit(CoordinatorEvent::Error(Arc::new(AresplotError::stream("serial read", source))));
        }

        if self.state == ConnectionState::Collecting {
            self.transition(ConnectionState::Stopping);
        }
        self.pending.fail_all(|| AresplotError::invalid_state("await an acknowledgement", ConnectionState::Stopping));

        let end_of_stream = end == SessionEnd::EndOfStream;
        let port_lost = self.port.as_ref().is_some_and(PortHandle::is_lost);
        match std::mem::take(&mut self.after_stop) {
            _ if self.port.is_none() => self.transition(ConnectionState::Disconnected),
            AfterStop::Disconnect { external } => self.close_port(external),
            AfterStop::Stay if end_of_stream || port_lost => self.close_port(true),
            AfterStop::Stay => self.transition(ConnectionState::Connected),
        }

        for waiter in self.stop_waiters.drain(..) {
            let _ = waiter.send(Ok(()));
        }
        self.publish_metrics();
        info!(state = %self.state, ?end, "Session closed");
    }

    fn on_port_lost(&mut self) {
        self.lost_armed = false;
        warn!("Connection lost (external)");
        let reads_port = self.session.as_ref().is_some_and(|s| s.source == Source::Serial);
        match self.state {
            // The port closes once the simulation stops
            ConnectionState::Collecting if !reads_port => debug!("Port lost under a simulated session"),
            ConnectionState::Collecting => {
                self.after_stop = AfterStop::Disconnect { external: true };
                self.begin_stop();
            }
            ConnectionState::Stopping => self.after_stop = AfterStop::Disconnect { external: true },
            ConnectionState::Connecting | ConnectionState::Connected => self.close_port(true),
            ConnectionState::Disconnected | ConnectionState::Faulted => {}
        }
    }

    fn close_port(&mut self, external: bool) {
        if let Some(mut port) = self.port.take() {
            self.writer.release(&mut port);
            debug!(path = %port.options().path, "Port closed");
        }
        self.lost = None;
        self.lost_armed = false;

        self.pending.fail_all(|| {
            if external {
                AresplotError::ConnectionLost
            } else {
                AresplotError::invalid_state("await an acknowledgement", ConnectionState::Disconnected)
            }
        });

        self.transition(ConnectionState::Disconnected);
        self.bus.emit(CoordinatorEvent::Disconnected { external });
        if external {
            self.bus.emit(CoordinatorEvent::Error(Arc::new(AresplotError::ConnectionLost)));
        }
    }

    fn fault(&mut self, reason: &str) {
        error!("Worker faulted: {}", reason);
        self.worker_gone = true;
        self.fault_reason = Some(reason.to_string());

        if let Some(session) = self.session.take() {
            session.cancel.cancel();
        }
        self.pending.fail_all(|| AresplotError::WorkerFaulted { reason: reason.to_string() });
        for waiter in self.stop_waiters.drain(..) {
            let _ = waiter.send(Ok(()));
        }

        self.transition(ConnectionState::Faulted);
        self.bus.emit(CoordinatorEvent::Error(Arc::new(AresplotError::WorkerFaulted { reason: reason.to_string() })));
    }

    fn transition(&mut self, next: ConnectionState) {
        if self.state == next {
            return;
        }
        if !self.state.can_transition_to(next) {
            warn!(from = %self.state, to = %next, "Refused state transition");
            return;
        }
        info!(from = %self.state, to = %next, "State change");
        self.state = next;
        self.state_tx.send_replace(next);
    }

    fn publish_metrics(&mut self) {
        let data_rate = self.rate.rate(Instant::now());
        let retained_points = self.history.len();
        let buffer = if self.state.is_collecting() {
            BufferEstimate::compute(data_rate, self.history.max_points(), retained_points)
        } else {
            None
        };
        let next = Metrics { data_rate, retained_points, total_points: self.total_points, buffer };

        self.metrics_tx.send_if_modified(|current| {
            if *current == next {
                return false;
            }
            *current = next;
            true
        });
    }

    async fn teardown(mut self) {
        if let Some(session) = self.session.take() {
            session.cancel.cancel();
        }
        self.pending.fail_all(|| AresplotError::CoordinatorClosed);
        for waiter in self.stop_waiters.drain(..) {
            let _ = waiter.send(Ok(()));
        }
        if let Some(mut port) = self.port.take() {
            self.writer.release(&mut port);
        }

        let Coordinator { worker_commands, worker_handle, .. } = self;
        drop(worker_commands);
        if let Err(e) = worker_handle.await {
            warn!("Worker task ended abnormally: {}", e);
        }
        info!("Coordinator stopped");
    }
}

async fn wait_lost(token: Option<CancellationToken>) {
    match token {
        Some(token) => token.cancelled_owned().await,
        None => std::future::pending().await,
    }
}

/// Cheap handle to a running [`Coordinator`]
///
/// Every intent is answered by the coordinator task; an error of
/// [`AresplotError::CoordinatorClosed`] means the task is gone.
pub struct CoordinatorHandle {
    intents: mpsc::Sender<Intent>,
    state: watch::Receiver<ConnectionState>,
    metrics: watch::Receiver<Metrics>,
    events: broadcast::Receiver<CoordinatorEvent>,
    shutdown: CancellationToken,
    emission_hz: f64,
}

impl Clone for CoordinatorHandle {
    fn clone(&self) -> Self {
        Self {
            intents: self.intents.clone(),
            state: self.state.clone(),
            metrics: self.metrics.clone(),
            events: self.events.resubscribe(),
            shutdown: self.shutdown.clone(),
            emission_hz: self.emission_hz,
        }
    }
}

impl std::fmt::Debug for CoordinatorHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoordinatorHandle")
            .field("state", &*self.state.borrow())
            .field("closed", &self.intents.is_closed())
            .finish()
    }
}

impl CoordinatorHandle {
    async fn call<T>(&self, intent: impl FnOnce(Reply<T>) -> Intent) -> Result<T> {
        let (tx, rx) = oneshot::channel();
        self.intents.send(intent(tx)).await.map_err(|_| AresplotError::CoordinatorClosed)?;
        rx.await.map_err(|_| AresplotError::CoordinatorClosed)
    }

    /// Open the port described by `options`.
    ///
    /// Options are validated before the opener is called.
    pub async fn connect(&self, options: SerialOptions) -> Result<()> {
        self.call(|reply| Intent::Connect { options, reply }).await?
    }

    /// Close the port, stopping a running session first.
    pub async fn disconnect(&self) -> Result<()> {
        self.call(|reply| Intent::Disconnect { reply }).await?
    }

    /// Start a session. Serial sources require `Connected`.
    pub async fn start(&self, config: SessionConfig) -> Result<()> {
        self.call(|reply| Intent::Start { config: Box::new(config), reply }).await?
    }

    /// Stop the running session and wait until the reader is back.
    ///
    /// Idempotent; returns `Ok` from every state.
    pub async fn stop(&self) -> Result<()> {
        self.call(|reply| Intent::Stop { reply }).await?
    }

    pub async fn update_parser(&self, selection: ParserSelection) -> Result<()> {
        self.call(|reply| Intent::UpdateParser { selection, reply }).await?
    }

    pub async fn update_sim_config(&self, sim: SimConfig) -> Result<()> {
        self.call(|reply| Intent::UpdateSimConfig { sim, reply }).await?
    }

    /// Send `START_MONITOR` and wait for the MCU's ACK.
    pub async fn subscribe(&self, subscriptions: SubscriptionSet) -> Result<()> {
        self.call(|reply| Intent::Subscribe { subscriptions, reply }).await?
    }

    /// Send `SET_VARIABLE` and wait for the MCU's ACK.
    pub async fn write_variable(&self, address: u32, original_type: AresType, value: f32) -> Result<()> {
        self.call(|reply| Intent::WriteVariable { address, original_type, value, reply }).await?
    }

    /// Send `SET_SAMPLE_RATE` and wait for the MCU's ACK.
    pub async fn set_sample_rate(&self, rate_hz: u32) -> Result<()> {
        self.call(|reply| Intent::SetSampleRate { rate_hz, reply }).await?
    }

    /// Register a handler for one kind of event.
    pub async fn on<F>(&self, kind: EventKind, handler: F) -> Result<HandlerId>
    where
        F: Fn(&CoordinatorEvent) + Send + Sync + 'static,
    {
        self.call(|reply| Intent::On { kind: Some(kind), handler: Box::new(handler), reply }).await
    }

    /// Register a handler for every event.
    pub async fn on_any<F>(&self, handler: F) -> Result<HandlerId>
    where
        F: Fn(&CoordinatorEvent) + Send + Sync + 'static,
    {
        self.call(|reply| Intent::On { kind: None, handler: Box::new(handler), reply }).await
    }

    pub async fn off(&self, id: HandlerId) -> Result<bool> {
        self.call(|reply| Intent::Off { id, reply }).await
    }

    /// Samples retained for export, oldest first.
    pub async fn history(&self) -> Result<Vec<Sample>> {
        self.call(|reply| Intent::History { reply }).await
    }

    /// The last subscription set the MCU acknowledged.
    pub async fn acknowledged_subscriptions(&self) -> Result<SubscriptionSet> {
        self.call(|reply| Intent::Acknowledged { reply }).await
    }

    /// Write the retained history as CSV.
    pub async fn export_csv<W: std::io::Write>(&self, writer: W, channel_names: &[String]) -> Result<()> {
        let samples = self.history().await?;
        crate::export::write_csv(writer, &samples, channel_names)
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Current state, then every change.
    pub fn state_stream(&self) -> impl Stream<Item = ConnectionState> + 'static {
        WatchStream::new(self.state.clone())
    }

    /// Wait until the state machine reaches `target`.
    pub async fn wait_for_state(&self, target: ConnectionState) -> Result<()> {
        let mut state = self.state.clone();
        state.wait_for(|s| *s == target).await.map(|_| ()).map_err(|_| AresplotError::CoordinatorClosed)
    }

    pub fn metrics(&self) -> Metrics {
        *self.metrics.borrow()
    }

    pub fn metrics_stream(&self) -> impl Stream<Item = Metrics> + 'static {
        WatchStream::new(self.metrics.clone())
    }

    /// Every event emitted from now on. Lagging subscribers skip events.
    pub fn events(&self) -> impl Stream<Item = CoordinatorEvent> + Send + 'static {
        BroadcastStream::new(self.events.resubscribe()).filter_map(|event| async move {
            match event {
                Ok(event) => Some(event),
                Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                    warn!(skipped, "Event subscriber lagged");
                    None
                }
            }
        })
    }

    /// Data batches delivered at most at `rate`.
    ///
    /// Batches arriving within one interval are merged, never dropped.
    pub fn batches(&self, rate: UpdateRate) -> impl Stream<Item = Batch> + Send + 'static {
        let batches = self.events().filter_map(|event| async move {
            match event {
                CoordinatorEvent::DataBatch(batch) => Some(Arc::unwrap_or_clone(batch)),
                _ => None,
            }
        });

        match rate.coalesce_interval(self.emission_hz) {
            None => batches.boxed(),
            Some(interval) => batches.coalesce(interval).boxed(),
        }
    }

    /// Stop the coordinator task. A running session is cancelled.
    pub fn shutdown(&self) {
        debug!("Coordinator shutdown requested");
        self.shutdown.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.intents.is_closed()
    }
}
