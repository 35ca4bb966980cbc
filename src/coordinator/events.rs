//! Coordinator event bus

use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::trace;

use crate::AresplotError;
use crate::codec::ParserStatus;
use crate::types::{AckStatus, Batch};

/// Everything the coordinator tells its consumers.
#[derive(Debug, Clone)]
pub enum CoordinatorEvent {
    DataBatch(Arc<Batch>),
    Status(String),
    ParserStatus(ParserStatus),
    Connected { path: String },
    Disconnected { external: bool },
    Error(Arc<AresplotError>),
    AckReceived { cmd_id: u8, status: AckStatus },
    /// Asynchronous `ERROR_REPORT` from the MCU
    McuError { code: u8, message: String },
}

/// Discriminant of [`CoordinatorEvent`] used to filter handlers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    DataBatch,
    Status,
    ParserStatus,
    Connected,
    Disconnected,
    Error,
    AckReceived,
    McuError,
}

impl CoordinatorEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            CoordinatorEvent::DataBatch(_) => EventKind::DataBatch,
            CoordinatorEvent::Status(_) => EventKind::Status,
            CoordinatorEvent::ParserStatus(_) => EventKind::ParserStatus,
            CoordinatorEvent::Connected { .. } => EventKind::Connected,
            CoordinatorEvent::Disconnected { .. } => EventKind::Disconnected,
            CoordinatorEvent::Error(_) => EventKind::Error,
            CoordinatorEvent::AckReceived { .. } => EventKind::AckReceived,
            CoordinatorEvent::McuError { .. } => EventKind::McuError,
        }
    }
}

/// Synchronous sink called on the coordinator task.
pub type EventHandler = Box<dyn Fn(&CoordinatorEvent) + Send + Sync>;

/// Returned by registration, used to unregister.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(u64);

struct Registration {
    id: HandlerId,
    kind: Option<EventKind>,
    handler: EventHandler,
}

/// Ordered handlers plus a broadcast fan-out.
///
/// Handlers see each event in registration order before it is broadcast.
pub struct EventBus {
    handlers: Vec<Registration>,
    next_id: u64,
    broadcast: broadcast::Sender<CoordinatorEvent>,
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("handlers", &self.handlers.len())
            .field("subscribers", &self.broadcast.receiver_count())
            .finish()
    }
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (broadcast, _) = broadcast::channel(capacity.max(1));
        Self { handlers: Vec::new(), next_id: 0, broadcast }
    }

    /// Register `handler` for events of `kind`, or every event when `None`.
    pub fn on(&mut self, kind: Option<EventKind>, handler: EventHandler) -> HandlerId {
        let id = HandlerId(self.next_id);
        self.next_id += 1;
        self.handlers.push(Registration { id, kind, handler });
        id
    }

    pub fn off(&mut self, id: HandlerId) -> bool {
        let before = self.handlers.len();
        self.handlers.retain(|r| r.id != id);
        self.handlers.len() != before
    }

    pub fn emit(&self, event: CoordinatorEvent) {
        let kind = event.kind();
        for registration in self.handlers.iter().filter(|r| r.kind.is_none_or(|k| k == kind)) {
            (registration.handler)(&event);
        }
        if self.broadcast.send(event).is_err() {
            trace!(?kind, "No event subscribers");
        }
    }

    pub fn sender(&self) -> broadcast::Sender<CoordinatorEvent> {
        self.broadcast.clone()
    }
}
