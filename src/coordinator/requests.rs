//! Pending Aresplot requests awaiting an ACK

use std::collections::VecDeque;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::types::{AckStatus, CommandId, SubscriptionSet};
use crate::{AresplotError, Result};

/// Slots in the pending table, indexed by `cmd_id % SLOT_COUNT`.
pub const SLOT_COUNT: usize = 8;

/// An outbound request and the caller waiting on it.
#[derive(Debug)]
pub struct Request {
    pub command: CommandId,
    pub frame: Vec<u8>,
    pub reply: oneshot::Sender<Result<()>>,
    /// Set for `START_MONITOR` so an OK ACK can record the acknowledged set
    pub subscriptions: Option<SubscriptionSet>,
}

impl Request {
    pub fn new(command: CommandId, frame: Vec<u8>, reply: oneshot::Sender<Result<()>>) -> Self {
        Self { command, frame, reply, subscriptions: None }
    }

    /// Resolve without ever having been sent.
    pub fn fail(self, error: AresplotError) {
        let _ = self.reply.send(Err(error));
    }
}

#[derive(Debug)]
struct Pending {
    command: CommandId,
    sent_at: Instant,
    deadline: Instant,
    reply: oneshot::Sender<Result<()>>,
    subscriptions: Option<SubscriptionSet>,
}

/// Outcome of matching an ACK to its request.
#[derive(Debug)]
pub struct Resolution {
    pub command: CommandId,
    pub status: AckStatus,
    pub subscriptions: Option<SubscriptionSet>,
    pub elapsed: Duration,
}

/// At most one request in flight per command, the rest wait in FIFO order.
#[derive(Debug)]
pub struct PendingRequests {
    slots: [Option<Pending>; SLOT_COUNT],
    queued: VecDeque<Request>,
    timeout: Duration,
}

impl PendingRequests {
    pub fn new(timeout: Duration) -> Self {
        Self { slots: Default::default(), queued: VecDeque::new(), timeout }
    }

    fn slot(cmd_id: u8) -> usize {
        cmd_id as usize % SLOT_COUNT
    }

    pub fn is_pending(&self, command: CommandId) -> bool {
        self.slots[Self::slot(command.as_u8())].as_ref().is_some_and(|p| p.command == command)
    }

    /// Park a request until the in-flight one for the same command resolves.
    pub fn queue(&mut self, request: Request) {
        debug!(command = %request.command, queued = self.queued.len() + 1, "Request queued");
        self.queued.push_back(request);
    }

    /// Start the ACK clock for a request that was just written.
    pub fn track(&mut self, request: Request, now: Instant) {
        let slot = Self::slot(request.command.as_u8());
        if self.slots[slot].is_some() {
            self.queue(request);
            return;
        }
        self.slots[slot] = Some(Pending {
            command: request.command,
            sent_at: now,
            deadline: now + self.timeout,
            reply: request.reply,
            subscriptions: request.subscriptions,
        });
    }

    /// Match an ACK against the pending table and answer the caller.
    ///
    /// Returns `None` for an ACK nobody is waiting on.
    pub fn resolve(&mut self, cmd_id: u8, status: AckStatus, now: Instant) -> Option<Resolution> {
        let slot = &mut self.slots[Self::slot(cmd_id)];
        if !slot.as_ref().is_some_and(|p| p.command.as_u8() == cmd_id) {
            return None;
        }
        let pending = slot.take()?;

        let result = if status.is_ok() {
            Ok(())
        } else {
            Err(AresplotError::RequestRejected { command: pending.command, status })
        };
        let _ = pending.reply.send(result);

        Some(Resolution {
            command: pending.command,
            status,
            subscriptions: pending.subscriptions,
            elapsed: now.duration_since(pending.sent_at),
        })
    }

    /// Earliest deadline among in-flight requests.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.slots.iter().flatten().map(|p| p.deadline).min()
    }

    /// Time out every request whose deadline has passed.
    pub fn expire(&mut self, now: Instant) -> Vec<CommandId> {
        let mut expired = Vec::new();
        for slot in &mut self.slots {
            if !slot.as_ref().is_some_and(|p| p.deadline <= now) {
                continue;
            }
            let Some(pending) = slot.take() else { continue };
            warn!(command = %pending.command, "Request timed out");
            let _ = pending.reply.send(Err(AresplotError::RequestTimeout {
                command: pending.command,
                duration: self.timeout,
            }));
            expired.push(pending.command);
        }
        expired
    }

    /// Next queued request for `command`, once nothing for it is in flight.
    pub fn take_queued(&mut self, command: CommandId) -> Option<Request> {
        if self.is_pending(command) {
            return None;
        }
        let index = self.queued.iter().position(|r| r.command == command)?;
        self.queued.remove(index)
    }

    /// Resolve everything in flight or queued with an error from `error`.
    pub fn fail_all(&mut self, error: impl Fn() -> AresplotError) {
        for pending in self.slots.iter_mut().filter_map(Option::take) {
            let _ = pending.reply.send(Err(error()));
        }
        for request in self.queued.drain(..) {
            request.fail(error());
        }
    }

    /// Requests currently waiting on an ACK.
    pub fn in_flight(&self) -> usize {
        self.slots.iter().flatten().count()
    }

    pub fn queued(&self) -> usize {
        self.queued.len()
    }
}
