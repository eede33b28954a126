//! ActorHandle - submission side of the segment cache actor
//!
//! Cloneable and usable from any thread. Submitting blocks while the inbound
//! queue is full; that is the actor's backpressure.

use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam_channel::{SendTimeoutError, Sender, TrySendError};
use tracing::{debug, info, warn};

use super::core::{ActorStats, StatsCounters};
use super::correlator::{ResponseCorrelator, Ticket};
use super::handler::Handler;
use super::messages::{Command, Failure, HandlerId, Message, Response, SegmentEvent};
use crate::error::{CoordinatorError, CoordinatorResult, CorrelatorError};

/// Handle to a running actor
#[derive(Clone)]
pub struct ActorHandle {
    tx: Sender<Message>,
    responses: ResponseCorrelator<Ticket, Response>,
    stats: Arc<StatsCounters>,
}

impl ActorHandle {
    pub(crate) fn new(
        tx: Sender<Message>,
        responses: ResponseCorrelator<Ticket, Response>,
        stats: Arc<StatsCounters>,
    ) -> Self {
        debug!("ActorHandle::new: called");
        Self { tx, responses, stats }
    }

    /// Hand a handler's state to the actor
    pub(crate) fn attach(&self, handler: Handler) -> CoordinatorResult<()> {
        debug!(handler = %handler.id(), "ActorHandle::attach: called");
        self.tx
            .send(Message::Attach(Box::new(handler)))
            .map_err(|_| CoordinatorError::ShutDown)
    }

    /// Drop a handler's state on the actor, without blocking
    pub(crate) fn detach(&self, handler: HandlerId) {
        debug!(%handler, "ActorHandle::detach: called");
        match self.tx.try_send(Message::Detach(handler)) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                warn!(%handler, "Inbound queue full; handler stays attached until shutdown");
            }
            Err(TrySendError::Disconnected(_)) => {
                debug!(%handler, "ActorHandle::detach: actor already stopped");
            }
        }
    }

    /// Run `command` on the actor and block for its result
    pub(crate) fn execute<C: Command>(&self, handler: HandlerId, command: C) -> CoordinatorResult<C::Output> {
        let name = command.name();
        let ticket = Ticket::new();
        debug!(%handler, command = name, %ticket, "ActorHandle::execute: called");

        self.tx
            .send(Message::Command {
                handler,
                ticket,
                command: Box::new(command),
            })
            .map_err(|_| CoordinatorError::ShutDown)?;

        let response = self.responses.take(&ticket).map_err(|e| correlator_error(name, e))?;
        unpack(name, handler, response)
    }

    /// Like [`execute`](Self::execute), giving up after `timeout`
    ///
    /// Once the wait is abandoned the command may still run, but its result
    /// is discarded.
    pub(crate) fn execute_timeout<C: Command>(
        &self,
        handler: HandlerId,
        command: C,
        timeout: Duration,
    ) -> CoordinatorResult<C::Output> {
        let name = command.name();
        let ticket = Ticket::new();
        debug!(%handler, command = name, %ticket, ?timeout, "ActorHandle::execute_timeout: called");
        let deadline = Instant::now() + timeout;

        let message = Message::Command {
            handler,
            ticket,
            command: Box::new(command),
        };
        match self.tx.send_timeout(message, timeout) {
            Ok(()) => {}
            Err(SendTimeoutError::Timeout(_)) => {
                return Err(CoordinatorError::Abandoned { command: name, timeout });
            }
            Err(SendTimeoutError::Disconnected(_)) => return Err(CoordinatorError::ShutDown),
        }

        let remaining = deadline.saturating_duration_since(Instant::now());
        let response = self
            .responses
            .take_timeout(&ticket, remaining)
            .map_err(|e| match e {
                CorrelatorError::Timeout(_) => CoordinatorError::Abandoned { command: name, timeout },
                CorrelatorError::Closed => CoordinatorError::ShutDown,
            })?;
        unpack(name, handler, response)
    }

    /// Report an event; returns once it is queued
    pub(crate) fn event(&self, handler: HandlerId, event: SegmentEvent) -> CoordinatorResult<()> {
        debug!(%handler, kind = event.kind(), "ActorHandle::event: called");
        self.tx
            .send(Message::Event { handler, event })
            .map_err(|_| CoordinatorError::ShutDown)
    }

    /// Ask the actor to stop and wait for its acknowledgement
    ///
    /// Messages queued behind the request are discarded; their callers get
    /// [`CoordinatorError::ShutDown`].
    pub fn shutdown(&self) -> CoordinatorResult<()> {
        debug!("ActorHandle::shutdown: called");
        let ticket = Ticket::new();
        self.tx
            .send(Message::Shutdown { ticket })
            .map_err(|_| CoordinatorError::ShutDown)?;
        let response = self
            .responses
            .take(&ticket)
            .map_err(|e| correlator_error("shutdown", e))?;
        let ack = response
            .map_err(|_| CoordinatorError::ResponseType("shutdown"))?
            .downcast::<String>()
            .map_err(|_| CoordinatorError::ResponseType("shutdown"))?;
        info!(ack = %ack, "Segment cache actor acknowledged shutdown");
        Ok(())
    }

    pub fn stats(&self) -> ActorStats {
        self.stats.snapshot()
    }

    pub fn is_running(&self) -> bool {
        self.stats.is_running()
    }
}

fn correlator_error(command: &'static str, e: CorrelatorError) -> CoordinatorError {
    match e {
        CorrelatorError::Closed => CoordinatorError::ShutDown,
        CorrelatorError::Timeout(timeout) => CoordinatorError::Abandoned { command, timeout },
    }
}

fn unpack<T: 'static>(command: &'static str, handler: HandlerId, response: Response) -> CoordinatorResult<T> {
    match response {
        Ok(output) => output
            .downcast::<T>()
            .map(|output| *output)
            .map_err(|_| CoordinatorError::ResponseType(command)),
        Err(Failure::UnknownHandler) => Err(CoordinatorError::UnknownHandler(handler)),
        Err(Failure::Failed(message)) => Err(CoordinatorError::CommandFailed { command, message }),
    }
}
