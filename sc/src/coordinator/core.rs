//! The segment cache actor thread
//!
//! One dedicated thread drains the inbound queue in FIFO order. Commands run
//! against the addressed handler and their results go out through the
//! response correlator; events are applied with no reply. A failing or
//! panicking command is reported to its caller and the loop carries on.

use std::any::Any;
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Instant;

use crossbeam_channel::Receiver;
use serde::Serialize;
use tracing::{debug, error, info, trace, warn};

use super::config::CoordinatorConfig;
use super::correlator::{Responder, Ticket, response_channel};
use super::handle::ActorHandle;
use super::handler::Handler;
use super::messages::{DynCommand, Failure, HandlerId, Message, Response};
use crate::error::{CoordinatorError, CoordinatorResult};

/// Text of the response to a shutdown request
pub(crate) const SHUTDOWN_ACK: &str = "Shutdown succeeded";

/// Live counters, shared between the actor thread and its handles
#[derive(Debug, Default)]
pub(crate) struct StatsCounters {
    messages_received: AtomicU64,
    commands_executed: AtomicU64,
    command_failures: AtomicU64,
    events_dispatched: AtomicU64,
    event_failures: AtomicU64,
    messages_discarded: AtomicU64,
    handlers_attached: AtomicUsize,
    running: AtomicBool,
}

impl StatsCounters {
    pub(crate) fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub(crate) fn snapshot(&self) -> ActorStats {
        ActorStats {
            messages_received: self.messages_received.load(Ordering::Relaxed),
            commands_executed: self.commands_executed.load(Ordering::Relaxed),
            command_failures: self.command_failures.load(Ordering::Relaxed),
            events_dispatched: self.events_dispatched.load(Ordering::Relaxed),
            event_failures: self.event_failures.load(Ordering::Relaxed),
            messages_discarded: self.messages_discarded.load(Ordering::Relaxed),
            handlers_attached: self.handlers_attached.load(Ordering::Relaxed),
            running: self.is_running(),
        }
    }

    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Point-in-time view of the actor loop
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct ActorStats {
    pub messages_received: u64,
    pub commands_executed: u64,
    pub command_failures: u64,
    pub events_dispatched: u64,
    pub event_failures: u64,
    /// Queued behind a shutdown and never processed
    pub messages_discarded: u64,
    pub handlers_attached: usize,
    pub running: bool,
}

/// Owns the actor thread
///
/// Dropping the actor shuts it down and joins the thread.
pub struct Actor {
    handle: ActorHandle,
    thread: Option<JoinHandle<()>>,
}

impl Actor {
    /// Validate `config` and spawn the actor thread
    pub fn start(config: CoordinatorConfig) -> CoordinatorResult<Self> {
        debug!(?config, "Actor::start: called");
        config.validate()?;

        let (tx, rx) = crossbeam_channel::bounded(config.inbound_capacity);
        let (responder, responses) = response_channel(config.response_capacity);
        let stats = Arc::new(StatsCounters::default());
        stats.running.store(true, Ordering::Release);

        let thread = thread::Builder::new().name(config.thread_name.clone()).spawn({
            let stats = Arc::clone(&stats);
            move || run(rx, responder, stats)
        })?;

        info!(
            thread_name = %config.thread_name,
            inbound_capacity = config.inbound_capacity,
            "Segment cache actor spawned"
        );
        Ok(Self {
            handle: ActorHandle::new(tx, responses, stats),
            thread: Some(thread),
        })
    }

    pub fn handle(&self) -> ActorHandle {
        self.handle.clone()
    }

    /// Stop the actor and wait for its thread to exit
    ///
    /// Already-stopped actors shut down cleanly.
    pub fn shutdown(mut self) -> CoordinatorResult<()> {
        debug!("Actor::shutdown: called");
        if let Err(e) = self.handle.shutdown()
            && !e.is_shutdown()
        {
            return Err(e);
        }
        self.join()
    }

    fn join(&mut self) -> CoordinatorResult<()> {
        if let Some(thread) = self.thread.take() {
            thread.join().map_err(|_| CoordinatorError::ActorPanicked)?;
        }
        Ok(())
    }
}

impl Drop for Actor {
    fn drop(&mut self) {
        if self.thread.is_some() {
            debug!("Actor::drop: shutting down");
            let _ = self.handle.shutdown();
            if let Err(e) = self.join() {
                error!(error = %e, "Actor thread did not exit cleanly");
            }
        }
    }
}

fn run(rx: Receiver<Message>, responder: Responder<Ticket, Response>, stats: Arc<StatsCounters>) {
    debug!("run: called");
    info!("Segment cache actor started");
    let mut handlers: HashMap<HandlerId, Handler> = HashMap::new();

    while let Ok(message) = rx.recv() {
        StatsCounters::bump(&stats.messages_received);
        trace!(?message, "run: received");

        match message {
            Message::Attach(handler) => {
                debug!(handler = %handler.id(), "Attaching handler");
                handlers.insert(handler.id(), *handler);
                stats.handlers_attached.store(handlers.len(), Ordering::Relaxed);
            }

            Message::Detach(id) => {
                let removed = handlers.remove(&id);
                stats.handlers_attached.store(handlers.len(), Ordering::Relaxed);
                match removed {
                    Some(handler) => {
                        debug!(handler = %id, "Detached handler");
                        drop(handler);
                    }
                    None => debug!(handler = %id, "Detach for unknown handler"),
                }
            }

            Message::Command {
                handler,
                ticket,
                command,
            } => {
                let response = match handlers.get_mut(&handler) {
                    Some(state) => execute(command, state, &stats),
                    None => {
                        warn!(%handler, command = command.command_name(), "Command for unknown handler");
                        StatsCounters::bump(&stats.command_failures);
                        Err(Failure::UnknownHandler)
                    }
                };
                if responder.put(ticket, response).is_err() {
                    warn!(%ticket, "Response correlator gone; dropping response");
                }
            }

            Message::Event { handler, event } => {
                let kind = event.kind();
                let Some(state) = handlers.get_mut(&handler) else {
                    warn!(%handler, kind, "Event for unknown handler dropped");
                    StatsCounters::bump(&stats.event_failures);
                    continue;
                };
                StatsCounters::bump(&stats.events_dispatched);
                match panic::catch_unwind(AssertUnwindSafe(|| state.apply(event))) {
                    Ok(Ok(())) => trace!(%handler, kind, "run: event applied"),
                    Ok(Err(e)) => {
                        StatsCounters::bump(&stats.event_failures);
                        warn!(%handler, kind, error = %e, "Event rejected");
                    }
                    Err(payload) => {
                        StatsCounters::bump(&stats.event_failures);
                        error!(%handler, kind, panic = %panic_message(payload.as_ref()), "Event handler panicked");
                    }
                }
            }

            Message::Shutdown { ticket } => {
                info!("Shutdown requested");
                let ack: Box<dyn Any + Send> = Box::new(SHUTDOWN_ACK.to_string());
                if responder.put(ticket, Ok(ack)).is_err() {
                    warn!(%ticket, "Response correlator gone; shutdown not acknowledged");
                }
                break;
            }
        }
    }

    stats.running.store(false, Ordering::Release);
    let discarded = rx.try_iter().count();
    if discarded > 0 {
        stats.messages_discarded.fetch_add(discarded as u64, Ordering::Relaxed);
        warn!(discarded, "Discarded messages queued behind shutdown");
    }

    // Dropping handlers fails any still-pending loads with LoadError::Dropped;
    // dropping the responder wakes callers still waiting on a ticket.
    stats.handlers_attached.store(0, Ordering::Relaxed);
    drop(handlers);
    drop(responder);
    info!("Segment cache actor stopped");
}

fn execute(command: Box<dyn DynCommand>, handler: &mut Handler, stats: &StatsCounters) -> Response {
    let name = command.command_name();
    let started = Instant::now();
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| command.call_boxed(handler)));
    StatsCounters::bump(&stats.commands_executed);

    match outcome {
        Ok(Ok(output)) => {
            debug!(
                command = name,
                elapsed_us = started.elapsed().as_micros() as u64,
                "Command executed"
            );
            Ok(output)
        }
        Ok(Err(e)) => {
            StatsCounters::bump(&stats.command_failures);
            warn!(command = name, error = %e, "Command failed");
            Err(Failure::Failed(format!("{:#}", e)))
        }
        Err(payload) => {
            StatsCounters::bump(&stats.command_failures);
            let message = panic_message(payload.as_ref());
            error!(command = name, panic = %message, "Command panicked");
            Err(Failure::Failed(format!("panicked: {}", message)))
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
