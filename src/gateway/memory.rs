//! In-process command bus
//!
//! `InMemoryCommandBus` plays the server side of the dispatch protocol inside
//! the current process. It is responsible for:
//! - tracking open streams, the commands each one subscribed to, and the
//!   flow-control permits each one granted
//! - routing a dispatched command to a subscribed stream, spending one permit,
//!   or parking it in that stream's backlog until permits arrive
//! - correlating response frames with the waiting `dispatch` call
//!
//! Concurrency notes:
//! - State lives behind a `std::sync::Mutex`; the lock is never held across
//!   an `.await`.
//! - Each stream gets a background task that applies its outbound frames in
//!   order and cleans the stream up once the writer side is dropped.
//! - A dispatch whose handler disappears before replying resolves with an
//!   error reply rather than hanging.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{
    Command, CommandResponse, CommandService, CommandStream, HANDLER_GONE_ERROR_CODE,
    NO_HANDLER_ERROR_CODE, OutboundFrame, receiver_stream,
};
use crate::utils::Result;

pub type StreamId = String;

#[derive(Debug)]
struct StreamHandle {
    sender: mpsc::UnboundedSender<Result<Command>>,
    client_id: Option<String>,
    permits: u64,
    backlog: VecDeque<Command>,
}

#[derive(Debug, Default)]
struct BusState {
    handlers: HashMap<String, Vec<StreamId>>,
    streams: HashMap<StreamId, StreamHandle>,
    pending: HashMap<String, oneshot::Sender<CommandResponse>>,
    in_flight: HashMap<String, StreamId>,
}

impl BusState {
    /// Prefer a subscribed stream with permits to spare, then the shortest backlog.
    fn select_handler(&self, command: &str) -> Option<StreamId> {
        self.handlers
            .get(command)?
            .iter()
            .min_by_key(|id| {
                self.streams
                    .get(*id)
                    .map(|s| (s.permits == 0, s.backlog.len()))
                    .unwrap_or((true, usize::MAX))
            })
            .cloned()
    }

    fn deliver(&mut self, stream_id: &StreamId, command: Command) {
        let Some(stream) = self.streams.get_mut(stream_id) else {
            self.pending.remove(&command.message_identifier);
            return;
        };
        self.in_flight
            .insert(command.message_identifier.clone(), stream_id.clone());

        if stream.permits == 0 {
            debug!(command = %command.name, stream = %stream_id, "no permits, parking command");
            stream.backlog.push_back(command);
            return;
        }

        stream.permits -= 1;
        let id = command.message_identifier.clone();
        if stream.sender.send(Ok(command)).is_err() {
            warn!(stream = %stream_id, "stream receiver dropped, failing command {id}");
            self.in_flight.remove(&id);
            self.pending.remove(&id);
        }
    }

    fn flush_backlog(&mut self, stream_id: &StreamId) {
        let mut ready = Vec::new();
        if let Some(stream) = self.streams.get_mut(stream_id) {
            while stream.permits > 0 {
                match stream.backlog.pop_front() {
                    Some(command) => {
                        stream.permits -= 1;
                        ready.push(command);
                    }
                    None => break,
                }
            }
            for command in ready {
                let id = command.message_identifier.clone();
                if stream.sender.send(Ok(command)).is_err() {
                    self.in_flight.remove(&id);
                    self.pending.remove(&id);
                }
            }
        }
    }

    fn apply(&mut self, stream_id: &StreamId, frame: OutboundFrame) {
        match frame {
            OutboundFrame::FlowControl { client_id, permits } => {
                if let Some(stream) = self.streams.get_mut(stream_id) {
                    stream.permits = stream.permits.saturating_add(permits);
                    debug!(%client_id, permits, total = stream.permits, "permits granted");
                }
                self.flush_backlog(stream_id);
            }
            OutboundFrame::Subscribe {
                client_id,
                component_name,
                command,
            } => {
                if let Some(stream) = self.streams.get_mut(stream_id) {
                    stream.client_id = Some(client_id.clone());
                }
                let subscribers = self.handlers.entry(command.clone()).or_default();
                if !subscribers.contains(stream_id) {
                    subscribers.push(stream_id.clone());
                }
                info!(%client_id, %component_name, "subscribed to {command}");
            }
            OutboundFrame::Response(response) => {
                self.in_flight.remove(&response.request_identifier);
                match self.pending.remove(&response.request_identifier) {
                    Some(waiter) => {
                        let _ = waiter.send(response);
                    }
                    None => warn!(
                        "response for unknown request {}",
                        response.request_identifier
                    ),
                }
            }
        }
    }

    fn close_stream(&mut self, stream_id: &StreamId) {
        let Some(stream) = self.streams.remove(stream_id) else {
            return;
        };
        for subscribers in self.handlers.values_mut() {
            subscribers.retain(|id| id != stream_id);
        }
        self.handlers.retain(|_, subscribers| !subscribers.is_empty());

        // Dropping the waiters resolves the blocked dispatches with an error reply.
        let orphaned: Vec<String> = self
            .in_flight
            .iter()
            .filter(|(_, owner)| *owner == stream_id)
            .map(|(id, _)| id.clone())
            .collect();
        for id in orphaned {
            self.in_flight.remove(&id);
            self.pending.remove(&id);
        }

        info!(
            client_id = stream.client_id.as_deref().unwrap_or("-"),
            "closed stream {stream_id}"
        );
    }
}

#[derive(Debug, Clone, Default)]
pub struct InMemoryCommandBus {
    state: Arc<Mutex<BusState>>,
}

impl InMemoryCommandBus {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BusState> {
        self.state.lock().expect("command bus lock poisoned")
    }

    /// Number of open streams subscribed to `command`.
    pub fn handler_count(&self, command: &str) -> usize {
        self.lock().handlers.get(command).map_or(0, Vec::len)
    }

    pub fn stream_count(&self) -> usize {
        self.lock().streams.len()
    }

    /// Unspent permits across all open streams.
    pub fn available_permits(&self) -> u64 {
        self.lock().streams.values().map(|s| s.permits).sum()
    }

    /// Drop every open stream, ending their inbound sides.
    pub fn disconnect_all(&self) {
        let mut state = self.lock();
        let ids: Vec<StreamId> = state.streams.keys().cloned().collect();
        for id in ids {
            state.close_stream(&id);
        }
    }
}

#[async_trait]
impl CommandService for InMemoryCommandBus {
    async fn dispatch(&self, mut command: Command) -> Result<Option<CommandResponse>> {
        if command.message_identifier.is_empty() {
            command.message_identifier = Uuid::new_v4().to_string();
        }
        let id = command.message_identifier.clone();
        let (tx, rx) = oneshot::channel();

        {
            let mut state = self.lock();
            let Some(stream_id) = state.select_handler(&command.name) else {
                warn!("no handler for command {}", command.name);
                return Ok(Some(CommandResponse::failure(
                    id,
                    NO_HANDLER_ERROR_CODE,
                    format!("No handler for command: {}", command.name),
                )));
            };
            state.pending.insert(id.clone(), tx);
            state.deliver(&stream_id, command);
        }

        match rx.await {
            Ok(response) => Ok(Some(response)),
            Err(_) => Ok(Some(CommandResponse::failure(
                id,
                HANDLER_GONE_ERROR_CODE,
                "handler disconnected before replying",
            ))),
        }
    }

    async fn open_stream(&self) -> Result<CommandStream> {
        let stream_id: StreamId = Uuid::new_v4().to_string();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<OutboundFrame>();

        self.lock().streams.insert(
            stream_id.clone(),
            StreamHandle {
                sender: inbound_tx,
                client_id: None,
                permits: 0,
                backlog: VecDeque::new(),
            },
        );
        debug!("opened stream {stream_id}");

        let bus = self.clone();
        tokio::spawn(async move {
            while let Some(frame) = outbound_rx.recv().await {
                bus.lock().apply(&stream_id, frame);
            }
            bus.lock().close_stream(&stream_id);
        });

        Ok(CommandStream {
            writer: outbound_tx,
            inbound: receiver_stream(inbound_rx),
        })
    }
}
