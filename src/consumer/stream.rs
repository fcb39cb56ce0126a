use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc::UnboundedSender;
use tracing::debug;

use super::credit::CreditWindow;
use crate::gateway::{CommandResponse, OutboundFrame};
use crate::utils::{GatewayError, Result};

/// Outbound side of an open command stream.
///
/// Clones share the same channel and credit window, so a consumer handed a
/// clone by the read loop acknowledges on the very stream the command came
/// from.
#[derive(Debug, Clone)]
pub struct StreamWriter {
    client_id: String,
    frames: UnboundedSender<OutboundFrame>,
    credits: Arc<Mutex<Credits>>,
}

/// Credit window plus the receipts still waiting for a response. Only the
/// first response to a receipt earns its permit back.
#[derive(Debug)]
struct Credits {
    window: CreditWindow,
    unacknowledged: HashSet<String>,
}

impl StreamWriter {
    pub fn new(client_id: String, frames: UnboundedSender<OutboundFrame>, grant: u64) -> Self {
        Self {
            client_id,
            frames,
            credits: Arc::new(Mutex::new(Credits {
                window: CreditWindow::new(grant),
                unacknowledged: HashSet::new(),
            })),
        }
    }

    fn credits(&self) -> std::sync::MutexGuard<'_, Credits> {
        self.credits.lock().expect("credit window lock poisoned")
    }

    fn send(&self, frame: OutboundFrame) -> Result<()> {
        self.frames
            .send(frame)
            .map_err(|_| GatewayError::Communication("command stream is closed".to_string()))
    }

    pub fn is_closed(&self) -> bool {
        self.frames.is_closed()
    }

    /// Announce the full initial grant. Without it the server pushes nothing.
    pub fn grant_initial(&self) -> Result<()> {
        let permits = {
            let mut credits = self.credits();
            credits.unacknowledged.clear();
            credits.window.initial_grant()
        };
        debug!(client_id = %self.client_id, permits, "granting initial permits");
        self.send(OutboundFrame::FlowControl {
            client_id: self.client_id.clone(),
            permits,
        })
    }

    pub fn subscribe(&self, identity: String, command: &str) -> Result<()> {
        debug!(%identity, "subscribing to {command}");
        self.send(OutboundFrame::Subscribe {
            client_id: identity.clone(),
            component_name: identity,
            command: command.to_string(),
        })
    }

    /// Spend a permit on the command identified by `request_id`.
    pub fn record_receipt(&self, request_id: &str) {
        let mut credits = self.credits();
        credits.window.on_receive();
        credits.unacknowledged.insert(request_id.to_string());
    }

    /// Write a response and, once enough acknowledgments accumulated,
    /// re-announce the earned permits. Repeated responses to the same
    /// command are still written but earn nothing.
    pub fn respond(&self, response: CommandResponse) -> Result<()> {
        let request_id = response.request_identifier.clone();
        self.send(OutboundFrame::Response(response))?;
        let replenished = {
            let mut credits = self.credits();
            if credits.unacknowledged.remove(&request_id) {
                credits.window.on_ack()
            } else {
                debug!(client_id = %self.client_id, %request_id, "response earns no permit");
                None
            }
        };
        if let Some(permits) = replenished {
            debug!(client_id = %self.client_id, permits, "replenishing permits");
            self.send(OutboundFrame::FlowControl {
                client_id: self.client_id.clone(),
                permits,
            })?;
        }
        Ok(())
    }

    pub fn available_permits(&self) -> u64 {
        self.credits().window.available()
    }
}
