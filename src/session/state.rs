//! Connection state machine, independent of any I/O.
//!
//! [`SessionCore::handle`] consumes one transport event at a time, applies
//! it to the registry and returns what the caller must send and publish.
//! Registry updates finish before the returned events are published, so a
//! listener always sees the membership the event announces.

use super::protocol::{InboundMessage, OutboundMessage};
use crate::events::BusEvent;
use crate::sandbox::{Sandbox, SandboxId, SharedRegistry};
use crate::transport::TransportEvent;
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Disconnected => "DISCONNECTED",
            SessionState::Connecting => "CONNECTING",
            SessionState::Connected => "CONNECTED",
            SessionState::Reconnecting => "RECONNECTING",
        };
        f.write_str(name)
    }
}

/// Notifications published by a connection session.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// Initial membership snapshot applied.
    Connect,
    Disconnect { reason: String },
    /// Post-reconnect snapshot applied.
    Reconnect,
    SandboxConnected(Sandbox),
    /// `sandbox` is `None` when the id was not registered.
    SandboxDisconnected {
        id: SandboxId,
        sandbox: Option<Sandbox>,
    },
    JobExecutionResponse(Value),
    JobExecutionErrorResponse(Value),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionEventKind {
    Connect,
    Disconnect,
    Reconnect,
    SandboxConnected,
    SandboxDisconnected,
    JobExecutionResponse,
    JobExecutionErrorResponse,
}

impl SessionEventKind {
    pub const ALL: [SessionEventKind; 7] = [
        SessionEventKind::Connect,
        SessionEventKind::Disconnect,
        SessionEventKind::Reconnect,
        SessionEventKind::SandboxConnected,
        SessionEventKind::SandboxDisconnected,
        SessionEventKind::JobExecutionResponse,
        SessionEventKind::JobExecutionErrorResponse,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SessionEventKind::Connect => "connect",
            SessionEventKind::Disconnect => "disconnect",
            SessionEventKind::Reconnect => "reconnect",
            SessionEventKind::SandboxConnected => "sandboxConnected",
            SessionEventKind::SandboxDisconnected => "sandboxDisconnected",
            SessionEventKind::JobExecutionResponse => "jobExecutionResponse",
            SessionEventKind::JobExecutionErrorResponse => "jobExecutionErrorResponse",
        }
    }
}

impl FromStr for SessionEventKind {
    type Err = crate::error::MasterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| crate::error::MasterError::validation("event name", format!("unknown event '{}'", s)))
    }
}

impl BusEvent for SessionEvent {
    type Kind = SessionEventKind;

    fn kind(&self) -> SessionEventKind {
        match self {
            SessionEvent::Connect => SessionEventKind::Connect,
            SessionEvent::Disconnect { .. } => SessionEventKind::Disconnect,
            SessionEvent::Reconnect => SessionEventKind::Reconnect,
            SessionEvent::SandboxConnected(_) => SessionEventKind::SandboxConnected,
            SessionEvent::SandboxDisconnected { .. } => SessionEventKind::SandboxDisconnected,
            SessionEvent::JobExecutionResponse(_) => SessionEventKind::JobExecutionResponse,
            SessionEvent::JobExecutionErrorResponse(_) => SessionEventKind::JobExecutionErrorResponse,
        }
    }
}

/// What the driver must do after an event was handled.
#[derive(Debug, Default, PartialEq)]
pub struct Reaction {
    pub outbound: Vec<OutboundMessage>,
    pub events: Vec<SessionEvent>,
}

impl Reaction {
    fn send(message: OutboundMessage) -> Self {
        Self {
            outbound: vec![message],
            events: Vec::new(),
        }
    }

    fn publish(event: SessionEvent) -> Self {
        Self {
            outbound: Vec::new(),
            events: vec![event],
        }
    }

    pub fn is_empty(&self) -> bool {
        self.outbound.is_empty() && self.events.is_empty()
    }
}

/// Connection generation of which events are accepted.
pub type Generation = u64;

#[derive(Debug)]
pub struct SessionCore {
    state: SessionState,
    generation: Generation,
    registry: SharedRegistry,
    /// A listing was applied in this generation; later opens ask for the
    /// reconnect listing.
    listing_applied: bool,
    /// The current loss was already announced.
    loss_reported: bool,
}

impl SessionCore {
    pub fn new(registry: SharedRegistry) -> Self {
        Self {
            state: SessionState::Disconnected,
            generation: 0,
            registry,
            listing_applied: false,
            loss_reported: false,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn generation(&self) -> Generation {
        self.generation
    }

    pub fn registry(&self) -> &SharedRegistry {
        &self.registry
    }

    /// Start a new connection. Sandboxes known through a previous connection
    /// are dropped and events from it are ignored from now on.
    pub fn begin_connect(&mut self) -> Generation {
        self.generation += 1;
        self.state = SessionState::Connecting;
        self.listing_applied = false;
        self.loss_reported = false;
        self.registry.update(|r| r.clear());
        info!(generation = self.generation, "Session connecting");
        self.generation
    }

    /// Explicit close by the owner.
    pub fn close(&mut self, reason: &str) -> Reaction {
        let previous = self.state;
        self.generation += 1;
        self.state = SessionState::Disconnected;
        if previous == SessionState::Disconnected || self.loss_reported {
            return Reaction::default();
        }
        self.loss_reported = true;
        info!(%previous, "Session closed");
        Reaction::publish(SessionEvent::Disconnect {
            reason: reason.to_string(),
        })
    }

    pub fn handle(&mut self, generation: Generation, event: TransportEvent) -> Reaction {
        if generation != self.generation {
            debug!(
                generation,
                current = self.generation,
                "Dropping event from a stale connection"
            );
            return Reaction::default();
        }
        if self.state == SessionState::Disconnected {
            debug!(?event, "Dropping event on a disconnected session");
            return Reaction::default();
        }

        match event {
            TransportEvent::Open => self.on_open(),
            TransportEvent::Closed { reason } => self.on_closed(reason),
            TransportEvent::GaveUp { reason } => self.on_gave_up(reason),
            TransportEvent::Frame(frame) => match InboundMessage::decode(&frame) {
                Ok(message) => self.on_message(message),
                Err(e) => {
                    warn!(error = %e, "Dropping malformed inbound message");
                    Reaction::default()
                }
            },
        }
    }

    fn on_open(&mut self) -> Reaction {
        // Until a listing lands, every open is still the initial connect.
        let request = if self.listing_applied {
            OutboundMessage::RequestReconnectSandboxList
        } else {
            OutboundMessage::RequestSandboxList
        };
        self.loss_reported = false;
        self.state = SessionState::Connected;
        info!(request = request.name(), "Session connected, requesting sandbox listing");
        Reaction::send(request)
    }

    fn on_closed(&mut self, reason: String) -> Reaction {
        self.state = SessionState::Reconnecting;
        if self.loss_reported {
            debug!(%reason, "Reconnect attempt failed");
            return Reaction::default();
        }
        self.loss_reported = true;
        warn!(%reason, sandboxes = self.registry.len(), "Session lost; keeping registry until resync");
        Reaction::publish(SessionEvent::Disconnect { reason })
    }

    fn on_gave_up(&mut self, reason: String) -> Reaction {
        self.state = SessionState::Disconnected;
        if self.loss_reported {
            warn!(%reason, "Transport stopped reconnecting");
            return Reaction::default();
        }
        self.loss_reported = true;
        Reaction::publish(SessionEvent::Disconnect { reason })
    }

    fn on_message(&mut self, message: InboundMessage) -> Reaction {
        match message {
            InboundMessage::SandboxList(listing) => {
                let merged = self.registry.update(|r| r.merge(listing));
                self.listing_applied = true;
                info!(merged, total = self.registry.len(), "Sandbox listing applied");
                Reaction::publish(SessionEvent::Connect)
            }
            InboundMessage::ReconnectSandboxList(listing) => {
                let first = !self.listing_applied;
                self.listing_applied = true;
                let outcome = self.registry.update(|r| r.replace_all(listing));
                info!(
                    added = outcome.added.len(),
                    removed = outcome.removed.len(),
                    refreshed = outcome.refreshed.len(),
                    "Sandbox registry resynchronised after reconnect"
                );
                if first {
                    Reaction::publish(SessionEvent::Connect)
                } else {
                    Reaction::publish(SessionEvent::Reconnect)
                }
            }
            InboundMessage::SandboxConnected(sandbox) => {
                let replaced = self.registry.update(|r| r.insert(sandbox.clone()));
                debug!(sandbox_id = %sandbox.id, replaced = replaced.is_some(), "Sandbox connected");
                Reaction::publish(SessionEvent::SandboxConnected(sandbox))
            }
            InboundMessage::SandboxDisconnected(id) => {
                let removed = self.registry.update(|r| r.remove(&id));
                if removed.is_none() {
                    debug!(sandbox_id = %id, "Disconnect for unknown sandbox");
                } else {
                    debug!(sandbox_id = %id, "Sandbox disconnected");
                }
                Reaction::publish(SessionEvent::SandboxDisconnected { id, sandbox: removed })
            }
            InboundMessage::JobExecutionResponse(payload) => {
                Reaction::publish(SessionEvent::JobExecutionResponse(payload))
            }
            InboundMessage::JobExecutionErrorResponse(payload) => {
                Reaction::publish(SessionEvent::JobExecutionErrorResponse(payload))
            }
        }
    }
}
