//! The master's single connection to the coordination transport.
//!
//! One background task per connection feeds transport events through
//! [`SessionCore`] in arrival order, publishes the resulting
//! [`SessionEvent`]s and sends the requests it asks for. Handling an event
//! and publishing its outcome happen under one publication gate, which
//! `connect` and `disconnect` also take, so listeners never see a
//! connection's events after its `disconnect`.

use crate::config::Config;
use crate::env::HostDescriptor;
use crate::error::{MasterError, Result};
use crate::events::{EventBus, Listener};
use crate::sandbox::SharedRegistry;
use crate::transport::{Transport, TransportLink};
use parking_lot::{Mutex, ReentrantMutex};
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

pub mod endpoint;
pub mod protocol;
pub mod state;

pub use endpoint::Endpoint;
pub use protocol::{InboundMessage, OutboundMessage};
pub use state::{Generation, Reaction, SessionCore, SessionEvent, SessionEventKind, SessionState};

const CLIENT_CLOSE_REASON: &str = "closed by client";

pub struct ConnectionSession {
    transport: Arc<dyn Transport>,
    endpoint: Mutex<Option<Endpoint>>,
    core: Arc<Mutex<SessionCore>>,
    registry: SharedRegistry,
    bus: Arc<EventBus<SessionEvent>>,
    /// Held while a state change and its publication run. Reentrant so a
    /// listener may call back into the session.
    gate: Arc<ReentrantMutex<()>>,
    driver: Mutex<Option<JoinHandle<()>>>,
}

impl ConnectionSession {
    /// Session over the WebSocket transport described by `config`.
    #[cfg(feature = "ws")]
    pub fn new(config: &Config) -> Result<Self> {
        let transport = crate::transport::WsTransport::from_config(config);
        Self::with_transport(config, Arc::new(transport))
    }

    /// Session over a caller-provided transport.
    pub fn with_transport(config: &Config, transport: Arc<dyn Transport>) -> Result<Self> {
        let endpoint = config.endpoint.as_deref().map(Endpoint::parse).transpose()?;
        let registry = SharedRegistry::new();
        Ok(Self {
            transport,
            endpoint: Mutex::new(endpoint),
            core: Arc::new(Mutex::new(SessionCore::new(registry.clone()))),
            registry,
            bus: Arc::new(EventBus::with_capacity(config.event_buffer)),
            gate: Arc::new(ReentrantMutex::new(())),
            driver: Mutex::new(None),
        })
    }

    /// Validate and store the endpoint used by [`connect`](Self::connect).
    pub fn set_endpoint(&self, raw: &str) -> Result<()> {
        let endpoint = Endpoint::parse(raw)?;
        *self.endpoint.lock() = Some(endpoint);
        Ok(())
    }

    pub fn endpoint(&self) -> Option<Endpoint> {
        self.endpoint.lock().clone()
    }

    /// Connect to the configured endpoint, announcing `host` in the handshake.
    ///
    /// Fails only on configuration problems, including a call made outside
    /// a tokio runtime; every network failure arrives later as a
    /// `disconnect` event.
    pub fn connect(&self, host: &HostDescriptor) -> Result<()> {
        let endpoint = self
            .endpoint()
            .ok_or_else(|| MasterError::configuration("endpoint not set, please set a valid URL"))?;
        let url = endpoint.handshake_url(host)?;
        let runtime = Handle::try_current().map_err(|e| {
            MasterError::configuration(format!("connect needs a tokio runtime: {}", e))
        })?;

        self.stop_driver();
        let generation = {
            let _gate = self.gate.lock();
            self.core.lock().begin_connect()
        };
        debug!(endpoint = %endpoint, generation, "Opening transport");

        let link = self.transport.open(url);
        let task = runtime.spawn(drive(
            Arc::clone(&self.core),
            Arc::clone(&self.bus),
            Arc::clone(&self.gate),
            link,
            generation,
        ));
        *self.driver.lock() = Some(task);
        Ok(())
    }

    /// Set the endpoint, then [`connect`](Self::connect).
    pub fn connect_to(&self, endpoint: &str, host: &HostDescriptor) -> Result<()> {
        self.set_endpoint(endpoint)?;
        self.connect(host)
    }

    /// Close the connection. The registry keeps its last known contents.
    pub fn disconnect(&self) {
        self.stop_driver();
        let _gate = self.gate.lock();
        let reaction = self.core.lock().close(CLIENT_CLOSE_REASON);
        for event in &reaction.events {
            self.bus.publish(event);
        }
    }

    pub fn state(&self) -> SessionState {
        self.core.lock().state()
    }

    /// Read-only view of the sandboxes known through this session.
    pub fn registry(&self) -> SharedRegistry {
        self.registry.clone()
    }

    pub fn events(&self) -> &EventBus<SessionEvent> {
        &self.bus
    }

    pub fn subscribe<F>(&self, kind: SessionEventKind, f: F) -> Listener<SessionEvent>
    where
        F: Fn(&SessionEvent) + Send + Sync + 'static,
    {
        self.bus.on(kind, f)
    }

    pub fn unsubscribe(&self, kind: SessionEventKind, listener: &Listener<SessionEvent>) -> bool {
        self.bus.unsubscribe(kind, listener)
    }

    fn stop_driver(&self) {
        if let Some(task) = self.driver.lock().take() {
            task.abort();
        }
    }
}

impl Drop for ConnectionSession {
    fn drop(&mut self) {
        self.stop_driver();
    }
}

async fn drive(
    core: Arc<Mutex<SessionCore>>,
    bus: Arc<EventBus<SessionEvent>>,
    gate: Arc<ReentrantMutex<()>>,
    mut link: TransportLink,
    generation: Generation,
) {
    while let Some(event) = link.events.recv().await {
        let reaction = {
            let _gate = gate.lock();
            let reaction = core.lock().handle(generation, event);
            for event in &reaction.events {
                bus.publish(event);
            }
            reaction
        };

        for message in &reaction.outbound {
            if link.outbound.send(message.encode()).await.is_err() {
                warn!(message = message.name(), "Transport closed before request could be sent");
            }
        }
    }
    debug!(generation, "Transport link finished");
}
