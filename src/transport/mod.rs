use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use url::Url;

#[cfg(feature = "ws")]
pub mod ws;

#[cfg(feature = "ws")]
pub use ws::WsTransport;

/// Lifecycle and data notifications from a transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// A connection was acknowledged, for the first time or after a loss.
    Open,
    /// A connection was lost or an attempt failed; the transport keeps retrying.
    Closed { reason: String },
    /// One inbound text frame.
    Frame(String),
    /// The transport stopped retrying.
    GaveUp { reason: String },
}

/// Both directions of an open transport. Dropping it stops the transport.
pub struct TransportLink {
    pub events: mpsc::Receiver<TransportEvent>,
    pub outbound: mpsc::Sender<String>,
    task: Option<JoinHandle<()>>,
}

impl TransportLink {
    pub fn new(events: mpsc::Receiver<TransportEvent>, outbound: mpsc::Sender<String>) -> Self {
        Self {
            events,
            outbound,
            task: None,
        }
    }

    /// Tie the background task driving this link to its lifetime.
    pub fn with_task(mut self, task: JoinHandle<()>) -> Self {
        self.task = Some(task);
        self
    }
}

impl Drop for TransportLink {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

/// Outbound connection to the coordination endpoint.
///
/// `open` never fails synchronously: failures to connect are reported as
/// [`TransportEvent::Closed`] and reconnection follows the transport's own
/// backoff policy.
pub trait Transport: Send + Sync {
    fn open(&self, url: Url) -> TransportLink;
}
