//! Master-side coordination for a dynamic pool of remote execution sandboxes.
//!
//! A [`ConnectionSession`] keeps the master attached to the coordination
//! endpoint and mirrors the connected sandboxes into a [`SharedRegistry`].
//! A [`JobManager`] holds submitted jobs and walks them through their
//! lifecycle.

pub mod config;
pub mod env;
pub mod error;
pub mod events;
pub mod job;
pub mod logging;
pub mod sandbox;
pub mod session;
pub mod transport;

pub use config::{Config, RetryConfig};
pub use env::HostDescriptor;
pub use error::{MasterError, Result};
pub use events::{BusEvent, EventBus, Listener};
pub use job::{Job, JobId, JobManager, JobStatus, JobType};
pub use sandbox::{Sandbox, SandboxId, SandboxRegistry, SharedRegistry};
pub use session::{ConnectionSession, SessionEvent, SessionEventKind, SessionState};
