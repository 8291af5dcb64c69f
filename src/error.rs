/// Sandmaster error types and handling utilities
/// Main error type for sandmaster operations
#[derive(Debug, thiserror::Error)]
pub enum MasterError {
    /// Bad endpoint or host descriptor, rejected before any network attempt
    #[error("Configuration error: {reason}")]
    Configuration { reason: String },
    /// A field value was rejected; the entity is left unchanged
    #[error("Validation error on {field}: {reason}")]
    Validation { field: String, reason: String },
    /// Job status change outside the lifecycle graph
    #[error("Invalid job status transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },
    /// Malformed inbound transport message
    #[error("Protocol error on '{event}': {reason}")]
    Protocol { event: String, reason: String },
    /// Connection attempt failed or an established connection was lost
    #[error("Transport error (attempt {attempt}): {message}")]
    Transport { message: String, attempt: u32 },
    /// Lookup of an unknown entity
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },
    /// Wrapped anyhow error for compatibility
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T, E = MasterError> = std::result::Result<T, E>;

impl MasterError {
    pub fn configuration(reason: impl Into<String>) -> Self {
        Self::Configuration {
            reason: reason.into(),
        }
    }

    pub fn validation(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            reason: reason.into(),
        }
    }

    pub fn protocol(event: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Protocol {
            event: event.into(),
            reason: reason.into(),
        }
    }

    /// True for errors raised synchronously by a rejected mutation.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            MasterError::Validation { .. } | MasterError::InvalidTransition { .. }
        )
    }
}

/// Helper to determine if an error is retryable
pub fn is_retryable(err: &MasterError) -> bool {
    match err {
        MasterError::Transport { .. } => true,
        MasterError::Configuration { .. } => false,
        MasterError::Validation { .. } => false,
        MasterError::InvalidTransition { .. } => false,
        MasterError::Protocol { .. } => false,
        MasterError::NotFound { .. } => false,
        MasterError::Other(_) => false,
    }
}
