//! Message names and framing on the coordination transport.
//!
//! Every message is one JSON text frame `{"event": <name>, "data": <payload>}`.

use crate::error::{MasterError, Result};
use crate::sandbox::{Sandbox, SandboxId};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

pub const REQUEST_SANDBOX_LIST: &str = "requestSndbxLst";
pub const RESPONSE_SANDBOX_LIST: &str = "responseSndbxLst";
pub const REQUEST_RECONNECT_SANDBOX_LIST: &str = "requestReconnectSndbxLst";
pub const RESPONSE_RECONNECT_SANDBOX_LIST: &str = "responseReconnectSndbxLst";
pub const SANDBOX_CONNECTED: &str = "sndbxConnected";
pub const SANDBOX_DISCONNECTED: &str = "sndbxDisconnected";
pub const JOB_EXECUTION_RESPONSE: &str = "jobExecutionResponse";
pub const JOB_EXECUTION_ERROR_RESPONSE: &str = "jobExecutionErrorResponse";

#[derive(Debug, Serialize, Deserialize)]
struct Envelope {
    event: String,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    data: Value,
}

/// Requests sent by the master.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutboundMessage {
    /// Full membership snapshot on first connect.
    RequestSandboxList,
    /// Full membership snapshot after a reconnect.
    RequestReconnectSandboxList,
}

impl OutboundMessage {
    pub fn name(&self) -> &'static str {
        match self {
            OutboundMessage::RequestSandboxList => REQUEST_SANDBOX_LIST,
            OutboundMessage::RequestReconnectSandboxList => REQUEST_RECONNECT_SANDBOX_LIST,
        }
    }

    pub fn encode(&self) -> String {
        let envelope = Envelope {
            event: self.name().to_string(),
            data: Value::Null,
        };
        // A string key and a null payload always serialise.
        serde_json::to_string(&envelope).unwrap_or_else(|_| format!(r#"{{"event":"{}"}}"#, self.name()))
    }
}

/// Messages pushed by the coordination endpoint.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundMessage {
    SandboxList(Vec<Sandbox>),
    ReconnectSandboxList(Vec<Sandbox>),
    SandboxConnected(Sandbox),
    SandboxDisconnected(SandboxId),
    JobExecutionResponse(Value),
    JobExecutionErrorResponse(Value),
}

impl InboundMessage {
    pub fn name(&self) -> &'static str {
        match self {
            InboundMessage::SandboxList(_) => RESPONSE_SANDBOX_LIST,
            InboundMessage::ReconnectSandboxList(_) => RESPONSE_RECONNECT_SANDBOX_LIST,
            InboundMessage::SandboxConnected(_) => SANDBOX_CONNECTED,
            InboundMessage::SandboxDisconnected(_) => SANDBOX_DISCONNECTED,
            InboundMessage::JobExecutionResponse(_) => JOB_EXECUTION_RESPONSE,
            InboundMessage::JobExecutionErrorResponse(_) => JOB_EXECUTION_ERROR_RESPONSE,
        }
    }

    /// Parse one text frame.
    pub fn decode(frame: &str) -> Result<Self> {
        let envelope: Envelope = serde_json::from_str(frame)
            .map_err(|e| MasterError::protocol("<frame>", format!("not a message envelope: {}", e)))?;
        let Envelope { event, data } = envelope;

        match event.as_str() {
            RESPONSE_SANDBOX_LIST => decode_listing(&event, data).map(InboundMessage::SandboxList),
            RESPONSE_RECONNECT_SANDBOX_LIST => {
                decode_listing(&event, data).map(InboundMessage::ReconnectSandboxList)
            }
            SANDBOX_CONNECTED => Sandbox::from_value(data)
                .map(InboundMessage::SandboxConnected)
                .map_err(|e| MasterError::protocol(&event, e.to_string())),
            SANDBOX_DISCONNECTED => decode_sandbox_id(&event, data).map(InboundMessage::SandboxDisconnected),
            JOB_EXECUTION_RESPONSE => Ok(InboundMessage::JobExecutionResponse(data)),
            JOB_EXECUTION_ERROR_RESPONSE => Ok(InboundMessage::JobExecutionErrorResponse(data)),
            _ => Err(MasterError::protocol(&event, "unknown message")),
        }
    }
}

/// Entries that fail to decode are skipped; the rest of the listing stands.
fn decode_listing(event: &str, data: Value) -> Result<Vec<Sandbox>> {
    let Value::Array(entries) = data else {
        return Err(MasterError::protocol(event, "listing payload is not an array"));
    };

    let mut sandboxes = Vec::with_capacity(entries.len());
    for (index, entry) in entries.into_iter().enumerate() {
        match Sandbox::from_value(entry) {
            Ok(sandbox) => sandboxes.push(sandbox),
            Err(e) => warn!(event, index, error = %e, "Dropping malformed sandbox listing entry"),
        }
    }
    Ok(sandboxes)
}

/// The id is sent either bare or as `{"id": ...}`.
fn decode_sandbox_id(event: &str, data: Value) -> Result<SandboxId> {
    let raw = match data {
        Value::String(s) => s,
        Value::Number(n) => n.to_string(),
        Value::Object(mut map) => match map.remove("id") {
            Some(Value::String(s)) => s,
            Some(Value::Number(n)) => n.to_string(),
            _ => return Err(MasterError::protocol(event, "missing sandbox id")),
        },
        _ => return Err(MasterError::protocol(event, "missing sandbox id")),
    };
    SandboxId::new(raw).map_err(|e| MasterError::protocol(event, e.to_string()))
}
