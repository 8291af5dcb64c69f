use crate::error::{MasterError, Result};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

pub mod registry;

pub use registry::{Reconciliation, SandboxRegistry, SharedRegistry};

/// Per-connection session id of a sandbox. Never empty.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SandboxId(String);

impl SandboxId {
    pub fn new(id: impl Into<String>) -> Result<Self> {
        let id = id.into();
        if id.trim().is_empty() {
            return Err(MasterError::validation("sandbox id", "must not be empty"));
        }
        Ok(Self(id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for SandboxId {
    type Error = MasterError;

    fn try_from(value: String) -> Result<Self> {
        Self::new(value)
    }
}

impl From<SandboxId> for String {
    fn from(id: SandboxId) -> Self {
        id.0
    }
}

impl fmt::Display for SandboxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Capability descriptor of a connected execution node, as reported by the
/// coordination endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Sandbox {
    pub id: SandboxId,
    pub cpu: Option<String>,
    pub num_of_cores: Option<u32>,
    pub architecture: Option<String>,
    pub free_memory: Option<u64>,
    pub total_memory: Option<u64>,
    pub host_name: Option<String>,
    pub platform: Option<String>,
    #[serde(rename = "OSType")]
    pub os_type: Option<String>,
    pub up_time: Option<f64>,
    #[serde(rename = "publicIP")]
    pub public_ip: Option<String>,
    pub single_thread_flops: Option<f64>,
    pub parallel_flops: Option<f64>,
    /// Host runs a managed (server-side) runtime.
    #[serde(rename = "isNodeJSRuntime", default, deserialize_with = "null_as_false")]
    pub is_managed_runtime: bool,
    #[serde(default, deserialize_with = "null_as_false")]
    pub is_browser_runtime: bool,
}

fn null_as_false<'de, D>(deserializer: D) -> std::result::Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<bool>::deserialize(deserializer)?.unwrap_or_default())
}

impl Sandbox {
    /// Descriptor with only an id; capability fields unknown.
    pub fn new(id: SandboxId) -> Self {
        Self {
            id,
            cpu: None,
            num_of_cores: None,
            architecture: None,
            free_memory: None,
            total_memory: None,
            host_name: None,
            platform: None,
            os_type: None,
            up_time: None,
            public_ip: None,
            single_thread_flops: None,
            parallel_flops: None,
            is_managed_runtime: false,
            is_browser_runtime: false,
        }
    }

    pub fn from_value(value: serde_json::Value) -> Result<Self> {
        serde_json::from_value(value)
            .map_err(|e| MasterError::validation("sandbox descriptor", e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_null_runtime_flags_read_as_false() {
        let sandbox = Sandbox::from_value(json!({
            "id": "s1",
            "isNodeJSRuntime": null,
            "isBrowserRuntime": null
        }))
        .unwrap();
        assert!(!sandbox.is_managed_runtime);
        assert!(!sandbox.is_browser_runtime);
        assert!(Sandbox::from_value(json!({"id": "s2", "isBrowserRuntime": "yes"})).is_err());
    }

    #[test]
    fn test_descriptor_from_wire() {
        let sandbox = Sandbox::from_value(json!({
            "id": "s1",
            "cpu": "Xeon",
            "numOfCores": 8,
            "OSType": "Linux",
            "publicIP": "203.0.113.9",
            "parallelFlops": 1.5e9,
            "isNodeJSRuntime": true
        }))
        .unwrap();

        assert_eq!(sandbox.id.as_str(), "s1");
        assert_eq!(sandbox.num_of_cores, Some(8));
        assert_eq!(sandbox.os_type.as_deref(), Some("Linux"));
        assert_eq!(sandbox.public_ip.as_deref(), Some("203.0.113.9"));
        assert!(sandbox.is_managed_runtime);
        assert!(!sandbox.is_browser_runtime);
        assert!(sandbox.free_memory.is_none());
    }

    #[test]
    fn test_empty_id_rejected() {
        assert!(SandboxId::new("").is_err());
        assert!(SandboxId::new("   ").is_err());
        assert!(Sandbox::from_value(json!({"id": ""})).is_err());
        assert!(Sandbox::from_value(json!({"cpu": "x"})).is_err());
    }
}
