use crate::error::{MasterError, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sysinfo::{CpuRefreshKind, System};

/// Description of the local process, sent to the coordination endpoint as
/// handshake metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct HostDescriptor {
    /// True for a submitting client, false for a master/sandbox peer.
    #[serde(default)]
    pub is_client: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub platform: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub architecture: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub num_of_cores: Option<u32>,
    /// CPU brand string.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cpu: Option<String>,
    /// Bytes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_memory: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub free_memory: Option<u64>,
    /// Seconds since boot.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub up_time: Option<u64>,
    /// Additional metrics forwarded untouched.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl HostDescriptor {
    pub fn new(is_client: bool) -> Self {
        Self {
            is_client,
            ..Default::default()
        }
    }

    /// Describe the running host.
    pub fn collect(is_client: bool) -> Self {
        let mut system = System::new();
        system.refresh_memory();
        system.refresh_cpu_list(CpuRefreshKind::everything());

        let total_memory = system.total_memory();
        let cpus = system.cpus();
        let cpu = cpus
            .first()
            .map(|c| c.brand().trim().to_string())
            .filter(|brand| !brand.is_empty());
        let num_of_cores = match cpus.len() {
            0 => std::thread::available_parallelism()
                .ok()
                .map(|n| n.get() as u32),
            n => Some(n as u32),
        };

        Self {
            is_client,
            host_name: System::host_name()
                .filter(|name| !name.trim().is_empty())
                .or_else(host_name_from_env),
            platform: Some(std::env::consts::OS.to_string()),
            architecture: Some(std::env::consts::ARCH.to_string()),
            num_of_cores,
            cpu,
            total_memory: (total_memory > 0).then_some(total_memory),
            free_memory: (total_memory > 0).then(|| system.free_memory()),
            up_time: Some(System::uptime()),
            extra: Map::new(),
        }
    }

    /// Accept an arbitrary JSON descriptor; anything but an object is rejected.
    pub fn from_value(value: Value) -> Result<Self> {
        if !value.is_object() {
            return Err(MasterError::configuration(
                "host descriptor must be a non-null JSON object",
            ));
        }
        serde_json::from_value(value)
            .map_err(|e| MasterError::configuration(format!("invalid host descriptor: {}", e)))
    }

    /// Text form carried in the handshake query.
    pub fn to_handshake(&self) -> Result<String> {
        serde_json::to_string(self)
            .map_err(|e| MasterError::configuration(format!("cannot encode host descriptor: {}", e)))
    }
}

fn host_name_from_env() -> Option<String> {
    ["HOSTNAME", "COMPUTERNAME"]
        .into_iter()
        .filter_map(|var| std::env::var(var).ok())
        .find(|name| !name.trim().is_empty())
}
