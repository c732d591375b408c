use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Data plane (execution channel)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataPlaneConfig {
    #[serde(default)]
    pub mode: DataPlaneMode,
    /// Replaces the `ip` reported in the kernel's connection file. Useful
    /// when the kernel binds loopback inside a container whose ports are
    /// published elsewhere.
    #[serde(default)]
    pub host_override: Option<String>,
    #[serde(default = "d_5000")]
    pub ready_timeout_ms: u64,
}

/// How a session talks to its kernel after provisioning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DataPlaneMode {
    /// Bootstrap the connection descriptor, then speak ZMQ to the kernel.
    #[default]
    Zmq,
    /// Keep using the control plane's WebSocket relay.
    Relay,
}

impl DataPlaneMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            DataPlaneMode::Zmq => "zmq",
            DataPlaneMode::Relay => "relay",
        }
    }
}

impl Default for DataPlaneConfig {
    fn default() -> Self {
        Self {
            mode: DataPlaneMode::Zmq,
            host_override: None,
            ready_timeout_ms: 5_000,
        }
    }
}

impl DataPlaneConfig {
    pub fn host_override(&self) -> Option<&str> {
        self.host_override.as_deref().filter(|h| !h.is_empty())
    }
}

fn d_5000() -> u64 {
    5_000
}
