//! Kernel connection descriptor (the kernel's `kernel-<id>.json` file).

use std::fmt;

use serde::{Deserialize, Serialize};

use ji_domain::error::{Error, Result};

/// Fields that must be present and non-null for a descriptor to be usable.
pub const REQUIRED_FIELDS: [&str; 9] = [
    "shell_port",
    "iopub_port",
    "stdin_port",
    "control_port",
    "hb_port",
    "ip",
    "key",
    "transport",
    "signature_scheme",
];

/// Data-plane connection information. Immutable once retrieved.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionDescriptor {
    #[serde(rename = "ip")]
    pub host: String,
    pub shell_port: u16,
    pub iopub_port: u16,
    pub stdin_port: u16,
    pub control_port: u16,
    #[serde(rename = "hb_port")]
    pub heartbeat_port: u16,
    #[serde(rename = "key")]
    pub auth_key: String,
    pub transport: String,
    pub signature_scheme: String,
}

// The key signs every message; keep it out of logs.
impl fmt::Debug for ConnectionDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionDescriptor")
            .field("host", &self.host)
            .field("shell_port", &self.shell_port)
            .field("iopub_port", &self.iopub_port)
            .field("stdin_port", &self.stdin_port)
            .field("control_port", &self.control_port)
            .field("heartbeat_port", &self.heartbeat_port)
            .field("auth_key", &"<redacted>")
            .field("transport", &self.transport)
            .field("signature_scheme", &self.signature_scheme)
            .finish()
    }
}

impl ConnectionDescriptor {
    /// Parse the JSON printed by the bootstrap program.
    ///
    /// Every failure is a [`Error::Connection`]: the data plane cannot be
    /// reached without a complete descriptor.
    pub fn parse(raw: &str) -> Result<Self> {
        let value: serde_json::Value = serde_json::from_str(raw.trim())
            .map_err(|e| Error::Connection(format!("failed to parse connection info: {e}")))?;

        let obj = value.as_object().ok_or_else(|| {
            Error::Connection("connection info is not a JSON object".into())
        })?;

        for field in REQUIRED_FIELDS {
            match obj.get(field) {
                None | Some(serde_json::Value::Null) => {
                    return Err(Error::Connection(format!(
                        "connection info missing required field: {field}"
                    )));
                }
                Some(_) => {}
            }
        }

        serde_json::from_value(value)
            .map_err(|e| Error::Connection(format!("invalid connection info: {e}")))
    }

    /// Replace the advertised host, e.g. when the kernel reports loopback
    /// from inside a container.
    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    /// ZMQ endpoint for one of the kernel's ports.
    pub fn endpoint(&self, port: u16) -> String {
        match self.transport.as_str() {
            "ipc" => format!("ipc://{}-{port}", self.host),
            transport => format!("{transport}://{}:{port}", self.host),
        }
    }

    pub fn shell_endpoint(&self) -> String {
        self.endpoint(self.shell_port)
    }

    pub fn iopub_endpoint(&self) -> String {
        self.endpoint(self.iopub_port)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
