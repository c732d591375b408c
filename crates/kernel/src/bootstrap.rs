//! Descriptor retrieval over the kernel relay.
//!
//! A freshly created kernel is only reachable through the server's
//! WebSocket relay. We run a short program inside the kernel that finds its
//! own connection file and prints it, then parse the printed JSON.

use std::time::Duration;

use ji_domain::config::{ControlPlaneConfig, SessionsConfig};
use ji_domain::error::{Error, Result};
use ji_protocol::ConnectionDescriptor;

use crate::channel::{run_program, ExecutionChannel};
use crate::relay::{relay_url, RelayChannel};

/// Printed by the locate program when no connection file exists.
pub const NOT_FOUND_MARKER: &str = "ERROR: Connection file not found in any of the expected locations";

#[derive(Debug, Clone)]
pub struct Bootstrapper {
    base_url: String,
    token: Option<String>,
    recv_timeout: Duration,
}

impl Bootstrapper {
    pub fn new(base_url: impl Into<String>, token: Option<String>, recv_timeout: Duration) -> Self {
        Self {
            base_url: base_url.into(),
            token,
            recv_timeout,
        }
    }

    pub fn from_config(control: &ControlPlaneConfig, sessions: &SessionsConfig) -> Self {
        Self::new(
            control.base_url.clone(),
            control.resolve_token(),
            Duration::from_millis(sessions.bootstrap_recv_timeout_ms),
        )
    }

    pub fn relay_url(&self, kernel_id: &str) -> Result<String> {
        relay_url(&self.base_url, kernel_id, self.token.as_deref())
    }

    /// Open the relay to `kernel_id`.
    pub async fn open_relay(&self, kernel_id: &str) -> Result<RelayChannel> {
        RelayChannel::open(&self.relay_url(kernel_id)?).await
    }

    /// Open a relay, fetch the descriptor, close the relay.
    pub async fn fetch_descriptor(&self, kernel_id: &str) -> Result<ConnectionDescriptor> {
        let mut relay = self.open_relay(kernel_id).await?;
        let result = self.run_once(&mut relay, kernel_id).await;
        relay.close().await;
        result
    }

    /// Run the locate program on an already-open channel and parse its
    /// output.
    pub async fn run_once(
        &self,
        channel: &mut dyn ExecutionChannel,
        kernel_id: &str,
    ) -> Result<ConnectionDescriptor> {
        let output = run_program(channel, &locate_program(kernel_id), self.recv_timeout)
            .await
            .map_err(|e| match e {
                Error::Execution(msg) => {
                    Error::Connection(format!("failed to retrieve connection info: {msg}"))
                }
                other => other,
            })?;

        let line = output.trim();
        if line.starts_with(NOT_FOUND_MARKER) {
            return Err(Error::Connection(format!(
                "no connection file for kernel {kernel_id}"
            )));
        }

        ConnectionDescriptor::parse(line)
    }
}

/// Python executed inside the kernel. Prefers the path ipykernel reports,
/// then the well-known runtime locations.
pub fn locate_program(kernel_id: &str) -> String {
    let candidates = [
        format!("~/.local/share/jupyter/runtime/kernel-{kernel_id}.json"),
        format!("/run/user/1000/jupyter/kernel-{kernel_id}.json"),
        format!("/tmp/kernel-{kernel_id}.json"),
    ];
    let candidates = serde_json::to_string(&candidates).unwrap_or_else(|_| "[]".into());

    format!(
        r#"def _ji_locate():
    import json, os
    paths = []
    try:
        import ipykernel
        paths.append(ipykernel.get_connection_file())
    except Exception:
        pass
    paths.extend({candidates})
    for path in paths:
        path = os.path.expanduser(path)
        if os.path.exists(path):
            with open(path) as f:
                print(json.dumps(json.load(f)))
            return
    print({marker})
_ji_locate()
del _ji_locate
"#,
        marker = serde_json::Value::String(NOT_FOUND_MARKER.into()),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::testing::{reply, ScriptedChannel};
    use serde_json::json;

    fn bootstrapper() -> Bootstrapper {
        Bootstrapper::new("http://localhost:8888", None, Duration::from_secs(1))
    }

    fn printing(text: &'static str) -> ScriptedChannel {
        ScriptedChannel::new(Box::new(move |req| {
            vec![
                reply(req, "status", json!({"execution_state": "busy"})),
                reply(req, "stream", json!({"name": "stdout", "text": text})),
                reply(req, "status", json!({"execution_state": "idle"})),
            ]
        }))
    }

    #[test]
    fn program_names_kernel_paths() {
        let code = locate_program("abc-123");
        assert!(code.contains("/tmp/kernel-abc-123.json"));
        assert!(code.contains("~/.local/share/jupyter/runtime/kernel-abc-123.json"));
        assert!(code.contains("ipykernel.get_connection_file()"));
        assert!(code.contains(NOT_FOUND_MARKER));
    }

    #[tokio::test]
    async fn parses_printed_descriptor() {
        let mut ch = printing(
            "{\"shell_port\": 1, \"iopub_port\": 2, \"stdin_port\": 3, \"control_port\": 4, \
             \"hb_port\": 5, \"ip\": \"127.0.0.1\", \"key\": \"k\", \"transport\": \"tcp\", \
             \"signature_scheme\": \"hmac-sha256\"}\n",
        );
        let d = bootstrapper().run_once(&mut ch, "k1").await.unwrap();
        assert_eq!(d.shell_port, 1);
        assert_eq!(d.auth_key, "k");
    }

    #[tokio::test]
    async fn missing_file_is_connection_error() {
        let mut ch = printing("ERROR: Connection file not found in any of the expected locations\n");
        let err = bootstrapper().run_once(&mut ch, "k1").await.unwrap_err();
        assert!(matches!(err, Error::Connection(_)));
    }

    #[tokio::test]
    async fn kernel_error_becomes_connection_error() {
        let mut ch = ScriptedChannel::new(Box::new(|req| {
            vec![
                reply(req, "error", json!({"ename": "PermissionError", "evalue": "denied"})),
                reply(req, "status", json!({"execution_state": "idle"})),
            ]
        }));
        let err = bootstrapper().run_once(&mut ch, "k1").await.unwrap_err();
        match err {
            Error::Connection(msg) => assert!(msg.contains("PermissionError")),
            other => panic!("unexpected {other:?}"),
        }
    }
}
