use serde::Serialize;

/// Structured trace events emitted across all jupyter-interpreter crates.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event")]
pub enum TraceEvent {
    ControlPlaneCall {
        endpoint: String,
        status: u16,
        duration_ms: u64,
    },
    KernelCreated {
        kernel_id: String,
        kernel_name: String,
    },
    KernelShutdown {
        kernel_id: String,
        ok: bool,
    },
    ChannelBootstrapped {
        kernel_id: String,
        mode: String,
        duration_ms: u64,
    },
    ExecutionFinished {
        session_id: String,
        msg_id: String,
        outputs: usize,
        errors: usize,
        duration_ms: u64,
    },
    HistoryDumped {
        session_id: String,
        entries: usize,
    },
    HistoryLoaded {
        session_id: String,
        restored: bool,
    },
    SessionResolved {
        session_id: String,
        is_new: bool,
    },
    SessionClosed {
        session_id: String,
        kernel_id: String,
    },
}

impl TraceEvent {
    pub fn emit(&self) {
        let json = serde_json::to_string(self).unwrap_or_default();
        tracing::info!(trace_event = %json, "ji_event");
    }
}
