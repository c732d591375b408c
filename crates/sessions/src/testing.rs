//! In-memory stand-ins for the control plane and a kernel.
//!
//! `FakeKernel` understands just enough Python to answer the scenarios the
//! tests use, plus the history dump/load programs, which it runs against
//! an in-memory filesystem shared by every channel it hands out.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};

use ji_domain::error::{Error, Result};
use ji_kernel::{ControlPlane, ExecutionChannel, KernelConnector};
use ji_protocol::Message;

use crate::history::NOT_FOUND_TOKEN;
use crate::session::SessionSettings;

pub fn settings() -> SessionSettings {
    SessionSettings {
        kernel_name: "python3".into(),
        notebooks_folder: "/notebooks".into(),
        execute_timeout: Some(Duration::from_secs(30)),
    }
}

// ── Control plane ───────────────────────────────────────────────────────

#[derive(Default)]
pub struct FakeControlPlane {
    created: AtomicUsize,
    shutdowns: Mutex<Vec<String>>,
}

impl FakeControlPlane {
    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    pub fn shutdowns(&self) -> Vec<String> {
        self.shutdowns.lock().clone()
    }
}

#[async_trait]
impl ControlPlane for FakeControlPlane {
    async fn validate_connection(&self) -> Result<bool> {
        Ok(true)
    }

    async fn create_kernel(&self, _kernel_name: &str) -> Result<String> {
        let n = self.created.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(format!("kernel-{n}"))
    }

    async fn shutdown_kernel(&self, kernel_id: &str) -> Result<()> {
        self.shutdowns.lock().push(kernel_id.to_owned());
        Ok(())
    }
}

// ── Kernel ──────────────────────────────────────────────────────────────

#[derive(Default)]
struct KernelState {
    files: HashMap<String, String>,
    sent: Vec<Message>,
    executed: Vec<String>,
    hang: bool,
    disconnected: bool,
}

#[derive(Clone, Default)]
pub struct FakeKernel {
    state: Arc<Mutex<KernelState>>,
}

impl FakeKernel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn channel(&self) -> FakeChannel {
        FakeChannel {
            kernel: self.clone(),
            inbox: VecDeque::new(),
        }
    }

    pub fn put_file(&self, path: &str, content: &str) {
        self.state.lock().files.insert(path.to_owned(), content.to_owned());
    }

    pub fn file(&self, path: &str) -> Option<String> {
        self.state.lock().files.get(path).cloned()
    }

    pub fn sent(&self) -> Vec<Message> {
        self.state.lock().sent.clone()
    }

    /// User code run so far (internal programs excluded).
    pub fn executed(&self) -> Vec<String> {
        self.state.lock().executed.clone()
    }

    pub fn hang(&self) {
        self.state.lock().hang = true;
    }

    pub fn disconnect(&self) {
        self.state.lock().disconnected = true;
    }

    fn respond(&self, req: &Message) -> Vec<Message> {
        let mut state = self.state.lock();
        state.sent.push(req.clone());
        if state.hang {
            return Vec::new();
        }

        let code = req.content["code"].as_str().unwrap_or_default();
        let mut replies = vec![reply(req, "status", json!({"execution_state": "busy"}))];

        if let Some(args) = call_args(code, "_ji_dump(") {
            let path = args[0].as_str().unwrap_or_default().to_owned();
            let body: String = args[1]
                .as_array()
                .map(|entries| {
                    entries
                        .iter()
                        .filter_map(Value::as_str)
                        .map(|e| format!("{e}\n"))
                        .collect()
                })
                .unwrap_or_default();
            state.files.insert(path, body);
        } else if let Some(args) = call_args(code, "_ji_load(") {
            let path = args[0].as_str().unwrap_or_default();
            let text = match state.files.get(path) {
                None => format!("{NOT_FOUND_TOKEN}\n"),
                Some(data) => format!(
                    "{}{}{}\n",
                    args[1].as_str().unwrap_or_default(),
                    data,
                    args[2].as_str().unwrap_or_default()
                ),
            };
            replies.push(reply(req, "stream", json!({"name": "stdout", "text": text})));
        } else {
            state.executed.push(code.to_owned());
            if code.contains("print(x)") {
                replies.push(reply(
                    req,
                    "error",
                    json!({"ename": "NameError", "evalue": "name 'x' is not defined"}),
                ));
            } else if code.contains("1/0") {
                replies.push(reply(
                    req,
                    "error",
                    json!({"ename": "ZeroDivisionError", "evalue": "division by zero"}),
                ));
            } else if code == "print('Hello, World!')" {
                replies.push(reply(
                    req,
                    "stream",
                    json!({"name": "stdout", "text": "Hello, World!\n"}),
                ));
            } else if code == "21 + 21" {
                replies.push(reply(
                    req,
                    "execute_result",
                    json!({"data": {"text/plain": "42"}, "execution_count": 1}),
                ));
            }
        }

        replies.push(reply(req, "status", json!({"execution_state": "idle"})));
        replies
    }
}

/// Arguments of the single-line call `name(...)` in `code`, parsed as a
/// JSON array (the programs embed every argument as a JSON literal).
fn call_args(code: &str, name: &str) -> Option<Vec<Value>> {
    let line = code.lines().find(|l| l.starts_with(name))?;
    let inner = line.strip_prefix(name)?.strip_suffix(')')?;
    serde_json::from_str::<Vec<Value>>(&format!("[{inner}]")).ok()
}

pub fn reply(parent: &Message, msg_type: &str, content: Value) -> Message {
    serde_json::from_value(json!({
        "header": {"msg_id": uuid::Uuid::new_v4().to_string(), "msg_type": msg_type},
        "parent_header": {"msg_id": parent.msg_id()},
        "content": content,
        "channel": "iopub",
    }))
    .unwrap()
}

pub struct FakeChannel {
    kernel: FakeKernel,
    inbox: VecDeque<Message>,
}

#[async_trait]
impl ExecutionChannel for FakeChannel {
    fn client_session(&self) -> &str {
        "fake"
    }

    async fn send(&mut self, msg: &Message) -> Result<()> {
        let replies = self.kernel.respond(msg);
        self.inbox.extend(replies);
        Ok(())
    }

    async fn recv(&mut self) -> Result<Option<Message>> {
        let (hang, disconnected) = {
            let state = self.kernel.state.lock();
            (state.hang, state.disconnected)
        };
        if disconnected {
            return Ok(None);
        }
        match self.inbox.pop_front() {
            Some(msg) => Ok(Some(msg)),
            None if hang => {
                std::future::pending::<()>().await;
                Ok(None)
            }
            None => Err(Error::Protocol("fake kernel has nothing to say".into())),
        }
    }

    async fn close(&mut self) {
        self.inbox.clear();
    }
}

// ── Connector ───────────────────────────────────────────────────────────

pub struct FakeConnector {
    kernel: Option<FakeKernel>,
    connects: AtomicUsize,
    failures_left: AtomicUsize,
    delay: Duration,
}

impl FakeConnector {
    pub fn new(kernel: FakeKernel) -> Self {
        Self {
            kernel: Some(kernel),
            connects: AtomicUsize::new(0),
            failures_left: AtomicUsize::new(0),
            delay: Duration::ZERO,
        }
    }

    pub fn failing() -> Self {
        Self {
            kernel: None,
            connects: AtomicUsize::new(0),
            failures_left: AtomicUsize::new(0),
            delay: Duration::ZERO,
        }
    }

    /// Slow connects widen the window for racing first uses.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Fail the first `n` connects, then behave normally.
    pub fn failing_first(self, n: usize) -> Self {
        self.failures_left.store(n, Ordering::SeqCst);
        self
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl KernelConnector for FakeConnector {
    async fn connect(&self, kernel_id: &str) -> Result<Box<dyn ExecutionChannel>> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let injected = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        match self.kernel {
            Some(ref kernel) if !injected => Ok(Box::new(kernel.channel())),
            _ => Err(Error::Connection(format!(
                "connection info missing required field: key ({kernel_id})"
            ))),
        }
    }
}
