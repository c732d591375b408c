//! One kernel, one channel, one success-gated history.

use std::sync::Arc;
use std::time::{Duration, Instant};

use ji_domain::config::Config;
use ji_domain::error::{Error, Result};
use ji_domain::trace::TraceEvent;
use ji_kernel::{collect_reply, ControlPlane, ExecutionChannel, KernelConnector};
use ji_protocol::{ExecuteOptions, ExecutionOutcome, Message, ReplyCollector};

use crate::history::{dump_program, load_program, parse_load_output, LoadOutput, Markers};

/// Provisioning and persistence parameters shared by every session.
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub kernel_name: String,
    pub notebooks_folder: String,
    /// `None` leaves `execute` unbounded.
    pub execute_timeout: Option<Duration>,
}

impl SessionSettings {
    pub fn from_config(cfg: &Config) -> Self {
        let timeout_ms = cfg.sessions.execute_timeout_ms;
        Self {
            kernel_name: cfg.control_plane.kernel_name.clone(),
            notebooks_folder: cfg.sessions.notebooks_folder.clone(),
            execute_timeout: (timeout_ms > 0).then(|| Duration::from_millis(timeout_ms)),
        }
    }

    pub fn history_path(&self, session_id: &str) -> String {
        let folder = self.notebooks_folder.trim_end_matches('/');
        format!("{folder}/{session_id}.txt")
    }
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

pub struct Session {
    id: String,
    kernel_id: String,
    channel: Box<dyn ExecutionChannel>,
    control: Arc<dyn ControlPlane>,
    history: Vec<String>,
    history_path: String,
    execute_timeout: Option<Duration>,
    closed: bool,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("kernel_id", &self.kernel_id)
            .field("history_len", &self.history.len())
            .field("history_path", &self.history_path)
            .field("closed", &self.closed)
            .finish()
    }
}

impl Session {
    /// Provision a kernel and open its execution channel.
    ///
    /// If the channel cannot be opened the kernel is shut down before the
    /// error is returned, so failed provisioning leaves nothing running.
    pub async fn start(
        id: &str,
        control: Arc<dyn ControlPlane>,
        connector: &dyn KernelConnector,
        settings: &SessionSettings,
    ) -> Result<Self> {
        let kernel_id = control.create_kernel(&settings.kernel_name).await?;
        tracing::info!(session_id = %id, kernel_id = %kernel_id, "kernel provisioned");

        let channel = match connector.connect(&kernel_id).await {
            Ok(channel) => channel,
            Err(e) => {
                tracing::warn!(
                    session_id = %id,
                    kernel_id = %kernel_id,
                    error = %e,
                    "channel setup failed, shutting kernel down"
                );
                if let Err(shutdown_err) = control.shutdown_kernel(&kernel_id).await {
                    tracing::warn!(kernel_id = %kernel_id, error = %shutdown_err, "kernel cleanup failed");
                }
                return Err(e);
            }
        };

        Ok(Self::new(id, kernel_id, channel, control, settings))
    }

    /// Assemble a session around an already-open channel.
    pub fn new(
        id: &str,
        kernel_id: String,
        channel: Box<dyn ExecutionChannel>,
        control: Arc<dyn ControlPlane>,
        settings: &SessionSettings,
    ) -> Self {
        Self {
            id: id.to_owned(),
            kernel_id,
            channel,
            control,
            history: Vec::new(),
            history_path: settings.history_path(id),
            execute_timeout: settings.execute_timeout,
            closed: false,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn kernel_id(&self) -> &str {
        &self.kernel_id
    }

    pub fn history(&self) -> &[String] {
        &self.history
    }

    pub fn history_path(&self) -> &str {
        &self.history_path
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    // ── execute ──────────────────────────────────────────────────────

    /// Run `code` and append it to history if the kernel reported no error.
    ///
    /// Never fails: transport faults and timeouts come back as entries in
    /// `errors`, which also keeps them out of history.
    pub async fn execute(&mut self, code: &str) -> ExecutionOutcome {
        let outcome = self.run(code, ExecuteOptions::default()).await;
        if outcome.is_success() {
            self.history.push(code.to_owned());
        }
        outcome
    }

    async fn run(&mut self, code: &str, opts: ExecuteOptions) -> ExecutionOutcome {
        if self.closed {
            return ExecutionOutcome::failed("Error: SessionClosed: session has been closed");
        }

        let start = Instant::now();
        let request = Message::execute_request(code, opts, self.channel.client_session());
        let msg_id = request.msg_id().to_owned();

        let outcome = match self.exchange(&request).await {
            Ok(collector) => collector.into_outcome(),
            Err(e) => ExecutionOutcome::failed(fault_label(&e)),
        };

        TraceEvent::ExecutionFinished {
            session_id: self.id.clone(),
            msg_id,
            outputs: outcome.outputs.len(),
            errors: outcome.errors.len(),
            duration_ms: start.elapsed().as_millis() as u64,
        }
        .emit();

        outcome
    }

    /// Send `request` and collect its replies under the overall timeout.
    async fn exchange(&mut self, request: &Message) -> Result<ReplyCollector> {
        self.channel.send(request).await?;

        let mut collector = ReplyCollector::new(request.msg_id());
        let channel = self.channel.as_mut();
        match self.execute_timeout {
            Some(limit) => {
                match tokio::time::timeout(limit, collect_reply(channel, &mut collector, None)).await
                {
                    Ok(done) => {
                        done?;
                    }
                    Err(_) => {
                        tracing::warn!(
                            session_id = %self.id,
                            msg_id = %request.msg_id(),
                            timeout_ms = limit.as_millis() as u64,
                            "execution timed out"
                        );
                        return Err(Error::Other(format!(
                            "Timeout: execution did not finish within {}ms",
                            limit.as_millis()
                        )));
                    }
                }
            }
            None => {
                collect_reply(channel, &mut collector, None).await?;
            }
        }
        Ok(collector)
    }

    // ── persistence ──────────────────────────────────────────────────

    /// Write the history to the session file inside the kernel. Submitted
    /// silently and not awaited: nothing is read back.
    pub async fn dump(&mut self) -> Result<()> {
        if self.closed {
            return Err(Error::Other("session has been closed".into()));
        }
        let code = dump_program(&self.history_path, &self.history);
        let request = Message::execute_request(&code, ExecuteOptions::silent(), self.channel.client_session());
        self.channel.send(&request).await?;

        TraceEvent::HistoryDumped {
            session_id: self.id.clone(),
            entries: self.history.len(),
        }
        .emit();
        Ok(())
    }

    /// Restore state by replaying the session file.
    ///
    /// `false` when the file is absent, unreadable, or the replay fails.
    /// Never returns an error. An existing but empty file restores nothing
    /// and counts as success.
    pub async fn load(&mut self) -> bool {
        let restored = match self.try_load().await {
            Ok(restored) => restored,
            Err(e) => {
                tracing::warn!(session_id = %self.id, error = %e, "history load failed");
                false
            }
        };

        TraceEvent::HistoryLoaded {
            session_id: self.id.clone(),
            restored,
        }
        .emit();
        restored
    }

    async fn try_load(&mut self) -> Result<bool> {
        let markers = Markers::new();
        let output = self.read_back(&load_program(&self.history_path, &markers)).await?;

        match parse_load_output(&output, &markers) {
            LoadOutput::NotFound => {
                tracing::debug!(session_id = %self.id, path = %self.history_path, "no saved history");
                Ok(false)
            }
            LoadOutput::Unrecognized => {
                tracing::warn!(session_id = %self.id, "history read produced no markers");
                Ok(false)
            }
            LoadOutput::Found(content) => {
                // The dump writes one trailing newline per entry; strip it so
                // the replayed block dumps back to the same file.
                let content = content.trim_end_matches('\n');
                if content.trim().is_empty() {
                    return Ok(true);
                }
                let outcome = self.execute(content).await;
                if !outcome.is_success() {
                    tracing::warn!(
                        session_id = %self.id,
                        errors = ?outcome.errors,
                        "history replay raised"
                    );
                }
                Ok(outcome.is_success())
            }
        }
    }

    /// Run an internal program and return its plain stdout. Bypasses
    /// history.
    async fn read_back(&mut self, code: &str) -> Result<String> {
        if self.closed {
            return Err(Error::Other("session has been closed".into()));
        }
        let request = Message::execute_request(code, ExecuteOptions::internal(), self.channel.client_session());
        let collector = self.exchange(&request).await?;

        let errors = collector.kernel_errors();
        if !errors.is_empty() {
            return Err(Error::Execution(errors.join("; ")));
        }
        Ok(collector.plain_text())
    }

    // ── teardown ─────────────────────────────────────────────────────

    /// Close the channel and shut the kernel down. Shutdown failures are
    /// logged, not returned. Idempotent.
    pub async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.channel.close().await;

        if let Err(e) = self.control.shutdown_kernel(&self.kernel_id).await {
            tracing::warn!(
                session_id = %self.id,
                kernel_id = %self.kernel_id,
                error = %e,
                "kernel shutdown failed"
            );
        }

        TraceEvent::SessionClosed {
            session_id: self.id.clone(),
            kernel_id: self.kernel_id.clone(),
        }
        .emit();
    }
}

/// Label a transport fault the way kernel errors are labeled.
fn fault_label(e: &Error) -> String {
    match e {
        Error::Other(msg) => format!("Error: {msg}"),
        Error::Connection(msg) => format!("Error: ConnectionError: {msg}"),
        Error::Protocol(msg) => format!("Error: ProtocolError: {msg}"),
        other => format!("Error: {other}"),
    }
}
