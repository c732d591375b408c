//! Descriptor-based execution channel over ZeroMQ.
//!
//! Two background tasks own the sockets: a shell task (DEALER) that
//! forwards outbound requests and inbound replies, and an iopub reader
//! (SUB, subscribed to everything). Both feed one inbound queue so the
//! session sees messages in arrival order regardless of the socket.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;
use zeromq::{DealerSocket, Socket, SocketRecv, SocketSend, SubSocket, ZmqMessage};

use ji_domain::error::{Error, Result};
use ji_protocol::{ConnectionDescriptor, Message};

use crate::channel::ExecutionChannel;
use crate::wire::{self, Signer};

const QUEUE_DEPTH: usize = 256;
const PROBE_INTERVAL: Duration = Duration::from_secs(1);

pub struct ZmqChannel {
    session: String,
    outbound: mpsc::Sender<Vec<Bytes>>,
    inbound: mpsc::Receiver<Message>,
    signer: Signer,
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl ZmqChannel {
    /// Connect the shell and iopub sockets described by `descriptor`.
    pub async fn connect(descriptor: &ConnectionDescriptor) -> Result<Self> {
        let signer = Signer::new(&descriptor.signature_scheme, &descriptor.auth_key)?;

        let shell_endpoint = descriptor.shell_endpoint();
        let iopub_endpoint = descriptor.iopub_endpoint();

        let mut shell = DealerSocket::new();
        shell
            .connect(&shell_endpoint)
            .await
            .map_err(|e| Error::Connection(format!("shell connect {shell_endpoint}: {e}")))?;

        let mut iopub = SubSocket::new();
        iopub
            .connect(&iopub_endpoint)
            .await
            .map_err(|e| Error::Connection(format!("iopub connect {iopub_endpoint}: {e}")))?;
        iopub
            .subscribe("")
            .await
            .map_err(|e| Error::Connection(format!("iopub subscribe: {e}")))?;

        tracing::debug!(shell = %shell_endpoint, iopub = %iopub_endpoint, "zmq sockets connected");

        let cancel = CancellationToken::new();
        let (out_tx, out_rx) = mpsc::channel(QUEUE_DEPTH);
        let (in_tx, in_rx) = mpsc::channel(QUEUE_DEPTH);

        let shell_task = tokio::spawn(shell_loop(
            shell,
            out_rx,
            in_tx.clone(),
            signer.clone(),
            cancel.clone(),
        ));
        let iopub_task = tokio::spawn(iopub_loop(iopub, in_tx, signer.clone(), cancel.clone()));

        Ok(Self {
            session: Uuid::new_v4().to_string(),
            outbound: out_tx,
            inbound: in_rx,
            signer,
            cancel,
            tasks: vec![shell_task, iopub_task],
        })
    }

    /// Probe with `kernel_info_request` until a correlated iopub message
    /// arrives. Also covers the SUB socket's join delay: iopub output
    /// published before the subscription lands would otherwise be lost.
    pub async fn wait_for_ready(&mut self, timeout: Duration) -> Result<()> {
        let deadline = Instant::now() + timeout;

        while Instant::now() < deadline {
            let probe = Message::kernel_info_request(&self.session);
            self.send(&probe).await?;

            let window = (Instant::now() + PROBE_INTERVAL).min(deadline);
            loop {
                match tokio::time::timeout_at(window, self.inbound.recv()).await {
                    Ok(Some(msg)) => {
                        if msg.is_reply_to(probe.msg_id())
                            && msg.channel.as_deref() == Some("iopub")
                        {
                            tracing::debug!("kernel ready");
                            return Ok(());
                        }
                    }
                    Ok(None) => {
                        return Err(Error::Connection(
                            "kernel channel closed while waiting for readiness".into(),
                        ))
                    }
                    Err(_) => break,
                }
            }
        }

        Err(Error::Connection(format!(
            "kernel did not become ready within {}ms",
            timeout.as_millis()
        )))
    }
}

#[async_trait]
impl ExecutionChannel for ZmqChannel {
    fn client_session(&self) -> &str {
        &self.session
    }

    async fn send(&mut self, msg: &Message) -> Result<()> {
        let frames = wire::encode(msg, &self.signer)?;
        self.outbound
            .send(frames)
            .await
            .map_err(|_| Error::Protocol("shell channel is closed".into()))
    }

    async fn recv(&mut self) -> Result<Option<Message>> {
        Ok(self.inbound.recv().await)
    }

    async fn close(&mut self) {
        self.cancel.cancel();
        for task in self.tasks.drain(..) {
            task.abort();
        }
        self.inbound.close();
    }
}

impl Drop for ZmqChannel {
    fn drop(&mut self) {
        self.cancel.cancel();
        for task in &self.tasks {
            task.abort();
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Socket tasks
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

async fn shell_loop(
    mut socket: DealerSocket,
    mut outbound: mpsc::Receiver<Vec<Bytes>>,
    inbound: mpsc::Sender<Message>,
    signer: Signer,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            frames = outbound.recv() => {
                let Some(frames) = frames else { break };
                let msg = match ZmqMessage::try_from(frames) {
                    Ok(m) => m,
                    Err(e) => {
                        tracing::warn!(error = %e, "refusing to send empty multipart message");
                        continue;
                    }
                };
                if let Err(e) = socket.send(msg).await {
                    tracing::warn!(error = %e, "shell send failed");
                    break;
                }
            }
            received = socket.recv() => {
                match received {
                    Ok(raw) => {
                        if !forward(raw, &signer, "shell", &inbound).await {
                            break;
                        }
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "shell receive failed");
                        break;
                    }
                }
            }
        }
    }
    cancel.cancel();
}

async fn iopub_loop(
    mut socket: SubSocket,
    inbound: mpsc::Sender<Message>,
    signer: Signer,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            received = socket.recv() => {
                match received {
                    Ok(raw) => {
                        if !forward(raw, &signer, "iopub", &inbound).await {
                            break;
                        }
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "iopub receive failed");
                        break;
                    }
                }
            }
        }
    }
    cancel.cancel();
}

/// Decode and queue one inbound message. Returns false once the
/// receiving side is gone.
async fn forward(
    raw: ZmqMessage,
    signer: &Signer,
    channel: &str,
    inbound: &mpsc::Sender<Message>,
) -> bool {
    let frames = raw.into_vec();
    match wire::decode(&frames, signer, channel) {
        Ok(msg) => inbound.send(msg).await.is_ok(),
        Err(e) => {
            tracing::debug!(channel, error = %e, "dropping undecodable frame");
            true
        }
    }
}
