//! The execution-channel seam and the bounded reply-consumption loop.

use std::time::Duration;

use async_trait::async_trait;

use ji_domain::error::{Error, Result};
use ji_protocol::{ExecuteOptions, Message, Progress, ReplyCollector};

/// A bidirectional message channel to one kernel.
///
/// One request is in flight at a time; callers serialize access (the
/// session holds the channel behind its own lock).
#[async_trait]
pub trait ExecutionChannel: Send {
    /// Client session id stamped on outbound headers.
    fn client_session(&self) -> &str;

    /// Send a request on the kernel's shell channel.
    async fn send(&mut self, msg: &Message) -> Result<()>;

    /// Next inbound message from any kernel channel, in arrival order.
    /// `Ok(None)` means the channel is closed.
    async fn recv(&mut self) -> Result<Option<Message>>;

    /// Tear the connection down. Idempotent.
    async fn close(&mut self);
}

/// Feed inbound messages to `collector` until the request goes idle.
///
/// With `per_message` set, each individual receive is bounded and a
/// timeout ends collection early: returns `Ok(false)` and keeps whatever
/// was gathered. There is deliberately no cumulative deadline here;
/// callers wanting one wrap this in `tokio::time::timeout`.
pub async fn collect_reply(
    channel: &mut dyn ExecutionChannel,
    collector: &mut ReplyCollector,
    per_message: Option<Duration>,
) -> Result<bool> {
    loop {
        let next = match per_message {
            Some(limit) => match tokio::time::timeout(limit, channel.recv()).await {
                Ok(next) => next?,
                Err(_) => {
                    tracing::debug!(
                        msg_id = %collector.msg_id(),
                        timeout_ms = limit.as_millis() as u64,
                        "receive timed out before idle"
                    );
                    return Ok(false);
                }
            },
            None => channel.recv().await?,
        };

        let Some(msg) = next else {
            return Err(Error::Protocol(
                "kernel channel closed before the request completed".into(),
            ));
        };

        if collector.accept(&msg) == Progress::Idle {
            return Ok(true);
        }
    }
}

/// Run a one-shot program and return its unlabeled stdout.
///
/// Kernel-reported errors become `Error::Execution`.
pub async fn run_program(
    channel: &mut dyn ExecutionChannel,
    code: &str,
    per_message: Duration,
) -> Result<String> {
    let request = Message::execute_request(code, ExecuteOptions::internal(), channel.client_session());
    channel.send(&request).await?;

    let mut collector = ReplyCollector::new(request.msg_id());
    let completed = collect_reply(channel, &mut collector, Some(per_message)).await?;
    if !completed {
        tracing::warn!(
            msg_id = %request.msg_id(),
            "kernel did not report idle in time, using partial output"
        );
    }

    let errors = collector.kernel_errors();
    if !errors.is_empty() {
        return Err(Error::Execution(format!(
            "code execution failed: {}",
            errors.join("; ")
        )));
    }

    Ok(collector.plain_text())
}


#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn run_program_returns_stdout() {
        let mut ch = ScriptedChannel::new(Box::new(|req| {
            vec![
                reply(req, "status", json!({"execution_state": "busy"})),
                reply(req, "stream", json!({"name": "stdout", "text": "{\"ok\": true}\n"})),
                reply(req, "status", json!({"execution_state": "idle"})),
            ]
        }));
        let out = run_program(&mut ch, "print(1)", Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(out, "{\"ok\": true}\n");
        assert_eq!(ch.sent[0].content["store_history"], false);
    }

    #[tokio::test]
    async fn run_program_surfaces_kernel_error() {
        let mut ch = ScriptedChannel::new(Box::new(|req| {
            vec![
                reply(req, "error", json!({"ename": "OSError", "evalue": "denied"})),
                reply(req, "status", json!({"execution_state": "idle"})),
            ]
        }));
        let err = run_program(&mut ch, "open('/x')", Duration::from_secs(1))
            .await
            .unwrap_err();
        match err {
            Error::Execution(msg) => assert!(msg.contains("OSError: denied")),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn closed_channel_is_a_protocol_error() {
        let mut ch = ScriptedChannel::new(Box::new(|req| {
            vec![reply(req, "stream", json!({"name": "stdout", "text": "partial"}))]
        }));
        let err = run_program(&mut ch, "x", Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Protocol(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn per_message_timeout_keeps_partial_output() {
        let mut ch = ScriptedChannel::new(Box::new(|req| {
            vec![reply(req, "stream", json!({"name": "stdout", "text": "partial"}))]
        }));
        ch.hang_when_empty = true;
        let out = run_program(&mut ch, "x", Duration::from_secs(10))
            .await
            .unwrap();
        assert_eq!(out, "partial");
    }
}
