//! WebSocket relay channel (`/api/kernels/{id}/channels`).
//!
//! The Jupyter server multiplexes every kernel channel over this socket as
//! JSON envelopes tagged with `channel`. It carries the bootstrap exchange
//! and, in relay mode, every execution of a session.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use reqwest::Url;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message as WsFrame;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use uuid::Uuid;

use ji_domain::error::{Error, Result};
use ji_protocol::Message;

use crate::channel::ExecutionChannel;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Build the relay URL for a kernel.
///
/// The base URL keeps its path prefix (JupyterHub serves user servers
/// under `/user/<name>`); the scheme is swapped to `ws`/`wss` and the
/// credential is passed as the `token` query parameter.
pub fn relay_url(base_url: &str, kernel_id: &str, token: Option<&str>) -> Result<String> {
    let mut url = Url::parse(base_url)
        .map_err(|e| Error::Connection(format!("invalid base URL {base_url:?}: {e}")))?;

    let scheme = match url.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        other => {
            return Err(Error::Connection(format!(
                "unsupported base URL scheme: {other}"
            )))
        }
    };
    url.set_scheme(scheme)
        .map_err(|()| Error::Connection(format!("cannot use scheme {scheme} for {base_url}")))?;

    let prefix = url.path().trim_end_matches('/').to_owned();
    url.set_path(&format!("{prefix}/api/kernels/{kernel_id}/channels"));
    url.set_query(None);
    if let Some(token) = token {
        url.query_pairs_mut().append_pair("token", token);
    }

    Ok(url.into())
}

/// A live relay connection to one kernel.
pub struct RelayChannel {
    ws: Option<WsStream>,
    session: String,
}

impl RelayChannel {
    /// Open the relay. Any handshake failure is a connection error.
    pub async fn open(url: &str) -> Result<Self> {
        let (ws, _response) = tokio_tungstenite::connect_async(url)
            .await
            .map_err(|e| Error::Connection(format!("cannot open kernel relay: {e}")))?;

        tracing::debug!(url = %redact_token(url), "kernel relay connected");

        Ok(Self {
            ws: Some(ws),
            session: Uuid::new_v4().to_string(),
        })
    }
}

#[async_trait]
impl ExecutionChannel for RelayChannel {
    fn client_session(&self) -> &str {
        &self.session
    }

    async fn send(&mut self, msg: &Message) -> Result<()> {
        let ws = self
            .ws
            .as_mut()
            .ok_or_else(|| Error::Protocol("relay channel is closed".into()))?;

        let mut envelope = msg.clone();
        if envelope.channel.is_none() {
            envelope.channel = Some("shell".into());
        }
        let text = serde_json::to_string(&envelope)?;
        ws.send(WsFrame::Text(text))
            .await
            .map_err(|e| Error::Connection(format!("relay send failed: {e}")))
    }

    async fn recv(&mut self) -> Result<Option<Message>> {
        let Some(ws) = self.ws.as_mut() else {
            return Ok(None);
        };

        while let Some(frame) = ws.next().await {
            let frame = frame.map_err(|e| Error::Connection(format!("relay receive failed: {e}")))?;
            match frame {
                WsFrame::Text(text) => match serde_json::from_str::<Message>(&text) {
                    Ok(msg) => return Ok(Some(msg)),
                    Err(e) => {
                        tracing::debug!(error = %e, "skipping unparseable relay frame");
                    }
                },
                WsFrame::Close(_) => return Ok(None),
                // Binary frames carry buffer-bearing messages; nothing we
                // consume uses buffers.
                WsFrame::Binary(_) | WsFrame::Ping(_) | WsFrame::Pong(_) | WsFrame::Frame(_) => {}
            }
        }
        Ok(None)
    }

    async fn close(&mut self) {
        if let Some(mut ws) = self.ws.take() {
            if let Err(e) = ws.close(None).await {
                tracing::debug!(error = %e, "relay close failed");
            }
        }
    }
}

fn redact_token(url: &str) -> String {
    match url.split_once("token=") {
        Some((head, _)) => format!("{head}token=<redacted>"),
        None => url.to_owned(),
    }
}
