//! Control-plane client: kernel lifecycle over the Jupyter server REST API.
//!
//! `RestControlPlane` wraps a `reqwest::Client` and maps every call onto
//! the error taxonomy the rest of the system relies on:
//!
//! | Failure                       | Error                 |
//! |-------------------------------|-----------------------|
//! | connect refused / DNS / timeout | `Error::Connection` |
//! | 401 / 403                     | `Error::Auth`         |
//! | any other non-2xx             | `Error::ControlPlane` |
//!
//! Calls are not retried. `shutdown_kernel` in particular is best-effort
//! and callers treat it as fire-and-forget.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::Deserialize;

use ji_domain::config::ControlPlaneConfig;
use ji_domain::error::{Error, Result};
use ji_domain::trace::TraceEvent;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Trait
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Kernel lifecycle operations. Implemented by the REST client and by
/// test doubles.
#[async_trait]
pub trait ControlPlane: Send + Sync {
    /// Probe reachability (GET /api). Failures are surfaced, never
    /// swallowed: they decide whether the process should run at all.
    async fn validate_connection(&self) -> Result<bool>;

    /// Provision a kernel (POST /api/kernels) and return its id.
    async fn create_kernel(&self, kernel_name: &str) -> Result<String>;

    /// Delete a kernel (DELETE /api/kernels/{id}).
    async fn shutdown_kernel(&self, kernel_id: &str) -> Result<()>;
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Client
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// REST client for the Jupyter server.
///
/// Created once and shared by every session; the underlying
/// `reqwest::Client` maintains a connection pool.
#[derive(Debug, Clone)]
pub struct RestControlPlane {
    http: Client,
    base_url: String,
    token: Option<String>,
    timeout: Duration,
}

#[derive(Debug, Deserialize)]
struct KernelModel {
    id: String,
}

impl RestControlPlane {
    /// Build a client from the shared `ControlPlaneConfig`.
    pub fn new(cfg: &ControlPlaneConfig) -> Result<Self> {
        Self::with_token(
            &cfg.base_url,
            cfg.resolve_token(),
            Duration::from_millis(cfg.timeout_ms),
        )
    }

    pub fn with_token(base_url: &str, token: Option<String>, timeout: Duration) -> Result<Self> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Config(format!("building HTTP client: {e}")))?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_owned(),
            token,
            timeout,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    /// The configured request timeout.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    // ── request helpers ──────────────────────────────────────────────

    /// Attach the credential header when one is configured.
    fn decorate(&self, rb: RequestBuilder) -> RequestBuilder {
        match self.token {
            Some(ref token) => rb.header("Authorization", format!("token {token}")),
            None => rb,
        }
    }

    /// Build the full URL for a path like `/api/kernels`.
    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Send one request, emit a `ControlPlaneCall` trace event, and map
    /// the status onto the error taxonomy.
    async fn send(&self, endpoint: &str, rb: RequestBuilder) -> Result<Response> {
        let start = Instant::now();
        let result = self.decorate(rb).send().await;
        let duration_ms = start.elapsed().as_millis() as u64;

        let resp = match result {
            Ok(resp) => resp,
            Err(e) => {
                TraceEvent::ControlPlaneCall {
                    endpoint: endpoint.to_owned(),
                    status: 0,
                    duration_ms,
                }
                .emit();
                return Err(from_reqwest(e));
            }
        };

        let status = resp.status();
        TraceEvent::ControlPlaneCall {
            endpoint: endpoint.to_owned(),
            status: status.as_u16(),
            duration_ms,
        }
        .emit();

        if status == StatusCode::UNAUTHORIZED {
            let body = resp.text().await.unwrap_or_default();
            return Err(Error::Auth(format!(
                "authentication failed ({endpoint}): {status} {body}"
            )));
        }
        if status == StatusCode::FORBIDDEN {
            let body = resp.text().await.unwrap_or_default();
            return Err(Error::Auth(format!(
                "authorization failed ({endpoint}): {status} {body}"
            )));
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(Error::ControlPlane(format!(
                "{endpoint} returned {status}: {body}"
            )));
        }

        Ok(resp)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Trait implementation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[async_trait]
impl ControlPlane for RestControlPlane {
    async fn validate_connection(&self) -> Result<bool> {
        let url = self.url("/api");
        let resp = self.send("GET /api", self.http.get(&url)).await?;
        Ok(resp.status() == StatusCode::OK)
    }

    async fn create_kernel(&self, kernel_name: &str) -> Result<String> {
        let url = self.url("/api/kernels");
        let resp = self
            .send(
                "POST /api/kernels",
                self.http
                    .post(&url)
                    .json(&serde_json::json!({ "name": kernel_name })),
            )
            .await?;

        let body = resp.text().await.map_err(from_reqwest)?;
        let kernel: KernelModel = serde_json::from_str(&body).map_err(|e| {
            Error::ControlPlane(format!("failed to parse kernel response: {e}: {body}"))
        })?;

        TraceEvent::KernelCreated {
            kernel_id: kernel.id.clone(),
            kernel_name: kernel_name.to_owned(),
        }
        .emit();

        Ok(kernel.id)
    }

    async fn shutdown_kernel(&self, kernel_id: &str) -> Result<()> {
        let url = self.url(&format!("/api/kernels/{kernel_id}"));
        let result = self
            .send(
                &format!("DELETE /api/kernels/{kernel_id}"),
                self.http.delete(&url),
            )
            .await;

        TraceEvent::KernelShutdown {
            kernel_id: kernel_id.to_owned(),
            ok: result.is_ok(),
        }
        .emit();

        result.map(|_| ())
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Error conversion helper
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Convert a `reqwest::Error` into a domain `Error`.
///
/// Timeouts and transport failures become `Error::Connection`; anything
/// else (body decoding, redirects) is a control-plane problem.
pub fn from_reqwest(e: reqwest::Error) -> Error {
    if e.is_timeout() {
        Error::Connection(format!("request timed out: {e}"))
    } else if e.is_connect() || e.is_request() {
        Error::Connection(format!("cannot connect to Jupyter server: {e}"))
    } else {
        Error::ControlPlane(e.to_string())
    }
}
