use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Control plane (Jupyter server REST API)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControlPlaneConfig {
    /// Server URL, e.g. `http://localhost:8888`.
    #[serde(default = "d_base_url")]
    pub base_url: String,
    /// Inline credential. Prefer `token_env` outside of tests.
    #[serde(default)]
    pub token: Option<String>,
    /// Environment variable holding the bearer credential.
    #[serde(default = "d_token_env")]
    pub token_env: String,
    #[serde(default = "d_30000")]
    pub timeout_ms: u64,
    /// Kernel spec name passed to `POST /api/kernels`.
    #[serde(default = "d_kernel_name")]
    pub kernel_name: String,
}

impl Default for ControlPlaneConfig {
    fn default() -> Self {
        Self {
            base_url: d_base_url(),
            token: None,
            token_env: d_token_env(),
            timeout_ms: 30_000,
            kernel_name: d_kernel_name(),
        }
    }
}

impl ControlPlaneConfig {
    /// The inline token if set, else the value of `token_env`.
    /// Empty strings count as absent.
    pub fn resolve_token(&self) -> Option<String> {
        self.token
            .clone()
            .filter(|t| !t.is_empty())
            .or_else(|| std::env::var(&self.token_env).ok())
            .filter(|t| !t.is_empty())
    }
}

// ── serde default helpers ───────────────────────────────────────────

fn d_base_url() -> String {
    "http://localhost:8888".into()
}
fn d_token_env() -> String {
    "JUPYTER_TOKEN".into()
}
fn d_30000() -> u64 {
    30_000
}
fn d_kernel_name() -> String {
    "python3".into()
}
