use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Sessions
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionsConfig {
    /// Directory on the *kernel's* filesystem where history files live.
    #[serde(default = "d_notebooks_folder")]
    pub notebooks_folder: String,
    /// Per-message receive timeout while bootstrapping a kernel.
    #[serde(default = "d_10000")]
    pub bootstrap_recv_timeout_ms: u64,
    /// Overall bound on a single `execute`. `0` disables the bound.
    #[serde(default = "d_600000")]
    pub execute_timeout_ms: u64,
}

impl Default for SessionsConfig {
    fn default() -> Self {
        Self {
            notebooks_folder: d_notebooks_folder(),
            bootstrap_recv_timeout_ms: 10_000,
            execute_timeout_ms: 600_000,
        }
    }
}

fn d_notebooks_folder() -> String {
    "/home/jovyan/notebooks".into()
}
fn d_10000() -> u64 {
    10_000
}
fn d_600000() -> u64 {
    600_000
}
