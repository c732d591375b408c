pub mod doctor;
pub mod exec;
pub mod repl;

use clap::{Parser, Subcommand};

use ji_domain::config::{Config, ConfigSeverity};

/// jupyter-interpreter: persistent Python sessions on a remote Jupyter server.
#[derive(Debug, Parser)]
#[command(name = "jupyter-interpreter", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Check configuration and control-plane reachability.
    Doctor,
    /// Execute one code block and print the structured result as JSON.
    Exec {
        /// Session to run in. Omit to start a fresh one; reuse the printed
        /// id to continue where you left off.
        #[arg(long)]
        session: Option<String>,
        /// Code to execute. Reads stdin when omitted or `-`.
        code: Option<String>,
    },
    /// Interactive loop against one session.
    Repl {
        #[arg(long)]
        session: Option<String>,
    },
}

// ── Config loading helper ─────────────────────────────────────────────

/// Load the configuration from the path in `JI_CONFIG` (or `config.toml`),
/// then apply environment overrides. A missing file means defaults.
/// Returns the config and the path that was used.
pub fn load_config() -> anyhow::Result<(Config, String)> {
    let config_path = std::env::var("JI_CONFIG").unwrap_or_else(|_| "config.toml".into());
    let mut config = read_config_file(&config_path)?;
    apply_env_overrides(&mut config, |key| std::env::var(key).ok());
    Ok((config, config_path))
}

pub fn read_config_file(config_path: &str) -> anyhow::Result<Config> {
    if !std::path::Path::new(config_path).exists() {
        return Ok(Config::default());
    }
    let raw = std::fs::read_to_string(config_path)
        .map_err(|e| anyhow::anyhow!("reading {config_path}: {e}"))?;
    toml::from_str(&raw).map_err(|e| anyhow::anyhow!("parsing {config_path}: {e}"))
}

/// `JUPYTER_BASE_URL` and `NOTEBOOKS_FOLDER` override the file. The token
/// is read later through `control_plane.token_env`.
pub fn apply_env_overrides(config: &mut Config, var: impl Fn(&str) -> Option<String>) {
    if let Some(url) = var("JUPYTER_BASE_URL").filter(|v| !v.is_empty()) {
        config.control_plane.base_url = url;
    }
    if let Some(folder) = var("NOTEBOOKS_FOLDER").filter(|v| !v.is_empty()) {
        config.sessions.notebooks_folder = folder;
    }
}

/// Print validation issues to stderr and fail on any error-severity one.
pub fn ensure_valid(config: &Config) -> anyhow::Result<()> {
    let issues = config.validate();
    for issue in &issues {
        eprintln!("{issue}");
    }
    if Config::has_errors(&issues) {
        let errors = issues
            .iter()
            .filter(|i| i.severity == ConfigSeverity::Error)
            .count();
        anyhow::bail!("invalid configuration: {errors} error(s)");
    }
    Ok(())
}
