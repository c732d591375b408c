//! `jupyter-interpreter exec`: one code block, one JSON result.

use std::io::Read;

use anyhow::Context;

use ji_domain::config::Config;
use ji_kernel::ControlPlane;
use ji_sessions::SessionRegistry;

/// Validate the config and the server, then build the registry. Every
/// failure here is fatal to the process.
pub async fn connect(config: &Config) -> anyhow::Result<SessionRegistry> {
    super::ensure_valid(config)?;

    let registry = SessionRegistry::from_config(config).context("building session registry")?;
    let base_url = &config.control_plane.base_url;
    let reachable = registry
        .control_plane()
        .validate_connection()
        .await
        .with_context(|| format!("failed to connect to Jupyter server at {base_url}"))?;
    if !reachable {
        anyhow::bail!("Jupyter server at {base_url} did not answer the API probe");
    }
    Ok(registry)
}

/// Execute `code` and print `{session_id, is_new, errors, outputs}`.
///
/// The kernel is shut down afterwards; state carries over to the next
/// `exec --session <id>` through the saved history.
pub async fn run(config: &Config, session: Option<String>, code: Option<String>) -> anyhow::Result<bool> {
    let code = match code.as_deref() {
        None | Some("-") => {
            let mut buf = String::new();
            std::io::stdin()
                .read_to_string(&mut buf)
                .context("reading code from stdin")?;
            buf
        }
        Some(code) => code.to_owned(),
    };

    let registry = connect(config).await?;
    let response = registry.execute(session.as_deref(), &code).await;
    tracing::debug!(
        session_id = %response.session_id,
        is_new = response.is_new,
        errors = response.outcome.errors.len(),
        "exec finished"
    );
    registry.close_all().await;

    println!("{}", serde_json::to_string_pretty(&response)?);
    Ok(response.outcome.is_success())
}
