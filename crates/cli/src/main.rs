use clap::Parser;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use ji_cli::cli::{self, Cli, Command};
use ji_domain::config::ObservabilityConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let (config, config_path) = cli::load_config()?;
    init_tracing(&config.observability);

    match cli.command {
        Command::Doctor => {
            let passed = cli::doctor::run(&config, &config_path).await?;
            if !passed {
                std::process::exit(1);
            }
            Ok(())
        }
        Command::Exec { session, code } => {
            let ok = cli::exec::run(&config, session, code).await?;
            if !ok {
                std::process::exit(1);
            }
            Ok(())
        }
        Command::Repl { session } => cli::repl::repl(&config, session).await,
    }
}

/// Logs go to stderr; stdout carries results only.
///
/// `RUST_LOG` wins over `observability.default_filter`.
fn init_tracing(obs: &ObservabilityConfig) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&obs.default_filter));

    if obs.json_logs {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .compact()
                    .with_writer(std::io::stderr),
            )
            .init();
    }
}
