use clap::Parser;
use tracing_subscriber::EnvFilter;

use hb_domain::config::{Config, ConfigSeverity};
use hb_gateway::cli::{Cli, Command, ConfigCommand};
use hb_gateway::{api, bootstrap};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        // Default to serve when no subcommand is given.
        None | Some(Command::Serve) => {
            init_tracing();
            let (config, config_path) = hb_gateway::cli::load_config(cli.config.as_deref())?;
            tracing::info!(config = %config_path.display(), "configuration loaded");
            run_server(config).await
        }
        Some(Command::Config(ConfigCommand::Validate)) => {
            let (config, _) = hb_gateway::cli::load_config(cli.config.as_deref())?;
            let issues = config.validate();
            for issue in &issues {
                let tag = match issue.severity {
                    ConfigSeverity::Warning => "warning",
                    ConfigSeverity::Error => "error",
                };
                println!("{tag}: {issue}");
            }
            if issues.iter().any(|i| i.severity == ConfigSeverity::Error) {
                std::process::exit(1);
            }
            println!("configuration is valid");
            Ok(())
        }
        Some(Command::Config(ConfigCommand::Show)) => {
            let (config, _) = hb_gateway::cli::load_config(cli.config.as_deref())?;
            println!("{}", toml::to_string_pretty(&redacted(config))?);
            Ok(())
        }
        Some(Command::Version) => {
            println!("hostbridge {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

/// Structured tracing; JSON when not attached to a terminal is left to the
/// deployment's env filter.
fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,hb_gateway=debug")),
        )
        .init();
}

/// The printable form of the config never includes the admin password.
fn redacted(mut config: Config) -> Config {
    if config.server.admin_password.is_some() {
        config.server.admin_password = Some("<set>".into());
    }
    config
}

async fn run_server(config: Config) -> anyhow::Result<()> {
    tracing::info!("HostBridge starting");

    // ── Config validation ────────────────────────────────────────────
    let issues = config.validate();
    for issue in &issues {
        match issue.severity {
            ConfigSeverity::Warning => tracing::warn!("config: {issue}"),
            ConfigSeverity::Error => tracing::error!("config: {issue}"),
        }
    }
    if issues.iter().any(|i| i.severity == ConfigSeverity::Error) {
        anyhow::bail!(
            "config validation failed with {} error(s)",
            issues
                .iter()
                .filter(|i| i.severity == ConfigSeverity::Error)
                .count()
        );
    }

    let addr = format!("{}:{}", config.server.host, config.server.listen_port);

    // ── Composition root ─────────────────────────────────────────────
    let state = bootstrap::build_state(config)?;
    bootstrap::spawn_background_tasks(&state);

    let app = api::router(&state).with_state(state);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(addr = %addr, "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("HostBridge stopped");
    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("shutdown signal received");
}
