//! CLI definition and config loading.

use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Parser, Subcommand};

use hb_domain::config::Config;

#[derive(Parser)]
#[command(name = "hostbridge", about = "Tool gateway for LLM clients", version)]
pub struct Cli {
    /// Path to the TOML config file (default: ./hostbridge.toml).
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand)]
pub enum Command {
    /// Run the gateway (default).
    Serve,
    /// Config inspection.
    #[command(subcommand)]
    Config(ConfigCommand),
    /// Print the version.
    Version,
}

#[derive(Subcommand)]
pub enum ConfigCommand {
    /// Validate the effective configuration and exit non-zero on errors.
    Validate,
    /// Print the effective configuration (secrets file path, not values).
    Show,
}

/// Load config with env > file > defaults precedence. A missing file is
/// fine unless the path was given explicitly.
pub fn load_config(explicit: Option<&Path>) -> anyhow::Result<(Config, PathBuf)> {
    let path = explicit
        .map(Path::to_path_buf)
        .or_else(|| std::env::var("HOSTBRIDGE_CONFIG").ok().map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from("./hostbridge.toml"));

    let mut config = if path.exists() {
        let raw = std::fs::read_to_string(&path)
            .with_context(|| format!("reading config '{}'", path.display()))?;
        toml::from_str(&raw).with_context(|| format!("parsing config '{}'", path.display()))?
    } else {
        if explicit.is_some() {
            anyhow::bail!("config file '{}' does not exist", path.display());
        }
        Config::default()
    };

    config.apply_env_overrides();
    Ok((config, path))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn missing_default_config_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("absent.toml");
        // Not explicit → defaults, no error.
        let (config, _) = load_config(None).unwrap();
        assert_eq!(config.server.listen_port, 8080);
        // Explicit missing path → error.
        assert!(load_config(Some(&missing)).is_err());
    }

    #[test]
    fn explicit_config_file_is_parsed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hostbridge.toml");
        let mut f = std::fs::File::create(&path).unwrap();
        writeln!(
            f,
            "[server]\nlisten_port = 9999\n\n[hitl]\nttl_seconds = 60\n"
        )
        .unwrap();

        let (config, loaded_from) = load_config(Some(&path)).unwrap();
        assert_eq!(config.server.listen_port, 9999);
        assert_eq!(config.hitl.ttl_seconds, 60);
        assert_eq!(loaded_from, path);
    }
}
