use anyhow::{Context, Result};
use clap::Subcommand;
use std::process::Command;

use crate::cli::output::{Formatter, get_formatter};
use crate::models::{Config, OutputFormat};

const MASK: &str = "********";

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    #[command(about = "Write a default configuration file")]
    Init {
        #[arg(long, short = 'f', help = "Force overwrite existing config")]
        force: bool,
    },
    #[command(about = "Show the effective configuration")]
    Show,
    #[command(about = "Show configuration and data paths")]
    Path,
    #[command(about = "Edit configuration file")]
    Edit,
}

pub async fn handle_config(
    cmd: ConfigCommand,
    config: Config,
    format: OutputFormat,
    _verbose: bool,
) -> Result<()> {
    let formatter = get_formatter(format);

    match cmd {
        ConfigCommand::Init { force } => handle_init(force, formatter.as_ref()),
        ConfigCommand::Show => handle_show(config, format),
        ConfigCommand::Path => handle_path(&config),
        ConfigCommand::Edit => handle_edit(formatter.as_ref()),
    }
}

fn handle_init(force: bool, formatter: &dyn Formatter) -> Result<()> {
    let config_path =
        Config::config_path().ok_or_else(|| anyhow::anyhow!("could not determine config directory"))?;

    if config_path.exists() && !force {
        anyhow::bail!(
            "Config already exists at: {}\nUse --force to overwrite.",
            config_path.display()
        );
    }

    let path = Config::default().save().context("failed to create config")?;
    println!(
        "{}",
        formatter.format_message(&format!("Created config at: {}", path.display()))
    );
    Ok(())
}

/// Copy of `config` safe to print.
fn masked(mut config: Config) -> Config {
    if config.embedding.api_key.is_some() {
        config.embedding.api_key = Some(MASK.to_string());
    }
    if config.generation.api_key.is_some() {
        config.generation.api_key = Some(MASK.to_string());
    }
    config
}

fn handle_show(config: Config, format: OutputFormat) -> Result<()> {
    let config = masked(config);

    if format == OutputFormat::Json {
        println!("{}", serde_json::to_string_pretty(&config)?);
        return Ok(());
    }

    if let Some(path) = Config::config_path().filter(|p| p.exists()) {
        println!("# Loaded from: {}", path.display());
    } else {
        println!("# Built-in defaults (no config file)");
    }
    println!();
    print!("{}", toml::to_string_pretty(&config)?);
    Ok(())
}

fn handle_path(config: &Config) -> Result<()> {
    println!("Configuration paths:");
    println!();

    if let Some(path) = Config::config_path() {
        let state = if path.exists() { "active" } else { "would be" };
        println!("Config file ({}): {}", state, path.display());
    }
    println!("Data dir: {}", config.data_dir().display());
    println!("Index: {}", config.index_path().display());
    println!("Models: {}", config.models_dir().display());
    println!("Benchmarks: {}", config.benchmark_results_path().display());

    if let Ok(cwd) = std::env::current_dir() {
        let env_path = cwd.join(".env");
        if env_path.exists() {
            println!(".env file (active): {}", env_path.display());
        }
    }
    Ok(())
}

fn handle_edit(formatter: &dyn Formatter) -> Result<()> {
    let path =
        Config::config_path().ok_or_else(|| anyhow::anyhow!("could not determine config path"))?;

    if !path.exists() {
        Config::default().save().context("failed to create config")?;
        println!(
            "{}",
            formatter.format_message(&format!("Created config at: {}", path.display()))
        );
    }

    let editor = std::env::var("EDITOR")
        .unwrap_or_else(|_| std::env::var("VISUAL").unwrap_or_else(|_| "vim".into()));

    Command::new(&editor)
        .arg(&path)
        .status()
        .context(format!("failed to open editor: {}", editor))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_show_masks_api_keys() {
        let mut config = Config::default();
        config.embedding.api_key = Some("sk-secret".to_string());
        let shown = masked(config);
        assert_eq!(shown.embedding.api_key.as_deref(), Some(MASK));
        assert!(shown.generation.api_key.is_none());

        let rendered = toml::to_string_pretty(&shown).unwrap();
        assert!(!rendered.contains("sk-secret"));
    }
}
