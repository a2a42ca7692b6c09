//! Configuration management commands

use anyhow::Result;
use clap::Subcommand;
use serde::Serialize;

use ashfall::config::Config;

use crate::cli::output::{OutputFormat, print_formatted, print_success};

#[derive(Subcommand, Debug)]
pub enum ConfigCommands {
    /// Show current configuration
    Show,

    /// Get a specific config value
    Get {
        /// Config key (e.g., "backend.url", "launcher.default_variant")
        key: String,
    },

    /// Set a config value
    Set {
        /// Config key (e.g., "backend.url", "launcher.default_variant")
        key: String,

        /// Value to set
        value: String,
    },

    /// Show config file path
    Path,
}

#[derive(Serialize)]
struct ConfigPathResult {
    path: String,
    exists: bool,
}

pub async fn run(command: ConfigCommands, format: OutputFormat, quiet: bool) -> Result<()> {
    match command {
        ConfigCommands::Show => show(format),
        ConfigCommands::Get { key } => get(&key, format),
        ConfigCommands::Set { key, value } => set(&key, &value, quiet),
        ConfigCommands::Path => path(format),
    }
}

fn show(format: OutputFormat) -> Result<()> {
    let config = Config::load()?;

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&config)?),
        OutputFormat::Text => println!("{}", toml::to_string_pretty(&config)?),
    }

    Ok(())
}

fn get(key: &str, format: OutputFormat) -> Result<()> {
    let config = Config::load()?;
    let value = get_config_value(&config, key)?;

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string(&value)?),
        OutputFormat::Text => println!("{}", value),
    }

    Ok(())
}

fn get_config_value(config: &Config, key: &str) -> Result<String> {
    let parts: Vec<&str> = key.split('.').collect();

    match parts.as_slice() {
        ["backend", "url"] => Ok(config.backend.url.clone()),
        ["backend", "request_timeout_secs"] => Ok(config.backend.request_timeout_secs.to_string()),
        ["launcher", "default_variant"] => Ok(config
            .launcher
            .default_variant
            .map(|v| v.id().to_string())
            .unwrap_or_else(|| "<not set>".to_string())),
        ["launcher", "progress_refresh_ms"] => Ok(config.launcher.progress_refresh_ms.to_string()),
        _ => anyhow::bail!("Unknown config key: {}", key),
    }
}

fn set(key: &str, value: &str, quiet: bool) -> Result<()> {
    let mut config = Config::load()?;

    set_config_value(&mut config, key, value)?;
    config.save()?;

    print_success(&format!("Set {} = {}", key, value), quiet);
    Ok(())
}

fn set_config_value(config: &mut Config, key: &str, value: &str) -> Result<()> {
    let parts: Vec<&str> = key.split('.').collect();

    match parts.as_slice() {
        ["backend", "url"] => {
            config.backend.url = value.to_string();
        }
        ["backend", "request_timeout_secs"] => {
            config.backend.request_timeout_secs = value.parse()?;
        }
        ["launcher", "default_variant"] => {
            config.launcher.default_variant = match value {
                "" | "none" => None,
                id => Some(id.parse()?),
            };
        }
        ["launcher", "progress_refresh_ms"] => {
            config.launcher.progress_refresh_ms = value.parse()?;
        }
        _ => anyhow::bail!("Unknown config key: {}", key),
    }

    Ok(())
}

fn path(format: OutputFormat) -> Result<()> {
    let path = Config::config_path()?;
    let exists = path.exists();

    let result = ConfigPathResult {
        path: path.to_string_lossy().to_string(),
        exists,
    };

    print_formatted(&result, format, |r| {
        format!("{}{}", r.path, if r.exists { "" } else { " (not found)" })
    });

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ashfall::GameVariant;

    #[test]
    fn test_get_and_set_keys() {
        let mut config = Config::default();

        set_config_value(&mut config, "launcher.default_variant", "bn").unwrap();
        assert_eq!(config.launcher.default_variant, Some(GameVariant::BrightNights));
        assert_eq!(
            get_config_value(&config, "launcher.default_variant").unwrap(),
            "BrightNights"
        );

        set_config_value(&mut config, "launcher.default_variant", "none").unwrap();
        assert_eq!(
            get_config_value(&config, "launcher.default_variant").unwrap(),
            "<not set>"
        );

        set_config_value(&mut config, "backend.request_timeout_secs", "5").unwrap();
        assert_eq!(get_config_value(&config, "backend.request_timeout_secs").unwrap(), "5");
    }

    #[test]
    fn test_rejects_bad_input() {
        let mut config = Config::default();
        assert!(set_config_value(&mut config, "backend.port", "1").is_err());
        assert!(set_config_value(&mut config, "backend.request_timeout_secs", "soon").is_err());
        assert!(set_config_value(&mut config, "launcher.default_variant", "nope").is_err());
        assert!(get_config_value(&config, "game.directory").is_err());
    }
}
