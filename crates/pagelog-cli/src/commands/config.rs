//! Config command handlers

use std::path::PathBuf;

use anyhow::{bail, Context, Result};

use pagelog_core::Config;

use crate::output::{Output, OutputFormat};

/// Show current configuration
pub fn show(config_path: Option<&PathBuf>, output: &Output) -> Result<()> {
    let config =
        Config::load_with_cli_override(config_path).context("Failed to load configuration")?;

    match output.format {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::json!({
                    "data_dir": config.data_dir,
                    "store_url": config.store_url,
                    "app_id": config.app_id,
                    "bootstrap_token": config.bootstrap_token.is_some(),
                    "log_file": config.log_file
                })
            );
        }
        OutputFormat::Quiet => {
            println!("{}", config.data_dir.display());
        }
        OutputFormat::Human => {
            let effective_path = config_path
                .cloned()
                .unwrap_or_else(Config::config_file_path);
            println!("Configuration:");
            println!("  data_dir:        {}", config.data_dir.display());
            println!(
                "  store_url:       {}",
                config
                    .store_url
                    .as_deref()
                    .unwrap_or("(not set, using local database)")
            );
            println!("  app_id:          {}", config.app_id);
            println!(
                "  bootstrap_token: {}",
                if config.bootstrap_token.is_some() {
                    "(set)"
                } else {
                    "(not set)"
                }
            );
            println!(
                "  log_file:        {}",
                config
                    .log_file
                    .as_ref()
                    .map(|p| p.display().to_string())
                    .unwrap_or_else(|| "(not set)".to_string())
            );
            println!();
            println!("Config file: {}", effective_path.display());
        }
    }

    Ok(())
}

/// Set a configuration value
pub fn set(
    key: String,
    value: String,
    config_path: Option<&PathBuf>,
    output: &Output,
) -> Result<()> {
    let mut config =
        Config::load_with_cli_override(config_path).context("Failed to load configuration")?;

    apply(&mut config, &key, &value)?;

    // Save to the CLI-specified path or default
    let save_path = config_path
        .cloned()
        .unwrap_or_else(Config::config_file_path);
    config
        .save_to_path(&save_path)
        .context("Failed to save configuration")?;

    if key == "bootstrap_token" {
        output.success("Set bootstrap_token");
    } else {
        output.success(&format!("Set {} = {}", key, value));
    }

    Ok(())
}

/// Update one field of `config`
fn apply(config: &mut Config, key: &str, value: &str) -> Result<()> {
    match key {
        "data_dir" => {
            config.data_dir = value.into();
        }
        "store_url" => {
            config.store_url = optional(value);
        }
        "app_id" => {
            if value.trim().is_empty() {
                bail!("app_id cannot be empty");
            }
            config.app_id = value.to_string();
        }
        "bootstrap_token" => {
            config.bootstrap_token = optional(value);
        }
        "log_file" => {
            config.log_file = optional(value).map(PathBuf::from);
        }
        _ => {
            bail!(
                "Unknown configuration key: '{}'\n\
                 Valid keys: data_dir, store_url, app_id, bootstrap_token, log_file",
                key
            );
        }
    }
    Ok(())
}

/// Empty or "none" clears an optional value
fn optional(value: &str) -> Option<String> {
    if value.is_empty() || value == "none" {
        None
    } else {
        Some(value.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_apply_known_keys() {
        let mut config = Config::default();

        apply(&mut config, "store_url", "ws://localhost:4040").unwrap();
        assert_eq!(config.store_url.as_deref(), Some("ws://localhost:4040"));

        apply(&mut config, "store_url", "none").unwrap();
        assert!(config.store_url.is_none());

        apply(&mut config, "app_id", "ramadan").unwrap();
        assert_eq!(config.app_id, "ramadan");

        apply(&mut config, "log_file", "/tmp/pagelog.log").unwrap();
        assert_eq!(config.log_file, Some(PathBuf::from("/tmp/pagelog.log")));
    }

    #[test]
    fn test_apply_rejects_bad_input() {
        let mut config = Config::default();
        assert!(apply(&mut config, "sync_url", "x").is_err());
        assert!(apply(&mut config, "app_id", "  ").is_err());
        assert_eq!(config.app_id, "default");
    }

    #[test]
    fn test_set_writes_config_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.toml");
        let data_dir = temp_dir.path().join("data");
        let output = Output::new(OutputFormat::Quiet);

        Config {
            data_dir: data_dir.clone(),
            ..Config::default()
        }
        .save_to_path(&path)
        .unwrap();

        set(
            "app_id".to_string(),
            "study-group".to_string(),
            Some(&path),
            &output,
        )
        .unwrap();

        let loaded = Config::load_from_path(&path).unwrap();
        assert_eq!(loaded.app_id, "study-group");
        assert_eq!(loaded.data_dir, data_dir);
        assert!(data_dir.exists());
    }
}
