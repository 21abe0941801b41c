use colored::Colorize;

use crate::cli::{Cli, ConfigCommands};
use crate::config::Config;
use crate::error::{LivememoError, Result};

pub async fn run(cli: &Cli, command: &ConfigCommands) -> Result<()> {
    match command {
        ConfigCommands::Show => show(cli).await,
        ConfigCommands::Set { key, value } => set(cli, key, value).await,
        ConfigCommands::Get { key } => get(cli, key).await,
        ConfigCommands::Path => path(cli).await,
    }
}

async fn show(cli: &Cli) -> Result<()> {
    let config = Config::load()?;

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&config)?);
    } else {
        let toml_str = toml::to_string_pretty(&config)
            .map_err(|e| LivememoError::ConfigError(e.to_string()))?;
        println!("{}", toml_str);
    }

    Ok(())
}

fn parse<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| LivememoError::ConfigError(format!("Invalid value for {}: {}", key, value)))
}

fn unknown_key(key: &str) -> LivememoError {
    LivememoError::ConfigError(format!("Unknown config key: {}", key))
}

/// Empty string unsets an optional value.
fn optional(value: &str) -> Option<String> {
    let value = value.trim();
    (!value.is_empty()).then(|| value.to_string())
}

pub(crate) fn apply(config: &mut Config, key: &str, value: &str) -> Result<()> {
    match key {
        "storage.path" => config.storage.path = optional(value),
        "bridge.port" => config.bridge.port = parse(key, value)?,
        "locator.timeout_ms" => config.locator.timeout_ms = parse(key, value)?,
        "locator.frame_interval_ms" => config.locator.frame_interval_ms = parse(key, value)?,
        "locator.live_keyword" => config.locator.profile.live_keyword = value.to_string(),
        "locator.class_selector" => config.locator.profile.class_selector = value.to_string(),
        "hotkey.key" => {
            if value.trim().chars().count() != 1 {
                return Err(LivememoError::ConfigError(
                    "hotkey.key must be a single key".to_string(),
                ));
            }
            config.hotkey.key = value.trim().to_lowercase();
        }
        "hotkey.poll_ms" => config.hotkey.poll_ms = parse(key, value)?,
        "cdp.port" => config.cdp.port = parse(key, value)?,
        "cdp.url_filter" => config.cdp.url_filter = optional(value),
        _ => return Err(unknown_key(key)),
    }
    Ok(())
}

pub(crate) fn lookup(config: &Config, key: &str) -> Result<Option<String>> {
    let value = match key {
        "storage.path" => config.storage.path.clone(),
        "bridge.port" => Some(config.bridge.port.to_string()),
        "locator.timeout_ms" => Some(config.locator.timeout_ms.to_string()),
        "locator.frame_interval_ms" => Some(config.locator.frame_interval_ms.to_string()),
        "locator.live_keyword" => Some(config.locator.profile.live_keyword.clone()),
        "locator.class_selector" => Some(config.locator.profile.class_selector.clone()),
        "hotkey.key" => Some(config.hotkey.key.clone()),
        "hotkey.poll_ms" => Some(config.hotkey.poll_ms.to_string()),
        "cdp.port" => Some(config.cdp.port.to_string()),
        "cdp.url_filter" => config.cdp.url_filter.clone(),
        _ => return Err(unknown_key(key)),
    };
    Ok(value)
}

async fn set(cli: &Cli, key: &str, value: &str) -> Result<()> {
    let mut config = Config::load()?;
    apply(&mut config, key, value)?;
    config.save()?;

    if cli.json {
        println!("{}", serde_json::json!({ "key": key, "value": value }));
    } else {
        println!("{} Set {} = {}", "✓".green(), key, value);
    }

    Ok(())
}

async fn get(cli: &Cli, key: &str) -> Result<()> {
    let config = Config::load()?;
    let value = lookup(&config, key)?;

    if cli.json {
        println!(
            "{}",
            serde_json::json!({
                "key": key,
                "value": value
            })
        );
    } else {
        match value {
            Some(v) => println!("{}", v),
            None => println!("{}", "(not set)".dimmed()),
        }
    }

    Ok(())
}

async fn path(cli: &Cli) -> Result<()> {
    let path = Config::config_path();

    if cli.json {
        println!(
            "{}",
            serde_json::json!({
                "path": path.display().to_string()
            })
        );
    } else {
        println!("{}", path.display());
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_then_get_round_trips_known_keys() {
        let mut config = Config::default();
        apply(&mut config, "locator.timeout_ms", "2500").unwrap();
        apply(&mut config, "hotkey.key", "M").unwrap();
        apply(&mut config, "cdp.url_filter", "").unwrap();

        assert_eq!(lookup(&config, "locator.timeout_ms").unwrap().as_deref(), Some("2500"));
        assert_eq!(lookup(&config, "hotkey.key").unwrap().as_deref(), Some("m"));
        assert_eq!(lookup(&config, "cdp.url_filter").unwrap(), None);
    }

    #[test]
    fn rejects_bad_values_and_unknown_keys() {
        let mut config = Config::default();
        assert!(apply(&mut config, "bridge.port", "not-a-port").is_err());
        assert!(apply(&mut config, "hotkey.key", "pp").is_err());
        assert!(apply(&mut config, "api.base_url", "x").is_err());
        assert!(lookup(&config, "browser.headless").is_err());
        assert_eq!(config.bridge.port, 19224);
    }
}
