mod types;

pub use types::*;

use anyhow::{Context, Result};
use reelscrape_common::{Field, Locale, MediaKind};
use std::path::Path;

use crate::scrape::providers::TMDB;

/// Load configuration from a TOML file
pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {:?}", path))?;

    parse_config(&content).with_context(|| format!("Invalid config file: {:?}", path))
}

/// Parse and validate configuration from TOML text
pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).context("Failed to parse config")?;
    validate_config(&config)?;
    Ok(config)
}

/// Load config from default locations or return default config
pub fn load_config_or_default(custom_path: Option<&Path>) -> Result<Config> {
    if let Some(path) = custom_path {
        return load_config(path);
    }

    let default_paths = ["./reelscrape.toml", "~/.config/reelscrape/config.toml"];

    for path_str in default_paths {
        let path = shellexpand::tilde(path_str);
        let path = Path::new(path.as_ref());
        if path.exists() {
            tracing::debug!("Using config file {:?}", path);
            return load_config(path);
        }
    }

    Ok(Config::default())
}

/// Validate configuration
pub fn validate_config(config: &Config) -> Result<()> {
    if config.engine.max_concurrent_jobs == 0 {
        anyhow::bail!("engine.max_concurrent_jobs cannot be 0");
    }
    if config.engine.request_timeout_secs == 0 {
        anyhow::bail!("engine.request_timeout_secs cannot be 0");
    }
    if config.engine.default_locale.parse::<Locale>().is_err() {
        tracing::warn!(
            "Unknown default locale '{}', using en-US",
            config.engine.default_locale
        );
    }

    for (name, provider) in &config.providers {
        if !provider.enabled {
            continue;
        }
        if name == TMDB && provider.api_key.as_deref().map_or(true, str::is_empty) {
            anyhow::bail!("Provider '{}' is enabled but has no API key", name);
        }
        if provider.requests_per_second == Some(0) {
            anyhow::bail!("Provider '{}' has requests_per_second = 0", name);
        }
        if let Some(tag) = &provider.locale {
            if tag.parse::<Locale>().is_err() {
                tracing::warn!("Provider '{}' has unknown locale '{}'", name, tag);
            }
        }
    }

    for (kind, fields) in &config.custom_scraper {
        kind.parse::<MediaKind>()
            .with_context(|| format!("custom_scraper.{kind}: unknown media kind"))?;
        for (field, provider) in fields {
            field
                .parse::<Field>()
                .with_context(|| format!("custom_scraper.{kind}.{field}: unknown field"))?;
            if provider.trim().is_empty() {
                anyhow::bail!("custom_scraper.{kind}.{field} names no provider");
            }
        }
    }

    Ok(())
}
