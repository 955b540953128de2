use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use reelscrape_common::{Field, Locale, MediaKind, ProviderName};
use serde::{Deserialize, Serialize};

use crate::scrape::{EngineConfig, MergeConfig, RateLimitPolicy};

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub engine: EngineSettings,

    /// Per-provider settings keyed by provider name (`[providers.tmdb]`).
    #[serde(default)]
    pub providers: BTreeMap<String, ProviderSettings>,

    /// Field routing per media kind (`[custom_scraper.movie]`), mapping
    /// field names to provider names.
    #[serde(default)]
    pub custom_scraper: BTreeMap<String, BTreeMap<String, String>>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EngineSettings {
    /// Maximum provider calls in flight across a batch
    #[serde(default = "default_max_concurrent_jobs")]
    pub max_concurrent_jobs: usize,

    /// Deadline of one provider call, in seconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    #[serde(default = "default_locale")]
    pub default_locale: String,
}

fn default_max_concurrent_jobs() -> usize {
    4
}

fn default_request_timeout() -> u64 {
    30
}

fn default_locale() -> String {
    "en-US".to_string()
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            max_concurrent_jobs: default_max_concurrent_jobs(),
            request_timeout_secs: default_request_timeout(),
            default_locale: default_locale(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProviderSettings {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default)]
    pub api_key: Option<String>,

    /// Locale the provider is queried in
    #[serde(default)]
    pub locale: Option<String>,

    /// Alternative API root (proxies, test servers)
    #[serde(default)]
    pub base_url: Option<String>,

    #[serde(default)]
    pub requests_per_second: Option<u32>,

    #[serde(default)]
    pub burst: Option<u32>,
}

fn default_true() -> bool {
    true
}

impl Default for ProviderSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            api_key: None,
            locale: None,
            base_url: None,
            requests_per_second: None,
            burst: None,
        }
    }
}

impl ProviderSettings {
    /// The rate-limit override, if either knob is set.
    pub fn rate_limit(&self) -> Option<RateLimitPolicy> {
        if self.requests_per_second.is_none() && self.burst.is_none() {
            return None;
        }
        let rps = self
            .requests_per_second
            .unwrap_or(RateLimitPolicy::default().requests_per_second);
        Some(RateLimitPolicy {
            requests_per_second: rps,
            burst: self.burst.unwrap_or(rps),
        })
    }

    /// Parsed locale; `None` when unset or not a valid tag.
    pub fn locale(&self) -> Option<Locale> {
        self.locale.as_deref().and_then(|tag| tag.parse().ok())
    }
}

impl Config {
    /// Settings of an enabled provider.
    pub fn provider(&self, name: &str) -> Option<&ProviderSettings> {
        self.providers.get(name).filter(|p| p.enabled)
    }

    /// Engine default locale, falling back to `en-US` for invalid tags.
    pub fn default_locale(&self) -> Locale {
        self.engine.default_locale.parse().unwrap_or_default()
    }

    /// Engine limits and rate-limit overrides.
    pub fn engine_config(&self) -> EngineConfig {
        let rate_limits: HashMap<ProviderName, RateLimitPolicy> = self
            .providers
            .iter()
            .filter(|(_, settings)| settings.enabled)
            .filter_map(|(name, settings)| {
                settings
                    .rate_limit()
                    .map(|policy| (ProviderName::from(name.as_str()), policy))
            })
            .collect();

        EngineConfig {
            max_concurrent_jobs: self.engine.max_concurrent_jobs,
            request_timeout: Duration::from_secs(self.engine.request_timeout_secs),
            default_locale: self.default_locale(),
            rate_limits,
        }
    }

    /// The `[custom_scraper]` tables as a merge configuration, with the
    /// per-provider locales attached. Entries that do not parse are skipped;
    /// validation reports them when the file is loaded.
    pub fn merge_config(&self) -> MergeConfig {
        let mut merge = MergeConfig::new();
        for (kind, fields) in &self.custom_scraper {
            let Ok(kind) = kind.parse::<MediaKind>() else {
                continue;
            };
            for (field, provider) in fields {
                if let Ok(field) = field.parse::<Field>() {
                    merge = merge.assign(kind, field, provider.as_str());
                }
            }
        }
        for (name, settings) in &self.providers {
            if let Some(locale) = settings.locale().filter(|_| settings.enabled) {
                merge = merge.with_locale(name.as_str(), locale);
            }
        }
        merge
    }

    /// Returns `true` when at least one custom scraper table is configured.
    pub fn has_custom_scraper(&self) -> bool {
        self.custom_scraper.values().any(|fields| !fields.is_empty())
    }
}
