//! Trait definition and types for metadata providers.
//!
//! This module defines the [`Provider`] trait that every metadata backend
//! (TMDB, an offline catalogue, ...) implements, the static
//! [`ProviderDescriptor`] that tells the engine what a provider can do, and
//! the request/response types exchanged with it.

use std::collections::{BTreeMap, BTreeSet};

use async_trait::async_trait;
use regex::Regex;
use reelscrape_common::{CanonicalId, ChildKey, Field, Locale, MediaKind, ProviderName, Value};
use serde::{Deserialize, Serialize};

use super::classify::ProviderError;

// ---------------------------------------------------------------------------
// Capability descriptor
// ---------------------------------------------------------------------------

/// Token-bucket parameters for a provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitPolicy {
    /// Sustained number of calls per second.
    pub requests_per_second: u32,
    /// Number of calls that may be made back to back.
    pub burst: u32,
}

impl Default for RateLimitPolicy {
    fn default() -> Self {
        Self {
            requests_per_second: 4,
            burst: 4,
        }
    }
}

/// Recognises provider ids typed into a search box (e.g. `tt0133093`).
#[derive(Debug, Clone)]
pub struct IdFormat {
    namespace: ProviderName,
    pattern: Regex,
}

impl IdFormat {
    /// Ids matching `pattern` (anchored by the caller) belong to `namespace`.
    pub fn new(namespace: impl Into<ProviderName>, pattern: &str) -> Result<Self, regex::Error> {
        Ok(Self {
            namespace: namespace.into(),
            pattern: Regex::new(pattern)?,
        })
    }

    /// Returns the canonical id if `query` is an id in this format.
    pub fn recognize(&self, query: &str) -> Option<CanonicalId> {
        let query = query.trim();
        self.pattern
            .is_match(query)
            .then(|| CanonicalId::new(self.namespace.clone(), query))
    }
}

/// Static description of what a provider supports.
#[derive(Debug, Clone)]
pub struct ProviderDescriptor {
    /// Registry key, e.g. `"tmdb"`.
    pub name: ProviderName,
    /// Human-readable name, e.g. `"The Movie Database"`.
    pub display_name: String,
    /// Fields the provider can supply, per media kind.
    pub capabilities: BTreeMap<MediaKind, BTreeSet<Field>>,
    /// Token-bucket parameters.
    pub rate_limit: RateLimitPolicy,
    /// Provider whose id this provider needs before it can fetch anything.
    pub requires_id_from: Option<ProviderName>,
    /// Locale used when the requested one is not supported.
    pub default_locale: Locale,
    /// Locales the provider can answer in. Empty means "any".
    pub supported_locales: Vec<Locale>,
    /// Formats of ids that can be looked up directly instead of searched.
    pub id_formats: Vec<IdFormat>,
}

impl ProviderDescriptor {
    /// A descriptor with no capabilities and default limits.
    pub fn new(name: impl Into<ProviderName>, display_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            display_name: display_name.into(),
            capabilities: BTreeMap::new(),
            rate_limit: RateLimitPolicy::default(),
            requires_id_from: None,
            default_locale: Locale::english(),
            supported_locales: Vec::new(),
            id_formats: Vec::new(),
        }
    }

    /// Builder: declare the fields supplied for a media kind.
    pub fn with_kind(mut self, kind: MediaKind, fields: impl IntoIterator<Item = Field>) -> Self {
        self.capabilities
            .entry(kind)
            .or_default()
            .extend(fields);
        self
    }

    /// Builder: set the rate-limit policy.
    pub fn with_rate_limit(mut self, rate_limit: RateLimitPolicy) -> Self {
        self.rate_limit = rate_limit;
        self
    }

    /// Builder: require an id from another provider first.
    pub fn requires_id_from(mut self, provider: impl Into<ProviderName>) -> Self {
        self.requires_id_from = Some(provider.into());
        self
    }

    /// Builder: set default and supported locales.
    pub fn with_locales(mut self, default: Locale, supported: Vec<Locale>) -> Self {
        self.default_locale = default;
        self.supported_locales = supported;
        self
    }

    /// Builder: add a directly-searchable id format.
    pub fn with_id_format(mut self, format: IdFormat) -> Self {
        self.id_formats.push(format);
        self
    }

    /// Returns `true` if the provider handles `kind` at all.
    pub fn supports_kind(&self, kind: MediaKind) -> bool {
        self.capabilities.contains_key(&kind)
    }

    /// Returns `true` if the provider can supply `field` for `kind`.
    pub fn supports_field(&self, kind: MediaKind, field: Field) -> bool {
        self.capabilities
            .get(&kind)
            .is_some_and(|fields| fields.contains(&field))
    }

    /// All fields supplied for `kind`.
    pub fn supported_fields(&self, kind: MediaKind) -> BTreeSet<Field> {
        self.capabilities.get(&kind).cloned().unwrap_or_default()
    }

    /// Pick the locale to query in.
    ///
    /// The requested locale is used when supported; otherwise a supported
    /// locale with the same language, otherwise the provider default.
    pub fn resolve_locale(&self, requested: &Locale) -> Locale {
        if self.supported_locales.is_empty() || self.supported_locales.contains(requested) {
            return requested.clone();
        }
        self.supported_locales
            .iter()
            .find(|locale| locale.language() == requested.language())
            .cloned()
            .unwrap_or_else(|| self.default_locale.clone())
    }

    /// Returns the canonical id if `query` is an id this provider can look up.
    pub fn recognize_id(&self, query: &str) -> Option<CanonicalId> {
        self.id_formats
            .iter()
            .find_map(|format| format.recognize(query))
    }
}

// ---------------------------------------------------------------------------
// Requests and responses
// ---------------------------------------------------------------------------

/// What to search for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum SearchTerm {
    /// Free-text title query.
    Text(String),
    /// Direct lookup of a known id.
    Id(CanonicalId),
}

/// A search request sent to one provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchQuery {
    /// Kind of entity to search for.
    pub kind: MediaKind,
    /// Title or id.
    pub term: SearchTerm,
    /// Release or premiere year, if known.
    pub year: Option<u16>,
    /// Locale to answer in.
    pub locale: Locale,
}

/// A single candidate returned from a search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    /// Canonical id of the candidate.
    pub id: CanonicalId,
    /// Display title.
    pub title: String,
    /// Release or premiere year, if known.
    pub year: Option<u16>,
    /// Short synopsis, if the provider includes one in search results.
    pub overview: Option<String>,
    /// Provider-reported confidence (0.0 - 1.0), if any.
    pub confidence: f64,
    /// Position in the provider's own ranking, 0 being the best match.
    pub rank: usize,
}

/// The entity a fetch addresses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ScrapeTarget {
    /// An entity addressed by its own id.
    Entity { id: CanonicalId },
    /// A season, episode or album addressed through its parent's id.
    Child { parent: CanonicalId, key: ChildKey },
}

impl ScrapeTarget {
    /// The id the provider will be called with.
    pub fn anchor_id(&self) -> &CanonicalId {
        match self {
            Self::Entity { id } => id,
            Self::Child { parent, .. } => parent,
        }
    }
}

/// A fetch request sent to one provider. Immutable once the job starts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScrapeRequest {
    /// Kind of entity to fetch.
    pub kind: MediaKind,
    /// Which entity.
    pub target: ScrapeTarget,
    /// Locale to answer in.
    pub locale: Locale,
    /// Fields the caller wants. May be empty when the fetch only serves to
    /// discover ids.
    pub fields: BTreeSet<Field>,
}

/// What a provider returns from a fetch.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FetchedEntity {
    /// The entity's id in this provider's namespace plus any cross-reference
    /// ids the provider knows (e.g. the IMDb id of a TMDB movie).
    pub ids: Vec<CanonicalId>,
    /// Field values. May contain fields that were not requested; the engine
    /// drops those.
    pub fields: BTreeMap<Field, Value>,
}

// ---------------------------------------------------------------------------
// Provider trait
// ---------------------------------------------------------------------------

/// Async trait that all metadata providers must implement.
///
/// Each provider wraps a single external source and exposes a uniform
/// interface for searching and fetching. Rate limiting, deadlines and retries
/// are applied by the engine around these calls, so implementations should
/// perform exactly one logical request per call and report failures as
/// [`ProviderError`].
///
/// Providers are shared across tasks behind an `Arc`.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Static capabilities of this provider.
    fn descriptor(&self) -> &ProviderDescriptor;

    /// Shortcut for `self.descriptor().name`.
    fn name(&self) -> &ProviderName {
        &self.descriptor().name
    }

    /// Returns `true` when the provider has been configured with valid
    /// credentials and is ready to serve requests.
    fn is_available(&self) -> bool {
        true
    }

    /// Search for candidates. Results are ordered by the provider's own
    /// relevance ranking.
    async fn search(&self, query: &SearchQuery) -> Result<Vec<SearchResult>, ProviderError>;

    /// Fetch full metadata for one entity.
    async fn fetch(&self, request: &ScrapeRequest) -> Result<FetchedEntity, ProviderError>;
}
