//! In-memory provider driven by a catalogue of entries.
//!
//! A [`StaticProvider`] answers searches and fetches from a fixed list of
//! [`StaticEntry`] values. Catalogues are loaded from JSON for offline CLI
//! runs (`--fixtures`) and built in code by the test suites.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use reelscrape_common::{CanonicalId, ChildKey, Field, Locale, MediaKind, ProviderName, Value};
use serde::Deserialize;
use tracing::debug;

use crate::scrape::classify::{ProviderError, ScrapeError};
use crate::scrape::provider::{
    FetchedEntity, IdFormat, Provider, ProviderDescriptor, RateLimitPolicy, ScrapeRequest,
    ScrapeTarget, SearchQuery, SearchResult, SearchTerm,
};

// ---------------------------------------------------------------------------
// Catalogue format
// ---------------------------------------------------------------------------

/// One entity known to a [`StaticProvider`].
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct StaticEntry {
    pub kind: MediaKind,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub year: Option<u16>,
    /// Ids of the entity, in any namespace.
    #[serde(default)]
    pub ids: Vec<CanonicalId>,
    /// Id of the parent entity, for seasons, episodes and albums.
    #[serde(default)]
    pub parent: Option<CanonicalId>,
    #[serde(default)]
    pub child_key: Option<ChildKey>,
    #[serde(default)]
    pub fields: BTreeMap<Field, Value>,
}

impl StaticEntry {
    pub fn new(kind: MediaKind, title: impl Into<String>) -> Self {
        Self {
            kind,
            title: title.into(),
            year: None,
            ids: Vec::new(),
            parent: None,
            child_key: None,
            fields: BTreeMap::new(),
        }
    }

    pub fn with_year(mut self, year: u16) -> Self {
        self.year = Some(year);
        self
    }

    pub fn with_id(mut self, id: CanonicalId) -> Self {
        self.ids.push(id);
        self
    }

    /// Builder: place the entry below a parent entity.
    pub fn child_of(mut self, parent: CanonicalId, key: ChildKey) -> Self {
        self.parent = Some(parent);
        self.child_key = Some(key);
        self
    }

    pub fn with_field(mut self, field: Field, value: impl Into<Value>) -> Self {
        self.fields.insert(field, value.into());
        self
    }

    fn matches_target(&self, kind: MediaKind, target: &ScrapeTarget) -> bool {
        if self.kind != kind {
            return false;
        }
        match target {
            ScrapeTarget::Entity { id } => self.ids.contains(id),
            ScrapeTarget::Child { parent, key } => {
                self.parent.as_ref() == Some(parent) && self.child_key.as_ref() == Some(key)
            }
        }
    }
}

#[derive(Debug, Deserialize)]
struct IdFormatSpec {
    namespace: ProviderName,
    pattern: String,
}

/// JSON description of one static provider.
#[derive(Debug, Deserialize)]
pub struct StaticProviderSpec {
    pub name: ProviderName,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub capabilities: BTreeMap<MediaKind, BTreeSet<Field>>,
    #[serde(default)]
    pub rate_limit: Option<RateLimitPolicy>,
    #[serde(default)]
    pub requires_id_from: Option<ProviderName>,
    #[serde(default)]
    pub default_locale: Option<Locale>,
    #[serde(default)]
    pub supported_locales: Vec<Locale>,
    #[serde(default)]
    id_formats: Vec<IdFormatSpec>,
    #[serde(default)]
    pub entries: Vec<StaticEntry>,
}

/// A fixtures file: a list of static providers.
#[derive(Debug, Deserialize)]
pub struct StaticCatalogue {
    pub providers: Vec<StaticProviderSpec>,
}

impl StaticCatalogue {
    /// Parse a catalogue from JSON.
    pub fn from_json(json: &str) -> Result<Self, ScrapeError> {
        serde_json::from_str(json)
            .map_err(|e| ScrapeError::invalid_config(format!("invalid fixtures: {e}")))
    }

    /// Build every provider of the catalogue.
    pub fn into_providers(self) -> Result<Vec<StaticProvider>, ScrapeError> {
        self.providers
            .into_iter()
            .map(StaticProvider::from_spec)
            .collect()
    }
}

// ---------------------------------------------------------------------------
// StaticProvider
// ---------------------------------------------------------------------------

/// A provider answering from a fixed catalogue.
pub struct StaticProvider {
    descriptor: ProviderDescriptor,
    entries: Vec<StaticEntry>,
    available: bool,
    calls: AtomicUsize,
}

impl StaticProvider {
    pub fn new(descriptor: ProviderDescriptor) -> Self {
        Self {
            descriptor,
            entries: Vec::new(),
            available: true,
            calls: AtomicUsize::new(0),
        }
    }

    /// Build a provider from its JSON description.
    pub fn from_spec(spec: StaticProviderSpec) -> Result<Self, ScrapeError> {
        let display = spec
            .display_name
            .unwrap_or_else(|| spec.name.as_str().to_string());
        let mut descriptor = ProviderDescriptor::new(spec.name.clone(), display);
        for (kind, fields) in spec.capabilities {
            descriptor = descriptor.with_kind(kind, fields);
        }
        if let Some(policy) = spec.rate_limit {
            descriptor = descriptor.with_rate_limit(policy);
        }
        if let Some(required) = spec.requires_id_from {
            descriptor = descriptor.requires_id_from(required);
        }
        descriptor = descriptor.with_locales(
            spec.default_locale.unwrap_or_default(),
            spec.supported_locales,
        );
        for format in spec.id_formats {
            let format = IdFormat::new(format.namespace, &format.pattern).map_err(|e| {
                ScrapeError::invalid_config(format!("provider {}: bad id pattern: {e}", spec.name))
            })?;
            descriptor = descriptor.with_id_format(format);
        }

        Ok(spec
            .entries
            .into_iter()
            .fold(Self::new(descriptor), Self::with_entry))
    }

    pub fn with_entry(mut self, entry: StaticEntry) -> Self {
        self.entries.push(entry);
        self
    }

    /// Builder: report the provider as not configured.
    pub fn unavailable(mut self) -> Self {
        self.available = false;
        self
    }

    /// Number of search and fetch calls received.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// The namespace this provider's search results live in.
    fn namespace(&self) -> &ProviderName {
        self.descriptor
            .requires_id_from
            .as_ref()
            .unwrap_or(&self.descriptor.name)
    }

    fn result_for(&self, entry: &StaticEntry, confidence: f64) -> Option<SearchResult> {
        let id = reelscrape_common::id_for(&entry.ids, self.namespace())
            .or_else(|| entry.ids.first())?
            .clone();
        Some(SearchResult {
            id,
            title: entry.title.clone(),
            year: entry.year,
            overview: entry
                .fields
                .get(&Field::Plot)
                .and_then(Value::as_text)
                .map(str::to_string),
            confidence,
            rank: 0,
        })
    }
}

/// Title similarity plus year agreement, in `0.0..=1.0`.
fn score(query: &str, title: &str, query_year: Option<u16>, year: Option<u16>) -> Option<f64> {
    let (query, title) = (query.trim().to_lowercase(), title.to_lowercase());
    let base = if query == title {
        0.7
    } else if title.contains(&query) {
        0.4
    } else {
        return None;
    };
    let bonus = match (query_year, year) {
        (Some(q), Some(y)) if q == y => 0.3,
        _ => 0.0,
    };
    Some(base + bonus)
}

#[async_trait]
impl Provider for StaticProvider {
    fn descriptor(&self) -> &ProviderDescriptor {
        &self.descriptor
    }

    fn is_available(&self) -> bool {
        self.available
    }

    async fn search(&self, query: &SearchQuery) -> Result<Vec<SearchResult>, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        debug!(provider = %self.descriptor.name, kind = %query.kind, "Static search");

        let candidates = self.entries.iter().filter(|e| e.kind == query.kind);
        let mut results: Vec<SearchResult> = match &query.term {
            SearchTerm::Id(id) => candidates
                .filter(|e| e.ids.contains(id))
                .filter_map(|e| self.result_for(e, 1.0))
                .collect(),
            SearchTerm::Text(text) => candidates
                .filter_map(|e| {
                    let confidence = score(text, &e.title, query.year, e.year)?;
                    self.result_for(e, confidence)
                })
                .collect(),
        };

        results.sort_by(|a, b| {
            b.confidence
                .partial_cmp(&a.confidence)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        for (rank, result) in results.iter_mut().enumerate() {
            result.rank = rank;
        }
        Ok(results)
    }

    async fn fetch(&self, request: &ScrapeRequest) -> Result<FetchedEntity, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        debug!(provider = %self.descriptor.name, kind = %request.kind, "Static fetch");

        let entry = self
            .entries
            .iter()
            .find(|e| e.matches_target(request.kind, &request.target))
            .ok_or_else(|| {
                ProviderError::NotFound(format!(
                    "no {} for {}",
                    request.kind,
                    request.target.anchor_id()
                ))
            })?;

        Ok(FetchedEntity {
            ids: entry.ids.clone(),
            fields: entry.fields.clone(),
        })
    }
}
