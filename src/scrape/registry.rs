//! Provider registry keyed by provider name.
//!
//! The [`ProviderRegistry`] is built once at startup and shared with the batch
//! coordinator behind an `Arc`. Besides name lookups it offers interactive
//! searches against a single provider.

use std::sync::Arc;

use reelscrape_common::ProviderName;

use super::classify::{classify, ScrapeError};
use super::provider::{Provider, ProviderDescriptor, SearchQuery, SearchResult, SearchTerm};

/// A registry that manages multiple [`Provider`] implementations.
///
/// Providers are kept in registration order; registering a second provider
/// under an existing name replaces the first.
#[derive(Default)]
pub struct ProviderRegistry {
    providers: Vec<Arc<dyn Provider>>,
}

impl ProviderRegistry {
    /// Create an empty registry with no providers.
    pub fn new() -> Self {
        Self {
            providers: Vec::new(),
        }
    }

    /// Register a provider. Returns the provider it replaced, if any.
    pub fn register(&mut self, provider: Arc<dyn Provider>) -> Option<Arc<dyn Provider>> {
        let name = provider.name().clone();
        match self.providers.iter().position(|p| p.name() == &name) {
            Some(pos) => Some(std::mem::replace(&mut self.providers[pos], provider)),
            None => {
                self.providers.push(provider);
                None
            }
        }
    }

    /// Look up a provider by name.
    pub fn get(&self, name: &str) -> Option<&Arc<dyn Provider>> {
        self.providers.iter().find(|p| p.name() == name)
    }

    /// Look up a provider's descriptor by name.
    pub fn descriptor(&self, name: &str) -> Option<&ProviderDescriptor> {
        self.get(name).map(|p| p.descriptor())
    }

    /// Every registered provider, in registration order.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn Provider>> {
        self.providers.iter()
    }

    /// Names of every registered provider, in registration order.
    pub fn names(&self) -> Vec<ProviderName> {
        self.providers.iter().map(|p| p.name().clone()).collect()
    }

    /// Number of registered providers.
    pub fn len(&self) -> usize {
        self.providers.len()
    }

    /// Returns `true` if no provider is registered.
    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    /// Run one search against a single provider.
    ///
    /// This bypasses the batch machinery (no rate limiting, no deadline) and
    /// is meant for interactive lookups. Ranks are renumbered in the order the
    /// provider returned the results. No hit is `NotFound`, and an id lookup
    /// yields exactly one result.
    pub async fn search(
        &self,
        provider: &str,
        query: &SearchQuery,
    ) -> Result<Vec<SearchResult>, ScrapeError> {
        let Some(p) = self.get(provider) else {
            return Err(ScrapeError::invalid_config(format!(
                "unknown provider '{provider}'"
            )));
        };
        if !p.descriptor().supports_kind(query.kind) {
            return Err(ScrapeError::invalid_config(format!(
                "provider '{provider}' does not support {}",
                query.kind
            )));
        }

        let mut results = p
            .search(query)
            .await
            .map_err(|e| classify(p.name(), e))?;
        if results.is_empty() {
            return Err(ScrapeError::not_found(p.name(), format!("no {} matches", query.kind)));
        }
        if matches!(query.term, SearchTerm::Id(_)) {
            results.truncate(1);
        }
        for (rank, result) in results.iter_mut().enumerate() {
            result.rank = rank;
        }
        Ok(results)
    }
}

impl std::fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderRegistry")
            .field("providers", &self.names())
            .finish()
    }
}
