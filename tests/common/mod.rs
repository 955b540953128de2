//! Shared test harness for integration tests.
//!
//! Provides [`FnProvider`], a provider whose answers come from closures and
//! which counts calls, tracks concurrency and can be held at a gate, plus
//! helpers to build registries, coordinators and drain batch events.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Semaphore;

use reelscrape::scrape::{
    BatchCoordinator, BatchEvent, BatchHandle, BatchSummary, EngineConfig, FetchedEntity,
    ItemResult, Provider, ProviderDescriptor, ProviderError, ProviderRegistry, RateLimitPolicy,
    ScrapeRequest, SearchQuery, SearchResult,
};
use reelscrape_common::{CanonicalId, Field, MediaKind};

type SearchFn = dyn Fn(&SearchQuery) -> Result<Vec<SearchResult>, ProviderError> + Send + Sync;
type FetchFn = dyn Fn(&ScrapeRequest) -> Result<FetchedEntity, ProviderError> + Send + Sync;

/// A provider scripted with closures.
pub struct FnProvider {
    descriptor: ProviderDescriptor,
    search: Box<SearchFn>,
    fetch: Box<FetchFn>,
    gate: Option<Arc<Semaphore>>,
    delay: Option<Duration>,
    pub searches: AtomicUsize,
    pub fetches: AtomicUsize,
    in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
}

impl FnProvider {
    /// A provider that finds nothing and fetches empty entities.
    pub fn new(descriptor: ProviderDescriptor) -> Self {
        Self {
            descriptor,
            search: Box::new(|_| Ok(Vec::new())),
            fetch: Box::new(|_| Ok(FetchedEntity::default())),
            gate: None,
            delay: None,
            searches: AtomicUsize::new(0),
            fetches: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    pub fn on_search(
        mut self,
        f: impl Fn(&SearchQuery) -> Result<Vec<SearchResult>, ProviderError> + Send + Sync + 'static,
    ) -> Self {
        self.search = Box::new(f);
        self
    }

    pub fn on_fetch(
        mut self,
        f: impl Fn(&ScrapeRequest) -> Result<FetchedEntity, ProviderError> + Send + Sync + 'static,
    ) -> Self {
        self.fetch = Box::new(f);
        self
    }

    /// Every call waits for (and consumes) one permit of `gate`.
    pub fn gated(mut self, gate: Arc<Semaphore>) -> Self {
        self.gate = Some(gate);
        self
    }

    /// Every call sleeps for `delay` before answering.
    pub fn delayed(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> usize {
        self.searches.load(Ordering::SeqCst) + self.fetches.load(Ordering::SeqCst)
    }

    async fn enter(&self) {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        if let Some(gate) = &self.gate {
            gate.acquire().await.unwrap().forget();
        }
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
    }

    fn leave(&self) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl Provider for FnProvider {
    fn descriptor(&self) -> &ProviderDescriptor {
        &self.descriptor
    }

    async fn search(&self, query: &SearchQuery) -> Result<Vec<SearchResult>, ProviderError> {
        self.searches.fetch_add(1, Ordering::SeqCst);
        self.enter().await;
        let result = (self.search)(query);
        self.leave();
        result
    }

    async fn fetch(&self, request: &ScrapeRequest) -> Result<FetchedEntity, ProviderError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        self.enter().await;
        let result = (self.fetch)(request);
        self.leave();
        result
    }
}

/// A descriptor supporting `fields` for `kinds` with a generous rate limit.
pub fn descriptor(name: &str, kinds: &[MediaKind], fields: &[Field]) -> ProviderDescriptor {
    kinds
        .iter()
        .fold(ProviderDescriptor::new(name, name.to_uppercase()), |d, kind| {
            d.with_kind(*kind, fields.iter().copied())
        })
        .with_rate_limit(RateLimitPolicy {
            requests_per_second: 1000,
            burst: 1000,
        })
}

/// One search hit.
pub fn hit(id: CanonicalId, title: &str, year: Option<u16>) -> SearchResult {
    SearchResult {
        id,
        title: title.to_string(),
        year,
        overview: None,
        confidence: 1.0,
        rank: 0,
    }
}

/// Upcast a provider for registration while keeping a typed handle.
pub fn shared<P: Provider + 'static>(provider: &Arc<P>) -> Arc<dyn Provider> {
    provider.clone()
}

pub fn registry(providers: Vec<Arc<dyn Provider>>) -> Arc<ProviderRegistry> {
    let mut registry = ProviderRegistry::new();
    for provider in providers {
        registry.register(provider);
    }
    Arc::new(registry)
}

pub fn coordinator(registry: Arc<ProviderRegistry>, max_concurrent_jobs: usize) -> BatchCoordinator {
    BatchCoordinator::new(
        registry,
        EngineConfig {
            max_concurrent_jobs,
            request_timeout: Duration::from_secs(5),
            ..EngineConfig::default()
        },
    )
}

/// Drain a batch: every event up to and including the summary.
pub async fn drain(mut handle: BatchHandle) -> (Vec<BatchEvent>, BatchSummary) {
    let mut events = Vec::new();
    while let Some(event) = handle.next_event().await {
        if let BatchEvent::Finished(summary) = &event {
            let summary = summary.clone();
            events.push(event);
            return (events, summary);
        }
        events.push(event);
    }
    panic!("batch ended without a summary");
}

/// The item results among `events`, in delivery order.
pub fn results(events: &[BatchEvent]) -> Vec<&ItemResult> {
    events
        .iter()
        .filter_map(|event| match event {
            BatchEvent::ItemFinished(result) => Some(result),
            _ => None,
        })
        .collect()
}
