//! Scrape orchestration engine.
//!
//! Turns local media items into merged metadata records by searching and
//! scraping external providers, honouring per-field provider assignments,
//! provider dependencies, rate limits and a global concurrency bound.
//!
//! # Module layout
//!
//! - [`provider`] -- Provider trait, capability descriptors, search/scrape types.
//! - [`providers`] -- Concrete providers (TMDB, static catalogue).
//! - [`registry`] -- Named provider lookup.
//! - [`classify`] -- Error taxonomy and retry policy.
//! - [`rate_limit`] -- Per-provider token buckets with backoff.
//! - [`graph`] -- Per-item job DAG and its state machine.
//! - [`job`] -- Execution of a single search or scrape job.
//! - [`item`] -- Local media items.
//! - [`compose`] -- Merge configuration, planning and field merging.
//! - [`batch`] -- Batch coordinator, progress events, cancellation.
//! - [`sink`] -- Destinations for merged records.

pub mod batch;
pub mod classify;
pub mod compose;
pub mod graph;
pub mod item;
pub mod job;
pub mod provider;
pub mod providers;
pub mod rate_limit;
pub mod registry;
pub mod sink;

pub use batch::{
    BatchCoordinator, BatchEvent, BatchHandle, BatchSummary, Canceller, EngineConfig, ItemFailure,
    ItemResult, Progress,
};
pub use classify::{classify, ErrorKind, NetworkCause, ProviderError, RetryPolicy, ScrapeError};
pub use compose::{merge, plan_item, ConfigIssue, FieldError, ItemOutcome, ItemPlan, MergeConfig};
pub use graph::{Job, JobGraph, JobKind, JobOutput, JobState, NodeIndex, ScrapeOutput, TargetSpec};
pub use item::{MediaItem, ParentRef};
pub use provider::{
    FetchedEntity, IdFormat, Provider, ProviderDescriptor, RateLimitPolicy, ScrapeRequest,
    ScrapeTarget, SearchQuery, SearchResult, SearchTerm,
};
pub use providers::{StaticProvider, TmdbProvider};
pub use rate_limit::{ProviderLimiter, RateLimiterSet};
pub use registry::ProviderRegistry;
pub use sink::{JsonDirSink, MemorySink, RecordSink};
