//! Batch coordinator: bounded-concurrency scheduling of many items.
//!
//! [`BatchCoordinator::submit_batch`] plans one job graph per item, rejects
//! the whole batch on any configuration problem, and then drives every graph
//! on its own tokio task. Provider calls across the batch share one global
//! pool of permits (`max_concurrent_jobs`) and the per-provider rate limiters
//! of the coordinator.
//!
//! Progress and results flow back as [`BatchEvent`]s on the returned
//! [`BatchHandle`]. Events are emitted under the same lock that
//! [`BatchHandle::cancel`] takes, so once `cancel()` returns no further
//! progress, job or item event is delivered; only the final
//! [`BatchEvent::Finished`] summary follows.

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use reelscrape_common::{BatchId, ItemId, Locale, ProviderName};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::classify::ScrapeError;
use super::compose::{issues_to_error, merge, plan_item, ItemOutcome, ItemPlan, MergeConfig};
use super::graph::{JobGraph, JobState, NodeIndex};
use super::item::MediaItem;
use super::job::{resolve, run_job, JobMessage, JobRuntime};
use super::provider::RateLimitPolicy;
use super::rate_limit::RateLimiterSet;
use super::registry::ProviderRegistry;
use super::sink::RecordSink;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Engine-wide limits.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    /// Maximum number of provider calls running at once across a batch.
    pub max_concurrent_jobs: usize,
    /// Deadline of a single provider call.
    pub request_timeout: Duration,
    /// Locale used for providers without a configured one.
    pub default_locale: Locale,
    /// Rate-limit policies that replace a provider's own.
    pub rate_limits: HashMap<ProviderName, RateLimitPolicy>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_concurrent_jobs: 4,
            request_timeout: Duration::from_secs(30),
            default_locale: Locale::english(),
            rate_limits: HashMap::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

/// Batch progress snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Progress {
    /// Items that reached a final outcome.
    pub completed: usize,
    /// Items in the batch.
    pub total: usize,
    /// Label of the item most recently started or finished.
    pub current_label: Option<String>,
}

/// Final outcome of one item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemResult {
    pub item_id: ItemId,
    pub label: String,
    pub outcome: ItemOutcome,
}

/// An item that produced no record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemFailure {
    pub item_id: ItemId,
    pub label: String,
    pub error: ScrapeError,
}

/// Counts reported when a batch ends.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchSummary {
    pub batch_id: BatchId,
    pub total: usize,
    pub succeeded: usize,
    pub partial: usize,
    pub failed: usize,
    /// Items without a delivered result (only non-zero after cancellation).
    pub not_attempted: usize,
    pub cancelled: bool,
    /// Whole-item errors, in completion order.
    pub failures: Vec<ItemFailure>,
}

/// Events delivered on a [`BatchHandle`].
#[derive(Debug, Clone, PartialEq)]
pub enum BatchEvent {
    /// The batch was accepted and its items are being scheduled.
    Started { batch_id: BatchId, total: usize },
    /// A job of an item changed state.
    JobStateChanged {
        item_id: ItemId,
        node: NodeIndex,
        job: String,
        state: JobState,
    },
    /// Progress counter update.
    Progress(Progress),
    /// An item reached its final outcome.
    ItemFinished(ItemResult),
    /// The batch is over. Always the last event.
    Finished(BatchSummary),
}

/// Serialises event delivery with cancellation.
struct Emitter {
    batch_id: BatchId,
    events: mpsc::UnboundedSender<BatchEvent>,
    state: Mutex<EmitState>,
}

#[derive(Default)]
struct EmitState {
    cancelled: bool,
    progress: Progress,
    succeeded: usize,
    partial: usize,
    failed: usize,
    failures: Vec<ItemFailure>,
}

impl Emitter {
    fn new(batch_id: BatchId, total: usize, events: mpsc::UnboundedSender<BatchEvent>) -> Self {
        Self {
            batch_id,
            events,
            state: Mutex::new(EmitState {
                progress: Progress {
                    total,
                    ..Progress::default()
                },
                ..EmitState::default()
            }),
        }
    }

    /// Send an event unless the batch has been cancelled.
    fn emit(&self, event: BatchEvent) -> bool {
        let state = self.state.lock();
        !state.cancelled && self.events.send(event).is_ok()
    }

    fn item_started(&self, label: &str) {
        let mut state = self.state.lock();
        if state.cancelled {
            return;
        }
        state.progress.current_label = Some(label.to_string());
        let _ = self.events.send(BatchEvent::Progress(state.progress.clone()));
    }

    /// Record and deliver an item result. Returns `false` (and records
    /// nothing) when the batch was cancelled first.
    fn item_finished(&self, result: ItemResult) -> bool {
        let mut state = self.state.lock();
        if state.cancelled {
            return false;
        }
        match &result.outcome {
            ItemOutcome::Succeeded { .. } => state.succeeded += 1,
            ItemOutcome::Partial { .. } => state.partial += 1,
            ItemOutcome::Failed { error, .. } => {
                state.failed += 1;
                state.failures.push(ItemFailure {
                    item_id: result.item_id,
                    label: result.label.clone(),
                    error: error.clone(),
                });
            }
        }
        state.progress.completed += 1;
        state.progress.current_label = Some(result.label.clone());
        let progress = state.progress.clone();
        let _ = self.events.send(BatchEvent::ItemFinished(result));
        let _ = self.events.send(BatchEvent::Progress(progress));
        true
    }

    /// Returns `true` if this call cancelled the batch.
    fn cancel(&self) -> bool {
        let mut state = self.state.lock();
        !std::mem::replace(&mut state.cancelled, true)
    }

    fn is_cancelled(&self) -> bool {
        self.state.lock().cancelled
    }

    fn progress(&self) -> Progress {
        self.state.lock().progress.clone()
    }

    fn summary(&self) -> BatchSummary {
        let state = self.state.lock();
        let done = state.succeeded + state.partial + state.failed;
        BatchSummary {
            batch_id: self.batch_id,
            total: state.progress.total,
            succeeded: state.succeeded,
            partial: state.partial,
            failed: state.failed,
            not_attempted: state.progress.total.saturating_sub(done),
            cancelled: state.cancelled,
            failures: state.failures.clone(),
        }
    }

    /// Deliver the closing summary, regardless of cancellation.
    fn finish(&self) -> BatchSummary {
        let summary = self.summary();
        let _ = self.events.send(BatchEvent::Finished(summary.clone()));
        summary
    }
}

// ---------------------------------------------------------------------------
// Handle
// ---------------------------------------------------------------------------

/// Cancels a running batch. Cheap to clone.
#[derive(Clone)]
pub struct Canceller {
    emitter: Arc<Emitter>,
    token: CancellationToken,
}

impl Canceller {
    /// Stop the batch: no job starts afterwards, in-flight calls are
    /// abandoned, and no further progress, job or item event is delivered.
    pub fn cancel(&self) {
        if self.emitter.cancel() {
            info!(batch_id = %self.emitter.batch_id, "Batch cancelled");
        }
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.emitter.is_cancelled()
    }
}

/// A running batch.
pub struct BatchHandle {
    batch_id: BatchId,
    events: mpsc::UnboundedReceiver<BatchEvent>,
    canceller: Canceller,
    task: JoinHandle<BatchSummary>,
}

impl BatchHandle {
    /// Identifier of the batch.
    pub fn id(&self) -> BatchId {
        self.batch_id
    }

    /// The next event, or `None` once the closing summary has been taken.
    pub async fn next_event(&mut self) -> Option<BatchEvent> {
        self.events.recv().await
    }

    /// Consume the handle as a stream of events. Grab a
    /// [`canceller`](Self::canceller) first to keep the ability to cancel.
    pub fn into_stream(self) -> UnboundedReceiverStream<BatchEvent> {
        UnboundedReceiverStream::new(self.events)
    }

    /// A clonable cancel handle.
    pub fn canceller(&self) -> Canceller {
        self.canceller.clone()
    }

    /// Current progress.
    pub fn progress(&self) -> Progress {
        self.canceller.emitter.progress()
    }

    /// Cancel the batch.
    pub fn cancel(&self) {
        self.canceller.cancel();
    }

    /// Wait for the batch to end and return its summary. Undelivered events
    /// are discarded.
    pub async fn join(self) -> BatchSummary {
        match self.task.await {
            Ok(summary) => summary,
            Err(e) => {
                error!(batch_id = %self.batch_id, error = %e, "Batch task failed");
                self.canceller.emitter.summary()
            }
        }
    }
}

impl std::fmt::Debug for BatchHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchHandle")
            .field("batch_id", &self.batch_id)
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Coordinator
// ---------------------------------------------------------------------------

/// Everything an item task needs.
struct BatchContext {
    registry: Arc<ProviderRegistry>,
    runtime: JobRuntime,
    emitter: Arc<Emitter>,
    sink: Option<Arc<dyn RecordSink>>,
}

/// Accepts batches of items and runs them against the registered providers.
///
/// The coordinator is cheap to share; rate-limit state lives in it and
/// therefore spans every batch it runs.
pub struct BatchCoordinator {
    registry: Arc<ProviderRegistry>,
    config: EngineConfig,
    limiters: Arc<RateLimiterSet>,
    sink: Option<Arc<dyn RecordSink>>,
}

impl BatchCoordinator {
    pub fn new(registry: Arc<ProviderRegistry>, config: EngineConfig) -> Self {
        let limiters = Arc::new(RateLimiterSet::with_overrides(config.rate_limits.clone()));
        Self {
            registry,
            config,
            limiters,
            sink: None,
        }
    }

    /// Builder: hand every merged record to `sink`.
    pub fn with_sink(mut self, sink: Arc<dyn RecordSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn registry(&self) -> &Arc<ProviderRegistry> {
        &self.registry
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Start scraping `items`.
    ///
    /// Every item is planned before anything runs; any configuration problem
    /// (unknown or unconfigured provider, unsupported kind or field, missing
    /// parent, requirement cycle) rejects the whole batch with
    /// `InvalidConfiguration` and no provider is called.
    ///
    /// Must be called from within a tokio runtime.
    pub fn submit_batch(
        &self,
        items: Vec<MediaItem>,
        merge_config: &MergeConfig,
    ) -> Result<BatchHandle, ScrapeError> {
        if self.config.max_concurrent_jobs == 0 {
            return Err(ScrapeError::invalid_config(
                "max_concurrent_jobs must be at least 1",
            ));
        }
        let kinds: BTreeSet<_> = items.iter().map(|item| item.kind).collect();
        if let Some(err) = issues_to_error(&merge_config.check(&self.registry, &kinds)) {
            warn!(error = %err, "Rejecting batch");
            return Err(err);
        }
        let planned = items
            .into_iter()
            .map(|item| {
                let plan = plan_item(
                    &item,
                    merge_config,
                    &self.registry,
                    &self.config.default_locale,
                )?;
                Ok((item, plan))
            })
            .collect::<Result<Vec<_>, ScrapeError>>()
            .inspect_err(|err| warn!(error = %err, "Rejecting batch"))?;

        let batch_id = BatchId::new();
        let total = planned.len();
        let (tx, rx) = mpsc::unbounded_channel();
        let emitter = Arc::new(Emitter::new(batch_id, total, tx));
        let token = CancellationToken::new();
        let ctx = Arc::new(BatchContext {
            registry: self.registry.clone(),
            runtime: JobRuntime {
                limiters: self.limiters.clone(),
                permits: Arc::new(Semaphore::new(self.config.max_concurrent_jobs)),
                cancel: token.clone(),
                timeout: self.config.request_timeout,
            },
            emitter: emitter.clone(),
            sink: self.sink.clone(),
        });

        info!(batch_id = %batch_id, items = total, "Batch started");
        emitter.emit(BatchEvent::Started { batch_id, total });

        let task = tokio::spawn(async move {
            let mut items = JoinSet::new();
            for (item, plan) in planned {
                items.spawn(drive_item(ctx.clone(), item, plan));
            }
            while let Some(joined) = items.join_next().await {
                if let Err(e) = joined {
                    error!(batch_id = %batch_id, error = %e, "Item task failed");
                }
            }

            let summary = ctx.emitter.finish();
            info!(
                batch_id = %batch_id,
                succeeded = summary.succeeded,
                partial = summary.partial,
                failed = summary.failed,
                not_attempted = summary.not_attempted,
                cancelled = summary.cancelled,
                "Batch finished"
            );
            summary
        });

        Ok(BatchHandle {
            batch_id,
            events: rx,
            canceller: Canceller { emitter, token },
            task,
        })
    }

    /// Scrape a single item: a batch of one.
    pub async fn scrape_one(
        &self,
        item: MediaItem,
        merge_config: &MergeConfig,
    ) -> Result<ItemResult, ScrapeError> {
        let mut handle = self.submit_batch(vec![item], merge_config)?;
        let mut result = None;
        while let Some(event) = handle.next_event().await {
            match event {
                BatchEvent::ItemFinished(item_result) => result = Some(item_result),
                BatchEvent::Finished(_) => break,
                _ => {}
            }
        }
        result.ok_or_else(|| ScrapeError::missing_dependency("batch ended without a result"))
    }
}

impl std::fmt::Debug for BatchCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchCoordinator")
            .field("registry", &self.registry)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Item driver
// ---------------------------------------------------------------------------

/// Drive one item's graph to completion, then merge and report.
async fn drive_item(ctx: Arc<BatchContext>, item: MediaItem, mut plan: ItemPlan) {
    let cancel = ctx.runtime.cancel.clone();
    if cancel.is_cancelled() {
        return;
    }
    let label = item.label();
    debug!(item_id = %item.id, label = %label, jobs = plan.graph.len(), "Item started");
    ctx.emitter.item_started(&label);

    let mut graph = std::mem::take(&mut plan.graph);
    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut ready: VecDeque<NodeIndex> = graph.prime().into();
    let mut in_flight = 0usize;

    loop {
        while let Some(index) = ready.pop_front() {
            if cancel.is_cancelled() {
                return;
            }
            let Some(node) = graph.node(index) else {
                continue;
            };
            let name = node.job().provider().clone();
            let resolved = match ctx.registry.get(name.as_str()) {
                Some(provider) => resolve(node.job(), graph.parent_output(index), provider.descriptor())
                    .map(|call| (provider.clone(), call)),
                None => Err(ScrapeError::invalid_config(format!("unknown provider '{name}'"))),
            };
            match resolved {
                Ok((provider, call)) => {
                    tokio::spawn(run_job(provider, call, index, ctx.runtime.clone(), tx.clone()));
                    in_flight += 1;
                }
                Err(error) => fail_node(&ctx, &item, &mut graph, index, error),
            }
        }
        if in_flight == 0 {
            break;
        }

        let message = tokio::select! {
            biased;
            _ = cancel.cancelled() => return,
            message = rx.recv() => message,
        };
        let Some(message) = message else {
            break;
        };
        match message {
            JobMessage::Started(index) => {
                if graph.mark_running(index).is_ok() {
                    report_state(&ctx, &item, &graph, index);
                }
            }
            JobMessage::Finished(index, Ok(output)) => {
                in_flight -= 1;
                match graph.complete(index, output) {
                    Ok(children) => {
                        report_state(&ctx, &item, &graph, index);
                        for &child in &children {
                            report_state(&ctx, &item, &graph, child);
                        }
                        ready.extend(children);
                    }
                    Err(e) => warn!(item_id = %item.id, error = %e, "Dropping job result"),
                }
            }
            JobMessage::Finished(index, Err(error)) => {
                in_flight -= 1;
                fail_node(&ctx, &item, &mut graph, index, error);
            }
        }
    }

    let outcome = merge(&item, &plan, &graph);
    match &outcome {
        ItemOutcome::Succeeded { record } => {
            info!(item_id = %item.id, label = %label, fields = record.fields.len(), "Item scraped");
        }
        ItemOutcome::Partial { field_errors, .. } => {
            warn!(item_id = %item.id, label = %label, missing = field_errors.len(), "Item partially scraped");
        }
        ItemOutcome::Failed { error, .. } => {
            warn!(item_id = %item.id, label = %label, error = %error, "Item failed");
        }
    }

    let record = outcome.record().cloned();
    let delivered = ctx.emitter.item_finished(ItemResult {
        item_id: item.id,
        label,
        outcome,
    });
    if let (true, Some(sink), Some(record)) = (delivered, &ctx.sink, record) {
        if let Err(e) = sink.write(&item, &record).await {
            warn!(item_id = %item.id, error = %e, "Failed to write record");
        }
    }
}

fn fail_node(
    ctx: &BatchContext,
    item: &MediaItem,
    graph: &mut JobGraph,
    index: NodeIndex,
    error: ScrapeError,
) {
    debug!(item_id = %item.id, node = %index, error = %error, "Job failed");
    match graph.fail(index, error) {
        Ok(cascaded) => {
            report_state(ctx, item, graph, index);
            for child in cascaded {
                report_state(ctx, item, graph, child);
            }
        }
        Err(e) => warn!(item_id = %item.id, error = %e, "Dropping job failure"),
    }
}

fn report_state(ctx: &BatchContext, item: &MediaItem, graph: &JobGraph, index: NodeIndex) {
    let Some(node) = graph.node(index) else {
        return;
    };
    debug!(item_id = %item.id, node = %index, state = %node.state(), job = %node.job().label(), "Job state changed");
    ctx.emitter.emit(BatchEvent::JobStateChanged {
        item_id: item.id,
        node: index,
        job: node.job().label(),
        state: node.state(),
    });
}
