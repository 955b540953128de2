//! Search and scrape job execution.
//!
//! A job is one node of a [`JobGraph`](super::graph::JobGraph) turned into a
//! single provider call. Before the call it waits for a rate-limit token and
//! a slot in the global job pool; the call itself runs under a deadline. A
//! rate-limit response puts the provider into backoff and is retried exactly
//! once.
//!
//! Jobs run as their own tokio tasks and report back to the item driver over
//! a channel. When the batch is cancelled a job that has not started yet
//! returns without calling; one that is already in flight finishes in the
//! background and its report is dropped.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use reelscrape_common::{CanonicalId, FieldValue, ProviderName};
use tokio::sync::{mpsc, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::classify::{classify, RetryPolicy, ScrapeError};
use super::graph::{Job, JobOutput, NodeIndex, ScrapeOutput, TargetSpec};
use super::provider::{
    FetchedEntity, Provider, ProviderDescriptor, ScrapeRequest, ScrapeTarget, SearchQuery,
    SearchResult, SearchTerm,
};
use super::rate_limit::{RateLimiterSet, DEFAULT_BACKOFF};

/// Shared resources every job of a batch draws on.
#[derive(Clone)]
pub(crate) struct JobRuntime {
    pub limiters: Arc<RateLimiterSet>,
    pub permits: Arc<Semaphore>,
    pub cancel: CancellationToken,
    pub timeout: Duration,
}

/// Report sent from a job task to its item driver.
#[derive(Debug)]
pub(crate) enum JobMessage {
    /// The job holds its token and permit and is about to call the provider.
    Started(NodeIndex),
    /// The job reached a terminal outcome.
    Finished(NodeIndex, Result<JobOutput, ScrapeError>),
}

/// A job with every input resolved.
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Search {
        query: SearchQuery,
        prefer_year: Option<u16>,
    },
    Scrape(ScrapeRequest),
}

/// Turn a node into a concrete call, reading ids from the parent's output.
///
/// Free-text queries the provider recognises as one of its id formats become
/// direct lookups. Fails with `MissingDependency` when the parent did not
/// report the needed id, and with `NotFound` for an empty query.
pub fn resolve(
    job: &Job,
    parent: Option<&JobOutput>,
    descriptor: &ProviderDescriptor,
) -> Result<Call, ScrapeError> {
    match job {
        Job::Search {
            provider,
            query,
            prefer_year,
        } => {
            let mut query = query.clone();
            if let SearchTerm::Text(text) = &query.term {
                if text.trim().is_empty() {
                    return Err(ScrapeError::not_found(provider, "empty search query"));
                }
                if let Some(id) = descriptor.recognize_id(text) {
                    query.term = SearchTerm::Id(id);
                }
            }
            Ok(Call::Search {
                query,
                prefer_year: *prefer_year,
            })
        }
        Job::Scrape {
            kind,
            target,
            locale,
            fields,
            ..
        } => {
            let target = match target {
                TargetSpec::Known(target) => target.clone(),
                TargetSpec::FromParent { namespace, child } => {
                    let id = parent
                        .and_then(|output| output.id_in(namespace))
                        .cloned()
                        .ok_or_else(|| {
                            ScrapeError::missing_dependency(format!(
                                "no {namespace} id available for {}",
                                job.label()
                            ))
                        })?;
                    match child {
                        Some(key) => ScrapeTarget::Child {
                            parent: id,
                            key: key.clone(),
                        },
                        None => ScrapeTarget::Entity { id },
                    }
                }
            };
            Ok(Call::Scrape(ScrapeRequest {
                kind: *kind,
                target,
                locale: locale.clone(),
                fields: fields.clone(),
            }))
        }
    }
}

/// Pick the candidate a search job hands on: the first result released in
/// `prefer_year`, otherwise the top-ranked one.
pub fn select_candidate(results: Vec<SearchResult>, prefer_year: Option<u16>) -> Option<SearchResult> {
    let by_year = prefer_year.and_then(|year| results.iter().position(|r| r.year == Some(year)));
    let pick = by_year.unwrap_or(0);
    let mut result = results.into_iter().nth(pick)?;
    result.rank = pick;
    Some(result)
}

/// Restrict a fetched entity to the requested fields and tag every value
/// with the producing provider. Blank values are dropped.
pub fn restrict(provider: &ProviderName, request: &ScrapeRequest, entity: FetchedEntity) -> ScrapeOutput {
    let fields: BTreeMap<_, _> = entity
        .fields
        .into_iter()
        .filter(|(field, value)| request.fields.contains(field) && !value.is_blank())
        .map(|(field, value)| (field, FieldValue::new(value, provider.clone())))
        .collect();

    let mut ids: Vec<CanonicalId> = Vec::new();
    for id in entity.ids {
        if !ids.iter().any(|known| known.provider == id.provider) {
            ids.push(id);
        }
    }
    if let ScrapeTarget::Entity { id } = &request.target {
        if !ids.iter().any(|known| known.provider == id.provider) {
            ids.push(id.clone());
        }
    }

    ScrapeOutput {
        provider: provider.clone(),
        kind: request.kind,
        ids,
        fields,
    }
}

/// Perform the provider call of `call` once.
pub async fn perform(provider: &dyn Provider, call: &Call) -> Result<JobOutput, ScrapeError> {
    let name = provider.name();
    match call {
        Call::Search { query, prefer_year } => {
            let results = provider
                .search(query)
                .await
                .map_err(|e| classify(name, e))?;
            let prefer_year = match query.term {
                SearchTerm::Id(_) => None,
                SearchTerm::Text(_) => *prefer_year,
            };
            select_candidate(results, prefer_year)
                .map(JobOutput::Search)
                .ok_or_else(|| ScrapeError::not_found(name, "search returned no results"))
        }
        Call::Scrape(request) => {
            let entity = provider
                .fetch(request)
                .await
                .map_err(|e| classify(name, e))?;
            Ok(JobOutput::Scrape(restrict(name, request, entity)))
        }
    }
}

/// Run one job to completion and report to the item driver.
///
/// Order per attempt: rate-limit token, pool permit, cancellation check,
/// then the call under the deadline. Nothing is reported when the batch is
/// cancelled before the call starts.
pub(crate) async fn run_job(
    provider: Arc<dyn Provider>,
    call: Call,
    index: NodeIndex,
    runtime: JobRuntime,
    reports: mpsc::UnboundedSender<JobMessage>,
) {
    let name = provider.name().clone();
    let limiter = runtime.limiters.limiter(provider.descriptor());
    let mut started = false;
    let mut attempt = 0u32;

    loop {
        attempt += 1;

        tokio::select! {
            biased;
            _ = runtime.cancel.cancelled() => return,
            _ = limiter.acquire() => {}
        }
        let permit = tokio::select! {
            biased;
            _ = runtime.cancel.cancelled() => return,
            permit = runtime.permits.clone().acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => return,
            },
        };
        if runtime.cancel.is_cancelled() {
            return;
        }
        if !started {
            started = true;
            if reports.send(JobMessage::Started(index)).is_err() {
                return;
            }
        }

        debug!(provider = %name, node = %index, attempt, "Calling provider");
        let result = match tokio::time::timeout(runtime.timeout, perform(provider.as_ref(), &call)).await {
            Ok(result) => result,
            Err(_) => Err(ScrapeError::timeout(&name)),
        };
        drop(permit);

        if let Err(ScrapeError::RateLimited { retry_after, .. }) = &result {
            limiter.back_off(retry_after.unwrap_or(DEFAULT_BACKOFF));
        }
        match result {
            Err(e) if e.retry_policy() == RetryPolicy::RetryOnceAfterBackoff && attempt == 1 => {
                warn!(provider = %name, node = %index, error = %e, "Rate limited, retrying after backoff");
            }
            result => {
                // The driver may be gone after cancellation; the result is dropped.
                let _ = reports.send(JobMessage::Finished(index, result));
                return;
            }
        }
    }
}
