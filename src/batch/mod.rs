//! Bulk submission and paginated queries on top of the request gateway.
//!
//! Mutations larger than a resource's batch limit are split into sub-batches
//! that are dispatched concurrently; their multi-status answers are merged
//! back into one outcome per input item, in input order.

use std::collections::{HashMap, HashSet};
use std::ops::Range;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bon::Builder;
use futures::future;
use futures::stream::{self, StreamExt};
use serde_json::Value;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::api::result::{parse_multi_status, parse_query_page};
use crate::api::{
    Action, ApiCall, IdempotencyKey, IncompleteBatch, ItemOutcome, OperationResult, QueryFilter,
    ResourceType,
};
use crate::error::{ErrorCategory, PpcError};
use crate::gateway::{DispatchOptions, RequestGateway};
use crate::util::timeout::deadline_after;

/// Default number of sub-batches in flight per submission.
pub const DEFAULT_CONCURRENCY: usize = 4;

/// Options of a bulk mutation.
#[derive(Debug, Clone, Default, Builder)]
pub struct BulkOptions {
    /// Base key; sub-batch `i` is sent with `"{key}-{i}"`.
    pub idempotency_key: Option<IdempotencyKey>,
    /// Overall budget; unfinished sub-batches are reported incomplete.
    pub timeout: Option<Duration>,
    pub cancel: Option<CancellationToken>,
    /// Items per call, capped at the resource limit.
    pub batch_size: Option<usize>,
    pub concurrency: Option<usize>,
}

/// Options of a paginated query.
#[derive(Debug, Clone, Default, Builder)]
pub struct QueryOptions {
    /// `maxResults` sent with each page.
    pub page_size: Option<u32>,
    /// Stop after this many pages.
    pub max_pages: Option<usize>,
    pub timeout: Option<Duration>,
    pub cancel: Option<CancellationToken>,
}

/// One planned physical call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubBatch {
    pub index: usize,
    pub range: Range<usize>,
}

/// Split `len` items into consecutive sub-batches of at most `batch_size`.
pub fn plan(len: usize, batch_size: usize) -> Vec<SubBatch> {
    let batch_size = batch_size.max(1);
    (0..len)
        .step_by(batch_size)
        .enumerate()
        .map(|(index, start)| SubBatch {
            index,
            range: start..(start + batch_size).min(len),
        })
        .collect()
}

#[derive(Debug, Clone, Copy)]
enum Interrupt {
    Cancelled,
    TimedOut,
}

impl Interrupt {
    fn category(self) -> ErrorCategory {
        match self {
            Self::Cancelled => ErrorCategory::Cancelled,
            Self::TimedOut => ErrorCategory::Timeout,
        }
    }

    fn reason(self) -> &'static str {
        match self {
            Self::Cancelled => "cancelled before completion",
            Self::TimedOut => "timed out before completion",
        }
    }
}

async fn interrupted(deadline: Option<Instant>, cancel: Option<&CancellationToken>) -> Interrupt {
    let timed_out = async {
        match deadline {
            Some(deadline) => tokio::time::sleep_until(deadline).await,
            None => std::future::pending().await,
        }
    };
    let cancelled = async {
        match cancel {
            Some(token) => token.cancelled().await,
            None => std::future::pending().await,
        }
    };
    tokio::select! {
        biased;
        _ = cancelled => Interrupt::Cancelled,
        _ = timed_out => Interrupt::TimedOut,
    }
}

/// Splits, dispatches and reassembles bulk operations.
#[derive(Debug, Clone)]
pub struct BatchReconciler {
    gateway: Arc<RequestGateway>,
    batch_sizes: HashMap<ResourceType, usize>,
    concurrency: usize,
}

impl BatchReconciler {
    pub fn new(gateway: Arc<RequestGateway>) -> Self {
        Self {
            gateway,
            batch_sizes: HashMap::new(),
            concurrency: DEFAULT_CONCURRENCY,
        }
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Override the batch size of `resource` (capped at its limit).
    pub fn with_batch_size(mut self, resource: ResourceType, size: usize) -> Self {
        self.batch_sizes.insert(resource, size);
        self
    }

    pub fn gateway(&self) -> &Arc<RequestGateway> {
        &self.gateway
    }

    pub fn batch_size(&self, resource: ResourceType) -> usize {
        self.batch_sizes
            .get(&resource)
            .copied()
            .unwrap_or_else(|| resource.max_batch_size())
            .clamp(1, resource.max_batch_size())
    }

    /// Submit a mutation of any size.
    ///
    /// Per-item rejections are reported as [`ItemOutcome::Failed`] and never
    /// retried. Sub-batches that keep failing transiently, or that are still
    /// pending when the caller times out or cancels, are listed in
    /// [`OperationResult::incomplete`] with their items `NotCompleted`.
    ///
    /// A terminal error stops further dispatch. Sub-batches already in flight
    /// are still collected, and once any sub-batch has been acknowledged the
    /// failure is reported in `incomplete` instead of discarding the
    /// acknowledged outcomes. Only when nothing was acknowledged is the error
    /// returned.
    pub async fn submit_bulk(
        &self,
        resource: ResourceType,
        action: Action,
        items: Vec<Value>,
        options: &BulkOptions,
    ) -> Result<OperationResult, PpcError> {
        if !action.is_mutation() {
            return Err(PpcError::InvalidArgument(format!(
                "{action} is not a bulk mutation; use query_all"
            )));
        }
        let mut result = OperationResult::new(resource, action);
        if items.is_empty() {
            return Ok(result);
        }

        let batch_size = options
            .batch_size
            .map(|size| size.clamp(1, resource.max_batch_size()))
            .unwrap_or_else(|| self.batch_size(resource));
        let batches = plan(items.len(), batch_size);
        let calls = batches
            .iter()
            .map(|batch| {
                let key = options
                    .idempotency_key
                    .as_ref()
                    .map(|key| key.for_batch(batch.index));
                ApiCall::mutation(resource, action, &items[batch.range.clone()], key)
                    .map_err(|err| err.in_batch(resource, action, batch.range.start))
            })
            .collect::<Result<Vec<_>, _>>()?;

        tracing::info!(
            resource = %resource,
            action = %action,
            items = items.len(),
            batches = batches.len(),
            batch_size,
            "Submitting bulk operation"
        );

        let deadline = deadline_after(options.timeout);
        let dispatch = DispatchOptions { deadline };
        let concurrency = options.concurrency.unwrap_or(self.concurrency).max(1);
        let gateway = &self.gateway;
        let halted = AtomicBool::new(false);

        let mut pending = stream::iter(batches.iter().zip(calls.iter()))
            .take_while(|_| future::ready(!halted.load(Ordering::Acquire)))
            .map(move |(batch, call)| async move {
                (batch, gateway.dispatch(call, &dispatch).await)
            })
            .buffer_unordered(concurrency);

        let mut slots: Vec<Option<ItemOutcome>> = vec![None; items.len()];
        let mut finished = vec![false; batches.len()];
        let mut acknowledged = 0usize;
        let mut aborted: Option<PpcError> = None;
        let interrupt = interrupted(deadline, options.cancel.as_ref());
        tokio::pin!(interrupt);

        let stopped = loop {
            let next = tokio::select! {
                biased;
                reason = &mut interrupt => break Some(reason),
                next = pending.next() => next,
            };
            let Some((batch, outcome)) = next else {
                break None;
            };
            finished[batch.index] = true;
            let outcomes = outcome.and_then(|response| {
                if response.body.is_null() {
                    return Ok(items[batch.range.clone()]
                        .iter()
                        .cloned()
                        .map(ItemOutcome::Success)
                        .collect::<Vec<_>>());
                }
                parse_multi_status(
                    resource,
                    &response.body,
                    batch.range.len(),
                    batch.range.start,
                )
            });
            match outcomes {
                Ok(outcomes) => {
                    acknowledged += 1;
                    for (slot, outcome) in slots[batch.range.clone()].iter_mut().zip(outcomes) {
                        *slot = Some(outcome);
                    }
                }
                Err(err) if err.is_retryable() => {
                    tracing::warn!(
                        resource = %resource,
                        action = %action,
                        batch = batch.index,
                        error = %err,
                        "Sub-batch did not complete"
                    );
                    result.incomplete.push(IncompleteBatch {
                        batch: batch.index,
                        range: batch.range.clone(),
                        category: err.category(),
                        reason: err.to_string(),
                    });
                }
                Err(err) => {
                    let err = err.in_batch(resource, action, batch.range.start);
                    tracing::warn!(
                        resource = %resource,
                        action = %action,
                        batch = batch.index,
                        error = %err,
                        "Sub-batch failed; halting further dispatch"
                    );
                    halted.store(true, Ordering::Release);
                    result.incomplete.push(IncompleteBatch {
                        batch: batch.index,
                        range: batch.range.clone(),
                        category: err.category(),
                        reason: err.to_string(),
                    });
                    aborted.get_or_insert(err);
                }
            }
        };
        drop(pending);

        if acknowledged == 0 {
            if let Some(err) = aborted {
                return Err(err);
            }
        }

        let unfinished: Vec<&SubBatch> = batches
            .iter()
            .filter(|batch| !finished[batch.index])
            .collect();
        let (category, reason) = match (stopped, &aborted) {
            (Some(interrupt), _) => {
                tracing::warn!(
                    resource = %resource,
                    action = %action,
                    unfinished = unfinished.len(),
                    "Bulk operation stopped: {}",
                    interrupt.reason()
                );
                (interrupt.category(), interrupt.reason().to_string())
            }
            (None, Some(err)) => (
                err.category(),
                format!("not dispatched after an earlier sub-batch failed: {err}"),
            ),
            (None, None) => (ErrorCategory::Unknown, String::new()),
        };
        for batch in unfinished {
            result.incomplete.push(IncompleteBatch {
                batch: batch.index,
                range: batch.range.clone(),
                category,
                reason: reason.clone(),
            });
        }

        result.incomplete.sort_by_key(|incomplete| incomplete.batch);
        result.items = slots
            .into_iter()
            .map(|slot| slot.unwrap_or(ItemOutcome::NotCompleted))
            .collect();

        tracing::info!(
            resource = %resource,
            action = %action,
            succeeded = result.success_count(),
            failed = result.failures().count(),
            incomplete = result.incomplete.len(),
            "Bulk operation finished"
        );
        Ok(result)
    }

    /// Run a query, following `nextToken` until the last page (or the page cap).
    ///
    /// A token the provider already handed out once is an
    /// [`PpcError::InvalidResponse`].
    pub async fn query_all(
        &self,
        resource: ResourceType,
        filter: &QueryFilter,
        options: &QueryOptions,
    ) -> Result<OperationResult, PpcError> {
        let mut result = OperationResult::new(resource, Action::Query);
        let deadline = deadline_after(options.timeout);
        let dispatch = DispatchOptions { deadline };
        let interrupt = interrupted(deadline, options.cancel.as_ref());
        tokio::pin!(interrupt);

        let mut next_token: Option<String> = None;
        let mut seen_tokens: HashSet<String> = HashSet::new();
        let mut page = 0usize;

        loop {
            let call = ApiCall::query(resource, filter, options.page_size, next_token.as_deref());
            let outcome = tokio::select! {
                biased;
                reason = &mut interrupt => Err(reason),
                outcome = self.gateway.dispatch(&call, &dispatch) => Ok(outcome),
            };
            let response = match outcome {
                Ok(Ok(response)) => response,
                Ok(Err(err)) if err.is_retryable() => {
                    tracing::warn!(resource = %resource, page, error = %err, "Query page did not complete");
                    result.incomplete.push(IncompleteBatch {
                        batch: page,
                        range: result.items.len()..result.items.len(),
                        category: err.category(),
                        reason: err.to_string(),
                    });
                    break;
                }
                Ok(Err(err)) => return Err(err),
                Err(reason) => {
                    result.incomplete.push(IncompleteBatch {
                        batch: page,
                        range: result.items.len()..result.items.len(),
                        category: reason.category(),
                        reason: reason.reason().to_string(),
                    });
                    break;
                }
            };

            let (values, token) = parse_query_page(resource, &response.body)?;
            tracing::debug!(resource = %resource, page, items = values.len(), "Query page received");
            result.items.extend(values.into_iter().map(ItemOutcome::Success));
            page += 1;

            match token {
                Some(token) if seen_tokens.contains(&token) => {
                    return Err(PpcError::InvalidResponse(format!(
                        "query on {resource} revisited nextToken after {page} pages"
                    )));
                }
                Some(token) if options.max_pages.map_or(true, |max| page < max) => {
                    seen_tokens.insert(token.clone());
                    next_token = Some(token);
                }
                _ => break,
            }
        }

        tracing::info!(resource = %resource, pages = page, items = result.len(), "Query finished");
        Ok(result)
    }
}
