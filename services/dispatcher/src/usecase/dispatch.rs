use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures::{StreamExt, stream};
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::broker::PublishTarget;
use crate::domain::repository::OutboxStore;
use crate::domain::types::{
    AGGREGATE_ID_HEADER, AGGREGATE_TYPE_HEADER, EVENT_ID_HEADER, EVENT_TYPE_HEADER, Headers,
    OutboxEvent,
};
use crate::error::{DispatchError, OutboxError, PublishError};
use crate::propagation;
use crate::resilience::{CircuitBreaker, RetryPolicy};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchConfig {
    /// Rows claimed per cycle.
    pub batch_size: u64,
    pub poll_interval: Duration,
    /// Events dispatched at the same time within one cycle.
    pub concurrency: usize,
    /// Budget of one publish attempt across all targets.
    pub publish_timeout: Duration,
    /// Claims older than this are reported as stuck.
    pub stale_after: Duration,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            batch_size: 25,
            poll_interval: Duration::from_millis(5_000),
            concurrency: 4,
            publish_timeout: Duration::from_secs(10),
            stale_after: Duration::from_secs(300),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub claimed: usize,
    pub published: usize,
    pub failed: usize,
    /// The cycle did not run because another one was in progress.
    pub skipped: bool,
}

impl CycleReport {
    pub fn skipped() -> Self {
        Self {
            skipped: true,
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Settled {
    Published,
    Failed,
}

/// Claims outbox rows and publishes each one to every target.
///
/// One event is one unit: it is `PUBLISHED` only when every target accepted
/// it. An attempt tries every target that has not accepted yet; a target
/// that accepted in an earlier attempt is not sent to again.
pub struct OutboxDispatcher<S: OutboxStore> {
    store: S,
    targets: Vec<PublishTarget>,
    retry: RetryPolicy,
    breaker: CircuitBreaker,
    config: DispatchConfig,
    running: AtomicBool,
}

impl<S: OutboxStore> OutboxDispatcher<S> {
    pub fn new(
        store: S,
        targets: Vec<PublishTarget>,
        retry: RetryPolicy,
        breaker: CircuitBreaker,
        config: DispatchConfig,
    ) -> Self {
        Self {
            store,
            targets,
            retry,
            breaker,
            config,
            running: AtomicBool::new(false),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    /// Tick every `poll_interval` until `shutdown` flips or its sender is
    /// dropped. A cycle that is already running is allowed to finish.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.config.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!(
            batch_size = self.config.batch_size,
            poll_interval_ms = self.config.poll_interval.as_millis() as u64,
            concurrency = self.config.concurrency,
            targets = ?self.targets,
            "outbox dispatcher started"
        );

        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                _ = ticker.tick() => {
                    if let Err(err) = self.run_cycle().await {
                        error!(error = %err, "dispatch cycle aborted");
                    }
                }
            }
            if *shutdown.borrow() {
                break;
            }
        }
        info!("outbox dispatcher stopped");
    }

    /// One claim → publish → settle pass. Returns a skipped report if another
    /// cycle is still running.
    pub async fn run_cycle(&self) -> Result<CycleReport, DispatchError> {
        if self
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("previous dispatch cycle still running, skipping tick");
            return Ok(CycleReport::skipped());
        }
        let _running = RunningFlag(&self.running);

        self.report_stale_claims().await;

        let events = self.store.claim_batch(self.config.batch_size).await?;
        let mut report = CycleReport {
            claimed: events.len(),
            ..CycleReport::default()
        };
        if events.is_empty() {
            return Ok(report);
        }

        // Every claimed event gets a settle attempt, even after one fails.
        let mut settled = stream::iter(events)
            .map(|event| async move {
                let event_id = event.id;
                (event_id, self.dispatch(event).await)
            })
            .buffer_unordered(self.config.concurrency.max(1));
        let mut unsettled = 0;
        let mut first_error = None;
        while let Some((event_id, outcome)) = settled.next().await {
            match outcome {
                Ok(Settled::Published) => report.published += 1,
                Ok(Settled::Failed) => report.failed += 1,
                Err(err) => {
                    error!(event_id, error = %err, "outbox event could not be settled");
                    unsettled += 1;
                    first_error.get_or_insert(err);
                }
            }
        }

        info!(
            claimed = report.claimed,
            published = report.published,
            failed = report.failed,
            unsettled,
            "dispatch cycle finished"
        );
        match first_error {
            Some(source) => Err(DispatchError::Unsettled {
                count: unsettled,
                source,
            }),
            None => Ok(report),
        }
    }

    async fn report_stale_claims(&self) {
        match self.store.count_stale_claims(self.config.stale_after).await {
            Ok(0) => {}
            Ok(stale) => warn!(
                stale,
                older_than_secs = self.config.stale_after.as_secs(),
                "outbox rows stuck in progress; they are not reclaimed automatically"
            ),
            Err(err) => debug!(error = %err, "stale claim count failed"),
        }
    }

    async fn dispatch(&self, event: OutboxEvent) -> Result<Settled, OutboxError> {
        let headers = outbound_headers(&event);
        let payload = event.payload.as_str();
        let headers_ref = &headers;
        let event_id = event.id;
        let accepted: Vec<AtomicBool> = self
            .targets
            .iter()
            .map(|_| AtomicBool::new(false))
            .collect();
        let accepted = accepted.as_slice();

        let result = self
            .retry
            .run(move |attempt| async move {
                debug!(event_id, attempt, "publishing outbox event");
                self.breaker
                    .call(self.publish_attempt(payload, headers_ref, accepted))
                    .await
            })
            .await;

        match result {
            Ok(()) => {
                self.store.mark_published(event.id).await?;
                info!(
                    event_id,
                    event_type = %event.event_type,
                    aggregate_id = %event.aggregate_id,
                    "outbox event published"
                );
                Ok(Settled::Published)
            }
            Err(err) => {
                warn!(
                    event_id,
                    event_type = %event.event_type,
                    kind = err.kind(),
                    error = %err,
                    "outbox event failed"
                );
                self.store.mark_failed(event.id, &err.to_string()).await?;
                Ok(Settled::Failed)
            }
        }
    }

    async fn publish_attempt(
        &self,
        payload: &str,
        headers: &Headers,
        accepted: &[AtomicBool],
    ) -> Result<(), PublishError> {
        let timeout = self.config.publish_timeout;
        tokio::time::timeout(timeout, self.publish_to_all(payload, headers, accepted))
            .await
            .map_err(|_| PublishError::Timeout(timeout))?
    }

    /// Sends to every target that has not accepted the event yet, even after
    /// one of them failed, and returns the first failure.
    async fn publish_to_all(
        &self,
        payload: &str,
        headers: &Headers,
        accepted: &[AtomicBool],
    ) -> Result<(), PublishError> {
        let mut first_error = None;
        for (target, done) in self.targets.iter().zip(accepted) {
            if done.load(Ordering::Acquire) {
                continue;
            }
            match target.send(payload, headers).await {
                Ok(()) => done.store(true, Ordering::Release),
                Err(err) => {
                    debug!(to = ?target, error = %err, "publish target failed");
                    first_error.get_or_insert(err);
                }
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}

/// Stored headers plus correlation, trace context and event metadata.
/// Entries already present are never overwritten.
pub fn outbound_headers(event: &OutboxEvent) -> Headers {
    let mut headers = propagation::propagate(&event.headers);
    for (key, value) in [
        (EVENT_ID_HEADER, event.id.to_string()),
        (EVENT_TYPE_HEADER, event.event_type.clone()),
        (AGGREGATE_TYPE_HEADER, event.aggregate_type.clone()),
        (AGGREGATE_ID_HEADER, event.aggregate_id.clone()),
    ] {
        headers.entry(key.to_owned()).or_insert(value);
    }
    headers
}

struct RunningFlag<'a>(&'a AtomicBool);

impl Drop for RunningFlag<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}
