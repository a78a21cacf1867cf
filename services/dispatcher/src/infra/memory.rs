use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use tracing::warn;

use crate::domain::repository::OutboxStore;
use crate::domain::types::{NewOutboxEvent, OutboxEvent, OutboxStats, OutboxStatus};
use crate::error::OutboxError;

#[derive(Debug, Clone)]
struct Row {
    event: OutboxEvent,
    claimed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Default)]
struct Inner {
    next_id: i64,
    rows: BTreeMap<i64, Row>,
}

/// Process-local outbox with the same claim and settle semantics as the
/// database store. Used by tests and by embedders without PostgreSQL.
#[derive(Debug, Default)]
pub struct InMemoryOutboxStore {
    inner: Mutex<Inner>,
}

impl InMemoryOutboxStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn get(&self, id: i64) -> Option<OutboxEvent> {
        self.lock().rows.get(&id).map(|row| row.event.clone())
    }

    /// Every row in id order.
    pub fn events(&self) -> Vec<OutboxEvent> {
        self.lock().rows.values().map(|row| row.event.clone()).collect()
    }

    fn settle(&self, id: i64, to: OutboxStatus) -> bool {
        let mut inner = self.lock();
        match inner.rows.get_mut(&id) {
            Some(row) if row.event.status == OutboxStatus::InProgress => {
                row.event.status = to;
                if to == OutboxStatus::Published {
                    row.event.published_at = Some(Utc::now().max(row.event.created_at));
                }
                true
            }
            _ => false,
        }
    }
}

impl OutboxStore for InMemoryOutboxStore {
    async fn persist(&self, event: &NewOutboxEvent) -> Result<i64, OutboxError> {
        let mut inner = self.lock();
        inner.next_id += 1;
        let id = inner.next_id;
        inner.rows.insert(
            id,
            Row {
                event: OutboxEvent {
                    id,
                    aggregate_type: event.aggregate_type.clone(),
                    aggregate_id: event.aggregate_id.clone(),
                    event_type: event.event_type.clone(),
                    payload: event.payload.clone(),
                    headers: event.headers.clone(),
                    status: OutboxStatus::New,
                    created_at: Utc::now(),
                    published_at: None,
                },
                claimed_at: None,
            },
        );
        Ok(id)
    }

    async fn claim_batch(&self, limit: u64) -> Result<Vec<OutboxEvent>, OutboxError> {
        let limit = usize::try_from(limit).unwrap_or(usize::MAX);
        let now = Utc::now();
        let mut inner = self.lock();
        let claimed = inner
            .rows
            .values_mut()
            .filter(|row| row.event.status == OutboxStatus::New)
            .take(limit)
            .map(|row| {
                row.event.status = OutboxStatus::InProgress;
                row.claimed_at = Some(now);
                row.event.clone()
            })
            .collect();
        Ok(claimed)
    }

    async fn mark_published(&self, id: i64) -> Result<(), OutboxError> {
        if !self.settle(id, OutboxStatus::Published) {
            warn!(event_id = id, "outbox event was not in progress, published mark skipped");
        }
        Ok(())
    }

    async fn mark_failed(&self, id: i64, reason: &str) -> Result<(), OutboxError> {
        if !self.settle(id, OutboxStatus::Failed) {
            warn!(event_id = id, reason, "outbox event was not in progress, failed mark skipped");
        }
        Ok(())
    }

    async fn status_counts(&self) -> Result<OutboxStats, OutboxError> {
        let mut stats = OutboxStats::default();
        for row in self.lock().rows.values() {
            stats.record(row.event.status, 1);
        }
        Ok(stats)
    }

    async fn count_stale_claims(&self, older_than: Duration) -> Result<u64, OutboxError> {
        let age = TimeDelta::from_std(older_than).unwrap_or(TimeDelta::MAX);
        let now = Utc::now();
        let stale = self
            .lock()
            .rows
            .values()
            .filter(|row| row.event.status == OutboxStatus::InProgress)
            .filter(|row| row.claimed_at.is_some_and(|at| now.signed_duration_since(at) >= age))
            .count();
        Ok(stale as u64)
    }
}
