use std::future::Future;
use std::time::Duration;

use crate::domain::types::{NewOutboxEvent, OutboxEvent, OutboxStats};
use crate::error::OutboxError;

/// Durable outbox table.
///
/// All mutation goes through single-statement operations, so several
/// dispatcher processes can share one table without further coordination.
pub trait OutboxStore: Send + Sync {
    /// Insert a `NEW` row and return its id.
    fn persist(
        &self,
        event: &NewOutboxEvent,
    ) -> impl Future<Output = Result<i64, OutboxError>> + Send;

    /// Atomically move up to `limit` `NEW` rows (lowest ids first) to
    /// `IN_PROGRESS` and return them in ascending id order. Two callers never
    /// receive the same row.
    fn claim_batch(
        &self,
        limit: u64,
    ) -> impl Future<Output = Result<Vec<OutboxEvent>, OutboxError>> + Send;

    /// `IN_PROGRESS → PUBLISHED`, stamping `published_at`.
    fn mark_published(&self, id: i64) -> impl Future<Output = Result<(), OutboxError>> + Send;

    /// `IN_PROGRESS → FAILED`. The reason is logged only.
    fn mark_failed(
        &self,
        id: i64,
        reason: &str,
    ) -> impl Future<Output = Result<(), OutboxError>> + Send;

    fn status_counts(&self) -> impl Future<Output = Result<OutboxStats, OutboxError>> + Send;

    /// Rows left `IN_PROGRESS` for longer than `older_than`, typically by a
    /// dispatcher that died mid-cycle.
    fn count_stale_claims(
        &self,
        older_than: Duration,
    ) -> impl Future<Output = Result<u64, OutboxError>> + Send;
}
