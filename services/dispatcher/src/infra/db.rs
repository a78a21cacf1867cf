use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use chrono::{TimeDelta, Utc};
use sea_orm::{
    ActiveModelTrait, ActiveValue::Set, ConnectionTrait, DatabaseConnection, DatabaseTransaction,
    DbBackend, DbErr, EntityTrait, FromQueryResult, Statement, TransactionTrait,
};
use tracing::{debug, warn};

use herald_dispatcher_schema::message_outbox;

use crate::domain::repository::OutboxStore;
use crate::domain::types::{Headers, NewOutboxEvent, OutboxEvent, OutboxStats, OutboxStatus};
use crate::error::OutboxError;

const CLAIM_SQL: &str = r#"
    UPDATE message_outbox
       SET status = $1, claimed_at = now()
     WHERE id IN (
           SELECT id FROM message_outbox
            WHERE status = $2
            ORDER BY id
            LIMIT $3
            FOR UPDATE SKIP LOCKED)
 RETURNING *
"#;

const SETTLE_PUBLISHED_SQL: &str = r#"
    UPDATE message_outbox
       SET status = $1, published_at = GREATEST(now(), created_at)
     WHERE id = $2 AND status = $3
"#;

const SETTLE_FAILED_SQL: &str = r#"
    UPDATE message_outbox
       SET status = $1
     WHERE id = $2 AND status = $3
"#;

const STATUS_COUNTS_SQL: &str = r#"
    SELECT status, COUNT(*) AS count
      FROM message_outbox
     GROUP BY status
"#;

const STALE_CLAIMS_SQL: &str = r#"
    SELECT COUNT(*) AS count
      FROM message_outbox
     WHERE status = $1 AND claimed_at < $2
"#;

// ── Outbox store ─────────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct DbOutboxStore {
    pub db: Arc<DatabaseConnection>,
}

impl DbOutboxStore {
    pub fn new(db: impl Into<Arc<DatabaseConnection>>) -> Self {
        Self { db: db.into() }
    }

    /// Insert `event` through `conn`, typically the caller's open
    /// `DatabaseTransaction`, so the row commits or rolls back together with
    /// the business write.
    pub async fn persist_in<C>(conn: &C, event: &NewOutboxEvent) -> Result<i64, OutboxError>
    where
        C: ConnectionTrait,
    {
        let id = insert_event(conn, event)
            .await
            .context("insert outbox event")?;
        Ok(id)
    }

    /// Open a transaction, run `write` and insert `event` in it.
    pub async fn persist_with<T, W>(
        &self,
        write: W,
        event: &NewOutboxEvent,
    ) -> Result<(T, i64), OutboxError>
    where
        T: Send + 'static,
        W: for<'c> FnOnce(
                &'c DatabaseTransaction,
            ) -> Pin<Box<dyn Future<Output = Result<T, DbErr>> + Send + 'c>>
            + Send
            + 'static,
    {
        let event = event.clone();
        let (value, id) = self
            .db
            .transaction::<_, (T, i64), DbErr>(|txn| {
                Box::pin(async move {
                    let value = write(txn).await?;
                    let id = insert_event(txn, &event).await?;
                    Ok((value, id))
                })
            })
            .await
            .context("persist outbox event with business write")?;
        Ok((value, id))
    }

    async fn settle(&self, sql: &str, id: i64, to: OutboxStatus) -> Result<u64, DbErr> {
        let result = self
            .db
            .execute(Statement::from_sql_and_values(
                DbBackend::Postgres,
                sql,
                [
                    to.as_str().into(),
                    id.into(),
                    OutboxStatus::InProgress.as_str().into(),
                ],
            ))
            .await?;
        Ok(result.rows_affected())
    }
}

impl OutboxStore for DbOutboxStore {
    async fn persist(&self, event: &NewOutboxEvent) -> Result<i64, OutboxError> {
        Self::persist_in(self.db.as_ref(), event).await
    }

    async fn claim_batch(&self, limit: u64) -> Result<Vec<OutboxEvent>, OutboxError> {
        if limit == 0 {
            return Ok(vec![]);
        }
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let models = message_outbox::Entity::find()
            .from_raw_sql(Statement::from_sql_and_values(
                DbBackend::Postgres,
                CLAIM_SQL,
                [
                    OutboxStatus::InProgress.as_str().into(),
                    OutboxStatus::New.as_str().into(),
                    limit.into(),
                ],
            ))
            .all(self.db.as_ref())
            .await
            .context("claim outbox batch")?;

        let mut events = models
            .into_iter()
            .map(event_from_model)
            .collect::<Result<Vec<_>, _>>()
            .context("decode claimed outbox rows")?;
        // RETURNING does not preserve the sub-select's order
        events.sort_by_key(|e| e.id);
        Ok(events)
    }

    async fn mark_published(&self, id: i64) -> Result<(), OutboxError> {
        let updated = self
            .settle(SETTLE_PUBLISHED_SQL, id, OutboxStatus::Published)
            .await
            .context("mark outbox event published")?;
        if updated == 0 {
            warn!(event_id = id, "outbox event was not in progress, published mark skipped");
        }
        Ok(())
    }

    async fn mark_failed(&self, id: i64, reason: &str) -> Result<(), OutboxError> {
        let updated = self
            .settle(SETTLE_FAILED_SQL, id, OutboxStatus::Failed)
            .await
            .context("mark outbox event failed")?;
        if updated == 0 {
            warn!(event_id = id, reason, "outbox event was not in progress, failed mark skipped");
        } else {
            debug!(event_id = id, reason, "outbox event marked failed");
        }
        Ok(())
    }

    async fn status_counts(&self) -> Result<OutboxStats, OutboxError> {
        #[derive(Debug, FromQueryResult)]
        struct StatusCount {
            status: String,
            count: i64,
        }

        let rows = StatusCount::find_by_statement(Statement::from_string(
            DbBackend::Postgres,
            STATUS_COUNTS_SQL,
        ))
        .all(self.db.as_ref())
        .await
        .context("count outbox rows by status")?;

        let mut stats = OutboxStats::default();
        for row in rows {
            match row.status.parse::<OutboxStatus>() {
                Ok(status) => stats.record(status, row.count.max(0) as u64),
                Err(err) => {
                    warn!(error = %err, count = row.count, "skipping unknown outbox status")
                }
            }
        }
        Ok(stats)
    }

    async fn count_stale_claims(&self, older_than: Duration) -> Result<u64, OutboxError> {
        #[derive(Debug, FromQueryResult)]
        struct Count {
            count: i64,
        }

        let cutoff = TimeDelta::from_std(older_than)
            .ok()
            .and_then(|age| Utc::now().checked_sub_signed(age))
            .context("stale claim threshold out of range")?;
        let row = Count::find_by_statement(Statement::from_sql_and_values(
            DbBackend::Postgres,
            STALE_CLAIMS_SQL,
            [OutboxStatus::InProgress.as_str().into(), cutoff.into()],
        ))
        .one(self.db.as_ref())
        .await
        .context("count stale outbox claims")?;
        Ok(row.map_or(0, |r| r.count.max(0) as u64))
    }
}

async fn insert_event<C>(conn: &C, event: &NewOutboxEvent) -> Result<i64, DbErr>
where
    C: ConnectionTrait,
{
    let model = message_outbox::ActiveModel {
        aggregate_type: Set(event.aggregate_type.clone()),
        aggregate_id: Set(event.aggregate_id.clone()),
        event_type: Set(event.event_type.clone()),
        payload: Set(event.payload.clone()),
        headers: Set(encode_headers(&event.headers)),
        status: Set(OutboxStatus::New.as_str().to_owned()),
        published_at: Set(None),
        claimed_at: Set(None),
        ..Default::default()
    }
    .insert(conn)
    .await?;
    Ok(model.id)
}

fn event_from_model(
    model: message_outbox::Model,
) -> Result<OutboxEvent, crate::domain::types::UnknownStatus> {
    Ok(OutboxEvent {
        status: model.status.parse()?,
        headers: decode_headers(model.id, &model.headers),
        id: model.id,
        aggregate_type: model.aggregate_type,
        aggregate_id: model.aggregate_id,
        event_type: model.event_type,
        payload: model.payload,
        created_at: model.created_at,
        published_at: model.published_at,
    })
}

// ── Header blob ──────────────────────────────────────────────────────────────

fn encode_headers(headers: &Headers) -> String {
    serde_json::to_string(headers).unwrap_or_else(|err| {
        warn!(error = %err, "failed to serialize outbox headers, storing empty map");
        "{}".to_owned()
    })
}

fn decode_headers(id: i64, raw: &str) -> Headers {
    if raw.trim().is_empty() {
        return Headers::new();
    }
    serde_json::from_str(raw).unwrap_or_else(|err| {
        warn!(event_id = id, error = %err, "unreadable outbox headers, using empty map");
        Headers::new()
    })
}
