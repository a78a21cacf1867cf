use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use herald_dispatcher::broker::{
    DeliveryReport, JmsClient, JmsMessage, JmsPublisher, KafkaProducer, KafkaPublisher,
    KafkaRecord, PublishTarget,
};
use herald_dispatcher::domain::repository::OutboxStore;
use herald_dispatcher::domain::types::{NewOutboxEvent, OutboxEvent, OutboxStats};
use herald_dispatcher::error::{OutboxError, PublishError};
use herald_dispatcher::infra::memory::InMemoryOutboxStore;
use herald_dispatcher::resilience::{CircuitBreaker, CircuitBreakerConfig, RetryPolicy};
use herald_dispatcher::usecase::dispatch::{DispatchConfig, OutboxDispatcher};

pub const TOPIC: &str = "outbox.events";
pub const QUEUE: &str = "outbox.events";

/// How a mock transport answers a send.
#[derive(Debug, Clone)]
pub enum Behavior {
    Accept,
    /// `Unavailable` for the first `n` sends, then accept.
    FailFirst(u32),
    FailAlways,
    Reject,
    /// Accept after sleeping.
    Slow(Duration),
}

impl Behavior {
    async fn apply(&self, call: u32, broker: &str) -> Result<(), PublishError> {
        match self {
            Self::Accept => Ok(()),
            Self::FailFirst(n) if call < *n => Err(PublishError::unavailable(broker, "down")),
            Self::FailFirst(_) => Ok(()),
            Self::FailAlways => Err(PublishError::unavailable(broker, "down")),
            Self::Reject => Err(PublishError::rejected(broker, "payload refused")),
            Self::Slow(delay) => {
                tokio::time::sleep(*delay).await;
                Ok(())
            }
        }
    }
}

/// Tracks concurrent sends.
#[derive(Default)]
pub struct InFlight {
    current: AtomicUsize,
    max: AtomicUsize,
}

impl InFlight {
    fn enter(&self) {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.max.fetch_max(now, Ordering::SeqCst);
    }

    fn leave(&self) {
        self.current.fetch_sub(1, Ordering::SeqCst);
    }

    pub fn max(&self) -> usize {
        self.max.load(Ordering::SeqCst)
    }
}

// ── MockKafkaProducer ────────────────────────────────────────────────────────

/// Applies `behavior` to sends on the main topic; dead-letter topics always
/// accept. Every record it is handed is kept.
pub struct MockKafkaProducer {
    pub behavior: Behavior,
    pub sent: Mutex<Vec<KafkaRecord>>,
    pub in_flight: InFlight,
    calls: AtomicU32,
}

impl MockKafkaProducer {
    pub fn new(behavior: Behavior) -> Arc<Self> {
        Arc::new(Self {
            behavior,
            sent: Mutex::new(vec![]),
            in_flight: InFlight::default(),
            calls: AtomicU32::new(0),
        })
    }

    pub fn sent_to(&self, topic: &str) -> Vec<KafkaRecord> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.topic == topic)
            .cloned()
            .collect()
    }

    /// Sends attempted on the main topic, successful or not.
    pub fn attempts(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl KafkaProducer for MockKafkaProducer {
    async fn send(&self, record: KafkaRecord) -> Result<DeliveryReport, PublishError> {
        let is_dlq = record.topic.ends_with("-dlq");
        self.sent.lock().unwrap().push(record);
        if is_dlq {
            return Ok(DeliveryReport {
                partition: 0,
                offset: 0,
            });
        }

        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        self.in_flight.enter();
        let result = self.behavior.apply(call, "kafka").await;
        self.in_flight.leave();
        result.map(|()| DeliveryReport {
            partition: 0,
            offset: i64::from(call),
        })
    }
}

// ── MockJmsClient ────────────────────────────────────────────────────────────

pub struct MockJmsClient {
    pub behavior: Behavior,
    pub sent: Mutex<Vec<JmsMessage>>,
    calls: AtomicU32,
}

impl MockJmsClient {
    pub fn new(behavior: Behavior) -> Arc<Self> {
        Arc::new(Self {
            behavior,
            sent: Mutex::new(vec![]),
            calls: AtomicU32::new(0),
        })
    }

    pub fn sent(&self) -> Vec<JmsMessage> {
        self.sent.lock().unwrap().clone()
    }

    pub fn attempts(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl JmsClient for MockJmsClient {
    async fn send(&self, message: JmsMessage) -> Result<(), PublishError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        let result = self.behavior.apply(call, "activemq").await;
        if result.is_ok() {
            self.sent.lock().unwrap().push(message);
        }
        result
    }
}

// ── FailingStore ─────────────────────────────────────────────────────────────

/// A store whose database is gone.
pub struct FailingStore;

fn db_down(op: &str) -> OutboxError {
    OutboxError::from(anyhow::anyhow!("connection refused").context(op.to_owned()))
}

impl OutboxStore for FailingStore {
    async fn persist(&self, _event: &NewOutboxEvent) -> Result<i64, OutboxError> {
        Err(db_down("insert outbox event"))
    }

    async fn claim_batch(&self, _limit: u64) -> Result<Vec<OutboxEvent>, OutboxError> {
        Err(db_down("claim outbox batch"))
    }

    async fn mark_published(&self, _id: i64) -> Result<(), OutboxError> {
        Err(db_down("mark outbox event published"))
    }

    async fn mark_failed(&self, _id: i64, _reason: &str) -> Result<(), OutboxError> {
        Err(db_down("mark outbox event failed"))
    }

    async fn status_counts(&self) -> Result<OutboxStats, OutboxError> {
        Err(db_down("count outbox rows by status"))
    }

    async fn count_stale_claims(&self, _older_than: Duration) -> Result<u64, OutboxError> {
        Err(db_down("count stale outbox claims"))
    }
}

// ── SettleFailingStore ───────────────────────────────────────────────────────

/// In-memory store whose `mark_published` fails for one row.
pub struct SettleFailingStore {
    pub inner: InMemoryOutboxStore,
    pub broken_id: i64,
}

impl SettleFailingStore {
    pub fn new(broken_id: i64) -> Self {
        Self {
            inner: InMemoryOutboxStore::new(),
            broken_id,
        }
    }
}

impl OutboxStore for SettleFailingStore {
    async fn persist(&self, event: &NewOutboxEvent) -> Result<i64, OutboxError> {
        self.inner.persist(event).await
    }

    async fn claim_batch(&self, limit: u64) -> Result<Vec<OutboxEvent>, OutboxError> {
        self.inner.claim_batch(limit).await
    }

    async fn mark_published(&self, id: i64) -> Result<(), OutboxError> {
        if id == self.broken_id {
            return Err(db_down("mark outbox event published"));
        }
        self.inner.mark_published(id).await
    }

    async fn mark_failed(&self, id: i64, reason: &str) -> Result<(), OutboxError> {
        self.inner.mark_failed(id, reason).await
    }

    async fn status_counts(&self) -> Result<OutboxStats, OutboxError> {
        self.inner.status_counts().await
    }

    async fn count_stale_claims(&self, older_than: Duration) -> Result<u64, OutboxError> {
        self.inner.count_stale_claims(older_than).await
    }
}

// ── Builders ─────────────────────────────────────────────────────────────────

pub fn kafka_target(producer: &Arc<MockKafkaProducer>) -> PublishTarget {
    PublishTarget::new(TOPIC, Arc::new(KafkaPublisher::new(producer.clone(), "-dlq")))
}

pub fn jms_target(client: &Arc<MockJmsClient>) -> PublishTarget {
    PublishTarget::new(QUEUE, Arc::new(JmsPublisher::new(client.clone())))
}

pub fn dispatcher<S: OutboxStore>(
    store: S,
    targets: Vec<PublishTarget>,
    retry: RetryPolicy,
    breaker: CircuitBreakerConfig,
    config: DispatchConfig,
) -> OutboxDispatcher<S> {
    OutboxDispatcher::new(store, targets, retry, CircuitBreaker::new(breaker), config)
}

/// In-memory dispatcher with default policies.
pub fn default_dispatcher(targets: Vec<PublishTarget>) -> OutboxDispatcher<InMemoryOutboxStore> {
    dispatcher(
        InMemoryOutboxStore::new(),
        targets,
        RetryPolicy::default(),
        CircuitBreakerConfig::default(),
        DispatchConfig::default(),
    )
}

pub fn order_event(n: usize) -> NewOutboxEvent {
    NewOutboxEvent::new(
        "Order",
        format!("order-{n}"),
        "OrderPlaced",
        format!(r#"{{"orderId":{n}}}"#),
    )
}

pub async fn seed<S: OutboxStore>(store: &S, n: usize) -> Vec<i64> {
    let mut ids = Vec::with_capacity(n);
    for i in 0..n {
        ids.push(store.persist(&order_event(i)).await.unwrap());
    }
    ids
}
