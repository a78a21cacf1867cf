use std::time::Duration;

use herald_dispatcher::domain::repository::OutboxStore;
use herald_dispatcher::domain::types::{
    AGGREGATE_ID_HEADER, CORRELATION_ID_HEADER, EVENT_ID_HEADER, EVENT_TYPE_HEADER,
    OutboxStatus, TRACEPARENT_HEADER,
};
use herald_dispatcher::error::DispatchError;
use herald_dispatcher::infra::memory::InMemoryOutboxStore;
use herald_dispatcher::propagation::is_valid_traceparent;
use herald_dispatcher::resilience::{CircuitBreakerConfig, CircuitState, RetryPolicy};
use herald_dispatcher::usecase::dispatch::{CycleReport, DispatchConfig};

use crate::helpers::{
    Behavior, FailingStore, MockJmsClient, MockKafkaProducer, SettleFailingStore, TOPIC,
    default_dispatcher, dispatcher, jms_target, kafka_target, order_event, seed,
};

const DLQ_TOPIC: &str = "outbox.events-dlq";

// ── dual publish ─────────────────────────────────────────────────────────────

#[tokio::test]
async fn should_publish_to_kafka_and_activemq_with_shared_headers() {
    let kafka = MockKafkaProducer::new(Behavior::Accept);
    let jms = MockJmsClient::new(Behavior::Accept);
    let d = default_dispatcher(vec![kafka_target(&kafka), jms_target(&jms)]);
    let ids = seed(d.store(), 1).await;

    let report = d.run_cycle().await.unwrap();
    assert_eq!(
        report,
        CycleReport {
            claimed: 1,
            published: 1,
            ..Default::default()
        }
    );

    let records = kafka.sent_to(TOPIC);
    assert_eq!(records.len(), 1);
    let record = &records[0];
    assert_eq!(record.key.as_deref(), Some(b"order-0".as_slice()));
    assert_eq!(
        record.payload.as_deref(),
        Some(br#"{"orderId":0}"#.as_slice())
    );
    assert_eq!(record.headers[EVENT_ID_HEADER], ids[0].to_string());
    assert_eq!(record.headers[EVENT_TYPE_HEADER], "OrderPlaced");
    assert_eq!(record.headers[AGGREGATE_ID_HEADER], "order-0");
    assert!(is_valid_traceparent(&record.headers[TRACEPARENT_HEADER]));

    let messages = jms.sent();
    assert_eq!(messages.len(), 1);
    let message = &messages[0];
    assert_eq!(Some(message.body.as_bytes()), record.payload.as_deref());
    assert_eq!(
        message.correlation_id.as_deref(),
        Some(record.headers[CORRELATION_ID_HEADER].as_str())
    );
    assert_eq!(
        message.properties[TRACEPARENT_HEADER],
        record.headers[TRACEPARENT_HEADER]
    );
    assert!(!message.properties.contains_key(CORRELATION_ID_HEADER));

    let event = d.store().get(ids[0]).unwrap();
    assert_eq!(event.status, OutboxStatus::Published);
    assert!(event.published_at.is_some());
}

#[tokio::test]
async fn should_keep_correlation_and_trace_context_written_with_the_event() {
    let traceparent = "00-0af7651916cd43dd8448eb211c80319c-b7ad6b7169203331-01";
    let kafka = MockKafkaProducer::new(Behavior::Accept);
    let jms = MockJmsClient::new(Behavior::Accept);
    let d = default_dispatcher(vec![kafka_target(&kafka), jms_target(&jms)]);
    let event = order_event(7)
        .with_header(CORRELATION_ID_HEADER, "corr-7")
        .with_header(TRACEPARENT_HEADER, traceparent);
    d.store().persist(&event).await.unwrap();

    d.run_cycle().await.unwrap();

    let record = &kafka.sent_to(TOPIC)[0];
    assert_eq!(record.headers[CORRELATION_ID_HEADER], "corr-7");
    assert_eq!(record.headers[TRACEPARENT_HEADER], traceparent);
    let message = &jms.sent()[0];
    assert_eq!(message.correlation_id.as_deref(), Some("corr-7"));
    assert_eq!(message.properties[TRACEPARENT_HEADER], traceparent);
}

#[tokio::test]
async fn should_publish_only_to_enabled_targets() {
    let jms = MockJmsClient::new(Behavior::Accept);
    let d = default_dispatcher(vec![jms_target(&jms)]);
    seed(d.store(), 3).await;

    let report = d.run_cycle().await.unwrap();
    assert_eq!(report.published, 3);
    assert_eq!(jms.sent().len(), 3);
}

// ── failures and retries ─────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn should_fail_event_but_still_deliver_to_activemq_when_kafka_keeps_failing() {
    let kafka = MockKafkaProducer::new(Behavior::FailAlways);
    let jms = MockJmsClient::new(Behavior::Accept);
    let d = default_dispatcher(vec![kafka_target(&kafka), jms_target(&jms)]);
    let ids = seed(d.store(), 1).await;

    let report = d.run_cycle().await.unwrap();
    assert_eq!(report.failed, 1);
    assert_eq!(kafka.attempts(), 3);
    assert_eq!(d.store().get(ids[0]).unwrap().status, OutboxStatus::Failed);

    // activemq accepted on the first attempt and is not sent to again
    assert_eq!(jms.attempts(), 1);
    let delivered = jms.sent();
    assert_eq!(delivered.len(), 1);
    assert_eq!(delivered[0].body, r#"{"orderId":0}"#);

    // every failed attempt leaves a dead-letter copy
    let dead = kafka.sent_to(DLQ_TOPIC);
    assert_eq!(dead.len(), 3);
    assert!(dead.iter().all(|r| r.key.as_deref() == Some(b"order-0".as_slice())));
    assert!(
        dead.iter()
            .all(|r| r.payload.as_deref() == Some(br#"{"orderId":0}"#.as_slice()))
    );
}

#[tokio::test(start_paused = true)]
async fn should_fail_event_after_kafka_succeeded_when_activemq_keeps_failing() {
    let kafka = MockKafkaProducer::new(Behavior::Accept);
    let jms = MockJmsClient::new(Behavior::FailAlways);
    let d = default_dispatcher(vec![kafka_target(&kafka), jms_target(&jms)]);
    let ids = seed(d.store(), 1).await;

    d.run_cycle().await.unwrap();

    // retries only go to the target that has not accepted yet
    assert_eq!(kafka.sent_to(TOPIC).len(), 1);
    assert_eq!(jms.attempts(), 3);
    assert_eq!(d.store().get(ids[0]).unwrap().status, OutboxStatus::Failed);
}

#[tokio::test(start_paused = true)]
async fn should_publish_after_transient_failures() {
    let kafka = MockKafkaProducer::new(Behavior::FailFirst(2));
    let jms = MockJmsClient::new(Behavior::Accept);
    let d = default_dispatcher(vec![kafka_target(&kafka), jms_target(&jms)]);
    let ids = seed(d.store(), 1).await;

    let report = d.run_cycle().await.unwrap();
    assert_eq!(report.published, 1);
    assert_eq!(kafka.attempts(), 3);
    assert_eq!(jms.sent().len(), 1);
    assert_eq!(d.store().get(ids[0]).unwrap().status, OutboxStatus::Published);
}

#[tokio::test(start_paused = true)]
async fn should_not_retry_a_rejected_message() {
    let kafka = MockKafkaProducer::new(Behavior::Reject);
    let d = default_dispatcher(vec![kafka_target(&kafka)]);
    let ids = seed(d.store(), 1).await;

    d.run_cycle().await.unwrap();

    assert_eq!(kafka.attempts(), 1);
    assert_eq!(kafka.sent_to(DLQ_TOPIC).len(), 1);
    assert_eq!(d.store().get(ids[0]).unwrap().status, OutboxStatus::Failed);
}

#[tokio::test(start_paused = true)]
async fn should_time_out_a_hanging_publish() {
    let kafka = MockKafkaProducer::new(Behavior::Slow(Duration::from_secs(60)));
    let d = default_dispatcher(vec![kafka_target(&kafka)]);
    let ids = seed(d.store(), 1).await;

    let started = tokio::time::Instant::now();
    let report = d.run_cycle().await.unwrap();

    assert_eq!(report.failed, 1);
    assert_eq!(kafka.attempts(), 3);
    assert_eq!(d.store().get(ids[0]).unwrap().status, OutboxStatus::Failed);
    // three 10s attempts plus 200ms and 400ms of backoff
    assert!(started.elapsed() >= Duration::from_millis(30_600));
    assert!(started.elapsed() < Duration::from_secs(60));
}

#[tokio::test]
async fn should_open_circuit_and_fail_remaining_events_without_sending() {
    let kafka = MockKafkaProducer::new(Behavior::FailAlways);
    let d = dispatcher(
        InMemoryOutboxStore::new(),
        vec![kafka_target(&kafka)],
        RetryPolicy::none(),
        CircuitBreakerConfig {
            failure_threshold: 2,
            ..CircuitBreakerConfig::default()
        },
        DispatchConfig {
            concurrency: 1,
            ..DispatchConfig::default()
        },
    );
    seed(d.store(), 4).await;

    let report = d.run_cycle().await.unwrap();

    assert_eq!(report.failed, 4);
    assert_eq!(kafka.attempts(), 2);
    assert_eq!(d.breaker().state(), CircuitState::Open);
    assert!(
        d.store()
            .events()
            .iter()
            .all(|e| e.status == OutboxStatus::Failed)
    );
}

// ── cycle mechanics ──────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn should_skip_a_cycle_while_another_is_running() {
    let kafka = MockKafkaProducer::new(Behavior::Slow(Duration::from_millis(100)));
    let d = default_dispatcher(vec![kafka_target(&kafka)]);
    seed(d.store(), 1).await;

    let (first, second) = tokio::join!(d.run_cycle(), d.run_cycle());

    assert_eq!(first.unwrap().published, 1);
    assert_eq!(second.unwrap(), CycleReport::skipped());
    assert_eq!(kafka.attempts(), 1);

    // the flag is released once the running cycle finishes
    assert!(!d.run_cycle().await.unwrap().skipped);
}

#[tokio::test(start_paused = true)]
async fn should_bound_publishes_in_flight_by_concurrency() {
    let kafka = MockKafkaProducer::new(Behavior::Slow(Duration::from_millis(50)));
    let d = dispatcher(
        InMemoryOutboxStore::new(),
        vec![kafka_target(&kafka)],
        RetryPolicy::default(),
        CircuitBreakerConfig::default(),
        DispatchConfig {
            concurrency: 3,
            ..DispatchConfig::default()
        },
    );
    seed(d.store(), 10).await;

    let report = d.run_cycle().await.unwrap();

    assert_eq!(report.published, 10);
    assert_eq!(kafka.in_flight.max(), 3);
}

#[tokio::test]
async fn should_claim_at_most_batch_size_per_cycle() {
    let kafka = MockKafkaProducer::new(Behavior::Accept);
    let d = dispatcher(
        InMemoryOutboxStore::new(),
        vec![kafka_target(&kafka)],
        RetryPolicy::default(),
        CircuitBreakerConfig::default(),
        DispatchConfig {
            batch_size: 4,
            ..DispatchConfig::default()
        },
    );
    seed(d.store(), 10).await;

    assert_eq!(d.run_cycle().await.unwrap().claimed, 4);
    assert_eq!(d.run_cycle().await.unwrap().claimed, 4);
    assert_eq!(d.run_cycle().await.unwrap().claimed, 2);
    assert_eq!(d.run_cycle().await.unwrap().claimed, 0);

    let stats = d.store().status_counts().await.unwrap();
    assert_eq!(stats.published, 10);
    assert_eq!(stats.total(), 10);
}

#[tokio::test(start_paused = true)]
async fn should_settle_the_rest_of_the_batch_when_one_settle_fails() {
    let kafka = MockKafkaProducer::new(Behavior::Slow(Duration::from_millis(10)));
    let d = dispatcher(
        SettleFailingStore::new(1),
        vec![kafka_target(&kafka)],
        RetryPolicy::default(),
        CircuitBreakerConfig::default(),
        DispatchConfig::default(),
    );
    seed(d.store(), 8).await;

    let result = d.run_cycle().await;
    assert!(
        matches!(result, Err(DispatchError::Unsettled { count: 1, .. })),
        "expected one unsettled event, got {result:?}"
    );
    assert_eq!(kafka.attempts(), 8);

    let stats = d.store().status_counts().await.unwrap();
    assert_eq!(stats.published, 7);
    assert_eq!(stats.in_progress, 1);
    assert_eq!(
        d.store().inner.get(1).unwrap().status,
        OutboxStatus::InProgress
    );
}

#[tokio::test]
async fn should_stamp_published_at_no_earlier_than_created_at() {
    let kafka = MockKafkaProducer::new(Behavior::Accept);
    let d = default_dispatcher(vec![kafka_target(&kafka)]);
    let ids = seed(d.store(), 3).await;

    d.run_cycle().await.unwrap();

    for id in ids {
        let event = d.store().get(id).unwrap();
        assert_eq!(event.status, OutboxStatus::Published);
        let published_at = event.published_at.unwrap();
        assert!(
            published_at >= event.created_at,
            "published_at {published_at} precedes created_at {}",
            event.created_at
        );
    }
}

#[tokio::test]
async fn should_abort_cycle_when_the_store_is_down() {
    let kafka = MockKafkaProducer::new(Behavior::Accept);
    let d = dispatcher(
        FailingStore,
        vec![kafka_target(&kafka)],
        RetryPolicy::default(),
        CircuitBreakerConfig::default(),
        DispatchConfig::default(),
    );

    let result = d.run_cycle().await;
    assert!(
        matches!(result, Err(DispatchError::Store(_))),
        "expected Store error, got {result:?}"
    );
    assert_eq!(kafka.attempts(), 0);
}
