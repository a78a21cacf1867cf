use std::sync::Arc;
use std::time::Duration;

use herald_core::env::{flag, optional, parse_or, required, string_or};

use crate::broker::kafka::DEFAULT_DLQ_SUFFIX;
use crate::broker::{JmsClient, KafkaProducer};
use crate::dead_letter::jms::DEFAULT_DLQ_DESTINATION;
use crate::dead_letter::{JmsDeadLetterGuard, KafkaDeadLetterGuard};
use crate::resilience::{CircuitBreakerConfig, RetryPolicy};
use crate::usecase::dispatch::DispatchConfig;

/// Whether this build carries the real Kafka transport. `OUTBOX_ENABLE_KAFKA`
/// defaults to it, so a build without the `kafka` feature starts with
/// ActiveMQ alone instead of refusing its own defaults.
pub const KAFKA_BUILT_IN: bool = cfg!(feature = "kafka");

/// Dispatcher configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// PostgreSQL connection URL. Env var: `DATABASE_URL`.
    pub database_url: String,
    /// Health/stats HTTP port (default 3120). Env var: `DISPATCHER_PORT`.
    pub port: u16,
    pub batch_size: u64,
    pub poll_interval_ms: u64,
    pub concurrency: usize,
    pub publish_timeout_ms: u64,
    pub stale_after_secs: u64,

    pub enable_kafka: bool,
    pub enable_activemq: bool,
    pub kafka_topic: String,
    pub jms_destination: String,

    pub kafka_bootstrap_servers: String,
    pub kafka_dlq_suffix: String,
    /// Consumer group of the guarded outbox-topic consumer; unset disables it.
    pub kafka_consumer_group: Option<String>,
    pub activemq_url: String,
    pub activemq_user: String,
    pub activemq_password: String,
    pub jms_dlq_destination: String,

    pub retry_max_attempts: u32,
    pub retry_base_delay_ms: u64,
    pub retry_max_delay_ms: u64,
    pub breaker_failure_threshold: u32,
    pub breaker_open_ms: u64,
}

impl DispatcherConfig {
    pub fn from_env() -> Self {
        Self::defaults(required("DATABASE_URL"))
    }

    /// Every setting except the database URL read from the environment,
    /// falling back to the documented defaults.
    fn defaults(database_url: String) -> Self {
        Self {
            database_url,
            port: parse_or("DISPATCHER_PORT", 3120),
            batch_size: parse_or("OUTBOX_BATCH_SIZE", 25),
            poll_interval_ms: parse_or("OUTBOX_POLL_INTERVAL_MS", 5_000),
            concurrency: parse_or("OUTBOX_CONCURRENCY", 4),
            publish_timeout_ms: parse_or("OUTBOX_PUBLISH_TIMEOUT_MS", 10_000),
            stale_after_secs: parse_or("OUTBOX_STALE_AFTER_SECS", 300),

            enable_kafka: flag("OUTBOX_ENABLE_KAFKA", KAFKA_BUILT_IN),
            enable_activemq: flag("OUTBOX_ENABLE_ACTIVEMQ", true),
            kafka_topic: string_or("OUTBOX_KAFKA_TOPIC", "outbox.events"),
            jms_destination: string_or("OUTBOX_JMS_DESTINATION", "outbox.events"),

            kafka_bootstrap_servers: string_or("KAFKA_BOOTSTRAP_SERVERS", "localhost:9092"),
            kafka_dlq_suffix: string_or("KAFKA_DLQ_SUFFIX", DEFAULT_DLQ_SUFFIX),
            kafka_consumer_group: optional("KAFKA_CONSUMER_GROUP"),
            activemq_url: string_or("ACTIVEMQ_URL", "http://localhost:8161"),
            activemq_user: string_or("ACTIVEMQ_USER", "admin"),
            activemq_password: string_or("ACTIVEMQ_PASSWORD", "admin"),
            jms_dlq_destination: string_or("JMS_DLQ_DESTINATION", DEFAULT_DLQ_DESTINATION),

            retry_max_attempts: parse_or("RETRY_MAX_ATTEMPTS", 3),
            retry_base_delay_ms: parse_or("RETRY_BASE_DELAY_MS", 200),
            retry_max_delay_ms: parse_or("RETRY_MAX_DELAY_MS", 2_000),
            breaker_failure_threshold: parse_or("BREAKER_FAILURE_THRESHOLD", 5),
            breaker_open_ms: parse_or("BREAKER_OPEN_MS", 30_000),
        }
    }

    pub fn dispatch(&self) -> DispatchConfig {
        DispatchConfig {
            batch_size: self.batch_size,
            poll_interval: Duration::from_millis(self.poll_interval_ms.max(1)),
            concurrency: self.concurrency.max(1),
            publish_timeout: Duration::from_millis(self.publish_timeout_ms),
            stale_after: Duration::from_secs(self.stale_after_secs),
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.retry_max_attempts,
            base_delay: Duration::from_millis(self.retry_base_delay_ms),
            max_delay: Duration::from_millis(self.retry_max_delay_ms),
        }
    }

    pub fn breaker(&self) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: self.breaker_failure_threshold.max(1),
            open_duration: Duration::from_millis(self.breaker_open_ms),
            ..CircuitBreakerConfig::default()
        }
    }

    pub fn kafka_dead_letter_guard(
        &self,
        producer: Arc<dyn KafkaProducer>,
    ) -> KafkaDeadLetterGuard {
        KafkaDeadLetterGuard::new(producer, self.kafka_dlq_suffix.as_str())
    }

    pub fn jms_dead_letter_guard(&self, client: Arc<dyn JmsClient>) -> JmsDeadLetterGuard {
        JmsDeadLetterGuard::new(client, self.jms_dlq_destination.as_str())
    }
}
