use std::sync::Arc;

use anyhow::Context as _;
use sea_orm::Database;
use tokio::sync::watch;
use tracing::info;

use herald_core::tracing::{DEFAULT_DIRECTIVES, init_tracing};
use herald_dispatcher::broker::{JmsPublisher, KafkaProducer, KafkaPublisher, PublishTarget};
use herald_dispatcher::config::DispatcherConfig;
use herald_dispatcher::infra::activemq::ActiveMqRestClient;
use herald_dispatcher::infra::db::DbOutboxStore;
use herald_dispatcher::resilience::CircuitBreaker;
use herald_dispatcher::router::build_router;
use herald_dispatcher::state::AppState;
use herald_dispatcher::usecase::dispatch::OutboxDispatcher;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing(DEFAULT_DIRECTIVES);

    let config = DispatcherConfig::from_env();

    let db = Arc::new(
        Database::connect(&config.database_url)
            .await
            .context("failed to connect to database")?,
    );

    let kafka = if config.enable_kafka {
        Some(kafka_producer(&config)?)
    } else {
        None
    };
    let targets = build_targets(&config, kafka.clone())?;
    if targets.is_empty() {
        anyhow::bail!(
            "no publish target enabled; set OUTBOX_ENABLE_KAFKA or OUTBOX_ENABLE_ACTIVEMQ"
        );
    }

    let dispatcher = Arc::new(OutboxDispatcher::new(
        DbOutboxStore { db: Arc::clone(&db) },
        targets,
        config.retry_policy(),
        CircuitBreaker::new(config.breaker()),
        config.dispatch(),
    ));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let worker = tokio::spawn({
        let dispatcher = Arc::clone(&dispatcher);
        let shutdown = shutdown_rx.clone();
        async move { dispatcher.run(shutdown).await }
    });
    let consumer = spawn_consumer(&config, kafka, shutdown_rx)?;

    let router = build_router(AppState::new(db));
    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;

    info!("dispatcher listening on {addr}");
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    let _ = shutdown_tx.send(true);
    worker.await.context("dispatcher task failed")?;
    if let Some(consumer) = consumer {
        consumer.await.context("consumer task failed")?;
    }
    Ok(())
}

fn build_targets(
    config: &DispatcherConfig,
    kafka: Option<Arc<dyn KafkaProducer>>,
) -> anyhow::Result<Vec<PublishTarget>> {
    let mut targets = Vec::new();
    if let Some(producer) = kafka {
        targets.push(PublishTarget::new(
            config.kafka_topic.as_str(),
            Arc::new(KafkaPublisher::new(producer, config.kafka_dlq_suffix.as_str())),
        ));
    }
    if config.enable_activemq {
        let client = ActiveMqRestClient::new(
            config.activemq_url.as_str(),
            config.activemq_user.as_str(),
            config.activemq_password.as_str(),
        )?;
        targets.push(PublishTarget::new(
            config.jms_destination.as_str(),
            Arc::new(JmsPublisher::new(Arc::new(client))),
        ));
    }
    Ok(targets)
}

#[cfg(feature = "kafka")]
fn kafka_producer(config: &DispatcherConfig) -> anyhow::Result<Arc<dyn KafkaProducer>> {
    use herald_dispatcher::infra::kafka::RdKafkaProducer;

    let producer = RdKafkaProducer::new(&config.kafka_bootstrap_servers, "herald-dispatcher")?;
    Ok(Arc::new(producer))
}

#[cfg(not(feature = "kafka"))]
fn kafka_producer(_config: &DispatcherConfig) -> anyhow::Result<Arc<dyn KafkaProducer>> {
    anyhow::bail!(
        "OUTBOX_ENABLE_KAFKA is on but this binary was built without the `kafka` feature"
    )
}

/// With `KAFKA_CONSUMER_GROUP` set, consume the outbox topic through the
/// dead-letter guard and log every event.
#[cfg(feature = "kafka")]
fn spawn_consumer(
    config: &DispatcherConfig,
    kafka: Option<Arc<dyn KafkaProducer>>,
    shutdown: watch::Receiver<bool>,
) -> anyhow::Result<Option<tokio::task::JoinHandle<()>>> {
    use herald_dispatcher::dead_letter::ConsumedRecord;
    use herald_dispatcher::infra::kafka::KafkaConsumerLoop;

    let (Some(group), Some(producer)) = (config.kafka_consumer_group.as_deref(), kafka) else {
        return Ok(None);
    };
    let consumer = KafkaConsumerLoop::new(
        &config.kafka_bootstrap_servers,
        group,
        &[config.kafka_topic.as_str()],
        config.kafka_dead_letter_guard(producer),
    )?;
    Ok(Some(tokio::spawn(async move {
        consumer
            .run(
                |record: ConsumedRecord| async move {
                    info!(
                        topic = %record.topic,
                        partition = record.partition,
                        offset = record.offset,
                        key = ?record.key.as_deref().map(String::from_utf8_lossy),
                        "event consumed"
                    );
                    Ok::<_, anyhow::Error>(())
                },
                shutdown,
            )
            .await
    })))
}

#[cfg(not(feature = "kafka"))]
fn spawn_consumer(
    config: &DispatcherConfig,
    _kafka: Option<Arc<dyn KafkaProducer>>,
    _shutdown: watch::Receiver<bool>,
) -> anyhow::Result<Option<tokio::task::JoinHandle<()>>> {
    if config.kafka_consumer_group.is_some() {
        tracing::warn!("KAFKA_CONSUMER_GROUP ignored: built without the `kafka` feature");
    }
    Ok(None)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("shutdown signal received");
}
