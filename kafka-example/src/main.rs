//! Produce a demo payload, then consume the topic back and print what passes the read-since filter.
use chrono::Utc;
use envconfig::Envconfig;
use tokio::sync::mpsc;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use kafka_common::metrics::{serve, setup_metrics_router, setup_prometheus_recorder};
use kafka_common::{BufferPool, Cache, KafkaClient, Metrics};
use kafka_consumer::{Worker, WorkerConfig};
use kafka_producer::{KafkaAsyncProducer, OutboundRecord, Producer, ProducerSettings};

use crate::config::Config;
use crate::event::{decode, Payload, PayloadEvent};

mod config;
mod event;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .with(EnvFilter::from_default_env())
        .init();

    let config = Config::init_from_env()?;

    let recorder = setup_prometheus_recorder()?;
    let router = setup_metrics_router(recorder.handle());
    let metrics = Metrics::new(recorder);

    let bind = config.bind();
    tokio::task::spawn(async move {
        if let Err(e) = serve(router, &bind).await {
            error!("failed to serve metrics on {}: {}", bind, e);
        }
    });

    let client = KafkaClient::connect(&config.kafka).await?;
    let topic = config.producer.kafka_producer_topic.clone();

    produce_payload(&client, &config).await?;

    let worker_config = WorkerConfig::builder(&config.consumer_group, vec![topic])
        .read_since(config.read_since.resolve(Utc::now()))
        .batch_size(config.batch_size)
        .keep_offset(config.keep_offset)
        .shutdown_timeout(config.shutdown_timeout_ms.0)
        .build()?;

    let (destination, events) = mpsc::channel(config.batch_size);
    let reader = tokio::spawn(print_events(events, config.batch_size));

    let worker = Worker::new(client, worker_config, destination, decode, metrics.clone());
    let result = worker.run().await;

    // The worker dropped its sender, so the reader drains what is left and stops
    reader.await?;
    metrics.close();

    result?;
    Ok(())
}

async fn produce_payload(client: &KafkaClient, config: &Config) -> anyhow::Result<()> {
    let settings = ProducerSettings::builder(&config.producer.kafka_producer_topic)
        .on_success(|record: &OutboundRecord| {
            info!(
                topic = %record.topic,
                value = %String::from_utf8_lossy(&record.value),
                "payload sent"
            );
        })
        .on_error(|e| error!(topic = %e.record.topic, error = %e.error, "payload failed"))
        .build()?;

    let kafka = KafkaAsyncProducer::from_config(client, &config.producer, settings.reporting())?;
    let producer: Producer<Payload> = Producer::json(kafka, settings, BufferPool::default());

    let written = Utc::now() - chrono::Duration::hours(config.payload_age_hours);
    producer
        .send(
            "",
            &Payload {
                id: 47,
                url: "http://example.com/image6.jpg".to_owned(),
                product_id: 88,
                time_write: written.timestamp(),
            },
        )
        .await?;

    producer.close().await?;
    Ok(())
}

/// Collect up to `batch_size` queued events at a time and print them in order.
async fn print_events(mut events: mpsc::Receiver<PayloadEvent>, batch_size: usize) {
    let mut batch = Cache::new(batch_size);

    while let Some(event) = events.recv().await {
        batch.append(event);
        while batch.len() < batch_size {
            match events.try_recv() {
                Ok(event) => batch.append(event),
                Err(_) => break,
            }
        }

        while let Some(event) = batch.next() {
            info!(
                topic = %event.topic,
                partition = event.partition,
                offset = event.offset,
                "{:?}",
                event.payload
            );
        }
        batch.reset();
    }
    info!("event stream closed");
}
