use std::time::Duration;

use async_trait::async_trait;
use kafka_common::KafkaClient;
use rdkafka::error::{KafkaError, RDKafkaErrorCode};
use rdkafka::producer::{DeliveryFuture, FutureProducer, FutureRecord, Producer};
use rdkafka::ClientConfig;
use tokio::sync::mpsc;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, warn};

use crate::config::{ProducerConfig, Reporting};
use crate::error::ProducerError;
use crate::record::{AsyncProducer, DeliveryError, OutboundRecord, ProducerEvent, ResultSource};

const FLUSH_TIMEOUT: Duration = Duration::from_secs(30);
const QUEUE_FULL_BACKOFF: Duration = Duration::from_millis(10);

/// [`AsyncProducer`] backed by an rdkafka [`FutureProducer`].
///
/// A background task moves records from the input queue into librdkafka and waits for their
/// delivery reports concurrently.
pub struct KafkaAsyncProducer {
    input: mpsc::Sender<OutboundRecord>,
    results: Option<mpsc::Receiver<ProducerEvent>>,
    pump: Option<JoinHandle<Result<(), ProducerError>>>,
}

impl KafkaAsyncProducer {
    pub fn from_config(
        client: &KafkaClient,
        config: &ProducerConfig,
        reporting: Reporting,
    ) -> Result<Self, ProducerError> {
        let mut client_config = client.client_config();
        config.apply(&mut client_config);
        Self::new(client_config, config.kafka_producer_input_capacity, reporting)
    }

    pub fn new(
        client_config: ClientConfig,
        input_capacity: usize,
        reporting: Reporting,
    ) -> Result<Self, ProducerError> {
        debug!("rdkafka producer configuration: {:?}", client_config);
        let producer: FutureProducer = client_config.create()?;

        let capacity = input_capacity.max(1);
        let (input, records) = mpsc::channel(capacity);
        let (results_tx, results) = mpsc::channel(capacity);
        let pump = tokio::spawn(pump(producer, records, results_tx, reporting));

        Ok(Self {
            input,
            results: Some(results),
            pump: Some(pump),
        })
    }
}

#[async_trait]
impl AsyncProducer for KafkaAsyncProducer {
    fn input(&self) -> mpsc::Sender<OutboundRecord> {
        self.input.clone()
    }

    fn take_results(&mut self) -> Option<mpsc::Receiver<ProducerEvent>> {
        self.results.take()
    }

    /// Returns once every clone of the input has been dropped and pending records are flushed.
    async fn close(&mut self) -> Result<(), ProducerError> {
        let (closed, _) = mpsc::channel(1);
        drop(std::mem::replace(&mut self.input, closed));

        if let Some(pump) = self.pump.take() {
            pump.await??;
        }
        Ok(())
    }
}

type Delivered = (OutboundRecord, Result<(), KafkaError>);

async fn pump(
    producer: FutureProducer,
    mut records: mpsc::Receiver<OutboundRecord>,
    results: mpsc::Sender<ProducerEvent>,
    reporting: Reporting,
) -> Result<(), ProducerError> {
    let mut deliveries: JoinSet<Delivered> = JoinSet::new();

    loop {
        tokio::select! {
            record = records.recv() => match record {
                Some(record) => match enqueue(&producer, &record).await {
                    Ok(delivery) => {
                        deliveries.spawn(await_delivery(record, delivery));
                    }
                    Err(e) => report(&results, reporting, record, Err(e)).await,
                },
                None => break,
            },
            Some(done) = deliveries.join_next(), if !deliveries.is_empty() => {
                handle_delivered(&results, reporting, done).await;
            }
        }
    }

    info!(pending = deliveries.len(), "producer input closed, flushing");
    let flushing = producer.clone();
    let flushed = tokio::task::spawn_blocking(move || flushing.flush(FLUSH_TIMEOUT)).await?;
    if let Err(e) = &flushed {
        warn!(error = %e, "failed to flush pending messages");
    }

    while let Some(done) = deliveries.join_next().await {
        handle_delivered(&results, reporting, done).await;
    }

    for source in [ResultSource::Successes, ResultSource::Errors] {
        drop(results.send(ProducerEvent::Closed(source)).await);
    }

    flushed.map_err(ProducerError::from)
}

/// Hand the record to librdkafka, waiting while its local queue is full.
async fn enqueue(
    producer: &FutureProducer,
    record: &OutboundRecord,
) -> Result<DeliveryFuture, KafkaError> {
    loop {
        let sent = producer
            .send_result(FutureRecord {
                topic: record.topic.as_str(),
                payload: Some(&record.value[..]),
                partition: None,
                key: record.key.as_deref(),
                timestamp: None,
                headers: None,
            })
            .map_err(|(e, _)| e);

        match sent {
            Err(KafkaError::MessageProduction(RDKafkaErrorCode::QueueFull)) => {
                debug!(topic = %record.topic, "producer queue full, retrying");
                tokio::time::sleep(QUEUE_FULL_BACKOFF).await;
            }
            other => return other,
        }
    }
}

async fn await_delivery(record: OutboundRecord, delivery: DeliveryFuture) -> Delivered {
    let outcome = match delivery.await {
        Ok(Ok(_)) => Ok(()),
        Ok(Err((e, _))) => Err(e),
        // Dropped by librdkafka before a report arrived
        Err(_) => Err(KafkaError::Canceled),
    };
    (record, outcome)
}

async fn handle_delivered(
    results: &mpsc::Sender<ProducerEvent>,
    reporting: Reporting,
    done: Result<Delivered, tokio::task::JoinError>,
) {
    match done {
        Ok((record, outcome)) => report(results, reporting, record, outcome).await,
        Err(e) => error!("join error while waiting on delivery report: {:?}", e),
    }
}

async fn report(
    results: &mpsc::Sender<ProducerEvent>,
    reporting: Reporting,
    record: OutboundRecord,
    outcome: Result<(), KafkaError>,
) {
    let event = match outcome {
        Ok(()) if reporting.successes => ProducerEvent::Success(record),
        Ok(()) => return,
        Err(error) if reporting.errors => ProducerEvent::Error(DeliveryError { record, error }),
        Err(error) => {
            error!(topic = %record.topic, error = %error, "failed to deliver message");
            return;
        }
    };
    // Nobody is listening once the producer skipped its result loop
    drop(results.send(event).await);
}
