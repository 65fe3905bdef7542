use kafka_common::BufferPool;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::ProducerSettings;
use crate::encoder::{Encoder, JsonEncoder};
use crate::error::ProducerError;
use crate::handlers::{log_error, log_success, ErrorCallback, SuccessCallback};
use crate::record::{AsyncProducer, OutboundRecord, ProducerEvent, ResultSource};

/// Sends values of type `T` to a single topic.
///
/// Values are encoded into buffers taken from the pool. Buffers of delivered records go back to
/// the pool once the success callback has run.
pub struct Producer<T: ?Sized> {
    topic: String,
    input: mpsc::Sender<OutboundRecord>,
    client: Box<dyn AsyncProducer>,
    encoder: Box<dyn Encoder<T>>,
    pool: BufferPool,
    result_loop: Option<JoinHandle<()>>,
}

impl<T: Serialize + ?Sized> Producer<T> {
    pub fn json<P>(client: P, settings: ProducerSettings, pool: BufferPool) -> Self
    where
        P: AsyncProducer + 'static,
    {
        Self::new(client, settings, JsonEncoder, pool)
    }
}

impl<T: ?Sized> Producer<T> {
    pub fn new<P, E>(mut client: P, settings: ProducerSettings, encoder: E, pool: BufferPool) -> Self
    where
        P: AsyncProducer + 'static,
        E: Encoder<T> + 'static,
    {
        let input = client.input();
        let results = client.take_results();

        // Dropping the receiver makes the client discard results instead of queueing them
        let result_loop = match results {
            Some(results) if settings.runs_result_loop() => {
                let on_success = settings.on_success().unwrap_or_else(log_success);
                let on_error = settings.on_error().unwrap_or_else(log_error);
                Some(tokio::spawn(run_result_loop(
                    results,
                    on_success,
                    on_error,
                    pool.clone(),
                )))
            }
            _ => None,
        };

        Self {
            topic: settings.topic,
            input,
            client: Box::new(client),
            encoder: Box::new(encoder),
            pool,
            result_loop,
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Encode `value` and queue it for sending. An empty `key` leaves partitioning to the
    /// broker client.
    ///
    /// Waits only for room on the input queue. Delivery results go to the callbacks.
    pub async fn send(&self, key: &str, value: &T) -> Result<(), ProducerError> {
        let mut buffer = self.pool.acquire();
        if let Err(e) = self.encoder.encode(value, &mut buffer) {
            self.pool.release(buffer);
            error!(topic = %self.topic, error = %e, "can't encode message");
            return Err(ProducerError::Encode(e));
        }

        let record = OutboundRecord::new(&self.topic, key, buffer);
        if let Err(mpsc::error::SendError(record)) = self.input.send(record).await {
            self.pool.release(record.value);
            return Err(ProducerError::InputClosed);
        }
        Ok(())
    }

    /// Flush pending records, then wait for every result to be handled.
    pub async fn close(self) -> Result<(), ProducerError> {
        let Producer {
            input,
            mut client,
            result_loop,
            ..
        } = self;

        drop(input);
        client.close().await?;

        if let Some(result_loop) = result_loop {
            result_loop.await?;
        }
        info!("producer closed");
        Ok(())
    }
}

/// Drain the result queue until both sources have sent their closed sentinel.
async fn run_result_loop(
    mut results: mpsc::Receiver<ProducerEvent>,
    on_success: SuccessCallback,
    on_error: ErrorCallback,
    pool: BufferPool,
) {
    let mut successes_open = true;
    let mut errors_open = true;

    while successes_open || errors_open {
        match results.recv().await {
            Some(ProducerEvent::Success(record)) => {
                on_success(&record);
                pool.release(record.value);
            }
            Some(ProducerEvent::Error(e)) => on_error(&e),
            Some(ProducerEvent::Closed(ResultSource::Successes)) => successes_open = false,
            Some(ProducerEvent::Closed(ResultSource::Errors)) => errors_open = false,
            None => {
                warn!("result queue dropped before both sources were closed");
                break;
            }
        }
    }
    debug!("result loop finished");
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use bytes::BytesMut;
    use rdkafka::error::KafkaError;
    use std::sync::{Arc, Mutex};

    use crate::encoder::EncodeError;
    use crate::record::DeliveryError;

    /// Echoes every record as a success, except those keyed "fail".
    struct EchoProducer {
        input: mpsc::Sender<OutboundRecord>,
        results: Option<mpsc::Receiver<ProducerEvent>>,
        pump: Option<JoinHandle<()>>,
    }

    impl EchoProducer {
        fn new() -> Self {
            let (input, mut records) = mpsc::channel::<OutboundRecord>(8);
            let (results_tx, results) = mpsc::channel(8);
            let pump = tokio::spawn(async move {
                while let Some(record) = records.recv().await {
                    let event = if record.key.as_deref() == Some(&b"fail"[..]) {
                        ProducerEvent::Error(DeliveryError {
                            record,
                            error: KafkaError::Canceled,
                        })
                    } else {
                        ProducerEvent::Success(record)
                    };
                    if results_tx.send(event).await.is_err() {
                        return;
                    }
                }
                for source in [ResultSource::Successes, ResultSource::Errors] {
                    drop(results_tx.send(ProducerEvent::Closed(source)).await);
                }
            });
            Self {
                input,
                results: Some(results),
                pump: Some(pump),
            }
        }
    }

    #[async_trait]
    impl AsyncProducer for EchoProducer {
        fn input(&self) -> mpsc::Sender<OutboundRecord> {
            self.input.clone()
        }

        fn take_results(&mut self) -> Option<mpsc::Receiver<ProducerEvent>> {
            self.results.take()
        }

        async fn close(&mut self) -> Result<(), ProducerError> {
            let (closed, _) = mpsc::channel(1);
            drop(std::mem::replace(&mut self.input, closed));
            if let Some(pump) = self.pump.take() {
                pump.await?;
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn callbacks_receive_results_and_buffers_return_to_the_pool() {
        let delivered = Arc::new(Mutex::new(Vec::new()));
        let failed = Arc::new(Mutex::new(Vec::new()));

        let settings = {
            let delivered = delivered.clone();
            let failed = failed.clone();
            ProducerSettings::builder("events")
                .on_success(move |record: &OutboundRecord| {
                    delivered.lock().unwrap().push(record.value.to_vec());
                })
                .on_error(move |e: &DeliveryError| {
                    failed.lock().unwrap().push(e.record.key.clone());
                })
                .build()
                .unwrap()
        };
        let pool = BufferPool::new(4, 64);
        let producer: Producer<u32> = Producer::json(EchoProducer::new(), settings, pool.clone());

        producer.send("", &1).await.unwrap();
        producer.send("fail", &2).await.unwrap();
        producer.send("user", &3).await.unwrap();
        producer.close().await.unwrap();

        assert_eq!(*delivered.lock().unwrap(), vec![b"1".to_vec(), b"3".to_vec()]);
        assert_eq!(*failed.lock().unwrap(), vec![Some(b"fail".to_vec())]);
        // Delivered buffers came back, how many depends on reuse between sends
        assert!(pool.pooled() >= 1);
    }

    #[tokio::test]
    async fn result_loop_releases_delivered_buffers_until_both_sources_close() {
        let (results_tx, results) = mpsc::channel(8);
        let pool = BufferPool::new(4, 64);
        let errors = Arc::new(Mutex::new(0));

        let mut delivered = BytesMut::with_capacity(64);
        delivered.extend_from_slice(b"payload");
        results_tx
            .send(ProducerEvent::Success(OutboundRecord::new("events", "", delivered)))
            .await
            .unwrap();
        results_tx
            .send(ProducerEvent::Error(DeliveryError {
                record: OutboundRecord::new("events", "", BytesMut::new()),
                error: KafkaError::Canceled,
            }))
            .await
            .unwrap();
        results_tx
            .send(ProducerEvent::Closed(ResultSource::Errors))
            .await
            .unwrap();
        results_tx
            .send(ProducerEvent::Closed(ResultSource::Successes))
            .await
            .unwrap();

        let counted = errors.clone();
        let on_error: ErrorCallback = Arc::new(move |_| *counted.lock().unwrap() += 1);
        // Returns although the sender is still alive
        run_result_loop(results, log_success(), on_error, pool.clone()).await;

        assert_eq!(*errors.lock().unwrap(), 1);
        assert_eq!(pool.pooled(), 1);
        assert!(pool.acquire().is_empty());
        drop(results_tx);
    }

    #[tokio::test]
    async fn encoding_failure_never_reaches_the_broker() {
        let (input, mut records) = mpsc::channel(8);
        struct Capture(mpsc::Sender<OutboundRecord>);

        #[async_trait]
        impl AsyncProducer for Capture {
            fn input(&self) -> mpsc::Sender<OutboundRecord> {
                self.0.clone()
            }
            fn take_results(&mut self) -> Option<mpsc::Receiver<ProducerEvent>> {
                None
            }
            async fn close(&mut self) -> Result<(), ProducerError> {
                Ok(())
            }
        }

        let failing = |_: &str, buffer: &mut BytesMut| -> Result<(), EncodeError> {
            buffer.extend_from_slice(b"partial");
            Err("unsupported value".into())
        };
        let pool = BufferPool::new(4, 64);
        let settings = ProducerSettings::builder("events").build().unwrap();
        let producer: Producer<str> = Producer::new(Capture(input), settings, failing, pool.clone());

        let result = producer.send("", "ping").await;

        assert!(matches!(result, Err(ProducerError::Encode(_))));
        assert!(records.try_recv().is_err());
        // The buffer went straight back, emptied
        assert_eq!(pool.pooled(), 1);
        assert!(pool.acquire().is_empty());
    }

    #[tokio::test]
    async fn closed_input_is_reported() {
        let (input, records) = mpsc::channel(1);
        drop(records);
        struct Closed(mpsc::Sender<OutboundRecord>);

        #[async_trait]
        impl AsyncProducer for Closed {
            fn input(&self) -> mpsc::Sender<OutboundRecord> {
                self.0.clone()
            }
            fn take_results(&mut self) -> Option<mpsc::Receiver<ProducerEvent>> {
                None
            }
            async fn close(&mut self) -> Result<(), ProducerError> {
                Ok(())
            }
        }

        let pool = BufferPool::new(4, 64);
        let settings = ProducerSettings::builder("events").build().unwrap();
        let producer: Producer<u32> = Producer::json(Closed(input), settings, pool.clone());

        assert!(matches!(
            producer.send("", &7).await,
            Err(ProducerError::InputClosed)
        ));
        assert_eq!(pool.pooled(), 1);
    }
}
