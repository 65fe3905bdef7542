use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use kafka_common::Metrics;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::broker::{Claim, ConsumerGroupHandler, GroupSession};
use crate::error::{BrokerError, HandlerError};
use crate::event::Event;
use crate::message_handler::MessageHandler;

/// Binds consumer-group sessions to a [`MessageHandler`].
///
/// Each claim is processed sequentially inside the task the broker client already runs for
/// that partition.
pub struct ConsumerHandler<E> {
    handler: Arc<MessageHandler<E>>,
    keep_offset: bool,
    metrics: Metrics,
    cancel: CancellationToken,
}

impl<E: Event> ConsumerHandler<E> {
    pub fn new(
        handler: Arc<MessageHandler<E>>,
        keep_offset: bool,
        metrics: Metrics,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            handler,
            keep_offset,
            metrics,
            cancel,
        }
    }
}

#[async_trait]
impl<E: Event> ConsumerGroupHandler for ConsumerHandler<E> {
    async fn setup(&self, _session: &dyn GroupSession) -> Result<(), BrokerError> {
        debug!("session setup, opening output queue");
        self.handler.open();
        Ok(())
    }

    async fn consume_claim(
        &self,
        session: &dyn GroupSession,
        claim: &mut Claim,
    ) -> Result<(), BrokerError> {
        info!(
            topic = claim.topic(),
            partition = claim.partition(),
            "consuming claim"
        );

        while let Some(message) = claim.next().await {
            let started = Instant::now();
            let result = self.handler.handle(&message, &self.cancel).await;

            match &result {
                Ok(()) => {
                    // Offsets are only tracked by the broker for consumer groups
                    if self.keep_offset {
                        session.mark_message(&message);
                    }
                }
                Err(e) => {
                    self.metrics
                        .record_error(&message.topic, message.partition, &e.to_string());
                    error!(
                        topic = %message.topic,
                        partition = message.partition,
                        offset = message.offset,
                        error = %e,
                        "failed to consume a claim message"
                    );
                }
            }

            self.metrics.record_event(&message.topic, message.partition);
            self.metrics
                .record_duration(&message.topic, message.partition, started.elapsed());

            if matches!(result, Err(HandlerError::Cancelled)) {
                break;
            }
        }

        debug!(
            topic = claim.topic(),
            partition = claim.partition(),
            "claim finished"
        );
        Ok(())
    }

    async fn cleanup(&self, _session: &dyn GroupSession) -> Result<(), BrokerError> {
        debug!("session cleanup, closing output queue");
        self.handler.close_session();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::RawMessage;
    use crate::event::DecodeError;
    use crate::message_handler::HandlerConfig;
    use chrono::{TimeZone, Utc};
    use std::sync::Mutex;
    use tokio::sync::mpsc;

    struct Payload(i64);

    impl Event for Payload {
        fn time(&self) -> i64 {
            self.0
        }
    }

    fn first_byte_as_time(message: &RawMessage) -> Result<Payload, DecodeError> {
        match message.value.as_deref() {
            Some([t, ..]) => Ok(Payload(i64::from(*t))),
            _ => Err("empty payload".into()),
        }
    }

    #[derive(Default)]
    struct RecordingSession {
        marked: Mutex<Vec<i64>>,
    }

    impl GroupSession for RecordingSession {
        fn mark_message(&self, message: &RawMessage) {
            self.marked.lock().unwrap().push(message.offset);
        }
    }

    fn message(offset: i64, value: Option<u8>) -> RawMessage {
        RawMessage {
            topic: "events".to_owned(),
            partition: 2,
            offset,
            key: None,
            value: value.map(|v| vec![v]),
            timestamp: None,
        }
    }

    async fn consume(keep_offset: bool, messages: Vec<RawMessage>) -> (Vec<i64>, usize) {
        let (tx, mut rx) = mpsc::channel(16);
        let config = HandlerConfig {
            batch_size: 16,
            // Times up to 10 are stale
            read_since: Some(Utc.timestamp_opt(10, 0).unwrap()),
        };
        let handler = Arc::new(MessageHandler::new(
            tx,
            config,
            Box::new(first_byte_as_time),
        ));
        let consumer =
            ConsumerHandler::new(handler, keep_offset, Metrics::noop(), CancellationToken::new());
        let session = RecordingSession::default();

        let (claim_tx, mut claim) = Claim::channel("events", 2, 16);
        for message in messages {
            claim_tx.send(message).await.unwrap();
        }
        drop(claim_tx);

        consumer.setup(&session).await.unwrap();
        consumer.consume_claim(&session, &mut claim).await.unwrap();
        consumer.cleanup(&session).await.unwrap();

        let mut received = 0;
        while rx.try_recv().is_ok() {
            received += 1;
        }
        let marked = session.marked.lock().unwrap().clone();
        (marked, received)
    }

    #[tokio::test]
    async fn marks_only_successfully_handled_messages() {
        let messages = vec![
            message(0, Some(20)),
            message(1, Some(5)),
            message(2, None),
            message(3, Some(30)),
        ];

        let (marked, received) = consume(true, messages).await;

        assert_eq!(marked, vec![0, 3]);
        assert_eq!(received, 2);
    }

    #[tokio::test]
    async fn never_marks_without_keep_offset() {
        let messages = vec![message(0, Some(20)), message(1, Some(30))];

        let (marked, received) = consume(false, messages).await;

        assert!(marked.is_empty());
        assert_eq!(received, 2);
    }

    #[tokio::test]
    async fn cleanup_closes_the_session_queue() {
        let (tx, _rx) = mpsc::channel(1);
        let config = HandlerConfig {
            batch_size: 1,
            read_since: None,
        };
        let handler = Arc::new(MessageHandler::new(
            tx,
            config,
            Box::new(first_byte_as_time),
        ));
        let consumer = ConsumerHandler::new(
            handler.clone(),
            true,
            Metrics::noop(),
            CancellationToken::new(),
        );
        let session = RecordingSession::default();

        consumer.setup(&session).await.unwrap();
        assert!(handler.is_open());
        consumer.cleanup(&session).await.unwrap();
        assert!(!handler.is_open());
    }
}
